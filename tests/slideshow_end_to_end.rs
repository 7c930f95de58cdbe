use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use simple_slideshow::config::AdvanceMode;
use simple_slideshow::events::{SurfaceId, SurfaceSpec, TargetKey};
use simple_slideshow::playlist::Playlist;
use simple_slideshow::processing::layout::Rect;
use simple_slideshow::tasks::files::{DEFAULT_EXTENSIONS, discover_images};
use simple_slideshow::tasks::loader::ImageDecoder;
use simple_slideshow::tasks::slideshow::{PaintOutcome, Slideshow, SlideshowOptions};
use simple_slideshow::tasks::viewer::surface::SurfacePhase;
use simple_slideshow::testkit::{BackendCall, RecordingBackend};

const INTERVAL: Duration = Duration::from_secs(1);

fn write_pngs(dir: &Path, count: usize) {
    for i in 0..count {
        let shade = (i * 40) as u8;
        let img = RgbaImage::from_pixel(32 + i as u32 * 8, 24, Rgba([shade, 0, 255 - shade, 255]));
        img.save(dir.join(format!("img{i}.png"))).unwrap();
    }
}

fn scan(dir: &Path) -> Vec<PathBuf> {
    let extensions: Vec<String> = DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    discover_images(&[dir.to_path_buf()], &extensions, false)
}

fn slideshow(entries: Vec<PathBuf>, advance: AdvanceMode) -> Slideshow<ImageDecoder, RecordingBackend> {
    let options = SlideshowOptions {
        interval: INTERVAL,
        advance,
        animation_duration: Duration::from_millis(200),
        frame_interval: Duration::from_millis(50),
        seed: Some(3),
        ..SlideshowOptions::default()
    };
    Slideshow::new(
        Playlist::with_seed(entries, false, 3),
        ImageDecoder::new(),
        RecordingBackend::new(),
        options,
    )
}

fn window(key: u64) -> SurfaceSpec {
    SurfaceSpec {
        target: TargetKey(key),
        bounds: Rect::new(0.0, 0.0, 640.0, 480.0),
    }
}

#[test]
fn every_image_once_per_cycle_then_repeat() {
    let dir = tempfile::tempdir().unwrap();
    write_pngs(dir.path(), 5);
    let entries = scan(dir.path());
    assert_eq!(entries.len(), 5);

    let mut show = slideshow(entries.clone(), AdvanceMode::All);
    let t0 = Instant::now();
    let mut shown = show.start(&[window(1)], t0).shown;
    for tick in 1..=5 {
        let summary = show.poll(t0 + INTERVAL * tick);
        assert!(summary.failures.is_empty());
        shown.extend(summary.shown);
    }

    let paths: Vec<PathBuf> = shown.into_iter().map(|d| d.path).collect();
    assert_eq!(paths.len(), 6);
    assert_eq!(&paths[..5], entries.as_slice());
    assert_eq!(paths[5], entries[0]);
}

#[test]
fn placed_images_stay_inside_surface() {
    let dir = tempfile::tempdir().unwrap();
    write_pngs(dir.path(), 5);
    let mut show = slideshow(scan(dir.path()), AdvanceMode::All);
    let t0 = Instant::now();
    show.start(&[window(1)], t0);
    let bounds = Rect::new(0.0, 0.0, 640.0, 480.0);
    for tick in 1..=20 {
        show.poll(t0 + INTERVAL * tick);
        let surface = show.surface(SurfaceId(0)).unwrap();
        assert!(bounds.contains_rect(&surface.placement()));
    }
}

#[test]
fn corrupt_file_is_skipped_on_the_next_tick() {
    let dir = tempfile::tempdir().unwrap();
    write_pngs(dir.path(), 2);
    std::fs::write(dir.path().join("img1.png"), b"not a png").unwrap();
    let entries = scan(dir.path());

    let mut show = slideshow(entries.clone(), AdvanceMode::All);
    let t0 = Instant::now();
    assert_eq!(show.start(&[window(1)], t0).shown[0].path, entries[0]);

    let summary = show.poll(t0 + INTERVAL);
    assert!(summary.shown.is_empty());
    assert_eq!(summary.failures.len(), 1);
    let surface = show.surface(SurfaceId(0)).unwrap();
    assert_eq!(surface.image().unwrap().path, entries[0]);

    let summary = show.poll(t0 + INTERVAL * 2);
    assert_eq!(summary.shown[0].path, entries[0]);
}

#[test]
fn spanned_monitors_take_turns() {
    let dir = tempfile::tempdir().unwrap();
    write_pngs(dir.path(), 4);
    let mut show = slideshow(scan(dir.path()), AdvanceMode::RoundRobin);
    let t0 = Instant::now();
    let left = SurfaceSpec {
        target: TargetKey(7),
        bounds: Rect::new(-1280.0, 0.0, 1280.0, 1024.0),
    };
    let right = SurfaceSpec {
        target: TargetKey(7),
        bounds: Rect::new(0.0, 0.0, 1920.0, 1080.0),
    };
    assert_eq!(show.start(&[left, right], t0).shown.len(), 2);
    assert_eq!(show.target_refs(TargetKey(7)), 2);
    assert_eq!(
        show.surface(SurfaceId(1)).unwrap().bounds(),
        Rect::new(1280.0, 0.0, 1920.0, 1080.0)
    );

    let turns: Vec<SurfaceId> = (1..=4)
        .map(|tick| {
            let summary = show.poll(t0 + INTERVAL * tick);
            assert_eq!(summary.shown.len(), 1);
            summary.shown[0].surface
        })
        .collect();
    assert_eq!(turns, vec![SurfaceId(0), SurfaceId(1), SurfaceId(0), SurfaceId(1)]);

    assert_eq!(show.paint(TargetKey(7)), PaintOutcome::Presented);
    let frames = show.resources().backend().frames(TargetKey(7));
    assert_eq!(frames.last().unwrap().len(), 2);
}

#[test]
fn device_loss_is_recovered_without_losing_the_show() {
    let dir = tempfile::tempdir().unwrap();
    write_pngs(dir.path(), 3);
    let entries = scan(dir.path());
    let mut show = slideshow(entries.clone(), AdvanceMode::All);
    let t0 = Instant::now();
    show.start(&[window(1)], t0);
    assert_eq!(show.paint(TargetKey(1)), PaintOutcome::Presented);

    show.resources_mut().backend_mut().lose_device_on_next_present();
    assert_eq!(show.paint(TargetKey(1)), PaintOutcome::DeviceLost);
    assert_eq!(
        show.surface(SurfaceId(0)).unwrap().phase(),
        SurfacePhase::ResourcesInvalid
    );
    assert!(show.take_repaint_requests().contains(&TargetKey(1)));

    assert_eq!(show.paint(TargetKey(1)), PaintOutcome::Presented);
    assert_eq!(show.resources().devices_created(), 2);
    assert_ne!(
        show.surface(SurfaceId(0)).unwrap().phase(),
        SurfacePhase::ResourcesInvalid
    );
    let uploads_on_new_device = show
        .resources()
        .backend()
        .calls()
        .iter()
        .filter(|call| matches!(call, BackendCall::Upload { device: 2, .. }))
        .count();
    assert_eq!(uploads_on_new_device, 1);

    let summary = show.poll(t0 + INTERVAL);
    assert_eq!(summary.shown[0].path, entries[1]);
    assert_eq!(show.paint(TargetKey(1)), PaintOutcome::Presented);
}

#[test]
fn closing_the_only_window_stops_advancing() {
    let dir = tempfile::tempdir().unwrap();
    write_pngs(dir.path(), 2);
    let mut show = slideshow(scan(dir.path()), AdvanceMode::All);
    let t0 = Instant::now();
    show.start(&[window(1)], t0);
    show.paint(TargetKey(1));

    assert!(show.remove_surface(SurfaceId(0)).unwrap());
    assert_eq!(show.resources().live_targets(), 0);
    assert!(show.poll(t0 + INTERVAL * 3).is_empty());
    assert_eq!(show.paint(TargetKey(1)), PaintOutcome::NoSurfaces);
}
