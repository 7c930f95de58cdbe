//! Drives every surface from the single event-loop thread: pulls paths from
//! the shared playlist, decodes them, places them with the peekaboo
//! sampler, runs the crossfade timers and hands frames to the render
//! resources.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use crate::config::{AdvanceMode, Configuration};
use crate::error::{RenderError, SlideshowError};
use crate::events::{Displayed, SurfaceId, SurfaceSpec, TargetKey};
use crate::gpu::resources::{RenderBackend, RenderResourceManager, TargetHandle, TargetOptions};
use crate::playlist::Playlist;
use crate::processing::layout::{Rect, Size, normalize_to_origin};
use crate::processing::peekaboo::DEFAULT_BIN_COUNT;
use crate::tasks::loader::Decoder;
use crate::tasks::timers::{TimerKind, TimerQueue};
use crate::tasks::viewer::surface::{AnimationStep, SurfacePhase, SurfaceState};

#[derive(Debug, Clone)]
pub struct SlideshowOptions {
    pub interval: Duration,
    pub advance: AdvanceMode,
    pub animation_duration: Duration,
    pub frame_interval: Duration,
    pub placement_bins: usize,
    pub target: TargetOptions,
    pub seed: Option<u64>,
}

impl Default for SlideshowOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            advance: AdvanceMode::All,
            animation_duration: Duration::from_millis(1000),
            frame_interval: Duration::from_millis(33),
            placement_bins: DEFAULT_BIN_COUNT,
            target: TargetOptions::default(),
            seed: None,
        }
    }
}

impl SlideshowOptions {
    pub fn from_config(cfg: &Configuration) -> Self {
        Self {
            interval: cfg.interval,
            advance: cfg.advance,
            animation_duration: cfg.animation.duration,
            frame_interval: cfg.animation.frame_interval(),
            placement_bins: cfg.placement_bins,
            target: TargetOptions {
                darken: cfg.animation.darken,
                alpha: cfg.window_alpha(),
            },
            seed: cfg.seed,
        }
    }
}

#[derive(Debug)]
pub struct SurfaceFailure {
    pub surface: SurfaceId,
    pub error: SlideshowError,
}

/// What happened during one advance (or one `poll`).
#[derive(Debug, Default)]
pub struct TickSummary {
    pub shown: Vec<Displayed>,
    pub failures: Vec<SurfaceFailure>,
}

impl TickSummary {
    pub fn is_empty(&self) -> bool {
        self.shown.is_empty() && self.failures.is_empty()
    }

    fn merge(&mut self, other: TickSummary) {
        self.shown.extend(other.shown);
        self.failures.extend(other.failures);
    }

    fn record(&mut self, surface: SurfaceId, result: Result<Displayed, SlideshowError>) {
        match result {
            Ok(displayed) => self.shown.push(displayed),
            Err(error) => self.failures.push(SurfaceFailure { surface, error }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintOutcome {
    Presented,
    /// The target is occluded or minimised.
    Hidden,
    /// No surface draws into the target.
    NoSurfaces,
    /// Resources were dropped; every target has a repaint queued.
    DeviceLost,
    Failed,
}

#[derive(Debug)]
pub struct AddedSurface {
    pub id: SurfaceId,
    pub primed: Result<Displayed, SlideshowError>,
}

struct SurfaceEntry<B: RenderBackend> {
    state: SurfaceState,
    target: TargetHandle<B>,
}

/// Produces a fresh list of image paths when the slideshow restarts.
pub type Rescan = Box<dyn FnMut() -> Vec<PathBuf>>;

pub struct Slideshow<D: Decoder, B: RenderBackend> {
    options: SlideshowOptions,
    playlist: Playlist,
    decoder: D,
    resources: RenderResourceManager<B>,
    surfaces: BTreeMap<SurfaceId, SurfaceEntry<B>>,
    timers: TimerQueue,
    rng: StdRng,
    next_id: u32,
    round_robin_remaining: usize,
    hidden: HashSet<TargetKey>,
    repaint: BTreeSet<TargetKey>,
    running: bool,
    started_before: bool,
    rescan: Option<Rescan>,
    /// Distinct entries that failed to decode since the last good decode on
    /// any surface.
    failed_entries: HashSet<PathBuf>,
}

impl<D: Decoder, B: RenderBackend> Slideshow<D, B> {
    pub fn new(playlist: Playlist, decoder: D, backend: B, options: SlideshowOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_os_rng(),
        };
        Self {
            options,
            playlist,
            decoder,
            resources: RenderResourceManager::new(backend),
            surfaces: BTreeMap::new(),
            timers: TimerQueue::new(),
            rng,
            next_id: 0,
            round_robin_remaining: 0,
            hidden: HashSet::new(),
            repaint: BTreeSet::new(),
            running: false,
            started_before: false,
            rescan: None,
            failed_entries: HashSet::new(),
        }
    }

    /// Every start after the first swaps in the list returned by `rescan`.
    pub fn with_rescan(mut self, rescan: impl FnMut() -> Vec<PathBuf> + 'static) -> Self {
        self.rescan = Some(Box::new(rescan));
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn resources(&self) -> &RenderResourceManager<B> {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut RenderResourceManager<B> {
        &mut self.resources
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&SurfaceState> {
        self.surfaces.get(&id).map(|entry| &entry.state)
    }

    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        self.surfaces.keys().copied().collect()
    }

    pub fn surfaces_on(&self, target: TargetKey) -> Vec<SurfaceId> {
        self.surfaces
            .iter()
            .filter(|(_, entry)| entry.state.target() == target)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of surfaces holding a reference to `target`.
    pub fn target_refs(&self, target: TargetKey) -> usize {
        self.surfaces
            .values()
            .find(|entry| entry.state.target() == target)
            .map_or(0, |entry| entry.target.ref_count())
    }

    /// Activates one surface per `SurfaceSpec` and shows a first image on each.
    ///
    /// Specs sharing a target are normalised together so the top-left-most
    /// surface lands on the target's origin. The advance timer starts once
    /// every surface is primed. A restart refreshes the playlist first when a
    /// rescan source is set.
    pub fn start(&mut self, specs: &[SurfaceSpec], now: Instant) -> TickSummary {
        if self.running {
            self.stop();
        }
        if self.started_before {
            if let Some(rescan) = self.rescan.as_mut() {
                let entries = rescan();
                self.playlist.replace(entries);
            }
        }
        self.started_before = true;
        self.failed_entries.clear();
        let mut groups: BTreeMap<TargetKey, Vec<Rect>> = BTreeMap::new();
        for spec in specs {
            groups.entry(spec.target).or_default().push(spec.bounds);
        }

        let mut ids = Vec::with_capacity(specs.len());
        for (target, rects) in groups {
            let normalized = normalize_to_origin(&rects);
            let size = Rect::union_all(&normalized)
                .map(|union| Size::new(union.right().round() as u32, union.bottom().round() as u32))
                .unwrap_or_default();
            for bounds in normalized {
                ids.push(self.insert_surface(target, bounds, size));
            }
        }
        self.running = true;

        let mut summary = TickSummary::default();
        for id in ids {
            let result = self.load_next_image(id, now);
            summary.record(id, result);
        }
        self.timers
            .start(TimerKind::Advance, self.options.interval, now);
        info!(
            surfaces = self.surfaces.len(),
            playlist = self.playlist.len(),
            interval = ?self.options.interval,
            advance = ?self.options.advance,
            "slideshow started"
        );
        summary
    }

    /// Adds a surface to a running (or idle) slideshow. `spec.bounds` are
    /// taken as target-relative.
    pub fn add_surface(&mut self, spec: SurfaceSpec, now: Instant) -> AddedSurface {
        let size = Size::new(
            spec.bounds.right().max(0.0).round() as u32,
            spec.bounds.bottom().max(0.0).round() as u32,
        );
        let id = self.insert_surface(spec.target, spec.bounds, size);
        if !self.timers.is_active(TimerKind::Advance) {
            self.timers
                .start(TimerKind::Advance, self.options.interval, now);
        }
        self.running = true;
        let primed = self.load_next_image(id, now);
        AddedSurface { id, primed }
    }

    fn insert_surface(&mut self, target: TargetKey, bounds: Rect, target_size: Size) -> SurfaceId {
        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        let handle = self
            .resources
            .acquire(target, target_size, self.options.target);
        let state = SurfaceState::new(
            id,
            target,
            bounds,
            self.options.placement_bins,
            self.options.animation_duration,
        );
        if !self.surfaces.is_empty() && self.playlist.shuffle_enabled() {
            // Surfaces sharing one list should not show the same sequence.
            self.playlist.shuffle();
        }
        debug!(surface = %id, target_key = %target, ?bounds, "surface added");
        self.surfaces.insert(
            id,
            SurfaceEntry {
                state,
                target: handle,
            },
        );
        self.repaint.insert(target);
        id
    }

    /// Drops a surface. Returns `true` when its target had no other surface
    /// and was destroyed.
    pub fn remove_surface(&mut self, id: SurfaceId) -> Result<bool, SlideshowError> {
        let entry = self
            .surfaces
            .remove(&id)
            .ok_or(SlideshowError::UnknownSurface(id))?;
        self.timers.stop(TimerKind::Animation(id));
        let target = entry.state.target();
        let destroyed = self.resources.release(entry.target, id);
        if destroyed {
            self.hidden.remove(&target);
            self.repaint.remove(&target);
        } else {
            self.repaint.insert(target);
        }
        if self.surfaces.is_empty() {
            self.timers.stop(TimerKind::Advance);
        }
        debug!(surface = %id, target_key = %target, destroyed, "surface removed");
        Ok(destroyed)
    }

    /// Follows a window resize. Surfaces that covered the whole window keep
    /// covering it; their histograms restart.
    pub fn resize_target(&mut self, target: TargetKey, size: Size) {
        let Some(old) = self
            .surfaces
            .values()
            .find(|entry| entry.state.target() == target)
            .map(|entry| entry.target.size())
        else {
            return;
        };
        if old == size {
            return;
        }
        let full_old = Rect::from_size(old);
        for entry in self
            .surfaces
            .values_mut()
            .filter(|entry| entry.state.target() == target)
        {
            if entry.state.bounds() == full_old {
                entry.state.resize(Rect::from_size(size));
            }
            self.resources.resize(&entry.target, size);
        }
        self.repaint.insert(target);
        debug!(target_key = %target, width = size.width, height = size.height, "target resized");
    }

    /// Advances surfaces according to the advance mode.
    pub fn on_advance_tick(&mut self, now: Instant) -> TickSummary {
        let due: Vec<SurfaceId> = match self.options.advance {
            AdvanceMode::All => self.surfaces.keys().copied().collect(),
            AdvanceMode::RoundRobin => self.next_round_robin().into_iter().collect(),
        };
        let mut summary = TickSummary::default();
        for id in due {
            let failed = self
                .surfaces
                .get(&id)
                .is_some_and(|entry| entry.state.phase() == SurfacePhase::Failed);
            if failed {
                continue;
            }
            let result = self.load_next_image(id, now);
            summary.record(id, result);
        }
        summary
    }

    fn next_round_robin(&mut self) -> Option<SurfaceId> {
        let count = self.surfaces.len();
        if count == 0 {
            return None;
        }
        if self.round_robin_remaining == 0 || self.round_robin_remaining > count {
            self.round_robin_remaining = count;
        }
        self.round_robin_remaining -= 1;
        let turn = count - 1 - self.round_robin_remaining;
        self.surfaces.keys().nth(turn).copied()
    }

    /// Replaces the image on `id` with the next playlist entry.
    ///
    /// A decode failure leaves the surface as it was; the following entry
    /// is tried on the next advance. Once every distinct playlist entry has
    /// failed with no good decode in between, the surface stops advancing.
    pub fn load_next_image(&mut self, id: SurfaceId, now: Instant) -> Result<Displayed, SlideshowError> {
        let entry = self
            .surfaces
            .get_mut(&id)
            .ok_or(SlideshowError::UnknownSurface(id))?;
        if entry.state.phase() == SurfacePhase::Failed {
            return Err(SlideshowError::NoUsableImages {
                attempted: self.failed_entries.len(),
            });
        }

        let path = self.playlist.next().inspect_err(|_| {
            debug!(surface = %id, "playlist empty; nothing to show");
        })?;

        entry.state.begin_loading();
        let image = match self.decoder.decode(&path) {
            Ok(image) => image,
            Err(source) => {
                entry.state.abort_loading();
                self.failed_entries.insert(path.clone());
                let attempted = self.failed_entries.len();
                if attempted >= self.playlist.distinct_len() {
                    entry.state.fail();
                    self.timers.stop(TimerKind::Animation(id));
                    error!(surface = %id, attempted, "no usable images; surface stopped");
                    return Err(SlideshowError::NoUsableImages { attempted });
                }
                warn!(surface = %id, path = %path.display(), error = %source, "decode failed; skipping");
                return Err(SlideshowError::Decode { path, source });
            }
        };
        self.failed_entries.clear();

        let mut device_lost = false;
        if entry.state.image().is_some() {
            let previous = entry.state.layer();
            match self.resources.snapshot(&entry.target, &previous) {
                Ok(()) => {}
                Err(RenderError::DeviceLost) => device_lost = true,
                Err(err) => warn!(surface = %id, error = %err, "background snapshot failed"),
            }
        }

        let placement = entry.state.place(image, &mut self.rng);
        entry.state.start_animation(now);
        let target = entry.state.target();
        self.timers.start(
            TimerKind::Animation(id),
            self.options.frame_interval,
            now,
        );
        self.repaint.insert(target);
        info!(
            surface = %id,
            path = %path.display(),
            x = placement.x,
            y = placement.y,
            width = placement.width,
            height = placement.height,
            "showing image"
        );
        if device_lost {
            self.handle_device_loss();
        }
        Ok(Displayed { surface: id, path })
    }

    /// Recomputes the crossfade progress of `id` and queues a repaint. The
    /// animation timer stops once the fade completes.
    pub fn on_animation_tick(&mut self, id: SurfaceId, now: Instant) -> Option<AnimationStep> {
        let Some(entry) = self.surfaces.get_mut(&id) else {
            self.timers.stop(TimerKind::Animation(id));
            return None;
        };
        let step = entry.state.advance_animation(now);
        self.repaint.insert(entry.state.target());
        if step.finished {
            self.timers.stop(TimerKind::Animation(id));
            debug!(surface = %id, "crossfade complete");
        }
        Some(step)
    }

    /// Fires every timer that is due at `now`.
    pub fn poll(&mut self, now: Instant) -> TickSummary {
        let mut summary = TickSummary::default();
        for kind in self.timers.take_due(now) {
            match kind {
                TimerKind::Advance => summary.merge(self.on_advance_tick(now)),
                TimerKind::Animation(id) => {
                    self.on_animation_tick(id, now);
                }
            }
        }
        summary
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Composites every surface of `target` and presents the frame.
    pub fn paint(&mut self, target: TargetKey) -> PaintOutcome {
        if self.hidden.contains(&target) {
            return PaintOutcome::Hidden;
        }
        let mut handle = None;
        let layers: Vec<_> = self
            .surfaces
            .values()
            .filter(|entry| entry.state.target() == target)
            .map(|entry| {
                handle.get_or_insert(&entry.target);
                entry.state.layer()
            })
            .collect();
        let Some(handle) = handle else {
            return PaintOutcome::NoSurfaces;
        };
        let result = self.resources.paint(handle, &layers);
        drop(layers);

        match result {
            Ok(()) => {
                for entry in self
                    .surfaces
                    .values_mut()
                    .filter(|entry| entry.state.target() == target)
                {
                    entry.state.resources_restored();
                }
                PaintOutcome::Presented
            }
            Err(RenderError::DeviceLost) => {
                warn!(target_key = %target, "render device lost; recreating resources");
                self.handle_device_loss();
                PaintOutcome::DeviceLost
            }
            Err(err) => {
                warn!(target_key = %target, error = %err, "paint failed");
                PaintOutcome::Failed
            }
        }
    }

    fn handle_device_loss(&mut self) {
        self.resources.invalidate_all();
        for entry in self.surfaces.values_mut() {
            entry.state.invalidate_resources();
            self.repaint.insert(entry.state.target());
        }
    }

    /// Occluded targets skip painting until they become visible again.
    pub fn set_target_visible(&mut self, target: TargetKey, visible: bool) {
        if visible {
            if self.hidden.remove(&target) {
                self.repaint.insert(target);
            }
        } else if self.hidden.insert(target) {
            debug!(target_key = %target, "target hidden; painting paused");
        }
    }

    /// Targets whose content changed since the last call.
    pub fn take_repaint_requests(&mut self) -> Vec<TargetKey> {
        std::mem::take(&mut self.repaint).into_iter().collect()
    }

    /// Cancels every timer and releases every surface and target before
    /// returning. The shared device is kept for a later restart.
    pub fn stop(&mut self) {
        self.timers.clear();
        let surfaces = std::mem::take(&mut self.surfaces);
        let count = surfaces.len();
        let mut destroyed = 0;
        for (id, SurfaceEntry { target, .. }) in surfaces {
            if self.resources.release(target, id) {
                destroyed += 1;
            }
        }
        self.repaint.clear();
        self.hidden.clear();
        self.round_robin_remaining = 0;
        self.running = false;
        info!(surfaces = count, targets = destroyed, "slideshow stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{BackendCall, MemoryDecoder, RecordingBackend};
    use std::path::PathBuf;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn slideshow(
        names: &[&str],
        decoder: MemoryDecoder,
        advance: AdvanceMode,
    ) -> Slideshow<MemoryDecoder, RecordingBackend> {
        let options = SlideshowOptions {
            advance,
            seed: Some(5),
            ..SlideshowOptions::default()
        };
        Slideshow::new(
            Playlist::with_seed(paths(names), false, 5),
            decoder,
            RecordingBackend::new(),
            options,
        )
    }

    fn window(key: u64, width: f32, height: f32) -> SurfaceSpec {
        SurfaceSpec {
            target: TargetKey(key),
            bounds: Rect::new(0.0, 0.0, width, height),
        }
    }

    fn shown_path(summary: &TickSummary) -> PathBuf {
        summary.shown[0].path.clone()
    }

    #[test]
    fn round_robin_advances_one_surface_per_tick() {
        let names = ["a", "b", "c", "d", "e", "f", "g"];
        let mut show = slideshow(&names, MemoryDecoder::new(), AdvanceMode::RoundRobin);
        let t0 = Instant::now();
        let primed = show.start(
            &[window(1, 800.0, 600.0), window(2, 800.0, 600.0), window(3, 800.0, 600.0)],
            t0,
        );
        assert_eq!(primed.shown.len(), 3);

        let order: Vec<SurfaceId> = (0..4)
            .map(|_| {
                let summary = show.on_advance_tick(t0);
                assert_eq!(summary.shown.len(), 1);
                summary.shown[0].surface
            })
            .collect();
        assert_eq!(
            order,
            vec![SurfaceId(0), SurfaceId(1), SurfaceId(2), SurfaceId(0)]
        );
    }

    #[test]
    fn all_mode_advances_every_surface() {
        let mut show = slideshow(&["a", "b", "c", "d"], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0), window(2, 800.0, 600.0)], t0);
        let summary = show.on_advance_tick(t0);
        assert_eq!(summary.shown.len(), 2);
        assert!(summary.failures.is_empty());
    }

    #[test]
    fn decode_failure_leaves_surface_and_moves_on() {
        let decoder = MemoryDecoder::new().with_broken("bad");
        let mut show = slideshow(&["a", "bad", "c"], decoder, AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0)], t0);
        let id = SurfaceId(0);
        let before = show.surface(id).unwrap().placement();

        let summary = show.on_advance_tick(t0);
        assert!(matches!(
            summary.failures[0].error,
            SlideshowError::Decode { .. }
        ));
        let surface = show.surface(id).unwrap();
        assert_eq!(surface.image().unwrap().path, PathBuf::from("a"));
        assert_eq!(surface.placement(), before);
        assert_eq!(surface.generation(), 1);

        let summary = show.on_advance_tick(t0);
        assert_eq!(shown_path(&summary), PathBuf::from("c"));
    }

    #[test]
    fn full_cycle_of_failures_stops_the_surface() {
        let decoder = MemoryDecoder::new()
            .with_broken("a")
            .with_broken("b")
            .with_broken("c");
        let mut show = slideshow(&["a", "b", "c"], decoder, AdvanceMode::All);
        let t0 = Instant::now();
        let primed = show.start(&[window(1, 800.0, 600.0)], t0);
        assert!(matches!(primed.failures[0].error, SlideshowError::Decode { .. }));
        show.on_advance_tick(t0);
        let summary = show.on_advance_tick(t0);
        assert!(matches!(
            summary.failures[0].error,
            SlideshowError::NoUsableImages { attempted: 3 }
        ));
        assert_eq!(show.surface(SurfaceId(0)).unwrap().phase(), SurfacePhase::Failed);

        assert!(show.on_advance_tick(t0).is_empty());
        assert_eq!(show.decoder().decoded().len(), 3);
    }

    #[test]
    fn shared_bad_entry_does_not_stop_surfaces() {
        let decoder = MemoryDecoder::new().with_broken("bad");
        let mut show = slideshow(&["bad", "good"], decoder, AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0), window(2, 800.0, 600.0)], t0);
        for _ in 0..4 {
            let summary = show.on_advance_tick(t0);
            assert_eq!(shown_path(&summary), PathBuf::from("good"));
            assert!(matches!(
                summary.failures[0].error,
                SlideshowError::Decode { .. }
            ));
        }
        for id in show.surface_ids() {
            assert_ne!(show.surface(id).unwrap().phase(), SurfacePhase::Failed);
        }
    }

    #[test]
    fn failures_across_surfaces_count_toward_one_cycle() {
        let decoder = MemoryDecoder::new().with_broken("a").with_broken("b");
        let mut show = slideshow(&["a", "b"], decoder, AdvanceMode::All);
        let t0 = Instant::now();
        let primed = show.start(&[window(1, 800.0, 600.0), window(2, 800.0, 600.0)], t0);
        assert!(matches!(primed.failures[0].error, SlideshowError::Decode { .. }));
        assert!(matches!(
            primed.failures[1].error,
            SlideshowError::NoUsableImages { attempted: 2 }
        ));
        show.on_advance_tick(t0);
        for id in show.surface_ids() {
            assert_eq!(show.surface(id).unwrap().phase(), SurfacePhase::Failed);
        }
    }

    #[test]
    fn empty_playlist_keeps_surface_idle() {
        let mut show = slideshow(&[], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        let primed = show.start(&[window(1, 800.0, 600.0)], t0);
        assert!(matches!(primed.failures[0].error, SlideshowError::EmptyPlaylist));
        assert_eq!(show.surface(SurfaceId(0)).unwrap().phase(), SurfacePhase::Idle);
        assert!(show.timers().is_active(TimerKind::Advance));
        let summary = show.on_advance_tick(t0);
        assert!(matches!(summary.failures[0].error, SlideshowError::EmptyPlaylist));
    }

    #[test]
    fn spanned_monitors_share_one_target() {
        let mut show = slideshow(&["a", "b", "c"], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        let specs = [
            SurfaceSpec {
                target: TargetKey(9),
                bounds: Rect::new(-1280.0, 0.0, 1280.0, 1024.0),
            },
            SurfaceSpec {
                target: TargetKey(9),
                bounds: Rect::new(0.0, 0.0, 1920.0, 1080.0),
            },
        ];
        show.start(&specs, t0);
        assert_eq!(
            show.surface(SurfaceId(0)).unwrap().bounds(),
            Rect::new(0.0, 0.0, 1280.0, 1024.0)
        );
        assert_eq!(
            show.surface(SurfaceId(1)).unwrap().bounds(),
            Rect::new(1280.0, 0.0, 1920.0, 1080.0)
        );
        assert_eq!(show.target_refs(TargetKey(9)), 2);

        assert_eq!(show.paint(TargetKey(9)), PaintOutcome::Presented);
        let calls = show.resources().backend().calls();
        assert!(calls.contains(&BackendCall::CreateTarget {
            key: TargetKey(9),
            size: Size::new(3200, 1080),
        }));
        let frames = show.resources().backend().frames(TargetKey(9));
        assert_eq!(frames[0].len(), 2);

        assert!(!show.remove_surface(SurfaceId(0)).unwrap());
        assert_eq!(show.resources().live_targets(), 1);
        assert!(show.remove_surface(SurfaceId(1)).unwrap());
        assert_eq!(show.resources().live_targets(), 0);
        assert!(!show.timers().is_active(TimerKind::Advance));
    }

    #[test]
    fn device_loss_recovers_on_next_paint() {
        let mut show = slideshow(&["a", "b"], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0)], t0);
        assert_eq!(show.paint(TargetKey(1)), PaintOutcome::Presented);
        show.take_repaint_requests();

        show.resources_mut().backend_mut().lose_device_on_next_present();
        assert_eq!(show.paint(TargetKey(1)), PaintOutcome::DeviceLost);
        assert_eq!(
            show.surface(SurfaceId(0)).unwrap().phase(),
            SurfacePhase::ResourcesInvalid
        );
        assert_eq!(show.take_repaint_requests(), vec![TargetKey(1)]);

        assert_eq!(show.paint(TargetKey(1)), PaintOutcome::Presented);
        assert_eq!(
            show.surface(SurfaceId(0)).unwrap().phase(),
            SurfacePhase::Animating
        );
        assert_eq!(show.resources().devices_created(), 2);
    }

    #[test]
    fn device_loss_during_snapshot_still_places_image() {
        let mut show = slideshow(&["a", "b"], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0)], t0);
        show.resources_mut().backend_mut().lose_device_on_next_snapshot();
        let summary = show.on_advance_tick(t0);
        assert_eq!(shown_path(&summary), PathBuf::from("b"));
        assert_eq!(
            show.surface(SurfaceId(0)).unwrap().phase(),
            SurfacePhase::ResourcesInvalid
        );
        assert_eq!(show.paint(TargetKey(1)), PaintOutcome::Presented);
    }

    #[test]
    fn new_image_supersedes_running_fade() {
        let mut show = slideshow(&["a", "b"], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0)], t0);
        let step = show
            .on_animation_tick(SurfaceId(0), t0 + Duration::from_millis(300))
            .unwrap();
        assert!(!step.finished);

        show.load_next_image(SurfaceId(0), t0 + Duration::from_millis(400))
            .unwrap();
        let surface = show.surface(SurfaceId(0)).unwrap();
        assert_eq!(surface.progress(), 0.0);
        assert_eq!(surface.phase(), SurfacePhase::Animating);
        assert!(show.resources().backend().calls().contains(&BackendCall::Snapshot {
            key: TargetKey(1),
            path: Some(PathBuf::from("a")),
        }));
    }

    #[test]
    fn animation_timer_stops_when_settled() {
        let mut show = slideshow(&["a"], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0)], t0);
        let anim = TimerKind::Animation(SurfaceId(0));
        assert!(show.timers().is_active(anim));

        show.poll(t0 + Duration::from_millis(40));
        let progress = show.surface(SurfaceId(0)).unwrap().progress();
        assert!(progress > 0.0 && progress < 1.0);

        show.poll(t0 + Duration::from_millis(1100));
        assert!(!show.timers().is_active(anim));
        assert_eq!(show.surface(SurfaceId(0)).unwrap().phase(), SurfacePhase::Settled);
        assert_eq!(show.take_repaint_requests(), vec![TargetKey(1)]);
    }

    #[test]
    fn hidden_targets_skip_painting() {
        let mut show = slideshow(&["a"], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0)], t0);
        show.set_target_visible(TargetKey(1), false);
        assert_eq!(show.paint(TargetKey(1)), PaintOutcome::Hidden);
        assert_eq!(show.resources().backend().present_count(), 0);

        show.take_repaint_requests();
        show.set_target_visible(TargetKey(1), true);
        assert_eq!(show.take_repaint_requests(), vec![TargetKey(1)]);
        assert_eq!(show.paint(TargetKey(1)), PaintOutcome::Presented);
    }

    #[test]
    fn resize_follows_window() {
        let mut show = slideshow(&["a", "b"], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0)], t0);
        show.paint(TargetKey(1));
        show.resize_target(TargetKey(1), Size::new(400, 300));
        let surface = show.surface(SurfaceId(0)).unwrap();
        assert_eq!(surface.bounds(), Rect::new(0.0, 0.0, 400.0, 300.0));
        assert_eq!(surface.histograms().0.axis_length(), 400.0);
        show.paint(TargetKey(1));
        assert!(show.resources().backend().calls().contains(&BackendCall::CreateTarget {
            key: TargetKey(1),
            size: Size::new(400, 300),
        }));
    }

    #[test]
    fn stop_releases_everything() {
        let mut show = slideshow(&["a", "b"], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0), window(2, 640.0, 480.0)], t0);
        show.paint(TargetKey(1));
        show.stop();
        assert!(!show.is_running());
        assert!(show.surface_ids().is_empty());
        assert!(show.timers().is_empty());
        assert_eq!(show.next_deadline(), None);
        assert_eq!(show.resources().live_targets(), 0);
        assert!(show.take_repaint_requests().is_empty());
    }

    #[test]
    fn restart_rescans_the_playlist() {
        let mut show = slideshow(&["a", "b"], MemoryDecoder::new(), AdvanceMode::All)
            .with_rescan(|| paths(&["x", "y", "z"]));
        let t0 = Instant::now();
        let first = show.start(&[window(1, 800.0, 600.0)], t0);
        assert_eq!(shown_path(&first), PathBuf::from("a"));
        show.on_advance_tick(t0);

        show.stop();
        let again = show.start(&[window(1, 800.0, 600.0)], t0);
        assert_eq!(shown_path(&again), PathBuf::from("x"));
        assert_eq!(show.playlist().len(), 3);
    }

    #[test]
    fn restart_without_rescan_keeps_the_list() {
        let mut show = slideshow(&["a", "b", "c"], MemoryDecoder::new(), AdvanceMode::All);
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0)], t0);
        show.start(&[window(1, 800.0, 600.0)], t0);
        assert_eq!(show.playlist().entries(), paths(&["a", "b", "c"]).as_slice());
        assert_eq!(show.surface_ids().len(), 1);
    }

    #[test]
    fn added_surface_reshuffles_shared_playlist() {
        let names: Vec<String> = (0..12).map(|i| format!("{i}.png")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut show = Slideshow::new(
            Playlist::with_seed(paths(&refs), true, 3),
            MemoryDecoder::new(),
            RecordingBackend::new(),
            SlideshowOptions::default(),
        );
        let t0 = Instant::now();
        show.start(&[window(1, 800.0, 600.0)], t0);
        assert_eq!(show.playlist().cursor(), 1);
        let added = show.add_surface(window(2, 800.0, 600.0), t0);
        assert!(added.primed.is_ok());
        // Reshuffle rewinds the cursor before the new surface primes.
        assert_eq!(show.playlist().cursor(), 1);
        assert_eq!(show.surface_ids().len(), 2);
    }
}
