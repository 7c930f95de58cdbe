use simple_slideshow::processing::layout::scale_to_fit;

fn assert_aspect_preserved(w0: u32, h0: u32, w1: u32, h1: u32) {
    let r0 = (w0 as f32) / (h0 as f32);
    let r1 = (w1 as f32) / (h1 as f32);
    assert!((r0 - r1).abs() < 0.01, "aspect changed: {} vs {}", r0, r1);
}

#[test]
fn landscape_large_on_1080p() {
    let (w, h) = scale_to_fit(4032, 3024, 1920, 1080);
    assert_eq!((w, h), (1440, 1080));
    assert_aspect_preserved(4032, 3024, w, h);
}

#[test]
fn portrait_large_on_rotated_display() {
    let (w, h) = scale_to_fit(3024, 4032, 1080, 1920);
    assert_eq!((w, h), (1080, 1440));
    assert_aspect_preserved(3024, 4032, w, h);
}

#[test]
fn already_small_no_upscale() {
    assert_eq!(scale_to_fit(800, 600, 1920, 1080), (800, 600));
}

#[test]
fn panorama_is_width_bound() {
    let (w, h) = scale_to_fit(6000, 1000, 1920, 1080);
    assert_eq!((w, h), (1920, 320));
    assert_aspect_preserved(6000, 1000, w, h);
}

#[test]
fn single_axis_overflow_still_scales() {
    assert_eq!(scale_to_fit(2000, 500, 1920, 1080), (1920, 480));
    assert_eq!(scale_to_fit(500, 1200, 1920, 1080), (450, 1080));
}

#[test]
fn square_on_laptop_panel() {
    assert_eq!(scale_to_fit(3000, 3000, 1366, 768), (768, 768));
}
