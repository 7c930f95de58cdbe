//! Pixel-space geometry shared by the slideshow core and the render backends.

use std::fmt;

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle. `x`/`y` may be negative for virtual-desktop
/// coordinates before they are normalised against a target origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width as f32, size.height as f32)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn size(&self) -> Size {
        Size::new(
            self.width.round().max(0.0) as u32,
            self.height.round().max(0.0) as u32,
        )
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// True when `inner` lies completely within `self`, allowing for float
    /// rounding on the edges.
    pub fn contains_rect(&self, inner: &Rect) -> bool {
        const EPS: f32 = 1e-3;
        inner.x >= self.x - EPS
            && inner.y >= self.y - EPS
            && inner.right() <= self.right() + EPS
            && inner.bottom() <= self.bottom() + EPS
    }

    /// Smallest rectangle covering every rect in `rects`.
    pub fn union_all<'a>(rects: impl IntoIterator<Item = &'a Rect>) -> Option<Rect> {
        let mut iter = rects.into_iter();
        let first = *iter.next()?;
        let (mut left, mut top, mut right, mut bottom) =
            (first.x, first.y, first.right(), first.bottom());
        for rect in iter {
            left = left.min(rect.x);
            top = top.min(rect.y);
            right = right.max(rect.right());
            bottom = bottom.max(rect.bottom());
        }
        Some(Rect::new(left, top, right - left, bottom - top))
    }
}

/// Largest size with the source aspect ratio that fits inside `dest`.
///
/// Images already inside the destination keep their native size. Otherwise
/// the destination height is tried first; if the matching width overflows,
/// the destination width constrains instead.
pub fn scale_to_fit(src_w: u32, src_h: u32, dest_w: u32, dest_h: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (0, 0);
    }
    if src_w <= dest_w && src_h <= dest_h {
        return (src_w, src_h);
    }
    // A sliver still keeps one pixel on its short side.
    let width_for_height = (dest_h as f32 * src_w as f32 / src_h as f32).round().max(1.0) as u32;
    if width_for_height <= dest_w {
        (width_for_height, dest_h)
    } else {
        let height_for_width = (src_h as f32 / src_w as f32 * dest_w as f32).round().max(1.0) as u32;
        (dest_w, height_for_width)
    }
}

/// Offsets every rect so the group's top-left-most corner lands on the
/// origin. Monitors left of or above the primary display report negative
/// coordinates; the translated rects share one non-negative space.
pub fn normalize_to_origin(rects: &[Rect]) -> Vec<Rect> {
    let Some(bounds) = Rect::union_all(rects) else {
        return Vec::new();
    };
    rects
        .iter()
        .map(|rect| rect.translated(-bounds.x, -bounds.y))
        .collect()
}

/// X11-style window geometry, `[=][W][xH][+-X][+-Y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 768,
            x: 0,
            y: 0,
        }
    }
}

impl fmt::Display for WindowGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}{:+}{:+}", self.width, self.height, self.x, self.y)
    }
}

impl WindowGeometry {
    /// Parses a geometry string. Omitted parts keep their default values.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut geometry = Self::default();
        let mut rest = spec.trim();
        rest = rest.strip_prefix('=').unwrap_or(rest);

        let (digits, tail) = split_digits(rest);
        if !digits.is_empty() {
            geometry.width = digits
                .parse()
                .with_context(|| format!("invalid width in geometry {spec:?}"))?;
        }
        rest = tail;

        if let Some(tail) = rest.strip_prefix(['x', 'X']) {
            let (digits, tail) = split_digits(tail);
            if digits.is_empty() {
                bail!("missing height after 'x' in geometry {spec:?}");
            }
            geometry.height = digits
                .parse()
                .with_context(|| format!("invalid height in geometry {spec:?}"))?;
            rest = tail;
        }

        let mut offsets = Vec::with_capacity(2);
        while !rest.is_empty() {
            let sign = match rest.as_bytes()[0] {
                b'+' => 1,
                b'-' => -1,
                _ => bail!("unexpected {rest:?} in geometry {spec:?}"),
            };
            let (digits, tail) = split_digits(&rest[1..]);
            if digits.is_empty() {
                bail!("missing offset digits in geometry {spec:?}");
            }
            let value: i32 = digits
                .parse()
                .with_context(|| format!("invalid offset in geometry {spec:?}"))?;
            offsets.push(sign * value);
            rest = tail;
        }
        match offsets.as_slice() {
            [] => {}
            [x] => geometry.x = *x,
            [x, y] => {
                geometry.x = *x;
                geometry.y = *y;
            }
            _ => bail!("too many offsets in geometry {spec:?}"),
        }

        if geometry.width == 0 || geometry.height == 0 {
            bail!("geometry {spec:?} must have a non-zero size");
        }
        Ok(geometry)
    }
}

fn split_digits(input: &str) -> (&str, &str) {
    let end = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    input.split_at(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_image_fills_width() {
        assert_eq!(scale_to_fit(4000, 2000, 1000, 500), (1000, 500));
    }

    #[test]
    fn tall_image_fills_height() {
        assert_eq!(scale_to_fit(2000, 4000, 1000, 1000), (500, 1000));
    }

    #[test]
    fn small_image_keeps_native_size() {
        assert_eq!(scale_to_fit(800, 600, 1920, 1080), (800, 600));
    }

    #[test]
    fn width_constrained_when_height_match_overflows() {
        // 3:1 panorama on 16:9: height-first would need 3240px of width.
        assert_eq!(scale_to_fit(3000, 1000, 1920, 1080), (1920, 640));
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        assert_eq!(scale_to_fit(100_000, 1, 1000, 500), (1000, 1));
        assert_eq!(scale_to_fit(1, 100_000, 1000, 500), (1, 500));
    }

    #[test]
    fn zero_source_scales_to_nothing() {
        assert_eq!(scale_to_fit(0, 100, 1920, 1080), (0, 0));
    }

    #[test]
    fn normalizes_negative_virtual_desktop() {
        let monitors = [
            Rect::new(-1280.0, 0.0, 1280.0, 1024.0),
            Rect::new(0.0, -200.0, 1920.0, 1080.0),
        ];
        let normalized = normalize_to_origin(&monitors);
        assert_eq!(normalized[0], Rect::new(0.0, 200.0, 1280.0, 1024.0));
        assert_eq!(normalized[1], Rect::new(1280.0, 0.0, 1920.0, 1080.0));
    }

    #[test]
    fn parses_full_geometry() {
        let g = WindowGeometry::parse("800x600+10-20").unwrap();
        assert_eq!(
            g,
            WindowGeometry {
                width: 800,
                height: 600,
                x: 10,
                y: -20
            }
        );
        assert_eq!(g.to_string(), "800x600+10-20");
    }

    #[test]
    fn partial_geometry_keeps_defaults() {
        let g = WindowGeometry::parse("=640").unwrap();
        assert_eq!((g.width, g.height, g.x, g.y), (640, 768, 0, 0));
        let g = WindowGeometry::parse("x500+5").unwrap();
        assert_eq!((g.width, g.height, g.x, g.y), (1080, 500, 5, 0));
    }

    #[test]
    fn rejects_garbage_geometry() {
        assert!(WindowGeometry::parse("big").is_err());
        assert!(WindowGeometry::parse("0x0").is_err());
        assert!(WindowGeometry::parse("10x10+1+2+3").is_err());
    }
}
