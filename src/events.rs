use std::fmt;
use std::path::PathBuf;

use crate::processing::layout::Rect;

/// Identifies one slideshow surface (a monitor area or a window).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Identifies a render target: one host window. Several surfaces may draw
/// into the same target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey(pub u64);

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target-{}", self.0)
    }
}

/// A surface the host wants shown: its window and its bounds in the host's
/// coordinate space (virtual-desktop coordinates may be negative).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSpec {
    pub target: TargetKey,
    pub bounds: Rect,
}

#[derive(Debug, Clone)]
pub struct PreparedImageCpu {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Emitted by the slideshow whenever a surface starts showing a new image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Displayed {
    pub surface: SurfaceId,
    pub path: PathBuf,
}
