use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by the slideshow core. All of them are scoped to one
/// surface; other surfaces keep advancing.
#[derive(Debug, Error)]
pub enum SlideshowError {
    /// No images are configured or none were found.
    #[error("playlist is empty")]
    EmptyPlaylist,

    /// A single image could not be decoded; the next entry is tried on the
    /// next advance.
    #[error("failed to decode {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    /// Every playlist entry failed in one full cycle.
    #[error("no usable images after {attempted} consecutive failures")]
    NoUsableImages { attempted: usize },

    /// The surface is not (or no longer) part of the slideshow.
    #[error("unknown surface {0}")]
    UnknownSurface(crate::events::SurfaceId),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("image has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum RenderError {
    /// GPU-bound resources were invalidated and must be recreated.
    #[error("render device lost")]
    DeviceLost,

    /// The backend has no window registered for the requested target.
    #[error("no window registered for {0}")]
    UnknownTarget(crate::events::TargetKey),

    #[error("render backend error: {0:#}")]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for RenderError {
    fn from(err: anyhow::Error) -> Self {
        Self::Backend(err)
    }
}
