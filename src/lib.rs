//! Adaptive-placement crossfade slideshow.
//!
//! [`tasks::slideshow::Slideshow`] drives any number of surfaces over a
//! [`gpu::resources::RenderBackend`]; [`tasks::viewer`] hosts it in winit
//! windows rendered through wgpu.

pub mod config;
pub mod error;
pub mod events;
pub mod gpu;
pub mod playlist;
pub mod processing;
pub mod tasks;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
