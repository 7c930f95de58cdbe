pub mod files;
pub mod loader;
pub mod slideshow;
pub mod timers;
pub mod viewer;
