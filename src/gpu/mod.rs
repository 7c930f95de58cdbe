pub mod compositor;
pub mod resources;
