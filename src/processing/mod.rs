pub mod layout;
pub mod peekaboo;
