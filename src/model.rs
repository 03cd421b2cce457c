pub mod geometry;
pub mod saved_layout;
pub mod signature;
pub mod tree;
