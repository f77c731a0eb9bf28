pub mod clones;
pub mod core;
pub mod datasets;
pub mod staging;
pub mod trees;
