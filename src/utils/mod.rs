//! Shared numeric helpers

pub mod grid;

pub use grid::*;
