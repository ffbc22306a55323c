//! Measurement operators
//!
//! Construction of the sparse linear maps relating the stacked
//! multi-channel signal to the structural (HAADF) measurement space.

pub mod measurement;

pub use measurement::*;
