//! Joint multi-modal reconstruction
//!
//! The outer coordinate-descent loop fusing the HAADF signal with the
//! per-element chemical maps, plus the report hand-off for downstream
//! persistence and plotting consumers.

pub mod report;
pub mod solver;

pub use report::*;
pub use solver::*;
