//! Iterative sub-solvers
//!
//! Currently the FGP-TV denoiser invoked per channel inside every outer
//! fusion iteration.

pub mod fgp_tv;

pub use fgp_tv::*;
