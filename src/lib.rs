//! emfuse: fused multi-modal electron microscopy reconstruction
//!
//! Fuses a high-resolution structural HAADF signal with lower-resolution,
//! noisy per-element chemical maps (EDX/EELS) into a single set of
//! co-registered, denoised elemental maps. The core is an iterative joint
//! reconstruction: a weighted least-squares fit against the HAADF signal,
//! a Poisson-consistency term against the chemical counts, and per-channel
//! total-variation regularization via an FGP-TV sub-solver.
//!
//! # Modules
//! - `kernels`: sparse weighted measurement matrix construction
//! - `solvers`: FGP-TV denoiser and TV seminorm
//! - `fusion`: the outer joint-reconstruction loop and report hand-off
//! - `utils`: flat row-major grid helpers
//!
//! # Example
//! ```
//! use emfuse::{fuse, measurement_matrix, Background, FusionParams, WeightMethod};
//!
//! let op = measurement_matrix(4, 4, 2, &[6.0, 8.0], 1.0, WeightMethod::ZPowOverMean).unwrap();
//! let initial = vec![1.0; op.n_stacked()];
//! let haadf = vec![1.0; op.n_pixels()];
//! let params = FusionParams {
//!     lambda_chem: 0.1,
//!     lambda_tv: 0.05,
//!     n_iter: 3,
//!     n_iter_tv: 5,
//!     ..FusionParams::default()
//! };
//! let out = fuse(&initial, &haadf, &op, &Background::Scalar(0.1), &params).unwrap();
//! assert_eq!(out.cost_haadf.len(), 3);
//! ```

pub mod error;
pub mod fusion;
pub mod kernels;
pub mod solvers;
pub mod utils;

pub use error::FusionError;
pub use fusion::{
    fuse, fuse_with_progress, Background, ChannelMaps, CropRegion, FusionOutput, FusionParams,
    FusionReport, ResultSink,
};
pub use kernels::{measurement_matrix, MeasurementMatrix, WeightMethod};
pub use solvers::{fgp_tv, total_variation, TvKernel};
