//! Result hand-off for persistence and plotting consumers
//!
//! The core never touches the filesystem or a plotting backend. A
//! [`FusionReport`] gathers everything a downstream sink needs: raw and
//! fused per-element maps, raw and fused HAADF signals, the three cost
//! traces, and the scalar hyperparameters. The whole structure serializes
//! losslessly through serde.

use serde::{Deserialize, Serialize};

use crate::error::FusionError;
use crate::kernels::MeasurementMatrix;
use crate::utils::pow_into;

use super::solver::{CropRegion, FusionOutput, FusionParams};

/// Raw and fused maps for one elemental channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMaps {
    /// Element label aligned with the channel index.
    pub element: String,
    /// Caller-supplied raw map, `nx * ny` row-major values.
    pub raw: Vec<f64>,
    /// Fused map from the solver, same layout.
    pub fused: Vec<f64>,
}

/// Complete data hand-off from one fusion solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionReport {
    /// Spatial grid dimensions of the exported maps (post-crop).
    pub nx: usize,
    pub ny: usize,
    /// One entry per elemental channel, in channel index order.
    pub channels: Vec<ChannelMaps>,
    /// Caller-supplied HAADF measurement.
    pub haadf_raw: Vec<f64>,
    /// Re-projected HAADF signal `A * x^gamma` from the fused result.
    pub haadf_fused: Vec<f64>,
    pub cost_haadf: Vec<f64>,
    pub cost_chem: Vec<f64>,
    pub cost_tv: Vec<f64>,
    pub lambda_haadf: f64,
    pub lambda_chem: f64,
    pub lambda_tv: f64,
    pub gamma: f64,
}

/// Consumer seam for persistence, export, or plotting collaborators.
pub trait ResultSink {
    fn consume(&mut self, report: &FusionReport) -> Result<(), FusionError>;
}

fn crop_grid(grid: &[f64], ny: usize, crop: &CropRegion) -> Vec<f64> {
    let mut out = Vec::with_capacity((crop.x1 - crop.x0) * (crop.y1 - crop.y0));
    for i in crop.x0..crop.x1 {
        out.extend_from_slice(&grid[i * ny + crop.y0..i * ny + crop.y1]);
    }
    out
}

fn validate_crop(crop: &CropRegion, nx: usize, ny: usize) -> Result<(), FusionError> {
    if crop.x0 >= crop.x1 || crop.y0 >= crop.y1 || crop.x1 > nx || crop.y1 > ny {
        return Err(FusionError::invalid_parameter(
            "crop",
            format!(
                "region rows {}..{}, cols {}..{} does not fit a {nx} x {ny} grid",
                crop.x0, crop.x1, crop.y0, crop.y1
            ),
        ));
    }
    Ok(())
}

impl FusionReport {
    /// Assemble a report from a finished solve.
    ///
    /// `initial` and `structural` are the same arrays the solver was
    /// called with; `element_names` must carry one label per channel.
    /// When `params.crop` is set every exported map is restricted to that
    /// region; cost traces and hyperparameters are unaffected.
    pub fn new(
        output: &FusionOutput,
        initial: &[f64],
        structural: &[f64],
        operator: &MeasurementMatrix,
        element_names: &[String],
        params: &FusionParams,
    ) -> Result<Self, FusionError> {
        let (nx, ny, nz) = (operator.nx(), operator.ny(), operator.nz());
        let n_pix = operator.n_pixels();

        if element_names.len() != nz {
            return Err(FusionError::invalid_dimension(format!(
                "{} element names for {nz} channels",
                element_names.len()
            )));
        }
        if output.signal.len() != operator.n_stacked() || initial.len() != operator.n_stacked() {
            return Err(FusionError::shape_mismatch(
                format!("stacked signals of {} values", operator.n_stacked()),
                format!("{} / {} values", output.signal.len(), initial.len()),
            ));
        }
        if structural.len() != n_pix {
            return Err(FusionError::shape_mismatch(
                format!("structural signal of {n_pix} values"),
                format!("{} values", structural.len()),
            ));
        }
        if let Some(crop) = &params.crop {
            validate_crop(crop, nx, ny)?;
        }

        let mut fused_pow = vec![0.0; output.signal.len()];
        pow_into(&output.signal, params.gamma, &mut fused_pow);
        let haadf_fused = operator.apply(&fused_pow);

        let extract = |grid: &[f64]| -> Vec<f64> {
            match &params.crop {
                Some(crop) => crop_grid(grid, ny, crop),
                None => grid.to_vec(),
            }
        };

        let channels = element_names
            .iter()
            .enumerate()
            .map(|(z, name)| ChannelMaps {
                element: name.clone(),
                raw: extract(&initial[z * n_pix..(z + 1) * n_pix]),
                fused: extract(&output.signal[z * n_pix..(z + 1) * n_pix]),
            })
            .collect();

        let (out_nx, out_ny) = match &params.crop {
            Some(crop) => (crop.x1 - crop.x0, crop.y1 - crop.y0),
            None => (nx, ny),
        };

        Ok(FusionReport {
            nx: out_nx,
            ny: out_ny,
            channels,
            haadf_raw: extract(structural),
            haadf_fused: extract(&haadf_fused),
            cost_haadf: output.cost_haadf.clone(),
            cost_chem: output.cost_chem.clone(),
            cost_tv: output.cost_tv.clone(),
            lambda_haadf: 1.0 / nz as f64,
            lambda_chem: params.lambda_chem,
            lambda_tv: params.lambda_tv,
            gamma: params.gamma,
        })
    }
}
