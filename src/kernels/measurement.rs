//! Weighted measurement matrix for HAADF / chemical-map fusion
//!
//! The HAADF signal is modelled as a weighted sum over the stacked
//! elemental channels: each spatial pixel of the structural image receives
//! one contribution per channel, weighted by an atomic-number-derived
//! factor. The resulting operator is a sparse `(nx*ny) x (nz*nx*ny)`
//! matrix with exactly one nonzero per (pixel, channel) pair.

use sprs::{CsMat, TriMat};

use crate::error::FusionError;

/// Atomic-number weighting policy for the measurement matrix.
///
/// `gamma_w` below is the weighting exponent, distinct from the
/// reconstruction exponent `gamma` used by the fusion solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightMethod {
    /// Every channel contributes with weight 1.
    Unweighted,
    /// `z[j] / mean(z)`
    ZOverMean,
    /// `z[j]^gamma_w / mean(z^gamma_w)`
    ZPowOverMean,
    /// `z[j] / sum(z)`
    ZOverSum,
    /// `z[j]^gamma_w / sum(z^gamma_w)`
    ZPowOverSum,
}

impl TryFrom<u8> for WeightMethod {
    type Error = FusionError;

    fn try_from(code: u8) -> Result<Self, FusionError> {
        match code {
            0 => Ok(WeightMethod::Unweighted),
            1 => Ok(WeightMethod::ZOverMean),
            2 => Ok(WeightMethod::ZPowOverMean),
            3 => Ok(WeightMethod::ZOverSum),
            4 => Ok(WeightMethod::ZPowOverSum),
            other => Err(FusionError::invalid_parameter(
                "method",
                format!("unknown weighting method code {other}, expected 0..=4"),
            )),
        }
    }
}

/// Immutable sparse measurement operator shared read-only by the solver.
///
/// Holds both the forward matrix `A` and its transpose, each in CSR form
/// so that both matrix-vector products stream row-major.
pub struct MeasurementMatrix {
    a: CsMat<f64>,
    a_t: CsMat<f64>,
    nx: usize,
    ny: usize,
    nz: usize,
}

impl MeasurementMatrix {
    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Number of elemental channels.
    pub fn nz(&self) -> usize {
        self.nz
    }

    /// Length of the structural (HAADF) signal: `nx * ny`.
    pub fn n_pixels(&self) -> usize {
        self.nx * self.ny
    }

    /// Length of the stacked multi-channel signal: `nz * nx * ny`.
    pub fn n_stacked(&self) -> usize {
        self.nz * self.nx * self.ny
    }

    /// Number of stored nonzero entries.
    pub fn nnz(&self) -> usize {
        self.a.nnz()
    }

    /// Forward product `A * x`, mapping a stacked signal into HAADF space.
    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        debug_assert_eq!(x.len(), self.n_stacked());
        let mut out = vec![0.0; self.n_pixels()];
        sprs::prod::mul_acc_mat_vec_csr(self.a.view(), x, &mut out);
        out
    }

    /// Transpose product `A^T * r`, scattering a HAADF-space residual back
    /// over the stacked channels.
    pub fn apply_transpose(&self, r: &[f64]) -> Vec<f64> {
        debug_assert_eq!(r.len(), self.n_pixels());
        let mut out = vec![0.0; self.n_stacked()];
        sprs::prod::mul_acc_mat_vec_csr(self.a_t.view(), r, &mut out);
        out
    }
}

/// Per-channel weights for the chosen policy.
fn channel_weights(z_nums: &[f64], gamma_w: f64, method: WeightMethod) -> Vec<f64> {
    let nz = z_nums.len() as f64;
    match method {
        WeightMethod::Unweighted => vec![1.0; z_nums.len()],
        WeightMethod::ZOverMean => {
            let mean = z_nums.iter().sum::<f64>() / nz;
            z_nums.iter().map(|&z| z / mean).collect()
        }
        WeightMethod::ZPowOverMean => {
            let mean = z_nums.iter().map(|&z| z.powf(gamma_w)).sum::<f64>() / nz;
            z_nums.iter().map(|&z| z.powf(gamma_w) / mean).collect()
        }
        WeightMethod::ZOverSum => {
            let sum = z_nums.iter().sum::<f64>();
            z_nums.iter().map(|&z| z / sum).collect()
        }
        WeightMethod::ZPowOverSum => {
            let sum = z_nums.iter().map(|&z| z.powf(gamma_w)).sum::<f64>();
            z_nums.iter().map(|&z| z.powf(gamma_w) / sum).collect()
        }
    }
}

/// Build the weighted measurement matrix.
///
/// For every spatial pixel `p` and channel `j` the operator stores one
/// nonzero at `(row = p, col = p + nx*ny*j)` whose value is the channel
/// weight for `z_nums[j]` under `method`.
///
/// # Arguments
/// * `nx`, `ny` - Spatial grid dimensions
/// * `nz` - Number of elemental channels
/// * `z_nums` - Atomic numbers, one per channel (length must equal `nz`)
/// * `gamma_w` - Weighting exponent (only used by the power methods)
/// * `method` - Weighting policy
///
/// # Errors
/// `InvalidDimension` if any dimension is zero, if `z_nums.len() != nz`,
/// or if `nx*ny*nz` overflows the index range.
pub fn measurement_matrix(
    nx: usize,
    ny: usize,
    nz: usize,
    z_nums: &[f64],
    gamma_w: f64,
    method: WeightMethod,
) -> Result<MeasurementMatrix, FusionError> {
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(FusionError::invalid_dimension(format!(
            "dimensions must be nonzero, got nx={nx}, ny={ny}, nz={nz}"
        )));
    }
    if z_nums.len() != nz {
        return Err(FusionError::invalid_dimension(format!(
            "z_nums has length {}, expected nz = {nz}",
            z_nums.len()
        )));
    }
    let n_pix = nx
        .checked_mul(ny)
        .ok_or_else(|| FusionError::invalid_dimension("nx*ny overflows usize"))?;
    let n_stacked = n_pix
        .checked_mul(nz)
        .ok_or_else(|| FusionError::invalid_dimension("nx*ny*nz overflows usize"))?;

    let weights = channel_weights(z_nums, gamma_w, method);

    // One (row, col, value) triple per (pixel, channel) pair. The
    // transpose is assembled from the same triples with row/col swapped so
    // both products run over CSR storage.
    let mut tri = TriMat::with_capacity((n_pix, n_stacked), n_stacked);
    let mut tri_t = TriMat::with_capacity((n_stacked, n_pix), n_stacked);
    for p in 0..n_pix {
        for (j, &w) in weights.iter().enumerate() {
            let col = p + n_pix * j;
            tri.add_triplet(p, col, w);
            tri_t.add_triplet(col, p, w);
        }
    }

    Ok(MeasurementMatrix {
        a: tri.to_csr(),
        a_t: tri_t.to_csr(),
        nx,
        ny,
        nz,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_method_codes_round_trip() {
        assert_eq!(WeightMethod::try_from(0).unwrap(), WeightMethod::Unweighted);
        assert_eq!(WeightMethod::try_from(2).unwrap(), WeightMethod::ZPowOverMean);
        assert_eq!(WeightMethod::try_from(4).unwrap(), WeightMethod::ZPowOverSum);
        assert!(WeightMethod::try_from(5).is_err());
    }

    #[test]
    fn test_nonzero_count_all_methods() {
        let z = [26.0, 8.0, 14.0];
        for method in [
            WeightMethod::Unweighted,
            WeightMethod::ZOverMean,
            WeightMethod::ZPowOverMean,
            WeightMethod::ZOverSum,
            WeightMethod::ZPowOverSum,
        ] {
            let op = measurement_matrix(5, 4, 3, &z, 1.7, method).unwrap();
            assert_eq!(op.nnz(), 3 * 5 * 4);
        }
    }

    #[test]
    fn test_unweighted_row_sums() {
        // Method 0: every row of A sums to nz
        let op = measurement_matrix(3, 3, 4, &[1.0, 2.0, 3.0, 4.0], 1.0, WeightMethod::Unweighted)
            .unwrap();
        let ones = vec![1.0; op.n_stacked()];
        let row_sums = op.apply(&ones);
        for &s in &row_sums {
            assert!((s - 4.0).abs() < 1e-12, "row sum {s} != nz");
        }
    }

    #[test]
    fn test_linear_weights_proportional_to_z() {
        // Methods 1 and 3: per-channel contributions proportional to z
        let z = [6.0, 8.0];
        for method in [WeightMethod::ZOverMean, WeightMethod::ZOverSum] {
            let op = measurement_matrix(2, 2, 2, &z, 1.0, method).unwrap();

            // Probe channel j with an indicator vector
            let mut e0 = vec![0.0; op.n_stacked()];
            let mut e1 = vec![0.0; op.n_stacked()];
            e0[0] = 1.0; // pixel 0, channel 0
            e1[op.n_pixels()] = 1.0; // pixel 0, channel 1

            let w0 = op.apply(&e0)[0];
            let w1 = op.apply(&e1)[0];
            assert!(
                (w1 / w0 - z[1] / z[0]).abs() < 1e-12,
                "weights not proportional to z for {method:?}"
            );
        }
    }

    #[test]
    fn test_power_mean_weights() {
        // Method 2 with gamma_w = 1 reduces to z / mean(z)
        let z = [6.0, 8.0];
        let op = measurement_matrix(4, 4, 2, &z, 1.0, WeightMethod::ZPowOverMean).unwrap();
        let mut e0 = vec![0.0; op.n_stacked()];
        e0[0] = 1.0;
        let w0 = op.apply(&e0)[0];
        assert_relative_eq!(w0, 6.0 / 7.0, max_relative = 1e-12);
    }

    #[test]
    fn test_transpose_is_adjoint() {
        // <A x, y> == <x, A^T y>
        let z = [26.0, 8.0];
        let op = measurement_matrix(3, 2, 2, &z, 2.0, WeightMethod::ZPowOverSum).unwrap();

        let x: Vec<f64> = (0..op.n_stacked()).map(|i| (i as f64 * 0.37).sin()).collect();
        let y: Vec<f64> = (0..op.n_pixels()).map(|i| (i as f64 * 0.61).cos()).collect();

        let ax = op.apply(&x);
        let aty = op.apply_transpose(&y);

        let lhs: f64 = ax.iter().zip(y.iter()).map(|(&a, &b)| a * b).sum();
        let rhs: f64 = x.iter().zip(aty.iter()).map(|(&a, &b)| a * b).sum();
        assert_relative_eq!(lhs, rhs, max_relative = 1e-12);
    }

    #[test]
    fn test_invalid_dimensions_rejected() {
        assert!(measurement_matrix(0, 4, 2, &[1.0, 2.0], 1.0, WeightMethod::Unweighted).is_err());
        assert!(measurement_matrix(4, 4, 2, &[1.0], 1.0, WeightMethod::Unweighted).is_err());
        assert!(
            measurement_matrix(usize::MAX, 2, 2, &[1.0, 2.0], 1.0, WeightMethod::Unweighted)
                .is_err()
        );
    }
}
