//! Flat row-major grid helpers
//!
//! The dense elementwise operations used by the denoiser and the fusion
//! solver, written over flat `&[f64]` buffers with explicit (rows, cols)
//! shape metadata. Shifts are circular (wraparound), never zero-padded.

/// Circularly shift the rows of a `nrows x ncols` row-major grid.
///
/// A shift of `-1` moves row 1 into row 0 (numpy `roll(x, -1, axis=0)`);
/// a shift of `+1` moves row 0 into row 1.
pub fn shift_rows(x: &[f64], nrows: usize, ncols: usize, shift: isize) -> Vec<f64> {
    debug_assert_eq!(x.len(), nrows * ncols);
    let mut out = vec![0.0; x.len()];
    let n = nrows as isize;
    for i in 0..nrows {
        let src = (((i as isize - shift) % n) + n) % n;
        let src = src as usize;
        out[i * ncols..(i + 1) * ncols].copy_from_slice(&x[src * ncols..(src + 1) * ncols]);
    }
    out
}

/// Circularly shift the columns of a `nrows x ncols` row-major grid.
///
/// A shift of `-1` moves column 1 into column 0 (numpy `roll(x, -1, axis=1)`).
pub fn shift_cols(x: &[f64], nrows: usize, ncols: usize, shift: isize) -> Vec<f64> {
    debug_assert_eq!(x.len(), nrows * ncols);
    let mut out = vec![0.0; x.len()];
    let n = ncols as isize;
    for i in 0..nrows {
        for j in 0..ncols {
            let src = (((j as isize - shift) % n) + n) % n;
            out[i * ncols + j] = x[i * ncols + src as usize];
        }
    }
    out
}

/// Elementwise power: `dst[i] = src[i].powf(exp)`.
///
/// `dst` must be pre-allocated to `src.len()`.
#[inline]
pub fn pow_into(src: &[f64], exp: f64, dst: &mut [f64]) {
    debug_assert_eq!(src.len(), dst.len());
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        *d = s.powf(exp);
    }
}

/// Clamp every negative entry to exactly zero (projection onto the
/// nonnegative orthant).
#[inline]
pub fn clip_nonneg_inplace(x: &mut [f64]) {
    for v in x.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}
