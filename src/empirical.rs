//! A module for empirical (experimental) variogram estimation: turning a
//! point set and its response values into a binned semivariance curve.

use crate::errors::{KrigeError, Result};
use ndarray::{Array1, ArrayBase, Data, Ix1, Ix2};

/// A binned empirical semivariance curve.
///
/// Bins are contiguous intervals of width `bin_width` starting at zero and
/// capped at `cutoff`; bins with no supporting pair are omitted, so the
/// three arrays are parallel over the non-empty bins only.
#[derive(Debug, Clone)]
pub struct VariogramCurve {
    /// Lag-distance midpoint of each non-empty bin
    pub lags: Array1<f64>,
    /// Mean semivariance over the pairs of each bin
    pub semivariances: Array1<f64>,
    /// Number of point pairs supporting each bin
    pub counts: Array1<usize>,
    /// Bin width the curve was computed with
    pub bin_width: f64,
    /// Maximum pair separation considered
    pub cutoff: f64,
}

impl VariogramCurve {
    /// Number of non-empty bins.
    pub fn len(&self) -> usize {
        self.lags.len()
    }

    /// True when no pair fell within the cutoff.
    pub fn is_empty(&self) -> bool {
        self.lags.is_empty()
    }

    /// Largest binned semivariance, if any.
    pub fn max_semivariance(&self) -> Option<f64> {
        self.semivariances
            .iter()
            .cloned()
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }
}

/// Estimate the empirical variogram of `values` observed at `coords`.
///
/// For every unordered pair the Euclidean separation `h` and the squared
/// half-difference `0.5 * (z_i - z_j)^2` are computed; pairs with
/// `h <= cutoff` accumulate into bin `floor(h / bin_width)` (a pair landing
/// exactly on the cutoff is clamped into the last bin). Quadratic in the
/// number of points, which stays small for profile-style datasets.
pub fn empirical_variogram(
    coords: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    values: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    bin_width: f64,
    cutoff: f64,
) -> Result<VariogramCurve> {
    if !(bin_width > 0.) || !bin_width.is_finite() {
        return Err(KrigeError::InvalidParameter(format!(
            "bin width must be positive, got {bin_width}"
        )));
    }
    if !(cutoff > 0.) || !cutoff.is_finite() {
        return Err(KrigeError::InvalidParameter(format!(
            "cutoff must be positive, got {cutoff}"
        )));
    }
    if coords.ncols() != 2 {
        return Err(KrigeError::InvalidParameter(format!(
            "coordinates must be (n, 2), got (n, {})",
            coords.ncols()
        )));
    }
    if coords.nrows() != values.len() {
        return Err(KrigeError::InvalidParameter(format!(
            "{} coordinates vs {} values",
            coords.nrows(),
            values.len()
        )));
    }

    let n = coords.nrows();
    let n_bins = (cutoff / bin_width).ceil() as usize;
    let mut sums = vec![0f64; n_bins];
    let mut counts = vec![0usize; n_bins];

    for i in 0..n {
        for j in (i + 1)..n {
            let dx = coords[[i, 0]] - coords[[j, 0]];
            let dy = coords[[i, 1]] - coords[[j, 1]];
            let h = (dx * dx + dy * dy).sqrt();
            if h > cutoff {
                continue;
            }
            let bin = ((h / bin_width) as usize).min(n_bins - 1);
            sums[bin] += 0.5 * (values[i] - values[j]).powi(2);
            counts[bin] += 1;
        }
    }

    let mut lags = Vec::with_capacity(n_bins);
    let mut semivariances = Vec::with_capacity(n_bins);
    let mut pair_counts = Vec::with_capacity(n_bins);
    for (bin, &c) in counts.iter().enumerate() {
        if c == 0 {
            continue;
        }
        lags.push((bin as f64 + 0.5) * bin_width);
        semivariances.push(sums[bin] / c as f64);
        pair_counts.push(c);
    }

    Ok(VariogramCurve {
        lags: Array1::from_vec(lags),
        semivariances: Array1::from_vec(semivariances),
        counts: Array1::from_vec(pair_counts),
        bin_width,
        cutoff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_two_points_single_bin() {
        let coords = array![[0., 0.], [3., 4.]];
        let values = array![1., 5.];
        let curve = empirical_variogram(&coords, &values, 2., 10.).unwrap();
        // one pair at h = 5 -> bin 2, midpoint 5.0, gamma = 0.5 * 16 = 8
        assert_eq!(curve.len(), 1);
        assert_abs_diff_eq!(curve.lags[0], 5.0);
        assert_abs_diff_eq!(curve.semivariances[0], 8.0);
        assert_eq!(curve.counts[0], 1);
    }

    #[test]
    fn test_bin_means_and_counts() {
        // three collinear points: pairs at h = 1 (x2) and h = 2 (x1)
        let coords = array![[0., 0.], [1., 0.], [2., 0.]];
        let values = array![0., 2., 0.];
        let curve = empirical_variogram(&coords, &values, 1., 5.).unwrap();
        assert_eq!(curve.len(), 2);
        // bin [1, 2): both unit-lag pairs, gamma = 0.5 * 4 = 2 each
        assert_abs_diff_eq!(curve.lags[0], 1.5);
        assert_abs_diff_eq!(curve.semivariances[0], 2.0);
        assert_eq!(curve.counts[0], 2);
        // bin [2, 3): the (0, 2) pair with equal values
        assert_abs_diff_eq!(curve.semivariances[1], 0.0);
        assert_eq!(curve.counts[1], 1);
    }

    #[test]
    fn test_cutoff_excludes_pairs() {
        let coords = array![[0., 0.], [100., 0.]];
        let values = array![1., 2.];
        let curve = empirical_variogram(&coords, &values, 1., 10.).unwrap();
        assert!(curve.is_empty());
        assert_eq!(curve.max_semivariance(), None);
    }

    #[test]
    fn test_pair_on_cutoff_kept() {
        let coords = array![[0., 0.], [10., 0.]];
        let values = array![0., 2.];
        let curve = empirical_variogram(&coords, &values, 2., 10.).unwrap();
        assert_eq!(curve.len(), 1);
        assert_eq!(curve.counts[0], 1);
    }

    #[test]
    fn test_invalid_configuration() {
        let coords = array![[0., 0.], [1., 0.]];
        let values = array![0., 1.];
        assert!(empirical_variogram(&coords, &values, 0., 10.).is_err());
        assert!(empirical_variogram(&coords, &values, 1., -1.).is_err());
        let bad = array![0., 1., 2.];
        assert!(empirical_variogram(&coords, &bad, 1., 10.).is_err());
    }
}
