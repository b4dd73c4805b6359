//! A module for the deterministic trend of the field: an additive
//! penalized B-spline regression (one smooth term per selected covariate).
//!
//! Each term gets a cubic B-spline basis with equally spaced interior
//! knots and a second-difference (P-spline) penalty; blocks are centered
//! against an explicit intercept for identifiability, with a small ridge
//! on each block absorbing the remaining null direction. The penalized
//! normal equations are solved by Cholesky.

use crate::errors::{KrigeError, Result};
use linfa_linalg::cholesky::*;
use linfa_linalg::triangular::*;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_stats::QuantileExt;

const DEGREE: usize = 3;

/// Smoothing specification of one additive term.
#[derive(Clone, Copy, Debug)]
pub struct SmoothSpec {
    /// Number of B-spline basis functions (at least 4)
    pub n_basis: usize,
    /// Curvature penalty weight; larger is smoother
    pub lambda: f64,
}

impl Default for SmoothSpec {
    fn default() -> Self {
        SmoothSpec {
            n_basis: 8,
            lambda: 1.,
        }
    }
}

/// A fitted additive smooth trend, callable over new covariate matrices.
#[derive(Debug, Clone)]
pub struct TrendModel {
    specs: Vec<SmoothSpec>,
    knots: Vec<Array1<f64>>,
    bounds: Vec<(f64, f64)>,
    col_means: Array1<f64>,
    beta: Array1<f64>,
    fitted: Array1<f64>,
    residuals: Array1<f64>,
}

impl TrendModel {
    /// Fit the additive model of `y` on the columns of `x` (one
    /// [`SmoothSpec`] per column).
    pub fn fit(
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y: &Array1<f64>,
        specs: &[SmoothSpec],
    ) -> Result<Self> {
        let n = x.nrows();
        let p = x.ncols();
        if p == 0 || specs.len() != p {
            return Err(KrigeError::InvalidParameter(format!(
                "{} smooth spec(s) for {p} covariate column(s)",
                specs.len()
            )));
        }
        if y.len() != n {
            return Err(KrigeError::InvalidParameter(format!(
                "{} responses for {n} rows",
                y.len()
            )));
        }
        for (j, spec) in specs.iter().enumerate() {
            if spec.n_basis < DEGREE + 1 {
                return Err(KrigeError::InvalidParameter(format!(
                    "term {j}: at least {} basis functions required, got {}",
                    DEGREE + 1,
                    spec.n_basis
                )));
            }
            if !(spec.lambda >= 0.) || !spec.lambda.is_finite() {
                return Err(KrigeError::InvalidParameter(format!(
                    "term {j}: lambda must be finite and non-negative, got {}",
                    spec.lambda
                )));
            }
        }
        if n < 2 * p + 2 {
            return Err(KrigeError::InsufficientData(format!(
                "{n} points cannot support an additive trend over {p} covariate(s)"
            )));
        }

        let mut knots = Vec::with_capacity(p);
        let mut bounds = Vec::with_capacity(p);
        for j in 0..p {
            let col = x.column(j);
            let lo = *col.min().map_err(|_| {
                KrigeError::InvalidParameter(format!(
                    "covariate column {j} is empty or non-finite"
                ))
            })?;
            let hi = *col.max().map_err(|_| {
                KrigeError::InvalidParameter(format!(
                    "covariate column {j} is empty or non-finite"
                ))
            })?;
            if !(hi > lo) {
                return Err(KrigeError::InsufficientData(format!(
                    "covariate column {j} has no spread, cannot place knots"
                )));
            }
            knots.push(knot_vector(specs[j].n_basis, lo, hi));
            bounds.push((lo, hi));
        }

        let raw = design_matrix(x, specs, &knots, &bounds);
        let col_means = raw.mean_axis(Axis(0)).unwrap();
        let design = center(&raw, &col_means);

        let m = design.ncols();
        let mut a = design.t().dot(&design);
        // block-diagonal second-difference penalties, plus a small ridge
        // tied to the problem scale to absorb the centering null direction
        let ridge = 1e-8 * a.diag().sum() / m as f64;
        let mut offset = 1;
        for spec in specs {
            let k = spec.n_basis;
            let pen = difference_penalty(k);
            for r in 0..k {
                for c in 0..k {
                    a[[offset + r, offset + c]] += spec.lambda * pen[[r, c]];
                }
                a[[offset + r, offset + r]] += ridge;
            }
            offset += k;
        }

        let b = design
            .t()
            .dot(&y.view().insert_axis(Axis(1)).to_owned());
        let l = a.cholesky()?;
        let z = l.solve_triangular(&b, UPLO::Lower)?;
        let beta = l
            .t()
            .solve_triangular_into(z, UPLO::Upper)?
            .remove_axis(Axis(1));

        let fitted = design.dot(&beta);
        let residuals = y - &fitted;
        Ok(TrendModel {
            specs: specs.to_vec(),
            knots,
            bounds,
            col_means,
            beta,
            fitted,
            residuals,
        })
    }

    /// Fitted trend value at each training point.
    pub fn fitted(&self) -> &Array1<f64> {
        &self.fitted
    }

    /// Training residuals (`observed - fitted`).
    pub fn residuals(&self) -> &Array1<f64> {
        &self.residuals
    }

    /// Evaluate the trend at new covariate rows. Values outside the
    /// training range are clamped to the boundary (no extrapolation of
    /// the spline tails).
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array1<f64>> {
        if x.ncols() != self.specs.len() {
            return Err(KrigeError::InvalidParameter(format!(
                "{} covariate column(s), model fitted on {}",
                x.ncols(),
                self.specs.len()
            )));
        }
        let raw = design_matrix(x, &self.specs, &self.knots, &self.bounds);
        let design = center(&raw, &self.col_means);
        Ok(design.dot(&self.beta))
    }
}

/// Clamped knot vector for `k` cubic basis functions over `[lo, hi]`.
fn knot_vector(k: usize, lo: f64, hi: f64) -> Array1<f64> {
    let n_interior = k - DEGREE - 1;
    let mut t = Vec::with_capacity(k + DEGREE + 1);
    t.extend(std::iter::repeat(lo).take(DEGREE + 1));
    for i in 1..=n_interior {
        t.push(lo + (hi - lo) * i as f64 / (n_interior + 1) as f64);
    }
    t.extend(std::iter::repeat(hi).take(DEGREE + 1));
    Array1::from_vec(t)
}

/// One row of the cubic B-spline basis by the Cox-de Boor recursion.
fn bspline_row(t: &Array1<f64>, k: usize, x: f64) -> Vec<f64> {
    let hi = t[t.len() - 1];
    let m = t.len() - 1;
    let mut n = vec![0f64; m];
    for i in 0..m {
        let at_end = x == hi && t[i] < t[i + 1] && t[i + 1] == hi;
        if (x >= t[i] && x < t[i + 1]) || at_end {
            n[i] = 1.;
        }
    }
    for d in 1..=DEGREE {
        for i in 0..(m - d) {
            let left = if t[i + d] > t[i] {
                (x - t[i]) / (t[i + d] - t[i]) * n[i]
            } else {
                0.
            };
            let right = if t[i + d + 1] > t[i + 1] {
                (t[i + d + 1] - x) / (t[i + d + 1] - t[i + 1]) * n[i + 1]
            } else {
                0.
            };
            n[i] = left + right;
        }
    }
    n.truncate(k);
    n
}

/// Assemble the raw (uncentered) additive design: intercept plus one
/// B-spline block per covariate, inputs clamped into the knot range.
fn design_matrix(
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    specs: &[SmoothSpec],
    knots: &[Array1<f64>],
    bounds: &[(f64, f64)],
) -> Array2<f64> {
    let n = x.nrows();
    let m = 1 + specs.iter().map(|s| s.n_basis).sum::<usize>();
    let mut design = Array2::zeros((n, m));
    design.column_mut(0).fill(1.);
    for r in 0..n {
        let mut offset = 1;
        for (j, spec) in specs.iter().enumerate() {
            let v = x[[r, j]].clamp(bounds[j].0, bounds[j].1);
            for (i, b) in bspline_row(&knots[j], spec.n_basis, v).into_iter().enumerate() {
                design[[r, offset + i]] = b;
            }
            offset += spec.n_basis;
        }
    }
    design
}

/// Center every column but the intercept against the given means.
fn center(design: &Array2<f64>, col_means: &Array1<f64>) -> Array2<f64> {
    let mut centered = design - &col_means.view().insert_axis(Axis(0));
    centered.column_mut(0).fill(1.);
    centered
}

/// `D2^t D2` for a coefficient vector of length `k`.
fn difference_penalty(k: usize) -> Array2<f64> {
    let mut d2 = Array2::zeros((k - 2, k));
    for r in 0..(k - 2) {
        d2[[r, r]] = 1.;
        d2[[r, r + 1]] = -2.;
        d2[[r, r + 2]] = 1.;
    }
    d2.t().dot(&d2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    #[test]
    fn test_basis_partition_of_unity() {
        let knots = knot_vector(8, 0., 10.);
        for &x in &[0., 0.3, 2.5, 5., 9.99, 10.] {
            let row = bspline_row(&knots, 8, x);
            assert_abs_diff_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
            assert!(row.iter().all(|&b| b >= 0.));
        }
    }

    #[test]
    fn test_linear_function_unpenalized() {
        // second differences of a linear fit vanish, so any lambda
        // reproduces an exactly linear signal
        let x = Array::linspace(0., 10., 30).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v| 2. + 3. * v);
        let model = TrendModel::fit(
            &x,
            &y,
            &[SmoothSpec {
                n_basis: 8,
                lambda: 10.,
            }],
        )
        .unwrap();
        for (f, o) in model.fitted().iter().zip(y.iter()) {
            assert_abs_diff_eq!(f, o, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_residuals_complement_fitted() {
        let x = Array::linspace(-2., 2., 25).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v| v * v + 0.5);
        let model = TrendModel::fit(&x, &y, &[SmoothSpec::default()]).unwrap();
        let sum = model.fitted() + model.residuals();
        for (s, o) in sum.iter().zip(y.iter()) {
            assert_abs_diff_eq!(s, o, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_smooth_signal_recovered() {
        let x = Array::linspace(0., 6., 40).insert_axis(Axis(1));
        let y = x.column(0).mapv(f64::sin);
        let model = TrendModel::fit(
            &x,
            &y,
            &[SmoothSpec {
                n_basis: 10,
                lambda: 1e-3,
            }],
        )
        .unwrap();
        for (f, o) in model.fitted().iter().zip(y.iter()) {
            assert!((f - o).abs() < 0.1, "fitted {f} vs {o}");
        }
    }

    #[test]
    fn test_predict_matches_fitted_and_clamps() {
        let x = Array::linspace(0., 5., 20).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v| 1. + v);
        let model = TrendModel::fit(&x, &y, &[SmoothSpec::default()]).unwrap();
        let again = model.predict(&x).unwrap();
        for (a, f) in again.iter().zip(model.fitted().iter()) {
            assert_abs_diff_eq!(a, f, epsilon = 1e-10);
        }
        // outside the training range the trend holds its boundary value
        let beyond = model.predict(&array![[7.], [-3.]]).unwrap();
        let edges = model.predict(&array![[5.], [0.]]).unwrap();
        assert_abs_diff_eq!(beyond[0], edges[0]);
        assert_abs_diff_eq!(beyond[1], edges[1]);
    }

    #[test]
    fn test_additive_two_terms() {
        let n = 50;
        let mut x = Array2::zeros((n, 2));
        let mut y = Array1::zeros(n);
        for i in 0..n {
            let a = i as f64 / (n - 1) as f64 * 4.;
            let b = ((i * 13 + 5) % 17) as f64 / 4.;
            x[[i, 0]] = a;
            x[[i, 1]] = b;
            y[i] = 2. * a + (b - 2.).powi(2);
        }
        let specs = [
            SmoothSpec {
                n_basis: 6,
                lambda: 1e-2,
            },
            SmoothSpec {
                n_basis: 6,
                lambda: 1e-2,
            },
        ];
        let model = TrendModel::fit(&x, &y, &specs).unwrap();
        let max_err = model
            .residuals()
            .iter()
            .fold(0f64, |m, r| m.max(r.abs()));
        assert!(max_err < 0.2, "max residual {max_err}");
    }

    #[test]
    fn test_invalid_configuration() {
        let x = Array::linspace(0., 5., 20).insert_axis(Axis(1));
        let y = x.column(0).to_owned();
        assert!(TrendModel::fit(&x, &y, &[]).is_err());
        assert!(TrendModel::fit(
            &x,
            &y,
            &[SmoothSpec {
                n_basis: 3,
                lambda: 1.
            }]
        )
        .is_err());
        assert!(TrendModel::fit(
            &x,
            &y,
            &[SmoothSpec {
                n_basis: 8,
                lambda: -1.
            }]
        )
        .is_err());
        // constant covariate cannot carry a smooth
        let flat = Array2::ones((20, 1));
        assert!(TrendModel::fit(&flat, &y, &[SmoothSpec::default()]).is_err());
    }
}
