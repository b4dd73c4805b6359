//! A module for the kriging linear-system solver.
//!
//! Two modes share one code path: ordinary kriging of a constant-mean
//! field (used for regression residuals) and kriging with external drift
//! (covariates entering as linear unbiasedness constraints). The
//! semivariance matrix between known points is augmented with a row/column
//! of ones and one row/column per drift covariate, factorized once with
//! partially-pivoted LU, and every query point is then an independent
//! triangular solve — embarrassingly parallel over queries.

use crate::errors::{KrigeError, Result};
use crate::variogram_models::VariogramModel;

use nalgebra::{DMatrix, DVector, Dyn};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use rayon::prelude::*;

/// Relative pivot magnitude below which the factorized system is treated
/// as singular (duplicate points, collinear drift).
const PIVOT_RTOL: f64 = 1e-12;

/// A factorized kriging system over one set of known points.
///
/// Immutable once built; shared read-only with worker threads during
/// parallel prediction.
#[derive(Debug)]
pub struct KrigingSystem {
    model: VariogramModel,
    coords: Array2<f64>,
    values: Array1<f64>,
    drift: Option<Array2<f64>>,
    lu: nalgebra::LU<f64, Dyn, Dyn>,
    size: usize,
}

impl KrigingSystem {
    /// Build an ordinary-kriging system (constant unknown mean, no drift).
    pub fn ordinary(
        model: VariogramModel,
        coords: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        values: &Array1<f64>,
    ) -> Result<Self> {
        Self::build(model, coords, values, None)
    }

    /// Build a kriging system with external-drift covariates.
    pub fn with_drift(
        model: VariogramModel,
        coords: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        values: &Array1<f64>,
        drift: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<Self> {
        Self::build(model, coords, values, Some(drift.to_owned()))
    }

    fn build(
        model: VariogramModel,
        coords: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        values: &Array1<f64>,
        drift: Option<Array2<f64>>,
    ) -> Result<Self> {
        let n = coords.nrows();
        if coords.ncols() != 2 {
            return Err(KrigeError::InvalidParameter(format!(
                "coordinates must be (n, 2), got (n, {})",
                coords.ncols()
            )));
        }
        if values.len() != n {
            return Err(KrigeError::InvalidParameter(format!(
                "{} values for {} known points",
                values.len(),
                n
            )));
        }
        if n < 2 {
            return Err(KrigeError::InsufficientData(format!(
                "kriging requires at least 2 known points, got {n}"
            )));
        }
        let n_drift = match &drift {
            Some(d) => {
                if d.nrows() != n {
                    return Err(KrigeError::InvalidParameter(format!(
                        "{} drift rows for {} known points",
                        d.nrows(),
                        n
                    )));
                }
                d.ncols()
            }
            None => 0,
        };

        // Duplicate coordinates make two rows of the semivariance matrix
        // identical; reject them up front instead of solving into garbage.
        for i in 0..n {
            for j in (i + 1)..n {
                let dx = coords[[i, 0]] - coords[[j, 0]];
                let dy = coords[[i, 1]] - coords[[j, 1]];
                if (dx * dx + dy * dy).sqrt() < 1e-12 {
                    return Err(KrigeError::DegenerateKrigingSystem(format!(
                        "known points {i} and {j} share the same coordinates"
                    )));
                }
            }
        }

        // Augmented system: [[Gamma, F], [F^t, 0]] with F = [1 | drift].
        let size = n + 1 + n_drift;
        let mut a = DMatrix::<f64>::zeros(size, size);
        for i in 0..n {
            for j in (i + 1)..n {
                let dx = coords[[i, 0]] - coords[[j, 0]];
                let dy = coords[[i, 1]] - coords[[j, 1]];
                let g = model.gamma((dx * dx + dy * dy).sqrt());
                a[(i, j)] = g;
                a[(j, i)] = g;
            }
            a[(i, n)] = 1.;
            a[(n, i)] = 1.;
            if let Some(d) = &drift {
                for k in 0..n_drift {
                    a[(i, n + 1 + k)] = d[[i, k]];
                    a[(n + 1 + k, i)] = d[[i, k]];
                }
            }
        }

        let lu = a.lu();
        let diag = lu.u().diagonal();
        let max_pivot = diag.iter().fold(0f64, |m, v| m.max(v.abs()));
        let min_pivot = diag.iter().fold(f64::INFINITY, |m, v| m.min(v.abs()));
        if !lu.is_invertible() || min_pivot < PIVOT_RTOL * max_pivot {
            return Err(KrigeError::DegenerateKrigingSystem(format!(
                "augmented matrix is singular or ill-conditioned \
                 (pivot ratio {:e})",
                min_pivot / max_pivot
            )));
        }

        Ok(KrigingSystem {
            model,
            coords: coords.to_owned(),
            values: values.to_owned(),
            drift,
            lu,
            size,
        })
    }

    /// The variogram model the system was built with.
    pub fn model(&self) -> &VariogramModel {
        &self.model
    }

    /// Number of known points.
    pub fn n_known(&self) -> usize {
        self.coords.nrows()
    }

    /// Number of drift covariates.
    pub fn n_drift(&self) -> usize {
        self.drift.as_ref().map_or(0, |d| d.ncols())
    }

    /// Predict the value and kriging variance at a single query location.
    ///
    /// `drift` must carry one value per drift covariate of the system
    /// (and `None` for an ordinary system).
    pub fn predict_one(&self, easting: f64, northing: f64, drift: Option<&[f64]>) -> Result<(f64, f64)> {
        let n = self.n_known();
        let n_drift = self.n_drift();
        let q_drift = drift.unwrap_or(&[]);
        if q_drift.len() != n_drift {
            return Err(KrigeError::InvalidParameter(format!(
                "query carries {} drift value(s), system has {n_drift}",
                q_drift.len()
            )));
        }

        let mut rhs = DVector::<f64>::zeros(self.size);
        for i in 0..n {
            let dx = easting - self.coords[[i, 0]];
            let dy = northing - self.coords[[i, 1]];
            rhs[i] = self.model.gamma((dx * dx + dy * dy).sqrt());
        }
        rhs[n] = 1.;
        for (k, &v) in q_drift.iter().enumerate() {
            rhs[n + 1 + k] = v;
        }

        let solution = self.lu.solve(&rhs).ok_or_else(|| {
            KrigeError::DegenerateKrigingSystem(
                "LU back-substitution hit a zero pivot".to_string(),
            )
        })?;

        let mut value = 0.;
        for i in 0..n {
            value += solution[i] * self.values[i];
        }
        // Kriging variance from the solved system; may dip slightly below
        // zero at machine precision, clamp in that case.
        let variance = rhs.dot(&solution).max(0.);
        Ok((value, variance))
    }

    /// Predict values at a batch of query points, in parallel.
    pub fn predict(
        &self,
        coords: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
        drift: Option<&Array2<f64>>,
    ) -> Result<Array1<f64>> {
        Ok(self.predict_with_variance(coords, drift)?.0)
    }

    /// Predict values and kriging variances at a batch of query points.
    pub fn predict_with_variance(
        &self,
        coords: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
        drift: Option<&Array2<f64>>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        if coords.ncols() != 2 {
            return Err(KrigeError::InvalidParameter(format!(
                "query coordinates must be (n, 2), got (n, {})",
                coords.ncols()
            )));
        }
        if let Some(d) = drift {
            if d.nrows() != coords.nrows() {
                return Err(KrigeError::InvalidParameter(format!(
                    "{} drift rows for {} query points",
                    d.nrows(),
                    coords.nrows()
                )));
            }
        }
        let results: Vec<(f64, f64)> = (0..coords.nrows())
            .into_par_iter()
            .map(|q| {
                let row;
                let q_drift = match drift {
                    Some(d) => {
                        row = d.row(q).to_vec();
                        Some(row.as_slice())
                    }
                    None => None,
                };
                self.predict_one(coords[[q, 0]], coords[[q, 1]], q_drift)
            })
            .collect::<Result<Vec<_>>>()?;
        let values = results.iter().map(|r| r.0).collect();
        let variances = results.iter().map(|r| r.1).collect();
        Ok((values, variances))
    }
}
