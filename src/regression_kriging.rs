//! A module for the full regression-kriging pipeline: smooth trend on the
//! selected covariates, variogram of the trend residuals, ordinary kriging
//! of those residuals onto the grid, and the cell-wise recombination.
//!
//! The residual field is kriged without drift; the covariate information
//! lives entirely in the trend. When the fitted residual variogram carries
//! no variance the residual surface is identically zero and the output is
//! the pure trend.

use crate::empirical::empirical_variogram;
use crate::errors::{KrigeError, Result};
use crate::fitting::{fit_variogram, FitConfig};
use crate::grid::{Grid, GridPrediction};
use crate::kriging::KrigingSystem;
use crate::sample::{DriftTerm, SpatialSample};
use crate::trend::{SmoothSpec, TrendModel};
use crate::variogram_models::{VariogramModel, VariogramShape};

use linfa::ParamGuard;
use log::{debug, warn};
use ndarray::Array2;
use rayon::prelude::*;

/// Total-sill threshold, relative to the response variance, below which
/// the residual field is treated as noise-free and kriging is skipped.
const PURE_TREND_RTOL: f64 = 1e-10;

/// A set of validated regression-kriging parameters.
#[derive(Clone, Debug)]
pub struct RegressionKrigingValidParams {
    bin_width: f64,
    cutoff: f64,
    terms: Vec<DriftTerm>,
    smooths: Vec<SmoothSpec>,
    shapes: Vec<VariogramShape>,
    fit: FitConfig,
}

/// The hyperparameters of the regression-kriging pipeline: the trend
/// terms (typically the winner of covariate selection), per-term smoothing
/// and the residual-variogram settings.
#[derive(Clone, Debug)]
pub struct RegressionKrigingParams(RegressionKrigingValidParams);

impl RegressionKrigingParams {
    /// Constructor given the trend terms and the residual-variogram bin
    /// width and cutoff. One default [`SmoothSpec`] per term.
    pub fn new(terms: Vec<DriftTerm>, bin_width: f64, cutoff: f64) -> Self {
        let smooths = vec![SmoothSpec::default(); terms.len()];
        RegressionKrigingParams(RegressionKrigingValidParams {
            bin_width,
            cutoff,
            terms,
            smooths,
            shapes: VariogramShape::ALL.to_vec(),
            fit: FitConfig::default(),
        })
    }

    /// Set the smoothing specification of each trend term.
    pub fn smooths(mut self, smooths: Vec<SmoothSpec>) -> Self {
        self.0.smooths = smooths;
        self
    }

    /// Set the candidate shapes for the residual variogram.
    pub fn shapes(mut self, shapes: Vec<VariogramShape>) -> Self {
        self.0.shapes = shapes;
        self
    }

    /// Set the variogram fit settings.
    pub fn fit(mut self, fit: FitConfig) -> Self {
        self.0.fit = fit;
        self
    }
}

impl ParamGuard for RegressionKrigingParams {
    type Checked = RegressionKrigingValidParams;
    type Error = KrigeError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.terms.is_empty() {
            return Err(KrigeError::InvalidParameter(
                "at least one trend term is required".to_string(),
            ));
        }
        if self.0.smooths.len() != self.0.terms.len() {
            return Err(KrigeError::InvalidParameter(format!(
                "{} smooth spec(s) for {} trend term(s)",
                self.0.smooths.len(),
                self.0.terms.len()
            )));
        }
        if !(self.0.bin_width > 0.) || !self.0.bin_width.is_finite() {
            return Err(KrigeError::InvalidParameter(format!(
                "bin width must be positive, got {}",
                self.0.bin_width
            )));
        }
        if !(self.0.cutoff > 0.) || !self.0.cutoff.is_finite() {
            return Err(KrigeError::InvalidParameter(format!(
                "cutoff must be positive, got {}",
                self.0.cutoff
            )));
        }
        if self.0.shapes.is_empty() {
            return Err(KrigeError::InvalidParameter(
                "at least one candidate variogram shape is required".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

/// The fitted pipeline: the trend, the residual variogram, the sample with
/// residuals attached, and the prediction rasters.
#[derive(Debug, Clone)]
pub struct RegressionKriging {
    /// Additive smooth trend on the selected terms
    pub trend: TrendModel,
    /// Variogram fitted to the trend residuals
    pub variogram: VariogramModel,
    /// The input sample with trend residuals attached
    pub sample: SpatialSample,
    /// Trend, residual and combined rasters over the grid
    pub prediction: GridPrediction,
}

impl RegressionKrigingValidParams {
    /// Fit the trend and residual variogram on `sample` and predict every
    /// valid cell of `grid`.
    pub fn run(&self, sample: &SpatialSample, grid: &Grid) -> Result<RegressionKriging> {
        let design = sample.drift_matrix(&self.terms)?;
        let trend = TrendModel::fit(&design, sample.response(), &self.smooths)?;
        let residuals = trend.residuals().clone();
        let sample = sample.with_residuals(residuals.clone())?;

        let curve = empirical_variogram(
            sample.coords(),
            &residuals,
            self.bin_width,
            self.cutoff,
        )?;
        let variogram = fit_variogram(&curve, &self.shapes, &self.fit)?;

        let cells = grid.valid_cells();
        if cells.is_empty() {
            return Err(KrigeError::InsufficientData(
                "grid has no valid cell to predict".to_string(),
            ));
        }
        let cell_design = grid.term_matrix(&self.terms, &cells)?;
        let cell_trend = trend.predict(&cell_design)?;

        let n = sample.len() as f64;
        let y_mean = sample.response().sum() / n;
        let y_var = sample
            .response()
            .iter()
            .map(|y| (y - y_mean).powi(2))
            .sum::<f64>()
            / n;
        let pure_trend = variogram.total_sill() <= PURE_TREND_RTOL * y_var.max(f64::MIN_POSITIVE);

        let (cell_residual, failed_cells) = if pure_trend {
            debug!(
                "residual variogram {variogram} carries no variance, \
                 output is the pure trend"
            );
            (vec![Some(0.); cells.len()], 0)
        } else {
            let system = KrigingSystem::ordinary(variogram, sample.coords(), &residuals)?;
            let kriged: Vec<Option<f64>> = cells
                .par_iter()
                .map(|&(iy, ix)| {
                    let (x, y) = grid.cell_center(iy, ix);
                    system.predict_one(x, y, None).ok().map(|(v, _)| v)
                })
                .collect();
            let failed = kriged.iter().filter(|r| r.is_none()).count();
            if failed > 0 {
                warn!(
                    "{failed} of {} valid cells failed to krige and were left as no-data",
                    cells.len()
                );
            }
            (kriged, failed)
        };

        let shape = (grid.ny(), grid.nx());
        let mut trend_raster = Array2::from_elem(shape, f64::NAN);
        let mut residual_raster = Array2::from_elem(shape, f64::NAN);
        let mut combined_raster = Array2::from_elem(shape, f64::NAN);
        for (k, &(iy, ix)) in cells.iter().enumerate() {
            trend_raster[[iy, ix]] = cell_trend[k];
            if let Some(r) = cell_residual[k] {
                residual_raster[[iy, ix]] = r;
                combined_raster[[iy, ix]] = cell_trend[k] + r;
            }
        }

        Ok(RegressionKriging {
            trend,
            variogram,
            sample,
            prediction: GridPrediction {
                trend: trend_raster,
                residual: residual_raster,
                combined: combined_raster,
                failed_cells,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    /// 25 points on a 5x5 lattice with spacing 3, one covariate decoupled
    /// from the lattice, optionally with a smooth spatial residual field.
    fn lattice_sample(spatial: bool) -> SpatialSample {
        let n = 25;
        let mut coords = Array2::zeros((n, 2));
        let mut cov = Array2::zeros((n, 1));
        let mut response = Array1::zeros(n);
        for i in 0..n {
            let x = (i % 5) as f64 * 3.;
            let y = (i / 5) as f64 * 3.;
            coords[[i, 0]] = x;
            coords[[i, 1]] = y;
            let c = ((i * 7 + 3) % 11) as f64;
            cov[[i, 0]] = c;
            response[i] = 2. + 0.5 * c;
            if spatial {
                response[i] += 0.3 * ((x + y) / 6.).sin();
            }
        }
        SpatialSample::new(coords, cov, response).unwrap()
    }

    fn small_grid() -> Grid {
        let cov = array![
            [1., 4., 7., 10.],
            [2., 5., 8., 9.],
            [3., 6., f64::NAN, 8.]
        ];
        let mask = array![
            [true, true, true, false],
            [true, true, true, true],
            [true, true, true, true]
        ];
        Grid::new(4, 3, 0., 0., 4., vec![cov], mask).unwrap()
    }

    #[test]
    fn test_pure_trend_fallback() {
        // response is an exact function of the covariate; the residual
        // variogram is flat and kriging is skipped
        let result = RegressionKrigingParams::new(vec![DriftTerm::Covariate(0)], 2., 15.)
            .check()
            .unwrap()
            .run(&lattice_sample(false), &small_grid())
            .unwrap();
        assert_eq!(result.prediction.failed_cells, 0);
        for iy in 0..3 {
            for ix in 0..4 {
                let r = result.prediction.residual[[iy, ix]];
                if small_grid().is_valid(iy, ix) {
                    assert_abs_diff_eq!(r, 0.0);
                    assert_abs_diff_eq!(
                        result.prediction.combined[[iy, ix]],
                        result.prediction.trend[[iy, ix]]
                    );
                } else {
                    assert!(r.is_nan());
                }
            }
        }
    }

    #[test]
    fn test_combined_is_trend_plus_residual() {
        let grid = small_grid();
        let result = RegressionKrigingParams::new(vec![DriftTerm::Covariate(0)], 2., 15.)
            .check()
            .unwrap()
            .run(&lattice_sample(true), &grid)
            .unwrap();
        assert_eq!(result.prediction.failed_cells, 0);
        for iy in 0..3 {
            for ix in 0..4 {
                let t = result.prediction.trend[[iy, ix]];
                let r = result.prediction.residual[[iy, ix]];
                let c = result.prediction.combined[[iy, ix]];
                if grid.is_valid(iy, ix) {
                    assert!(t.is_finite() && r.is_finite());
                    assert_abs_diff_eq!(c, t + r, epsilon = 1e-12);
                } else {
                    // masked cell and NaN-covariate cell stay no-data
                    assert!(t.is_nan() && r.is_nan() && c.is_nan());
                }
            }
        }
    }

    #[test]
    fn test_residuals_attached_to_sample() {
        let sample = lattice_sample(true);
        let result = RegressionKrigingParams::new(vec![DriftTerm::Covariate(0)], 2., 15.)
            .check()
            .unwrap()
            .run(&sample, &small_grid())
            .unwrap();
        let residuals = result.sample.residuals().unwrap();
        assert_eq!(residuals.len(), sample.len());
        for (r, (f, o)) in residuals
            .iter()
            .zip(result.trend.fitted().iter().zip(sample.response().iter()))
        {
            assert_abs_diff_eq!(f + r, o, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_invalid_configuration_fatal() {
        assert!(RegressionKrigingParams::new(vec![], 2., 15.).check().is_err());
        assert!(RegressionKrigingParams::new(vec![DriftTerm::Easting], 0., 15.)
            .check()
            .is_err());
        assert!(
            RegressionKrigingParams::new(vec![DriftTerm::Easting], 2., 15.)
                .smooths(vec![])
                .check()
                .is_err()
        );
        assert!(
            RegressionKrigingParams::new(vec![DriftTerm::Easting], 2., 15.)
                .shapes(vec![])
                .check()
                .is_err()
        );
    }

    #[test]
    fn test_fully_masked_grid_is_insufficient() {
        let grid = Grid::new(
            2,
            2,
            0.,
            0.,
            1.,
            vec![Array2::ones((2, 2))],
            Array2::from_elem((2, 2), false),
        )
        .unwrap();
        let err = RegressionKrigingParams::new(vec![DriftTerm::Covariate(0)], 2., 15.)
            .check()
            .unwrap()
            .run(&lattice_sample(true), &grid)
            .unwrap_err();
        assert!(matches!(err, KrigeError::InsufficientData(_)));
    }
}
