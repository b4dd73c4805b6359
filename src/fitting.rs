//! A module for fitting a parametric [`VariogramModel`] to an empirical
//! [`VariogramCurve`] by weighted nonlinear least squares.
//!
//! Bins are weighted by `pairs_k / h_k^2` (Cressie weighting), which
//! penalizes noisy, sparsely-supported, distant bins. The minimization runs
//! a bounded-budget COBYLA search from several start points and keeps the
//! best weighted residual sum of squares.

use crate::empirical::VariogramCurve;
use crate::errors::{KrigeError, Result};
use crate::variogram_models::{VariogramModel, VariogramShape};

use log::{debug, warn};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

/// Default number of multistarts for the variogram parameter search
pub const FIT_N_START: usize = 10;
/// Default maximum number of objective evaluations per start
pub const FIT_MAX_EVAL: usize = 500;
/// Default seed for the multistart draws
pub const FIT_DEFAULT_SEED: u64 = 42;

/// Settings of the variogram parameter search.
#[derive(Clone, Debug)]
pub struct FitConfig {
    /// Number of optimizer restarts (first start is a moment-based guess)
    pub n_start: usize,
    /// Evaluation budget per restart; guarantees termination
    pub max_eval: usize,
    /// Seed for the random restart draws
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            n_start: FIT_N_START,
            max_eval: FIT_MAX_EVAL,
            seed: FIT_DEFAULT_SEED,
        }
    }
}

pub(crate) struct CobylaParams {
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub maxeval: usize,
}

impl Default for CobylaParams {
    fn default() -> Self {
        CobylaParams {
            rhobeg: 0.25,
            ftol_rel: 1e-6,
            maxeval: FIT_MAX_EVAL,
        }
    }
}

/// Cressie-weighted residual sum of squares of `model` against `curve`.
pub fn weighted_rss(curve: &VariogramCurve, model: &VariogramModel) -> f64 {
    let mut rss = 0.;
    for k in 0..curve.len() {
        let h = curve.lags[k];
        let w = curve.counts[k] as f64 / (h * h);
        let r = curve.semivariances[k] - model.gamma(h);
        rss += w * r * r;
    }
    rss
}

/// Fit every candidate shape independently and return the model with the
/// lowest weighted residual sum of squares.
///
/// A shape whose search does not converge is skipped with a warning; the
/// call fails with `FitDidNotConverge` only when every candidate fails.
pub fn fit_variogram(
    curve: &VariogramCurve,
    shapes: &[VariogramShape],
    config: &FitConfig,
) -> Result<VariogramModel> {
    if shapes.is_empty() {
        return Err(KrigeError::InvalidParameter(
            "at least one candidate variogram shape is required".to_string(),
        ));
    }
    let mut best: Option<(f64, VariogramModel)> = None;
    for &shape in shapes {
        match fit_variogram_shape(curve, shape, config) {
            Ok((model, wrss)) => {
                debug!("fitted {model} with wrss={wrss:.6e}");
                if best.as_ref().map_or(true, |(b, _)| wrss < *b) {
                    best = Some((wrss, model));
                }
            }
            Err(err @ KrigeError::FitDidNotConverge(_)) => {
                warn!("variogram fit with shape {shape} failed: {err}");
            }
            Err(err) => return Err(err),
        }
    }
    best.map(|(_, model)| model).ok_or_else(|| {
        KrigeError::FitDidNotConverge("no candidate variogram shape converged".to_string())
    })
}

/// Fit a single shape, returning the model and its weighted RSS.
///
/// Three free parameters need at least three non-empty lag bins, so a
/// curve with fewer (including the empty curve) raises `InsufficientData`.
pub fn fit_variogram_shape(
    curve: &VariogramCurve,
    shape: VariogramShape,
    config: &FitConfig,
) -> Result<(VariogramModel, f64)> {
    if curve.len() < 3 {
        return Err(KrigeError::InsufficientData(format!(
            "{} non-empty lag bin(s), at least 3 required to fit nugget/sill/range",
            curve.len()
        )));
    }
    let gamma_max = curve.max_semivariance().unwrap_or(0.);
    let lag_max = curve.lags[curve.len() - 1];

    // Flat curve: the field has no measurable spatial variance at any lag.
    // Return the zero model directly, the pure-trend fallback downstream.
    if gamma_max <= 0. {
        return Ok((VariogramModel::new(shape, 0., 0., lag_max)?, 0.));
    }

    // Parameters are searched in normalized units so one trust-region
    // radius suits all of them: [nugget/gmax, psill/gmax, range/hmax].
    let bounds: Vec<(f64, f64)> = vec![(0., 1.), (0., 2.), (1e-3, 2.)];
    let objective = |x: &[f64]| -> f64 {
        let model = VariogramModel {
            shape,
            nugget: (x[0] * gamma_max).max(0.),
            sill: (x[1] * gamma_max).max(0.),
            range: (x[2] * lag_max).max(1e-3 * lag_max),
        };
        let rss = weighted_rss(curve, &model);
        if rss.is_finite() {
            rss
        } else {
            f64::INFINITY
        }
    };

    // Moment-based first start: nugget from the shortest lag, the rest of
    // the observed variance as partial sill, half the maximum lag as range.
    let nugget0 = (curve.semivariances[0] / gamma_max).clamp(0., 1.) * 0.5;
    let start0 = vec![nugget0, (1. - nugget0).max(0.1), 0.5];

    let mut rng = Xoshiro256Plus::seed_from_u64(config.seed);
    let mut starts = vec![start0];
    for _ in 1..config.n_start.max(1) {
        starts.push(bounds.iter().map(|&(lo, up)| rng.gen_range(lo..up)).collect());
    }

    let cobyla = CobylaParams {
        maxeval: config.max_eval,
        ..CobylaParams::default()
    };
    let (fval, x_opt) = starts
        .iter()
        .map(|x0| optimize_params(&objective, x0, &bounds, &cobyla))
        .fold((f64::INFINITY, vec![0.; 3]), |acc, res| {
            if res.0 < acc.0 {
                res
            } else {
                acc
            }
        });

    if !fval.is_finite() {
        return Err(KrigeError::FitDidNotConverge(format!(
            "no finite weighted RSS reached for shape {shape} within {} evaluations",
            config.max_eval
        )));
    }

    let model = VariogramModel::new(
        shape,
        (x_opt[0] * gamma_max).max(0.),
        (x_opt[1] * gamma_max).max(0.),
        (x_opt[2] * lag_max).max(1e-3 * lag_max),
    )?;
    Ok((model, fval))
}

/// Minimize `objfn` within `bounds` starting from `x0` with COBYLA.
pub(crate) fn optimize_params<F: Fn(&[f64]) -> f64>(
    objfn: &F,
    x0: &[f64],
    bounds: &[(f64, f64)],
    cobyla: &CobylaParams,
) -> (f64, Vec<f64>) {
    use cobyla::{minimize, Func, RhoBeg, StopTols};

    let cons: Vec<&dyn Func<()>> = vec![];
    match minimize(
        |x, _: &mut ()| objfn(x),
        x0,
        bounds,
        &cons,
        (),
        cobyla.maxeval,
        RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((_, x_opt, fval)) => {
            let fval = if fval.is_nan() { f64::INFINITY } else { fval };
            (fval, x_opt)
        }
        Err((status, x_opt, _)) => {
            debug!("COBYLA restart ended with status {status:?}");
            (f64::INFINITY, x_opt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::empirical::empirical_variogram;
    use ndarray::{array, Array1};

    fn synthetic_curve(model: &VariogramModel, n_bins: usize, bin_width: f64) -> VariogramCurve {
        let lags: Vec<f64> = (0..n_bins).map(|k| (k as f64 + 0.5) * bin_width).collect();
        let semivariances: Vec<f64> = lags.iter().map(|&h| model.gamma(h)).collect();
        VariogramCurve {
            lags: Array1::from_vec(lags),
            semivariances: Array1::from_vec(semivariances),
            counts: Array1::from_vec(vec![30; n_bins]),
            bin_width,
            cutoff: n_bins as f64 * bin_width,
        }
    }

    #[test]
    fn test_recovers_spherical_curve() {
        let truth = VariogramModel::new(VariogramShape::Spherical, 0.2, 1.8, 8.).unwrap();
        let curve = synthetic_curve(&truth, 15, 1.);
        let (fitted, wrss) =
            fit_variogram_shape(&curve, VariogramShape::Spherical, &FitConfig::default()).unwrap();
        // noiseless curve: fitted curve should track truth closely
        assert!(wrss < 0.05 * weighted_rss(&curve, &VariogramModel::new(
            VariogramShape::Spherical, 0., 0., 8.).unwrap()));
        for &h in &[1.5, 4.5, 9.5] {
            assert!((fitted.gamma(h) - truth.gamma(h)).abs() < 0.15 * truth.total_sill());
        }
    }

    #[test]
    fn test_invariants_hold_on_fit() {
        let truth = VariogramModel::new(VariogramShape::Exponential, 0., 1., 5.).unwrap();
        let curve = synthetic_curve(&truth, 12, 1.);
        let fitted = fit_variogram(&curve, &VariogramShape::ALL, &FitConfig::default()).unwrap();
        assert!(fitted.nugget >= 0.);
        assert!(fitted.sill >= 0.);
        assert!(fitted.range > 0.);
    }

    #[test]
    fn test_best_shape_beats_single_shape() {
        let truth = VariogramModel::new(VariogramShape::Gaussian, 0.1, 2., 6.).unwrap();
        let curve = synthetic_curve(&truth, 12, 1.);
        let cfg = FitConfig::default();
        let best = fit_variogram(&curve, &VariogramShape::ALL, &cfg).unwrap();
        let (lin_only, lin_wrss) =
            fit_variogram_shape(&curve, VariogramShape::Linear, &cfg).unwrap();
        assert!(weighted_rss(&curve, &best) <= lin_wrss + 1e-12, "{best} vs {lin_only}");
    }

    #[test]
    fn test_flat_curve_gives_zero_model() {
        let coords = array![[0., 0.], [1., 0.], [2., 0.], [0., 1.], [1., 1.], [2., 1.]];
        let values = Array1::from_elem(6, 3.5);
        let curve = empirical_variogram(&coords, &values, 0.5, 3.).unwrap();
        let (model, wrss) =
            fit_variogram_shape(&curve, VariogramShape::Exponential, &FitConfig::default())
                .unwrap();
        assert_eq!(model.nugget, 0.);
        assert_eq!(model.sill, 0.);
        assert_eq!(wrss, 0.);
    }

    #[test]
    fn test_too_few_bins_is_insufficient_data() {
        let coords = array![[0., 0.], [1., 0.]];
        let values = array![0., 1.];
        let curve = empirical_variogram(&coords, &values, 1., 5.).unwrap();
        let err = fit_variogram_shape(&curve, VariogramShape::Spherical, &FitConfig::default())
            .unwrap_err();
        assert!(matches!(err, KrigeError::InsufficientData(_)));
    }

    #[test]
    fn test_deterministic_given_seed() {
        let truth = VariogramModel::new(VariogramShape::Exponential, 0.3, 1.2, 7.).unwrap();
        let curve = synthetic_curve(&truth, 14, 1.);
        let cfg = FitConfig::default();
        let a = fit_variogram(&curve, &VariogramShape::ALL, &cfg).unwrap();
        let b = fit_variogram(&curve, &VariogramShape::ALL, &cfg).unwrap();
        assert_eq!(a, b);
    }
}
