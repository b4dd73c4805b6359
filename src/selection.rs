//! A module for covariate-model selection by k-fold cross-validation.
//!
//! Every candidate covariate subset is scored by training a variogram and
//! an external-drift kriging system on k-1 folds and predicting the
//! held-out fold; candidates are ranked by mean RMSE across folds. The
//! (fold, subset) cells are independent read-only computations and run in
//! parallel over subsets.

use crate::empirical::empirical_variogram;
use crate::errors::{KrigeError, Result};
use crate::fitting::{fit_variogram, FitConfig};
use crate::kriging::KrigingSystem;
use crate::sample::{DriftTerm, SpatialSample};
use crate::variogram_models::VariogramShape;

use itertools::Itertools;
use linfa::ParamGuard;
use log::warn;
use ndarray::Array1;
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;

/// Default number of folds
pub const CV_N_FOLDS: usize = 5;
/// Default fold-assignment seed
pub const CV_DEFAULT_SEED: u64 = 42;

/// Cross-validation score of one candidate covariate subset.
#[derive(Debug, Clone)]
pub struct SubsetScore {
    /// The candidate drift terms
    pub terms: Vec<DriftTerm>,
    /// RMSE of each fold that completed
    pub fold_rmse: Vec<f64>,
    /// Mean RMSE over completed folds
    pub mean_rmse: f64,
    /// Standard deviation of RMSE over completed folds
    pub std_rmse: f64,
    /// Number of folds that completed
    pub n_success: usize,
    /// Total number of folds attempted
    pub n_folds: usize,
    /// True when fewer than half the folds completed; the candidate is
    /// excluded from selection
    pub flagged: bool,
}

/// Outcome of a covariate-selection run: the winning subset plus the full
/// ranked score table for inspection.
#[derive(Debug, Clone)]
pub struct CovariateSelection {
    /// The selected covariate subset (lowest mean RMSE, ties broken by
    /// lower std then fewer terms)
    pub best: Vec<DriftTerm>,
    /// All candidate scores, ranked; flagged candidates sort last
    pub scores: Vec<SubsetScore>,
}

/// A set of validated cross-validation parameters.
#[derive(Clone, Debug)]
pub struct CrossValidationValidParams {
    bin_width: f64,
    cutoff: f64,
    n_folds: usize,
    seed: u64,
    shapes: Vec<VariogramShape>,
    fit: FitConfig,
    candidates: Option<Vec<Vec<DriftTerm>>>,
}

/// The hyperparameters of the covariate-selection harness: variogram
/// binning, candidate shapes, fold count and the candidate subsets.
#[derive(Clone, Debug)]
pub struct CrossValidationParams(CrossValidationValidParams);

impl CrossValidationParams {
    /// Constructor given the empirical-variogram bin width and cutoff.
    pub fn new(bin_width: f64, cutoff: f64) -> Self {
        CrossValidationParams(CrossValidationValidParams {
            bin_width,
            cutoff,
            n_folds: CV_N_FOLDS,
            seed: CV_DEFAULT_SEED,
            shapes: VariogramShape::ALL.to_vec(),
            fit: FitConfig::default(),
            candidates: None,
        })
    }

    /// Set the number of folds.
    pub fn n_folds(mut self, n_folds: usize) -> Self {
        self.0.n_folds = n_folds;
        self
    }

    /// Set the fold-assignment seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }

    /// Set the candidate variogram shapes tried on every training split.
    pub fn shapes(mut self, shapes: Vec<VariogramShape>) -> Self {
        self.0.shapes = shapes;
        self
    }

    /// Set the variogram fit settings.
    pub fn fit(mut self, fit: FitConfig) -> Self {
        self.0.fit = fit;
        self
    }

    /// Set explicit candidate subsets. When unset, the power set of
    /// {Easting, Northing, all covariates} is enumerated.
    pub fn candidates(mut self, candidates: Vec<Vec<DriftTerm>>) -> Self {
        self.0.candidates = Some(candidates);
        self
    }
}

impl ParamGuard for CrossValidationParams {
    type Checked = CrossValidationValidParams;
    type Error = KrigeError;

    fn check_ref(&self) -> Result<&Self::Checked> {
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
        if self.0.n_folds < 2 {
            return Err(KrigeError::InvalidParameter(format!(
                "at least 2 folds required, got {}",
                self.0.n_folds
            )));
        }
        if self.0.shapes.is_empty() {
            return Err(KrigeError::InvalidParameter(
                "at least one candidate variogram shape is required".to_string(),
            ));
        }
        if let Some(cands) = &self.0.candidates {
            if cands.is_empty() || cands.iter().any(|c| c.is_empty()) {
                return Err(KrigeError::InvalidParameter(
                    "candidate subsets must be non-empty".to_string(),
                ));
            }
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

impl CrossValidationValidParams {
    /// Rank the candidate covariate subsets on `sample` and pick the best.
    pub fn select(&self, sample: &SpatialSample) -> Result<CovariateSelection> {
        if self.n_folds >= sample.len() {
            return Err(KrigeError::InvalidParameter(format!(
                "{} folds for {} sample points",
                self.n_folds,
                sample.len()
            )));
        }
        let candidates = match &self.candidates {
            Some(c) => c.clone(),
            None => default_candidates(sample.n_covariates()),
        };
        let folds = k_fold_indices(sample.len(), self.n_folds, self.seed);

        let mut scores = candidates
            .par_iter()
            .map(|terms| self.score_subset(sample, terms, &folds))
            .collect::<Result<Vec<_>>>()?;

        // flagged candidates last, then mean RMSE, std, subset size
        scores.sort_by(|a, b| {
            a.flagged
                .cmp(&b.flagged)
                .then(a.mean_rmse.total_cmp(&b.mean_rmse))
                .then(a.std_rmse.total_cmp(&b.std_rmse))
                .then(a.terms.len().cmp(&b.terms.len()))
        });

        let best = scores
            .iter()
            .find(|s| !s.flagged)
            .map(|s| s.terms.clone())
            .ok_or_else(|| {
                KrigeError::InsufficientData(
                    "no candidate subset completed at least half of its folds".to_string(),
                )
            })?;
        Ok(CovariateSelection { best, scores })
    }

    fn score_subset(
        &self,
        sample: &SpatialSample,
        terms: &[DriftTerm],
        folds: &[Vec<usize>],
    ) -> Result<SubsetScore> {
        let mut fold_rmse = Vec::with_capacity(folds.len());
        for (i, test_idx) in folds.iter().enumerate() {
            match self.score_fold(sample, terms, folds, i) {
                Ok(rmse) => fold_rmse.push(rmse),
                Err(
                    err @ (KrigeError::InsufficientData(_)
                    | KrigeError::FitDidNotConverge(_)
                    | KrigeError::DegenerateKrigingSystem(_)),
                ) => {
                    warn!(
                        "fold {i} ({} test points) skipped for candidate {:?}: {err}",
                        test_idx.len(),
                        terms.iter().map(|t| t.to_string()).collect::<Vec<_>>()
                    );
                }
                Err(err) => return Err(err),
            }
        }

        let n_success = fold_rmse.len();
        let mean_rmse = if n_success > 0 {
            fold_rmse.iter().sum::<f64>() / n_success as f64
        } else {
            f64::INFINITY
        };
        let std_rmse = if n_success > 1 {
            let var = fold_rmse
                .iter()
                .map(|r| (r - mean_rmse).powi(2))
                .sum::<f64>()
                / (n_success - 1) as f64;
            var.sqrt()
        } else {
            0.
        };
        Ok(SubsetScore {
            terms: terms.to_vec(),
            fold_rmse,
            mean_rmse,
            std_rmse,
            n_success,
            n_folds: folds.len(),
            flagged: n_success * 2 < folds.len(),
        })
    }

    fn score_fold(
        &self,
        sample: &SpatialSample,
        terms: &[DriftTerm],
        folds: &[Vec<usize>],
        fold: usize,
    ) -> Result<f64> {
        let train_idx: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != fold)
            .flat_map(|(_, f)| f.iter().copied())
            .collect();
        if train_idx.len() < terms.len() + 2 {
            return Err(KrigeError::InsufficientData(format!(
                "{} training points for {} drift term(s)",
                train_idx.len(),
                terms.len()
            )));
        }
        let train = sample.take(&train_idx)?;
        let test = sample.take(&folds[fold])?;

        let curve = empirical_variogram(
            train.coords(),
            train.response(),
            self.bin_width,
            self.cutoff,
        )?;
        let model = fit_variogram(&curve, &self.shapes, &self.fit)?;

        let system = KrigingSystem::with_drift(
            model,
            train.coords(),
            train.response(),
            &train.drift_matrix(terms)?,
        )?;
        let predicted = system.predict(test.coords(), Some(&test.drift_matrix(terms)?))?;
        Ok(rmse(&predicted, test.response()))
    }
}

/// Root-mean-square error between predictions and observations.
pub fn rmse(predicted: &Array1<f64>, observed: &Array1<f64>) -> f64 {
    let n = predicted.len().max(1);
    ((predicted - observed).mapv(|v| v * v).sum() / n as f64).sqrt()
}

/// Deterministic near-uniform fold assignment: seeded shuffle followed by
/// round-robin distribution over `k` folds.
pub fn k_fold_indices(n: usize, k: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rng);
    let mut folds = vec![Vec::with_capacity(n / k + 1); k];
    for (i, idx) in indices.into_iter().enumerate() {
        folds[i % k].push(idx);
    }
    folds
}

/// All non-empty subsets of {Easting, Northing, covariates 0..p}.
pub fn default_candidates(n_covariates: usize) -> Vec<Vec<DriftTerm>> {
    let mut terms = vec![DriftTerm::Easting, DriftTerm::Northing];
    terms.extend((0..n_covariates).map(DriftTerm::Covariate));
    terms
        .into_iter()
        .powerset()
        .filter(|s| !s.is_empty())
        .collect()
}
