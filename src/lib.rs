//! This library implements [regression kriging](https://en.wikipedia.org/wiki/Regression-kriging)
//! for gridded estimation of a spatially-sampled scalar field, such as
//! interpolating water temperature profiles over a lake or coastal domain.
//!
//! The pipeline decomposes the field into a deterministic trend on
//! covariates (depth, position) and a spatially-correlated residual:
//! the trend is an additive penalized B-spline smooth, the residual is
//! kriged under a parametric [variogram](https://en.wikipedia.org/wiki/Variogram)
//! fitted to the binned empirical semivariances, and the two surfaces are
//! recombined cell-wise over a masked regular grid.
//!
//! The stages are usable on their own: [`empirical_variogram`] and
//! [`fit_variogram`] for variography, [`KrigingSystem`] for ordinary and
//! external-drift kriging, [`CrossValidationParams`] for covariate
//! selection, and [`RegressionKrigingParams`] for the full pipeline.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod empirical;
mod errors;
mod fitting;
mod grid;
mod kriging;
mod regression_kriging;
mod sample;
mod selection;
mod trend;
mod variogram_models;

pub use empirical::*;
pub use errors::*;
pub use fitting::*;
pub use grid::*;
pub use kriging::*;
pub use regression_kriging::*;
pub use sample::*;
pub use selection::*;
pub use trend::*;
pub use variogram_models::*;
