use thiserror::Error;

/// A result type for regression-kriging computations
pub type Result<T> = std::result::Result<T, KrigeError>;

/// An error raised by the variogram, kriging or trend machinery
#[derive(Error, Debug)]
pub enum KrigeError {
    /// When too few points or lag bins support a requested computation
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    /// When the variogram or trend optimizer exceeds its evaluation budget
    /// without reaching a stable minimum
    #[error("Fit did not converge: {0}")]
    FitDidNotConverge(String),
    /// When the kriging linear system is singular or ill-conditioned
    /// (duplicate coordinates, collinear drift)
    #[error("Degenerate kriging system: {0}")]
    DegenerateKrigingSystem(String),
    /// When a caller supplies an out-of-domain configuration value;
    /// always fatal, denotes a programming error rather than a data error
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
}
