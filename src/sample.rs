//! A module for the in-memory sample container the engine operates on:
//! projected 2-D point coordinates, optional covariates and one scalar
//! response per point.

use crate::errors::{KrigeError, Result};
use ndarray::{Array1, Array2, Axis};
use std::fmt;

/// A drift/trend design term: one column of the design matrix assembled
/// from a [`SpatialSample`] or a grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriftTerm {
    /// Projected x coordinate
    Easting,
    /// Projected y coordinate
    Northing,
    /// The i-th covariate column of the sample (e.g. depth)
    Covariate(usize),
}

impl fmt::Display for DriftTerm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DriftTerm::Easting => write!(f, "Easting"),
            DriftTerm::Northing => write!(f, "Northing"),
            DriftTerm::Covariate(i) => write!(f, "Covariate({i})"),
        }
    }
}

/// An ordered, immutable collection of sample points.
///
/// All points share one planar coordinate reference frame; rows with
/// missing values are expected to be dropped by the loader before the
/// sample is built. Residuals are attached (as a new value) by the
/// regression-kriging combiner, never mutated in place.
#[derive(Debug, Clone)]
pub struct SpatialSample {
    coords: Array2<f64>,
    covariates: Array2<f64>,
    response: Array1<f64>,
    residuals: Option<Array1<f64>>,
}

impl SpatialSample {
    /// Build a sample from (n, 2) coordinates, (n, p) covariates and n
    /// response values. All values must be finite.
    pub fn new(
        coords: Array2<f64>,
        covariates: Array2<f64>,
        response: Array1<f64>,
    ) -> Result<Self> {
        let n = coords.nrows();
        if coords.ncols() != 2 {
            return Err(KrigeError::InvalidParameter(format!(
                "coordinates must be (n, 2), got (n, {})",
                coords.ncols()
            )));
        }
        if covariates.nrows() != n || response.len() != n {
            return Err(KrigeError::InvalidParameter(format!(
                "row mismatch: {} coordinates, {} covariate rows, {} responses",
                n,
                covariates.nrows(),
                response.len()
            )));
        }
        if coords.iter().any(|v| !v.is_finite())
            || covariates.iter().any(|v| !v.is_finite())
            || response.iter().any(|v| !v.is_finite())
        {
            return Err(KrigeError::InvalidParameter(
                "sample contains non-finite values; drop incomplete rows before loading"
                    .to_string(),
            ));
        }
        Ok(SpatialSample {
            coords,
            covariates,
            response,
            residuals: None,
        })
    }

    /// Number of sample points.
    pub fn len(&self) -> usize {
        self.coords.nrows()
    }

    /// True when the sample holds no point.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of covariate columns.
    pub fn n_covariates(&self) -> usize {
        self.covariates.ncols()
    }

    /// (n, 2) Easting/Northing coordinates.
    pub fn coords(&self) -> &Array2<f64> {
        &self.coords
    }

    /// (n, p) covariate values.
    pub fn covariates(&self) -> &Array2<f64> {
        &self.covariates
    }

    /// Response values.
    pub fn response(&self) -> &Array1<f64> {
        &self.response
    }

    /// Regression residuals, present once the trend has been removed.
    pub fn residuals(&self) -> Option<&Array1<f64>> {
        self.residuals.as_ref()
    }

    /// Return a copy of this sample with residuals attached.
    pub fn with_residuals(&self, residuals: Array1<f64>) -> Result<Self> {
        if residuals.len() != self.len() {
            return Err(KrigeError::InvalidParameter(format!(
                "{} residuals for {} points",
                residuals.len(),
                self.len()
            )));
        }
        Ok(SpatialSample {
            residuals: Some(residuals),
            ..self.clone()
        })
    }

    /// Extract the points at `indices` as a new sample (fold splitting).
    pub fn take(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(KrigeError::InvalidParameter(format!(
                "index {bad} out of bounds for sample of {} points",
                self.len()
            )));
        }
        Ok(SpatialSample {
            coords: self.coords.select(Axis(0), indices),
            covariates: self.covariates.select(Axis(0), indices),
            response: self.response.select(Axis(0), indices),
            residuals: self
                .residuals
                .as_ref()
                .map(|r| r.select(Axis(0), indices)),
        })
    }

    /// Assemble the (n, terms) design matrix for the given drift/trend terms.
    pub fn drift_matrix(&self, terms: &[DriftTerm]) -> Result<Array2<f64>> {
        let mut design = Array2::zeros((self.len(), terms.len()));
        for (j, term) in terms.iter().enumerate() {
            let column = match term {
                DriftTerm::Easting => self.coords.column(0),
                DriftTerm::Northing => self.coords.column(1),
                DriftTerm::Covariate(i) => {
                    if *i >= self.n_covariates() {
                        return Err(KrigeError::InvalidParameter(format!(
                            "covariate index {i} out of bounds ({} covariates)",
                            self.n_covariates()
                        )));
                    }
                    self.covariates.column(*i)
                }
            };
            design.column_mut(j).assign(&column);
        }
        Ok(design)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> SpatialSample {
        SpatialSample::new(
            array![[0., 0.], [1., 2.], [3., 1.], [4., 4.]],
            array![[10.], [20.], [30.], [40.]],
            array![1., 2., 3., 4.],
        )
        .unwrap()
    }

    #[test]
    fn test_shape_validation() {
        assert!(SpatialSample::new(
            array![[0., 0., 0.]],
            array![[1.]],
            array![1.]
        )
        .is_err());
        assert!(SpatialSample::new(
            array![[0., 0.], [1., 1.]],
            array![[1.], [2.]],
            array![1.]
        )
        .is_err());
        assert!(SpatialSample::new(
            array![[0., 0.], [1., f64::NAN]],
            array![[1.], [2.]],
            array![1., 2.]
        )
        .is_err());
    }

    #[test]
    fn test_take_subsets_all_fields() {
        let s = sample().with_residuals(array![0.1, 0.2, 0.3, 0.4]).unwrap();
        let sub = s.take(&[2, 0]).unwrap();
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.coords().row(0).to_vec(), vec![3., 1.]);
        assert_eq!(sub.response()[1], 1.);
        assert_eq!(sub.residuals().unwrap()[0], 0.3);
        assert!(s.take(&[9]).is_err());
    }

    #[test]
    fn test_drift_matrix_columns() {
        let s = sample();
        let d = s
            .drift_matrix(&[DriftTerm::Northing, DriftTerm::Covariate(0)])
            .unwrap();
        assert_eq!(d.column(0).to_vec(), vec![0., 2., 1., 4.]);
        assert_eq!(d.column(1).to_vec(), vec![10., 20., 30., 40.]);
        assert!(s.drift_matrix(&[DriftTerm::Covariate(3)]).is_err());
    }
}
