//! A module for the regular prediction lattice: cell geometry, covariate
//! layers and the validity mask supplied by the external grid builder.

use crate::errors::{KrigeError, Result};
use crate::sample::DriftTerm;
use ndarray::{Array1, Array2};

/// A regular (ny, nx) lattice over the buffered sampling domain.
///
/// The engine only reads cell-center coordinates, covariate layer values
/// and the mask; polygon construction, buffering and rasterization happen
/// in the grid-builder collaborator. A cell is computed on only when the
/// mask holds *and* every covariate layer is finite there.
#[derive(Debug, Clone)]
pub struct Grid {
    nx: usize,
    ny: usize,
    x0: f64,
    y0: f64,
    resolution: f64,
    covariates: Vec<Array2<f64>>,
    mask: Array2<bool>,
}

impl Grid {
    /// Build a grid from its lower-left corner `(x0, y0)`, cell size,
    /// covariate layers and validity mask (all layers shaped (ny, nx)).
    pub fn new(
        nx: usize,
        ny: usize,
        x0: f64,
        y0: f64,
        resolution: f64,
        covariates: Vec<Array2<f64>>,
        mask: Array2<bool>,
    ) -> Result<Self> {
        if nx == 0 || ny == 0 {
            return Err(KrigeError::InvalidParameter(
                "grid must have at least one cell per axis".to_string(),
            ));
        }
        if !(resolution > 0.) || !resolution.is_finite() {
            return Err(KrigeError::InvalidParameter(format!(
                "resolution must be positive, got {resolution}"
            )));
        }
        if mask.dim() != (ny, nx) {
            return Err(KrigeError::InvalidParameter(format!(
                "mask shape {:?} does not match grid ({ny}, {nx})",
                mask.dim()
            )));
        }
        for (i, layer) in covariates.iter().enumerate() {
            if layer.dim() != (ny, nx) {
                return Err(KrigeError::InvalidParameter(format!(
                    "covariate layer {i} shape {:?} does not match grid ({ny}, {nx})",
                    layer.dim()
                )));
            }
        }
        Ok(Grid {
            nx,
            ny,
            x0,
            y0,
            resolution,
            covariates,
            mask,
        })
    }

    /// Cells along x.
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Cells along y.
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Cell size in coordinate units.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Number of covariate layers.
    pub fn n_covariates(&self) -> usize {
        self.covariates.len()
    }

    /// Center coordinates (easting, northing) of cell (iy, ix).
    pub fn cell_center(&self, iy: usize, ix: usize) -> (f64, f64) {
        (
            self.x0 + (ix as f64 + 0.5) * self.resolution,
            self.y0 + (iy as f64 + 0.5) * self.resolution,
        )
    }

    /// Whether cell (iy, ix) takes part in prediction.
    pub fn is_valid(&self, iy: usize, ix: usize) -> bool {
        self.mask[[iy, ix]]
            && self
                .covariates
                .iter()
                .all(|layer| layer[[iy, ix]].is_finite())
    }

    /// Indices of all valid cells, row-major.
    pub fn valid_cells(&self) -> Vec<(usize, usize)> {
        let mut cells = Vec::new();
        for iy in 0..self.ny {
            for ix in 0..self.nx {
                if self.is_valid(iy, ix) {
                    cells.push((iy, ix));
                }
            }
        }
        cells
    }

    /// Values of one drift/trend term at the given cells.
    pub fn term_values(&self, term: DriftTerm, cells: &[(usize, usize)]) -> Result<Array1<f64>> {
        let mut out = Array1::zeros(cells.len());
        for (k, &(iy, ix)) in cells.iter().enumerate() {
            out[k] = match term {
                DriftTerm::Easting => self.cell_center(iy, ix).0,
                DriftTerm::Northing => self.cell_center(iy, ix).1,
                DriftTerm::Covariate(i) => {
                    let layer = self.covariates.get(i).ok_or_else(|| {
                        KrigeError::InvalidParameter(format!(
                            "covariate layer {i} out of bounds ({} layers)",
                            self.covariates.len()
                        ))
                    })?;
                    layer[[iy, ix]]
                }
            };
        }
        Ok(out)
    }

    /// Assemble the (cells, terms) design matrix at the given cells.
    pub fn term_matrix(
        &self,
        terms: &[DriftTerm],
        cells: &[(usize, usize)],
    ) -> Result<Array2<f64>> {
        let mut design = Array2::zeros((cells.len(), terms.len()));
        for (j, &term) in terms.iter().enumerate() {
            design.column_mut(j).assign(&self.term_values(term, cells)?);
        }
        Ok(design)
    }
}

/// The prediction rasters produced by the regression-kriging combiner.
/// Cells outside the valid domain hold NaN in every layer.
#[derive(Debug, Clone)]
pub struct GridPrediction {
    /// Trend surface evaluated from the grid covariates
    pub trend: Array2<f64>,
    /// Kriged residual surface
    pub residual: Array2<f64>,
    /// Cell-wise sum of trend and residual
    pub combined: Array2<f64>,
    /// Valid cells whose kriging solve failed and were left as no-data
    pub failed_cells: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn grid() -> Grid {
        Grid::new(
            3,
            2,
            100.,
            200.,
            10.,
            vec![array![[5., 6., f64::NAN], [7., 8., 9.]]],
            array![[true, true, true], [true, false, true]],
        )
        .unwrap()
    }

    #[test]
    fn test_cell_centers() {
        let g = grid();
        let (x, y) = g.cell_center(0, 0);
        assert_abs_diff_eq!(x, 105.);
        assert_abs_diff_eq!(y, 205.);
        let (x, y) = g.cell_center(1, 2);
        assert_abs_diff_eq!(x, 125.);
        assert_abs_diff_eq!(y, 215.);
    }

    #[test]
    fn test_mask_and_nan_covariate_exclude_cells() {
        let g = grid();
        // (0, 2) has NaN covariate, (1, 1) is masked out
        assert_eq!(g.valid_cells(), vec![(0, 0), (0, 1), (1, 0), (1, 2)]);
    }

    #[test]
    fn test_term_matrix() {
        let g = grid();
        let cells = vec![(0, 0), (1, 2)];
        let m = g
            .term_matrix(
                &[DriftTerm::Easting, DriftTerm::Covariate(0)],
                &cells,
            )
            .unwrap();
        assert_eq!(m.column(0).to_vec(), vec![105., 125.]);
        assert_eq!(m.column(1).to_vec(), vec![5., 9.]);
        assert!(g.term_matrix(&[DriftTerm::Covariate(1)], &cells).is_err());
    }

    #[test]
    fn test_shape_validation() {
        assert!(Grid::new(0, 2, 0., 0., 1., vec![], array![[true], [true]]).is_err());
        assert!(Grid::new(1, 2, 0., 0., 0., vec![], array![[true], [true]]).is_err());
        assert!(Grid::new(2, 2, 0., 0., 1., vec![], array![[true], [true]]).is_err());
    }
}
