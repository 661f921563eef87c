//! Conversion between sparse point tables and dense regular grids.
//!
//! [`Grid::from_table`] accumulates an irregular point cloud into a dense
//! weighted histogram with explicit bin edges, and [`Grid::to_table`] is the
//! inverse conversion back to a sparse table of cell centers.
use std::cmp::Ordering;

use log::debug;
use ndarray::{ArrayD, IxDyn};
use thiserror::Error;

use crate::table::{Dimension, PointTable, TableError};

/// All the ways grid conversion can fail
#[derive(Debug, Clone, Error)]
pub enum GridError {
    #[error("The table does not carry a {0} column")]
    MissingDimension(Dimension),
    #[error("Expected {expected} resolution entries, received {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Resolution must be positive, received {0}")]
    NonPositiveResolution(f64),
    #[error("Cannot infer a resolution for {0}: fewer than two distinct coordinate values")]
    DegenerateAxis(Dimension),
    #[error("Cannot grid an empty table")]
    EmptyTable,
    #[error("Cell enumeration is not supported for {0} dimensions")]
    UnsupportedDimensionality(usize),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// How the per-dimension bin width is chosen when gridding a table
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Infer each dimension's resolution as the minimum successive
    /// difference between its sorted unique coordinate values, adapting to
    /// the finest spacing the data actually exhibits.
    Auto,
    /// Per-dimension bin widths, one per gridded dimension
    Explicit(Vec<f64>),
}

impl Resolution {
    /// Materialize the per-dimension bin widths for `dims` over `table`
    pub fn resolve(&self, table: &PointTable, dims: &[Dimension]) -> Result<Vec<f64>, GridError> {
        match self {
            Resolution::Auto => dims
                .iter()
                .map(|dim| {
                    let col = table
                        .column(*dim)
                        .ok_or(GridError::MissingDimension(*dim))?;
                    minimum_spacing(col).ok_or(GridError::DegenerateAxis(*dim))
                })
                .collect(),
            Resolution::Explicit(res) => {
                if res.len() != dims.len() {
                    return Err(GridError::DimensionMismatch {
                        expected: dims.len(),
                        actual: res.len(),
                    });
                }
                if let Some(bad) = res.iter().find(|r| !(**r > 0.0)) {
                    return Err(GridError::NonPositiveResolution(*bad));
                }
                Ok(res.clone())
            }
        }
    }
}

/// The minimum successive difference between sorted unique values, or `None`
/// when fewer than two distinct values remain after deduplication.
fn minimum_spacing(values: &[f64]) -> Option<f64> {
    let mut unique = values.to_vec();
    unique.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    unique.dedup();
    if unique.len() < 2 {
        return None;
    }
    unique
        .windows(2)
        .map(|w| w[1] - w[0])
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
}

/// A dense regular histogram of accumulated intensity with explicit bin
/// edges along each axis.
///
/// Invariants: `edges[d].len() == intensity.shape()[d] + 1` with strictly
/// increasing edges, and no cell is negative or NaN.
#[derive(Debug, Clone)]
pub struct Grid {
    /// The gridded dimensions, in axis order
    pub dims: Vec<Dimension>,
    /// Bin-edge coordinates along each axis
    pub edges: Vec<Vec<f64>>,
    /// Accumulated intensity per cell
    pub intensity: ArrayD<f32>,
}

impl Grid {
    /// Accumulate `table` into a dense grid over `dims`.
    ///
    /// The per-dimension bin count is `ceil((max - min) / resolution)` and
    /// each row's intensity is summed into the bin containing its
    /// coordinate, with values on the topmost edge falling into the last
    /// bin. Cells with no contributions hold zero.
    pub fn from_table(
        table: &PointTable,
        dims: &[Dimension],
        resolution: &Resolution,
    ) -> Result<Grid, GridError> {
        if table.is_empty() {
            return Err(GridError::EmptyTable);
        }
        let res = resolution.resolve(table, dims)?;

        let mut cols = Vec::with_capacity(dims.len());
        let mut bounds = Vec::with_capacity(dims.len());
        for dim in dims {
            let col = table
                .column(*dim)
                .ok_or(GridError::MissingDimension(*dim))?;
            let (min, max) = col.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
                (lo.min(*x), hi.max(*x))
            });
            cols.push(col);
            bounds.push((min, max));
        }

        let shape: Vec<usize> = bounds
            .iter()
            .zip(res.iter())
            .map(|((min, max), r)| (((max - min) / r).ceil() as usize).max(1))
            .collect();

        let edges: Vec<Vec<f64>> = bounds
            .iter()
            .zip(shape.iter().zip(res.iter()))
            .map(|((min, max), (n, r))| {
                if max > min {
                    let span = max - min;
                    (0..=*n).map(|j| min + span * j as f64 / *n as f64).collect()
                } else {
                    // A single distinct coordinate still yields one bin of
                    // the requested width
                    vec![*min, *min + *r]
                }
            })
            .collect();

        let mut intensity = ArrayD::<f32>::zeros(IxDyn(&shape));
        let mut idx = vec![0usize; dims.len()];
        for i in 0..table.len() {
            for (d, col) in cols.iter().enumerate() {
                let (min, max) = bounds[d];
                let n = shape[d];
                idx[d] = if max > min {
                    let t = ((col[i] - min) / (max - min) * n as f64).floor() as usize;
                    t.min(n - 1)
                } else {
                    0
                };
            }
            intensity[IxDyn(&idx)] += table.intensities()[i];
        }
        // Empty bins never go through a division here, but keep the NaN
        // coercion contract explicit
        intensity.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });

        debug!(
            "Gridded {} rows over {:?} into shape {:?}",
            table.len(),
            dims,
            shape
        );

        Ok(Grid {
            dims: dims.to_vec(),
            edges,
            intensity,
        })
    }

    /// Number of cells along each axis
    pub fn shape(&self) -> &[usize] {
        self.intensity.shape()
    }

    /// Cell-center coordinates along one axis, the arithmetic mean of
    /// adjacent bin edges
    pub fn centers(&self, axis: usize) -> Vec<f64> {
        self.edges[axis]
            .windows(2)
            .map(|w| (w[0] + w[1]) / 2.0)
            .collect()
    }

    /// Replace the intensity array, keeping edges and dimensions.
    ///
    /// The new array must match the grid shape.
    pub fn with_intensity(&self, intensity: ArrayD<f32>) -> Grid {
        Grid {
            dims: self.dims.clone(),
            edges: self.edges.clone(),
            intensity,
        }
    }

    /// Convert the grid back to a sparse table of cell centers.
    ///
    /// Cells with intensity ≤ 0 are dropped, the remainder sorted descending
    /// by intensity (ties keep row-major cell enumeration order) and
    /// optionally truncated to the `top` K rows. Cell enumeration is defined
    /// for one to three axes; higher dimensionality is an intentional
    /// limitation.
    pub fn to_table(&self, top: Option<usize>) -> Result<PointTable, GridError> {
        let ndim = self.edges.len();
        if !(1..=3).contains(&ndim) {
            return Err(GridError::UnsupportedDimensionality(ndim));
        }
        let centers: Vec<Vec<f64>> = (0..ndim).map(|d| self.centers(d)).collect();

        let mut rows: Vec<(Vec<f64>, f32)> = Vec::new();
        for (idx, v) in self.intensity.indexed_iter() {
            if *v > 0.0 {
                let coords = (0..ndim).map(|d| centers[d][idx[d]]).collect();
                rows.push((coords, *v));
            }
        }
        rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        if let Some(k) = top {
            rows.truncate(k);
        }

        let mut out = PointTable::new(self.dims.clone());
        for (coords, v) in rows {
            out.push(&coords, v)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::table::Dimension::*;

    fn table_1d(points: &[(f64, f32)]) -> PointTable {
        let mut table = PointTable::new(vec![Mz]);
        for (x, i) in points {
            table.push(&[*x], *i).unwrap();
        }
        table
    }

    #[test]
    fn test_minimum_spacing_ignores_duplicates() {
        assert_eq!(minimum_spacing(&[1.0, 2.5, 1.5, 1.5, 1.0]), Some(0.5));
        assert_eq!(minimum_spacing(&[2.0, 2.0, 2.0]), None);
    }

    #[test]
    fn test_auto_resolution() {
        let table = table_1d(&[(100.0, 1.0), (100.1, 1.0), (100.1, 2.0), (101.0, 1.0)]);
        let res = Resolution::Auto.resolve(&table, &[Mz]).unwrap();
        assert!((res[0] - 0.1).abs() < 1e-9);

        let degenerate = table_1d(&[(5.0, 1.0), (5.0, 2.0)]);
        assert!(matches!(
            Resolution::Auto.resolve(&degenerate, &[Mz]),
            Err(GridError::DegenerateAxis(Mz))
        ));
    }

    #[test]
    fn test_explicit_resolution_validation() {
        let table = table_1d(&[(0.0, 1.0), (1.0, 1.0)]);
        assert!(matches!(
            Resolution::Explicit(vec![0.5, 0.5]).resolve(&table, &[Mz]),
            Err(GridError::DimensionMismatch { expected: 1, actual: 2 })
        ));
        assert!(matches!(
            Resolution::Explicit(vec![-1.0]).resolve(&table, &[Mz]),
            Err(GridError::NonPositiveResolution(_))
        ));
    }

    #[test]
    fn test_bin_1d() {
        let table = table_1d(&[(0.0, 1.0), (0.25, 2.0), (0.9, 4.0), (1.0, 8.0)]);
        let grid = Grid::from_table(&table, &[Mz], &Resolution::Explicit(vec![0.5])).unwrap();
        assert_eq!(grid.shape(), &[2]);
        assert_eq!(grid.edges[0], vec![0.0, 0.5, 1.0]);
        // Top edge value joins the last bin
        assert_eq!(grid.intensity.as_slice().unwrap(), &[3.0, 12.0]);
    }

    #[test]
    fn test_bin_single_coordinate_axis() {
        let mut table = PointTable::new(vec![Mz, DriftTime]);
        table.push(&[100.0, 5.0], 1.0).unwrap();
        table.push(&[100.0, 7.0], 2.0).unwrap();
        let grid = Grid::from_table(
            &table,
            &[Mz, DriftTime],
            &Resolution::Explicit(vec![0.1, 1.0]),
        )
        .unwrap();
        assert_eq!(grid.shape(), &[1, 2]);
        assert_eq!(grid.edges[0], vec![100.0, 100.1]);
    }

    #[test]
    fn test_round_trip_preserves_mass_and_location() {
        let mut table = PointTable::new(vec![Mz, DriftTime]);
        let pts = [
            (100.02, 10.3, 50.0f32),
            (100.11, 11.9, 30.0),
            (100.48, 14.2, 20.0),
            (100.73, 10.1, 10.0),
        ];
        for (mz, dt, i) in pts {
            table.push(&[mz, dt], i).unwrap();
        }
        let res = vec![0.1, 0.5];
        let grid =
            Grid::from_table(&table, &[Mz, DriftTime], &Resolution::Explicit(res.clone())).unwrap();
        let back = grid.to_table(None).unwrap();

        let total_in = table.total_intensity();
        let total_out = back.total_intensity();
        assert!((total_in - total_out).abs() < 1e-3 * total_in);

        // Every surviving cell center lies within half a bin width of a
        // contributing input row
        for i in 0..back.len() {
            let coords = back.coordinates(i);
            let hit = (0..table.len()).any(|j| {
                let raw = table.coordinates(j);
                coords
                    .iter()
                    .zip(raw.iter().zip(res.iter()))
                    .all(|(c, (r, w))| (c - r).abs() <= w / 2.0 + 1e-9)
            });
            assert!(hit, "cell center {:?} has no nearby input row", coords);
        }
    }

    #[test]
    fn test_to_table_sorted_and_truncated() {
        let table = table_1d(&[(0.0, 1.0), (1.0, 5.0), (2.0, 3.0), (3.5, 5.0)]);
        let grid = Grid::from_table(&table, &[Mz], &Resolution::Explicit(vec![1.0])).unwrap();
        let all = grid.to_table(None).unwrap();
        assert_eq!(all.intensities(), &[5.0, 5.0, 3.0, 1.0]);
        // Equal intensities keep enumeration order
        let col = all.column(Mz).unwrap();
        assert!(col[0] < col[1]);

        let top = grid.to_table(Some(2)).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top.intensities(), &[5.0, 5.0]);
    }

    #[test]
    fn test_unsupported_dimensionality() {
        let grid = Grid {
            dims: vec![Mz, Mz, Mz, Mz],
            edges: vec![vec![0.0, 1.0]; 4],
            intensity: ArrayD::zeros(IxDyn(&[1, 1, 1, 1])),
        };
        assert!(matches!(
            grid.to_table(None),
            Err(GridError::UnsupportedDimensionality(4))
        ));
    }

    #[test]
    fn test_empty_table_rejected() {
        let table = PointTable::new(vec![Mz]);
        assert!(matches!(
            Grid::from_table(&table, &[Mz], &Resolution::Auto),
            Err(GridError::EmptyTable)
        ));
    }
}
