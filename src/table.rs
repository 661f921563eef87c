//! Tabular point-cloud data shared by every stage of the pipeline.
//!
//! A [`PointTable`] is an ordered collection of rows, each pairing a
//! coordinate vector over a named set of [`Dimension`]s with a non-negative
//! intensity. Tables are columnar internally and are never mutated in place,
//! every transform produces a new table.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The coordinate axes an acquisition can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Dimension {
    /// Mass-to-charge ratio
    Mz,
    /// Ion mobility drift/arrival time
    DriftTime,
    /// Chromatographic retention time
    RetentionTime,
}

impl Dimension {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Dimension::Mz => "mz",
            Dimension::DriftTime => "drift_time",
            Dimension::RetentionTime => "retention_time",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mz" => Ok(Self::Mz),
            "drift_time" => Ok(Self::DriftTime),
            "retention_time" => Ok(Self::RetentionTime),
            _ => Err(TableError::UnknownDimension(s.to_string())),
        }
    }
}

/// All the ways table manipulation can fail
#[derive(Debug, Clone, Error)]
pub enum TableError {
    #[error("Unknown dimension name {0:?}")]
    UnknownDimension(String),
    #[error("The table does not carry a {0} column")]
    MissingDimension(Dimension),
    #[error("Expected {expected} values per column, received {actual}")]
    ColumnLengthMismatch { expected: usize, actual: usize },
    #[error("Received {actual} values for {expected} dimensions")]
    DimensionCountMismatch { expected: usize, actual: usize },
}

/// How [`PointTable::collapse`] combines the intensities of rows that share
/// a coordinate tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Max,
}

/// An ordered collection of (coordinates, intensity) rows over a fixed set
/// of dimensions, stored column-wise.
///
/// Coordinates are `f64`, intensities `f32`, matching the precision split
/// used for m/z and intensity arrays elsewhere in the ecosystem.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointTable {
    dims: Vec<Dimension>,
    columns: Vec<Vec<f64>>,
    intensity: Vec<f32>,
}

impl PointTable {
    /// Create an empty table over `dims`
    pub fn new(dims: Vec<Dimension>) -> Self {
        let columns = dims.iter().map(|_| Vec::new()).collect();
        Self {
            dims,
            columns,
            intensity: Vec::new(),
        }
    }

    /// Assemble a table from pre-built columns.
    ///
    /// The number of columns must match the number of dimensions, and every
    /// column must match the intensity array in length.
    pub fn from_columns(
        dims: Vec<Dimension>,
        columns: Vec<Vec<f64>>,
        intensity: Vec<f32>,
    ) -> Result<Self, TableError> {
        if columns.len() != dims.len() {
            return Err(TableError::DimensionCountMismatch {
                expected: dims.len(),
                actual: columns.len(),
            });
        }
        for col in columns.iter() {
            if col.len() != intensity.len() {
                return Err(TableError::ColumnLengthMismatch {
                    expected: intensity.len(),
                    actual: col.len(),
                });
            }
        }
        Ok(Self {
            dims,
            columns,
            intensity,
        })
    }

    pub fn len(&self) -> usize {
        self.intensity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensity.is_empty()
    }

    /// The dimensions of this table, in column order
    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn dim_index(&self, dim: Dimension) -> Option<usize> {
        self.dims.iter().position(|d| *d == dim)
    }

    /// The coordinate column for `dim`, if this table carries it
    pub fn column(&self, dim: Dimension) -> Option<&[f64]> {
        self.dim_index(dim).map(|i| self.columns[i].as_slice())
    }

    pub fn intensities(&self) -> &[f32] {
        &self.intensity
    }

    /// The coordinate tuple of row `i`
    pub fn coordinates(&self, i: usize) -> Vec<f64> {
        self.columns.iter().map(|col| col[i]).collect()
    }

    /// Append a row. The coordinate count must match the dimension count.
    pub fn push(&mut self, coords: &[f64], intensity: f32) -> Result<(), TableError> {
        if coords.len() != self.dims.len() {
            return Err(TableError::DimensionCountMismatch {
                expected: self.dims.len(),
                actual: coords.len(),
            });
        }
        for (col, x) in self.columns.iter_mut().zip(coords) {
            col.push(*x);
        }
        self.intensity.push(intensity);
        Ok(())
    }

    /// Total intensity over all rows, accumulated at `f64`
    pub fn total_intensity(&self) -> f64 {
        self.intensity.iter().map(|i| *i as f64).sum()
    }

    fn take_rows(&self, indices: &[usize]) -> PointTable {
        let columns = self
            .columns
            .iter()
            .map(|col| indices.iter().map(|i| col[*i]).collect())
            .collect();
        let intensity = indices.iter().map(|i| self.intensity[*i]).collect();
        PointTable {
            dims: self.dims.clone(),
            columns,
            intensity,
        }
    }

    fn require(&self, dim: Dimension) -> Result<usize, TableError> {
        self.dim_index(dim)
            .ok_or(TableError::MissingDimension(dim))
    }

    /// Rows whose `dim` coordinate lies in `[low, high]`, both ends inclusive
    pub fn slice_where(
        &self,
        dim: Dimension,
        low: f64,
        high: f64,
    ) -> Result<PointTable, TableError> {
        let d = self.require(dim)?;
        let col = &self.columns[d];
        let indices: Vec<usize> = (0..self.len())
            .filter(|i| col[*i] >= low && col[*i] <= high)
            .collect();
        Ok(self.take_rows(&indices))
    }

    /// Rows whose `dim` coordinate lies within `tol` of `loc`
    pub fn locate(&self, dim: Dimension, loc: f64, tol: f64) -> Result<PointTable, TableError> {
        self.slice_where(dim, loc - tol, loc + tol)
    }

    /// Rows inside the tolerance box centered on `loc`
    pub fn locate_box(
        &self,
        dims: &[Dimension],
        loc: &[f64],
        tol: &[f64],
    ) -> Result<PointTable, TableError> {
        let (_, indices) = self.box_indices(dims, loc, tol)?;
        Ok(self.take_rows(&indices))
    }

    /// The maximum-intensity row inside the tolerance box centered on `loc`,
    /// or `None` when the box is empty. Ties keep the first row encountered.
    pub fn max_in_box(
        &self,
        dims: &[Dimension],
        loc: &[f64],
        tol: &[f64],
    ) -> Result<Option<(Vec<f64>, f32)>, TableError> {
        let (dim_cols, indices) = self.box_indices(dims, loc, tol)?;
        let mut best: Option<(usize, f32)> = None;
        for i in indices {
            let intensity = self.intensity[i];
            match best {
                Some((_, current)) if intensity <= current => {}
                _ => best = Some((i, intensity)),
            }
        }
        Ok(best.map(|(i, intensity)| {
            let coords = dim_cols.iter().map(|d| self.columns[*d][i]).collect();
            (coords, intensity)
        }))
    }

    fn box_indices(
        &self,
        dims: &[Dimension],
        loc: &[f64],
        tol: &[f64],
    ) -> Result<(Vec<usize>, Vec<usize>), TableError> {
        if dims.len() != loc.len() || dims.len() != tol.len() {
            return Err(TableError::DimensionCountMismatch {
                expected: dims.len(),
                actual: loc.len().min(tol.len()),
            });
        }
        let mut cols = Vec::with_capacity(dims.len());
        for dim in dims {
            cols.push(self.require(*dim)?);
        }
        let indices = (0..self.len())
            .filter(|i| {
                cols.iter()
                    .zip(loc.iter().zip(tol))
                    .all(|(d, (c, t))| (self.columns[*d][*i] - c).abs() <= *t)
            })
            .collect();
        Ok((cols, indices))
    }

    /// Group rows by identical coordinate tuple over the kept dimensions and
    /// aggregate intensity per group.
    ///
    /// The output is ordered ascending by coordinate tuple.
    pub fn collapse(&self, keep: &[Dimension], how: Aggregate) -> Result<PointTable, TableError> {
        let mut cols = Vec::with_capacity(keep.len());
        for dim in keep {
            cols.push(self.require(*dim)?);
        }
        // Non-negative coordinates order the same by bit pattern as by value
        let mut groups: BTreeMap<Vec<u64>, f32> = BTreeMap::new();
        for i in 0..self.len() {
            let key: Vec<u64> = cols.iter().map(|d| self.columns[*d][i].to_bits()).collect();
            let intensity = self.intensity[i];
            groups
                .entry(key)
                .and_modify(|acc| {
                    *acc = match how {
                        Aggregate::Sum => *acc + intensity,
                        Aggregate::Max => acc.max(intensity),
                    }
                })
                .or_insert(intensity);
        }
        let mut out = PointTable::new(keep.to_vec());
        for (key, intensity) in groups {
            let coords: Vec<f64> = key.into_iter().map(f64::from_bits).collect();
            out.push(&coords, intensity)?;
        }
        Ok(out)
    }

    /// Rows with intensity strictly greater than `min_intensity`
    pub fn threshold(&self, min_intensity: f32) -> PointTable {
        let indices: Vec<usize> = (0..self.len())
            .filter(|i| self.intensity[*i] > min_intensity)
            .collect();
        self.take_rows(&indices)
    }

    /// A copy sorted descending by intensity. The sort is stable, rows of
    /// equal intensity keep their input order.
    pub fn sorted_by_intensity_desc(&self) -> PointTable {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.sort_by(|a, b| {
            self.intensity[*b]
                .partial_cmp(&self.intensity[*a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.take_rows(&indices)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn toy_table() -> PointTable {
        let mut table = PointTable::new(vec![Dimension::Mz, Dimension::DriftTime]);
        table.push(&[100.0, 10.0], 5.0).unwrap();
        table.push(&[100.5, 12.0], 50.0).unwrap();
        table.push(&[101.0, 14.0], 2.0).unwrap();
        table.push(&[100.5, 12.0], 10.0).unwrap();
        table
    }

    #[test]
    fn test_dimension_names_round_trip() {
        for dim in [Dimension::Mz, Dimension::DriftTime, Dimension::RetentionTime] {
            assert_eq!(dim.as_str().parse::<Dimension>().unwrap(), dim);
        }
        assert!(matches!(
            "scan".parse::<Dimension>(),
            Err(TableError::UnknownDimension(_))
        ));
    }

    #[test]
    fn test_slice_and_locate() {
        let table = toy_table();
        let sub = table.slice_where(Dimension::Mz, 100.4, 100.6).unwrap();
        assert_eq!(sub.len(), 2);
        assert!(sub.intensities().iter().all(|i| *i == 50.0 || *i == 10.0));

        let sub = table.locate(Dimension::DriftTime, 13.0, 1.0).unwrap();
        assert_eq!(sub.len(), 3);

        assert!(matches!(
            table.slice_where(Dimension::RetentionTime, 0.0, 1.0),
            Err(TableError::MissingDimension(Dimension::RetentionTime))
        ));
    }

    #[test]
    fn test_max_in_box() {
        let table = toy_table();
        let dims = [Dimension::Mz, Dimension::DriftTime];
        let hit = table
            .max_in_box(&dims, &[100.5, 12.0], &[0.25, 1.0])
            .unwrap()
            .expect("box should not be empty");
        assert_eq!(hit.0, vec![100.5, 12.0]);
        assert_eq!(hit.1, 50.0);

        let miss = table
            .max_in_box(&dims, &[400.0, 80.0], &[0.25, 1.0])
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn test_collapse_sum_and_max() {
        let table = toy_table();
        let summed = table.collapse(&[Dimension::Mz], Aggregate::Sum).unwrap();
        assert_eq!(summed.len(), 3);
        assert_eq!(summed.column(Dimension::Mz).unwrap(), &[100.0, 100.5, 101.0]);
        assert_eq!(summed.intensities(), &[5.0, 60.0, 2.0]);

        let kept = table
            .collapse(&[Dimension::Mz, Dimension::DriftTime], Aggregate::Max)
            .unwrap();
        assert_eq!(kept.len(), 3);
        assert_eq!(kept.intensities()[1], 50.0);
    }

    #[test]
    fn test_threshold_and_sort() {
        let table = toy_table();
        let kept = table.threshold(5.0);
        assert_eq!(kept.len(), 2);

        let sorted = table.sorted_by_intensity_desc();
        assert_eq!(sorted.intensities(), &[50.0, 10.0, 5.0, 2.0]);
        assert_eq!(sorted.total_intensity(), table.total_intensity());
    }

    #[test]
    fn test_from_columns_validates_lengths() {
        let err = PointTable::from_columns(
            vec![Dimension::Mz],
            vec![vec![1.0, 2.0]],
            vec![1.0, 2.0, 3.0],
        );
        assert!(matches!(
            err,
            Err(TableError::ColumnLengthMismatch { .. })
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_round_trip() {
        let table = toy_table();
        let payload = serde_json::to_string(&table).unwrap();
        let dup: PointTable = serde_json::from_str(&payload).unwrap();
        assert_eq!(dup, table);
    }
}
