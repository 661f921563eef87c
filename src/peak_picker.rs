//! Matched-filter peak detection over gridded point data.
//!
//! [`PeakPicker`] bins a sparse [`PointTable`] onto a dense grid, applies a
//! matched Gaussian filter, isolates local maxima by non-maximum
//! suppression, and reconciles each surviving grid cell against the raw
//! data to recover sub-grid-resolution feature coordinates.
use log::{debug, warn};
use ndarray::{ArrayD, Zip};
use num_traits::Float;
use thiserror::Error;

use crate::filters::{self, FilterError};
use crate::grid::{Grid, GridError, Resolution};
use crate::table::{Aggregate, Dimension, PointTable, TableError};

/// All the ways peak picking can fail
#[derive(Debug, Clone, Error)]
pub enum PeakPickerError {
    #[error("Received {actual} per-dimension parameters for {expected} dimensions")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Zero every cell that is not equal to its windowed maximum, isolating
/// discrete local maxima.
///
/// Ties are not broken: adjacent equal-valued maxima inside one window all
/// survive.
pub fn non_maximum_suppression<F: Float>(
    a: &ArrayD<F>,
    size: &[usize],
) -> Result<ArrayD<F>, FilterError> {
    let local_max = filters::maximum(a, size)?;
    Ok(Zip::from(a)
        .and(&local_max)
        .map_collect(|v, m| if *v == *m { *v } else { F::zero() }))
}

/// The matched filter used for peak detection, a squared Gaussian smoothing
/// with per-dimension sigma in cell units
pub fn matched_filter<F: Float>(a: &ArrayD<F>, size: &[usize]) -> Result<ArrayD<F>, FilterError> {
    filters::matched_gaussian(a, size)
}

/// Features recovered by a picking pass, along with whether the
/// reconciliation miss budget abandoned any trailing candidates
#[derive(Debug, Clone)]
pub struct PickedPeaks {
    pub features: PointTable,
    /// True when the consecutive-miss budget stopped reconciliation before
    /// every candidate was examined
    pub truncated: bool,
}

/// A peak picker for gridded ion-mobility/mass-spectrometry point data.
///
/// Stateless across calls; each pick is an independent pure pipeline over
/// its inputs.
#[derive(Debug, Clone)]
pub struct PeakPicker {
    /// Tolerance-window multiplier applied to sigma for both the
    /// suppression footprint and the reconciliation search box
    pub truncate: usize,
    /// Strict lower bound on candidate and feature intensity
    pub intensity_threshold: f32,
    /// Consecutive reconciliation misses tolerated before the remaining
    /// candidates are abandoned. The heuristic assumes candidates arrive
    /// roughly intensity-sorted, which [`PeakPicker::pick`] guarantees.
    pub max_consecutive_misses: usize,
}

impl Default for PeakPicker {
    fn default() -> Self {
        Self {
            truncate: 4,
            intensity_threshold: 1e3,
            max_consecutive_misses: 100,
        }
    }
}

/// A builder for configuring [`PeakPicker`]
#[derive(Debug, Clone, Default)]
pub struct PeakPickerBuilder {
    picker: PeakPicker,
}

impl PeakPickerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn truncate(&mut self, truncate: usize) -> &mut Self {
        self.picker.truncate = truncate;
        self
    }

    pub fn intensity_threshold(&mut self, intensity_threshold: f32) -> &mut Self {
        self.picker.intensity_threshold = intensity_threshold;
        self
    }

    pub fn max_consecutive_misses(&mut self, max_consecutive_misses: usize) -> &mut Self {
        self.picker.max_consecutive_misses = max_consecutive_misses;
        self
    }

    pub fn build(&self) -> PeakPicker {
        self.picker.clone()
    }
}

impl From<PeakPickerBuilder> for PeakPicker {
    fn from(value: PeakPickerBuilder) -> Self {
        value.build()
    }
}

fn force_odd(x: usize) -> usize {
    if x % 2 == 0 {
        x + 1
    } else {
        x
    }
}

impl PeakPicker {
    pub fn new(truncate: usize, intensity_threshold: f32, max_consecutive_misses: usize) -> Self {
        Self {
            truncate,
            intensity_threshold,
            max_consecutive_misses,
        }
    }

    fn check_lengths(&self, expected: usize, actual: usize) -> Result<(), PeakPickerError> {
        if expected == actual {
            Ok(())
        } else {
            Err(PeakPickerError::DimensionMismatch { expected, actual })
        }
    }

    /// Detect features in `table` over `dims`.
    ///
    /// `sigma` is the expected physical peak width per dimension; together
    /// with the grid resolution it sets the matched-filter kernel
    /// (`sigma / resolution` cells, forced odd) and the suppression
    /// footprint (`truncate` times that, forced odd). Candidates above the
    /// intensity threshold are reconciled against the raw table in
    /// descending-intensity order, and features mapping to the identical
    /// coordinate tuple are collapsed keeping the maximum intensity.
    pub fn pick(
        &self,
        table: &PointTable,
        dims: &[Dimension],
        resolution: &Resolution,
        sigma: &[f64],
    ) -> Result<PickedPeaks, PeakPickerError> {
        self.check_lengths(dims.len(), sigma.len())?;
        let res = resolution.resolve(table, dims)?;
        let grid = Grid::from_table(table, dims, &Resolution::Explicit(res.clone()))?;

        // Physical sigma in grid cells
        let points: Vec<usize> = sigma
            .iter()
            .zip(res.iter())
            .map(|(s, r)| (s / r) as usize)
            .collect();
        let kernel: Vec<usize> = points.iter().map(|p| force_odd(*p)).collect();
        let footprint: Vec<usize> = points.iter().map(|p| force_odd(self.truncate * p)).collect();

        let corr = matched_filter(&grid.intensity, &kernel)?;
        let suppressed = non_maximum_suppression(&corr, &footprint)?;

        let candidates = grid
            .with_intensity(suppressed)
            .to_table(None)?
            .threshold(self.intensity_threshold);
        debug!(
            "Matched filter over shape {:?} left {} candidates",
            grid.shape(),
            candidates.len()
        );

        let picked = self.reconcile(&candidates, table, dims, sigma)?;
        let features = picked.features.collapse(dims, Aggregate::Max)?;
        Ok(PickedPeaks {
            features,
            truncated: picked.truncated,
        })
    }

    /// Map grid-resolution candidates back onto the raw data.
    ///
    /// Candidates are processed in input order. For each, the
    /// maximum-intensity raw point within `sigma * truncate` per dimension
    /// is emitted as a feature when it clears the intensity threshold.
    /// After more than [`PeakPicker::max_consecutive_misses`] consecutive
    /// failures the remaining candidates are dropped and the result is
    /// flagged truncated.
    pub fn reconcile(
        &self,
        candidates: &PointTable,
        table: &PointTable,
        dims: &[Dimension],
        sigma: &[f64],
    ) -> Result<PickedPeaks, PeakPickerError> {
        self.check_lengths(dims.len(), sigma.len())?;
        let tol: Vec<f64> = sigma.iter().map(|s| s * self.truncate as f64).collect();

        let mut cand_cols = Vec::with_capacity(dims.len());
        for dim in dims {
            cand_cols.push(
                candidates
                    .column(*dim)
                    .ok_or(TableError::MissingDimension(*dim))?,
            );
        }

        let strong = table.threshold(self.intensity_threshold);

        let mut features = PointTable::new(dims.to_vec());
        let mut misses = 0usize;
        let mut truncated = false;
        for i in 0..candidates.len() {
            let loc: Vec<f64> = cand_cols.iter().map(|col| col[i]).collect();
            match strong.max_in_box(dims, &loc, &tol)? {
                Some((coords, intensity)) if intensity > self.intensity_threshold => {
                    features.push(&coords, intensity)?;
                    misses = 0;
                }
                _ => misses += 1,
            }
            if misses > self.max_consecutive_misses {
                truncated = true;
                warn!(
                    "Abandoning {} candidates after {} consecutive low-intensity misses",
                    candidates.len() - i - 1,
                    misses
                );
                break;
            }
        }
        Ok(PickedPeaks {
            features,
            truncated,
        })
    }

    /// Detect features in the neighborhood of `loc` only.
    ///
    /// The table is first restricted to the `sigma * truncate` box around
    /// `loc`; `None` means no data fell in the box or no feature cleared
    /// detection there, not an error.
    pub fn pick_guided(
        &self,
        table: &PointTable,
        dims: &[Dimension],
        resolution: &Resolution,
        loc: &[f64],
        sigma: &[f64],
    ) -> Result<Option<PickedPeaks>, PeakPickerError> {
        self.check_lengths(dims.len(), sigma.len())?;
        self.check_lengths(dims.len(), loc.len())?;
        let tol: Vec<f64> = sigma.iter().map(|s| s * self.truncate as f64).collect();
        let subset = table.locate_box(dims, loc, &tol)?;
        if subset.is_empty() {
            return Ok(None);
        }
        let picked = self.pick(&subset, dims, resolution, sigma)?;
        if picked.features.is_empty() {
            Ok(None)
        } else {
            Ok(Some(picked))
        }
    }
}
