//! `imsignal` is a library for detecting features in multidimensional ion
//! mobility-mass spectrometry data and calibrating drift times against
//! collision cross section.
//!
//! Raw measurements live in a [`PointTable`], a sparse coordinate list over
//! named [`Dimension`]s. [`Grid::from_table`] bins a table onto a dense
//! intensity grid, the [`crate::filters`] sub-module provides the N-dimensional
//! kernel filters feature detection is built from, and [`PeakPicker`] runs the
//! full matched filter, non-maximum suppression and reconciliation pipeline.
//! [`TuneMix`] fits an [`ArrivalTimeCalibration`] from acquisitions of a
//! standard calibrant mixture.
//!
//! # Usage
//! ```
//! use imsignal::{Dimension, PeakPicker, PointTable, Resolution};
//!
//! let mut table = PointTable::new(vec![Dimension::Mz, Dimension::DriftTime]);
//! for j in -5i32..=5 {
//!     for k in -5i32..=5 {
//!         let mz = 412.0 + j as f64 * 0.01;
//!         let dt = 18.0 + k as f64 * 0.1;
//!         let z = (j * j) as f64 / 8.0 + (k * k) as f64 / 8.0;
//!         table.push(&[mz, dt], (5e3 * (-0.5 * z).exp()) as f32).unwrap();
//!     }
//! }
//!
//! let picker = PeakPicker::default();
//! let picked = picker
//!     .pick(
//!         &table,
//!         &[Dimension::Mz, Dimension::DriftTime],
//!         &Resolution::Explicit(vec![0.01, 0.1]),
//!         &[0.02, 0.2],
//!     )
//!     .unwrap();
//! assert_eq!(picked.features.len(), 1);
//! ```
pub mod calibrate;
pub mod filters;
pub mod grid;
pub mod peak_picker;
pub mod table;

#[cfg(test)]
mod test_data;

pub use crate::calibrate::{
    tunemix, ArrivalTimeCalibration, CalibrationError, RegressionDiagnostics, TuneMix,
    DEFAULT_BUFFER_GAS_MASS,
};
pub use crate::grid::{Grid, GridError, Resolution};
pub use crate::peak_picker::{
    non_maximum_suppression, PeakPicker, PeakPickerBuilder, PeakPickerError, PickedPeaks,
};
pub use crate::table::{Aggregate, Dimension, PointTable, TableError};
