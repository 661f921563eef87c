//! Synthetic datasets shared across test modules
use crate::table::{Dimension, PointTable};

/// A sparse two-dimensional (m/z, drift time) point cloud with a Gaussian
/// intensity blob around each `(mz, dt, apex)` center.
///
/// Points sit on a 0.01 m/z by 0.1 drift-time lattice spanning five
/// standard deviations (sigma 0.02 m/z, 0.2 drift time), with the apex
/// point landing exactly on the center so detected features can be checked
/// against it.
pub fn gaussian_blobs(centers: &[(f64, f64, f32)]) -> PointTable {
    const SIGMA_MZ: f64 = 0.02;
    const SIGMA_DT: f64 = 0.2;
    const STEP_MZ: f64 = 0.01;
    const STEP_DT: f64 = 0.1;

    let mut table = PointTable::new(vec![Dimension::Mz, Dimension::DriftTime]);
    for (mz0, dt0, apex) in centers {
        for i in -10i32..=10 {
            for j in -10i32..=10 {
                let mz = mz0 + i as f64 * STEP_MZ;
                let dt = dt0 + j as f64 * STEP_DT;
                let zm = (mz - mz0) / SIGMA_MZ;
                let zd = (dt - dt0) / SIGMA_DT;
                let intensity = *apex as f64 * (-0.5 * (zm * zm + zd * zd)).exp();
                table.push(&[mz, dt], intensity as f32).unwrap();
            }
        }
    }
    table
}

/// Drift-time profile of a single tune ion at fixed m/z, peaking at
/// `apex_dt` with a Gaussian shape of sigma 0.5 drift-time units
pub fn tune_ion_profile(mz: f64, apex_dt: f64) -> PointTable {
    let mut table = PointTable::new(vec![Dimension::Mz, Dimension::DriftTime]);
    for j in -10i32..=10 {
        let dt = apex_dt + j as f64 * 0.2;
        let z = (dt - apex_dt) / 0.5;
        let intensity = 1e4 * (-0.5 * z * z).exp();
        table.push(&[mz, dt], intensity as f32).unwrap();
    }
    table
}
