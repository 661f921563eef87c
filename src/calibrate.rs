//! Arrival-time to collision-cross-section (CCS) calibration.
//!
//! [`ArrivalTimeCalibration`] holds the single-parameter power-law-linearized
//! regression between an ion's arrival time and its CCS, and [`TuneMix`]
//! automates fitting it from acquisitions of a standard calibrant mixture
//! with known m/z, CCS and charge.
use log::debug;
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::table::{Aggregate, Dimension, PointTable, TableError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mass of molecular nitrogen, the usual ion-mobility buffer gas
pub const DEFAULT_BUFFER_GAS_MASS: f64 = 28.013;

/// All the ways calibration can fail
#[derive(Debug, Clone, Error)]
pub enum CalibrationError {
    #[error("Expected {expected} calibrant values, received {actual}")]
    CalibrantLengthMismatch { expected: usize, actual: usize },
    #[error("At least one calibrant is required")]
    NoCalibrants,
    #[error("No signal in the isolation window around m/z {0}")]
    EmptyIsolationWindow(f64),
    #[error("Failed to solve the calibration regression: {0}")]
    RegressionFailed(&'static str),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Goodness-of-fit summary for a calibration regression
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegressionDiagnostics {
    /// Pearson correlation coefficient
    pub r_value: f64,
    /// Two-sided p-value against a zero-slope null hypothesis. NaN when
    /// there are too few degrees of freedom to test.
    pub p_value: f64,
    /// Standard error of the fitted slope
    pub std_err: f64,
}

/// Continued-fraction kernel of the regularized incomplete beta function
fn betacf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;
    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Regularized incomplete beta function `I_x(a, b)`
fn betainc(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = libm::lgamma(a + b) - libm::lgamma(a) - libm::lgamma(b)
        + a * x.ln()
        + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * betacf(a, b, x) / a
    } else {
        1.0 - front * betacf(b, a, 1.0 - x) / b
    }
}

/// Ordinary least-squares line through `(x, y)`, solved by SVD.
///
/// The minimum-norm solution also covers the degenerate single-point case,
/// where any exact line through the point satisfies the fit.
fn linear_fit(
    x: &[f64],
    y: &[f64],
) -> Result<(f64, f64, RegressionDiagnostics), CalibrationError> {
    let n = x.len();
    if n == 0 {
        return Err(CalibrationError::NoCalibrants);
    }
    let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { x[i] } else { 1.0 });
    let rhs = DVector::from_row_slice(y);
    let svd = nalgebra::linalg::SVD::new(design, true, true);
    let sol = svd
        .solve(&rhs, 1e-18)
        .map_err(CalibrationError::RegressionFailed)?;
    let slope = sol[0];
    let intercept = sol[1];

    let xm = x.iter().sum::<f64>() / n as f64;
    let ym = y.iter().sum::<f64>() / n as f64;
    let ssxm = x.iter().map(|v| (v - xm) * (v - xm)).sum::<f64>();
    let ssym = y.iter().map(|v| (v - ym) * (v - ym)).sum::<f64>();
    let ssxym = x
        .iter()
        .zip(y)
        .map(|(u, v)| (u - xm) * (v - ym))
        .sum::<f64>();

    let denom = (ssxm * ssym).sqrt();
    let r_value = if denom > 0.0 { ssxym / denom } else { 0.0 };

    let df = n as i64 - 2;
    let (p_value, std_err) = if df > 0 && ssxm > 0.0 {
        let df = df as f64;
        let one_minus_r2 = 1.0 - r_value * r_value;
        let p = if one_minus_r2 <= 0.0 {
            0.0
        } else {
            let t2 = r_value * r_value * df / one_minus_r2;
            betainc(df / 2.0, 0.5, df / (df + t2))
        };
        let se = (one_minus_r2.max(0.0) * ssym / ssxm / df).sqrt();
        (p, se)
    } else {
        (f64::NAN, f64::NAN)
    };

    Ok((
        slope,
        intercept,
        RegressionDiagnostics {
            r_value,
            p_value,
            std_err,
        },
    ))
}

/// A fitted arrival-time ↔ CCS calibration curve.
///
/// Construct with [`ArrivalTimeCalibration::fit`] from calibrant arrays, or
/// [`ArrivalTimeCalibration::from_params`] with known parameters; either way
/// the model is usable immediately, an un-calibrated instance cannot exist.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArrivalTimeCalibration {
    /// Slope of the calibration curve
    pub beta: f64,
    /// Intercept of the calibration curve
    pub tfix: f64,
    /// Mass of the buffer gas
    pub buffer_mass: f64,
    /// Regression diagnostics, present when fitted from calibrant arrays
    pub fit: Option<RegressionDiagnostics>,
}

impl ArrivalTimeCalibration {
    /// Fit the calibration curve from calibrant m/z, arrival time, CCS and
    /// nominal charge arrays.
    ///
    /// Regresses arrival time on the reduced mobility term
    /// `sqrt(mz / (mz + buffer_mass)) * ccs / q`.
    pub fn fit(
        mz: &[f64],
        ta: &[f64],
        ccs: &[f64],
        q: &[f64],
        buffer_mass: f64,
    ) -> Result<Self, CalibrationError> {
        for other in [ta.len(), ccs.len(), q.len()] {
            if other != mz.len() {
                return Err(CalibrationError::CalibrantLengthMismatch {
                    expected: mz.len(),
                    actual: other,
                });
            }
        }
        let x: Vec<f64> = mz
            .iter()
            .zip(ccs.iter().zip(q))
            .map(|(mz, (ccs, q))| (mz / (mz + buffer_mass)).sqrt() * ccs / q)
            .collect();
        let (beta, tfix, diagnostics) = linear_fit(&x, ta)?;
        debug!(
            "Calibrated beta={beta:0.6} tfix={tfix:0.6} (r={:0.4})",
            diagnostics.r_value
        );
        Ok(Self {
            beta,
            tfix,
            buffer_mass,
            fit: Some(diagnostics),
        })
    }

    /// Adopt known calibration parameters directly, bypassing regression
    pub fn from_params(beta: f64, tfix: f64, buffer_mass: f64) -> Self {
        Self {
            beta,
            tfix,
            buffer_mass,
            fit: None,
        }
    }

    fn mass_term(&self, mz: f64) -> f64 {
        (mz / (mz + self.buffer_mass)).sqrt()
    }

    /// Collision cross section (Å²) from arrival time, m/z and nominal
    /// charge
    pub fn arrival_to_ccs(&self, mz: f64, ta: f64, q: f64) -> f64 {
        q / self.beta * (ta - self.tfix) / self.mass_term(mz)
    }

    /// Arrival time (ms) from collision cross section, m/z and nominal
    /// charge; the exact algebraic inverse of
    /// [`ArrivalTimeCalibration::arrival_to_ccs`]
    pub fn ccs_to_arrival(&self, mz: f64, ccs: f64, q: f64) -> f64 {
        self.beta / q * self.mass_term(mz) * ccs + self.tfix
    }
}

/// Interpolating quadratic spline with a three-point end condition, which
/// reproduces globally quadratic data exactly
struct QuadraticSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
}

impl QuadraticSpline {
    /// `x` must be strictly increasing with at least three knots
    fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        let n = x.len();
        // Derivative of the parabola through the first three knots,
        // evaluated at the first
        let d0 = y[0] * (2.0 * x[0] - x[1] - x[2]) / ((x[0] - x[1]) * (x[0] - x[2]))
            + y[1] * (x[0] - x[2]) / ((x[1] - x[0]) * (x[1] - x[2]))
            + y[2] * (x[0] - x[1]) / ((x[2] - x[0]) * (x[2] - x[1]));

        let mut b = vec![0.0; n];
        let mut c = vec![0.0; n - 1];
        b[0] = d0;
        for i in 0..n - 1 {
            let h = x[i + 1] - x[i];
            let s = (y[i + 1] - y[i]) / h;
            c[i] = (s - b[i]) / h;
            b[i + 1] = 2.0 * s - b[i];
        }
        Self { x, y, b, c }
    }

    fn eval(&self, t: f64) -> f64 {
        let n = self.x.len();
        let i = self
            .x
            .partition_point(|knot| *knot <= t)
            .saturating_sub(1)
            .min(n - 2);
        let dx = t - self.x[i];
        self.y[i] + self.b[i] * dx + self.c[i] * dx * dx
    }

    /// The abscissa of the spline maximum, scanned at `step` resolution
    /// over `[x0, xn)`
    fn argmax(&self, step: f64) -> f64 {
        let x0 = self.x[0];
        let xn = self.x[self.x.len() - 1];
        let mut best_t = x0;
        let mut best_v = f64::NEG_INFINITY;
        let mut k = 0usize;
        loop {
            let t = x0 + k as f64 * step;
            if t >= xn {
                break;
            }
            let v = self.eval(t);
            if v > best_v {
                best_v = v;
                best_t = t;
            }
            k += 1;
        }
        best_t
    }
}

/// Known tune-mix calibrant ions and isolation tolerances for automated
/// CCS calibration.
///
/// The default is the Agilent tune mix in nitrogen buffer gas.
#[derive(Debug, Clone)]
pub struct TuneMix {
    /// Calibrant mass-to-charge ratios
    pub mz: Vec<f64>,
    /// Calibrant collision cross sections
    pub ccs: Vec<f64>,
    /// Calibrant nominal charges
    pub q: Vec<f64>,
    pub buffer_mass: f64,
    /// Fractional m/z tolerance isolating each tune ion. The window is
    /// deliberately asymmetric, `[mz - 0.1*tol, mz + 0.9*tol*mz]`, leaning
    /// away from low-side interference.
    pub mz_tol: f64,
    /// Fractional drift-time window around the apex used for the spline
    /// refinement
    pub dt_tol: f64,
}

impl Default for TuneMix {
    fn default() -> Self {
        Self {
            mz: vec![
                112.985587, 301.998139, 601.978977, 1033.988109, 1333.968947, 1633.949786,
            ],
            ccs: vec![108.4, 139.8, 179.9, 254.2, 283.6, 317.7],
            q: vec![1.0; 6],
            buffer_mass: DEFAULT_BUFFER_GAS_MASS,
            mz_tol: 200e-6,
            dt_tol: 0.04,
        }
    }
}

impl TuneMix {
    /// Determine each calibrant ion's arrival time from `table` and fit the
    /// CCS calibration curve.
    ///
    /// Per calibrant: isolate the asymmetric m/z window, collapse the
    /// remaining signal onto drift time, refine the apex with a quadratic
    /// spline sampled at 0.001 drift-time units over a `± dt_tol`
    /// fractional window, then regress over all calibrants in bulk.
    pub fn calibrate(&self, table: &PointTable) -> Result<ArrivalTimeCalibration, CalibrationError> {
        for other in [self.ccs.len(), self.q.len()] {
            if other != self.mz.len() {
                return Err(CalibrationError::CalibrantLengthMismatch {
                    expected: self.mz.len(),
                    actual: other,
                });
            }
        }
        if self.mz.is_empty() {
            return Err(CalibrationError::NoCalibrants);
        }

        let mut ta = Vec::with_capacity(self.mz.len());
        for mz_i in self.mz.iter() {
            let low = mz_i - 0.1 * self.mz_tol;
            let high = mz_i + 0.9 * self.mz_tol * mz_i;
            let subset = table.slice_where(Dimension::Mz, low, high)?;
            if subset.is_empty() {
                return Err(CalibrationError::EmptyIsolationWindow(*mz_i));
            }

            let profile = subset.collapse(&[Dimension::DriftTime], Aggregate::Sum)?;
            let dts = profile
                .column(Dimension::DriftTime)
                .ok_or(TableError::MissingDimension(Dimension::DriftTime))?;
            let apex_idx = profile
                .intensities()
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
                .unwrap_or(0);
            let dt_apex = dts[apex_idx];

            let narrowed = profile.locate(Dimension::DriftTime, dt_apex, self.dt_tol * dt_apex)?;
            let xs = narrowed
                .column(Dimension::DriftTime)
                .ok_or(TableError::MissingDimension(Dimension::DriftTime))?
                .to_vec();
            let ys: Vec<f64> = narrowed.intensities().iter().map(|v| *v as f64).collect();
            let dt_obs = if xs.len() >= 3 {
                QuadraticSpline::new(xs, ys).argmax(1e-3)
            } else {
                dt_apex
            };
            debug!("Calibrant m/z {mz_i}: arrival time {dt_obs:0.4}");
            ta.push(dt_obs);
        }

        ArrivalTimeCalibration::fit(&self.mz, &ta, &self.ccs, &self.q, self.buffer_mass)
    }
}

/// Fit a CCS calibration from tune-mix data in `table` using the calibrant
/// definitions in `config`
pub fn tunemix(
    table: &PointTable,
    config: &TuneMix,
) -> Result<ArrivalTimeCalibration, CalibrationError> {
    config.calibrate(table)
}
