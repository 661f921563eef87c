//! Stateless N-dimensional sliding-window operators over dense grids.
//!
//! Every operator takes a dense intensity array and a per-dimension window
//! size, returning a new array of the same shape. Values outside the grid
//! are treated as zero intensity (constant padding), which biases filter
//! response near the edges; callers relying on edge cells should size their
//! grids accordingly.
//!
//! A single-element size slice broadcasts to every dimension. Even window
//! sizes place the extra cell on the left, `[i - size/2, i - size/2 + size - 1]`.
use ndarray::{ArrayD, Axis, IxDyn, Zip};
use num_traits::Float;
use thiserror::Error;

/// All the ways filtering can fail
#[derive(Debug, Clone, Error)]
pub enum FilterError {
    #[error("Received {actual} window sizes for a {expected}-dimensional grid")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Window size must be at least one cell")]
    EmptyWindow,
    #[error("Expected {expected} center coordinates along axis {axis}, received {actual}")]
    AxisLengthMismatch {
        axis: usize,
        expected: usize,
        actual: usize,
    },
}

/// Broadcast or validate a per-dimension window size against `ndim`
fn normalize_size(size: &[usize], ndim: usize) -> Result<Vec<usize>, FilterError> {
    let size = if size.len() == 1 {
        vec![size[0]; ndim]
    } else if size.len() == ndim {
        size.to_vec()
    } else {
        return Err(FilterError::DimensionMismatch {
            expected: ndim,
            actual: size.len(),
        });
    };
    if size.iter().any(|s| *s == 0) {
        return Err(FilterError::EmptyWindow);
    }
    Ok(size)
}

/// Sliding windowed mean along one axis with constant-zero padding,
/// implemented with a running sum per lane
fn uniform_filter1d<F: Float>(a: &ArrayD<F>, size: usize, axis: usize) -> ArrayD<F> {
    let mut out = ArrayD::zeros(a.raw_dim());
    let denom = F::from(size).unwrap();
    let lo_off = (size / 2) as isize;
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(a.lanes(Axis(axis)))
        .for_each(|mut o, l| {
            let n = l.len() as isize;
            let mut acc = F::zero();
            for j in 0..size as isize {
                let k = j - lo_off;
                if k >= 0 && k < n {
                    acc = acc + l[k as usize];
                }
            }
            for i in 0..n {
                o[i as usize] = acc / denom;
                let rm = i - lo_off;
                let add = rm + size as isize;
                if rm >= 0 && rm < n {
                    acc = acc - l[rm as usize];
                }
                if add >= 0 && add < n {
                    acc = acc + l[add as usize];
                }
            }
        });
    out
}

/// Sliding windowed maximum along one axis; out-of-bounds cells contribute
/// the pad value zero
fn maximum_filter1d<F: Float>(a: &ArrayD<F>, size: usize, axis: usize) -> ArrayD<F> {
    let mut out = ArrayD::zeros(a.raw_dim());
    let lo_off = (size / 2) as isize;
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(a.lanes(Axis(axis)))
        .for_each(|mut o, l| {
            let n = l.len() as isize;
            for i in 0..n {
                let lo = i - lo_off;
                let mut m = F::neg_infinity();
                for j in 0..size as isize {
                    let k = lo + j;
                    let v = if k >= 0 && k < n {
                        l[k as usize]
                    } else {
                        F::zero()
                    };
                    if v > m {
                        m = v;
                    }
                }
                o[i as usize] = m;
            }
        });
    out
}

/// Correlation with an odd-length kernel centered on each cell,
/// zero padded
fn correlate1d<F: Float>(a: &ArrayD<F>, weights: &[F], axis: usize) -> ArrayD<F> {
    let mut out = ArrayD::zeros(a.raw_dim());
    let r = (weights.len() / 2) as isize;
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(a.lanes(Axis(axis)))
        .for_each(|mut o, l| {
            let n = l.len() as isize;
            for i in 0..n {
                let mut acc = F::zero();
                for (j, w) in weights.iter().enumerate() {
                    let k = i + j as isize - r;
                    if k >= 0 && k < n {
                        acc = acc + *w * l[k as usize];
                    }
                }
                o[i as usize] = acc;
            }
        });
    out
}

/// A normalized truncated-Gaussian kernel with `radius = floor(truncate * sigma + 0.5)`
fn gaussian_weights<F: Float>(sigma: f64, truncate: f64) -> Vec<F> {
    let radius = (truncate * sigma + 0.5).floor() as isize;
    let raw: Vec<f64> = (-radius..=radius)
        .map(|i| (-0.5 * (i as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| F::from(w / total).unwrap()).collect()
}

fn uniform_nd<F: Float>(a: &ArrayD<F>, size: &[usize]) -> ArrayD<F> {
    let mut out = a.to_owned();
    for (axis, s) in size.iter().enumerate() {
        out = uniform_filter1d(&out, *s, axis);
    }
    out
}

fn maximum_nd<F: Float>(a: &ArrayD<F>, size: &[usize]) -> ArrayD<F> {
    let mut out = a.to_owned();
    for (axis, s) in size.iter().enumerate() {
        out = maximum_filter1d(&out, *s, axis);
    }
    out
}

fn gaussian_nd<F: Float>(a: &ArrayD<F>, sigma: &[f64], truncate: f64) -> ArrayD<F> {
    let mut out = a.to_owned();
    for (axis, s) in sigma.iter().enumerate() {
        let weights = gaussian_weights::<F>(*s, truncate);
        out = correlate1d(&out, &weights, axis);
    }
    out
}

/// The windowed mean and windowed mean-of-squares, the two convolutions
/// shared by [`stdev`] and [`signal_to_noise_ratio`]
fn windowed_moments<F: Float + Send + Sync>(
    a: &ArrayD<F>,
    size: &[usize],
) -> (ArrayD<F>, ArrayD<F>) {
    let sq = a.mapv(|v| v * v);
    #[cfg(feature = "parallelism")]
    return rayon::join(|| uniform_nd(a, size), || uniform_nd(&sq, size));
    #[cfg(not(feature = "parallelism"))]
    (uniform_nd(a, size), uniform_nd(&sq, size))
}

/// Windowed mean
pub fn uniform<F: Float>(a: &ArrayD<F>, size: &[usize]) -> Result<ArrayD<F>, FilterError> {
    let size = normalize_size(size, a.ndim())?;
    Ok(uniform_nd(a, &size))
}

/// Windowed maximum
pub fn maximum<F: Float>(a: &ArrayD<F>, size: &[usize]) -> Result<ArrayD<F>, FilterError> {
    let size = normalize_size(size, a.ndim())?;
    Ok(maximum_nd(a, &size))
}

/// Windowed standard deviation via `sqrt(|E[x²] - E[x]²|)`.
///
/// Floating error can drive the variance estimate slightly negative; the
/// absolute value before the square root keeps the estimator's magnitude.
pub fn stdev<F: Float + Send + Sync>(
    a: &ArrayD<F>,
    size: &[usize],
) -> Result<ArrayD<F>, FilterError> {
    let size = normalize_size(size, a.ndim())?;
    let (c1, c2) = windowed_moments(a, &size);
    let mut out = c2;
    Zip::from(&mut out).and(&c1).for_each(|v, m| {
        *v = (*v - *m * *m).abs().sqrt();
    });
    Ok(out)
}

/// Squared Gaussian-smoothed grid, a matched filter approximating a
/// Gaussian peak shape.
///
/// `size` is the per-dimension Gaussian standard deviation in cell units;
/// squaring the smoothed response increases the contrast between peak and
/// baseline.
pub fn matched_gaussian<F: Float>(
    a: &ArrayD<F>,
    size: &[usize],
) -> Result<ArrayD<F>, FilterError> {
    let size = normalize_size(size, a.ndim())?;
    let sigma: Vec<f64> = size.iter().map(|s| *s as f64).collect();
    let mut out = gaussian_nd(a, &sigma, 4.0);
    out.mapv_inplace(|v| v * v);
    Ok(out)
}

/// Squared ratio of windowed mean to windowed standard deviation, with
/// 0/0 defined as 0
pub fn signal_to_noise_ratio<F: Float + Send + Sync>(
    a: &ArrayD<F>,
    size: &[usize],
) -> Result<ArrayD<F>, FilterError> {
    let size = normalize_size(size, a.ndim())?;
    let (c1, c2) = windowed_moments(a, &size);
    let mut out = c2;
    Zip::from(&mut out).and(&c1).for_each(|v, m| {
        let std = (*v - *m * *m).abs().sqrt();
        *v = if std == F::zero() {
            F::zero()
        } else {
            let snr = *m / std;
            snr * snr
        };
    });
    Ok(out)
}

/// Count occupied cells per window, returned as actual counts rather than
/// a windowed average.
///
/// A cell is occupied when it is non-NaN, or strictly positive when
/// `nonzero` is set.
pub fn count<F: Float>(
    a: &ArrayD<F>,
    size: &[usize],
    nonzero: bool,
) -> Result<ArrayD<F>, FilterError> {
    let size = normalize_size(size, a.ndim())?;
    let indicator = if nonzero {
        a.mapv(|v| {
            if !v.is_nan() && v > F::zero() {
                F::one()
            } else {
                F::zero()
            }
        })
    } else {
        a.mapv(|v| if v.is_nan() { F::zero() } else { F::one() })
    };
    let volume = F::from(size.iter().product::<usize>()).unwrap();
    let mut out = uniform_nd(&indicator, &size);
    out.mapv_inplace(|v| v * volume);
    Ok(out)
}

/// Per-dimension windowed excess kurtosis of the grid's marginal density.
///
/// For each axis the grid is collapsed onto that axis by summing over the
/// others, then `m4/m2² - 3` is computed from nested windowed moment
/// convolutions of the 1-D density against the axis bin centers. Each
/// result is broadcast back onto the full grid shape, one field per
/// dimension. Windows with no signal propagate NaN.
pub fn kurtosis<F: Float>(
    centers: &[Vec<f64>],
    a: &ArrayD<F>,
    size: &[usize],
) -> Result<Vec<ArrayD<F>>, FilterError> {
    let ndim = a.ndim();
    let size = normalize_size(size, ndim)?;
    if centers.len() != ndim {
        return Err(FilterError::DimensionMismatch {
            expected: ndim,
            actual: centers.len(),
        });
    }
    let shape = a.shape().to_vec();
    for (axis, c) in centers.iter().enumerate() {
        if c.len() != shape[axis] {
            return Err(FilterError::AxisLengthMismatch {
                axis,
                expected: shape[axis],
                actual: c.len(),
            });
        }
    }

    let mut fields = Vec::with_capacity(ndim);
    for d in 0..ndim {
        // Marginal density along this axis
        let mut freq = a.to_owned();
        for ax in (0..ndim).rev() {
            if ax != d {
                freq = freq.sum_axis(Axis(ax));
            }
        }

        let e = ArrayD::from_shape_vec(
            IxDyn(&[shape[d]]),
            centers[d].iter().map(|x| F::from(*x).unwrap()).collect(),
        )
        .unwrap();

        let s = [size[d]];
        let scale = F::from(size[d]).unwrap();
        let total = uniform_nd(&freq, &s).mapv(|v| v * scale);
        let xbar = uniform_nd(&(&e * &freq), &s).mapv(|v| v * scale) / &total;
        let dev = &e - &xbar;
        let m2 = uniform_nd(&(&dev * &dev * &freq), &s).mapv(|v| v * scale) / &total;
        let m4 =
            uniform_nd(&(&dev * &dev * &dev * &dev * &freq), &s).mapv(|v| v * scale) / &total;
        let k1d = Zip::from(&m4)
            .and(&m2)
            .map_collect(|m4, m2| *m4 / (*m2 * *m2) - F::from(3.0).unwrap());

        let mut unit_shape = vec![1usize; ndim];
        unit_shape[d] = shape[d];
        let field = k1d
            .into_shape(IxDyn(&unit_shape))
            .unwrap()
            .broadcast(IxDyn(&shape))
            .unwrap()
            .to_owned();
        fields.push(field);
    }
    Ok(fields)
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::arr1;

    fn array1d(values: &[f64]) -> ArrayD<f64> {
        arr1(values).into_dyn()
    }

    #[test]
    fn test_uniform_odd_window() {
        let a = array1d(&[1.0, 2.0, 3.0]);
        let out = uniform(&a, &[3]).unwrap();
        let expected = [1.0, 2.0, 5.0 / 3.0];
        for (o, e) in out.iter().zip(expected.iter()) {
            assert!((o - e).abs() < 1e-12);
        }
    }

    #[test]
    fn test_uniform_even_window_leans_left() {
        let a = array1d(&[1.0, 2.0, 3.0, 4.0]);
        let out = uniform(&a, &[2]).unwrap();
        let expected = [0.5, 1.5, 2.5, 3.5];
        for (o, e) in out.iter().zip(expected.iter()) {
            assert!((o - e).abs() < 1e-12);
        }
    }

    #[test]
    fn test_maximum_window() {
        let a = array1d(&[0.0, 5.0, 5.0, 0.0]);
        let out = maximum(&a, &[3]).unwrap();
        assert_eq!(out.as_slice().unwrap(), &[5.0, 5.0, 5.0, 5.0]);
    }

    #[test]
    fn test_maximum_pad_value_dominates_negatives() {
        let a = array1d(&[-1.0, -2.0]);
        let out = maximum(&a, &[3]).unwrap();
        assert_eq!(out.as_slice().unwrap(), &[0.0, 0.0]);
    }

    #[test]
    fn test_stdev_flat_interior_is_zero() {
        let a = array1d(&[1.0; 5]);
        let out = stdev(&a, &[3]).unwrap();
        let v = out.as_slice().unwrap();
        for x in &v[1..4] {
            assert!(x.abs() < 1e-9);
        }
        // Boundary windows see the zero padding
        let edge = (2.0f64 / 9.0).sqrt();
        assert!((v[0] - edge).abs() < 1e-9);
        assert!((v[4] - edge).abs() < 1e-9);
    }

    #[test]
    fn test_matched_gaussian_impulse() {
        let mut values = vec![0.0; 9];
        values[4] = 2.0;
        let a = array1d(&values);
        let out = matched_gaussian(&a, &[1]).unwrap();
        let v = out.as_slice().unwrap();
        // Squared symmetric kernel response, apex at the impulse
        for i in 0..4 {
            assert!((v[i] - v[8 - i]).abs() < 1e-12);
            assert!(v[i] < v[i + 1]);
        }
        let weights = gaussian_weights::<f64>(1.0, 4.0);
        let center = weights[weights.len() / 2] * 2.0;
        assert!((v[4] - center * center).abs() < 1e-12);
    }

    #[test]
    fn test_snr_zero_over_zero() {
        let a = array1d(&[0.0; 6]);
        let out = signal_to_noise_ratio(&a, &[3]).unwrap();
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_count_all_ones() {
        let a = array1d(&[1.0; 10]);
        let out = count(&a, &[3], false).unwrap();
        let v = out.as_slice().unwrap();
        assert!((v[0] - 2.0).abs() < 1e-9);
        assert!((v[9] - 2.0).abs() < 1e-9);
        for x in &v[1..9] {
            assert!((x - 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_count_nonzero_and_nan() {
        let a = array1d(&[f64::NAN, 0.0, 2.0]);
        let plain = count(&a, &[3], false).unwrap();
        // NaN cells are unoccupied, everything else counts
        assert!((plain[[1]] - 2.0).abs() < 1e-9);
        let strict = count(&a, &[3], true).unwrap();
        assert!((strict[[1]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_kurtosis_uniform_density() {
        let a = array1d(&[1.0; 5]);
        let centers = vec![vec![0.0, 1.0, 2.0, 3.0, 4.0]];
        let fields = kurtosis(&centers, &a, &[5]).unwrap();
        assert_eq!(fields.len(), 1);
        // Flat density over the full window has excess kurtosis -1.3
        assert!((fields[0][[2]] - (-1.3)).abs() < 1e-9);
    }

    #[test]
    fn test_kurtosis_field_shapes() {
        let a = ArrayD::from_shape_vec(IxDyn(&[3, 4]), vec![1.0f64; 12]).unwrap();
        let centers = vec![vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 2.0, 3.0]];
        let fields = kurtosis(&centers, &a, &[3, 3]).unwrap();
        assert_eq!(fields.len(), 2);
        for field in &fields {
            assert_eq!(field.shape(), &[3, 4]);
        }
        // Each field is constant along the axes it was collapsed over
        assert_eq!(fields[0][[0, 0]], fields[0][[0, 3]]);
        assert_eq!(fields[1][[0, 1]], fields[1][[2, 1]]);
    }

    #[test]
    fn test_size_broadcast_and_mismatch() {
        let a = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0f64; 4]).unwrap();
        assert!(uniform(&a, &[3]).is_ok());
        assert!(matches!(
            uniform(&a, &[3, 3, 3]),
            Err(FilterError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(matches!(uniform(&a, &[0]), Err(FilterError::EmptyWindow)));
    }
}
