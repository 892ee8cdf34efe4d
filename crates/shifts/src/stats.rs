//! Robust statistics and least-squares helpers shared by the calibration,
//! histogram and peak picking stages

/// √2 · erf⁻¹(1/2): scales a median absolute deviation to a normal 1-σ
pub const MAD_TO_SIGMA: f64 = 0.674_489_750_196_081_7;

pub fn mean(slice: &[f64]) -> f64 {
    slice.iter().sum::<f64>() / slice.len() as f64
}

/// Median of `slice`, averaging the two middle values for even lengths.
/// Returns `None` for an empty slice.
pub fn median(slice: &[f64]) -> Option<f64> {
    if slice.is_empty() {
        return None;
    }
    let mut v = slice.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    let mid = v.len() / 2;
    match v.len() % 2 {
        0 => Some((v[mid - 1] + v[mid]) / 2.0),
        _ => Some(v[mid]),
    }
}

/// Median absolute deviation around the median
pub fn mad(slice: &[f64]) -> Option<f64> {
    let center = median(slice)?;
    let deviations = slice.iter().map(|x| (x - center).abs()).collect::<Vec<_>>();
    median(&deviations)
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Ordinary least squares fit of `y = slope * x + intercept`.
    ///
    /// # Invariants
    /// * `x` and `y` have the same, non-zero length
    /// * `x` is not constant, zero variance yields NaN
    pub fn fit(x: &[f64], y: &[f64]) -> LinearFit {
        let x_mean = mean(x);
        let y_mean = mean(y);

        let (ssxy, ssx) = x
            .iter()
            .zip(y)
            .fold((0.0f64, 0.0f64), |(ssxy, ssx), (x, y)| {
                (
                    ssxy + (x - x_mean) * (y - y_mean),
                    ssx + (x - x_mean).powi(2),
                )
            });

        let slope = ssxy / ssx;
        LinearFit {
            slope,
            intercept: y_mean - slope * x_mean,
        }
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    /// The `x` value where the fitted line crosses zero
    pub fn root(&self) -> f64 {
        -self.intercept / self.slope
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn medians() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0]), Some(3.0));
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[0.0005, -0.0005, 0.0010]), Some(0.0005));
    }

    #[test]
    fn median_absolute_deviation() {
        assert_eq!(mad(&[1.0, 1.0, 2.0, 2.0, 4.0, 6.0, 9.0]), Some(1.0));
        assert_eq!(mad(&[]), None);
    }

    #[quickcheck]
    fn median_splits_sample(values: Vec<i32>) -> bool {
        let values = values.into_iter().map(f64::from).collect::<Vec<_>>();
        match median(&values) {
            None => values.is_empty(),
            Some(m) => {
                let below = values.iter().filter(|&&v| v <= m).count();
                let above = values.iter().filter(|&&v| v >= m).count();
                2 * below >= values.len() && 2 * above >= values.len()
            }
        }
    }

    #[test]
    fn least_squares() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [3.0, 5.0, 7.0, 9.0];
        let fit = LinearFit::fit(&x, &y);
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!((fit.predict(10.0) - 21.0).abs() < 1e-12);
        assert!((fit.root() + 0.5).abs() < 1e-12);
    }

    #[test]
    fn constant_x_is_undefined() {
        let fit = LinearFit::fit(&[1.0, 1.0], &[0.0, 2.0]);
        assert!(fit.slope.is_nan());
    }
}
