//! Delta-mass histogram with smoothed counts and windowed least-squares
//! derivatives

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::stats::LinearFit;
use crate::Error;

/// Edges closer than this are considered equal
pub const EDGE_TOLERANCE: f64 = 1E-9;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramParameters {
    pub bin_width: f64,
    /// Half-width of the smoothing window; 0 disables smoothing
    pub smoothing_window: usize,
    /// Half-width of the first derivative window
    pub slope_window: usize,
    /// Half-width of the second derivative window
    pub second_derivative_window: usize,
}

impl Default for HistogramParameters {
    fn default() -> Self {
        Self {
            bin_width: 0.001,
            smoothing_window: 0,
            slope_window: 2,
            second_derivative_window: 2,
        }
    }
}

/// A right-closed interval `(left, right]`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Bin {
    pub left: f64,
    pub right: f64,
    pub midpoint: f64,
    pub count: usize,
    pub smooth_count: Option<f64>,
    pub slope1: Option<f64>,
    pub slope2: Option<f64>,
}

impl Bin {
    pub fn new(left: f64, right: f64) -> Self {
        Bin {
            left,
            right,
            midpoint: (left + right) / 2.0,
            count: 0,
            smooth_count: None,
            slope1: None,
            slope2: None,
        }
    }

    pub fn contains(&self, x: f64) -> bool {
        x > self.left && x <= self.right
    }

    /// Whether `next` starts where this bin ends
    pub fn adjoins(&self, next: &Bin) -> bool {
        (self.right - next.left).abs() <= EDGE_TOLERANCE
    }
}

impl std::fmt::Display for Bin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}]", self.left, self.right)
    }
}

/// Number of decimal places needed to print `x`
fn decimals(x: f64) -> i32 {
    let repr = format!("{}", x);
    match repr.split_once('.') {
        Some((_, fraction)) => fraction.len() as i32,
        None => 0,
    }
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (x * scale).round() / scale
}

/// Fit a least-squares line over `[i - w, i + w]` for every index where the
/// window is in range and every `y` in it is defined
pub fn windowed_fit(x: &[f64], y: &[Option<f64>], w: usize) -> Vec<Option<LinearFit>> {
    let n = x.len().min(y.len());
    (0..n)
        .into_par_iter()
        .map(|i| {
            if i < w || i + w >= n {
                return None;
            }
            let window = (i - w)..=(i + w);
            let ys = y[window.clone()].iter().copied().collect::<Option<Vec<f64>>>()?;
            Some(LinearFit::fit(&x[window], &ys))
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    pub bin_width: f64,
    pub bins: Vec<Bin>,
}

impl Histogram {
    /// Bin delta masses into fixed-width right-closed intervals spanning
    /// `floor(min)` to `ceil(max) + bin_width`. Non-finite values are skipped.
    pub fn build<I>(values: I, bin_width: f64) -> Result<Self, Error>
    where
        I: IntoIterator<Item = f64>,
    {
        if !bin_width.is_finite() || bin_width <= 0.0 {
            return Err(Error::InvalidBinWidth(bin_width));
        }
        let values = values
            .into_iter()
            .filter(|v| v.is_finite())
            .collect::<Vec<_>>();

        let (min, max) = values
            .iter()
            .fold(None, |acc: Option<(f64, f64)>, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
            .ok_or(Error::EmptyInput)?;

        let places = decimals(bin_width);
        let mut start = min.floor();
        if min <= start {
            // The first interval is open on the left
            start = round_to(start - bin_width, places);
        }
        let end = max.ceil() + bin_width;
        let n_bins = ((end - start) / bin_width).round() as usize;

        let edges = (0..=n_bins)
            .map(|k| round_to(start + k as f64 * bin_width, places))
            .collect::<Vec<_>>();
        let mut histogram = Histogram {
            bin_width,
            bins: edges.windows(2).map(|e| Bin::new(e[0], e[1])).collect(),
        };

        for v in values {
            if let Some(ix) = histogram.locate(v) {
                histogram.bins[ix].count += 1;
            }
        }
        Ok(histogram)
    }

    /// Build, smooth and differentiate in one go
    pub fn compute<I>(values: I, parameters: &HistogramParameters) -> Result<Self, Error>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut histogram = Self::build(values, parameters.bin_width)?;
        if parameters.smoothing_window > 0 {
            histogram.smooth(parameters.smoothing_window);
        }
        histogram.derivatives(
            parameters.slope_window,
            parameters.second_derivative_window,
            parameters.smoothing_window > 0,
        );
        log::info!(
            "built histogram of {} bins from {:.4} to {:.4}",
            histogram.bins.len(),
            histogram.bins.first().map(|b| b.left).unwrap_or_default(),
            histogram.bins.last().map(|b| b.right).unwrap_or_default(),
        );
        Ok(histogram)
    }

    /// Index of the bin containing `x`
    pub fn locate(&self, x: f64) -> Option<usize> {
        let first = self.bins.first()?;
        let last = self.bins.last()?;
        if !(x > first.left && x <= last.right) {
            return None;
        }
        let guess = ((x - first.left) / self.bin_width).ceil() as isize - 1;
        let mut ix = guess.clamp(0, self.bins.len() as isize - 1) as usize;
        while ix > 0 && x <= self.bins[ix].left {
            ix -= 1;
        }
        while ix + 1 < self.bins.len() && x > self.bins[ix].right {
            ix += 1;
        }
        match self.bins[ix].contains(x) {
            true => Some(ix),
            false => None,
        }
    }

    pub fn midpoints(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.midpoint).collect()
    }

    pub fn total(&self) -> usize {
        self.bins.iter().map(|b| b.count).sum()
    }

    /// Replace counts by the value of a local linear fit at each midpoint
    pub fn smooth(&mut self, w: usize) {
        let x = self.midpoints();
        let y = self
            .bins
            .iter()
            .map(|b| Some(b.count as f64))
            .collect::<Vec<_>>();
        let fits = windowed_fit(&x, &y, w);
        for ((bin, fit), &mid) in self.bins.iter_mut().zip(fits).zip(&x) {
            bin.smooth_count = fit.map(|f| f.predict(mid));
        }
    }

    /// First and second derivatives as windowed least-squares slopes.
    /// Undefined inputs propagate, so edge losses accumulate across passes.
    pub fn derivatives(&mut self, slope_window: usize, second_window: usize, smoothed: bool) {
        let x = self.midpoints();
        let y = self
            .bins
            .iter()
            .map(|b| match smoothed {
                true => b.smooth_count,
                false => Some(b.count as f64),
            })
            .collect::<Vec<_>>();

        let slope1 = windowed_fit(&x, &y, slope_window)
            .into_iter()
            .map(|f| f.map(|f| f.slope))
            .collect::<Vec<_>>();
        let slope2 = windowed_fit(&x, &slope1, second_window)
            .into_iter()
            .map(|f| f.map(|f| f.slope))
            .collect::<Vec<_>>();

        for ((bin, s1), s2) in self.bins.iter_mut().zip(slope1).zip(slope2) {
            bin.slope1 = s1;
            bin.slope2 = s2;
        }
    }
}
