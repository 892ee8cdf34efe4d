//! Peak picking on the first derivative of a delta-mass histogram

use serde::{Deserialize, Serialize};

use crate::histogram::Bin;
use crate::stats::LinearFit;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakParameters {
    /// Number of bins in the validation window
    pub apex_points: usize,
    /// Minimum bin count within the window
    pub frequency_threshold: f64,
    /// Minimum absolute slope within the window
    pub slope_threshold: f64,
}

impl Default for PeakParameters {
    fn default() -> Self {
        Self {
            apex_points: 3,
            frequency_threshold: 0.0,
            slope_threshold: 0.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Peak {
    /// Interpolated zero crossing of slope1
    pub apex: f64,
    /// Inclusive bin range of the validation window
    pub first_bin: usize,
    pub last_bin: usize,
    pub max_count: usize,
    pub max_slope: f64,
}

/// Why a candidate was not accepted as a peak
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Rejection {
    OutOfRange,
    UndefinedSlope(usize),
    NotRising(usize),
    NotFalling(usize),
    Gap(usize),
    ApexOutsideWindow(f64),
    BelowFrequency(usize),
    BelowSlope(f64),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::OutOfRange => f.write_str("window exceeds histogram"),
            Rejection::UndefinedSlope(ix) => write!(f, "slope1 undefined at bin {}", ix),
            Rejection::NotRising(ix) => write!(f, "slope1 negative before centre at bin {}", ix),
            Rejection::NotFalling(ix) => {
                write!(f, "slope1 non-negative after centre at bin {}", ix)
            }
            Rejection::Gap(ix) => write!(f, "bin {} is not contiguous with the next", ix),
            Rejection::ApexOutsideWindow(apex) => write!(f, "apex {} outside window", apex),
            Rejection::BelowFrequency(count) => write!(f, "max count {} below threshold", count),
            Rejection::BelowSlope(slope) => write!(f, "max |slope1| {} below threshold", slope),
        }
    }
}

enum State {
    Searching,
    Candidate { crossing: usize, center: usize },
}

pub struct PeakDetector<'a> {
    parameters: &'a PeakParameters,
}

impl<'a> PeakDetector<'a> {
    pub fn new(parameters: &'a PeakParameters) -> Self {
        Self { parameters }
    }

    /// Inclusive window bounds and the index of the first falling bin
    fn window(&self, crossing: usize, center: usize, n: usize) -> Option<(usize, usize, usize)> {
        let k = self.parameters.apex_points;
        let (start, end, falling) = match k % 2 {
            1 => (center.checked_sub(k / 2)?, center + k / 2, center + 1),
            _ => (crossing.checked_sub(k / 2)?, crossing + k / 2 - 1, crossing),
        };
        match end < n {
            true => Some((start, end, falling)),
            false => None,
        }
    }

    /// Check a candidate window, returning the peak if it passes
    pub fn validate(&self, bins: &[Bin], crossing: usize, center: usize) -> Result<Peak, Rejection> {
        let (start, end, falling) = self
            .window(crossing, center, bins.len())
            .ok_or(Rejection::OutOfRange)?;
        let rising_end = match self.parameters.apex_points % 2 {
            1 => center,
            _ => crossing,
        };

        let mut slopes = Vec::with_capacity(end - start + 1);
        for ix in start..=end {
            let slope = bins[ix].slope1.ok_or(Rejection::UndefinedSlope(ix))?;
            if ix < rising_end && slope < 0.0 {
                return Err(Rejection::NotRising(ix));
            }
            if ix >= falling && slope >= 0.0 {
                return Err(Rejection::NotFalling(ix));
            }
            if ix < end && !bins[ix].adjoins(&bins[ix + 1]) {
                return Err(Rejection::Gap(ix));
            }
            slopes.push(slope);
        }

        let window = &bins[start..=end];
        let midpoints = window.iter().map(|b| b.midpoint).collect::<Vec<_>>();
        let apex = LinearFit::fit(&midpoints, &slopes).root();
        if !(apex > midpoints[0] && apex < midpoints[midpoints.len() - 1]) {
            return Err(Rejection::ApexOutsideWindow(apex));
        }

        let max_count = window.iter().map(|b| b.count).max().unwrap_or_default();
        if (max_count as f64) < self.parameters.frequency_threshold {
            return Err(Rejection::BelowFrequency(max_count));
        }
        let max_slope = slopes.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        if max_slope < self.parameters.slope_threshold {
            return Err(Rejection::BelowSlope(max_slope));
        }

        Ok(Peak {
            apex,
            first_bin: start,
            last_bin: end,
            max_count,
            max_slope,
        })
    }

    /// Scan slope1 for positive-to-negative sign changes and validate each
    pub fn detect(&self, bins: &[Bin]) -> Vec<Peak> {
        let mut peaks = Vec::new();
        let mut state = State::Searching;
        let mut i = 1;
        while i < bins.len() {
            state = match state {
                State::Searching => {
                    match (bins[i - 1].slope1, bins[i].slope1) {
                        (Some(prev), Some(next)) if prev >= 0.0 && next < 0.0 => {
                            let center = match prev.abs() <= next.abs() {
                                true => i - 1,
                                false => i,
                            };
                            State::Candidate {
                                crossing: i,
                                center,
                            }
                        }
                        _ => {
                            i += 1;
                            State::Searching
                        }
                    }
                }
                State::Candidate { crossing, center } => {
                    match self.validate(bins, crossing, center) {
                        Ok(peak) => {
                            log::debug!(
                                "peak at {:.6} from bins {}..{}",
                                peak.apex,
                                bins[peak.first_bin],
                                bins[peak.last_bin]
                            );
                            peaks.push(peak);
                        }
                        Err(rejection) => log::debug!(
                            "rejected candidate at {}: {}",
                            bins[center],
                            rejection
                        ),
                    }
                    i = crossing + 1;
                    State::Searching
                }
            };
        }

        log::info!("detected {} peaks", peaks.len());
        peaks
    }
}

/// Ascending, deduplicated apex positions
pub fn apex_list(peaks: &[Peak]) -> Vec<f64> {
    let mut apexes = peaks.iter().map(|p| p.apex).collect::<Vec<_>>();
    apexes.sort_by(|a, b| a.total_cmp(b));
    apexes.dedup();
    apexes
}
