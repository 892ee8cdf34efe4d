pub mod assign;
pub mod calibration;
pub mod fdr;
pub mod histogram;
pub mod mass;
pub mod modification;
pub mod peaks;
pub mod psm;
pub mod stats;

#[derive(Debug)]
pub enum Error {
    /// A PSM row could not be turned into a theoretical mass
    Mass {
        row: usize,
        source: mass::MassError,
    },
    /// The high-confidence subset was empty or too small
    InsufficientCalibrationData { psms: usize, required: usize },
    /// No usable values were provided
    EmptyInput,
    InvalidBinWidth(f64),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mass { row, source } => write!(f, "row {}: {}", row, source),
            Self::InsufficientCalibrationData { psms, required } => write!(
                f,
                "insufficient calibration data: {} high-confidence PSMs, at least {} required",
                psms, required
            ),
            Self::EmptyInput => f.write_str("no usable input values"),
            Self::InvalidBinWidth(w) => write!(f, "invalid histogram bin width: {}", w),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Mass { source, .. } => Some(source),
            _ => None,
        }
    }
}
