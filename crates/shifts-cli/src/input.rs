use std::path::PathBuf;

use anyhow::{ensure, Context};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use shifts_core::{
    assign::AssignParameters,
    calibration::CalibrationParameters,
    histogram::HistogramParameters,
    mass::{MassBuilder, MassModel},
    peaks::PeakParameters,
};

/// Pipeline stage selected on the command line
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Calibrate,
    Histogram,
    Peaks,
    Assign,
}

impl Stage {
    pub fn from_name(name: &str) -> Option<Stage> {
        match name {
            "calibrate" => Some(Stage::Calibrate),
            "histogram" => Some(Stage::Histogram),
            "peaks" => Some(Stage::Peaks),
            "assign" => Some(Stage::Assign),
            _ => None,
        }
    }
}

#[derive(Serialize, Clone, Debug)]
/// Names of the input table columns each stage reads
pub struct Columns {
    pub sequence: String,
    pub charge: String,
    pub exp_mz: String,
    pub score: String,
    pub protein: String,
    pub cal_dm_mh: String,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            sequence: "sequence".into(),
            charge: "charge".into(),
            exp_mz: "exp_mz".into(),
            score: "score".into(),
            protein: "protein".into(),
            cal_dm_mh: "cal_dm_mh".into(),
        }
    }
}

#[derive(Deserialize, Serialize, Default, Debug)]
pub struct ColumnsBuilder {
    sequence: Option<String>,
    charge: Option<String>,
    exp_mz: Option<String>,
    score: Option<String>,
    protein: Option<String>,
    cal_dm_mh: Option<String>,
}

impl From<ColumnsBuilder> for Columns {
    fn from(value: ColumnsBuilder) -> Self {
        let default = Columns::default();
        Self {
            sequence: value.sequence.unwrap_or(default.sequence),
            charge: value.charge.unwrap_or(default.charge),
            exp_mz: value.exp_mz.unwrap_or(default.exp_mz),
            score: value.score.unwrap_or(default.score),
            protein: value.protein.unwrap_or(default.protein),
            cal_dm_mh: value.cal_dm_mh.unwrap_or(default.cal_dm_mh),
        }
    }
}

#[derive(Serialize)]
/// Actual run parameters - may include overrides or default values not set by user
pub struct Settings {
    pub version: String,
    pub stage: Stage,
    pub calibration: CalibrationParameters,
    pub histogram: HistogramParameters,
    pub peaks: PeakParameters,
    pub assign: AssignParameters,
    pub columns: Columns,
    pub masses: MassModel,
    pub skip_lines: usize,
    pub input_paths: Vec<String>,
    pub apex_path: Option<String>,
    pub fwhm_path: Option<String>,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
/// Input parameters deserialized from JSON file
pub struct Input {
    score_min: Option<f64>,
    ppm_max: Option<f64>,
    min_calibration_psms: Option<usize>,
    decoy_prefix: Option<String>,
    bin_width: Option<f64>,
    smoothing_window: Option<usize>,
    slope_window: Option<usize>,
    second_derivative_window: Option<usize>,
    apex_points: Option<usize>,
    frequency_threshold: Option<f64>,
    slope_threshold: Option<f64>,
    n_sigma: Option<f64>,
    columns: Option<ColumnsBuilder>,
    masses: Option<MassBuilder>,
    skip_lines: Option<usize>,
    output_directory: Option<String>,
    input_paths: Option<Vec<String>>,
    apex_path: Option<String>,
    fwhm_path: Option<String>,

    #[serde(skip)]
    stage: Option<Stage>,
}

impl Input {
    pub fn from_arguments(stage: Stage, matches: &ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("required parameters")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;
        input.stage = Some(stage);

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(paths) = matches.get_many::<String>("files") {
            log::trace!("overriding `input_paths` parameter.");
            input.input_paths = Some(paths.into_iter().map(|p| p.into()).collect());
        }
        if stage == Stage::Assign {
            if let Some(apex) = matches.get_one::<String>("apex") {
                input.apex_path = Some(apex.into());
            }
            if let Some(fwhm) = matches.get_one::<String>("fwhm") {
                input.fwhm_path = Some(fwhm.into());
            }
            ensure!(
                input.apex_path.is_some(),
                "`apex_path` must be set. For more information try '--help'"
            );
            ensure!(
                input.fwhm_path.is_some(),
                "`fwhm_path` must be set. For more information try '--help'"
            );
        }

        ensure!(
            input.input_paths.as_ref().map_or(false, |p| !p.is_empty()),
            "`input_paths` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&contents).map_err(anyhow::Error::from)
    }

    pub fn build(self) -> anyhow::Result<Settings> {
        let calibration = CalibrationParameters {
            score_min: self.score_min.unwrap_or(0.0),
            ppm_max: self.ppm_max.unwrap_or(10.0).abs(),
            decoy_prefix: self.decoy_prefix.unwrap_or_else(|| "DECOY_".into()),
            min_psms: self.min_calibration_psms.unwrap_or(1).max(1),
        };
        if calibration.decoy_prefix.is_empty() {
            log::warn!("`decoy_prefix` is empty: every PSM will be labelled as a decoy");
        }

        let histogram = HistogramParameters {
            bin_width: self.bin_width.unwrap_or(0.001),
            smoothing_window: self.smoothing_window.unwrap_or(0),
            slope_window: self.slope_window.unwrap_or(2),
            second_derivative_window: self.second_derivative_window.unwrap_or(2),
        };
        ensure!(
            histogram.bin_width.is_finite() && histogram.bin_width > 0.0,
            "`bin_width` must be a positive number, got {}",
            histogram.bin_width
        );
        ensure!(
            histogram.slope_window >= 1 && histogram.second_derivative_window >= 1,
            "`slope_window` and `second_derivative_window` must be at least 1"
        );

        let peaks = PeakParameters {
            apex_points: self.apex_points.unwrap_or(3),
            frequency_threshold: self.frequency_threshold.unwrap_or(0.0),
            slope_threshold: self.slope_threshold.unwrap_or(0.0),
        };
        ensure!(
            peaks.apex_points >= 2,
            "`apex_points` must be at least 2, got {}",
            peaks.apex_points
        );

        let assign = AssignParameters {
            n_sigma: self.n_sigma.unwrap_or(3.0),
        };
        if assign.n_sigma < 0.0 {
            log::warn!("`n_sigma` is negative, its absolute value is used");
        }

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path).with_context(|| {
                    format!("Failed to create output directory `{}`", path.display())
                })?;
                Some(path)
            }
            None => None,
        };

        Ok(Settings {
            version: clap::crate_version!().into(),
            stage: self.stage.unwrap_or(Stage::Calibrate),
            calibration,
            histogram,
            peaks,
            assign,
            columns: self.columns.map(Into::into).unwrap_or_default(),
            masses: self.masses.unwrap_or_default().make_model(),
            skip_lines: self.skip_lines.unwrap_or(0),
            input_paths: self.input_paths.unwrap_or_default(),
            apex_path: self.apex_path,
            fwhm_path: self.fwhm_path,
            output_paths: Vec::new(),
            output_directory,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let input: Input = serde_json::from_str("{}")?;
        let settings = input.build()?;
        assert_eq!(settings.calibration.ppm_max, 10.0);
        assert_eq!(settings.calibration.decoy_prefix, "DECOY_");
        assert_eq!(settings.peaks.apex_points, 3);
        assert_eq!(settings.columns.cal_dm_mh, "cal_dm_mh");
        assert_eq!(settings.skip_lines, 0);
        Ok(())
    }

    #[test]
    fn overrides() -> anyhow::Result<()> {
        let input: Input = serde_json::from_str(
            r#"{
                "score_min": 0.2,
                "bin_width": 0.002,
                "smoothing_window": 1,
                "columns": { "exp_mz": "ExpMz", "score": "xcorr" },
                "masses": { "fixed_mods": { "C": 57.021464 } },
                "skip_lines": 1
            }"#,
        )?;
        let settings = input.build()?;
        assert_eq!(settings.calibration.score_min, 0.2);
        assert_eq!(settings.histogram.bin_width, 0.002);
        assert_eq!(settings.histogram.smoothing_window, 1);
        assert_eq!(settings.columns.exp_mz, "ExpMz");
        assert_eq!(settings.columns.score, "xcorr");
        assert_eq!(settings.columns.sequence, "sequence");
        assert_eq!(settings.skip_lines, 1);

        let plain = MassModel::default().theoretical("PEPTIDEC", 1)?;
        let modified = settings.masses.theoretical("PEPTIDEC", 1)?;
        assert!((modified.mh - plain.mh - 57.021464).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn invalid_windows() -> anyhow::Result<()> {
        let input: Input = serde_json::from_str(r#"{ "slope_window": 0 }"#)?;
        assert!(input.build().is_err());
        let input: Input = serde_json::from_str(r#"{ "apex_points": 1 }"#)?;
        assert!(input.build().is_err());
        let input: Input = serde_json::from_str(r#"{ "bin_width": -0.1 }"#)?;
        assert!(input.build().is_err());
        Ok(())
    }
}
