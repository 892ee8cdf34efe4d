use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, ensure, Context};
use fnv::FnvHashMap;
use log::info;
use rayon::prelude::*;
use serde::Serialize;
use shifts_core::{
    assign::{sort_order, AssignInput, PeakAssigner},
    calibration::{Calibration, CalibrationParameters, Calibrator},
    histogram::Histogram,
    peaks::{apex_list, PeakDetector},
    psm::Label,
};

use crate::input::{Settings, Stage};
use crate::output::{ASSIGNED_COLUMNS, CALIBRATED_COLUMNS};
use crate::table::{read_apex_list, read_fwhm, DataError, Table};

pub struct Runner {
    pub parameters: Settings,
    start: Instant,
}

/// Calibration sidecar written next to each calibrated table
#[derive(Serialize)]
struct CalibrationSummary<'a> {
    file: &'a str,
    parameters: &'a CalibrationParameters,
    #[serde(flatten)]
    calibration: Calibration,
}

impl Runner {
    pub fn new(parameters: Settings) -> Self {
        Self {
            parameters,
            start: Instant::now(),
        }
    }

    // Create a path for `file_name` in the specified output directory, if it exists,
    // otherwise, write to current directory
    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        match &self.parameters.output_directory {
            Some(dir) => dir.join(file_name.as_ref()),
            None => PathBuf::from(file_name.as_ref()),
        }
    }

    /// Per-file outputs go to the output directory if one is set, otherwise
    /// next to their input
    fn sibling_path(&self, input: &Path, suffix: &str) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = format!("{}{}", stem, suffix);
        match &self.parameters.output_directory {
            Some(dir) => dir.join(name),
            None => input.with_file_name(name),
        }
    }

    fn calibrate_file(&self, path: &str) -> anyhow::Result<Vec<String>> {
        let mut table = Table::read(path, self.parameters.skip_lines)?;
        let psms = table.psms(&self.parameters.columns)?;

        let calibrator = Calibrator::new(&self.parameters.masses, &self.parameters.calibration);
        let (calibrated, calibration) = calibrator.calibrate(path, &psms)?;

        let mut derived: Vec<&str> = CALIBRATED_COLUMNS.to_vec();
        derived.push(self.parameters.columns.cal_dm_mh.as_str());
        table.drop_columns(&derived);

        let input = Path::new(path);
        let tsv = self.write_calibrated(
            self.sibling_path(input, "_calibrated.tsv"),
            &table,
            &calibrated,
        )?;

        let json = self.sibling_path(input, "_calibration.json");
        let summary = CalibrationSummary {
            file: path,
            parameters: &self.parameters.calibration,
            calibration,
        };
        std::fs::write(&json, serde_json::to_vec_pretty(&summary)?)?;

        Ok(vec![tsv, json.display().to_string()])
    }

    /// Calibrate every input file independently. Failing files are logged
    /// and skipped.
    pub fn calibrate(&mut self) -> anyhow::Result<()> {
        let results = self
            .parameters
            .input_paths
            .par_iter()
            .map(|path| (path, self.calibrate_file(path)))
            .collect::<Vec<_>>();

        let mut failed = 0;
        let mut outputs = Vec::new();
        for (path, result) in results {
            match result {
                Ok(paths) => outputs.extend(paths),
                Err(e) => {
                    log::error!("skipping `{}`: {:#}", path, e);
                    failed += 1;
                }
            }
        }
        if failed > 0 && outputs.is_empty() {
            bail!("calibration failed for every input file");
        }
        self.parameters.output_paths.extend(outputs);
        Ok(())
    }

    /// Read one table written by `calibrate`, tagged with `Experiment`
    /// (parent directory) and `Filename` columns. `numeric` columns must be
    /// present and parse as numbers, `text` columns must be present.
    fn read_experiment(
        &self,
        path: &str,
        numeric: &[&str],
        text: &[&str],
    ) -> Result<Table, DataError> {
        // Tables produced by this tool carry no banner lines
        let mut table = Table::read(path, 0)?;
        for name in numeric {
            table.floats(name)?;
        }
        for name in text {
            table.column(name)?;
        }

        table.drop_columns(&["Experiment", "Filename"]);
        let input = Path::new(path);
        let experiment = input
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let filename = input
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let n = table.len();
        table.push_column("Experiment", vec![experiment; n]);
        table.push_column("Filename", vec![filename; n]);
        Ok(table)
    }

    /// Read all inputs into one table. Files that fail to read are logged
    /// and skipped.
    fn read_experiments(&self, numeric: &[&str], text: &[&str]) -> anyhow::Result<Table> {
        let results = self
            .parameters
            .input_paths
            .par_iter()
            .map(|path| (path, self.read_experiment(path, numeric, text)))
            .collect::<Vec<_>>();

        let mut tables = Vec::with_capacity(results.len());
        for (path, result) in results {
            match result {
                Ok(table) => tables.push(table),
                Err(e) => log::error!("skipping `{}`: {}", path, e),
            }
        }
        ensure!(!tables.is_empty(), "none of the input files could be read");

        let files = tables.len();
        let table = Table::concat(tables);
        info!("read {} PSMs from {} files", table.len(), files);
        Ok(table)
    }

    pub fn histogram(&mut self) -> anyhow::Result<()> {
        let cal_dm_mh = self.parameters.columns.cal_dm_mh.as_str();
        let mut table = self.read_experiments(&[cal_dm_mh], &[])?;
        table.drop_columns(&["bin"]);
        let delta_masses = table.floats(cal_dm_mh)?;

        let histogram = Histogram::compute(
            delta_masses.iter().flatten().copied(),
            &self.parameters.histogram,
        )?;
        let defined = delta_masses.iter().flatten().count();
        if defined < delta_masses.len() {
            log::warn!(
                "{} PSMs without a delta mass are not binned",
                delta_masses.len() - defined
            );
        }

        self.parameters
            .output_paths
            .push(self.write_histogram(&histogram)?);
        self.parameters
            .output_paths
            .push(self.write_dm_table(&table, &delta_masses, &histogram)?);
        Ok(())
    }

    pub fn peaks(&mut self) -> anyhow::Result<()> {
        if self.parameters.input_paths.len() > 1 {
            log::warn!("only the first histogram is used for peak detection");
        }
        let path = &self.parameters.input_paths[0];
        let bins = Table::read(path, 0)
            .and_then(|table| table.bins())
            .with_context(|| format!("Failed to read histogram from `{path}`"))?;

        let peaks = PeakDetector::new(&self.parameters.peaks).detect(&bins);
        let apexes = apex_list(&peaks);
        self.parameters
            .output_paths
            .push(self.write_apex_list(&apexes)?);
        Ok(())
    }

    /// FWHM for an experiment: the metadata file next to the input first,
    /// then the configured path
    fn fwhm_for(&self, experiment: &str, fwhm_path: &str) -> anyhow::Result<f64> {
        let configured = Path::new(fwhm_path);
        if let Some(name) = configured.file_name() {
            let local = Path::new(experiment).join(name);
            if local.is_file() {
                return Ok(read_fwhm(local)?);
            }
        }
        read_fwhm(configured)
            .with_context(|| format!("Failed to read FWHM for experiment `{experiment}`"))
    }

    pub fn assign(&mut self) -> anyhow::Result<()> {
        let (apex_path, fwhm_path) = match (
            &self.parameters.apex_path,
            &self.parameters.fwhm_path,
        ) {
            (Some(apex), Some(fwhm)) => (apex.clone(), fwhm.clone()),
            _ => bail!("`apex_path` and `fwhm_path` must be set"),
        };
        let apexes = read_apex_list(&apex_path)
            .with_context(|| format!("Failed to read apex list from `{apex_path}`"))?;
        if apexes.is_empty() {
            log::warn!("apex list `{}` is empty, every PSM is an orphan", apex_path);
        }

        let columns = &self.parameters.columns;
        let mut table = self.read_experiments(
            &[columns.cal_dm_mh.as_str(), columns.score.as_str()],
            &[columns.protein.as_str()],
        )?;
        table.drop_columns(&ASSIGNED_COLUMNS);

        let cal_dm = table.floats(&columns.cal_dm_mh)?;
        let scores = table.floats(&columns.score)?;
        let proteins = table.strings(&columns.protein)?;
        let experiments = table.strings("Experiment")?;

        let mut experiment_ix: FnvHashMap<&str, usize> = FnvHashMap::default();
        let mut fwhm = Vec::new();
        for &experiment in &experiments {
            if !experiment_ix.contains_key(experiment) {
                experiment_ix.insert(experiment, fwhm.len());
                let value = self.fwhm_for(experiment, &fwhm_path)?;
                info!("experiment `{}`: FWHM {}", experiment, value);
                fwhm.push(value);
            }
        }

        let mut rows = Vec::with_capacity(table.len());
        for ix in 0..table.len() {
            let score = scores[ix].with_context(|| {
                format!("row {ix}: missing value in score column `{}`", columns.score)
            })?;
            let experiment = experiment_ix[experiments[ix]];
            rows.push(AssignInput {
                cal_dm: cal_dm[ix],
                score,
                label: Label::from_protein(proteins[ix], &self.parameters.calibration.decoy_prefix),
                experiment,
                fwhm: fwhm[experiment],
            });
        }

        let assigner = PeakAssigner::new(apexes, &self.parameters.assign);
        let assigned = assigner.assign(&rows);
        let order = sort_order(&rows);

        let path = self.write_assignments(&table, &rows, &assigned, &order)?;
        self.parameters.output_paths.push(path);
        Ok(())
    }

    pub fn run(mut self) -> anyhow::Result<Settings> {
        ensure!(
            !self.parameters.input_paths.is_empty(),
            "no input files were provided"
        );
        match self.parameters.stage {
            Stage::Calibrate => self.calibrate()?,
            Stage::Histogram => self.histogram()?,
            Stage::Peaks => self.peaks()?,
            Stage::Assign => self.assign()?,
        }

        let path = self.make_path("results.json");
        self.parameters.output_paths.push(path.display().to_string());
        println!("{}", serde_json::to_string_pretty(&self.parameters)?);

        let bytes = serde_json::to_vec_pretty(&self.parameters)?;
        std::fs::write(&path, bytes)?;

        info!("finished in {}s", self.start.elapsed().as_secs());
        Ok(self.parameters)
    }
}
