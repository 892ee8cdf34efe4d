//! Systematic precursor mass error correction.
//!
//! A high-confidence subset of target PSMs is used to estimate a relative
//! (m/z-proportional) mass error, which is then removed from every PSM.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::mass::MassModel;
use crate::psm::{Label, Psm};
use crate::stats::{mad, median, MAD_TO_SIGMA};
use crate::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationParameters {
    /// Minimum score to enter the calibration subset
    pub score_min: f64,
    /// Symmetric ppm window for the calibration subset
    pub ppm_max: f64,
    /// Protein accessions starting with this prefix are decoys
    pub decoy_prefix: String,
    /// Minimum size of the calibration subset
    pub min_psms: usize,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            score_min: 0.0,
            ppm_max: 10.0,
            decoy_prefix: "DECOY_".into(),
            min_psms: 1,
        }
    }
}

/// Precursor mass error, before and after calibration. Every column is a
/// pure function of the PSM, the mass model and `alpha`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CalibratedPsm {
    pub label: Label,
    pub theo_mz: f64,
    pub theo_mh: f64,
    /// `exp_mz - theo_mz`
    pub abs_error: f64,
    /// `abs_error / theo_mz`, in ppm
    pub ppm: f64,
    pub cal_exp_mz: f64,
    pub cal_exp_mh: f64,
    pub dm_mz: f64,
    pub dm_mh: f64,
    pub cal_dm_mz: f64,
    pub cal_dm_mh: f64,
    pub cal_ppm: f64,
}

/// An observed mass error, used for estimating the systematic error
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ErrorSample {
    pub exp_mz: f64,
    /// `exp_mz - theo_mz`, possibly after calibration
    pub error: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct SystematicError {
    /// Median absolute error, in m/z
    pub sys_error: f64,
    /// Median relative error, `error / exp_mz`
    pub alpha: f64,
    /// Robust 1-σ spread of the relative error, in ppm
    pub avg_ppm_error: f64,
    /// Number of PSMs the estimate is based on
    pub psms: usize,
}

/// Per-file calibration outcome
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Calibration {
    pub before: SystematicError,
    pub after: SystematicError,
}

/// Estimate systematic error from a set of mass errors.
///
/// Fails with [`Error::InsufficientCalibrationData`] when there are fewer than
/// `min_psms` (and always when there are no) samples.
pub fn estimate_systematic_error(
    samples: &[ErrorSample],
    min_psms: usize,
) -> Result<SystematicError, Error> {
    let insufficient = || Error::InsufficientCalibrationData {
        psms: samples.len(),
        required: min_psms.max(1),
    };
    if samples.len() < min_psms.max(1) {
        return Err(insufficient());
    }

    let errors = samples.iter().map(|s| s.error).collect::<Vec<_>>();
    let relative = samples
        .iter()
        .map(|s| s.error / s.exp_mz)
        .collect::<Vec<_>>();
    let relative_ppm = relative.iter().map(|r| r * 1E6).collect::<Vec<_>>();

    Ok(SystematicError {
        sys_error: median(&errors).ok_or_else(insufficient)?,
        alpha: median(&relative).ok_or_else(insufficient)?,
        avg_ppm_error: mad(&relative_ppm).ok_or_else(insufficient)? / MAD_TO_SIGMA,
        psms: samples.len(),
    })
}

/// Mass errors of the rows in `subset`, before or after calibration
fn error_samples(
    psms: &[Psm],
    annotated: &[CalibratedPsm],
    subset: &[usize],
    calibrated: bool,
) -> Vec<ErrorSample> {
    subset
        .iter()
        .map(|&ix| ErrorSample {
            exp_mz: psms[ix].exp_mz,
            error: match calibrated {
                true => annotated[ix].cal_dm_mz,
                false => annotated[ix].abs_error,
            },
        })
        .collect()
}

pub struct Calibrator<'a> {
    model: &'a MassModel,
    parameters: &'a CalibrationParameters,
}

impl<'a> Calibrator<'a> {
    pub fn new(model: &'a MassModel, parameters: &'a CalibrationParameters) -> Self {
        Self { model, parameters }
    }

    /// Compute labels, theoretical masses and uncalibrated errors for every
    /// PSM. Calibrated columns are filled in by [`Calibrator::apply`].
    pub fn annotate(&self, source: &str, psms: &[Psm]) -> Result<Vec<CalibratedPsm>, Error> {
        psms.par_iter()
            .enumerate()
            .map(|(row, psm)| {
                let theo = self
                    .model
                    .theoretical(&psm.sequence, psm.charge)
                    .map_err(|source| Error::Mass { row, source })?;
                if !theo.unresolved.is_empty() {
                    log::warn!(
                        "{}: `{}` contains residues without mass ({:?}), counted as 0 Da",
                        source,
                        psm.sequence,
                        theo.unresolved
                    );
                }
                let abs_error = psm.exp_mz - theo.mz;
                let dm_mz = abs_error;
                Ok(CalibratedPsm {
                    label: Label::from_protein(&psm.protein, &self.parameters.decoy_prefix),
                    theo_mz: theo.mz,
                    theo_mh: theo.mh,
                    abs_error,
                    ppm: abs_error / theo.mz * 1E6,
                    dm_mz,
                    dm_mh: dm_mz * psm.charge as f64,
                    ..Default::default()
                })
            })
            .collect()
    }

    /// Indices of high-confidence target PSMs used for calibration
    pub fn filter_high_confidence(&self, psms: &[Psm], annotated: &[CalibratedPsm]) -> Vec<usize> {
        psms.iter()
            .zip(annotated)
            .enumerate()
            .filter(|(_, (psm, cal))| {
                cal.label == Label::Target
                    && psm.score >= self.parameters.score_min
                    && cal.ppm.abs() <= self.parameters.ppm_max
            })
            .map(|(ix, _)| ix)
            .collect()
    }

    /// Apply the multiplicative correction `exp_mz * (1 - alpha)` to every PSM
    pub fn apply(&self, psms: &[Psm], annotated: &mut [CalibratedPsm], alpha: f64) {
        annotated
            .par_iter_mut()
            .zip(psms.par_iter())
            .for_each(|(cal, psm)| {
                cal.cal_exp_mz = psm.exp_mz * (1.0 - alpha);
                cal.cal_exp_mh = self.model.mz_to_mh(cal.cal_exp_mz, psm.charge);
                cal.cal_dm_mz = cal.cal_exp_mz - cal.theo_mz;
                cal.cal_dm_mh = cal.cal_exp_mh - cal.theo_mh;
                cal.cal_ppm = cal.cal_dm_mz / cal.theo_mz * 1E6;
            });
    }

    /// Run the full calibration of one file's PSMs. The output has one row
    /// per input PSM, in the same order.
    pub fn calibrate(
        &self,
        source: &str,
        psms: &[Psm],
    ) -> Result<(Vec<CalibratedPsm>, Calibration), Error> {
        if psms.is_empty() {
            return Err(Error::EmptyInput);
        }
        let mut annotated = self.annotate(source, psms)?;
        let subset = self.filter_high_confidence(psms, &annotated);
        log::info!(
            "{}: {} PSMs, {} pass calibration filters (score >= {}, |ppm| <= {})",
            source,
            psms.len(),
            subset.len(),
            self.parameters.score_min,
            self.parameters.ppm_max
        );

        let before = estimate_systematic_error(
            &error_samples(psms, &annotated, &subset, false),
            self.parameters.min_psms,
        )?;
        log::info!(
            "{}: systematic error {:.4e}, alpha {:.4e}, spread {:.4} ppm",
            source,
            before.sys_error,
            before.alpha,
            before.avg_ppm_error
        );

        self.apply(psms, &mut annotated, before.alpha);

        let after = estimate_systematic_error(
            &error_samples(psms, &annotated, &subset, true),
            self.parameters.min_psms,
        )?;
        log::info!(
            "{}: after calibration: systematic error {:.4e}, alpha {:.4e}, spread {:.4} ppm",
            source,
            after.sys_error,
            after.alpha,
            after.avg_ppm_error
        );

        Ok((annotated, Calibration { before, after }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn psm(exp_mz: f64, protein: &str) -> Psm {
        Psm {
            sequence: "PEPTIDE".into(),
            charge: 2,
            exp_mz,
            score: 1.0,
            protein: protein.into(),
        }
    }

    fn sample(exp_mz: f64, theo_mz: f64) -> ErrorSample {
        ErrorSample {
            exp_mz,
            error: exp_mz - theo_mz,
        }
    }

    #[test]
    fn systematic_error_of_known_subset() {
        let samples = [
            sample(500.0005, 500.0),
            sample(499.9995, 500.0),
            sample(500.0010, 500.0),
        ];
        let est = estimate_systematic_error(&samples, 1).unwrap();
        assert!((est.sys_error - 0.0005).abs() < 1e-9);
        assert!((est.alpha - 0.0005 / 500.0005).abs() < 1e-12);
        assert_eq!(est.psms, 3);

        // relative errors ~ [1, -1, 2] ppm: median 1, deviations [0, 2, 1]
        assert!((est.avg_ppm_error - 1.0 / MAD_TO_SIGMA).abs() < 1e-3);
    }

    #[test]
    fn empty_subset_is_fatal() {
        assert!(matches!(
            estimate_systematic_error(&[], 1),
            Err(Error::InsufficientCalibrationData { psms: 0, .. })
        ));
        assert!(matches!(
            estimate_systematic_error(&[sample(500.0, 500.0)], 5),
            Err(Error::InsufficientCalibrationData {
                psms: 1,
                required: 5
            })
        ));
    }

    #[test]
    fn calibration_scenario() {
        let model = MassModel::default();
        let parameters = CalibrationParameters {
            score_min: 0.0,
            ppm_max: 100.0,
            ..Default::default()
        };
        let theo = model.theoretical("PEPTIDE", 2).unwrap().mz;
        let psms = vec![
            psm(theo + 0.0005, "sp|P1"),
            psm(theo - 0.0005, "sp|P2"),
            psm(theo + 0.0010, "sp|P3"),
            psm(theo, "DECOY_sp|P4"),
        ];

        let calibrator = Calibrator::new(&model, &parameters);
        let annotated = calibrator.annotate("test", &psms).unwrap();
        assert_eq!(annotated[3].label, Label::Decoy);
        assert_eq!(
            calibrator.filter_high_confidence(&psms, &annotated),
            vec![0, 1, 2]
        );

        let (rows, report) = calibrator.calibrate("test", &psms).unwrap();
        assert_eq!(rows.len(), psms.len());
        assert!((report.before.sys_error - 0.0005).abs() < 1e-9);
        let alpha = report.before.alpha;
        assert!((rows[0].cal_exp_mz - psms[0].exp_mz * (1.0 - alpha)).abs() < 1e-12);

        // After correction the median error of the subset is ~0
        assert!(report.after.sys_error.abs() < 1e-6);
        assert!(report.after.alpha.abs() < 1e-9);
    }

    #[test]
    fn calibrated_delta_mass_is_mh_difference() {
        let model = MassModel::default();
        let parameters = CalibrationParameters::default();
        let calibrator = Calibrator::new(&model, &parameters);

        let theo = model.theoretical("PEPTIDE", 3).unwrap();
        let mut p = psm(theo.mz + 15.9949 / 3.0, "sp|P1");
        p.charge = 3;
        let psms = vec![p];
        let mut rows = calibrator.annotate("test", &psms).unwrap();
        calibrator.apply(&psms, &mut rows, 0.0);
        assert!((rows[0].cal_dm_mh - 15.9949).abs() < 1e-6);
        assert!((rows[0].dm_mh - rows[0].cal_dm_mh).abs() < 1e-9);
    }

    #[test]
    fn calibration_is_idempotent() {
        let model = MassModel::default();
        let parameters = CalibrationParameters::default();
        let calibrator = Calibrator::new(&model, &parameters);
        let psms = vec![psm(400.2, "sp|P1"), psm(401.7, "DECOY_sp|P2")];

        let mut rows = calibrator.annotate("test", &psms).unwrap();
        calibrator.apply(&psms, &mut rows, 2.5E-6);
        let once = rows.clone();
        calibrator.apply(&psms, &mut rows, 2.5E-6);
        assert_eq!(once, rows);
    }

    #[test]
    fn invalid_rows_fail_the_batch() {
        let model = MassModel::default();
        let parameters = CalibrationParameters::default();
        let calibrator = Calibrator::new(&model, &parameters);
        let mut bad = psm(500.0, "sp|P1");
        bad.charge = 0;
        let err = calibrator
            .calibrate("test", &[psm(500.0, "sp|P1"), bad])
            .unwrap_err();
        assert!(matches!(err, Error::Mass { row: 1, .. }));
        assert!(matches!(
            calibrator.calibrate("test", &[]),
            Err(Error::EmptyInput)
        ));
    }
}
