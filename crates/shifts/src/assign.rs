//! Assignment of PSMs to the nearest delta-mass peak, with local, peak and
//! global FDR

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::fdr::{grouped_fdr, RankedFdr};
use crate::psm::Label;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssignParameters {
    /// PSMs within `n_sigma * fwhm / 2` of their closest apex are assigned to it
    pub n_sigma: f64,
}

impl Default for AssignParameters {
    fn default() -> Self {
        Self { n_sigma: 3.0 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeakClass {
    Peak,
    Orphan,
}

impl std::fmt::Display for PeakClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeakClass::Peak => f.write_str("PEAK"),
            PeakClass::Orphan => f.write_str("ORPHAN"),
        }
    }
}

/// Closest apex to `dm` in an ascending apex list. Ties go to the lower apex.
pub fn nearest_peak(apexes: &[f64], dm: f64) -> Option<f64> {
    if !dm.is_finite() {
        return None;
    }
    let ix = apexes.partition_point(|&a| a < dm);
    let below = ix.checked_sub(1).map(|i| apexes[i]);
    let above = apexes.get(ix).copied();
    match (below, above) {
        (Some(b), Some(a)) if (a - dm).abs() < (dm - b).abs() => Some(a),
        (Some(b), _) => Some(b),
        (None, a) => a,
    }
}

pub fn classify(apex: f64, dm: f64, fwhm: f64, n_sigma: f64) -> PeakClass {
    match (apex - dm).abs() <= (n_sigma * fwhm / 2.0).abs() {
        true => PeakClass::Peak,
        false => PeakClass::Orphan,
    }
}

/// Integer 1-Da bin of a delta mass
pub fn delta_mass_bin(dm: f64) -> Option<i64> {
    match dm.is_finite() {
        true => Some(dm.floor() as i64),
        false => None,
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AssignInput {
    pub cal_dm: Option<f64>,
    pub score: f64,
    pub label: Label,
    /// Index of the experiment the PSM belongs to
    pub experiment: usize,
    pub fwhm: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Assignment {
    pub closest_peak: Option<f64>,
    pub class: PeakClass,
    /// Closest apex for PEAK rows, calibrated delta mass otherwise
    pub deltamass: Option<f64>,
    pub dm_bin: Option<i64>,
    pub local: Option<RankedFdr>,
    pub peak: Option<RankedFdr>,
    pub global: Option<RankedFdr>,
}

pub struct PeakAssigner<'a> {
    apexes: Vec<f64>,
    parameters: &'a AssignParameters,
}

impl<'a> PeakAssigner<'a> {
    pub fn new(mut apexes: Vec<f64>, parameters: &'a AssignParameters) -> Self {
        apexes.retain(|a| a.is_finite());
        apexes.sort_by(|a, b| a.total_cmp(b));
        apexes.dedup();
        Self { apexes, parameters }
    }

    pub fn apexes(&self) -> &[f64] {
        &self.apexes
    }

    /// Assign every row to a peak and compute its FDR in each scope. Output is
    /// in input order.
    pub fn assign(&self, rows: &[AssignInput]) -> Vec<Assignment> {
        let mut assigned = rows
            .par_iter()
            .map(|row| {
                let dm = row.cal_dm.filter(|dm| dm.is_finite());
                let closest = dm.and_then(|dm| nearest_peak(&self.apexes, dm));
                let class = match (closest, dm) {
                    (Some(apex), Some(dm)) => classify(apex, dm, row.fwhm, self.parameters.n_sigma),
                    _ => PeakClass::Orphan,
                };
                Assignment {
                    closest_peak: closest,
                    class,
                    deltamass: match class {
                        PeakClass::Peak => closest,
                        PeakClass::Orphan => dm,
                    },
                    dm_bin: dm.and_then(delta_mass_bin),
                    local: None,
                    peak: None,
                    global: None,
                }
            })
            .collect::<Vec<_>>();

        let scores = rows.iter().map(|r| r.score).collect::<Vec<_>>();
        let labels = rows.iter().map(|r| r.label).collect::<Vec<_>>();

        let local_keys = assigned.iter().map(|a| a.dm_bin).collect::<Vec<_>>();
        let peak_keys = assigned
            .iter()
            .map(|a| match (a.class, a.dm_bin, a.closest_peak) {
                (PeakClass::Peak, Some(bin), Some(apex)) => Some((bin, apex.to_bits())),
                _ => None,
            })
            .collect::<Vec<_>>();
        let global_keys = rows.iter().map(|r| Some(r.experiment)).collect::<Vec<_>>();

        let local = grouped_fdr(&local_keys, &scores, &labels);
        let peak = grouped_fdr(&peak_keys, &scores, &labels);
        let global = grouped_fdr(&global_keys, &scores, &labels);

        for (ix, a) in assigned.iter_mut().enumerate() {
            a.local = local[ix];
            a.peak = peak[ix];
            a.global = global[ix];
        }

        let peaks = assigned
            .iter()
            .filter(|a| a.class == PeakClass::Peak)
            .count();
        log::info!(
            "assigned {} of {} PSMs to {} peaks, {} orphans",
            peaks,
            rows.len(),
            self.apexes.len(),
            rows.len() - peaks
        );
        assigned
    }
}

/// Row order by calibrated delta mass, stable, undefined values last
pub fn sort_order(rows: &[AssignInput]) -> Vec<usize> {
    let mut order = (0..rows.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| match (rows[a].cal_dm, rows[b].cal_dm) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    order
}
