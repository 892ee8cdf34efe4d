//! Rank-based target/decoy false discovery rate within groups of PSMs

use fnv::FnvHashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::hash::Hash;

use crate::psm::Label;

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct RankedFdr {
    /// Targets seen so far, including this row if it is a target
    pub rank_t: usize,
    /// Decoys seen so far, including this row if it is a decoy
    pub rank_d: usize,
    /// `rank_d / rank_t`, undefined when no target has been seen
    pub fdr: Option<f64>,
}

/// Row indices in ranking order: score ascending, decoys before targets on
/// equal score, then input order
pub fn ranking_order(scores: &[f64], labels: &[Label]) -> Vec<usize> {
    let mut order = (0..scores.len().min(labels.len())).collect::<Vec<_>>();
    order.sort_by(|&a, &b| {
        scores[a]
            .total_cmp(&scores[b])
            .then_with(|| labels[a].cmp(&labels[b]))
    });
    order
}

/// Running target/decoy ranks and FDR for one group. The result is in input
/// order.
pub fn rank_fdr(scores: &[f64], labels: &[Label]) -> Vec<RankedFdr> {
    let order = ranking_order(scores, labels);
    let mut ranked = vec![RankedFdr::default(); order.len()];
    let (mut targets, mut decoys) = (0, 0);
    for ix in order {
        match labels[ix] {
            Label::Target => targets += 1,
            Label::Decoy => decoys += 1,
        }
        ranked[ix] = RankedFdr {
            rank_t: targets,
            rank_d: decoys,
            fdr: match targets {
                0 => None,
                t => Some(decoys as f64 / t as f64),
            },
        };
    }
    ranked
}

/// Compute [`rank_fdr`] independently for every group of rows sharing a key.
/// Rows without a key are left undefined.
pub fn grouped_fdr<K>(keys: &[Option<K>], scores: &[f64], labels: &[Label]) -> Vec<Option<RankedFdr>>
where
    K: Hash + Eq + Sync,
{
    let mut groups: FnvHashMap<&K, Vec<usize>> = FnvHashMap::default();
    for (ix, key) in keys.iter().enumerate() {
        if let Some(key) = key {
            groups.entry(key).or_default().push(ix);
        }
    }

    let ranked = groups
        .into_par_iter()
        .flat_map_iter(|(_, rows)| {
            let group_scores = rows.iter().map(|&ix| scores[ix]).collect::<Vec<_>>();
            let group_labels = rows.iter().map(|&ix| labels[ix]).collect::<Vec<_>>();
            rows.into_iter()
                .zip(rank_fdr(&group_scores, &group_labels))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut out = vec![None; keys.len()];
    for (ix, fdr) in ranked {
        out[ix] = Some(fdr);
    }
    out
}
