use serde::{Deserialize, Serialize};

/// Target/decoy label of a PSM. `Decoy` orders before `Target`, which is the
/// tie-break used when ranking PSMs with equal scores.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    Decoy,
    Target,
}

impl Label {
    pub fn from_protein(protein: &str, decoy_prefix: &str) -> Label {
        match protein.starts_with(decoy_prefix) {
            true => Label::Decoy,
            false => Label::Target,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Decoy => "Decoy",
            Label::Target => "Target",
        }
    }
}

impl Default for Label {
    fn default() -> Self {
        Label::Target
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A peptide-spectrum match, as read from a search engine result table
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Psm {
    pub sequence: String,
    pub charge: i32,
    /// Observed precursor m/z
    pub exp_mz: f64,
    pub score: f64,
    pub protein: String,
}
