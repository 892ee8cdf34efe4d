use std::collections::HashMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::modification::{validate_fixed_mods, ModificationSite};

pub const PROTON: f64 = 1.007276467;
pub const HYDROGEN: f64 = 1.007825032;
pub const OXYGEN: f64 = 15.99491462;

pub const VALID_AA: [u8; 22] = [
    b'A', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'K', b'L', b'M', b'N', b'P', b'Q', b'R', b'S',
    b'T', b'V', b'W', b'Y', b'U', b'O',
];

/// Monoisotopic residue mass of a standard amino acid (case-insensitive)
pub fn monoisotopic(aa: u8) -> Option<f64> {
    let mass = match aa.to_ascii_uppercase() {
        b'A' => 71.037114,
        b'R' => 156.101111,
        b'N' => 114.042927,
        b'D' => 115.026943,
        b'C' => 103.009185,
        b'E' => 129.042593,
        b'Q' => 128.058578,
        b'G' => 57.021464,
        b'H' => 137.058912,
        b'I' => 113.084064,
        b'L' => 113.084064,
        b'K' => 128.094963,
        b'M' => 131.040485,
        b'F' => 147.068414,
        b'P' => 97.052764,
        b'S' => 87.032028,
        b'T' => 101.047679,
        b'W' => 186.079313,
        b'Y' => 163.06332,
        b'V' => 99.068414,
        b'U' => 150.95363,
        b'O' => 237.147727,
        _ => return None,
    };
    Some(mass)
}

#[derive(Clone, Debug, PartialEq)]
pub enum MassError {
    EmptySequence,
    InvalidCharge(i32),
    UnknownResidue(char),
    MalformedModification(String),
}

impl std::fmt::Display for MassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MassError::EmptySequence => f.write_str("empty peptide sequence"),
            MassError::InvalidCharge(z) => write!(f, "invalid precursor charge: {}", z),
            MassError::UnknownResidue(c) => write!(f, "residue `{}` has no mass table entry", c),
            MassError::MalformedModification(s) => write!(f, "malformed modification in `{}`", s),
        }
    }
}

impl std::error::Error for MassError {}

#[derive(Clone, Debug, PartialEq, PartialOrd, Serialize)]
pub enum Residue {
    // Standard amino acid residue
    Just(u8),
    // Amino acid residue carrying an embedded mass annotation, e.g. `M[+15.9949]`
    Mod(u8, f64),
}

impl Residue {
    pub fn aa(&self) -> u8 {
        match self {
            Residue::Just(c) | Residue::Mod(c, _) => *c,
        }
    }

    /// Embedded (annotated) mass carried by this residue
    pub fn delta(&self) -> f64 {
        match self {
            Residue::Just(_) => 0.0,
            Residue::Mod(_, m) => *m,
        }
    }
}

impl std::fmt::Display for Residue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Residue::Just(c) => f.write_char(*c as char),
            Residue::Mod(c, m) => {
                if m.is_sign_positive() {
                    write!(f, "{}[+{}]", *c as char, m)
                } else {
                    write!(f, "{}[{}]", *c as char, m)
                }
            }
        }
    }
}

/// A peptide sequence split into residues, with any bracketed mass
/// annotations pulled out of the residue letters.
#[derive(Clone, Debug, PartialEq)]
pub struct Peptidoform {
    pub nterm: Option<f64>,
    pub residues: Vec<Residue>,
}

impl Peptidoform {
    pub fn parse(sequence: &str) -> Result<Self, MassError> {
        let malformed = || MassError::MalformedModification(sequence.into());
        let mut nterm: Option<f64> = None;
        let mut residues: Vec<Residue> = Vec::with_capacity(sequence.len());

        let mut rest = sequence.trim();
        while let Some(ch) = rest.chars().next() {
            if ch == '[' {
                let close = rest.find(']').ok_or_else(malformed)?;
                let delta = rest[1..close]
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| malformed())?;
                match residues.pop() {
                    Some(last) => residues.push(Residue::Mod(last.aa(), last.delta() + delta)),
                    None => *nterm.get_or_insert(0.0) += delta,
                }
                rest = &rest[close + 1..];
            } else {
                if ch == ']' || !ch.is_ascii() {
                    return Err(malformed());
                }
                residues.push(Residue::Just(ch as u8));
                rest = &rest[1..];
            }
        }

        if residues.is_empty() {
            return Err(MassError::EmptySequence);
        }
        Ok(Peptidoform { nterm, residues })
    }

    /// Sum of all embedded mass annotations
    pub fn embedded(&self) -> f64 {
        self.nterm.unwrap_or_default() + self.residues.iter().map(Residue::delta).sum::<f64>()
    }

    /// Residue letters only, without annotations
    pub fn stripped(&self) -> String {
        self.residues.iter().map(|r| r.aa() as char).collect()
    }
}

impl std::fmt::Display for Peptidoform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(m) = self.nterm {
            if m.is_sign_positive() {
                write!(f, "[+{}]", m)?;
            } else {
                write!(f, "[{}]", m)?;
            }
        }
        for r in &self.residues {
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}

/// Theoretical precursor masses for a sequence at a given charge
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Theoretical {
    pub mz: f64,
    pub mh: f64,
    /// Mass annotated inside the sequence, not included in `mz`/`mh`
    pub embedded: f64,
    /// Residues that had no mass table entry, and contributed nothing
    pub unresolved: Vec<char>,
}

/// Amino acid masses, fixed modifications and elemental constants used to
/// compute theoretical precursor masses. Read-only once built.
#[derive(Clone, Debug, Serialize)]
pub struct MassModel {
    residues: HashMap<char, f64>,
    fixed_mods: HashMap<ModificationSite, f64>,
    pub proton: f64,
    pub hydrogen: f64,
    pub oxygen: f64,
}

impl Default for MassModel {
    fn default() -> Self {
        MassBuilder::default().make_model()
    }
}

impl MassModel {
    pub fn new(
        residues: HashMap<char, f64>,
        fixed_mods: HashMap<ModificationSite, f64>,
        proton: f64,
        hydrogen: f64,
        oxygen: f64,
    ) -> Self {
        let residues = residues
            .into_iter()
            .map(|(aa, mass)| (aa.to_ascii_uppercase(), mass))
            .collect();
        Self {
            residues,
            fixed_mods,
            proton,
            hydrogen,
            oxygen,
        }
    }

    pub fn residue(&self, aa: u8) -> Result<f64, MassError> {
        self.residues
            .get(&(aa.to_ascii_uppercase() as char))
            .copied()
            .ok_or(MassError::UnknownResidue(aa as char))
    }

    fn fixed(&self, site: ModificationSite) -> f64 {
        self.fixed_mods.get(&site).copied().unwrap_or_default()
    }

    /// Compute theoretical m/z and MH for `sequence` at `charge`.
    ///
    /// Residues missing from the mass table contribute nothing and are listed
    /// in [`Theoretical::unresolved`].
    pub fn theoretical(&self, sequence: &str, charge: i32) -> Result<Theoretical, MassError> {
        if charge <= 0 {
            return Err(MassError::InvalidCharge(charge));
        }
        let peptide = Peptidoform::parse(sequence)?;

        let mut total = 2.0 * self.hydrogen
            + self.oxygen
            + charge as f64 * self.proton
            + self.fixed(ModificationSite::NTerm)
            + self.fixed(ModificationSite::CTerm);

        let mut unresolved = Vec::new();
        for residue in &peptide.residues {
            let aa = residue.aa().to_ascii_uppercase();
            match self.residue(aa) {
                Ok(mass) => total += mass,
                Err(_) => unresolved.push(aa as char),
            }
            total += self.fixed(ModificationSite::Residue(aa));
        }

        Ok(Theoretical {
            mz: total / charge as f64,
            mh: total - (charge - 1) as f64 * self.proton,
            embedded: peptide.embedded(),
            unresolved,
        })
    }

    /// Convert an m/z value into a singly protonated mass
    pub fn mz_to_mh(&self, mz: f64, charge: i32) -> f64 {
        mz * charge as f64 - (charge - 1) as f64 * self.proton
    }
}

#[derive(Deserialize, Serialize, Default, Debug, Clone)]
/// Mass table overrides, deserialized from the parameter file
pub struct MassBuilder {
    /// Residue masses, replacing the default table entry for each given letter
    pub residues: Option<HashMap<char, f64>>,
    /// Fixed modifications: residue letter, or `nt` / `ct` for the termini
    pub fixed_mods: Option<HashMap<String, f64>>,
    pub proton: Option<f64>,
    pub hydrogen: Option<f64>,
    pub oxygen: Option<f64>,
}

impl MassBuilder {
    pub fn make_model(self) -> MassModel {
        let mut residues: HashMap<char, f64> = VALID_AA
            .iter()
            .filter_map(|&aa| monoisotopic(aa).map(|m| (aa as char, m)))
            .collect();
        if let Some(overrides) = self.residues {
            for (aa, mass) in overrides {
                residues.insert(aa.to_ascii_uppercase(), mass);
            }
        }
        MassModel::new(
            residues,
            validate_fixed_mods(self.fixed_mods),
            self.proton.unwrap_or(PROTON),
            self.hydrogen.unwrap_or(HYDROGEN),
            self.oxygen.unwrap_or(OXYGEN),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-6
    }

    #[test]
    fn smoke() {
        for ch in VALID_AA {
            assert!(monoisotopic(ch).unwrap() > 0.0);
            assert_eq!(monoisotopic(ch), monoisotopic(ch.to_ascii_lowercase()));
        }
        assert_eq!(monoisotopic(b'B'), None);
    }

    #[test]
    fn parse_peptidoform() {
        let p = Peptidoform::parse("PEM[+15.9949]K").unwrap();
        assert_eq!(p.stripped(), "PEMK");
        assert_eq!(p.residues[2], Residue::Mod(b'M', 15.9949));
        assert!(close(p.embedded(), 15.9949));

        let p = Peptidoform::parse("[42.0106]AC[-1.0]").unwrap();
        assert_eq!(p.nterm, Some(42.0106));
        assert!(close(p.embedded(), 41.0106));
        assert_eq!(p.to_string(), "[+42.0106]AC[-1]");

        assert_eq!(
            Peptidoform::parse("PEM[+15.99K"),
            Err(MassError::MalformedModification("PEM[+15.99K".into()))
        );
        assert_eq!(Peptidoform::parse(""), Err(MassError::EmptySequence));
        assert_eq!(
            Peptidoform::parse("[+1.0]"),
            Err(MassError::EmptySequence)
        );
    }

    #[test]
    fn theoretical_mass() {
        let model = MassModel::default();
        // PEPTIDE, [M+H]+ = 800.367241
        let t = model.theoretical("PEPTIDE", 1).unwrap();
        assert!((t.mh - 800.367241).abs() < 1e-5, "{}", t.mh);
        assert!(close(t.mz, t.mh));

        let t2 = model.theoretical("peptide", 2).unwrap();
        assert!(close(t2.mh, t.mh));
        assert!(close(t2.mz, (t.mh + PROTON) / 2.0));
        assert!(close(model.mz_to_mh(t2.mz, 2), t2.mh));
        assert!(t2.unresolved.is_empty());
    }

    #[test]
    fn embedded_mass_is_not_summed() {
        let model = MassModel::default();
        let plain = model.theoretical("PEPTMIDE", 2).unwrap();
        let modified = model.theoretical("PEPTM[+15.9949]IDE", 2).unwrap();
        assert_eq!(plain.mz, modified.mz);
        assert!(close(modified.embedded, 15.9949));
    }

    #[test]
    fn fixed_modifications() {
        let mut mods = HashMap::new();
        mods.insert("C".to_string(), 57.021464);
        mods.insert("nt".to_string(), 1.0);
        let model = MassBuilder {
            fixed_mods: Some(mods),
            ..Default::default()
        }
        .make_model();
        let base = MassModel::default().theoretical("ACCK", 1).unwrap();
        let t = model.theoretical("ACCK", 1).unwrap();
        assert!(close(t.mh - base.mh, 2.0 * 57.021464 + 1.0));
    }

    #[test]
    fn unresolved_residues_contribute_nothing() {
        let model = MassModel::default();
        let t = model.theoretical("PEPXTIDE", 1).unwrap();
        let base = model.theoretical("PEPTIDE", 1).unwrap();
        assert_eq!(t.unresolved, vec!['X']);
        assert!(close(t.mh, base.mh));
        assert_eq!(model.residue(b'x'), Err(MassError::UnknownResidue('x')));
    }

    #[test]
    fn invalid_charge() {
        let model = MassModel::default();
        assert_eq!(
            model.theoretical("PEPTIDE", 0),
            Err(MassError::InvalidCharge(0))
        );
    }
}
