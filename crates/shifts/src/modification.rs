use std::{collections::HashMap, fmt::Display, str::FromStr};

use serde::Serialize;

/// Where a fixed modification is applied
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModificationSite {
    NTerm,
    CTerm,
    Residue(u8),
}

impl Display for ModificationSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModificationSite::NTerm => f.write_str("nt"),
            ModificationSite::CTerm => f.write_str("ct"),
            ModificationSite::Residue(r) => write!(f, "{}", *r as char),
        }
    }
}

impl Serialize for ModificationSite {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvalidModification {
    Empty,
    InvalidResidue(char),
    TooLong(String),
}

impl FromStr for ModificationSite {
    type Err = InvalidModification;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("nt") {
            return Ok(ModificationSite::NTerm);
        }
        if s.eq_ignore_ascii_case("ct") {
            return Ok(ModificationSite::CTerm);
        }
        if s.len() > 1 {
            return Err(InvalidModification::TooLong(s.into()));
        }
        match s.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => {
                Ok(ModificationSite::Residue(c.to_ascii_uppercase() as u8))
            }
            Some(c) => Err(InvalidModification::InvalidResidue(c)),
            None => Err(InvalidModification::Empty),
        }
    }
}

/// Parse fixed modification keys, logging and skipping invalid entries
pub fn validate_fixed_mods(input: Option<HashMap<String, f64>>) -> HashMap<ModificationSite, f64> {
    let mut output = HashMap::new();
    if let Some(input) = input {
        for (s, mass) in input {
            match ModificationSite::from_str(&s) {
                Ok(m) => {
                    *output.entry(m).or_insert(0.0) += mass;
                }
                Err(InvalidModification::Empty) => {
                    log::error!("Skipping invalid modification string: empty")
                }
                Err(InvalidModification::InvalidResidue(c)) => {
                    log::error!(
                        "Skipping invalid modification string: unrecognized residue ({})",
                        c
                    )
                }
                Err(InvalidModification::TooLong(s)) => {
                    log::error!("Skipping invalid modification string: {} is too long", s)
                }
            }
        }
    }
    output
}
