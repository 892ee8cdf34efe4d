//! Tab-separated tables read from disk, and parsers for the small text
//! artifacts passed between stages

use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use regex::Regex;
use shifts_core::{histogram::Bin, psm::Psm};

use crate::input::Columns;

#[derive(Debug)]
pub enum DataError {
    IO(PathBuf, std::io::Error),
    Csv(PathBuf, csv::Error),
    MissingColumn(PathBuf, String),
    InvalidValue {
        path: PathBuf,
        column: String,
        row: usize,
        value: String,
    },
    Empty(PathBuf),
    Malformed(PathBuf, String),
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::IO(p, e) => write!(f, "{}: {}", p.display(), e),
            DataError::Csv(p, e) => write!(f, "{}: {}", p.display(), e),
            DataError::MissingColumn(p, c) => {
                write!(f, "{}: missing required column `{}`", p.display(), c)
            }
            DataError::InvalidValue {
                path,
                column,
                row,
                value,
            } => write!(
                f,
                "{}: row {}, column `{}`: cannot parse `{}`",
                path.display(),
                row,
                column,
                value
            ),
            DataError::Empty(p) => write!(f, "{}: no data rows", p.display()),
            DataError::Malformed(p, what) => write!(f, "{}: {}", p.display(), what),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::IO(_, e) => Some(e),
            DataError::Csv(_, e) => Some(e),
            _ => None,
        }
    }
}

/// An in-memory TSV table. Cells are kept as text so that input columns are
/// written back untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Read a tab-separated file, ignoring the first `skip_lines` lines
    pub fn read<P: AsRef<Path>>(path: P, skip_lines: usize) -> Result<Table, DataError> {
        let path = path.as_ref().to_path_buf();
        let contents =
            std::fs::read_to_string(&path).map_err(|e| DataError::IO(path.clone(), e))?;
        let offset = contents
            .split_inclusive('\n')
            .take(skip_lines)
            .map(str::len)
            .sum::<usize>();

        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(contents[offset..].as_bytes());

        let headers = rdr
            .headers()
            .map_err(|e| DataError::Csv(path.clone(), e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| DataError::Csv(path.clone(), e))?;
            let mut row = record.iter().map(String::from).collect::<Vec<_>>();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }
        if rows.is_empty() {
            return Err(DataError::Empty(path));
        }
        log::trace!("read {} rows from {}", rows.len(), path.display());
        Ok(Table {
            path,
            headers,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Result<usize, DataError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::MissingColumn(self.path.clone(), name.into()))
    }

    /// Remove columns that are about to be recomputed
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep = self
            .headers
            .iter()
            .map(|h| !names.contains(&h.as_str()))
            .collect::<Vec<_>>();
        if keep.iter().all(|&k| k) {
            return;
        }
        let filter = |v: &mut Vec<String>| {
            let mut ix = 0;
            v.retain(|_| {
                ix += 1;
                keep[ix - 1]
            });
        };
        filter(&mut self.headers);
        self.rows.iter_mut().for_each(filter);
    }

    /// Append a column, one value per row
    pub fn push_column(&mut self, name: &str, values: Vec<String>) {
        self.headers.push(name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    /// Concatenate tables, taking the union of their headers in first-seen
    /// order. Missing cells are left empty.
    pub fn concat(tables: Vec<Table>) -> Table {
        let mut headers: Vec<String> = Vec::new();
        let mut index: FnvHashMap<String, usize> = FnvHashMap::default();
        for table in &tables {
            for h in &table.headers {
                if !index.contains_key(h) {
                    index.insert(h.clone(), headers.len());
                    headers.push(h.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(tables.iter().map(Table::len).sum());
        for table in &tables {
            let map = table.headers.iter().map(|h| index[h]).collect::<Vec<_>>();
            for row in &table.rows {
                let mut out = vec![String::new(); headers.len()];
                for (value, &ix) in row.iter().zip(&map) {
                    out[ix] = value.clone();
                }
                rows.push(out);
            }
        }

        Table {
            path: tables.first().map(|t| t.path.clone()).unwrap_or_default(),
            headers,
            rows,
        }
    }

    fn invalid(&self, column: &str, row: usize, value: &str) -> DataError {
        DataError::InvalidValue {
            path: self.path.clone(),
            column: column.into(),
            row,
            value: value.into(),
        }
    }

    /// Parse a numeric column. Empty cells and `NaN` are undefined.
    pub fn floats(&self, name: &str) -> Result<Vec<Option<f64>>, DataError> {
        let col = self.column(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(ix, row)| parse_optional(&row[col]).map_err(|_| self.invalid(name, ix, &row[col])))
            .collect()
    }

    pub fn strings(&self, name: &str) -> Result<Vec<&str>, DataError> {
        let col = self.column(name)?;
        Ok(self.rows.iter().map(|row| row[col].as_str()).collect())
    }

    pub fn psms(&self, columns: &Columns) -> Result<Vec<Psm>, DataError> {
        let sequence = self.column(&columns.sequence)?;
        let charge = self.column(&columns.charge)?;
        let exp_mz = self.column(&columns.exp_mz)?;
        let score = self.column(&columns.score)?;
        let protein = self.column(&columns.protein)?;

        self.rows
            .iter()
            .enumerate()
            .map(|(ix, row)| {
                Ok(Psm {
                    sequence: row[sequence].trim().into(),
                    charge: parse_charge(&row[charge])
                        .ok_or_else(|| self.invalid(&columns.charge, ix, &row[charge]))?,
                    exp_mz: parse_required(&row[exp_mz])
                        .ok_or_else(|| self.invalid(&columns.exp_mz, ix, &row[exp_mz]))?,
                    score: parse_required(&row[score])
                        .ok_or_else(|| self.invalid(&columns.score, ix, &row[score]))?,
                    protein: row[protein].clone(),
                })
            })
            .collect()
    }

    /// Rebuild histogram bins from a `DMHistogram.tsv` table
    pub fn bins(&self) -> Result<Vec<Bin>, DataError> {
        let re = interval_regex();
        let intervals = self.strings("bin")?;
        let raw_counts = self.strings("count")?;
        let smooth = self.floats("smooth_count")?;
        let slope1 = self.floats("slope1")?;
        let slope2 = self.floats("slope2")?;

        intervals
            .iter()
            .enumerate()
            .map(|(ix, interval)| {
                let (left, right) = parse_interval(&re, interval)
                    .ok_or_else(|| self.invalid("bin", ix, interval))?;
                let count = parse_required(raw_counts[ix])
                    .filter(|c| *c >= 0.0 && c.fract() == 0.0)
                    .ok_or_else(|| self.invalid("count", ix, raw_counts[ix]))?;
                Ok(Bin {
                    count: count as usize,
                    smooth_count: smooth[ix],
                    slope1: slope1[ix],
                    slope2: slope2[ix],
                    ..Bin::new(left, right)
                })
            })
            .collect()
    }
}

fn parse_optional(s: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    let x = s.parse::<f64>()?;
    Ok(Some(x).filter(|x| !x.is_nan()))
}

fn parse_required(s: &str) -> Option<f64> {
    parse_optional(s).ok().flatten()
}

/// Charges are sometimes written as floats (`2.0`)
fn parse_charge(s: &str) -> Option<i32> {
    let s = s.trim();
    match s.parse::<i32>() {
        Ok(z) => Some(z),
        Err(_) => s
            .parse::<f64>()
            .ok()
            .filter(|z| z.fract() == 0.0 && z.abs() < i32::MAX as f64)
            .map(|z| z as i32),
    }
}

pub fn interval_regex() -> Regex {
    Regex::new(r"^\s*[\(\[]\s*([^,\s]+)\s*,\s*([^\]\)\s]+)\s*[\]\)]\s*$")
        .expect("This is valid regex")
}

/// Parse an interval literal such as `(0.98, 0.99]`
pub fn parse_interval(re: &Regex, s: &str) -> Option<(f64, f64)> {
    let caps = re.captures(s)?;
    let left = caps.get(1)?.as_str().parse().ok()?;
    let right = caps.get(2)?.as_str().parse().ok()?;
    Some((left, right))
}

/// Read the FWHM value from a metadata file containing a `FWHM: <value>` line
pub fn read_fwhm<P: AsRef<Path>>(path: P) -> Result<f64, DataError> {
    let path = path.as_ref().to_path_buf();
    let contents = std::fs::read_to_string(&path).map_err(|e| DataError::IO(path.clone(), e))?;
    let re = Regex::new(r"FWHM:\s*([^\n]*)").expect("This is valid regex");
    let value = re
        .captures(&contents)
        .and_then(|c| c.get(1))
        .ok_or_else(|| DataError::Malformed(path.clone(), "no `FWHM:` line".into()))?;
    value
        .as_str()
        .trim()
        .parse::<f64>()
        .map_err(|_| DataError::Malformed(path, format!("invalid FWHM `{}`", value.as_str())))
}

/// Read an apex list: one delta mass per non-empty line
pub fn read_apex_list<P: AsRef<Path>>(path: P) -> Result<Vec<f64>, DataError> {
    let path = path.as_ref().to_path_buf();
    let contents = std::fs::read_to_string(&path).map_err(|e| DataError::IO(path.clone(), e))?;
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            l.parse::<f64>()
                .map_err(|_| DataError::Malformed(path.clone(), format!("invalid apex `{}`", l)))
        })
        .collect()
}
