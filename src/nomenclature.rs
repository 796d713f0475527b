//! Canonical variable names and their provider-specific equivalents.
//!
//! Each provider ships a CSV table with the columns
//! `name, units, provider_name, short_name, code, flag1, flag2[, note]`:
//!
//! - `name`: canonical, provider independent name
//! - `units`: units after standardization (`-`, `~` or empty when dimensionless)
//! - `provider_name`: identifier used in the provider request (CDS variable, MERRA-2 product)
//! - `short_name`: variable name in the downloaded file; a leading `#` marks a computable
//! - `code`: provider parameter code, `-` when absent
//! - `flag1`/`flag2`: available on single levels / on pressure or model levels
//!
//! Lines starting with `#` are comments.

use anyhow::{Context, Result, bail};
use std::io::Read;
use std::path::Path;

use crate::error::AncillaryError;

const ERA5_CSV: &str = include_str!("../data/era5.csv");
const CAMS_CSV: &str = include_str!("../data/cams.csv");
const MERRA2_CSV: &str = include_str!("../data/merra2.csv");

#[derive(Debug, Clone, PartialEq)]
pub struct NomenclatureEntry {
    pub name: String,
    /// `None` for dimensionless quantities.
    pub units: Option<String>,
    pub provider_name: Option<String>,
    pub short_name: String,
    pub code: Option<u32>,
    pub single_level: bool,
    pub multi_level: bool,
    pub note: Option<String>,
}

impl NomenclatureEntry {
    pub fn is_computable(&self) -> bool {
        self.short_name.starts_with('#')
    }
}

#[derive(Debug, Clone)]
pub struct Nomenclature {
    provider: String,
    entries: Vec<NomenclatureEntry>,
}

impl Nomenclature {
    /// Parses a table from CSV text; `source_name` only labels errors.
    pub fn parse<R: Read>(provider: &str, source_name: &str, reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut entries: Vec<NomenclatureEntry> = Vec::new();
        for record in rdr.records() {
            let record =
                record.with_context(|| format!("failed to read nomenclature {source_name}"))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let err = |message: String| AncillaryError::Nomenclature {
                source_name: source_name.to_string(),
                line,
                message,
            };

            if record.len() < 7 {
                return Err(err(format!("expected at least 7 columns, got {}", record.len())).into());
            }
            let field = |i: usize| record.get(i).unwrap_or("").trim();
            let optional = |i: usize| match field(i) {
                "" | "-" => None,
                v => Some(v.to_string()),
            };

            let name = field(0);
            if name.is_empty() || field(3).is_empty() {
                return Err(err("empty name or short_name".to_string()).into());
            }
            let code = match optional(4) {
                Some(c) => Some(c.parse::<u32>().map_err(|_| err(format!("invalid code '{c}'")))?),
                None => None,
            };
            let units = match field(1) {
                "" | "-" | "~" => None,
                u => Some(u.to_string()),
            };

            let entry = NomenclatureEntry {
                name: name.to_string(),
                units,
                provider_name: optional(2),
                short_name: field(3).to_string(),
                code,
                single_level: parse_flag(field(5)).ok_or_else(|| err(format!("invalid flag '{}'", field(5))))?,
                multi_level: parse_flag(field(6)).ok_or_else(|| err(format!("invalid flag '{}'", field(6))))?,
                note: optional(7),
            };

            if let Some(dup) = entries
                .iter()
                .find(|e| e.name == entry.name || e.short_name == entry.short_name)
            {
                return Err(err(format!(
                    "{} / {} duplicates {} / {}",
                    entry.name, entry.short_name, dup.name, dup.short_name
                ))
                .into());
            }
            entries.push(entry);
        }

        Ok(Nomenclature {
            provider: provider.to_string(),
            entries,
        })
    }

    /// The table shipped with the crate for `provider` (`ERA5`, `CAMS` or `MERRA2`).
    pub fn builtin(provider: &str) -> Result<Self> {
        let text = match provider.to_ascii_uppercase().as_str() {
            "ERA5" => ERA5_CSV,
            "CAMS" => CAMS_CSV,
            "MERRA2" => MERRA2_CSV,
            other => bail!("no builtin nomenclature for provider {other}"),
        };
        Self::parse(provider, &format!("{}.csv", provider.to_ascii_lowercase()), text.as_bytes())
    }

    pub fn from_path(provider: &str, path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open nomenclature file {}", path.display()))?;
        Self::parse(provider, &path.display().to_string(), file)
    }

    /// Rows of the user file at `path` replace rows sharing their canonical
    /// name or short name; other rows are appended.
    pub fn with_override(mut self, path: &Path) -> Result<Self> {
        let user = Self::from_path(&self.provider, path)?;
        for entry in user.entries {
            self.entries
                .retain(|e| e.name != entry.name && e.short_name != entry.short_name);
            self.entries.push(entry);
        }
        Ok(self)
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn entries(&self) -> impl Iterator<Item = &NomenclatureEntry> {
        self.entries.iter()
    }

    fn unknown(&self, name: &str) -> AncillaryError {
        AncillaryError::UnknownVariable {
            provider: self.provider.clone(),
            name: name.to_string(),
        }
    }

    /// Looks up a canonical name.
    pub fn entry(&self, canonical: &str) -> Result<&NomenclatureEntry, AncillaryError> {
        self.entries
            .iter()
            .find(|e| e.name == canonical)
            .ok_or_else(|| self.unknown(canonical))
    }

    pub fn entry_by_short_name(&self, short: &str) -> Result<&NomenclatureEntry, AncillaryError> {
        self.entries
            .iter()
            .find(|e| e.short_name == short)
            .ok_or_else(|| self.unknown(short))
    }

    pub fn canonical_name(&self, short: &str) -> Result<&str, AncillaryError> {
        self.entry_by_short_name(short).map(|e| e.name.as_str())
    }

    /// Checks the units found in a file against the table.
    pub fn verify_units(&self, short: &str, actual: Option<&str>) -> Result<(), AncillaryError> {
        let entry = self.entry_by_short_name(short)?;
        let expected = entry.units.as_deref().map(normalize_units).unwrap_or_default();
        let found = actual.map(normalize_units).unwrap_or_default();
        if expected.eq_ignore_ascii_case(&found) {
            Ok(())
        } else {
            Err(AncillaryError::UnitMismatch {
                name: short.to_string(),
                expected: entry.units.clone().unwrap_or_else(|| "dimensionless".to_string()),
                actual: actual.unwrap_or("").to_string(),
            })
        }
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "x" => Some(true),
        "0" | "false" | "no" | "n" | "" => Some(false),
        _ => None,
    }
}

/// Canonical spelling of a units string: `**` dropped (`kg m**-2` is `kg m-2`),
/// whitespace collapsed, every dimensionless spelling mapped to `""`.
pub fn normalize_units(units: &str) -> String {
    let collapsed = units
        .replace("**", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    match collapsed.to_ascii_lowercase().as_str() {
        "" | "-" | "~" | "1" | "(0 - 1)" | "0-1" | "dimensionless" | "none" => String::new(),
        _ => collapsed,
    }
}
