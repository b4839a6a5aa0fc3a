use crate::error::{CyclerError, Result};
use crate::parser::FileFormat;
use crate::types::DataTable;
use crate::units::Quantity;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// File-level metadata collected while decoding
///
/// Every field is optional: formats differ in what they record, and a
/// missing value is never fatal at decode time.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileMetadata {
    /// Instrument family, e.g. "BioLogic EC-Lab"
    pub instrument: Option<String>,
    /// Layout generation or version string of the file itself
    pub format_version: Option<String>,
    pub technique: Option<String>,
    /// Instrument channel; the binary `.mpr` layout carries no such field
    pub channel: Option<String>,
    /// Experiment start time (already corrected where the file stores the end)
    pub start_time: Option<NaiveDateTime>,
    pub active_mass: Option<Quantity>,
    pub theoretical_capacity: Option<Quantity>,
    pub charge_current: Option<Quantity>,
    pub discharge_current: Option<Quantity>,
    /// Raw key/value pairs as found in the file
    pub entries: BTreeMap<String, String>,
}

impl FileMetadata {
    /// Charge and discharge currents, or `ReadCurrent` when the file has none
    pub fn currents(&self) -> Result<(Quantity, Quantity)> {
        match (&self.charge_current, &self.discharge_current) {
            (Some(charge), Some(discharge)) => Ok((charge.clone(), discharge.clone())),
            _ => Err(CyclerError::ReadCurrent(format!(
                "no charge/discharge current recorded{}",
                self.technique
                    .as_ref()
                    .map(|t| format!(" for technique '{t}'"))
                    .unwrap_or_default()
            ))),
        }
    }

    pub fn entry(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Fill fields left empty here from `other` (used when concatenating files)
    pub fn merge_missing(&mut self, other: &FileMetadata) {
        fn fill<T: Clone>(ours: &mut Option<T>, theirs: &Option<T>) {
            if ours.is_none() {
                ours.clone_from(theirs);
            }
        }
        fill(&mut self.instrument, &other.instrument);
        fill(&mut self.format_version, &other.format_version);
        fill(&mut self.technique, &other.technique);
        fill(&mut self.channel, &other.channel);
        fill(&mut self.active_mass, &other.active_mass);
        fill(&mut self.theoretical_capacity, &other.theoretical_capacity);
        fill(&mut self.charge_current, &other.charge_current);
        fill(&mut self.discharge_current, &other.discharge_current);
        self.start_time = match (self.start_time, other.start_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        for (key, value) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// Result of decoding one file: its table, metadata and detected format
#[derive(Debug, Clone)]
pub struct DecodedFile {
    pub format: FileFormat,
    pub table: DataTable,
    pub metadata: FileMetadata,
}
