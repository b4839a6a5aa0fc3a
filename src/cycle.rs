//! Grouping of the unified table into charge/discharge cycles

use crate::error::{CyclerError, Result};
use crate::types::{nan_max, nan_min, Channel, DataTable, CAPACITY};
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How the discharge capacity of a cycle is measured
///
/// Both take the maximum capacity of the cycle as the charged state and
/// differ in what counts as the discharged state:
/// - `NegativeCurrentMinimum`: the lowest capacity among rows with
///   negative current
/// - `LastValidSample`: the capacity at the last row that has one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DischargePolicy {
    NegativeCurrentMinimum,
    LastValidSample,
}

impl DischargePolicy {
    pub const NAMES: [&'static str; 2] = ["negative-current-minimum", "last-valid-sample"];
}

impl fmt::Display for DischargePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DischargePolicy::NegativeCurrentMinimum => f.write_str(Self::NAMES[0]),
            DischargePolicy::LastValidSample => f.write_str(Self::NAMES[1]),
        }
    }
}

impl FromStr for DischargePolicy {
    type Err = CyclerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "negative-current-minimum" => Ok(DischargePolicy::NegativeCurrentMinimum),
            "last-valid-sample" => Ok(DischargePolicy::LastValidSample),
            _ => Err(CyclerError::InvalidOption {
                option: "discharge policy",
                value: s.to_string(),
                choices: Self::NAMES.to_vec(),
            }),
        }
    }
}

/// Rows sharing one cycle index, in their original order
#[derive(Debug, Clone)]
pub struct Cycle {
    pub number: i64,
    pub data: DataTable,
    pub policy: DischargePolicy,
}

impl Cycle {
    fn capacity(&self) -> Result<&[f64]> {
        self.data.values(CAPACITY)
    }

    /// Max capacity minus capacity at the first valid row
    pub fn charge_capacity(&self) -> Result<f64> {
        let column = self.data.column(CAPACITY)?;
        match (column.max(), column.first_valid()) {
            (Some(max), Some((_, first))) => Ok(max - first),
            _ => Ok(f64::NAN),
        }
    }

    /// Max capacity minus the discharged state chosen by `policy`
    pub fn discharge_capacity(&self) -> Result<f64> {
        let capacity = self.capacity()?;
        let Some(max) = nan_max(capacity.iter().copied()) else {
            return Ok(f64::NAN);
        };
        let discharged = match self.policy {
            DischargePolicy::NegativeCurrentMinimum => {
                let current = self.data.channel_values(Channel::Current)?;
                nan_min(
                    capacity
                        .iter()
                        .zip(current)
                        .filter(|(_, i)| **i < 0.0)
                        .map(|(c, _)| *c),
                )
            }
            DischargePolicy::LastValidSample => {
                self.data.column(CAPACITY)?.last_valid().map(|(_, v)| v)
            }
        };
        Ok(discharged.map_or(f64::NAN, |d| max - d))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Group rows by cycle index, ascending; rows keep their relative order
///
/// Rows whose cycle index is missing belong to no cycle.
pub fn group_cycles(table: &DataTable, policy: DischargePolicy) -> Result<Vec<Cycle>> {
    let cycle_values = table.channel_values(Channel::Cycle)?;
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    let mut unassigned = 0usize;
    for (row, value) in cycle_values.iter().enumerate() {
        if value.is_finite() {
            groups.entry(value.round() as i64).or_default().push(row);
        } else {
            unassigned += 1;
        }
    }
    if unassigned > 0 {
        debug!("{} rows have no cycle number", unassigned);
    }
    Ok(groups
        .into_iter()
        .map(|(number, rows)| Cycle {
            number,
            data: table.take_rows(&rows),
            policy,
        })
        .collect())
}
