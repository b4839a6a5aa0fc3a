//! Plot-ready series extracted from an experiment
//!
//! Nothing here renders. Each function returns the numbers and labels a
//! plotting front end needs, with missing values already dropped.

use crate::cycle::Cycle;
use crate::error::{CyclerError, Result};
use crate::experiment::Experiment;
use crate::filters::drop_missing;
use crate::types::{Channel, CAPACITY, CAPACITY_TOTAL, DIFFERENTIAL_CAPACITY, TIME_HOURS};
use crate::units::Unit;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One labeled x/y line
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Series {
    pub label: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Which half of each cycle a capacity plot shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CapacityDirection {
    Charge,
    Discharge,
}

impl CapacityDirection {
    pub const NAMES: [&'static str; 2] = ["charge", "discharge"];
}

impl fmt::Display for CapacityDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityDirection::Charge => f.write_str("charge"),
            CapacityDirection::Discharge => f.write_str("discharge"),
        }
    }
}

impl FromStr for CapacityDirection {
    type Err = CyclerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "charge" => Ok(CapacityDirection::Charge),
            "discharge" => Ok(CapacityDirection::Discharge),
            _ => Err(CyclerError::InvalidOption {
                option: "direction",
                value: s.to_string(),
                choices: Self::NAMES.to_vec(),
            }),
        }
    }
}

/// Capacity per cycle, with coulombic efficiency alongside
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CapacitySeries {
    pub direction: CapacityDirection,
    pub cycle_numbers: Vec<i64>,
    pub capacities: Vec<f64>,
    /// Discharge over charge capacity in percent
    pub efficiencies: Vec<f64>,
    pub unit: Unit,
}

fn axis_values<'a>(cycle: &'a Cycle, axis: &'static str, name: &str) -> Result<&'a [f64]> {
    cycle
        .data
        .values(name)
        .map_err(|_| CyclerError::AxisColumnNotFound {
            axis,
            name: name.to_string(),
            choices: cycle.data.column_names(),
        })
}

/// One series per cycle of `y` against `x`, labeled "Cycle N"
///
/// Rows missing either value are dropped per cycle.
pub fn cycle_series(experiment: &Experiment, x: &str, y: &str) -> Result<Vec<Series>> {
    experiment
        .cycles()
        .iter()
        .map(|cycle| {
            let xs = axis_values(cycle, "x", x)?;
            let ys = axis_values(cycle, "y", y)?;
            let (x, y) = drop_missing(xs, ys);
            Ok(Series {
                label: format!("Cycle {}", cycle.number),
                x,
                y,
            })
        })
        .collect()
}

/// Differential capacity dQ/dE against potential, one series per cycle
///
/// Uses the instrument's `d(Q-Qo)/dE` column when the table has one,
/// dropping non-finite entries. Otherwise it is the finite difference of `capacity` over potential;
/// the first row of a cycle and flat potential steps have no value and
/// are dropped.
pub fn differential_capacity_series(experiment: &Experiment) -> Result<Vec<Series>> {
    let potential = Channel::Potential.column_name();
    experiment
        .cycles()
        .iter()
        .map(|cycle| {
            let ys = axis_values(cycle, "y", potential)?;
            let xs = match cycle.data.values(DIFFERENTIAL_CAPACITY) {
                Ok(recorded) => recorded
                    .iter()
                    .map(|v| if v.is_finite() { *v } else { f64::NAN })
                    .collect(),
                Err(_) => finite_difference(axis_values(cycle, "x", CAPACITY)?, ys),
            };
            let (x, y) = drop_missing(&xs, ys);
            Ok(Series {
                label: format!("Cycle {}", cycle.number),
                x,
                y,
            })
        })
        .collect()
}

/// dq/de between consecutive rows; NaN where it is undefined
fn finite_difference(q: &[f64], e: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(q.len());
    if q.is_empty() {
        return out;
    }
    out.push(f64::NAN);
    for k in 1..q.len() {
        let slope = (q[k] - q[k - 1]) / (e[k] - e[k - 1]);
        out.push(if slope.is_finite() { slope } else { f64::NAN });
    }
    out
}

/// Charge or discharge capacity of every cycle
pub fn capacity_series(
    experiment: &Experiment,
    direction: CapacityDirection,
) -> Result<CapacitySeries> {
    let charge = experiment.charge_capacities()?;
    let discharge = experiment.discharge_capacities()?;
    let efficiencies = discharge
        .iter()
        .zip(&charge)
        .map(|(d, c)| d / c * 100.0)
        .collect();
    let capacities = match direction {
        CapacityDirection::Charge => charge,
        CapacityDirection::Discharge => discharge,
    };
    Ok(CapacitySeries {
        direction,
        cycle_numbers: experiment.cycles().iter().map(|c| c.number).collect(),
        capacities,
        efficiencies,
        unit: experiment.capacity_unit(),
    })
}

/// Human-readable axis title for a table column
///
/// Known columns get a physical name; anything else is returned as is,
/// with its unit appended when the name does not already carry one.
pub fn axis_label(column: &str, unit: Option<&Unit>) -> String {
    let unit_suffix = || unit.map(|u| format!(" / {u}")).unwrap_or_default();
    match column {
        c if c == Channel::Potential.column_name() => "E / V".to_string(),
        c if c == Channel::Current.column_name() => "I / mA".to_string(),
        c if c == Channel::Time.column_name() => "Time / s".to_string(),
        TIME_HOURS => "Time / h".to_string(),
        CAPACITY => format!("Capacity{}", unit_suffix()),
        CAPACITY_TOTAL => format!("Total capacity{}", unit_suffix()),
        other if other.contains('/') => other.to_string(),
        other => format!("{other}{}", unit_suffix()),
    }
}
