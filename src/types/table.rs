use crate::error::{CyclerError, Result};
use crate::units::Unit;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Specific (or raw) capacity derived from the net charge column
pub const CAPACITY: &str = "capacity";
/// Capacity from the integral of |current|
pub const CAPACITY_TOTAL: &str = "capacity_total";
/// Elapsed time in hours
pub const TIME_HOURS: &str = "time/h";
/// Differential capacity as EC-Lab records it
pub const DIFFERENTIAL_CAPACITY: &str = "d(Q-Qo)/dE/mA.h/V";

/// Canonical channels every assembled table is checked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Channel {
    Time,
    Current,
    Potential,
    Charge,
    Cycle,
    Step,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Time,
        Channel::Current,
        Channel::Potential,
        Channel::Charge,
        Channel::Cycle,
        Channel::Step,
    ];

    pub fn column_name(&self) -> &'static str {
        match self {
            Channel::Time => "time/s",
            Channel::Current => "current/mA",
            Channel::Potential => "potential/V",
            Channel::Charge => "charge/mA.h",
            Channel::Cycle => "cycle",
            Channel::Step => "step",
        }
    }

    /// Unit the canonical column is stored in
    pub fn unit(&self) -> Unit {
        match self {
            Channel::Time => Unit::second(),
            Channel::Current => Unit::milliampere(),
            Channel::Potential => Unit::volt(),
            Channel::Charge => Unit::milliampere_hour(),
            Channel::Cycle | Channel::Step => Unit::dimensionless(),
        }
    }
}

/// Where a canonical column came from
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ColumnSource {
    /// Read from the named source column
    Present(String),
    /// Computed during assembly; the string says from what
    Synthesized(String),
    Absent,
}

impl ColumnSource {
    pub fn is_available(&self) -> bool {
        !matches!(self, ColumnSource::Absent)
    }
}

/// One named numeric column; missing values are NaN
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Column {
    pub name: String,
    pub unit: Option<Unit>,
    pub values: Vec<f64>,
}

impl Column {
    pub fn new(name: impl Into<String>, unit: Option<Unit>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            unit,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First non-NaN value and its position
    pub fn first_valid(&self) -> Option<(usize, f64)> {
        self.values
            .iter()
            .copied()
            .enumerate()
            .find(|(_, v)| !v.is_nan())
    }

    /// Last non-NaN value and its position
    pub fn last_valid(&self) -> Option<(usize, f64)> {
        self.values
            .iter()
            .copied()
            .enumerate()
            .rev()
            .find(|(_, v)| !v.is_nan())
    }

    pub fn max(&self) -> Option<f64> {
        nan_max(self.values.iter().copied())
    }

    pub fn min(&self) -> Option<f64> {
        nan_min(self.values.iter().copied())
    }
}

/// Maximum ignoring NaN, None when nothing is valid
pub fn nan_max(values: impl Iterator<Item = f64>) -> Option<f64> {
    values
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
}

/// Minimum ignoring NaN, None when nothing is valid
pub fn nan_min(values: impl Iterator<Item = f64>) -> Option<f64> {
    values
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.min(v))))
}

/// Unified time-series table
///
/// Rows are labeled by `index` (record numbers from the source where the
/// format has them, otherwise positions). Row labels survive downsampling
/// and concatenation unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    index: Vec<usize>,
    columns: Vec<Column>,
    timestamps: Option<Vec<NaiveDateTime>>,
    sources: BTreeMap<Channel, ColumnSource>,
}

impl DataTable {
    /// Empty table with `len` rows labeled 0..len
    pub fn with_len(len: usize) -> Self {
        Self {
            index: (0..len).collect(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[usize] {
        &self.index
    }

    pub fn set_index(&mut self, index: Vec<usize>) -> Result<()> {
        check_len(self.len(), index.len())?;
        self.index = index;
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CyclerError::ColumnNotFound {
                name: name.to_string(),
                choices: self.column_names(),
            })
    }

    pub fn values(&self, name: &str) -> Result<&[f64]> {
        Ok(&self.column(name)?.values)
    }

    pub fn channel(&self, channel: Channel) -> Option<&Column> {
        self.column(channel.column_name()).ok()
    }

    pub fn channel_values(&self, channel: Channel) -> Result<&[f64]> {
        self.values(channel.column_name())
    }

    pub fn source(&self, channel: Channel) -> &ColumnSource {
        self.sources.get(&channel).unwrap_or(&ColumnSource::Absent)
    }

    pub fn sources(&self) -> &BTreeMap<Channel, ColumnSource> {
        &self.sources
    }

    pub fn set_source(&mut self, channel: Channel, source: ColumnSource) {
        self.sources.insert(channel, source);
    }

    /// Insert a column, replacing any existing column of the same name
    pub fn insert_column(&mut self, column: Column) -> Result<()> {
        check_len(self.len(), column.len())?;
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let pos = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(pos))
    }

    /// Turn the first present candidate column into the canonical column
    /// for `channel`, converting it to the channel unit.
    ///
    /// Source columns without a unit are taken to already be in the
    /// channel unit. Returns false when no candidate is present; the
    /// caller then decides between synthesizing and leaving it absent.
    pub fn adopt(&mut self, channel: Channel, candidates: &[&str]) -> Result<bool> {
        let Some(pos) = candidates
            .iter()
            .find_map(|name| self.columns.iter().position(|c| c.name == *name))
        else {
            return Ok(false);
        };
        let source = self.columns[pos].name.clone();
        let target = channel.unit();
        let factor = match &self.columns[pos].unit {
            Some(unit) => unit.conversion_factor(&target)?,
            None => 1.0,
        };
        let column = &mut self.columns[pos];
        if factor != 1.0 {
            column.values.iter_mut().for_each(|v| *v *= factor);
        }
        column.name = channel.column_name().to_string();
        column.unit = Some(target);
        let name = column.name.clone();
        // A stale canonical column from an earlier pass would now be shadowed
        if let Some(dup) = self
            .columns
            .iter()
            .enumerate()
            .position(|(i, c)| i != pos && c.name == name)
        {
            self.columns.remove(dup);
        }
        self.sources.insert(channel, ColumnSource::Present(source));
        Ok(true)
    }

    /// Store computed values as the canonical column for `channel`
    pub fn synthesize(
        &mut self,
        channel: Channel,
        values: Vec<f64>,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.insert_column(Column::new(
            channel.column_name(),
            Some(channel.unit()),
            values,
        ))?;
        self.sources
            .insert(channel, ColumnSource::Synthesized(reason.into()));
        Ok(())
    }

    pub fn timestamps(&self) -> Option<&[NaiveDateTime]> {
        self.timestamps.as_deref()
    }

    pub fn set_timestamps(&mut self, timestamps: Vec<NaiveDateTime>) -> Result<()> {
        check_len(self.len(), timestamps.len())?;
        self.timestamps = Some(timestamps);
        Ok(())
    }

    /// New table holding the given rows, in the given order
    pub fn take_rows(&self, rows: &[usize]) -> DataTable {
        DataTable {
            index: rows.iter().map(|&r| self.index[r]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| {
                    let values = rows.iter().map(|&r| c.values[r]).collect();
                    Column::new(c.name.clone(), c.unit.clone(), values)
                })
                .collect(),
            timestamps: self
                .timestamps
                .as_ref()
                .map(|ts| rows.iter().map(|&r| ts[r]).collect()),
            sources: self.sources.clone(),
        }
    }

    /// Append the rows of `other`; columns missing on either side are NaN-filled
    ///
    /// Absolute timestamps survive only if both tables carry them.
    pub fn append(&mut self, other: DataTable) -> Result<()> {
        let (own_len, other_len) = (self.len(), other.len());
        for column in &mut self.columns {
            match other.columns.iter().find(|c| c.name == column.name) {
                Some(theirs) => {
                    let factor = match (&theirs.unit, &column.unit) {
                        (Some(from), Some(to)) => from.conversion_factor(to)?,
                        _ => 1.0,
                    };
                    column
                        .values
                        .extend(theirs.values.iter().map(|v| v * factor));
                }
                None => column
                    .values
                    .extend(std::iter::repeat(f64::NAN).take(other_len)),
            }
        }
        for theirs in other.columns {
            if !self.has_column(&theirs.name) {
                let mut values = vec![f64::NAN; own_len];
                values.extend(theirs.values);
                self.columns.push(Column::new(theirs.name, theirs.unit, values));
            }
        }
        self.timestamps = match (self.timestamps.take(), other.timestamps) {
            (Some(mut ours), Some(theirs)) => {
                ours.extend(theirs);
                Some(ours)
            }
            _ => None,
        };
        for (channel, source) in other.sources {
            if !self.source(channel).is_available() {
                self.sources.insert(channel, source);
            }
        }
        self.index.extend(other.index);
        Ok(())
    }

    /// Stable sort of all rows by absolute timestamp; no-op without timestamps
    pub fn sort_by_timestamp(&mut self) {
        let Some(ts) = &self.timestamps else {
            return;
        };
        let mut order: Vec<usize> = (0..ts.len()).collect();
        order.sort_by_key(|&i| ts[i]);
        if order.iter().enumerate().all(|(pos, &i)| pos == i) {
            return;
        }
        *self = self.take_rows(&order);
    }

    /// All column values of one row, keyed by column name
    pub fn row(&self, row: usize) -> Option<BTreeMap<String, f64>> {
        if row >= self.len() {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| (c.name.clone(), c.values[row]))
                .collect(),
        )
    }
}

fn check_len(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(CyclerError::LengthMismatch { expected, found });
    }
    Ok(())
}
