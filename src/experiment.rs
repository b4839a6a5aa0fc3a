//! One galvanostatic run, possibly spread over several files
//!
//! Loading decodes every file, concatenates the tables, caps the row
//! count and derives the capacity columns before grouping rows into
//! cycles. The experiment owns its table and cycles; nothing is shared.

use crate::cycle::{group_cycles, Cycle, DischargePolicy};
use crate::error::{CyclerError, Result};
use crate::filters::{closest_row, downsample};
use crate::integrate::calculate_capacity;
use crate::parser::{decode_file, FileFormat};
use crate::types::*;
use crate::units::{Quantity, Unit};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Row cap applied when the caller does not choose one
pub const DEFAULT_NMAX: usize = 5000;

/// Per-load configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Active material mass; overrides whatever the file records
    pub mass: Option<Quantity>,
    /// Row cap for downsampling; `None` keeps every row
    pub nmax: Option<usize>,
    /// Skip detection and decode every file as this format
    pub format: Option<FileFormat>,
    /// Discharge capacity definition; defaults to the one for the format
    pub discharge_policy: Option<DischargePolicy>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mass: None,
            nmax: Some(DEFAULT_NMAX),
            format: None,
            discharge_policy: None,
        }
    }
}

/// Electrochemical experiment cycling on one channel
#[derive(Debug, Clone)]
pub struct Experiment {
    sources: Vec<PathBuf>,
    format: FileFormat,
    metadata: FileMetadata,
    mass: Option<Quantity>,
    table: DataTable,
    cycles: Vec<Cycle>,
    policy: DischargePolicy,
}

impl Experiment {
    /// Decode `paths` in order and treat them as one continuous run
    pub fn load<P: AsRef<Path>>(paths: &[P], options: &LoadOptions) -> Result<Experiment> {
        let started = Instant::now();
        let mut decoded = Vec::with_capacity(paths.len());
        for path in paths {
            decoded.push(decode_file(path.as_ref(), options.format)?);
        }
        let mut experiment = Self::from_decoded(decoded, options)?;
        experiment.sources = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        info!(
            "Loaded {} datapoints from {} in {:.3} seconds",
            experiment.table.len(),
            experiment.source_names(),
            started.elapsed().as_secs_f64()
        );
        Ok(experiment)
    }

    /// Build an experiment from already decoded files
    pub fn from_decoded(files: Vec<DecodedFile>, options: &LoadOptions) -> Result<Experiment> {
        let mut files = files.into_iter();
        let Some(first) = files.next() else {
            return Err(CyclerError::FileFormat("no input files given".to_string()));
        };
        let format = first.format;
        let mut metadata = first.metadata;
        let mut table = first.table;
        let mut count = 1usize;
        for file in files {
            if file.format != format {
                warn!(
                    "Concatenating {} data onto a {} run; using the {} conventions",
                    file.format, format, format
                );
            }
            metadata.merge_missing(&file.metadata);
            table.append(file.table)?;
            count += 1;
        }
        if count > 1 {
            stitch_time_axis(&mut table)?;
        }

        let table = downsample(table, options.nmax);

        let mass = match options.mass.as_ref().or(metadata.active_mass.as_ref()) {
            Some(mass) => Some(mass.to(&Unit::gram())?),
            None => None,
        };
        let mut experiment = Experiment {
            sources: Vec::new(),
            format,
            metadata,
            mass,
            table,
            cycles: Vec::new(),
            policy: options
                .discharge_policy
                .unwrap_or_else(|| format.default_discharge_policy()),
        };
        experiment.derive_columns()?;
        experiment.cycles = group_cycles(&experiment.table, experiment.policy)?;
        debug!(
            "{} cycles, discharge policy {}",
            experiment.cycles.len(),
            experiment.policy
        );
        Ok(experiment)
    }

    /// Add `capacity`, `capacity_total` and `time/h` to the table
    fn derive_columns(&mut self) -> Result<()> {
        let len = self.table.len();
        let charge_unit = Channel::Charge.unit();
        let time = self.table.channel(Channel::Time).cloned();
        let current = self.table.channel(Channel::Current).cloned();

        let net_charge = if self.table.source(Channel::Charge).is_available() {
            Some(self.table.channel_values(Channel::Charge)?.to_vec())
        } else {
            match (&time, &current) {
                (Some(t), Some(i)) => {
                    debug!("No charge column, integrating current over time");
                    let charge = calculate_capacity(t, i, false)?;
                    Some(values_in(&charge, &charge_unit)?)
                }
                _ => None,
            }
        };
        let total_charge = match (&time, &current) {
            (Some(t), Some(i)) => {
                let charge = calculate_capacity(t, i, true)?;
                Some(values_in(&charge, &charge_unit)?)
            }
            _ => None,
        };

        let unit = self.capacity_unit();
        let per_gram = self.mass.as_ref().map(|m| m.value);
        let scale = |values: Vec<f64>| -> Vec<f64> {
            match per_gram {
                Some(grams) => values.into_iter().map(|q| q / grams).collect(),
                None => values,
            }
        };
        let capacity = match net_charge {
            Some(q) => scale(q),
            None => {
                warn!("Neither charge nor current and time are present, capacity is missing");
                vec![f64::NAN; len]
            }
        };
        self.table
            .insert_column(Column::new(CAPACITY, Some(unit.clone()), capacity))?;
        if let Some(q) = total_charge {
            self.table
                .insert_column(Column::new(CAPACITY_TOTAL, Some(unit), scale(q)))?;
        }
        if let Some(t) = time {
            let hours = Unit::hour();
            let values = values_in(&t, &hours)?;
            self.table
                .insert_column(Column::new(TIME_HOURS, Some(hours), values))?;
        }
        Ok(())
    }

    fn source_names(&self) -> String {
        let names: Vec<String> = self
            .sources
            .iter()
            .map(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.display().to_string())
            })
            .collect();
        names.join(", ")
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn table(&self) -> &DataTable {
        &self.table
    }

    pub fn discharge_policy(&self) -> DischargePolicy {
        self.policy
    }

    /// Active material mass in grams, from the caller or else the file
    pub fn mass(&self) -> Option<&Quantity> {
        self.mass.as_ref()
    }

    /// mA·h/g when the mass is known, otherwise mA·h
    pub fn capacity_unit(&self) -> Unit {
        match self.mass {
            Some(_) => Unit::specific_capacity(),
            None => Unit::milliampere_hour(),
        }
    }

    pub fn theoretical_capacity(&self) -> Option<&Quantity> {
        self.metadata.theoretical_capacity.as_ref()
    }

    pub fn start_time(&self) -> Option<NaiveDateTime> {
        self.metadata.start_time
    }

    /// Programmed charge and discharge currents
    pub fn currents(&self) -> Result<(Quantity, Quantity)> {
        self.metadata.currents()
    }

    pub fn charge_current(&self) -> Option<Quantity> {
        self.currents().ok().map(|(charge, _)| charge)
    }

    pub fn discharge_current(&self) -> Option<Quantity> {
        self.currents().ok().map(|(_, discharge)| discharge)
    }

    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// Cycle by position; negative positions count from the end
    pub fn cycle(&self, idx: isize) -> Result<&Cycle> {
        let count = self.cycles.len();
        let pos = if idx < 0 {
            count.checked_sub(idx.unsigned_abs())
        } else {
            Some(idx as usize)
        };
        pos.and_then(|p| self.cycles.get(p))
            .ok_or(CyclerError::CycleNotFound { index: idx, count })
    }

    /// Charge capacity of one cycle; `-1` is the last cycle
    pub fn charge_capacity(&self, idx: isize) -> Result<f64> {
        self.cycle(idx)?.charge_capacity()
    }

    /// Discharge capacity of one cycle; `-1` is the last cycle
    pub fn discharge_capacity(&self, idx: isize) -> Result<f64> {
        self.cycle(idx)?.discharge_capacity()
    }

    pub fn charge_capacities(&self) -> Result<Vec<f64>> {
        self.cycles.iter().map(Cycle::charge_capacity).collect()
    }

    pub fn discharge_capacities(&self) -> Result<Vec<f64>> {
        self.cycles.iter().map(Cycle::discharge_capacity).collect()
    }

    /// Discharge over charge capacity per cycle, in percent
    pub fn coulombic_efficiencies(&self) -> Result<Vec<f64>> {
        let charge = self.charge_capacities()?;
        let discharge = self.discharge_capacities()?;
        Ok(discharge
            .iter()
            .zip(&charge)
            .map(|(d, c)| d / c * 100.0)
            .collect())
    }

    /// Row whose `column` value is nearest to `value`
    ///
    /// Works best on monotonic columns such as time. `Ok(None)` when the
    /// column holds no valid values.
    pub fn closest_datum(
        &self,
        value: f64,
        column: &str,
    ) -> Result<Option<BTreeMap<String, f64>>> {
        let values = self.table.values(column)?;
        Ok(closest_row(values, value).and_then(|row| self.table.row(row)))
    }

    /// Charge rate in 1/h: theoretical capacity over the charge current
    ///
    /// `Ok(None)` when the file records no theoretical capacity.
    pub fn c_rate(&self) -> Result<Option<f64>> {
        let Some(capacity) = self.theoretical_capacity() else {
            return Ok(None);
        };
        let (charge, _) = self.currents()?;
        let time = capacity.clone() / charge.abs();
        Ok(Some(1.0 / time.value_in(&Unit::hour())?))
    }
}

/// Rebuild `time/s` of a concatenated table as seconds since its first row
///
/// Each file's own time axis restarts at zero. With absolute timestamps
/// on every row the table is sorted and the axis recomputed from them;
/// without, the per-file axes are kept and integration across the seams
/// is not meaningful.
fn stitch_time_axis(table: &mut DataTable) -> Result<()> {
    if table.timestamps().is_none() {
        warn!("Not every file has absolute timestamps; time axis restarts per file");
        return Ok(());
    }
    table.sort_by_timestamp();
    let seconds: Option<Vec<f64>> = table.timestamps().and_then(|stamps| {
        let start = *stamps.first()?;
        Some(
            stamps
                .iter()
                .map(|t| {
                    (*t - start)
                        .num_microseconds()
                        .map_or(f64::NAN, |us| us as f64 / 1e6)
                })
                .collect(),
        )
    });
    if let Some(seconds) = seconds {
        table.synthesize(Channel::Time, seconds, "seconds since the first timestamp")?;
    }
    Ok(())
}

/// Column values expressed in `unit`; a column without a unit is taken as is
fn values_in(column: &Column, unit: &Unit) -> Result<Vec<f64>> {
    let factor = match &column.unit {
        Some(from) => from.conversion_factor(unit)?,
        None => 1.0,
    };
    Ok(column.values.iter().map(|v| v * factor).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn assert_close(got: &[f64], want: &[f64]) {
        assert_eq!(got.len(), want.len(), "{got:?}");
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-9, "{got:?} != {want:?}");
        }
    }

    fn decoded(
        time: &[f64],
        current: &[f64],
        cycle: &[f64],
        start: Option<NaiveDateTime>,
    ) -> DecodedFile {
        let mut table = DataTable::with_len(time.len());
        table.synthesize(Channel::Time, time.to_vec(), "test").unwrap();
        table
            .synthesize(Channel::Current, current.to_vec(), "test")
            .unwrap();
        table.synthesize(Channel::Cycle, cycle.to_vec(), "test").unwrap();
        if let Some(start) = start {
            let stamps = time
                .iter()
                .map(|s| start + Duration::seconds(*s as i64))
                .collect();
            table.set_timestamps(stamps).unwrap();
        }
        DecodedFile {
            format: FileFormat::Ch,
            table,
            metadata: FileMetadata {
                start_time: start,
                ..FileMetadata::default()
            },
        }
    }

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 3, 14)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    // 1 h charge at 1 mA then 1 h discharge at -1 mA, sampled every 30 min
    fn one_cycle() -> DecodedFile {
        decoded(
            &[0.0, 1800.0, 3600.0, 5400.0, 7200.0],
            &[1.0, 1.0, 1.0, -1.0, -1.0],
            &[0.0, 0.0, 0.0, 0.0, 0.0],
            Some(start()),
        )
    }

    #[test]
    fn test_capacity_from_current() {
        let exp = Experiment::from_decoded(vec![one_cycle()], &LoadOptions::default()).unwrap();
        let capacity = exp.table().values(CAPACITY).unwrap();
        assert_close(capacity, &[0.0, 0.5, 1.0, 1.0, 0.5]);
        assert_eq!(exp.capacity_unit(), Unit::milliampere_hour());
        assert_close(
            exp.table().values(TIME_HOURS).unwrap(),
            &[0.0, 0.5, 1.0, 1.5, 2.0],
        );
        assert_close(&exp.table().values(CAPACITY_TOTAL).unwrap()[4..], &[2.0]);
        assert_close(&[exp.charge_capacity(-1).unwrap()], &[1.0]);
        // last valid sample policy for CH data
        assert_close(&[exp.discharge_capacity(0).unwrap()], &[0.5]);
    }

    #[test]
    fn test_mass_gives_specific_capacity() {
        let options = LoadOptions {
            mass: Some(Quantity::new(500.0, Unit::milligram())),
            ..LoadOptions::default()
        };
        let exp = Experiment::from_decoded(vec![one_cycle()], &options).unwrap();
        assert_eq!(exp.mass().unwrap().value, 0.5);
        assert_eq!(exp.capacity_unit(), Unit::specific_capacity());
        assert_close(&exp.charge_capacities().unwrap(), &[2.0]);
    }

    #[test]
    fn test_policy_override() {
        let options = LoadOptions {
            discharge_policy: Some(DischargePolicy::NegativeCurrentMinimum),
            ..LoadOptions::default()
        };
        let exp = Experiment::from_decoded(vec![one_cycle()], &options).unwrap();
        assert_eq!(exp.discharge_policy(), DischargePolicy::NegativeCurrentMinimum);
        assert_close(&exp.discharge_capacities().unwrap(), &[0.5]);
        assert_close(&exp.coulombic_efficiencies().unwrap(), &[50.0]);
    }

    #[test]
    fn test_cycle_index_out_of_range() {
        let exp = Experiment::from_decoded(vec![one_cycle()], &LoadOptions::default()).unwrap();
        assert!(exp.cycle(-1).is_ok());
        assert!(matches!(
            exp.cycle(-2),
            Err(CyclerError::CycleNotFound { index: -2, count: 1 })
        ));
        assert!(exp.cycle(1).is_err());
    }

    #[test]
    fn test_concatenation_sorts_by_timestamp() {
        let later = decoded(
            &[0.0, 1800.0],
            &[-1.0, -1.0],
            &[1.0, 1.0],
            Some(start() + Duration::hours(3)),
        );
        let exp =
            Experiment::from_decoded(vec![later, one_cycle()], &LoadOptions::default()).unwrap();
        let time = exp.table().channel_values(Channel::Time).unwrap();
        assert_eq!(time, &[0.0, 1800.0, 3600.0, 5400.0, 7200.0, 10800.0, 12600.0]);
        assert_eq!(exp.cycles().len(), 2);
        assert_eq!(exp.start_time(), Some(start()));
    }

    #[test]
    fn test_closest_datum_and_missing_currents() {
        let exp = Experiment::from_decoded(vec![one_cycle()], &LoadOptions::default()).unwrap();
        let datum = exp.closest_datum(3500.0, "time/s").unwrap().unwrap();
        assert_close(&[datum[CAPACITY]], &[1.0]);
        assert!(matches!(
            exp.closest_datum(1.0, "nope"),
            Err(CyclerError::ColumnNotFound { .. })
        ));
        assert!(exp.charge_current().is_none());
        assert!(matches!(exp.currents(), Err(CyclerError::ReadCurrent(_))));
        assert_eq!(exp.c_rate().unwrap(), None);
    }

    #[test]
    fn test_c_rate() {
        let mut file = one_cycle();
        file.metadata.theoretical_capacity = Some(Quantity::new(2.0, Unit::milliampere_hour()));
        file.metadata.charge_current = Some(Quantity::new(1.0, Unit::milliampere()));
        file.metadata.discharge_current = Some(Quantity::new(-1.0, Unit::milliampere()));
        let exp = Experiment::from_decoded(vec![file], &LoadOptions::default()).unwrap();
        let rate = exp.c_rate().unwrap().unwrap();
        assert!((rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_downsample_happens_before_capacity() {
        let options = LoadOptions {
            nmax: Some(3),
            ..LoadOptions::default()
        };
        let exp = Experiment::from_decoded(vec![one_cycle()], &options).unwrap();
        assert_eq!(exp.table().index(), &[0, 2, 4]);
        assert_close(exp.table().values(CAPACITY).unwrap(), &[0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_no_files() {
        assert!(matches!(
            Experiment::from_decoded(Vec::new(), &LoadOptions::default()),
            Err(CyclerError::FileFormat(_))
        ));
    }
}
