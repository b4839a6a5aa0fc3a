//! Export functionality for loaded experiments
//!
//! Writes the unified table and a per-cycle summary next to the input
//! file (or into an output directory). CSV is always available; the JSON
//! summary needs the `json` feature.

use crate::error::Result;
use crate::experiment::Experiment;
use crate::types::DataTable;
use chrono::NaiveDateTime;
use log::{debug, info};
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Export options for controlling output formats
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Unified table as `<stem>.csv`
    pub csv: bool,
    /// Per-cycle capacities as `<stem>.cycles.csv`
    pub summary: bool,
    /// Per-cycle capacities and metadata as `<stem>.summary.json`
    pub json: bool,
    pub output_dir: Option<String>,
}

/// Output file locations for one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub table_csv: PathBuf,
    pub summary_csv: PathBuf,
    pub summary_json: PathBuf,
}

/// Files written by [`export_experiment`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
}

/// Capacities of one cycle
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CycleSummary {
    pub number: i64,
    pub rows: usize,
    pub charge_capacity: f64,
    pub discharge_capacity: f64,
    /// Percent
    pub coulombic_efficiency: f64,
}

/// Experiment-level numbers for the summary outputs
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExperimentSummary {
    pub sources: Vec<String>,
    pub format: String,
    pub discharge_policy: String,
    pub start_time: Option<NaiveDateTime>,
    pub mass_g: Option<f64>,
    pub capacity_unit: String,
    pub datapoints: usize,
    pub cycles: Vec<CycleSummary>,
}

/// Collect the per-cycle capacities of an experiment
pub fn summarize(experiment: &Experiment) -> Result<ExperimentSummary> {
    let cycles = experiment
        .cycles()
        .iter()
        .map(|cycle| {
            let charge = cycle.charge_capacity()?;
            let discharge = cycle.discharge_capacity()?;
            Ok(CycleSummary {
                number: cycle.number,
                rows: cycle.len(),
                charge_capacity: charge,
                discharge_capacity: discharge,
                coulombic_efficiency: discharge / charge * 100.0,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ExperimentSummary {
        sources: experiment
            .sources()
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        format: experiment.format().to_string(),
        discharge_policy: experiment.discharge_policy().to_string(),
        start_time: experiment.start_time(),
        mass_g: experiment.mass().map(|m| m.value),
        capacity_unit: experiment.capacity_unit().to_string(),
        datapoints: experiment.table().len(),
        cycles,
    })
}

/// Output paths derived from the input file name
///
/// Files land in `output_dir` when given, otherwise beside the input.
pub fn compute_export_paths(input_path: &Path, options: &ExportOptions) -> ExportPaths {
    let base_name = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("experiment");
    let output_dir = match &options.output_dir {
        Some(dir) => PathBuf::from(dir),
        None => input_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    ExportPaths {
        table_csv: output_dir.join(format!("{base_name}.csv")),
        summary_csv: output_dir.join(format!("{base_name}.cycles.csv")),
        summary_json: output_dir.join(format!("{base_name}.summary.json")),
    }
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Write every row of the table; missing values are empty fields
///
/// Columns are `index`, then `timestamp` when the table has absolute
/// times, then the table columns in order.
pub fn export_table_csv(table: &DataTable, output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path)?;
    let timestamps = table.timestamps();

    let mut header = vec!["index".to_string()];
    if timestamps.is_some() {
        header.push("timestamp".to_string());
    }
    header.extend(table.column_names());
    writer.write_record(&header)?;

    let mut record = Vec::with_capacity(header.len());
    for (row, label) in table.index().iter().enumerate() {
        record.clear();
        record.push(label.to_string());
        if let Some(ts) = timestamps {
            record.push(ts[row].format(TIMESTAMP_FORMAT).to_string());
        }
        record.extend(table.columns().iter().map(|c| format_value(c.values[row])));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    debug!("Wrote {} rows to {}", table.len(), output_path.display());
    Ok(())
}

/// One line per cycle: number, rows, capacities and efficiency
pub fn export_summary_csv(summary: &ExperimentSummary, output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path)?;
    let unit = &summary.capacity_unit;
    writer.write_record([
        "cycle".to_string(),
        "rows".to_string(),
        format!("charge capacity/{unit}"),
        format!("discharge capacity/{unit}"),
        "coulombic efficiency/%".to_string(),
    ])?;
    for cycle in &summary.cycles {
        writer.write_record([
            cycle.number.to_string(),
            cycle.rows.to_string(),
            format_value(cycle.charge_capacity),
            format_value(cycle.discharge_capacity),
            format_value(cycle.coulombic_efficiency),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Pretty-printed JSON summary; NaN capacities become `null`
#[cfg(feature = "json")]
pub fn export_summary_json(summary: &ExperimentSummary, output_path: &Path) -> Result<()> {
    use std::io::{BufWriter, Write};

    let file = std::fs::File::create(output_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write every output enabled in `options` for one experiment
///
/// `input_path` names the outputs. Asking for JSON without the `json`
/// feature is logged and skipped.
pub fn export_experiment(
    experiment: &Experiment,
    input_path: &Path,
    options: &ExportOptions,
) -> Result<ExportReport> {
    let paths = compute_export_paths(input_path, options);
    let mut report = ExportReport::default();
    if !(options.csv || options.summary || options.json) {
        return Ok(report);
    }
    if let Some(dir) = paths.table_csv.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
            debug!("Created output directory: {}", dir.display());
        }
    }

    if options.csv {
        export_table_csv(experiment.table(), &paths.table_csv)?;
        info!("Exported data to: {}", paths.table_csv.display());
        report.written.push(paths.table_csv.clone());
    }
    if options.summary || options.json {
        let summary = summarize(experiment)?;
        if options.summary {
            export_summary_csv(&summary, &paths.summary_csv)?;
            info!("Exported cycle summary to: {}", paths.summary_csv.display());
            report.written.push(paths.summary_csv.clone());
        }
        if options.json {
            write_json(&summary, &paths.summary_json, &mut report)?;
        }
    }
    Ok(report)
}

#[cfg(feature = "json")]
fn write_json(summary: &ExperimentSummary, path: &Path, report: &mut ExportReport) -> Result<()> {
    export_summary_json(summary, path)?;
    info!("Exported JSON summary to: {}", path.display());
    report.written.push(path.to_path_buf());
    Ok(())
}

#[cfg(not(feature = "json"))]
fn write_json(_summary: &ExperimentSummary, path: &Path, _report: &mut ExportReport) -> Result<()> {
    log::warn!(
        "JSON export of {} needs the 'json' feature, skipping",
        path.display()
    );
    Ok(())
}
