//! Maccor MIMS text export
//!
//! Tab-separated. Lines 0-12 are a free-form preamble, line 13 is the
//! column header and line 14 is a units/blank line, data starts at 15.
//! The `Md` column marks discharge rows with `D`; their current is negated.

use crate::error::{CyclerError, Result};
use crate::parser::helpers::{decode_text, parse_decimal, unique_names};
use crate::parser::FileFormat;
use crate::types::*;
use crate::units::Unit;
use chrono::NaiveDateTime;
use log::{debug, warn};

pub const HEADER_LINE: usize = 13;
const DATA_LINE: usize = 15;

const REC_COLUMN: &str = "Rec";
const MODE_COLUMN: &str = "Md";
const DATE_COLUMN: &str = "DPT Time";
const CURRENT_COLUMN: &str = "Current [A]";
const VOLTAGE_COLUMN: &str = "Voltage [V]";
const TIME_COLUMN: &str = "TestTime";
const CYCLE_COLUMN: &str = "Cycle C";
const STEP_COLUMN: &str = "Step";
const DATE_FORMATS: [&str; 2] = ["%m/%d/%Y %I:%M:%S %p", "%m/%d/%Y %H:%M:%S"];

/// Sniff used by format detection for `.txt` files
pub fn looks_like_maccor(data: &[u8]) -> bool {
    let text = String::from_utf8_lossy(&data[..data.len().min(16 * 1024)]);
    text.lines()
        .nth(HEADER_LINE)
        .is_some_and(|l| l.split('\t').any(|c| c.trim() == REC_COLUMN))
}

fn column_unit(name: &str) -> Option<Unit> {
    match name {
        CURRENT_COLUMN => Some(Unit::ampere()),
        VOLTAGE_COLUMN => Some(Unit::volt()),
        TIME_COLUMN => Some(Unit::minute()),
        "Cap. [Ah]" => Some(Unit::ampere_hour()),
        _ => None,
    }
}

enum RawColumn {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

/// Decode a complete Maccor text export
pub fn decode_maccor(data: &[u8], filename: &str) -> Result<DecodedFile> {
    let text = decode_text(data);
    let lines: Vec<&str> = text.lines().collect();
    let header = lines.get(HEADER_LINE).ok_or_else(|| {
        CyclerError::FileFormat(format!("{filename} is too short for a Maccor export"))
    })?;
    let names: Vec<String> = header.split('\t').map(|s| s.trim().to_string()).collect();
    if !names.iter().any(|n| n == REC_COLUMN) {
        return Err(CyclerError::FileFormat(format!(
            "{filename} has no '{REC_COLUMN}' column on line {}",
            HEADER_LINE + 1
        )));
    }
    let names = unique_names(&names);

    let body = lines.get(DATA_LINE..).unwrap_or_default().join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); names.len()];
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        for (i, column) in cells.iter_mut().enumerate() {
            column.push(record.get(i).unwrap_or("").trim().to_string());
        }
    }

    let columns: Vec<RawColumn> = cells
        .into_iter()
        .map(|column| {
            let numeric: Option<Vec<f64>> = column
                .iter()
                .map(|c| if c.is_empty() { Some(f64::NAN) } else { parse_decimal(c) })
                .collect();
            match numeric {
                Some(values) => RawColumn::Numeric(values),
                None => RawColumn::Text(column),
            }
        })
        .collect();

    let len = columns.first().map_or(0, |c| match c {
        RawColumn::Numeric(v) => v.len(),
        RawColumn::Text(v) => v.len(),
    });
    debug!("{} rows, {} columns in {}", len, names.len(), filename);

    let mut table = DataTable::with_len(len);
    let mut modes: Option<Vec<String>> = None;
    let mut dates: Option<Vec<String>> = None;
    for (name, column) in names.iter().zip(columns) {
        match column {
            RawColumn::Numeric(values) => {
                if name == REC_COLUMN {
                    let index: Option<Vec<usize>> = values
                        .iter()
                        .map(|v| (v.is_finite() && *v >= 0.0).then_some(*v as usize))
                        .collect();
                    match index {
                        Some(index) => table.set_index(index)?,
                        None => warn!(
                            "'{}' column is not a record number, keeping positions",
                            REC_COLUMN
                        ),
                    }
                    continue;
                }
                table.insert_column(Column::new(name.clone(), column_unit(name), values))?;
            }
            RawColumn::Text(values) if name == MODE_COLUMN => modes = Some(values),
            RawColumn::Text(values) if name == DATE_COLUMN => dates = Some(values),
            RawColumn::Text(_) => debug!("Skipping text column '{}'", name),
        }
    }

    // Discharge rows carry negative current
    let current = table.column(CURRENT_COLUMN).ok().cloned();
    if let (Some(modes), Some(mut column)) = (&modes, current) {
        for (value, mode) in column.values.iter_mut().zip(modes) {
            if mode == "D" {
                *value = -*value;
            }
        }
        table.insert_column(column)?;
    }

    table.adopt(Channel::Current, &[CURRENT_COLUMN])?;
    table.adopt(Channel::Potential, &[VOLTAGE_COLUMN])?;
    table.adopt(Channel::Time, &[TIME_COLUMN])?;
    table.adopt(Channel::Cycle, &[CYCLE_COLUMN])?;
    table.adopt(Channel::Step, &[STEP_COLUMN])?;

    let timestamps = dates.as_deref().and_then(parse_dates);
    let start_time = timestamps.as_ref().and_then(|ts| ts.first().copied());
    if let Some(ts) = timestamps {
        table.set_timestamps(ts)?;
    }

    let metadata = FileMetadata {
        instrument: Some("Maccor".to_string()),
        format_version: Some("MIMS text export".to_string()),
        start_time,
        entries: lines
            .first()
            .map(|l| ("preamble".to_string(), l.trim().to_string()))
            .into_iter()
            .collect(),
        ..FileMetadata::default()
    };

    Ok(DecodedFile {
        format: FileFormat::Maccor,
        table,
        metadata,
    })
}

fn parse_dates(values: &[String]) -> Option<Vec<NaiveDateTime>> {
    values
        .iter()
        .map(|v| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(v, fmt).ok())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> String {
        let mut lines: Vec<String> = (0..13).map(|i| format!("Preamble line {i}")).collect();
        lines.push(
            "Rec\tCycle P\tCycle C\tStep\tTestTime\tCurrent [A]\tVoltage [V]\tMd\tDPT Time"
                .to_string(),
        );
        lines.push(String::new());
        lines.push("1\t0\t0\t1\t0\t0\t3.0\tR\t11/14/2019 2:51:11 PM".to_string());
        lines.push("2\t0\t0\t2\t1\t0.002\t3.5\tC\t11/14/2019 2:52:11 PM".to_string());
        lines.push("3\t0\t1\t3\t2\t0.001\t3.2\tD\t11/14/2019 2:53:11 PM".to_string());
        lines.join("\r\n")
    }

    #[test]
    fn test_sniff() {
        assert!(looks_like_maccor(sample().as_bytes()));
        assert!(!looks_like_maccor(b"Rec\tCycle\n1\t2"));
    }

    #[test]
    fn test_decode_renames_and_converts() {
        let decoded = decode_maccor(sample().as_bytes(), "cell.txt").unwrap();
        let table = &decoded.table;
        assert_eq!(table.index(), &[1, 2, 3]);
        assert_eq!(table.channel_values(Channel::Current).unwrap(), &[0.0, 2.0, -1.0]);
        assert_eq!(table.channel_values(Channel::Time).unwrap(), &[0.0, 60.0, 120.0]);
        assert_eq!(table.channel_values(Channel::Cycle).unwrap(), &[0.0, 0.0, 1.0]);
        assert_eq!(table.channel_values(Channel::Potential).unwrap(), &[3.0, 3.5, 3.2]);
        assert!(!table.has_column("Md"));
        assert_eq!(
            decoded.metadata.start_time.unwrap().to_string(),
            "2019-11-14 14:51:11"
        );
    }

    #[test]
    fn test_missing_rec_column() {
        let text = sample().replace("Rec\t", "Record\t");
        assert!(matches!(
            decode_maccor(text.as_bytes(), "cell.txt"),
            Err(CyclerError::FileFormat(_))
        ));
    }
}
