//! EC-Lab text export (`.mpt`)
//!
//! ```text
//! EC-Lab ASCII FILE
//! Nb header lines : 58
//! ...                                  (settings, `key : value` lines)
//! mode<TAB>ox/red<TAB>...<TAB>time/s   (column header, line 58)
//! 1<TAB>0<TAB>...<TAB>1,2340000E+001   (data)
//! ```
//!
//! Numbers may use a decimal comma depending on the Windows locale.

use crate::error::{CyclerError, Result};
use crate::parser::columns::unit_from_name;
use crate::parser::helpers::{decode_text, parse_decimal, unique_names};
use crate::parser::mpr::finish_biologic_table;
use crate::parser::FileFormat;
use crate::types::*;
use crate::units::{Quantity, Unit};
use chrono::NaiveDateTime;
use log::{debug, warn};
use regex::Regex;

pub const MAGIC_LINE: &str = "EC-Lab ASCII FILE";
const HEADER_COUNT_PREFIX: &str = "Nb header lines";
const START_PREFIX: &str = "Acquisition started on";
const MASS_PREFIX: &str = "Mass of active material";
const CHANNEL_PREFIX: &str = "Run on channel";
const CAPACITY_PATTERN: &str = r"^for DX = [0-9]+, DQ = ([0-9.]+) ([mµμu]?A\.h)";

pub fn looks_like_mpt(data: &[u8]) -> bool {
    data.starts_with(MAGIC_LINE.as_bytes())
}

/// Decode a complete `.mpt` file
pub fn decode_mpt(data: &[u8], filename: &str) -> Result<DecodedFile> {
    let text = decode_text(data);
    let lines: Vec<&str> = text.lines().collect();

    if !lines.first().is_some_and(|l| l.trim_end() == MAGIC_LINE) {
        return Err(CyclerError::FileFormat(format!(
            "{filename} does not start with '{MAGIC_LINE}'"
        )));
    }
    let header_lines = lines
        .get(1)
        .and_then(|l| value_after(l, HEADER_COUNT_PREFIX))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or_else(|| {
            CyclerError::FileFormat(format!("{filename} has no '{HEADER_COUNT_PREFIX}' line"))
        })?;
    if header_lines < 3 || header_lines > lines.len() {
        return Err(CyclerError::FileFormat(format!(
            "{filename} declares {header_lines} header lines but has {}",
            lines.len()
        )));
    }
    debug!("{} header lines in {}", header_lines, filename);

    let metadata = parse_header(&lines[..header_lines - 1])?;
    let column_line = lines[header_lines - 1];
    let mut table = parse_data(column_line, &lines[header_lines..], filename)?;
    finish_biologic_table(&mut table, None, metadata.start_time)?;

    Ok(DecodedFile {
        format: FileFormat::Mpt,
        table,
        metadata,
    })
}

/// Text after `prefix` and the following colon
fn value_after<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.trim_start().strip_prefix(prefix)?;
    Some(rest.trim_start().strip_prefix(':')?.trim())
}

/// Settings block above the column header
pub fn parse_header(lines: &[&str]) -> Result<FileMetadata> {
    let capacity_re =
        Regex::new(CAPACITY_PATTERN).map_err(|e| CyclerError::Parse(e.to_string()))?;
    let mut meta = FileMetadata {
        instrument: Some("BioLogic EC-Lab".to_string()),
        format_version: Some("EC-Lab ASCII".to_string()),
        ..FileMetadata::default()
    };
    let mut currents: Option<Vec<f64>> = None;
    let mut current_units: Option<Vec<String>> = None;

    for (i, line) in lines.iter().enumerate().skip(2) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if meta.technique.is_none() && i == 3 && !trimmed.contains(':') {
            meta.technique = Some(trimmed.to_string());
        }

        if let Some(value) = value_after(line, START_PREFIX) {
            meta.start_time = parse_start_time(value);
            if meta.start_time.is_none() {
                warn!("Unrecognized acquisition start '{}'", value);
            }
        } else if let Some(value) = value_after(line, MASS_PREFIX) {
            meta.active_mass = parse_quantity(value);
        } else if let Some(value) = value_after(line, CHANNEL_PREFIX) {
            meta.channel = Some(value.to_string());
        } else if let Some(caps) = capacity_re.captures(trimmed) {
            let value = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
            let unit = caps.get(2).and_then(|m| m.as_str().parse::<Unit>().ok());
            if meta.theoretical_capacity.is_none() {
                if let (Some(value), Some(unit)) = (value, unit) {
                    meta.theoretical_capacity = Some(Quantity::new(value, unit));
                }
            }
        } else {
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            match tokens.as_slice() {
                ["Is", values @ ..] => {
                    currents = Some(values.iter().filter_map(|v| parse_decimal(v)).collect());
                }
                ["unit", "Is", units @ ..] => {
                    current_units = Some(units.iter().map(|u| u.to_string()).collect());
                }
                _ => {}
            }
        }

        if let Some((key, value)) = trimmed.split_once(" : ") {
            meta.entries
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    if let (Some(values), Some(units)) = (currents, current_units) {
        let quantity = |i: usize| -> Option<Quantity> {
            let unit = units.get(i)?.parse::<Unit>().ok()?;
            Some(Quantity::new(*values.get(i)?, unit))
        };
        meta.charge_current = quantity(0);
        meta.discharge_current = quantity(1);
    }
    Ok(meta)
}

fn parse_start_time(value: &str) -> Option<NaiveDateTime> {
    ["%m/%d/%Y %H:%M:%S%.f", "%m/%d/%Y %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value.trim(), fmt).ok())
}

/// `22.53 mg` style value with a unit
pub fn parse_quantity(value: &str) -> Option<Quantity> {
    let mut parts = value.split_whitespace();
    let number = parse_decimal(parts.next()?)?;
    let unit = parts.next().unwrap_or("").parse::<Unit>().ok()?;
    Some(Quantity::new(number, unit))
}

fn parse_data(column_line: &str, body: &[&str], filename: &str) -> Result<DataTable> {
    let names: Vec<String> = column_line
        .split('\t')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if names.is_empty() {
        return Err(CyclerError::FileFormat(format!(
            "{filename} has an empty column header"
        )));
    }

    let joined = body.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(joined.as_bytes());

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
    let mut dropped = 0usize;
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let row: Option<Vec<f64>> = (0..names.len())
            .map(|i| match record.get(i).map(str::trim) {
                None | Some("") => Some(f64::NAN),
                Some(field) => parse_decimal(field),
            })
            .collect();
        match row {
            Some(row) => columns.iter_mut().zip(row).for_each(|(c, v)| c.push(v)),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!("Dropped {} non-numeric rows from {}", dropped, filename);
    }

    let len = columns.first().map_or(0, Vec::len);
    let mut table = DataTable::with_len(len);
    let names = unique_names(&names);
    for (name, values) in names.into_iter().zip(columns) {
        let unit = unit_from_name(&name);
        table.insert_column(Column::new(name, unit, values))?;
    }
    Ok(table)
}
