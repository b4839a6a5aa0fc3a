//! CH Instruments text export
//!
//! ```text
//! Mar. 14, 2019   10:22:31          (timestamp, really the end time)
//! Multi-Current Steps               (technique)
//! File: ...                         (skipped up to the first blank line)
//!
//! Init P/N = P                      (`key = value` until the next blank)
//! Anodic Current (A) = 1e-4
//!
//! Time/sec, Potential/V              (segment header)
//! 0.1, 3.02                          (segment body)
//! ...
//! Hold Time/sec                      (next segment: header only logs time)
//! 0.1
//! ```
//!
//! Segments that do not log current or potential get them from the
//! step metadata. A segment without a logged potential is a hold at the
//! potential limit, after which the cell reverses direction.

use crate::error::{CyclerError, Result};
use crate::parser::columns::unit_from_name;
use crate::parser::helpers::{decode_text, parse_decimal, seconds_to_duration};
use crate::parser::FileFormat;
use crate::types::*;
use crate::units::{Quantity, Unit};
use chrono::{Duration, NaiveDateTime};
use log::{debug, warn};
use regex::Regex;
use std::collections::BTreeMap;

const HEADER_PATTERN: &str = r"(?i)^([a-z ]+/[a-z]+,? ?)+";
const TIMESTAMP_FORMATS: [&str; 2] = ["%b. %d, %Y %H:%M:%S", "%b %d, %Y %H:%M:%S"];

pub const TIME_COLUMN: &str = "Time/sec";
pub const CURRENT_COLUMN: &str = "Current/A";
pub const POTENTIAL_COLUMN: &str = "Potential/V";
const CHARGE_COLUMN: &str = "Charge/C";

const INIT_POLARITY: &str = "Init P/N";
const ANODIC_CURRENT: &str = "Anodic Current (A)";
const CATHODIC_CURRENT: &str = "Cathodic Current (A)";
const HIGH_LIMIT: &str = "High E Limit (V)";
const LOW_LIMIT: &str = "Low E Limit (V)";

/// One header-delimited block of rows
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub number: usize,
    pub header: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Segment {
    fn column(&self, name: &str) -> Option<Vec<f64>> {
        let pos = self.header.iter().position(|h| h == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(pos).copied().unwrap_or(f64::NAN))
                .collect(),
        )
    }
}

/// Parse the leading timestamp line, e.g. `Mar. 14, 2019   10:22:31`
pub fn parse_timestamp(line: &str) -> Option<NaiveDateTime> {
    let line = line.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(line, fmt).ok())
}

/// Sniff used by format detection for `.txt` files
pub fn looks_like_ch(data: &[u8]) -> bool {
    let head = &data[..data.len().min(256)];
    let text = String::from_utf8_lossy(head);
    text.lines().next().and_then(parse_timestamp).is_some()
}

/// `key = value` block following the first blank line after line 3
///
/// Returns the entries and the index of the first line after the block.
pub fn read_metadata_block(lines: &[&str]) -> (BTreeMap<String, String>, usize) {
    let mut entries = BTreeMap::new();
    let mut i = 3;
    while i < lines.len() && !lines[i].trim().is_empty() {
        i += 1;
    }
    i += 1;
    while i < lines.len() && !lines[i].trim().is_empty() {
        match lines[i].split_once('=') {
            Some((key, value)) => {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => warn!("Ignoring metadata line without '=': {}", lines[i].trim()),
        }
        i += 1;
    }
    (entries, (i + 1).min(lines.len()))
}

/// Split the body into segments at each header line
pub fn split_segments(lines: &[&str]) -> Result<Vec<Segment>> {
    let header_re = Regex::new(HEADER_PATTERN).map_err(|e| CyclerError::Parse(e.to_string()))?;
    let mut segments: Vec<Segment> = Vec::new();
    let mut orphans = 0usize;
    let mut dropped = 0usize;

    for line in lines {
        if header_re.is_match(line) {
            let header = line
                .trim()
                .replace("Hold Time/sec", TIME_COLUMN)
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
            segments.push(Segment {
                number: segments.len(),
                header,
                rows: Vec::new(),
            });
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(segment) = segments.last_mut() else {
            orphans += 1;
            continue;
        };
        let row: Option<Vec<f64>> = trimmed.split(',').map(parse_decimal).collect();
        match row {
            Some(row) => segment.rows.push(row),
            None => dropped += 1,
        }
    }

    if orphans > 0 {
        warn!("Ignored {} lines before the first segment header", orphans);
    }
    if dropped > 0 {
        warn!("Dropped {} non-numeric segment rows", dropped);
    }
    debug!("Found {} segments", segments.len());
    Ok(segments)
}

fn metadata_number(entries: &BTreeMap<String, String>, key: &str) -> Result<f64> {
    entries
        .get(key)
        .and_then(|v| parse_decimal(v))
        .ok_or_else(|| CyclerError::ReadCurrent(format!("missing step metadata '{key}'")))
}

/// The file timestamp marks the end of the experiment, not its start.
///
/// Shift every timestamp back by the span of the run so the earliest
/// one becomes the true start time.
pub fn correct_end_timestamp(timestamps: &mut [NaiveDateTime]) -> Result<()> {
    let (Some(min), Some(max)) = (timestamps.iter().min(), timestamps.iter().max()) else {
        return Ok(());
    };
    let duration: Duration = *max - *min;
    for ts in timestamps.iter_mut() {
        *ts = ts.checked_sub_signed(duration).ok_or_else(|| {
            CyclerError::Parse(format!("run of {duration} before {ts} is outside the calendar range"))
        })?;
    }
    Ok(())
}

/// Stitch segments into one table with continuous absolute time
///
/// Each segment starts at the latest timestamp of the segment before it.
/// Missing current comes from the anodic/cathodic current setting (negated
/// when discharging); missing potential comes from the high/low limit and
/// flips the polarity for the following segments.
pub fn reconstruct(
    segments: &[Segment],
    entries: &BTreeMap<String, String>,
    stamp: NaiveDateTime,
) -> Result<DataTable> {
    let mut charging = match entries.get(INIT_POLARITY).map(|v| v.trim()) {
        Some(p) => p == "P",
        None => {
            warn!("No '{}' entry, assuming the run starts charging", INIT_POLARITY);
            true
        }
    };

    let mut names: Vec<String> = Vec::new();
    let mut blocks: Vec<BTreeMap<String, Vec<f64>>> = Vec::with_capacity(segments.len());
    let mut timestamps: Vec<NaiveDateTime> = Vec::new();
    let mut steps: Vec<f64> = Vec::new();
    let mut cycles: Vec<f64> = Vec::new();
    let mut last_timestamp = stamp;
    let mut cycle = 0usize;
    let mut previous_charging: Option<bool> = None;

    for segment in segments {
        let n = segment.rows.len();
        let mut block: BTreeMap<String, Vec<f64>> = segment
            .header
            .iter()
            .filter_map(|h| segment.column(h).map(|v| (h.clone(), v)))
            .collect();

        if n > 0 {
            let times = block.get(TIME_COLUMN).ok_or_else(|| {
                CyclerError::FileFormat(format!(
                    "segment {} has no '{}' column",
                    segment.number, TIME_COLUMN
                ))
            })?;
            let start = last_timestamp;
            for &t in times {
                let stamp = seconds_to_duration(t)
                    .and_then(|offset| start.checked_add_signed(offset))
                    .ok_or_else(|| {
                        CyclerError::Parse(format!(
                            "time {t} s in segment {} is outside the calendar range",
                            segment.number
                        ))
                    })?;
                timestamps.push(stamp);
            }
            if let Some(max) = timestamps[timestamps.len() - n..].iter().max() {
                last_timestamp = *max;
            }
        }

        if previous_charging == Some(false) && charging {
            cycle += 1;
        }
        previous_charging = Some(charging);
        steps.extend(std::iter::repeat(segment.number as f64).take(n));
        cycles.extend(std::iter::repeat(cycle as f64).take(n));

        if !block.contains_key(CURRENT_COLUMN) {
            let current = if charging {
                metadata_number(entries, ANODIC_CURRENT)?
            } else {
                -metadata_number(entries, CATHODIC_CURRENT)?
            };
            block.insert(CURRENT_COLUMN.to_string(), vec![current; n]);
        }
        if !block.contains_key(POTENTIAL_COLUMN) {
            let key = if charging { HIGH_LIMIT } else { LOW_LIMIT };
            let potential = entries.get(key).and_then(|v| parse_decimal(v)).ok_or_else(|| {
                CyclerError::FileFormat(format!("missing step metadata '{key}'"))
            })?;
            block.insert(POTENTIAL_COLUMN.to_string(), vec![potential; n]);
            charging = !charging;
        }

        for name in segment
            .header
            .iter()
            .map(String::as_str)
            .chain([CURRENT_COLUMN, POTENTIAL_COLUMN])
        {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        blocks.push(block);
    }

    correct_end_timestamp(&mut timestamps)?;

    let len = timestamps.len();
    let mut table = DataTable::with_len(len);
    for name in &names {
        let mut values = Vec::with_capacity(len);
        for (block, segment) in blocks.iter().zip(segments) {
            match block.get(name) {
                Some(v) => values.extend_from_slice(v),
                None => values.extend(std::iter::repeat(f64::NAN).take(segment.rows.len())),
            }
        }
        table.insert_column(Column::new(name.clone(), unit_from_name(name), values))?;
    }

    let synthesized = |name: &str| {
        segments
            .iter()
            .zip(&blocks)
            .any(|(s, b)| !s.rows.is_empty() && !s.header.iter().any(|h| h == name) && b.contains_key(name))
    };
    let current_synth = synthesized(CURRENT_COLUMN);
    let potential_synth = synthesized(POTENTIAL_COLUMN);
    table.adopt(Channel::Current, &[CURRENT_COLUMN])?;
    if current_synth {
        table.set_source(
            Channel::Current,
            ColumnSource::Synthesized("anodic/cathodic current setting".to_string()),
        );
    }
    table.adopt(Channel::Potential, &[POTENTIAL_COLUMN])?;
    if potential_synth {
        table.set_source(
            Channel::Potential,
            ColumnSource::Synthesized("potential limit setting".to_string()),
        );
    }
    table.adopt(Channel::Charge, &[CHARGE_COLUMN])?;

    if let Some(start) = timestamps.iter().min().copied() {
        let elapsed = timestamps
            .iter()
            .map(|ts| (*ts - start).num_microseconds().unwrap_or(0) as f64 / 1e6)
            .collect();
        table.synthesize(Channel::Time, elapsed, "segment timestamps")?;
    }
    table.synthesize(Channel::Step, steps, "segment number")?;
    table.synthesize(Channel::Cycle, cycles, "discharge to charge transitions")?;
    table.set_timestamps(timestamps)?;
    Ok(table)
}

/// Decode a complete CH Instruments export
pub fn decode_ch(data: &[u8], filename: &str) -> Result<DecodedFile> {
    let text = decode_text(data);
    let lines: Vec<&str> = text.lines().collect();

    let stamp = lines.first().and_then(|l| parse_timestamp(l)).ok_or_else(|| {
        CyclerError::FileFormat(format!("{filename} does not start with a CH timestamp"))
    })?;
    let technique = lines
        .get(1)
        .map(|l| l.trim().to_string())
        .filter(|t| !t.is_empty());
    let (entries, body_start) = read_metadata_block(&lines);
    let segments = split_segments(&lines[body_start..])?;
    if segments.iter().all(|s| s.rows.is_empty()) {
        return Err(CyclerError::FileFormat(format!(
            "{filename} contains no data segments"
        )));
    }

    let table = reconstruct(&segments, &entries, stamp)?;
    let amps = |key: &str| {
        entries
            .get(key)
            .and_then(|v| parse_decimal(v))
            .map(|a| Quantity::new(a, Unit::ampere()))
    };
    let metadata = FileMetadata {
        instrument: Some("CH Instruments".to_string()),
        technique,
        start_time: table.timestamps().and_then(|ts| ts.iter().min().copied()),
        charge_current: amps(ANODIC_CURRENT),
        discharge_current: amps(CATHODIC_CURRENT).map(|q| -q),
        entries,
        ..FileMetadata::default()
    };

    Ok(DecodedFile {
        format: FileFormat::Ch,
        table,
        metadata,
    })
}
