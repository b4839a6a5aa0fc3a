//! Synthetic cycler files for integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub const MAGIC: &[u8] = b"BIO-LOGIC MODULAR FILE\x1a";

#[derive(Debug, Clone, Copy)]
pub enum HeaderKind {
    Legacy,
    Extended,
}

/// One little-endian field of a measurement record
#[derive(Debug, Clone, Copy)]
pub enum Field {
    Flags(u8),
    F32(f32),
    F64(f64),
    U16(u16),
    U32(u32),
}

pub fn encode_record(fields: &[Field]) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        match *field {
            Field::Flags(b) => out.push(b),
            Field::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Field::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Field::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Field::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
    out
}

fn padded(text: &str, len: usize) -> Vec<u8> {
    let mut out = text.as_bytes().to_vec();
    out.resize(len, b' ');
    out
}

/// Assembles a `.mpr` file module by module
#[derive(Debug, Clone)]
pub struct MprBuilder {
    header: HeaderKind,
    modules: Vec<u8>,
}

impl MprBuilder {
    pub fn new(header: HeaderKind) -> Self {
        Self {
            header,
            modules: Vec::new(),
        }
    }

    /// Raw module with an arbitrary short name and body
    pub fn module(mut self, short_name: &str, version: u32, body: &[u8]) -> Self {
        self.modules.extend_from_slice(b"MODULE");
        self.modules.extend(padded(short_name, 10));
        self.modules.extend(padded("synthetic module", 25));
        match self.header {
            HeaderKind::Legacy => {
                self.modules
                    .extend_from_slice(&(body.len() as u32).to_le_bytes());
                self.modules.extend_from_slice(&version.to_le_bytes());
            }
            HeaderKind::Extended => {
                self.modules.extend_from_slice(&u32::MAX.to_le_bytes());
                self.modules
                    .extend_from_slice(&(body.len() as u32).to_le_bytes());
                self.modules.extend_from_slice(&version.to_le_bytes());
                self.modules.extend_from_slice(&[0u8; 4]);
            }
        }
        self.modules.extend(padded("03/14/19", 8));
        self.modules.extend_from_slice(body);
        self
    }

    /// Data module; `version` 0 uses byte column ids, 2 and 3 use u16 ids
    pub fn data(self, version: u32, ids: &[u16], records: &[Vec<Field>]) -> Self {
        let mut body = Vec::new();
        body.extend_from_slice(&(records.len() as u32).to_le_bytes());
        body.push(ids.len() as u8);
        for &id in ids {
            if version == 0 {
                body.push(id as u8);
            } else {
                body.extend_from_slice(&id.to_le_bytes());
            }
        }
        let records_at = match version {
            0 => 100,
            2 => 405,
            _ => 406,
        };
        body.resize(records_at, 0);
        for record in records {
            body.extend(encode_record(record));
        }
        self.module("VMP data", version, &body)
    }

    /// Settings module with technique id, comments and active mass
    pub fn settings(self, technique: u8, comments: &str, mass_mg: f32) -> Self {
        let mut body = vec![technique, comments.len() as u8];
        body.extend_from_slice(comments.as_bytes());
        body.resize(0x100, 0);
        body.extend_from_slice(&mass_mg.to_le_bytes());
        body.resize(0x200, 0);
        self.module("VMP Set", 0, &body)
    }

    /// Log module holding the start time as an OLE date at offset 465
    pub fn log(self, ole_days: f64) -> Self {
        let mut body = vec![0u8; 600];
        body[465..473].copy_from_slice(&ole_days.to_le_bytes());
        self.module("VMP LOG", 0, &body)
    }

    /// Loop module listing the first row of every loop
    pub fn loops(self, starts: &[u32]) -> Self {
        let mut body = Vec::new();
        body.extend_from_slice(&(starts.len() as u32).to_le_bytes());
        for s in starts {
            body.extend_from_slice(&s.to_le_bytes());
        }
        self.module("VMP loop", 0, &body)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.resize(48, b' ');
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&self.modules);
        out
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).expect("write synthetic file");
        path
    }
}

/// Column ids of the legacy sample: mode flag, time, Ewe, I, (Q-Qo) in mA·h, cycle number
pub const V0_IDS: [u16; 6] = [1, 4, 6, 8, 13, 24];

/// Column ids of the newer sample: time, <I>, <Ewe>, (Q-Qo) in C, half cycle
pub const V3_IDS: [u16; 5] = [4, 76, 77, 434, 468];

/// Two cycles of (time s, current mA, potential V, charge mA·h, cycle)
pub fn cycling_rows() -> Vec<(f64, f32, f32, f64, u32)> {
    vec![
        (0.0, 1.0, 3.0, 0.0, 0),
        (1800.0, 1.0, 3.8, 0.5, 0),
        (3600.0, 1.0, 4.2, 1.0, 0),
        (5400.0, -1.0, 3.6, 0.5, 0),
        (7200.0, -1.0, 3.0, 0.2, 0),
        (9000.0, 1.0, 3.9, 0.7, 1),
        (10800.0, 1.0, 4.2, 1.1, 1),
        (12600.0, -1.0, 3.1, 0.4, 1),
    ]
}

pub fn v0_records() -> Vec<Vec<Field>> {
    cycling_rows()
        .into_iter()
        .map(|(t, i, e, q, c)| {
            let mode = if i > 0.0 { 1 } else { 2 };
            vec![
                Field::Flags(mode),
                Field::F64(t),
                Field::F32(e),
                Field::F32(i),
                Field::F64(q),
                Field::F64(c as f64),
            ]
        })
        .collect()
}

pub fn v3_records() -> Vec<Vec<Field>> {
    cycling_rows()
        .into_iter()
        .map(|(t, i, e, q, c)| {
            let half = 2 * c + u32::from(i < 0.0);
            vec![
                Field::F64(t),
                Field::F32(i),
                Field::F32(e),
                Field::F32((q * 3.6) as f32),
                Field::U32(half),
            ]
        })
        .collect()
}

/// EC-Lab 10 style file: legacy module headers, data module v0
pub fn legacy_mpr() -> MprBuilder {
    MprBuilder::new(HeaderKind::Legacy)
        .settings(5, "legacy cell", 12.0)
        .data(0, &V0_IDS, &v0_records())
        .log(43538.4322)
}

/// EC-Lab 11.50 style file: extended module headers, data module v3
pub fn extended_mpr() -> MprBuilder {
    MprBuilder::new(HeaderKind::Extended)
        .settings(5, "new cell", 12.0)
        .data(3, &V3_IDS, &v3_records())
        .log(43538.4322)
}

/// Maccor export with the 13-line preamble
pub fn maccor_text() -> String {
    let mut lines: Vec<String> = (0..13).map(|i| format!("Preamble {i}")).collect();
    lines.push("Rec\tCycle C\tStep\tTestTime\tCurrent [A]\tVoltage [V]\tMd\tDPT Time".to_string());
    lines.push(String::new());
    let rows = [
        (1, 0, 1, 0.0, 0.001, 3.0, "C", "03/14/2019 10:00:00 AM"),
        (2, 0, 1, 30.0, 0.001, 3.8, "C", "03/14/2019 10:30:00 AM"),
        (3, 0, 1, 60.0, 0.001, 4.2, "C", "03/14/2019 11:00:00 AM"),
        (4, 0, 2, 90.0, 0.001, 3.6, "D", "03/14/2019 11:30:00 AM"),
        (5, 0, 2, 120.0, 0.001, 3.0, "D", "03/14/2019 12:00:00 PM"),
    ];
    for (rec, cycle, step, minutes, amps, volts, md, date) in rows {
        lines.push(format!(
            "{rec}\t{cycle}\t{step}\t{minutes}\t{amps}\t{volts}\t{md}\t{date}"
        ));
    }
    lines.join("\r\n")
}
