//! Column-id table for BioLogic measurement records
//!
//! The data module lists the ids of the columns the instrument logged.
//! Each id maps to a name and a field type; the record stride is the sum
//! of the field widths, except that all flag columns share one byte.

use crate::error::{CyclerError, Result};
use crate::parser::helpers::unique_names;
use crate::types::RawRecord;
use crate::units::Unit;
use byteorder::ByteOrder;

/// Binary encoding of one record field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    F32,
    F64,
    U8,
    U16,
    U32,
}

impl FieldType {
    pub fn width(&self) -> usize {
        match self {
            FieldType::U8 => 1,
            FieldType::U16 => 2,
            FieldType::F32 | FieldType::U32 => 4,
            FieldType::F64 => 8,
        }
    }

    fn decode<B: ByteOrder>(&self, bytes: &[u8]) -> f64 {
        match self {
            FieldType::F32 => B::read_f32(bytes) as f64,
            FieldType::F64 => B::read_f64(bytes),
            FieldType::U8 => bytes[0] as f64,
            FieldType::U16 => B::read_u16(bytes) as f64,
            FieldType::U32 => B::read_u32(bytes) as f64,
        }
    }
}

/// Flag columns packed into the shared flags byte: (id, name, mask)
const FLAG_COLUMNS: [(u16, &str, u8); 6] = [
    (1, "mode", 0x03),
    (2, "ox/red", 0x04),
    (3, "error", 0x08),
    (21, "control changes", 0x10),
    (31, "Ns changes", 0x20),
    (65, "counter inc.", 0x80),
];

pub fn flag_column(id: u16) -> Option<(&'static str, u8)> {
    FLAG_COLUMNS
        .iter()
        .find(|(flag_id, _, _)| *flag_id == id)
        .map(|&(_, name, mask)| (name, mask))
}

/// Name and field type of a data column id
pub fn value_column(id: u16) -> Option<(&'static str, FieldType)> {
    use FieldType::*;
    let column = match id {
        4 => ("time/s", F64),
        5 => ("control/V/mA", F32),
        6 => ("Ewe/V", F32),
        7 => ("dq/mA.h", F64),
        8 => ("I/mA", F32),
        9 => ("Ece/V", F32),
        11 => ("I/mA", F64),
        13 => ("(Q-Qo)/mA.h", F64),
        16 => ("Analog IN 1/V", F32),
        19 => ("control/V", F32),
        20 => ("control/mA", F32),
        23 => ("dQ/mA.h", F64),
        24 => ("cycle number", F64),
        26 => ("Rapp/Ohm", F32),
        27 => ("Ewe-Ece/V", F32),
        32 => ("freq/Hz", F32),
        33 => ("|Ewe|/V", F32),
        34 => ("|I|/A", F32),
        35 => ("Phase(Z)/deg", F32),
        36 => ("|Z|/Ohm", F32),
        37 => ("Re(Z)/Ohm", F32),
        38 => ("-Im(Z)/Ohm", F32),
        39 => ("I Range", U16),
        69 => ("R/Ohm", F32),
        70 => ("P/W", F32),
        74 => ("Energy/W.h", F64),
        75 => ("Analog OUT/V", F32),
        76 => ("<I>/mA", F32),
        77 => ("<Ewe>/V", F32),
        78 => ("Cs-2/µF-2", F32),
        123 => ("Energy charge/W.h", F64),
        124 => ("Energy discharge/W.h", F64),
        125 => ("Capacitance charge/µF", F64),
        126 => ("Capacitance discharge/µF", F64),
        131 => ("Ns", U16),
        163 => ("|Estack|/V", F32),
        168 => ("Rcmp/Ohm", F32),
        169 => ("Cs/µF", F32),
        172 => ("Cp/µF", F32),
        173 => ("Cp-2/µF-2", F32),
        174 => ("<Ewe>/V", F32),
        434 => ("(Q-Qo)/C", F32),
        435 => ("dQ/C", F32),
        462 => ("Temperature/°C", F32),
        467 => ("Q charge/discharge/mA.h", F64),
        468 => ("half cycle", U32),
        469 => ("z cycle", U32),
        498 => ("Q charge/mA.h", F64),
        499 => ("Q discharge/mA.h", F64),
        500 => ("step time/s", F64),
        501 => ("Efficiency/%", F64),
        502 => ("Capacity/mA.h", F64),
        505 => ("Rdc/Ohm", F32),
        _ => return None,
    };
    Some(column)
}

/// Unit encoded in a `quantity/unit` column name, when it is one we know
pub fn unit_from_name(name: &str) -> Option<Unit> {
    let (quantity, unit) = name.rsplit_once('/')?;
    if quantity.contains('/') {
        return None;
    }
    unit.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Value { offset: usize, field: FieldType },
    Flag { offset: usize, mask: u8 },
}

/// Byte layout of one measurement record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    names: Vec<String>,
    slots: Vec<Slot>,
    stride: usize,
}

impl RecordLayout {
    /// Build the layout for the given column ids, in file order
    ///
    /// Fails with `UnsupportedLayout` on an id missing from the table.
    pub fn from_column_ids(ids: &[u16]) -> Result<Self> {
        let mut names = Vec::with_capacity(ids.len());
        let mut slots = Vec::with_capacity(ids.len());
        let mut offset = 0usize;
        let mut flags_offset: Option<usize> = None;

        for &id in ids {
            if let Some((name, mask)) = flag_column(id) {
                let flags_at = match flags_offset {
                    Some(at) => at,
                    None => {
                        flags_offset = Some(offset);
                        offset += 1;
                        offset - 1
                    }
                };
                names.push(name.to_string());
                slots.push(Slot::Flag {
                    offset: flags_at,
                    mask,
                });
            } else if let Some((name, field)) = value_column(id) {
                names.push(name.to_string());
                slots.push(Slot::Value { offset, field });
                offset += field.width();
            } else {
                return Err(CyclerError::UnsupportedLayout(format!(
                    "unknown column id {id}"
                )));
            }
        }

        Ok(Self {
            names: unique_names(&names),
            slots,
            stride: offset,
        })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Decode one record; `bytes` must hold at least `stride` bytes
    pub fn decode<B: ByteOrder>(&self, bytes: &[u8]) -> RawRecord {
        let values = self
            .slots
            .iter()
            .map(|slot| match *slot {
                Slot::Value { offset, field } => {
                    field.decode::<B>(&bytes[offset..offset + field.width()])
                }
                Slot::Flag { offset, mask } => {
                    ((bytes[offset] & mask) >> mask.trailing_zeros()) as f64
                }
            })
            .collect();
        RawRecord { values }
    }
}
