#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Category of a module inside a binary file, keyed by its short name
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModuleKind {
    Settings,
    Data,
    Log,
    Loop,
    Other(String),
}

impl ModuleKind {
    pub fn from_short_name(name: &str) -> Self {
        match name.trim_end() {
            "VMP Set" => ModuleKind::Settings,
            "VMP data" => ModuleKind::Data,
            "VMP LOG" => ModuleKind::Log,
            "VMP loop" => ModuleKind::Loop,
            other => ModuleKind::Other(other.to_string()),
        }
    }
}

/// Module header generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HeaderLayout {
    /// short name, long name, length, version, date
    Legacy,
    /// Adds max length and a reserved word (EC-Lab 11.50 and later)
    Extended,
}

impl HeaderLayout {
    pub fn header_len(&self) -> usize {
        match self {
            HeaderLayout::Legacy => 10 + 25 + 4 + 4 + 8,
            HeaderLayout::Extended => 10 + 25 + 4 + 4 + 4 + 4 + 8,
        }
    }
}

/// One entry of the module directory
///
/// `offset` is the absolute position of the module's data block, after
/// the `MODULE` tag and the header.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModuleDescriptor {
    pub kind: ModuleKind,
    pub short_name: String,
    pub long_name: String,
    pub layout: HeaderLayout,
    pub version: u32,
    pub date: String,
    pub offset: usize,
    pub length: usize,
    pub max_length: Option<usize>,
}

impl ModuleDescriptor {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn data<'a>(&self, file: &'a [u8]) -> &'a [u8] {
        &file[self.offset..self.end()]
    }
}

/// One fixed-width measurement tuple, values in column order
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub values: Vec<f64>,
}
