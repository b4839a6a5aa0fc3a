use crate::cycle::DischargePolicy;
use crate::error::{CyclerError, Result};
use crate::parser::{ch, maccor, mpr, mpt};
use crate::types::DecodedFile;
use log::debug;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FileFormat {
    /// BioLogic EC-Lab binary
    Mpr,
    /// BioLogic EC-Lab text export
    Mpt,
    /// CH Instruments text export
    Ch,
    /// Maccor MIMS text export
    Maccor,
}

impl FileFormat {
    pub const NAMES: [&'static str; 4] = ["mpr", "mpt", "ch", "maccor"];

    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::Mpr => "mpr",
            FileFormat::Mpt => "mpt",
            FileFormat::Ch => "ch",
            FileFormat::Maccor => "maccor",
        }
    }

    /// Identify a file by its leading bytes, falling back to the extension
    ///
    /// `.txt` files are shared by CH and Maccor exports and are told apart
    /// by content.
    pub fn detect(path: &Path, data: &[u8]) -> Result<FileFormat> {
        if mpr::looks_like_mpr(data) {
            return Ok(FileFormat::Mpr);
        }
        if mpt::looks_like_mpt(data) {
            return Ok(FileFormat::Mpt);
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "mpr" => Ok(FileFormat::Mpr),
            "mpt" => Ok(FileFormat::Mpt),
            "txt" | "csv" if ch::looks_like_ch(data) => Ok(FileFormat::Ch),
            "txt" if maccor::looks_like_maccor(data) => Ok(FileFormat::Maccor),
            _ if ch::looks_like_ch(data) => Ok(FileFormat::Ch),
            _ if maccor::looks_like_maccor(data) => Ok(FileFormat::Maccor),
            other => Err(CyclerError::FileFormat(format!(
                "Unrecognized format for {} (extension '.{other}')",
                path.display()
            ))),
        }
    }

    /// Decode an in-memory file of this format
    pub fn decode(&self, data: &[u8], filename: &str) -> Result<DecodedFile> {
        match self {
            FileFormat::Mpr => mpr::decode_mpr(data, filename),
            FileFormat::Mpt => mpt::decode_mpt(data, filename),
            FileFormat::Ch => ch::decode_ch(data, filename),
            FileFormat::Maccor => maccor::decode_maccor(data, filename),
        }
    }

    /// Discharge capacity definition used for data from this format
    pub fn default_discharge_policy(&self) -> DischargePolicy {
        match self {
            FileFormat::Mpr | FileFormat::Mpt => DischargePolicy::NegativeCurrentMinimum,
            FileFormat::Ch | FileFormat::Maccor => DischargePolicy::LastValidSample,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileFormat {
    type Err = CyclerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mpr" => Ok(FileFormat::Mpr),
            "mpt" => Ok(FileFormat::Mpt),
            "ch" => Ok(FileFormat::Ch),
            "maccor" => Ok(FileFormat::Maccor),
            _ => Err(CyclerError::InvalidOption {
                option: "format",
                value: s.to_string(),
                choices: FileFormat::NAMES.to_vec(),
            }),
        }
    }
}

/// Read and decode one file; the handle is closed before decoding starts
pub fn decode_file(path: &Path, format: Option<FileFormat>) -> Result<DecodedFile> {
    let data = std::fs::read(path)?;
    let format = match format {
        Some(format) => format,
        None => FileFormat::detect(path, &data)?,
    };
    debug!(
        "Decoding {} ({} bytes) as {}",
        path.display(),
        data.len(),
        format
    );
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    format.decode(&data, &filename)
}
