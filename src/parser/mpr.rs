//! BioLogic EC-Lab binary (`.mpr`) decoder
//!
//! File layout:
//! - 52-byte file header (magic, space padded, then four NUL bytes)
//! - a sequence of modules, each `MODULE` + header + data block
//!
//! Module headers come in two generations. The extended one (EC-Lab 11.50
//! and later) is recognized by `0xFFFFFFFF` in the first length slot.
//! All multi-byte fields are little-endian.

use crate::error::{CyclerError, Result};
use crate::parser::columns::{unit_from_name, RecordLayout};
use crate::parser::helpers::{
    ole_to_datetime, parse_short_date, pascal_string, seconds_to_duration, trim_field,
};
use crate::parser::stream::ByteStream;
use crate::parser::FileFormat;
use crate::types::*;
use crate::units::{Quantity, Unit};
use byteorder::LittleEndian;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};

pub const MAGIC_TEXT: &[u8] = b"BIO-LOGIC MODULAR FILE\x1a";
pub const FILE_HEADER_LEN: usize = 52;
const MAGIC_PADDED_LEN: usize = 48;
const MODULE_TAG: &[u8] = b"MODULE";
const EXTENDED_HEADER_MARK: u32 = 0xFFFF_FFFF;

/// Candidate offsets of the start timestamp inside the log module
const LOG_TIMESTAMP_OFFSETS: [usize; 4] = [465, 469, 473, 585];
/// Plausible OLE dates (2009 to 2036)
const OLE_DATE_RANGE: (f64, f64) = (40000.0, 50000.0);
const SETTINGS_MASS_OFFSET: usize = 0x100;

/// The exact 52-byte file header
pub fn file_header() -> [u8; FILE_HEADER_LEN] {
    let mut header = [0u8; FILE_HEADER_LEN];
    header[..MAGIC_PADDED_LEN].fill(b' ');
    header[..MAGIC_TEXT.len()].copy_from_slice(MAGIC_TEXT);
    header
}

/// Cheap sniff used by format detection
pub fn looks_like_mpr(data: &[u8]) -> bool {
    data.starts_with(MAGIC_TEXT)
}

fn check_file_header(data: &[u8]) -> Result<()> {
    if data.len() < FILE_HEADER_LEN {
        return Err(CyclerError::FileFormat(format!(
            "file too short for a BioLogic header ({} bytes)",
            data.len()
        )));
    }
    if data[..FILE_HEADER_LEN] != file_header() {
        return Err(CyclerError::FileFormat(
            "unrecognized file header, expected BIO-LOGIC MODULAR FILE".to_string(),
        ));
    }
    Ok(())
}

/// Walk the module headers following the file header
pub fn read_module_directory(data: &[u8]) -> Result<Vec<ModuleDescriptor>> {
    check_file_header(data)?;
    let mut stream = ByteStream::new(data);
    stream.set_position(FILE_HEADER_LEN);

    let mut modules = Vec::new();
    while !stream.eof {
        match stream.peek_bytes(MODULE_TAG.len()) {
            Some(tag) if tag == MODULE_TAG => stream.skip(MODULE_TAG.len())?,
            Some(_) => {
                return Err(CyclerError::FileFormat(format!(
                    "expected MODULE tag at byte {}",
                    stream.pos
                )))
            }
            None => return Err(truncated(stream.pos, "module tag")),
        }
        let module = read_module_header(&mut stream)?;
        debug!(
            "Module '{}' ({:?}) v{} at {}: {} bytes, {:?} header",
            module.short_name,
            module.kind,
            module.version,
            module.offset,
            module.length,
            module.layout
        );
        if module.length > stream.remaining() {
            return Err(CyclerError::FileFormat(format!(
                "module '{}' declares {} bytes but only {} remain",
                module.short_name,
                module.length,
                stream.remaining()
            )));
        }
        stream.skip(module.length)?;
        modules.push(module);
    }
    Ok(modules)
}

fn truncated(pos: usize, what: &str) -> CyclerError {
    CyclerError::FileFormat(format!("file truncated in {what} at byte {pos}"))
}

fn read_module_header(stream: &mut ByteStream) -> Result<ModuleDescriptor> {
    let start = stream.pos;
    let header = |e: CyclerError| match e {
        CyclerError::UnexpectedEof => truncated(start, "module header"),
        other => other,
    };

    let short_name = stream.read_ascii(10).map_err(header)?;
    let long_name = stream.read_ascii(25).map_err(header)?;
    let first = stream.read_u32::<LittleEndian>().map_err(header)?;

    let (layout, max_length, length, version) = if first == EXTENDED_HEADER_MARK {
        let length = stream.read_u32::<LittleEndian>().map_err(header)?;
        let version = stream.read_u32::<LittleEndian>().map_err(header)?;
        stream.skip(4).map_err(header)?;
        (
            HeaderLayout::Extended,
            Some(first as usize),
            length,
            version,
        )
    } else {
        let version = stream.read_u32::<LittleEndian>().map_err(header)?;
        (HeaderLayout::Legacy, None, first, version)
    };
    let date = stream.read_ascii(8).map_err(header)?;

    Ok(ModuleDescriptor {
        kind: ModuleKind::from_short_name(&short_name),
        short_name: trim_field(&short_name).to_string(),
        long_name: trim_field(&long_name).to_string(),
        layout,
        version,
        date: trim_field(&date).to_string(),
        offset: stream.pos,
        length: length as usize,
        max_length,
    })
}

/// Decoded measurement log
#[derive(Debug, Clone)]
pub struct DataModule {
    pub version: u32,
    pub names: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl DataModule {
    /// Byte offset of the first record inside the module for a version
    pub fn records_offset(version: u32) -> Option<usize> {
        match version {
            0 => Some(100),
            2 => Some(405),
            3 => Some(406),
            _ => None,
        }
    }

    /// Column-major copy of the record values
    pub fn columns(&self) -> Vec<Vec<f64>> {
        let mut columns = vec![Vec::with_capacity(self.records.len()); self.names.len()];
        for record in &self.records {
            for (column, value) in columns.iter_mut().zip(&record.values) {
                column.push(*value);
            }
        }
        columns
    }
}

pub fn decode_data_module(module: &ModuleDescriptor, bytes: &[u8]) -> Result<DataModule> {
    let records_at = DataModule::records_offset(module.version).ok_or_else(|| {
        CyclerError::UnsupportedLayout(format!(
            "data module version {} is not supported",
            module.version
        ))
    })?;

    let mut stream = ByteStream::new(bytes);
    let too_short = |_| {
        CyclerError::FileFormat(format!(
            "data module of {} bytes is too short for its header",
            bytes.len()
        ))
    };
    let n_points = stream.read_u32::<LittleEndian>().map_err(too_short)? as usize;
    let n_columns = stream.read_byte().map_err(too_short)? as usize;

    let mut ids = Vec::with_capacity(n_columns);
    for _ in 0..n_columns {
        let id = match module.version {
            0 => stream.read_byte().map(u16::from),
            _ => stream.read_u16::<LittleEndian>(),
        }
        .map_err(too_short)?;
        ids.push(id);
    }
    let layout = RecordLayout::from_column_ids(&ids)?;
    debug!(
        "Data module v{}: {} points, column ids {:?}, stride {}",
        module.version,
        n_points,
        ids,
        layout.stride()
    );

    // v3 carries one marker byte between the padding and the records
    let padding_end = records_at.min(405);
    if stream.pos > padding_end {
        return Err(CyclerError::FileFormat(format!(
            "{n_columns} column ids overrun the data module header"
        )));
    }
    if bytes.len() < records_at {
        return Err(CyclerError::FileFormat(format!(
            "data module of {} bytes ends before its records start at {}",
            bytes.len(),
            records_at
        )));
    }
    if bytes[stream.pos..padding_end].iter().any(|&b| b != 0) {
        warn!("Data module header padding contains nonzero bytes");
    }

    if layout.stride() == 0 && n_points > 0 {
        return Err(CyclerError::FileFormat(format!(
            "data module declares {n_points} points but no columns"
        )));
    }
    let record_bytes = &bytes[records_at..];
    let needed = n_points.checked_mul(layout.stride()).ok_or_else(|| {
        CyclerError::FileFormat(format!("data module declares {n_points} points"))
    })?;
    if record_bytes.len() < needed {
        return Err(CyclerError::FileFormat(format!(
            "data module declares {} points of {} bytes but holds only {} record bytes",
            n_points,
            layout.stride(),
            record_bytes.len()
        )));
    }
    if record_bytes.len() > needed {
        warn!(
            "Ignoring {} trailing bytes after {} records",
            record_bytes.len() - needed,
            n_points
        );
    }

    let records = if layout.stride() == 0 {
        Vec::new()
    } else {
        record_bytes[..needed]
            .chunks_exact(layout.stride())
            .map(|chunk| layout.decode::<LittleEndian>(chunk))
            .collect()
    };

    Ok(DataModule {
        version: module.version,
        names: layout.names().to_vec(),
        records,
    })
}

/// Fields read from the settings module
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub technique_id: u8,
    pub comments: String,
    pub active_mass_mg: Option<f64>,
    pub date: Option<NaiveDate>,
}

pub fn decode_settings(module: &ModuleDescriptor, bytes: &[u8]) -> Result<Settings> {
    let technique_id = *bytes.first().ok_or_else(|| {
        CyclerError::UnsupportedLayout("settings module is empty".to_string())
    })?;
    let comments = pascal_string(bytes.get(1..).unwrap_or_default());
    let mass_end = SETTINGS_MASS_OFFSET + 4;
    let active_mass_mg = ByteStream::bounded(bytes, SETTINGS_MASS_OFFSET, mass_end)
        .and_then(|mut field| field.read_f32::<LittleEndian>())
        .ok()
        .map(f64::from)
        .filter(|mass| mass.is_finite() && *mass > 0.0);
    let date = parse_short_date(&module.date);
    if date.is_none() {
        debug!("Settings module date '{}' not recognized", module.date);
    }
    Ok(Settings {
        technique_id,
        comments,
        active_mass_mg,
        date,
    })
}

/// Acquisition start stored as an OLE date in the log module
pub fn decode_log_timestamp(bytes: &[u8]) -> Option<NaiveDateTime> {
    let (low, high) = OLE_DATE_RANGE;
    let found = LOG_TIMESTAMP_OFFSETS.iter().find_map(|&offset| {
        let mut field = ByteStream::bounded(bytes, offset, offset + 8).ok()?;
        let days = field.read_f64::<LittleEndian>().ok()?;
        (days > low && days < high).then_some(days)
    });
    match found {
        Some(days) => ole_to_datetime(days),
        None => {
            warn!("Could not find a start timestamp in the LOG module");
            None
        }
    }
}

/// Row numbers at which each loop starts
pub fn decode_loop_index(module: &ModuleDescriptor, bytes: &[u8]) -> Result<Vec<usize>> {
    if module.version != 0 {
        return Err(CyclerError::UnsupportedLayout(format!(
            "loop module version {} is not supported",
            module.version
        )));
    }
    let mut stream = ByteStream::new(bytes);
    let count = stream
        .read_u32::<LittleEndian>()
        .map_err(|_| CyclerError::UnsupportedLayout("loop module is empty".to_string()))?;
    // declared count is capped by what the module can hold
    let mut starts = Vec::with_capacity((count as usize).min(stream.remaining() / 4));
    while stream.remaining() >= 4 {
        starts.push(stream.read_u32::<LittleEndian>()? as usize);
    }
    while starts.last() == Some(&0) {
        starts.pop();
    }
    if starts.len() != count as usize {
        debug!(
            "Loop module declares {} loops, found {} starts",
            count,
            starts.len()
        );
    }
    Ok(starts)
}

/// Cycle number for each row given loop start rows
pub fn cycles_from_loops(starts: &[usize], len: usize) -> Vec<f64> {
    (0..len)
        .map(|row| starts.iter().filter(|&&s| s <= row).count().saturating_sub(1) as f64)
        .collect()
}

/// Run one module decoder, turning recoverable failures into a skip
fn recoverable<T>(module: &ModuleDescriptor, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            warn!("Skipping module '{}': {}", module.short_name, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Decode a complete `.mpr` file
pub fn decode_mpr(data: &[u8], filename: &str) -> Result<DecodedFile> {
    let modules = read_module_directory(data)?;

    let mut data_module: Option<DataModule> = None;
    let mut settings: Option<Settings> = None;
    let mut start_time: Option<NaiveDateTime> = None;
    let mut loop_starts: Option<Vec<usize>> = None;
    let mut layouts = Vec::new();

    for module in &modules {
        let bytes = module.data(data);
        layouts.push(module.layout);
        match &module.kind {
            ModuleKind::Data => {
                if data_module.is_some() {
                    warn!("Ignoring additional data module in {}", filename);
                    continue;
                }
                data_module = recoverable(module, decode_data_module(module, bytes))?;
            }
            ModuleKind::Settings => {
                settings = recoverable(module, decode_settings(module, bytes))?;
            }
            ModuleKind::Log => {
                start_time = decode_log_timestamp(bytes);
            }
            ModuleKind::Loop => {
                loop_starts = recoverable(module, decode_loop_index(module, bytes))?;
            }
            ModuleKind::Other(name) => {
                debug!("Skipping unrecognized module '{}'", name);
            }
        }
    }

    let data_module = data_module.ok_or_else(|| {
        CyclerError::FileFormat(format!("no readable data module in {filename}"))
    })?;

    let mut metadata = FileMetadata {
        instrument: Some("BioLogic EC-Lab".to_string()),
        format_version: Some(format!(
            "data module v{}, {} module headers",
            data_module.version,
            if layouts.contains(&HeaderLayout::Extended) {
                "extended"
            } else {
                "legacy"
            }
        )),
        start_time,
        ..FileMetadata::default()
    };
    if let Some(settings) = &settings {
        metadata.technique = Some(format!("technique {}", settings.technique_id));
        metadata.active_mass = settings
            .active_mass_mg
            .map(|mg| Quantity::new(mg, Unit::milligram()));
        if !settings.comments.is_empty() {
            metadata
                .entries
                .insert("comments".to_string(), settings.comments.clone());
        }
        if let Some(date) = settings.date {
            metadata
                .entries
                .insert("settings date".to_string(), date.to_string());
            if let Some(start) = start_time {
                if start.date() != date {
                    warn!(
                        "Settings date {} does not match log timestamp {}",
                        date, start
                    );
                }
            }
        }
    }

    let table = assemble_table(&data_module, loop_starts.as_deref(), start_time)?;
    Ok(DecodedFile {
        format: FileFormat::Mpr,
        table,
        metadata,
    })
}

/// Build the canonical table from a decoded measurement log
fn assemble_table(
    module: &DataModule,
    loop_starts: Option<&[usize]>,
    start_time: Option<NaiveDateTime>,
) -> Result<DataTable> {
    let len = module.records.len();
    let mut table = DataTable::with_len(len);
    for (name, values) in module.names.iter().zip(module.columns()) {
        table.insert_column(Column::new(name.clone(), unit_from_name(name), values))?;
    }

    finish_biologic_table(&mut table, loop_starts, start_time)?;
    Ok(table)
}

/// Canonical channels, cycle fallback and absolute timestamps for EC-Lab data
pub(crate) fn finish_biologic_table(
    table: &mut DataTable,
    loop_starts: Option<&[usize]>,
    start_time: Option<NaiveDateTime>,
) -> Result<()> {
    let len = table.len();
    assign_biologic_channels(table)?;

    if !table.source(Channel::Cycle).is_available() {
        let half_cycles: Option<Vec<f64>> = table
            .values("half cycle")
            .ok()
            .map(|half| half.iter().map(|h| (h / 2.0).floor()).collect());
        match (loop_starts.filter(|s| !s.is_empty()), half_cycles) {
            (Some(starts), _) => {
                table.synthesize(Channel::Cycle, cycles_from_loops(starts, len), "loop module")?
            }
            (None, Some(cycles)) => table.synthesize(Channel::Cycle, cycles, "half cycle / 2")?,
            (None, None) => {
                table.synthesize(Channel::Cycle, vec![0.0; len], "no cycle information")?
            }
        }
    }

    if let Some(start) = start_time {
        let timestamps: Option<Option<Vec<NaiveDateTime>>> =
            table.channel_values(Channel::Time).ok().map(|times| {
                times
                    .iter()
                    .map(|&t| seconds_to_duration(t).and_then(|d| start.checked_add_signed(d)))
                    .collect()
            });
        match timestamps {
            Some(Some(ts)) => table.set_timestamps(ts)?,
            Some(None) => warn!(
                "Elapsed time column has values outside the timestamp range, no absolute timestamps"
            ),
            None => debug!("No elapsed time column, no absolute timestamps"),
        }
    }
    Ok(())
}

/// Map EC-Lab column names onto canonical channels
fn assign_biologic_channels(table: &mut DataTable) -> Result<()> {
    table.adopt(Channel::Time, &["time/s"])?;
    table.adopt(Channel::Current, &["I/mA", "<I>/mA"])?;
    table.adopt(Channel::Potential, &["Ewe/V", "<Ewe>/V"])?;
    table.adopt(Channel::Charge, &["(Q-Qo)/mA.h", "(Q-Qo)/C"])?;
    table.adopt(Channel::Cycle, &["cycle number"])?;
    table.adopt(Channel::Step, &["Ns"])?;
    for channel in Channel::ALL {
        if !table.source(channel).is_available() {
            debug!("Channel '{}' absent", channel.column_name());
        }
    }
    Ok(())
}
