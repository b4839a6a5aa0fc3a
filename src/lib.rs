//! Cycler Parser Library
//!
//! A Rust library for reading battery cycler output (BioLogic EC-Lab
//! `.mpr`/`.mpt`, CH Instruments and Maccor text exports) into one
//! unified time-series table and deriving per-cycle capacities.
//!
//! # Features
//!
//! - **`cli`** (default): Build the command-line interface binary
//! - **`json`**: Enable the JSON cycle summary export
//! - **`serde`**: Enable serialization/deserialization of types
//!
//! # Quick Start
//!
//! Load a run and read its capacities:
//! ```rust,no_run
//! use cycler_parser::{Experiment, LoadOptions};
//!
//! let run = Experiment::load(&["cell01.mpr"], &LoadOptions::default()).unwrap();
//! println!("{} cycles", run.cycles().len());
//! println!("Last discharge: {} {}", run.discharge_capacity(-1).unwrap(), run.capacity_unit());
//! ```
//!
//! Decode a single file without any derived columns:
//! ```rust,no_run
//! use cycler_parser::{decode_file, Channel};
//! use std::path::Path;
//!
//! let decoded = decode_file(Path::new("cell01.mpr"), None).unwrap();
//! println!("{:?}", decoded.table.source(Channel::Cycle));
//! ```
//!
//! # Public API
//!
//! ## Decoding
//! - [`decode_file`] - Read and decode one file, detecting its format
//! - [`FileFormat`] - Supported formats, detection and dispatch
//! - [`DecodedFile`] - Table, metadata and format of one file
//!
//! ## Data Types
//! - [`DataTable`] - Unified table with canonical [`Channel`] columns
//! - [`FileMetadata`] - Mass, currents, start time and raw entries
//! - [`Quantity`] / [`Unit`] - Values with physical units
//!
//! ## Analysis
//! - [`Experiment`] - Loaded run with capacity columns and cycles
//! - [`Cycle`] / [`DischargePolicy`] - Per-cycle capacities
//! - [`cumulative_trapezoid`] / [`calculate_capacity`] - Integration
//! - [`cycle_series`] / [`capacity_series`] / [`differential_capacity_series`] - Plot-ready data
//!
//! ## Export Functions
//! - [`export_experiment`] - Write every output enabled in [`ExportOptions`]
//! - [`export_table_csv`] / [`export_summary_csv`] - Individual writers
//! - [`compute_export_paths`] - Helper for consistent path computation

// Module declarations
pub mod cycle;
pub mod error;
pub mod experiment;
pub mod export;
pub mod filters;
pub mod integrate;
pub mod parser;
pub mod series;
pub mod types;
pub mod units;

// Re-export everything from modules for convenience
#[allow(ambiguous_glob_reexports)]
pub use cycle::*;
#[allow(ambiguous_glob_reexports)]
pub use error::*;
#[allow(ambiguous_glob_reexports)]
pub use experiment::*;
#[allow(ambiguous_glob_reexports)]
pub use export::*;
#[allow(ambiguous_glob_reexports)]
pub use filters::*;
#[allow(ambiguous_glob_reexports)]
pub use integrate::*;
#[allow(ambiguous_glob_reexports)]
pub use parser::*;
#[allow(ambiguous_glob_reexports)]
pub use series::*;
#[allow(ambiguous_glob_reexports)]
pub use types::*;
#[allow(ambiguous_glob_reexports)]
pub use units::*;
