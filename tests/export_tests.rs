//! Integration tests for writing loaded runs to disk

mod common;

use common::*;
use cycler_parser::*;
use std::fs;
use tempfile::TempDir;

fn load_maccor(temp_dir: &TempDir) -> (std::path::PathBuf, Experiment) {
    let path = temp_dir.path().join("maccor.txt");
    fs::write(&path, maccor_text()).unwrap();
    let run = Experiment::load(&[&path], &LoadOptions::default()).expect("run loads");
    (path, run)
}

#[test]
fn test_export_into_output_dir() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (path, run) = load_maccor(&temp_dir);
    let out = temp_dir.path().join("out");
    let options = ExportOptions {
        csv: true,
        summary: true,
        output_dir: Some(out.to_string_lossy().to_string()),
        ..ExportOptions::default()
    };

    let report = export_experiment(&run, &path, &options).expect("export succeeds");
    assert_eq!(report.written.len(), 2);
    assert!(report.written.iter().all(|p| p.exists()));
    assert!(report.written.iter().all(|p| p.starts_with(&out)));

    let table = fs::read_to_string(out.join("maccor.csv")).unwrap();
    let mut lines = table.lines();
    assert!(lines.next().unwrap().starts_with("index,timestamp,"));
    assert_eq!(table.lines().count(), 1 + run.table().len());

    let summary = fs::read_to_string(out.join("maccor.cycles.csv")).unwrap();
    let rows: Vec<&str> = summary.lines().collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("cycle,rows,charge capacity/mA·h"));
    assert!(rows[1].starts_with("0,5,"));
}

#[test]
fn test_nothing_enabled_writes_nothing() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (path, run) = load_maccor(&temp_dir);
    let report = export_experiment(&run, &path, &ExportOptions::default()).unwrap();
    assert!(report.written.is_empty());
    assert!(!temp_dir.path().join("maccor.csv").exists());
}

#[cfg(feature = "json")]
#[test]
fn test_json_summary() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (path, run) = load_maccor(&temp_dir);
    let options = ExportOptions {
        json: true,
        ..ExportOptions::default()
    };
    let report = export_experiment(&run, &path, &options).unwrap();
    assert_eq!(report.written.len(), 1);

    let text = fs::read_to_string(&report.written[0]).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["format"], "maccor");
    assert_eq!(value["datapoints"], 5);
    assert_eq!(value["cycles"].as_array().unwrap().len(), 1);
}
