//! Integration tests for loading experiments from files on disk
//!
//! Covers:
//! - Capacity derivation from a charge column and from integrated current
//! - Mass from the file versus mass from the caller
//! - Discharge policies per format
//! - Multi-file concatenation and downsampling
//! - Missing samples in the middle of a run
//! - Plot series extraction

mod common;

use common::*;
use cycler_parser::*;
use std::fs;
use tempfile::TempDir;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[test]
fn test_binary_run_uses_file_mass() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = legacy_mpr().write(temp_dir.path(), "cell.mpr");
    let run = Experiment::load(&[&path], &LoadOptions::default()).expect("run loads");

    assert_eq!(run.format(), FileFormat::Mpr);
    assert_eq!(
        run.discharge_policy(),
        DischargePolicy::NegativeCurrentMinimum
    );
    assert!(approx(run.mass().unwrap().value, 0.012));
    assert_eq!(run.capacity_unit(), Unit::specific_capacity());
    assert_eq!(run.cycles().len(), 2);

    // charge 0 -> 1.0 mA·h, discharge down to 0.2 mA·h, 12 mg
    assert!(approx(run.charge_capacity(0).unwrap(), 1.0 / 0.012));
    assert!(approx(run.discharge_capacity(0).unwrap(), 0.8 / 0.012));
    assert!(approx(run.charge_capacity(-1).unwrap(), 0.4 / 0.012));
    let efficiencies = run.coulombic_efficiencies().unwrap();
    assert!(approx(efficiencies[0], 80.0));

    assert!(run.table().has_column(CAPACITY_TOTAL));
    assert!(approx(run.table().values(TIME_HOURS).unwrap()[2], 1.0));
}

#[test]
fn test_caller_mass_overrides_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = legacy_mpr().write(temp_dir.path(), "cell.mpr");
    let options = LoadOptions {
        mass: Some(Quantity::new(24.0, Unit::milligram())),
        ..LoadOptions::default()
    };
    let run = Experiment::load(&[&path], &options).unwrap();
    assert!(approx(run.mass().unwrap().value, 0.024));
    assert!(approx(run.charge_capacity(0).unwrap(), 1.0 / 0.024));
}

#[test]
fn test_binary_run_has_no_programmed_currents() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = legacy_mpr().write(temp_dir.path(), "cell.mpr");
    let run = Experiment::load(&[&path], &LoadOptions::default()).unwrap();
    assert!(run.charge_current().is_none());
    assert!(run.discharge_current().is_none());
    assert!(matches!(run.currents(), Err(CyclerError::ReadCurrent(_))));
}

#[test]
fn test_maccor_run_integrates_current() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("maccor.txt");
    fs::write(&path, maccor_text()).unwrap();
    let run = Experiment::load(&[&path], &LoadOptions::default()).unwrap();

    assert_eq!(run.format(), FileFormat::Maccor);
    assert_eq!(run.discharge_policy(), DischargePolicy::LastValidSample);
    assert!(run.mass().is_none());
    assert_eq!(run.capacity_unit(), Unit::milliampere_hour());

    let capacity = run.table().values(CAPACITY).unwrap();
    let expected = [0.0, 0.5, 1.0, 1.0, 0.5];
    for (got, want) in capacity.iter().zip(expected) {
        assert!(approx(*got, want), "{capacity:?}");
    }
    assert!(approx(run.charge_capacity(-1).unwrap(), 1.0));
    assert!(approx(run.discharge_capacity(-1).unwrap(), 0.5));
    assert_eq!(run.table().index(), &[1, 2, 3, 4, 5]);
}

#[test]
fn test_policy_override_changes_discharge() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("maccor.txt");
    // trailing rest row at zero current: capacity settles at 0.25
    let text = format!(
        "{}\r\n6\t0\t3\t150\t0\t3.2\tR\t03/14/2019 12:30:00 PM",
        maccor_text()
    );
    fs::write(&path, text).unwrap();

    let last = Experiment::load(&[&path], &LoadOptions::default()).unwrap();
    let options = LoadOptions {
        discharge_policy: Some(DischargePolicy::NegativeCurrentMinimum),
        ..LoadOptions::default()
    };
    let negative = Experiment::load(&[&path], &options).unwrap();
    assert!(approx(last.discharge_capacity(0).unwrap(), 0.75));
    assert!(approx(negative.discharge_capacity(0).unwrap(), 0.5));
    assert_eq!(
        negative.discharge_policy(),
        DischargePolicy::NegativeCurrentMinimum
    );
}

#[test]
fn test_concatenated_files_sort_by_timestamp() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let first = legacy_mpr().write(temp_dir.path(), "a.mpr");
    let second = MprBuilder::new(HeaderKind::Legacy)
        .settings(5, "day two", 12.0)
        .data(0, &V0_IDS, &v0_records())
        .log(43539.4322)
        .write(temp_dir.path(), "b.mpr");

    // given out of order on purpose
    let run = Experiment::load(&[&second, &first], &LoadOptions::default()).unwrap();
    assert_eq!(run.table().len(), 16);
    assert_eq!(run.sources().len(), 2);

    let time = run.table().channel_values(Channel::Time).unwrap();
    assert!(time.windows(2).all(|w| w[0] <= w[1]));
    assert!(approx(time[0], 0.0));
    assert!((time[8] - 86400.0).abs() < 1e-3);
    let stamps = run.table().timestamps().unwrap();
    assert_eq!(Some(stamps[0]), run.start_time());
}

#[test]
fn test_concatenated_files_without_timestamps_keep_their_axes() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let day = |name: &str| {
        MprBuilder::new(HeaderKind::Legacy)
            .settings(5, name, 12.0)
            .data(0, &V0_IDS, &v0_records())
            .write(temp_dir.path(), &format!("{name}.mpr"))
    };
    let first = day("one");
    let second = day("two");

    let run = Experiment::load(&[&first, &second], &LoadOptions::default()).unwrap();
    assert_eq!(run.table().len(), 16);
    assert!(run.table().timestamps().is_none());
    assert!(run.start_time().is_none());

    // each file keeps its own time axis, in the order given
    let time = run.table().channel_values(Channel::Time).unwrap();
    assert!(approx(time[7], 12600.0));
    assert!(approx(time[8], 0.0));
    assert!(approx(time[15], 12600.0));
    let capacity = run.table().values(CAPACITY).unwrap();
    assert!(capacity.iter().all(|q| q.is_finite()));
}

#[test]
fn test_missing_current_poisons_later_capacity() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("maccor.txt");
    // third row has an empty current cell
    let text = maccor_text().replacen("\t60\t0.001\t", "\t60\t\t", 1);
    assert_ne!(text, maccor_text());
    fs::write(&path, text).unwrap();

    let run = Experiment::load(&[&path], &LoadOptions::default()).unwrap();
    let capacity = run.table().values(CAPACITY).unwrap();
    assert!(approx(capacity[0], 0.0));
    assert!(approx(capacity[1], 0.5));
    assert!(capacity[2..].iter().all(|q| q.is_nan()), "{capacity:?}");
    assert!(run.table().values(CAPACITY_TOTAL).unwrap()[4].is_nan());

    // capacities use the valid rows only
    assert!(approx(run.charge_capacity(0).unwrap(), 0.5));
    assert!(approx(run.discharge_capacity(0).unwrap(), 0.0));
}

#[test]
fn test_downsampling_caps_rows() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = legacy_mpr().write(temp_dir.path(), "cell.mpr");
    let options = LoadOptions {
        nmax: Some(4),
        ..LoadOptions::default()
    };
    let run = Experiment::load(&[&path], &options).unwrap();
    assert_eq!(run.table().len(), 4);
    assert_eq!(run.table().index(), &[0, 2, 4, 6]);

    let all = LoadOptions {
        nmax: None,
        ..LoadOptions::default()
    };
    assert_eq!(Experiment::load(&[&path], &all).unwrap().table().len(), 8);
}

#[test]
fn test_text_export_with_currents_gives_c_rate() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("cell.mpt");
    let text = [
        "EC-Lab ASCII FILE",
        "Nb header lines : 10",
        "",
        "Galvanostatic Cycling with Potential Limitation",
        "Acquisition started on : 03/14/2019 10:00:00",
        "Mass of active material : 10 mg",
        "for DX = 1, DQ = 2.0 mA.h",
        "Is                  0,500               -0,500",
        "unit Is             mA                  mA",
        "time/s\tEwe/V\tI/mA\t(Q-Qo)/mA.h\tcycle number",
        "0\t3,0\t0,5\t0\t0",
        "3600\t4,2\t0,5\t0,5\t0",
        "7200\t3,0\t-0,5\t0\t0",
    ]
    .join("\r\n");
    fs::write(&path, text).unwrap();

    let run = Experiment::load(&[&path], &LoadOptions::default()).unwrap();
    assert_eq!(run.format(), FileFormat::Mpt);
    let (charge, discharge) = run.currents().unwrap();
    assert!(approx(charge.value_in(&Unit::milliampere()).unwrap(), 0.5));
    assert!(approx(discharge.value_in(&Unit::milliampere()).unwrap(), -0.5));
    // 2 mA·h at 0.5 mA takes 4 h
    assert!(approx(run.c_rate().unwrap().unwrap(), 0.25));
    assert!(approx(run.charge_capacity(0).unwrap(), 0.5 / 0.01));
}

#[test]
fn test_series_for_plotting() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = legacy_mpr().write(temp_dir.path(), "cell.mpr");
    let run = Experiment::load(&[&path], &LoadOptions::default()).unwrap();

    let lines = cycle_series(&run, CAPACITY, "potential/V").unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1].label, "Cycle 1");
    assert_eq!(lines[0].len(), 5);

    let err = cycle_series(&run, "Q/mA.h", "potential/V").unwrap_err();
    assert!(matches!(
        err,
        CyclerError::AxisColumnNotFound { axis: "x", .. }
    ));

    let capacities = capacity_series(&run, CapacityDirection::Charge).unwrap();
    assert_eq!(capacities.cycle_numbers, vec![0, 1]);
    assert_eq!(capacities.unit, Unit::specific_capacity());

    let datum = run.closest_datum(3500.0, "time/s").unwrap().unwrap();
    assert!(approx(datum["potential/V"], 4.2_f32 as f64));
}

#[test]
fn test_missing_file_is_io_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let missing = temp_dir.path().join("nope.mpr");
    let err = Experiment::load(&[&missing], &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, CyclerError::Io(_)));
}
