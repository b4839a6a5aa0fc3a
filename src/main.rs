use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use cycler_parser::{
    capacity_series, export_experiment, CapacityDirection, DischargePolicy, Experiment,
    ExportOptions, FileFormat, LoadOptions, Quantity, Unit, DEFAULT_NMAX,
};
use glob::glob;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum recursion depth to prevent stack overflow
const MAX_RECURSION_DEPTH: usize = 100;

/// Extensions picked up when walking a directory; `.txt` exports must be named directly
const DIRECTORY_EXTENSIONS: [&str; 2] = ["mpr", "mpt"];

/// Extensions accepted when named directly
const FILE_EXTENSIONS: [&str; 4] = ["mpr", "mpt", "txt", "csv"];

/// Expand input paths to a list of cycler files.
/// If a path is a file, add it directly (filtered later by extension).
/// If a path is a directory, recursively find all .mpr/.mpt files within it.
/// If a path contains glob patterns, expand them first.
fn expand_input_paths(
    input_paths: &[String],
    visited: &mut HashSet<PathBuf>,
) -> Result<Vec<PathBuf>> {
    expand_input_paths_with_depth(input_paths, visited, 0)
}

fn expand_input_paths_with_depth(
    input_paths: &[String],
    visited: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<Vec<PathBuf>> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(anyhow::anyhow!(
            "Maximum recursion depth exceeded ({})",
            MAX_RECURSION_DEPTH
        ));
    }
    let mut files = Vec::new();

    for input_path_str in input_paths {
        if input_path_str.contains('*') || input_path_str.contains('?') {
            let paths = glob(input_path_str)
                .with_context(|| format!("Invalid glob pattern '{input_path_str}'"))?
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Error expanding glob pattern '{input_path_str}'"))?;
            // glob yields no guaranteed order
            let mut expanded = Vec::new();
            for path in paths {
                expanded.extend(expand_input_paths_with_depth(
                    &[path.to_string_lossy().into_owned()],
                    visited,
                    depth + 1,
                )?);
            }
            expanded.sort();
            files.extend(expanded);
            continue;
        }

        match Path::new(input_path_str).canonicalize() {
            Ok(canonical_path) if canonical_path.is_file() => files.push(canonical_path),
            Ok(canonical_path) if canonical_path.is_dir() => {
                files.extend(find_files_in_dir_with_depth(
                    &canonical_path,
                    visited,
                    depth + 1,
                )?);
            }
            Ok(_) => warn!("Path not found or not accessible: {input_path_str}"),
            Err(e) => warn!("Failed to canonicalize path '{input_path_str}': {e}"),
        }
    }

    Ok(files)
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| allowed.contains(&ext.as_str()))
}

/// Recursively find cycler files in a directory, protecting against symlink cycles and depth overflow
fn find_files_in_dir_with_depth(
    dir_path: &Path,
    visited: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<Vec<PathBuf>> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(anyhow::anyhow!(
            "Maximum recursion depth exceeded in directory traversal ({})",
            MAX_RECURSION_DEPTH
        ));
    }

    let mut files = Vec::new();
    if !visited.insert(dir_path.to_path_buf()) {
        return Ok(files);
    }

    let entries = match fs::read_dir(dir_path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read directory '{}': {}", dir_path.display(), e);
            return Ok(files);
        }
    };

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    for path in paths {
        let canonical_path = match path.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to canonicalize path '{}': {}", path.display(), e);
                continue;
            }
        };
        if canonical_path.is_dir() {
            files.extend(find_files_in_dir_with_depth(
                &canonical_path,
                visited,
                depth + 1,
            )?);
        } else if canonical_path.is_file()
            && has_extension(&canonical_path, &DIRECTORY_EXTENSIONS)
            && visited.insert(canonical_path.clone())
        {
            files.push(canonical_path);
        }
    }

    Ok(files)
}

fn version() -> String {
    match option_env!("VERGEN_GIT_SHA") {
        Some(sha) => format!("{} ({sha})", env!("CARGO_PKG_VERSION")),
        None => env!("CARGO_PKG_VERSION").to_string(),
    }
}

fn build_command() -> Command {
    Command::new("Cycler Parser")
        .version(version())
        .about("Read battery cycler files (BioLogic .mpr/.mpt, CH Instruments, Maccor) and report per-cycle capacities. Optionally exports CSV/JSON.")
        .arg(
            Arg::new("files")
                .help("Cycler files or directories to parse. Direct file paths: .mpr, .mpt, .txt, .csv. Directories: recursively finds .mpr/.mpt files only. Case-insensitive, supports globbing.")
                .required(false)
                .num_args(1..)
                .index(1),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Enable debug output and detailed parsing information")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("mass")
                .long("mass")
                .help("Active material mass in milligrams (default: read from the file)")
                .value_name("MG")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new("nmax")
                .long("nmax")
                .help("Maximum number of datapoints kept per experiment")
                .value_name("N")
                .default_value(DEFAULT_NMAX.to_string())
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("no-cap")
                .long("no-cap")
                .help("Keep every datapoint (overrides --nmax)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .help("Decode every file as this format instead of detecting it")
                .value_parser(FileFormat::NAMES),
        )
        .arg(
            Arg::new("discharge-policy")
                .long("discharge-policy")
                .help("Discharge capacity definition (default depends on the format)")
                .value_parser(DischargePolicy::NAMES),
        )
        .arg(
            Arg::new("direction")
                .long("direction")
                .help("Which capacity to report per cycle")
                .default_value("discharge")
                .value_parser(CapacityDirection::NAMES),
        )
        .arg(
            Arg::new("csv")
                .long("csv")
                .help("Export the unified table to <name>.csv")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("summary")
                .long("summary")
                .help("Export per-cycle capacities to <name>.cycles.csv")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Export a JSON summary to <name>.summary.json (requires the 'json' feature)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .help("Directory for output files (default: same as input file)")
                .value_name("DIR"),
        )
        .arg(
            Arg::new("concat")
                .long("concat")
                .help("Treat all files as one experiment, in the order given")
                .action(ArgAction::SetTrue),
        )
}

fn load_options(matches: &ArgMatches) -> Result<LoadOptions> {
    let format = matches
        .get_one::<String>("format")
        .map(|s| s.parse::<FileFormat>())
        .transpose()?;
    let discharge_policy = matches
        .get_one::<String>("discharge-policy")
        .map(|s| s.parse::<DischargePolicy>())
        .transpose()?;
    let nmax = if matches.get_flag("no-cap") {
        None
    } else {
        matches.get_one::<usize>("nmax").copied()
    };
    Ok(LoadOptions {
        mass: matches
            .get_one::<f64>("mass")
            .map(|mg| Quantity::new(*mg, Unit::milligram())),
        nmax,
        format,
        discharge_policy,
    })
}

fn print_report(experiment: &Experiment, direction: CapacityDirection) -> Result<()> {
    let metadata = experiment.metadata();
    println!(
        "Format: {}  Datapoints: {}  Cycles: {}",
        experiment.format(),
        experiment.table().len(),
        experiment.cycles().len()
    );
    if let Some(start) = experiment.start_time() {
        println!("Started: {start}");
    }
    if let Some(technique) = &metadata.technique {
        println!("Technique: {technique}");
    }
    match experiment.mass() {
        Some(mass) => println!("Active mass: {mass}"),
        None => println!("Active mass: unknown (capacities in {})", experiment.capacity_unit()),
    }
    if let Ok(Some(rate)) = experiment.c_rate() {
        println!("C-rate: {rate:.3} /h");
    }

    let series = capacity_series(experiment, direction)?;
    println!(
        "{:>6}  {:>14}  {:>10}",
        "Cycle",
        format!("{direction} cap."),
        "Eff. %"
    );
    for ((number, capacity), efficiency) in series
        .cycle_numbers
        .iter()
        .zip(&series.capacities)
        .zip(&series.efficiencies)
    {
        println!("{number:>6}  {capacity:>14.4}  {efficiency:>10.2}");
    }
    println!("Capacity unit: {}", series.unit);
    Ok(())
}

fn process(
    paths: &[PathBuf],
    options: &LoadOptions,
    export_options: &ExportOptions,
    direction: CapacityDirection,
) -> Result<()> {
    let experiment = Experiment::load(paths, options)?;
    print_report(&experiment, direction)?;
    if let Some(first) = paths.first() {
        let report = export_experiment(&experiment, first, export_options)
            .with_context(|| format!("Failed to export results for {}", first.display()))?;
        for path in &report.written {
            println!("Exported to: {}", path.display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let matches = build_command().get_matches();

    let debug = matches.get_flag("debug");
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if debug { "debug" } else { "info" }),
    )
    .init();

    // Check if no files were provided and show help
    let file_patterns: Vec<String> = match matches.get_many::<String>("files") {
        Some(files) => files.cloned().collect(),
        None => {
            build_command().print_help()?;
            println!();
            return Ok(());
        }
    };

    let options = load_options(&matches)?;
    let direction: CapacityDirection = matches
        .get_one::<String>("direction")
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or(CapacityDirection::Discharge);
    let export_options = ExportOptions {
        csv: matches.get_flag("csv"),
        summary: matches.get_flag("summary"),
        json: matches.get_flag("json"),
        output_dir: matches.get_one::<String>("output-dir").cloned(),
    };
    debug!("Input patterns: {file_patterns:?}");

    let mut visited = HashSet::new();
    let input_files = expand_input_paths(&file_patterns, &mut visited)
        .context("Error expanding input paths")?;

    let valid_paths: Vec<PathBuf> = input_files
        .into_iter()
        .filter(|path| {
            let ok = has_extension(path, &FILE_EXTENSIONS);
            if !ok {
                warn!("Skipping file with unsupported extension: {}", path.display());
            }
            ok
        })
        .collect();

    if valid_paths.is_empty() {
        error!("No valid files found to process.");
        error!("Supported extensions: .mpr, .mpt, .txt, .csv (case-insensitive)");
        error!("Input patterns were: {file_patterns:?}");
        std::process::exit(1);
    }
    debug!("Found {} valid files to process", valid_paths.len());

    let groups: Vec<Vec<PathBuf>> = if matches.get_flag("concat") {
        vec![valid_paths.clone()]
    } else {
        valid_paths.iter().map(|p| vec![p.clone()]).collect()
    };

    let mut processed = 0;
    for (index, group) in groups.iter().enumerate() {
        if index > 0 {
            println!();
        }
        let names: Vec<String> = group
            .iter()
            .map(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.display().to_string())
            })
            .collect();
        println!("Processing: {}", names.join(", "));

        match process(group, &options, &export_options, direction) {
            Ok(()) => processed += 1,
            Err(e) => {
                error!("Error processing {}: {:#}", names.join(", "), e);
                info!("Continuing with next file...");
            }
        }
    }

    if processed == 0 {
        error!(
            "No files were successfully processed out of {} found.",
            valid_paths.len()
        );
        error!("Use --debug flag for more detailed error information.");
        std::process::exit(1);
    }

    Ok(())
}
