use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{Level, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use statarc_core::archive::{ArchiveFile, ArchiveInfo};
use statarc_core::reader::archive_paths;
use statarc_core::select::{CombineType, NameMatcher, StatFilter, StatSelector};
use statarc_core::value::{Filter, StatSummary, StatValue};
use statarc_core::{ReaderConfig, StatArchiveReader};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "statarc-dump", about = "Inspect statistics archives")]
struct Cli {
    /// Archive files (.gfs, .gfs.gz) or directories containing them
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Resource type name pattern
    #[arg(long = "type", value_name = "PATTERN")]
    type_name: Option<String>,

    /// Stat name pattern
    #[arg(long, value_name = "PATTERN")]
    stat: Option<String>,

    /// Instance name pattern
    #[arg(long, value_name = "PATTERN")]
    instance: Option<String>,

    /// Combine matches: none, file or global
    #[arg(long, default_value = "none")]
    combine: CombineType,

    /// Override the filter of every value: none, per-second or per-sample
    #[arg(long)]
    filter: Option<Filter>,

    /// Read buffer per file in bytes
    #[arg(long, default_value_t = 32 * 1024)]
    buffer_size: usize,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is warn level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["statarc_core", "statarc_dump"] {
        if let Ok(directive) = format!("{target}={level}").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn matcher(pattern: Option<&str>) -> Result<NameMatcher, String> {
    match pattern {
        None => Ok(NameMatcher::Any),
        Some(p) => NameMatcher::pattern(p).map_err(|e| e.to_string()),
    }
}

fn build_selector(cli: &Cli) -> Result<StatFilter, String> {
    Ok(StatFilter::new()
        .type_name(matcher(cli.type_name.as_deref())?)
        .stat(matcher(cli.stat.as_deref())?)
        .instance(matcher(cli.instance.as_deref())?)
        .combine(cli.combine))
}

// ── JSON output types ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct DumpJson {
    archives: Vec<ArchiveJson>,
    failures: Vec<FailureJson>,
    values: Vec<ValueJson>,
}

#[derive(Serialize)]
struct ArchiveJson {
    file: String,
    header: Option<ArchiveInfo>,
    resource_types: usize,
    instances: usize,
    samples: u64,
    memory_bytes: usize,
}

#[derive(Clone, Serialize)]
struct FailureJson {
    file: String,
    error: String,
}

#[derive(Serialize)]
struct ValueJson {
    resource_type: String,
    stat: String,
    units: String,
    instances: Vec<String>,
    filter: Filter,
    combined: bool,
    first: Option<String>,
    last: Option<String>,
    summary: StatSummary,
}

fn archive_json(archive: &ArchiveFile) -> ArchiveJson {
    ArchiveJson {
        file: archive.path().display().to_string(),
        header: archive.info().map(|i| i.as_ref().clone()),
        resource_types: archive.resource_types().count(),
        instances: archive.instances().len(),
        samples: archive.samples_read(),
        memory_bytes: archive.memory_used(),
    }
}

fn value_json(value: &Arc<dyn StatValue>) -> Result<ValueJson, statarc_core::ArchiveError> {
    let resources = value.resources();
    let timestamps = value.raw_absolute_timestamps()?;
    let fmt = |ts: Option<&i64>| {
        let info = resources.first()?.archive();
        ts.map(|&t| info.format_timestamp(t))
    };
    Ok(ValueJson {
        resource_type: value.type_name().to_string(),
        stat: value.descriptor().name.clone(),
        units: value.descriptor().units.clone(),
        instances: resources
            .iter()
            .map(|r| format!("{} ({})", r.name(), r.numeric_id()))
            .collect(),
        filter: value.filter(),
        combined: value.is_combo(),
        first: fmt(timestamps.first()),
        last: fmt(timestamps.last()),
        summary: value.summary()?,
    })
}

// ── Text output ──────────────────────────────────────────────────────────────

fn print_archive(archive: &ArchiveFile) {
    println!("Archive: {}", archive.path().display());
    if let Some(info) = archive.info() {
        println!(
            "  Version {}, started {}",
            info.version,
            info.format_timestamp(info.start_time)
        );
        println!("  Product: {}", info.product_version);
        println!("  Machine: {} / {}", info.machine, info.os);
        println!("  Directory: {}", info.system_directory);
    }
    println!(
        "  {} types, {} instances, {} samples",
        archive.resource_types().count(),
        archive.instances().len(),
        archive.samples_read()
    );
}

fn print_value(value: &ValueJson) {
    println!(
        "{} {} {} [{}{}]",
        value.resource_type,
        value.instances.join(", "),
        value.stat,
        value.filter,
        if value.combined { ", combined" } else { "" }
    );
    if let (Some(first), Some(last)) = (&value.first, &value.last) {
        println!("  {first} .. {last}");
    }
    let s = &value.summary;
    println!(
        "  count={} min={:.3} max={:.3} avg={:.3} stddev={:.3} last={:.3} {}",
        s.count, s.min, s.max, s.average, s.std_dev, s.most_recent, value.units
    );
}

// ── main ─────────────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let selector = match build_selector(&cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid pattern: {e}");
            std::process::exit(2);
        }
    };
    let config = ReaderConfig::new(cli.buffer_size);
    let paths = match archive_paths(&cli.paths, &config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to list archives: {e}");
            std::process::exit(1);
        }
    };

    // Decode failures are reported per file.
    let selectors: Vec<Arc<dyn StatSelector>> = vec![Arc::new(selector.clone())];
    let mut archives = Vec::new();
    let mut failures = Vec::new();
    for path in paths {
        match ArchiveFile::open(&path, &selectors, &config) {
            Ok(archive) => archives.push(archive),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to decode archive");
                failures.push(FailureJson {
                    file: path.display().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    let mut reader = StatArchiveReader::from_archives(archives);
    reader.close();

    let values = match reader.matches(&selector) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Query failed: {e}");
            std::process::exit(1);
        }
    };
    let mut value_rows = Vec::with_capacity(values.len());
    for value in &values {
        if let Some(filter) = cli.filter {
            value.set_filter(filter);
        }
        match value_json(value) {
            Ok(row) => value_rows.push(row),
            Err(e) => warn!(stat = %value.descriptor().name, error = %e, "failed to read value"),
        }
    }

    if cli.json {
        let json = DumpJson {
            archives: reader.archives().iter().map(archive_json).collect(),
            failures: failures.clone(),
            values: value_rows,
        };
        match serde_json::to_string_pretty(&json) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Failed to serialize output: {e}");
                std::process::exit(1);
            }
        }
    } else {
        for archive in reader.archives() {
            print_archive(archive);
        }
        for failure in &failures {
            println!("Failed: {} ({})", failure.file, failure.error);
        }
        if !value_rows.is_empty() {
            println!();
        }
        for row in &value_rows {
            print_value(row);
        }
    }

    if reader.archives().is_empty() && !failures.is_empty() {
        std::process::exit(1);
    }
}
