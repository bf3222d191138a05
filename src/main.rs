use chrono::Local;
use clap::{Parser, Subcommand};
use dbspy::db::Database;
use dbspy::{ClassificationStatus, DetectionResult, Detector, DetectorConfig};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Extensions treated as database files when scanning a directory
const DATABASE_EXTENSIONS: &[&str] = &["db", "sqlite", "sqlite3", "db3", "s3db", "sl3"];

#[derive(Parser, Debug)]
#[command(name = "dbspy")]
#[command(author, version, about = "Tell plain SQLite databases apart from encrypted ones")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// File or directory to check (optional in GUI mode)
    path: Option<PathBuf>,

    /// Launch GUI file picker (auto-enabled when no path is given)
    #[arg(long)]
    gui: bool,

    /// Output report file (.csv, .json)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for auto-generated reports
    #[arg(long, default_value = "dbspy-reports")]
    report_dir: PathBuf,

    /// Don't auto-generate CSV report
    #[arg(long)]
    no_report: bool,

    /// Don't prompt to open report
    #[arg(long)]
    no_open: bool,

    /// Number of parallel workers (default: number of CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Check every file in a directory, not just database extensions
    #[arg(long)]
    all: bool,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache lifetime in seconds
    #[arg(long)]
    ttl: Option<u64>,

    /// Open-probe timeout in milliseconds
    #[arg(long)]
    probe_timeout_ms: Option<u64>,

    /// Show detailed output and debug logs
    #[arg(short, long)]
    verbose: bool,

    /// Only show summary
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the local JSON API
    Serve {
        /// File checked at startup and used when a request names none
        path: Option<PathBuf>,

        /// Port to listen on
        #[arg(short, long, default_value = "3002")]
        port: u16,
    },

    /// List the tables of an unencrypted database
    Tables {
        path: PathBuf,
    },

    /// Describe one table of an unencrypted database
    Table {
        path: PathBuf,
        table: String,
    },
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = load_config(&args);

    // Handle subcommands first
    if let Some(cmd) = args.command {
        match cmd {
            Command::Serve { path, port } => {
                let default_path = path.map(|p| p.to_string_lossy().to_string());
                if let Err(e) = dbspy::serve::start(port, default_path, config) {
                    eprintln!("Server error: {}", e);
                    std::process::exit(1);
                }
            }
            Command::Tables { path } => {
                let db = open_for_inspection(&path, config);
                match db.table_names() {
                    Ok(tables) if tables.is_empty() => println!("No tables found."),
                    Ok(tables) => {
                        for t in tables {
                            println!("{}", t);
                        }
                    }
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            Command::Table { path, table } => {
                let db = open_for_inspection(&path, config);
                match db.table_info(&table) {
                    Ok(info) => {
                        println!("{:<24} {:<12} {:<8} {:<4} {}", "COLUMN", "TYPE", "NULL", "PK", "DEFAULT");
                        println!("{}", "-".repeat(60));
                        for c in &info.columns {
                            println!(
                                "{:<24} {:<12} {:<8} {:<4} {}",
                                truncate(&c.name, 24),
                                c.data_type,
                                if c.nullable { "yes" } else { "no" },
                                if c.primary_key { "yes" } else { "" },
                                c.default_value.as_deref().unwrap_or("")
                            );
                        }
                        match info.row_count {
                            Some(n) => println!("\n{} row(s)", n),
                            None => println!("\nrow count unavailable"),
                        }
                    }
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    }
                }
            }
        }
        return;
    }

    // With GUI feature: launch GUI if --gui flag OR no path provided
    #[cfg(feature = "gui")]
    let use_gui = args.gui || args.path.is_none();

    #[cfg(not(feature = "gui"))]
    let use_gui = false;

    let path = match args.path.clone() {
        Some(p) if !use_gui => p,
        _ => match pick_path(use_gui) {
            Some(p) => p,
            None => std::process::exit(if use_gui { 0 } else { 1 }),
        },
    };

    // Set up thread pool
    if let Some(jobs) = args.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .ok();
    }

    let files = collect_files(&path, args.all);
    if files.is_empty() {
        eprintln!(
            "No database files found (supported: {}; use --all for any file)",
            DATABASE_EXTENSIONS.join(", ")
        );
        std::process::exit(1);
    }

    if !args.quiet {
        eprintln!("\x1b[1mdbspy - Database Classifier\x1b[0m");
        eprintln!("{}", "─".repeat(70));
        eprintln!("Found {} file(s)\n", files.len());
    }

    // Set up progress bar
    let pb = if !args.quiet && files.len() > 1 {
        let pb = ProgressBar::new(files.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    } else {
        None
    };

    let runtime = build_runtime();
    let handle = runtime.handle().clone();
    let detector = Detector::native(config);

    // Classify files in parallel; each worker drives its own detection
    let results: Vec<DetectionResult> = files
        .par_iter()
        .filter_map(|path| {
            let result = handle.block_on(detector.detect(&path.to_string_lossy()));
            if let (Some(pb), Some(r)) = (&pb, &result) {
                pb.inc(1);
                pb.set_message(r.file_name().to_string());
            }
            result
        })
        .collect();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    // Print results
    if !args.quiet {
        for r in &results {
            let color = match r.status {
                ClassificationStatus::Unencrypted => "\x1b[32m", // Green
                ClassificationStatus::Unknown => "\x1b[33m",     // Yellow
                ClassificationStatus::Encrypted => "\x1b[31m",   // Red
                _ => "\x1b[90m",                                 // Gray
            };
            let reset = "\x1b[0m";

            println!(
                "{}{:<14}{} {}",
                color,
                format!("[{}]", r.status),
                reset,
                if args.verbose { r.file_path.as_str() } else { r.file_name() }
            );

            if let Some(ref error) = r.error {
                eprintln!("    {}", error);
            }
        }
    }

    // Summary
    let summary = dbspy::report::Summary::from_results(&results);

    if !args.quiet {
        eprintln!("\n{}", "─".repeat(70));
        eprintln!("\x1b[1mSummary:\x1b[0m");
        eprintln!("  \x1b[32m✓ Unencrypted:\x1b[0m {}", summary.unencrypted);
        eprintln!("  \x1b[31m✗ Encrypted:\x1b[0m   {}", summary.encrypted);
        eprintln!("  \x1b[33m? Unknown:\x1b[0m     {}", summary.unknown);
        if summary.error > 0 {
            eprintln!("  \x1b[90mErrors:\x1b[0m        {}", summary.error);
        }
    }

    // Determine report path
    let report_path = if let Some(ref output) = args.output {
        Some(output.clone())
    } else if !args.no_report {
        // Auto-generate report
        std::fs::create_dir_all(&args.report_dir).ok();
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!("dbspy_report_{}.csv", timestamp);
        Some(args.report_dir.join(filename))
    } else {
        None
    };

    // Generate report
    if let Some(ref output_path) = report_path {
        if let Err(e) = dbspy::report::generate(output_path, &results) {
            eprintln!("Failed to write report: {}", e);
            std::process::exit(1);
        }
        if !args.quiet {
            eprintln!("\n\x1b[32mReport saved: {}\x1b[0m", output_path.display());
        }

        if !args.no_open {
            if use_gui {
                let _ = open::that(output_path);
            } else if !args.quiet {
                eprint!("\nOpen report? [y/N] ");
                io::stderr().flush().ok();

                let mut input = String::new();
                if io::stdin().read_line(&mut input).is_ok() {
                    let input = input.trim().to_lowercase();
                    if input == "y" || input == "yes" {
                        if let Err(e) = open::that(output_path) {
                            eprintln!("Failed to open report: {}", e);
                        }
                    }
                }
            }
        }
    }

    // Exit with appropriate code
    if summary.encrypted > 0 {
        std::process::exit(2);
    } else if summary.error > 0 {
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "dbspy=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(args: &Args) -> DetectorConfig {
    let mut config = match args.config {
        Some(ref path) => match DetectorConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => DetectorConfig::default(),
    };

    if let Some(ttl) = args.ttl {
        config = config.with_cache_ttl(Duration::from_secs(ttl));
    }
    if let Some(ms) = args.probe_timeout_ms {
        config = config.with_probe_timeout(Duration::from_millis(ms));
    }
    config
}

fn build_runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    }
}

/// Classify first; only an unencrypted file is opened for inspection.
fn open_for_inspection(path: &Path, config: DetectorConfig) -> Database {
    let runtime = build_runtime();
    let detector = Detector::native(config);
    let path_str = path.to_string_lossy();

    let checked = runtime
        .block_on(detector.detect(&path_str))
        .ok_or_else(|| "no file path given".to_string())
        .and_then(|r| r.ensure_unencrypted());
    if let Err(e) = checked {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    match Database::open_at(path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    }
}

fn collect_files(path: &Path, all: bool) -> Vec<PathBuf> {
    if !path.is_dir() {
        return vec![path.to_path_buf()];
    }

    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            all || e
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| DATABASE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

#[cfg(feature = "gui")]
fn pick_path(use_gui: bool) -> Option<PathBuf> {
    if !use_gui {
        return None;
    }
    let picked = rfd::FileDialog::new()
        .set_title("Select database file to check")
        .add_filter("Database files", DATABASE_EXTENSIONS)
        .add_filter("All files", &["*"])
        .pick_file();
    if picked.is_none() {
        eprintln!("No file selected.");
    }
    picked
}

#[cfg(not(feature = "gui"))]
fn pick_path(_use_gui: bool) -> Option<PathBuf> {
    eprintln!("Usage: dbspy <PATH>");
    eprintln!("Run 'dbspy --help' for more options.");
    eprintln!("Note: GUI mode not available in this build.");
    None
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
