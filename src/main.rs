//! Trace Analyzer CLI
//!
//! Command-line tool running the crypto-detection heuristics over a
//! directory of emulator trace dumps.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use trace_analyzer::{json_sink, line_sink, AnalysisSummary, Analyzer, FindingSink};

/// Heuristic crypto detection over emulator execution traces.
///
/// Scans a directory for `*.dump` and `*.log` trace files and prints one
/// finding per line.
#[derive(Parser, Debug)]
#[command(name = "trace-analyze")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing the emulator's trace output
    directory: PathBuf,

    /// Output format for findings
    #[arg(short, long, default_value = "lines")]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (findings only, no summary)
    #[arg(short, long)]
    quiet: bool,

    /// Process dump files in parallel
    #[cfg(feature = "parallel")]
    #[arg(short, long)]
    parallel: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Stable one-line-per-finding text
    Lines,
    /// One JSON object per finding
    Json,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("trace_analyzer=debug")
            .init();
    }

    match run(&args) {
        Ok(summary) => {
            if !args.quiet {
                eprintln!(
                    "analyzed {} dump file(s), {} log file(s); {} failed",
                    summary.dump_files, summary.log_files, summary.failures
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<AnalysisSummary> {
    let sink: FindingSink = match args.format {
        OutputFormat::Lines => line_sink(),
        OutputFormat::Json => json_sink(),
    };

    let analyzer = Analyzer::new();
    #[cfg(feature = "parallel")]
    let analyzer = analyzer.parallel(args.parallel);

    analyzer
        .analyze_directory(&args.directory, &sink)
        .with_context(|| format!("analyzing {}", args.directory.display()))
}
