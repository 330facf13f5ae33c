//! Directory driver: scans a trace directory and fans events out.
//!
//! Every `(process, thread)` pair the emulator observed leaves one
//! `*.dump` file (binary event records) and optionally one `*.log` file
//! (pre-rendered in-emulator heuristics) in the output directory. Each
//! dump file gets a fresh set of detectors; decode failures abort that
//! file only.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec::DumpReader;
use crate::detectors::{
    ArithmeticMixDetector, Detector, EntropyDetector, LogPassthrough, TaintGraphDetector,
};
use crate::error::{AnalyzerError, Result};
use crate::event::{Event, FunctionKind};
use crate::findings::FindingSink;
use crate::logfile::LogReader;
use crate::registry::{ExportRegistry, ImageRegistry};

/// Display identity parsed from a trace filename.
///
/// The emulator names its outputs `"<name> <pid> <tid>.dump"` (or
/// `.log`); the pieces are used solely for display. Filenames that do
/// not follow the convention fall back to the bare stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceName {
    /// Executable name as reported by the emulator.
    pub name: String,
    /// Process id, kept as reported.
    pub pid: String,
    /// Thread id, kept as reported.
    pub tid: String,
}

impl TraceName {
    pub fn from_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut parts = stem.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(pid), Some(tid)) => TraceName {
                name: name.to_string(),
                pid: pid.to_string(),
                tid: tid.to_string(),
            },
            _ => TraceName {
                name: stem,
                pid: "?".to_string(),
                tid: "?".to_string(),
            },
        }
    }
}

impl fmt::Display for TraceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {}, tid {})", self.name, self.pid, self.tid)
    }
}

/// Per-run totals reported back to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisSummary {
    /// Dump files found and attempted.
    pub dump_files: usize,
    /// Log files found and attempted.
    pub log_files: usize,
    /// Files abandoned on a decode or I/O error.
    pub failures: usize,
}

/// Drives the detector pipeline over a trace directory.
#[derive(Debug, Default)]
pub struct Analyzer {
    registry: Option<ExportRegistry>,
    #[cfg(feature = "parallel")]
    parallel: bool,
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve observed call targets against `registry` (debug logging).
    pub fn with_registry(mut self, registry: ExportRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Process dump files across the rayon pool instead of sequentially.
    /// Findings interleave at line granularity; the sink must tolerate
    /// concurrent callers.
    #[cfg(feature = "parallel")]
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// Analyze every `*.dump` and `*.log` file directly under `dir`.
    ///
    /// Per-file failures are logged, counted, and do not stop the run;
    /// only an unscannable directory fails the whole call.
    pub fn analyze_directory(&self, dir: &Path, sink: &FindingSink) -> Result<AnalysisSummary> {
        if !dir.is_dir() {
            return Err(AnalyzerError::NotADirectory {
                path: dir.to_path_buf(),
            });
        }
        let mut dumps: Vec<PathBuf> = Vec::new();
        let mut logs: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("dump") => dumps.push(path),
                Some("log") => logs.push(path),
                _ => {}
            }
        }
        dumps.sort();
        logs.sort();

        let mut summary = AnalysisSummary {
            dump_files: dumps.len(),
            log_files: logs.len(),
            failures: 0,
        };

        summary.failures += self.process_dumps(&dumps, sink);
        for path in &logs {
            if let Err(e) = self.process_log_file(path, sink) {
                warn!("abandoning {}: {e}", path.display());
                summary.failures += 1;
            }
        }
        Ok(summary)
    }

    #[cfg(feature = "parallel")]
    fn process_dumps(&self, dumps: &[PathBuf], sink: &FindingSink) -> usize {
        use rayon::prelude::*;
        if self.parallel {
            return dumps
                .par_iter()
                .filter(|path| self.try_dump(path, sink).is_none())
                .count();
        }
        dumps
            .iter()
            .filter(|path| self.try_dump(path, sink).is_none())
            .count()
    }

    #[cfg(not(feature = "parallel"))]
    fn process_dumps(&self, dumps: &[PathBuf], sink: &FindingSink) -> usize {
        dumps
            .iter()
            .filter(|path| self.try_dump(path, sink).is_none())
            .count()
    }

    fn try_dump(&self, path: &Path, sink: &FindingSink) -> Option<()> {
        match self.process_dump_file(path, sink) {
            Ok(()) => Some(()),
            Err(e) => {
                warn!("abandoning {}: {e}", path.display());
                None
            }
        }
    }

    /// Run all detectors over one dump file.
    pub fn process_dump_file(&self, path: &Path, sink: &FindingSink) -> Result<()> {
        let trace = TraceName::from_path(path);
        info!("analyzing {trace}");

        let reader = DumpReader::open(path)?;
        let mut detectors: Vec<Box<dyn Detector>> = vec![
            Box::new(TaintGraphDetector::new(Arc::clone(sink))),
            Box::new(EntropyDetector::new(Arc::clone(sink))),
            Box::new(ArithmeticMixDetector::new(Arc::clone(sink))),
        ];

        for event in reader {
            let event = event?;
            if let Event::Function {
                eip,
                kind: FunctionKind::Call,
            } = &event
            {
                match self.registry.as_ref().and_then(|r| r.symbol_at(*eip)) {
                    Some(symbol) => debug!("call to {symbol} (0x{eip:x})"),
                    None => debug!("call to 0x{eip:x}"),
                }
            }
            for detector in &mut detectors {
                detector.feed(&event);
            }
        }
        Ok(())
    }

    /// Pass one heuristic log file through to the sink.
    pub fn process_log_file(&self, path: &Path, sink: &FindingSink) -> Result<()> {
        let trace = TraceName::from_path(path);
        info!("reading heuristic log {trace}");

        let mut passthrough = LogPassthrough::new(Arc::clone(sink));
        for line in LogReader::open(path)? {
            passthrough.feed_line(line?);
        }
        Ok(())
    }
}
