//! Trace Analyzer - Crypto Detection in Emulator Execution Traces
//!
//! This library reconstructs event streams from the binary dump files an
//! instrumented x86 emulator writes per `(process, thread)` pair, and
//! runs a pipeline of independent heuristic detectors over them to flag
//! cryptographic and obfuscation-related code regions.
//!
//! # Detectors
//!
//! - **Arithmetic mix**: classifies translated basic blocks whose
//!   instruction mix leans on bit-mixing (symmetric ciphers) or
//!   mul/div/add chains (asymmetric ciphers)
//! - **Entropy differential**: compares the entropy of bytes a call frame
//!   read against the bytes it wrote
//! - **Taint-graph clustering**: finds dense contiguous address clusters
//!   in the per-frame read-to-write graph
//!
//! Detectors are independent; each maintains its own call-frame stack,
//! drains per-frame accumulators on return, and reports findings through
//! a shared line-atomic sink.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use trace_analyzer::{analyze_directory, line_sink};
//!
//! fn main() -> Result<(), trace_analyzer::AnalyzerError> {
//!     let summary = analyze_directory("trace-output/".as_ref(), &line_sink())?;
//!     eprintln!("{} dump files, {} failures", summary.dump_files, summary.failures);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod codec;
pub mod detectors;
pub mod driver;
pub mod error;
pub mod event;
pub mod findings;
pub mod logfile;
pub mod registry;

pub use codec::{encode_event, DumpReader};
pub use detectors::{
    ArithmeticMixDetector, Detector, EntropyDetector, LogPassthrough, TaintGraphDetector,
};
pub use driver::{AnalysisSummary, Analyzer, TraceName};
pub use error::{AnalyzerError, Result};
pub use event::{Event, FunctionKind, InsnClass, Translation};
pub use findings::{json_sink, line_sink, DetectorTag, Finding, FindingSink, Metric};
pub use logfile::LogReader;
pub use registry::{ExportRegistry, ImageRegistry, LoadedImage};

use std::path::Path;

/// Analyze every trace file directly under `dir` with default settings.
///
/// Equivalent to [`Analyzer::new`] followed by
/// [`Analyzer::analyze_directory`].
pub fn analyze_directory(dir: &Path, sink: &FindingSink) -> Result<AnalysisSummary> {
    Analyzer::new().analyze_directory(dir, sink)
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_analyze_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink: FindingSink = Arc::new(|_| {});
        let summary = analyze_directory(dir.path(), &sink).unwrap();
        assert_eq!(summary, AnalysisSummary::default());
    }

    #[test]
    fn test_empty_dump_file_yields_no_findings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty 1 1.dump"), b"").unwrap();

        let found = Arc::new(Mutex::new(Vec::new()));
        let sink_found = Arc::clone(&found);
        let sink: FindingSink = Arc::new(move |f| sink_found.lock().unwrap().push(f));

        let summary = analyze_directory(dir.path(), &sink).unwrap();
        assert_eq!(summary.dump_files, 1);
        assert_eq!(summary.failures, 0);
        assert!(found.lock().unwrap().is_empty());
    }
}
