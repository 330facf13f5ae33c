//! Detector findings and the sink they are delivered to.
//!
//! A finding is a timestamp-less record attributing one measured metric to
//! a code address. The text rendering below is stable output consumed by
//! downstream tooling; changing any of these lines is a breaking change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which detector produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorTag {
    ArithmeticMix,
    Entropy,
    TaintGraph,
    LogPassthrough,
}

impl DetectorTag {
    /// Short identifier used in structured output.
    pub fn name(self) -> &'static str {
        match self {
            DetectorTag::ArithmeticMix => "arithmetic-mix",
            DetectorTag::Entropy => "entropy",
            DetectorTag::TaintGraph => "taint-graph",
            DetectorTag::LogPassthrough => "log",
        }
    }
}

/// The measured quantity behind a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Share of xor/shx/and/or/rox instructions in a translated block.
    SymmetricRatio(f64),
    /// Share of mul/div/add instructions in a translated block.
    AsymmetricRatio(f64),
    /// Absolute entropy difference between frame entry and exit.
    EntropyDiff(f64),
    /// Scaled entropy of bytes read before the frame wrote.
    EntropyBefore(f64),
    /// Scaled entropy of bytes written within the frame.
    EntropyAfter(f64),
    /// A dense contiguous cluster in the read-to-write address graph.
    TaintCluster {
        block_size: usize,
        quotient: u64,
        accesses: u64,
    },
    /// A log line passed through verbatim.
    LogLine(String),
}

/// One detector finding attributed to a code address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Which detector produced this finding.
    pub detector: DetectorTag,
    /// Code address the finding is attributed to (0 for log lines).
    pub address: u32,
    /// The measured quantity that triggered the finding.
    pub metric: Metric,
}

impl Finding {
    pub fn symmetric_cipher(address: u32, ratio: f64) -> Self {
        Finding {
            detector: DetectorTag::ArithmeticMix,
            address,
            metric: Metric::SymmetricRatio(ratio),
        }
    }

    pub fn asymmetric_cipher(address: u32, ratio: f64) -> Self {
        Finding {
            detector: DetectorTag::ArithmeticMix,
            address,
            metric: Metric::AsymmetricRatio(ratio),
        }
    }

    pub fn entropy_diff(address: u32, diff: f64) -> Self {
        Finding {
            detector: DetectorTag::Entropy,
            address,
            metric: Metric::EntropyDiff(diff),
        }
    }

    pub fn entropy_before(address: u32, entropy: f64) -> Self {
        Finding {
            detector: DetectorTag::Entropy,
            address,
            metric: Metric::EntropyBefore(entropy),
        }
    }

    pub fn entropy_after(address: u32, entropy: f64) -> Self {
        Finding {
            detector: DetectorTag::Entropy,
            address,
            metric: Metric::EntropyAfter(entropy),
        }
    }

    pub fn taint_cluster(address: u32, block_size: usize, quotient: u64, accesses: u64) -> Self {
        Finding {
            detector: DetectorTag::TaintGraph,
            address,
            metric: Metric::TaintCluster {
                block_size,
                quotient,
                accesses,
            },
        }
    }

    pub fn log_line(line: String) -> Self {
        Finding {
            detector: DetectorTag::LogPassthrough,
            address: 0,
            metric: Metric::LogLine(line),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.metric {
            Metric::SymmetricRatio(ratio) => write!(
                f,
                "Detected Symmetric cipher: 0x{:x}, percentage: {}",
                self.address, ratio
            ),
            Metric::AsymmetricRatio(ratio) => write!(
                f,
                "Detected Asymmetric cipher: 0x{:x}, percentage: {}",
                self.address, ratio
            ),
            Metric::EntropyDiff(diff) => {
                write!(f, "Entropy - diff: {}, 0x{:x}", diff, self.address)
            }
            Metric::EntropyBefore(entropy) => {
                write!(f, "Entropy - before: {}, 0x{:x}", entropy, self.address)
            }
            Metric::EntropyAfter(entropy) => {
                write!(f, "Entropy - after: {}, 0x{:x}", entropy, self.address)
            }
            Metric::TaintCluster {
                block_size,
                quotient,
                accesses,
            } => write!(
                f,
                "Taint - Graph size: {} Quotient: {}, Accesses in Block: {}, 0x{:x}",
                block_size, quotient, accesses, self.address
            ),
            Metric::LogLine(line) => write!(f, "{line}"),
        }
    }
}

/// Receives findings as they are produced.
///
/// The sink is shared by every detector of a file and, under parallel
/// processing, across files; implementations must be line-atomic.
pub type FindingSink = Arc<dyn Fn(Finding) + Send + Sync>;

/// Sink printing the stable text line per finding to stdout.
pub fn line_sink() -> FindingSink {
    Arc::new(|finding| println!("{finding}"))
}

/// Sink printing one JSON object per finding to stdout.
pub fn json_sink() -> FindingSink {
    Arc::new(|finding| match serde_json::to_string(&finding) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!("unserializable finding: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_symmetric_line() {
        let line = Finding::symmetric_cipher(0x1000, 0.5).to_string();
        assert_eq!(line, "Detected Symmetric cipher: 0x1000, percentage: 0.5");
    }

    #[test]
    fn test_asymmetric_line() {
        let line = Finding::asymmetric_cipher(0x401af0, 0.125).to_string();
        assert_eq!(
            line,
            "Detected Asymmetric cipher: 0x401af0, percentage: 0.125"
        );
    }

    #[test]
    fn test_entropy_lines() {
        assert_eq!(
            Finding::entropy_diff(0x2000, 0.75).to_string(),
            "Entropy - diff: 0.75, 0x2000"
        );
        assert_eq!(
            Finding::entropy_before(0x2000, 1.0).to_string(),
            "Entropy - before: 1, 0x2000"
        );
        assert_eq!(
            Finding::entropy_after(0x2000, 0.25).to_string(),
            "Entropy - after: 0.25, 0x2000"
        );
    }

    #[test]
    fn test_taint_line_renders_integer_quotient() {
        let line = Finding::taint_cluster(0x3000, 16, 15, 32).to_string();
        assert_eq!(
            line,
            "Taint - Graph size: 16 Quotient: 15, Accesses in Block: 32, 0x3000"
        );
    }

    #[test]
    fn test_log_line_is_verbatim() {
        let line = Finding::log_line("LoadLibraryA kernel32.dll".into()).to_string();
        assert_eq!(line, "LoadLibraryA kernel32.dll");
    }

    #[test]
    fn test_finding_serde_round_trip() {
        let finding = Finding::taint_cluster(0x3000, 16, 15, 32);
        let json = serde_json::to_string(&finding).unwrap();
        let back: Finding = serde_json::from_str(&json).unwrap();
        assert_eq!(finding, back);
    }
}
