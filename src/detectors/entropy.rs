//! Entropy-differential detector.
//!
//! Records, per call frame, the bytes a function read before writing
//! (`before`) and the bytes it wrote (`after`), keyed by address. On
//! return the scaled Shannon entropy of both populations is compared: a
//! routine that turns high-entropy input into high-entropy output of
//! noticeably different entropy is behaving like a cipher or packer
//! stage. Deeply nesting frames are skipped; the interesting work sits
//! near the leaves.

use std::collections::HashMap;
use tracing::warn;

use crate::detectors::{expand_bytes, Detector, MAX_FRAME_DEPTH};
use crate::event::{Event, FunctionKind};
use crate::findings::{Finding, FindingSink};

/// Minimum entropy difference worth reporting.
const DIFF_THRESHOLD: f64 = 0.3;
/// Both populations must clear this entropy for a diff finding.
const MIN_ENTROPY: f64 = 0.5;
/// Frames whose nesting high-water mark exceeds this are skipped.
const MAX_NESTING: u32 = 3;
/// A frame must write more than this many distinct bytes to be analyzed.
const MIN_AFTER_BYTES: usize = 16;
/// Populations smaller than this yield entropy 0.
const MIN_SAMPLE: usize = 100;

/// Scaled Shannon entropy of a byte population, in `[0, 1]`.
///
/// Entropy over the byte-value histogram, normalized by
/// `log2(min(N, 256))` so a maximally mixed population scores 1
/// regardless of its size. Populations under [`MIN_SAMPLE`] score 0:
/// too small to read anything into.
pub fn scaled_entropy(bytes: &HashMap<u32, u8>) -> f64 {
    let n = bytes.len();
    if n < MIN_SAMPLE {
        return 0.0;
    }
    let mut histogram = [0u32; 256];
    for &byte in bytes.values() {
        histogram[byte as usize] += 1;
    }
    let total = n as f64;
    let mut sum = 0.0;
    for &count in histogram.iter().filter(|&&c| c > 0) {
        let p = f64::from(count) / total;
        sum += p * p.log2();
    }
    -sum / total.min(256.0).log2()
}

struct Frame {
    eip: u32,
    before: HashMap<u32, u8>,
    after: HashMap<u32, u8>,
    /// Nesting high-water mark: 1 + the deepest chain of calls observed
    /// beneath this frame, propagated upward on each return.
    depth: u32,
}

impl Frame {
    fn new(eip: u32) -> Self {
        Frame {
            eip,
            before: HashMap::new(),
            after: HashMap::new(),
            depth: 1,
        }
    }
}

/// Flags call frames whose input and output byte entropies diverge.
pub struct EntropyDetector {
    sink: FindingSink,
    frames: Vec<Frame>,
    depth_warned: bool,
}

impl EntropyDetector {
    pub fn new(sink: FindingSink) -> Self {
        EntropyDetector {
            sink,
            frames: vec![Frame::new(0)],
            depth_warned: false,
        }
    }

    /// Number of live frames, synthetic root included.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    fn record_access(&mut self, address: u32, value: u32, size_bits: u8, is_write: bool) {
        let frame = self.frames.last_mut().expect("root frame always present");
        for (addr, byte) in expand_bytes(address, value, size_bits) {
            if is_write {
                frame.after.insert(addr, byte);
            } else {
                frame.before.insert(addr, byte);
            }
        }
    }

    fn on_call(&mut self, eip: u32) {
        if self.frames.len() >= MAX_FRAME_DEPTH {
            if !self.depth_warned {
                warn!("entropy frame stack exceeded {MAX_FRAME_DEPTH}, dropping oldest");
                self.depth_warned = true;
            }
            self.frames.remove(1);
        }
        self.frames.push(Frame::new(eip));
    }

    fn on_return(&mut self) {
        if self.frames.len() == 1 {
            // Unmatched return; the synthetic root persists.
            return;
        }
        let frame = self.frames.pop().expect("checked above");
        let parent = self.frames.last_mut().expect("root frame always present");
        parent.depth = parent.depth.max(frame.depth + 1);

        if frame.depth <= MAX_NESTING
            && !frame.before.is_empty()
            && frame.after.len() > MIN_AFTER_BYTES
        {
            let before = scaled_entropy(&frame.before);
            let after = scaled_entropy(&frame.after);
            let diff = (before - after).abs();
            if before > MIN_ENTROPY && after > MIN_ENTROPY && diff > DIFF_THRESHOLD {
                (self.sink)(Finding::entropy_diff(frame.eip, diff));
            }
            if before > 0.0 {
                (self.sink)(Finding::entropy_before(frame.eip, before));
            }
            if after > 0.0 {
                (self.sink)(Finding::entropy_after(frame.eip, after));
            }
        }
    }
}

impl Detector for EntropyDetector {
    fn feed(&mut self, event: &Event) {
        match event {
            Event::MemoryAccess {
                address,
                value,
                size_bits,
                is_write,
            } => self.record_access(*address, *value, *size_bits, *is_write),
            Event::Function { eip, kind } => match kind {
                FunctionKind::Call => self.on_call(*eip),
                FunctionKind::Return => self.on_return(),
            },
            _ => {}
        }
    }
}
