//! Arithmetic-mix detector.
//!
//! Classifies translated basic blocks by their instruction-class mix.
//! Symmetric ciphers lean on bit-mixing instructions (xor, shifts,
//! and/or, rotates); asymmetric ciphers on multiply/divide/add chains
//! over big-number limbs. Decisions are purely per-block; the call stack
//! is tracked only as context.

use tracing::warn;

use crate::detectors::{Detector, MAX_FRAME_DEPTH};
use crate::event::{Event, FunctionKind, InsnClass, Translation};
use crate::findings::{Finding, FindingSink};

/// Minimum reported block length for the symmetric test.
const SYMMETRIC_MIN_TOTAL: u32 = 20;
/// Minimum reported block length for the asymmetric test.
const ASYMMETRIC_MIN_TOTAL: u32 = 10;
/// Bit-mixing share at or above which a block reads as a symmetric cipher.
const SYMMETRIC_RATIO: f64 = 0.40;
/// Mul/div/add share at or above which a block reads as an asymmetric cipher.
const ASYMMETRIC_RATIO: f64 = 0.10;

fn is_symmetric_class(class: InsnClass) -> bool {
    matches!(
        class,
        InsnClass::Xor | InsnClass::Shx | InsnClass::And | InsnClass::Or | InsnClass::Rox
    )
}

fn is_asymmetric_class(class: InsnClass) -> bool {
    matches!(class, InsnClass::Mul | InsnClass::Div | InsnClass::Add)
}

/// Flags cipher-like instruction mixes in translated basic blocks.
pub struct ArithmeticMixDetector {
    sink: FindingSink,
    callstack: Vec<u32>,
    depth_warned: bool,
}

impl ArithmeticMixDetector {
    pub fn new(sink: FindingSink) -> Self {
        ArithmeticMixDetector {
            sink,
            callstack: vec![0],
            depth_warned: false,
        }
    }

    /// Number of live frames, synthetic root included.
    pub fn frame_depth(&self) -> usize {
        self.callstack.len()
    }

    fn scan_block(&self, block: &Translation) {
        // The denominator excludes movs, which carry no arithmetic signal.
        let denom = i64::from(block.total_count) - i64::from(block.mov_count);
        if denom <= 0 {
            return;
        }
        let denom = denom as f64;

        if block.total_count >= SYMMETRIC_MIN_TOTAL {
            let matches = block
                .instructions
                .iter()
                .filter(|&&c| is_symmetric_class(c))
                .count();
            let ratio = matches as f64 / denom;
            if ratio >= SYMMETRIC_RATIO {
                (self.sink)(Finding::symmetric_cipher(block.addr, ratio));
            }
        }

        if block.total_count >= ASYMMETRIC_MIN_TOTAL {
            let matches = block
                .instructions
                .iter()
                .filter(|&&c| is_asymmetric_class(c))
                .count();
            let ratio = matches as f64 / denom;
            if ratio >= ASYMMETRIC_RATIO {
                (self.sink)(Finding::asymmetric_cipher(block.addr, ratio));
            }
        }
    }

    fn on_call(&mut self, eip: u32) {
        if self.callstack.len() >= MAX_FRAME_DEPTH {
            if !self.depth_warned {
                warn!("call stack exceeded {MAX_FRAME_DEPTH} frames, dropping oldest");
                self.depth_warned = true;
            }
            self.callstack.remove(1);
        }
        self.callstack.push(eip);
    }

    fn on_return(&mut self) {
        // The synthetic root persists for trailing events.
        if self.callstack.len() > 1 {
            self.callstack.pop();
        }
    }
}

impl Detector for ArithmeticMixDetector {
    fn feed(&mut self, event: &Event) {
        match event {
            Event::BblTranslate(block) => self.scan_block(block),
            Event::Function { eip, kind } => match kind {
                FunctionKind::Call => self.on_call(*eip),
                FunctionKind::Return => self.on_return(),
            },
            _ => {}
        }
    }
}
