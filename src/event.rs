//! Core event model for decoded trace records.
//!
//! A trace is a flat stream of four record kinds reported by the
//! instrumented emulator: memory accesses, function transitions,
//! basic-block executions, and basic-block translations. Consumers
//! pattern-match exhaustively on the tag; there are no nullable fields.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction categories reported with each translated basic block.
///
/// The emulator encodes these as 32-bit integers on the wire. Values
/// outside the known set decode to [`InsnClass::Unknown`] so that a trace
/// from a newer emulator still parses; unknown classes never count toward
/// any cipher test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsnClass {
    Mov,
    Xor,
    Shx,
    And,
    Or,
    Rox,
    Mul,
    Div,
    Bit,
    Add,
    Other,
    Counter,
    /// Wire value outside the known set.
    Unknown(u32),
}

impl InsnClass {
    /// Decode a wire value into an instruction class.
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => InsnClass::Mov,
            1 => InsnClass::Xor,
            2 => InsnClass::Shx,
            3 => InsnClass::And,
            4 => InsnClass::Or,
            5 => InsnClass::Rox,
            6 => InsnClass::Mul,
            7 => InsnClass::Div,
            8 => InsnClass::Bit,
            9 => InsnClass::Add,
            10 => InsnClass::Other,
            11 => InsnClass::Counter,
            other => InsnClass::Unknown(other),
        }
    }

    /// The 32-bit value this class is encoded as on the wire.
    pub fn wire(self) -> u32 {
        match self {
            InsnClass::Mov => 0,
            InsnClass::Xor => 1,
            InsnClass::Shx => 2,
            InsnClass::And => 3,
            InsnClass::Or => 4,
            InsnClass::Rox => 5,
            InsnClass::Mul => 6,
            InsnClass::Div => 7,
            InsnClass::Bit => 8,
            InsnClass::Add => 9,
            InsnClass::Other => 10,
            InsnClass::Counter => 11,
            InsnClass::Unknown(value) => value,
        }
    }
}

impl fmt::Display for InsnClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsnClass::Mov => write!(f, "mov"),
            InsnClass::Xor => write!(f, "xor"),
            InsnClass::Shx => write!(f, "shx"),
            InsnClass::And => write!(f, "and"),
            InsnClass::Or => write!(f, "or"),
            InsnClass::Rox => write!(f, "rox"),
            InsnClass::Mul => write!(f, "mul"),
            InsnClass::Div => write!(f, "div"),
            InsnClass::Bit => write!(f, "bit"),
            InsnClass::Add => write!(f, "add"),
            InsnClass::Other => write!(f, "other"),
            InsnClass::Counter => write!(f, "counter"),
            InsnClass::Unknown(value) => write!(f, "unknown({value})"),
        }
    }
}

/// Direction of a function transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Call,
    Return,
}

/// One translated basic block with its instruction-class breakdown.
///
/// `total_count` and `mov_count` are reported separately by the emulator
/// and are not derived from `instructions`; the cipher ratio tests use
/// `total_count - mov_count` as their denominator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    /// Address of the first instruction of the block.
    pub addr: u32,
    /// Classified instructions in block order.
    pub instructions: Vec<InsnClass>,
    /// Total instruction count reported by the emulator.
    pub total_count: u32,
    /// Number of mov-class instructions reported by the emulator.
    pub mov_count: u32,
}

/// One decoded trace record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// A memory read or write of 8, 16, or 32 bits.
    MemoryAccess {
        address: u32,
        value: u32,
        size_bits: u8,
        is_write: bool,
    },
    /// A function call or return observed at `eip`.
    Function { eip: u32, kind: FunctionKind },
    /// Execution of an already-translated basic block.
    BblExec { addr: u32 },
    /// Translation of a basic block, with instruction classes.
    BblTranslate(Translation),
}
