//! Taint-graph clustering detector.
//!
//! Builds, per call frame, a graph from addresses read to addresses
//! subsequently written. Memory events accumulate in pending read/write
//! buffers spanning a *phase*, a maximal run of same-direction accesses;
//! the write-to-read transition flushes every (read, write) pair into the
//! frame's adjacency map. On return the graph is scanned for dense
//! contiguous address clusters: a tight block of addresses feeding writes
//! back into its own neighborhood is the signature of an in-place
//! transformation loop such as a cipher round function.

use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::detectors::{expand_bytes, Detector, MAX_FRAME_DEPTH};
use crate::event::{Event, FunctionKind};
use crate::findings::{Finding, FindingSink};

/// Tunables for the cluster scan.
#[derive(Debug, Clone)]
pub struct TaintConfig {
    /// Minimal density quotient for a finding.
    pub threshold: u64,
    /// Half-width of the address window edges must land in to keep a
    /// block growing.
    pub neighborhood: u32,
    /// Edges into the window required to keep a block growing.
    pub needed_edges: usize,
    /// Blocks shorter than this are discarded outright.
    pub min_block_size: usize,
    /// Minimal block length for a finding.
    pub emit_min_block_size: usize,
}

impl Default for TaintConfig {
    fn default() -> Self {
        TaintConfig {
            threshold: 3,
            neighborhood: 8,
            needed_edges: 8,
            min_block_size: 4,
            emit_min_block_size: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Read,
    Write,
}

struct Frame {
    eip: u32,
    /// Read address to the set of write addresses observed downstream.
    graph: HashMap<u32, HashSet<u32>>,
    /// Times each byte address was touched, reads and writes alike.
    access_counts: HashMap<u32, u32>,
}

impl Frame {
    fn new(eip: u32) -> Self {
        Frame {
            eip,
            graph: HashMap::new(),
            access_counts: HashMap::new(),
        }
    }
}

/// Flags dense contiguous clusters in the per-frame read/write graph.
pub struct TaintGraphDetector {
    sink: FindingSink,
    config: TaintConfig,
    frames: Vec<Frame>,
    phase: Phase,
    pending_reads: Vec<u32>,
    pending_writes: Vec<u32>,
    depth_warned: bool,
}

impl TaintGraphDetector {
    pub fn new(sink: FindingSink) -> Self {
        Self::with_config(sink, TaintConfig::default())
    }

    pub fn with_config(sink: FindingSink, config: TaintConfig) -> Self {
        TaintGraphDetector {
            sink,
            config,
            frames: vec![Frame::new(0)],
            phase: Phase::Read,
            pending_reads: Vec::new(),
            pending_writes: Vec::new(),
            depth_warned: false,
        }
    }

    /// Number of live frames, synthetic root included.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Drain the pending buffers into the current frame's graph.
    ///
    /// Both buffers deduplicate to sets; every (read, write) pair becomes
    /// an edge, and every participating address gets a graph entry even
    /// when it only ever appears as a target.
    fn flush_edges(&mut self) {
        let reads: HashSet<u32> = self.pending_reads.drain(..).collect();
        let writes: HashSet<u32> = self.pending_writes.drain(..).collect();
        if reads.is_empty() || writes.is_empty() {
            return;
        }
        let frame = self.frames.last_mut().expect("root frame always present");
        for &write in &writes {
            frame.graph.entry(write).or_default();
        }
        for &read in &reads {
            frame
                .graph
                .entry(read)
                .or_default()
                .extend(writes.iter().copied());
        }
    }

    fn record_access(&mut self, address: u32, value: u32, size_bits: u8, is_write: bool) {
        let phase = if is_write { Phase::Write } else { Phase::Read };
        if phase == Phase::Read && self.phase == Phase::Write {
            self.flush_edges();
        }
        self.phase = phase;

        let frame = self.frames.last_mut().expect("root frame always present");
        for (addr, _) in expand_bytes(address, value, size_bits) {
            *frame.access_counts.entry(addr).or_insert(0) += 1;
            match phase {
                Phase::Read => self.pending_reads.push(addr),
                Phase::Write => self.pending_writes.push(addr),
            }
        }
    }

    fn on_call(&mut self, eip: u32) {
        self.flush_edges();
        if self.frames.len() >= MAX_FRAME_DEPTH {
            if !self.depth_warned {
                warn!("taint frame stack exceeded {MAX_FRAME_DEPTH}, dropping oldest");
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
        self.flush_edges();
        let frame = self.frames.pop().expect("checked above");
        self.analyze(&frame);
    }

    /// Scan a returned frame's graph for its densest contiguous cluster.
    fn analyze(&self, frame: &Frame) {
        let blocks = extract_blocks(&frame.graph, &self.config);
        let mut max_quotient: u64 = 0;
        let mut max_block: &[u32] = &[];
        for block in &blocks {
            let quotient = block_quotient(&frame.graph, block);
            if quotient > max_quotient {
                max_quotient = quotient;
                max_block = block;
            }
        }

        if max_quotient >= self.config.threshold
            && max_quotient as f64 >= max_block.len() as f64 * 2.0 / 3.0
            && max_block.len() >= self.config.emit_min_block_size
        {
            let accesses: u64 = max_block
                .iter()
                .map(|addr| u64::from(frame.access_counts.get(addr).copied().unwrap_or(0)))
                .sum();
            (self.sink)(Finding::taint_cluster(
                frame.eip,
                max_block.len(),
                max_quotient,
                accesses,
            ));
        }
    }
}

/// Split the graph's key space into contiguous, well-connected blocks.
///
/// Keys are walked in ascending order. A block keeps growing while the
/// next key is exactly `prev + 1` and has at least `needed_edges` targets
/// strictly within `neighborhood` of it; any other key starts a new
/// block. Blocks below `min_block_size` are dropped.
fn extract_blocks(graph: &HashMap<u32, HashSet<u32>>, config: &TaintConfig) -> Vec<Vec<u32>> {
    let mut keys: Vec<u32> = graph.keys().copied().collect();
    keys.sort_unstable();

    let mut blocks = Vec::new();
    let mut current: Vec<u32> = Vec::new();
    for key in keys {
        let breaks = current.last().is_some_and(|&prev| {
            prev.wrapping_add(1) != key
                || near_edge_count(graph, key, config.neighborhood) < config.needed_edges
        });
        if breaks {
            blocks.push(std::mem::take(&mut current));
        }
        current.push(key);
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks.retain(|block| block.len() >= config.min_block_size);
    blocks
}

/// Number of `key`'s targets landing strictly within `neighborhood`.
fn near_edge_count(graph: &HashMap<u32, HashSet<u32>>, key: u32, neighborhood: u32) -> usize {
    graph.get(&key).map_or(0, |targets| {
        targets
            .iter()
            .filter(|&&target| key.abs_diff(target) < neighborhood)
            .count()
    })
}

/// Directed intra-block edge count divided by block size.
///
/// Integer division is load-bearing: the emitted quotient is an integer
/// and the thresholds are calibrated against the truncated value.
fn block_quotient(graph: &HashMap<u32, HashSet<u32>>, block: &[u32]) -> u64 {
    if block.is_empty() {
        return 0;
    }
    let mut edges: u64 = 0;
    for &source in block {
        if let Some(targets) = graph.get(&source) {
            edges += block
                .iter()
                .filter(|&&other| other != source && targets.contains(&other))
                .count() as u64;
        }
    }
    edges / block.len() as u64
}

impl Detector for TaintGraphDetector {
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
