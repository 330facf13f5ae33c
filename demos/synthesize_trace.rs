//! Synthesizes a small trace directory and runs the full pipeline on it.
//!
//! ```bash
//! cargo run --example synthesize_trace
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use trace_analyzer::{
    analyze_directory, encode_event, line_sink, Event, FunctionKind, InsnClass, Translation,
};

fn trace_events() -> Vec<Event> {
    let mut events = vec![Event::Function {
        eip: 0x40_1000,
        kind: FunctionKind::Call,
    }];

    // An in-place transformation loop: read a 16-byte state, write it back.
    for i in 0..16 {
        events.push(Event::MemoryAccess {
            address: 0x12_0080 + i,
            value: i * 17,
            size_bits: 8,
            is_write: false,
        });
    }
    for i in 0..16 {
        events.push(Event::MemoryAccess {
            address: 0x12_0080 + i,
            value: (i * 17) ^ 0xA5,
            size_bits: 8,
            is_write: true,
        });
    }

    // A bit-mixing heavy basic block, as a cipher round would translate.
    let mut instructions = vec![InsnClass::Xor; 8];
    instructions.extend(vec![InsnClass::Rox; 4]);
    instructions.extend(vec![InsnClass::Mov; 8]);
    events.push(Event::BblTranslate(Translation {
        addr: 0x40_1040,
        instructions,
        total_count: 20,
        mov_count: 8,
    }));

    events.push(Event::Function {
        eip: 0,
        kind: FunctionKind::Return,
    });
    events
}

fn main() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dump_path = dir.path().join("sample.exe 1234 1.dump");

    let mut out = BufWriter::new(File::create(&dump_path)?);
    for event in trace_events() {
        encode_event(&mut out, &event)?;
    }
    out.flush()?;

    println!("analyzing synthesized trace in {}", dir.path().display());
    let summary = analyze_directory(dir.path(), &line_sink())?;
    println!(
        "done: {} dump file(s), {} failure(s)",
        summary.dump_files, summary.failures
    );
    Ok(())
}
