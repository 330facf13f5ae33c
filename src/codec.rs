//! Binary dump codec.
//!
//! A dump file is a prefix-tagged stream of little-endian records, one
//! per trace event:
//!
//! | Tag | Record        | Body                                                  |
//! |-----|---------------|-------------------------------------------------------|
//! | 0   | MemoryAccess  | `u32 address, u32 value, u8 opts`                     |
//! | 1   | Function      | `u32 eip, i8 call_type` (`0` = call, else return)     |
//! | 2   | BblExec       | `u32 addr`                                            |
//! | 3   | BblTranslate  | `u32 icount, total, mov, addr`, then `icount × u32`   |
//!
//! The memory-access `opts` byte packs `size_bits = opts >> 1` and
//! `is_write = opts & 1`. EOF at a record boundary ends the stream
//! cleanly; EOF inside a record body is a fatal per-file format error.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::path::Path;

use crate::error::{AnalyzerError, Result};
use crate::event::{Event, FunctionKind, InsnClass, Translation};

const TAG_MEMORY_ACCESS: u8 = 0;
const TAG_FUNCTION: u8 = 1;
const TAG_BBL_EXEC: u8 = 2;
const TAG_BBL_TRANSLATE: u8 = 3;

/// Lazy, single-pass decoder over one dump file.
///
/// Owns its input for the lifetime of the iterator; a reader opened from a
/// path releases the file handle on drop. The iterator fuses after the
/// first error or clean EOF.
pub struct DumpReader<R> {
    input: R,
    /// Byte offset of the next unread byte, for diagnostics.
    position: u64,
    /// Bytes left in the input when the total length is known up front.
    remaining: Option<u64>,
    done: bool,
}

impl DumpReader<BufReader<File>> {
    /// Open a dump file for decoding.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(DumpReader {
            input: BufReader::new(file),
            position: 0,
            remaining: Some(len),
            done: false,
        })
    }
}

impl<R: Read> DumpReader<R> {
    /// Decode from an arbitrary reader of unknown length.
    pub fn from_reader(input: R) -> Self {
        DumpReader {
            input,
            position: 0,
            remaining: None,
            done: false,
        }
    }

    /// Byte offset of the next unread record.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn consume(&mut self, bytes: u64) {
        self.position += bytes;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(bytes);
        }
    }

    fn read_u8(&mut self, tag: u8, start: u64) -> Result<u8> {
        let value = self
            .input
            .read_u8()
            .map_err(|e| self.truncated(e, tag, start))?;
        self.consume(1);
        Ok(value)
    }

    fn read_i8(&mut self, tag: u8, start: u64) -> Result<i8> {
        let value = self
            .input
            .read_i8()
            .map_err(|e| self.truncated(e, tag, start))?;
        self.consume(1);
        Ok(value)
    }

    fn read_u32(&mut self, tag: u8, start: u64) -> Result<u32> {
        let value = self
            .input
            .read_u32::<LittleEndian>()
            .map_err(|e| self.truncated(e, tag, start))?;
        self.consume(4);
        Ok(value)
    }

    fn truncated(&self, err: io::Error, tag: u8, start: u64) -> AnalyzerError {
        if err.kind() == ErrorKind::UnexpectedEof {
            AnalyzerError::TruncatedRecord { tag, offset: start }
        } else {
            AnalyzerError::Io(err)
        }
    }

    /// Decode the next record, or `Ok(None)` at clean EOF.
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        if self.done {
            return Ok(None);
        }
        let start = self.position;
        let tag = match self.input.read_u8() {
            Ok(tag) => tag,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        self.consume(1);

        let event = match tag {
            TAG_MEMORY_ACCESS => {
                let address = self.read_u32(tag, start)?;
                let value = self.read_u32(tag, start)?;
                let opts = self.read_u8(tag, start)?;
                Event::MemoryAccess {
                    address,
                    value,
                    size_bits: opts >> 1,
                    is_write: opts & 1 == 1,
                }
            }
            TAG_FUNCTION => {
                let eip = self.read_u32(tag, start)?;
                let call_type = self.read_i8(tag, start)?;
                let kind = if call_type == 0 {
                    FunctionKind::Call
                } else {
                    FunctionKind::Return
                };
                Event::Function { eip, kind }
            }
            TAG_BBL_EXEC => {
                let addr = self.read_u32(tag, start)?;
                Event::BblExec { addr }
            }
            TAG_BBL_TRANSLATE => {
                let icount = self.read_u32(tag, start)?;
                let total_count = self.read_u32(tag, start)?;
                let mov_count = self.read_u32(tag, start)?;
                let addr = self.read_u32(tag, start)?;
                if let Some(remaining) = self.remaining {
                    if u64::from(icount) * 4 > remaining {
                        return Err(AnalyzerError::OversizedRecord { icount, remaining });
                    }
                }
                let mut instructions = Vec::with_capacity(icount as usize);
                for _ in 0..icount {
                    instructions.push(InsnClass::from_wire(self.read_u32(tag, start)?));
                }
                Event::BblTranslate(Translation {
                    addr,
                    instructions,
                    total_count,
                    mov_count,
                })
            }
            value => {
                return Err(AnalyzerError::UnknownTag {
                    value,
                    offset: start,
                })
            }
        };
        Ok(Some(event))
    }
}

impl<R: Read> Iterator for DumpReader<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Encode one event in the dump wire format.
///
/// `decode(encode(events))` yields the original sequence for well-formed
/// events: `size_bits` fitting 7 bits and `instructions.len()` matching
/// the translation's `icount` on the wire (always true for decoded events).
pub fn encode_event<W: Write>(out: &mut W, event: &Event) -> io::Result<()> {
    match event {
        Event::MemoryAccess {
            address,
            value,
            size_bits,
            is_write,
        } => {
            out.write_u8(TAG_MEMORY_ACCESS)?;
            out.write_u32::<LittleEndian>(*address)?;
            out.write_u32::<LittleEndian>(*value)?;
            out.write_u8((size_bits << 1) | u8::from(*is_write))?;
        }
        Event::Function { eip, kind } => {
            out.write_u8(TAG_FUNCTION)?;
            out.write_u32::<LittleEndian>(*eip)?;
            out.write_i8(match kind {
                FunctionKind::Call => 0,
                FunctionKind::Return => 1,
            })?;
        }
        Event::BblExec { addr } => {
            out.write_u8(TAG_BBL_EXEC)?;
            out.write_u32::<LittleEndian>(*addr)?;
        }
        Event::BblTranslate(translation) => {
            out.write_u8(TAG_BBL_TRANSLATE)?;
            out.write_u32::<LittleEndian>(translation.instructions.len() as u32)?;
            out.write_u32::<LittleEndian>(translation.total_count)?;
            out.write_u32::<LittleEndian>(translation.mov_count)?;
            out.write_u32::<LittleEndian>(translation.addr)?;
            for class in &translation.instructions {
                out.write_u32::<LittleEndian>(class.wire())?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck::{Arbitrary, Gen};
    use std::io::Cursor;

    fn decode_all(bytes: &[u8]) -> Vec<Result<Event>> {
        DumpReader::from_reader(Cursor::new(bytes.to_vec())).collect()
    }

    #[test]
    fn test_empty_input_is_clean_eof() {
        let events = decode_all(&[]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_memory_access_record() {
        // address 0x1000, value 0xAABBCCDD, 32-bit write
        let bytes = [0u8, 0x00, 0x10, 0x00, 0x00, 0xDD, 0xCC, 0xBB, 0xAA, (32 << 1) | 1];
        let events = decode_all(&bytes);
        assert_eq!(events.len(), 1);
        assert_eq!(
            *events[0].as_ref().unwrap(),
            Event::MemoryAccess {
                address: 0x1000,
                value: 0xAABBCCDD,
                size_bits: 32,
                is_write: true,
            }
        );
    }

    #[test]
    fn test_function_record_nonzero_type_is_return() {
        let bytes = [1u8, 0x78, 0x56, 0x34, 0x12, 0xFF];
        let events = decode_all(&bytes);
        assert_eq!(
            *events[0].as_ref().unwrap(),
            Event::Function {
                eip: 0x12345678,
                kind: FunctionKind::Return,
            }
        );
    }

    #[test]
    fn test_translate_record_field_order() {
        // icount=2, total=7, mov=3, addr=0x2000, classes [xor, add]
        let mut bytes = vec![3u8];
        for word in [2u32, 7, 3, 0x2000, 1, 9] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let events = decode_all(&bytes);
        assert_eq!(
            *events[0].as_ref().unwrap(),
            Event::BblTranslate(Translation {
                addr: 0x2000,
                instructions: vec![InsnClass::Xor, InsnClass::Add],
                total_count: 7,
                mov_count: 3,
            })
        );
    }

    #[test]
    fn test_truncated_record_is_fatal() {
        let events = decode_all(&[0x00, 0x01]);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Err(AnalyzerError::TruncatedRecord { tag: 0, offset: 0 })
        ));
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        let events = decode_all(&[9u8, 1, 2, 3]);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Err(AnalyzerError::UnknownTag { value: 9, offset: 0 })
        ));
    }

    #[test]
    fn test_iterator_fuses_after_error() {
        let mut reader = DumpReader::from_reader(Cursor::new(vec![9u8, 2, 0, 0, 0]));
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_oversized_translation_rejected_before_allocation() {
        use std::io::Write as _;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut bytes = vec![3u8];
        // icount far beyond the bytes actually present
        for word in [0x4000_0000u32, 10, 0, 0x1000] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        file.write_all(&bytes).unwrap();
        let mut reader = DumpReader::open(file.path()).unwrap();
        assert!(matches!(
            reader.next_event(),
            Err(AnalyzerError::OversizedRecord { icount: 0x4000_0000, .. })
        ));
    }

    #[test]
    fn test_clean_eof_between_records() {
        let mut bytes = Vec::new();
        encode_event(&mut bytes, &Event::BblExec { addr: 0xDEAD }).unwrap();
        encode_event(&mut bytes, &Event::BblExec { addr: 0xBEEF }).unwrap();
        let events = decode_all(&bytes);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.is_ok()));
    }

    #[derive(Debug, Clone)]
    struct WireEvent(Event);

    impl Arbitrary for WireEvent {
        fn arbitrary(g: &mut Gen) -> Self {
            let event = match u8::arbitrary(g) % 4 {
                0 => Event::MemoryAccess {
                    address: u32::arbitrary(g),
                    value: u32::arbitrary(g),
                    size_bits: *g.choose(&[8u8, 16, 32]).unwrap(),
                    is_write: bool::arbitrary(g),
                },
                1 => Event::Function {
                    eip: u32::arbitrary(g),
                    kind: if bool::arbitrary(g) {
                        FunctionKind::Call
                    } else {
                        FunctionKind::Return
                    },
                },
                2 => Event::BblExec {
                    addr: u32::arbitrary(g),
                },
                _ => {
                    let instructions: Vec<InsnClass> = Vec::<u32>::arbitrary(g)
                        .into_iter()
                        .take(64)
                        .map(InsnClass::from_wire)
                        .collect();
                    Event::BblTranslate(Translation {
                        addr: u32::arbitrary(g),
                        instructions,
                        total_count: u32::arbitrary(g),
                        mov_count: u32::arbitrary(g),
                    })
                }
            };
            WireEvent(event)
        }
    }

    #[quickcheck_macros::quickcheck]
    fn prop_round_trip(events: Vec<WireEvent>) -> bool {
        let mut bytes = Vec::new();
        for WireEvent(event) in &events {
            encode_event(&mut bytes, event).unwrap();
        }
        let decoded: Vec<Event> = DumpReader::from_reader(Cursor::new(bytes))
            .map(|e| e.unwrap())
            .collect();
        decoded == events.into_iter().map(|WireEvent(e)| e).collect::<Vec<_>>()
    }
}
