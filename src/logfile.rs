//! Line-oriented reader for emulator heuristic log files.
//!
//! Log files carry pre-rendered findings from in-emulator heuristics.
//! Each non-empty line passes through verbatim; the first empty line
//! (after trimming) terminates the stream, matching the emulator's
//! write-side framing.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Result;

/// Lazy reader yielding trimmed log lines until the stream terminates.
pub struct LogReader<R> {
    input: R,
    done: bool,
}

impl LogReader<BufReader<File>> {
    /// Open a log file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(LogReader {
            input: BufReader::new(File::open(path)?),
            done: false,
        })
    }
}

impl<R: BufRead> LogReader<R> {
    /// Read from an arbitrary buffered reader.
    pub fn from_reader(input: R) -> Self {
        LogReader { input, done: false }
    }
}

impl<R: BufRead> Iterator for LogReader<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    self.done = true;
                    None
                } else {
                    Some(Ok(trimmed.to_string()))
                }
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn read_all(text: &str) -> Vec<String> {
        LogReader::from_reader(Cursor::new(text.to_string()))
            .map(|l| l.unwrap())
            .collect()
    }

    #[test]
    fn test_lines_pass_through_trimmed() {
        let lines = read_all("first finding\n  second finding \n");
        assert_eq!(lines, vec!["first finding", "second finding"]);
    }

    #[test]
    fn test_empty_line_terminates_stream() {
        let lines = read_all("one\n\ntwo\n");
        assert_eq!(lines, vec!["one"]);
    }

    #[test]
    fn test_empty_file() {
        assert!(read_all("").is_empty());
    }

    #[test]
    fn test_missing_trailing_newline() {
        let lines = read_all("only line");
        assert_eq!(lines, vec!["only line"]);
    }
}
