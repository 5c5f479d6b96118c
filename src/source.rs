// src/source.rs
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::error::ProcessingError;
use crate::pipeline::config::{ErrorStrategy, PipelineConfig};

/// One decoded input line, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based position in the input.
    pub number: u64,
    pub text: String,
}

/// What the source produced for one physical line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLine {
    Line(RawLine),
    /// Line longer than `max_line_length`; its bytes were discarded unread.
    Oversized { number: u64, length: usize },
}

/// Forward-only reader of lines from a byte stream.
///
/// At most `max_line_length` bytes of a single line are held at once, on top
/// of whatever read-ahead the underlying `BufRead` keeps.
pub struct LineSource<R> {
    reader: R,
    buf: Vec<u8>,
    max_line_length: usize,
    strategy: ErrorStrategy,
    line_number: u64,
    finished: bool,
}

impl LineSource<BufReader<File>> {
    /// Open a file for reading. Fails before any line is produced.
    pub fn open(path: &Path, config: &PipelineConfig) -> Result<Self, ProcessingError> {
        let file = File::open(path).map_err(|source| ProcessingError::SourceOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(LineSource::from_reader(
            BufReader::with_capacity(config.buffer_size, file),
            config.max_line_length,
        )
        .with_strategy(config.error_strategy.clone()))
    }
}

impl<R: BufRead> LineSource<R> {
    pub fn from_reader(reader: R, max_line_length: usize) -> Self {
        LineSource {
            reader,
            buf: Vec::new(),
            max_line_length,
            strategy: ErrorStrategy::FailFast,
            line_number: 0,
            finished: false,
        }
    }

    pub fn with_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Number of lines produced so far.
    pub fn lines_read(&self) -> u64 {
        self.line_number
    }

    /// Read the next line, blocking until the reader delivers it.
    ///
    /// `Ok(None)` marks natural exhaustion. Any error is terminal: the source
    /// produces nothing afterwards.
    pub fn next_line(&mut self) -> Result<Option<SourceLine>, ProcessingError> {
        if self.finished {
            return Ok(None);
        }
        match self.read_line() {
            Ok(None) => {
                self.finished = true;
                Ok(None)
            }
            Ok(Some(length)) => {
                self.line_number += 1;
                if length > self.max_line_length {
                    return match self.strategy {
                        ErrorStrategy::Skip => Ok(Some(SourceLine::Oversized {
                            number: self.line_number,
                            length,
                        })),
                        ErrorStrategy::FailFast => {
                            self.finished = true;
                            Err(ProcessingError::LineTooLong {
                                line: self.line_number,
                                length,
                                max_length: self.max_line_length,
                            })
                        }
                    };
                }
                let bytes = std::mem::take(&mut self.buf);
                match String::from_utf8(bytes) {
                    Ok(text) => Ok(Some(SourceLine::Line(RawLine {
                        number: self.line_number,
                        text,
                    }))),
                    Err(e) => {
                        self.finished = true;
                        Err(ProcessingError::SourceRead {
                            line: self.line_number - 1,
                            source: io::Error::new(io::ErrorKind::InvalidData, e),
                        })
                    }
                }
            }
            Err(source) => {
                self.finished = true;
                Err(ProcessingError::SourceRead {
                    line: self.line_number,
                    source,
                })
            }
        }
    }

    /// Fill `self.buf` with the next line minus its terminator and return the
    /// line's full length. Bytes past `max_line_length` are consumed but not kept.
    fn read_line(&mut self) -> io::Result<Option<usize>> {
        self.buf.clear();
        let mut length = 0usize;
        let mut seen_any = false;
        let mut kept = true;
        let mut last = None;

        loop {
            let available = match self.reader.fill_buf() {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                break;
            }
            seen_any = true;

            let (chunk, used, done) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..i], i + 1, true),
                None => (available, available.len(), false),
            };
            length += chunk.len();
            if let Some(&b) = chunk.last() {
                last = Some(b);
            }
            if kept {
                // one spare byte for a trailing '\r'
                if length <= self.max_line_length + 1 {
                    self.buf.extend_from_slice(chunk);
                } else {
                    kept = false;
                    self.buf.clear();
                }
            }
            self.reader.consume(used);
            if done {
                break;
            }
        }

        if !seen_any {
            return Ok(None);
        }
        if last == Some(b'\r') {
            self.buf.pop();
            length -= 1;
        }
        Ok(Some(length))
    }
}

impl<R: BufRead> Iterator for LineSource<R> {
    type Item = Result<SourceLine, ProcessingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}
