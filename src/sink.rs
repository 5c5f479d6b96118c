// src/sink.rs
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::error::{OutputStatus, ProcessingError};
use crate::pipeline::aggregator::OutputRecord;
use crate::pipeline::config::{OpenMode, PipelineConfig};

/// A writable medium that can confirm its contents reached stable storage.
pub trait DurableWrite: Write {
    /// Block until every byte accepted so far is durably stored.
    fn commit(&mut self) -> io::Result<()>;

    /// Take back the last `bytes` bytes written. Returns `false` when the
    /// medium cannot do that, leaving them in place.
    fn discard_tail(&mut self, _bytes: u64) -> io::Result<bool> {
        Ok(false)
    }
}

impl DurableWrite for File {
    fn commit(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn discard_tail(&mut self, bytes: u64) -> io::Result<bool> {
        let len = self.metadata()?.len();
        self.set_len(len.saturating_sub(bytes))?;
        Ok(true)
    }
}

impl DurableWrite for Vec<u8> {
    fn commit(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn discard_tail(&mut self, bytes: u64) -> io::Result<bool> {
        let keep = self.len().saturating_sub(bytes as usize);
        self.truncate(keep);
        Ok(true)
    }
}

impl DurableWrite for io::Sink {
    fn commit(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: DurableWrite + ?Sized> DurableWrite for &mut W {
    fn commit(&mut self) -> io::Result<()> {
        (**self).commit()
    }

    fn discard_tail(&mut self, bytes: u64) -> io::Result<bool> {
        (**self).discard_tail(bytes)
    }
}

impl<W: DurableWrite + ?Sized> DurableWrite for Box<W> {
    fn commit(&mut self) -> io::Result<()> {
        (**self).commit()
    }

    fn discard_tail(&mut self, bytes: u64) -> io::Result<bool> {
        (**self).discard_tail(bytes)
    }
}

/// Backpressure signal returned by [`ResultSink::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Available,
    /// Stop writing and call [`ResultSink::drain`] first.
    Exhausted,
}

/// Append-only destination for error lines.
///
/// Lines are buffered in memory until the buffer reaches the high-water mark,
/// at which point the producer is told to pause and drain. Writing while
/// exhausted is refused, so the buffer never holds more than the high-water
/// mark plus one line.
pub struct ResultSink<M> {
    medium: M,
    destination: PathBuf,
    buffer: Vec<u8>,
    high_water_mark: usize,
    exhausted: bool,
    failed: bool,
    committed_lines: u64,
    committed_bytes: u64,
    /// Bytes of an incomplete line left behind by a failed drain
    torn_bytes: u64,
    peak_buffered: usize,
}

impl ResultSink<File> {
    pub fn open(path: &Path, config: &PipelineConfig) -> Result<Self, ProcessingError> {
        let mut options = OpenOptions::new();
        options.create(true);
        match config.open_mode {
            OpenMode::Append => options.append(true),
            OpenMode::Truncate => options.write(true).truncate(true),
        };
        let file = options
            .open(path)
            .map_err(|source| ProcessingError::SinkOpen {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), mode = ?config.open_mode, "opened output");
        Ok(ResultSink::new(file, path, config.sink_high_water_mark))
    }
}

impl<M: DurableWrite> ResultSink<M> {
    pub fn new(medium: M, destination: impl Into<PathBuf>, high_water_mark: usize) -> Self {
        ResultSink {
            medium,
            destination: destination.into(),
            buffer: Vec::new(),
            high_water_mark: high_water_mark.max(1),
            exhausted: false,
            failed: false,
            committed_lines: 0,
            committed_bytes: 0,
            torn_bytes: 0,
            peak_buffered: 0,
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Buffer one line. The returned [`Capacity`] says whether the producer
    /// may keep writing.
    pub fn write(&mut self, record: &OutputRecord) -> Result<Capacity, ProcessingError> {
        if self.exhausted {
            return Err(ProcessingError::SinkOverrun {
                path: self.destination.clone(),
            });
        }
        self.buffer.extend_from_slice(record.text.as_bytes());
        self.buffer.push(b'\n');
        self.peak_buffered = self.peak_buffered.max(self.buffer.len());

        if self.buffer.len() >= self.high_water_mark {
            self.exhausted = true;
            Ok(Capacity::Exhausted)
        } else {
            Ok(Capacity::Available)
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Hand the buffered lines to the medium, blocking until it accepts them.
    /// Returning `Ok` is the "capacity available" signal.
    ///
    /// Only whole lines count as committed. If the medium fails after
    /// accepting part of a line, that fragment is taken back where the medium
    /// allows it and reported otherwise.
    pub fn drain(&mut self) -> Result<(), ProcessingError> {
        if self.failed {
            return Err(self.write_error(io::Error::other("output failed earlier")));
        }
        if self.buffer.is_empty() {
            self.exhausted = false;
            return Ok(());
        }

        let mut written = 0;
        let result = loop {
            if written == self.buffer.len() {
                break self.medium.flush();
            }
            match self.medium.write(&self.buffer[written..]) {
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "output accepted no bytes",
                    ))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };

        let landed = &self.buffer[..written];
        let complete = landed
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        let lines = landed[..complete].iter().filter(|&&b| b == b'\n').count() as u64;
        self.committed_bytes += complete as u64;
        self.committed_lines += lines;

        if let Err(e) = result {
            self.failed = true;
            self.torn_bytes = self.discard_fragment((written - complete) as u64);
            return Err(self.write_error(e));
        }

        trace!(bytes = written, lines, "drained output buffer");
        self.buffer.clear();
        self.exhausted = false;
        Ok(())
    }

    fn discard_fragment(&mut self, fragment: u64) -> u64 {
        if fragment == 0 {
            return 0;
        }
        match self.medium.discard_tail(fragment) {
            Ok(true) => {
                debug!(path = %self.destination.display(), bytes = fragment, "removed torn line from output");
                0
            }
            Ok(false) => {
                warn!(path = %self.destination.display(), bytes = fragment, "output ends in a torn line");
                fragment
            }
            Err(e) => {
                warn!(path = %self.destination.display(), bytes = fragment, error = %e, "failed to remove torn line from output");
                fragment
            }
        }
    }

    /// Drain and flush. The returned token must be waited on before the
    /// output can be considered durable.
    pub fn close(mut self) -> Result<PendingCommit<M>, ProcessingError> {
        self.drain()?;
        Ok(PendingCommit {
            medium: self.medium,
            destination: self.destination,
            lines: self.committed_lines,
            bytes: self.committed_bytes,
            peak_buffered: self.peak_buffered,
        })
    }

    /// Close without the durability barrier. Buffered lines are flushed
    /// best-effort; returns what this run left in the output.
    pub fn abandon(mut self) -> OutputStatus {
        if !self.failed {
            if let Err(e) = self.drain() {
                warn!(path = %self.destination.display(), error = %e, "failed to flush abandoned output");
            }
        }
        self.output_status()
    }

    /// Lines the medium has accepted so far.
    pub fn committed_lines(&self) -> u64 {
        self.committed_lines
    }

    /// What the medium holds from this sink so far.
    pub fn output_status(&self) -> OutputStatus {
        OutputStatus::new(&self.destination, self.committed_lines, self.torn_bytes)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Largest number of bytes held in the buffer at any point.
    pub fn peak_buffered(&self) -> usize {
        self.peak_buffered
    }

    fn write_error(&self, source: io::Error) -> ProcessingError {
        ProcessingError::SinkWrite {
            path: self.destination.clone(),
            committed_lines: self.committed_lines,
            torn_bytes: self.torn_bytes,
            source,
        }
    }
}

/// Durability barrier handed out by [`ResultSink::close`].
#[must_use = "output is not durable until the commit is waited on"]
pub struct PendingCommit<M> {
    medium: M,
    destination: PathBuf,
    lines: u64,
    bytes: u64,
    peak_buffered: usize,
}

impl<M: DurableWrite> PendingCommit<M> {
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Block until the medium confirms everything is on stable storage.
    pub fn wait(mut self) -> Result<CommitReceipt, ProcessingError> {
        self.medium
            .commit()
            .map_err(|source| ProcessingError::SinkCommit {
                path: self.destination.clone(),
                source,
            })?;
        debug!(path = %self.destination.display(), lines = self.lines, "output committed");
        Ok(CommitReceipt {
            destination: self.destination,
            lines: self.lines,
            bytes: self.bytes,
            peak_buffered: self.peak_buffered,
        })
    }
}

/// Proof that the output reached stable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub destination: PathBuf,
    pub lines: u64,
    pub bytes: u64,
    pub peak_buffered: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str) -> OutputRecord {
        OutputRecord {
            line_number: 1,
            text: text.to_string(),
        }
    }

    /// Medium that records whether commit was called.
    #[derive(Default)]
    struct Tracked {
        data: Vec<u8>,
        committed: bool,
    }

    impl Write for Tracked {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl DurableWrite for Tracked {
        fn commit(&mut self) -> io::Result<()> {
            self.committed = true;
            Ok(())
        }
    }

    /// Medium with a fixed amount of room; writes past it are cut short.
    struct Cramped {
        data: Vec<u8>,
        room: usize,
        can_discard: bool,
    }

    impl Cramped {
        fn new(room: usize, can_discard: bool) -> Self {
            Cramped {
                data: Vec::new(),
                room,
                can_discard,
            }
        }
    }

    impl Write for Cramped {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::other("No space left on device"));
            }
            let n = buf.len().min(self.room);
            self.data.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl DurableWrite for Cramped {
        fn commit(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn discard_tail(&mut self, bytes: u64) -> io::Result<bool> {
            if !self.can_discard {
                return Ok(false);
            }
            let keep = self.data.len() - bytes as usize;
            self.data.truncate(keep);
            Ok(true)
        }
    }

    fn fill(sink: &mut ResultSink<&mut Cramped>) {
        for text in ["aaa", "bbb", "ccc", "ddd"] {
            sink.write(&record(text)).unwrap();
        }
    }

    #[test]
    fn test_short_write_commits_whole_lines_only() {
        let mut medium = Cramped::new("aaa\nbbb\ncc".len(), true);
        let mut sink = ResultSink::new(&mut medium, "mem", 1024);
        fill(&mut sink);

        match sink.drain() {
            Err(ProcessingError::SinkWrite {
                committed_lines,
                torn_bytes,
                ..
            }) => {
                assert_eq!(committed_lines, 2);
                assert_eq!(torn_bytes, 0);
            }
            other => panic!("expected SinkWrite, got {:?}", other),
        }
        assert_eq!(
            sink.abandon(),
            OutputStatus::Partial {
                path: PathBuf::from("mem"),
                committed_lines: 2,
                torn_bytes: 0
            }
        );
        assert_eq!(medium.data, b"aaa\nbbb\n");
    }

    #[test]
    fn test_short_write_reports_fragment_it_cannot_remove() {
        let mut medium = Cramped::new("aaa\nbbb\ncc".len(), false);
        let mut sink = ResultSink::new(&mut medium, "mem", 1024);
        fill(&mut sink);

        assert!(sink.drain().is_err());
        assert_eq!(
            sink.output_status(),
            OutputStatus::Partial {
                path: PathBuf::from("mem"),
                committed_lines: 2,
                torn_bytes: 2
            }
        );
        // a failed sink is not written to again
        assert!(sink.drain().is_err());
        drop(sink);
        assert_eq!(medium.data, b"aaa\nbbb\ncc");
    }

    #[test]
    fn test_torn_first_line_is_not_untouched() {
        let mut medium = Cramped::new(2, false);
        let mut sink = ResultSink::new(&mut medium, "mem", 1024);
        fill(&mut sink);

        assert!(sink.drain().is_err());
        assert_eq!(sink.committed_lines(), 0);
        assert!(matches!(
            sink.abandon(),
            OutputStatus::Partial {
                committed_lines: 0,
                torn_bytes: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_file_drops_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        std::fs::write(&path, "old\nnew\npartial").unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        assert!(file.discard_tail("partial".len() as u64).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }

    #[test]
    fn test_signals_exhaustion_at_high_water_mark() {
        let mut sink = ResultSink::new(Vec::new(), "mem", 8);
        assert_eq!(sink.write(&record("abc")).unwrap(), Capacity::Available);
        assert_eq!(sink.write(&record("def")).unwrap(), Capacity::Exhausted);
        assert!(sink.is_exhausted());
        assert_eq!(sink.buffered(), 8);
    }

    #[test]
    fn test_refuses_writes_while_exhausted() {
        let mut sink = ResultSink::new(Vec::new(), "mem", 1);
        assert_eq!(sink.write(&record("a")).unwrap(), Capacity::Exhausted);
        assert!(matches!(
            sink.write(&record("b")),
            Err(ProcessingError::SinkOverrun { .. })
        ));
        sink.drain().unwrap();
        assert_eq!(sink.write(&record("b")).unwrap(), Capacity::Exhausted);
    }

    #[test]
    fn test_drain_restores_capacity() {
        let mut sink = ResultSink::new(Vec::new(), "mem", 4);
        sink.write(&record("long line")).unwrap();
        sink.drain().unwrap();
        assert!(!sink.is_exhausted());
        assert_eq!(sink.buffered(), 0);
        assert_eq!(sink.committed_lines(), 1);
        assert_eq!(sink.peak_buffered(), 10);
    }

    #[test]
    fn test_close_requires_wait_for_commit() {
        let mut sink = ResultSink::new(Tracked::default(), "mem", 1024);
        sink.write(&record("x")).unwrap();
        let pending = sink.close().unwrap();
        assert!(!pending.medium.committed);
        assert_eq!(pending.medium.data, b"x\n");

        let receipt = pending.wait().unwrap();
        assert_eq!(receipt.lines, 1);
        assert_eq!(receipt.bytes, 2);
        assert_eq!(receipt.destination, PathBuf::from("mem"));
    }

    #[test]
    fn test_abandon_flushes_without_commit() {
        let mut sink = ResultSink::new(Vec::new(), "mem", 1024);
        sink.write(&record("x")).unwrap();
        sink.write(&record("y")).unwrap();
        assert_eq!(
            sink.abandon(),
            OutputStatus::Partial {
                path: PathBuf::from("mem"),
                committed_lines: 2,
                torn_bytes: 0
            }
        );
    }

    #[test]
    fn test_open_append_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        std::fs::write(&path, "old\n").unwrap();

        let config = PipelineConfig::default();
        let mut sink = ResultSink::open(&path, &config).unwrap();
        sink.write(&record("new")).unwrap();
        sink.close().unwrap().wait().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }

    #[test]
    fn test_open_truncate_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        std::fs::write(&path, "old\n").unwrap();

        let config = PipelineConfig {
            open_mode: OpenMode::Truncate,
            ..Default::default()
        };
        let mut sink = ResultSink::open(&path, &config).unwrap();
        sink.write(&record("new")).unwrap();
        sink.close().unwrap().wait().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");
    }

    #[test]
    fn test_open_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("errors.log");
        let result = ResultSink::open(&path, &PipelineConfig::default());
        assert!(matches!(result, Err(ProcessingError::SinkOpen { .. })));
    }
}
