//! Per-job rotating log files
//!
//! One append-only file per job under `<dataDir>/logs/`. When the file
//! exceeds its byte cap it is truncated from the front: the newest half is
//! kept, starting at the next full line.

use objectdeck_common::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// A read from the log: raw bytes plus the offset to resume from. When
/// `next_offset` is smaller than the requested offset, the file was rotated
/// and the reader must reset.
#[derive(Debug, Clone)]
pub struct LogChunk {
    pub bytes: Vec<u8>,
    pub next_offset: u64,
}

/// Accessor for one job's log file.
#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
    max_bytes: u64,
}

impl JobLog {
    #[must_use]
    pub fn new(path: PathBuf, max_bytes: u64) -> Self {
        Self { path, max_bytes }
    }

    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one line, rotating first if the write would exceed the cap.
    pub fn append(&self, line: &str) -> Result<()> {
        let line_len = line.len() as u64 + 1;
        let current = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if self.max_bytes > 0 && current + line_len > self.max_bytes {
            self.rotate()?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::internal(format!("open job log: {e}")))?;
        writeln!(file, "{line}").map_err(|e| Error::internal(format!("write job log: {e}")))?;
        Ok(())
    }

    /// Keep the newest half of the file, aligned to the next line boundary.
    fn rotate(&self) -> Result<()> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(_) => return Ok(()),
        };
        let keep_from = data.len().saturating_sub((self.max_bytes / 2) as usize);
        let aligned = data[keep_from..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(keep_from, |pos| keep_from + pos + 1);
        fs::write(&self.path, &data[aligned..])
            .map_err(|e| Error::internal(format!("rotate job log: {e}")))?;
        Ok(())
    }

    fn len(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Last `byte_count` bytes.
    pub fn tail(&self, byte_count: u64) -> Result<LogChunk> {
        let data = fs::read(&self.path).unwrap_or_default();
        let start = data.len().saturating_sub(byte_count as usize);
        Ok(LogChunk {
            bytes: data[start..].to_vec(),
            next_offset: data.len() as u64,
        })
    }

    /// Bytes from `offset`, capped at `max_bytes`. An offset past the end of
    /// a rotated (shrunk) file yields an empty chunk with the new length.
    pub fn read_from(&self, offset: u64, max_bytes: u64) -> Result<LogChunk> {
        let data = fs::read(&self.path).unwrap_or_default();
        let len = data.len() as u64;
        if offset >= len {
            return Ok(LogChunk {
                bytes: Vec::new(),
                next_offset: len,
            });
        }
        let end = (offset + max_bytes).min(len) as usize;
        Ok(LogChunk {
            bytes: data[offset as usize..end].to_vec(),
            next_offset: end as u64,
        })
    }

    /// Remove the log file, ignoring absence.
    pub fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }

    #[allow(dead_code)]
    pub(crate) fn size(&self) -> u64 {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(max: u64) -> (tempfile::TempDir, JobLog) {
        let tmp = tempfile::tempdir().unwrap();
        let log = JobLog::new(tmp.path().join("job.log"), max);
        (tmp, log)
    }

    #[test]
    fn test_append_and_tail() {
        let (_tmp, log) = log(0);
        log.append("first").unwrap();
        log.append("second").unwrap();
        let chunk = log.tail(1024).unwrap();
        assert_eq!(chunk.bytes, b"first\nsecond\n");
        assert_eq!(chunk.next_offset, 13);

        let chunk = log.tail(7).unwrap();
        assert_eq!(chunk.bytes, b"second\n");
    }

    #[test]
    fn test_rotation_keeps_tail() {
        let (_tmp, log) = log(100);
        for i in 0..30 {
            log.append(&format!("line number {i:04}")).unwrap();
        }
        let size = log.size();
        assert!(size <= 100, "log grew past cap: {size}");
        let chunk = log.tail(1024).unwrap();
        let text = String::from_utf8(chunk.bytes).unwrap();
        // Newest lines survive, oldest are gone, and the head is a full line.
        assert!(text.ends_with("line number 0029\n"));
        assert!(!text.contains("line number 0000"));
        assert!(text.starts_with("line number"));
    }

    #[test]
    fn test_read_from_signals_rotation() {
        let (_tmp, log) = log(0);
        log.append("0123456789").unwrap();
        let chunk = log.read_from(0, 4).unwrap();
        assert_eq!(chunk.bytes, b"0123");
        assert_eq!(chunk.next_offset, 4);

        let chunk = log.read_from(4, 100).unwrap();
        assert_eq!(chunk.bytes, b"456789\n");

        // Simulate rotation shrinking the file below the reader's offset.
        std::fs::write(log.path(), b"x\n").unwrap();
        let chunk = log.read_from(8, 100).unwrap();
        assert!(chunk.bytes.is_empty());
        assert!(chunk.next_offset < 8);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (_tmp, log) = log(0);
        let chunk = log.tail(100).unwrap();
        assert!(chunk.bytes.is_empty());
        assert_eq!(chunk.next_offset, 0);
    }
}
