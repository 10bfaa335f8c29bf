//! Read-only view over a sub-range of the backing archive file.

use std::io;
use std::sync::Arc;

use crate::error::{ZipError, ZipResult};
use crate::io::{EntryStream, SharedFile};

/// A restartable stream over `[start, end)` of a [`SharedFile`].
///
/// This is the bottom of every entry decode chain. Any number of range
/// streams may be open on the same file at once; each positioned read goes
/// through the handle lock in [`SharedFile::read_at`].
pub struct ByteRangeStream {
    file: Arc<SharedFile>,
    start: u64,
    end: u64,
    offset: u64,
}

impl ByteRangeStream {
    pub fn new(file: Arc<SharedFile>, start: u64, end: u64) -> ZipResult<Self> {
        if start > end {
            return Err(ZipError::InvalidArgument(format!(
                "range start {start} is past range end {end}"
            )));
        }
        if end > file.len() {
            return Err(ZipError::InvalidArgument(format!(
                "range end {end} is past file length {}",
                file.len()
            )));
        }
        Ok(Self {
            file,
            start,
            end,
            offset: start,
        })
    }

    /// Range from `start` to the end of the file.
    pub fn to_end(file: Arc<SharedFile>, start: u64) -> ZipResult<Self> {
        let end = file.len();
        Self::new(file, start, end)
    }
}

impl EntryStream for ByteRangeStream {
    fn read(&mut self, buf: &mut [u8]) -> ZipResult<usize> {
        if buf.is_empty() || self.offset >= self.end {
            return Ok(0);
        }
        let want = buf.len().min((self.end - self.offset) as usize);
        let count = self.file.read_at(self.offset, &mut buf[..want])?;
        if count == 0 {
            // The range was validated against the file length at open time.
            return Err(ZipError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive file shorter than its recorded length",
            )));
        }
        self.offset += count as u64;
        Ok(count)
    }

    fn restart(&mut self) -> ZipResult<()> {
        self.offset = self.start;
        Ok(())
    }

    fn has_more(&self) -> bool {
        self.offset < self.end
    }
}
