//! Restartable byte streams over a shared archive file.
//!
//! Entry data is decoded through a decorator chain: a [`ByteRangeStream`]
//! over the backing file, optionally wrapped by a decrypt stage, optionally
//! wrapped by an inflate stage. The packer builds the mirror chain (deflate,
//! then encrypt) over a source file. Every stage implements [`EntryStream`],
//! so a chain can be measured with a full read pass, restarted, and read
//! again. The packer relies on this to compute sizes before emitting any
//! header bytes.

mod crypto;
mod flate;
mod range;

pub(crate) use crypto::{DecryptStream, EncryptStream};
pub(crate) use flate::{DeflateStream, InflateStream};
pub use range::ByteRangeStream;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{ZipError, ZipResult};

/// Chunk size for whole-stream passes and coder input buffers.
pub(crate) const BUFFER_SIZE: usize = 4096;

/// A readable byte stream that can be rewound to its starting point.
///
/// `read` returns the number of bytes placed in the buffer; `Ok(0)` means
/// end of stream. `restart` rewinds to the start, re-deriving any stage
/// state (cipher keys, coder state) so the same bytes come out again.
pub trait EntryStream: Send {
    fn read(&mut self, buf: &mut [u8]) -> ZipResult<usize>;

    fn restart(&mut self) -> ZipResult<()>;

    /// Cheap hint: `false` guarantees the next `read` returns `Ok(0)`.
    fn has_more(&self) -> bool;
}

impl<S: EntryStream + ?Sized> EntryStream for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> ZipResult<usize> {
        (**self).read(buf)
    }

    fn restart(&mut self) -> ZipResult<()> {
        (**self).restart()
    }

    fn has_more(&self) -> bool {
        (**self).has_more()
    }
}

/// The always-empty stream, returned for folder entries.
pub struct EmptyStream;

impl EntryStream for EmptyStream {
    fn read(&mut self, _buf: &mut [u8]) -> ZipResult<usize> {
        Ok(0)
    }

    fn restart(&mut self) -> ZipResult<()> {
        Ok(())
    }

    fn has_more(&self) -> bool {
        false
    }
}

/// A random-access file handle shared by every stream open on one archive.
///
/// Seek-then-read is not atomic on a shared `File`, so each positioned read
/// takes the mutex for the duration of the seek+read pair. This is the only
/// shared mutable resource in the crate.
pub struct SharedFile {
    file: Mutex<File>,
    len: u64,
}

impl SharedFile {
    pub fn open(path: &Path) -> ZipResult<Arc<Self>> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Arc::new(Self {
            file: Mutex::new(file),
            len,
        }))
    }

    /// Length of the backing file, captured at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// One positioned read under the handle lock. May return short counts.
    pub(crate) fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize> {
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        file.seek(SeekFrom::Start(offset))?;
        Ok(file.read(buf)?)
    }
}

/// Read until `buf` is full or the stream ends; returns the bytes read.
pub(crate) fn read_full<S: EntryStream + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
) -> ZipResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let count = stream.read(&mut buf[filled..])?;
        if count == 0 {
            break;
        }
        filled += count;
    }
    Ok(filled)
}

/// Like [`read_full`], but a short read is a truncation error.
pub(crate) fn read_exact_into<S: EntryStream + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
    what: &str,
) -> ZipResult<()> {
    if read_full(stream, buf)? != buf.len() {
        return Err(ZipError::MalformedArchive(format!("truncated {what}")));
    }
    Ok(())
}

/// CRC-32 of the whole stream, from a restart-then-read-to-end pass.
pub fn stream_crc32<S: EntryStream + ?Sized>(stream: &mut S) -> ZipResult<u32> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; BUFFER_SIZE];
    stream.restart()?;
    loop {
        let count = stream.read(&mut buf)?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }
    Ok(hasher.finalize())
}

/// Byte length of the whole stream, from a restart-then-read-to-end pass.
pub fn stream_length<S: EntryStream + ?Sized>(stream: &mut S) -> ZipResult<u64> {
    let mut buf = [0u8; BUFFER_SIZE];
    let mut length = 0u64;
    stream.restart()?;
    loop {
        let count = stream.read(&mut buf)?;
        if count == 0 {
            break;
        }
        length += count as u64;
    }
    Ok(length)
}

/// Drain the stream (from its current position) into a byte vector.
pub fn read_to_end<S: EntryStream + ?Sized>(stream: &mut S) -> ZipResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let count = stream.read(&mut buf)?;
        if count == 0 {
            break;
        }
        out.extend_from_slice(&buf[..count]);
    }
    Ok(out)
}

/// Copy the stream (from its current position) into a writer.
pub(crate) fn copy_stream<S, W>(stream: &mut S, writer: &mut W) -> ZipResult<u64>
where
    S: EntryStream + ?Sized,
    W: Write,
{
    let mut buf = [0u8; BUFFER_SIZE];
    let mut copied = 0u64;
    loop {
        let count = stream.read(&mut buf)?;
        if count == 0 {
            break;
        }
        writer.write_all(&buf[..count])?;
        copied += count as u64;
    }
    Ok(copied)
}
