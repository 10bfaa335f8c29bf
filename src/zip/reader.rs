//! Archive reading: directory-end scan, central directory walk, and entry
//! stream composition.

use encoding_rs::{Encoding, UTF_8};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{ZipError, ZipResult};
use crate::io::{
    ByteRangeStream, DecryptStream, EmptyStream, EntryStream, InflateStream, SharedFile,
    read_exact_into,
};
use crate::zip::entry::{EntryTree, ZipEntry};
use crate::zip::structures::{
    CompressionMethod, EncryptionMethod, EndOfCentralDirectory, EntryHeader,
};

/// A read-only view of a ZIP archive.
///
/// Opening parses the end-of-central-directory record and the full central
/// directory; entry data is only touched when an entry stream is opened.
/// Any number of entry streams may be open at once; they share the backing
/// file handle, and each positioned read is serialized through its lock.
pub struct ZipReader {
    file: Arc<SharedFile>,
    dir_end: EndOfCentralDirectory,
    entries: Vec<ZipEntry>,
    tree: EntryTree,
    fallback: &'static Encoding,
    password: String,
}

impl ZipReader {
    /// Open an archive, decoding legacy (non-UTF-8) names as UTF-8.
    pub fn open(path: impl AsRef<Path>) -> ZipResult<Self> {
        Self::open_with_encoding(path, UTF_8)
    }

    /// Open an archive with an explicit fallback encoding for entry names
    /// that carry neither the UTF-8 flag nor a Unicode Path extra field.
    pub fn open_with_encoding(
        path: impl AsRef<Path>,
        fallback: &'static Encoding,
    ) -> ZipResult<Self> {
        let path = path.as_ref();
        let file = SharedFile::open(path)?;
        let dir_end = Self::find_dir_end(&file)?;
        let mut reader = Self {
            file,
            dir_end,
            entries: Vec::new(),
            tree: EntryTree::new(),
            fallback,
            password: String::new(),
        };
        reader.read_central_dir()?;
        debug!(
            path = %path.display(),
            entries = reader.entries.len(),
            "opened archive"
        );
        Ok(reader)
    }

    /// Scan backward from the end of the file for the directory-end record.
    ///
    /// The comment length field cannot be trusted before the record is
    /// found, so the scan window is the maximum record size: 22 fixed bytes
    /// plus a maximum-length comment. A candidate signature counts only if
    /// its declared comment runs exactly to end-of-file.
    fn find_dir_end(file: &Arc<SharedFile>) -> ZipResult<EndOfCentralDirectory> {
        let base = EndOfCentralDirectory::BASE_SIZE;
        let len = file.len();
        if len < base as u64 {
            return Err(ZipError::MalformedArchive(
                "file too short to be a zip archive".into(),
            ));
        }
        let window = ((base + EndOfCentralDirectory::MAX_COMMENT_LEN) as u64).min(len) as usize;
        let mut buf = vec![0u8; window];
        let mut tail = ByteRangeStream::new(file.clone(), len - window as u64, len)?;
        read_exact_into(&mut tail, &mut buf, "archive tail")?;

        for i in (0..=window - base).rev() {
            if buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if i + base + comment_len == window {
                return EndOfCentralDirectory::parse(&buf[i..]);
            }
        }
        Err(ZipError::MalformedArchive(
            "end of central directory record not found".into(),
        ))
    }

    fn read_central_dir(&mut self) -> ZipResult<()> {
        let dir_offset = self.dir_end.dir_offset as u64;
        let dir_size = self.dir_end.dir_size as u64;
        if dir_offset + dir_size > self.file.len() {
            return Err(ZipError::MalformedArchive(
                "central directory extends past end of file".into(),
            ));
        }
        let mut dir_stream =
            ByteRangeStream::new(self.file.clone(), dir_offset, dir_offset + dir_size)?;

        let entry_count = self.dir_end.entry_count as usize;
        self.entries.reserve(entry_count);
        for index in 0..entry_count {
            let header = EntryHeader::read_from(&mut dir_stream, true)?;
            let entry = ZipEntry::new(index, header, self.fallback);
            let name = entry.name().to_string();
            self.tree.add_child(&name, &entry)?;
            self.entries.push(entry);
        }
        Ok(())
    }

    /// Number of entries in the archive.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The archive comment, decoded with the fallback encoding.
    pub fn comment(&self) -> String {
        let (decoded, _, _) = self.fallback.decode(&self.dir_end.comment);
        decoded.into_owned()
    }

    /// `true` iff any entry is encrypted.
    pub fn needs_password(&self) -> bool {
        self.entries.iter().any(|e| e.is_encrypted())
    }

    pub fn set_password(&mut self, password: &str) {
        self.password = password.to_string();
    }

    pub fn entry(&self, index: usize) -> ZipResult<&ZipEntry> {
        self.entries.get(index).ok_or_else(|| {
            ZipError::InvalidArgument(format!(
                "entry index {index} out of range (0..{})",
                self.entries.len()
            ))
        })
    }

    /// Look an entry up by archive path; `None` when absent or when the
    /// path names an implied folder with no entry of its own.
    pub fn entry_by_path(&self, path: &str) -> Option<&ZipEntry> {
        let node = self.tree.get(path)?;
        let index = self.tree.node(node).entry_index()?;
        Some(&self.entries[index])
    }

    /// The path hierarchy over all entries.
    pub fn entry_tree(&self) -> &EntryTree {
        &self.tree
    }

    /// Open an entry's decoded byte stream.
    ///
    /// Folder entries yield an empty stream. For files, the local header
    /// at the recorded offset is re-read and must agree with the central
    /// record; the data range is then wrapped in decrypt and inflate
    /// stages as the entry's methods require.
    pub fn open_entry(&self, index: usize) -> ZipResult<Box<dyn EntryStream>> {
        let entry = self.entry(index)?;
        if !entry.is_file() {
            return Ok(Box::new(EmptyStream));
        }

        let mut header_stream = ByteRangeStream::to_end(self.file.clone(), entry.local_offset())
            .map_err(|_| bad_entry_range(entry.name()))?;
        let local = EntryHeader::read_from(&mut header_stream, false)?;
        if !entry.match_local(&local) {
            return Err(ZipError::HeaderMismatch {
                path: entry.name().to_string(),
            });
        }

        let data_start = entry.local_offset() + local.byte_size(false) as u64;
        let data_end = data_start + entry.stored_size();
        let range = ByteRangeStream::new(self.file.clone(), data_start, data_end)
            .map_err(|_| bad_entry_range(entry.name()))?;
        let mut stream: Box<dyn EntryStream> = Box::new(range);

        match entry.encryption() {
            EncryptionMethod::None => {}
            EncryptionMethod::ZipCrypto => {
                if self.password.is_empty() {
                    return Err(ZipError::PasswordRequired);
                }
                stream = Box::new(DecryptStream::new(
                    stream,
                    self.password.as_bytes(),
                    entry.time_check(),
                    entry.crc_check(),
                )?);
            }
            EncryptionMethod::Unsupported => {
                return Err(ZipError::Unsupported(format!(
                    "encryption method of `{}`",
                    entry.name()
                )));
            }
        }

        match entry.compression() {
            CompressionMethod::Stored => {}
            CompressionMethod::Deflate => {
                stream = Box::new(InflateStream::new(stream)?);
            }
            CompressionMethod::Unsupported(method) => {
                return Err(ZipError::Unsupported(format!(
                    "compression method {method} of `{}`",
                    entry.name()
                )));
            }
        }

        trace!(entry = entry.name(), "opened entry stream");
        Ok(stream)
    }

    /// [`open_entry`](Self::open_entry) addressed by archive path.
    pub fn open_entry_by_path(&self, path: &str) -> ZipResult<Box<dyn EntryStream>> {
        let entry = self.entry_by_path(path).ok_or_else(|| {
            ZipError::InvalidArgument(format!("no entry at path `{path}`"))
        })?;
        self.open_entry(entry.index())
    }
}

fn bad_entry_range(name: &str) -> ZipError {
    ZipError::MalformedArchive(format!("data of `{name}` extends past end of file"))
}
