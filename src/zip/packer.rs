//! Archive writing: entry accumulation and the measure-then-emit pipeline.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ZipError, ZipResult};
use crate::io::{
    ByteRangeStream, DeflateStream, EncryptStream, EntryStream, SharedFile, copy_stream,
    stream_crc32, stream_length,
};
use crate::zip::structures::{CompressionMethod, EndOfCentralDirectory, EntryHeader};

/// Collapse an archive path to its canonical slash-separated form.
///
/// Splits on `/` and `\`, drops empty and `.` segments, and resolves `..`
/// against the segments pushed so far; a leading `..` is dropped, so the
/// result never escapes the archive root. Normalization is idempotent.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

fn parent_path(path: &str) -> Option<&str> {
    path.rfind('/').map(|pos| &path[..pos])
}

enum EntryKind {
    File,
    Folder,
}

struct PackEntry {
    header: EntryHeader,
    /// Source file for file entries; `None` marks a folder.
    source: Option<PathBuf>,
}

/// Builds a new archive from files and folders.
///
/// Entries are written in insertion order. ZIP headers precede entry data
/// and this writer never emits trailing data descriptors, so each file runs
/// through the encode pipeline twice: once to measure CRC and sizes, once
/// to copy the bytes out. Compression is kept only when it actually
/// shrinks the entry.
pub struct ZipPacker {
    entries: Vec<PackEntry>,
    index: HashMap<String, EntryKind>,
    comment: String,
}

impl ZipPacker {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            comment: String::new(),
        }
    }

    /// Queue a file entry backed by `source`. Parent folders are added
    /// automatically.
    pub fn add_file(&mut self, entry_path: &str, source: impl AsRef<Path>) -> ZipResult<()> {
        let path = normalize_path(entry_path);
        if path.is_empty() {
            return Err(ZipError::InvalidArgument("empty entry path".into()));
        }
        let source = source.as_ref();
        if !source.is_file() {
            return Err(ZipError::InvalidArgument(format!(
                "`{}` is not a regular file",
                source.display()
            )));
        }
        if self.index.contains_key(&path) {
            return Err(ZipError::PathConflict(format!("`{path}` was already added")));
        }
        if let Some(parent) = parent_path(&path) {
            self.add_folder_normalized(parent)?;
        }

        let mut header = EntryHeader::new();
        header.set_name(&path);
        let modified = fs::metadata(source)?.modified()?;
        header.set_last_modified(DateTime::<Local>::from(modified).naive_local());
        self.entries.push(PackEntry {
            header,
            source: Some(source.to_path_buf()),
        });
        self.index.insert(path, EntryKind::File);
        Ok(())
    }

    /// Queue a folder entry. Re-adding an existing folder is a no-op;
    /// clashing with a file path is a conflict.
    pub fn add_folder(&mut self, entry_path: &str) -> ZipResult<()> {
        let path = normalize_path(entry_path);
        if path.is_empty() {
            return Err(ZipError::InvalidArgument("empty entry path".into()));
        }
        self.add_folder_normalized(&path)
    }

    fn add_folder_normalized(&mut self, path: &str) -> ZipResult<()> {
        match self.index.get(path) {
            Some(EntryKind::Folder) => return Ok(()),
            Some(EntryKind::File) => {
                return Err(ZipError::PathConflict(format!(
                    "`{path}` was already added as a file"
                )));
            }
            None => {}
        }
        if let Some(parent) = parent_path(path) {
            self.add_folder_normalized(parent)?;
        }
        let mut header = EntryHeader::new();
        header.set_name(&format!("{path}/"));
        self.entries.push(PackEntry {
            header,
            source: None,
        });
        self.index.insert(path.to_string(), EntryKind::Folder);
        Ok(())
    }

    /// Archive comment written into the directory-end record.
    pub fn set_comment(&mut self, comment: &str) {
        self.comment = comment.to_string();
    }

    /// Write the archive to a new file at `output`.
    ///
    /// Refuses to overwrite. A failure mid-write leaves a truncated file
    /// behind; cleanup is the caller's responsibility.
    pub fn pack_to(&mut self, output: impl AsRef<Path>, password: &str) -> ZipResult<()> {
        let output = output.as_ref();
        if output.exists() {
            return Err(ZipError::InvalidArgument(format!(
                "output `{}` already exists",
                output.display()
            )));
        }
        let mut writer = BufWriter::new(fs::File::create(output)?);
        self.pack_to_stream(&mut writer, password)?;
        writer.flush()?;
        Ok(())
    }

    /// Write the archive to an arbitrary writer.
    ///
    /// With a non-empty password every file entry is encrypted with the
    /// legacy stream cipher. A packer finalizes its headers while packing,
    /// so each instance should pack once.
    pub fn pack_to_stream<W: Write>(&mut self, writer: &mut W, password: &str) -> ZipResult<()> {
        let mut offset: u64 = 0;
        for info in &mut self.entries {
            info.header.local_offset = u32::try_from(offset)
                .map_err(|_| ZipError::Unsupported("archive larger than 4 GiB".into()))?;

            let Some(source) = &info.source else {
                // Folders contribute only their header.
                offset += info.header.write_to(writer, false)? as u64;
                continue;
            };

            let src_file = SharedFile::open(source)?;
            let src_len = src_file.len();
            let mut base = ByteRangeStream::new(src_file.clone(), 0, src_len)?;
            let crc = stream_crc32(&mut base)?;
            let original_len = stream_length(&mut base)?;
            let original_len32 = u32::try_from(original_len).map_err(|_| {
                ZipError::Unsupported(format!("`{}` is larger than 4 GiB", source.display()))
            })?;
            info.header.crc32 = crc;
            info.header.compressed_size = original_len32;
            info.header.uncompressed_size = original_len32;

            let mut data: Box<dyn EntryStream> = Box::new(base);
            if original_len > 0 {
                let fresh = ByteRangeStream::new(src_file.clone(), 0, src_len)?;
                let mut deflated = DeflateStream::new(fresh)?;
                let deflated_len = stream_length(&mut deflated)?;
                if deflated_len < original_len {
                    info.header.set_compression(CompressionMethod::Deflate);
                    info.header.compressed_size = deflated_len as u32;
                    data = Box::new(deflated);
                }
            }

            if !password.is_empty() {
                let check_byte = info.header.time_check();
                let mut encrypted =
                    EncryptStream::new(data, password.as_bytes(), check_byte)?;
                let encrypted_len = stream_length(&mut encrypted)?;
                info.header.set_encrypted();
                info.header.compressed_size = u32::try_from(encrypted_len).map_err(|_| {
                    ZipError::Unsupported(format!("`{}` is larger than 4 GiB", source.display()))
                })?;
                data = Box::new(encrypted);
            }

            offset += info.header.write_to(writer, false)? as u64;
            if info.header.compressed_size > 0 {
                data.restart()?;
                let copied = copy_stream(&mut data, writer)?;
                debug_assert_eq!(copied, info.header.compressed_size as u64);
                offset += copied;
            }
            debug!(
                entry = %String::from_utf8_lossy(&info.header.file_name),
                stored = info.header.compressed_size,
                original = info.header.uncompressed_size,
                method = info.header.method,
                "packed entry"
            );
        }

        let dir_offset = u32::try_from(offset)
            .map_err(|_| ZipError::Unsupported("archive larger than 4 GiB".into()))?;
        let mut dir_size: u64 = 0;
        for info in &self.entries {
            dir_size += info.header.write_to(writer, true)? as u64;
        }

        let dir_end = EndOfCentralDirectory {
            entry_count: u16::try_from(self.entries.len())
                .map_err(|_| ZipError::Unsupported("more than 65535 entries".into()))?,
            dir_size: u32::try_from(dir_size)
                .map_err(|_| ZipError::Unsupported("central directory larger than 4 GiB".into()))?,
            dir_offset,
            comment: self.comment.as_bytes().to_vec(),
        };
        dir_end.write_to(writer)?;
        debug!(entries = self.entries.len(), bytes = offset + dir_size, "packed archive");
        Ok(())
    }
}

impl Default for ZipPacker {
    fn default() -> Self {
        Self::new()
    }
}
