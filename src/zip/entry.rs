//! Parsed archive entries and the hierarchical path index over them.

use chrono::NaiveDateTime;
use encoding_rs::Encoding;
use std::collections::HashMap;

use crate::error::{ZipError, ZipResult};
use crate::zip::structures::{CompressionMethod, EncryptionMethod, EntryHeader};

/// One entry of an open archive, immutable once constructed.
///
/// Keeps its parsed central directory header so opening the entry can
/// compare it against the local header at the recorded offset.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    index: usize,
    name: String,
    modified: NaiveDateTime,
    header: EntryHeader,
}

impl ZipEntry {
    pub(crate) fn new(index: usize, header: EntryHeader, fallback: &'static Encoding) -> Self {
        let name = header.decoded_name(fallback);
        let modified = header.last_modified();
        Self {
            index,
            name,
            modified,
            header,
        }
    }

    /// Position in the central directory, 0-based.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Slash-separated archive path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `false` for folder markers (trailing `/` and zero original size).
    pub fn is_file(&self) -> bool {
        !(self.name.ends_with('/') && self.header.uncompressed_size == 0)
    }

    pub fn compression(&self) -> CompressionMethod {
        self.header.compression()
    }

    pub fn is_compressed(&self) -> bool {
        self.compression() != CompressionMethod::Stored
    }

    pub fn encryption(&self) -> EncryptionMethod {
        self.header.encryption()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption() != EncryptionMethod::None
    }

    /// CRC-32 of the original (decoded) bytes.
    pub fn crc32(&self) -> u32 {
        self.header.crc32
    }

    /// Uncompressed byte count.
    pub fn original_size(&self) -> u64 {
        self.header.uncompressed_size as u64
    }

    /// Byte count as laid out in the archive (after compression and
    /// including the encryption header, when present).
    pub fn stored_size(&self) -> u64 {
        self.header.compressed_size as u64
    }

    /// Last-modified timestamp at DOS resolution.
    pub fn last_modified(&self) -> NaiveDateTime {
        self.modified
    }

    pub(crate) fn local_offset(&self) -> u64 {
        self.header.local_offset as u64
    }

    pub(crate) fn time_check(&self) -> u8 {
        self.header.time_check()
    }

    pub(crate) fn crc_check(&self) -> u8 {
        self.header.crc_check()
    }

    pub(crate) fn match_local(&self, local: &EntryHeader) -> bool {
        self.header.match_local(local)
    }
}

/// Handle to a node in an [`EntryTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// One node of the path hierarchy.
///
/// Interior nodes implied only by a nested path (`a/b.txt` without an
/// explicit `a/` entry) carry no entry index. A node whose entry is a file
/// never has children.
#[derive(Debug)]
pub struct EntryNode {
    name: String,
    parent: Option<NodeId>,
    children: HashMap<String, NodeId>,
    entry: Option<usize>,
    file: bool,
}

impl EntryNode {
    fn new(name: &str, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: HashMap::new(),
            entry: None,
            file: false,
        }
    }

    /// Path segment (empty for the root).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent handle; `None` for the root. Handles are plain indices, so
    /// the link never owns the parent.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Index of the associated entry in the reader's entry list.
    pub fn entry_index(&self) -> Option<usize> {
        self.entry
    }

    /// `true` iff the node has an associated entry that denotes a file.
    pub fn is_file(&self) -> bool {
        self.file
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }

    /// Child handles, in no particular order.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// Arena-backed tree over the archive paths, built while the central
/// directory is parsed.
#[derive(Debug)]
pub struct EntryTree {
    nodes: Vec<EntryNode>,
}

impl EntryTree {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![EntryNode::new("", None)],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &EntryNode {
        &self.nodes[id.0]
    }

    /// Walk `path` from the root; `None` on the first missing segment.
    pub fn get(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self.nodes[current.0].child(segment)?;
        }
        Some(current)
    }

    /// Insert an entry, creating intermediate folder nodes as needed.
    ///
    /// Fails when the path passes through a file entry or the terminal
    /// node already has an entry (archive paths must be unique).
    pub(crate) fn add_child(&mut self, path: &str, entry: &ZipEntry) -> ZipResult<()> {
        let mut current = self.root();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if self.nodes[current.0].file {
                return Err(ZipError::PathConflict(format!(
                    "`{path}` is nested under a file entry"
                )));
            }
            let existing = self.nodes[current.0].child(segment);
            current = match existing {
                Some(id) => id,
                None => {
                    let id = NodeId(self.nodes.len());
                    self.nodes.push(EntryNode::new(segment, Some(current)));
                    self.nodes[current.0].children.insert(segment.to_string(), id);
                    id
                }
            };
        }
        let node = &mut self.nodes[current.0];
        if node.entry.is_some() {
            return Err(ZipError::PathConflict(format!(
                "duplicate archive path `{path}`"
            )));
        }
        node.entry = Some(entry.index());
        node.file = entry.is_file();
        Ok(())
    }
}
