//! # rezip
//!
//! A ZIP archive reader and writer with DEFLATE compression and legacy
//! ZipCrypto (PKWare) encryption.
//!
//! Reading parses the central directory once and then opens entry data as
//! restartable streams, composing a byte-range view with decrypt and
//! inflate stages as needed. Writing packs files and folders into a new
//! archive, measuring each entry's encoded size before any header is
//! emitted, and keeping compression only when it pays for itself.
//!
//! ## Example
//!
//! ```no_run
//! use rezip::{ZipPacker, ZipReader, read_to_end};
//!
//! fn main() -> rezip::ZipResult<()> {
//!     let mut packer = ZipPacker::new();
//!     packer.add_file("docs/readme.txt", "README.txt")?;
//!     packer.pack_to("out.zip", "")?;
//!
//!     let reader = ZipReader::open("out.zip")?;
//!     for index in 0..reader.len() {
//!         let entry = reader.entry(index)?;
//!         println!("{} ({} bytes)", entry.name(), entry.original_size());
//!     }
//!     let mut stream = reader.open_entry_by_path("docs/readme.txt")?;
//!     let bytes = read_to_end(&mut stream)?;
//!     assert!(!bytes.is_empty());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{ZipError, ZipResult};
pub use io::{ByteRangeStream, EmptyStream, EntryStream, read_to_end, stream_crc32, stream_length};
pub use zip::{
    CompressionMethod, EncryptionMethod, EntryNode, EntryTree, NodeId, ZipEntry, ZipPacker,
    ZipReader, normalize_path,
};
