//! Binary records of the ZIP format: file headers, the directory-end
//! record, and the DOS timestamp codec. All fields are little-endian.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use encoding_rs::Encoding;
use std::io::{Cursor, Write};

use crate::error::{ZipError, ZipResult};
use crate::io::{EntryStream, read_exact_into};

/// Central directory file header signature (`PK\x01\x02`).
pub(crate) const CENTRAL_SIGNATURE: [u8; 4] = *b"PK\x01\x02";
/// Local file header signature (`PK\x03\x04`).
pub(crate) const LOCAL_SIGNATURE: [u8; 4] = *b"PK\x03\x04";

pub(crate) const CENTRAL_HEADER_SIZE: usize = 46;
pub(crate) const LOCAL_HEADER_SIZE: usize = 30;

pub(crate) const FLAG_ENCRYPTED: u16 = 0x0001;
pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub(crate) const FLAG_STRONG_ENCRYPTION: u16 = 0x0040;
pub(crate) const FLAG_UTF8_NAME: u16 = 0x0800;
pub(crate) const FLAG_ENCRYPTION_MASK: u16 = FLAG_ENCRYPTED | FLAG_STRONG_ENCRYPTION;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

/// Info-ZIP Unicode Path extra field id.
const UNICODE_PATH_EXTRA_ID: u16 = 0x7075;

/// version-made-by / version-needed written on new headers (2.0).
const VERSION_DEFAULT: u16 = 0x0014;

/// How an entry's data bytes are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_code(value: u16) -> Self {
        match value {
            METHOD_STORED => CompressionMethod::Stored,
            METHOD_DEFLATE => CompressionMethod::Deflate,
            _ => CompressionMethod::Unsupported(value),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            CompressionMethod::Stored => METHOD_STORED,
            CompressionMethod::Deflate => METHOD_DEFLATE,
            CompressionMethod::Unsupported(value) => *value,
        }
    }
}

/// How an entry's data bytes are encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    None,
    /// The legacy PKWare stream cipher (flags bit 0, without bit 6).
    ZipCrypto,
    Unsupported,
}

/// One file header record, covering both wire variants.
///
/// The local variant stops after the extra field; the central-only fields
/// are zero on a header parsed from a local record.
#[derive(Debug, Clone)]
pub(crate) struct EntryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local_offset: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub comment: Vec<u8>,
}

impl EntryHeader {
    pub(crate) fn new() -> Self {
        Self {
            version_made_by: VERSION_DEFAULT,
            version_needed: VERSION_DEFAULT,
            flags: FLAG_UTF8_NAME,
            method: METHOD_STORED,
            mod_time: 0,
            mod_date: 0,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            disk_number: 0,
            internal_attrs: 0,
            external_attrs: 0,
            local_offset: 0,
            file_name: Vec::new(),
            extra_field: Vec::new(),
            comment: Vec::new(),
        }
    }

    /// Parse one record from the stream, leaving it positioned just past
    /// the record's variable-length blocks.
    pub(crate) fn read_from<S: EntryStream + ?Sized>(
        stream: &mut S,
        central: bool,
    ) -> ZipResult<Self> {
        let (what, fixed_len, signature) = if central {
            ("central file header", CENTRAL_HEADER_SIZE, CENTRAL_SIGNATURE)
        } else {
            ("local file header", LOCAL_HEADER_SIZE, LOCAL_SIGNATURE)
        };
        let mut fixed = [0u8; CENTRAL_HEADER_SIZE];
        read_exact_into(stream, &mut fixed[..fixed_len], what)?;
        if fixed[..4] != signature {
            return Err(ZipError::MalformedArchive(format!("bad {what} signature")));
        }

        let mut cursor = Cursor::new(&fixed[4..fixed_len]);
        let mut header = Self::new();
        header.version_made_by = if central {
            cursor.read_u16::<LittleEndian>()?
        } else {
            0
        };
        header.version_needed = cursor.read_u16::<LittleEndian>()?;
        header.flags = cursor.read_u16::<LittleEndian>()?;
        header.method = cursor.read_u16::<LittleEndian>()?;
        header.mod_time = cursor.read_u16::<LittleEndian>()?;
        header.mod_date = cursor.read_u16::<LittleEndian>()?;
        header.crc32 = cursor.read_u32::<LittleEndian>()?;
        header.compressed_size = cursor.read_u32::<LittleEndian>()?;
        header.uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
        let comment_len = if central {
            let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
            header.disk_number = cursor.read_u16::<LittleEndian>()?;
            header.internal_attrs = cursor.read_u16::<LittleEndian>()?;
            header.external_attrs = cursor.read_u32::<LittleEndian>()?;
            header.local_offset = cursor.read_u32::<LittleEndian>()?;
            comment_len
        } else {
            0
        };

        if name_len == 0 {
            return Err(ZipError::MalformedArchive(format!("empty name in {what}")));
        }
        header.file_name = vec![0; name_len];
        read_exact_into(stream, &mut header.file_name, "header file name")?;
        header.extra_field = vec![0; extra_len];
        read_exact_into(stream, &mut header.extra_field, "header extra field")?;
        header.comment = vec![0; comment_len];
        read_exact_into(stream, &mut header.comment, "header comment")?;
        Ok(header)
    }

    fn validate_for_write(&self, central: bool) -> ZipResult<()> {
        if self.file_name.is_empty() {
            return Err(ZipError::InvalidArgument("empty entry name".into()));
        }
        if self.flags & FLAG_UTF8_NAME == 0 {
            return Err(ZipError::InvalidArgument(
                "entry names are always written as UTF-8".into(),
            ));
        }
        if matches!(self.compression(), CompressionMethod::Unsupported(_)) {
            return Err(ZipError::Unsupported(format!(
                "compression method {}",
                self.method
            )));
        }
        let max = u16::MAX as usize;
        let variable = if central {
            self.file_name.len().max(self.extra_field.len()).max(self.comment.len())
        } else {
            self.file_name.len().max(self.extra_field.len())
        };
        if variable > max {
            return Err(ZipError::InvalidArgument(
                "header field longer than 65535 bytes".into(),
            ));
        }
        Ok(())
    }

    /// Serialized size of the chosen wire variant.
    pub(crate) fn byte_size(&self, central: bool) -> usize {
        if central {
            CENTRAL_HEADER_SIZE + self.file_name.len() + self.extra_field.len() + self.comment.len()
        } else {
            LOCAL_HEADER_SIZE + self.file_name.len() + self.extra_field.len()
        }
    }

    /// Write one record; returns the bytes written.
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W, central: bool) -> ZipResult<usize> {
        self.validate_for_write(central)?;
        writer.write_all(if central {
            &CENTRAL_SIGNATURE
        } else {
            &LOCAL_SIGNATURE
        })?;
        if central {
            writer.write_u16::<LittleEndian>(self.version_made_by)?;
        }
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.method)?;
        writer.write_u16::<LittleEndian>(self.mod_time)?;
        writer.write_u16::<LittleEndian>(self.mod_date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(self.file_name.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.extra_field.len() as u16)?;
        if central {
            writer.write_u16::<LittleEndian>(self.comment.len() as u16)?;
            writer.write_u16::<LittleEndian>(self.disk_number)?;
            writer.write_u16::<LittleEndian>(self.internal_attrs)?;
            writer.write_u32::<LittleEndian>(self.external_attrs)?;
            writer.write_u32::<LittleEndian>(self.local_offset)?;
        }
        writer.write_all(&self.file_name)?;
        writer.write_all(&self.extra_field)?;
        if central {
            writer.write_all(&self.comment)?;
        }
        Ok(self.byte_size(central))
    }

    /// Central/local agreement check.
    ///
    /// Sizes and CRC are skipped when the local record defers them to a
    /// trailing data descriptor.
    pub(crate) fn match_local(&self, local: &EntryHeader) -> bool {
        let mut matched = self.method == local.method
            && (self.flags & FLAG_ENCRYPTION_MASK) == (local.flags & FLAG_ENCRYPTION_MASK)
            && self.file_name == local.file_name;
        if matched && local.flags & FLAG_DATA_DESCRIPTOR == 0 {
            matched = self.crc32 == local.crc32
                && self.compressed_size == local.compressed_size
                && self.uncompressed_size == local.uncompressed_size;
        }
        matched
    }

    pub(crate) fn compression(&self) -> CompressionMethod {
        CompressionMethod::from_code(self.method)
    }

    pub(crate) fn set_compression(&mut self, method: CompressionMethod) {
        self.method = method.code();
    }

    pub(crate) fn encryption(&self) -> EncryptionMethod {
        match self.flags & FLAG_ENCRYPTION_MASK {
            0 => EncryptionMethod::None,
            FLAG_ENCRYPTED => EncryptionMethod::ZipCrypto,
            _ => EncryptionMethod::Unsupported,
        }
    }

    pub(crate) fn set_encrypted(&mut self) {
        self.flags |= FLAG_ENCRYPTED;
    }

    /// Check byte derived from the timestamp (high byte of mod-time).
    pub(crate) fn time_check(&self) -> u8 {
        (self.mod_time >> 8) as u8
    }

    /// Check byte derived from the CRC (high byte).
    pub(crate) fn crc_check(&self) -> u8 {
        (self.crc32 >> 24) as u8
    }

    /// Decode the entry name.
    ///
    /// UTF-8 flag wins; otherwise a valid Unicode Path extra field
    /// (version 1, matching name CRC) wins; otherwise the raw bytes are
    /// decoded with the caller's fallback encoding.
    pub(crate) fn decoded_name(&self, fallback: &'static Encoding) -> String {
        if self.flags & FLAG_UTF8_NAME != 0 {
            return String::from_utf8_lossy(&self.file_name).into_owned();
        }
        if let Some(name) = self.unicode_path_name() {
            return name;
        }
        let (decoded, _, _) = fallback.decode(&self.file_name);
        decoded.into_owned()
    }

    fn unicode_path_name(&self) -> Option<String> {
        let mut rest = self.extra_field.as_slice();
        while rest.len() >= 4 {
            let id = u16::from_le_bytes([rest[0], rest[1]]);
            let size = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            rest = &rest[4..];
            if rest.len() < size {
                break;
            }
            let data = &rest[..size];
            rest = &rest[size..];
            if id != UNICODE_PATH_EXTRA_ID || size <= 5 {
                continue;
            }
            let version = data[0];
            let name_crc = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&self.file_name);
            if version == 1 && name_crc == hasher.finalize() {
                return Some(String::from_utf8_lossy(&data[5..]).into_owned());
            }
        }
        None
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.file_name = name.as_bytes().to_vec();
    }

    pub(crate) fn last_modified(&self) -> NaiveDateTime {
        dos_to_datetime(self.mod_date, self.mod_time)
    }

    pub(crate) fn set_last_modified(&mut self, time: NaiveDateTime) {
        let (date, time) = datetime_to_dos(time);
        self.mod_date = date;
        self.mod_time = time;
    }
}

/// The trailing directory-end record (`PK\x05\x06`).
#[derive(Debug, Clone)]
pub(crate) struct EndOfCentralDirectory {
    pub entry_count: u16,
    pub dir_size: u32,
    pub dir_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub(crate) const SIGNATURE: [u8; 4] = *b"PK\x05\x06";
    pub(crate) const BASE_SIZE: usize = 22;
    /// Largest possible comment; bounds the backward signature scan.
    pub(crate) const MAX_COMMENT_LEN: usize = u16::MAX as usize;

    /// Parse a record starting at `bytes[0]`.
    pub(crate) fn parse(bytes: &[u8]) -> ZipResult<Self> {
        if bytes.len() < Self::BASE_SIZE {
            return Err(ZipError::MalformedArchive(
                "truncated end of central directory record".into(),
            ));
        }
        if bytes[..4] != Self::SIGNATURE {
            return Err(ZipError::MalformedArchive(
                "bad end of central directory signature".into(),
            ));
        }
        let mut cursor = Cursor::new(&bytes[4..]);
        let disk_number = cursor.read_u16::<LittleEndian>()?;
        let start_disk = cursor.read_u16::<LittleEndian>()?;
        if disk_number != 0 || start_disk != 0 {
            return Err(ZipError::Unsupported("multi-disk archive".into()));
        }
        let disk_entries = cursor.read_u16::<LittleEndian>()?;
        let entry_count = cursor.read_u16::<LittleEndian>()?;
        if disk_entries != entry_count {
            return Err(ZipError::MalformedArchive(
                "entry counts disagree in directory end".into(),
            ));
        }
        let dir_size = cursor.read_u32::<LittleEndian>()?;
        let dir_offset = cursor.read_u32::<LittleEndian>()?;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
        if bytes.len() < Self::BASE_SIZE + comment_len {
            return Err(ZipError::MalformedArchive(
                "directory comment truncated".into(),
            ));
        }
        let comment = bytes[Self::BASE_SIZE..Self::BASE_SIZE + comment_len].to_vec();
        Ok(Self {
            entry_count,
            dir_size,
            dir_offset,
            comment,
        })
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> ZipResult<usize> {
        if self.comment.len() > Self::MAX_COMMENT_LEN {
            return Err(ZipError::InvalidArgument(
                "archive comment longer than 65535 bytes".into(),
            ));
        }
        writer.write_all(&Self::SIGNATURE)?;
        writer.write_u16::<LittleEndian>(0)?; // disk number
        writer.write_u16::<LittleEndian>(0)?; // start disk number
        writer.write_u16::<LittleEndian>(self.entry_count)?;
        writer.write_u16::<LittleEndian>(self.entry_count)?;
        writer.write_u32::<LittleEndian>(self.dir_size)?;
        writer.write_u32::<LittleEndian>(self.dir_offset)?;
        writer.write_u16::<LittleEndian>(self.comment.len() as u16)?;
        writer.write_all(&self.comment)?;
        Ok(Self::BASE_SIZE + self.comment.len())
    }
}

/// Decode a DOS date/time pair; any out-of-range field collapses to the
/// minimum representable timestamp (1980-01-01 00:00:00).
pub(crate) fn dos_to_datetime(date: u16, time: u16) -> NaiveDateTime {
    let year = 1980 + ((date >> 9) & 0x7F) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) << 1) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .unwrap_or_else(dos_epoch)
}

/// Encode to DOS resolution (2-second granularity, years 1980-2107);
/// out-of-range years collapse to the minimum representable date.
pub(crate) fn datetime_to_dos(time: NaiveDateTime) -> (u16, u16) {
    let year = time.year();
    if !(1980..=2107).contains(&year) {
        return (0x21, 0);
    }
    let date =
        (((year - 1980) as u16) << 9) | ((time.month() as u16) << 5) | (time.day() as u16);
    let time = ((time.hour() as u16) << 11)
        | ((time.minute() as u16) << 5)
        | ((time.second() as u16) >> 1);
    (date, time)
}

fn dos_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1980, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::testing::VecStream;

    fn name_crc(name: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(name);
        hasher.finalize()
    }

    #[test]
    fn dos_time_round_trips_at_two_second_resolution() {
        let t = NaiveDate::from_ymd_opt(2026, 8, 6)
            .unwrap()
            .and_hms_opt(13, 37, 43)
            .unwrap();
        let (date, time) = datetime_to_dos(t);
        let back = dos_to_datetime(date, time);
        assert_eq!(back.date(), t.date());
        assert_eq!(back.time().hour(), 13);
        assert_eq!(back.time().minute(), 37);
        assert_eq!(back.time().second(), 42); // rounded down to even
    }

    #[test]
    fn out_of_range_dates_collapse_to_the_dos_epoch() {
        let early = NaiveDate::from_ymd_opt(1979, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        assert_eq!(datetime_to_dos(early), (0x21, 0));
        let epoch = NaiveDate::from_ymd_opt(1980, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(dos_to_datetime(0x21, 0), epoch);
        // month 0 / day 0 are not valid DOS fields; clamp instead of failing
        assert_eq!(dos_to_datetime(0, 0), epoch);
    }

    #[test]
    fn header_round_trips_in_both_variants() {
        let mut header = EntryHeader::new();
        header.set_name("dir/file.txt");
        header.crc32 = 0xDEAD_BEEF;
        header.compressed_size = 120;
        header.uncompressed_size = 345;
        header.set_compression(CompressionMethod::Deflate);
        header.local_offset = 77;

        for central in [false, true] {
            let mut bytes = Vec::new();
            let written = header.write_to(&mut bytes, central).unwrap();
            assert_eq!(written, header.byte_size(central));
            assert_eq!(written, bytes.len());

            let parsed =
                EntryHeader::read_from(&mut VecStream::new(bytes), central).unwrap();
            assert_eq!(parsed.file_name, header.file_name);
            assert_eq!(parsed.crc32, header.crc32);
            assert_eq!(parsed.compressed_size, header.compressed_size);
            assert_eq!(parsed.uncompressed_size, header.uncompressed_size);
            assert_eq!(parsed.compression(), CompressionMethod::Deflate);
            assert_eq!(parsed.local_offset, if central { 77 } else { 0 });
            assert!(header.match_local(&parsed));
        }
    }

    #[test]
    fn bad_signature_and_truncation_are_malformed() {
        let mut header = EntryHeader::new();
        header.set_name("a");
        let mut bytes = Vec::new();
        header.write_to(&mut bytes, true).unwrap();

        bytes[1] = b'X';
        assert!(matches!(
            EntryHeader::read_from(&mut VecStream::new(bytes.clone()), true),
            Err(ZipError::MalformedArchive(_))
        ));

        bytes[1] = b'K';
        bytes.truncate(20);
        assert!(matches!(
            EntryHeader::read_from(&mut VecStream::new(bytes), true),
            Err(ZipError::MalformedArchive(_))
        ));
    }

    #[test]
    fn write_rejects_unsupported_method_and_non_utf8_flag() {
        let mut header = EntryHeader::new();
        header.set_name("a");
        header.method = 12; // bzip2
        let mut sink = Vec::new();
        assert!(matches!(
            header.write_to(&mut sink, false),
            Err(ZipError::Unsupported(_))
        ));

        header.method = 0;
        header.flags = 0;
        assert!(matches!(
            header.write_to(&mut sink, false),
            Err(ZipError::InvalidArgument(_))
        ));
    }

    #[test]
    fn match_local_skips_sizes_behind_a_data_descriptor() {
        let mut central = EntryHeader::new();
        central.set_name("f");
        central.crc32 = 1;
        central.compressed_size = 2;
        central.uncompressed_size = 3;

        let mut local = central.clone();
        local.crc32 = 0;
        local.compressed_size = 0;
        local.uncompressed_size = 0;
        assert!(!central.match_local(&local));

        local.flags |= FLAG_DATA_DESCRIPTOR;
        assert!(central.match_local(&local));

        local.flags |= FLAG_ENCRYPTED;
        assert!(!central.match_local(&local));
    }

    #[test]
    fn unicode_path_extra_field_wins_when_crc_matches() {
        let raw_name = vec![0xB5, 0xDA, 0xB6, 0xFE]; // GBK bytes
        let utf8_name = "第二".as_bytes();

        let mut extra = Vec::new();
        extra.extend_from_slice(&UNICODE_PATH_EXTRA_ID.to_le_bytes());
        extra.extend_from_slice(&((5 + utf8_name.len()) as u16).to_le_bytes());
        extra.push(1);
        extra.extend_from_slice(&name_crc(&raw_name).to_le_bytes());
        extra.extend_from_slice(utf8_name);

        let mut header = EntryHeader::new();
        header.flags = 0; // not UTF-8 flagged
        header.file_name = raw_name.clone();
        header.extra_field = extra;
        assert_eq!(header.decoded_name(encoding_rs::UTF_8), "第二");

        // A stale CRC falls through to the fallback encoding.
        header.extra_field[6] ^= 0xFF;
        assert_eq!(header.decoded_name(encoding_rs::GBK), "第二");
    }

    #[test]
    fn directory_end_round_trips_with_comment() {
        let record = EndOfCentralDirectory {
            entry_count: 3,
            dir_size: 138,
            dir_offset: 4096,
            comment: b"hello".to_vec(),
        };
        let mut bytes = Vec::new();
        let written = record.write_to(&mut bytes).unwrap();
        assert_eq!(written, EndOfCentralDirectory::BASE_SIZE + 5);

        let parsed = EndOfCentralDirectory::parse(&bytes).unwrap();
        assert_eq!(parsed.entry_count, 3);
        assert_eq!(parsed.dir_size, 138);
        assert_eq!(parsed.dir_offset, 4096);
        assert_eq!(parsed.comment, b"hello");
    }

    #[test]
    fn directory_end_rejects_multi_disk_and_count_mismatch() {
        let record = EndOfCentralDirectory {
            entry_count: 1,
            dir_size: 46,
            dir_offset: 0,
            comment: Vec::new(),
        };
        let mut bytes = Vec::new();
        record.write_to(&mut bytes).unwrap();

        let mut multi = bytes.clone();
        multi[4] = 1;
        assert!(matches!(
            EndOfCentralDirectory::parse(&multi),
            Err(ZipError::Unsupported(_))
        ));

        let mut mismatch = bytes;
        mismatch[10] = 9;
        assert!(matches!(
            EndOfCentralDirectory::parse(&mismatch),
            Err(ZipError::MalformedArchive(_))
        ));
    }
}
