//! Defines the physical binary layout of Graphcode containers.
//!
//! # Layout
//!
//! ```text
//! [FileHeader] [SectionMap] [Body] [Class Table] [Key Table]
//! ```
//!
//! The header and section map have fixed sizes so the writer can emit the map
//! as zeros, stream the body and trailing tables, then seek back once and patch
//! the real ranges in. That patch is the only random-access write in the format.
//!
//! All fixed-width fields are little-endian.

use crate::error::{GraphcodeError, Result, format_error};
use std::ops::Range;

/// Magic bytes identifying the format: "GRPH".
pub const MAGIC_BYTES: [u8; 4] = *b"GRPH";

/// Version of the container and record layout.
pub const FORMAT_VERSION: u16 = 1;

/// Version of the built-in primitive codecs.
pub const CODEC_VERSION: u16 = 1;

/// Magic(4) + FormatVersion(2) + CodecVersion(2) + UserVersion(4) + Flags(4) = 16
pub const FILE_HEADER_SIZE: usize = 16;

/// Three sections of Offset(8) + Length(8) = 48
pub const SECTION_MAP_SIZE: usize = 3 * Section::SIZE;

/// Bytes before the body starts.
pub const PREAMBLE_SIZE: usize = FILE_HEADER_SIZE + SECTION_MAP_SIZE;

/// Container-level flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags(u32);

impl HeaderFlags {
    const COMPRESSED_MASK: u32 = 0b001; // Bit 0
    const IDENTITY_MASK: u32 = 0b010; // Bit 1
    const TYPE_TAGS_MASK: u32 = 0b100; // Bit 2
    const KNOWN: u32 = Self::COMPRESSED_MASK | Self::IDENTITY_MASK | Self::TYPE_TAGS_MASK;

    /// Builds the flags written by an encode session.
    pub fn new(compressed: bool, identity: bool, type_tags: bool) -> Self {
        let mut bits = 0;
        if compressed {
            bits |= Self::COMPRESSED_MASK;
        }
        if identity {
            bits |= Self::IDENTITY_MASK;
        }
        if type_tags {
            bits |= Self::TYPE_TAGS_MASK;
        }
        Self(bits)
    }

    /// Validates raw flags read from a file.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !Self::KNOWN != 0 {
            return Err(format_error(format!("unknown header flags {bits:#x}")));
        }
        Ok(Self(bits))
    }

    /// The body section is LZ4-compressed.
    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED_MASK != 0
    }

    /// Identity tracking was enabled when encoding.
    pub fn has_identity(self) -> bool {
        self.0 & Self::IDENTITY_MASK != 0
    }

    /// Type tags were written when encoding.
    pub fn has_type_tags(self) -> bool {
        self.0 & Self::TYPE_TAGS_MASK != 0
    }

    /// Returns the raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }
}

/// The fixed-size record at the very start of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Always [`MAGIC_BYTES`].
    pub magic: [u8; 4],
    /// Layout version, see [`FORMAT_VERSION`].
    pub format_version: u16,
    /// Primitive codec version, see [`CODEC_VERSION`].
    pub codec_version: u16,
    /// Caller-chosen version of the stored document.
    pub user_version: u32,
    /// Container flags.
    pub flags: HeaderFlags,
}

impl FileHeader {
    /// Creates a header for the current format.
    pub fn new(user_version: u32, flags: HeaderFlags) -> Self {
        Self {
            magic: MAGIC_BYTES,
            format_version: FORMAT_VERSION,
            codec_version: CODEC_VERSION,
            user_version,
            flags,
        }
    }

    /// Serializes the header.
    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.codec_version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.user_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf
    }

    /// Parses and validates a header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes
            .get(..FILE_HEADER_SIZE)
            .ok_or_else(|| format_error("buffer smaller than file header"))?;
        if bytes[0..4] != MAGIC_BYTES {
            return Err(format_error("invalid magic bytes"));
        }
        let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if format_version != FORMAT_VERSION {
            return Err(format_error(format!(
                "unsupported format version: {format_version}"
            )));
        }
        let codec_version = u16::from_le_bytes([bytes[6], bytes[7]]);
        if codec_version > CODEC_VERSION {
            return Err(format_error(format!(
                "unsupported codec version: {codec_version}"
            )));
        }
        Ok(Self {
            magic: MAGIC_BYTES,
            format_version,
            codec_version,
            user_version: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            flags: HeaderFlags::from_bits(u32::from_le_bytes([
                bytes[12], bytes[13], bytes[14], bytes[15],
            ]))?,
        })
    }
}

/// A byte range inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Section {
    /// Absolute offset from the start of the container.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
}

impl Section {
    /// The size in bytes of a serialized section entry.
    pub const SIZE: usize = 16;

    /// Serializes to a fixed-size byte array.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Deserializes from a fixed-size byte array.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let offset: [u8; 8] = bytes
            .get(0..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| format_error("buffer too small for section"))?;
        let length: [u8; 8] = bytes
            .get(8..16)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| format_error("buffer too small for section"))?;
        Ok(Self {
            offset: u64::from_le_bytes(offset),
            length: u64::from_le_bytes(length),
        })
    }

    /// Converts to a slice range, checking it lies inside `file_len` bytes.
    pub fn range(&self, file_len: usize, name: &str) -> Result<Range<usize>> {
        let out_of_bounds = || -> GraphcodeError {
            format_error(format!(
                "{name} section {}+{} out of bounds ({file_len} bytes)",
                self.offset, self.length
            ))
        };
        let start = usize::try_from(self.offset).map_err(|_| out_of_bounds())?;
        let len = usize::try_from(self.length).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        if start < PREAMBLE_SIZE || end > file_len {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }
}

/// Ranges of the three variable-size sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionMap {
    /// The record stream.
    pub body: Section,
    /// The `TypeId -> ClassDescriptor` table.
    pub classes: Section,
    /// The `KeyId -> String` table.
    pub keys: Section,
}

impl SectionMap {
    /// Serializes the map.
    pub fn to_bytes(&self) -> [u8; SECTION_MAP_SIZE] {
        let mut buf = [0u8; SECTION_MAP_SIZE];
        buf[0..16].copy_from_slice(&self.body.to_bytes());
        buf[16..32].copy_from_slice(&self.classes.to_bytes());
        buf[32..48].copy_from_slice(&self.keys.to_bytes());
        buf
    }

    /// Parses the map.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SECTION_MAP_SIZE {
            return Err(format_error("buffer too small for section map"));
        }
        Ok(Self {
            body: Section::from_bytes(&bytes[0..16])?,
            classes: Section::from_bytes(&bytes[16..32])?,
            keys: Section::from_bytes(&bytes[32..48])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = FileHeader::new(7, HeaderFlags::new(false, true, true));
        let back = FileHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(back, header);
        assert!(back.flags.has_identity());
        assert!(!back.flags.is_compressed());
    }

    #[test]
    fn bad_magic_and_flags_are_rejected() {
        let mut bytes = FileHeader::new(0, HeaderFlags::default()).to_bytes();
        bytes[0] = b'X';
        assert!(FileHeader::from_bytes(&bytes).unwrap_err().is_format());

        let mut bytes = FileHeader::new(0, HeaderFlags::default()).to_bytes();
        bytes[12] = 0x80;
        assert!(FileHeader::from_bytes(&bytes).is_err());

        assert!(FileHeader::from_bytes(&[0u8; 3]).is_err());
    }

    #[test]
    fn section_bounds_are_checked() {
        let ok = Section {
            offset: PREAMBLE_SIZE as u64,
            length: 10,
        };
        assert_eq!(ok.range(100, "body").unwrap(), 64..74);
        assert!(ok.range(70, "body").is_err());
        let overflow = Section {
            offset: u64::MAX,
            length: 2,
        };
        assert!(overflow.range(100, "body").is_err());
        let inside_header = Section {
            offset: 0,
            length: 4,
        };
        assert!(inside_header.range(100, "body").is_err());
    }

    #[test]
    fn section_map_round_trip() {
        let map = SectionMap {
            body: Section {
                offset: 64,
                length: 9,
            },
            classes: Section {
                offset: 73,
                length: 1,
            },
            keys: Section {
                offset: 74,
                length: 3,
            },
        };
        assert_eq!(SectionMap::from_bytes(&map.to_bytes()).unwrap(), map);
    }
}
