//! The read side of the container.
//!
//! [`GraphcodeReader`] validates the header and section map, parses the class
//! and key tables, and hands the (decompressed) body to the decode engine.
//! Files are memory-mapped; in-memory buffers are borrowed.

use crate::codec::Decode;
use crate::compression::compressor_for;
use crate::decoder::{Decoder, RecordTree};
use crate::error::{Result, format_error};
use crate::format::{FILE_HEADER_SIZE, FileHeader, PREAMBLE_SIZE, Section, SectionMap};
use crate::graph::{ClassTable, KeyTable};
use crate::io::ByteReader;
use crate::options::GraphcodeOptions;
use crate::registry::TypeRegistry;
use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::ops::Range;
use std::path::Path;

#[derive(Debug)]
enum Source<'a> {
    Borrowed(&'a [u8]),
    Mapped(Mmap),
}

impl Source<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Borrowed(bytes) => bytes,
            Self::Mapped(mmap) => mmap,
        }
    }
}

/// A validated container, ready to decode.
#[derive(Debug)]
pub struct GraphcodeReader<'a> {
    source: Source<'a>,
    header: FileHeader,
    sections: SectionMap,
    body: Range<usize>,
    classes: ClassTable,
    keys: KeyTable,
}

impl GraphcodeReader<'static> {
    /// Memory-maps a container file and validates it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() < PREAMBLE_SIZE as u64 {
            return Err(format_error("file smaller than the container preamble"));
        }
        // Safety: the map is read-only; concurrent modification of the file by
        // another process is outside what the reader guards against.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_source(Source::Mapped(mmap))
    }
}

impl<'a> GraphcodeReader<'a> {
    /// Validates a container held in memory.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        Self::from_source(Source::Borrowed(bytes))
    }

    fn from_source(source: Source<'a>) -> Result<Self> {
        let bytes = source.bytes();
        let header = FileHeader::from_bytes(bytes)?;
        let sections = SectionMap::from_bytes(
            bytes
                .get(FILE_HEADER_SIZE..)
                .ok_or_else(|| format_error("buffer smaller than the container preamble"))?,
        )?;
        let body = sections.body.range(bytes.len(), "body")?;
        let classes = read_table(bytes, sections.classes, "class", ClassTable::read)?;
        let keys = read_table(bytes, sections.keys, "key", KeyTable::read)?;
        Ok(Self {
            source,
            header,
            sections,
            body,
            classes,
            keys,
        })
    }

    /// The container header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Ranges of the body and tables.
    pub fn sections(&self) -> &SectionMap {
        &self.sections
    }

    /// The class table.
    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// The key table.
    pub fn keys(&self) -> &KeyTable {
        &self.keys
    }

    /// Total container size in bytes.
    pub fn len(&self) -> usize {
        self.source.bytes().len()
    }

    /// Returns true for an empty source; never the case for a valid container.
    pub fn is_empty(&self) -> bool {
        self.source.bytes().is_empty()
    }

    /// The record stream, decompressed if needed.
    pub fn body(&self) -> Result<Cow<'_, [u8]>> {
        let stored = &self.source.bytes()[self.body.clone()];
        compressor_for(self.header.flags.is_compressed())?.decompress(stored)
    }

    /// Decodes the root value as `T` with the default options.
    pub fn decode<T: Decode>(&self, registry: &TypeRegistry) -> Result<T> {
        self.decode_with(registry, &GraphcodeOptions::default())
    }

    /// Decodes the root value as `T`.
    pub fn decode_with<T: Decode>(&self, registry: &TypeRegistry, options: &GraphcodeOptions) -> Result<T> {
        options.user_version_check.check(self.header.user_version)?;
        let body = self.body()?;
        let tree = RecordTree::parse(&body, &self.classes, &self.keys, options.max_depth)?;
        Decoder::new(tree, &self.classes, &self.keys, registry, options.max_depth).decode_root()
    }
}

/// Parses one table section and insists it is consumed exactly.
fn read_table<T>(
    bytes: &[u8],
    section: Section,
    name: &str,
    parse: fn(&mut ByteReader<'_>) -> Result<T>,
) -> Result<T> {
    let range = section.range(bytes.len(), name)?;
    let mut input = ByteReader::new(&bytes[range]);
    let table = parse(&mut input)?;
    if !input.is_empty() {
        return Err(format_error(format!(
            "{} trailing bytes after the {name} table",
            input.remaining()
        )));
    }
    Ok(table)
}
