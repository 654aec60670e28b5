//! Tools for inspecting the physical structure of Graphcode containers.
//!
//! The report describes layout, not values: header fields, section ranges,
//! the class and key tables, and how many records of each kind the body holds.

use crate::block::FileBlock;
use crate::decoder::RecordTree;
use crate::error::Result;
use crate::graph::ClassDescriptor;
use crate::reader::GraphcodeReader;
use serde::Serialize;
use std::path::Path;

/// A structural report of a container.
#[derive(Debug, Serialize)]
pub struct ContainerReport {
    /// Total container size in bytes.
    pub total_size: u64,
    /// Container layout version.
    pub format_version: u16,
    /// Primitive codec version.
    pub codec_version: u16,
    /// Caller-chosen document version.
    pub user_version: u32,
    /// Body is LZ4-compressed.
    pub compressed: bool,
    /// Identity tracking was on when encoding.
    pub identity_tracking: bool,
    /// Class tags were written.
    pub type_tags: bool,
    /// Stored body range.
    pub body: SectionInfo,
    /// Class table range.
    pub class_section: SectionInfo,
    /// Key table range.
    pub key_section: SectionInfo,
    /// Decompressed body size.
    pub body_size: u64,
    /// Class table, in type id order.
    pub classes: Vec<ClassDescriptor>,
    /// Key table, in key id order (ids start at 1).
    pub keys: Vec<String>,
    /// Record counts.
    pub records: RecordCounts,
    /// Number of materialized objects (values with an object id).
    pub objects: usize,
    /// Deepest scope nesting in the body.
    pub max_depth: usize,
}

/// Offset and length of one section.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SectionInfo {
    /// Offset from the start of the container.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
}

/// Number of body records per kind.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct RecordCounts {
    /// `End` records.
    pub end: usize,
    /// `Nil` records.
    pub nil: usize,
    /// Unconditional pointers.
    pub pointer: usize,
    /// Conditional pointers, including pruned ones.
    pub conditional_pointer: usize,
    /// Conditional pointers whose target was never materialized.
    pub pruned: usize,
    /// Values that open a scope.
    pub structural: usize,
    /// Values carrying a payload.
    pub payload: usize,
}

/// The Graphcode inspector tool.
#[derive(Debug)]
pub struct GraphcodeInspector;

impl GraphcodeInspector {
    /// Analyzes a container file.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<ContainerReport> {
        Self::report(&GraphcodeReader::open(path)?)
    }

    /// Analyzes a container held in memory.
    pub fn inspect_bytes(bytes: &[u8]) -> Result<ContainerReport> {
        Self::report(&GraphcodeReader::from_bytes(bytes)?)
    }

    fn report(reader: &GraphcodeReader<'_>) -> Result<ContainerReport> {
        let body = reader.body()?;
        let tree = RecordTree::parse(&body, reader.classes(), reader.keys(), usize::MAX)?;

        let mut records = RecordCounts::default();
        for record in &tree.records {
            match &record.block {
                FileBlock::End => records.end += 1,
                FileBlock::Nil { .. } => records.nil += 1,
                FileBlock::Pointer {
                    obj,
                    conditional: true,
                    ..
                } => {
                    records.conditional_pointer += 1;
                    if !tree.definitions.contains_key(obj) {
                        records.pruned += 1;
                    }
                }
                FileBlock::Pointer { .. } => records.pointer += 1,
                FileBlock::Value { payload: None, .. } => records.structural += 1,
                FileBlock::Value { .. } => records.payload += 1,
            }
        }

        let header = reader.header();
        let sections = reader.sections();
        let info = |s: crate::format::Section| SectionInfo {
            offset: s.offset,
            length: s.length,
        };
        Ok(ContainerReport {
            total_size: reader.len() as u64,
            format_version: header.format_version,
            codec_version: header.codec_version,
            user_version: header.user_version,
            compressed: header.flags.is_compressed(),
            identity_tracking: header.flags.has_identity(),
            type_tags: header.flags.has_type_tags(),
            body: info(sections.body),
            class_section: info(sections.classes),
            key_section: info(sections.keys),
            body_size: body.len() as u64,
            classes: reader.classes().descriptors().to_vec(),
            keys: reader.keys().iter().map(|(_, name)| name.to_owned()).collect(),
            records,
            objects: tree.definitions.len(),
            max_depth: tree.max_nesting,
        })
    }
}

impl std::fmt::Display for ContainerReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== GRAPHCODE INSPECTOR REPORT ===")?;
        writeln!(
            f,
            "Size: {}b | Format v{} | Codec v{} | User v{}",
            self.total_size, self.format_version, self.codec_version, self.user_version
        )?;
        writeln!(
            f,
            "Flags: compressed={} identity={} type_tags={}",
            self.compressed, self.identity_tracking, self.type_tags
        )?;
        writeln!(f, "\n[SECTIONS]")?;
        for (name, s) in [
            ("body", self.body),
            ("classes", self.class_section),
            ("keys", self.key_section),
        ] {
            writeln!(f, "  {name:<8} @{:<8} {}b", s.offset, s.length)?;
        }
        writeln!(f, "\n[CLASSES]")?;
        for (id, class) in self.classes.iter().enumerate() {
            writeln!(f, "  t{id} {} v{} ({})", class.name, class.version, class.qualified_name)?;
        }
        writeln!(f, "\n[KEYS]")?;
        for (i, key) in self.keys.iter().enumerate() {
            writeln!(f, "  k{} {key}", i + 1)?;
        }
        let r = &self.records;
        writeln!(f, "\n[RECORDS]")?;
        writeln!(
            f,
            "  values: {} structural, {} payload | pointers: {} ({} conditional, {} pruned) | nil: {} | end: {}",
            r.structural, r.payload, r.pointer, r.conditional_pointer, r.pruned, r.nil, r.end
        )?;
        writeln!(f, "  objects: {} | max depth: {}", self.objects, self.max_depth)
    }
}
