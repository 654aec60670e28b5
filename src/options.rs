//! Session configuration.
//!
//! [`GraphcodeOptions`] is a small by-value builder. Every entry point on
//! [`Graphcode`](crate::Graphcode) uses [`GraphcodeOptions::default`]; use
//! [`Graphcode::builder`](crate::Graphcode::builder) to change anything.
//!
//! ```rust
//! use graphcode::{Graphcode, IdentityPolicy};
//!
//! let bytes = Graphcode::builder()
//!     .user_version(3)
//!     .identity_policy(IdentityPolicy::ReferenceOnly)
//!     .encode(&vec![1u32, 2, 3])?;
//! let back: Vec<u32> = Graphcode::decode(&bytes)?;
//! assert_eq!(back, [1, 2, 3]);
//! # Ok::<(), graphcode::GraphcodeError>(())
//! ```

use crate::codec::{Decode, Encode};
use crate::error::{GraphcodeError, Result};
use crate::graph::IdentitySource;
use crate::reader::GraphcodeReader;
use crate::registry;
use crate::writer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::Path;

/// Order in which the encoder asks values for identity tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdentityPolicy {
    /// Content equality wins over declared ids and references.
    HashableFirst,
    /// Declared ids, then references, then content equality.
    #[default]
    HashableLast,
    /// Only shared allocations (`Rc`, `Arc`) are deduplicated.
    ReferenceOnly,
}

impl IdentityPolicy {
    /// Sources to consult, in order.
    pub fn sources(self) -> &'static [IdentitySource] {
        match self {
            Self::HashableFirst => &[
                IdentitySource::Hashable,
                IdentitySource::Declared,
                IdentitySource::Reference,
            ],
            Self::HashableLast => &[
                IdentitySource::Declared,
                IdentitySource::Reference,
                IdentitySource::Hashable,
            ],
            Self::ReferenceOnly => &[IdentitySource::Reference],
        }
    }
}

/// Accepted range for the user version stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UserVersionCheck {
    /// Any version is accepted.
    #[default]
    Any,
    /// Only this exact version.
    Exact(u32),
    /// This version or any older one.
    AtMost(u32),
}

impl UserVersionCheck {
    /// Validates the version found in a header.
    pub fn check(self, found: u32) -> Result<()> {
        let accepted = match self {
            Self::Any => true,
            Self::Exact(v) => found == v,
            Self::AtMost(v) => found <= v,
        };
        if accepted {
            Ok(())
        } else {
            Err(GraphcodeError::UserVersion {
                found,
                check: format!("{self:?}"),
            })
        }
    }
}

/// Default for [`GraphcodeOptions::max_depth`].
///
/// Encoding and decoding recurse once per nesting level, and so does building
/// a forward-referenced object out of order. The default keeps both within the
/// 2 MiB stack of a spawned thread in an unoptimized build.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Encode/decode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphcodeOptions {
    /// Version written into the header.
    pub user_version: u32,
    /// Check applied to the header version on decode.
    pub user_version_check: UserVersionCheck,
    /// Deduplicate values with identity and allow conditional references.
    pub track_identity: bool,
    /// Write class tags for values that have a class.
    pub type_tags: bool,
    /// Identity source order.
    pub identity_policy: IdentityPolicy,
    /// Turn degraded conditional encodes into errors.
    pub strict: bool,
    /// LZ4-compress the body (feature `lz4_flex`).
    pub compression: bool,
    /// Maximum structural nesting, counting objects built out of order
    /// while resolving forward pointers.
    pub max_depth: usize,
}

impl Default for GraphcodeOptions {
    fn default() -> Self {
        Self {
            user_version: 0,
            user_version_check: UserVersionCheck::Any,
            track_identity: true,
            type_tags: true,
            identity_policy: IdentityPolicy::HashableLast,
            strict: false,
            compression: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl GraphcodeOptions {
    /// Sets the user version written into the header.
    pub fn user_version(mut self, version: u32) -> Self {
        self.user_version = version;
        self
    }

    /// Sets the check applied to the header's user version on decode.
    pub fn user_version_check(mut self, check: UserVersionCheck) -> Self {
        self.user_version_check = check;
        self
    }

    /// Enables or disables identity tracking.
    ///
    /// With tracking off every occurrence of a shared value is written in
    /// full and conditional references encode unconditionally.
    pub fn track_identity(mut self, enable: bool) -> Self {
        self.track_identity = enable;
        self
    }

    /// Enables or disables class tags.
    pub fn type_tags(mut self, enable: bool) -> Self {
        self.type_tags = enable;
        self
    }

    /// Sets the identity source order.
    pub fn identity_policy(mut self, policy: IdentityPolicy) -> Self {
        self.identity_policy = policy;
        self
    }

    /// Enables strict mode.
    pub fn strict(mut self, enable: bool) -> Self {
        self.strict = enable;
        self
    }

    /// Enables or disables LZ4 body compression.
    ///
    /// Encoding fails if the `lz4_flex` feature is not compiled in.
    pub fn compression(mut self, enable: bool) -> Self {
        self.compression = enable;
        self
    }

    /// Sets the nesting limit.
    ///
    /// Raising it past [`DEFAULT_MAX_DEPTH`] may need a larger thread stack.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Encodes `value` into an in-memory container.
    pub fn encode<T: Encode + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let mut sink = Cursor::new(Vec::new());
        writer::write_container(&mut sink, value, self)?;
        Ok(sink.into_inner())
    }

    /// Encodes `value` into any seekable sink, starting at its current position.
    ///
    /// Returns the number of bytes written.
    pub fn write<T: Encode + ?Sized, W: Write + Seek>(&self, sink: &mut W, value: &T) -> Result<u64> {
        writer::write_container(sink, value, self)
    }

    /// Encodes `value` into a file, replacing it if it exists.
    pub fn save<T: Encode + ?Sized, P: AsRef<Path>>(&self, path: P, value: &T) -> Result<()> {
        let mut sink = BufWriter::new(File::create(path)?);
        writer::write_container(&mut sink, value, self)?;
        sink.flush()?;
        Ok(())
    }

    /// Decodes a container held in memory, using the global type registry.
    pub fn decode<T: Decode>(&self, bytes: &[u8]) -> Result<T> {
        let reader = GraphcodeReader::from_bytes(bytes)?;
        let registry = registry::read_global()?;
        reader.decode_with(&registry, self)
    }

    /// Decodes a container with an explicit registry.
    pub fn decode_with<T: Decode>(&self, bytes: &[u8], registry: &registry::TypeRegistry) -> Result<T> {
        GraphcodeReader::from_bytes(bytes)?.decode_with(registry, self)
    }

    /// Memory-maps and decodes a container file.
    pub fn load<T: Decode, P: AsRef<Path>>(&self, path: P) -> Result<T> {
        let reader = GraphcodeReader::open(path)?;
        let registry = registry::read_global()?;
        reader.decode_with(&registry, self)
    }
}
