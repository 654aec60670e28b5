//! Centralized error handling for Graphcode.
//!
//! Every failure surfaced by [`Graphcode`](crate::Graphcode) is a
//! [`GraphcodeError`]. The library never panics on malformed input and never
//! returns a partial result: an encode or decode session either completes or
//! fails with the first error it meets.
//!
//! ## Error Categories
//!
//! - **Format Errors**: the byte stream does not follow the container or record
//!   layout (bad magic, truncated varint, unknown flag combination, a section
//!   pointing outside the buffer, unbalanced scopes).
//! - **Encode Errors**: the value graph handed to the encoder is inconsistent
//!   (duplicate field key in one scope, conditional reference to a value that
//!   has no identity).
//! - **Decode Errors**: the decoded graph is inconsistent (pointer to an id
//!   that was never defined, a deferred reference that never resolved, a type
//!   id missing from the class table, a cyclic reference requested through
//!   immediate decode).
//! - **Type-Resolution Errors**: an encoded class name cannot be resolved
//!   through the registry or the rename table.
//!
//! ## Usage
//!
//! ```rust
//! use graphcode::{Graphcode, GraphcodeError};
//!
//! match Graphcode::decode::<u32>(b"nope") {
//!     Ok(_) => unreachable!(),
//!     Err(GraphcodeError::Format(msg)) => eprintln!("not a graphcode buffer: {msg}"),
//!     Err(e) => eprintln!("other error: {e}"),
//! }
//! ```

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// A specialized `Result` type for Graphcode operations.
pub type Result<T> = std::result::Result<T, GraphcodeError>;

/// The master error enum covering all failure domains in Graphcode.
///
/// The type is `Clone` so errors captured in one place (for example inside a
/// deferred decode callback) can be reported later. I/O errors are wrapped in
/// an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum GraphcodeError {
    /// Low-level I/O failure while reading or writing a container file.
    #[error("I/O Error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The byte stream is not a valid Graphcode container.
    ///
    /// ## Common Causes
    ///
    /// - Wrong magic bytes or unsupported format version
    /// - Truncated buffer or truncated varint
    /// - A record flag byte with an impossible combination of bits
    /// - A section range outside the buffer
    /// - A structural scope that is never closed, or closed twice
    #[error("Format Error: {0}")]
    Format(String),

    /// Two fields of the same value were encoded with the same key.
    #[error("duplicate key `{key}` in one value scope")]
    DuplicateKey {
        /// The offending key.
        key: String,
    },

    /// A conditional reference was requested for a value that has no identity.
    #[error("conditional encoding of `{type_name}` requires an identity")]
    ConditionalWithoutIdentity {
        /// Rust type name of the value.
        type_name: &'static str,
    },

    /// A conditional reference was requested for a trivial (payload-only) value
    /// while strict mode is enabled.
    #[error("conditional encoding of trivial value `{type_name}`")]
    ConditionalTrivial {
        /// Rust type name of the value.
        type_name: &'static str,
    },

    /// The value graph nests deeper than the configured limit.
    #[error("nesting depth exceeded limit of {limit}")]
    DepthLimit {
        /// Configured maximum depth.
        limit: usize,
    },

    /// A deferred reference was still unresolved when the decode finished.
    #[error("dangling reference to object #{obj_id}")]
    DanglingReference {
        /// The object id that never completed.
        obj_id: u64,
    },

    /// A pointer record refers to an object id that no value record defines.
    #[error("pointer to undefined object #{obj_id} at record {position}")]
    UndefinedObject {
        /// The referenced id.
        obj_id: u64,
        /// Index of the pointer record in the body.
        position: usize,
    },

    /// A value record carries a type id that is absent from the class table.
    #[error("type id {type_id} at record {position} is not in the class table")]
    UndefinedType {
        /// The referenced type id.
        type_id: u64,
        /// Index of the value record in the body.
        position: usize,
    },

    /// Immediate decode reached an object whose construction is still running.
    ///
    /// Cycles must be broken with [`Decoder::decode_deferred`](crate::Decoder::decode_deferred).
    #[error("cyclic reference to object #{obj_id} requires deferred decode")]
    CyclicReference {
        /// The object id under construction.
        obj_id: u64,
    },

    /// A non-optional value was requested but the stream holds nothing there.
    #[error("missing value for {site}")]
    MissingValue {
        /// Key or position description.
        site: String,
    },

    /// The record found in the stream does not match the requested Rust type.
    #[error("type mismatch at {site}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Key or position description.
        site: String,
        /// What the caller asked for.
        expected: String,
        /// What the stream contains.
        found: String,
    },

    /// The encoded class name is neither registered nor reachable through the
    /// rename table.
    #[error("unknown type `{name}`")]
    UnknownType {
        /// The encoded (or renamed) class name.
        name: String,
    },

    /// The resolved class cannot produce the requested target type.
    #[error("type `{name}` cannot be constructed as `{target}`")]
    NotConstructible {
        /// The resolved class name.
        name: String,
        /// Rust type name of the requested target.
        target: &'static str,
    },

    /// The container was written with a user version the caller rejects.
    #[error("user version {found} rejected by check {check}")]
    UserVersion {
        /// The version stored in the header.
        found: u32,
        /// Description of the check that failed.
        check: String,
    },

    /// Serde/bincode failure inside a [`Serde`](crate::Serde) payload.
    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// Compression or decompression of the body failed.
    #[error("Compression Error: {0}")]
    Compression(String),

    /// Misuse of the encoder/decoder API or a poisoned lock.
    #[error("Internal Logic Error: {0}")]
    Internal(String),
}

impl From<io::Error> for GraphcodeError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl GraphcodeError {
    /// Returns true for errors caused by malformed bytes rather than by the
    /// value graph or the type registry.
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}

#[cold]
pub(crate) fn format_error(msg: impl Into<String>) -> GraphcodeError {
    GraphcodeError::Format(msg.into())
}

#[cold]
pub(crate) fn internal_error(msg: impl Into<String>) -> GraphcodeError {
    GraphcodeError::Internal(msg.into())
}
