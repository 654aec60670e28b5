//! # Graphcode
//!
//! A binary serializer for object graphs: values that share sub-objects, point
//! back at their parents, or form cycles. Shared values are written once and
//! decode to one allocation; cycles are rebuilt through deferred binding.
//!
//! ## Overview
//!
//! Most binary serializers treat data as a tree. Graphcode tracks identity
//! while encoding: the first time a value with identity is met it is written
//! in full and given an object id; every later occurrence becomes a pointer to
//! that id. The decoder reverses this, handing out another handle (`Rc::clone`)
//! for each pointer.
//!
//! ### Key Features
//!
//! *   **Reference identity:** `Rc`/`Arc` handles to one allocation stay shared
//!     after a round trip. Types can also declare an identity key or use
//!     hash-equality identity.
//! *   **Cycle-safe decode:** back references are bound through
//!     [`Decoder::decode_deferred`] once both ends are built.
//! *   **Conditional references:** a weak-style reference to a value that is
//!     only written if something else writes it strongly.
//! *   **Schema evolution:** keyed fields, per-class layout versions, and a
//!     [`TypeRegistry`] that maps old class names to new ones.
//! *   **Polymorphism:** trait objects decode through constructors registered
//!     by class name.
//!
//! ## File Format
//!
//! ```text
//! [FileHeader] [SectionMap] [Body] [Class Table] [Key Table]
//! ```
//!
//! The body is a flat stream of records (see [`block`]); structural values
//! open a scope closed by an `End` record. Field names and class names are
//! interned into the trailing tables and referenced by small integer ids.
//!
//! ## Usage
//!
//! ```rust
//! use graphcode::{Decode, Encode, Graphcode};
//! use std::rc::Rc;
//!
//! #[derive(Encode, Decode, Debug, PartialEq)]
//! struct Team {
//!     lead: Rc<String>,
//!     members: Vec<Rc<String>>,
//! }
//!
//! let ada = Rc::new("Ada".to_owned());
//! let team = Team { lead: ada.clone(), members: vec![ada, Rc::new("Bob".into())] };
//!
//! let bytes = Graphcode::encode(&team)?;
//! let back: Team = Graphcode::decode(&bytes)?;
//! assert!(Rc::ptr_eq(&back.lead, &back.members[0]));
//! # Ok::<(), graphcode::GraphcodeError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** the only `unsafe` block memory-maps files in
//!   [`GraphcodeReader::open`].
//! * **No Panics:** no `unwrap()` or `panic!()` calls in the library (enforced
//!   by clippy lints).
//! * **Comprehensive Errors:** all failures correspond to a [`GraphcodeError`].

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// Lets the derive output name `::graphcode` from inside this crate too.
extern crate self as graphcode;

// --- PUBLIC API MODULES ---
pub mod api;
pub mod codec;
pub mod compression;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod format;
pub mod inspector;
pub mod options;
pub mod reader;
pub mod registry;

// --- INTERNAL IMPLEMENTATION MODULES (Hidden from Docs) ---
#[doc(hidden)]
pub mod block;
#[doc(hidden)]
pub mod graph;
#[doc(hidden)]
pub mod io;

// Private modules
mod impls;
mod writer;

// --- RE-EXPORTS ---

#[cfg(feature = "lz4_flex")]
pub use compression::Lz4Compressor;
pub use compression::{Compressor, NoCompression};

pub use api::Graphcode;
pub use codec::{Class, Decode, DecodeBoxed, Encode, Representation, Unwrapped};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{GraphcodeError, Result};
pub use graph::{ClassInfo, Identity, IdentitySource};
pub use impls::{Blob, Serde};
pub use inspector::{ContainerReport, GraphcodeInspector};
pub use options::{DEFAULT_MAX_DEPTH, GraphcodeOptions, IdentityPolicy, UserVersionCheck};
pub use reader::GraphcodeReader;
pub use registry::TypeRegistry;

// Derive macros share their names with the traits, like serde's.
pub use graphcode_derive::{Decode, Encode};
