//! The `Encode` / `Decode` traits that value types implement.
//!
//! The engine drives the walk; a type only describes itself:
//!
//! - **Trivial** types write a flat payload through [`Encoder::payload`] and
//!   have no identity. Numbers and strings are trivial.
//! - **Payload** types write a flat payload but may carry identity or a class
//!   tag (an `Rc<u64>` is one).
//! - **Structure** types write their fields through the keyed
//!   ([`Encoder::encode_key`]) or positional ([`Encoder::encode_next`]) calls,
//!   and read them back with the matching [`Decoder`] calls.
//!
//! Field order does not matter for keyed fields. Positional fields are read in
//! the order they were written.

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::Result;
use crate::graph::{ClassInfo, Identity, IdentitySource};
use std::cell::Ref;

/// How a value is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// Flat payload, no identity, no class tag.
    Trivial,
    /// Flat payload that may carry identity and a class tag.
    Payload,
    /// Field-by-field encoding inside a scope closed by `End`.
    Structure,
}

/// Result of peeling one layer of optionality off a value.
pub enum Unwrapped<'a> {
    /// The value itself is the thing to encode.
    Present,
    /// Nothing to encode; the engine writes `Nil`.
    Absent,
    /// Encode this inner value instead.
    Inner(&'a dyn Encode),
    /// Encode the inner value behind a live `RefCell` borrow.
    Guarded(Ref<'a, dyn Encode>),
    /// The inner value is mutably borrowed elsewhere.
    Locked,
}

/// A value that can be written into a Graphcode stream.
///
/// Only [`encode`](Encode::encode) is required. The other methods describe the
/// value to the engine and default to "structural, no identity, no class".
pub trait Encode {
    /// Writes the value.
    ///
    /// Trivial and payload types write bytes through [`Encoder::payload`];
    /// structural types write fields through the `encode_key*` / `encode_next*`
    /// calls.
    fn encode(&self, encoder: &mut Encoder) -> Result<()>;

    /// Wire layout of this value.
    fn representation(&self) -> Representation {
        Representation::Structure
    }

    /// Identity token from `source`, if the value has one.
    ///
    /// Values with equal tokens are written once and referenced afterwards.
    fn identity(&self, source: IdentitySource) -> Option<Identity> {
        let _ = source;
        None
    }

    /// Class tag for polymorphic decode and versioning.
    fn class(&self) -> Option<ClassInfo> {
        None
    }

    /// Peels optional wrappers. Only `Option`-like types override this.
    fn unwrap_optional(&self) -> Unwrapped<'_> {
        Unwrapped::Present
    }

    /// Rust type name used in error messages.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A value that can be rebuilt from a Graphcode stream.
pub trait Decode: Sized + 'static {
    /// Reads the value the decoder is positioned on.
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self>;

    /// Value to use when the stream holds `Nil`, a pruned conditional pointer,
    /// or no entry at all. `None` makes absence an error.
    fn decode_absent() -> Option<Self> {
        None
    }

    /// Produces another handle to the same value so later pointers can resolve
    /// to it. Shared handles (`Rc`, `Arc`) return a clone of the handle; types
    /// that never carry identity keep the default.
    fn share(&self) -> Option<Self> {
        None
    }

    /// Class tag expected by this type, used to check the encoded class name
    /// and to pick the layout version when the stream carries no tag.
    fn class() -> Option<ClassInfo> {
        None
    }

    /// Wrapper types that decode from the same record as their content
    /// (`Option`, `Box`, `RefCell`) set this and call
    /// [`Decoder::decode_inner`].
    #[doc(hidden)]
    const TRANSPARENT: bool = false;
}

/// A type that carries a stable class name and layout version.
///
/// The name is stored verbatim in the class table and must not change between
/// program builds; use [`TypeRegistry::replace`](crate::TypeRegistry::replace)
/// when it does.
pub trait Class {
    /// Registered name.
    const NAME: &'static str;
    /// Layout version, bumped whenever the encoded fields change.
    const VERSION: u32 = 0;
}

/// Content of a shared handle (`Rc<T>`, `Arc<T>`), which may be unsized.
///
/// Every [`Decode`] type implements it. Trait objects get an implementation
/// from [`polymorphic!`](crate::polymorphic), which builds them through the
/// registry.
pub trait DecodeBoxed: 'static {
    /// Reads the value the decoder is positioned on into a box.
    fn decode_boxed(decoder: &mut Decoder<'_>) -> Result<Box<Self>>;

    /// Expected class tag, see [`Decode::class`].
    fn boxed_class() -> Option<ClassInfo> {
        None
    }
}

impl<T: Decode> DecodeBoxed for T {
    fn decode_boxed(decoder: &mut Decoder<'_>) -> Result<Box<Self>> {
        T::decode(decoder).map(Box::new)
    }

    fn boxed_class() -> Option<ClassInfo> {
        <T as Decode>::class()
    }
}
