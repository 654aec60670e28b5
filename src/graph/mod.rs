//! Identity and lookup tables shared by the encode and decode engines.
//!
//! All maps here are created fresh per session and dropped when it ends.

/// Defines the `ClassDescriptor` and the class table.
pub mod classes;
/// Defines the `ObjId`, `KeyId` and `TypeId` newtypes.
pub mod id;
/// Defines identity tokens and the strong/weak `IdentityMap`.
pub mod identity;
/// Defines the bidirectional field-name table.
pub mod keys;

pub use classes::{ClassDescriptor, ClassInfo, ClassTable};
pub use id::{KeyId, ObjId, TypeId};
pub use identity::{Identity, IdentityMap, IdentitySource};
pub use keys::KeyTable;
