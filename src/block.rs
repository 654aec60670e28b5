//! Wire record model.
//!
//! The body of a container is a flat sequence of [`FileBlock`] records. Each
//! record is one flag byte followed by exactly the fields the flags declare:
//!
//! ```text
//! [flags] [key id?] [type id?] [obj id?] [payload len + bytes?]
//! ```
//!
//! Ids are varints. Nesting has no length field: a `Value` without payload
//! opens a scope that the matching `End` closes, so readers track depth purely
//! from [`FileBlock::level`].

use crate::error::{Result, format_error};
use crate::graph::{KeyId, ObjId, TypeId};
use crate::io::{ByteReader, ByteWriter};

/// The bit-packed header byte of a record.
///
/// ```text
/// bit 0-1  category (0 End, 1 Nil, 2 Pointer, 3 Value)
/// bit 2    key id follows
/// bit 3    type id follows
/// bit 4    obj id follows
/// bit 5    payload follows
/// bit 6    conditional (Pointer only)
/// bit 7    reserved, must be zero
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFlags(u8);

impl BlockFlags {
    const CATEGORY_MASK: u8 = 0b0000_0011;
    const KEY: u8 = 0b0000_0100;
    const TYPE: u8 = 0b0000_1000;
    const OBJ: u8 = 0b0001_0000;
    const PAYLOAD: u8 = 0b0010_0000;
    const CONDITIONAL: u8 = 0b0100_0000;
    const RESERVED: u8 = 0b1000_0000;

    const END: u8 = 0;
    const NIL: u8 = 1;
    const POINTER: u8 = 2;
    const VALUE: u8 = 3;

    /// Wraps a raw byte without validation.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the raw byte.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    fn category(self) -> u8 {
        self.0 & Self::CATEGORY_MASK
    }

    fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// How a record moves the reader's nesting depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Opens a structural scope.
    Enter,
    /// Leaf record, depth unchanged.
    Same,
    /// Closes the innermost scope.
    Exit,
}

/// One record of the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileBlock {
    /// Closes the innermost structural value.
    End,
    /// An absent value.
    Nil {
        /// Field key, `None` when unkeyed.
        key: Option<KeyId>,
    },
    /// A back (or, when conditional, possibly forward) reference to an object.
    Pointer {
        /// Field key, `None` when unkeyed.
        key: Option<KeyId>,
        /// The referenced object.
        obj: ObjId,
        /// The target may never be materialized.
        conditional: bool,
    },
    /// A materialized value.
    Value {
        /// Field key, `None` when unkeyed.
        key: Option<KeyId>,
        /// Class table entry, present for tagged reference types.
        type_id: Option<TypeId>,
        /// Object id, present when the value has identity.
        obj: Option<ObjId>,
        /// Binary fast-path bytes. `None` opens a structural scope.
        payload: Option<Vec<u8>>,
    },
}

impl FileBlock {
    /// Nesting effect of this record.
    pub fn level(&self) -> Level {
        match self {
            Self::End => Level::Exit,
            Self::Value { payload: None, .. } => Level::Enter,
            Self::Nil { .. } | Self::Pointer { .. } | Self::Value { .. } => Level::Same,
        }
    }

    /// The field key, if any.
    pub fn key(&self) -> Option<KeyId> {
        match self {
            Self::End => None,
            Self::Nil { key } | Self::Pointer { key, .. } | Self::Value { key, .. } => *key,
        }
    }

    /// Short human-readable record kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::End => "end",
            Self::Nil { .. } => "nil",
            Self::Pointer { .. } => "pointer",
            Self::Value { payload: Some(_), .. } => "payload value",
            Self::Value { .. } => "structural value",
        }
    }

    /// Computes the flag byte for this record.
    pub fn flags(&self) -> BlockFlags {
        let key_bit = |key: &Option<KeyId>| if key.is_some() { BlockFlags::KEY } else { 0 };
        let byte = match self {
            Self::End => BlockFlags::END,
            Self::Nil { key } => BlockFlags::NIL | key_bit(key),
            Self::Pointer {
                key, conditional, ..
            } => {
                let mut b = BlockFlags::POINTER | key_bit(key) | BlockFlags::OBJ;
                if *conditional {
                    b |= BlockFlags::CONDITIONAL;
                }
                b
            }
            Self::Value {
                key,
                type_id,
                obj,
                payload,
            } => {
                let mut b = BlockFlags::VALUE | key_bit(key);
                if type_id.is_some() {
                    b |= BlockFlags::TYPE;
                }
                if obj.is_some() {
                    b |= BlockFlags::OBJ;
                }
                if payload.is_some() {
                    b |= BlockFlags::PAYLOAD;
                }
                b
            }
        };
        BlockFlags(byte)
    }

    /// Serializes the record.
    pub fn write(&self, out: &mut ByteWriter) {
        out.write_u8(self.flags().as_u8());
        match self {
            Self::End => {}
            Self::Nil { key } => write_key(out, *key),
            Self::Pointer { key, obj, .. } => {
                write_key(out, *key);
                out.write_varint(obj.as_u64());
            }
            Self::Value {
                key,
                type_id,
                obj,
                payload,
            } => {
                write_key(out, *key);
                if let Some(t) = type_id {
                    out.write_varint(t.as_u64());
                }
                if let Some(o) = obj {
                    out.write_varint(o.as_u64());
                }
                if let Some(p) = payload {
                    out.write_blob(p);
                }
            }
        }
    }

    /// Parses one record, rejecting flag combinations no writer produces.
    pub fn read(input: &mut ByteReader<'_>) -> Result<Self> {
        let at = input.position();
        let flags = BlockFlags(input.read_u8()?);
        let bad = || {
            format_error(format!(
                "invalid record flags {:#010b} at offset {at}",
                flags.as_u8()
            ))
        };
        if flags.has(BlockFlags::RESERVED) {
            return Err(bad());
        }
        match flags.category() {
            BlockFlags::END => {
                if flags.as_u8() != BlockFlags::END {
                    return Err(bad());
                }
                Ok(Self::End)
            }
            BlockFlags::NIL => {
                if flags.as_u8() & !(BlockFlags::CATEGORY_MASK | BlockFlags::KEY) != 0 {
                    return Err(bad());
                }
                Ok(Self::Nil {
                    key: read_key(input, flags)?,
                })
            }
            BlockFlags::POINTER => {
                if !flags.has(BlockFlags::OBJ)
                    || flags.has(BlockFlags::TYPE)
                    || flags.has(BlockFlags::PAYLOAD)
                {
                    return Err(bad());
                }
                let key = read_key(input, flags)?;
                let obj = ObjId::new(input.read_varint()?);
                Ok(Self::Pointer {
                    key,
                    obj,
                    conditional: flags.has(BlockFlags::CONDITIONAL),
                })
            }
            _ => {
                if flags.has(BlockFlags::CONDITIONAL) {
                    return Err(bad());
                }
                let key = read_key(input, flags)?;
                let type_id = if flags.has(BlockFlags::TYPE) {
                    Some(TypeId::new(input.read_varint()?))
                } else {
                    None
                };
                let obj = if flags.has(BlockFlags::OBJ) {
                    Some(ObjId::new(input.read_varint()?))
                } else {
                    None
                };
                let payload = if flags.has(BlockFlags::PAYLOAD) {
                    Some(input.read_blob()?.to_vec())
                } else {
                    None
                };
                Ok(Self::Value {
                    key,
                    type_id,
                    obj,
                    payload,
                })
            }
        }
    }
}

fn write_key(out: &mut ByteWriter, key: Option<KeyId>) {
    if let Some(k) = key {
        out.write_varint(k.as_u64());
    }
}

fn read_key(input: &mut ByteReader<'_>, flags: BlockFlags) -> Result<Option<KeyId>> {
    if !flags.has(BlockFlags::KEY) {
        return Ok(None);
    }
    // Key id 0 is the explicit spelling of "unkeyed".
    let raw = input.read_varint()?;
    Ok((raw != 0).then(|| KeyId::new(raw)))
}
