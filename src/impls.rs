//! `Encode` / `Decode` for standard library types.
//!
//! Scalars and strings are trivial payload values: integers are varints
//! (zigzag for signed types), floats are fixed-width little-endian, strings
//! are length-prefixed UTF-8. Collections and tuples are structural values
//! whose entries are positional. Maps alternate key and value entries.
//!
//! `Option`, `Box` and `RefCell` are transparent: they encode and decode as
//! their content. `Rc` and `Arc` carry reference identity, so two handles to
//! one allocation are written once and decode to one allocation.

use crate::codec::{Decode, DecodeBoxed, Encode, Representation, Unwrapped};
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{GraphcodeError, Result, format_error, internal_error};
use crate::graph::{ClassInfo, Identity, IdentitySource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;
use std::sync::Arc;

// --- Scalars ---

macro_rules! unsigned_codec {
    ($($t:ty),*) => {$(
        impl Encode for $t {
            fn encode(&self, encoder: &mut Encoder) -> Result<()> {
                encoder.payload()?.write_varint(*self as u64);
                Ok(())
            }

            fn representation(&self) -> Representation {
                Representation::Trivial
            }
        }

        impl Decode for $t {
            fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
                let raw = decoder.payload()?.read_varint_bits(<$t>::BITS)?;
                <$t>::try_from(raw).map_err(|_| {
                    format_error(format!("{raw} does not fit in {}", stringify!($t)))
                })
            }

            fn share(&self) -> Option<Self> {
                Some(*self)
            }
        }
    )*};
}

macro_rules! signed_codec {
    ($($t:ty),*) => {$(
        impl Encode for $t {
            fn encode(&self, encoder: &mut Encoder) -> Result<()> {
                encoder.payload()?.write_varint_signed(*self as i64);
                Ok(())
            }

            fn representation(&self) -> Representation {
                Representation::Trivial
            }
        }

        impl Decode for $t {
            fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
                let raw = decoder.payload()?.read_varint_signed()?;
                <$t>::try_from(raw).map_err(|_| {
                    format_error(format!("{raw} does not fit in {}", stringify!($t)))
                })
            }

            fn share(&self) -> Option<Self> {
                Some(*self)
            }
        }
    )*};
}

unsigned_codec!(u8, u16, u32, u64, usize);
signed_codec!(i8, i16, i32, i64, isize);

macro_rules! fixed_codec {
    ($($t:ty => $write:ident, $read:ident);* $(;)?) => {$(
        impl Encode for $t {
            fn encode(&self, encoder: &mut Encoder) -> Result<()> {
                encoder.payload()?.$write(*self);
                Ok(())
            }

            fn representation(&self) -> Representation {
                Representation::Trivial
            }
        }

        impl Decode for $t {
            fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
                decoder.payload()?.$read()
            }

            fn share(&self) -> Option<Self> {
                Some(*self)
            }
        }
    )*};
}

fixed_codec! {
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
    bool => write_bool, read_bool;
}

impl Encode for char {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        encoder.payload()?.write_varint(u64::from(u32::from(*self)));
        Ok(())
    }

    fn representation(&self) -> Representation {
        Representation::Trivial
    }
}

impl Decode for char {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let raw = decoder.payload()?.read_varint_u32()?;
        char::from_u32(raw).ok_or_else(|| format_error(format!("{raw:#x} is not a char")))
    }

    fn share(&self) -> Option<Self> {
        Some(*self)
    }
}

impl Encode for () {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        encoder.payload().map(drop)
    }

    fn representation(&self) -> Representation {
        Representation::Trivial
    }
}

impl Decode for () {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        decoder.payload().map(drop)
    }

    fn share(&self) -> Option<Self> {
        Some(())
    }
}

impl Encode for str {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        encoder.payload()?.write_str(self);
        Ok(())
    }

    fn representation(&self) -> Representation {
        Representation::Trivial
    }
}

impl Encode for String {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        self.as_str().encode(encoder)
    }

    fn representation(&self) -> Representation {
        Representation::Trivial
    }
}

impl Decode for String {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        Ok(decoder.payload()?.read_str()?.to_owned())
    }

    fn share(&self) -> Option<Self> {
        Some(self.clone())
    }
}

// --- Transparent wrappers ---

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        (**self).encode(encoder)
    }

    fn representation(&self) -> Representation {
        (**self).representation()
    }

    fn identity(&self, source: IdentitySource) -> Option<Identity> {
        (**self).identity(source)
    }

    fn class(&self) -> Option<ClassInfo> {
        (**self).class()
    }

    fn unwrap_optional(&self) -> Unwrapped<'_> {
        (**self).unwrap_optional()
    }

    fn type_name(&self) -> &'static str {
        (**self).type_name()
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        match self {
            Some(value) => value.encode(encoder),
            None => Ok(()),
        }
    }

    fn representation(&self) -> Representation {
        self.as_ref()
            .map_or(Representation::Structure, Encode::representation)
    }

    fn identity(&self, source: IdentitySource) -> Option<Identity> {
        self.as_ref()?.identity(source)
    }

    fn class(&self) -> Option<ClassInfo> {
        self.as_ref()?.class()
    }

    fn unwrap_optional(&self) -> Unwrapped<'_> {
        match self {
            Some(value) => Unwrapped::Inner(value),
            None => Unwrapped::Absent,
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    const TRANSPARENT: bool = true;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        decoder.decode_inner::<T>().map(Some)
    }

    fn decode_absent() -> Option<Self> {
        Some(None)
    }

    fn share(&self) -> Option<Self> {
        match self {
            Some(value) => value.share().map(Some),
            None => Some(None),
        }
    }

    fn class() -> Option<ClassInfo> {
        T::class()
    }
}

impl<T: Encode + ?Sized> Encode for Box<T> {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        (**self).encode(encoder)
    }

    fn representation(&self) -> Representation {
        (**self).representation()
    }

    fn identity(&self, source: IdentitySource) -> Option<Identity> {
        (**self).identity(source)
    }

    fn class(&self) -> Option<ClassInfo> {
        (**self).class()
    }

    fn unwrap_optional(&self) -> Unwrapped<'_> {
        (**self).unwrap_optional()
    }

    fn type_name(&self) -> &'static str {
        (**self).type_name()
    }
}

impl<T: Decode> Decode for Box<T> {
    const TRANSPARENT: bool = true;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        decoder.decode_inner::<T>().map(Box::new)
    }

    fn decode_absent() -> Option<Self> {
        T::decode_absent().map(Box::new)
    }

    fn share(&self) -> Option<Self> {
        (**self).share().map(Box::new)
    }

    fn class() -> Option<ClassInfo> {
        T::class()
    }
}

impl<T: Encode> Encode for RefCell<T> {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        self.try_borrow()
            .map_err(|_| internal_error("value is mutably borrowed during encode"))?
            .encode(encoder)
    }

    fn representation(&self) -> Representation {
        self.try_borrow()
            .map_or(Representation::Structure, |v| v.representation())
    }

    fn identity(&self, source: IdentitySource) -> Option<Identity> {
        self.try_borrow().ok()?.identity(source)
    }

    fn class(&self) -> Option<ClassInfo> {
        self.try_borrow().ok()?.class()
    }

    fn unwrap_optional(&self) -> Unwrapped<'_> {
        match self.try_borrow() {
            Ok(inner) => Unwrapped::Guarded(Ref::map(inner, |v| v as &dyn Encode)),
            Err(_) => Unwrapped::Locked,
        }
    }
}

impl<T: Decode> Decode for RefCell<T> {
    const TRANSPARENT: bool = true;

    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        decoder.decode_inner::<T>().map(RefCell::new)
    }

    fn decode_absent() -> Option<Self> {
        T::decode_absent().map(RefCell::new)
    }

    fn class() -> Option<ClassInfo> {
        T::class()
    }
}

// --- Shared handles ---

macro_rules! shared_codec {
    ($($ptr:ident),*) => {$(
        impl<T: Encode + ?Sized + 'static> Encode for $ptr<T> {
            fn encode(&self, encoder: &mut Encoder) -> Result<()> {
                (**self).encode(encoder)
            }

            fn representation(&self) -> Representation {
                // A shared scalar still needs a record that can carry an id.
                match (**self).representation() {
                    Representation::Trivial => Representation::Payload,
                    other => other,
                }
            }

            fn identity(&self, source: IdentitySource) -> Option<Identity> {
                match source {
                    IdentitySource::Reference => Some(Identity::reference($ptr::as_ptr(self))),
                    other => (**self).identity(other).map(Identity::held_by::<Self>),
                }
            }

            fn class(&self) -> Option<ClassInfo> {
                (**self).class()
            }
        }

        impl<T: DecodeBoxed + ?Sized> Decode for $ptr<T> {
            fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
                T::decode_boxed(decoder).map($ptr::from)
            }

            fn share(&self) -> Option<Self> {
                Some($ptr::clone(self))
            }

            fn class() -> Option<ClassInfo> {
                T::boxed_class()
            }
        }
    )*};
}

shared_codec!(Rc, Arc);

// --- Sequences ---

impl<T: Encode> Encode for [T] {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        self.iter().try_for_each(|item| encoder.encode_next(item))
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        self.as_slice().encode(encoder)
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let items: Vec<T> = Vec::decode(decoder)?;
        let found = items.len();
        items.try_into().map_err(|_| GraphcodeError::TypeMismatch {
            site: "array".to_owned(),
            expected: format!("{N} entries"),
            found: format!("{found} entries"),
        })
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        self.as_slice().encode(encoder)
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut items = Vec::with_capacity(decoder.remaining());
        while decoder.has_next() {
            items.push(decoder.decode_next()?);
        }
        Ok(items)
    }
}

impl<T: Encode> Encode for VecDeque<T> {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        self.iter().try_for_each(|item| encoder.encode_next(item))
    }
}

impl<T: Decode> Decode for VecDeque<T> {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        Vec::decode(decoder).map(VecDeque::from)
    }
}

impl<T: Encode, S> Encode for HashSet<T, S> {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        self.iter().try_for_each(|item| encoder.encode_next(item))
    }
}

impl<T, S> Decode for HashSet<T, S>
where
    T: Decode + Eq + Hash,
    S: BuildHasher + Default + 'static,
{
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut set = HashSet::with_capacity_and_hasher(decoder.remaining(), S::default());
        while decoder.has_next() {
            set.insert(decoder.decode_next()?);
        }
        Ok(set)
    }
}

impl<T: Encode> Encode for BTreeSet<T> {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        self.iter().try_for_each(|item| encoder.encode_next(item))
    }
}

impl<T: Decode + Ord> Decode for BTreeSet<T> {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut set = BTreeSet::new();
        while decoder.has_next() {
            set.insert(decoder.decode_next()?);
        }
        Ok(set)
    }
}

// --- Maps ---

impl<K: Encode, V: Encode, S> Encode for HashMap<K, V, S> {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        for (key, value) in self {
            encoder.encode_next(key)?;
            encoder.encode_next(value)?;
        }
        Ok(())
    }
}

impl<K, V, S> Decode for HashMap<K, V, S>
where
    K: Decode + Eq + Hash,
    V: Decode,
    S: BuildHasher + Default + 'static,
{
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut map = HashMap::with_capacity_and_hasher(decoder.remaining() / 2, S::default());
        while decoder.has_next() {
            let key = decoder.decode_next()?;
            map.insert(key, decoder.decode_next()?);
        }
        Ok(map)
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        for (key, value) in self {
            encoder.encode_next(key)?;
            encoder.encode_next(value)?;
        }
        Ok(())
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut map = BTreeMap::new();
        while decoder.has_next() {
            let key = decoder.decode_next()?;
            map.insert(key, decoder.decode_next()?);
        }
        Ok(map)
    }
}

// --- Tuples ---

macro_rules! tuple_codec {
    ($($name:ident),+) => {
        impl<$($name: Encode),+> Encode for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encode(&self, encoder: &mut Encoder) -> Result<()> {
                let ($($name,)+) = self;
                $(encoder.encode_next($name)?;)+
                Ok(())
            }
        }

        impl<$($name: Decode),+> Decode for ($($name,)+) {
            fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
                Ok(($(decoder.decode_next::<$name>()?,)+))
            }
        }
    };
}

tuple_codec!(A, B);
tuple_codec!(A, B, C);

// --- Fast-path newtypes ---

/// Raw bytes written as one payload record instead of one record per byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(pub Vec<u8>);

impl Encode for Blob {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        encoder.payload()?.write_raw(&self.0);
        Ok(())
    }

    fn representation(&self) -> Representation {
        Representation::Trivial
    }
}

impl Decode for Blob {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut payload = decoder.payload()?;
        let len = payload.remaining();
        Ok(Self(payload.read_exact(len)?.to_vec()))
    }

    fn share(&self) -> Option<Self> {
        Some(self.clone())
    }
}

/// Carries any `serde` type as a `bincode` payload.
///
/// ```rust
/// use graphcode::{Graphcode, Serde};
///
/// #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
/// struct Settings { volume: u8, name: String }
///
/// let bytes = Graphcode::encode(&Serde(Settings { volume: 3, name: "x".into() }))?;
/// let Serde(back): Serde<Settings> = Graphcode::decode(&bytes)?;
/// assert_eq!(back.volume, 3);
/// # Ok::<(), graphcode::GraphcodeError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Serde<T>(pub T);

impl<T: Serialize> Encode for Serde<T> {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(&self.0, bincode::config::standard())
            .map_err(|e| GraphcodeError::Serialization(e.to_string()))?;
        encoder.payload()?.write_raw(&bytes);
        Ok(())
    }

    fn representation(&self) -> Representation {
        Representation::Trivial
    }
}

impl<T: DeserializeOwned + 'static> Decode for Serde<T> {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let mut payload = decoder.payload()?;
        let len = payload.remaining();
        let bytes = payload.read_exact(len)?;
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(value, _)| Self(value))
            .map_err(|e| GraphcodeError::Serialization(e.to_string()))
    }
}
