use std::fmt;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw id read from the stream.
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw numeric value.
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// Returns the raw value as an index into a dense table.
            pub fn index(self) -> Option<usize> {
                usize::try_from(self.0).ok()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

define_id!(
    /// Identity of an encoded object. Pointers refer to values through it.
    ObjId,
    "#"
);

define_id!(
    /// Index of a field name in the key table. `0` is reserved for "unkeyed".
    KeyId,
    "k"
);

define_id!(
    /// Index of a class descriptor in the class table.
    TypeId,
    "t"
);
