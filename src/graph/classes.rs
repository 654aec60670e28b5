use super::id::TypeId;
use crate::error::{Result, format_error};
use crate::io::{ByteReader, ByteWriter};
use serde::Serialize;
use std::collections::HashMap;

/// Static description of a class, produced by the encoder side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassInfo {
    /// Registered, stable name stored verbatim in the class table.
    pub name: &'static str,
    /// Declared layout version.
    pub version: u32,
    /// Rust type name, informational only.
    pub qualified_name: &'static str,
}

impl ClassInfo {
    /// Describes `T` through its [`Class`](crate::Class) implementation.
    pub fn of<T: crate::Class + ?Sized>() -> Self {
        Self {
            name: T::NAME,
            version: T::VERSION,
            qualified_name: std::any::type_name::<T>(),
        }
    }
}

/// One entry of the class table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassDescriptor {
    /// Rust type name at encode time. Informational only.
    pub qualified_name: String,
    /// Registered name used for resolution.
    pub name: String,
    /// Declared layout version at encode time.
    pub version: u32,
}

impl From<ClassInfo> for ClassDescriptor {
    fn from(info: ClassInfo) -> Self {
        Self {
            qualified_name: info.qualified_name.to_owned(),
            name: info.name.to_owned(),
            version: info.version,
        }
    }
}

/// `TypeId -> ClassDescriptor` table.
///
/// During encoding each concrete type gets its id the first time one of its
/// instances is written; during decoding the table is rebuilt from the class
/// section.
#[derive(Debug, Clone, Default)]
pub struct ClassTable {
    classes: Vec<ClassDescriptor>,
    by_type: HashMap<&'static str, TypeId>,
}

impl ClassTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the type id for `info`, registering its descriptor on first use.
    pub fn type_id(&mut self, info: ClassInfo) -> TypeId {
        if let Some(id) = self.by_type.get(info.qualified_name) {
            return *id;
        }
        let id = TypeId::new(self.classes.len() as u64);
        self.classes.push(info.into());
        self.by_type.insert(info.qualified_name, id);
        id
    }

    /// Looks up a descriptor.
    pub fn get(&self, id: TypeId) -> Option<&ClassDescriptor> {
        self.classes.get(id.index()?)
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if no class was recorded.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// All descriptors in type id order.
    pub fn descriptors(&self) -> &[ClassDescriptor] {
        &self.classes
    }

    /// Serializes the class section.
    pub fn write(&self, out: &mut ByteWriter) {
        out.write_varint(self.classes.len() as u64);
        for class in &self.classes {
            out.write_str(&class.name);
            out.write_str(&class.qualified_name);
            out.write_varint(u64::from(class.version));
        }
    }

    /// Parses a class section.
    pub fn read(input: &mut ByteReader<'_>) -> Result<Self> {
        let count = input.read_len()?;
        let mut classes = Vec::with_capacity(count);
        for _ in 0..count {
            let name = input.read_str()?;
            if name.is_empty() {
                return Err(format_error("empty class name in class table"));
            }
            classes.push(ClassDescriptor {
                name: name.to_owned(),
                qualified_name: input.read_str()?.to_owned(),
                version: input.read_varint_u32()?,
            });
        }
        Ok(Self {
            classes,
            by_type: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINT: ClassInfo = ClassInfo {
        name: "geo.Point",
        version: 2,
        qualified_name: "app::geo::Point",
    };
    const LINE: ClassInfo = ClassInfo {
        name: "geo.Line",
        version: 0,
        qualified_name: "app::geo::Line",
    };

    #[test]
    fn one_type_id_per_class() {
        let mut table = ClassTable::new();
        let p = table.type_id(POINT);
        let l = table.type_id(LINE);
        assert_eq!(table.type_id(POINT), p);
        assert_ne!(p, l);
        assert_eq!(table.get(p).map(|c| c.version), Some(2));
    }

    #[test]
    fn section_round_trip() {
        let mut table = ClassTable::new();
        table.type_id(POINT);
        table.type_id(LINE);
        let mut w = ByteWriter::new();
        table.write(&mut w);
        let back = ClassTable::read(&mut ByteReader::new(w.as_slice())).unwrap();
        assert_eq!(back.descriptors(), table.descriptors());
    }
}
