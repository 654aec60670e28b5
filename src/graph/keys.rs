use super::id::KeyId;
use crate::error::{Result, format_error};
use crate::io::{ByteReader, ByteWriter};
use std::collections::HashMap;

/// Bidirectional `String <-> KeyId` table.
///
/// The encoder interns field names in first-use order; the decoder rebuilds the
/// same table from the trailing key section. Ids start at 1 because 0 spells
/// "unkeyed" on the wire.
#[derive(Debug, Clone, Default)]
pub struct KeyTable {
    names: Vec<String>,
    ids: HashMap<String, KeyId>,
}

impl KeyTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `name`, assigning the next one on first use.
    pub fn intern(&mut self, name: &str) -> KeyId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = KeyId::new(self.names.len() as u64 + 1);
        self.names.push(name.to_owned());
        self.ids.insert(name.to_owned(), id);
        id
    }

    /// Looks up the id of `name`.
    pub fn id(&self, name: &str) -> Option<KeyId> {
        self.ids.get(name).copied()
    }

    /// Looks up the name of `id`.
    pub fn name(&self, id: KeyId) -> Option<&str> {
        let index = id.index()?.checked_sub(1)?;
        self.names.get(index).map(String::as_str)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no key was interned.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterates `(id, name)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (KeyId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (KeyId::new(i as u64 + 1), n.as_str()))
    }

    /// Serializes the key section: a count followed by the names in id order.
    pub fn write(&self, out: &mut ByteWriter) {
        out.write_varint(self.names.len() as u64);
        for name in &self.names {
            out.write_str(name);
        }
    }

    /// Parses a key section.
    pub fn read(input: &mut ByteReader<'_>) -> Result<Self> {
        let count = input.read_len()?;
        let mut table = Self::new();
        for _ in 0..count {
            let name = input.read_str()?;
            if table.ids.contains_key(name) {
                return Err(format_error(format!("key `{name}` listed twice in key table")));
            }
            table.intern(name);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_first_use_ordered() {
        let mut keys = KeyTable::new();
        let name = keys.intern("name");
        let age = keys.intern("age");
        assert_eq!(keys.intern("name"), name);
        assert_eq!((name.as_u64(), age.as_u64()), (1, 2));
        assert_eq!(keys.name(age), Some("age"));
        assert_eq!(keys.name(KeyId::new(0)), None);
        assert_eq!(keys.name(KeyId::new(3)), None);
    }

    #[test]
    fn section_round_trip() {
        let mut keys = KeyTable::new();
        for k in ["x", "y", "children"] {
            keys.intern(k);
        }
        let mut w = ByteWriter::new();
        keys.write(&mut w);
        let back = KeyTable::read(&mut ByteReader::new(w.as_slice())).unwrap();
        assert_eq!(back.iter().collect::<Vec<_>>(), keys.iter().collect::<Vec<_>>());
        assert_eq!(back.id("children"), keys.id("children"));
    }

    #[test]
    fn duplicate_names_in_section_are_rejected() {
        let mut w = ByteWriter::new();
        w.write_varint(2);
        w.write_str("a");
        w.write_str("a");
        assert!(KeyTable::read(&mut ByteReader::new(w.as_slice())).is_err());
    }
}
