//! The decode engine.
//!
//! Decoding runs in two phases.
//!
//! **Parse.** The whole body is read into a flat record list. Scopes are
//! matched, every key and type id is checked against the tables, every object
//! definition is indexed by its `ObjId`, and every unconditional pointer is
//! checked to have a definition somewhere in the body. Malformed input fails
//! here, before any user code runs.
//!
//! **Construct.** Values are built depth-first on demand, mirroring the
//! encoder's recursion. Each `ObjId` owns a slot that is empty, in progress, or
//! complete. A pointer to a complete object yields another handle to it
//! ([`Decode::share`]); a pointer to an object that has not been started
//! builds it right away, out of stream order; a pointer to an object still in
//! progress is a cycle, which immediate decode refuses with
//! [`GraphcodeError::CyclicReference`].
//!
//! Cycles are broken with [`Decoder::decode_deferred`]: the caller hands over a
//! setter, and the engine calls it with the owner and the target once both are
//! complete.

use crate::block::{FileBlock, Level};
use crate::codec::Decode;
use crate::error::{GraphcodeError, Result, format_error, internal_error};
use crate::graph::{ClassTable, KeyId, KeyTable, ObjId, TypeId};
use crate::io::ByteReader;
use crate::registry::TypeRegistry;
use std::any::{Any, type_name};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

#[derive(Debug)]
pub(crate) struct Record {
    pub block: FileBlock,
    /// Index of the matching `End` for scopes, the record's own index otherwise.
    pub end: usize,
}

/// The body parsed into records, with scopes matched and ids validated.
#[derive(Debug)]
pub(crate) struct RecordTree {
    pub records: Vec<Record>,
    pub definitions: HashMap<ObjId, usize>,
    pub max_nesting: usize,
}

impl RecordTree {
    pub(crate) fn parse(
        body: &[u8],
        classes: &ClassTable,
        keys: &KeyTable,
        max_depth: usize,
    ) -> Result<Self> {
        let mut input = ByteReader::new(body);
        let mut records: Vec<Record> = Vec::new();
        let mut definitions = HashMap::new();
        let mut open: Vec<usize> = Vec::new();
        let mut scope_keys: Vec<HashSet<KeyId>> = Vec::new();
        let mut max_nesting = 0;

        while !input.is_empty() {
            let index = records.len();
            if index > 0 && open.is_empty() {
                return Err(format_error(format!(
                    "trailing records after the root value at record {index}"
                )));
            }
            let block = FileBlock::read(&mut input)?;
            trace!(record = index, kind = block.kind(), "parse");

            if let Some(key) = block.key() {
                if keys.name(key).is_none() {
                    return Err(format_error(format!(
                        "key id {key} at record {index} is not in the key table"
                    )));
                }
                if let Some(scope) = scope_keys.last_mut() {
                    if !scope.insert(key) {
                        return Err(GraphcodeError::DuplicateKey {
                            key: keys.name(key).unwrap_or_default().to_owned(),
                        });
                    }
                }
            }
            if let FileBlock::Value { type_id, obj, .. } = &block {
                if let Some(type_id) = type_id {
                    if classes.get(*type_id).is_none() {
                        return Err(GraphcodeError::UndefinedType {
                            type_id: type_id.as_u64(),
                            position: index,
                        });
                    }
                }
                if let Some(obj) = obj {
                    if definitions.insert(*obj, index).is_some() {
                        return Err(format_error(format!(
                            "object {obj} defined twice (second at record {index})"
                        )));
                    }
                }
            }

            match block.level() {
                Level::Enter => {
                    if open.len() >= max_depth {
                        return Err(GraphcodeError::DepthLimit { limit: max_depth });
                    }
                    open.push(index);
                    scope_keys.push(HashSet::new());
                    max_nesting = max_nesting.max(open.len());
                }
                Level::Exit => {
                    let start = open.pop().ok_or_else(|| {
                        format_error(format!("unbalanced end record at record {index}"))
                    })?;
                    scope_keys.pop();
                    records[start].end = index;
                }
                Level::Same => {}
            }
            records.push(Record { block, end: index });
        }

        if records.is_empty() {
            return Err(format_error("empty body"));
        }
        if let Some(start) = open.last() {
            return Err(format_error(format!("scope opened at record {start} is never closed")));
        }
        for (position, record) in records.iter().enumerate() {
            if let FileBlock::Pointer {
                obj,
                conditional: false,
                ..
            } = record.block
            {
                if !definitions.contains_key(&obj) {
                    return Err(GraphcodeError::UndefinedObject {
                        obj_id: obj.as_u64(),
                        position,
                    });
                }
            }
        }
        Ok(Self {
            records,
            definitions,
            max_nesting,
        })
    }
}

/// Where a value was requested from, for error messages.
#[derive(Debug, Clone, Copy)]
enum Site {
    Root,
    Key(KeyId),
    Index(usize),
    Record(usize),
}

enum Slot {
    InProgress,
    /// Holds a shared handle when the decoded type provides one.
    Complete(Option<Box<dyn Any>>),
}

struct Frame {
    record: usize,
    site: Site,
    obj: Option<ObjId>,
    type_id: Option<TypeId>,
    version: u32,
    keyed: HashMap<KeyId, usize>,
    unkeyed: Vec<usize>,
    cursor: usize,
    /// Set for payload records; cleared once the payload is read.
    unread_payload: Cell<bool>,
}

type Setter = Box<dyn FnOnce(&dyn Any, Option<&dyn Any>) -> Result<()>>;
type Materialize = for<'x, 'y> fn(&'x mut Decoder<'y>, usize) -> Result<()>;

struct Deferred {
    owner: ObjId,
    target: Option<ObjId>,
    materialize: Option<Materialize>,
    apply: Setter,
}

fn materialize<T: Decode>(decoder: &mut Decoder<'_>, record: usize) -> Result<()> {
    decoder
        .decode_record::<T>(record, Site::Record(record))
        .map(drop)
}

/// Read-side session state, passed to [`Decode::decode`].
pub struct Decoder<'a> {
    records: Vec<Record>,
    definitions: HashMap<ObjId, usize>,
    keys: &'a KeyTable,
    classes: &'a ClassTable,
    registry: &'a TypeRegistry,
    slots: HashMap<ObjId, Slot>,
    frames: Vec<Frame>,
    pending: Option<(usize, Site)>,
    deferred: Vec<Deferred>,
    bound: usize,
    max_depth: usize,
}

impl std::fmt::Debug for Decoder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("records", &self.records.len())
            .field("objects", &self.slots.len())
            .field("depth", &self.frames.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(
        tree: RecordTree,
        classes: &'a ClassTable,
        keys: &'a KeyTable,
        registry: &'a TypeRegistry,
        max_depth: usize,
    ) -> Self {
        Self {
            records: tree.records,
            definitions: tree.definitions,
            keys,
            classes,
            registry,
            slots: HashMap::new(),
            frames: Vec::new(),
            pending: None,
            deferred: Vec::new(),
            bound: 0,
            max_depth,
        }
    }

    pub(crate) fn decode_root<T: Decode>(mut self) -> Result<T> {
        debug!(
            records = self.records.len(),
            objects = self.definitions.len(),
            "decode start"
        );
        let value = self.decode_record::<T>(0, Site::Root)?;
        self.finish()?;
        debug!(
            objects = self.slots.len(),
            deferred = self.bound,
            "decode finished"
        );
        Ok(value)
    }

    /// Reads the keyed field `key` of the current value.
    ///
    /// A missing key decodes as absent: `Option` fields become `None`, other
    /// types fail with [`GraphcodeError::MissingValue`].
    pub fn decode_key<T: Decode>(&mut self, key: &str) -> Result<T> {
        match self.keyed_record(key)? {
            Some((record, site)) => self.decode_record(record, site),
            None => T::decode_absent().ok_or_else(|| GraphcodeError::MissingValue {
                site: format!("key `{key}`"),
            }),
        }
    }

    /// Reads the next positional entry of the current value.
    pub fn decode_next<T: Decode>(&mut self) -> Result<T> {
        let (position, record) = self.next_record()?;
        match record {
            Some(record) => self.decode_record(record, Site::Index(position)),
            None => T::decode_absent().ok_or_else(|| GraphcodeError::MissingValue {
                site: format!("position {position}"),
            }),
        }
    }

    /// Returns true while positional entries remain.
    pub fn has_next(&self) -> bool {
        self.remaining() > 0
    }

    /// Number of positional entries not read yet.
    pub fn remaining(&self) -> usize {
        self.frames
            .last()
            .map_or(0, |f| f.unkeyed.len().saturating_sub(f.cursor))
    }

    /// Returns true if the current value has a field named `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        matches!(self.keyed_record(key), Ok(Some(_)))
    }

    /// Binds the keyed field `key` through `setter` once both the enclosing
    /// object (`owner`) and the field's target are fully built.
    ///
    /// `O` is the handle type the owner is decoded as (for example
    /// `Rc<RefCell<Node>>`), `T` the handle type of the target. The owner is
    /// the nearest enclosing value that has an object id. A missing, `Nil` or
    /// pruned field calls nothing.
    ///
    /// ```rust,ignore
    /// decoder.decode_deferred::<Rc<RefCell<Node>>, Rc<RefCell<Node>>, _>("parent", |me, parent| {
    ///     me.borrow_mut().parent = Some(parent);
    /// })?;
    /// ```
    pub fn decode_deferred<O, T, F>(&mut self, key: &str, setter: F) -> Result<()>
    where
        O: 'static,
        T: Decode,
        F: FnOnce(&O, T) + 'static,
    {
        match self.keyed_record(key)? {
            Some((record, site)) => self.defer::<O, T, F>(record, site, setter),
            None => Ok(()),
        }
    }

    /// Positional counterpart of [`decode_deferred`](Self::decode_deferred).
    pub fn decode_next_deferred<O, T, F>(&mut self, setter: F) -> Result<()>
    where
        O: 'static,
        T: Decode,
        F: FnOnce(&O, T) + 'static,
    {
        match self.next_record()? {
            (position, Some(record)) => self.defer::<O, T, F>(record, Site::Index(position), setter),
            (_, None) => Ok(()),
        }
    }

    /// Payload bytes of the current trivial or payload value.
    pub fn payload(&self) -> Result<ByteReader<'_>> {
        let frame = self.frame()?;
        match &self.records[frame.record].block {
            FileBlock::Value {
                payload: Some(bytes),
                ..
            } => {
                frame.unread_payload.set(false);
                Ok(ByteReader::new(bytes))
            }
            other => Err(GraphcodeError::TypeMismatch {
                site: self.describe(frame.site),
                expected: "payload value".to_owned(),
                found: other.kind().to_owned(),
            }),
        }
    }

    /// Layout version the current value was encoded with.
    ///
    /// Comes from the class tag when present, otherwise from the target type's
    /// own [`Class`](crate::Class) version, otherwise 0.
    pub fn class_version(&self) -> u32 {
        self.frames.last().map_or(0, |f| f.version)
    }

    /// Encoded class name of the current value, if it was tagged.
    pub fn class_name(&self) -> Option<&str> {
        let type_id = self.frames.last()?.type_id?;
        self.classes.get(type_id).map(|c| c.name.as_str())
    }

    /// Builds the current tagged value as the trait object `P` through the
    /// constructor registered for its class.
    pub fn decode_polymorphic<P: ?Sized + 'static>(&mut self) -> Result<Box<P>> {
        let frame = self.frame()?;
        let Some(type_id) = frame.type_id else {
            return Err(GraphcodeError::TypeMismatch {
                site: self.describe(frame.site),
                expected: format!("tagged value for `{}`", type_name::<P>()),
                found: "untagged value".to_owned(),
            });
        };
        let name = self
            .classes
            .get(type_id)
            .map(|c| c.name.clone())
            .ok_or_else(|| internal_error(format!("type id {type_id} vanished from class table")))?;
        let constructor = self.registry.constructor::<P>(&name)?;
        constructor(self)
    }

    /// Decodes the content of a transparent wrapper from the record the
    /// wrapper was asked to decode.
    #[doc(hidden)]
    pub fn decode_inner<T: Decode>(&mut self) -> Result<T> {
        match self.pending.take() {
            Some((record, site)) => self.decode_record(record, site),
            None => T::decode(self),
        }
    }

    fn frame(&self) -> Result<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| internal_error("decoder used outside a value"))
    }

    fn keyed_record(&self, key: &str) -> Result<Option<(usize, Site)>> {
        let frame = self.structured_frame()?;
        Ok(self
            .keys
            .id(key)
            .and_then(|id| frame.keyed.get(&id).map(|r| (*r, Site::Key(id)))))
    }

    fn next_record(&mut self) -> Result<(usize, Option<usize>)> {
        self.structured_frame()?;
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| internal_error("decoder used outside a value"))?;
        let position = frame.cursor;
        let record = frame.unkeyed.get(position).copied();
        if record.is_some() {
            frame.cursor += 1;
        }
        Ok((position, record))
    }

    /// The current frame, which must be a scope rather than a payload value.
    fn structured_frame(&self) -> Result<&Frame> {
        let frame = self.frame()?;
        if frame.unread_payload.get() {
            return Err(self.payload_as_structure(frame));
        }
        Ok(frame)
    }

    fn payload_as_structure(&self, frame: &Frame) -> GraphcodeError {
        GraphcodeError::TypeMismatch {
            site: self.describe(frame.site),
            expected: "structured value".to_owned(),
            found: "payload value".to_owned(),
        }
    }

    fn describe(&self, site: Site) -> String {
        match site {
            Site::Root => "root value".to_owned(),
            Site::Key(id) => match self.keys.name(id) {
                Some(name) => format!("key `{name}`"),
                None => format!("key {id}"),
            },
            Site::Index(i) => format!("position {i}"),
            Site::Record(r) => format!("record {r}"),
        }
    }

    fn is_absent(&self, record: usize) -> bool {
        match &self.records[record].block {
            FileBlock::Nil { .. } => true,
            FileBlock::Pointer {
                obj,
                conditional: true,
                ..
            } => !self.definitions.contains_key(obj),
            _ => false,
        }
    }

    fn decode_record<T: Decode>(&mut self, record: usize, site: Site) -> Result<T> {
        if self.is_absent(record) {
            return T::decode_absent().ok_or_else(|| GraphcodeError::MissingValue {
                site: self.describe(site),
            });
        }
        if T::TRANSPARENT {
            let outer = self.pending.replace((record, site));
            let result = T::decode(self);
            self.pending = outer;
            return result;
        }
        let outer = self.pending.take();
        let result = self.decode_concrete::<T>(record, site);
        self.pending = outer;
        result
    }

    fn decode_concrete<T: Decode>(&mut self, record: usize, site: Site) -> Result<T> {
        let (obj, type_id) = match &self.records[record].block {
            FileBlock::Pointer { obj, .. } => return self.resolve::<T>(*obj, record, site),
            FileBlock::Value { obj, type_id, .. } => (*obj, *type_id),
            other => {
                return Err(internal_error(format!(
                    "cannot decode a {} record at {}",
                    other.kind(),
                    self.describe(site)
                )));
            }
        };
        if let Some(obj) = obj {
            match self.slots.get(&obj) {
                Some(Slot::Complete(_)) => return self.shared::<T>(obj, site),
                Some(Slot::InProgress) => {
                    return Err(GraphcodeError::CyclicReference {
                        obj_id: obj.as_u64(),
                    });
                }
                None => {
                    self.slots.insert(obj, Slot::InProgress);
                }
            }
        }
        let version = self.check_class::<T>(type_id, site)?;
        self.push_frame(record, site, obj, type_id, version)?;
        let result = T::decode(self);
        let frame = self.frames.pop();
        let value = result?;
        // A payload nobody read means `T` decoded it as an (empty) structure.
        if let Some(frame) = frame.filter(|f| f.unread_payload.get()) {
            return Err(self.payload_as_structure(&frame));
        }
        if let Some(obj) = obj {
            let stored = value.share().map(|v| Box::new(v) as Box<dyn Any>);
            self.slots.insert(obj, Slot::Complete(stored));
            self.fire(obj)?;
        }
        Ok(value)
    }

    fn resolve<T: Decode>(&mut self, obj: ObjId, record: usize, site: Site) -> Result<T> {
        match self.slots.get(&obj) {
            Some(Slot::Complete(_)) => self.shared::<T>(obj, site),
            Some(Slot::InProgress) => Err(GraphcodeError::CyclicReference {
                obj_id: obj.as_u64(),
            }),
            None => {
                let definition =
                    *self
                        .definitions
                        .get(&obj)
                        .ok_or(GraphcodeError::UndefinedObject {
                            obj_id: obj.as_u64(),
                            position: record,
                        })?;
                trace!(%obj, definition, "building object out of order");
                // Nests a frame on top of the current one, so chains of
                // forward pointers count against `max_depth`.
                self.decode_concrete::<T>(definition, site)
            }
        }
    }

    fn shared<T: Decode>(&self, obj: ObjId, site: Site) -> Result<T> {
        let found = match self.slots.get(&obj) {
            Some(Slot::Complete(Some(stored))) => match stored.downcast_ref::<T>() {
                Some(value) => return value.share().ok_or_else(|| self.unshareable::<T>(obj, site)),
                None => format!("object {obj} of another type"),
            },
            _ => format!("object {obj} without a shareable handle"),
        };
        Err(GraphcodeError::TypeMismatch {
            site: self.describe(site),
            expected: type_name::<T>().to_owned(),
            found,
        })
    }

    fn unshareable<T>(&self, obj: ObjId, site: Site) -> GraphcodeError {
        GraphcodeError::TypeMismatch {
            site: self.describe(site),
            expected: format!("shareable `{}`", type_name::<T>()),
            found: format!("object {obj}"),
        }
    }

    fn check_class<T: Decode>(&self, type_id: Option<TypeId>, site: Site) -> Result<u32> {
        let expected = T::class();
        let Some(type_id) = type_id else {
            return Ok(expected.map_or(0, |c| c.version));
        };
        let descriptor = self
            .classes
            .get(type_id)
            .ok_or_else(|| internal_error(format!("type id {type_id} vanished from class table")))?;
        if let Some(info) = expected {
            if !self.registry.names_match(&descriptor.name, info.name) {
                return Err(GraphcodeError::TypeMismatch {
                    site: self.describe(site),
                    expected: info.name.to_owned(),
                    found: descriptor.name.clone(),
                });
            }
        }
        Ok(descriptor.version)
    }

    fn push_frame(
        &mut self,
        record: usize,
        site: Site,
        obj: Option<ObjId>,
        type_id: Option<TypeId>,
        version: u32,
    ) -> Result<()> {
        if self.frames.len() > self.max_depth {
            return Err(GraphcodeError::DepthLimit {
                limit: self.max_depth,
            });
        }
        let payload = matches!(
            self.records[record].block,
            FileBlock::Value {
                payload: Some(_),
                ..
            }
        );
        let mut keyed = HashMap::new();
        let mut unkeyed = Vec::new();
        let end = self.records[record].end;
        let mut child = record + 1;
        while child < end {
            match self.records[child].block.key() {
                Some(key) => {
                    keyed.insert(key, child);
                }
                None => unkeyed.push(child),
            }
            child = self.records[child].end + 1;
        }
        self.frames.push(Frame {
            record,
            site,
            obj,
            type_id,
            version,
            keyed,
            unkeyed,
            cursor: 0,
            unread_payload: Cell::new(payload),
        });
        Ok(())
    }

    fn defer<O, T, F>(&mut self, record: usize, site: Site, setter: F) -> Result<()>
    where
        O: 'static,
        T: Decode,
        F: FnOnce(&O, T) + 'static,
    {
        let owner = self
            .frames
            .iter()
            .rev()
            .find_map(|f| f.obj)
            .ok_or_else(|| internal_error("deferred decode needs an enclosing value with identity"))?;
        if self.is_absent(record) {
            return Ok(());
        }
        let target = match &self.records[record].block {
            FileBlock::Pointer { obj, .. } => *obj,
            FileBlock::Value { obj: Some(obj), .. } => {
                // The target is defined right here; build it in place.
                let obj = *obj;
                self.decode_record::<T>(record, site)?;
                obj
            }
            FileBlock::Value { obj: None, .. } => {
                let value = self.decode_record::<T>(record, site)?;
                self.deferred.push(Deferred {
                    owner,
                    target: None,
                    materialize: None,
                    apply: Box::new(move |owner: &dyn Any, _: Option<&dyn Any>| {
                        setter(downcast_owner::<O>(owner)?, value);
                        Ok(())
                    }),
                });
                return Ok(());
            }
            other => {
                return Err(internal_error(format!(
                    "cannot defer a {} record",
                    other.kind()
                )));
            }
        };
        self.deferred.push(Deferred {
            owner,
            target: Some(target),
            materialize: Some(materialize::<T>),
            apply: Box::new(move |owner: &dyn Any, target: Option<&dyn Any>| {
                let target = target
                    .and_then(|t| t.downcast_ref::<T>())
                    .and_then(T::share)
                    .ok_or_else(|| GraphcodeError::TypeMismatch {
                        site: "deferred target".to_owned(),
                        expected: format!("shareable `{}`", type_name::<T>()),
                        found: "object of another type".to_owned(),
                    })?;
                setter(downcast_owner::<O>(owner)?, target);
                Ok(())
            }),
        });
        trace!(%owner, %target, "deferred binding registered");
        // The target may already be complete; the owner never is.
        self.fire(target)
    }

    fn is_complete(&self, obj: ObjId) -> bool {
        matches!(self.slots.get(&obj), Some(Slot::Complete(_)))
    }

    fn stored(&self, obj: ObjId) -> Result<&dyn Any> {
        match self.slots.get(&obj) {
            Some(Slot::Complete(Some(value))) => Ok(value.as_ref()),
            _ => Err(GraphcodeError::TypeMismatch {
                site: format!("deferred binding on object {obj}"),
                expected: "shareable handle".to_owned(),
                found: "object without a shareable handle".to_owned(),
            }),
        }
    }

    /// Runs every deferred binding that became ready with `completed`.
    fn fire(&mut self, completed: ObjId) -> Result<()> {
        let mut i = 0;
        while i < self.deferred.len() {
            let binding = &self.deferred[i];
            let involved = binding.owner == completed || binding.target == Some(completed);
            let ready = self.is_complete(binding.owner)
                && binding.target.is_none_or(|t| self.is_complete(t));
            if !(involved && ready) {
                i += 1;
                continue;
            }
            let binding = self.deferred.remove(i);
            let owner = self.stored(binding.owner)?;
            let target = match binding.target {
                Some(t) => Some(self.stored(t)?),
                None => None,
            };
            (binding.apply)(owner, target)?;
            self.bound += 1;
        }
        Ok(())
    }

    fn unbuilt_target(&self) -> Option<(Materialize, usize)> {
        self.deferred.iter().find_map(|d| {
            let target = d.target?;
            if self.slots.contains_key(&target) {
                return None;
            }
            Some((d.materialize?, *self.definitions.get(&target)?))
        })
    }

    fn finish(&mut self) -> Result<()> {
        // Targets the walk never reached are built now.
        while let Some((build, record)) = self.unbuilt_target() {
            build(self, record)?;
        }
        match self.deferred.first() {
            Some(binding) => Err(GraphcodeError::DanglingReference {
                obj_id: binding.target.unwrap_or(binding.owner).as_u64(),
            }),
            None => Ok(()),
        }
    }
}

fn downcast_owner<O: 'static>(owner: &dyn Any) -> Result<&O> {
    owner
        .downcast_ref::<O>()
        .ok_or_else(|| GraphcodeError::TypeMismatch {
            site: "deferred owner".to_owned(),
            expected: type_name::<O>().to_owned(),
            found: "object of another type".to_owned(),
        })
}

/// Writes the records of `blocks` into a body buffer. Test helper for
/// hand-built streams.
#[cfg(test)]
pub(crate) fn body_of(blocks: &[FileBlock]) -> Vec<u8> {
    let mut w = crate::io::ByteWriter::new();
    for block in blocks {
        block.write(&mut w);
    }
    w.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ClassInfo;

    fn keys(names: &[&str]) -> KeyTable {
        let mut t = KeyTable::new();
        for n in names {
            t.intern(n);
        }
        t
    }

    fn value(key: Option<u64>, obj: Option<u64>, payload: Option<Vec<u8>>) -> FileBlock {
        FileBlock::Value {
            key: key.map(KeyId::new),
            type_id: None,
            obj: obj.map(ObjId::new),
            payload,
        }
    }

    fn parse(blocks: &[FileBlock], keys: &KeyTable) -> Result<RecordTree> {
        RecordTree::parse(&body_of(blocks), &ClassTable::new(), keys, 64)
    }

    #[test]
    fn scopes_are_matched() {
        let tree = parse(
            &[
                value(None, None, None),
                value(Some(1), None, None),
                FileBlock::End,
                FileBlock::Nil { key: Some(KeyId::new(2)) },
                FileBlock::End,
            ],
            &keys(&["a", "b"]),
        )
        .unwrap();
        assert_eq!(tree.records[0].end, 4);
        assert_eq!(tree.records[1].end, 2);
        assert_eq!(tree.max_nesting, 2);
    }

    #[test]
    fn unbalanced_streams_are_rejected() {
        let k = keys(&[]);
        assert!(parse(&[value(None, None, None)], &k).unwrap_err().is_format());
        assert!(parse(&[FileBlock::End], &k).unwrap_err().is_format());
        assert!(
            parse(&[value(None, None, Some(vec![])), FileBlock::Nil { key: None }], &k)
                .unwrap_err()
                .is_format()
        );
        assert!(parse(&[], &k).unwrap_err().is_format());
    }

    #[test]
    fn graph_consistency_is_checked_up_front() {
        let k = keys(&["a", "b"]);
        let dangling = [
            value(None, None, None),
            FileBlock::Pointer {
                key: Some(KeyId::new(1)),
                obj: ObjId::new(9),
                conditional: false,
            },
            FileBlock::End,
        ];
        assert!(matches!(
            parse(&dangling, &k),
            Err(GraphcodeError::UndefinedObject { obj_id: 9, position: 1 })
        ));

        let pruned = [
            value(None, None, None),
            FileBlock::Pointer {
                key: Some(KeyId::new(1)),
                obj: ObjId::new(9),
                conditional: true,
            },
            FileBlock::End,
        ];
        assert!(parse(&pruned, &k).is_ok());

        let duplicate = [
            value(None, None, None),
            FileBlock::Nil { key: Some(KeyId::new(1)) },
            FileBlock::Nil { key: Some(KeyId::new(1)) },
            FileBlock::End,
        ];
        assert!(matches!(
            parse(&duplicate, &k),
            Err(GraphcodeError::DuplicateKey { .. })
        ));

        let unknown_key = [value(Some(7), None, Some(vec![]))];
        assert!(parse(&unknown_key, &k).unwrap_err().is_format());

        let untyped = [FileBlock::Value {
            key: None,
            type_id: Some(TypeId::new(0)),
            obj: None,
            payload: Some(vec![]),
        }];
        assert!(matches!(
            parse(&untyped, &k),
            Err(GraphcodeError::UndefinedType { type_id: 0, .. })
        ));

        let mut classes = ClassTable::new();
        ClassTable::type_id(&mut classes, ClassInfo {
            name: "x",
            version: 0,
            qualified_name: "x",
        });
        assert!(RecordTree::parse(&body_of(&untyped), &classes, &k, 64).is_ok());
    }

    #[test]
    fn unreached_deferred_targets_are_built_at_finish() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Holder {
            value: Option<Rc<u32>>,
        }

        impl Decode for Holder {
            fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
                // "b" defines the target but is never read directly.
                decoder.decode_deferred::<Rc<RefCell<Holder>>, Rc<u32>, _>("a", |me, v| {
                    me.borrow_mut().value = Some(v);
                })?;
                Ok(Holder { value: None })
            }
        }

        let k = keys(&["a", "b"]);
        let classes = ClassTable::new();
        let registry = TypeRegistry::new();
        let body = body_of(&[
            value(None, Some(0), None),
            FileBlock::Pointer {
                key: Some(KeyId::new(1)),
                obj: ObjId::new(1),
                conditional: false,
            },
            value(Some(2), Some(1), Some(vec![7])),
            FileBlock::End,
        ]);
        let tree = RecordTree::parse(&body, &classes, &k, 64).unwrap();
        let root: Rc<RefCell<Holder>> = Decoder::new(tree, &classes, &k, &registry, 64)
            .decode_root()
            .unwrap();
        assert_eq!(root.borrow().value.as_deref(), Some(&7));
    }

    #[test]
    fn nesting_limit_applies_while_parsing() {
        let deep = [
            value(None, None, None),
            value(None, None, None),
            value(None, None, None),
            FileBlock::End,
            FileBlock::End,
            FileBlock::End,
        ];
        let body = body_of(&deep);
        let k = keys(&[]);
        assert!(RecordTree::parse(&body, &ClassTable::new(), &k, 3).is_ok());
        assert!(matches!(
            RecordTree::parse(&body, &ClassTable::new(), &k, 2),
            Err(GraphcodeError::DepthLimit { limit: 2 })
        ));
    }
}
