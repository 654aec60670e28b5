//! The encode engine.
//!
//! An [`Encoder`] turns a value graph into the flat record stream described in
//! [`block`](crate::block). It owns the three session maps (identity, class
//! table, key table); they start empty and are handed to the container writer
//! when the walk is done.
//!
//! Per value the engine:
//!
//! 1. peels optional wrappers (`None` becomes a `Nil` record),
//! 2. writes trivial values straight out as payload records,
//! 3. asks the value for an identity token and either writes a pointer to an
//!    already materialized object, writes a conditional pointer without
//!    recursing, or assigns a fresh strong id,
//! 4. tags the record with its class when it has one,
//! 5. writes the payload, or opens a scope, lets the value write its fields
//!    and closes the scope with `End`.

use crate::block::FileBlock;
use crate::codec::{Encode, Representation, Unwrapped};
use crate::error::{GraphcodeError, Result, internal_error};
use crate::graph::{ClassTable, IdentityMap, KeyId, KeyTable, ObjId};
use crate::io::ByteWriter;
use crate::options::GraphcodeOptions;
use std::collections::HashSet;
use tracing::{trace, warn};

/// Output of one encode session.
#[derive(Debug)]
pub(crate) struct EncodedGraph {
    pub body: Vec<u8>,
    pub classes: ClassTable,
    pub keys: KeyTable,
    pub records: usize,
    pub objects: usize,
}

/// Write-side session state, passed to [`Encode::encode`].
#[derive(Debug)]
pub struct Encoder {
    out: ByteWriter,
    identities: IdentityMap,
    classes: ClassTable,
    keys: KeyTable,
    scope_keys: HashSet<KeyId>,
    payload: Option<ByteWriter>,
    depth: usize,
    records: usize,
    options: GraphcodeOptions,
}

impl Encoder {
    pub(crate) fn new(options: &GraphcodeOptions) -> Self {
        Self {
            out: ByteWriter::with_capacity(1024),
            identities: IdentityMap::new(),
            classes: ClassTable::new(),
            keys: KeyTable::new(),
            scope_keys: HashSet::new(),
            payload: None,
            depth: 0,
            records: 0,
            options: options.clone(),
        }
    }

    /// Writes a keyed field.
    ///
    /// Keys must be unique within one value; a repeated key fails with
    /// [`GraphcodeError::DuplicateKey`].
    pub fn encode_key<T: Encode + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        self.encode_value(Some(key), value, false)
    }

    /// Writes a keyed field that only references its target.
    ///
    /// The target is written as a pointer and not materialized here. If no
    /// unconditional path ever materializes it, the decoder sees the field as
    /// absent.
    pub fn encode_key_conditional<T: Encode + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        self.encode_value(Some(key), value, true)
    }

    /// Writes the next positional entry.
    pub fn encode_next<T: Encode + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.encode_value(None, value, false)
    }

    /// Writes the next positional entry as a conditional reference.
    pub fn encode_next_conditional<T: Encode + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.encode_value(None, value, true)
    }

    /// The payload buffer of the trivial or payload value being written.
    ///
    /// Fails when called from a structural value.
    pub fn payload(&mut self) -> Result<&mut ByteWriter> {
        self.payload
            .as_mut()
            .ok_or_else(|| internal_error("payload() called outside a payload value"))
    }

    /// Current structural nesting.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The session's options.
    pub fn options(&self) -> &GraphcodeOptions {
        &self.options
    }

    pub(crate) fn encode_root<T: Encode + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.encode_value(None, value, false)
    }

    pub(crate) fn finish(self) -> EncodedGraph {
        EncodedGraph {
            body: self.out.into_inner(),
            classes: self.classes,
            keys: self.keys,
            records: self.records,
            objects: self.identities.len(),
        }
    }

    fn encode_value<T: Encode + ?Sized>(
        &mut self,
        key: Option<&str>,
        value: &T,
        conditional: bool,
    ) -> Result<()> {
        if self.payload.is_some() {
            return Err(internal_error("fields cannot be written inside a payload"));
        }
        let key = match key {
            Some(name) => Some(self.claim_key(name)?),
            None => None,
        };
        match value.unwrap_optional() {
            Unwrapped::Present => self.encode_present(key, value, conditional),
            other => self.encode_unwrapped(key, other, conditional),
        }
    }

    fn encode_unwrapped(
        &mut self,
        key: Option<KeyId>,
        unwrapped: Unwrapped<'_>,
        conditional: bool,
    ) -> Result<()> {
        match unwrapped {
            Unwrapped::Absent => {
                self.emit(&FileBlock::Nil { key });
                Ok(())
            }
            Unwrapped::Locked => Err(internal_error("value is mutably borrowed during encode")),
            Unwrapped::Inner(inner) => self.encode_inner(key, inner, conditional),
            Unwrapped::Guarded(guard) => self.encode_inner(key, &*guard, conditional),
            Unwrapped::Present => Err(internal_error("unwrapped value without inner value")),
        }
    }

    fn encode_inner(&mut self, key: Option<KeyId>, value: &dyn Encode, conditional: bool) -> Result<()> {
        match value.unwrap_optional() {
            Unwrapped::Present => self.encode_present(key, value, conditional),
            other => self.encode_unwrapped(key, other, conditional),
        }
    }

    fn claim_key(&mut self, name: &str) -> Result<KeyId> {
        let id = self.keys.intern(name);
        if !self.scope_keys.insert(id) {
            return Err(GraphcodeError::DuplicateKey {
                key: name.to_owned(),
            });
        }
        Ok(id)
    }

    fn encode_present<T: Encode + ?Sized>(
        &mut self,
        key: Option<KeyId>,
        value: &T,
        conditional: bool,
    ) -> Result<()> {
        let representation = value.representation();
        if representation == Representation::Trivial {
            if conditional {
                self.degrade(GraphcodeError::ConditionalTrivial {
                    type_name: value.type_name(),
                })?;
            }
            let payload = self.capture_payload(value)?;
            self.emit(&FileBlock::Value {
                key,
                type_id: None,
                obj: None,
                payload: Some(payload),
            });
            return Ok(());
        }

        let obj = if self.options.track_identity {
            match self.assign_identity(key, value, conditional)? {
                Assigned::Written => return Ok(()),
                Assigned::Fresh(id) => Some(id),
                Assigned::None => None,
            }
        } else {
            if conditional {
                self.degrade(GraphcodeError::ConditionalWithoutIdentity {
                    type_name: value.type_name(),
                })?;
            }
            None
        };

        let type_id = if self.options.type_tags {
            value.class().map(|info| self.classes.type_id(info))
        } else {
            None
        };

        if representation == Representation::Payload {
            let payload = self.capture_payload(value)?;
            self.emit(&FileBlock::Value {
                key,
                type_id,
                obj,
                payload: Some(payload),
            });
            return Ok(());
        }

        self.emit(&FileBlock::Value {
            key,
            type_id,
            obj,
            payload: None,
        });
        if self.depth >= self.options.max_depth {
            return Err(GraphcodeError::DepthLimit {
                limit: self.options.max_depth,
            });
        }
        self.depth += 1;
        let outer_keys = std::mem::take(&mut self.scope_keys);
        let result = value.encode(self);
        self.scope_keys = outer_keys;
        self.depth -= 1;
        result?;
        self.emit(&FileBlock::End);
        Ok(())
    }

    fn assign_identity<T: Encode + ?Sized>(
        &mut self,
        key: Option<KeyId>,
        value: &T,
        conditional: bool,
    ) -> Result<Assigned> {
        let identity = self
            .options
            .identity_policy
            .sources()
            .iter()
            .find_map(|source| value.identity(*source));
        let Some(identity) = identity else {
            if conditional {
                return Err(GraphcodeError::ConditionalWithoutIdentity {
                    type_name: value.type_name(),
                });
            }
            return Ok(Assigned::None);
        };
        if let Some(obj) = self.identities.strong_id(&identity) {
            self.emit(&FileBlock::Pointer {
                key,
                obj,
                conditional: false,
            });
            return Ok(Assigned::Written);
        }
        if conditional {
            let obj = self.identities.create_weak_id(identity);
            self.emit(&FileBlock::Pointer {
                key,
                obj,
                conditional: true,
            });
            return Ok(Assigned::Written);
        }
        Ok(Assigned::Fresh(self.identities.create_strong_id(identity)))
    }

    fn capture_payload<T: Encode + ?Sized>(&mut self, value: &T) -> Result<Vec<u8>> {
        self.payload = Some(ByteWriter::new());
        let result = value.encode(self);
        let written = self.payload.take();
        result?;
        Ok(written.map(ByteWriter::into_inner).unwrap_or_default())
    }

    fn degrade(&mut self, err: GraphcodeError) -> Result<()> {
        if self.options.strict {
            return Err(err);
        }
        warn!(error = %err, "encoding conditional reference unconditionally");
        Ok(())
    }

    fn emit(&mut self, block: &FileBlock) {
        trace!(record = self.records, kind = block.kind(), depth = self.depth, "emit");
        block.write(&mut self.out);
        self.records += 1;
    }
}

enum Assigned {
    /// A pointer record was written; nothing else to do.
    Written,
    /// Materialize the value under this id.
    Fresh(ObjId),
    /// The value has no identity.
    None,
}
