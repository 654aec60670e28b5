use super::id::ObjId;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Where an identity token comes from.
///
/// The encoder asks a value for each source in the order given by the
/// session's [`IdentityPolicy`](crate::IdentityPolicy) and keeps the first
/// token it gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentitySource {
    /// Equal values (by `Hash` + `Eq`) share one identity.
    Hashable,
    /// A stable id declared by the type itself.
    Declared,
    /// Address of a shared allocation (`Rc`, `Arc`).
    Reference,
}

trait DynKey: Any {
    fn dyn_eq(&self, other: &dyn DynKey) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Hash + Eq + 'static> DynKey for T {
    fn dyn_eq(&self, other: &dyn DynKey) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct KeyBox {
    namespace: std::any::TypeId,
    handle: Option<std::any::TypeId>,
    value: Box<dyn DynKey>,
}

impl PartialEq for KeyBox {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.handle == other.handle
            && self.value.dyn_eq(&*other.value)
    }
}

impl Eq for KeyBox {}

impl KeyBox {
    fn held_by<H: ?Sized + 'static>(self) -> Self {
        Self {
            handle: Some(std::any::TypeId::of::<H>()),
            ..self
        }
    }
}

impl Hash for KeyBox {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.handle.hash(state);
        self.value.dyn_hash(state);
    }
}

#[derive(PartialEq, Eq, Hash)]
enum Token {
    Reference {
        handle: std::any::TypeId,
        addr: usize,
    },
    Declared(KeyBox),
    Hashed(KeyBox),
}

/// An identity token: two values with equal tokens are the same object.
#[derive(PartialEq, Eq, Hash)]
pub struct Identity(Token);

impl Identity {
    /// Identity of a shared allocation, keyed by its address and pointee type.
    ///
    /// The address is only compared, never dereferenced. It stays valid for the
    /// session because the encoder borrows the whole graph.
    pub fn reference<T: ?Sized + 'static>(ptr: *const T) -> Self {
        Self(Token::Reference {
            handle: std::any::TypeId::of::<T>(),
            addr: ptr.cast::<()>() as usize,
        })
    }

    /// A stable id declared by `Owner`. Ids of different owner types never collide.
    pub fn declared<Owner: ?Sized + 'static, K: Hash + Eq + 'static>(key: K) -> Self {
        Self(Token::Declared(KeyBox {
            namespace: std::any::TypeId::of::<Owner>(),
            handle: None,
            value: Box::new(key),
        }))
    }

    /// Content identity: every value equal to `value` maps to the same object.
    pub fn hashed<T: Hash + Eq + Clone + 'static>(value: &T) -> Self {
        Self(Token::Hashed(KeyBox {
            namespace: std::any::TypeId::of::<T>(),
            handle: None,
            value: Box::new(value.clone()),
        }))
    }

    /// Moves a declared or hashed token under the handle type `H`.
    ///
    /// A value reached through `Rc<T>` decodes as a different type than a bare
    /// `T`, so the two must not share an object id even when their declared
    /// ids or contents are equal. Reference tokens are returned unchanged.
    pub fn held_by<H: ?Sized + 'static>(self) -> Self {
        match self.0 {
            Token::Declared(key) => Self(Token::Declared(key.held_by::<H>())),
            Token::Hashed(key) => Self(Token::Hashed(key.held_by::<H>())),
            reference => Self(reference),
        }
    }

    /// The source this token was built from.
    pub fn source(&self) -> IdentitySource {
        match self.0 {
            Token::Reference { .. } => IdentitySource::Reference,
            Token::Declared(_) => IdentitySource::Declared,
            Token::Hashed(_) => IdentitySource::Hashable,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Token::Reference { addr, .. } => write!(f, "Identity::Reference({addr:#x})"),
            Token::Declared(_) => f.write_str("Identity::Declared(..)"),
            Token::Hashed(_) => f.write_str("Identity::Hashed(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IdentityRecord {
    id: ObjId,
    strong: bool,
}

/// Maps identity tokens to object ids for one encode session.
///
/// A token is either *weak* (only referenced conditionally so far) or *strong*
/// (materialized in the stream). Weak promotes to strong at most once and keeps
/// its numeric id, so conditional pointers already written stay valid.
#[derive(Debug, Default)]
pub struct IdentityMap {
    records: HashMap<Identity, IdentityRecord>,
    next: u64,
}

impl IdentityMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a strong id without creating anything.
    pub fn strong_id(&self, identity: &Identity) -> Option<ObjId> {
        self.records
            .get(identity)
            .filter(|r| r.strong)
            .map(|r| r.id)
    }

    /// Returns the existing id (weak or strong) or creates a weak one.
    pub fn create_weak_id(&mut self, identity: Identity) -> ObjId {
        let next = &mut self.next;
        self.records
            .entry(identity)
            .or_insert_with(|| {
                let id = ObjId::new(*next);
                *next += 1;
                IdentityRecord { id, strong: false }
            })
            .id
    }

    /// Returns a strong id, promoting an existing weak id in place.
    pub fn create_strong_id(&mut self, identity: Identity) -> ObjId {
        match self.records.entry(identity) {
            Entry::Occupied(mut e) => {
                e.get_mut().strong = true;
                e.get().id
            }
            Entry::Vacant(e) => {
                let id = ObjId::new(self.next);
                self.next += 1;
                e.insert(IdentityRecord { id, strong: true }).id
            }
        }
    }

    /// Number of ids handed out.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no id has been handed out.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of ids that were only ever referenced conditionally.
    pub fn weak_count(&self) -> usize {
        self.records.values().filter(|r| !r.strong).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn weak_promotion_keeps_the_id() {
        let shared = Rc::new(5u8);
        let mut map = IdentityMap::new();
        let token = || Identity::reference(Rc::as_ptr(&shared));

        let weak = map.create_weak_id(token());
        assert_eq!(map.strong_id(&token()), None);
        assert_eq!(map.create_weak_id(token()), weak);

        let strong = map.create_strong_id(token());
        assert_eq!(strong, weak);
        assert_eq!(map.strong_id(&token()), Some(weak));
        // Never demotes.
        assert_eq!(map.create_weak_id(token()), weak);
        assert_eq!(map.strong_id(&token()), Some(weak));
        assert_eq!(map.weak_count(), 0);
    }

    #[test]
    fn ids_are_dense_and_first_use_ordered() {
        let mut map = IdentityMap::new();
        let a = map.create_strong_id(Identity::hashed(&"a".to_string()));
        let b = map.create_weak_id(Identity::hashed(&"b".to_string()));
        let a2 = map.create_strong_id(Identity::hashed(&"a".to_string()));
        assert_eq!((a.as_u64(), b.as_u64(), a2), (0, 1, a));
        assert_eq!(map.len(), 2);
        assert_eq!(map.weak_count(), 1);
    }

    #[test]
    fn declared_ids_are_namespaced_by_owner() {
        struct A;
        struct B;
        let mut map = IdentityMap::new();
        let a = map.create_strong_id(Identity::declared::<A, _>(7u32));
        let b = map.create_strong_id(Identity::declared::<B, _>(7u32));
        assert_ne!(a, b);
        assert_eq!(map.strong_id(&Identity::declared::<A, _>(7u32)), Some(a));
    }

    #[test]
    fn handles_do_not_alias_their_pointee() {
        struct Item;
        let mut map = IdentityMap::new();
        let bare = map.create_strong_id(Identity::declared::<Item, _>(1u32));
        let shared =
            map.create_strong_id(Identity::declared::<Item, _>(1u32).held_by::<Rc<Item>>());
        assert_ne!(bare, shared);
        assert_eq!(
            map.strong_id(&Identity::declared::<Item, _>(1u32).held_by::<Rc<Item>>()),
            Some(shared)
        );
        assert_ne!(
            Identity::hashed(&3u8).held_by::<Rc<u8>>(),
            Identity::hashed(&3u8).held_by::<std::sync::Arc<u8>>()
        );
    }

    #[test]
    fn reference_identity_distinguishes_allocations() {
        let x = Rc::new(1u32);
        let y = Rc::new(1u32);
        assert_ne!(
            Identity::reference(Rc::as_ptr(&x)),
            Identity::reference(Rc::as_ptr(&y))
        );
        assert_eq!(
            Identity::reference(Rc::as_ptr(&x)),
            Identity::reference(Rc::as_ptr(&Rc::clone(&x)))
        );
        assert_eq!(
            Identity::reference(Rc::as_ptr(&x)).source(),
            IdentitySource::Reference
        );
    }
}
