//! Type registry: class names, renames and polymorphic constructors.
//!
//! Decoding into a concrete type needs no registration; the decoder only
//! checks that the encoded class name resolves to the target's
//! [`Class::NAME`]. Decoding into a trait object (`Box<dyn Shape>`) needs a
//! constructor registered with [`TypeRegistry::register_as`], because nothing
//! else tells the decoder which concrete type to build.
//!
//! Renames let old streams keep decoding after a type changed its name. They
//! apply to generic arguments too, so renaming `geo.Pt` to `geo.Point` makes
//! `Pair<geo.Pt, geo.Pt>` resolve to `Pair<geo.Point, geo.Point>`. Generic
//! names are compared in the canonical spelling `Base<A, B>` (one space after
//! each comma).
//!
//! A [`TypeRegistry`] can be passed explicitly to
//! [`GraphcodeOptions::decode_with`](crate::GraphcodeOptions::decode_with).
//! The plain entry points use the process-wide registry behind
//! [`initialize`] / [`reset`].

use crate::codec::{Class, Decode};
use crate::decoder::Decoder;
use crate::error::{GraphcodeError, Result, internal_error};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard};

/// Builds a `Box<P>` from the decoder positioned on a tagged value.
pub type Constructor<P> = Arc<dyn Fn(&mut Decoder<'_>) -> Result<Box<P>> + Send + Sync>;

#[derive(Default)]
struct ClassEntry {
    version: u32,
    qualified_name: &'static str,
    // Keyed by the `TypeId` of the trait object `P`; values are `Constructor<P>`.
    constructors: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

/// A class as seen by the registry after rename resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClass {
    /// Registered name.
    pub name: String,
    /// Version of the registered (current) layout.
    pub version: u32,
    /// Rust type name of the registered type.
    pub qualified_name: &'static str,
}

/// Name-keyed registry of classes and renames.
#[derive(Default)]
pub struct TypeRegistry {
    classes: HashMap<String, ClassEntry>,
    renames: HashMap<String, String>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("renames", &self.renames)
            .finish()
    }
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `C` under [`Class::NAME`].
    pub fn register<C: Class + 'static>(&mut self) -> &mut Self {
        let entry = self.classes.entry(C::NAME.to_owned()).or_default();
        entry.version = C::VERSION;
        entry.qualified_name = std::any::type_name::<C>();
        self
    }

    /// Registers `C` and a constructor producing it as the trait object `P`.
    ///
    /// ```rust
    /// use graphcode::{Class, Decode, Decoder, Encode, Encoder, Result, TypeRegistry};
    ///
    /// trait Shape: Encode {
    ///     fn area(&self) -> f64;
    /// }
    ///
    /// struct Square(f64);
    /// impl Class for Square {
    ///     const NAME: &'static str = "Square";
    /// }
    /// impl Shape for Square {
    ///     fn area(&self) -> f64 { self.0 * self.0 }
    /// }
    /// impl Encode for Square {
    ///     fn encode(&self, e: &mut Encoder) -> Result<()> { e.encode_key("side", &self.0) }
    /// }
    /// impl Decode for Square {
    ///     fn decode(d: &mut Decoder<'_>) -> Result<Self> { Ok(Square(d.decode_key("side")?)) }
    /// }
    ///
    /// let mut registry = TypeRegistry::new();
    /// registry.register_as::<dyn Shape, Square>(|s| Box::new(s));
    /// assert!(registry.contains("Square"));
    /// ```
    pub fn register_as<P, C>(&mut self, upcast: fn(C) -> Box<P>) -> &mut Self
    where
        P: ?Sized + 'static,
        C: Class + Decode,
    {
        self.register::<C>();
        let constructor: Constructor<P> =
            Arc::new(move |decoder: &mut Decoder<'_>| C::decode(decoder).map(upcast));
        if let Some(entry) = self.classes.get_mut(C::NAME) {
            entry
                .constructors
                .insert(TypeId::of::<P>(), Box::new(constructor));
        }
        self
    }

    /// Removes the class registered under `C::NAME`.
    pub fn unregister<C: Class>(&mut self) -> bool {
        self.unregister_name(C::NAME)
    }

    /// Removes a class by name.
    pub fn unregister_name(&mut self, name: &str) -> bool {
        self.classes.remove(name).is_some()
    }

    /// Registers `New` and redirects `old_name` to it.
    pub fn replace<New: Class + 'static>(&mut self, old_name: &str) -> &mut Self {
        self.register::<New>();
        self.rename(old_name, New::NAME)
    }

    /// Redirects the class name `old` to `new`.
    pub fn rename(&mut self, old: &str, new: &str) -> &mut Self {
        if old != new {
            self.renames.insert(old.trim().to_owned(), new.trim().to_owned());
        }
        self
    }

    /// Returns true if `name` is registered (without applying renames).
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if nothing is registered and no rename is set.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.renames.is_empty()
    }

    /// Drops every class and rename.
    pub fn clear(&mut self) {
        self.classes.clear();
        self.renames.clear();
    }

    /// Applies the rename table to `name`, including inside generic arguments.
    ///
    /// Returns `name` unchanged when no rename applies.
    pub fn rewrite(&self, name: &str) -> String {
        self.rewrite_in(name.trim(), &mut Vec::new())
    }

    fn rewrite_in(&self, name: &str, seen: &mut Vec<String>) -> String {
        if let Some(new) = self.renames.get(name) {
            // A rename cycle stops at the first repeated name.
            if seen.iter().any(|s| s == name) {
                return name.to_owned();
            }
            seen.push(name.to_owned());
            return self.rewrite_in(new, seen);
        }
        let Some((base, args)) = split_generic(name) else {
            return name.to_owned();
        };
        let base = self.rewrite_in(base, &mut seen.clone());
        let args: Vec<String> = args
            .iter()
            .map(|arg| self.rewrite_in(arg, &mut seen.clone()))
            .collect();
        let rebuilt = format!("{base}<{}>", args.join(", "));
        if rebuilt != name && self.renames.contains_key(&rebuilt) {
            self.rewrite_in(&rebuilt, seen)
        } else {
            rebuilt
        }
    }

    /// Resolves an encoded class name to a registered class.
    ///
    /// The name is looked up directly first, then through the rename table.
    pub fn resolve(&self, name: &str) -> Result<ResolvedClass> {
        let lookup = |n: &str| {
            self.classes.get_key_value(n).map(|(name, entry)| ResolvedClass {
                name: name.clone(),
                version: entry.version,
                qualified_name: entry.qualified_name,
            })
        };
        if let Some(found) = lookup(name) {
            return Ok(found);
        }
        let renamed = self.rewrite(name);
        lookup(&renamed).ok_or(GraphcodeError::UnknownType { name: renamed })
    }

    /// Returns true if the encoded `name` designates the class `expected`,
    /// directly or through renames. Registration is not required.
    pub fn names_match(&self, name: &str, expected: &str) -> bool {
        name == expected || self.rewrite(name) == expected
    }

    /// Looks up the constructor building `name` as the trait object `P`.
    pub fn constructor<P: ?Sized + 'static>(&self, name: &str) -> Result<Constructor<P>> {
        let resolved = self.resolve(name)?;
        self.classes
            .get(&resolved.name)
            .and_then(|entry| entry.constructors.get(&TypeId::of::<P>()))
            .and_then(|boxed| boxed.downcast_ref::<Constructor<P>>())
            .cloned()
            .ok_or(GraphcodeError::NotConstructible {
                name: resolved.name,
                target: std::any::type_name::<P>(),
            })
    }
}

/// Splits `Base<A, B<C>>` into `("Base", ["A", "B<C>"])`.
fn split_generic(name: &str) -> Option<(&str, Vec<&str>)> {
    let open = name.find('<')?;
    let inner = name.strip_suffix('>')?.get(open + 1..)?;
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                args.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    args.push(inner[start..].trim());
    Some((name[..open].trim(), args))
}

static GLOBAL: OnceLock<RwLock<TypeRegistry>> = OnceLock::new();

/// The process-wide registry used by [`Graphcode::decode`](crate::Graphcode::decode)
/// and friends.
pub fn global() -> &'static RwLock<TypeRegistry> {
    GLOBAL.get_or_init(|| RwLock::new(TypeRegistry::new()))
}

/// Populates the global registry.
///
/// Call once at startup, before the first decode that needs it. Calling again
/// adds to what is already registered.
pub fn initialize<F>(setup: F) -> Result<()>
where
    F: FnOnce(&mut TypeRegistry),
{
    let mut guard = global()
        .write()
        .map_err(|_| internal_error("type registry lock poisoned"))?;
    setup(&mut guard);
    tracing::debug!(classes = guard.len(), "type registry initialized");
    Ok(())
}

/// Clears the global registry.
pub fn reset() -> Result<()> {
    global()
        .write()
        .map_err(|_| internal_error("type registry lock poisoned"))?
        .clear();
    Ok(())
}

pub(crate) fn read_global() -> Result<RwLockReadGuard<'static, TypeRegistry>> {
    global()
        .read()
        .map_err(|_| internal_error("type registry lock poisoned"))
}

/// Makes `Box`, `Rc` and `Arc` of the given trait objects decodable,
/// dispatching through the registry.
///
/// The trait must have [`Encode`](crate::Encode) as a supertrait; encoding the
/// pointer types is already covered by the blanket impls.
///
/// ```rust,ignore
/// trait Shape: graphcode::Encode { fn area(&self) -> f64; }
/// graphcode::polymorphic!(dyn Shape);
/// ```
#[macro_export]
macro_rules! polymorphic {
    ($(dyn $tr:path),+ $(,)?) => {
        $(
            impl $crate::DecodeBoxed for dyn $tr {
                fn decode_boxed(
                    decoder: &mut $crate::Decoder<'_>,
                ) -> $crate::Result<::std::boxed::Box<Self>> {
                    decoder.decode_polymorphic::<dyn $tr>()
                }
            }

            impl $crate::Decode for ::std::boxed::Box<dyn $tr> {
                fn decode(decoder: &mut $crate::Decoder<'_>) -> $crate::Result<Self> {
                    decoder.decode_polymorphic::<dyn $tr>()
                }
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point;
    impl Class for Point {
        const NAME: &'static str = "geo.Point";
        const VERSION: u32 = 2;
    }

    #[test]
    fn split_generic_names() {
        assert_eq!(split_generic("Plain"), None);
        assert_eq!(
            split_generic("Map<K, List<V, W>>"),
            Some(("Map", vec!["K", "List<V, W>"]))
        );
        assert_eq!(split_generic("Broken<A"), None);
        assert_eq!(split_generic("Broken<A>>"), None);
    }

    #[test]
    fn renames_reach_generic_arguments() {
        let mut reg = TypeRegistry::new();
        reg.rename("geo.Pt", "geo.Point").rename("List", "Seq");
        assert_eq!(reg.rewrite("geo.Pt"), "geo.Point");
        assert_eq!(
            reg.rewrite("List<Pair<geo.Pt,geo.Pt>>"),
            "Seq<Pair<geo.Point, geo.Point>>"
        );
        assert_eq!(reg.rewrite("Other"), "Other");
    }

    #[test]
    fn rename_chains_and_cycles_terminate() {
        let mut reg = TypeRegistry::new();
        reg.rename("a", "b").rename("b", "c");
        assert_eq!(reg.rewrite("a"), "c");
        reg.rename("c", "a");
        let end = reg.rewrite("a");
        assert!(["a", "b", "c"].contains(&end.as_str()));
    }

    #[test]
    fn resolve_direct_and_renamed() {
        let mut reg = TypeRegistry::new();
        reg.replace::<Point>("Point");
        assert_eq!(reg.resolve("geo.Point").unwrap().version, 2);
        assert_eq!(reg.resolve("Point").unwrap().name, "geo.Point");
        assert!(matches!(
            reg.resolve("Nope"),
            Err(GraphcodeError::UnknownType { .. })
        ));
        assert!(reg.names_match("Point", "geo.Point"));
        assert!(!reg.names_match("Line", "geo.Point"));

        assert!(reg.unregister::<Point>());
        assert!(reg.resolve("Point").is_err());
    }

    #[test]
    fn missing_constructor_is_reported() {
        let mut reg = TypeRegistry::new();
        reg.register::<Point>();
        let err = reg.constructor::<dyn std::fmt::Debug>("geo.Point").err();
        assert!(matches!(err, Some(GraphcodeError::NotConstructible { .. })));
    }
}
