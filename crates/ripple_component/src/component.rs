//! The [`Component`] trait, interned component tags, and shared payloads.
//!
//! ## Tag identity
//!
//! A component "type" is identified purely by its tag name. Each world owns a
//! [`ComponentRegistry`] that interns tag names into small [`ComponentId`]s the
//! first time they are seen, so the hot path compares integers instead of
//! strings.
//!
//! A tag can be *defined* by name alone, or *registered* from a Rust type
//! implementing [`Component`]. The first typed registration binds the tag to
//! that Rust type (its `TypeId` and layout); any later attempt to register a
//! different Rust type under the same tag is rejected with
//! [`StoreError::TypeMismatch`].

use std::alloc::Layout;
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Data that can be attached to an entity.
///
/// The engine never inspects component values beyond their `Debug` rendering,
/// which shows up in diagnostics and introspection.
///
/// # Examples
///
/// ```rust
/// use ripple_component::Component;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Position {
///     x: f32,
///     y: f32,
/// }
///
/// impl Component for Position {
///     fn type_name() -> &'static str {
///         "Position"
///     }
/// }
/// ```
pub trait Component: Any + fmt::Debug {
    /// The tag this type is stored under.
    fn type_name() -> &'static str;

    /// The registration key for this type.
    fn key() -> ComponentKey
    where
        Self: Sized,
    {
        ComponentKey::of::<Self>()
    }
}

/// An interned component tag, valid within the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u32);

impl ComponentId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Everything needed to register a Rust type under its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentKey {
    /// The tag name, from [`Component::type_name`].
    pub name: &'static str,
    /// The Rust type bound to the tag.
    pub type_id: TypeId,
    /// `std::any::type_name` of the Rust type, for error messages.
    pub rust_type: &'static str,
    /// Memory layout of the Rust type.
    pub layout: Layout,
}

impl ComponentKey {
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            name: T::type_name(),
            type_id: TypeId::of::<T>(),
            rust_type: std::any::type_name::<T>(),
            layout: Layout::new::<T>(),
        }
    }
}

/// A way of naming a tag: by interned id, by name, or by Rust type.
///
/// Builders and filters accept `ComponentRef`s and resolve them against the
/// world's registry when they are installed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentRef {
    /// An id previously issued by the registry.
    Id(ComponentId),
    /// A tag name. Defined on first use.
    Name(Cow<'static, str>),
    /// A typed tag. Registered (and bound) on first use.
    Key(ComponentKey),
}

impl ComponentRef {
    /// Tag name, when known without consulting a registry.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            ComponentRef::Id(_) => None,
            ComponentRef::Name(name) => Some(name),
            ComponentRef::Key(key) => Some(key.name),
        }
    }
}

impl From<ComponentId> for ComponentRef {
    fn from(id: ComponentId) -> Self {
        ComponentRef::Id(id)
    }
}

impl From<&'static str> for ComponentRef {
    fn from(name: &'static str) -> Self {
        ComponentRef::Name(Cow::Borrowed(name))
    }
}

impl From<String> for ComponentRef {
    fn from(name: String) -> Self {
        ComponentRef::Name(Cow::Owned(name))
    }
}

impl From<ComponentKey> for ComponentRef {
    fn from(key: ComponentKey) -> Self {
        ComponentRef::Key(key)
    }
}

/// Shorthand for the typed [`ComponentRef`] of `T`.
#[must_use]
pub fn tag<T: Component>() -> ComponentRef {
    ComponentRef::Key(ComponentKey::of::<T>())
}

/// Object-safe view of a stored component value.
pub trait ComponentValue: Any + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Any + fmt::Debug> ComponentValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// An immutable, reference-counted component payload.
///
/// Cloning is cheap. Replacing a value always means storing a new
/// `ComponentData`; the old one stays valid for anyone still holding it,
/// which is how mutation events carry both the previous and the next value.
#[derive(Clone)]
pub struct ComponentData(Rc<dyn ComponentValue>);

impl ComponentData {
    pub fn new<T: Any + fmt::Debug>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Borrow the payload as `T`, if that is what it holds.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        ComponentValue::as_any(&*self.0).downcast_ref::<T>()
    }

    /// Share the payload as an `Rc<T>`, if that is what it holds.
    #[must_use]
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        ComponentValue::into_any(Rc::clone(&self.0))
            .downcast::<T>()
            .ok()
    }

    /// Returns `true` when both handles point at the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &ComponentData) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ComponentData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// The Rust type a tag was bound to by its first typed registration.
#[derive(Debug, Clone, Copy)]
pub struct TypeBinding {
    pub type_id: TypeId,
    pub rust_type: &'static str,
    pub layout: Layout,
}

/// Registry entry for one tag.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub name: Rc<str>,
    /// `None` for tags only ever defined by name.
    pub binding: Option<TypeBinding>,
}

/// Interns tag names into [`ComponentId`]s.
///
/// One registry per world; ids are meaningless across registries.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_name: HashMap<Rc<str>, ComponentId>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or look up) an untyped tag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTag`] for an empty or whitespace name.
    pub fn define(&mut self, name: &str) -> Result<ComponentId, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidTag(name.to_string()));
        }
        if let Some(&id) = self.by_name.get(name) {
            return Ok(id);
        }

        let id = ComponentId(self.infos.len() as u32);
        let name: Rc<str> = Rc::from(name);
        self.infos.push(ComponentInfo {
            id,
            name: Rc::clone(&name),
            binding: None,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Register a typed tag, binding it to the key's Rust type on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTag`] for a blank name, or
    /// [`StoreError::TypeMismatch`] if the tag is bound to another type.
    pub fn register(&mut self, key: &ComponentKey) -> Result<ComponentId, StoreError> {
        let id = self.define(key.name)?;
        let info = &mut self.infos[id.index()];
        match info.binding {
            Some(binding) if binding.type_id != key.type_id => Err(StoreError::TypeMismatch {
                tag: key.name.to_string(),
                bound: binding.rust_type,
                requested: key.rust_type,
            }),
            Some(_) => Ok(id),
            None => {
                info.binding = Some(TypeBinding {
                    type_id: key.type_id,
                    rust_type: key.rust_type,
                    layout: key.layout,
                });
                Ok(id)
            }
        }
    }

    /// Resolve a reference, defining or registering the tag as needed.
    ///
    /// # Errors
    ///
    /// Propagates [`define`](Self::define) and [`register`](Self::register)
    /// errors, and returns [`StoreError::UnknownComponent`] for an id this
    /// registry never issued.
    pub fn resolve(&mut self, reference: &ComponentRef) -> Result<ComponentId, StoreError> {
        match reference {
            ComponentRef::Id(id) => {
                if id.index() < self.infos.len() {
                    Ok(*id)
                } else {
                    Err(StoreError::UnknownComponent(*id))
                }
            }
            ComponentRef::Name(name) => self.define(name),
            ComponentRef::Key(key) => self.register(key),
        }
    }

    /// Resolve a reference without defining anything.
    #[must_use]
    pub fn lookup(&self, reference: &ComponentRef) -> Option<ComponentId> {
        match reference {
            ComponentRef::Id(id) => (id.index() < self.infos.len()).then_some(*id),
            ComponentRef::Name(name) => self.by_name.get(name.as_ref()).copied(),
            ComponentRef::Key(key) => self.by_name.get(key.name).copied(),
        }
    }

    #[must_use]
    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// Tag name for `id`, or `"<unknown>"`.
    #[must_use]
    pub fn name(&self, id: ComponentId) -> &str {
        self.infos.get(id.index()).map_or("<unknown>", |info| &info.name)
    }

    /// Shared handle to the tag name, for events that outlive a borrow.
    #[must_use]
    pub fn shared_name(&self, id: ComponentId) -> Rc<str> {
        self.infos
            .get(id.index())
            .map_or_else(|| Rc::from("<unknown>"), |info| Rc::clone(&info.name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}
