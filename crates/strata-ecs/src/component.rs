//! Component identity and type-erased component values.
//!
//! A component is any Rust type implementing [`Component`]. Each component
//! type carries a stable numeric id and a field name as associated constants;
//! the pair is what gets persisted and replicated, so ids must never be
//! renumbered once in use.
//!
//! Inside the storage layer values travel as [`ComponentValue`], a boxed
//! trait object that can be deep-cloned, compared and downcast back to the
//! concrete type.

use std::any::{Any, TypeId};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Stable numeric identifier of a component in the schema.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub u32);

impl ComponentId {
    /// Raw `u32` representation.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// A typed, independently-nullable entity field.
///
/// Values are replaced whole: there is no field-level merge inside a
/// component, which is why `Clone` is all the storage layer needs for
/// copy-on-write.
///
/// ```
/// use strata_ecs::component::Component;
///
/// #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
/// struct Position { v: [f64; 3] }
///
/// impl Component for Position {
///     const ID: u32 = 54;
///     const NAME: &'static str = "position";
/// }
///
/// assert_eq!(Position::component_id().raw(), 54);
/// ```
pub trait Component:
    Clone + PartialEq + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Stable schema id. Append-only: never reuse or renumber.
    const ID: u32;
    /// Field name used in change sets and schema listings.
    const NAME: &'static str;

    /// The [`ComponentId`] for this type.
    #[inline]
    fn component_id() -> ComponentId {
        ComponentId(Self::ID)
    }
}

// ---------------------------------------------------------------------------
// ComponentValue
// ---------------------------------------------------------------------------

/// Object-safe view of a component value. Implemented for every type that
/// satisfies the bounds; not meant to be implemented by hand.
trait DynComponent: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn clone_box(&self) -> Box<dyn DynComponent>;
    fn eq_dyn(&self, other: &dyn DynComponent) -> bool;
    fn fmt_dyn(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
    fn type_name(&self) -> &'static str;
}

impl<T> DynComponent for T
where
    T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn clone_box(&self) -> Box<dyn DynComponent> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn DynComponent) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn fmt_dyn(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A type-erased, owned component value.
///
/// Cloning performs a deep copy of the underlying value, so a clone taken
/// from a read-only base never aliases the base's storage.
pub struct ComponentValue(Box<dyn DynComponent>);

impl ComponentValue {
    /// Wrap a concrete component value.
    pub fn new<T: Component>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Rust `TypeId` of the wrapped value.
    pub fn value_type_id(&self) -> TypeId {
        self.0.as_any().type_id()
    }

    /// Rust type name of the wrapped value, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    /// Whether the wrapped value is a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.0.as_any().is::<T>()
    }

    /// Borrow the wrapped value as a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Mutably borrow the wrapped value as a `T`.
    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.0.as_any_mut().downcast_mut::<T>()
    }

    /// Unwrap into a `T`, handing the value back on a type mismatch.
    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        if self.is::<T>() {
            match self.0.into_any().downcast::<T>() {
                Ok(value) => Ok(*value),
                // `is` checked the type above.
                Err(_) => unreachable!("type checked before downcast"),
            }
        } else {
            Err(self)
        }
    }
}

impl Clone for ComponentValue {
    fn clone(&self) -> Self {
        Self(self.0.clone_box())
    }
}

impl PartialEq for ComponentValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_dyn(other.0.as_ref())
    }
}

impl fmt::Debug for ComponentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_dyn(f)
    }
}

impl<T: Component> From<T> for ComponentValue {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
