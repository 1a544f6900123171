//! Typed keys and the type descriptors that identify stored values.
//!
//! A [`TypedKey`] pairs a key name with a [`TypeDescriptor`]. The name is what
//! the backend persists; the descriptor is what the cache, the transaction
//! buffer and the [`SerializerRegistry`](crate::SerializerRegistry) use to
//! tell values apart.
//!
//! Two keys with the same name and different descriptors are distinct keys,
//! but they share one persisted row. Reading a row through the wrong
//! descriptor surfaces as a serialization error.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Explicit identity of a stored value's type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeDescriptor(Cow<'static, str>);

impl TypeDescriptor {
    /// Descriptor derived from the Rust type name of `T`.
    ///
    /// The name is stable within one build, which is all the in-process cache
    /// and codec lookup need. It is never persisted.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(Cow::Borrowed(std::any::type_name::<T>()))
    }

    /// Descriptor with an explicit name.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value that can live in the data store.
///
/// Most types only need an empty impl:
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Profile { name: String, level: u32 }
///
/// impl DataType for Profile {}
/// ```
pub trait DataType: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The descriptor keys of this type carry.
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>()
    }

    /// `self + 1` for numeric types, `None` for everything else.
    fn incremented(&self) -> Option<Self> {
        None
    }
}

macro_rules! impl_integer_data_type {
    ($($ty:ty),* $(,)?) => {
        $(
            impl DataType for $ty {
                fn incremented(&self) -> Option<Self> {
                    Some(self.wrapping_add(1))
                }
            }
        )*
    };
}

impl_integer_data_type!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl DataType for f32 {
    fn incremented(&self) -> Option<Self> {
        Some(self + 1.0)
    }
}

impl DataType for f64 {
    fn incremented(&self) -> Option<Self> {
        Some(self + 1.0)
    }
}

impl DataType for bool {}
impl DataType for String {}
impl<T: DataType> DataType for Vec<T> {}

impl DataType for uuid::Uuid {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::named("uuid")
    }
}

/// A key naming a stored value of type `T`.
pub struct TypedKey<T> {
    name: String,
    descriptor: TypeDescriptor,
    _type: PhantomData<fn() -> T>,
}

impl<T: DataType> TypedKey<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_descriptor(name, T::descriptor())
    }
}

impl<T> TypedKey<T> {
    /// Build a key with an explicit descriptor instead of `T::descriptor()`.
    pub fn with_descriptor(name: impl Into<String>, descriptor: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn erase(&self) -> ErasedKey {
        ErasedKey {
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
        }
    }
}

/// Shorthand for [`TypedKey::new`].
pub fn key<T: DataType>(name: impl Into<String>) -> TypedKey<T> {
    TypedKey::new(name)
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> PartialEq for TypedKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.descriptor == other.descriptor
    }
}

impl<T> Eq for TypedKey<T> {}

impl<T> Hash for TypedKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.descriptor.hash(state);
    }
}

impl<T> fmt::Debug for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedKey")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<T> fmt::Display for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKey<{}>", self.name)
    }
}

/// The `(name, descriptor)` identity of a key with its value type erased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErasedKey {
    pub name: String,
    pub descriptor: TypeDescriptor,
}

impl fmt::Display for ErasedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKey<{}>", self.name)
    }
}

/// A key-name prefix for enumerating stored keys of one type.
pub struct KeyPrefix<T> {
    prefix: String,
    _type: PhantomData<fn() -> T>,
}

impl<T: DataType> KeyPrefix<T> {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            _type: PhantomData,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }

    /// The typed key for a stored name under this prefix.
    pub fn key_for(&self, name: &str) -> TypedKey<T> {
        TypedKey::new(name)
    }
}

impl<T> fmt::Display for KeyPrefix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKeyPrefix<{}>", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_compare_by_name_and_descriptor() {
        let a = key::<i32>("coins");
        let b = key::<i32>("coins");
        let c = key::<String>("coins");

        assert_eq!(a, b);
        assert_ne!(a.erase(), c.erase());

        let set: HashSet<ErasedKey> = [a.erase(), b.erase(), c.erase()].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display_uses_name_only() {
        assert_eq!(key::<u64>("visits").to_string(), "DataKey<visits>");
        assert_eq!(KeyPrefix::<u64>::new("visits.").to_string(), "DataKeyPrefix<visits.>");
    }

    #[test]
    fn test_incremented() {
        assert_eq!(5i32.incremented(), Some(6));
        assert_eq!(u8::MAX.incremented(), Some(0));
        assert_eq!(1.5f64.incremented(), Some(2.5));
        assert_eq!("x".to_string().incremented(), None);
        assert_eq!(true.incremented(), None);
    }

    #[test]
    fn test_uuid_has_explicit_descriptor() {
        assert_eq!(uuid::Uuid::descriptor(), TypeDescriptor::named("uuid"));
        assert_eq!(key::<uuid::Uuid>("owner").descriptor().as_str(), "uuid");
    }

    #[test]
    fn test_prefix_matching() {
        let prefix = KeyPrefix::<u32>::new("player.");
        assert!(prefix.matches("player.kills"));
        assert!(!prefix.matches("guild.kills"));
        assert_eq!(prefix.key_for("player.kills"), key::<u32>("player.kills"));
    }
}
