//! Value codecs and the registry that resolves them.
//!
//! A [`SerializerRegistry`] maps a [`TypeDescriptor`] to a [`Codec`]. It is
//! built once with [`SerializerRegistryBuilder`] and never changes afterwards.
//! Descriptors without a registered codec fall back to [`StructuralCodec`],
//! which encodes the type's derived serde field layout.

mod structural;
mod uuid_codec;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::key::{DataType, TypeDescriptor};
use crate::logging::debug;

pub use self::structural::StructuralCodec;
pub use self::uuid_codec::UuidCodec;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while encoding or decoding a value.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("encode failed: {0}")]
    Encode(#[source] BoxError),

    #[error("decode failed: {0}")]
    Decode(#[source] BoxError),

    #[error("expected {expected} bytes, found {found}")]
    InvalidLength { expected: usize, found: usize },

    #[error("codec registered for `{registered}` cannot handle `{requested}`")]
    CodecTypeMismatch {
        registered: &'static str,
        requested: &'static str,
    },
}

impl SerializationError {
    pub fn encode(err: impl Into<BoxError>) -> Self {
        Self::Encode(err.into())
    }

    pub fn decode(err: impl Into<BoxError>) -> Self {
        Self::Decode(err.into())
    }
}

/// Converts values of `T` to and from bytes.
pub trait Codec<T>: Send + Sync + 'static {
    fn encode(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, SerializationError>;
}

struct RegisteredCodec {
    type_name: &'static str,
    // Always a `Box<dyn Codec<T>>` for the `T` named by `type_name`.
    codec: Box<dyn Any + Send + Sync>,
}

/// The codec resolved for one descriptor.
pub enum ResolvedCodec<'a, T> {
    Registered(&'a dyn Codec<T>),
    Structural(StructuralCodec),
    /// The descriptor has a codec, but for a different Rust type.
    Mismatched { registered: &'static str },
}

impl<T: DataType> ResolvedCodec<'_, T> {
    pub fn encode(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        match self {
            Self::Registered(codec) => codec.encode(value),
            Self::Structural(codec) => codec.encode(value),
            Self::Mismatched { registered } => Err(SerializationError::CodecTypeMismatch {
                registered: *registered,
                requested: std::any::type_name::<T>(),
            }),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        match self {
            Self::Registered(codec) => codec.decode(bytes),
            Self::Structural(codec) => codec.decode(bytes),
            Self::Mismatched { registered } => Err(SerializationError::CodecTypeMismatch {
                registered: *registered,
                requested: std::any::type_name::<T>(),
            }),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Structural(_))
    }
}

/// Immutable descriptor-to-codec table.
pub struct SerializerRegistry {
    codecs: HashMap<TypeDescriptor, RegisteredCodec>,
}

impl SerializerRegistry {
    pub fn builder() -> SerializerRegistryBuilder {
        SerializerRegistryBuilder::default()
    }

    /// A registry with no explicit codecs; everything is structural.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Resolve the codec for `descriptor`, falling back to the structural codec.
    pub fn lookup<T: DataType>(&self, descriptor: &TypeDescriptor) -> ResolvedCodec<'_, T> {
        let Some(entry) = self.codecs.get(descriptor) else {
            return ResolvedCodec::Structural(StructuralCodec);
        };

        match entry.codec.downcast_ref::<Box<dyn Codec<T>>>() {
            Some(codec) => ResolvedCodec::Registered(codec.as_ref()),
            None => ResolvedCodec::Mismatched {
                registered: entry.type_name,
            },
        }
    }

    pub fn encode<T: DataType>(
        &self,
        descriptor: &TypeDescriptor,
        value: &T,
    ) -> Result<Vec<u8>, SerializationError> {
        self.lookup::<T>(descriptor).encode(value)
    }

    pub fn decode<T: DataType>(
        &self,
        descriptor: &TypeDescriptor,
        bytes: &[u8],
    ) -> Result<T, SerializationError> {
        self.lookup::<T>(descriptor).decode(bytes)
    }

    pub fn contains(&self, descriptor: &TypeDescriptor) -> bool {
        self.codecs.contains_key(descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.codecs.keys()
    }
}

impl Default for SerializerRegistry {
    /// The registry with the built-in codecs (currently [`UuidCodec`]).
    fn default() -> Self {
        Self::builder().register::<uuid::Uuid>(UuidCodec).build()
    }
}

impl fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.codecs.iter().map(|(d, c)| (d, c.type_name)))
            .finish()
    }
}

/// Collects codecs before the registry is frozen.
#[derive(Default)]
pub struct SerializerRegistryBuilder {
    codecs: HashMap<TypeDescriptor, RegisteredCodec>,
}

impl SerializerRegistryBuilder {
    /// Register `codec` under `T::descriptor()`.
    pub fn register<T: DataType>(self, codec: impl Codec<T>) -> Self {
        self.register_as::<T>(T::descriptor(), codec)
    }

    /// Register `codec` under an explicit descriptor. A later registration for
    /// the same descriptor replaces the earlier one.
    pub fn register_as<T: DataType>(
        mut self,
        descriptor: TypeDescriptor,
        codec: impl Codec<T>,
    ) -> Self {
        let boxed: Box<dyn Codec<T>> = Box::new(codec);
        self.codecs.insert(
            descriptor,
            RegisteredCodec {
                type_name: std::any::type_name::<T>(),
                codec: Box::new(boxed),
            },
        );
        self
    }

    pub fn build(self) -> SerializerRegistry {
        for (descriptor, entry) in &self.codecs {
            debug!(descriptor = %descriptor, rust_type = entry.type_name, "registered codec");
        }
        SerializerRegistry {
            codecs: self.codecs,
        }
    }
}
