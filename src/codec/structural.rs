//! Fallback codec for types without a registered codec.

use bincode::Options;

use super::{Codec, SerializationError};
use crate::key::DataType;

/// Encodes a value through its serde field layout using fixed-width bincode.
///
/// Trailing bytes are rejected on decode, so reading a row through a
/// narrower type fails instead of silently truncating.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralCodec;

impl StructuralCodec {
    fn options() -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_big_endian()
            .reject_trailing_bytes()
    }
}

impl<T: DataType> Codec<T> for StructuralCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        Self::options()
            .serialize(value)
            .map_err(SerializationError::encode)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        Self::options()
            .deserialize(bytes)
            .map_err(SerializationError::decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Home {
        world: String,
        x: i64,
        y: i64,
        z: i64,
        tags: Vec<String>,
    }

    impl DataType for Home {}

    #[test]
    fn test_struct_roundtrip() -> Result<(), SerializationError> {
        let home = Home {
            world: "overworld".into(),
            x: -12,
            y: 64,
            z: 900,
            tags: vec!["spawn".into()],
        };
        let bytes = StructuralCodec.encode(&home)?;
        let decoded: Home = StructuralCodec.decode(&bytes)?;
        assert_eq!(decoded, home);
        Ok(())
    }

    #[test]
    fn test_decode_with_wrong_type_fails() -> Result<(), SerializationError> {
        let bytes = Codec::<String>::encode(&StructuralCodec, &"hello world".to_string())?;
        let result: Result<u32, _> = StructuralCodec.decode(&bytes);
        assert!(matches!(result, Err(SerializationError::Decode(_))));
        Ok(())
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<Home, _> = StructuralCodec.decode(&[0xff, 0x01]);
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_strings_roundtrip(s in ".*") {
            let bytes = StructuralCodec.encode(&s).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let decoded: String = StructuralCodec.decode(&bytes).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(decoded, s);
        }

        #[test]
        fn prop_i64_vectors_roundtrip(v in proptest::collection::vec(any::<i64>(), 0..32)) {
            let bytes = StructuralCodec.encode(&v).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let decoded: Vec<i64> = StructuralCodec.decode(&bytes).map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(decoded, v);
        }
    }
}
