//! Codec for [`Uuid`] values.

use uuid::Uuid;

use super::{Codec, SerializationError};

const UUID_LEN: usize = 16;

/// Stores a UUID as its most significant 64 bits followed by its least
/// significant 64 bits, both big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCodec;

impl Codec<Uuid> for UuidCodec {
    fn encode(&self, value: &Uuid) -> Result<Vec<u8>, SerializationError> {
        let (most, least) = value.as_u64_pair();
        let mut bytes = Vec::with_capacity(UUID_LEN);
        bytes.extend_from_slice(&most.to_be_bytes());
        bytes.extend_from_slice(&least.to_be_bytes());
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Uuid, SerializationError> {
        let invalid = || SerializationError::InvalidLength {
            expected: UUID_LEN,
            found: bytes.len(),
        };
        if bytes.len() != UUID_LEN {
            return Err(invalid());
        }
        let (most, least) = bytes.split_at(8);
        let most = u64::from_be_bytes(most.try_into().map_err(|_| invalid())?);
        let least = u64::from_be_bytes(least.try_into().map_err(|_| invalid())?);
        Ok(Uuid::from_u64_pair(most, least))
    }
}
