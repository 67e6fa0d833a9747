use serde::{de::DeserializeOwned, Serialize};

use crate::error::SffsResult;

/// Wire format for the on-disk structures.
///
/// The legacy bincode configuration encodes integers fixed-width and
/// little-endian with no padding, so the encoded bytes are exactly the packed
/// field layout the format documents.
pub trait DiskSerialize: Serialize + DeserializeOwned {
    /// Serialize into a [Vec](std::vec::Vec).
    fn serialize(&self) -> SffsResult<Vec<u8>> {
        let config = bincode::config::legacy();
        Ok(bincode::serde::encode_to_vec(self, config)?)
    }

    /// Deserialize from a slice.
    /// # Returns
    /// The deserialized object and the number of bytes read.
    fn deserialize(buf: &[u8]) -> SffsResult<(Self, usize)> {
        let config = bincode::config::legacy();
        Ok(bincode::serde::decode_from_slice(buf, config)?)
    }
}
