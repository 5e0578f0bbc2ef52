//! Bincode helpers used for every stored or hashed byte encoding.

use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

/// Encode with bincode's standard configuration. Field order is the struct
/// declaration order, so the encoding is stable across runs.
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Decode bytes previously produced by [`serialize`].
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct Sample {
        id: u64,
        tag: String,
        payload: Vec<u8>,
    }

    #[test]
    fn round_trip() {
        let original = Sample {
            id: 7,
            tag: "utxo".to_string(),
            payload: vec![1, 2, 3],
        };

        let bytes = serialize(&original).unwrap();
        let decoded: Sample = deserialize(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn garbage_is_an_error() {
        let result: Result<Sample> = deserialize(&[0xff, 0xff, 0xff, 0xff]);
        assert!(result.is_err());
    }
}
