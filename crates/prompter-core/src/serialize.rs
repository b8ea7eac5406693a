use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;

/// Blob codec used by context storages for history values and the
/// framework-data/misc blobs in main-info.
///
/// JSON is the default: stored values stay self-describing and inspectable
/// with ordinary database tooling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serializer {
    #[default]
    Json,
}

impl Serializer {
    pub fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn loads<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}
