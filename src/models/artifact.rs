use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a worker produced. The artifact itself lives in external storage;
/// the collector only carries its descriptor through to the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Storage location (object key, path, URI)
    pub location: String,
    pub size_bytes: u64,
    pub collected_at: DateTime<Utc>,
}

impl ArtifactDescriptor {
    pub fn new(location: impl Into<String>, size_bytes: u64, collected_at: DateTime<Utc>) -> Self {
        Self {
            location: location.into(),
            size_bytes,
            collected_at,
        }
    }
}
