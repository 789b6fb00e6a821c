//! Inbound object-created notification.

use serde::{Deserialize, Serialize};

/// Notification fired when a new object lands in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreatedEvent {
    pub source: String,
    #[serde(alias = "detail-type")]
    pub detail_type: String,
    pub detail: ObjectDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDetail {
    pub bucket: String,
    pub object_key: String,
}

impl ObjectCreatedEvent {
    pub fn new(
        source: impl Into<String>,
        detail_type: impl Into<String>,
        bucket: impl Into<String>,
        object_key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            detail_type: detail_type.into(),
            detail: ObjectDetail {
                bucket: bucket.into(),
                object_key: object_key.into(),
            },
        }
    }
}
