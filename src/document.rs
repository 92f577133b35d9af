//! Document schemas.
//!
//! Backends store a flat [`Fields`] map per document. Each document shape has
//! its own struct here and is checked when it crosses that boundary, so a
//! malformed document fails at decode time with [`Error::Malformed`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Error, Result};
use crate::ident::DocumentIdentity;
use crate::kind::{DataKind, ItemDescriptor, KeyedItem};

/// Raw field map of one stored document.
pub type Fields = serde_json::Map<String, serde_json::Value>;

pub const FIELD_NAMESPACE: &str = "namespace";
pub const FIELD_KEY: &str = "key";
pub const FIELD_VERSION: &str = "version";
pub const FIELD_PAYLOAD: &str = "payload";
pub const FIELD_SYNCHRONIZED_ON: &str = "synchronizedOn";
pub const FIELD_INCLUDED: &str = "included";
pub const FIELD_EXCLUDED: &str = "excluded";

/// A primary-store item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDocument {
    pub namespace: String,
    pub key: String,
    pub version: u64,
    /// Older writers used the field name `item`.
    #[serde(alias = "item")]
    pub payload: String,
}

impl ItemDocument {
    pub fn new(
        ident: &DocumentIdentity,
        kind: &DataKind,
        key: &str,
        item: &ItemDescriptor,
    ) -> Result<Self> {
        let namespace = ident.kind_namespace(kind);
        let payload = String::from_utf8(item.payload.clone()).map_err(|_| Error::PayloadEncoding {
            namespace: namespace.clone(),
            key: key.to_string(),
        })?;
        Ok(Self {
            namespace,
            key: key.to_string(),
            version: item.version,
            payload,
        })
    }

    pub fn into_keyed_item(self) -> KeyedItem {
        KeyedItem {
            key: self.key,
            item: ItemDescriptor {
                version: self.version,
                payload: self.payload.into_bytes(),
            },
        }
    }
}

/// The readiness sentinel. Its presence is all that matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitedDocument {
    pub namespace: String,
    pub key: String,
}

/// Big segment synchronization marker, written by the external sync job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigSegmentMetadataDocument {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    /// Kept raw: sync jobs in other languages may write a double or a
    /// string, which reads as "never synchronized" rather than as corruption.
    #[serde(rename = "synchronizedOn", default)]
    pub synchronized_on: Option<serde_json::Value>,
}

impl BigSegmentMetadataDocument {
    /// Epoch millis of the last synchronization, if the marker is a
    /// positive integer.
    pub fn synchronized_millis(&self) -> Option<u64> {
        self.synchronized_on
            .as_ref()
            .and_then(serde_json::Value::as_i64)
            .filter(|millis| *millis > 0)
            .map(|millis| millis as u64)
    }
}

/// Per-context big segment membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipDocument {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded: Option<Vec<String>>,
}

/// Serializes a document struct into its field map.
pub fn to_fields<T: Serialize>(doc: &T) -> std::result::Result<Fields, ClientError> {
    match serde_json::to_value(doc)? {
        serde_json::Value::Object(fields) => Ok(fields),
        other => Err(ClientError::Codec(format!(
            "document must serialize to an object, got {other}"
        ))),
    }
}

/// Decodes a field map read from document `id`.
pub fn from_fields<T: DeserializeOwned>(id: &str, fields: Fields) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(fields)).map_err(|e| Error::Malformed {
        id: id.to_string(),
        reason: e.to_string(),
    })
}
