use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ReconError, Result};
use crate::hash::{content_hash, parse_attributes, ContentHash};

/// An entity row exactly as the source store holds it; attributes are still
/// the raw stored text.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceEntity {
    pub id: String,
    pub kind: String,
    pub label: String,
    #[serde(default)]
    pub attributes_json: Option<String>,
    /// Set when the stored payload could not be decoded as text at all
    /// (a BLOB, invalid UTF-8); `parse` then reports the row as malformed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undecodable: Option<String>,
}

impl SourceEntity {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        label: impl Into<String>,
        attributes: Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            label: label.into(),
            attributes_json: Some(attributes.to_string()),
            undecodable: None,
        }
    }

    /// Parses and fingerprints the row. Fails with `MalformedAttributes` when
    /// the payload cannot be canonicalized.
    pub fn parse(&self) -> Result<Entity> {
        let malformed = |reason: String| ReconError::MalformedAttributes {
            entity_id: self.id.clone(),
            reason,
        };
        if let Some(reason) = &self.undecodable {
            return Err(malformed(reason.clone()));
        }
        let attributes =
            parse_attributes(self.attributes_json.as_deref()).map_err(|e| malformed(e.to_string()))?;
        let hash = content_hash(&self.kind, &self.label, &attributes)
            .map_err(|e| malformed(e.to_string()))?;
        Ok(Entity {
            id: self.id.clone(),
            kind: self.kind.clone(),
            label: self.label.clone(),
            attributes,
            hash,
        })
    }
}

/// A parsed source entity with canonical attributes and its content hash.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Entity {
    pub id: String,
    pub kind: String,
    pub label: String,
    pub attributes: Map<String, Value>,
    pub hash: ContentHash,
}
