//! Field-level comparison of an entity's last reviewed content and its
//! current source content.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::drift::DriftStatus;
use crate::hash::{canonical_eq, ContentHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ChangeKind::Added => "ADDED",
            ChangeKind::Removed => "REMOVED",
            ChangeKind::Modified => "MODIFIED",
        };
        f.pad(label)
    }
}

/// One changed attribute. `field` is a dot-separated path into nested
/// objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDelta {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    pub change_kind: ChangeKind,
}

impl FieldDelta {
    fn added(field: String, value: &Value) -> Self {
        Self {
            field,
            old_value: None,
            new_value: Some(value.clone()),
            change_kind: ChangeKind::Added,
        }
    }

    fn removed(field: String, value: &Value) -> Self {
        Self {
            field,
            old_value: Some(value.clone()),
            new_value: None,
            change_kind: ChangeKind::Removed,
        }
    }
}

/// Compares two attribute maps. Nested objects recurse; arrays and scalars
/// compare as whole values under canonical equality. Sorted by field path.
pub fn diff_attributes(old: &Map<String, Value>, new: &Map<String, Value>) -> Vec<FieldDelta> {
    let mut out = Vec::new();
    diff_objects("", old, new, &mut out);
    out.sort_by(|a, b| a.field.cmp(&b.field));
    out
}

fn diff_objects(prefix: &str, old: &Map<String, Value>, new: &Map<String, Value>, out: &mut Vec<FieldDelta>) {
    let path = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    for (key, old_value) in old {
        match new.get(key) {
            None => out.push(FieldDelta::removed(path(key), old_value)),
            Some(new_value) => match (old_value, new_value) {
                (Value::Object(o), Value::Object(n)) => diff_objects(&path(key), o, n, out),
                _ if canonical_eq(old_value, new_value) => {}
                _ => out.push(FieldDelta {
                    field: path(key),
                    old_value: Some(old_value.clone()),
                    new_value: Some(new_value.clone()),
                    change_kind: ChangeKind::Modified,
                }),
            },
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            out.push(FieldDelta::added(path(key), new_value));
        }
    }
}

/// Change of a scalar entity property such as the label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChange {
    pub old: String,
    pub new: String,
}

impl TextChange {
    pub(crate) fn between(old: Option<&str>, new: Option<&str>) -> Option<Self> {
        match (old, new) {
            (Some(old), Some(new)) if old != new => Some(Self {
                old: old.to_string(),
                new: new.to_string(),
            }),
            _ => None,
        }
    }
}

/// Everything a reviewer sees for one entity: status, both hashes, property
/// changes and attribute deltas.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntityDiff {
    pub entity_id: String,
    /// None when the entity is unchanged and would not appear in drift.
    pub status: Option<DriftStatus>,
    pub kind: String,
    pub label: String,
    pub previous_hash: Option<ContentHash>,
    pub current_hash: Option<ContentHash>,
    /// Revision to pass back as `expected_revision` when adjudicating.
    pub ledger_revision: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind_change: Option<TextChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_change: Option<TextChange>,
    pub deltas: Vec<FieldDelta>,
}

impl EntityDiff {
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.kind_change.is_none() && self.label_change.is_none()
    }
}
