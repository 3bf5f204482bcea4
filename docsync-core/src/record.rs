//! Wire shape of remote document records.
//!
//! A record is stored as a field map:
//! ```text
//! { "text": string, "rev": integer, "updatedAt": server timestamp }
//! ```
//! Remote data is not trusted to match this shape. Decoding never fails:
//! a missing or non-string `text` marks the record as metadata-only, and a
//! missing, negative or non-numeric `rev` is read as 0.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mode::WritingMode;
use crate::store::{Fields, StoreError};

pub const TEXT_FIELD: &str = "text";
pub const REVISION_FIELD: &str = "rev";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Key of the placeholder object that stores replace with their clock.
const SERVER_TIMESTAMP_KEY: &str = "$serverTimestamp";

/// A fully-formed document record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub text: String,
    #[serde(rename = "rev")]
    pub revision: u64,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl DocumentRecord {
    /// Builds the fields for a conditioned write. `updatedAt` is left as a
    /// server timestamp placeholder.
    pub fn write_fields(text: &str, revision: u64) -> Fields {
        let mut fields = Fields::new();
        fields.insert(TEXT_FIELD.to_string(), Value::String(text.to_string()));
        fields.insert(REVISION_FIELD.to_string(), Value::from(revision));
        fields.insert(UPDATED_AT_FIELD.to_string(), server_timestamp());
        fields
    }
}

/// A remote record as seen by the coordinator, after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument {
    /// `None` when the payload carries no string text
    pub text: Option<String>,
    pub revision: u64,
}

impl RemoteDocument {
    /// True if there is string text and it is not empty.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Decodes a possibly-absent, possibly-malformed record.
pub fn decode_record(fields: Option<&Fields>) -> RemoteDocument {
    let Some(fields) = fields else {
        return RemoteDocument {
            text: None,
            revision: 0,
        };
    };

    let text = fields
        .get(TEXT_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string);

    RemoteDocument {
        text,
        revision: normalize_revision(fields.get(REVISION_FIELD)),
    }
}

/// Reads a revision field, defaulting anything unusable to 0.
pub fn normalize_revision(value: Option<&Value>) -> u64 {
    match value {
        None => 0,
        Some(Value::Number(n)) => {
            if let Some(rev) = n.as_u64() {
                rev
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f >= 0.0 => f.trunc() as u64,
                    _ => {
                        tracing::warn!("negative revision {} normalized to 0", n);
                        0
                    }
                }
            }
        }
        Some(other) => {
            tracing::warn!("non-numeric revision {} normalized to 0", other);
            0
        }
    }
}

/// Placeholder resolved to the store's clock at commit time.
pub fn server_timestamp() -> Value {
    let mut marker = serde_json::Map::new();
    marker.insert(SERVER_TIMESTAMP_KEY.to_string(), Value::Bool(true));
    Value::Object(marker)
}

fn is_server_timestamp(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1 && map.get(SERVER_TIMESTAMP_KEY) == Some(&Value::Bool(true)))
}

/// Replaces every top-level placeholder with the current UTC time.
pub fn resolve_server_timestamps(fields: &mut Fields) {
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    for value in fields.values_mut() {
        if is_server_timestamp(value) {
            *value = Value::String(now.clone());
        }
    }
}

/// Path of a mode's document: `users/{userId}/doc/{mode}`.
pub fn document_path(user_id: &str, mode: WritingMode) -> Result<String, StoreError> {
    validate_user_id(user_id)?;
    Ok(format!("users/{}/doc/{}", user_id, mode.as_str()))
}

/// Path of the account root: `users/{userId}`.
pub fn account_path(user_id: &str) -> Result<String, StoreError> {
    validate_user_id(user_id)?;
    Ok(format!("users/{}", user_id))
}

/// Rejects ids that would escape their path segment.
pub fn validate_user_id(user_id: &str) -> Result<(), StoreError> {
    if user_id.is_empty()
        || user_id.contains('/')
        || user_id.contains('\\')
        || user_id.contains("..")
        || user_id.starts_with('.')
    {
        return Err(StoreError::InvalidPath(user_id.to_string()));
    }
    Ok(())
}
