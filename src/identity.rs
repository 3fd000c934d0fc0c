//! Identity record supplied by the identity provider.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The authenticated principal as described by the identity provider.
///
/// Fields the core does not know about are kept in `extra` and passed through
/// untouched, so the record serializes back to the shape it arrived in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            first_name: None,
            last_name: None,
            username: None,
            photo_url: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Minimal identity for a subject that passed a challenge without a
    /// captured provider record.
    #[must_use]
    pub fn verified_subject(subject_id: &str) -> Self {
        Self::new(subject_id).with_extra("verified", Value::Bool(true))
    }

    /// Build an identity from a flat provider payload.
    ///
    /// Scalar values of the well-known fields are stringified; everything else
    /// lands in `extra` as-is. Returns `None` when `id` is missing.
    #[must_use]
    pub fn from_fields(mut fields: Map<String, Value>) -> Option<Self> {
        let id = fields.remove("id").as_ref().and_then(scalar_to_string)?;
        let mut take = |key: &str| fields.remove(key).as_ref().and_then(scalar_to_string);
        let first_name = take("first_name");
        let last_name = take("last_name");
        let username = take("username");
        let photo_url = take("photo_url");
        Some(Self {
            id,
            first_name,
            last_name,
            username,
            photo_url,
            extra: fields,
        })
    }
}

/// Render a JSON scalar the way it appears on the wire, without quotes.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
