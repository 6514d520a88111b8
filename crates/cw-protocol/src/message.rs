//! Records carried by event payloads and the final stream result.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::event::scalar_to_string;

fn default_source_type() -> String {
    "kb".to_string()
}

/// Accept identifiers sent as either strings or numbers.
fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_to_string(&value)
        .ok_or_else(|| serde::de::Error::custom("expected a string or numeric identifier"))
}

/// One citation-eligible document, numbered by arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineSourceRecord {
    #[serde(deserialize_with = "lenient_id")]
    pub source_id: String,
    #[serde(default, deserialize_with = "lenient_id")]
    pub document_id: String,
    #[serde(default)]
    pub document_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default = "default_source_type")]
    pub source_type: String,
}

impl InlineSourceRecord {
    /// Decode a `message_source` payload.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Free-form document metadata. Only the link fields are typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReferenceMetadata {
    /// `url` takes precedence over `source_url`.
    pub fn link(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.source_url.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDocument {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ReferenceMetadata>,
}

/// The older single-shot reference list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyReferenceSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub documents: Vec<ReferenceDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_parts: Option<Vec<Value>>,
}

impl LegacyReferenceSet {
    /// Decode a `references` payload.
    ///
    /// Accepts both the flat shape and the shape nested one level under a
    /// `references` key. In the nested shape an outer `messageId` fills in
    /// when the inner object has none.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(value)
    }

    pub fn from_value(mut value: Value) -> Result<Self, serde_json::Error> {
        let outer_message_id = value.get("messageId").cloned();
        let nested = value
            .get_mut("references")
            .filter(|v| v.is_object())
            .map(Value::take);
        if let Some(mut inner) = nested {
            if let (Some(id), Some(obj)) = (outer_message_id, inner.as_object_mut()) {
                obj.entry("messageId").or_insert(id);
            }
            value = inner;
        }
        serde_json::from_value(value)
    }
}

/// The final, immutable outcome of one stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResult {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub references: Option<LegacyReferenceSet>,
    /// `None` when no sources arrived.
    #[serde(default)]
    pub sources: Option<Vec<InlineSourceRecord>>,
}

impl StreamResult {
    /// Apply the streamed-result rules to a result decoded in one piece:
    /// repeated `sourceId`s keep their first arrival, and an empty source
    /// list becomes `None`.
    pub fn normalized(mut self) -> Self {
        if let Some(sources) = self.sources.take() {
            let mut kept: Vec<InlineSourceRecord> = Vec::with_capacity(sources.len());
            for source in sources {
                if !kept.iter().any(|s| s.source_id == source.source_id) {
                    kept.push(source);
                }
            }
            self.sources = (!kept.is_empty()).then_some(kept);
        }
        self
    }
}
