use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One typed input, e.g. `{"type": "url", "value": "https://..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputItem {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            kind: "url".into(),
            value: Some(Value::String(url.into())),
            extra: Map::new(),
        }
    }

    /// The string value of a `url` input, if this is one.
    pub fn as_url(&self) -> Option<&str> {
        if self.kind != "url" {
            return None;
        }
        self.value.as_ref().and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

/// `HELLO` payload (both directions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HelloPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HelloPayload {
    pub fn ok() -> Self {
        Self {
            ok: Some(true),
            schemas: vec![super::envelope::MRP_VERSION.to_string()],
            extra: Map::new(),
        }
    }
}

/// Optional caller constraints carried by DISCOVER.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<String>,
    /// Soft token budget; an extension outside the core schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `DISCOVER` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverPayload {
    pub intent: String,
    #[serde(default)]
    pub inputs: Vec<InputItem>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `NEGOTIATE` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NegotiatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Job reference attached to EXECUTE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

/// `EXECUTE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutePayload {
    pub route_id: String,
    #[serde(default)]
    pub inputs: Vec<InputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// First usable `url` input in `inputs`.
pub fn find_url_input(inputs: &[InputItem]) -> Option<&str> {
    inputs.iter().find_map(InputItem::as_url)
}
