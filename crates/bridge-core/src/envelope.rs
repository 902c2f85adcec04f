//! Envelope shapes exchanged between the host and the embedded page

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ProviderError;

/// Network label carried on every rpc context and event
pub const SOLANA_NETWORK: &str = "solana";

/// Request methods understood by the host channel adapter
pub const LOG_METHOD: &str = "log";
pub const POST_PAGE_INFO_METHOD: &str = "post_page_info";
pub const RPC_REQUEST_METHOD: &str = "rpc_request";

/// Fields covered by the request signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedRequest {
    pub id: Uuid,
    pub method: String,
    pub context: Value,
}

impl UnsignedRequest {
    pub fn new(method: impl Into<String>, context: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            context,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedRequest {
    #[serde(flatten)]
    pub request: UnsignedRequest,
    /// Hex encoded HMAC-SHA256 over the unsigned request
    pub signature: String,
}

impl SignedRequest {
    pub fn id(&self) -> Uuid {
        self.request.id
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn context(&self) -> &Value {
        &self.request.context
    }
}

/// Reply to exactly one prior request, matched by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Response {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderError>,
}

impl Response {
    pub fn success(id: Uuid, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn empty(id: Uuid) -> Self {
        Self {
            id,
            result: None,
            error: None,
        }
    }

    pub fn failure(id: Uuid, error: ProviderError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Collapse into the outcome the page-side caller sees
    pub fn into_result(self) -> Result<Value, ProviderError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Unsolicited host to page notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub network: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            network: SOLANA_NETWORK.to_string(),
            name: name.into(),
            args,
        }
    }

    pub fn connect(address: &str) -> Self {
        Self::new("connect", vec![Value::String(address.to_string())])
    }

    pub fn disconnect() -> Self {
        Self::new("disconnect", Vec::new())
    }
}

/// One wire message. Variant order matters for untagged decoding: a signed
/// request is tried first, responses reject unknown fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Request(SignedRequest),
    Event(Event),
    Response(Response),
}

impl From<SignedRequest> for Envelope {
    fn from(value: SignedRequest) -> Self {
        Envelope::Request(value)
    }
}

impl From<Response> for Envelope {
    fn from(value: Response) -> Self {
        Envelope::Response(value)
    }
}

impl From<Event> for Envelope {
    fn from(value: Event) -> Self {
        Envelope::Event(value)
    }
}

/// Page metadata pushed with `post_page_info`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
}
