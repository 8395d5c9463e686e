//! Aggregate wire envelope.
//!
//! ```text
//! Request:  { requests: [ { id, method, url, headers?, body? }, ... ] }
//! Response: { error?: { code, message, innerError }, responses: [ { id, status, headers?, body? }, ... ], nextLink? }
//! ```
//!
//! Fragment ids are decimal strings of positive integers, unique within one
//! request/response pair.

use serde::{Deserialize, Serialize};

use crate::http::{Headers, Method};

/// One aggregate call grouping several requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateRequest {
    pub requests: Vec<RequestFragment>,
}

impl AggregateRequest {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// One request inside an [`AggregateRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFragment {
    pub id: String,
    pub method: Method,
    /// Address relative to the aggregate endpoint.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Reply to one aggregate call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResponse {
    /// Present when the whole aggregate call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    #[serde(default)]
    pub responses: Vec<ResponseFragment>,
    /// Continuation token.
    #[serde(
        default,
        rename = "nextLink",
        alias = "@odata.nextLink",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_link: Option<String>,
}

/// One response inside an [`AggregateResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFragment {
    pub id: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Top-level failure of an aggregate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(
        default,
        rename = "innerError",
        skip_serializing_if = "Option::is_none"
    )]
    pub inner_error: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_fragment_omits_absent_fields() {
        let fragment = RequestFragment {
            id: "1".into(),
            method: Method::Get,
            url: "/me".into(),
            headers: None,
            body: None,
        };
        let value = serde_json::to_value(&fragment).unwrap();
        assert_eq!(value, json!({"id": "1", "method": "GET", "url": "/me"}));
    }

    #[test]
    fn test_response_parses_error_and_next_link() {
        let raw = json!({
            "error": {"code": "BadRequest", "message": "nope", "innerError": {"date": "x"}},
            "nextLink": "https://example.test/next"
        });
        let response: AggregateResponse = serde_json::from_value(raw).unwrap();

        let error = response.error.unwrap();
        assert_eq!(error.code, "BadRequest");
        assert_eq!(error.inner_error, Some(json!({"date": "x"})));
        assert!(response.responses.is_empty());
        assert_eq!(response.next_link.as_deref(), Some("https://example.test/next"));
    }

    #[test]
    fn test_response_accepts_odata_next_link_alias() {
        let raw = json!({"responses": [], "@odata.nextLink": "token"});
        let response: AggregateResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.next_link.as_deref(), Some("token"));
    }
}
