//! HTTP-shaped values that flow through a request pipeline.
//!
//! These are plain data: the transport that actually moves bytes lives behind
//! the `Transport` seam in `queryline-client`.

use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Header map, insertion ordered. Lookups through [`header_value`] ignore case.
pub type Headers = IndexMap<String, String>;

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// HTTP verb of an outbound request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// Whether this is a read-only retrieval (`GET`).
    pub fn is_retrieval(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transmission parameters of one request: method, headers, optional body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInit {
    pub method: Method,
    pub headers: Headers,
    /// Serialized body, usually JSON text.
    pub body: Option<String>,
}

impl RequestInit {
    /// A bodiless request with the given method.
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: Headers::new(),
            body: None,
        }
    }

    /// A `GET` request.
    pub fn get() -> Self {
        Self::new(Method::Get)
    }

    /// A `POST` request carrying `body`.
    pub fn post(body: impl Into<String>) -> Self {
        Self::new(Method::Post).with_body(body)
    }

    /// A `PATCH` request carrying `body`.
    pub fn patch(body: impl Into<String>) -> Self {
        Self::new(Method::Patch).with_body(body)
    }

    /// A `DELETE` request.
    pub fn delete() -> Self {
        Self::new(Method::Delete)
    }

    /// Set a header, replacing any existing value under the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// An outbound request: target address plus transmission parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub init: RequestInit,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, init: RequestInit) -> Self {
        Self {
            url: url.into(),
            init,
        }
    }

    pub fn method(&self) -> Method {
        self.init.method
    }
}

/// A response as seen by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    /// `None` for bodiless responses such as 204.
    pub body: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: None,
        }
    }

    /// A response with a JSON body and `Content-Type: application/json`.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        let mut headers = Headers::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            status,
            headers,
            body: Some(body.to_string()),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}
