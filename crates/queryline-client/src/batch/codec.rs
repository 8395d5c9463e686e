//! Aggregate envelope encoding and decoding.
//!
//! Fragment ids are positional: the operation at chunk position `i` is sent
//! as id `i + 1`, and a response fragment with id `n` belongs to position
//! `n - 1` no matter where it appears in the response.

use std::sync::LazyLock;

use queryline_types::{
    AggregateRequest, AggregateResponse, BatchId, Headers, HttpRequest, HttpResponse,
    RequestFragment, ResponseFragment,
};
use regex::Regex;
use serde_json::Value;

use crate::error::BatchError;

/// Scheme/host and API version prefix of an absolute or rooted address.
static ADDRESS_PREFIX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(?:(?i)[a-z][a-z0-9+.\-]*://[^/?#]*)?/*(?:(?i)(?:v1\.0|beta)(?:/|$))?").ok()
});

/// Successful outcome of one batched request.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemResponse {
    /// 204: success without a payload.
    Empty { headers: Headers },
    /// Any other 2xx.
    Content {
        status: u16,
        headers: Headers,
        body: Value,
    },
}

impl ItemResponse {
    pub fn status(&self) -> u16 {
        match self {
            ItemResponse::Empty { .. } => 204,
            ItemResponse::Content { status, .. } => *status,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ItemResponse::Empty { .. })
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            ItemResponse::Empty { .. } => None,
            ItemResponse::Content { body, .. } => Some(body),
        }
    }

    /// Rebuild the response the request would have received on its own.
    pub fn into_http(self) -> HttpResponse {
        match self {
            ItemResponse::Empty { headers } => HttpResponse {
                status: 204,
                headers,
                body: None,
            },
            ItemResponse::Content {
                status,
                headers,
                body,
            } => HttpResponse {
                status,
                headers,
                body: Some(body.to_string()),
            },
        }
    }
}

/// Decoded aggregate response, positioned to match the request chunk.
#[derive(Debug)]
pub struct DecodedBatch {
    /// One slot per chunk position; `None` where the server sent no fragment.
    pub results: Vec<Option<Result<ItemResponse, BatchError>>>,
    /// Continuation token, if the server paged the response.
    pub continuation: Option<String>,
}

/// Rewrite `url` relative to the aggregate endpoint.
///
/// Drops scheme and host, then a leading `v1.0` or `beta` segment:
/// `https://graph.microsoft.com/v1.0/me/drive?x=1` becomes `/me/drive?x=1`.
pub fn relative_url(url: &str) -> String {
    let rest = match ADDRESS_PREFIX.as_ref().and_then(|re| re.find(url)) {
        Some(prefix) => &url[prefix.end()..],
        None => url.trim_start_matches('/'),
    };
    format!("/{rest}")
}

/// Build the aggregate request for one chunk.
pub fn encode<'a>(
    batch: BatchId,
    requests: impl IntoIterator<Item = &'a HttpRequest>,
) -> Result<AggregateRequest, BatchError> {
    let requests = requests
        .into_iter()
        .enumerate()
        .map(|(position, request)| fragment((position + 1).to_string(), request))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::trace!(batch = %batch, size = requests.len(), "encoded aggregate request");
    Ok(AggregateRequest { requests })
}

fn fragment(id: String, request: &HttpRequest) -> Result<RequestFragment, BatchError> {
    let method = request.method();
    let mut headers = request.init.headers.clone();
    if !method.is_retrieval() {
        headers.retain(|name, _| !name.eq_ignore_ascii_case("content-type"));
        headers.insert("Content-Type".to_string(), "application/json".to_string());
    }

    let body = match request.init.body.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(text) => Some(serde_json::from_str::<Value>(text).map_err(|e| {
            BatchError::InvalidBody {
                id: id.clone(),
                reason: e.to_string(),
            }
        })?),
    };

    Ok(RequestFragment {
        url: relative_url(&request.url),
        method,
        headers: (!headers.is_empty()).then_some(headers),
        body,
        id,
    })
}

/// Serialize an aggregate request for transmission.
pub fn to_body(aggregate: &AggregateRequest) -> Result<String, BatchError> {
    serde_json::to_string(aggregate).map_err(|e| BatchError::Encode(e.to_string()))
}

/// Decode a raw aggregate response for a chunk of `expected` requests.
///
/// Fails as a whole on unparsable input or a top-level error object.
/// Fragments whose id does not name a chunk position are skipped; the first
/// fragment for a position wins.
pub fn decode(raw: &str, expected: usize) -> Result<DecodedBatch, BatchError> {
    let response: AggregateResponse =
        serde_json::from_str(raw).map_err(|e| BatchError::MalformedResponse(e.to_string()))?;

    if let Some(error) = response.error {
        return Err(BatchError::BatchProcessing {
            code: error.code,
            message: error.message,
        });
    }

    let mut results: Vec<Option<Result<ItemResponse, BatchError>>> =
        std::iter::repeat_with(|| None).take(expected).collect();

    for fragment in response.responses {
        let position = match fragment.id.trim().parse::<usize>() {
            Ok(n) if (1..=expected).contains(&n) => n - 1,
            _ => {
                tracing::warn!(id = %fragment.id, expected, "ignoring response fragment with unknown id");
                continue;
            }
        };
        if results[position].is_some() {
            tracing::warn!(id = %fragment.id, "ignoring duplicate response fragment");
            continue;
        }
        results[position] = Some(item_result(fragment));
    }

    Ok(DecodedBatch {
        results,
        continuation: response.next_link,
    })
}

fn item_result(fragment: ResponseFragment) -> Result<ItemResponse, BatchError> {
    let headers = fragment.headers.unwrap_or_default();
    match fragment.status {
        204 => Ok(ItemResponse::Empty { headers }),
        status @ 200..=299 => Ok(ItemResponse::Content {
            status,
            headers,
            body: fragment.body.unwrap_or(Value::Null),
        }),
        status => Err(BatchError::Item {
            id: fragment.id,
            status,
            body: fragment.body,
        }),
    }
}
