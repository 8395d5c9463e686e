//! The transport seam.
//!
//! Everything that actually moves bytes sits behind [`Transport`]. Queries
//! reach it through the `send` moment (see [`transport_send`](crate::behaviors::transport_send));
//! the batch queue calls it directly, once per chunk.

use async_trait::async_trait;
use queryline_types::{HttpRequest, HttpResponse};

use crate::error::TransportError;

/// Sends one request and returns its response.
///
/// A returned `Err` means no usable response exists (network, auth). Non-2xx
/// statuses are responses, not errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
