//! Shared fixtures: a transport that records every aggregate call and answers
//! from a scripted handler.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use queryline_client::{Transport, TransportError};
use queryline_types::{AggregateRequest, HttpRequest, HttpResponse};
use serde_json::{Value, json};

type Handler =
    Box<dyn Fn(usize, &AggregateRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

pub struct Recorder {
    sent: Mutex<Vec<(HttpRequest, AggregateRequest)>>,
    handler: Handler,
}

impl Recorder {
    /// Answer call `n` (zero-based) with `handler(n, aggregate)`.
    pub fn new(
        handler: impl Fn(usize, &AggregateRequest) -> Result<HttpResponse, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        })
    }

    /// 200 for every fragment, body `{ "url": <fragment url> }`, in reverse order.
    pub fn echo() -> Arc<Self> {
        Self::new(|_, aggregate| Ok(reply(echo_fragments(aggregate, true))))
    }

    /// Number of aggregate calls made.
    pub fn calls(&self) -> usize {
        self.sent.lock().len()
    }

    /// Fragment count of each aggregate call, in send order.
    pub fn sizes(&self) -> Vec<usize> {
        self.sent.lock().iter().map(|(_, aggregate)| aggregate.len()).collect()
    }

    pub fn aggregate(&self, call: usize) -> AggregateRequest {
        self.sent.lock()[call].1.clone()
    }

    pub fn outer_request(&self, call: usize) -> HttpRequest {
        self.sent.lock()[call].0.clone()
    }
}

#[async_trait]
impl Transport for Recorder {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let aggregate: AggregateRequest =
            serde_json::from_str(request.init.body.as_deref().unwrap_or_default())
                .map_err(|e| TransportError::Other(e.to_string()))?;
        let call = {
            let mut sent = self.sent.lock();
            sent.push((request, aggregate.clone()));
            sent.len() - 1
        };
        (self.handler)(call, &aggregate)
    }
}

/// A transport whose calls never complete.
pub struct Stalled;

#[async_trait]
impl Transport for Stalled {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        std::future::pending().await
    }
}

pub fn echo_fragments(aggregate: &AggregateRequest, reversed: bool) -> Vec<Value> {
    let mut fragments: Vec<Value> = aggregate
        .requests
        .iter()
        .map(|f| json!({ "id": f.id, "status": 200, "body": { "url": f.url } }))
        .collect();
    if reversed {
        fragments.reverse();
    }
    fragments
}

pub fn reply(fragments: Vec<Value>) -> HttpResponse {
    HttpResponse::json(200, &json!({ "responses": fragments }))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
