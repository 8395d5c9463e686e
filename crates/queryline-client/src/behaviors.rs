//! Stock behaviors for [`Query`](crate::Query) timelines.

use std::sync::Arc;

use queryline_timeline::{Behavior, SubscribeMode, Timeline, TimelineError, async_observer};
use queryline_types::{Headers, HttpRequest, HttpResponse, header_value};
use serde_json::Value;

use crate::error::HttpStatusError;
use crate::query::{AUTH, PARSE, PRE, ParseState, SEND};
use crate::transport::Transport;

pub use queryline_timeline::log_to_tracing;

/// Send through `transport`, replacing any other `send` observer.
pub fn transport_send(transport: Arc<dyn Transport>) -> impl Behavior {
    move |timeline: &mut Timeline| -> Result<(), TimelineError> {
        timeline.subscribe(
            &SEND,
            async_observer(move |_: &Timeline, request: HttpRequest| {
                let transport = transport.clone();
                async move { transport.send(request).await.map_err(TimelineError::from) }
            }),
            SubscribeMode::Replace,
        )?;
        Ok(())
    }
}

/// Parse response bodies as JSON.
///
/// Non-2xx responses fail with [`HttpStatusError`]; 204 and empty bodies
/// parse to `null`.
pub fn json_parse() -> impl Behavior {
    |timeline: &mut Timeline| -> Result<(), TimelineError> {
        timeline.on(
            &PARSE,
            async_observer(|_: &Timeline, mut state: ParseState| async move {
                state.value = Some(parse_json(&state.response)?);
                Ok::<_, TimelineError>(state)
            }),
        )?;
        Ok(())
    }
}

/// Body of `response` as JSON, or the failure `json_parse` reports.
pub fn parse_json(response: &HttpResponse) -> Result<Value, TimelineError> {
    if !response.is_success() {
        return Err(HttpStatusError {
            status: response.status,
            body: response.body.clone(),
        }
        .into());
    }
    match response.body.as_deref().map(str::trim) {
        _ if response.status == 204 => Ok(Value::Null),
        None | Some("") => Ok(Value::Null),
        Some(text) => serde_json::from_str(text).map_err(TimelineError::observer),
    }
}

/// Add `headers` to every request that does not already set them.
pub fn default_headers(headers: Headers) -> impl Behavior {
    let headers = Arc::new(headers);
    move |timeline: &mut Timeline| -> Result<(), TimelineError> {
        timeline.on(
            &PRE,
            async_observer(move |_: &Timeline, mut request: HttpRequest| {
                for (name, value) in headers.iter() {
                    if header_value(&request.init.headers, name).is_none() {
                        request.init.headers.insert(name.clone(), value.clone());
                    }
                }
                async move { Ok(request) }
            }),
        )?;
        Ok(())
    }
}

/// Attach a fixed bearer token during `auth`.
pub fn bearer_token(token: impl Into<String>) -> impl Behavior {
    let value = format!("Bearer {}", token.into());
    move |timeline: &mut Timeline| -> Result<(), TimelineError> {
        timeline.on(
            &AUTH,
            async_observer(move |_: &Timeline, mut request: HttpRequest| {
                request.init = request.init.with_header("Authorization", value.clone());
                async move { Ok(request) }
            }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Query;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use queryline_types::RequestInit;
    use serde_json::json;

    #[derive(Default)]
    struct Echo {
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl crate::Transport for Echo {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().push(request.clone());
            Ok(HttpResponse::json(200, &json!({ "url": request.url })))
        }
    }

    struct Offline;

    #[async_trait]
    impl crate::Transport for Offline {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::Connection("network unreachable".into()))
        }
    }

    #[test]
    fn test_parse_json_statuses() {
        assert_eq!(parse_json(&HttpResponse::new(204)).unwrap(), Value::Null);
        assert_eq!(
            parse_json(&HttpResponse::new(200).with_body("  ")).unwrap(),
            Value::Null
        );
        assert_eq!(
            parse_json(&HttpResponse::new(200).with_body(r#"{"a":1}"#)).unwrap(),
            json!({"a": 1})
        );

        let err = parse_json(&HttpResponse::new(500).with_body("boom")).unwrap_err();
        let status = err.find::<HttpStatusError>().unwrap();
        assert_eq!(status.status, 500);
        assert_eq!(status.body.as_deref(), Some("boom"));

        assert!(parse_json(&HttpResponse::new(200).with_body("{oops")).is_err());
    }

    #[tokio::test]
    async fn test_transport_send_with_default_headers_and_token() {
        let echo = Arc::new(Echo::default());
        let mut query = Query::connected("https://graph.microsoft.com/v1.0/me", echo.clone()).unwrap();
        let mut defaults = Headers::new();
        defaults.insert("Accept".into(), "application/json".into());
        defaults.insert("X-Client".into(), "queryline".into());
        query
            .using(default_headers(defaults))
            .unwrap()
            .using(bearer_token("t0k3n"))
            .unwrap();

        let value = query
            .execute(RequestInit::get().with_header("accept", "text/plain"))
            .await
            .unwrap();
        assert_eq!(value, json!({ "url": "https://graph.microsoft.com/v1.0/me" }));

        let seen = echo.seen.lock();
        let headers = &seen[0].init.headers;
        assert_eq!(header_value(headers, "Accept"), Some("text/plain"));
        assert_eq!(header_value(headers, "X-Client"), Some("queryline"));
        assert_eq!(header_value(headers, "Authorization"), Some("Bearer t0k3n"));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_typed() {
        let query = Query::connected("/me", Arc::new(Offline)).unwrap();
        let err = query.execute(RequestInit::get()).await.unwrap_err();
        assert!(matches!(
            err.find::<TransportError>(),
            Some(TransportError::Connection(_))
        ));
    }
}
