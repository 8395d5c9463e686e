//! The request pipeline.
//!
//! A [`Query`] is a timeline over these moments, fired in order by
//! [`Query::execute`]:
//!
//! ```text
//!   init ─▶ pre ─▶ auth ─▶ send ─▶ parse ─▶ post ─▶ data
//!                                                      └─▶ dispose (always)
//! ```
//!
//! | Moment    | Dispatch       | Observer receives → returns              |
//! |-----------|----------------|------------------------------------------|
//! | `init`    | broadcast      | `()` → `Result<()>`                      |
//! | `pre`     | async reduce   | `HttpRequest` → future of `HttpRequest`  |
//! | `auth`    | async reduce   | `HttpRequest` → future of `HttpRequest`  |
//! | `send`    | first          | `HttpRequest` → future of `HttpResponse` |
//! | `parse`   | async reduce   | `ParseState` → future of `ParseState`    |
//! | `post`    | async reduce   | `Value` → future of `Value`              |
//! | `data`    | broadcast      | `Value` → `Result<()>`                   |
//! | `dispose` | broadcast      | `()` → `Result<()>`                      |
//!
//! `send` has no default observer: apply a behavior such as
//! [`transport_send`](crate::behaviors::transport_send) or register the query
//! with a [`BatchQueue`](crate::BatchQueue).

use std::sync::{Arc, LazyLock};

use queryline_timeline::{
    Behavior, LogLevel, Moment, MomentFuture, MomentSet, Timeline, TimelineError, async_reduce,
    broadcast, first,
};
use queryline_types::{HttpRequest, HttpResponse, RequestInit};
use serde_json::Value;

use crate::batch::BatchGate;
use crate::behaviors::{json_parse, transport_send};
use crate::error::QueryError;
use crate::transport::Transport;

/// What `parse` observers thread through: the exchange plus the value parsed so far.
#[derive(Debug, Clone)]
pub struct ParseState {
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub value: Option<Value>,
}

pub const INIT: Moment<(), Result<(), TimelineError>, Option<()>> = Moment::new("init", broadcast);
pub const PRE: Moment<HttpRequest, MomentFuture<HttpRequest>, MomentFuture<HttpRequest>> =
    Moment::new("pre", async_reduce);
pub const AUTH: Moment<HttpRequest, MomentFuture<HttpRequest>, MomentFuture<HttpRequest>> =
    Moment::new("auth", async_reduce);
pub const SEND: Moment<HttpRequest, MomentFuture<HttpResponse>, MomentFuture<HttpResponse>> =
    Moment::new("send", first);
pub const PARSE: Moment<ParseState, MomentFuture<ParseState>, MomentFuture<ParseState>> =
    Moment::new("parse", async_reduce);
pub const POST: Moment<Value, MomentFuture<Value>, MomentFuture<Value>> =
    Moment::new("post", async_reduce);
pub const DATA: Moment<Value, Result<(), TimelineError>, Option<()>> = Moment::new("data", broadcast);
pub const DISPOSE: Moment<(), Result<(), TimelineError>, Option<()>> =
    Moment::new("dispose", broadcast);

static MOMENTS: LazyLock<Arc<MomentSet>> = LazyLock::new(|| {
    MomentSet::builder("query")
        .declare(&INIT)
        .declare(&PRE)
        .declare(&AUTH)
        .declare(&SEND)
        .declare(&PARSE)
        .declare(&POST)
        .declare(&DATA)
        .declare(&DISPOSE)
        .build()
});

/// One request pipeline bound to a target address.
#[derive(Debug)]
pub struct Query {
    url: String,
    timeline: Timeline,
    /// Batch this query was registered with, if any.
    gate: Option<BatchGate>,
}

impl Query {
    /// A query with no observers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeline: Timeline::new(Self::moments()),
            gate: None,
        }
    }

    /// A query that sends through `transport` and parses JSON responses.
    pub fn connected(
        url: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TimelineError> {
        let mut query = Self::new(url);
        query.using(transport_send(transport))?.using(json_parse())?;
        Ok(query)
    }

    /// The moment set shared by every query.
    pub fn moments() -> Arc<MomentSet> {
        MOMENTS.clone()
    }

    /// A query for `url` inheriting this one's observers until it changes its own.
    pub fn child(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeline: self.timeline.inherit(),
            gate: self.gate.clone(),
        }
    }

    pub(crate) fn set_gate(&mut self, gate: BatchGate) {
        self.gate = Some(gate);
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    /// Apply a behavior to this query's timeline.
    pub fn using(&mut self, behavior: impl Behavior) -> Result<&mut Self, TimelineError> {
        self.timeline.using(behavior)?;
        Ok(self)
    }

    /// Run the pipeline once and return the post-processed value.
    ///
    /// `dispose` fires whether or not the run succeeded. A dispose failure is
    /// reported only when the run itself succeeded.
    pub async fn execute(&self, init: RequestInit) -> Result<Value, QueryError> {
        let result = self.run(init).await;
        let disposed = self.timeline.emit(&DISPOSE, ());
        match (result, disposed) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err.into()),
            (Ok(value), Ok(_)) => Ok(value),
        }
    }

    async fn run(&self, init: RequestInit) -> Result<Value, QueryError> {
        let tl = &self.timeline;
        // Holds a linked batch's flush back until `send` has been dispatched
        let marker = self.gate.as_ref().and_then(BatchGate::raise);

        tl.emit(&INIT, ())?.ok_or(halted(&INIT))?;

        let request = HttpRequest::new(self.url.clone(), init);
        let request = tl.emit_async(&PRE, request).await?.ok_or(halted(&PRE))?;
        let request = tl.emit_async(&AUTH, request).await?.ok_or(halted(&AUTH))?;

        tl.log(format!("{} {}", request.method(), request.url), LogLevel::Verbose);
        let sending = tl.emit(&SEND, request.clone())?.ok_or(halted(&SEND))?;
        drop(marker);
        let response = tl.resolve(&SEND, sending).await?.ok_or(halted(&SEND))?;
        tl.log(
            format!("{} {} -> {}", request.method(), request.url, response.status),
            LogLevel::Verbose,
        );

        let state = ParseState {
            request,
            response,
            value: None,
        };
        let state = tl.emit_async(&PARSE, state).await?.ok_or(halted(&PARSE))?;
        let value = state.value.unwrap_or(Value::Null);

        let value = tl.emit_async(&POST, value).await?.ok_or(halted(&POST))?;
        tl.emit(&DATA, value.clone())?.ok_or(halted(&DATA))?;
        Ok(value)
    }
}

fn halted<A, R, Out>(moment: &Moment<A, R, Out>) -> QueryError {
    QueryError::Halted {
        moment: moment.name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use queryline_timeline::{ERROR, SubscribeMode, async_observer, observer};
    use serde_json::json;

    fn canned(status: u16, body: Value) -> queryline_timeline::AsyncObserver<HttpRequest, HttpResponse> {
        async_observer(move |_: &Timeline, _: HttpRequest| {
            let response = HttpResponse::json(status, &body);
            async move { Ok(response) }
        })
    }

    fn stubbed(url: &str, status: u16, body: Value) -> Query {
        let mut query = Query::new(url);
        query
            .using(json_parse())
            .unwrap()
            .timeline_mut()
            .on(&SEND, canned(status, body))
            .unwrap();
        query
    }

    #[tokio::test]
    async fn test_execute_fires_moments_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut query = stubbed("/me", 200, json!({"id": 1}));
        let tl = query.timeline_mut();

        let o = order.clone();
        tl.on(&INIT, observer(move |_: &Timeline, ()| {
            o.lock().push("init");
            Ok(())
        }))
        .unwrap();
        let o = order.clone();
        tl.on(&PRE, async_observer(move |_: &Timeline, request: HttpRequest| {
            o.lock().push("pre");
            async move { Ok(request) }
        }))
        .unwrap();
        let o = order.clone();
        tl.on(&AUTH, async_observer(move |_: &Timeline, request: HttpRequest| {
            o.lock().push("auth");
            async move { Ok(request) }
        }))
        .unwrap();
        let o = order.clone();
        tl.on(&POST, async_observer(move |_: &Timeline, value: Value| {
            o.lock().push("post");
            async move { Ok(value) }
        }))
        .unwrap();
        let o = order.clone();
        tl.on(&DATA, observer(move |_: &Timeline, _: Value| {
            o.lock().push("data");
            Ok(())
        }))
        .unwrap();
        let o = order.clone();
        tl.on(&DISPOSE, observer(move |_: &Timeline, ()| {
            o.lock().push("dispose");
            Ok(())
        }))
        .unwrap();

        let value = query.execute(RequestInit::get()).await.unwrap();
        assert_eq!(value, json!({"id": 1}));
        assert_eq!(
            *order.lock(),
            vec!["init", "pre", "auth", "post", "data", "dispose"]
        );
    }

    #[tokio::test]
    async fn test_pre_and_post_transform_in_order() {
        let seen_url = Arc::new(Mutex::new(String::new()));
        let mut query = Query::new("/me");
        let tl = query.timeline_mut();

        tl.on(&PRE, async_observer(|_: &Timeline, mut request: HttpRequest| async move {
            request.url.push_str("?$select=id");
            Ok(request)
        }))
        .unwrap();
        let seen = seen_url.clone();
        tl.on(&SEND, async_observer(move |_: &Timeline, request: HttpRequest| {
            *seen.lock() = request.url.clone();
            async move { Ok(HttpResponse::json(200, &json!(2))) }
        }))
        .unwrap();
        tl.using(json_parse()).unwrap();
        tl.on(&POST, async_observer(|_: &Timeline, value: Value| async move {
            Ok(json!(value.as_i64().unwrap_or_default() * 10))
        }))
        .unwrap();

        assert_eq!(query.execute(RequestInit::get()).await.unwrap(), json!(20));
        assert_eq!(*seen_url.lock(), "/me?$select=id");
    }

    #[tokio::test]
    async fn test_child_inherits_until_it_diverges() {
        let parent = stubbed("/me", 200, json!("parent"));
        let mut child = parent.child("/me/drive");

        assert_eq!(child.execute(RequestInit::get()).await.unwrap(), json!("parent"));

        child
            .timeline_mut()
            .subscribe(&SEND, canned(200, json!("child")), SubscribeMode::Replace)
            .unwrap();
        assert_eq!(child.execute(RequestInit::get()).await.unwrap(), json!("child"));
        assert_eq!(parent.execute(RequestInit::get()).await.unwrap(), json!("parent"));
    }

    #[tokio::test]
    async fn test_missing_send_is_unhandled() {
        let query = Query::new("/me");
        let err = query.execute(RequestInit::get()).await.unwrap_err();
        match err {
            QueryError::Timeline(err) => {
                assert!(err.is_unhandled());
            }
            other => panic!("expected unhandled timeline error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handled_failure_halts_and_still_disposes() {
        let disposed = Arc::new(Mutex::new(false));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let mut query = stubbed("/missing", 404, json!({"error": "nope"}));
        let tl = query.timeline_mut();

        let r = reported.clone();
        tl.on(&ERROR, observer(move |_: &Timeline, err: Arc<TimelineError>| {
            r.lock().push(err.to_string());
            Ok(())
        }))
        .unwrap();
        let d = disposed.clone();
        tl.on(&DISPOSE, observer(move |_: &Timeline, ()| {
            *d.lock() = true;
            Ok(())
        }))
        .unwrap();

        let err = query.execute(RequestInit::get()).await.unwrap_err();
        assert!(matches!(err, QueryError::Halted { moment: "parse" }));
        assert!(*disposed.lock());
        assert_eq!(*reported.lock(), vec!["request failed with status 404"]);
    }

    #[tokio::test]
    async fn test_unhandled_http_status_is_findable() {
        let query = stubbed("/missing", 404, json!({}));
        let err = query.execute(RequestInit::get()).await.unwrap_err();
        let status = err.find::<crate::HttpStatusError>().unwrap();
        assert_eq!(status.status, 404);
    }
}
