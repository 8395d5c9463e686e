//! Moments: named extension points and their dispatch policies.
//!
//! A [`Moment`] is a typed handle: its name keys the observer registry and its
//! dispatch function decides how the registered observers are driven. Moments
//! are `const`, declared once per pipeline type and collected into a
//! [`MomentSet`].
//!
//! # Dispatch policies
//!
//! - [`broadcast`]: call every observer in order, keep the last result
//! - [`first`]: call only the first observer (request/response moments)
//! - [`async_reduce`]: thread a value through every async observer in order
//! - anything else with the [`Dispatch`] shape, supplied by the pipeline owner
//!
//! ```ignore
//! const FETCH: Moment<HttpRequest, MomentFuture<HttpResponse>, MomentFuture<HttpResponse>> =
//!     Moment::new("fetch", first);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::TimelineError;
use crate::log::LOG;
use crate::registry::ErasedObserver;
use crate::timeline::Timeline;

// ============================================================================
// Observer and dispatch shapes
// ============================================================================

/// An observer: receives the emitting timeline and the moment's arguments.
pub type Observer<A, R> = Arc<dyn Fn(&Timeline, A) -> R + Send + Sync>;

/// Deferred result produced by asynchronous moments.
pub type MomentFuture<T> = BoxFuture<'static, Result<T, TimelineError>>;

/// Observer of an asynchronous moment.
pub type AsyncObserver<A, T> = Observer<A, MomentFuture<T>>;

/// Dispatch function: drives a moment's observers for one invocation.
pub type Dispatch<A, R, Out> =
    fn(&Timeline, &'static str, &[Observer<A, R>], A) -> Result<Out, TimelineError>;

/// Wrap a closure as an [`Observer`].
pub fn observer<A, R, F>(f: F) -> Observer<A, R>
where
    F: Fn(&Timeline, A) -> R + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure returning a future as an [`AsyncObserver`].
///
/// The future must be `'static`; observers that need the timeline after the
/// first await should take [`Timeline::inherit`] before building it.
pub fn async_observer<A, T, F, Fut>(f: F) -> AsyncObserver<A, T>
where
    F: Fn(&Timeline, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, TimelineError>> + Send + 'static,
{
    Arc::new(move |timeline: &Timeline, args: A| f(timeline, args).boxed())
}

// ============================================================================
// Moment
// ============================================================================

/// A named extension point with a fixed observer signature and dispatch policy.
pub struct Moment<A, R, Out> {
    name: &'static str,
    dispatch: Dispatch<A, R, Out>,
}

impl<A, R, Out> Moment<A, R, Out> {
    pub const fn new(name: &'static str, dispatch: Dispatch<A, R, Out>) -> Self {
        Self { name, dispatch }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn dispatch(&self) -> Dispatch<A, R, Out> {
        self.dispatch
    }
}

impl<A: 'static, R: 'static, Out> Moment<A, R, Out> {
    /// Type of the observers this moment accepts.
    pub(crate) fn observer_type(&self) -> TypeId {
        TypeId::of::<Observer<A, R>>()
    }
}

impl<A, R, Out> Clone for Moment<A, R, Out> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, R, Out> Copy for Moment<A, R, Out> {}

impl<A, R, Out> std::fmt::Debug for Moment<A, R, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Moment").field(&self.name).finish()
    }
}

// ============================================================================
// Dispatch policies
// ============================================================================

/// Call every observer in registration order; the last result wins.
///
/// Stops at the first failing observer. `Ok(None)` when nobody is listening.
pub fn broadcast<A: Clone, T>(
    timeline: &Timeline,
    _moment: &'static str,
    observers: &[Observer<A, Result<T, TimelineError>>],
    args: A,
) -> Result<Option<T>, TimelineError> {
    let mut last = None;
    for observer in observers {
        last = Some(observer(timeline, args.clone())?);
    }
    Ok(last)
}

/// Call only the first observer and hand back whatever it returns.
pub fn first<A, R>(
    timeline: &Timeline,
    moment: &'static str,
    observers: &[Observer<A, R>],
    args: A,
) -> Result<R, TimelineError> {
    let observer = observers
        .first()
        .ok_or(TimelineError::NoObserver { moment })?;
    Ok(observer(timeline, args))
}

/// Thread `args` through every observer in order.
///
/// Each observer receives the previous one's output and is not called until
/// that output is ready. The chain starts when the returned future is polled.
pub fn async_reduce<A: Send + 'static>(
    timeline: &Timeline,
    _moment: &'static str,
    observers: &[AsyncObserver<A, A>],
    args: A,
) -> Result<MomentFuture<A>, TimelineError> {
    let observers = observers.to_vec();
    let timeline = timeline.inherit();
    Ok(async move {
        let mut value = args;
        for observer in &observers {
            value = observer(&timeline, value).await?;
        }
        Ok(value)
    }
    .boxed())
}

// ============================================================================
// Reserved error moment
// ============================================================================

/// Reserved failure channel. Declared on every timeline.
///
/// Firing it with no observers is fatal: the dispatch fails with
/// [`TimelineError::UnhandledErrorEvent`] carrying the reported error.
pub const ERROR: Moment<Arc<TimelineError>, Result<(), TimelineError>, ()> =
    Moment::new("error", report_error);

fn report_error(
    timeline: &Timeline,
    _moment: &'static str,
    observers: &[Observer<Arc<TimelineError>, Result<(), TimelineError>>],
    err: Arc<TimelineError>,
) -> Result<(), TimelineError> {
    if observers.is_empty() {
        return Err(TimelineError::UnhandledErrorEvent { source: err });
    }
    for observer in observers {
        observer(timeline, err.clone())?;
    }
    Ok(())
}

// ============================================================================
// MomentSet
// ============================================================================

/// The fixed set of moments one pipeline type exposes.
///
/// Built once per pipeline type and shared by every timeline of that type.
/// `log` and `error` are always present.
#[derive(Debug)]
pub struct MomentSet {
    pipeline: &'static str,
    declared: HashMap<&'static str, TypeId>,
}

impl MomentSet {
    /// Start declaring moments for the pipeline type `pipeline`.
    pub fn builder(pipeline: &'static str) -> MomentSetBuilder {
        MomentSetBuilder {
            set: MomentSet {
                pipeline,
                declared: HashMap::new(),
            },
        }
        .declare(&LOG)
        .declare(&ERROR)
    }

    /// Name of the pipeline type, for logs.
    pub fn pipeline(&self) -> &'static str {
        self.pipeline
    }

    pub fn contains(&self, moment: &str) -> bool {
        self.declared.contains_key(moment)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.declared.keys().copied()
    }

    /// Check that `moment` is declared here with the same observer signature.
    pub(crate) fn check<A: 'static, R: 'static, Out>(
        &self,
        moment: &Moment<A, R, Out>,
    ) -> Result<(), TimelineError> {
        match self.declared.get(moment.name()) {
            None => Err(TimelineError::UnknownMoment {
                moment: moment.name().to_string(),
            }),
            Some(expected) if *expected != moment.observer_type() => {
                Err(TimelineError::InvalidObserver {
                    moment: moment.name().to_string(),
                })
            }
            Some(_) => Ok(()),
        }
    }

    /// Check an already-erased observer against the declaration for `point`.
    pub(crate) fn check_erased(
        &self,
        point: &str,
        observer: &ErasedObserver,
    ) -> Result<(), TimelineError> {
        let expected = self
            .declared
            .get(point)
            .ok_or_else(|| TimelineError::UnknownMoment {
                moment: point.to_string(),
            })?;
        if (**observer).type_id() != *expected {
            return Err(TimelineError::InvalidObserver {
                moment: point.to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`MomentSet`].
pub struct MomentSetBuilder {
    set: MomentSet,
}

impl MomentSetBuilder {
    pub fn declare<A: 'static, R: 'static, Out>(mut self, moment: &Moment<A, R, Out>) -> Self {
        self.set
            .declared
            .insert(moment.name(), moment.observer_type());
        self
    }

    pub fn build(self) -> Arc<MomentSet> {
        Arc::new(self.set)
    }
}
