//! The Timeline: observer registry + moment set + error routing.
//!
//! # Registry ownership
//!
//! A timeline is either **Owning** (its registry is private) or
//! **Inheriting** (its registry aliases one it was handed, typically a
//! parent's). Inheriting is cheap: no observer lists are copied, and
//! mutations made to the shared registry by others stay visible.
//!
//! The first local mutation (subscribe in any mode, or unsubscribe) flips an
//! Inheriting timeline to Owning: it remembers the shared registry as its
//! parent, copies it, and mutates the copy. [`Timeline::reset_observers`]
//! flips back, discarding local changes.
//!
//! ```text
//!   parent registry R ◀── A (Inheriting)      A.on(x)       R ◀── parent of A
//!                     ◀── B (Inheriting)    ─────────▶      R ◀── B (Inheriting)
//!                                                           R' ◀── A (Owning, copy of R + x)
//! ```
//!
//! # Error routing
//!
//! A failure raised while dispatching any moment other than `error` is
//! re-dispatched through this timeline's `error` moment. If `error` has no
//! observers the result is [`TimelineError::UnhandledErrorEvent`] wrapping the
//! original failure. A failure raised while dispatching `error` itself always
//! escapes unchanged.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::behavior::Behavior;
use crate::error::TimelineError;
use crate::log::{LOG, LogEntry, LogLevel};
use crate::moment::{ERROR, Moment, MomentFuture, MomentSet, Observer};
use crate::registry::{ErasedObserver, ObserverRegistry, SubscribeMode};

/// Thread-safe handle to an observer registry that timelines can share.
pub type SharedRegistry = Arc<RwLock<ObserverRegistry>>;

/// Create a new, empty shared registry.
pub fn shared_registry() -> SharedRegistry {
    Arc::new(RwLock::new(ObserverRegistry::new()))
}

/// Whether a timeline's registry is private or aliased.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryMode {
    /// Registry aliases one handed in at construction.
    Inheriting,
    /// Registry is private to this timeline.
    Owning,
}

/// An extensible lifecycle pipeline.
pub struct Timeline {
    moments: Arc<MomentSet>,
    registry: SharedRegistry,
    /// Registry aliased before the first local write, restored by `reset_observers`.
    parent: Option<SharedRegistry>,
    mode: RegistryMode,
}

impl Timeline {
    /// A timeline with its own empty registry.
    pub fn new(moments: Arc<MomentSet>) -> Self {
        Self {
            moments,
            registry: shared_registry(),
            parent: None,
            mode: RegistryMode::Owning,
        }
    }

    /// A timeline aliasing `registry` until its first local mutation.
    pub fn with_registry(moments: Arc<MomentSet>, registry: SharedRegistry) -> Self {
        Self {
            moments,
            registry,
            parent: None,
            mode: RegistryMode::Inheriting,
        }
    }

    /// A child of the same pipeline type aliasing this timeline's registry.
    pub fn inherit(&self) -> Self {
        Self::with_registry(self.moments.clone(), self.registry.clone())
    }

    pub fn moments(&self) -> &Arc<MomentSet> {
        &self.moments
    }

    pub fn mode(&self) -> RegistryMode {
        self.mode
    }

    /// The registry this timeline currently reads and writes.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Whether this timeline's registry is the very same object as `other`'s.
    pub fn shares_registry_with(&self, other: &Timeline) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }

    // ========================================================================
    // Subscription
    // ========================================================================

    /// Append `observer` to `moment`.
    pub fn on<A: 'static, R: 'static, Out>(
        &mut self,
        moment: &Moment<A, R, Out>,
        observer: Observer<A, R>,
    ) -> Result<&mut Self, TimelineError> {
        self.subscribe(moment, observer, SubscribeMode::Append)
    }

    /// Add `observer` to `moment` using `mode`.
    pub fn subscribe<A: 'static, R: 'static, Out>(
        &mut self,
        moment: &Moment<A, R, Out>,
        observer: Observer<A, R>,
        mode: SubscribeMode,
    ) -> Result<&mut Self, TimelineError> {
        self.moments.check(moment)?;
        self.write_registry().add(moment.name(), Arc::new(observer), mode);
        Ok(self)
    }

    /// Add a type-erased observer by moment name.
    ///
    /// Fails with `InvalidObserver` when the observer is not the declared
    /// `Observer<A, R>` type for that moment.
    pub fn subscribe_erased(
        &mut self,
        point: &str,
        observer: ErasedObserver,
        mode: SubscribeMode,
    ) -> Result<&mut Self, TimelineError> {
        self.moments.check_erased(point, &observer)?;
        self.write_registry().add(point, observer, mode);
        Ok(self)
    }

    /// Remove every observer of `point`. `false` if `point` was never subscribed.
    pub fn unsubscribe_all(&mut self, point: &str) -> bool {
        self.write_registry().clear(point)
    }

    /// Apply a behavior.
    pub fn using(&mut self, behavior: impl Behavior) -> Result<&mut Self, TimelineError> {
        behavior.apply(self)?;
        Ok(self)
    }

    /// Snapshot of the observers registered for `point`.
    pub fn list_observers(&self, point: &str) -> Vec<ErasedObserver> {
        self.registry.read().get(point)
    }

    /// Typed snapshot of the observers registered for `moment`.
    pub fn observers<A: 'static, R: 'static, Out>(
        &self,
        moment: &Moment<A, R, Out>,
    ) -> Vec<Observer<A, R>> {
        self.registry
            .read()
            .live(moment.name())
            .iter()
            .filter_map(|erased| erased.downcast_ref::<Observer<A, R>>().cloned())
            .collect()
    }

    /// Go back to aliasing the parent registry, dropping local mutations.
    ///
    /// No-op unless this timeline is Owning after having inherited.
    pub fn reset_observers(&mut self) {
        if self.mode != RegistryMode::Owning {
            return;
        }
        if let Some(parent) = self.parent.take() {
            self.registry = parent;
            self.mode = RegistryMode::Inheriting;
            tracing::trace!(pipeline = self.moments.pipeline(), "observers reset to parent registry");
        }
    }

    /// Registry handle for mutation, copying an inherited registry first.
    fn write_registry(&mut self) -> parking_lot::RwLockWriteGuard<'_, ObserverRegistry> {
        if self.mode == RegistryMode::Inheriting {
            let copy = self.registry.read().snapshot();
            let parent = std::mem::replace(&mut self.registry, Arc::new(RwLock::new(copy)));
            self.parent = Some(parent);
            self.mode = RegistryMode::Owning;
            tracing::trace!(pipeline = self.moments.pipeline(), "copied inherited registry on first write");
        }
        self.registry.write()
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    /// Fire a moment.
    ///
    /// - `Ok(Some(out))`: the dispatch succeeded
    /// - `Ok(None)`: the dispatch failed and `error` observers handled it
    /// - `Err(_)`: the failure escaped (no error observers, an error observer
    ///   failed, or `moment` is `error` itself)
    pub fn emit<A: 'static, R: 'static, Out>(
        &self,
        moment: &Moment<A, R, Out>,
        args: A,
    ) -> Result<Option<Out>, TimelineError> {
        self.moments.check(moment)?;
        let observers = self.observers(moment);
        match (moment.dispatch())(self, moment.name(), &observers, args) {
            Ok(out) => Ok(Some(out)),
            Err(err) => self.recover(moment.name(), err).map(|()| None),
        }
    }

    /// Fire a moment whose dispatch produces a future, and await it.
    ///
    /// Failures raised while dispatching or while awaiting are routed exactly
    /// as in [`emit`](Self::emit).
    pub async fn emit_async<A: 'static, R: 'static, T>(
        &self,
        moment: &Moment<A, R, MomentFuture<T>>,
        args: A,
    ) -> Result<Option<T>, TimelineError> {
        match self.emit(moment, args)? {
            Some(pending) => self.resolve(moment, pending).await,
            None => Ok(None),
        }
    }

    /// Await a future produced by firing `moment` with [`emit`](Self::emit),
    /// routing its failure like any other failure of `moment`.
    ///
    /// Lets a caller act between dispatch and completion.
    pub async fn resolve<A, R, T>(
        &self,
        moment: &Moment<A, R, MomentFuture<T>>,
        pending: MomentFuture<T>,
    ) -> Result<Option<T>, TimelineError> {
        match pending.await {
            Ok(value) => Ok(Some(value)),
            Err(err) => self.recover(moment.name(), err).map(|()| None),
        }
    }

    /// Report a failure through the `error` moment.
    pub fn error(&self, err: TimelineError) -> Result<(), TimelineError> {
        self.emit(&ERROR, Arc::new(err)).map(|_| ())
    }

    /// Fire the `log` moment. Nothing happens without log observers.
    ///
    /// Unlike [`emit`](Self::emit), a logging failure is never routed to
    /// `error`.
    pub fn log(&self, message: impl Into<String>, level: LogLevel) {
        let observers = self.observers(&LOG);
        if observers.is_empty() {
            return;
        }
        let entry = LogEntry::new(message, level);
        if let Err(err) = (LOG.dispatch())(self, LOG.name(), &observers, entry) {
            tracing::warn!(pipeline = self.moments.pipeline(), error = %err, "log dispatch failed");
        }
    }

    /// Route a dispatch failure to `error`, once.
    fn recover(&self, moment: &'static str, err: TimelineError) -> Result<(), TimelineError> {
        if moment == ERROR.name() {
            return Err(err);
        }
        tracing::debug!(
            pipeline = self.moments.pipeline(),
            moment,
            error = %err,
            "routing moment failure to error observers"
        );
        let observers = self.observers(&ERROR);
        (ERROR.dispatch())(self, ERROR.name(), &observers, Arc::new(err))
    }
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("pipeline", &self.moments.pipeline())
            .field("mode", &self.mode)
            .field("has_parent", &self.parent.is_some())
            .finish_non_exhaustive()
    }
}
