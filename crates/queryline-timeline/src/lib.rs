//! # queryline-timeline
//!
//! Extensible lifecycle pipelines for queryline.
//!
//! A timeline is a fixed set of named moments (extension points) plus an
//! ordered list of observers per moment. Pipeline owners declare their moments
//! once per pipeline type; users customize behavior by subscribing observers.
//! A timeline:
//! - Checks every subscription against the moment's declared observer type
//! - Dispatches each moment with that moment's own policy
//! - Routes dispatch failures through the reserved `error` moment
//! - Can inherit another timeline's registry and copy it on the first write

pub mod behavior;
pub mod error;
pub mod log;
pub mod moment;
pub mod registry;
pub mod timeline;

pub use behavior::Behavior;
pub use error::TimelineError;
pub use log::{LOG, LogEntry, LogLevel, log_to_tracing, tracing_observer};
pub use moment::{
    AsyncObserver, Dispatch, ERROR, Moment, MomentFuture, MomentSet, MomentSetBuilder, Observer,
    async_observer, async_reduce, broadcast, first, observer,
};
pub use registry::{ErasedObserver, ObserverRegistry, SubscribeMode};
pub use timeline::{RegistryMode, SharedRegistry, Timeline, shared_registry};
