//! Behaviors: reusable bundles of observer subscriptions.
//!
//! A behavior configures a timeline in one step, e.g. "forward logs to
//! tracing" or "send through this transport". Any
//! `FnOnce(&mut Timeline) -> Result<(), TimelineError>` is a behavior.

use crate::error::TimelineError;
use crate::timeline::Timeline;

/// Something that subscribes observers to a timeline.
pub trait Behavior {
    fn apply(self, timeline: &mut Timeline) -> Result<(), TimelineError>;
}

impl<F> Behavior for F
where
    F: FnOnce(&mut Timeline) -> Result<(), TimelineError>,
{
    fn apply(self, timeline: &mut Timeline) -> Result<(), TimelineError> {
        self(timeline)
    }
}
