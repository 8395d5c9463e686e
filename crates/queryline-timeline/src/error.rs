//! Timeline error type.

use std::sync::Arc;

/// Errors raised while subscribing to or firing moments.
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("moment `{moment}` is not declared on this timeline")]
    UnknownMoment { moment: String },

    /// An erased observer does not have the signature its moment declares.
    #[error("observer registered for `{moment}` does not match the moment's signature")]
    InvalidObserver { moment: String },

    /// A first-result moment fired with nobody listening.
    #[error("no observer registered for `{moment}`")]
    NoObserver { moment: &'static str },

    /// The `error` moment fired with no error observers.
    ///
    /// `source` is the failure that was being reported, so the original
    /// context survives the escalation.
    #[error("unhandled error event")]
    UnhandledErrorEvent { source: Arc<TimelineError> },

    /// Failure raised by an observer.
    #[error(transparent)]
    Observer(#[from] anyhow::Error),
}

impl TimelineError {
    /// Wrap an arbitrary observer failure.
    pub fn observer(err: impl Into<anyhow::Error>) -> Self {
        Self::Observer(err.into())
    }

    /// Whether this is the fatal "nobody handled the error" signal.
    pub fn is_unhandled(&self) -> bool {
        matches!(self, Self::UnhandledErrorEvent { .. })
    }

    /// Find a typed cause anywhere in the chain, looking through
    /// `UnhandledErrorEvent` wrappers and observer failures.
    pub fn find<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Observer(err) => err.chain().find_map(|cause| cause.downcast_ref::<E>()),
            Self::UnhandledErrorEvent { source } => source.find::<E>(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn test_find_looks_through_unhandled_wrapper() {
        let original = TimelineError::observer(DiskError);
        let escalated = TimelineError::UnhandledErrorEvent {
            source: Arc::new(original),
        };

        assert!(escalated.is_unhandled());
        assert!(escalated.find::<DiskError>().is_some());
        assert_eq!(escalated.to_string(), "unhandled error event");
        // The cause is reachable once, through the source chain
        let cause = std::error::Error::source(&escalated).map(ToString::to_string);
        assert_eq!(cause.as_deref(), Some("disk on fire"));
    }

    #[test]
    fn test_find_misses_unrelated_variants() {
        let err = TimelineError::NoObserver { moment: "send" };
        assert!(err.find::<DiskError>().is_none());
        assert!(!err.is_unhandled());
    }
}
