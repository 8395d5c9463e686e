//! Reserved `log` moment and its bridge into `tracing`.
//!
//! Pipelines report progress by firing `log` with a [`LogEntry`]. Firing it
//! with no observers does nothing. [`log_to_tracing`] subscribes an observer
//! that forwards entries at or above a threshold as `tracing` events.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::behavior::Behavior;
use crate::error::TimelineError;
use crate::moment::{Moment, Observer, observer};
use crate::timeline::Timeline;

/// Severity of a [`LogEntry`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum LogLevel {
    #[strum(serialize = "verbose", serialize = "debug")]
    Verbose = 0,
    #[default]
    Info = 1,
    #[strum(serialize = "warning", serialize = "warn")]
    Warning = 2,
    Error = 3,
    /// Threshold that silences everything.
    Off = 99,
}

impl LogLevel {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One message on the `log` moment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub message: String,
    pub level: LogLevel,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, level: LogLevel) -> Self {
        Self {
            message: message.into(),
            level,
        }
    }
}

/// Reserved logging channel. Declared on every timeline.
pub const LOG: Moment<LogEntry, (), ()> = Moment::new("log", notify);

fn notify(
    timeline: &Timeline,
    _moment: &'static str,
    observers: &[Observer<LogEntry, ()>],
    entry: LogEntry,
) -> Result<(), TimelineError> {
    for observer in observers {
        observer(timeline, entry.clone());
    }
    Ok(())
}

/// Observer forwarding log entries at or above `min_level` to `tracing`.
pub fn tracing_observer(min_level: LogLevel) -> Observer<LogEntry, ()> {
    observer(move |timeline: &Timeline, entry: LogEntry| {
        if entry.level < min_level || entry.level == LogLevel::Off {
            return;
        }
        let pipeline = timeline.moments().pipeline();
        match entry.level {
            LogLevel::Verbose => tracing::debug!(pipeline, "{}", entry.message),
            LogLevel::Info => tracing::info!(pipeline, "{}", entry.message),
            LogLevel::Warning => tracing::warn!(pipeline, "{}", entry.message),
            LogLevel::Error => tracing::error!(pipeline, "{}", entry.message),
            LogLevel::Off => {}
        }
    })
}

/// Behavior: forward this timeline's log entries to `tracing`.
pub fn log_to_tracing(min_level: LogLevel) -> impl Behavior {
    move |timeline: &mut Timeline| -> Result<(), TimelineError> {
        timeline.on(&LOG, tracing_observer(min_level))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moment::MomentSet;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_level_ordering_and_parse() {
        assert!(LogLevel::Verbose < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Off);
        assert_eq!(LogLevel::from_str("WARN"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::from_str("debug"), Some(LogLevel::Verbose));
        assert_eq!(LogLevel::from_str("loud"), None);
        assert_eq!(LogLevel::Warning.to_string(), "warning");
    }

    #[test]
    fn test_log_without_observers_is_noop() {
        let tl = Timeline::new(MomentSet::builder("quiet").build());
        tl.log("nobody hears this", LogLevel::Error);
    }

    #[test]
    fn test_log_reaches_observers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut tl = Timeline::new(MomentSet::builder("chatty").build());
        for tag in ["a", "b"] {
            let seen = seen.clone();
            tl.on(&LOG, observer(move |_: &Timeline, entry: LogEntry| {
                seen.lock().push(format!("{tag}:{}:{}", entry.level, entry.message));
            }))
            .unwrap();
        }

        tl.log("hello", LogLevel::Warning);
        assert_eq!(*seen.lock(), vec!["a:warning:hello", "b:warning:hello"]);
    }

    #[test]
    fn test_log_and_emit_deliver_the_same_entries() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut tl = Timeline::new(MomentSet::builder("paths").build());
        let s = seen.clone();
        tl.on(&LOG, observer(move |_: &Timeline, entry: LogEntry| {
            s.lock().push(entry);
        }))
        .unwrap();

        tl.log("direct", LogLevel::Info);
        tl.emit(&LOG, LogEntry::new("emitted", LogLevel::Info)).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                LogEntry::new("direct", LogLevel::Info),
                LogEntry::new("emitted", LogLevel::Info),
            ]
        );
    }

    #[test]
    fn test_log_to_tracing_subscribes_one_observer() {
        let mut tl = Timeline::new(MomentSet::builder("traced").build());
        tl.using(log_to_tracing(LogLevel::Info)).unwrap();
        assert_eq!(tl.list_observers("log").len(), 1);
        // Below threshold, must not panic or forward
        tl.log("verbose detail", LogLevel::Verbose);
        tl.log("shown", LogLevel::Info);
    }
}
