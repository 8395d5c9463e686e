//! Observer registry: per-moment ordered observer lists.
//!
//! Observers are stored type-erased so one registry can back moments with
//! different signatures. The [`Timeline`](crate::Timeline) checks each
//! observer's type against its moment's declaration before it gets here.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A type-erased observer, downcast back at dispatch time.
pub type ErasedObserver = Arc<dyn Any + Send + Sync>;

/// How a new observer joins an existing list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SubscribeMode {
    /// Run after every existing observer.
    #[default]
    Append,
    /// Run before every existing observer.
    Prepend,
    /// Discard every existing observer and keep only this one.
    Replace,
}

/// Mapping from moment name to its ordered observer list.
///
/// `Clone` copies every list, so a clone never shares list storage with its
/// source (observers themselves are shared `Arc`s).
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    lists: HashMap<String, Vec<ErasedObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `observer` to `point` and return the resulting list.
    pub fn add(
        &mut self,
        point: &str,
        observer: ErasedObserver,
        mode: SubscribeMode,
    ) -> &[ErasedObserver] {
        let list = self.lists.entry(point.to_string()).or_default();
        match mode {
            SubscribeMode::Append => list.push(observer),
            SubscribeMode::Prepend => list.insert(0, observer),
            SubscribeMode::Replace => {
                list.clear();
                list.push(observer);
            }
        }
        list
    }

    /// Snapshot of the observers for `point`; empty when nothing is registered.
    pub fn get(&self, point: &str) -> Vec<ErasedObserver> {
        self.live(point).to_vec()
    }

    /// The live list for `point`, for dispatch.
    pub(crate) fn live(&self, point: &str) -> &[ErasedObserver] {
        self.lists.get(point).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Empty the list for `point`. Returns `false` if `point` was never registered.
    pub fn clear(&mut self, point: &str) -> bool {
        match self.lists.get_mut(point) {
            Some(list) => {
                list.clear();
                true
            }
            None => false,
        }
    }

    /// Copy of every point → list mapping.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Number of observers registered for `point`.
    pub fn count(&self, point: &str) -> usize {
        self.live(point).len()
    }

    /// Names with a list (possibly emptied by [`clear`](Self::clear)).
    pub fn points(&self) -> impl Iterator<Item = &str> {
        self.lists.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (point, list) in &self.lists {
            map.entry(point, &list.len());
        }
        map.finish()
    }
}
