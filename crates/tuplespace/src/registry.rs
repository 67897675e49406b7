// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of CoordSpace.
//
// CoordSpace is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// CoordSpace is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with CoordSpace. If not, see <https://www.gnu.org/licenses/>.

//! Subscription registry
//!
//! ## Purpose
//! Tracks standing interest in tuples and routes every write or delete to
//! the callbacks whose pattern covers it.
//!
//! ## Design
//! Entries are kept in a `BTreeMap` keyed by handle. Handles are allocated
//! from a monotonically increasing counter, so map order is registration
//! order and dispatch for a single write is FIFO. A subscription without a
//! callback is plain interest: it never fires, but it counts for
//! [`SubscriptionRegistry::has_subscriber`].

use crate::error::{TupleError, TupleResult};
use crate::matcher::Matcher;
use crate::tuple::Tuple;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked with the tuple that was written or deleted.
pub type TupleCallback = Arc<dyn Fn(&Tuple) + Send + Sync>;

/// Opaque handle naming a subscription or callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Raw handle value.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Thread-safe source of increasing handles.
#[derive(Debug, Clone, Default)]
pub struct HandleAllocator {
    next: Arc<AtomicU64>,
}

impl HandleAllocator {
    /// Create an allocator whose first handle is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next handle.
    pub fn allocate(&self) -> SubscriptionHandle {
        SubscriptionHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Which mutations a subscription reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchMode {
    /// Fire after a matching tuple is written
    OnWrite,
    /// Fire before a matching tuple is purged
    OnDelete,
}

impl DispatchMode {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::OnWrite => "write",
            DispatchMode::OnDelete => "delete",
        }
    }
}

/// A registered pattern with its optional callback.
#[derive(Clone)]
pub struct Subscription {
    /// Handle returned to the caller
    pub handle: SubscriptionHandle,
    /// Prototype the mutated tuple must be covered by
    pub pattern: Tuple,
    /// Mutation kind
    pub mode: DispatchMode,
    /// Invoked on match; `None` for plain interest
    pub callback: Option<TupleCallback>,
}

impl Subscription {
    /// Interest in tuples covered by `pattern`, without a callback.
    pub fn interest(handle: SubscriptionHandle, pattern: Tuple) -> Self {
        Subscription {
            handle,
            pattern,
            mode: DispatchMode::OnWrite,
            callback: None,
        }
    }

    /// Callback fired for `mode` mutations covered by `pattern`.
    pub fn callback(
        handle: SubscriptionHandle,
        pattern: Tuple,
        mode: DispatchMode,
        callback: TupleCallback,
    ) -> Self {
        Subscription {
            handle,
            pattern,
            mode,
            callback: Some(callback),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("pattern", &self.pattern.to_string())
            .field("mode", &self.mode)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Active subscriptions in registration order.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<SubscriptionHandle, Subscription>,
    matcher: Matcher,
    dispatched: u64,
}

impl SubscriptionRegistry {
    /// Create an empty registry comparing payloads with `matcher`.
    pub fn new(matcher: Matcher) -> Self {
        SubscriptionRegistry {
            matcher,
            ..Default::default()
        }
    }

    /// Add a subscription. A handle already present is replaced.
    pub fn insert(&mut self, subscription: Subscription) {
        self.entries.insert(subscription.handle, subscription);
    }

    /// Remove a subscription.
    pub fn remove(&mut self, handle: SubscriptionHandle) -> TupleResult<Subscription> {
        self.entries
            .remove(&handle)
            .ok_or(TupleError::UnknownHandle(handle.id()))
    }

    /// Look up a subscription.
    pub fn get(&self, handle: SubscriptionHandle) -> Option<&Subscription> {
        self.entries.get(&handle)
    }

    /// True if `handle` names a live subscription.
    pub fn contains(&self, handle: SubscriptionHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// True if some subscription's pattern overlaps `pattern`.
    pub fn has_subscriber(&self, pattern: &Tuple) -> bool {
        self.entries
            .values()
            .any(|s| self.matcher.unifies(&s.pattern, pattern))
    }

    /// Callbacks that would fire for `tuple`, in registration order.
    pub fn matching(
        &self,
        mode: DispatchMode,
        tuple: &Tuple,
    ) -> Vec<(SubscriptionHandle, TupleCallback)> {
        self.entries
            .values()
            .filter(|s| s.mode == mode)
            .filter(|s| self.matcher.is_generalization(&s.pattern, tuple))
            .filter_map(|s| s.callback.clone().map(|cb| (s.handle, cb)))
            .collect()
    }

    /// Invoke every matching callback once with `tuple`.
    ///
    /// Callbacks are collected before any runs, so a callback cannot observe
    /// a half-updated registry. Returns the number of callbacks invoked.
    pub fn dispatch(&mut self, mode: DispatchMode, tuple: &Tuple) -> usize {
        let targets = self.matching(mode, tuple);
        let mut delivered = tuple.clone();
        if mode == DispatchMode::OnWrite {
            delivered.is_new = Some(false);
        }
        for (_, callback) in &targets {
            callback(&delivered);
        }
        self.dispatched += targets.len() as u64;
        targets.len()
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total callbacks invoked since creation.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Expiry, TupleKey};
    use std::sync::Mutex;

    fn key(s: &str) -> TupleKey {
        TupleKey::parse(s).unwrap()
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> TupleCallback {
        let log = log.clone();
        Arc::new(move |t: &Tuple| {
            log.lock()
                .unwrap()
                .push(format!("{}:{}", label, t.data_str().unwrap_or("")))
        })
    }

    #[test]
    fn test_handles_increase() {
        let alloc = HandleAllocator::new();
        let a = alloc.allocate();
        let b = alloc.clone().allocate();
        assert_eq!(a.id(), 1);
        assert!(b > a);
    }

    #[test]
    fn test_dispatch_is_fifo_and_mode_filtered() {
        let alloc = HandleAllocator::new();
        let mut registry = SubscriptionRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let pattern = Tuple::pattern().with_key(key("temp.*"));

        registry.insert(Subscription::callback(
            alloc.allocate(),
            pattern.clone(),
            DispatchMode::OnWrite,
            recorder(&log, "first"),
        ));
        registry.insert(Subscription::callback(
            alloc.allocate(),
            pattern.clone(),
            DispatchMode::OnDelete,
            recorder(&log, "deleted"),
        ));
        registry.insert(Subscription::callback(
            alloc.allocate(),
            pattern.clone(),
            DispatchMode::OnWrite,
            recorder(&log, "second"),
        ));
        registry.insert(Subscription::interest(alloc.allocate(), pattern));

        let written = Tuple::text(5, "temp.c", "21.5").unwrap();
        assert_eq!(registry.dispatch(DispatchMode::OnWrite, &written), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first:21.5", "second:21.5"]);

        log.lock().unwrap().clear();
        let deleted = written.with_expiry(Expiry::Immediately);
        assert_eq!(registry.dispatch(DispatchMode::OnDelete, &deleted), 1);
        assert_eq!(*log.lock().unwrap(), vec!["deleted:21.5"]);
        assert_eq!(registry.dispatched(), 3);
    }

    #[test]
    fn test_delivered_tuple_is_not_new() {
        let alloc = HandleAllocator::new();
        let mut registry = SubscriptionRegistry::default();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        registry.insert(Subscription::callback(
            alloc.allocate(),
            Tuple::pattern(),
            DispatchMode::OnWrite,
            Arc::new(move |t: &Tuple| *sink.lock().unwrap() = Some(t.is_new)),
        ));
        let mut written = Tuple::text(1, "a", "v").unwrap();
        written.is_new = Some(true);
        registry.dispatch(DispatchMode::OnWrite, &written);
        assert_eq!(*seen.lock().unwrap(), Some(Some(false)));
    }

    #[test]
    fn test_remove_and_unknown_handle() {
        let alloc = HandleAllocator::new();
        let mut registry = SubscriptionRegistry::default();
        let handle = alloc.allocate();
        registry.insert(Subscription::interest(handle, Tuple::pattern()));
        assert!(registry.contains(handle));
        assert!(registry.remove(handle).is_ok());
        assert!(matches!(
            registry.remove(handle),
            Err(TupleError::UnknownHandle(id)) if id == handle.id()
        ));
    }

    #[test]
    fn test_has_subscriber_detects_overlap() {
        let alloc = HandleAllocator::new();
        let mut registry = SubscriptionRegistry::default();
        registry.insert(Subscription::interest(
            alloc.allocate(),
            Tuple::pattern().with_owner(3).with_key(key("a.*.c")),
        ));
        assert!(registry.has_subscriber(&Tuple::pattern().with_key(key("a.b.*"))));
        assert!(registry.has_subscriber(&Tuple::text(3, "a.x.c", "v").unwrap()));
        assert!(!registry.has_subscriber(&Tuple::pattern().with_owner(4)));
        assert!(!registry.has_subscriber(&Tuple::pattern().with_key(key("b"))));
    }
}
