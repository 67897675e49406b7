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

//! Local tuplespace engine
//!
//! ## Purpose
//! Combines the store, the subscription registry and the meta resolver into
//! the set of operations a kernel performs on its own process's space:
//! write and dispatch, delete and dispatch, expire, search, and indirect
//! subscription upkeep.
//!
//! ## Design
//! `LocalSpace` is synchronous and single-owner. The kernel runtime keeps
//! it inside one task and feeds it requests, which gives every operation
//! (including callback dispatch and meta rebinding) a consistent view.

use crate::error::{TupleError, TupleResult};
use crate::matcher::Matcher;
use crate::meta::{self, MetaRef, MetaResolver};
use crate::registry::{
    DispatchMode, HandleAllocator, Subscription, SubscriptionHandle, SubscriptionRegistry,
    TupleCallback,
};
use crate::result_set::ResultSet;
use crate::store::TupleStore;
use crate::tuple::{Encoding, Expiry, OwnerId, Timestamp, Tuple, TupleKey};
use tracing::{debug, trace};

/// Key of the tuple listing every key owned by this process.
pub const ALL_KEYS_KEY: &str = "kernel.all-keys";

/// What a single mutation caused.
#[derive(Debug, Clone, Default)]
pub struct Mutation {
    /// The tuple as stored, or as it was before removal
    pub tuple: Option<Tuple>,
    /// Callbacks invoked
    pub callbacks: usize,
    /// Indirect subscriptions that changed target
    pub rebinds: usize,
}

/// Snapshot of engine counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SpaceStats {
    /// Tuples currently stored
    pub tuples: usize,
    /// Registry entries, including bound indirect subscriptions
    pub subscriptions: usize,
    /// Indirect subscriptions
    pub indirect_subscriptions: usize,
    /// Callbacks invoked since start
    pub callbacks_dispatched: u64,
    /// Indirect rebinds since start
    pub rebinds: u64,
    /// Tuples written since start
    pub writes: u64,
    /// Tuples removed since start
    pub removals: u64,
}

/// Store, registry and resolver of one process.
pub struct LocalSpace {
    local_id: OwnerId,
    store: TupleStore,
    registry: SubscriptionRegistry,
    resolver: MetaResolver,
    handles: HandleAllocator,
    publish_all_keys: bool,
}

impl LocalSpace {
    /// Create an empty space for `local_id`.
    ///
    /// `handles` must be the allocator callers use for handles they
    /// register here, so rebinding never reuses a caller's handle.
    pub fn new(local_id: OwnerId, matcher: Matcher, handles: HandleAllocator) -> Self {
        LocalSpace {
            local_id,
            store: TupleStore::new(matcher),
            registry: SubscriptionRegistry::new(matcher),
            resolver: MetaResolver::new(matcher),
            handles,
            publish_all_keys: true,
        }
    }

    /// Enable or disable upkeep of the all-keys tuple.
    pub fn with_all_keys(mut self, enabled: bool) -> Self {
        self.publish_all_keys = enabled;
        self
    }

    /// Owner id of this process.
    pub fn local_id(&self) -> OwnerId {
        self.local_id
    }

    /// Write a concrete tuple with a fresh seqno and dispatch on-write
    /// callbacks. A tuple carrying the deletion marker deletes instead.
    pub fn write(&mut self, mut tuple: Tuple, now: Timestamp) -> TupleResult<Mutation> {
        if tuple.is_deletion() {
            return self.delete_concrete(&tuple, now);
        }
        tuple.seqno = None;
        let stored = self.store.insert(tuple, now)?;
        let mutation = self.after_write(stored.tuple);
        if stored.created {
            self.refresh_all_keys(&mutation, now);
        }
        Ok(mutation)
    }

    /// Cache a value published by its remote owner.
    ///
    /// Stale replicas are ignored and yield an empty [`Mutation`].
    pub fn write_replica(&mut self, tuple: Tuple, now: Timestamp) -> TupleResult<Mutation> {
        if tuple.is_deletion() {
            return self.delete_concrete(&tuple, now);
        }
        match self.store.insert_replica(tuple, now)? {
            Some(stored) => Ok(self.after_write(stored.tuple)),
            None => Ok(Mutation::default()),
        }
    }

    fn delete_concrete(&mut self, tuple: &Tuple, now: Timestamp) -> TupleResult<Mutation> {
        let owner = tuple
            .owner
            .ok_or_else(|| TupleError::InvalidAbstractTupleUse(tuple.to_string()))?;
        self.delete(owner, &tuple.key, tuple.creator, now)
    }

    fn after_write(&mut self, tuple: Tuple) -> Mutation {
        let rebinds = self.retarget_if_meta(&tuple);
        let callbacks = self.registry.dispatch(DispatchMode::OnWrite, &tuple);
        trace!(tuple = %tuple, seqno = ?tuple.seqno, callbacks, "tuple written");
        Mutation {
            tuple: Some(tuple),
            callbacks,
            rebinds,
        }
    }

    fn retarget_if_meta(&mut self, tuple: &Tuple) -> usize {
        if !self.resolver.watches(tuple) {
            return 0;
        }
        self.resolver
            .retarget(&mut self.registry, &self.handles, tuple)
    }

    /// Remove the tuple at `(owner, key)`, firing on-delete callbacks first.
    ///
    /// Callbacks see the tuple with its expiry set to [`Expiry::Immediately`].
    /// Deleting an absent tuple is a no-op.
    pub fn delete(
        &mut self,
        owner: OwnerId,
        key: &TupleKey,
        deleted_by: Option<OwnerId>,
        now: Timestamp,
    ) -> TupleResult<Mutation> {
        if !key.is_concrete() {
            return Err(TupleError::InvalidAbstractTupleUse(format!("{}:{}", owner, key)));
        }
        let Some(existing) = self.store.peek(owner, key) else {
            return Ok(Mutation::default());
        };
        let mut marker = existing.clone().with_expiry(Expiry::Immediately);
        if let Some(by) = deleted_by {
            marker.creator = Some(by);
        }
        let mutation = self.purge(marker);
        if owner == self.local_id && key.to_string() != ALL_KEYS_KEY {
            self.refresh_all_keys(&mutation, now);
        }
        Ok(mutation)
    }

    /// Purge every tuple whose expiry time has passed at `now`.
    pub fn expire(&mut self, now: Timestamp) -> Vec<Mutation> {
        let due = self.store.due_for_expiry(now);
        let mut purged = Vec::with_capacity(due.len());
        let mut local_removed = false;
        for (owner, key) in due {
            let Some(tuple) = self.store.peek(owner, &key).cloned() else {
                continue;
            };
            local_removed |= owner == self.local_id;
            purged.push(self.purge(tuple));
        }
        if local_removed {
            if let Some(last) = purged.last().cloned() {
                self.refresh_all_keys(&last, now);
            }
        }
        purged
    }

    fn purge(&mut self, tuple: Tuple) -> Mutation {
        let callbacks = self.registry.dispatch(DispatchMode::OnDelete, &tuple);
        let mut rebinds = 0;
        if let Some(owner) = tuple.owner {
            self.store.remove(owner, &tuple.key);
            rebinds = self
                .resolver
                .release(&mut self.registry, &self.handles, owner, &tuple.key);
        }
        debug!(tuple = %tuple, callbacks, "tuple removed");
        Mutation {
            tuple: Some(tuple),
            callbacks,
            rebinds,
        }
    }

    /// Exact lookup; `only_new` hides values already observed.
    pub fn get(
        &mut self,
        owner: OwnerId,
        key: &TupleKey,
        only_new: bool,
    ) -> TupleResult<Option<Tuple>> {
        self.store.get(owner, key, only_new)
    }

    /// Lookup that leaves read state untouched.
    pub fn peek(&self, owner: OwnerId, key: &TupleKey) -> Option<&Tuple> {
        self.store.peek(owner, key)
    }

    /// True if a value exists at `(owner, key)`.
    pub fn exists(&self, owner: OwnerId, key: &TupleKey) -> bool {
        self.store.exists(owner, key)
    }

    /// Search into a fresh result set.
    pub fn search(&mut self, pattern: &Tuple) -> ResultSet {
        let mut results = ResultSet::new();
        self.search_into(pattern, &mut results);
        results
    }

    /// Append the results of a search to `results`.
    pub fn search_into(&mut self, pattern: &Tuple, results: &mut ResultSet) -> usize {
        let found = self.store.search(pattern);
        let count = found.len();
        results.append(found);
        count
    }

    /// Owners holding a value at `key`.
    pub fn owners_of(&self, key: &TupleKey) -> Vec<OwnerId> {
        self.store.owners_of(key)
    }

    /// Append `suffix` to every local tuple covered by `pattern` and
    /// dispatch on-write callbacks for each.
    pub fn append(
        &mut self,
        pattern: &Tuple,
        suffix: &[u8],
        expected_seqno: Option<u64>,
        now: Timestamp,
    ) -> Vec<Mutation> {
        let scoped = pattern.clone().with_owner(self.local_id);
        self.store
            .append(&scoped, suffix, expected_seqno, now)
            .into_iter()
            .map(|tuple| self.after_write(tuple))
            .collect()
    }

    /// Reference held by the meta tuple at `(owner, key)`.
    ///
    /// An absent meta tuple is unresolved, not an error.
    pub fn resolve(&self, owner: OwnerId, key: &TupleKey) -> TupleResult<Option<MetaRef>> {
        match self.store.peek(owner, key) {
            Some(tuple) => meta::resolve(tuple),
            None => Ok(None),
        }
    }

    /// True if `(owner, key)` holds a meta tuple pointing somewhere.
    pub fn is_meta(&self, owner: OwnerId, key: &TupleKey) -> bool {
        self.store.peek(owner, key).is_some_and(meta::is_meta)
    }

    /// Register plain interest in `pattern`.
    pub fn subscribe(&mut self, handle: SubscriptionHandle, pattern: Tuple) {
        self.registry.insert(Subscription::interest(handle, pattern));
    }

    /// Register a callback for `mode` mutations covered by `pattern`.
    pub fn register_callback(
        &mut self,
        handle: SubscriptionHandle,
        pattern: Tuple,
        mode: DispatchMode,
        callback: TupleCallback,
    ) {
        self.registry
            .insert(Subscription::callback(handle, pattern, mode, callback));
    }

    /// Subscribe through whichever meta tuple `prototype` covers.
    ///
    /// Binds to the first stored match right away; later writes of any
    /// covered meta tuple rebind.
    pub fn subscribe_indirect(
        &mut self,
        handle: SubscriptionHandle,
        prototype: Tuple,
        callback: Option<TupleCallback>,
    ) {
        let current = self.current_meta(&prototype);
        self.resolver.register(
            &mut self.registry,
            &self.handles,
            handle,
            prototype,
            callback,
            current.as_ref(),
        );
    }

    fn current_meta(&self, prototype: &Tuple) -> Option<Tuple> {
        let mut pattern = prototype.clone();
        pattern.is_new = None;
        self.store.matching(&pattern).first().map(|t| (*t).clone())
    }

    /// First tuple covered by `pattern`, marked as observed.
    pub fn get_by_abstract(&mut self, pattern: &Tuple) -> Option<Tuple> {
        self.store.first(pattern)
    }

    /// Remove a subscription, callback or indirect subscription.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> TupleResult<()> {
        if self.resolver.contains(handle) {
            return self.resolver.unregister(&mut self.registry, handle);
        }
        self.registry.remove(handle).map(|_| ())
    }

    /// Current target of an indirect subscription.
    pub fn indirect_target(&self, handle: SubscriptionHandle) -> Option<&MetaRef> {
        self.resolver.target_of(handle)
    }

    /// True if a live subscription overlaps `pattern`.
    pub fn has_subscriber(&self, pattern: &Tuple) -> bool {
        self.registry.has_subscriber(pattern)
    }

    /// Engine counters.
    pub fn stats(&self) -> SpaceStats {
        let store = self.store.stats();
        SpaceStats {
            tuples: self.store.len(),
            subscriptions: self.registry.len(),
            indirect_subscriptions: self.resolver.len(),
            callbacks_dispatched: self.registry.dispatched(),
            rebinds: self.resolver.rebinds(),
            writes: store.writes,
            removals: store.removals,
        }
    }

    fn refresh_all_keys(&mut self, cause: &Mutation, now: Timestamp) {
        if !self.publish_all_keys {
            return;
        }
        if cause
            .tuple
            .as_ref()
            .is_some_and(|t| t.key.to_string() == ALL_KEYS_KEY)
        {
            return;
        }
        let listing = self
            .store
            .keys_of(self.local_id)
            .iter()
            .map(TupleKey::to_string)
            .filter(|k| k != ALL_KEYS_KEY)
            .collect::<Vec<_>>()
            .join(" ");
        let Ok(key) = TupleKey::parse(ALL_KEYS_KEY) else {
            return;
        };
        let tuple = Tuple::new(self.local_id, key, format!("({})", listing).into_bytes())
            .with_encoding(Encoding::Ascii)
            .with_mimetype("text/plain");
        if let Ok(stored) = self.store.insert(tuple, now) {
            self.after_write(stored.tuple);
        }
    }
}
