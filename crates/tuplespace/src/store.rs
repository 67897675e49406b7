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

//! Tuplespace store
//!
//! ## Purpose
//! Holds the current value of every concrete tuple known to this process,
//! indexed by `(owner, key)`. Values owned by this process and cached
//! replicas of remote values live side by side.
//!
//! ## Design
//! The store is a plain data structure. It is owned by exactly one task,
//! which serializes every read and write, so nothing here locks.
//! Sequence numbers are kept per `(owner, key)` record. An ordered
//! expiry index lets the periodic sweep find due tuples without scanning.

use crate::error::{TupleError, TupleResult};
use crate::matcher::Matcher;
use crate::tuple::{Expiry, OwnerId, Timestamp, Tuple, TupleKey};
use std::collections::{BTreeSet, HashMap};

type Location = (OwnerId, TupleKey);

/// Result of writing a tuple into the store.
#[derive(Debug, Clone)]
pub struct StoredTuple {
    /// The value as stored, with seqno and write time assigned
    pub tuple: Tuple,
    /// True if no value existed at this location before
    pub created: bool,
}

/// Counters describing store activity
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Tuples written, including replicas
    pub writes: u64,
    /// Exact lookups and searches
    pub reads: u64,
    /// Tuples removed by delete or expiry
    pub removals: u64,
    /// Tuples currently held
    pub current_size: usize,
}

/// Per-(owner, key) tuple storage.
#[derive(Debug, Default)]
pub struct TupleStore {
    tuples: HashMap<Location, Tuple>,
    expiry_index: BTreeSet<(Timestamp, OwnerId, TupleKey)>,
    matcher: Matcher,
    stats: StoreStats,
}

impl TupleStore {
    /// Create an empty store comparing payloads with `matcher`.
    pub fn new(matcher: Matcher) -> Self {
        TupleStore {
            matcher,
            ..Default::default()
        }
    }

    /// Matcher used for searches.
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Write a concrete tuple, assigning the next seqno for its location.
    pub fn insert(&mut self, mut tuple: Tuple, now: Timestamp) -> TupleResult<StoredTuple> {
        let location = location_of(&tuple)?;
        let previous = self.tuples.get(&location).and_then(|t| t.seqno);
        tuple.seqno = Some(previous.map_or(1, |s| s + 1));
        tuple.append_seqno = 0;
        tuple.ts_write = Some(now);
        Ok(self.put(location, tuple))
    }

    /// Cache a value received from its remote owner, keeping the owner's seqno.
    ///
    /// Returns `None` when the replica is not newer than the cached value.
    pub fn insert_replica(
        &mut self,
        mut tuple: Tuple,
        now: Timestamp,
    ) -> TupleResult<Option<StoredTuple>> {
        let location = location_of(&tuple)?;
        if let (Some(incoming), Some(existing)) = (
            tuple.seqno,
            self.tuples.get(&location).and_then(|t| t.seqno),
        ) {
            if incoming <= existing {
                return Ok(None);
            }
        }
        if tuple.seqno.is_none() {
            let previous = self.tuples.get(&location).and_then(|t| t.seqno);
            tuple.seqno = Some(previous.map_or(1, |s| s + 1));
        }
        tuple.ts_write.get_or_insert(now);
        Ok(Some(self.put(location, tuple)))
    }

    fn put(&mut self, location: Location, mut tuple: Tuple) -> StoredTuple {
        tuple.is_new = Some(true);
        self.stats.writes += 1;
        if let Some(Expiry::At(at)) = tuple.ts_expire {
            self.expiry_index.insert((at, location.0, location.1.clone()));
        }
        let previous = self.tuples.insert(location.clone(), tuple.clone());
        if let Some(Expiry::At(at)) = previous.as_ref().and_then(|p| p.ts_expire) {
            if tuple.ts_expire != Some(Expiry::At(at)) {
                self.expiry_index.remove(&(at, location.0, location.1));
            }
        }
        self.stats.current_size = self.tuples.len();
        StoredTuple {
            tuple,
            created: previous.is_none(),
        }
    }

    /// Exact lookup. Marks the value as observed.
    ///
    /// With `only_new`, a value that was already observed is reported as absent.
    pub fn get(
        &mut self,
        owner: OwnerId,
        key: &TupleKey,
        only_new: bool,
    ) -> TupleResult<Option<Tuple>> {
        if !key.is_concrete() {
            return Err(TupleError::InvalidAbstractTupleUse(format!("{}:{}", owner, key)));
        }
        self.stats.reads += 1;
        let Some(stored) = self.tuples.get_mut(&(owner, key.clone())) else {
            return Ok(None);
        };
        if only_new && stored.is_new != Some(true) {
            return Ok(None);
        }
        let found = stored.clone();
        stored.is_new = Some(false);
        Ok(Some(found))
    }

    /// Lookup without marking the value as observed.
    pub fn peek(&self, owner: OwnerId, key: &TupleKey) -> Option<&Tuple> {
        self.tuples.get(&(owner, key.clone()))
    }

    /// True if a value exists at `(owner, key)`.
    pub fn exists(&self, owner: OwnerId, key: &TupleKey) -> bool {
        self.tuples.contains_key(&(owner, key.clone()))
    }

    /// Every stored tuple covered by `pattern`, in matcher order.
    /// Matched values are marked as observed.
    pub fn search(&mut self, pattern: &Tuple) -> Vec<Tuple> {
        self.stats.reads += 1;
        let matcher = self.matcher;
        let mut found = Vec::new();
        for stored in self.tuples.values_mut() {
            if matcher.is_generalization(pattern, stored) {
                found.push(stored.clone());
                stored.is_new = Some(false);
            }
        }
        found.sort_by(|a, b| matcher.compare(a, b));
        found
    }

    /// First tuple covered by `pattern` in matcher order, marked as observed.
    pub fn first(&mut self, pattern: &Tuple) -> Option<Tuple> {
        self.stats.reads += 1;
        let location = location_of(self.matching(pattern).first()?).ok()?;
        let stored = self.tuples.get_mut(&location)?;
        let found = stored.clone();
        stored.is_new = Some(false);
        Some(found)
    }

    /// Same as [`TupleStore::search`] but leaves read state untouched.
    pub fn matching(&self, pattern: &Tuple) -> Vec<&Tuple> {
        let mut found: Vec<&Tuple> = self
            .tuples
            .values()
            .filter(|t| self.matcher.is_generalization(pattern, t))
            .collect();
        found.sort_by(|a, b| self.matcher.compare(a, b));
        found
    }

    /// Append `suffix` to every tuple covered by `pattern`.
    ///
    /// With `expected_seqno`, only tuples at that seqno are touched. Returns
    /// the updated values.
    pub fn append(
        &mut self,
        pattern: &Tuple,
        suffix: &[u8],
        expected_seqno: Option<u64>,
        now: Timestamp,
    ) -> Vec<Tuple> {
        let matcher = self.matcher;
        let mut updated = Vec::new();
        for stored in self.tuples.values_mut() {
            if !matcher.is_generalization(pattern, stored) {
                continue;
            }
            if expected_seqno.is_some() && stored.seqno != expected_seqno {
                continue;
            }
            stored.data.get_or_insert_with(Vec::new).extend_from_slice(suffix);
            stored.append_seqno += 1;
            stored.ts_write = Some(now);
            stored.is_new = Some(true);
            updated.push(stored.clone());
        }
        self.stats.writes += updated.len() as u64;
        updated.sort_by(|a, b| matcher.compare(a, b));
        updated
    }

    /// Remove the value at `(owner, key)`.
    pub fn remove(&mut self, owner: OwnerId, key: &TupleKey) -> Option<Tuple> {
        let removed = self.tuples.remove(&(owner, key.clone()))?;
        if let Some(Expiry::At(at)) = removed.ts_expire {
            self.expiry_index.remove(&(at, owner, key.clone()));
        }
        self.stats.removals += 1;
        self.stats.current_size = self.tuples.len();
        Some(removed)
    }

    /// Locations whose expiry time has been reached at `now`, earliest first.
    pub fn due_for_expiry(&self, now: Timestamp) -> Vec<(OwnerId, TupleKey)> {
        self.expiry_index
            .iter()
            .take_while(|(at, _, _)| *at <= now)
            .map(|(_, owner, key)| (*owner, key.clone()))
            .collect()
    }

    /// Keys held for `owner`, sorted.
    pub fn keys_of(&self, owner: OwnerId) -> Vec<TupleKey> {
        let mut keys: Vec<TupleKey> = self
            .tuples
            .keys()
            .filter(|(o, _)| *o == owner)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Owners holding a value at `key`, sorted.
    pub fn owners_of(&self, key: &TupleKey) -> Vec<OwnerId> {
        let mut owners: Vec<OwnerId> = self
            .tuples
            .keys()
            .filter(|(_, k)| k == key)
            .map(|(o, _)| *o)
            .collect();
        owners.sort_unstable();
        owners
    }

    /// Number of stored tuples.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Activity counters.
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }
}

fn location_of(tuple: &Tuple) -> TupleResult<Location> {
    tuple.ensure_concrete()?;
    match tuple.owner {
        Some(owner) => Ok((owner, tuple.key.clone())),
        None => Err(TupleError::InvalidAbstractTupleUse(tuple.to_string())),
    }
}
