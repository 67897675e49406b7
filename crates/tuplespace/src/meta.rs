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

//! Meta tuples and indirect subscriptions
//!
//! ## Purpose
//! A meta tuple is an ordinary tuple whose payload names another tuple,
//! `(META <owner> <key>)`. Readers go through it to reach "whatever the
//! meta tuple currently points at".
//!
//! ## Design
//! An indirect subscription is two registry entries: plain interest in the
//! meta tuple itself (under the handle returned to the caller) and a bound
//! direct subscription on the current target, carrying the caller's
//! callback. The meta tuple is named by a prototype, so any meta tuple it
//! covers can repoint the subscription. When one is written,
//! [`MetaResolver::retarget`] drops the bound entry and binds a new one.
//! The registry and resolver are owned by the same task, so the swap is
//! never observed half done.

use crate::error::{TupleError, TupleResult};
use crate::matcher::Matcher;
use crate::registry::{
    DispatchMode, HandleAllocator, Subscription, SubscriptionHandle, SubscriptionRegistry,
    TupleCallback,
};
use crate::tuple::{Encoding, OwnerId, Tuple, TupleKey};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Mimetype marking a tuple as a meta tuple.
pub const META_MIMETYPE: &str = "x-coordspace/meta";

const META_TAG: &str = "META";
const UNRESOLVED_OWNER: &str = "-1";
const UNRESOLVED_KEY: &str = "NULL";

/// Reference stored in a meta tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaRef {
    /// Owner of the referenced tuple
    pub owner: OwnerId,
    /// Key of the referenced tuple
    pub key: TupleKey,
}

impl MetaRef {
    /// Reference a concrete location.
    pub fn new(owner: OwnerId, key: TupleKey) -> TupleResult<Self> {
        if !key.is_concrete() {
            return Err(TupleError::InvalidAbstractTupleUse(format!("{}:{}", owner, key)));
        }
        Ok(MetaRef { owner, key })
    }

    /// Prototype covering exactly the referenced location.
    pub fn locator(&self) -> Tuple {
        Tuple::locator(Some(self.owner), self.key.clone())
    }
}

impl fmt::Display for MetaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.key)
    }
}

/// Payload text for a reference, or for an unresolved meta tuple.
pub fn encode(target: Option<&MetaRef>) -> String {
    match target {
        Some(r) => format!("({} {} {})", META_TAG, r.owner, r.key),
        None => format!("({} {} {})", META_TAG, UNRESOLVED_OWNER, UNRESOLVED_KEY),
    }
}

/// Parse a meta payload. `Ok(None)` means the meta tuple is unresolved.
pub fn parse(data: &[u8]) -> TupleResult<Option<MetaRef>> {
    let text = std::str::from_utf8(data)
        .map_err(|_| TupleError::InvalidMeta("payload is not text".to_string()))?
        .trim_end_matches('\0')
        .trim();
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| TupleError::InvalidMeta(text.to_string()))?;
    let mut words = inner.split_whitespace();
    let (tag, owner, key) = match (words.next(), words.next(), words.next(), words.next()) {
        (Some(tag), Some(owner), Some(key), None) => (tag, owner, key),
        _ => return Err(TupleError::InvalidMeta(text.to_string())),
    };
    if !tag.eq_ignore_ascii_case(META_TAG) {
        return Err(TupleError::InvalidMeta(text.to_string()));
    }
    if owner == UNRESOLVED_OWNER {
        return Ok(None);
    }
    let owner: OwnerId = owner
        .parse()
        .map_err(|_| TupleError::InvalidMeta(format!("bad owner in {}", text)))?;
    let key = TupleKey::parse(key).map_err(|e| TupleError::InvalidMeta(e.to_string()))?;
    MetaRef::new(owner, key)
        .map(Some)
        .map_err(|e| TupleError::InvalidMeta(e.to_string()))
}

/// Build the meta tuple stored at `(owner, key)`.
pub fn meta_tuple(owner: OwnerId, key: TupleKey, target: Option<&MetaRef>) -> Tuple {
    Tuple::new(owner, key, encode(target).into_bytes())
        .with_mimetype(META_MIMETYPE)
        .with_encoding(Encoding::Ascii)
}

/// Reference held by a meta tuple.
pub fn resolve(tuple: &Tuple) -> TupleResult<Option<MetaRef>> {
    let is_meta_type = tuple
        .mimetype
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case(META_MIMETYPE));
    if !is_meta_type {
        return Err(TupleError::InvalidMeta(format!("{} is not a meta tuple", tuple)));
    }
    match &tuple.data {
        Some(data) => parse(data),
        None => Err(TupleError::InvalidAbstractTupleUse(tuple.to_string())),
    }
}

/// True if the tuple is a meta tuple pointing somewhere.
pub fn is_meta(tuple: &Tuple) -> bool {
    matches!(resolve(tuple), Ok(Some(_)))
}

struct IndirectSubscription {
    prototype: Tuple,
    source: Option<(OwnerId, TupleKey)>,
    target: Option<MetaRef>,
    bound: Option<SubscriptionHandle>,
    callback: Option<TupleCallback>,
}

/// Indirect subscriptions and their current bindings.
#[derive(Default)]
pub struct MetaResolver {
    matcher: Matcher,
    entries: BTreeMap<SubscriptionHandle, IndirectSubscription>,
    rebinds: u64,
}

impl MetaResolver {
    /// Create an empty resolver matching meta tuples with `matcher`.
    pub fn new(matcher: Matcher) -> Self {
        MetaResolver {
            matcher,
            ..Self::default()
        }
    }

    /// Register an indirect subscription through every meta tuple covered
    /// by `prototype`, binding it to `current` right away.
    ///
    /// `current` is the meta tuple that already matches, if any.
    pub fn register(
        &mut self,
        registry: &mut SubscriptionRegistry,
        handles: &HandleAllocator,
        handle: SubscriptionHandle,
        mut prototype: Tuple,
        callback: Option<TupleCallback>,
        current: Option<&Tuple>,
    ) {
        prototype.is_new = None;
        registry.insert(Subscription::interest(handle, prototype.clone()));
        self.entries.insert(
            handle,
            IndirectSubscription {
                prototype,
                source: None,
                target: None,
                bound: None,
                callback,
            },
        );
        if let Some(meta) = current {
            self.rebind(registry, handles, handle, meta, target_of_meta(meta));
        }
    }

    /// Drop an indirect subscription and its bound subscription.
    pub fn unregister(
        &mut self,
        registry: &mut SubscriptionRegistry,
        handle: SubscriptionHandle,
    ) -> TupleResult<()> {
        let entry = self
            .entries
            .remove(&handle)
            .ok_or(TupleError::UnknownHandle(handle.id()))?;
        if let Some(bound) = entry.bound {
            let _ = registry.remove(bound);
        }
        let _ = registry.remove(handle);
        Ok(())
    }

    /// True if `handle` names an indirect subscription.
    pub fn contains(&self, handle: SubscriptionHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Current target of an indirect subscription.
    pub fn target_of(&self, handle: SubscriptionHandle) -> Option<&MetaRef> {
        self.entries.get(&handle).and_then(|e| e.target.as_ref())
    }

    /// True if writing `meta` would touch some indirect subscription.
    pub fn watches(&self, meta: &Tuple) -> bool {
        self.entries
            .values()
            .any(|e| self.matcher.is_generalization(&e.prototype, meta))
    }

    /// Point every indirect subscription whose prototype covers the written
    /// `meta` at the reference it holds. Returns the number that changed
    /// binding.
    pub fn retarget(
        &mut self,
        registry: &mut SubscriptionRegistry,
        handles: &HandleAllocator,
        meta: &Tuple,
    ) -> usize {
        let target = target_of_meta(meta);
        let affected: Vec<SubscriptionHandle> = self
            .entries
            .iter()
            .filter(|(_, e)| self.matcher.is_generalization(&e.prototype, meta))
            .map(|(h, _)| *h)
            .collect();
        affected
            .into_iter()
            .filter(|h| self.rebind(registry, handles, *h, meta, target.clone()))
            .count()
    }

    /// Unbind the indirect subscriptions bound through the meta tuple at
    /// `(owner, key)`, which was removed.
    pub fn release(
        &mut self,
        registry: &mut SubscriptionRegistry,
        handles: &HandleAllocator,
        owner: OwnerId,
        key: &TupleKey,
    ) -> usize {
        let removed = Tuple::locator(Some(owner), key.clone());
        let affected: Vec<SubscriptionHandle> = self
            .entries
            .iter()
            .filter(|(_, e)| e.source.as_ref().is_some_and(|(o, k)| *o == owner && k == key))
            .map(|(h, _)| *h)
            .collect();
        affected
            .into_iter()
            .filter(|h| self.rebind(registry, handles, *h, &removed, None))
            .count()
    }

    fn rebind(
        &mut self,
        registry: &mut SubscriptionRegistry,
        handles: &HandleAllocator,
        handle: SubscriptionHandle,
        meta: &Tuple,
        target: Option<MetaRef>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&handle) else {
            return false;
        };
        entry.source = match (&target, meta.owner) {
            (Some(_), Some(owner)) => Some((owner, meta.key.clone())),
            _ => None,
        };
        if entry.target == target {
            return false;
        }
        if let Some(old) = entry.bound.take() {
            let _ = registry.remove(old);
        }
        if let Some(reference) = &target {
            let bound = handles.allocate();
            let subscription = match &entry.callback {
                Some(cb) => Subscription::callback(
                    bound,
                    reference.locator(),
                    DispatchMode::OnWrite,
                    cb.clone(),
                ),
                None => Subscription::interest(bound, reference.locator()),
            };
            registry.insert(subscription);
            entry.bound = Some(bound);
        }
        entry.target = target;
        self.rebinds += 1;
        true
    }

    /// Number of indirect subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no indirect subscriptions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binding changes since creation.
    pub fn rebinds(&self) -> u64 {
        self.rebinds
    }
}

fn target_of_meta(meta: &Tuple) -> Option<MetaRef> {
    resolve(meta).unwrap_or_else(|e| {
        debug!(tuple = %meta, error = %e, "meta tuple does not resolve");
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key(s: &str) -> TupleKey {
        TupleKey::parse(s).unwrap()
    }

    fn target(owner: OwnerId, k: &str) -> MetaRef {
        MetaRef::new(owner, key(k)).unwrap()
    }

    #[test]
    fn test_encode_and_parse_payload() {
        let r = target(5, "temp.c");
        assert_eq!(encode(Some(&r)), "(META 5 temp.c)");
        assert_eq!(parse(b"(META 5 temp.c)").unwrap(), Some(r));
        assert_eq!(parse(b"  ( meta 5 temp.c )\0").unwrap(), Some(target(5, "temp.c")));
        assert_eq!(parse(encode(None).as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_malformed_payload() {
        let cases: [&[u8]; 7] = [
            b"META 5 a",
            b"(META 5)",
            b"(LINK 5 a)",
            b"(META x a)",
            b"(META 5 a.*)",
            b"(META 5 a b)",
            &[0xff, 0xfe],
        ];
        for bad in cases {
            assert!(matches!(parse(bad), Err(TupleError::InvalidMeta(_))), "{:?}", bad);
        }
    }

    #[test]
    fn test_resolve_requires_meta_mimetype() {
        let meta = meta_tuple(1, key("cam.source"), Some(&target(2, "cam.left")));
        assert_eq!(resolve(&meta).unwrap(), Some(target(2, "cam.left")));
        assert!(is_meta(&meta));

        let plain = Tuple::text(1, "cam.source", "(META 2 cam.left)").unwrap();
        assert!(matches!(resolve(&plain), Err(TupleError::InvalidMeta(_))));
        assert!(!is_meta(&meta_tuple(1, key("cam.source"), None)));
    }

    #[test]
    fn test_retarget_moves_callback_to_new_target() {
        let handles = HandleAllocator::new();
        let mut registry = SubscriptionRegistry::default();
        let mut resolver = MetaResolver::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let callback: TupleCallback = Arc::new(move |_: &Tuple| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handle = handles.allocate();
        let first = meta_tuple(1, key("cam.source"), Some(&target(2, "cam.left")));
        resolver.register(
            &mut registry,
            &handles,
            handle,
            Tuple::locator(Some(1), key("cam.source")),
            Some(callback),
            Some(&first),
        );
        assert_eq!(registry.len(), 2);
        registry.dispatch(DispatchMode::OnWrite, &Tuple::text(2, "cam.left", "f1").unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let second = meta_tuple(1, key("cam.source"), Some(&target(2, "cam.right")));
        assert!(resolver.watches(&second));
        assert_eq!(resolver.retarget(&mut registry, &handles, &second), 1);
        assert_eq!(resolver.target_of(handle), Some(&target(2, "cam.right")));
        registry.dispatch(DispatchMode::OnWrite, &Tuple::text(2, "cam.left", "f2").unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        registry.dispatch(DispatchMode::OnWrite, &Tuple::text(2, "cam.right", "f3").unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // same target again is not a rebind
        assert_eq!(resolver.retarget(&mut registry, &handles, &second), 0);
        assert_eq!(resolver.rebinds(), 2);

        resolver.unregister(&mut registry, handle).unwrap();
        assert!(registry.is_empty());
        assert!(resolver.unregister(&mut registry, handle).is_err());
    }

    #[test]
    fn test_wildcard_owner_prototype_follows_any_matching_meta() {
        let handles = HandleAllocator::new();
        let mut registry = SubscriptionRegistry::default();
        let mut resolver = MetaResolver::new(Matcher::default());
        let handle = handles.allocate();
        resolver.register(
            &mut registry,
            &handles,
            handle,
            Tuple::locator(None, key("cam.source")),
            None,
            None,
        );
        assert!(resolver.target_of(handle).is_none());
        assert!(!resolver.watches(&meta_tuple(3, key("cam.other"), None)));

        let from_three = meta_tuple(3, key("cam.source"), Some(&target(2, "cam.left")));
        assert_eq!(resolver.retarget(&mut registry, &handles, &from_three), 1);
        assert_eq!(resolver.target_of(handle), Some(&target(2, "cam.left")));

        let from_four = meta_tuple(4, key("cam.source"), Some(&target(2, "cam.right")));
        assert_eq!(resolver.retarget(&mut registry, &handles, &from_four), 1);
        assert_eq!(resolver.target_of(handle), Some(&target(2, "cam.right")));

        // removing a meta tuple it is no longer bound through changes nothing
        assert_eq!(resolver.release(&mut registry, &handles, 3, &key("cam.source")), 0);
        assert_eq!(resolver.release(&mut registry, &handles, 4, &key("cam.source")), 1);
        assert!(resolver.target_of(handle).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unresolved_meta_binds_nothing() {
        let handles = HandleAllocator::new();
        let mut registry = SubscriptionRegistry::default();
        let mut resolver = MetaResolver::default();
        let handle = handles.allocate();
        let unresolved = meta_tuple(1, key("m"), None);
        resolver.register(
            &mut registry,
            &handles,
            handle,
            Tuple::locator(Some(1), key("m")),
            None,
            Some(&unresolved),
        );
        assert_eq!(registry.len(), 1);
        assert!(resolver.watches(&unresolved));
        assert!(resolver.target_of(handle).is_none());
    }
}
