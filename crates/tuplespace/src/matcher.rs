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

//! Tuple matching
//!
//! ## Purpose
//! Decides how two tuples relate when either may contain wildcards:
//! - [`Matcher::compare`]: total order used to sort search results
//! - [`Matcher::is_equal`]: strict field-by-field equality
//! - [`Matcher::is_generalization`]: "A covers B", used by search and dispatch
//! - [`Matcher::unifies`]: "some concrete tuple could match both", used to
//!   test whether a pattern overlaps an existing subscription
//!
//! ## Payload comparison
//! Payloads compare case-insensitively by default. Peers written against
//! older kernels depend on this, so it stays the default; set
//! [`PayloadCase::Sensitive`] for byte-exact matching.

use crate::tuple::{Tuple, TupleKey};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How payload bytes are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadCase {
    /// ASCII case is ignored
    #[default]
    Insensitive,
    /// Bytes must match exactly
    Sensitive,
}

/// Tuple comparison under a payload policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher {
    payload_case: PayloadCase,
}

impl Matcher {
    /// Create a matcher with the given payload policy.
    pub const fn new(payload_case: PayloadCase) -> Self {
        Matcher { payload_case }
    }

    /// Payload policy in effect.
    pub fn payload_case(&self) -> PayloadCase {
        self.payload_case
    }

    /// Total order: owner, key, timestamps, payload, then creator and seqno.
    /// Wildcards sort before concrete values.
    pub fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        a.owner
            .cmp(&b.owner)
            .then_with(|| a.key.cmp(&b.key))
            .then_with(|| a.ts_write.cmp(&b.ts_write))
            .then_with(|| a.ts_user.cmp(&b.ts_user))
            .then_with(|| a.ts_expire.cmp(&b.ts_expire))
            .then_with(|| self.cmp_data(a.data.as_deref(), b.data.as_deref()))
            .then_with(|| cmp_text(a.mimetype.as_deref(), b.mimetype.as_deref()))
            .then_with(|| a.encoding.cmp(&b.encoding))
            .then_with(|| a.creator.cmp(&b.creator))
            .then_with(|| a.seqno.cmp(&b.seqno))
    }

    /// Strict equality. A wildcard only equals a wildcard.
    pub fn is_equal(&self, a: &Tuple, b: &Tuple) -> bool {
        a.owner == b.owner
            && a.key == b.key
            && a.creator == b.creator
            && a.ts_write == b.ts_write
            && a.ts_user == b.ts_user
            && a.ts_expire == b.ts_expire
            && a.encoding == b.encoding
            && a.seqno == b.seqno
            && match (&a.mimetype, &b.mimetype) {
                (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
                (x, y) => x == y,
            }
            && match (&a.data, &b.data) {
                (Some(x), Some(y)) => self.data_eq(x, y),
                (x, y) => x == y,
            }
    }

    /// True if every field of `a` is a wildcard or equal to the same field of `b`.
    pub fn is_generalization(&self, a: &Tuple, b: &Tuple) -> bool {
        covers(&a.owner, &b.owner)
            && key_generalizes(&a.key, &b.key)
            && covers(&a.creator, &b.creator)
            && covers(&a.ts_write, &b.ts_write)
            && covers(&a.ts_user, &b.ts_user)
            && covers(&a.ts_expire, &b.ts_expire)
            && covers(&a.encoding, &b.encoding)
            && covers(&a.seqno, &b.seqno)
            && match (&a.mimetype, &b.mimetype) {
                (None, _) => true,
                (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
                (Some(_), None) => false,
            }
            && match (&a.data, &b.data) {
                (None, _) => true,
                (Some(x), Some(y)) => self.data_eq(x, y),
                (Some(_), None) => false,
            }
            && (a.is_new != Some(true) || b.is_new == Some(true))
    }

    /// True if some concrete tuple could be covered by both `a` and `b`.
    pub fn unifies(&self, a: &Tuple, b: &Tuple) -> bool {
        compatible(&a.owner, &b.owner)
            && keys_unify(&a.key, &b.key)
            && compatible(&a.creator, &b.creator)
            && compatible(&a.ts_write, &b.ts_write)
            && compatible(&a.ts_user, &b.ts_user)
            && compatible(&a.ts_expire, &b.ts_expire)
            && compatible(&a.encoding, &b.encoding)
            && compatible(&a.seqno, &b.seqno)
            && match (&a.mimetype, &b.mimetype) {
                (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
                _ => true,
            }
            && match (&a.data, &b.data) {
                (Some(x), Some(y)) => self.data_eq(x, y),
                _ => true,
            }
    }

    fn data_eq(&self, a: &[u8], b: &[u8]) -> bool {
        match self.payload_case {
            PayloadCase::Insensitive => a.eq_ignore_ascii_case(b),
            PayloadCase::Sensitive => a == b,
        }
    }

    fn cmp_data(&self, a: Option<&[u8]>, b: Option<&[u8]>) -> Ordering {
        match (a, b) {
            (Some(x), Some(y)) => x.len().cmp(&y.len()).then_with(|| match self.payload_case {
                PayloadCase::Insensitive => x
                    .iter()
                    .map(u8::to_ascii_lowercase)
                    .cmp(y.iter().map(u8::to_ascii_lowercase)),
                PayloadCase::Sensitive => x.cmp(y),
            }),
            (x, y) => x.cmp(&y),
        }
    }
}

fn covers<T: PartialEq>(pattern: &Option<T>, value: &Option<T>) -> bool {
    match pattern {
        None => true,
        Some(p) => value.as_ref() == Some(p),
    }
}

fn compatible<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

fn cmp_text(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x
            .bytes()
            .map(|c| c.to_ascii_lowercase())
            .cmp(y.bytes().map(|c| c.to_ascii_lowercase())),
        (x, y) => x.cmp(&y),
    }
}

/// True if `pattern` covers every key `key` could stand for.
pub fn key_generalizes(pattern: &TupleKey, key: &TupleKey) -> bool {
    if pattern.is_any() {
        return true;
    }
    let (ps, ks) = (pattern.segments(), key.segments());
    let depth_ok = if pattern.ends_with_wildcard() {
        ks.len() >= ps.len()
    } else {
        ks.len() == ps.len()
    };
    depth_ok && ps.iter().zip(ks).all(|(p, k)| p.is_none() || p == k)
}

/// True if some concrete key is covered by both keys.
pub fn keys_unify(a: &TupleKey, b: &TupleKey) -> bool {
    if a.is_any() || b.is_any() {
        return true;
    }
    let (xs, ys) = (a.segments(), b.segments());
    let depth_ok = match xs.len().cmp(&ys.len()) {
        Ordering::Equal => true,
        Ordering::Less => a.ends_with_wildcard(),
        Ordering::Greater => b.ends_with_wildcard(),
    };
    depth_ok
        && xs
            .iter()
            .zip(ys)
            .all(|(x, y)| x.is_none() || y.is_none() || x == y)
}

/// True if any writable field of the tuple is a wildcard.
///
/// `ts_write`, `seqno` and `is_new` are assigned by the store and do not
/// make a tuple abstract.
pub fn is_abstract(t: &Tuple) -> bool {
    t.owner.is_none()
        || t.creator.is_none()
        || t.ts_user.is_none()
        || t.ts_expire.is_none()
        || t.encoding.is_none()
        || t.mimetype.is_none()
        || t.data.is_none()
        || !t.key.is_concrete()
}

/// [`Matcher::compare`] with the default payload policy.
pub fn compare(a: &Tuple, b: &Tuple) -> Ordering {
    Matcher::default().compare(a, b)
}

/// [`Matcher::is_equal`] with the default payload policy.
pub fn is_equal(a: &Tuple, b: &Tuple) -> bool {
    Matcher::default().is_equal(a, b)
}

/// [`Matcher::is_generalization`] with the default payload policy.
pub fn is_generalization(a: &Tuple, b: &Tuple) -> bool {
    Matcher::default().is_generalization(a, b)
}

/// [`Matcher::unifies`] with the default payload policy.
pub fn unifies(a: &Tuple, b: &Tuple) -> bool {
    Matcher::default().unifies(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Encoding, Expiry, Timestamp};

    fn key(s: &str) -> TupleKey {
        TupleKey::parse(s).unwrap()
    }

    fn stored(owner: u32, k: &str, data: &str, seqno: u64) -> Tuple {
        let mut t = Tuple::text(owner, k, data).unwrap();
        t.seqno = Some(seqno);
        t.ts_write = Some(Timestamp::new(1_000, seqno as u32));
        t
    }

    #[test]
    fn test_concrete_tuple_generalizes_and_compares_equal_to_itself() {
        let t = stored(5, "temp.c", "21.5", 3);
        assert!(is_generalization(&t, &t));
        assert_eq!(compare(&t, &t), Ordering::Equal);
        assert!(is_equal(&t, &t));
    }

    #[test]
    fn test_wildcard_owner_and_trailing_key_wildcard() {
        let t = stored(5, "temp.c", "21.5", 1);
        let p = Tuple::pattern().with_key(key("temp.*"));
        assert!(is_generalization(&p, &t));
        let deeper = stored(5, "temp.room.c", "20", 1);
        assert!(is_generalization(&p, &deeper));
        let sibling = stored(5, "humidity.c", "40", 1);
        assert!(!is_generalization(&p, &sibling));
        // the concrete tuple never generalizes the pattern
        assert!(!is_generalization(&t, &p));
    }

    #[test]
    fn test_middle_wildcard_matches_exactly_one_segment() {
        let p = Tuple::pattern().with_key(key("robot.*.pose"));
        assert!(is_generalization(&p, &stored(1, "robot.arm.pose", "x", 1)));
        assert!(!is_generalization(&p, &stored(1, "robot.pose", "x", 1)));
        assert!(!is_generalization(&p, &stored(1, "robot.arm.left.pose", "x", 1)));
    }

    #[test]
    fn test_keys_are_case_sensitive_payload_is_not() {
        let t = stored(5, "Temp.c", "ON", 1);
        assert!(!is_generalization(&Tuple::pattern().with_key(key("temp.c")), &t));
        let by_data = Tuple::pattern().with_data("on");
        assert!(is_generalization(&by_data, &t));
        let strict = Matcher::new(PayloadCase::Sensitive);
        assert!(!strict.is_generalization(&by_data, &t));
    }

    #[test]
    fn test_is_equal_is_strict_about_wildcards() {
        let t = stored(5, "temp.c", "21.5", 1);
        let mut hand_built = t.clone();
        assert!(is_equal(&t, &hand_built));
        hand_built.data = Some(b"21.6".to_vec());
        assert!(!is_equal(&t, &hand_built));

        let p = Tuple::pattern().with_key(key("temp.c"));
        assert!(!is_equal(&p, &t));
        assert!(is_equal(&p, &p.clone()));
    }

    #[test]
    fn test_unify_detects_partial_overlap() {
        let a = Tuple::pattern().with_key(key("a.*.c"));
        let b = Tuple::pattern().with_key(key("a.b.*"));
        assert!(!is_generalization(&a, &b));
        assert!(!is_generalization(&b, &a));
        assert!(unifies(&a, &b));

        let c = Tuple::pattern().with_key(key("a.x.d"));
        assert!(!unifies(&a, &c));
        let owned = Tuple::pattern().with_owner(2).with_key(key("a.b.c"));
        assert!(!unifies(&owned, &Tuple::pattern().with_owner(3)));
    }

    #[test]
    fn test_only_new_prototype_filters_observed_values() {
        let mut t = stored(1, "x", "1", 1);
        t.is_new = Some(false);
        let p = Tuple::pattern().with_key(key("x")).only_new();
        assert!(!is_generalization(&p, &t));
        t.is_new = Some(true);
        assert!(is_generalization(&p, &t));
    }

    #[test]
    fn test_compare_orders_by_owner_then_key_then_seqno() {
        let a = stored(1, "b", "x", 1);
        let b = stored(2, "a", "x", 1);
        assert_eq!(compare(&a, &b), Ordering::Less);

        let c = stored(1, "a", "x", 1);
        assert_eq!(compare(&c, &a), Ordering::Less);

        let mut same_time = stored(1, "a", "x", 1);
        same_time.creator = Some(9);
        assert_eq!(compare(&c, &same_time), Ordering::Less);
    }

    #[test]
    fn test_is_abstract_ignores_store_assigned_fields() {
        let t = Tuple::text(1, "a.b", "v").unwrap();
        assert!(t.ts_write.is_none() && t.seqno.is_none());
        assert!(!is_abstract(&t));

        let mut no_mime = t.clone();
        no_mime.mimetype = None;
        assert!(is_abstract(&no_mime));

        let mut wild_key = t.clone();
        wild_key.key = key("a.*");
        assert!(is_abstract(&wild_key));

        let expiring = t.with_expiry(Expiry::Immediately).with_encoding(Encoding::Binary);
        assert!(!is_abstract(&expiring));
    }
}
