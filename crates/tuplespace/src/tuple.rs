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

//! Tuple data model
//!
//! ## Purpose
//! A tuple is the addressable unit of data in the space: an owned,
//! hierarchically keyed, timestamped record carrying an opaque payload.
//!
//! ## Design
//! Every field that can act as a wildcard is an `Option`. `None` means
//! "matches anything" when the tuple is used as a search or subscription
//! prototype. A tuple that has no wildcard in its writable fields is
//! concrete and may be inserted; anything else is abstract and is only
//! accepted by searches and subscriptions.

use crate::error::{TupleError, TupleResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of the process or device controlling a tuple.
pub type OwnerId = u32;

/// Maximum number of segments in a key.
pub const MAX_KEY_DEPTH: usize = 7;

/// Maximum length of the textual form of a key, in bytes.
pub const MAX_KEY_LENGTH: usize = 128;

/// Segment separator in textual keys.
pub const KEY_SEPARATOR: char = '.';

/// Textual marker for a wildcard key segment.
pub const WILDCARD_SEGMENT: &str = "*";

/// A (seconds, microseconds) point in time.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Whole seconds since the epoch
    pub secs: i64,
    /// Microseconds within the second
    pub usecs: u32,
}

impl Timestamp {
    /// The epoch, used as the default user timestamp.
    pub const ZERO: Timestamp = Timestamp { secs: 0, usecs: 0 };

    /// Create a timestamp, normalizing microsecond overflow into seconds.
    pub fn new(secs: i64, usecs: u32) -> Self {
        Timestamp {
            secs: secs + i64::from(usecs / 1_000_000),
            usecs: usecs % 1_000_000,
        }
    }

    /// Convert from a chrono timestamp.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Timestamp {
            secs: dt.timestamp(),
            usecs: dt.timestamp_subsec_micros().min(999_999),
        }
    }

    /// This timestamp shifted forward by `duration`.
    pub fn after(&self, duration: std::time::Duration) -> Self {
        let usecs = u64::from(self.usecs) + u64::from(duration.subsec_micros());
        Timestamp {
            secs: self.secs + duration.as_secs() as i64 + (usecs / 1_000_000) as i64,
            usecs: (usecs % 1_000_000) as u32,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.usecs)
    }
}

/// When a tuple stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Expiry {
    /// The tuple lives until overwritten or deleted
    Never,
    /// Deletion marker: the tuple is purged as soon as it is written
    Immediately,
    /// The tuple is purged once the clock reaches this point
    At(Timestamp),
}

impl Expiry {
    /// Whether a tuple with this expiry must be purged at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::Immediately => true,
            Expiry::At(at) => *at <= now,
        }
    }
}

impl Default for Expiry {
    fn default() -> Self {
        Expiry::Never
    }
}

/// Payload encoding hint.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Encoding {
    /// No encoding declared
    #[default]
    Unspecified,
    /// Printable text
    Ascii,
    /// Arbitrary bytes
    Binary,
}

/// Hierarchical tuple key.
///
/// A `None` segment is a wildcard. A trailing wildcard also matches any
/// deeper key, so `temp.*` covers both `temp.c` and `temp.room.c`. The
/// empty key (no segments) matches keys of any depth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TupleKey {
    segments: Vec<Option<String>>,
}

impl TupleKey {
    /// Parse a dotted key. `*` marks a wildcard segment.
    pub fn parse(text: &str) -> TupleResult<Self> {
        if text.is_empty() {
            return Err(TupleError::InvalidKey("empty key".to_string()));
        }
        if text.len() > MAX_KEY_LENGTH {
            return Err(TupleError::InvalidKey(format!(
                "key longer than {} bytes: {}",
                MAX_KEY_LENGTH, text
            )));
        }
        let segments = text
            .split(KEY_SEPARATOR)
            .map(|segment| match segment {
                "" => Err(TupleError::InvalidKey(format!("empty segment in {}", text))),
                WILDCARD_SEGMENT => Ok(None),
                name => Ok(Some(name.to_string())),
            })
            .collect::<TupleResult<Vec<_>>>()?;
        Self::from_segments(segments)
    }

    /// Build a key from explicit segments.
    pub fn from_segments<I>(segments: I) -> TupleResult<Self>
    where
        I: IntoIterator<Item = Option<String>>,
    {
        let segments: Vec<Option<String>> = segments.into_iter().collect();
        if segments.len() > MAX_KEY_DEPTH {
            return Err(TupleError::InvalidKey(format!(
                "key deeper than {} segments",
                MAX_KEY_DEPTH
            )));
        }
        if segments
            .iter()
            .flatten()
            .any(|s| s.is_empty() || s.contains(KEY_SEPARATOR))
        {
            return Err(TupleError::InvalidKey(
                "segments must be non-empty and must not contain '.'".to_string(),
            ));
        }
        Ok(TupleKey { segments })
    }

    /// The key matching every key.
    pub fn any() -> Self {
        TupleKey::default()
    }

    /// Key segments, `None` for wildcards.
    pub fn segments(&self) -> &[Option<String>] {
        &self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True for the empty "any key" pattern.
    pub fn is_any(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if the key names exactly one concrete location.
    pub fn is_concrete(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(Option::is_some)
    }

    /// True if the last segment is a wildcard (or the key is empty).
    pub fn ends_with_wildcard(&self) -> bool {
        matches!(self.segments.last(), None | Some(None))
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str(WILDCARD_SEGMENT);
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", KEY_SEPARATOR)?;
            }
            f.write_str(segment.as_deref().unwrap_or(WILDCARD_SEGMENT))?;
        }
        Ok(())
    }
}

impl FromStr for TupleKey {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TupleKey::parse(s)
    }
}

/// A tuple, concrete or abstract.
///
/// Fields set to `None` are wildcards. `ts_write` and `seqno` are assigned
/// by the store on insert; `is_new` is read state (see [`Tuple::only_new`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    /// Controlling process
    pub owner: Option<OwnerId>,
    /// Hierarchical name
    pub key: TupleKey,
    /// Last writer
    pub creator: Option<OwnerId>,
    /// Time of the last write, assigned by the store
    pub ts_write: Option<Timestamp>,
    /// Application-defined timestamp
    pub ts_user: Option<Timestamp>,
    /// Expiry policy
    pub ts_expire: Option<Expiry>,
    /// Payload
    pub data: Option<Vec<u8>>,
    /// Free-text content type
    pub mimetype: Option<String>,
    /// Payload encoding hint
    pub encoding: Option<Encoding>,
    /// Per-(owner, key) write counter, assigned by the store
    pub seqno: Option<u64>,
    /// Number of appends applied since the last full write
    #[serde(default)]
    pub append_seqno: u32,
    /// On stored tuples: not yet observed by a reader.
    /// On prototypes: `Some(true)` restricts matches to unobserved values.
    pub is_new: Option<bool>,
}

impl Tuple {
    /// Create a concrete tuple written by its owner.
    pub fn new(owner: OwnerId, key: TupleKey, data: impl Into<Vec<u8>>) -> Self {
        Tuple {
            owner: Some(owner),
            key,
            creator: Some(owner),
            ts_write: None,
            ts_user: Some(Timestamp::ZERO),
            ts_expire: Some(Expiry::Never),
            data: Some(data.into()),
            mimetype: Some(String::new()),
            encoding: Some(Encoding::Unspecified),
            seqno: None,
            append_seqno: 0,
            is_new: None,
        }
    }

    /// Create a concrete text tuple from a dotted key.
    pub fn text(owner: OwnerId, key: &str, data: &str) -> TupleResult<Self> {
        Ok(Tuple::new(owner, TupleKey::parse(key)?, data.as_bytes().to_vec())
            .with_encoding(Encoding::Ascii)
            .with_mimetype("text/plain"))
    }

    /// Create a fully abstract prototype matching every tuple.
    pub fn pattern() -> Self {
        Tuple {
            owner: None,
            key: TupleKey::any(),
            creator: None,
            ts_write: None,
            ts_user: None,
            ts_expire: None,
            data: None,
            mimetype: None,
            encoding: None,
            seqno: None,
            append_seqno: 0,
            is_new: None,
        }
    }

    /// Prototype for a single (owner, key) location.
    pub fn locator(owner: Option<OwnerId>, key: TupleKey) -> Self {
        Tuple::pattern().with_key(key).with_owner_opt(owner)
    }

    /// Set the owner.
    pub fn with_owner(mut self, owner: OwnerId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Set or clear the owner.
    pub fn with_owner_opt(mut self, owner: Option<OwnerId>) -> Self {
        self.owner = owner;
        self
    }

    /// Set the key.
    pub fn with_key(mut self, key: TupleKey) -> Self {
        self.key = key;
        self
    }

    /// Set the creator.
    pub fn with_creator(mut self, creator: OwnerId) -> Self {
        self.creator = Some(creator);
        self
    }

    /// Set the payload.
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the mimetype.
    pub fn with_mimetype(mut self, mimetype: &str) -> Self {
        self.mimetype = Some(mimetype.to_string());
        self
    }

    /// Set the encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Set the expiry.
    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.ts_expire = Some(expiry);
        self
    }

    /// Set the user timestamp.
    pub fn with_user_timestamp(mut self, ts: Timestamp) -> Self {
        self.ts_user = Some(ts);
        self
    }

    /// Restrict a prototype to values not yet observed.
    pub fn only_new(mut self) -> Self {
        self.is_new = Some(true);
        self
    }

    /// True if any writable field is a wildcard.
    pub fn is_abstract(&self) -> bool {
        crate::matcher::is_abstract(self)
    }

    /// Reject abstract tuples where a concrete one is required.
    pub fn ensure_concrete(&self) -> TupleResult<()> {
        if self.is_abstract() {
            return Err(TupleError::InvalidAbstractTupleUse(self.to_string()));
        }
        Ok(())
    }

    /// True if this tuple carries the deletion marker.
    pub fn is_deletion(&self) -> bool {
        self.ts_expire == Some(Expiry::Immediately)
    }

    /// Payload as UTF-8 text, if it is.
    pub fn data_str(&self) -> Option<&str> {
        self.data
            .as_deref()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\0'))
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner {
            Some(owner) => write!(f, "{}:{}", owner, self.key)?,
            None => write!(f, "*:{}", self.key)?,
        }
        match (&self.data, self.data_str()) {
            (None, _) => write!(f, " = *"),
            (Some(_), Some(text)) => write!(f, " = {:?}", text),
            (Some(bytes), None) => write!(f, " = <{} bytes>", bytes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_with_wildcards() {
        let key = TupleKey::parse("robot.*.pose").unwrap();
        assert_eq!(key.depth(), 3);
        assert_eq!(key.segments()[1], None);
        assert!(!key.is_concrete());
        assert!(!key.ends_with_wildcard());
        assert_eq!(key.to_string(), "robot.*.pose");
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert!(matches!(TupleKey::parse(""), Err(TupleError::InvalidKey(_))));
        assert!(matches!(TupleKey::parse("a..b"), Err(TupleError::InvalidKey(_))));
        assert!(matches!(
            TupleKey::parse("a.b.c.d.e.f.g.h"),
            Err(TupleError::InvalidKey(_))
        ));
        let long = "x".repeat(MAX_KEY_LENGTH + 1);
        assert!(TupleKey::parse(&long).is_err());
    }

    #[test]
    fn test_new_tuple_is_concrete_and_pattern_is_abstract() {
        let tuple = Tuple::text(5, "temp.c", "21.5").unwrap();
        assert!(!tuple.is_abstract());
        assert!(tuple.ensure_concrete().is_ok());
        assert_eq!(tuple.data_str(), Some("21.5"));

        let pattern = Tuple::pattern().with_owner(5);
        assert!(pattern.is_abstract());
        assert!(matches!(
            pattern.ensure_concrete(),
            Err(TupleError::InvalidAbstractTupleUse(_))
        ));
    }

    #[test]
    fn test_expiry_due() {
        let now = Timestamp::new(100, 0);
        assert!(!Expiry::Never.is_due(now));
        assert!(Expiry::Immediately.is_due(now));
        assert!(Expiry::At(Timestamp::new(99, 999_999)).is_due(now));
        assert!(!Expiry::At(Timestamp::new(100, 1)).is_due(now));
    }

    #[test]
    fn test_timestamp_after_carries_microseconds() {
        let ts = Timestamp::new(10, 900_000).after(std::time::Duration::from_millis(250));
        assert_eq!(ts, Timestamp::new(11, 150_000));
    }
}
