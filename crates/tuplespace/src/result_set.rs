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

//! Ordered, replayable search results with a cursor.

use crate::tuple::Tuple;

/// Results of one or more searches.
///
/// The cursor starts before the first element. Searching again into the
/// same result set appends to it, leaving the cursor where it was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    tuples: Vec<Tuple>,
    cursor: Option<usize>,
}

impl ResultSet {
    /// Create an empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the results of another search.
    pub fn append(&mut self, tuples: impl IntoIterator<Item = Tuple>) {
        self.tuples.extend(tuples);
    }

    /// Move the cursor to the first result and return it.
    pub fn first(&mut self) -> Option<&Tuple> {
        self.cursor = Some(0);
        self.tuples.first()
    }

    /// Advance the cursor and return the result under it.
    pub fn advance(&mut self) -> Option<&Tuple> {
        let next = self.cursor.map_or(0, |c| c + 1).min(self.tuples.len());
        self.cursor = Some(next);
        self.tuples.get(next)
    }

    /// Result under the cursor.
    pub fn current(&self) -> Option<&Tuple> {
        self.cursor.and_then(|c| self.tuples.get(c))
    }

    /// True if [`ResultSet::advance`] would return a result.
    pub fn has_next(&self) -> bool {
        self.cursor.map_or(0, |c| c + 1) < self.tuples.len()
    }

    /// Put the cursor back before the first result.
    pub fn reset(&mut self) {
        self.cursor = None;
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// True if no search produced any result.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Iterate over all results regardless of the cursor.
    pub fn iter(&self) -> std::slice::Iter<'_, Tuple> {
        self.tuples.iter()
    }

    /// Consume the set, returning its results in order.
    pub fn into_vec(self) -> Vec<Tuple> {
        self.tuples
    }
}

impl From<Vec<Tuple>> for ResultSet {
    fn from(tuples: Vec<Tuple>) -> Self {
        ResultSet {
            tuples,
            cursor: None,
        }
    }
}

impl IntoIterator for ResultSet {
    type Item = Tuple;
    type IntoIter = std::vec::IntoIter<Tuple>;

    fn into_iter(self) -> Self::IntoIter {
        self.tuples.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Tuple;
    type IntoIter = std::slice::Iter<'a, Tuple>;

    fn into_iter(self) -> Self::IntoIter {
        self.tuples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(key: &str) -> Tuple {
        Tuple::text(1, key, "v").unwrap()
    }

    #[test]
    fn test_cursor_walks_and_replays() {
        let mut rs = ResultSet::from(vec![t("a"), t("b")]);
        assert!(rs.current().is_none());
        assert!(rs.has_next());
        assert_eq!(rs.advance().unwrap().key.to_string(), "a");
        assert_eq!(rs.advance().unwrap().key.to_string(), "b");
        assert!(!rs.has_next());
        assert!(rs.advance().is_none());
        assert!(rs.advance().is_none());

        assert_eq!(rs.first().unwrap().key.to_string(), "a");
        rs.reset();
        assert_eq!(rs.advance().unwrap().key.to_string(), "a");
    }

    #[test]
    fn test_append_keeps_cursor() {
        let mut rs = ResultSet::from(vec![t("a")]);
        rs.advance();
        assert!(!rs.has_next());
        rs.append(vec![t("b")]);
        assert!(rs.has_next());
        assert_eq!(rs.advance().unwrap().key.to_string(), "b");
        assert_eq!(rs.len(), 2);
    }

    #[test]
    fn test_empty_set() {
        let mut rs = ResultSet::new();
        assert!(rs.is_empty());
        assert!(rs.first().is_none());
        assert!(!rs.has_next());
    }
}
