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

//! Tuplespace data structures for device coordination
//!
//! Tuples are owned, hierarchically keyed records. Processes read and
//! search them by wildcard prototypes, and subscribe to be called back
//! when matching tuples are written or removed. Meta tuples add one level
//! of indirection so a subscriber can follow "whatever this points at".
//!
//! Everything in this crate is synchronous and single-owner; the
//! `coordspace-kernel` crate runs it inside an async task.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod matcher;
pub mod meta;
pub mod registry;
pub mod result_set;
pub mod space;
pub mod store;
pub mod tuple;

pub use error::{ErrorCode, TupleError, TupleResult};
pub use matcher::{compare, is_abstract, is_equal, is_generalization, unifies, Matcher, PayloadCase};
pub use meta::{MetaRef, MetaResolver, META_MIMETYPE};
pub use registry::{
    DispatchMode, HandleAllocator, Subscription, SubscriptionHandle, SubscriptionRegistry,
    TupleCallback,
};
pub use result_set::ResultSet;
pub use space::{LocalSpace, Mutation, SpaceStats, ALL_KEYS_KEY};
pub use store::{StoreStats, StoredTuple, TupleStore};
pub use tuple::{Encoding, Expiry, OwnerId, Timestamp, Tuple, TupleKey, MAX_KEY_DEPTH};
