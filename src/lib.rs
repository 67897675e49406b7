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


//! # CoordSpace
//!
//! Tuplespace coordination for networked devices. Processes publish
//! owned, hierarchically keyed tuples, find them by wildcard prototypes,
//! and react to changes through callbacks. Meta tuples let a subscriber
//! follow whatever another tuple currently points to.
//!
//! - [`tuplespace`]: tuple model, matcher, store, subscriptions, meta tuples
//! - [`kernel`]: the async dispatch loop, transport seam and public API

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub use coordspace_kernel as kernel;
pub use coordspace_tuplespace as tuplespace;

pub use kernel::{GetFlags, Kernel, KernelConfig, KernelError, KernelResult, WriteReceipt};
pub use tuplespace::{MetaRef, OwnerId, ResultSet, SubscriptionHandle, Tuple, TupleKey};
