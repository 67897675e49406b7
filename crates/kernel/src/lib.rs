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


//! CoordSpace kernel runtime
//!
//! Runs a [`coordspace_tuplespace::LocalSpace`] inside a single tokio task
//! and exposes it through the cloneable [`Kernel`] handle.
//!
//! ## Architecture
//! - Requests travel to the actor over a bounded command channel and are
//!   answered on oneshot channels, so every mutation is serialized.
//! - Subscriptions travel over a separate queue that the actor drains
//!   before each request and each tick. Callbacks therefore never race a
//!   running dispatch, even when they register more callbacks.
//! - A [`Transport`] is stepped on every tick (100 Hz by default). When it
//!   stops, the loop exits and pending requests fail with
//!   [`KernelError::TransportStopped`].
//!
//! ## Example
//! ```rust,no_run
//! use coordspace_kernel::{Kernel, KernelConfig};
//! use coordspace_tuplespace::{Tuple, TupleKey};
//!
//! # async fn run() -> Result<(), coordspace_kernel::KernelError> {
//! let kernel = Kernel::start_local(KernelConfig::default()).await?;
//! kernel.register_callback(Tuple::locator(None, TupleKey::parse("sensor.*")?), |t| {
//!     println!("{}", t);
//! })?;
//! kernel.set_tuple("sensor.temp", "21.5").await?;
//! kernel.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod actor;
pub mod clock;
pub mod config;
pub mod error;
pub mod kernel;
pub mod observability;
pub mod shared;
pub mod transport;

pub use actor::{KernelState, KernelStats, WriteReceipt};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use kernel::{GetFlags, Kernel, NAME_KEY, VERSION_KEY};
pub use transport::{
    AckMode, ConnectionId, Inbound, LocalTransport, MockTransport, PublishTicket, Transport,
    TransportError, PROTOCOL_VERSION,
};
