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

//! Kernel errors

use coordspace_tuplespace::{ErrorCode, OwnerId, TupleError};
use std::time::Duration;

/// Kernel errors
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Tuple shape or handle error rejected at the API boundary
    #[error(transparent)]
    Tuple(#[from] TupleError),

    /// Kernel-reported failure code
    #[error("Tuple operation failed: {0} (code {})", .0.code())]
    TupleOperationFailed(ErrorCode),

    /// Transport speaks an incompatible protocol version
    #[error("Version mismatch: kernel {expected}, transport {found}")]
    VersionMismatch {
        /// Version this kernel implements
        expected: String,
        /// Version reported by the transport
        found: String,
    },

    /// Write targets another owner and remote writes are disabled
    #[error("Tuple owned by {owner} cannot be written by {local}")]
    ForeignOwner {
        /// Owner named by the tuple
        owner: OwnerId,
        /// This process
        local: OwnerId,
    },

    /// Kernel has been shut down
    #[error("Kernel is not running")]
    NotRunning,

    /// Transport reported it stopped; the kernel will not recover
    #[error("Transport stopped")]
    TransportStopped,

    /// Blocking operation gave up
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error while loading configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;
