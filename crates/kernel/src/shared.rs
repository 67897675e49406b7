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

//! Process-wide kernel
//!
//! Components that share a process share one kernel. The first
//! [`initialize`] starts it, later calls join it, and each [`shutdown`]
//! leaves it; the last one stops it.

use crate::clock::Clock;
use crate::config::KernelConfig;
use crate::error::KernelResult;
use crate::kernel::Kernel;
use crate::transport::Transport;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

static SHARED: Lazy<Mutex<Option<Kernel>>> = Lazy::new(|| Mutex::new(None));

/// Join the process-wide kernel, starting a stand-alone one from `config`
/// if none is running.
pub async fn initialize(config: KernelConfig) -> KernelResult<Kernel> {
    let mut shared = SHARED.lock().await;
    if let Some(kernel) = joinable(&shared) {
        return Ok(kernel);
    }
    let kernel = Kernel::start_local(config).await?;
    *shared = Some(kernel.clone());
    Ok(kernel)
}

/// [`initialize`] with an explicit transport and clock. Both are ignored
/// when the kernel is already running.
pub async fn initialize_with<T>(
    config: KernelConfig,
    transport: T,
    clock: Arc<dyn Clock>,
) -> KernelResult<Kernel>
where
    T: Transport + 'static,
{
    let mut shared = SHARED.lock().await;
    if let Some(kernel) = joinable(&shared) {
        return Ok(kernel);
    }
    let kernel = Kernel::start(config, transport, clock).await?;
    *shared = Some(kernel.clone());
    Ok(kernel)
}

fn joinable(shared: &Option<Kernel>) -> Option<Kernel> {
    match shared {
        Some(kernel) if kernel.is_running() && kernel.users() > 0 => {
            debug!(users = kernel.users() + 1, "joining running kernel");
            Some(kernel.retain())
        }
        _ => None,
    }
}

/// Leave the process-wide kernel. Stops it once every user has left.
pub async fn shutdown() -> KernelResult<()> {
    let mut shared = SHARED.lock().await;
    let Some(kernel) = shared.clone() else {
        return Ok(());
    };
    kernel.shutdown().await?;
    if kernel.users() == 0 {
        *shared = None;
    }
    Ok(())
}

/// The process-wide kernel, if one is running.
pub async fn current() -> Option<Kernel> {
    SHARED.lock().await.clone()
}
