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

//! Kernel observability helpers
//!
//! ## Purpose
//! Structured logs and metrics for tuple mutations, callback dispatch,
//! meta rebinding, remote publishing and dispatch loop ticks, kept in one
//! place so the actor code stays about semantics.
//!
//! ## Metrics
//! - `coordspace_tuples_written_total{origin}`: local, replica, remote-set, append
//! - `coordspace_tuples_deleted_total{reason}`: delete, expired
//! - `coordspace_callbacks_dispatched_total{mode}`: write, delete
//! - `coordspace_meta_rebinds_total`
//! - `coordspace_remote_publish_total{result}`: sent, acked, failed
//! - `coordspace_tick_duration_seconds`

use coordspace_tuplespace::{DispatchMode, Mutation};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Record a stored write and the dispatch it caused.
pub fn record_write(origin: &'static str, mutation: &Mutation) {
    let Some(tuple) = &mutation.tuple else {
        return;
    };
    trace!(
        origin,
        tuple = %tuple,
        seqno = ?tuple.seqno,
        callbacks = mutation.callbacks,
        "tuple stored"
    );
    metrics::counter!("coordspace_tuples_written_total", "origin" => origin).increment(1);
    record_dispatch(DispatchMode::OnWrite, mutation.callbacks);
    record_rebinds(mutation.rebinds);
}

/// Record a removal and the on-delete dispatch it caused.
pub fn record_delete(reason: &'static str, mutation: &Mutation) {
    let Some(tuple) = &mutation.tuple else {
        return;
    };
    debug!(
        reason,
        tuple = %tuple,
        callbacks = mutation.callbacks,
        "tuple removed"
    );
    metrics::counter!("coordspace_tuples_deleted_total", "reason" => reason).increment(1);
    record_dispatch(DispatchMode::OnDelete, mutation.callbacks);
    record_rebinds(mutation.rebinds);
}

fn record_dispatch(mode: DispatchMode, callbacks: usize) {
    if callbacks > 0 {
        metrics::counter!("coordspace_callbacks_dispatched_total", "mode" => mode.as_str())
            .increment(callbacks as u64);
    }
}

fn record_rebinds(rebinds: usize) {
    if rebinds > 0 {
        debug!(rebinds, "indirect subscriptions retargeted");
        metrics::counter!("coordspace_meta_rebinds_total").increment(rebinds as u64);
    }
}

/// Record the outcome of a remote write.
pub fn record_remote_publish(result: &'static str, owner: Option<u32>, detail: Option<&str>) {
    match detail {
        Some(detail) => warn!(result, owner = ?owner, detail, "remote write"),
        None => trace!(result, owner = ?owner, "remote write"),
    }
    metrics::counter!("coordspace_remote_publish_total", "result" => result).increment(1);
}

/// Record one dispatch loop tick.
pub fn record_tick(elapsed: Duration, inbound: usize, expired: usize) {
    if inbound > 0 || expired > 0 {
        trace!(inbound, expired, elapsed_us = elapsed.as_micros() as u64, "tick");
    }
    metrics::histogram!("coordspace_tick_duration_seconds").record(elapsed.as_secs_f64());
}

/// Install a test-friendly tracing subscriber honoring `RUST_LOG`.
/// Safe to call more than once.
pub fn init_tracing_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
