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

//! Kernel actor and dispatch loop
//!
//! ## Purpose
//! Owns the local tuplespace, the transport and the clock. Every request
//! from a [`crate::Kernel`] handle arrives as a [`Command`] over a channel
//! and is served to completion, callbacks included, before the next one.
//!
//! ## Design
//! - Commands: bounded mpsc channel, one oneshot reply per command
//! - Registrations: unbounded mpsc channel drained before each command and
//!   on each tick, never while a dispatch pass is running
//! - Ticker: `tokio::time::interval` at the configured rate; each tick
//!   flushes registrations, steps the transport, checks it is still
//!   running, applies inbound tuples and purges expired ones
//! - Shutdown: a `Notify` ends the loop; queued commands are still served,
//!   then the transport is released

use crate::clock::Clock;
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::observability::{record_delete, record_remote_publish, record_tick, record_write};
use crate::transport::{ConnectionId, Inbound, PublishTicket, Transport};
use coordspace_tuplespace::{
    meta, DispatchMode, Expiry, LocalSpace, MetaRef, Mutation, OwnerId, SpaceStats,
    SubscriptionHandle, Tuple, TupleCallback, TupleKey,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Lifecycle of a kernel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    /// Serving requests and ticking
    Running,
    /// Stopping or stopped; no new requests are accepted
    ShuttingDown,
}

/// Outcome of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteReceipt {
    /// Stored in the local space under this seqno
    Committed {
        /// Seqno assigned to the write
        seqno: u64,
    },
    /// Local delete; `existed` is false if there was nothing to delete
    Deleted {
        /// A value was removed
        existed: bool,
    },
    /// Handed to the transport; the owner has not confirmed it
    AcceptedForSend,
    /// The remote owner confirmed the write
    Acknowledged,
}

/// Snapshot of kernel counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelStats {
    /// Local space counters
    pub space: SpaceStats,
    /// Dispatch loop ticks since start
    pub ticks: u64,
}

pub(crate) enum Accepted {
    Local(WriteReceipt),
    Remote(PublishTicket),
}

pub(crate) type Reply<T> = oneshot::Sender<KernelResult<T>>;

pub(crate) enum Command {
    Insert {
        tuple: Tuple,
        reply: Reply<Accepted>,
    },
    Delete {
        owner: OwnerId,
        key: TupleKey,
        reply: Reply<Accepted>,
    },
    Get {
        owner: OwnerId,
        key: TupleKey,
        only_new: bool,
        reply: Reply<Option<Tuple>>,
    },
    GetFirst {
        pattern: Tuple,
        reply: Reply<Option<Tuple>>,
    },
    GetIndirect {
        prototype: Tuple,
        only_new: bool,
        reply: Reply<Option<Tuple>>,
    },
    Exists {
        owner: OwnerId,
        key: TupleKey,
        reply: Reply<bool>,
    },
    Search {
        pattern: Tuple,
        reply: Reply<Vec<Tuple>>,
    },
    Append {
        pattern: Tuple,
        data: Vec<u8>,
        expected_seqno: Option<u64>,
        reply: Reply<usize>,
    },
    Resolve {
        owner: OwnerId,
        key: TupleKey,
        reply: Reply<Option<MetaRef>>,
    },
    IsMeta {
        owner: OwnerId,
        key: TupleKey,
        reply: Reply<bool>,
    },
    HasSubscriber {
        pattern: Tuple,
        reply: Reply<bool>,
    },
    FindOwners {
        key: TupleKey,
        reply: Reply<Vec<OwnerId>>,
    },
    Connect {
        url: String,
        reply: Reply<ConnectionId>,
    },
    Stats {
        reply: Reply<KernelStats>,
    },
    Sync {
        reply: Reply<()>,
    },
}

impl Command {
    fn reject(self, error: KernelError) {
        macro_rules! fail {
            ($reply:expr) => {{
                let _ = $reply.send(Err(error));
            }};
        }
        match self {
            Command::Insert { reply, .. } | Command::Delete { reply, .. } => fail!(reply),
            Command::Get { reply, .. }
            | Command::GetFirst { reply, .. }
            | Command::GetIndirect { reply, .. } => fail!(reply),
            Command::Exists { reply, .. }
            | Command::IsMeta { reply, .. }
            | Command::HasSubscriber { reply, .. } => fail!(reply),
            Command::Search { reply, .. } => fail!(reply),
            Command::Append { reply, .. } => fail!(reply),
            Command::Resolve { reply, .. } => fail!(reply),
            Command::FindOwners { reply, .. } => fail!(reply),
            Command::Connect { reply, .. } => fail!(reply),
            Command::Stats { reply } => fail!(reply),
            Command::Sync { reply } => fail!(reply),
        }
    }
}

pub(crate) enum Registration {
    Interest {
        handle: SubscriptionHandle,
        pattern: Tuple,
    },
    Callback {
        handle: SubscriptionHandle,
        pattern: Tuple,
        mode: DispatchMode,
        callback: TupleCallback,
    },
    Indirect {
        handle: SubscriptionHandle,
        prototype: Tuple,
        callback: Option<TupleCallback>,
    },
    Remove {
        handle: SubscriptionHandle,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    Shutdown,
    HandlesDropped,
    TransportStopped,
}

pub(crate) struct KernelActor {
    space: LocalSpace,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: KernelConfig,
    commands: mpsc::Receiver<Command>,
    registrations: mpsc::UnboundedReceiver<Registration>,
    shutdown: Arc<Notify>,
    state: watch::Sender<KernelState>,
    transport_failed: Arc<AtomicBool>,
    ticks: u64,
}

impl KernelActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        space: LocalSpace,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: KernelConfig,
        commands: mpsc::Receiver<Command>,
        registrations: mpsc::UnboundedReceiver<Registration>,
        shutdown: Arc<Notify>,
        state: watch::Sender<KernelState>,
        transport_failed: Arc<AtomicBool>,
    ) -> Self {
        KernelActor {
            space,
            transport,
            clock,
            config,
            commands,
            registrations,
            shutdown,
            state,
            transport_failed,
            ticks: 0,
        }
    }

    /// Write a local tuple outside of any command, used while booting.
    pub(crate) fn write_local(&mut self, tuple: Tuple) -> KernelResult<()> {
        let now = self.clock.now();
        let mutation = self.space.write(tuple, now)?;
        record_write("local", &mutation);
        Ok(())
    }

    /// Apply configured connections before the first tick.
    pub(crate) async fn connect_configured(&mut self) {
        for url in self.config.connect.clone() {
            match self.transport.connect(&url).await {
                Ok(id) => info!(url = %url, connection = %id, "connected"),
                Err(e) => warn!(url = %url, error = %e, "connect failed"),
            }
        }
        for url in self.config.auto_connect.clone() {
            self.transport.auto_connect(&url);
        }
    }

    pub(crate) async fn run(mut self) {
        let mut ticker = interval(self.config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            local_id = self.space.local_id(),
            component = %self.config.component_name,
            tick_hz = self.config.tick_hz,
            "kernel running"
        );

        let reason = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break ExitReason::Shutdown,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.apply_registrations();
                        self.handle(command).await;
                    }
                    None => break ExitReason::HandlesDropped,
                },
                _ = ticker.tick() => {
                    if !self.tick().await {
                        break ExitReason::TransportStopped;
                    }
                }
            }
        };
        self.finish(reason).await;
    }

    async fn tick(&mut self) -> bool {
        let started = Instant::now();
        self.ticks += 1;
        self.apply_registrations();

        let inbound = match self.transport.step().await {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "transport step failed");
                Vec::new()
            }
        };
        if !self.transport.is_running() {
            warn!(
                discarded = inbound.len(),
                "transport stopped, leaving dispatch loop"
            );
            return false;
        }
        let received = inbound.len();
        for message in inbound {
            self.apply_inbound(message);
        }

        let expired = self.space.expire(self.clock.now());
        for mutation in &expired {
            record_delete("expired", mutation);
        }
        record_tick(started.elapsed(), received, expired.len());
        true
    }

    async fn finish(mut self, reason: ExitReason) {
        if reason == ExitReason::TransportStopped {
            self.transport_failed.store(true, Ordering::SeqCst);
        }
        let _ = self.state.send(KernelState::ShuttingDown);
        self.commands.close();
        self.registrations.close();
        match reason {
            ExitReason::TransportStopped => {
                while let Ok(command) = self.commands.try_recv() {
                    command.reject(KernelError::TransportStopped);
                }
            }
            ExitReason::Shutdown | ExitReason::HandlesDropped => {
                self.apply_registrations();
                while let Ok(command) = self.commands.try_recv() {
                    self.handle(command).await;
                }
            }
        }
        self.transport.shutdown().await;
        info!(reason = ?reason, ticks = self.ticks, "kernel stopped");
    }

    fn apply_registrations(&mut self) {
        while let Ok(registration) = self.registrations.try_recv() {
            match registration {
                Registration::Interest { handle, pattern } => {
                    debug!(handle = %handle, pattern = %pattern, "subscribe");
                    self.space.subscribe(handle, pattern);
                }
                Registration::Callback {
                    handle,
                    pattern,
                    mode,
                    callback,
                } => {
                    debug!(handle = %handle, pattern = %pattern, mode = mode.as_str(), "register callback");
                    self.space.register_callback(handle, pattern, mode, callback);
                }
                Registration::Indirect {
                    handle,
                    prototype,
                    callback,
                } => {
                    debug!(handle = %handle, prototype = %prototype, "subscribe indirectly");
                    self.space.subscribe_indirect(handle, prototype, callback);
                }
                Registration::Remove { handle } => {
                    if let Err(e) = self.space.unsubscribe(handle) {
                        debug!(handle = %handle, error = %e, "unsubscribe of unknown handle");
                    }
                }
            }
        }
    }

    fn apply_inbound(&mut self, message: Inbound) {
        let local = self.space.local_id();
        let now = self.clock.now();
        match message {
            Inbound::Published(tuple) => {
                if tuple.owner == Some(local) {
                    warn!(tuple = %tuple, "peer published a tuple owned by this process");
                    return;
                }
                match self.space.write_replica(tuple, now) {
                    Ok(mutation) => record_mutation("replica", &mutation),
                    Err(e) => warn!(error = %e, "malformed replica dropped"),
                }
            }
            Inbound::SetRequest(tuple) => {
                if tuple.owner != Some(local) {
                    warn!(tuple = %tuple, "set request for a tuple owned elsewhere");
                    return;
                }
                match self.space.write(tuple, now) {
                    Ok(mutation) => record_mutation("remote-set", &mutation),
                    Err(e) => warn!(error = %e, "malformed set request dropped"),
                }
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Insert { tuple, reply } => {
                let _ = reply.send(self.insert(tuple));
            }
            Command::Delete { owner, key, reply } => {
                let _ = reply.send(self.delete(owner, key));
            }
            Command::Get {
                owner,
                key,
                only_new,
                reply,
            } => {
                let _ = reply.send(self.space.get(owner, &key, only_new).map_err(Into::into));
            }
            Command::GetFirst { pattern, reply } => {
                let _ = reply.send(Ok(self.space.get_by_abstract(&pattern)));
            }
            Command::GetIndirect {
                mut prototype,
                only_new,
                reply,
            } => {
                prototype.is_new = None;
                let _ = reply.send(self.get_indirect(&prototype, only_new));
            }
            Command::Exists { owner, key, reply } => {
                let _ = reply.send(Ok(self.space.exists(owner, &key)));
            }
            Command::Search { pattern, reply } => {
                let _ = reply.send(Ok(self.space.search(&pattern).into_vec()));
            }
            Command::Append {
                pattern,
                data,
                expected_seqno,
                reply,
            } => {
                let _ = reply.send(self.append(pattern, &data, expected_seqno));
            }
            Command::Resolve { owner, key, reply } => {
                let _ = reply.send(self.space.resolve(owner, &key).map_err(Into::into));
            }
            Command::IsMeta { owner, key, reply } => {
                let _ = reply.send(Ok(self.space.is_meta(owner, &key)));
            }
            Command::HasSubscriber { pattern, reply } => {
                let _ = reply.send(Ok(self.space.has_subscriber(&pattern)));
            }
            Command::FindOwners { key, reply } => {
                let _ = reply.send(Ok(self.space.owners_of(&key)));
            }
            Command::Connect { url, reply } => {
                let result = self
                    .transport
                    .connect(&url)
                    .await
                    .map_err(|e| KernelError::Transport(e.to_string()));
                let _ = reply.send(result);
            }
            Command::Stats { reply } => {
                let _ = reply.send(Ok(KernelStats {
                    space: self.space.stats(),
                    ticks: self.ticks,
                }));
            }
            Command::Sync { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn insert(&mut self, mut tuple: Tuple) -> KernelResult<Accepted> {
        tuple.ensure_concrete()?;
        let local = self.space.local_id();
        tuple.creator = Some(local);
        let owner = tuple.owner;
        match owner {
            Some(owner) if owner == local => {
                let mutation = self.space.write(tuple, self.clock.now())?;
                Ok(Accepted::Local(local_receipt("local", &mutation)))
            }
            owner => self.publish(owner, tuple),
        }
    }

    fn delete(&mut self, owner: OwnerId, key: TupleKey) -> KernelResult<Accepted> {
        let local = self.space.local_id();
        if owner == local {
            let mutation = self.space.delete(owner, &key, Some(local), self.clock.now())?;
            return Ok(Accepted::Local(local_receipt("local", &mutation)));
        }
        if !key.is_concrete() {
            return Err(coordspace_tuplespace::TupleError::InvalidAbstractTupleUse(format!(
                "{}:{}",
                owner, key
            ))
            .into());
        }
        let marker = Tuple::new(owner, key, Vec::new())
            .with_creator(local)
            .with_expiry(Expiry::Immediately);
        self.publish(Some(owner), marker)
    }

    fn publish(&mut self, owner: Option<OwnerId>, tuple: Tuple) -> KernelResult<Accepted> {
        let local = self.space.local_id();
        let owner = owner.unwrap_or(local);
        if !self.config.allow_remote_writes {
            return Err(KernelError::ForeignOwner { owner, local });
        }
        let ticket = self.transport.publish_remote(&tuple);
        record_remote_publish("sent", Some(owner), None);
        Ok(Accepted::Remote(ticket))
    }

    fn get_indirect(&mut self, prototype: &Tuple, only_new: bool) -> KernelResult<Option<Tuple>> {
        let Some(meta_tuple) = self.space.get_by_abstract(prototype) else {
            return Ok(None);
        };
        let Some(target) = meta::resolve(&meta_tuple)? else {
            return Ok(None);
        };
        // a freshly repointed meta tuple makes any value of the new target acceptable
        let meta_changed = meta_tuple.is_new == Some(true);
        Ok(self
            .space
            .get(target.owner, &target.key, only_new && !meta_changed)?)
    }

    fn append(
        &mut self,
        pattern: Tuple,
        data: &[u8],
        expected_seqno: Option<u64>,
    ) -> KernelResult<usize> {
        let local = self.space.local_id();
        if let Some(owner) = pattern.owner.filter(|o| *o != local) {
            return Err(KernelError::ForeignOwner { owner, local });
        }
        let mutations = self
            .space
            .append(&pattern, data, expected_seqno, self.clock.now());
        for mutation in &mutations {
            record_write("append", mutation);
        }
        Ok(mutations.len())
    }
}

fn record_mutation(origin: &'static str, mutation: &Mutation) {
    if mutation.tuple.as_ref().is_some_and(Tuple::is_deletion) {
        record_delete("delete", mutation);
    } else {
        record_write(origin, mutation);
    }
}

fn local_receipt(origin: &'static str, mutation: &Mutation) -> WriteReceipt {
    record_mutation(origin, mutation);
    match &mutation.tuple {
        Some(tuple) if tuple.is_deletion() => WriteReceipt::Deleted { existed: true },
        Some(tuple) => WriteReceipt::Committed {
            seqno: tuple.seqno.unwrap_or_default(),
        },
        None => WriteReceipt::Deleted { existed: false },
    }
}
