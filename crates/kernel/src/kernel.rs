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

//! Kernel handle
//!
//! ## Purpose
//! [`Kernel`] is the API applications use: tuple reads and writes, wildcard
//! search, subscriptions and callbacks, meta tuples, and lifecycle. It is a
//! cheap `Clone` that talks to the kernel actor over channels.
//!
//! ## Lifecycle
//! [`Kernel::start`] spawns the dispatch loop with one user. Every
//! [`Kernel::retain`] adds a user and every [`Kernel::shutdown`] removes
//! one; the loop stops when the last user shuts down.
//!
//! ## Blocking operations
//! Blocking reads poll once per tick and give up after the flag's
//! timeout, the configured `blocking_timeout_ms`, or never, in that order.

use crate::actor::{
    Accepted, Command, KernelActor, KernelState, KernelStats, Registration, Reply, WriteReceipt,
};
use crate::clock::{Clock, SystemClock};
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::observability::record_remote_publish;
use crate::transport::{ConnectionId, LocalTransport, Transport, PROTOCOL_VERSION};
use coordspace_tuplespace::{
    meta, DispatchMode, Encoding, ErrorCode, HandleAllocator, LocalSpace, MetaRef, OwnerId, ResultSet,
    SubscriptionHandle, Tuple, TupleCallback, TupleError, TupleKey,
};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Capacity of the command queue between handles and the actor.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// How long shutdown waits for the dispatch loop to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Key of the tuple carrying the protocol version.
pub const VERSION_KEY: &str = "kernel.version";

/// Key of the tuple carrying the component name.
pub const NAME_KEY: &str = "kernel.name";

/// Options for [`Kernel::get_tuple`] and [`Kernel::get_indirect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetFlags {
    /// Return values that were already observed
    pub keep_old: bool,
    /// Wait until a value is available
    pub blocking: bool,
    /// Bound for blocking waits
    pub timeout: Option<Duration>,
}

impl Default for GetFlags {
    fn default() -> Self {
        GetFlags {
            keep_old: true,
            blocking: false,
            timeout: None,
        }
    }
}

impl GetFlags {
    /// Only values not yet observed.
    pub fn only_new() -> Self {
        GetFlags {
            keep_old: false,
            ..Self::default()
        }
    }

    /// Wait for a value.
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Give up waiting after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct KernelInner {
    config: KernelConfig,
    commands: mpsc::Sender<Command>,
    registrations: mpsc::UnboundedSender<Registration>,
    handles: HandleAllocator,
    issued: Mutex<HashSet<SubscriptionHandle>>,
    users: AtomicUsize,
    shutdown: Arc<Notify>,
    state: watch::Receiver<KernelState>,
    transport_failed: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running kernel.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("local_id", &self.local_id())
            .field("users", &self.users())
            .field("state", &self.state())
            .finish()
    }
}

impl Kernel {
    /// Start a kernel on `transport`, stamping tuples with `clock`.
    ///
    /// Fails with [`KernelError::VersionMismatch`] if the transport speaks
    /// another major.minor protocol version.
    pub async fn start<T>(
        config: KernelConfig,
        transport: T,
        clock: Arc<dyn Clock>,
    ) -> KernelResult<Kernel>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        check_version(transport.protocol_version())?;

        let handles = HandleAllocator::new();
        let space = LocalSpace::new(config.local_id, config.matcher(), handles.clone())
            .with_all_keys(config.publish_all_keys);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (registration_tx, registration_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(KernelState::Running);
        let shutdown = Arc::new(Notify::new());
        let transport_failed = Arc::new(AtomicBool::new(false));

        let mut actor = KernelActor::new(
            space,
            Box::new(transport),
            clock,
            config.clone(),
            command_rx,
            registration_rx,
            shutdown.clone(),
            state_tx,
            transport_failed.clone(),
        );
        actor.write_local(Tuple::text(config.local_id, VERSION_KEY, PROTOCOL_VERSION)?)?;
        actor.write_local(Tuple::text(
            config.local_id,
            NAME_KEY,
            &config.component_name,
        )?)?;
        actor.connect_configured().await;
        let task = tokio::spawn(actor.run());

        info!(
            local_id = config.local_id,
            component = %config.component_name,
            version = PROTOCOL_VERSION,
            "kernel started"
        );
        Ok(Kernel {
            inner: Arc::new(KernelInner {
                config,
                commands: command_tx,
                registrations: registration_tx,
                handles,
                issued: Mutex::new(HashSet::new()),
                users: AtomicUsize::new(1),
                shutdown,
                state: state_rx,
                transport_failed,
                task: tokio::sync::Mutex::new(Some(task)),
            }),
        })
    }

    /// Start a stand-alone kernel on the system clock.
    pub async fn start_local(config: KernelConfig) -> KernelResult<Kernel> {
        Self::start(config, LocalTransport::new(), Arc::new(SystemClock::new())).await
    }

    /// Register another user of this kernel.
    pub fn retain(&self) -> Kernel {
        self.inner.users.fetch_add(1, Ordering::SeqCst);
        self.clone()
    }

    /// Number of users that have not shut down yet.
    pub fn users(&self) -> usize {
        self.inner.users.load(Ordering::SeqCst)
    }

    /// Release one user; the last one stops the dispatch loop and waits
    /// for it to drain queued requests.
    pub async fn shutdown(&self) -> KernelResult<()> {
        let previous = self
            .inner
            .users
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.stop().await,
            Ok(n) => {
                debug!(remaining = n - 1, "kernel still in use");
                Ok(())
            }
            Err(_) => Ok(()),
        }
    }

    async fn stop(&self) -> KernelResult<()> {
        self.inner.shutdown.notify_one();
        let task = self.inner.task.lock().await.take();
        if let Some(mut task) = task {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "dispatch loop ended abnormally"),
                Err(_) => {
                    warn!("dispatch loop did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> KernelState {
        *self.inner.state.borrow()
    }

    /// True while the dispatch loop serves requests.
    pub fn is_running(&self) -> bool {
        self.state() == KernelState::Running
    }

    /// Wait until the kernel leaves [`KernelState::Running`].
    pub async fn stopped(&self) {
        let mut state = self.inner.state.clone();
        let _ = state.wait_for(|s| *s != KernelState::Running).await;
    }

    /// Owner id of this process.
    pub fn local_id(&self) -> OwnerId {
        self.inner.config.local_id
    }

    /// Configuration the kernel runs with.
    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    fn stopped_error(&self) -> KernelError {
        if self.inner.transport_failed.load(Ordering::SeqCst) {
            KernelError::TransportStopped
        } else {
            KernelError::NotRunning
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> KernelResult<T> {
        if !self.is_running() {
            return Err(self.stopped_error());
        }
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(build(tx))
            .await
            .map_err(|_| self.stopped_error())?;
        rx.await.map_err(|_| self.stopped_error())?
    }

    fn register(&self, registration: Registration) -> KernelResult<()> {
        if !self.is_running() {
            return Err(self.stopped_error());
        }
        self.inner
            .registrations
            .send(registration)
            .map_err(|_| self.stopped_error())
    }

    fn issue(&self) -> SubscriptionHandle {
        let handle = self.inner.handles.allocate();
        self.issued().insert(handle);
        handle
    }

    fn issued(&self) -> std::sync::MutexGuard<'_, HashSet<SubscriptionHandle>> {
        self.inner
            .issued
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn poll_until<T, F, Fut>(
        &self,
        timeout: Option<Duration>,
        mut attempt: F,
    ) -> KernelResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = KernelResult<Option<T>>>,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(value) = attempt().await? {
                return Ok(value);
            }
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(KernelError::Timeout(timeout));
                }
            }
            tokio::time::sleep(self.inner.config.tick_period()).await;
        }
    }

    // ---- writes ----

    /// Write a concrete tuple.
    ///
    /// Tuples owned by this process are committed before this returns.
    /// Tuples owned elsewhere are handed to the transport and reported as
    /// [`WriteReceipt::AcceptedForSend`]; use [`Kernel::insert_blocking`]
    /// to wait for the owner.
    pub async fn insert(&self, tuple: Tuple) -> KernelResult<WriteReceipt> {
        match self.request(|reply| Command::Insert { tuple, reply }).await? {
            Accepted::Local(receipt) => Ok(receipt),
            Accepted::Remote(_) => Ok(WriteReceipt::AcceptedForSend),
        }
    }

    /// Write a concrete tuple and, for remote owners, wait for the owner to
    /// acknowledge it within `insert_ack_timeout_ms`.
    pub async fn insert_blocking(&self, tuple: Tuple) -> KernelResult<WriteReceipt> {
        let owner = tuple.owner;
        match self.request(|reply| Command::Insert { tuple, reply }).await? {
            Accepted::Local(receipt) => Ok(receipt),
            Accepted::Remote(ticket) => self.await_ack(owner, ticket).await,
        }
    }

    async fn await_ack(
        &self,
        owner: Option<OwnerId>,
        ticket: crate::transport::PublishTicket,
    ) -> KernelResult<WriteReceipt> {
        let timeout = self.inner.config.insert_ack_timeout();
        match tokio::time::timeout(timeout, ticket).await {
            Ok(Ok(Ok(()))) => {
                record_remote_publish("acked", owner, None);
                Ok(WriteReceipt::Acknowledged)
            }
            Ok(Ok(Err(e))) => {
                record_remote_publish("failed", owner, Some(&e.to_string()));
                Err(KernelError::Transport(e.to_string()))
            }
            Ok(Err(_)) => {
                record_remote_publish("failed", owner, Some("transport dropped the write"));
                Err(KernelError::Transport("write dropped".to_string()))
            }
            Err(_) => {
                record_remote_publish("failed", owner, Some("no acknowledgement"));
                Err(KernelError::Timeout(timeout))
            }
        }
    }

    /// Write a text value at `key` in this process's space.
    pub async fn set_tuple(&self, key: &str, data: &str) -> KernelResult<WriteReceipt> {
        self.insert(Tuple::text(self.local_id(), key, data)?).await
    }

    /// Write a text value into `owner`'s space.
    pub async fn set_remote_tuple(
        &self,
        owner: OwnerId,
        key: &str,
        data: &str,
    ) -> KernelResult<WriteReceipt> {
        self.insert(Tuple::text(owner, key, data)?).await
    }

    /// Write `data` at a local key only if nothing is there yet.
    /// Returns true if the value was written.
    pub async fn set_default(&self, key: &str, data: &str) -> KernelResult<bool> {
        let key_parsed = TupleKey::parse(key)?;
        if self.exists(self.local_id(), &key_parsed).await? {
            return Ok(false);
        }
        self.set_tuple(key, data).await?;
        Ok(true)
    }

    /// Delete the tuple at `(owner, key)`. Subscribed on-delete callbacks
    /// fire before the value disappears.
    pub async fn delete(&self, owner: OwnerId, key: &TupleKey) -> KernelResult<WriteReceipt> {
        let key = key.clone();
        match self
            .request(|reply| Command::Delete { owner, key, reply })
            .await?
        {
            Accepted::Local(receipt) => Ok(receipt),
            Accepted::Remote(_) => Ok(WriteReceipt::AcceptedForSend),
        }
    }

    /// Append `data` to every local tuple covered by `pattern`, optionally
    /// only to values at `expected_seqno`. Returns the number updated.
    pub async fn append(
        &self,
        pattern: &Tuple,
        data: &[u8],
        expected_seqno: Option<u64>,
    ) -> KernelResult<usize> {
        let pattern = pattern.clone();
        let data = data.to_vec();
        self.request(|reply| Command::Append {
            pattern,
            data,
            expected_seqno,
            reply,
        })
        .await
    }

    // ---- reads ----

    /// Current value at `(owner, key)`, or `None`.
    pub async fn get_exact(&self, owner: OwnerId, key: &TupleKey) -> KernelResult<Option<Tuple>> {
        self.get_once(owner, key, false).await
    }

    async fn get_once(
        &self,
        owner: OwnerId,
        key: &TupleKey,
        only_new: bool,
    ) -> KernelResult<Option<Tuple>> {
        let key = key.clone();
        self.request(|reply| Command::Get {
            owner,
            key,
            only_new,
            reply,
        })
        .await
    }

    /// Value at `(owner, key)` honoring `flags`.
    ///
    /// A blocking read that times out fails with [`KernelError::Timeout`].
    pub async fn get_tuple(
        &self,
        owner: OwnerId,
        key: &TupleKey,
        flags: GetFlags,
    ) -> KernelResult<Option<Tuple>> {
        if !key.is_concrete() {
            return Err(TupleError::InvalidAbstractTupleUse(format!("{}:{}", owner, key)).into());
        }
        let only_new = !flags.keep_old;
        if !flags.blocking {
            return self.get_once(owner, key, only_new).await;
        }
        let timeout = flags.timeout.or(self.inner.config.blocking_timeout());
        self.poll_until(timeout, move || self.get_once(owner, key, only_new))
            .await
            .map(Some)
    }

    /// First tuple covered by `pattern` in matcher order, honoring `flags`.
    ///
    /// A blocking read that times out fails with [`KernelError::Timeout`].
    pub async fn get_by_abstract(
        &self,
        pattern: &Tuple,
        flags: GetFlags,
    ) -> KernelResult<Option<Tuple>> {
        let mut pattern = pattern.clone();
        if !flags.keep_old {
            pattern = pattern.only_new();
        }
        let attempt = move || {
            let pattern = pattern.clone();
            self.request(move |reply| Command::GetFirst { pattern, reply })
        };
        if !flags.blocking {
            return attempt().await;
        }
        let timeout = flags.timeout.or(self.inner.config.blocking_timeout());
        self.poll_until(timeout, attempt).await.map(Some)
    }

    /// True if a value exists at `(owner, key)`.
    pub async fn exists(&self, owner: OwnerId, key: &TupleKey) -> KernelResult<bool> {
        let key = key.clone();
        self.request(|reply| Command::Exists { owner, key, reply })
            .await
    }

    /// Every tuple covered by `pattern`, in matcher order.
    pub async fn search(&self, pattern: &Tuple) -> KernelResult<ResultSet> {
        let mut results = ResultSet::new();
        self.search_into(pattern, &mut results).await?;
        Ok(results)
    }

    /// Append the tuples covered by `pattern` to `results`.
    pub async fn search_into(&self, pattern: &Tuple, results: &mut ResultSet) -> KernelResult<usize> {
        let pattern = pattern.clone();
        let found = self
            .request(|reply| Command::Search { pattern, reply })
            .await?;
        let count = found.len();
        results.append(found);
        Ok(count)
    }

    /// First owner holding a value at `key`, waiting up to `timeout`
    /// (forever if `None`).
    pub async fn find_owner(&self, key: &TupleKey, timeout: Option<Duration>) -> KernelResult<OwnerId> {
        if !key.is_concrete() {
            return Err(TupleError::InvalidAbstractTupleUse(key.to_string()).into());
        }
        self.poll_until(timeout, move || {
            let key = key.clone();
            async move {
                let owners = self
                    .request(|reply| Command::FindOwners { key, reply })
                    .await?;
                Ok(owners.first().copied())
            }
        })
        .await
    }

    // ---- subscriptions ----

    /// Subscribe to `key` (wildcards allowed), for one owner or all owners.
    pub fn subscribe(&self, key: TupleKey, owner: Option<OwnerId>) -> KernelResult<SubscriptionHandle> {
        self.subscribe_abstract(Tuple::locator(owner, key))
    }

    /// Subscribe with a full prototype.
    pub fn subscribe_abstract(&self, pattern: Tuple) -> KernelResult<SubscriptionHandle> {
        let handle = self.issue();
        self.register(Registration::Interest { handle, pattern })?;
        Ok(handle)
    }

    /// Call `callback` after every write covered by `pattern`.
    pub fn register_callback<F>(&self, pattern: Tuple, callback: F) -> KernelResult<SubscriptionHandle>
    where
        F: Fn(&Tuple) + Send + Sync + 'static,
    {
        self.register_with_mode(pattern, DispatchMode::OnWrite, Arc::new(callback))
    }

    /// Call `callback` before every removal covered by `pattern`.
    pub fn register_deleted_callback<F>(
        &self,
        pattern: Tuple,
        callback: F,
    ) -> KernelResult<SubscriptionHandle>
    where
        F: Fn(&Tuple) + Send + Sync + 'static,
    {
        self.register_with_mode(pattern, DispatchMode::OnDelete, Arc::new(callback))
    }

    fn register_with_mode(
        &self,
        pattern: Tuple,
        mode: DispatchMode,
        callback: TupleCallback,
    ) -> KernelResult<SubscriptionHandle> {
        let handle = self.issue();
        self.register(Registration::Callback {
            handle,
            pattern,
            mode,
            callback,
        })?;
        Ok(handle)
    }

    /// Remove a subscription or callback. Takes effect before the next
    /// request or tick is served.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> KernelResult<()> {
        if !self.issued().remove(&handle) {
            return Err(KernelError::TupleOperationFailed(ErrorCode::BadHandle));
        }
        self.register(Registration::Remove { handle })
    }

    /// Same as [`Kernel::unsubscribe`].
    pub fn unregister_callback(&self, handle: SubscriptionHandle) -> KernelResult<()> {
        self.unsubscribe(handle)
    }

    /// True if a live subscription overlaps `pattern`.
    pub async fn has_subscriber(&self, pattern: &Tuple) -> KernelResult<bool> {
        let pattern = pattern.clone();
        self.request(|reply| Command::HasSubscriber { pattern, reply })
            .await
    }

    /// Wait until every registration queued so far has been applied.
    pub async fn sync(&self) -> KernelResult<()> {
        self.request(|reply| Command::Sync { reply }).await
    }

    // ---- meta tuples ----

    /// Create an unresolved meta tuple at `(owner, key)` unless one exists.
    /// Returns true if it was created.
    pub async fn declare_meta(&self, owner: OwnerId, key: &TupleKey) -> KernelResult<bool> {
        if self.exists(owner, key).await? {
            return Ok(false);
        }
        self.set_meta(owner, key, None).await?;
        Ok(true)
    }

    /// Point the meta tuple at `(owner, key)` to `target`.
    pub async fn set_meta(
        &self,
        owner: OwnerId,
        key: &TupleKey,
        target: Option<&MetaRef>,
    ) -> KernelResult<WriteReceipt> {
        self.insert(meta::meta_tuple(owner, key.clone(), target)).await
    }

    /// Declare a local meta tuple at `key` pointing to `target`, unless one
    /// already exists. Returns true if it was created.
    pub async fn set_default_meta(&self, key: &TupleKey, target: &MetaRef) -> KernelResult<bool> {
        if self.exists(self.local_id(), key).await? {
            return Ok(false);
        }
        self.set_meta(self.local_id(), key, Some(target)).await?;
        Ok(true)
    }

    /// Reference held by the meta tuple at `(owner, key)`.
    pub async fn resolve(&self, owner: OwnerId, key: &TupleKey) -> KernelResult<Option<MetaRef>> {
        let key = key.clone();
        self.request(|reply| Command::Resolve { owner, key, reply })
            .await
    }

    /// True if `(owner, key)` holds a meta tuple pointing somewhere.
    pub async fn is_meta(&self, owner: OwnerId, key: &TupleKey) -> KernelResult<bool> {
        let key = key.clone();
        self.request(|reply| Command::IsMeta { owner, key, reply })
            .await
    }

    /// Value of the tuple the meta tuple at `(owner, key)` points to.
    ///
    /// Right after the meta tuple was repointed, any value of the new
    /// target is returned even when `flags` asks for new values only.
    pub async fn get_indirect(
        &self,
        owner: OwnerId,
        key: &TupleKey,
        flags: GetFlags,
    ) -> KernelResult<Option<Tuple>> {
        self.get_indirect_by_abstract(&Tuple::locator(Some(owner), key.clone()), flags)
            .await
    }

    /// [`Kernel::get_indirect`] through the first meta tuple covered by
    /// `meta_prototype`. Whether the meta tuple itself is new is ignored.
    pub async fn get_indirect_by_abstract(
        &self,
        meta_prototype: &Tuple,
        flags: GetFlags,
    ) -> KernelResult<Option<Tuple>> {
        let only_new = !flags.keep_old;
        let attempt = move || {
            let prototype = meta_prototype.clone();
            self.request(move |reply| Command::GetIndirect {
                prototype,
                only_new,
                reply,
            })
        };
        if !flags.blocking {
            return attempt().await;
        }
        let timeout = flags.timeout.or(self.inner.config.blocking_timeout());
        self.poll_until(timeout, attempt).await.map(Some)
    }

    /// Write `data` to the tuple the meta tuple at `(owner, key)` points to.
    pub async fn set_indirect(
        &self,
        owner: OwnerId,
        key: &TupleKey,
        data: &str,
    ) -> KernelResult<WriteReceipt> {
        let Some(target) = self.resolve(owner, key).await? else {
            return Err(KernelError::TupleOperationFailed(ErrorCode::InvalidMeta));
        };
        let tuple = Tuple::new(target.owner, target.key, data.as_bytes().to_vec())
            .with_encoding(Encoding::Ascii)
            .with_mimetype("text/plain");
        self.insert(tuple).await
    }

    /// Follow the meta tuple at `(owner, key)` without a callback.
    ///
    /// Interest in the current target is visible through
    /// [`Kernel::has_subscriber`] on the target's location.
    pub fn subscribe_indirect(&self, owner: OwnerId, key: &TupleKey) -> KernelResult<SubscriptionHandle> {
        self.register_indirect(concrete_meta(owner, key)?, None)
    }

    /// Follow the meta tuple at `(owner, key)`: `callback` fires for writes
    /// to whatever it currently points to, and moves when it is repointed.
    pub fn register_indirect_callback<F>(
        &self,
        owner: OwnerId,
        key: &TupleKey,
        callback: F,
    ) -> KernelResult<SubscriptionHandle>
    where
        F: Fn(&Tuple) + Send + Sync + 'static,
    {
        self.register_indirect(
            concrete_meta(owner, key)?,
            Some(Arc::new(callback) as TupleCallback),
        )
    }

    /// [`Kernel::register_indirect_callback`] through any meta tuple covered
    /// by `meta_prototype`. It binds to the first one already stored, and
    /// every later write of a covered meta tuple repoints it.
    pub fn subscribe_indirectly_by_abstract<F>(
        &self,
        meta_prototype: &Tuple,
        callback: F,
    ) -> KernelResult<SubscriptionHandle>
    where
        F: Fn(&Tuple) + Send + Sync + 'static,
    {
        self.register_indirect(
            meta_prototype.clone(),
            Some(Arc::new(callback) as TupleCallback),
        )
    }

    fn register_indirect(
        &self,
        prototype: Tuple,
        callback: Option<TupleCallback>,
    ) -> KernelResult<SubscriptionHandle> {
        let handle = self.issue();
        self.register(Registration::Indirect {
            handle,
            prototype,
            callback,
        })?;
        Ok(handle)
    }

    // ---- transport and introspection ----

    /// Connect the transport to a peer.
    pub async fn connect(&self, url: &str) -> KernelResult<ConnectionId> {
        let url = url.to_string();
        self.request(|reply| Command::Connect { url, reply }).await
    }

    /// Kernel counters.
    pub async fn stats(&self) -> KernelResult<KernelStats> {
        self.request(|reply| Command::Stats { reply }).await
    }
}

fn check_version(found: &str) -> KernelResult<()> {
    fn major_minor(v: &str) -> Option<(&str, &str)> {
        let mut parts = v.trim().split('.');
        Some((parts.next()?, parts.next()?))
    }
    match (major_minor(PROTOCOL_VERSION), major_minor(found)) {
        (Some(expected), Some(actual)) if expected == actual => Ok(()),
        _ => Err(KernelError::VersionMismatch {
            expected: PROTOCOL_VERSION.to_string(),
            found: found.to_string(),
        }),
    }
}

fn concrete_meta(owner: OwnerId, key: &TupleKey) -> KernelResult<Tuple> {
    if !key.is_concrete() {
        return Err(TupleError::InvalidAbstractTupleUse(format!("{}:{}", owner, key)).into());
    }
    Ok(Tuple::locator(Some(owner), key.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_check_compares_major_minor() {
        assert!(check_version(PROTOCOL_VERSION).is_ok());
        let (major, minor) = {
            let mut parts = PROTOCOL_VERSION.split('.');
            (parts.next().unwrap(), parts.next().unwrap())
        };
        assert!(check_version(&format!("{}.{}.99", major, minor)).is_ok());
        assert!(matches!(
            check_version("9.9.0"),
            Err(KernelError::VersionMismatch { .. })
        ));
        assert!(check_version("garbage").is_err());
    }

    #[test]
    fn test_get_flags_builders() {
        let flags = GetFlags::default();
        assert!(flags.keep_old && !flags.blocking);
        let flags = GetFlags::only_new()
            .blocking()
            .with_timeout(Duration::from_millis(5));
        assert!(!flags.keep_old && flags.blocking);
        assert_eq!(flags.timeout, Some(Duration::from_millis(5)));
    }
}
