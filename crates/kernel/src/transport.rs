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

//! Network transport boundary
//!
//! ## Purpose
//! The kernel keeps the local tuplespace; everything that crosses process
//! boundaries goes through a [`Transport`]: stepping connection I/O,
//! publishing writes of tuples owned elsewhere, and handing back tuples
//! that arrived from peers.
//!
//! ## Implementations
//! - [`LocalTransport`]: no peers; the kernel runs stand-alone
//! - [`MockTransport`]: scriptable transport for tests and simulations

use async_trait::async_trait;
use coordspace_tuplespace::Tuple;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::debug;
use ulid::Ulid;

/// Protocol version spoken by this kernel, `major.minor.patch`.
pub const PROTOCOL_VERSION: &str = "0.6.1";

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No route to the tuple's owner
    #[error("No connection to owner {0}")]
    NotConnected(u32),

    /// Peer refused the write
    #[error("Rejected by peer: {0}")]
    Rejected(String),

    /// Url could not be used
    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    /// Transport is closed
    #[error("Transport closed")]
    Closed,
}

/// Identifier of an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Ulid);

impl ConnectionId {
    /// Fresh connection id.
    pub fn new() -> Self {
        ConnectionId(Ulid::new())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Resolves once the owner acknowledged (or refused) a remote write.
pub type PublishTicket = oneshot::Receiver<Result<(), TransportError>>;

/// Something a peer sent to this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// New value of a tuple owned by the sending peer
    Published(Tuple),
    /// A peer writes (or deletes) a tuple owned by this process
    SetRequest(Tuple),
}

/// Connection I/O and remote tuple propagation.
#[async_trait]
pub trait Transport: Send {
    /// Advance connection I/O by one tick, returning what arrived.
    async fn step(&mut self) -> Result<Vec<Inbound>, TransportError>;

    /// False once the transport hit a fatal condition.
    fn is_running(&self) -> bool;

    /// Send a write of a tuple owned by `tuple.owner` to that owner.
    /// The expiry field carries deletions.
    fn publish_remote(&mut self, tuple: &Tuple) -> PublishTicket;

    /// Connect to a peer.
    async fn connect(&mut self, url: &str) -> Result<ConnectionId, TransportError>;

    /// Keep a peer connected, reconnecting as needed.
    fn auto_connect(&mut self, url: &str);

    /// Protocol version spoken by the transport.
    fn protocol_version(&self) -> &str {
        PROTOCOL_VERSION
    }

    /// Release connections. Called once, after the last tick.
    async fn shutdown(&mut self) {}
}

fn resolved(result: Result<(), TransportError>) -> PublishTicket {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(result);
    rx
}

/// Transport for a kernel without peers.
///
/// Remote writes fail with [`TransportError::NotConnected`].
#[derive(Debug, Default)]
pub struct LocalTransport {
    closed: bool,
}

impl LocalTransport {
    /// Create a stand-alone transport.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn step(&mut self) -> Result<Vec<Inbound>, TransportError> {
        Ok(Vec::new())
    }

    fn is_running(&self) -> bool {
        !self.closed
    }

    fn publish_remote(&mut self, tuple: &Tuple) -> PublishTicket {
        resolved(Err(TransportError::NotConnected(tuple.owner.unwrap_or_default())))
    }

    async fn connect(&mut self, url: &str) -> Result<ConnectionId, TransportError> {
        Err(TransportError::InvalidUrl(url.to_string()))
    }

    fn auto_connect(&mut self, url: &str) {
        debug!(url, "stand-alone kernel ignores auto-connect");
    }

    async fn shutdown(&mut self) {
        self.closed = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// How [`MockTransport`] answers remote writes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Acknowledge immediately
    #[default]
    Accept,
    /// Refuse with the given reason
    Reject(String),
    /// Never answer
    Hold,
}

#[derive(Default)]
struct MockState {
    inbound: VecDeque<Inbound>,
    published: Vec<Tuple>,
    held: Vec<oneshot::Sender<Result<(), TransportError>>>,
    connected: Vec<String>,
    auto_connected: Vec<String>,
    ack_mode: AckMode,
    steps: u64,
    shut_down: bool,
}

/// Scriptable transport. Clone it before handing it to the kernel and
/// drive it through the clone.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    running: Arc<AtomicBool>,
    version: String,
}

impl MockTransport {
    /// Running transport speaking [`PROTOCOL_VERSION`].
    pub fn new() -> Self {
        MockTransport {
            state: Arc::default(),
            running: Arc::new(AtomicBool::new(true)),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Transport reporting another protocol version.
    pub fn with_version(version: &str) -> Self {
        MockTransport {
            version: version.to_string(),
            ..Self::new()
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a message delivered on the next step.
    pub fn deliver(&self, message: Inbound) {
        self.state().inbound.push_back(message);
    }

    /// Writes published so far.
    pub fn published(&self) -> Vec<Tuple> {
        self.state().published.clone()
    }

    /// Change how remote writes are answered.
    pub fn set_ack_mode(&self, mode: AckMode) {
        self.state().ack_mode = mode;
    }

    /// Acknowledge every held write.
    pub fn release_held(&self) {
        for tx in self.state().held.drain(..) {
            let _ = tx.send(Ok(()));
        }
    }

    /// Simulate a fatal transport failure.
    pub fn fail(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Steps taken so far.
    pub fn steps(&self) -> u64 {
        self.state().steps
    }

    /// Urls passed to `connect` and `auto_connect`.
    pub fn connections(&self) -> (Vec<String>, Vec<String>) {
        let state = self.state();
        (state.connected.clone(), state.auto_connected.clone())
    }

    /// True once the kernel released the transport.
    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn step(&mut self) -> Result<Vec<Inbound>, TransportError> {
        let mut state = self.state();
        state.steps += 1;
        Ok(state.inbound.drain(..).collect())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn publish_remote(&mut self, tuple: &Tuple) -> PublishTicket {
        let mut state = self.state();
        state.published.push(tuple.clone());
        match state.ack_mode.clone() {
            AckMode::Accept => resolved(Ok(())),
            AckMode::Reject(reason) => resolved(Err(TransportError::Rejected(reason))),
            AckMode::Hold => {
                let (tx, rx) = oneshot::channel();
                state.held.push(tx);
                rx
            }
        }
    }

    async fn connect(&mut self, url: &str) -> Result<ConnectionId, TransportError> {
        if url.is_empty() {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        self.state().connected.push(url.to_string());
        Ok(ConnectionId::new())
    }

    fn auto_connect(&mut self, url: &str) {
        self.state().auto_connected.push(url.to_string());
    }

    fn protocol_version(&self) -> &str {
        &self.version
    }

    async fn shutdown(&mut self) {
        self.state().shut_down = true;
    }
}
