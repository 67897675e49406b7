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


//! Integration tests for kernel lifecycle and the transport seam

use coordspace_kernel::{
    shared, AckMode, Clock, Inbound, Kernel, KernelConfig, KernelError, KernelState,
    ManualClock, MockTransport, SystemClock, WriteReceipt, NAME_KEY, PROTOCOL_VERSION,
    VERSION_KEY,
};
use coordspace_tuplespace::{Expiry, Timestamp, Tuple, TupleKey, ALL_KEYS_KEY};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

fn key(text: &str) -> TupleKey {
    TupleKey::parse(text).expect("valid key")
}

async fn start_mock(config: KernelConfig) -> (Kernel, MockTransport) {
    let transport = MockTransport::new();
    let kernel = Kernel::start(config, transport.clone(), Arc::new(SystemClock::new()))
        .await
        .expect("kernel starts");
    (kernel, transport)
}

/// Start publishes version and name tuples owned by this process.
#[tokio::test]
async fn test_start_publishes_identity() {
    let config = KernelConfig::default()
        .with_local_id(7)
        .with_component_name("thermostat");
    let (kernel, _transport) = start_mock(config).await;
    assert_eq!(kernel.local_id(), 7);
    assert_eq!(kernel.state(), KernelState::Running);

    let version = kernel.get_exact(7, &key(VERSION_KEY)).await.unwrap().unwrap();
    assert_eq!(version.data_str(), Some(PROTOCOL_VERSION));
    let name = kernel.get_exact(7, &key(NAME_KEY)).await.unwrap().unwrap();
    assert_eq!(name.data_str(), Some("thermostat"));

    let listing = kernel.get_exact(7, &key(ALL_KEYS_KEY)).await.unwrap().unwrap();
    let listing = listing.data_str().unwrap_or_default().to_string();
    assert!(listing.contains(VERSION_KEY) && listing.contains(NAME_KEY));
    kernel.shutdown().await.unwrap();
}

/// A transport speaking another protocol version is refused.
#[tokio::test]
async fn test_version_mismatch_refuses_start() {
    let result = Kernel::start(
        KernelConfig::default(),
        MockTransport::with_version("0.1.0"),
        Arc::new(SystemClock::new()),
    )
    .await;
    assert!(matches!(result, Err(KernelError::VersionMismatch { .. })));
}

/// Invalid configuration is refused before anything starts.
#[tokio::test]
async fn test_invalid_config_refuses_start() {
    let config = KernelConfig {
        tick_hz: 0,
        ..KernelConfig::default()
    };
    let result = Kernel::start_local(config).await;
    assert!(matches!(result, Err(KernelError::InvalidConfiguration(_))));
}

/// The loop stops only when the last user shuts down.
#[tokio::test]
async fn test_reference_counted_shutdown() {
    let (kernel, transport) = start_mock(KernelConfig::default()).await;
    let second = kernel.retain();
    assert_eq!(kernel.users(), 2);

    kernel.shutdown().await.unwrap();
    assert!(second.is_running());
    second.set_tuple("still", "here").await.unwrap();

    second.shutdown().await.unwrap();
    assert_eq!(second.state(), KernelState::ShuttingDown);
    assert!(transport.is_shut_down());
    assert!(matches!(
        second.set_tuple("late", "x").await,
        Err(KernelError::NotRunning)
    ));
    // extra shutdowns are harmless
    second.shutdown().await.unwrap();
    assert_eq!(second.users(), 0);
}

/// The loop steps the transport every tick.
#[tokio::test]
async fn test_ticks_step_transport() {
    let (kernel, transport) = start_mock(KernelConfig::default()).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(transport.steps() > 0);
    assert!(kernel.stats().await.unwrap().ticks > 0);
    kernel.shutdown().await.unwrap();
}

/// A failed transport ends the loop and later calls fail.
#[tokio::test]
async fn test_transport_failure_stops_kernel() {
    let (kernel, transport) = start_mock(KernelConfig::default()).await;
    transport.fail();
    tokio::time::timeout(RECV_TIMEOUT, kernel.stopped())
        .await
        .expect("kernel stops after transport failure");
    assert!(matches!(
        kernel.set_tuple("x", "1").await,
        Err(KernelError::TransportStopped)
    ));
    kernel.shutdown().await.unwrap();
    assert!(transport.is_shut_down());
}

/// Writes of foreign-owned tuples go to the transport.
#[tokio::test]
async fn test_remote_insert_is_published() {
    let (kernel, transport) = start_mock(KernelConfig::default()).await;
    let receipt = kernel.set_remote_tuple(2, "lamp", "on").await.unwrap();
    assert_eq!(receipt, WriteReceipt::AcceptedForSend);
    let published = transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].owner, Some(2));
    assert_eq!(published[0].creator, Some(1));
    assert!(kernel.get_exact(2, &key("lamp")).await.unwrap().is_none());

    let receipt = kernel
        .insert_blocking(Tuple::text(2, "lamp", "off").unwrap())
        .await
        .unwrap();
    assert_eq!(receipt, WriteReceipt::Acknowledged);

    let receipt = kernel.delete(2, &key("lamp")).await.unwrap();
    assert_eq!(receipt, WriteReceipt::AcceptedForSend);
    let marker = transport.published().pop().unwrap();
    assert_eq!(marker.ts_expire, Some(Expiry::Immediately));
    kernel.shutdown().await.unwrap();
}

/// Blocking remote writes fail on refusal and on missing acknowledgement.
#[tokio::test]
async fn test_insert_blocking_refused_and_timed_out() {
    let config = KernelConfig {
        insert_ack_timeout_ms: 50,
        ..KernelConfig::default()
    };
    let (kernel, transport) = start_mock(config).await;

    transport.set_ack_mode(AckMode::Reject("read only".to_string()));
    let err = kernel
        .insert_blocking(Tuple::text(3, "k", "v").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::Transport(_)));

    transport.set_ack_mode(AckMode::Hold);
    let err = kernel
        .insert_blocking(Tuple::text(3, "k", "v").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::Timeout(_)));
    transport.release_held();
    kernel.shutdown().await.unwrap();
}

/// With remote writes disabled foreign tuples are refused.
#[tokio::test]
async fn test_remote_writes_disabled() {
    let config = KernelConfig {
        allow_remote_writes: false,
        ..KernelConfig::default()
    };
    let (kernel, transport) = start_mock(config).await;
    let err = kernel.set_remote_tuple(2, "x", "1").await.unwrap_err();
    assert!(matches!(err, KernelError::ForeignOwner { owner: 2, local: 1 }));
    assert!(transport.published().is_empty());
    kernel.shutdown().await.unwrap();
}

/// Values published by peers are cached and dispatched.
#[tokio::test]
async fn test_inbound_replica_dispatches() {
    let (kernel, transport) = start_mock(KernelConfig::default()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    kernel
        .register_callback(Tuple::locator(Some(2), key("temp")), move |t| {
            let _ = tx.send(t.clone());
        })
        .unwrap();
    kernel.sync().await.unwrap();

    let mut replica = Tuple::text(2, "temp", "19").unwrap();
    replica.seqno = Some(5);
    transport.deliver(Inbound::Published(replica));
    let seen = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timeout waiting for replica")
        .unwrap();
    assert_eq!(seen.seqno, Some(5));

    let mut stale = Tuple::text(2, "temp", "18").unwrap();
    stale.seqno = Some(4);
    transport.deliver(Inbound::Published(stale));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let cached = kernel.get_exact(2, &key("temp")).await.unwrap().unwrap();
    assert_eq!(cached.data_str(), Some("19"));
    kernel.shutdown().await.unwrap();
}

/// Peers write and delete tuples owned by this process.
#[tokio::test]
async fn test_inbound_set_requests() {
    let (kernel, transport) = start_mock(KernelConfig::default()).await;
    transport.deliver(Inbound::SetRequest(
        Tuple::text(1, "mode", "eco").unwrap().with_creator(4),
    ));
    let value = kernel
        .get_tuple(
            1,
            &key("mode"),
            coordspace_kernel::GetFlags::default()
                .blocking()
                .with_timeout(RECV_TIMEOUT),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value.data_str(), Some("eco"));
    assert_eq!(value.creator, Some(4));

    transport.deliver(Inbound::SetRequest(
        Tuple::text(1, "mode", "")
            .unwrap()
            .with_creator(4)
            .with_expiry(Expiry::Immediately),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!kernel.exists(1, &key("mode")).await.unwrap());
    kernel.shutdown().await.unwrap();
}

/// Expired tuples are purged on a tick and reported as deletions.
#[tokio::test]
async fn test_expiry_fires_deleted_callback() {
    let clock = ManualClock::new(Timestamp::new(1_000, 0));
    let config = KernelConfig {
        publish_all_keys: false,
        ..KernelConfig::default()
    };
    let kernel = Kernel::start(config, MockTransport::new(), Arc::new(clock.clone()))
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    kernel
        .register_deleted_callback(Tuple::locator(Some(1), key("lease")), move |t| {
            let _ = tx.send(t.clone());
        })
        .unwrap();

    let deadline = clock.now().after(Duration::from_secs(5));
    kernel
        .insert(Tuple::text(1, "lease", "held").unwrap().with_expiry(Expiry::At(deadline)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(kernel.exists(1, &key("lease")).await.unwrap());

    clock.advance(Duration::from_secs(6));
    let removed = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timeout waiting for expiry")
        .unwrap();
    assert_eq!(removed.data_str(), Some("held"));
    assert!(!kernel.exists(1, &key("lease")).await.unwrap());
    kernel.shutdown().await.unwrap();
}

/// Configured peers are connected at start.
#[tokio::test]
async fn test_configured_connections() {
    let config = KernelConfig {
        connect: vec!["tcp://10.0.0.2:8000".to_string()],
        auto_connect: vec!["tcp://10.0.0.3:8000".to_string()],
        ..KernelConfig::default()
    };
    let (kernel, transport) = start_mock(config).await;
    let (connected, auto) = transport.connections();
    assert_eq!(connected, vec!["tcp://10.0.0.2:8000".to_string()]);
    assert_eq!(auto, vec!["tcp://10.0.0.3:8000".to_string()]);

    kernel.connect("tcp://10.0.0.4:8000").await.unwrap();
    assert!(matches!(
        kernel.connect("").await,
        Err(KernelError::Transport(_))
    ));
    kernel.shutdown().await.unwrap();
}

/// find_owner waits for the first process to publish a key.
#[tokio::test]
async fn test_find_owner() {
    let (kernel, transport) = start_mock(KernelConfig::default()).await;
    assert!(matches!(
        kernel
            .find_owner(&key("printer"), Some(Duration::from_millis(30)))
            .await,
        Err(KernelError::Timeout(_))
    ));
    transport.deliver(Inbound::Published(Tuple::text(9, "printer", "idle").unwrap()));
    let owner = kernel
        .find_owner(&key("printer"), Some(RECV_TIMEOUT))
        .await
        .unwrap();
    assert_eq!(owner, 9);
    kernel.shutdown().await.unwrap();
}

/// The process-wide kernel is shared and reference counted.
#[tokio::test]
#[serial]
async fn test_shared_kernel() {
    let first = shared::initialize(KernelConfig::default()).await.unwrap();
    let second = shared::initialize(KernelConfig::default().with_local_id(99))
        .await
        .unwrap();
    assert_eq!(second.local_id(), first.local_id());
    assert_eq!(first.users(), 2);

    shared::shutdown().await.unwrap();
    assert!(shared::current().await.is_some());
    assert!(first.is_running());

    shared::shutdown().await.unwrap();
    assert!(shared::current().await.is_none());
    assert!(!first.is_running());
}
