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


//! End-to-end coordination scenarios through the public crate

use coordspace::tuplespace::{is_equal, is_generalization, Matcher};
use coordspace::{GetFlags, Kernel, KernelConfig, MetaRef, Tuple, TupleKey, WriteReceipt};
use std::time::Duration;
use tokio::sync::mpsc;

fn key(text: &str) -> TupleKey {
    TupleKey::parse(text).expect("valid key")
}

async fn start(local_id: u32) -> Kernel {
    let config = KernelConfig::default().with_local_id(local_id);
    Kernel::start_local(config).await.expect("kernel starts")
}

/// A temperature reading is found by a wildcard search and compares equal
/// only to a tuple with the same reading.
#[tokio::test]
async fn test_temperature_scenario() {
    let kernel = start(5).await;
    kernel.set_tuple("temp.c", "21.5").await.unwrap();

    let results = kernel
        .search(&Tuple::locator(None, key("temp.*")))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let found = results.iter().next().cloned().unwrap();
    assert_eq!(found.owner, Some(5));

    let mut same = Tuple::text(5, "temp.c", "21.5").unwrap();
    same.creator = found.creator;
    same.ts_write = found.ts_write;
    same.seqno = found.seqno;
    assert!(is_equal(&same, &found));

    let other = same.clone().with_data(b"21.6".to_vec());
    assert!(!is_equal(&other, &found));
    kernel.shutdown().await.unwrap();
}

/// Inserting then reading back preserves every field except the ones the
/// store stamps.
#[tokio::test]
async fn test_insert_then_get_preserves_fields() {
    let kernel = start(1).await;
    let written = Tuple::text(1, "door.front", "locked")
        .unwrap()
        .with_mimetype("application/x-state");
    let receipt = kernel.insert(written.clone()).await.unwrap();
    assert_eq!(receipt, WriteReceipt::Committed { seqno: 1 });

    let read = kernel
        .get_exact(1, &key("door.front"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.data, written.data);
    assert_eq!(read.mimetype, written.mimetype);
    assert_eq!(read.encoding, written.encoding);
    assert_eq!(read.seqno, Some(1));
    assert!(read.ts_write.is_some());
    assert!(is_generalization(&Tuple::locator(Some(1), key("door.*")), &read));
    assert!(Matcher::default().is_generalization(&read, &read));
    kernel.shutdown().await.unwrap();
}

/// A controller follows "the active sensor" through a meta tuple while a
/// second component switches sensors.
#[tokio::test]
async fn test_controller_follows_active_sensor() {
    let kernel = start(1).await;
    let active = key("control.active-sensor");
    let kitchen = MetaRef::new(1, key("sensor.kitchen")).unwrap();
    let hall = MetaRef::new(1, key("sensor.hall")).unwrap();
    kernel.set_meta(1, &active, Some(&kitchen)).await.unwrap();
    assert_eq!(kernel.resolve(1, &active).await.unwrap(), Some(kitchen));

    let (tx, mut rx) = mpsc::unbounded_channel();
    kernel
        .register_indirect_callback(1, &active, move |t: &Tuple| {
            let _ = tx.send(t.data_str().unwrap_or_default().to_string());
        })
        .unwrap();

    let switcher = kernel.retain();
    kernel.set_tuple("sensor.kitchen", "22").await.unwrap();
    switcher.set_meta(1, &active, Some(&hall)).await.unwrap();
    kernel.set_tuple("sensor.kitchen", "23").await.unwrap();
    kernel.set_tuple("sensor.hall", "18").await.unwrap();
    switcher.shutdown().await.unwrap();

    let mut readings = Vec::new();
    while let Ok(Some(r)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        readings.push(r);
    }
    assert_eq!(readings, vec!["22".to_string(), "18".to_string()]);

    let current = kernel
        .get_indirect(1, &active, GetFlags::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.data_str(), Some("18"));
    kernel.shutdown().await.unwrap();
}
