//! Hub updates republished through a real Zenoh session.
//!
//! Zenoh requires a multi-thread tokio runtime. Each test uses a unique
//! prefix to avoid interference.

mod common;

use common::{Control, Step, hub, poll};
use modbus_fast::bridge::{Availability, HubFeeds, UpdateBridge};
use modbus_fast::config::{DeviceEndpoint, RegisterKind};
use modbus_fast::detector::{ChangeSignal, HubUpdate, ValueVector};
use modbus_fast::points::PointMap;
use modbus_fast_common::{Format, KeyExprBuilder, PointSample, decode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bridge_publishes_points_and_availability() {
    let prefix = unique_prefix();
    let keys = KeyExprBuilder::with_prefix(&prefix, "Line 1");

    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");
    let subscriber = session
        .declare_subscriber(keys.device_wildcard())
        .await
        .expect("Failed to create subscriber");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let control = Control::new(vec![]);
    control.repeat(Step::Bits(vec![true, false, true]));
    let mut hub = hub(&control, poll(RegisterKind::Coil, 3, 20, true));
    let points = PointMap::new("Line 1", hub.endpoint(), hub.poll_config());

    let feeds = HubFeeds::from_hub(&hub);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bridge = UpdateBridge::new(session.clone(), keys.clone(), points, Format::Cbor);
    let bridge_task = tokio::spawn(bridge.run(feeds, shutdown_rx));

    hub.start().await.expect("Failed to start hub");

    let availability_key = keys.availability();
    let mut available = None;
    let mut values: HashMap<String, bool> = HashMap::new();

    let collect = async {
        while available != Some(true) || values.len() < 3 {
            let sample = subscriber.recv_async().await.expect("Subscriber closed");
            let key = sample.key_expr().as_str().to_string();
            let payload = sample.payload().to_bytes();

            if key == availability_key {
                let decoded: Availability = decode(&payload, Format::Cbor).expect("availability");
                available = Some(decoded.available);
            } else {
                let decoded: PointSample = decode(&payload, Format::Cbor).expect("point");
                assert_eq!(decoded.source, "Line_1");
                values.insert(decoded.metric, decoded.value);
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("Timeout waiting for bridge output");

    assert_eq!(values.get("C0"), Some(&true));
    assert_eq!(values.get("C1"), Some(&false));
    assert_eq!(values.get("C2"), Some(&true));

    shutdown_tx.send_replace(true);
    let published = bridge_task.await.expect("Bridge task panicked");
    assert!(published >= 3);

    hub.stop().await;
    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lagged_bridge_never_publishes_stale_values() {
    let prefix = unique_prefix();
    let keys = KeyExprBuilder::with_prefix(&prefix, "Lagging");

    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");
    let subscriber = session
        .declare_subscriber(keys.device_wildcard())
        .await
        .expect("Failed to create subscriber");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Four flips into a two-slot channel; the snapshot holds the last one
    let (updates_tx, updates_rx) = broadcast::channel(2);
    for value in [true, false, true, false] {
        let values: ValueVector = vec![Some(value)].into();
        updates_tx
            .send(HubUpdate {
                signal: ChangeSignal::Changed(vec![0]),
                values,
            })
            .unwrap();
    }
    let (_values_tx, values_rx) = watch::channel::<ValueVector>(vec![Some(false)].into());
    let (_connection_tx, connection_rx) = watch::channel(true);
    let feeds = HubFeeds {
        updates: updates_rx,
        connection: connection_rx,
        values: values_rx,
    };

    let poll_config = poll(RegisterKind::Coil, 1, 10, true);
    let endpoint = DeviceEndpoint::new("127.0.0.1", 502, 1);
    let points = PointMap::new("Lagging", &endpoint, &poll_config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bridge = UpdateBridge::new(session.clone(), keys.clone(), points, Format::Json);
    let bridge_task = tokio::spawn(bridge.run(feeds, shutdown_rx));

    let mut published = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(500), subscriber.recv_async()).await {
            Ok(sample) => {
                let sample = sample.expect("Subscriber closed");
                if sample.key_expr().as_str() == keys.availability() {
                    continue;
                }
                let payload = sample.payload().to_bytes();
                let decoded: PointSample = decode(&payload, Format::Json).expect("point");
                assert_eq!(decoded.metric, "C0");
                published.push(decoded.value);
            }
            Err(_) => break,
        }
    }

    shutdown_tx.send_replace(true);
    let count = bridge_task.await.expect("Bridge task panicked");

    // Initial snapshot, then the resync after the lag
    assert_eq!(published, vec![false, false]);
    assert_eq!(count, 2);

    drop(updates_tx);
    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
