//! End-to-end tests with Zenoh pub/sub.
//!
//! Zenoh requires a multi-thread tokio runtime. Each test uses a unique
//! prefix to avoid interference.

use std::time::Duration;
use modbus_fast_common::{Format, KeyExprBuilder, PointSample, decode_auto, encode};

fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_point_samples_reach_subscriber() {
    let prefix = unique_prefix();
    let builder = KeyExprBuilder::with_prefix(&prefix, "plc01");

    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");

    let subscriber = session
        .declare_subscriber(builder.device_wildcard())
        .await
        .expect("Failed to create subscriber");

    tokio::time::sleep(Duration::from_millis(100)).await;

    for (format, metric) in [(Format::Json, "C0"), (Format::Cbor, "C1")] {
        let sample = PointSample::new("plc01", metric, true);
        let payload = encode(&sample, format).expect("Failed to encode");

        session
            .put(builder.point("coil", metric), payload)
            .await
            .expect("Failed to publish");

        let received = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
            .await
            .expect("Timeout waiting for sample")
            .expect("Failed to receive sample");

        let decoded: PointSample =
            decode_auto(&received.payload().to_bytes()).expect("Failed to decode");
        assert_eq!(decoded.metric, metric);
        assert!(decoded.value);
    }

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
