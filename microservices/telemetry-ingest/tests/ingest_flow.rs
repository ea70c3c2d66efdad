//! End-to-end ingest tests against the in-memory store and the real hub

use std::sync::Arc;
use std::time::Duration;

use riverwatch_core::DeviceId;
use tokio_test::{assert_err, assert_ok};
use telemetry_ingest::cache::CacheManager;
use telemetry_ingest::fanout::{SubscriptionHub, TopicClass};
use telemetry_ingest::ingest::{IngestPipeline, MeasurementWriter};
use telemetry_ingest::store::MemoryStore;

struct Harness {
    store: Arc<MemoryStore>,
    hub: Arc<SubscriptionHub>,
    pipeline: Arc<IngestPipeline>,
}

fn harness(sample_size: usize) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(SubscriptionHub::new(256, Duration::from_millis(200)));
    let cache = Arc::new(CacheManager::new(
        store.clone(),
        sample_size,
        Duration::from_secs(1),
    ));
    let writer = MeasurementWriter::spawn(store.clone(), 128, 4, Duration::from_secs(1));
    let pipeline = Arc::new(IngestPipeline::new(cache, writer, hub.clone(), 30, 35.0));
    Harness {
        store,
        hub,
        pipeline,
    }
}

fn payload(id: &str, height: f64) -> Vec<u8> {
    format!(
        r#"{{"i":"{}","d":{},"t":24.5,"b":3.95,"rssi":-101,"snr":6.5}}"#,
        id, height
    )
    .into_bytes()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_baseline_derived_from_first_twelve_readings() {
    let h = harness(12);
    let id = DeviceId::new("U1");

    for _ in 0..11 {
        let outcome = h.pipeline.handle(&payload("U1", 10.0)).await.unwrap();
        assert_eq!(outcome.payload.normal_level, 10.0);
    }
    let outcome = h.pipeline.handle(&payload("U1", 20.0)).await.unwrap();
    let expected = 130.0 / 12.0;
    assert!((outcome.payload.normal_level - expected).abs() < 1e-9);
    assert_eq!(outcome.payload.raw_height, 20.0);

    // Further readings never move the baseline
    let outcome = h.pipeline.handle(&payload("U1", 99.0)).await.unwrap();
    assert!((outcome.payload.normal_level - expected).abs() < 1e-9);

    assert_eq!(h.store.stored_baseline(&id), Some(outcome.payload.normal_level));
    assert_eq!(h.store.baseline_writes(), 1);
}

#[tokio::test]
async fn test_every_reading_broadcast_once_and_write_throttled() {
    let h = harness(12);
    let mut viewer = h.hub.subscribe(TopicClass::All);

    for height in [1.0, 2.0, 3.0] {
        assert_ok!(h.pipeline.handle(&payload("U2", height)).await);
    }

    for _ in 0..3 {
        let message = viewer.rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(json["unit_id"], "U2");
        assert_eq!(json["signal"], 35.0);
    }
    assert!(viewer.rx.try_recv().is_err());

    // Readings inside the save interval are written once
    wait_until(|| h.pipeline.stats().writer.written == 1).await;
    assert_eq!(h.store.measurements(&"U2".into()).len(), 1);
    assert_eq!(h.pipeline.stats().writes_scheduled, 1);
}

#[tokio::test]
async fn test_malformed_messages_touch_nothing() {
    let h = harness(12);
    let mut viewer = h.hub.subscribe(TopicClass::All);

    for bad in [
        &b"garbage"[..],
        &b"17.5"[..],
        &br#"{"i":"U3","d":1.0}"#[..],
        &br#"{"i":"U3","d":"tall","t":1,"b":1,"rssi":1,"snr":1}"#[..],
    ] {
        assert_err!(h.pipeline.handle(bad).await);
    }

    let stats = h.pipeline.stats();
    assert_eq!(stats.decode_failures, 4);
    assert_eq!(stats.broadcasts, 0);
    assert_eq!(stats.writes_scheduled, 0);
    assert!(viewer.rx.try_recv().is_err());
    assert!(h.pipeline.cache().get_latest_reading(&"U3".into()).is_none());
}

#[tokio::test]
async fn test_clear_restarts_derivation_but_store_restores_baseline() {
    let h = harness(2);
    let id = DeviceId::new("U4");

    h.pipeline.handle(&payload("U4", 4.0)).await.unwrap();
    let derived = h.pipeline.handle(&payload("U4", 8.0)).await.unwrap();
    assert_eq!(derived.payload.normal_level, 6.0);

    h.pipeline.cache().clear(Some(&id)).await;
    assert!(h.pipeline.cache().get_baseline(&id).is_none());

    // The persisted baseline is picked up again on the next reading
    let outcome = h.pipeline.handle(&payload("U4", 50.0)).await.unwrap();
    assert_eq!(outcome.payload.normal_level, 6.0);
}

#[tokio::test]
async fn test_dispatch_processes_off_the_callback() {
    let h = harness(12);
    let mut distance = h.hub.subscribe(TopicClass::Distance);

    h.pipeline.dispatch("lora/water_lavel", &payload("U5", 3.0));
    h.pipeline.dispatch("lora/water_lavel", b"{not json");

    let message = tokio::time::timeout(Duration::from_secs(2), distance.rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(message.contains("\"unit_id\":\"U5\""));

    let stats = h.pipeline.stats();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.decode_failures, 1);
}

#[tokio::test]
async fn test_devices_do_not_share_state() {
    let h = harness(2);

    h.pipeline.handle(&payload("A", 1.0)).await.unwrap();
    h.pipeline.handle(&payload("A", 3.0)).await.unwrap();
    let b = h.pipeline.handle(&payload("B", 100.0)).await.unwrap();

    assert_eq!(b.payload.normal_level, 100.0);
    let stats = h.pipeline.cache().stats();
    assert_eq!(stats.devices_with_resolved_baseline, 1);
    assert_eq!(stats.devices_deriving_baseline, 1);
    assert_eq!(stats.derivation_progress["B"].collected, 1);
}
