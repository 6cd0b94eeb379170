//! # sink
//!
//! Buffered delivery of normalized records and device connection events to the
//! storage API.
//!
//! Producers (session tasks) push into a bounded in-memory queue and never
//! block: when the queue is full the oldest records are dropped and counted.
//! A single drainer task posts batches of up to `sink_batch_size` records, or
//! whatever accumulated within `sink_batch_timeout`, whichever fills first.
//! Delivery is at-least-once with a bounded backoff; a batch that still fails
//! after the last attempt is dropped and counted. Nothing in here ever
//! surfaces an error to a session; the device already got its ACK.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use teltonika_proto::model::{local_datetime, IoValue};
use teltonika_proto::NormalizedRecord;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;

const POST_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SinkGps {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: i16,
    pub speed_kmh: u16,
    pub heading_deg: u16,
    pub satellites: u8,
}

/// One record as posted to `POST {sink_url}/gps`.
#[derive(Debug, Clone, Serialize)]
pub struct SinkRecord {
    pub imei: String,
    /// ISO-8601 with the fixed rendering offset.
    pub timestamp: String,
    pub priority: u8,
    pub gps: SinkGps,
    /// Raw values keyed by decimal I/O id.
    pub io: BTreeMap<String, IoValue>,
    pub event_io_id: u16,
}

impl SinkRecord {
    pub fn from_normalized(imei: &str, record: &NormalizedRecord) -> Self {
        Self {
            imei: imei.to_string(),
            timestamp: local_datetime(record.timestamp_ms).to_rfc3339(),
            priority: record.priority.as_u8(),
            gps: SinkGps {
                latitude: record.gps.latitude(),
                longitude: record.gps.longitude(),
                altitude_m: record.gps.altitude_m,
                speed_kmh: record.gps.speed_kmh,
                heading_deg: record.gps.heading_deg,
                satellites: record.gps.satellites,
            },
            io: record
                .io
                .iter()
                .map(|(id, value)| (id.to_string(), value.raw.clone()))
                .collect(),
            event_io_id: record.event_io_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct DeviceStatusUpdate {
    is_connected: bool,
    ip_address: Option<String>,
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct SinkClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    batch_size: usize,
    batch_timeout: Duration,
    queue_capacity: usize,
    queue: Mutex<VecDeque<SinkRecord>>,
    notify: Notify,
    /// Records accepted into the queue.
    pub queued: AtomicU64,
    /// Records delivered to the storage API.
    pub posted: AtomicU64,
    /// Records dropped on queue overflow.
    pub dropped: AtomicU64,
    /// Records lost after exhausting delivery retries.
    pub failed: AtomicU64,
}

impl SinkClient {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.sink_url.trim_end_matches('/').to_string(),
            token: config.sink_token.clone(),
            batch_size: config.sink_batch_size.max(1),
            batch_timeout: config.sink_batch_timeout,
            queue_capacity: config.sink_queue_capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            queued: AtomicU64::new(0),
            posted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<SinkRecord>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue one record for delivery. Never blocks; overflow evicts oldest.
    pub fn push(&self, imei: &str, record: &NormalizedRecord) {
        let record = SinkRecord::from_normalized(imei, record);
        let mut overflowed = 0u64;
        {
            let mut queue = self.lock_queue();
            queue.push_back(record);
            while queue.len() > self.queue_capacity {
                queue.pop_front();
                overflowed += 1;
            }
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
        if overflowed > 0 {
            self.dropped.fetch_add(overflowed, Ordering::Relaxed);
            warn!(
                dropped = overflowed,
                total_dropped = self.dropped.load(Ordering::Relaxed),
                "sink queue full, evicted oldest records"
            );
        }
        self.notify.notify_one();
    }

    pub fn queue_len(&self) -> usize {
        self.lock_queue().len()
    }

    fn take_batch(&self) -> Vec<SinkRecord> {
        let mut queue = self.lock_queue();
        let take = queue.len().min(self.batch_size);
        queue.drain(..take).collect()
    }

    /// Drainer task: batches the queue into the storage API until shutdown,
    /// then flushes whatever is left.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(sink = %self.base_url, "sink drainer started");
        loop {
            if self.queue_len() == 0 {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = shutdown.changed() => break,
                }
            }
            // Let the batch fill up to size, but never past the timeout.
            if self.queue_len() < self.batch_size {
                tokio::select! {
                    _ = tokio::time::sleep(self.batch_timeout) => {}
                    _ = shutdown.changed() => break,
                }
            }
            let batch = self.take_batch();
            if !batch.is_empty() {
                self.post_batch(batch).await;
            }
        }

        // Shutdown flush, same bounded backoff.
        loop {
            let batch = self.take_batch();
            if batch.is_empty() {
                break;
            }
            self.post_batch(batch).await;
        }
        info!("sink drainer stopped");
    }

    async fn post_batch(&self, batch: Vec<SinkRecord>) {
        let url = format!("{}/gps", self.base_url);
        let count = batch.len() as u64;
        for (attempt, backoff) in POST_BACKOFF.iter().enumerate() {
            let mut request = self.http.post(&url).json(&batch);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    self.posted.fetch_add(count, Ordering::Relaxed);
                    debug!(records = count, "sink batch delivered");
                    return;
                }
                Ok(response) => {
                    warn!(
                        status = %response.status(),
                        attempt = attempt + 1,
                        "sink rejected batch"
                    );
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, "sink post failed: {e}");
                }
            }
            tokio::time::sleep(*backoff).await;
        }
        self.failed.fetch_add(count, Ordering::Relaxed);
        error!(
            records = count,
            total_failed = self.failed.load(Ordering::Relaxed),
            "sink batch dropped after retries"
        );
    }

    /// Fire-and-forget connection status update
    /// (`POST {sink_url}/devices/{imei}/status`).
    pub fn publish_device_status(&self, imei: &str, is_connected: bool, ip: Option<String>) {
        let http = self.http.clone();
        let url = format!("{}/devices/{}/status", self.base_url, imei);
        let token = self.token.clone();
        let imei = imei.to_string();
        tokio::spawn(async move {
            let body = DeviceStatusUpdate {
                is_connected,
                ip_address: ip,
            };
            for backoff in POST_BACKOFF {
                let mut request = http.post(&url).json(&body);
                if let Some(token) = &token {
                    request = request.bearer_auth(token);
                }
                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!(imei, is_connected, "device status delivered");
                        return;
                    }
                    Ok(response) => {
                        debug!(imei, status = %response.status(), "device status rejected");
                    }
                    Err(e) => {
                        debug!(imei, "device status post failed: {e}");
                    }
                }
                tokio::time::sleep(backoff).await;
            }
            warn!(imei, "device status update abandoned after retries");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use teltonika_proto::model::{AvlRecord, GpsFix, Priority};
    use teltonika_proto::normalize;

    fn sample_record() -> NormalizedRecord {
        let record = AvlRecord {
            timestamp_ms: 1_560_161_086_000,
            priority: Priority::High,
            gps: GpsFix {
                longitude_e7: 252_878_880,
                latitude_e7: 25_600,
                altitude_m: 10,
                heading_deg: 0,
                satellites: 9,
                speed_kmh: 1,
            },
            event_io_id: 0,
            io: BTreeMap::from([(239u16, IoValue::U8(1))]),
        };
        normalize(&record)
    }

    #[tokio::test]
    async fn overflow_drops_oldest_first() {
        let mut config = GatewayConfig::for_tests();
        config.sink_queue_capacity = 3;
        let sink = SinkClient::new(&config);

        for _ in 0..5 {
            sink.push("356307042441013", &sample_record());
        }
        assert_eq!(sink.queue_len(), 3);
        assert_eq!(sink.dropped.load(Ordering::Relaxed), 2);
        assert_eq!(sink.queued.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn take_batch_respects_batch_size() {
        let mut config = GatewayConfig::for_tests();
        config.sink_batch_size = 2;
        let sink = SinkClient::new(&config);
        for _ in 0..3 {
            sink.push("356307042441013", &sample_record());
        }
        assert_eq!(sink.take_batch().len(), 2);
        assert_eq!(sink.take_batch().len(), 1);
        assert!(sink.take_batch().is_empty());
    }

    #[test]
    fn record_json_shape_matches_the_storage_contract() {
        let record = SinkRecord::from_normalized("356307042441013", &sample_record());
        let value = serde_json::to_value(&record).expect("serializable");

        assert_eq!(value["imei"], "356307042441013");
        // 2019-06-10T10:04:46Z rendered at the fixed +03:00 offset.
        assert_eq!(value["timestamp"], "2019-06-10T13:04:46+03:00");
        assert_eq!(value["priority"], 1);
        assert_eq!(value["event_io_id"], 0);
        assert_eq!(value["gps"]["satellites"], 9);
        assert_eq!(value["gps"]["speed_kmh"], 1);
        assert!((value["gps"]["longitude"].as_f64().unwrap() - 25.287_888).abs() < 1e-9);
        assert_eq!(value["io"]["239"], 1);
    }
}
