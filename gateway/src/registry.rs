//! # registry
//!
//! Process-wide map of authenticated devices: IMEI → live session handle.
//! The session task owns its socket; the registry only holds the handle used
//! for outbound command delivery and presence queries.
//!
//! Duplicate IMEIs follow latest-connection-wins: registering over an existing
//! entry swaps the handle and signals the superseded session to close, in one
//! lock scope. Removal is conditional on the session id so a closing session
//! never unregisters its successor.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::info;

/// Non-owning reference to a live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: u64,
    pub peer_addr: SocketAddr,
    /// UNIX seconds at authentication.
    pub connected_at: i64,
    /// UNIX seconds of the last byte from the peer; the session task updates
    /// this, presence queries read it.
    pub last_seen: Arc<AtomicI64>,
    outbound: mpsc::Sender<Vec<u8>>,
    close: Arc<Notify>,
}

impl SessionHandle {
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        outbound: mpsc::Sender<Vec<u8>>,
        close: Arc<Notify>,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            session_id,
            peer_addr,
            connected_at: now,
            last_seen: Arc::new(AtomicI64::new(now)),
            outbound,
            close,
        }
    }

    /// Ask the owning session task to stop reading and tear down.
    pub fn request_close(&self) {
        self.close.notify_one();
    }
}

/// Why an outbound frame could not be handed to a session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("device is not connected")]
    NotConnected,
    #[error("session outbound queue is unavailable")]
    ChannelBusy,
}

/// Presence row returned by the control endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub imei: String,
    pub peer_addr: String,
    pub connected_at: i64,
    pub last_seen: i64,
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, SessionHandle>>,
    next_session_id: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert or replace the entry for `imei`. A replaced session is signalled
    /// to close before the lock is released.
    pub async fn register(&self, imei: &str, handle: SessionHandle) {
        let mut devices = self.devices.write().await;
        if let Some(prior) = devices.insert(imei.to_string(), handle) {
            info!(
                imei,
                prior_session = prior.session_id,
                "new connection supersedes existing session"
            );
            prior.request_close();
        }
    }

    /// Remove the entry only if it still belongs to `session_id`. Idempotent.
    pub async fn unregister_if_current(&self, imei: &str, session_id: u64) -> bool {
        let mut devices = self.devices.write().await;
        match devices.get(imei) {
            Some(handle) if handle.session_id == session_id => {
                devices.remove(imei);
                true
            }
            _ => false,
        }
    }

    /// Hand a framed message to the device's session for writing.
    pub async fn dispatch(&self, imei: &str, frame: Vec<u8>) -> Result<(), DispatchError> {
        let devices = self.devices.read().await;
        let handle = devices.get(imei).ok_or(DispatchError::NotConnected)?;
        handle
            .outbound
            .try_send(frame)
            .map_err(|_| DispatchError::ChannelBusy)
    }

    pub async fn is_connected(&self, imei: &str) -> bool {
        self.devices.read().await.contains_key(imei)
    }

    pub async fn connected_count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn snapshot(&self) -> Vec<DeviceStatus> {
        let devices = self.devices.read().await;
        let mut statuses: Vec<DeviceStatus> = devices
            .iter()
            .map(|(imei, handle)| DeviceStatus {
                imei: imei.clone(),
                peer_addr: handle.peer_addr.to_string(),
                connected_at: handle.connected_at,
                last_seen: handle.last_seen.load(Ordering::Relaxed),
            })
            .collect();
        statuses.sort_by(|a, b| a.imei.cmp(&b.imei));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_handle(registry: &DeviceRegistry) -> (SessionHandle, mpsc::Receiver<Vec<u8>>, Arc<Notify>) {
        let (tx, rx) = mpsc::channel(4);
        let close = Arc::new(Notify::new());
        let handle = SessionHandle::new(
            registry.next_session_id(),
            "10.0.0.1:40000".parse().expect("valid addr"),
            tx,
            close.clone(),
        );
        (handle, rx, close)
    }

    #[tokio::test]
    async fn latest_connection_wins() {
        let registry = DeviceRegistry::new();
        let (first, _rx1, close1) = test_handle(&registry);
        let first_id = first.session_id;
        registry.register("356307042441013", first).await;

        let (second, _rx2, _close2) = test_handle(&registry);
        let second_id = second.session_id;
        registry.register("356307042441013", second).await;

        // The first session was told to close.
        tokio::time::timeout(Duration::from_millis(100), close1.notified())
            .await
            .expect("superseded session must be signalled");

        // The first session's cleanup must not unhook the successor.
        assert!(!registry.unregister_if_current("356307042441013", first_id).await);
        assert!(registry.is_connected("356307042441013").await);
        assert!(registry.unregister_if_current("356307042441013", second_id).await);
        assert!(!registry.is_connected("356307042441013").await);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = DeviceRegistry::new();
        let (handle, _rx, _close) = test_handle(&registry);
        let id = handle.session_id;
        registry.register("123456789012345", handle).await;

        assert!(registry.unregister_if_current("123456789012345", id).await);
        assert!(!registry.unregister_if_current("123456789012345", id).await);
        assert_eq!(registry.connected_count().await, 0);
    }

    #[tokio::test]
    async fn dispatch_reaches_the_session_channel() {
        let registry = DeviceRegistry::new();
        let (handle, mut rx, _close) = test_handle(&registry);
        registry.register("123456789012345", handle).await;

        registry
            .dispatch("123456789012345", vec![1, 2, 3])
            .await
            .expect("dispatch to live session");
        assert_eq!(rx.recv().await, Some(vec![1, 2, 3]));

        assert_eq!(
            registry.dispatch("000000000000000", vec![0]).await,
            Err(DispatchError::NotConnected)
        );
    }

    #[tokio::test]
    async fn snapshot_reports_presence() {
        let registry = DeviceRegistry::new();
        let (handle, _rx, _close) = test_handle(&registry);
        registry.register("356307042441013", handle).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].imei, "356307042441013");
        assert_eq!(snapshot[0].peer_addr, "10.0.0.1:40000");
        assert!(snapshot[0].last_seen >= snapshot[0].connected_at);
    }
}
