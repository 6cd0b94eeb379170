//! # commands
//!
//! Per-IMEI command queues and the Codec 12 exchange around them.
//!
//! Commands arrive from the control endpoint, wait in a pending queue while
//! the device is offline, and are framed and written through the session once
//! one is registered. Device responses carry no command id; correlation is
//! "most recently sent, not yet completed" per IMEI, which holds because a
//! session writes serially and devices answer in order.
//!
//! A rejected CAN-control command (`unknown command or invalid format`) is
//! retried exactly once through the digital-output stream; digital-output
//! failures are terminal. Sent commands that never get an answer time out and
//! re-enter the pending queue until their attempts are exhausted.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::registry::DeviceRegistry;

const FAILURE_MARKER: &str = "unknown command or invalid format";
const COMPLETED_HISTORY: usize = 100;

/// CAN-control commands and their digital-output equivalents.
fn fallback_command(text: &str) -> Option<&'static str> {
    match text.trim() {
        "lvcanlockalldoors" => Some("setdigout 1?? 2??"),
        "lvcanopenalldoors" => Some("setdigout ?1? ?2?"),
        "lvcanblockengine" => Some("setdigout ??0"),
        "lvcanunblockengine" => Some("setdigout ??1"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Sent,
    Success,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub id: String,
    pub imei: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: CommandStatus,
    pub response: Option<String>,
    pub attempts: u8,
    /// Id of the CAN command this one replaces, for fallback commands.
    pub fallback_of: Option<String>,
}

impl Command {
    fn new(imei: &str, text: &str, id: Option<String>, fallback_of: Option<String>) -> Self {
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            imei: imei.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
            sent_at: None,
            completed_at: None,
            status: CommandStatus::Pending,
            response: None,
            attempts: 0,
            fallback_of,
        }
    }
}

// ── Status callback to the external command store ─────────────────────────────

/// Fire-and-forget `POST {sink_url}/commands/update` on every status change.
/// Failures never touch orchestrator state.
#[derive(Clone)]
pub struct StatusCallback {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl StatusCallback {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/commands/update", config.sink_url.trim_end_matches('/')),
            token: config.sink_token.clone(),
        }
    }

    fn notify(&self, command: &Command) {
        let mut payload = json!({
            "command_id": command.id,
            "status": command.status,
        });
        match command.status {
            CommandStatus::Success => payload["response"] = json!(command.response),
            CommandStatus::Failed => payload["error"] = json!(command.response),
            CommandStatus::Timeout => {
                payload["error"] = json!("no response from device before timeout")
            }
            _ => {}
        }
        let this = self.clone();
        tokio::spawn(async move {
            let mut request = this.http.post(&this.endpoint).json(&payload);
            if let Some(token) = &this.token {
                request = request.bearer_auth(token);
            }
            if let Err(e) = request.send().await {
                debug!("command status callback failed: {e}");
            }
        });
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct Queues {
    pending: HashMap<String, VecDeque<Command>>,
    active: HashMap<String, Vec<Command>>,
    completed: VecDeque<Command>,
}

pub struct CommandOrchestrator {
    registry: Arc<DeviceRegistry>,
    queues: Mutex<Queues>,
    response_timeout: Duration,
    max_retries: u8,
    callback: Option<StatusCallback>,
}

impl CommandOrchestrator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        config: &GatewayConfig,
        callback: Option<StatusCallback>,
    ) -> Self {
        Self {
            registry,
            queues: Mutex::new(Queues::default()),
            response_timeout: config.response_timeout,
            max_retries: config.max_retries.max(1),
            callback,
        }
    }

    fn notify_status(&self, command: &Command) {
        if let Some(callback) = &self.callback {
            callback.notify(command);
        }
    }

    /// Queue a command for `imei` and try to send it right away. Returns the
    /// command id (caller-supplied or generated).
    pub async fn enqueue(&self, imei: &str, text: &str, id: Option<String>) -> String {
        self.enqueue_inner(imei, text, id, None).await
    }

    async fn enqueue_inner(
        &self,
        imei: &str,
        text: &str,
        id: Option<String>,
        fallback_of: Option<String>,
    ) -> String {
        let command = Command::new(imei, text, id, fallback_of);
        let id = command.id.clone();
        info!(imei, command = text, command_id = %id, "command queued");
        {
            let mut queues = self.queues.lock().await;
            queues
                .pending
                .entry(imei.to_string())
                .or_default()
                .push_back(command);
        }
        self.dispatch_pending(imei).await;
        id
    }

    /// Send every pending command for `imei` while its session accepts them.
    /// Called on enqueue and when a session authenticates.
    pub async fn dispatch_pending(&self, imei: &str) {
        loop {
            let mut queues = self.queues.lock().await;
            let Some(queue) = queues.pending.get_mut(imei) else {
                return;
            };
            let Some(mut command) = queue.pop_front() else {
                queues.pending.remove(imei);
                return;
            };

            let frame = teltonika_proto::encode::codec12_command(&command.text);
            match self.registry.dispatch(imei, frame).await {
                Ok(()) => {
                    command.status = CommandStatus::Sent;
                    command.sent_at = Some(Utc::now());
                    command.attempts += 1;
                    info!(
                        imei,
                        command = %command.text,
                        command_id = %command.id,
                        attempt = command.attempts,
                        "command sent"
                    );
                    self.notify_status(&command);
                    queues.active.entry(imei.to_string()).or_default().push(command);
                }
                Err(e) => {
                    debug!(imei, command_id = %command.id, "command held: {e}");
                    queue.push_front(command);
                    return;
                }
            }
        }
    }

    /// Correlate a Codec 12 response with the most recently sent command.
    pub async fn handle_response(&self, imei: &str, response: &str) {
        let command = {
            let mut queues = self.queues.lock().await;
            let Some(active) = queues.active.get_mut(imei) else {
                warn!(imei, "response with no active command: {response}");
                return;
            };
            let Some(index) = active
                .iter()
                .enumerate()
                .max_by_key(|(_, command)| command.sent_at)
                .map(|(index, _)| index)
            else {
                return;
            };
            let command = active.remove(index);
            if active.is_empty() {
                queues.active.remove(imei);
            }
            command
        };

        let mut command = command;
        command.completed_at = Some(Utc::now());
        command.response = Some(response.to_string());

        if response.to_lowercase().contains(FAILURE_MARKER) {
            command.status = CommandStatus::Failed;
            warn!(
                imei,
                command = %command.text,
                command_id = %command.id,
                "device rejected command"
            );
            self.notify_status(&command);

            // One-shot cross-stream retry; fallback commands fail terminally.
            if command.fallback_of.is_none() {
                if let Some(fallback) = fallback_command(&command.text) {
                    info!(
                        imei,
                        original = %command.text,
                        fallback,
                        "retrying through digital output"
                    );
                    self.enqueue_inner(imei, fallback, None, Some(command.id.clone()))
                        .await;
                }
            }
        } else {
            command.status = CommandStatus::Success;
            info!(
                imei,
                command = %command.text,
                command_id = %command.id,
                response,
                "command succeeded"
            );
            self.notify_status(&command);
        }

        self.archive(command).await;
    }

    /// Move `Sent` commands whose response window expired to `Timeout`;
    /// commands with attempts left re-enter the pending queue.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) {
        let cutoff = now
            - chrono::Duration::from_std(self.response_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(15));

        let mut expired = Vec::new();
        {
            let mut queues = self.queues.lock().await;
            for active in queues.active.values_mut() {
                let mut index = 0;
                while index < active.len() {
                    let timed_out = active[index]
                        .sent_at
                        .map(|sent| sent < cutoff)
                        .unwrap_or(false);
                    if timed_out {
                        expired.push(active.remove(index));
                    } else {
                        index += 1;
                    }
                }
            }
            queues.active.retain(|_, active| !active.is_empty());
        }

        for mut command in expired {
            command.status = CommandStatus::Timeout;
            warn!(
                imei = %command.imei,
                command = %command.text,
                command_id = %command.id,
                attempts = command.attempts,
                "command timed out"
            );
            self.notify_status(&command);

            // attempts counts sends, so retries used = attempts - 1.
            if command.attempts <= self.max_retries {
                command.status = CommandStatus::Pending;
                command.sent_at = None;
                let imei = command.imei.clone();
                {
                    let mut queues = self.queues.lock().await;
                    queues.pending.entry(imei.clone()).or_default().push_back(command);
                }
                self.dispatch_pending(&imei).await;
            } else {
                command.completed_at = Some(now);
                self.archive(command).await;
            }
        }
    }

    /// Background tick driving [`sweep_timeouts`].
    pub async fn run_timeout_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => return,
            }
            self.sweep_timeouts(Utc::now()).await;
        }
    }

    async fn archive(&self, command: Command) {
        let mut queues = self.queues.lock().await;
        queues.completed.push_back(command);
        while queues.completed.len() > COMPLETED_HISTORY {
            queues.completed.pop_front();
        }
    }

    /// Commands queued but not yet sent, across all devices.
    pub async fn pending_count(&self) -> usize {
        let queues = self.queues.lock().await;
        queues.pending.values().map(VecDeque::len).sum()
    }

    /// Recently completed commands, oldest first (bounded history).
    pub async fn recent_completed(&self) -> Vec<Command> {
        let queues = self.queues.lock().await;
        queues.completed.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionHandle;
    use std::collections::BTreeMap;
    use teltonika_proto::model::{Codec12Message, InboundFrame};
    use teltonika_proto::parser::tcp_frame;
    use tokio::sync::{mpsc, Notify};

    struct Fixture {
        registry: Arc<DeviceRegistry>,
        orchestrator: Arc<CommandOrchestrator>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(DeviceRegistry::new());
        let orchestrator = Arc::new(CommandOrchestrator::new(
            registry.clone(),
            &GatewayConfig::for_tests(),
            None,
        ));
        Fixture {
            registry,
            orchestrator,
        }
    }

    async fn connect(fixture: &Fixture, imei: &str) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(8);
        let handle = SessionHandle::new(
            fixture.registry.next_session_id(),
            "10.0.0.1:40000".parse().expect("valid addr"),
            tx,
            Arc::new(Notify::new()),
        );
        fixture.registry.register(imei, handle).await;
        rx
    }

    fn command_text(frame: &[u8]) -> String {
        let (_, parsed) = tcp_frame(frame).expect("well-formed outbound frame");
        match parsed {
            InboundFrame::Codec12(Codec12Message::Command(text)) => text,
            other => panic!("expected a Codec 12 command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_commands_wait_for_the_device() {
        let fixture = fixture();
        fixture
            .orchestrator
            .enqueue("356307042441013", "getinfo", None)
            .await;
        assert_eq!(fixture.orchestrator.pending_count().await, 1);

        // Device connects: queue drains in order.
        let mut rx = connect(&fixture, "356307042441013").await;
        fixture.orchestrator.dispatch_pending("356307042441013").await;
        assert_eq!(fixture.orchestrator.pending_count().await, 0);
        let frame = rx.recv().await.expect("command frame");
        assert_eq!(command_text(&frame), "getinfo");
    }

    #[tokio::test]
    async fn success_response_completes_the_latest_sent_command() {
        let fixture = fixture();
        let mut rx = connect(&fixture, "356307042441013").await;
        let id = fixture
            .orchestrator
            .enqueue("356307042441013", "setdigout ??1", Some("X".into()))
            .await;
        assert_eq!(id, "X");
        rx.recv().await.expect("command frame");

        fixture
            .orchestrator
            .handle_response("356307042441013", "OK")
            .await;

        let completed = fixture.orchestrator.recent_completed().await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "X");
        assert_eq!(completed[0].status, CommandStatus::Success);
        assert_eq!(completed[0].response.as_deref(), Some("OK"));
    }

    #[tokio::test]
    async fn can_failure_falls_back_to_digital_output_once() {
        let fixture = fixture();
        let mut rx = connect(&fixture, "356307042441013").await;
        let original_id = fixture
            .orchestrator
            .enqueue("356307042441013", "lvcanlockalldoors", None)
            .await;
        assert_eq!(command_text(&rx.recv().await.expect("frame")), "lvcanlockalldoors");

        fixture
            .orchestrator
            .handle_response("356307042441013", "Unknown command OR Invalid format")
            .await;

        // Original failed, fallback went out on the wire.
        let fallback_frame = rx.recv().await.expect("fallback frame");
        assert_eq!(command_text(&fallback_frame), "setdigout 1?? 2??");
        let completed = fixture.orchestrator.recent_completed().await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, CommandStatus::Failed);
        assert_eq!(completed[0].id, original_id);

        // The fallback failing again is terminal: nothing new is sent.
        fixture
            .orchestrator
            .handle_response("356307042441013", "unknown command or invalid format")
            .await;
        let completed = fixture.orchestrator.recent_completed().await;
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[1].status, CommandStatus::Failed);
        assert_eq!(completed[1].fallback_of.as_deref(), Some(original_id.as_str()));
        assert_eq!(fixture.orchestrator.pending_count().await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unanswered_commands_time_out_and_retry() {
        let fixture = fixture();
        let mut rx = connect(&fixture, "356307042441013").await;
        fixture
            .orchestrator
            .enqueue("356307042441013", "getinfo", None)
            .await;
        rx.recv().await.expect("first attempt");

        // Window expired: the command re-enters pending and is re-sent.
        let later = Utc::now() + chrono::Duration::seconds(60);
        fixture.orchestrator.sweep_timeouts(later).await;
        assert_eq!(command_text(&rx.recv().await.expect("retry")), "getinfo");
        assert!(fixture.orchestrator.recent_completed().await.is_empty());

        // Three retries on top of the first send (max_retries = 3), then the
        // timeout is terminal.
        fixture.orchestrator.sweep_timeouts(later).await;
        rx.recv().await.expect("third attempt");
        fixture.orchestrator.sweep_timeouts(later).await;
        rx.recv().await.expect("fourth attempt");
        fixture.orchestrator.sweep_timeouts(later).await;
        let completed = fixture.orchestrator.recent_completed().await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, CommandStatus::Timeout);
        assert_eq!(completed[0].attempts, 4);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn response_without_active_command_is_ignored() {
        let fixture = fixture();
        fixture
            .orchestrator
            .handle_response("356307042441013", "OK")
            .await;
        assert!(fixture.orchestrator.recent_completed().await.is_empty());
    }

    #[test]
    fn fallback_table_matches_the_vehicle_control_map() {
        assert_eq!(fallback_command("lvcanlockalldoors"), Some("setdigout 1?? 2??"));
        assert_eq!(fallback_command("lvcanopenalldoors"), Some("setdigout ?1? ?2?"));
        assert_eq!(fallback_command("lvcanblockengine"), Some("setdigout ??0"));
        assert_eq!(fallback_command("lvcanunblockengine"), Some("setdigout ??1"));
        assert_eq!(fallback_command("setdigout ??1"), None);
        assert_eq!(fallback_command("getinfo"), None);
    }
}
