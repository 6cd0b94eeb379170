//! # state
//!
//! The explicit context handed to every task, instead of global singletons. The
//! acceptor owns one `Arc<GatewayState>` and clones it into sessions, the
//! control endpoint and the background loops.

use std::sync::Arc;

use crate::commands::CommandOrchestrator;
use crate::config::GatewayConfig;
use crate::registry::DeviceRegistry;
use crate::sink::SinkClient;

pub struct GatewayState {
    pub config: GatewayConfig,
    pub registry: Arc<DeviceRegistry>,
    pub commands: Arc<CommandOrchestrator>,
    pub sink: Arc<SinkClient>,
}
