//! # server
//!
//! The device-facing TCP acceptor. Binds once, then spawns a session task per
//! accepted connection until shutdown. A global cap bounds concurrent
//! sessions; over-cap connections are closed immediately with no reply.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::session;
use crate::state::GatewayState;

pub async fn run_tcp_server(
    state: Arc<GatewayState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&state.config.listen_addr)
        .await
        .with_context(|| format!("failed to bind TCP listener on {}", state.config.listen_addr))?;
    info!(addr = %state.config.listen_addr, "device listener started");

    let active = Arc::new(AtomicUsize::new(0));
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => {
                info!("device listener stopping");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        let (socket, peer_addr) = match accepted {
            Ok(connection) => connection,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };

        if active.load(Ordering::Acquire) >= state.config.max_connections {
            warn!(%peer_addr, "connection cap reached, dropping connection");
            drop(socket);
            continue;
        }

        active.fetch_add(1, Ordering::AcqRel);
        let active = active.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            session::run_session(socket, peer_addr, state, shutdown).await;
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }
}
