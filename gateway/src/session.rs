//! # session
//!
//! Per-connection lifecycle: IMEI handshake, framed AVL read loop, Codec 12
//! exchange, teardown.
//!
//! The connection task owns its socket exclusively. Reads happen inline in
//! [`run_session`]; all writes (handshake reply aside) are serialized through
//! a single writer task fed by the session's outbound channel, so ACKs and
//! commands never interleave. Records inside a batch reach the sink in wire
//! order; the ACK is written only after the whole batch decoded.
//!
//! Any protocol violation closes the connection without an ACK. A truncated
//! GPS element is not a violation; the parser pads it (see teltonika-proto).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use teltonika_proto::encode::{self, IMEI_ACCEPT, IMEI_REJECT};
use teltonika_proto::model::{Codec12Message, InboundFrame};
use teltonika_proto::parser::{self, FrameError, MAX_PAYLOAD_LEN};
use teltonika_proto::{normalize, NormalizedRecord};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::registry::SessionHandle;
use crate::state::GatewayState;

const OUTBOUND_QUEUE: usize = 32;

#[derive(Debug, Error)]
enum SessionError {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("no data from peer within the idle window")]
    IdleTimeout,
    #[error("invalid imei handshake")]
    BadImei,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why the session ended; logged at teardown.
#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    IdleTimeout,
    Protocol,
    Superseded,
    Shutdown,
    WriterGone,
}

/// Drive one accepted connection to completion.
pub async fn run_session<S>(
    stream: S,
    peer_addr: SocketAddr,
    state: Arc<GatewayState>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let idle = state.config.read_idle_timeout;
    let (mut reader, mut writer) = tokio::io::split(stream);

    // ── Handshake: AwaitingImei → Authenticated | Closed ─────────────────────
    let imei = match read_imei(&mut reader, idle).await {
        Ok(imei) => imei,
        Err(e) => {
            debug!(%peer_addr, "imei handshake rejected: {e}");
            let _ = timeout(state.config.write_timeout, writer.write_all(&IMEI_REJECT)).await;
            return;
        }
    };

    // ── Register, then confirm the handshake ─────────────────────────────────
    // Registration first: once the device sees 0x01 it may already be the
    // target of a queued command.
    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE);
    let close = Arc::new(Notify::new());
    let session_id = state.registry.next_session_id();
    let handle = SessionHandle::new(session_id, peer_addr, outbound_tx.clone(), close.clone());
    let last_seen = handle.last_seen.clone();
    state.registry.register(&imei, handle).await;

    if timeout(state.config.write_timeout, writer.write_all(&IMEI_ACCEPT))
        .await
        .map(|r| r.is_err())
        .unwrap_or(true)
    {
        warn!(imei, %peer_addr, "failed to confirm handshake");
        state.registry.unregister_if_current(&imei, session_id).await;
        return;
    }
    info!(imei, %peer_addr, "device authenticated");
    state
        .sink
        .publish_device_status(&imei, true, Some(peer_addr.ip().to_string()));

    let writer_task = tokio::spawn(write_loop(
        writer,
        outbound_rx,
        state.config.write_timeout,
        close.clone(),
    ));

    // Anything queued while the device was offline goes out first.
    state.commands.dispatch_pending(&imei).await;

    let reason = read_loop(
        &mut reader,
        &imei,
        &state,
        &outbound_tx,
        &mut shutdown,
        &close,
        &last_seen,
        idle,
    )
    .await;

    // ── Teardown ─────────────────────────────────────────────────────────────
    // Unregister before releasing the writer so the socket only goes down
    // after the registry stopped pointing here. A superseded session finds a
    // newer entry and must not un-report its successor.
    let removed = state.registry.unregister_if_current(&imei, session_id).await;
    if removed {
        state.sink.publish_device_status(&imei, false, None);
    }
    drop(outbound_tx);
    info!(imei, %peer_addr, ?reason, "session closed");
    let _ = writer_task.await;
}

#[allow(clippy::too_many_arguments)]
async fn read_loop<R>(
    reader: &mut R,
    imei: &str,
    state: &Arc<GatewayState>,
    outbound: &mpsc::Sender<Vec<u8>>,
    shutdown: &mut watch::Receiver<bool>,
    close: &Arc<Notify>,
    last_seen: &Arc<AtomicI64>,
    idle: Duration,
) -> CloseReason
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = close.notified() => return CloseReason::Superseded,
            _ = shutdown.changed() => return CloseReason::Shutdown,
            frame = read_frame(reader, idle) => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(SessionError::PeerClosed) => return CloseReason::PeerClosed,
            Err(SessionError::IdleTimeout) => {
                warn!(imei, "closing idle session");
                return CloseReason::IdleTimeout;
            }
            Err(e) => {
                warn!(imei, "closing session on bad frame: {e}");
                return CloseReason::Protocol;
            }
        };
        last_seen.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);

        match frame {
            InboundFrame::Avl(batch) => {
                let count = batch.records.len() as u32;
                for record in &batch.records {
                    let normalized = normalize(record);
                    log_record(imei, &normalized);
                    state.sink.push(imei, &normalized);
                }
                if outbound.send(encode::avl_ack(count).to_vec()).await.is_err() {
                    return CloseReason::WriterGone;
                }
                debug!(imei, records = count, codec = ?batch.codec, "batch acknowledged");
            }
            InboundFrame::Codec12(Codec12Message::Response(text)) => {
                info!(imei, response = %text, "codec 12 response");
                state.commands.handle_response(imei, &text).await;
            }
            InboundFrame::Codec12(Codec12Message::Command(text)) => {
                // Device-initiated message; acknowledge so the device moves on.
                info!(imei, message = %text, "codec 12 message from device");
                if outbound
                    .send(encode::codec12_response("Command received"))
                    .await
                    .is_err()
                {
                    return CloseReason::WriterGone;
                }
            }
        }
    }
}

/// Read the handshake packet: `imei_length(2 BE) | imei_ascii`.
async fn read_imei<R>(reader: &mut R, idle: Duration) -> Result<String, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    read_exact_or(reader, &mut len_buf, idle, SessionError::PeerClosed).await?;
    let len = usize::from(u16::from_be_bytes(len_buf));
    if len == 0 || len > 15 {
        return Err(SessionError::BadImei);
    }
    let mut imei_buf = vec![0u8; len];
    read_exact_or(reader, &mut imei_buf, idle, SessionError::BadImei).await?;

    let mut packet = len_buf.to_vec();
    packet.extend_from_slice(&imei_buf);
    match parser::imei(&packet) {
        Ok((_, imei)) => Ok(imei),
        Err(_) => Err(SessionError::BadImei),
    }
}

/// Read one whole frame: envelope, payload and CRC trailer.
async fn read_frame<R>(reader: &mut R, idle: Duration) -> Result<InboundFrame, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 8];
    read_exact_or(reader, &mut header, idle, SessionError::PeerClosed).await?;
    if header[..4] != [0, 0, 0, 0] {
        return Err(FrameError::BadPreamble.into());
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len == 0 || len > MAX_PAYLOAD_LEN {
        return Err(FrameError::OversizedPayload(len).into());
    }

    let mut body = vec![0u8; len + 4];
    read_exact_or(reader, &mut body, idle, FrameError::Truncated.into()).await?;
    let trailer = u32::from_be_bytes([body[len], body[len + 1], body[len + 2], body[len + 3]]);
    Ok(parser::decode_payload(&body[..len], trailer)?)
}

/// `read_exact` with the idle deadline; a clean EOF maps to `on_eof` so the
/// caller can tell "peer hung up between frames" from "frame cut short".
async fn read_exact_or<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle: Duration,
    on_eof: SessionError,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    match timeout(idle, reader.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(on_eof),
        Ok(Err(e)) => Err(SessionError::Io(e)),
        Err(_) => Err(SessionError::IdleTimeout),
    }
}

/// Single writer per session: drains the outbound channel until every sender
/// is gone, enforcing the per-write deadline. A failed or timed-out write
/// signals the reader to stop via `close`.
async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    write_timeout: Duration,
    close: Arc<Notify>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        match timeout(write_timeout, writer.write_all(&frame)).await {
            Ok(Ok(())) => {
                let _ = writer.flush().await;
            }
            Ok(Err(e)) => {
                warn!("session write failed: {e}");
                close.notify_one();
                break;
            }
            Err(_) => {
                warn!("session write timed out");
                close.notify_one();
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

fn log_record(imei: &str, record: &NormalizedRecord) {
    let gps = &record.gps;
    info!(
        imei,
        timestamp = %teltonika_proto::model::local_datetime(record.timestamp_ms),
        latitude = gps.latitude(),
        longitude = gps.longitude(),
        speed_kmh = gps.speed_kmh,
        altitude_m = gps.altitude_m,
        satellites = gps.satellites,
        valid_fix = gps.is_valid(),
        event_io_id = record.event_io_id,
        "record"
    );
    for (id, value) in &record.io {
        debug!(
            imei,
            "IO{:03}: {} = {}",
            id,
            value.name.unwrap_or("Unknown parameter"),
            value.rendered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandOrchestrator;
    use crate::config::GatewayConfig;
    use crate::registry::DeviceRegistry;
    use crate::sink::SinkClient;
    use tokio::io::duplex;

    const IMEI_PACKET: &str = "000F333536333037303432343431303133";
    const CODEC8_FRAME: &str =
        "000000000000003608010000016B40D8EA300100000000000000000000000000000001\
         05021503010101425E0F01F10000601A014E0000000000000000010000C7CF";

    fn frame_bytes() -> Vec<u8> {
        hex::decode(CODEC8_FRAME).expect("valid fixture")
    }

    fn test_state() -> Arc<GatewayState> {
        let config = GatewayConfig::for_tests();
        let registry = Arc::new(DeviceRegistry::new());
        let sink = Arc::new(SinkClient::new(&config));
        let commands = Arc::new(CommandOrchestrator::new(registry.clone(), &config, None));
        Arc::new(GatewayState {
            config,
            registry,
            commands,
            sink,
        })
    }

    fn spawn_session(state: &Arc<GatewayState>) -> (tokio::io::DuplexStream, watch::Sender<bool>) {
        let (client, server) = duplex(4096);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = state.clone();
        tokio::spawn(async move {
            run_session(
                server,
                "10.1.2.3:40001".parse().expect("valid addr"),
                state,
                shutdown_rx,
            )
            .await;
        });
        (client, shutdown_tx)
    }

    async fn handshake(client: &mut tokio::io::DuplexStream) {
        client
            .write_all(&hex::decode(IMEI_PACKET).expect("valid fixture"))
            .await
            .expect("write imei");
        let mut reply = [0u8; 1];
        client.read_exact(&mut reply).await.expect("handshake reply");
        assert_eq!(reply, [0x01]);
    }

    #[tokio::test]
    async fn accepts_imei_and_acks_a_batch() {
        let state = test_state();
        let (mut client, _shutdown) = spawn_session(&state);

        handshake(&mut client).await;
        assert!(state.registry.is_connected("356307042441013").await);

        client.write_all(&frame_bytes()).await.expect("write frame");
        let mut ack = [0u8; 4];
        client.read_exact(&mut ack).await.expect("ack");
        assert_eq!(ack, [0, 0, 0, 1]);

        // The record reached the sink queue.
        assert_eq!(state.sink.queue_len(), 1);
    }

    #[tokio::test]
    async fn rejects_zero_length_imei() {
        let state = test_state();
        let (mut client, _shutdown) = spawn_session(&state);

        client.write_all(&[0x00, 0x00]).await.expect("write length");
        let mut reply = [0u8; 1];
        client.read_exact(&mut reply).await.expect("reject reply");
        assert_eq!(reply, [0x00]);

        // Connection is closed afterwards.
        let mut probe = [0u8; 1];
        assert_eq!(client.read(&mut probe).await.expect("eof"), 0);
        assert_eq!(state.registry.connected_count().await, 0);
    }

    #[tokio::test]
    async fn corrupt_crc_closes_without_ack() {
        let state = test_state();
        let (mut client, _shutdown) = spawn_session(&state);
        handshake(&mut client).await;

        let mut frame = frame_bytes();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        client.write_all(&frame).await.expect("write frame");

        // No ACK: the next read is EOF from the closing session.
        let mut probe = [0u8; 4];
        assert!(client.read_exact(&mut probe).await.is_err());
        assert_eq!(state.sink.queue_len(), 0);
    }

    #[tokio::test]
    async fn bad_preamble_closes_the_session() {
        let state = test_state();
        let (mut client, _shutdown) = spawn_session(&state);
        handshake(&mut client).await;

        let mut frame = frame_bytes();
        frame[0] = 0xFF;
        client.write_all(&frame).await.expect("write frame");

        let mut probe = [0u8; 1];
        assert_eq!(client.read(&mut probe).await.expect("eof"), 0);
    }

    #[tokio::test]
    async fn command_roundtrip_success() {
        let state = test_state();
        let (mut client, _shutdown) = spawn_session(&state);
        handshake(&mut client).await;

        let id = state
            .commands
            .enqueue("356307042441013", "setdigout ??1", Some("X".into()))
            .await;

        // The device sees a framed Codec 12 command.
        let expected = teltonika_proto::encode::codec12_command("setdigout ??1");
        let mut received = vec![0u8; expected.len()];
        client.read_exact(&mut received).await.expect("command frame");
        assert_eq!(received, expected);

        // Device replies OK; orchestrator marks the command done.
        let mut payload = vec![0x0C, 0x01, 0x06];
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(b"OK");
        payload.push(0x01);
        let mut reply = vec![0u8; 4];
        reply.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        let crc = u32::from(teltonika_proto::crc16(&payload));
        reply.extend_from_slice(&payload);
        reply.extend_from_slice(&crc.to_be_bytes());
        client.write_all(&reply).await.expect("write response");

        // Wait for the orchestrator to archive the completion.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            let completed = state.commands.recent_completed().await;
            if !completed.is_empty() {
                assert_eq!(completed[0].id, id);
                assert_eq!(completed[0].response.as_deref(), Some("OK"));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "response not correlated");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn device_initiated_message_gets_acknowledged() {
        let state = test_state();
        let (mut client, _shutdown) = spawn_session(&state);
        handshake(&mut client).await;

        let mut payload = vec![0x0C, 0x01, 0x05];
        payload.extend_from_slice(&7u32.to_be_bytes());
        payload.extend_from_slice(b"getinfo");
        payload.push(0x01);
        let mut frame = vec![0u8; 4];
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        let crc = u32::from(teltonika_proto::crc16(&payload));
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc.to_be_bytes());
        client.write_all(&frame).await.expect("write message");

        let expected = teltonika_proto::encode::codec12_response("Command received");
        let mut received = vec![0u8; expected.len()];
        client.read_exact(&mut received).await.expect("ack frame");
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn newer_connection_supersedes_the_old_session() {
        let state = test_state();
        let (mut first, _shutdown1) = spawn_session(&state);
        handshake(&mut first).await;

        let (mut second, _shutdown2) = spawn_session(&state);
        handshake(&mut second).await;

        // First client is closed by the gateway.
        let mut probe = [0u8; 1];
        assert_eq!(first.read(&mut probe).await.expect("eof"), 0);

        // Second session still works.
        second.write_all(&frame_bytes()).await.expect("write frame");
        let mut ack = [0u8; 4];
        second.read_exact(&mut ack).await.expect("ack");
        assert_eq!(ack, [0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn shutdown_stops_the_session() {
        let state = test_state();
        let (mut client, shutdown) = spawn_session(&state);
        handshake(&mut client).await;

        shutdown.send(true).expect("signal shutdown");
        let mut probe = [0u8; 1];
        assert_eq!(client.read(&mut probe).await.expect("eof"), 0);
        assert_eq!(state.registry.connected_count().await, 0);
    }
}
