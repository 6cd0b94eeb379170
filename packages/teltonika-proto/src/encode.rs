//! # encode
//!
//! Builders for the bytes the gateway writes back to a device: framed Codec 12
//! messages and the AVL batch acknowledgement.

/// Wrap a payload in the TCP envelope: zero preamble, big-endian length, the
/// payload, and the CRC-16/IBM trailer widened to four bytes.
fn frame(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 12);
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    let crc = u32::from(crate::crc16(&payload));
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

fn codec12_payload(message_type: u8, text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut payload = Vec::with_capacity(bytes.len() + 8);
    payload.push(0x0C);
    payload.push(0x01);
    payload.push(message_type);
    payload.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    payload.extend_from_slice(bytes);
    payload.push(0x01);
    payload
}

/// Build a framed Codec 12 command (type 0x05) for delivery to a device.
pub fn codec12_command(text: &str) -> Vec<u8> {
    frame(codec12_payload(0x05, text))
}

/// Build a framed Codec 12 response (type 0x06), used to acknowledge a
/// device-initiated message.
pub fn codec12_response(text: &str) -> Vec<u8> {
    frame(codec12_payload(0x06, text))
}

/// The AVL batch acknowledgement: the accepted record count, big-endian.
pub fn avl_ack(count: u32) -> [u8; 4] {
    count.to_be_bytes()
}

/// The single-byte IMEI handshake replies.
pub const IMEI_ACCEPT: [u8; 1] = [0x01];
pub const IMEI_REJECT: [u8; 1] = [0x00];
