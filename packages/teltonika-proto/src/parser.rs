//! # parser
//!
//! nom parsers for the inbound wire formats: the IMEI handshake packet, the
//! AVL batch payloads (Codec 8 / 8 Extended / 16) and Codec 12 messages.
//!
//! The session layer consumes [`decode_payload`], which takes the payload of a
//! frame whose envelope (preamble, declared length, CRC trailer) was already
//! read off the socket. [`tcp_frame`] parses a whole buffered frame including
//! the envelope and is what the capture-driven tests use.

use std::collections::BTreeMap;

use nom::{
    bytes::complete::tag,
    combinator::{cond, verify},
    error::{Error as NomError, ErrorKind},
    multi::{length_count, length_data},
    number::complete::{be_i16, be_u16, be_u32, be_u64, be_u8},
    IResult,
};
use thiserror::Error;

use crate::model::{
    AvlFrame, AvlRecord, Codec, Codec12Message, GpsFix, InboundFrame, IoValue, Priority,
};

/// Upper bound on the declared payload length. Real devices stay well under
/// this even for camera-equipped units; anything larger is treated as a
/// protocol violation before buffering.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why an inbound frame was rejected. Every variant closes the session; the
/// distinction exists so the close reason is logged accurately.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("preamble is not zero")]
    BadPreamble,
    #[error("declared payload length {0} exceeds limit")]
    OversizedPayload(usize),
    #[error("crc mismatch: computed {computed:#06x}, trailer {received:#06x}")]
    CrcMismatch { computed: u16, received: u16 },
    #[error("unknown codec id {0:#04x}")]
    UnknownCodec(u8),
    #[error("malformed frame payload")]
    Malformed,
    #[error("stream ended inside a frame")]
    Truncated,
}

// ── IMEI handshake ────────────────────────────────────────────────────────────

/// Parse the handshake packet: `length(2 BE) | imei_ascii(length)`.
///
/// Lengths of 0 or above 15, and non-digit payloads, are rejected; the reply
/// byte decision (`0x01`/`0x00`) belongs to the session.
pub fn imei(input: &[u8]) -> IResult<&[u8], String> {
    let (input, raw) = verify(length_data(be_u16), |bytes: &[u8]| {
        (1..=15).contains(&bytes.len()) && bytes.iter().all(|b| b.is_ascii_digit())
    })(input)?;
    Ok((input, String::from_utf8_lossy(raw).into_owned()))
}

// ── Codec-parameterized field widths ──────────────────────────────────────────

// Codec 8 Extended widens I/O ids and group counts to 16 bits; Codec 16 frames
// are decoded with the Codec 8 rules (see the model docs).

fn io_id(codec: Codec) -> impl Fn(&[u8]) -> IResult<&[u8], u16> {
    move |input| match codec {
        Codec::Codec8Ext => be_u16(input),
        _ => be_u8(input).map(|(rest, v)| (rest, u16::from(v))),
    }
}

fn io_count(codec: Codec) -> impl Fn(&[u8]) -> IResult<&[u8], u16> {
    io_id(codec)
}

// ── I/O value parsers, one per group width ────────────────────────────────────

fn value_u8(input: &[u8]) -> IResult<&[u8], IoValue> {
    let (input, v) = be_u8(input)?;
    Ok((input, IoValue::U8(v)))
}

fn value_u16(input: &[u8]) -> IResult<&[u8], IoValue> {
    let (input, v) = be_u16(input)?;
    Ok((input, IoValue::U16(v)))
}

fn value_u32(input: &[u8]) -> IResult<&[u8], IoValue> {
    let (input, v) = be_u32(input)?;
    Ok((input, IoValue::U32(v)))
}

fn value_u64(input: &[u8]) -> IResult<&[u8], IoValue> {
    let (input, v) = be_u64(input)?;
    Ok((input, IoValue::U64(v)))
}

/// NX group value: `len(2 BE) | bytes(len)`. Codec 8 Extended only.
fn value_bytes(input: &[u8]) -> IResult<&[u8], IoValue> {
    let (input, bytes) = length_data(be_u16)(input)?;
    Ok((input, IoValue::Bytes(bytes.to_vec())))
}

fn io_group<'a, F>(
    codec: Codec,
    value: F,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Vec<(u16, IoValue)>>
where
    F: Fn(&'a [u8]) -> IResult<&'a [u8], IoValue> + Copy,
{
    move |input| {
        length_count(io_count(codec), move |input: &'a [u8]| {
            let (input, id) = io_id(codec)(input)?;
            let (input, value) = value(input)?;
            Ok((input, (id, value)))
        })(input)
    }
}

fn io_element(codec: Codec) -> impl FnMut(&[u8]) -> IResult<&[u8], (u16, BTreeMap<u16, IoValue>)> {
    move |input| {
        let (input, event_io_id) = io_id(codec)(input)?;
        let (input, total) = io_count(codec)(input)?;
        let (input, g1) = io_group(codec, value_u8)(input)?;
        let (input, g2) = io_group(codec, value_u16)(input)?;
        let (input, g4) = io_group(codec, value_u32)(input)?;
        let (input, g8) = io_group(codec, value_u64)(input)?;
        let (input, gx) = cond(codec == Codec::Codec8Ext, io_group(codec, value_bytes))(input)?;

        let gx = gx.unwrap_or_default();
        let parsed = g1.len() + g2.len() + g4.len() + g8.len() + gx.len();
        if parsed != usize::from(total) {
            return Err(nom::Err::Error(NomError::new(input, ErrorKind::Verify)));
        }

        let io: BTreeMap<u16, IoValue> =
            g1.into_iter().chain(g2).chain(g4).chain(g8).chain(gx).collect();
        Ok((input, (event_io_id, io)))
    }
}

// ── GPS element ───────────────────────────────────────────────────────────────

/// Parse the GPS element, tolerating the truncated 13- and 8-byte shapes some
/// firmwares emit at the tail of a batch. Missing fields default to zero.
pub fn gps_element(input: &[u8]) -> IResult<&[u8], GpsFix> {
    if input.len() >= 15 {
        let (input, longitude) = be_u32(input)?;
        let (input, latitude) = be_u32(input)?;
        let (input, altitude_m) = be_i16(input)?;
        let (input, heading_deg) = be_u16(input)?;
        let (input, satellites) = be_u8(input)?;
        let (input, speed_kmh) = be_u16(input)?;
        Ok((
            input,
            GpsFix {
                longitude_e7: GpsFix::coordinate_from_wire(longitude),
                latitude_e7: GpsFix::coordinate_from_wire(latitude),
                altitude_m,
                heading_deg,
                satellites,
                speed_kmh,
            },
        ))
    } else if input.len() >= 13 {
        let (input, longitude) = be_u32(input)?;
        let (input, latitude) = be_u32(input)?;
        let (input, altitude_m) = be_i16(input)?;
        let (input, heading_deg) = be_u16(input)?;
        let (input, satellites) = be_u8(input)?;
        Ok((
            input,
            GpsFix {
                longitude_e7: GpsFix::coordinate_from_wire(longitude),
                latitude_e7: GpsFix::coordinate_from_wire(latitude),
                altitude_m,
                heading_deg,
                satellites,
                speed_kmh: 0,
            },
        ))
    } else if input.len() >= 8 {
        let (input, longitude) = be_u32(input)?;
        let (input, latitude) = be_u32(input)?;
        Ok((
            input,
            GpsFix {
                longitude_e7: GpsFix::coordinate_from_wire(longitude),
                latitude_e7: GpsFix::coordinate_from_wire(latitude),
                ..GpsFix::default()
            },
        ))
    } else {
        Err(nom::Err::Error(NomError::new(input, ErrorKind::Eof)))
    }
}

// ── AVL records ───────────────────────────────────────────────────────────────

fn record(codec: Codec) -> impl FnMut(&[u8]) -> IResult<&[u8], AvlRecord> {
    move |input| {
        let (input, timestamp_ms) = be_u64(input)?;
        let (input, priority_raw) = be_u8(input)?;
        let priority = Priority::from_wire(priority_raw)
            .ok_or_else(|| nom::Err::Error(NomError::new(input, ErrorKind::Verify)))?;
        let (input, gps) = gps_element(input)?;

        // A batch cut off right after a short GPS element still yields the
        // record; there is simply no I/O element left to read.
        if input.is_empty() {
            return Ok((
                input,
                AvlRecord {
                    timestamp_ms,
                    priority,
                    gps,
                    event_io_id: 0,
                    io: BTreeMap::new(),
                },
            ));
        }

        let (input, (event_io_id, io)) = io_element(codec)(input)?;
        Ok((
            input,
            AvlRecord {
                timestamp_ms,
                priority,
                gps,
                event_io_id,
                io,
            },
        ))
    }
}

/// Parse an AVL batch payload: `codec_id(1) | n1(1) | record × n1 | n2(1)`.
/// The trailing count must confirm the leading one.
fn avl_body(payload: &[u8]) -> IResult<&[u8], (Codec, Vec<AvlRecord>)> {
    let (input, codec_raw) = be_u8(payload)?;
    let codec = Codec::from_wire(codec_raw)
        .filter(|c| *c != Codec::Codec12)
        .ok_or_else(|| nom::Err::Error(NomError::new(payload, ErrorKind::Verify)))?;
    let (input, records) = length_count(be_u8, record(codec))(input)?;
    let (input, _n2) = verify(be_u8, |n| usize::from(*n) == records.len())(input)?;
    Ok((input, (codec, records)))
}

/// Parse a Codec 12 payload: `0x0C | quantity | type | size(4 BE) | text | quantity`.
fn codec12_body(payload: &[u8]) -> IResult<&[u8], Codec12Message> {
    let (input, _) = tag(&[0x0C_u8][..])(payload)?;
    let (input, _quantity) = be_u8(input)?;
    let (input, message_type) = be_u8(input)?;
    let (input, text) = length_data(be_u32)(input)?;
    let (input, _quantity2) = be_u8(input)?;
    let text = String::from_utf8_lossy(text).into_owned();
    let message = match message_type {
        0x05 => Codec12Message::Command(text),
        0x06 => Codec12Message::Response(text),
        _ => return Err(nom::Err::Error(NomError::new(input, ErrorKind::Verify))),
    };
    Ok((input, message))
}

// ── Public entry points ───────────────────────────────────────────────────────

/// Decode a frame payload against its CRC trailer.
///
/// `trailer` is the full 4-byte CRC field; only its low 16 bits are compared,
/// matching what devices actually put on the wire.
pub fn decode_payload(payload: &[u8], trailer: u32) -> Result<InboundFrame, FrameError> {
    let computed = crate::crc16(payload);
    let received = (trailer & 0xFFFF) as u16;
    if computed != received {
        return Err(FrameError::CrcMismatch { computed, received });
    }

    match payload.first().copied() {
        None => Err(FrameError::Malformed),
        Some(0x0C) => match codec12_body(payload) {
            Ok((_, message)) => Ok(InboundFrame::Codec12(message)),
            Err(_) => Err(FrameError::Malformed),
        },
        Some(0x08) | Some(0x8E) | Some(0x10) => match avl_body(payload) {
            Ok((rest, (codec, records))) if rest.is_empty() => Ok(InboundFrame::Avl(AvlFrame {
                codec,
                records,
                crc16: received,
            })),
            // Leftover bytes after the trailing count mean the decoder and the
            // declared length disagree.
            Ok(_) | Err(_) => Err(FrameError::Malformed),
        },
        Some(other) => Err(FrameError::UnknownCodec(other)),
    }
}

/// Parse one whole TCP frame from a buffer, envelope included.
pub fn tcp_frame(input: &[u8]) -> IResult<&[u8], InboundFrame> {
    let (input, _preamble) = tag(&b"\0\0\0\0"[..])(input)?;
    let (input, payload) = length_data(be_u32)(input)?;
    let (input, trailer) = be_u32(input)?;
    match decode_payload(payload, trailer) {
        Ok(frame) => Ok((input, frame)),
        Err(_) => Err(nom::Err::Error(NomError::new(payload, ErrorKind::Verify))),
    }
}
