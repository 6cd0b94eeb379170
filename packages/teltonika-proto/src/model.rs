//! # model
//!
//! Wire-level data model for the Teltonika TCP protocol.
//!
//! Everything here mirrors the byte layout documented in the
//! [Teltonika data sending protocol wiki](https://wiki.teltonika-gps.com/view/Teltonika_Data_Sending_Protocols):
//! Codec 8 / 8 Extended / 16 AVL batches and the Codec 12 command channel.
//! All multi-byte integers on the wire are big-endian; coordinates are
//! two's-complement signed once reinterpreted from the raw unsigned field.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

/// Fixed rendering offset for timestamps handed to the storage API and logs
/// (the fleet operates in UTC+3).
pub const RENDER_UTC_OFFSET_SECS: i32 = 3 * 3600;

/// A device timestamp (UNIX epoch milliseconds) shifted to the fixed
/// rendering offset.
pub fn local_datetime(timestamp_ms: u64) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(RENDER_UTC_OFFSET_SECS).expect("offset within bounds");
    Utc.timestamp_millis_opt(timestamp_ms as i64)
        .single()
        .unwrap_or_default()
        .with_timezone(&offset)
}

// ── Codec ids ─────────────────────────────────────────────────────────────────

/// Codec id carried in the first payload byte of every TCP frame.
///
/// Codec 16 frames are decoded with the Codec 8 record rules; the devices in
/// this fleet only use the extra Codec 16 fields for generation metadata the
/// gateway does not consume.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Codec {
    Codec8,
    Codec8Ext,
    Codec16,
    Codec12,
}

impl Codec {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x08 => Some(Self::Codec8),
            0x8E => Some(Self::Codec8Ext),
            0x10 => Some(Self::Codec16),
            0x0C => Some(Self::Codec12),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Codec8 => 0x08,
            Self::Codec8Ext => 0x8E,
            Self::Codec16 => 0x10,
            Self::Codec12 => 0x0C,
        }
    }
}

// ── Record priority ───────────────────────────────────────────────────────────

/// Record priority byte (0..=2).
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Priority {
    Low,
    High,
    Panic,
}

impl Priority {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Low),
            0x01 => Some(Self::High),
            0x02 => Some(Self::Panic),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::High => 1,
            Self::Panic => 2,
        }
    }
}

// ── GPS element ───────────────────────────────────────────────────────────────

/// The 15-byte GPS element of an AVL record, kept in raw integer form.
///
/// Devices with no fix send all-zero coordinates; truncated elements (13 or 8
/// bytes on the wire) are padded with zeroes by the parser.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub struct GpsFix {
    /// Longitude in 1e-7 degree steps, signed.
    pub longitude_e7: i32,
    /// Latitude in 1e-7 degree steps, signed.
    pub latitude_e7: i32,
    /// Altitude above sea level, meters.
    pub altitude_m: i16,
    /// Heading, degrees clockwise from north (0..360).
    pub heading_deg: u16,
    /// Count of visible satellites.
    pub satellites: u8,
    /// Speed, km/h.
    pub speed_kmh: u16,
}

impl GpsFix {
    /// Longitude in decimal degrees.
    pub fn longitude(&self) -> f64 {
        self.longitude_e7 as f64 / 10_000_000.0
    }

    /// Latitude in decimal degrees.
    pub fn latitude(&self) -> f64 {
        self.latitude_e7 as f64 / 10_000_000.0
    }

    /// A fix is usable when both coordinates are nonzero and at least three
    /// satellites contributed.
    pub fn is_valid(&self) -> bool {
        self.latitude_e7 != 0 && self.longitude_e7 != 0 && self.satellites >= 3
    }

    /// Reinterpret a raw unsigned wire coordinate as a signed 1e-7 degree value.
    pub fn coordinate_from_wire(raw: u32) -> i32 {
        raw as i32
    }
}

// ── I/O values ────────────────────────────────────────────────────────────────

/// One I/O value, tagged with the width of the group it appeared in.
///
/// Codec 8 carries 1/2/4/8-byte groups; Codec 8 Extended adds the
/// variable-length NX group which lands here as `Bytes`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum IoValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
}

impl IoValue {
    /// Widen to u64 where the value is numeric.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U8(v) => Some(u64::from(*v)),
            Self::U16(v) => Some(u64::from(*v)),
            Self::U32(v) => Some(u64::from(*v)),
            Self::U64(v) => Some(*v),
            Self::Bytes(_) => None,
        }
    }

    /// Two's-complement reinterpretation at the value's own width.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::U8(v) => Some(i64::from(*v as i8)),
            Self::U16(v) => Some(i64::from(*v as i16)),
            Self::U32(v) => Some(i64::from(*v as i32)),
            Self::U64(v) => Some(*v as i64),
            Self::Bytes(_) => None,
        }
    }

    /// Flag blobs are carried little-endian; fold up to 16 bytes into a u128.
    pub fn as_flags(&self) -> u128 {
        match self {
            Self::Bytes(bytes) => {
                let mut out: u128 = 0;
                for (i, byte) in bytes.iter().take(16).enumerate() {
                    out |= u128::from(*byte) << (8 * i);
                }
                out
            }
            other => other.as_u64().map(u128::from).unwrap_or(0),
        }
    }

    /// Lowercase hex of the raw bytes (NX group values).
    pub fn to_hex(&self) -> Option<String> {
        match self {
            Self::Bytes(bytes) => {
                Some(bytes.iter().map(|b| format!("{b:02x}")).collect())
            }
            _ => None,
        }
    }
}

impl serde::Serialize for IoValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::U8(v) => serializer.serialize_u8(*v),
            Self::U16(v) => serializer.serialize_u16(*v),
            Self::U32(v) => serializer.serialize_u32(*v),
            Self::U64(v) => serializer.serialize_u64(*v),
            Self::Bytes(_) => serializer.serialize_str(&self.to_hex().unwrap_or_default()),
        }
    }
}

// ── AVL records and frames ────────────────────────────────────────────────────

/// Location and I/O status at one point in time.
#[derive(Debug, PartialEq, Clone)]
pub struct AvlRecord {
    /// UNIX epoch milliseconds.
    pub timestamp_ms: u64,
    pub priority: Priority,
    pub gps: GpsFix,
    /// The I/O id that triggered this record (0 = periodic).
    pub event_io_id: u16,
    /// All I/O values carried with the record, keyed by id.
    pub io: BTreeMap<u16, IoValue>,
}

impl AvlRecord {
    pub fn datetime_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms as i64)
            .single()
            .unwrap_or_default()
    }

    /// Timestamp shifted to the fixed rendering offset (see
    /// [`RENDER_UTC_OFFSET_SECS`]), ISO-8601.
    pub fn datetime_local(&self) -> DateTime<FixedOffset> {
        local_datetime(self.timestamp_ms)
    }
}

/// A decoded AVL batch frame (Codec 8 / 8E / 16).
#[derive(Debug, PartialEq, Clone)]
pub struct AvlFrame {
    pub codec: Codec,
    pub records: Vec<AvlRecord>,
    /// CRC-16/IBM carried in the trailer (low 16 bits of the 4-byte field).
    pub crc16: u16,
}

// ── Codec 12 messages ─────────────────────────────────────────────────────────

/// One Codec 12 message from a device.
#[derive(Debug, PartialEq, Clone)]
pub enum Codec12Message {
    /// Type 0x05: device-initiated text message (rare).
    Command(String),
    /// Type 0x06: response to a command previously sent by the server.
    Response(String),
}

/// Everything a single inbound TCP frame can decode to.
#[derive(Debug, PartialEq, Clone)]
pub enum InboundFrame {
    Avl(AvlFrame),
    Codec12(Codec12Message),
}
