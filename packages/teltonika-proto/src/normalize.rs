//! # normalize
//!
//! Turns a parsed [`AvlRecord`] into its presentation form: every I/O value is
//! paired with its dictionary description and a rendered string. Normalization
//! is pure: no side effects, no failures. A value the dictionary cannot make
//! sense of keeps its raw rendering and the record is emitted regardless.

use std::collections::BTreeMap;

use crate::dictionary::{self, DecodeRule};
use crate::flags;
use crate::model::{AvlRecord, GpsFix, IoValue, Priority};

/// One I/O value with its dictionary context.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedValue {
    /// Dictionary name; `None` for ids the dictionary does not know.
    pub name: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub raw: IoValue,
    pub rendered: String,
}

/// A record ready for the sink and the record log.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub timestamp_ms: u64,
    pub priority: Priority,
    pub gps: GpsFix,
    pub event_io_id: u16,
    pub io: BTreeMap<u16, NormalizedValue>,
}

/// Normalize a parsed record against the static dictionary.
pub fn normalize(record: &AvlRecord) -> NormalizedRecord {
    let io = record
        .io
        .iter()
        .map(|(id, value)| {
            let normalized = match dictionary::lookup(*id) {
                Some(descriptor) => NormalizedValue {
                    name: Some(descriptor.name),
                    unit: descriptor.unit,
                    raw: value.clone(),
                    rendered: render(descriptor.decode, descriptor.unit, value),
                },
                None => NormalizedValue {
                    name: None,
                    unit: None,
                    raw: value.clone(),
                    rendered: raw_string(value),
                },
            };
            (*id, normalized)
        })
        .collect();

    NormalizedRecord {
        timestamp_ms: record.timestamp_ms,
        priority: record.priority,
        gps: record.gps,
        event_io_id: record.event_io_id,
        io,
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

fn raw_string(value: &IoValue) -> String {
    match value.as_u64() {
        Some(v) => v.to_string(),
        None => value.to_hex().unwrap_or_default(),
    }
}

fn with_unit(text: String, unit: Option<&str>) -> String {
    match unit {
        Some(unit) => format!("{text} {unit}"),
        None => text,
    }
}

fn enum_label(value: &IoValue, pairs: &[(u64, &str)]) -> String {
    match value.as_u64() {
        Some(code) => pairs
            .iter()
            .find(|(candidate, _)| *candidate == code)
            .map(|(_, label)| (*label).to_string())
            .unwrap_or_else(|| format!("Unknown({code})")),
        None => raw_string(value),
    }
}

const GNSS_STATUS: &[(u64, &str)] = &[(0, "Off"), (1, "No Fix"), (2, "2D Fix"), (3, "3D Fix")];
const DATA_MODE: &[(u64, &str)] = &[
    (0, "Home On Stop"),
    (1, "Home On Moving"),
    (2, "Universal"),
    (3, "Ping"),
    (4, "Manual"),
    (5, "Unknown"),
];
const SLEEP_MODE: &[(u64, &str)] = &[
    (0, "No Sleep"),
    (1, "GPS Sleep"),
    (2, "Deep Sleep"),
    (3, "Ultra Deep Sleep"),
    (4, "Online Deep Sleep"),
];
const BT_STATUS: &[(u64, &str)] = &[
    (0, "Off"),
    (1, "Enabled"),
    (2, "Connected"),
    (3, "Disconnected"),
    (4, "Error"),
];
const WAKE_REASON: &[(u64, &str)] = &[(0, "Normal"), (1, "Movement")];
const NETWORK_TYPE: &[(u64, &str)] = &[(0, "GSM"), (1, "LTE")];

const DOOR_BITS: &[(u64, &str)] = &[
    (0x01, "Driver Door Open"),
    (0x02, "Passenger Door Open"),
    (0x04, "Rear Left Door Open"),
    (0x08, "Rear Right Door Open"),
    (0x10, "Trunk Open"),
    (0x20, "Hood Open"),
];

fn door_bitfield(value: &IoValue) -> String {
    let Some(bits) = value.as_u64() else {
        return raw_string(value);
    };
    let open: Vec<&str> = DOOR_BITS
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, label)| *label)
        .collect();
    if open.is_empty() {
        "All Doors Closed".to_string()
    } else {
        open.join(", ")
    }
}

fn render(rule: DecodeRule, unit: Option<&'static str>, value: &IoValue) -> String {
    use DecodeRule::*;
    match rule {
        Raw => with_unit(raw_string(value), unit),
        SignedRaw => match value.as_i64() {
            Some(v) => with_unit(v.to_string(), unit),
            None => raw_string(value),
        },
        Boolean => match value.as_u64() {
            Some(0) => "Off".to_string(),
            Some(_) => "On".to_string(),
            None => raw_string(value),
        },
        Percent => match value.as_u64() {
            Some(v) => format!("{v}%"),
            None => raw_string(value),
        },
        VoltageMvToV => match value.as_u64() {
            Some(mv) => format!("{:.2}V", mv as f64 / 1000.0),
            None => raw_string(value),
        },
        CurrentMa => match value.as_u64() {
            Some(ma) => format!("{ma}mA"),
            None => raw_string(value),
        },
        SpeedKmh => match value.as_u64() {
            Some(v) => format!("{v} km/h"),
            None => raw_string(value),
        },
        Rpm => match value.as_u64() {
            Some(v) => format!("{v} RPM"),
            None => raw_string(value),
        },
        TempTenthC => match value.as_i64() {
            Some(v) => format!("{:.1}°C", v as f64 / 10.0),
            None => raw_string(value),
        },
        TempIntC => match value.as_i64() {
            Some(v) => format!("{v}°C"),
            None => raw_string(value),
        },
        TempHundredthC => match value.as_i64() {
            Some(v) => format!("{:.2}°C", v as f64 / 100.0),
            None => raw_string(value),
        },
        HumidityTenthRh => match value.as_u64() {
            Some(v) => format!("{:.1}%RH", v as f64 / 10.0),
            None => raw_string(value),
        },
        Hundredths => match value.as_i64() {
            Some(v) => {
                let scaled = format!("{:.2}", v as f64 / 100.0);
                match unit {
                    Some(unit) => format!("{scaled}{unit}"),
                    None => scaled,
                }
            }
            None => raw_string(value),
        },
        SignedAccelMg => match value.as_i64() {
            Some(v) => format!("{v} mG"),
            None => raw_string(value),
        },
        DistanceMeters => match value.as_u64() {
            Some(v) => format!("{v} m"),
            None => raw_string(value),
        },
        DistanceKmFromMeters => match value.as_u64() {
            Some(v) => format!("{:.1} km", v as f64 / 1000.0),
            None => raw_string(value),
        },
        DopHundredths => match value.as_u64() {
            Some(v) => format!("{:.2}", v as f64 / 100.0),
            None => raw_string(value),
        },
        GnssStatus => enum_label(value, GNSS_STATUS),
        DataMode => enum_label(value, DATA_MODE),
        SleepMode => enum_label(value, SLEEP_MODE),
        BtStatus => enum_label(value, BT_STATUS),
        WakeReason => enum_label(value, WAKE_REASON),
        NetworkType => enum_label(value, NETWORK_TYPE),
        GsmSignal => match value.as_u64() {
            Some(v) => format!("{v}/5"),
            None => raw_string(value),
        },
        IccidHex16 => match value.as_u64() {
            Some(v) => format!("{v:016X}"),
            None => raw_string(value),
        },
        DoorBitfield => door_bitfield(value),
        SecurityStateFlags => flags::summarize(&flags::security_state_flags(value.as_flags())),
        SecurityStateFlagsP4 => {
            flags::summarize(&flags::security_state_flags_p4(value.as_flags()))
        }
        ControlStateFlagsP4 => flags::summarize(&flags::control_state_flags_p4(value.as_flags())),
        IndicatorStateFlagsP4 => {
            flags::summarize(&flags::indicator_state_flags_p4(value.as_flags()))
        }
        HexString => match value {
            IoValue::Bytes(_) => format!("0x{}", value.to_hex().unwrap_or_default()),
            _ => match value.as_u64() {
                Some(v) => format!("0x{v:016X}"),
                None => raw_string(value),
            },
        },
        Ascii => match value {
            IoValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            _ => raw_string(value),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record_with(io: Vec<(u16, IoValue)>) -> AvlRecord {
        AvlRecord {
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
            io: io.into_iter().collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn known_values_get_names_and_renderings() {
        let record = record_with(vec![
            (239, IoValue::U8(1)),
            (66, IoValue::U16(12_340)),
            (21, IoValue::U8(4)),
            (16, IoValue::U32(22_949_000)),
        ]);
        let normalized = normalize(&record);

        let ignition = &normalized.io[&239];
        assert_eq!(ignition.name, Some("Ignition"));
        assert_eq!(ignition.rendered, "On");

        assert_eq!(normalized.io[&66].rendered, "12.34V");
        assert_eq!(normalized.io[&21].rendered, "4/5");
        assert_eq!(normalized.io[&16].rendered, "22949.0 km");
    }

    #[test]
    fn unknown_ids_round_trip_raw() {
        let record = record_with(vec![(999, IoValue::U16(7))]);
        let normalized = normalize(&record);
        let value = &normalized.io[&999];
        assert_eq!(value.name, None);
        assert_eq!(value.raw, IoValue::U16(7));
        assert_eq!(value.rendered, "7");
    }

    #[test]
    fn signed_temperatures_render_negative() {
        let record = record_with(vec![(72, IoValue::U32(0xFFFF_FF38))]);
        let normalized = normalize(&record);
        assert_eq!(normalized.io[&72].rendered, "-20.0°C");
    }

    #[test]
    fn enum_codes_outside_the_map_render_unknown() {
        let record = record_with(vec![(69, IoValue::U8(9))]);
        let normalized = normalize(&record);
        assert_eq!(normalized.io[&69].rendered, "Unknown(9)");
    }

    #[test]
    fn door_bitfield_renders_names_or_closed() {
        let record = record_with(vec![(90, IoValue::U8(0x11))]);
        let normalized = normalize(&record);
        assert_eq!(normalized.io[&90].rendered, "Driver Door Open, Trunk Open");

        let record = record_with(vec![(90, IoValue::U8(0))]);
        let normalized = normalize(&record);
        assert_eq!(normalized.io[&90].rendered, "All Doors Closed");
    }

    #[test]
    fn all_zero_flag_blob_renders_no_flags() {
        let record = record_with(vec![(517, IoValue::Bytes(vec![0u8; 16]))]);
        let normalized = normalize(&record);
        assert_eq!(normalized.io[&517].rendered, "No flags active");
    }

    #[test]
    fn mistyped_value_is_contained_as_raw() {
        // A bytes value under a numeric rule keeps its raw rendering instead
        // of failing the record.
        let record = record_with(vec![(66, IoValue::Bytes(vec![0x30, 0x39]))]);
        let normalized = normalize(&record);
        assert_eq!(normalized.io[&66].rendered, "3039");

        let record = record_with(vec![(256, IoValue::Bytes(b"WVWZZZ1JZXW".to_vec()))]);
        let normalized = normalize(&record);
        assert_eq!(normalized.io[&256].rendered, "WVWZZZ1JZXW");
    }

    #[test]
    fn record_fields_pass_through() {
        let record = record_with(vec![]);
        let normalized = normalize(&record);
        assert_eq!(normalized.timestamp_ms, record.timestamp_ms);
        assert_eq!(normalized.gps, record.gps);
        assert_eq!(normalized.event_io_id, 0);
        assert!(normalized.gps.is_valid());
    }
}
