//! # flags
//!
//! Bit-field decoders for the CAN adapter state-flag elements, following the
//! byte maps of the FMB110 CAN adapter documentation: Security State Flags
//! (IO 132), Security/Control/Indicator State Flags P4 (IO 517/518/519).
//!
//! The carried value is a little-endian blob (up to 16 bytes); callers fold it
//! into a `u128` first (see `IoValue::as_flags`). Bit maps differ between
//! adapter families and firmware lines, so each family decodes through its own
//! table here; an override for another family replaces the table, nothing
//! else. Set bits outside a table are never dropped; they surface as
//! `unknown_bit_N`.

fn named_bits(flags: u128, table: &[(u32, &str)], active: &mut Vec<String>) -> u128 {
    let mut mask = 0u128;
    for &(bit, description) in table {
        mask |= 1u128 << bit;
        if flags & (1u128 << bit) != 0 {
            active.push(description.to_string());
        }
    }
    mask
}

fn unknown_bits(flags: u128, known_mask: u128, active: &mut Vec<String>) {
    for bit in 0..128 {
        if flags & (1u128 << bit) != 0 && known_mask & (1u128 << bit) == 0 {
            active.push(format!("unknown_bit_{bit}"));
        }
    }
}

/// CAN1..CAN3 connection status lives in the three 2-bit fields of byte 0.
/// A zero field carries no information and is not reported.
fn can_port_statuses(flags: u128, status_map: [&str; 4], active: &mut Vec<String>) {
    for port in 0u32..3 {
        let value = ((flags >> (2 * port)) & 0x03) as usize;
        if value != 0 {
            active.push(format!("CAN{} {}", port + 1, status_map[value]));
        }
    }
}

/// Render a decoded flag set the way the record log and sink expect it.
pub fn summarize(active: &[String]) -> String {
    if active.is_empty() {
        "No flags active".to_string()
    } else {
        active.join("; ")
    }
}

// ── IO 132 (Security State Flags) ─────────────────────────────────────────────

const IO132_STATUS_MAP: [&str; 4] = [
    "not connected, connection not required",
    "connected, currently no data is received",
    "not connected, needs connection",
    "connected, currently data is received",
];

const IO132_BITS: &[(u32, &str)] = &[
    (8, "request to lock the engine"),
    (9, "hazard warning lights switch active"),
    (10, "factory armed"),
    (17, "electric engine is working"),
    (18, "battery charging is on"),
    (19, "charging wire is plugged"),
    (20, "vehicle working mode: business"),
    (21, "operate button pressed"),
    (22, "immobilizer in service mode"),
    (23, "immobilizer key sequence in progress"),
    (24, "key is in ignition lock"),
    (25, "ignition on"),
    (26, "dynamic ignition on"),
    (27, "webasto"),
    (28, "car is closed"),
    (29, "car is closed by factory remote control"),
    (30, "factory alarm is in panic mode"),
    (31, "factory alarm is emulated by module"),
    (32, "parking activated"),
    (34, "neutral activated"),
    (35, "drive activated"),
    (36, "handbrake is actuated"),
    (37, "footbrake is actuated"),
    (38, "engine is working"),
    (39, "reverse is on"),
    (40, "front left door opened"),
    (41, "front right door opened"),
    (42, "rear left door opened"),
    (43, "rear right door opened"),
    (44, "engine cover opened"),
    (45, "trunk door opened"),
    (46, "roof opened"),
    (52, "CAN module goes to sleep mode"),
];

const IO132_REMOTE_ACTIONS: [&str; 6] = [
    "",
    "car was closed by the factory remote control",
    "car was opened by the factory remote control",
    "trunk cover was opened by the factory remote control",
    "module has sent a rearming signal",
    "car was closed three times by the factory remote control",
];

/// Decode IO 132 into the descriptions of every active flag.
pub fn security_state_flags(flags: u128) -> Vec<String> {
    let mut active = Vec::new();
    can_port_statuses(flags, IO132_STATUS_MAP, &mut active);
    let mut mask = named_bits(flags, IO132_BITS, &mut active);
    mask |= 0x3F; // CAN status fields
    mask |= 0x0F << 48; // remote control nibble

    let remote = ((flags >> 48) & 0x0F) as usize;
    if remote != 0 {
        match IO132_REMOTE_ACTIONS.get(remote) {
            Some(description) => active.push(description.to_string()),
            None => active.push(format!("unknown remote control action {remote}")),
        }
    }

    unknown_bits(flags, mask, &mut active);
    active
}

// ── IO 517 (Security State Flags P4) ──────────────────────────────────────────

const P4_STATUS_MAP: [&str; 4] = [
    "connected, currently no data is received",
    "connected, currently data is received",
    "not connected, needs connection",
    "not connected, does not need connection",
];

const IO517_BITS: &[(u32, &str)] = &[
    (8, "ignition on"),
    (9, "key in ignition lock"),
    (10, "webasto"),
    (11, "engine is working"),
    (12, "standalone engine"),
    (13, "ready to drive"),
    (14, "engine is working on CNG"),
    (15, "company work mode"),
    (16, "operator is present"),
    (17, "interlock active"),
    (18, "handbrake is active"),
    (19, "footbrake is active"),
    (20, "clutch is pushed"),
    (22, "front left door opened"),
    (23, "front right door opened"),
    (24, "rear left door opened"),
    (25, "rear right door opened"),
    (30, "electric engine is working"),
    (31, "car is closed with factory remote control"),
    (32, "car is closed"),
    (39, "CAN module is in sleep mode"),
    (41, "parking is active"),
    (44, "drive is active"),
    (45, "engine lock active"),
];

/// Decode IO 517 into the descriptions of every active flag.
pub fn security_state_flags_p4(flags: u128) -> Vec<String> {
    let mut active = Vec::new();
    can_port_statuses(flags, P4_STATUS_MAP, &mut active);
    let mut mask = named_bits(flags, IO517_BITS, &mut active);
    mask |= 0x3F;
    unknown_bits(flags, mask, &mut active);
    active
}

// ── IO 518 (Control State Flags P4) ───────────────────────────────────────────

const IO518_BITS: &[(u32, &str)] = &[
    (0, "parking lights turned on"),
    (1, "dipped headlights turned on"),
    (2, "full beam headlights turned on"),
    (3, "rear fog lights turned on"),
    (4, "front fog lights turned on"),
    (5, "additional front lights turned on"),
    (6, "additional rear lights turned on"),
    (7, "light signal turned on"),
    (8, "air conditioning turned on"),
    (9, "cruise control turned on"),
    (10, "automatic retarder turned on"),
    (11, "manual retarder turned on"),
    (12, "driver seatbelt fastened"),
    (13, "front passenger seatbelt fastened"),
    (14, "rear left passenger seatbelt fastened"),
    (15, "rear right passenger seatbelt fastened"),
    (16, "rear centre passenger seatbelt fastened"),
    (17, "front passenger is present"),
    (18, "PTO is on"),
    (19, "front differential locked"),
    (20, "rear differential locked"),
    (21, "central differential (4HI) locked"),
    (22, "central differential with reductor (4LO) locked"),
    (23, "trailer axle 1 lift active"),
    (24, "trailer axle 2 lift active"),
];

/// Decode IO 518 into the descriptions of every active flag.
pub fn control_state_flags_p4(flags: u128) -> Vec<String> {
    let mut active = Vec::new();
    let mask = named_bits(flags, IO518_BITS, &mut active);
    unknown_bits(flags, mask, &mut active);
    active
}

// ── IO 519 (Indicator State Flags P4) ─────────────────────────────────────────

const IO519_BITS: &[(u32, &str)] = &[
    (0, "indicator 1"),
    (1, "indicator 2"),
    (2, "indicator 3"),
    (3, "indicator 4"),
    (4, "indicator 5"),
    (5, "indicator 6"),
    (6, "indicator 7"),
    (7, "indicator 8"),
];

/// Decode IO 519 into the descriptions of every active flag.
pub fn indicator_state_flags_p4(flags: u128) -> Vec<String> {
    let mut active = Vec::new();
    let mask = named_bits(flags, IO519_BITS, &mut active);
    unknown_bits(flags, mask, &mut active);
    active
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_means_no_flags_active() {
        assert!(security_state_flags(0).is_empty());
        assert!(security_state_flags_p4(0).is_empty());
        assert!(control_state_flags_p4(0).is_empty());
        assert!(indicator_state_flags_p4(0).is_empty());
        assert_eq!(summarize(&[]), "No flags active");
    }

    #[test]
    fn io517_field_capture() {
        // Field capture: bits 2-5 (CAN2/CAN3 status), 18, 32, 39, 41.
        let flags: u128 = 0x0000_0002_8100_0400_3C;
        let active = security_state_flags_p4(flags);
        assert!(active.contains(&"CAN2 not connected, does not need connection".to_string()));
        assert!(active.contains(&"CAN3 not connected, does not need connection".to_string()));
        assert!(active.contains(&"handbrake is active".to_string()));
        assert!(active.contains(&"car is closed".to_string()));
        assert!(active.contains(&"CAN module is in sleep mode".to_string()));
        assert!(active.contains(&"parking is active".to_string()));
        assert!(active.iter().all(|flag| !flag.starts_with("unknown_bit_")));
    }

    #[test]
    fn io132_field_capture() {
        // Field capture: bits 0 (CAN1 status), 28, 32, 36 and undocumented 55.
        let flags: u128 = 0x0080_0011_1000_0001;
        let active = security_state_flags(flags);
        assert!(active.contains(&"CAN1 connected, currently no data is received".to_string()));
        assert!(active.contains(&"car is closed".to_string()));
        assert!(active.contains(&"parking activated".to_string()));
        assert!(active.contains(&"handbrake is actuated".to_string()));
        assert!(active.contains(&"unknown_bit_55".to_string()));
    }

    #[test]
    fn io132_remote_control_nibble() {
        let flags: u128 = 0x2 << 48;
        let active = security_state_flags(flags);
        assert_eq!(
            active,
            vec!["car was opened by the factory remote control".to_string()]
        );
    }

    #[test]
    fn unlisted_bits_are_reported_not_dropped() {
        let active = control_state_flags_p4(1u128 << 60);
        assert_eq!(active, vec!["unknown_bit_60".to_string()]);

        let active = indicator_state_flags_p4(0b101 | (1u128 << 12));
        assert_eq!(
            active,
            vec![
                "indicator 1".to_string(),
                "indicator 3".to_string(),
                "unknown_bit_12".to_string()
            ]
        );
    }

    #[test]
    fn summary_joins_descriptions() {
        let active = vec!["ignition on".to_string(), "car is closed".to_string()];
        assert_eq!(summarize(&active), "ignition on; car is closed");
    }
}
