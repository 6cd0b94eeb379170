//! # dictionary
//!
//! Static descriptor table for the Teltonika AVL I/O ids: permanent elements,
//! OBD and CAN bus parameters, BLE/EYE sensors, driver card fields and the
//! state-flag blobs. Compiled straight from the FMB-series parameter sheets.
//!
//! Ids missing from the table are not an error; the normalizer carries them
//! through as raw values.

/// How a raw I/O value turns into a human-readable rendering.
///
/// Scaling and signedness rules transform the number; enum rules map codes to
/// fixed strings (unknown codes render as `Unknown(N)`); flag rules route
/// through the bit-field decoders in [`crate::flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRule {
    /// Plain number (unit suffix from the descriptor, if any).
    Raw,
    /// Two's-complement number at the carried width (unit suffix, if any).
    SignedRaw,
    /// 0/1 → Off/On.
    Boolean,
    Percent,
    /// Millivolts rendered as volts, two decimals.
    VoltageMvToV,
    CurrentMa,
    SpeedKmh,
    Rpm,
    /// Signed tenths of a degree Celsius (Dallas probes, CAN engine temp).
    TempTenthC,
    /// Signed whole degrees Celsius.
    TempIntC,
    /// Signed hundredths of a degree Celsius (BLE/EYE probes).
    TempHundredthC,
    /// Tenths of a percent relative humidity.
    HumidityTenthRh,
    /// Signed hundredths with the descriptor unit (throttle group, injection
    /// timing, equivalence ratio).
    Hundredths,
    SignedAccelMg,
    DistanceMeters,
    /// Meters on the wire, rendered as kilometres (raw value preserved).
    DistanceKmFromMeters,
    /// PDOP/HDOP carried in hundredths.
    DopHundredths,
    GnssStatus,
    DataMode,
    SleepMode,
    BtStatus,
    WakeReason,
    NetworkType,
    /// 0..5 scale rendered as `X/5`.
    GsmSignal,
    /// 8-byte SIM identifier rendered as 16 hex digits.
    IccidHex16,
    /// CAN door status bit field.
    DoorBitfield,
    /// IO 132 security flag blob.
    SecurityStateFlags,
    /// IO 517 P4 security flag blob.
    SecurityStateFlagsP4,
    /// IO 518 P4 control flag blob.
    ControlStateFlagsP4,
    /// IO 519 P4 indicator flag blob.
    IndicatorStateFlagsP4,
    /// Opaque identifier rendered as hex (iButton, RFID, beacons).
    HexString,
    /// Variable-length ASCII (VIN, driver card fields, barcode).
    Ascii,
}

/// One dictionary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoDescriptor {
    pub id: u16,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub decode: DecodeRule,
}

/// Constant-time descriptor lookup.
pub fn lookup(id: u16) -> Option<IoDescriptor> {
    use DecodeRule::*;
    let entry = |name: &'static str, unit: Option<&'static str>, decode: DecodeRule| {
        IoDescriptor {
            id,
            name,
            unit,
            decode,
        }
    };

    let descriptor = match id {
        // Core status
        239 => entry("Ignition", None, Boolean),
        240 => entry("Movement", None, Boolean),
        80 => entry("Data Mode", None, DataMode),
        21 => entry("GSM Signal", None, GsmSignal),
        200 => entry("Sleep Mode", None, SleepMode),
        69 => entry("GNSS Status", None, GnssStatus),
        181 => entry("GNSS PDOP", None, DopHundredths),
        182 => entry("GNSS HDOP", None, DopHundredths),
        66 => entry("External Voltage", Some("V"), VoltageMvToV),
        67 => entry("Battery Voltage", Some("V"), VoltageMvToV),
        68 => entry("Battery Current", Some("mA"), CurrentMa),
        24 => entry("Speed", Some("km/h"), SpeedKmh),
        205 => entry("GSM Cell ID", None, Raw),
        206 => entry("GSM Area Code", None, Raw),
        241 => entry("Active GSM Operator", None, Raw),
        199 => entry("Trip Odometer", Some("m"), DistanceMeters),
        16 => entry("Total Odometer", Some("km"), DistanceKmFromMeters),

        // Digital / analog pins
        1 => entry("Digital Input 1", None, Boolean),
        2 => entry("Digital Input 2", None, Boolean),
        3 => entry("Digital Input 3", None, Boolean),
        9 => entry("Analog Input 1", Some("V"), VoltageMvToV),
        6 => entry("Analog Input 2", Some("V"), VoltageMvToV),
        179 => entry("Digital Output 1", None, Boolean),
        180 => entry("Digital Output 2", None, Boolean),
        380 => entry("Digital Output 3", None, Boolean),
        381 => entry("Ground Sense", None, Boolean),

        // GPS-derived fuel data
        12 => entry("Fuel Used GPS", Some("L"), Raw),
        13 => entry("Fuel Rate GPS", Some("L/100km"), Raw),

        // Accelerometer
        17 => entry("Axis X", Some("mG"), SignedAccelMg),
        18 => entry("Axis Y", Some("mG"), SignedAccelMg),
        19 => entry("Axis Z", Some("mG"), SignedAccelMg),

        // Device info
        11 => entry("ICCID1", None, IccidHex16),
        14 => entry("ICCID2", None, IccidHex16),
        10 => entry("SD Status", None, Boolean),
        113 => entry("Battery Level", Some("%"), Percent),
        238 => entry("User ID", None, Raw),
        237 => entry("Network Type", None, NetworkType),

        // Pulse counters
        4 => entry("Pulse Counter Din1", Some("pulses"), Raw),
        5 => entry("Pulse Counter Din2", Some("pulses"), Raw),

        // Bluetooth
        263 => entry("BT Status", None, BtStatus),
        264 => entry("Barcode ID", None, Ascii),

        303 => entry("Instant Movement", None, Boolean),

        // Dallas temperature probes
        72 => entry("Dallas Temperature 1", Some("°C"), TempTenthC),
        73 => entry("Dallas Temperature 2", Some("°C"), TempTenthC),
        74 => entry("Dallas Temperature 3", Some("°C"), TempTenthC),
        75 => entry("Dallas Temperature 4", Some("°C"), TempTenthC),
        76 => entry("Dallas Temperature ID 1", None, HexString),
        77 => entry("Dallas Temperature ID 2", None, HexString),
        79 => entry("Dallas Temperature ID 3", None, HexString),
        71 => entry("Dallas Temperature ID 4", None, HexString),
        78 => entry("iButton", None, HexString),
        207 => entry("RFID", None, HexString),

        // Liquid level sensors
        201 => entry("LLS 1 Fuel Level", Some("L"), SignedRaw),
        202 => entry("LLS 1 Temperature", Some("°C"), TempIntC),
        203 => entry("LLS 2 Fuel Level", Some("L"), SignedRaw),
        204 => entry("LLS 2 Temperature", Some("°C"), TempIntC),
        210 => entry("LLS 3 Fuel Level", Some("L"), SignedRaw),
        211 => entry("LLS 3 Temperature", Some("°C"), TempIntC),
        212 => entry("LLS 4 Fuel Level", Some("L"), SignedRaw),
        213 => entry("LLS 4 Temperature", Some("°C"), TempIntC),
        214 => entry("LLS 5 Fuel Level", Some("L"), SignedRaw),
        215 => entry("LLS 5 Temperature", Some("°C"), TempIntC),

        15 => entry("Eco Score", None, Raw),

        327 => entry("UL202-02 Sensor Fuel Level", Some("mm"), SignedRaw),
        483 => entry("UL202-02 Sensor Status", None, Raw),

        387 => entry("ISO6709 Coordinates", None, Ascii),
        636 => entry("UMTS/LTE Cell ID", None, Raw),

        // Driver card
        403 => entry("Driver Name", None, Ascii),
        404 => entry("Driver Card License Type", None, Raw),
        405 => entry("Driver Gender", None, Raw),
        406 => entry("Driver Card ID", None, Ascii),
        407 => entry("Driver Card Expiration Date", None, Raw),
        408 => entry("Driver Card Place Of Issue", None, Ascii),
        409 => entry("Driver Status Event", None, Raw),

        329 => entry("AIN Speed", Some("km/h"), SpeedKmh),

        // MSP500
        500 => entry("MSP500 Vendor Name", None, Ascii),
        501 => entry("MSP500 Vehicle Number", None, Raw),
        502 => entry("MSP500 Speed Sensor", Some("km/h"), SpeedKmh),

        637 => entry("Wake Reason", None, WakeReason),

        // EYE sensors
        10800 => entry("EYE Temperature 1", Some("°C"), TempHundredthC),
        10801 => entry("EYE Temperature 2", Some("°C"), TempHundredthC),
        10802 => entry("EYE Temperature 3", Some("°C"), TempHundredthC),
        10803 => entry("EYE Temperature 4", Some("°C"), TempHundredthC),
        10804 => entry("EYE Humidity 1", Some("%"), Percent),
        10805 => entry("EYE Humidity 2", Some("%"), Percent),
        10806 => entry("EYE Humidity 3", Some("%"), Percent),
        10807 => entry("EYE Humidity 4", Some("%"), Percent),
        10808 => entry("EYE Magnet 1", None, Boolean),
        10809 => entry("EYE Magnet 2", None, Boolean),
        10810 => entry("EYE Magnet 3", None, Boolean),
        10811 => entry("EYE Magnet 4", None, Boolean),
        10812 => entry("EYE Movement 1", None, Boolean),
        10813 => entry("EYE Movement 2", None, Boolean),
        10814 => entry("EYE Movement 3", None, Boolean),
        10815 => entry("EYE Movement 4", None, Boolean),
        10816 => entry("EYE Pitch 1", Some("°"), SignedRaw),
        10817 => entry("EYE Pitch 2", Some("°"), SignedRaw),
        10818 => entry("EYE Pitch 3", Some("°"), SignedRaw),
        10819 => entry("EYE Pitch 4", Some("°"), SignedRaw),
        10820 => entry("EYE Low Battery 1", None, Boolean),
        10821 => entry("EYE Low Battery 2", None, Boolean),
        10822 => entry("EYE Low Battery 3", None, Boolean),
        10823 => entry("EYE Low Battery 4", None, Boolean),
        10824 => entry("EYE Battery Voltage 1", Some("V"), VoltageMvToV),
        10825 => entry("EYE Battery Voltage 2", Some("V"), VoltageMvToV),
        10826 => entry("EYE Battery Voltage 3", Some("V"), VoltageMvToV),
        10827 => entry("EYE Battery Voltage 4", Some("V"), VoltageMvToV),
        10832 => entry("EYE Roll 1", Some("°"), SignedRaw),
        10833 => entry("EYE Roll 2", Some("°"), SignedRaw),
        10834 => entry("EYE Roll 3", Some("°"), SignedRaw),
        10835 => entry("EYE Roll 4", Some("°"), SignedRaw),
        10836 => entry("EYE Movement Count 1", None, Raw),
        10837 => entry("EYE Movement Count 2", None, Raw),
        10838 => entry("EYE Movement Count 3", None, Raw),
        10839 => entry("EYE Movement Count 4", None, Raw),
        10840 => entry("EYE Magnet Count 1", None, Raw),
        10841 => entry("EYE Magnet Count 2", None, Raw),
        10842 => entry("EYE Magnet Count 3", None, Raw),
        10843 => entry("EYE Magnet Count 4", None, Raw),

        383 => entry("AXL Calibration Status", None, Raw),

        // BLE RFID and buttons
        451 => entry("BLE RFID #1", None, HexString),
        452 => entry("BLE RFID #2", None, HexString),
        453 => entry("BLE RFID #3", None, HexString),
        454 => entry("BLE RFID #4", None, HexString),
        455 => entry("BLE Button 1 State #1", None, Boolean),
        456 => entry("BLE Button 1 State #2", None, Boolean),
        457 => entry("BLE Button 1 State #3", None, Boolean),
        458 => entry("BLE Button 1 State #4", None, Boolean),
        459 => entry("BLE Button 2 State #1", None, Boolean),
        460 => entry("BLE Button 2 State #2", None, Boolean),
        461 => entry("BLE Button 2 State #3", None, Boolean),
        462 => entry("BLE Button 2 State #4", None, Boolean),

        622 => entry("Frequency DIN1", Some("Hz"), Raw),
        623 => entry("Frequency DIN2", Some("Hz"), Raw),

        1148 => entry("Connectivity Quality", None, Raw),

        // OBD elements
        256 => entry("VIN", None, Ascii),
        30 => entry("Number Of DTC", None, Raw),
        31 => entry("Engine Load", Some("%"), Percent),
        32 => entry("Coolant Temperature", Some("°C"), TempIntC),
        33 => entry("Short Fuel Trim", Some("%"), SignedRaw),
        34 => entry("Fuel Pressure", Some("kPa"), Raw),
        35 => entry("Intake MAP", Some("kPa"), Raw),
        36 => entry("Engine RPM", Some("RPM"), Rpm),
        37 => entry("Vehicle Speed", Some("km/h"), SpeedKmh),
        38 => entry("Timing Advance", Some("°"), SignedRaw),
        39 => entry("Intake Air Temperature", Some("°C"), TempIntC),
        40 => entry("MAF", Some("g/sec"), Raw),
        41 => entry("Throttle Position", Some("%"), Percent),
        42 => entry("Runtime Since Engine Start", Some("sec"), Raw),
        43 => entry("Distance Traveled MIL On", Some("km"), Raw),
        44 => entry("Relative Fuel Rail Pressure", Some("kPa"), Raw),
        45 => entry("Direct Fuel Rail Pressure", Some("kPa"), Raw),
        46 => entry("Commanded EGR", Some("%"), Percent),
        47 => entry("EGR Error", Some("%"), SignedRaw),
        48 => entry("Fuel Level", Some("%"), Percent),
        49 => entry("Distance Since Codes Clear", Some("km"), Raw),
        50 => entry("Barometric Pressure", Some("kPa"), Raw),
        51 => entry("Control Module Voltage", Some("V"), VoltageMvToV),
        52 => entry("Absolute Load Value", Some("%"), Hundredths),
        53 => entry("Ambient Air Temperature", Some("°C"), TempIntC),
        54 => entry("Time Run With MIL On", Some("min"), Raw),
        55 => entry("Time Since Codes Cleared", Some("min"), Raw),
        56 => entry("Absolute Fuel Rail Pressure", Some("kPa"), Raw),
        57 => entry("Hybrid Battery Pack Life", Some("%"), Percent),
        58 => entry("Engine Oil Temperature", Some("°C"), TempIntC),
        59 => entry("Fuel Injection Timing", Some("°"), Hundredths),
        60 => entry("Fuel Rate", Some("L/h"), Raw),
        281 => entry("Fault Codes", None, Ascii),
        540 => entry("Throttle Position Group", Some("%"), Percent),
        541 => entry("Commanded Equivalence Ratio", None, Hundredths),
        542 => entry("Intake MAP 2 Bytes", Some("kPa"), Raw),
        543 => entry("Hybrid System Voltage", Some("V"), VoltageMvToV),
        544 => entry("Hybrid System Current", Some("mA"), CurrentMa),
        759 => entry("Fuel Type", None, Raw),

        // BLE sensors
        25 => entry("BLE Temperature #1", Some("°C"), TempHundredthC),
        26 => entry("BLE Temperature #2", Some("°C"), TempHundredthC),
        27 => entry("BLE Temperature #3", Some("°C"), TempHundredthC),
        28 => entry("BLE Temperature #4", Some("°C"), TempHundredthC),
        29 => entry("BLE Battery #1", Some("%"), Percent),
        20 => entry("BLE Battery #2", Some("%"), Percent),
        22 => entry("BLE Battery #3", Some("%"), Percent),
        23 => entry("BLE Battery #4", Some("%"), Percent),
        86 => entry("BLE Humidity #1", Some("%RH"), HumidityTenthRh),
        104 => entry("BLE Humidity #2", Some("%RH"), HumidityTenthRh),
        106 => entry("BLE Humidity #3", Some("%RH"), HumidityTenthRh),
        108 => entry("BLE Humidity #4", Some("%RH"), HumidityTenthRh),
        270 => entry("BLE Fuel Level #1", Some("L"), Raw),
        273 => entry("BLE Fuel Level #2", Some("L"), Raw),
        276 => entry("BLE Fuel Level #3", Some("L"), Raw),
        279 => entry("BLE Fuel Level #4", Some("L"), Raw),
        385 => entry("Beacon", None, HexString),

        // CAN bus (LVCAN200 / ALLCAN300 / CANCONTROL)
        81 => entry("Vehicle Speed (CAN)", Some("km/h"), SpeedKmh),
        82 => entry("Accelerator Pedal Position", Some("%"), Percent),
        83 => entry("Fuel Consumed (CAN)", Some("L"), Raw),
        84 => entry("Fuel Level (CAN)", Some("L"), Raw),
        85 => entry("Engine RPM (CAN)", Some("RPM"), Rpm),
        87 => entry("Total Mileage (CAN)", Some("km"), DistanceKmFromMeters),
        89 => entry("Fuel Level (CAN %)", Some("%"), Percent),
        90 => entry("Door Status (CAN)", None, DoorBitfield),
        100 => entry("Program Number", None, Raw),
        101 => entry("Module ID 8B", None, HexString),
        388 => entry("Module ID 17B", None, HexString),
        102 => entry("Engine Worktime", Some("min"), Raw),
        103 => entry("Engine Worktime (Counted)", Some("min"), Raw),
        105 => entry("Total Mileage (Counted)", Some("km"), DistanceKmFromMeters),
        107 => entry("Fuel Consumed (Counted)", Some("L"), Raw),
        110 => entry("Fuel Rate (CAN)", Some("L/h"), Raw),
        111 => entry("AdBlue Level", Some("%"), Percent),
        112 => entry("AdBlue Level (L)", Some("L"), Raw),
        114 => entry("Engine Load (CAN)", Some("%"), Percent),
        115 => entry("Engine Temperature", Some("°C"), TempTenthC),

        // State-flag blobs
        132 => entry("Security State Flags", None, SecurityStateFlags),
        517 => entry("Security State Flags P4", None, SecurityStateFlagsP4),
        518 => entry("Control State Flags P4", None, ControlStateFlagsP4),
        519 => entry("Indicator State Flags P4", None, IndicatorStateFlagsP4),

        _ => return None,
    };
    Some(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ids_resolve() {
        let ignition = lookup(239).unwrap();
        assert_eq!(ignition.name, "Ignition");
        assert_eq!(ignition.decode, DecodeRule::Boolean);

        let voltage = lookup(66).unwrap();
        assert_eq!(voltage.unit, Some("V"));
        assert_eq!(voltage.decode, DecodeRule::VoltageMvToV);

        let flags = lookup(517).unwrap();
        assert_eq!(flags.decode, DecodeRule::SecurityStateFlagsP4);
    }

    #[test]
    fn unknown_ids_are_absent() {
        assert!(lookup(9999).is_none());
        assert!(lookup(0).is_none());
    }

    #[test]
    fn descriptor_keeps_the_looked_up_id() {
        assert_eq!(lookup(85).unwrap().id, 85);
    }
}
