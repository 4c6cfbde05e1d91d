//! MySensors 2.x protocol tables: command codes and the three type tables.
//!
//! See <https://www.mysensors.org/download/serial_api_20>. The numeric codes
//! are the wire representation; the symbolic names are used for diagnostics
//! and for the controller registration payloads (e.g. `S_TEMP`).

use serde::{Deserialize, Serialize};

/// Wire command field (third `;`-separated field of a frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Sent by a node to present itself or one of its attached sensors.
    Presentation,
    /// A sensor value update, from or to a sensor.
    Set,
    /// Request of a variable value.
    Req,
    /// Protocol-control traffic (time sync, id assignment, battery, ...).
    Internal,
    /// OTA firmware update stream (out of scope for this gateway).
    Stream,
}

impl Command {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Command::Presentation),
            1 => Some(Command::Set),
            2 => Some(Command::Req),
            3 => Some(Command::Internal),
            4 => Some(Command::Stream),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Command::Presentation => 0,
            Command::Set => 1,
            Command::Req => 2,
            Command::Internal => 3,
            Command::Stream => 4,
        }
    }
}

// Internal message types the dispatcher branches on.
pub const I_BATTERY_LEVEL: u8 = 0;
pub const I_TIME: u8 = 1;
pub const I_ID_REQUEST: u8 = 3;
pub const I_ID_RESPONSE: u8 = 4;
pub const I_CONFIG: u8 = 6;
pub const I_LOG_MESSAGE: u8 = 9;
pub const I_SKETCH_NAME: u8 = 11;
pub const I_SKETCH_VERSION: u8 = 12;
pub const I_DEBUG: u8 = 28;

/// Presentation device-kind table (`S_*`, 40 entries).
pub fn sensor_label(code: u8) -> Option<&'static str> {
    Some(match code {
        0 => "S_DOOR",
        1 => "S_MOTION",
        2 => "S_SMOKE",
        3 => "S_BINARY",
        4 => "S_DIMMER",
        5 => "S_COVER",
        6 => "S_TEMP",
        7 => "S_HUM",
        8 => "S_BARO",
        9 => "S_WIND",
        10 => "S_RAIN",
        11 => "S_UV",
        12 => "S_WEIGHT",
        13 => "S_POWER",
        14 => "S_HEATER",
        15 => "S_DISTANCE",
        16 => "S_LIGHT_LEVEL",
        17 => "S_ARDUINO_NODE",
        18 => "S_ARDUINO_REPEATER_NODE",
        19 => "S_LOCK",
        20 => "S_IR",
        21 => "S_WATER",
        22 => "S_AIR_QUALITY",
        23 => "S_CUSTOM",
        24 => "S_DUST",
        25 => "S_SCENE_CONTROLLER",
        26 => "S_RGB_LIGHT",
        27 => "S_RGBW_LIGHT",
        28 => "S_COLOR_SENSOR",
        29 => "S_HVAC",
        30 => "S_MULTIMETER",
        31 => "S_SPRINKLER",
        32 => "S_WATER_LEAK",
        33 => "S_SOUND",
        34 => "S_VIBRATION",
        35 => "S_MOISTURE",
        36 => "S_INFO",
        37 => "S_GAS",
        38 => "S_GPS",
        39 => "S_WATER_QUALITY",
        _ => return None,
    })
}

/// Set/req variable table (`V_*`, 57 entries).
pub fn variable_label(code: u8) -> Option<&'static str> {
    Some(match code {
        0 => "V_TEMP",
        1 => "V_HUM",
        2 => "V_STATUS",
        3 => "V_PERCENTAGE",
        4 => "V_PRESSURE",
        5 => "V_FORECAST",
        6 => "V_RAIN",
        7 => "V_RAINRATE",
        8 => "V_WIND",
        9 => "V_GUST",
        10 => "V_DIRECTION",
        11 => "V_UV",
        12 => "V_WEIGHT",
        13 => "V_DISTANCE",
        14 => "V_IMPEDANCE",
        15 => "V_ARMED",
        16 => "V_TRIPPED",
        17 => "V_WATT",
        18 => "V_KWH",
        19 => "V_SCENE_ON",
        20 => "V_SCENE_OFF",
        21 => "V_HVAC_FLOW_STATE",
        22 => "V_HVAC_SPEED",
        23 => "V_LIGHT_LEVEL",
        24 => "V_VAR1",
        25 => "V_VAR2",
        26 => "V_VAR3",
        27 => "V_VAR4",
        28 => "V_VAR5",
        29 => "V_UP",
        30 => "V_DOWN",
        31 => "V_STOP",
        32 => "V_IR_SEND",
        33 => "V_IR_RECEIVE",
        34 => "V_FLOW",
        35 => "V_VOLUME",
        36 => "V_LOCK_STATUS",
        37 => "V_LEVEL",
        38 => "V_VOLTAGE",
        39 => "V_CURRENT",
        40 => "V_RGB",
        41 => "V_RGBW",
        42 => "V_ID",
        43 => "V_UNIT_PREFIX",
        44 => "V_HVAC_SETPOINT_COOL",
        45 => "V_HVAC_SETPOINT_HEAT",
        46 => "V_HVAC_FLOW_MODE",
        47 => "V_TEXT",
        48 => "V_CUSTOM",
        49 => "V_POSITION",
        50 => "V_IR_RECORD",
        51 => "V_PH",
        52 => "V_ORP",
        53 => "V_EC",
        54 => "V_VAR",
        55 => "V_VA",
        56 => "V_POWER_FACTOR",
        _ => return None,
    })
}

/// Internal message table (`I_*`, 34 entries).
pub fn internal_label(code: u8) -> Option<&'static str> {
    Some(match code {
        0 => "I_BATTERY_LEVEL",
        1 => "I_TIME",
        2 => "I_VERSION",
        3 => "I_ID_REQUEST",
        4 => "I_ID_RESPONSE",
        5 => "I_INCLUSION_MODE",
        6 => "I_CONFIG",
        7 => "I_FIND_PARENT",
        8 => "I_FIND_PARENT_RESPONSE",
        9 => "I_LOG_MESSAGE",
        10 => "I_CHILDREN",
        11 => "I_SKETCH_NAME",
        12 => "I_SKETCH_VERSION",
        13 => "I_REBOOT",
        14 => "I_GATEWAY_READY",
        15 => "I_SIGNING_PRESENTATION",
        16 => "I_NONCE_REQUEST",
        17 => "I_NONCE_RESPONSE",
        18 => "I_HEARTBEAT_REQUEST",
        19 => "I_PRESENTATION",
        20 => "I_DISCOVER_REQUEST",
        21 => "I_DISCOVER_RESPONSE",
        22 => "I_HEARTBEAT_RESPONSE",
        23 => "I_LOCKED",
        24 => "I_PING",
        25 => "I_PONG",
        26 => "I_REGISTRATION_REQUEST",
        27 => "I_REGISTRATION_RESPONSE",
        28 => "I_DEBUG",
        29 => "I_SIGNAL_REPORT_REQUEST",
        30 => "I_SIGNAL_REPORT_REVERSE",
        31 => "I_SIGNAL_REPORT_RESPONSE",
        32 => "I_PRE_SLEEP_NOTIFICATION",
        33 => "I_POST_SLEEP_NOTIFICATION",
        _ => return None,
    })
}

/// Reverse lookup in the type table implied by `command`. STREAM carries no
/// typed sub-table, so any code maps to `None` there.
pub fn type_label(command: Command, code: u8) -> Option<&'static str> {
    match command {
        Command::Presentation => sensor_label(code),
        Command::Set | Command::Req => variable_label(code),
        Command::Internal => internal_label(code),
        Command::Stream => None,
    }
}

/// Whether `command` implies a typed sub-table at all.
pub fn has_type_table(command: Command) -> bool {
    !matches!(command, Command::Stream)
}
