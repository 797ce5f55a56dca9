//! Command Catalog
//!
//! Declarative table of every io-control command the bridge speaks. Each
//! entry pairs a request code with how its payload is laid out and how the
//! camera's reply is interpreted; [`crate::Command`] is the one generic
//! driver over this table.

use crate::command::Command;
use crate::error::ProtocolError;
use serde_json::{json, Value};

/// How a request payload is produced from a JSON parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestLayout {
    /// No payload
    Empty,
    /// One byte, 1 = on, 2 = off
    Switch,
    /// One byte within an inclusive range
    Byte { min: u8, max: u8 },
    /// Switch value written twice (`[v, v]`)
    SwitchPair,
    /// Switch value followed by a zero byte (`[v, 0]`)
    SwitchPadded,
    /// One signed byte within an inclusive range
    SignedByte { min: i8, max: i8 },
    /// Fixed bytes, parameter ignored
    Constant(&'static [u8]),
    /// Little-endian u32 of the current unix time plus an offset
    UnixTime { offset: u32 },
    /// Built by a dedicated constructor on [`Command`]
    Custom,
}

/// How a response payload is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLayout {
    /// Bytes returned as a list of integers
    Raw,
    /// First byte as an integer (1/2 style status getters)
    Byte,
    /// `true` when the camera answered `[1]`
    Ack,
    /// UTF-8 JSON document
    Json,
    /// UTF-8 text with trailing NULs stripped
    Text,
    /// `<HBBBB`: bitrate, res, fps, hor_flip, ver_flip
    VideoParams,
    /// Little-endian unsigned integer of any width up to 8 bytes
    UnixTime,
    /// `<BB`: enabled, sensitivity; reports enabled
    MotionAlarm,
    /// JSON with numbered keys remapped to names
    BatteryUsage,
    /// Count byte followed by `<BHB` records
    CruisePoints,
    /// `<IBH`: time, vertical, horizontal
    CruisePoint,
}

/// One catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub code: u16,
    pub name: &'static str,
    pub request: RequestLayout,
    pub response: ResponseLayout,
}

const fn entry(
    code: u16,
    name: &'static str,
    request: RequestLayout,
    response: ResponseLayout,
) -> CommandSpec {
    CommandSpec {
        code,
        name,
        request,
        response,
    }
}

use RequestLayout as Rq;
use ResponseLayout as Rs;

/// Every known command, ordered by code
pub const CATALOG: &[CommandSpec] = &[
    entry(10000, "ConnectRequest", Rq::Custom, Rs::Raw),
    entry(10002, "ConnectAuth", Rq::Custom, Rs::Json),
    entry(10006, "ConnectUserAuthDoorbell", Rq::Custom, Rs::Json),
    entry(10008, "ConnectUserAuth", Rq::Custom, Rs::Json),
    entry(10010, "ControlChannel", Rq::Custom, Rs::Raw),
    entry(10020, "CheckCameraInfo", Rq::Custom, Rs::Json),
    entry(10030, "GetNetworkLightStatus", Rq::Empty, Rs::Byte),
    entry(10032, "SetNetworkLightStatus", Rq::Switch, Rs::Raw),
    entry(10040, "GetNightVisionStatus", Rq::Empty, Rs::Byte),
    entry(10042, "SetNightVisionStatus", Rq::Byte { min: 1, max: 3 }, Rs::Raw),
    entry(10044, "GetIRLEDStatus", Rq::Empty, Rs::Byte),
    entry(10046, "SetIRLEDStatus", Rq::Switch, Rs::Raw),
    entry(10050, "GetVideoParam", Rq::Empty, Rs::VideoParams),
    entry(10052, "SetVideoParam", Rq::Custom, Rs::Ack),
    entry(10056, "SetResolvingBit", Rq::Custom, Rs::Ack),
    entry(10058, "TakePhoto", Rq::Constant(&[1]), Rs::Raw),
    entry(10070, "GetOSDStatus", Rq::Empty, Rs::Byte),
    entry(10072, "SetOSDStatus", Rq::Switch, Rs::Raw),
    entry(10074, "GetOSDLogoStatus", Rq::Empty, Rs::Byte),
    entry(10076, "SetOSDLogoStatus", Rq::Switch, Rs::Raw),
    entry(10090, "GetCameraTime", Rq::Empty, Rs::UnixTime),
    entry(10092, "SetCameraTime", Rq::UnixTime { offset: 1 }, Rs::Raw),
    entry(10148, "StartBoa", Rq::Constant(&[0, 1, 0, 0, 0]), Rs::Raw),
    entry(10200, "GetMotionAlarm", Rq::Empty, Rs::MotionAlarm),
    entry(10202, "SetMotionAlarm", Rq::SwitchPadded, Rs::Raw),
    entry(10206, "SetMotionAlarmLegacy", Rq::SwitchPadded, Rs::Raw),
    entry(10242, "FormatSDCard", Rq::Custom, Rs::Raw),
    entry(10290, "GetMotionTagging", Rq::Empty, Rs::Byte),
    entry(10292, "SetMotionTagging", Rq::Switch, Rs::Raw),
    entry(10302, "SetTimeZone", Rq::SignedByte { min: -11, max: 13 }, Rs::Raw),
    entry(10444, "SetDeviceState", Rq::Switch, Rs::Raw),
    entry(10446, "CheckConnStatus", Rq::Empty, Rs::Json),
    entry(10448, "GetBatteryUsage", Rq::Empty, Rs::BatteryUsage),
    entry(10600, "SetRtspSwitch", Rq::Switch, Rs::Raw),
    entry(10604, "GetRtspParam", Rq::Empty, Rs::Text),
    entry(10620, "CheckNight", Rq::Empty, Rs::Raw),
    entry(10624, "GetAutoSwitchNightType", Rq::Empty, Rs::Byte),
    entry(10626, "SetAutoSwitchNightType", Rq::Byte { min: 1, max: 2 }, Rs::Raw),
    entry(10630, "SetAlarmFlashing", Rq::SwitchPair, Rs::Raw),
    entry(10632, "GetAlarmFlashing", Rq::Empty, Rs::Raw),
    entry(10640, "GetSpotlightStatus", Rq::Empty, Rs::Raw),
    entry(10646, "SetSpotlightStatus", Rq::Switch, Rs::Raw),
    entry(10720, "GetAccessoriesInfo", Rq::Empty, Rs::Json),
    entry(10788, "GetIntegratedFloodlightInfo", Rq::Empty, Rs::Raw),
    entry(10820, "GetWhiteLightInfo", Rq::Empty, Rs::Raw),
    entry(11000, "SetRotaryByDegree", Rq::Custom, Rs::Raw),
    entry(11002, "SetRotaryByAction", Rq::Custom, Rs::Raw),
    entry(11004, "ResetRotatePosition", Rq::Custom, Rs::Raw),
    entry(11006, "GetCurCruisePoint", Rq::UnixTime { offset: 0 }, Rs::CruisePoint),
    entry(11010, "GetCruisePoints", Rq::Empty, Rs::CruisePoints),
    entry(11012, "SetCruisePoints", Rq::Custom, Rs::Raw),
    entry(11014, "GetCruise", Rq::Empty, Rs::Byte),
    entry(11016, "SetCruise", Rq::Switch, Rs::Raw),
    entry(11018, "SetPTZPosition", Rq::Custom, Rs::Raw),
    entry(11020, "GetMotionTracking", Rq::Empty, Rs::Byte),
    entry(11022, "SetMotionTracking", Rq::Switch, Rs::Raw),
    entry(11635, "ResponseQuickMessage", Rq::Byte { min: 1, max: 3 }, Rs::Raw),
    entry(12060, "SetFloodLightSwitch", Rq::Switch, Rs::Raw),
];

/// Look up the catalog entry for a request code
pub fn spec(code: u16) -> Option<&'static CommandSpec> {
    CATALOG
        .binary_search_by_key(&code, |s| s.code)
        .ok()
        .map(|idx| &CATALOG[idx])
}

/// A named command as exposed to automation topics and the HTTP API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topic {
    pub name: &'static str,
    /// Code queried on `get`
    pub get: Option<u16>,
    /// Code sent on `set`
    pub set: Option<u16>,
    /// Field of an object response (and key of a 10052 setting)
    pub field: Option<&'static str>,
}

const fn topic_entry(
    name: &'static str,
    get: Option<u16>,
    set: Option<u16>,
    field: Option<&'static str>,
) -> Topic {
    Topic {
        name,
        get,
        set,
        field,
    }
}

/// Named commands
pub const TOPICS: &[Topic] = &[
    topic_entry("status_light", Some(10030), Some(10032), None),
    topic_entry("night_vision", Some(10040), Some(10042), None),
    topic_entry("irled", Some(10044), Some(10046), None),
    topic_entry("bitrate", Some(10050), Some(10052), Some("bitrate")),
    topic_entry("fps", Some(10050), Some(10052), Some("fps")),
    topic_entry("resolution", Some(10050), None, Some("res")),
    topic_entry("hor_flip", Some(10050), Some(10052), Some("hor_flip")),
    topic_entry("ver_flip", Some(10050), Some(10052), Some("ver_flip")),
    topic_entry("take_photo", Some(10058), None, None),
    topic_entry("osd_timestamp", Some(10070), Some(10072), None),
    topic_entry("osd_logo", Some(10074), Some(10076), None),
    topic_entry("camera_time", Some(10090), Some(10092), None),
    topic_entry("camera_info", Some(10020), None, None),
    topic_entry("param_info", Some(10020), None, None),
    topic_entry("control_channel", None, Some(10010), None),
    topic_entry("start_boa", Some(10148), None, None),
    topic_entry("motion_alarm", Some(10200), Some(10202), None),
    topic_entry("format_sd", None, Some(10242), None),
    topic_entry("motion_tagging", Some(10290), Some(10292), None),
    topic_entry("time_zone", None, Some(10302), None),
    topic_entry("device_state", None, Some(10444), None),
    topic_entry("conn_status", Some(10446), None, None),
    topic_entry("battery_usage", Some(10448), None, None),
    topic_entry("rtsp", Some(10604), Some(10600), None),
    topic_entry("night_check", Some(10620), None, None),
    topic_entry("night_switch", Some(10624), Some(10626), None),
    topic_entry("alarm", Some(10632), Some(10630), None),
    topic_entry("spotlight", Some(10640), Some(10646), None),
    topic_entry("accessories", Some(10720), None, None),
    topic_entry("floodlight", Some(10788), Some(12060), None),
    topic_entry("white_light", Some(10820), None, None),
    topic_entry("rotary_degree", None, Some(11000), None),
    topic_entry("rotary_action", None, Some(11002), None),
    topic_entry("reset_rotation", None, Some(11004), None),
    topic_entry("ptz_position", Some(11006), Some(11018), None),
    topic_entry("cruise_points", Some(11010), Some(11012), None),
    topic_entry("pan_cruise", Some(11014), Some(11016), None),
    topic_entry("motion_tracking", Some(11020), Some(11022), None),
    topic_entry("quick_response", None, Some(11635), None),
];

/// Look up a named command
pub fn topic(name: &str) -> Option<&'static Topic> {
    TOPICS.iter().find(|t| t.name == name)
}

impl Topic {
    /// Build the command for this topic. `set` selects the setter; a
    /// scalar setter payload for a video field is wrapped as `{field: value}`.
    pub fn request(&self, set: bool, payload: &Value) -> Result<Command, ProtocolError> {
        let code = if set { self.set } else { self.get };
        let code = code.ok_or_else(|| ProtocolError::InvalidParameter {
            command: self.name,
            reason: format!("does not support {}", if set { "set" } else { "get" }),
        })?;

        match (set, self.field) {
            (true, Some(field)) if !payload.is_object() => {
                Command::build(code, &json!({ field: payload }))
            }
            _ => Command::build(code, payload),
        }
    }

    /// Reduce a `get` response to this topic's field, if it has one
    pub fn extract(&self, value: Value) -> Value {
        match (self.field, value) {
            (Some(field), Value::Object(mut map)) => map.remove(field).unwrap_or(Value::Null),
            (_, value) => value,
        }
    }
}
