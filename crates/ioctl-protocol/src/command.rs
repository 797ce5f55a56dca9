//! Command Driver
//!
//! One value type for every catalog entry. Parameters are validated when the
//! command is built, so a `Command` that exists always encodes to bytes the
//! camera accepts.

use crate::catalog::{self, CommandSpec, RequestLayout, ResponseLayout};
use crate::error::ProtocolError;
use crate::frame;
use crate::media;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Device convention for enabled
pub const ON: u8 = 1;
/// Device convention for disabled
pub const OFF: u8 = 2;

/// Number of parameters requested by a bare CheckCameraInfo
pub const CAMERA_INFO_COUNT: u8 = 60;

/// Default pan/tilt speed
pub const DEFAULT_SPEED: u8 = 5;

/// Default preset for ResetRotatePosition
pub const DEFAULT_RESET_POSITION: u8 = 3;

const BATTERY_KEYS: [(&str, &str); 6] = [
    ("0", "last_charge"),
    ("1", "live_streaming"),
    ("2", "events_uploaded"),
    ("3", "events_filtered"),
    ("4", "sd_recordings"),
    ("5", "5"),
];

/// A single stop of a pan cruise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CruisePoint {
    /// Tilt, 0..=40
    pub vertical: u8,
    /// Pan, 0..=350
    pub horizontal: u16,
    /// Seconds to wait at this point, 10..=255
    #[serde(default = "default_wait")]
    pub time: u8,
}

fn default_wait() -> u8 {
    10
}

impl CruisePoint {
    fn validate(&self, command: &'static str) -> Result<(), ProtocolError> {
        in_range(command, "vertical", self.vertical as i64, 0, 40)?;
        in_range(command, "horizontal", self.horizontal as i64, 0, 350)?;
        in_range(command, "time", self.time as i64, 10, 255)?;
        Ok(())
    }
}

/// Single field update carried by SetVideoParam
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSetting {
    Bitrate(u16),
    Fps(u8),
    HorFlip(u8),
    VerFlip(u8),
}

/// A request ready to be framed and sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    code: u16,
    name: &'static str,
    payload: Option<Vec<u8>>,
    response: ResponseLayout,
}

impl Command {
    fn from_spec(spec: &CommandSpec, payload: Option<Vec<u8>>) -> Self {
        Self {
            code: spec.code,
            name: spec.name,
            payload,
            response: spec.response,
        }
    }

    /// Command for a code the crate itself knows about
    pub(crate) fn with_payload(code: u16, payload: Option<Vec<u8>>) -> Self {
        match catalog::spec(code) {
            Some(spec) => Self::from_spec(spec, payload),
            None => Self {
                code,
                name: "Unknown",
                payload,
                response: ResponseLayout::Raw,
            },
        }
    }

    /// Build any catalog command from a loosely typed parameter.
    ///
    /// Scalars may be numbers or numeric strings; on/off settings also take
    /// `"on"`/`"off"` and booleans. Structured commands take an object with
    /// named fields or an array in field order.
    pub fn build(code: u16, param: &Value) -> Result<Self, ProtocolError> {
        let spec = catalog::spec(code).ok_or(ProtocolError::UnknownCommand(code))?;

        let payload = match spec.request {
            RequestLayout::Empty => None,
            RequestLayout::Switch => Some(vec![switch(spec.name, param)?]),
            RequestLayout::SwitchPair => {
                let value = switch(spec.name, param)?;
                Some(vec![value, value])
            }
            RequestLayout::SwitchPadded => Some(vec![switch(spec.name, param)?, 0]),
            RequestLayout::Byte { min, max } => {
                let value = int(spec.name, "value", param)?;
                Some(vec![in_range(spec.name, "value", value, min as i64, max as i64)? as u8])
            }
            RequestLayout::SignedByte { min, max } => {
                let value = int(spec.name, "value", param)?;
                let value = in_range(spec.name, "value", value, min as i64, max as i64)? as i8;
                Some(value.to_le_bytes().to_vec())
            }
            RequestLayout::Constant(bytes) => Some(bytes.to_vec()),
            RequestLayout::UnixTime { offset } => {
                let now = unix_now().as_secs() as u32;
                Some(now.wrapping_add(offset).to_le_bytes().to_vec())
            }
            RequestLayout::Custom => return Self::build_custom(spec, param),
        };

        Ok(Self::from_spec(spec, payload))
    }

    fn build_custom(spec: &CommandSpec, param: &Value) -> Result<Self, ProtocolError> {
        let name = spec.name;
        match spec.code {
            10000 => Ok(Self::connect_request(param.as_str().filter(|mac| !mac.is_empty()))),
            10010 => {
                let media = int(name, "media_type", required(name, param, "media_type", 0)?)?;
                let enabled = match field(param, "enabled", 1) {
                    Some(value) => switch(name, value)?,
                    None => ON,
                };
                Self::control_channel(to_u8(name, "media_type", media)?, enabled == ON)
            }
            10020 => match param {
                Value::Null => Ok(Self::camera_info(CAMERA_INFO_COUNT)),
                _ => Self::camera_params(&byte_list(name, param)?),
            },
            10052 => Self::build_video_param(spec, param),
            10056 => {
                let frame_size = int(name, "frame_size", required(name, param, "frame_size", 0)?)?;
                let bitrate = int(name, "bitrate", required(name, param, "bitrate", 1)?)?;
                let fps = int(name, "fps", required(name, param, "fps", 2)?)?;
                Self::resolving_bit(
                    to_u8(name, "frame_size", frame_size)?,
                    to_u16(name, "bitrate", bitrate)?,
                    to_u16(name, "fps", fps)?,
                )
            }
            10242 => Self::format_sd(to_u8(name, "value", int(name, "value", param)?)?),
            11000 => {
                let horizontal = int(name, "horizontal", required(name, param, "horizontal", 0)?)?;
                let vertical = int(name, "vertical", required(name, param, "vertical", 1)?)?;
                let speed = optional_int(name, param, "speed", 2, DEFAULT_SPEED as i64)?;
                Self::rotate_by_degree(
                    to_i16(name, "horizontal", horizontal)?,
                    to_i16(name, "vertical", vertical)?,
                    to_u8(name, "speed", speed)?,
                )
            }
            11002 => {
                if let Some(direction) = param.as_str() {
                    let (horizontal, vertical) = direction_to_action(name, direction)?;
                    return Self::rotate_by_action(horizontal, vertical, DEFAULT_SPEED);
                }
                let horizontal = optional_int(name, param, "horizontal", 0, 0)?;
                let vertical = optional_int(name, param, "vertical", 1, 0)?;
                let speed = optional_int(name, param, "speed", 2, DEFAULT_SPEED as i64)?;
                Self::rotate_by_action(
                    to_u8(name, "horizontal", horizontal)?,
                    to_u8(name, "vertical", vertical)?,
                    to_u8(name, "speed", speed)?,
                )
            }
            11004 => {
                let position = match param {
                    Value::Null => DEFAULT_RESET_POSITION as i64,
                    _ => int(name, "position", param)?,
                };
                Ok(Self::reset_rotation(to_u8(name, "position", position)?))
            }
            11012 => {
                let points = param.get("points").unwrap_or(param);
                let points: Vec<CruisePoint> =
                    serde_json::from_value(points.clone()).map_err(|e| invalid(name, e.to_string()))?;
                Self::cruise_points(&points)
            }
            11018 => {
                let vertical = int(name, "vertical", required(name, param, "vertical", 0)?)?;
                let horizontal = int(name, "horizontal", required(name, param, "horizontal", 1)?)?;
                Self::ptz_position(
                    to_u8(name, "vertical", vertical)?,
                    to_u16(name, "horizontal", horizontal)?,
                )
            }
            _ => Err(invalid(name, "only built by the handshake")),
        }
    }

    fn build_video_param(spec: &CommandSpec, param: &Value) -> Result<Self, ProtocolError> {
        let name = spec.name;
        if param.get("frame_size").is_some() {
            let frame_size = int(name, "frame_size", required(name, param, "frame_size", 0)?)?;
            let bitrate = int(name, "bitrate", required(name, param, "bitrate", 1)?)?;
            let fps = int(name, "fps", required(name, param, "fps", 2)?)?;
            return Self::doorbell_resolving_bit(
                to_u8(name, "frame_size", frame_size)?,
                to_u16(name, "bitrate", bitrate)?,
                to_u8(name, "fps", fps)?,
            );
        }

        let setting = if let Some(value) = param.get("bitrate") {
            VideoSetting::Bitrate(to_u16(name, "bitrate", int(name, "bitrate", value)?)?)
        } else if let Some(value) = param.get("fps") {
            VideoSetting::Fps(to_u8(name, "fps", int(name, "fps", value)?)?)
        } else if let Some(value) = param.get("hor_flip") {
            VideoSetting::HorFlip(switch(name, value)?)
        } else if let Some(value) = param.get("ver_flip") {
            VideoSetting::VerFlip(switch(name, value)?)
        } else {
            return Err(invalid(name, "expected one of bitrate, fps, hor_flip, ver_flip"));
        };
        Self::video_setting(setting)
    }

    /// ConnectRequest, optionally waking a sleeping battery camera
    pub fn connect_request(wake_mac: Option<&str>) -> Self {
        let payload = wake_mac.map(|mac| {
            // Key order matches what firmware emits itself
            let mac = Value::String(mac.to_string());
            format!(r#"{{"cameraInfo":{{"mac":{mac},"encFlag":0,"wakeupFlag":1}}}}"#).into_bytes()
        });
        Self::with_payload(10000, payload)
    }

    /// Toggle a media channel (1 video, 2 audio, 3 return audio, 4 rdt)
    pub fn control_channel(media_type: u8, enabled: bool) -> Result<Self, ProtocolError> {
        in_range("ControlChannel", "media_type", media_type as i64, media::VIDEO as i64, media::RDT as i64)?;
        let state = if enabled { ON } else { OFF };
        Ok(Self::with_payload(10010, Some(vec![media_type, state])))
    }

    /// Request the first `count` camera parameters
    pub fn camera_info(count: u8) -> Self {
        let mut payload = Vec::with_capacity(count as usize + 1);
        payload.push(count);
        payload.extend(1..=count);
        Self::with_payload(10020, Some(payload))
    }

    /// Request specific camera parameters
    pub fn camera_params(ids: &[u8]) -> Result<Self, ProtocolError> {
        if ids.is_empty() || ids.len() > u8::MAX as usize {
            return Err(invalid("CheckCameraInfo", "expected 1 to 255 parameter ids"));
        }
        let mut payload = Vec::with_capacity(ids.len() + 1);
        payload.push(ids.len() as u8);
        payload.extend_from_slice(ids);
        Ok(Self::with_payload(10020, Some(payload)))
    }

    /// SetResolvingBit: frame size selector, bitrate and fps
    pub fn resolving_bit(frame_size: u8, bitrate: u16, fps: u16) -> Result<Self, ProtocolError> {
        let selector = frame_size
            .checked_add(1)
            .ok_or_else(|| invalid("SetResolvingBit", "frame_size out of range"))?;
        let mut payload = Vec::with_capacity(5);
        payload.push(selector);
        payload.extend_from_slice(&bitrate.to_le_bytes());
        payload.extend_from_slice(&fps.to_le_bytes());
        Ok(Self::with_payload(10056, Some(payload)))
    }

    /// SetVideoParam form of [`Command::resolving_bit`] used by portrait cameras
    pub fn doorbell_resolving_bit(frame_size: u8, bitrate: u16, fps: u8) -> Result<Self, ProtocolError> {
        let selector = frame_size
            .checked_add(1)
            .ok_or_else(|| invalid("SetVideoParam", "frame_size out of range"))?;
        let mut payload = Vec::with_capacity(6);
        payload.extend_from_slice(&bitrate.to_le_bytes());
        payload.extend_from_slice(&[selector, fps, 0, 0]);
        Ok(Self::with_payload(10052, Some(payload)))
    }

    /// SetVideoParam carrying a single setting; other fields stay zero
    pub fn video_setting(setting: VideoSetting) -> Result<Self, ProtocolError> {
        const NAME: &str = "SetVideoParam";
        let payload = match setting {
            VideoSetting::Bitrate(bitrate) => {
                in_range(NAME, "bitrate", bitrate as i64, 1, u16::MAX as i64)?;
                let [lo, hi] = bitrate.to_le_bytes();
                vec![lo, hi, 0, 0, 0, 0]
            }
            VideoSetting::Fps(fps) => {
                in_range(NAME, "fps", fps as i64, 1, 30)?;
                vec![0, 0, 0, fps, 0, 0]
            }
            VideoSetting::HorFlip(flip) => vec![0, 0, 0, 0, check_switch(NAME, flip)?, 0],
            VideoSetting::VerFlip(flip) => vec![0, 0, 0, 0, 0, check_switch(NAME, flip)?],
        };
        Ok(Self::with_payload(10052, Some(payload)))
    }

    /// FormatSDCard; the only accepted value is 1
    pub fn format_sd(confirm: u8) -> Result<Self, ProtocolError> {
        if confirm != 1 {
            return Err(invalid("FormatSDCard", "value must be 1"));
        }
        Ok(Self::with_payload(10242, None))
    }

    /// Pan/tilt by a relative number of degrees
    pub fn rotate_by_degree(horizontal: i16, vertical: i16, speed: u8) -> Result<Self, ProtocolError> {
        in_range("SetRotaryByDegree", "speed", speed as i64, 1, 9)?;
        let mut payload = Vec::with_capacity(5);
        payload.extend_from_slice(&horizontal.to_le_bytes());
        payload.extend_from_slice(&vertical.to_le_bytes());
        payload.push(speed);
        Ok(Self::with_payload(11000, Some(payload)))
    }

    /// Pan/tilt one step. Directions: 0 none, 1 left/up, 2 right/down.
    pub fn rotate_by_action(horizontal: u8, vertical: u8, speed: u8) -> Result<Self, ProtocolError> {
        const NAME: &str = "SetRotaryByAction";
        in_range(NAME, "horizontal", horizontal as i64, 0, 2)?;
        in_range(NAME, "vertical", vertical as i64, 0, 2)?;
        in_range(NAME, "speed", speed as i64, 1, 9)?;
        Ok(Self::with_payload(11002, Some(vec![horizontal, vertical, speed])))
    }

    /// Return to a preset position
    pub fn reset_rotation(position: u8) -> Self {
        Self::with_payload(11004, Some(vec![position]))
    }

    /// Replace the pan cruise route
    pub fn cruise_points(points: &[CruisePoint]) -> Result<Self, ProtocolError> {
        const NAME: &str = "SetCruisePoints";
        if points.is_empty() || points.len() > u8::MAX as usize {
            return Err(invalid(NAME, "expected 1 to 255 points"));
        }
        let mut payload = Vec::with_capacity(1 + points.len() * 4);
        payload.push(points.len() as u8);
        for point in points {
            point.validate(NAME)?;
            payload.push(point.vertical);
            payload.extend_from_slice(&point.horizontal.to_le_bytes());
            payload.push(point.time);
        }
        Ok(Self::with_payload(11012, Some(payload)))
    }

    /// Move to an absolute pan/tilt position
    pub fn ptz_position(vertical: u8, horizontal: u16) -> Result<Self, ProtocolError> {
        const NAME: &str = "SetPTZPosition";
        in_range(NAME, "vertical", vertical as i64, 0, 40)?;
        in_range(NAME, "horizontal", horizontal as i64, 0, 350)?;
        let stamp = (unix_now().as_millis() % 1_000_000_000) as u32;
        let mut payload = Vec::with_capacity(7);
        payload.extend_from_slice(&stamp.to_le_bytes());
        payload.push(vertical);
        payload.extend_from_slice(&horizontal.to_le_bytes());
        Ok(Self::with_payload(11018, Some(payload)))
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Code the camera answers with
    pub fn expected_response_code(&self) -> u16 {
        self.code.wrapping_add(1)
    }

    /// Full frame: header plus payload
    pub fn encode(&self) -> Vec<u8> {
        frame::encode(self.code, self.payload())
    }

    /// Interpret the camera's reply payload
    pub fn parse_response(&self, data: Option<&[u8]>) -> Result<Value, ProtocolError> {
        let data = data.unwrap_or_default();
        match self.response {
            ResponseLayout::Raw => Ok(Value::from(data.to_vec())),
            ResponseLayout::Byte | ResponseLayout::MotionAlarm => data
                .first()
                .map(|b| json!(b))
                .ok_or_else(|| self.malformed("empty response")),
            ResponseLayout::Ack => Ok(Value::Bool(data == [1])),
            ResponseLayout::Json => Ok(serde_json::from_slice(data)?),
            ResponseLayout::Text => Ok(Value::String(
                String::from_utf8_lossy(data).trim_end_matches('\0').to_string(),
            )),
            ResponseLayout::VideoParams => {
                let [b0, b1, res, fps, hor_flip, ver_flip] = <[u8; 6]>::try_from(data)
                    .map_err(|_| self.malformed(format!("expected 6 bytes, got {}", data.len())))?;
                Ok(json!({
                    "bitrate": u16::from_le_bytes([b0, b1]),
                    "res": res,
                    "fps": fps,
                    "hor_flip": hor_flip,
                    "ver_flip": ver_flip,
                }))
            }
            ResponseLayout::UnixTime => {
                if data.is_empty() || data.len() > 8 {
                    return Err(self.malformed(format!("bad timestamp width {}", data.len())));
                }
                let value = data
                    .iter()
                    .rev()
                    .fold(0u64, |acc, b| (acc << 8) | *b as u64);
                Ok(json!(value))
            }
            ResponseLayout::BatteryUsage => {
                let raw: Map<String, Value> = serde_json::from_slice(data)?;
                let usage: Map<String, Value> = BATTERY_KEYS
                    .iter()
                    .filter_map(|(key, name)| raw.get(*key).map(|v| (name.to_string(), v.clone())))
                    .collect();
                Ok(Value::Object(usage))
            }
            ResponseLayout::CruisePoints => {
                let records = data.get(1..).unwrap_or_default();
                if records.len() % 4 != 0 {
                    return Err(self.malformed(format!("{} trailing bytes", records.len() % 4)));
                }
                let points: Vec<CruisePoint> = records
                    .chunks_exact(4)
                    .map(|r| CruisePoint {
                        vertical: r[0],
                        horizontal: u16::from_le_bytes([r[1], r[2]]),
                        time: r[3],
                    })
                    .collect();
                Ok(serde_json::to_value(points)?)
            }
            ResponseLayout::CruisePoint => {
                let [t0, t1, t2, t3, vertical, h0, h1] = <[u8; 7]>::try_from(data)
                    .map_err(|_| self.malformed(format!("expected 7 bytes, got {}", data.len())))?;
                Ok(json!({
                    "time": u32::from_le_bytes([t0, t1, t2, t3]),
                    "vertical": vertical,
                    "horizontal": u16::from_le_bytes([h0, h1]),
                }))
            }
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> ProtocolError {
        ProtocolError::MalformedResponse {
            code: self.expected_response_code(),
            reason: reason.into(),
        }
    }
}

fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn invalid(command: &'static str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidParameter {
        command,
        reason: reason.into(),
    }
}

fn in_range(command: &'static str, what: &str, value: i64, min: i64, max: i64) -> Result<i64, ProtocolError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(invalid(command, format!("{what} must be within {min}..={max}, got {value}")))
    }
}

fn to_u8(command: &'static str, what: &str, value: i64) -> Result<u8, ProtocolError> {
    in_range(command, what, value, 0, u8::MAX as i64).map(|v| v as u8)
}

fn to_u16(command: &'static str, what: &str, value: i64) -> Result<u16, ProtocolError> {
    in_range(command, what, value, 0, u16::MAX as i64).map(|v| v as u16)
}

fn to_i16(command: &'static str, what: &str, value: i64) -> Result<i16, ProtocolError> {
    in_range(command, what, value, i16::MIN as i64, i16::MAX as i64).map(|v| v as i16)
}

fn check_switch(command: &'static str, value: u8) -> Result<u8, ProtocolError> {
    match value {
        ON | OFF => Ok(value),
        other => Err(invalid(command, format!("on/off value must be 1 or 2, got {other}"))),
    }
}

/// Integer from a number or numeric string
fn int(command: &'static str, what: &str, value: &Value) -> Result<i64, ProtocolError> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(command, format!("{what} must be an integer, got {value}")))
}

/// On/off value: 1|2, booleans, or on/off words
fn switch(command: &'static str, value: &Value) -> Result<u8, ProtocolError> {
    let word = value.as_str().map(|s| s.trim().to_ascii_lowercase());
    let raw = match (value, word.as_deref()) {
        (Value::Bool(true), _) | (_, Some("on" | "true" | "enable" | "enabled")) => ON as i64,
        (Value::Bool(false), _) | (_, Some("off" | "false" | "disable" | "disabled")) => OFF as i64,
        _ => int(command, "value", value)?,
    };
    check_switch(command, to_u8(command, "value", raw)?)
}

/// Named field of an object, or positional entry of an array
fn field<'a>(param: &'a Value, key: &str, index: usize) -> Option<&'a Value> {
    match param {
        Value::Object(map) => map.get(key),
        Value::Array(items) => items.get(index),
        _ => None,
    }
}

fn required<'a>(command: &'static str, param: &'a Value, key: &str, index: usize) -> Result<&'a Value, ProtocolError> {
    field(param, key, index).ok_or_else(|| invalid(command, format!("missing {key}")))
}

fn optional_int(command: &'static str, param: &Value, key: &str, index: usize, default: i64) -> Result<i64, ProtocolError> {
    match field(param, key, index) {
        Some(value) => int(command, key, value),
        None => Ok(default),
    }
}

/// `[1, 2]`, `"1,2"` or a single id
fn byte_list(command: &'static str, param: &Value) -> Result<Vec<u8>, ProtocolError> {
    match param {
        Value::Array(items) => items
            .iter()
            .map(|v| to_u8(command, "id", int(command, "id", v)?))
            .collect(),
        Value::String(s) => s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| to_u8(command, "id", int(command, "id", &Value::String(part.to_string()))?))
            .collect(),
        other => Ok(vec![to_u8(command, "id", int(command, "id", other)?)?]),
    }
}

fn direction_to_action(command: &'static str, direction: &str) -> Result<(u8, u8), ProtocolError> {
    match direction.trim().to_ascii_lowercase().as_str() {
        "left" => Ok((1, 0)),
        "right" => Ok((2, 0)),
        "up" => Ok((0, 1)),
        "down" => Ok((0, 2)),
        other => Err(invalid(command, format!("unknown direction '{other}'"))),
    }
}
