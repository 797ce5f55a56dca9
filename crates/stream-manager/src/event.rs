//! Inbound media-server and device events

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Media server is publishing the stream
    Ready,
    /// Media server stopped publishing
    NotReady,
    /// A client started reading the stream
    Read,
    /// A client stopped reading the stream
    Unread,
    Motion,
    MotionClear,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::NotReady => "not_ready",
            Self::Read => "read",
            Self::Unread => "unread",
            Self::Motion => "motion",
            Self::MotionClear => "motion_clear",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ready" => Ok(Self::Ready),
            "not_ready" | "notready" => Ok(Self::NotReady),
            "read" => Ok(Self::Read),
            "unread" => Ok(Self::Unread),
            "motion" => Ok(Self::Motion),
            "motion_clear" => Ok(Self::MotionClear),
            other => Err(format!("unknown event '{other}'")),
        }
    }
}

/// Event for one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub uri: String,
    pub kind: EventKind,
}

impl StreamEvent {
    pub fn new(uri: impl Into<String>, kind: EventKind) -> Self {
        Self {
            uri: uri.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_kind() {
        assert_eq!("ready".parse::<EventKind>(), Ok(EventKind::Ready));
        assert_eq!("notReady".parse::<EventKind>(), Ok(EventKind::NotReady));
        assert_eq!("motion-clear".parse::<EventKind>(), Ok(EventKind::MotionClear));
        assert!("explode".parse::<EventKind>().is_err());
    }
}
