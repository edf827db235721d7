use serde::{Deserialize, Serialize};

/// A visibility transition for a site, as persisted and queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteEvent {
    pub timestamp_ms: u64,
    pub fqdn: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Stop,
}

impl WebsiteEvent {
    pub fn start(timestamp_ms: u64, fqdn: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            fqdn: fqdn.into(),
            kind: EventKind::Start,
        }
    }

    pub fn stop(timestamp_ms: u64, fqdn: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            fqdn: fqdn.into(),
            kind: EventKind::Stop,
        }
    }
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Stop => "stop",
        }
    }
}

pub fn parse_kind(s: &str) -> EventKind {
    match s {
        "stop" => EventKind::Stop,
        _ => EventKind::Start, // Fallback
    }
}
