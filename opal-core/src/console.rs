//! Console log records for the peer log stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Console log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Fatal,
    Error,
    Warning,
    #[default]
    Info,
}

impl LogLevel {
    fn bit(self) -> u8 {
        match self {
            Self::Fatal => 1,
            Self::Error => 1 << 1,
            Self::Warning => 1 << 2,
            Self::Info => 1 << 3,
        }
    }

    /// Lower is more severe.
    pub fn priority(self) -> u8 {
        match self {
            Self::Fatal => 0,
            Self::Error => 1,
            Self::Warning => 2,
            Self::Info => 3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fatal" => Some(Self::Fatal),
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

/// Severity selection for a console log subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMask(u8);

impl LogMask {
    pub const ALL: LogMask = LogMask(0b1111);

    pub fn of(levels: &[LogLevel]) -> Self {
        LogMask(levels.iter().fold(0, |acc, l| acc | l.bit()))
    }

    pub fn contains(self, level: LogLevel) -> bool {
        self.0 & level.bit() != 0
    }
}

impl Default for LogMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// One console log line. The zero value is the stream keep-alive envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub node_name: String,
    pub time: Option<DateTime<Utc>>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
}

impl LogRecord {
    pub fn new(node_name: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            time: Some(Utc::now()),
            level,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn is_keep_alive(&self) -> bool {
        self.time.is_none()
    }
}
