//! Small value types shared across the Scene Runtime, State Store and
//! Device Handle. Kept separate to avoid a knot of circular `use`s between
//! those modules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque device identifier. In practice an IPv4 literal, but treated as
/// an arbitrary byte-exact string by every component that isn't the HTTP
/// driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        DeviceId(s)
    }
}

/// Which concrete driver backs a device. Hot-swappable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Real,
    Mock,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Real => f.write_str("real"),
            DriverKind::Mock => f.write_str("mock"),
        }
    }
}

impl std::str::FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "real" => Ok(DriverKind::Real),
            "mock" => Ok(DriverKind::Mock),
            other => Err(format!("unknown driver kind '{other}'")),
        }
    }
}

/// Transitional machine state. See spec §3 `DeviceRuntimeState.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Switching,
    Running,
    Stopping,
    Paused,
    Stopped,
}

/// Client-visible playback control, distinct from `Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
}

/// Advisory per-device logging level, persisted but only ever used to
/// derive a `tracing` filter directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Debug,
    Info,
    Warning,
    Error,
    Silent,
}

impl LoggingLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LoggingLevel::Debug => "debug",
            LoggingLevel::Info => "info",
            LoggingLevel::Warning => "warn",
            LoggingLevel::Error => "error",
            LoggingLevel::Silent => "off",
        }
    }
}
