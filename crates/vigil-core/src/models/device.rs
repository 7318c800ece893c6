//! Device domain model: identity slots, extra slots, and the device log.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::certificate::Certificate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    NoIdentity,
    Active,
    Revoked,
    Decommissioned,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotKind {
    X509,
    Other,
}

/// A versioned credential container on a device.
///
/// Versions are append-only: reenrollment adds `active_version + 1` and
/// never mutates an existing entry, so the full credential history stays
/// retrievable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot<T> {
    pub dms_managed: bool,
    pub active_version: u32,
    /// Version-indexed secrets; keys are stringified version numbers so
    /// the map survives JSON round-trips.
    pub secrets: HashMap<String, T>,
    pub preventive_reenrollment_delta_secs: i64,
    pub critical_reenrollment_delta_secs: i64,
    pub kind: SlotKind,
}

impl<T> Slot<T> {
    pub fn active_secret(&self) -> Option<&T> {
        self.secrets.get(&self.active_version.to_string())
    }

    pub fn secret_at(&self, version: u32) -> Option<&T> {
        self.secrets.get(&version.to_string())
    }

    /// Append a new version and make it active. Returns the new version.
    pub fn push_version(&mut self, secret: T) -> u32 {
        let version = if self.secrets.is_empty() {
            0
        } else {
            self.active_version + 1
        };
        self.secrets.insert(version.to_string(), secret);
        self.active_version = version;
        version
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogSeverity {
    Info,
    Warn,
    Error,
}

/// Append-only device log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceLog {
    pub timestamp: DateTime<Utc>,
    pub severity: LogSeverity,
    pub message: String,
}

impl DeviceLog {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity: LogSeverity::Info,
            message: message.into(),
        }
    }
}

/// An enrolled (or enrollable) device owned by a DMS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub alias: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub dms_owner_id: String,
    pub status: DeviceStatus,
    /// The primary X.509 credential slot, populated on first enrollment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_slot: Option<Slot<Certificate>>,
    #[serde(default)]
    pub extra_slots: HashMap<String, Slot<String>>,
    #[serde(default)]
    pub logs: Vec<DeviceLog>,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency token, incremented on every update.
    #[serde(default)]
    pub revision: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_versions_are_append_only() {
        let mut slot: Slot<String> = Slot {
            dms_managed: false,
            active_version: 0,
            secrets: HashMap::new(),
            preventive_reenrollment_delta_secs: 0,
            critical_reenrollment_delta_secs: 0,
            kind: SlotKind::Other,
        };

        assert_eq!(slot.push_version("v0".into()), 0);
        assert_eq!(slot.push_version("v1".into()), 1);
        assert_eq!(slot.active_version, 1);
        assert_eq!(slot.active_secret().unwrap(), "v1");
        // The previous version stays retrievable.
        assert_eq!(slot.secret_at(0).unwrap(), "v0");
    }
}
