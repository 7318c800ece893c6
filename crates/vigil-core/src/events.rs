//! Lifecycle event publishing.
//!
//! Publishing is fire-and-forget: implementations log failures and never
//! surface them to the caller, and services publish only after the
//! corresponding state change has been durably persisted.

use serde::Serialize;

/// Event type keys emitted by the core services.
pub mod event_types {
    pub const CA_CREATE: &str = "ca.create";
    pub const CA_ROTATE: &str = "ca.rotate";
    pub const CA_UPDATE: &str = "ca.update";
    pub const CA_DELETE: &str = "ca.delete";
    pub const CA_SIGN: &str = "ca.sign";
    pub const CERTIFICATE_UPDATE: &str = "certificate.update";
    pub const DMS_CREATE: &str = "dms.create";
    pub const DMS_UPDATE: &str = "dms.update";
    pub const DEVICE_CREATE: &str = "device.create";
    pub const DEVICE_UPDATE: &str = "device.update";
}

/// Source strings identifying the emitting subsystem.
pub mod event_sources {
    pub const CA: &str = "vigil.ca";
    pub const DMS: &str = "vigil.dms";
    pub const DEVICE_MANAGER: &str = "vigil.devmanager";
}

/// Sink for lifecycle events. Delivery is at-most-once from the core's
/// point of view.
pub trait EventPublisher: Send + Sync {
    /// Publish one event. Must not fail the caller; implementations
    /// swallow and log delivery errors.
    fn publish(
        &self,
        event_type: &str,
        source: &str,
        payload: serde_json::Value,
    ) -> impl Future<Output = ()> + Send;
}

/// Serialize an entity into an event payload, falling back to `null` if
/// the entity cannot be serialized (which is a bug, not a runtime error
/// worth failing an operation over).
pub fn payload_of<T: Serialize>(entity: &T) -> serde_json::Value {
    serde_json::to_value(entity).unwrap_or(serde_json::Value::Null)
}
