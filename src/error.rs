//! The §7 error taxonomy. Every variant that can cross the Scene Runtime
//! boundary carries the `{device_id, scene_name, generation_id}` context
//! spec.md asks for, so a log line or an outbound MQTT `error` event never
//! has to reconstruct it from scratch.

use crate::types::DeviceId;

#[derive(Debug, thiserror::Error)]
pub enum PidiconError {
    #[error("validation failed{}: {message}", device_id.as_ref().map(|d| format!(" for {d}")).unwrap_or_default())]
    Validation {
        device_id: Option<DeviceId>,
        message: String,
    },

    #[error("device '{device_id}' is not configured")]
    DeviceNotFound { device_id: DeviceId },

    #[error("scene '{scene_name}' not found for device '{device_id}'")]
    SceneNotFound {
        device_id: DeviceId,
        scene_name: String,
    },

    #[error("device transport error on '{device_id}': {message}")]
    DeviceTransport { device_id: DeviceId, message: String },

    #[error(
        "scene '{scene_name}' on '{device_id}' (generation {generation_id}) failed: {message}"
    )]
    SceneRender {
        device_id: DeviceId,
        scene_name: String,
        generation_id: u64,
        message: String,
    },

    #[error("persistence error: {message}")]
    Persistence { message: String },

    #[error("mqtt transport disconnected: {message}")]
    TransportDisconnect { message: String },
}

impl PidiconError {
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            PidiconError::Validation { device_id, .. } => device_id.as_ref(),
            PidiconError::DeviceNotFound { device_id }
            | PidiconError::SceneNotFound { device_id, .. }
            | PidiconError::DeviceTransport { device_id, .. }
            | PidiconError::SceneRender { device_id, .. } => Some(device_id),
            PidiconError::Persistence { .. } | PidiconError::TransportDisconnect { .. } => None,
        }
    }

    /// The taxonomy kind as a stable string, used in structured `error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            PidiconError::Validation { .. } => "validation",
            PidiconError::DeviceNotFound { .. } => "not_found",
            PidiconError::SceneNotFound { .. } => "not_found",
            PidiconError::DeviceTransport { .. } => "device_transport",
            PidiconError::SceneRender { .. } => "scene_render",
            PidiconError::Persistence { .. } => "persistence",
            PidiconError::TransportDisconnect { .. } => "transport_disconnect",
        }
    }
}
