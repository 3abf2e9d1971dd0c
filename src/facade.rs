//! Service Facade (spec §2): a thin, `Arc`-cloneable API over the Scene
//! Runtime for alternate transports (e.g. an HTTP admin surface) that
//! shouldn't need to know about MQTT topics at all. Carries no logic of
//! its own — every method is a direct delegation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::PidiconError;
use crate::runtime::SceneRuntime;
use crate::store::DeviceRuntimeState;
use crate::types::{DeviceId, DriverKind};

#[derive(Clone)]
pub struct ServiceFacade {
    runtime: Arc<SceneRuntime>,
}

impl ServiceFacade {
    pub fn new(runtime: Arc<SceneRuntime>) -> Self {
        ServiceFacade { runtime }
    }

    pub async fn switch_scene(
        &self,
        device_id: &DeviceId,
        scene_name: &str,
        payload: HashMap<String, Value>,
    ) -> Result<(), PidiconError> {
        self.runtime.switch_scene(device_id, scene_name, payload).await
    }

    pub async fn pause_scene(&self, device_id: &DeviceId) {
        self.runtime.pause_scene(device_id).await
    }

    pub async fn resume_scene(&self, device_id: &DeviceId) {
        self.runtime.resume_scene(device_id).await
    }

    pub async fn stop_scene(&self, device_id: &DeviceId) {
        self.runtime.stop_scene(device_id).await
    }

    pub async fn update_scene_parameters(
        &self,
        device_id: &DeviceId,
        scene_name: &str,
        payload: HashMap<String, Value>,
    ) -> Result<(), PidiconError> {
        self.runtime.update_scene_parameters(device_id, scene_name, payload).await
    }

    pub async fn switch_driver(&self, device_id: &DeviceId, kind: DriverKind, host: &str) -> Result<(), PidiconError> {
        self.runtime.switch_driver(device_id, kind, host).await
    }

    pub async fn set_brightness(&self, device_id: &DeviceId, percent: u8) -> Result<(), PidiconError> {
        self.runtime.set_brightness(device_id, percent).await
    }

    pub async fn set_power(&self, device_id: &DeviceId, on: bool) -> Result<(), PidiconError> {
        self.runtime.set_power(device_id, on).await
    }

    pub async fn soft_reset(&self, device_id: &DeviceId) -> Result<(), PidiconError> {
        self.runtime.soft_reset(device_id).await
    }

    pub fn device_state(&self, device_id: &DeviceId) -> DeviceRuntimeState {
        self.runtime.device_state(device_id)
    }
}
