//! Scene contract (spec §4.4): the interface every render function
//! implements, plus the context and outcome types passed across it.

pub mod builtin;
pub mod registry;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::device::DeviceHandle;
use crate::error::PidiconError;
use crate::store::StateStore;
use crate::types::DeviceId;
use std::sync::Arc;

/// What a scene hands back after a render tick, telling the runtime when to
/// come back (or not to).
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// Draw again after `interval`.
    Continue { interval: Duration },
    /// This scene has nothing further to draw; runtime falls back to idle.
    Finished,
}

impl RenderOutcome {
    pub fn continue_after(interval: Duration) -> Self {
        RenderOutcome::Continue { interval }
    }
}

/// Everything a scene needs to draw one frame. Borrowed for the duration of
/// a single `render` call; scenes must not retain it past that call.
pub struct RenderContext<'a> {
    pub device: &'a mut DeviceHandle,
    pub device_id: DeviceId,
    pub scene_name: String,
    pub generation_id: u64,
    pub parameters: &'a HashMap<String, Value>,
    store: Arc<StateStore>,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        device: &'a mut DeviceHandle,
        device_id: DeviceId,
        scene_name: String,
        generation_id: u64,
        parameters: &'a HashMap<String, Value>,
        store: Arc<StateStore>,
    ) -> Self {
        RenderContext {
            device,
            device_id,
            scene_name,
            generation_id,
            parameters,
            store,
        }
    }

    /// Reads this scene's private, per-device persisted value for `key`.
    pub fn state_get(&self, key: &str, default: Value) -> Value {
        self.store.scene_get(&self.device_id, &self.scene_name, key, default)
    }

    pub fn state_set(&self, key: &str, value: Value) {
        self.store.scene_set(&self.device_id, &self.scene_name, key, value);
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }
}

/// The contract every scene implements. `name()` and `tags()` are cheap and
/// synchronous since the registry calls them during discovery, well before
/// any device is attached; `render` is the hot path invoked once per tick.
#[async_trait]
pub trait SceneModule: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the runtime should keep scheduling ticks after the first
    /// render, or treat this as a single-shot scene.
    fn wants_loop(&self) -> bool {
        true
    }

    /// Free-form descriptive tags, derived from the scene's file path at
    /// discovery time (see `registry::discover`). Default is untagged.
    fn tags(&self) -> &[String] {
        &[]
    }

    /// Renders one frame into `ctx.device` and reports when to be called
    /// again. Implementations should not block; any I/O beyond drawing
    /// calls belongs behind `ctx.device`'s driver.
    async fn render(&self, ctx: &mut RenderContext<'_>) -> Result<RenderOutcome, PidiconError>;

    /// Called once when a scene becomes active on a device, before the
    /// first `render`. Default is a no-op; scenes that need to reset their
    /// persisted state on every fresh switch override this.
    async fn init(&self, _ctx: &mut RenderContext<'_>) -> Result<(), PidiconError> {
        Ok(())
    }

    /// Called once when a scene is switched away from or stopped. Default
    /// is a no-op.
    async fn cleanup(&self, _ctx: &mut RenderContext<'_>) -> Result<(), PidiconError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continue_after_wraps_interval() {
        let outcome = RenderOutcome::continue_after(Duration::from_millis(200));
        assert_eq!(outcome, RenderOutcome::Continue { interval: Duration::from_millis(200) });
    }
}
