//! Scene Runtime (spec §4.4): the per-device state machine and cooperative
//! scheduler. This is the core the rest of the daemon is built around.
//!
//! Per-device command methods (`switch_scene`, `pause_scene`, ...) are
//! expected to be invoked in receive order for a given device — the
//! Command Router owns that ordering guarantee (spec §5 "commands to the
//! same device are processed in receive order"); this module does not
//! re-serialize them itself beyond what the `devices` lock naturally
//! provides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::device::DeviceHandle;
use crate::error::PidiconError;
use crate::scene::registry::SceneRegistry;
use crate::scene::{RenderContext, RenderOutcome, SceneModule};
use crate::store::StateStore;
use crate::types::{DeviceId, DriverKind, PlayState, Status};

const DEFAULT_CONSECUTIVE_ERROR_THRESHOLD: u32 = 5;

enum Hook {
    Init,
    Cleanup,
}

pub struct SceneRuntime {
    store: Arc<StateStore>,
    registry: Arc<SceneRegistry>,
    devices: Arc<AsyncMutex<HashMap<DeviceId, DeviceHandle>>>,
    loops: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
    error_threshold: u32,
}

impl SceneRuntime {
    pub fn new(store: Arc<StateStore>, registry: Arc<SceneRegistry>) -> Self {
        SceneRuntime {
            store,
            registry,
            devices: Arc::new(AsyncMutex::new(HashMap::new())),
            loops: Mutex::new(HashMap::new()),
            error_threshold: DEFAULT_CONSECUTIVE_ERROR_THRESHOLD,
        }
    }

    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub async fn register_device(&self, device_id: DeviceId, kind: DriverKind, host: &str) {
        self.store.ensure_device(&device_id);
        let handle = DeviceHandle::new(device_id.clone(), kind, host);
        self.devices.lock().await.insert(device_id, handle);
    }

    pub fn device_state(&self, device_id: &DeviceId) -> crate::store::DeviceRuntimeState {
        self.store.runtime_state(device_id)
    }

    /// Stops tracking the device's current loop task and bumps its loop
    /// epoch. Does *not* abort the task: the spec is explicit that an
    /// in-flight `render` is never preempted, only its result suppressed by
    /// the fence once it completes. Bumping the epoch here — immediately,
    /// before any cleanup/init work the caller does next — is what makes
    /// that fence effective right away: a render already in flight under
    /// the old epoch will find the epoch changed out from under it as soon
    /// as it checks, rather than only after the whole switch finishes (spec
    /// §5: "cancels the outstanding loop handle immediately and marks a new
    /// generation").
    fn cancel_loop(&self, device_id: &DeviceId) {
        self.loops.lock().expect("loops mutex poisoned").remove(device_id);
        self.store.bump_loop_epoch(device_id);
    }

    /// Spawns a fresh loop task under a newly bumped epoch. Every call gets
    /// its own epoch, so a still-sleeping task from a prior `spawn_loop`
    /// (e.g. one left over from before a pause) is fenced out the instant
    /// this one starts, even if `generation_id` itself hasn't changed —
    /// which is what keeps pause-then-resume from ever running two tickers
    /// for the same device concurrently.
    fn spawn_loop(&self, device_id: DeviceId, generation: u64, initial_delay: Duration) {
        let epoch = self.store.bump_loop_epoch(&device_id);
        let store = self.store.clone();
        let registry = self.registry.clone();
        let devices = self.devices.clone();
        let error_threshold = self.error_threshold;

        let handle = tokio::spawn(run_loop(
            store,
            registry,
            devices,
            device_id.clone(),
            generation,
            epoch,
            error_threshold,
            initial_delay,
        ));

        // Replacing, not aborting: a stale previous task (if one is still
        // mid-render) just detaches and exits on its own next fence check.
        self.loops.lock().expect("loops mutex poisoned").insert(device_id, handle);
    }

    async fn run_hook(
        &self,
        device_id: &DeviceId,
        scene_name: &str,
        scene: &Arc<dyn SceneModule>,
        payload: &HashMap<String, Value>,
        generation_id: u64,
        hook: Hook,
    ) -> Result<(), PidiconError> {
        let mut devices = self.devices.lock().await;
        let device_handle = devices
            .get_mut(device_id)
            .ok_or_else(|| PidiconError::DeviceNotFound { device_id: device_id.clone() })?;
        let mut ctx = RenderContext::new(
            device_handle,
            device_id.clone(),
            scene_name.to_string(),
            generation_id,
            payload,
            self.store.clone(),
        );
        let result = match hook {
            Hook::Init => scene.init(&mut ctx).await,
            Hook::Cleanup => scene.cleanup(&mut ctx).await,
        };
        result.map_err(|err| PidiconError::SceneRender {
            device_id: device_id.clone(),
            scene_name: scene_name.to_string(),
            generation_id,
            message: err.to_string(),
        })
    }

    /// Renders one frame and, if that succeeds, pushes it. Push failures
    /// are recorded but do not fail the call — only a `render` failure
    /// does, per spec §7.
    async fn render_once(
        &self,
        device_id: &DeviceId,
        scene_name: &str,
        scene: &Arc<dyn SceneModule>,
        payload: &HashMap<String, Value>,
        generation_id: u64,
    ) -> Result<RenderOutcome, PidiconError> {
        let mut devices = self.devices.lock().await;
        let device_handle = devices
            .get_mut(device_id)
            .ok_or_else(|| PidiconError::DeviceNotFound { device_id: device_id.clone() })?;

        let outcome = {
            let mut ctx = RenderContext::new(
                device_handle,
                device_id.clone(),
                scene_name.to_string(),
                generation_id,
                payload,
                self.store.clone(),
            );
            scene.render(&mut ctx).await.map_err(|err| PidiconError::SceneRender {
                device_id: device_id.clone(),
                scene_name: scene_name.to_string(),
                generation_id,
                message: err.to_string(),
            })?
        };

        match device_handle.push().await {
            Ok(frametime) => {
                self.store.record_push(device_id, frametime.as_millis() as u64);
            }
            Err(err) => {
                tracing::warn!(device = %device_id, %err, "driver push failed");
                let consecutive = self.store.record_error(device_id);
                if consecutive >= self.error_threshold {
                    tracing::error!(device = %device_id, consecutive, "consecutive push error threshold exceeded");
                    self.store.set_play_state(device_id, PlayState::Stopped);
                    self.store.set_status(device_id, Status::Stopped);
                }
            }
        }

        Ok(outcome)
    }

    /// `switchScene` (spec §4.4): stop any prior scene, init the new one,
    /// stamp a fresh generation, start the loop (or render once).
    pub async fn switch_scene(
        &self,
        device_id: &DeviceId,
        scene_name: &str,
        payload: HashMap<String, Value>,
    ) -> Result<(), PidiconError> {
        self.store.set_status(device_id, Status::Switching);

        let prior = self.store.runtime_state(device_id);
        if let Some(prior_scene_name) = prior.active_scene.clone() {
            self.store.set_status(device_id, Status::Stopping);
            self.cancel_loop(device_id);
            if let Some(prior_scene) = self.registry.get(&prior_scene_name) {
                if let Err(err) = self
                    .run_hook(device_id, &prior_scene_name, &prior_scene, &payload, prior.generation_id, Hook::Cleanup)
                    .await
                {
                    tracing::warn!(device = %device_id, %err, "prior scene cleanup failed, continuing switch");
                }
            }
            self.store.set_loop_scheduled(device_id, false);
        }

        let scene = match self.registry.get(scene_name) {
            Some(scene) => scene,
            None => {
                self.store.set_status(device_id, Status::Idle);
                return Err(PidiconError::SceneNotFound {
                    device_id: device_id.clone(),
                    scene_name: scene_name.to_string(),
                });
            }
        };

        let tentative_generation = prior.generation_id + 1;
        if let Err(err) = self
            .run_hook(device_id, scene_name, &scene, &payload, tentative_generation, Hook::Init)
            .await
        {
            self.store.set_status(device_id, Status::Idle);
            return Err(err);
        }

        let new_generation = self.store.bump_generation(device_id);
        self.store.set_active_scene(device_id, Some(scene_name.to_string()));
        self.store.set_status(device_id, Status::Running);
        self.store.set_play_state(device_id, PlayState::Playing);

        if scene.wants_loop() {
            self.store.set_loop_scheduled(device_id, true);
            self.spawn_loop(device_id.clone(), new_generation, Duration::ZERO);
        } else if let Err(err) = self.render_once(device_id, scene_name, &scene, &payload, new_generation).await {
            tracing::warn!(device = %device_id, %err, "single-shot scene render failed");
            self.store.record_error(device_id);
        }

        Ok(())
    }

    pub async fn pause_scene(&self, device_id: &DeviceId) {
        self.cancel_loop(device_id);
        self.store.set_status(device_id, Status::Paused);
        self.store.set_play_state(device_id, PlayState::Paused);
        self.store.set_loop_scheduled(device_id, false);
    }

    pub async fn resume_scene(&self, device_id: &DeviceId) {
        let state = self.store.runtime_state(device_id);
        if state.play_state == PlayState::Playing {
            return;
        }
        let Some(scene_name) = state.active_scene.clone() else {
            tracing::warn!(device = %device_id, "resume requested but no active scene");
            return;
        };
        let Some(scene) = self.registry.get(&scene_name) else {
            return;
        };
        if !scene.wants_loop() {
            return;
        }

        self.store.set_play_state(device_id, PlayState::Playing);
        self.store.set_status(device_id, Status::Running);
        self.store.set_loop_scheduled(device_id, true);
        self.spawn_loop(device_id.clone(), state.generation_id, Duration::ZERO);
    }

    pub async fn stop_scene(&self, device_id: &DeviceId) {
        self.cancel_loop(device_id);
        self.store.set_status(device_id, Status::Stopped);
        self.store.set_play_state(device_id, PlayState::Stopped);
        self.store.set_loop_scheduled(device_id, false);
    }

    /// `updateSceneParameters` (spec §4.4): merges `payload` into the scene
    /// bag, re-runs `cleanup`+`init` to apply new defaults, renders once.
    pub async fn update_scene_parameters(
        &self,
        device_id: &DeviceId,
        scene_name: &str,
        payload: HashMap<String, Value>,
    ) -> Result<(), PidiconError> {
        let state = self.store.runtime_state(device_id);
        if state.active_scene.as_deref() != Some(scene_name) {
            return self.switch_scene(device_id, scene_name, payload).await;
        }

        let scene = self.registry.get(scene_name).ok_or_else(|| PidiconError::SceneNotFound {
            device_id: device_id.clone(),
            scene_name: scene_name.to_string(),
        })?;

        for (key, value) in &payload {
            if key == "scene" {
                continue;
            }
            self.store.scene_set(device_id, scene_name, key, value.clone());
        }

        if let Err(err) = self
            .run_hook(device_id, scene_name, &scene, &payload, state.generation_id, Hook::Cleanup)
            .await
        {
            tracing::warn!(device = %device_id, %err, "scene cleanup failed during parameter update, continuing");
        }
        self.run_hook(device_id, scene_name, &scene, &payload, state.generation_id, Hook::Init).await?;

        if let Err(err) = self.render_once(device_id, scene_name, &scene, &payload, state.generation_id).await {
            tracing::warn!(device = %device_id, %err, "render after parameter update failed");
            self.store.record_error(device_id);
        }

        if scene.wants_loop() && !state.loop_scheduled {
            let new_generation = self.store.bump_generation(device_id);
            self.store.set_loop_scheduled(device_id, true);
            self.spawn_loop(device_id.clone(), new_generation, Duration::ZERO);
        }

        Ok(())
    }

    /// `driver/set`: hot-swaps the driver and re-renders the active scene
    /// once so the new driver starts from a consistent frame.
    pub async fn switch_driver(&self, device_id: &DeviceId, kind: DriverKind, host: &str) -> Result<(), PidiconError> {
        {
            let mut devices = self.devices.lock().await;
            let device_handle = devices
                .get_mut(device_id)
                .ok_or_else(|| PidiconError::DeviceNotFound { device_id: device_id.clone() })?;
            device_handle.switch_driver(kind, host);
        }
        self.rerender_active_scene(device_id).await;
        Ok(())
    }

    pub async fn set_brightness(&self, device_id: &DeviceId, percent: u8) -> Result<(), PidiconError> {
        {
            let mut devices = self.devices.lock().await;
            let device_handle = devices
                .get_mut(device_id)
                .ok_or_else(|| PidiconError::DeviceNotFound { device_id: device_id.clone() })?;
            device_handle.set_brightness(percent).await?;
        }
        self.store.set_brightness(device_id, percent);
        Ok(())
    }

    pub async fn set_power(&self, device_id: &DeviceId, on: bool) -> Result<(), PidiconError> {
        {
            let mut devices = self.devices.lock().await;
            let device_handle = devices
                .get_mut(device_id)
                .ok_or_else(|| PidiconError::DeviceNotFound { device_id: device_id.clone() })?;
            device_handle.set_power(on).await?;
        }
        self.store.set_display_on(device_id, on);
        Ok(())
    }

    /// `reset/set`: "soft reset" — flip to the init channel briefly, then
    /// restore whatever scene was active.
    pub async fn soft_reset(&self, device_id: &DeviceId) -> Result<(), PidiconError> {
        {
            let mut devices = self.devices.lock().await;
            let device_handle = devices
                .get_mut(device_id)
                .ok_or_else(|| PidiconError::DeviceNotFound { device_id: device_id.clone() })?;
            device_handle.reset().await?;
        }
        self.rerender_active_scene(device_id).await;
        Ok(())
    }

    async fn rerender_active_scene(&self, device_id: &DeviceId) {
        let state = self.store.runtime_state(device_id);
        let Some(scene_name) = state.active_scene.clone() else { return };
        let Some(scene) = self.registry.get(&scene_name) else { return };
        if let Err(err) = self
            .render_once(device_id, &scene_name, &scene, &HashMap::new(), state.generation_id)
            .await
        {
            tracing::warn!(device = %device_id, %err, "re-render after driver/reset change failed");
        }
    }
}

/// One device's cooperative loop. The loop epoch and play state are checked
/// before rendering (early exit on a stale or paused tick) and re-checked
/// after (suppress push/reschedule if a cancellation landed while `render`
/// was in flight). The epoch — not `generation_id` — is the fence: it is
/// bumped by `SceneRuntime::cancel_loop` the instant a switch/pause/stop
/// starts cancelling, and again by `spawn_loop` every time a new loop task
/// starts, so a render already in flight under a stale epoch can never push
/// or reschedule, regardless of how long the cancelling caller's own
/// cleanup/init takes. `render` itself is never preempted — cancelling a
/// device's loop only stops tracking its `JoinHandle` (see
/// `SceneRuntime::cancel_loop`); an already-running tick keeps holding the
/// `devices` lock until it finishes, which is also what keeps two ticks for
/// the same device from ever running concurrently across a switch.
#[allow(clippy::too_many_arguments)]
async fn run_loop(
    store: Arc<StateStore>,
    registry: Arc<SceneRegistry>,
    devices: Arc<AsyncMutex<HashMap<DeviceId, DeviceHandle>>>,
    device_id: DeviceId,
    generation: u64,
    epoch: u64,
    error_threshold: u32,
    mut delay: Duration,
) {
    let empty_payload: HashMap<String, Value> = HashMap::new();

    loop {
        tokio::time::sleep(delay).await;

        let state = store.runtime_state(&device_id);
        if state.loop_epoch != epoch || state.play_state != PlayState::Playing {
            store.record_skip(&device_id);
            return;
        }
        let Some(scene_name) = state.active_scene.clone() else { return };
        let Some(scene) = registry.get(&scene_name) else { return };

        let mut devices_guard = devices.lock().await;
        let Some(device_handle) = devices_guard.get_mut(&device_id) else { return };

        let render_result = {
            let mut ctx = RenderContext::new(
                device_handle,
                device_id.clone(),
                scene_name.clone(),
                generation,
                &empty_payload,
                store.clone(),
            );
            scene.render(&mut ctx).await
        };

        // Post-render fence: a switch or pause landed while we were awaiting
        // render. The render itself already ran to completion (no
        // preemption) but its result must not be pushed or rescheduled.
        let state_after = store.runtime_state(&device_id);
        if state_after.loop_epoch != epoch || state_after.play_state != PlayState::Playing {
            drop(devices_guard);
            store.record_skip(&device_id);
            return;
        }

        let outcome = match render_result {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(device = %device_id, %err, "scene render failed, ending loop for this generation");
                drop(devices_guard);
                store.record_error(&device_id);
                store.set_loop_scheduled(&device_id, false);
                return;
            }
        };

        match device_handle.push().await {
            Ok(frametime) => store.record_push(&device_id, frametime.as_millis() as u64),
            Err(err) => {
                tracing::warn!(device = %device_id, %err, "driver push failed");
                let consecutive = store.record_error(&device_id);
                if consecutive >= error_threshold {
                    tracing::error!(device = %device_id, consecutive, "consecutive push error threshold exceeded, stopping device");
                    drop(devices_guard);
                    store.set_play_state(&device_id, PlayState::Stopped);
                    store.set_status(&device_id, Status::Stopped);
                    store.set_loop_scheduled(&device_id, false);
                    return;
                }
            }
        }
        drop(devices_guard);

        match outcome {
            RenderOutcome::Continue { interval } => {
                delay = interval;
                continue;
            }
            RenderOutcome::Finished => {
                store.set_loop_scheduled(&device_id, false);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::registry::discover;
    use std::path::Path;

    fn test_runtime() -> SceneRuntime {
        let store = StateStore::new(
            std::env::temp_dir().join(format!("pidicon-runtime-test-{}", std::process::id())),
            Duration::from_secs(60),
        );
        let registry = Arc::new(discover(&[Path::new("/nonexistent")]));
        SceneRuntime::new(store, registry)
    }

    #[tokio::test]
    async fn switching_to_unknown_scene_leaves_generation_unchanged() {
        let runtime = test_runtime();
        let device = DeviceId::from("10.0.0.1");
        runtime.register_device(device.clone(), DriverKind::Mock, "10.0.0.1").await;

        runtime.switch_scene(&device, "empty", HashMap::new()).await.unwrap();
        let before = runtime.device_state(&device);

        let err = runtime.switch_scene(&device, "does-not-exist", HashMap::new()).await;
        assert!(err.is_err());

        let after = runtime.device_state(&device);
        assert_eq!(before.generation_id, after.generation_id);
        assert_eq!(before.active_scene, after.active_scene);
        assert_eq!(before.play_state, after.play_state);
    }

    #[tokio::test]
    async fn switch_scene_bumps_generation() {
        let runtime = test_runtime();
        let device = DeviceId::from("10.0.0.1");
        runtime.register_device(device.clone(), DriverKind::Mock, "10.0.0.1").await;

        runtime.switch_scene(&device, "empty", HashMap::new()).await.unwrap();
        let g1 = runtime.device_state(&device).generation_id;
        runtime.switch_scene(&device, "fill", HashMap::new()).await.unwrap();
        let g2 = runtime.device_state(&device).generation_id;

        assert!(g2 > g1);
    }

    #[tokio::test]
    async fn pause_is_idempotent() {
        let runtime = test_runtime();
        let device = DeviceId::from("10.0.0.1");
        runtime.register_device(device.clone(), DriverKind::Mock, "10.0.0.1").await;
        runtime.switch_scene(&device, "fill", HashMap::new()).await.unwrap();

        runtime.pause_scene(&device).await;
        let once = runtime.device_state(&device);
        runtime.pause_scene(&device).await;
        let twice = runtime.device_state(&device);

        assert_eq!(once.play_state, twice.play_state);
        assert_eq!(once.status, twice.status);
    }
}
