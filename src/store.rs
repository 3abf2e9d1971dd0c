//! State Store (spec §4.3): the single source of truth for global, per-device
//! and per-(device,scene) state, with debounced write-through persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

use crate::error::PidiconError;
use crate::types::{DeviceId, LoggingLevel, PlayState, Status};

/// Fields the §3 table lists as persisted. Everything else on
/// `DeviceRuntimeState` (generation, loop epoch, status, loop scheduling,
/// metrics) is transient and never written to disk.
const PERSISTED_FIELDS_NOTE: &str = "activeScene, playState, brightness, displayOn, loggingLevel";

#[derive(Debug, Clone)]
pub struct DeviceRuntimeState {
    pub active_scene: Option<String>,
    pub generation_id: u64,
    pub status: Status,
    pub play_state: PlayState,
    /// Whether a loop tick is currently scheduled for this device. The
    /// concrete cancellation token (a tokio task handle) lives in the Scene
    /// Runtime, not here — this is the store-visible reflection of it.
    pub loop_scheduled: bool,
    /// Bumped every time the runtime cancels or (re)spawns a device's loop
    /// task — on pause, stop, switch, resume and parameter-update restarts.
    /// Distinct from `generation_id`, which only advances once per
    /// successful `switchScene` and is the client-visible scene identity;
    /// `loop_epoch` exists purely so an already in-flight `render` (started
    /// before a cancellation landed) is fenced out of pushing or
    /// rescheduling the moment the cancellation happens, not only once the
    /// next switch's init has finished.
    pub loop_epoch: u64,
    pub brightness: u8,
    pub display_on: bool,
    pub logging_level: Option<LoggingLevel>,
    pub last_frametime_ms: Option<u64>,
    pub pushes: u64,
    pub skipped: u64,
    pub errors: u64,
    pub consecutive_errors: u32,
    pub last_seen_ts_ms: Option<i64>,
}

impl Default for DeviceRuntimeState {
    fn default() -> Self {
        DeviceRuntimeState {
            active_scene: None,
            generation_id: 0,
            status: Status::Idle,
            play_state: PlayState::Stopped,
            loop_scheduled: false,
            loop_epoch: 0,
            brightness: 100,
            display_on: true,
            logging_level: None,
            last_frametime_ms: None,
            pushes: 0,
            skipped: 0,
            errors: 0,
            consecutive_errors: 0,
            last_seen_ts_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Global,
    Device(DeviceId),
    Scene(DeviceId, String),
}

type Subscriber = Box<dyn Fn(&Scope) + Send + Sync>;

struct Inner {
    global: HashMap<String, Value>,
    device_bag: HashMap<DeviceId, HashMap<String, Value>>,
    runtime: HashMap<DeviceId, DeviceRuntimeState>,
    scene_bags: HashMap<(DeviceId, String), HashMap<String, Value>>,
    daemon_start_ms: i64,
    last_heartbeat_ms: i64,
    subscribers: Vec<(Scope, Subscriber)>,
}

pub struct StateStore {
    inner: Mutex<Inner>,
    persist_path: PathBuf,
    debounce: Duration,
    dirty: Notify,
}

#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub global: HashMap<String, Value>,
    pub devices: HashMap<DeviceId, DeviceRuntimeState>,
    pub scene_bags: HashMap<(DeviceId, String), HashMap<String, Value>>,
}

// --- on-disk schema (spec §6) -------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct PersistedFile {
    version: u32,
    timestamp: String,
    daemon: PersistedDaemon,
    devices: HashMap<String, PersistedDevice>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDaemon {
    #[serde(rename = "startTime")]
    start_time: i64,
    #[serde(rename = "lastHeartbeat")]
    last_heartbeat: i64,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct PersistedDevice {
    #[serde(rename = "activeScene")]
    active_scene: Option<String>,
    #[serde(rename = "playState")]
    play_state: Option<PlayState>,
    brightness: Option<u8>,
    #[serde(rename = "displayOn")]
    display_on: Option<bool>,
    #[serde(rename = "loggingLevel")]
    logging_level: Option<LoggingLevel>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Path fallback chain from spec §4.3 / §6: env var -> preferred location
/// -> user-home `.pidicon/runtime-state.json` -> OS tempdir.
pub fn resolve_persist_path(env_override: Option<PathBuf>, preferred: Option<PathBuf>) -> PathBuf {
    let home_fallback = xdg::BaseDirectories::new()
        .ok()
        .map(|b| b.get_data_home())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pidicon")
        .join("runtime-state.json");

    let tempdir_fallback = std::env::temp_dir().join("pidicon").join("runtime-state.json");

    for candidate in [env_override, preferred, Some(home_fallback), Some(tempdir_fallback)]
        .into_iter()
        .flatten()
    {
        if let Some(parent) = candidate.parent() {
            if std::fs::create_dir_all(parent).is_ok() && dir_is_writable(parent) {
                return candidate;
            }
        }
        tracing::warn!(path = %candidate.display(), "state path unwritable, trying fallback");
    }

    std::env::temp_dir().join("pidicon-runtime-state.json")
}

fn dir_is_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(".pidicon-write-probe-{}", std::process::id()));
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

impl StateStore {
    pub fn new(persist_path: PathBuf, debounce: Duration) -> Arc<Self> {
        Arc::new(StateStore {
            inner: Mutex::new(Inner {
                global: HashMap::new(),
                device_bag: HashMap::new(),
                runtime: HashMap::new(),
                scene_bags: HashMap::new(),
                daemon_start_ms: now_ms(),
                last_heartbeat_ms: now_ms(),
                subscribers: Vec::new(),
            }),
            persist_path,
            debounce,
            dirty: Notify::new(),
        })
    }

    /// Loads whitelisted fields from `persist_path` if present. Absence of
    /// the file is normal, not an error.
    pub fn load_from_disk(self: &Arc<Self>) {
        let bytes = match std::fs::read(&self.persist_path) {
            Ok(b) => b,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => {
                tracing::warn!(path = %self.persist_path.display(), %err, "failed to read persisted state");
                return;
            }
        };

        let parsed: PersistedFile = match serde_json::from_slice(&bytes) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(%err, "persisted state file is not valid JSON, ignoring");
                return;
            }
        };

        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.daemon_start_ms = parsed.daemon.start_time;
        inner.last_heartbeat_ms = parsed.daemon.last_heartbeat;
        for (device, persisted) in parsed.devices {
            let entry = inner.runtime.entry(DeviceId::from(device)).or_default();
            entry.active_scene = persisted.active_scene;
            if let Some(play_state) = persisted.play_state {
                entry.play_state = play_state;
            }
            if let Some(brightness) = persisted.brightness {
                entry.brightness = brightness;
            }
            if let Some(display_on) = persisted.display_on {
                entry.display_on = display_on;
            }
            entry.logging_level = persisted.logging_level;
        }
        tracing::info!(path = %self.persist_path.display(), "restored persisted state");
    }

    fn persisted_snapshot(&self) -> PersistedFile {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let devices = inner
            .runtime
            .iter()
            .map(|(id, state)| {
                (
                    id.as_str().to_string(),
                    PersistedDevice {
                        active_scene: state.active_scene.clone(),
                        play_state: Some(state.play_state),
                        brightness: Some(state.brightness),
                        display_on: Some(state.display_on),
                        logging_level: state.logging_level,
                    },
                )
            })
            .collect();

        PersistedFile {
            version: 1,
            timestamp: chrono::Utc::now().to_rfc3339(),
            daemon: PersistedDaemon {
                start_time: inner.daemon_start_ms,
                last_heartbeat: inner.last_heartbeat_ms,
            },
            devices,
        }
    }

    /// Forces an immediate atomic write, bypassing the debounce window.
    pub async fn flush(&self) -> Result<(), PidiconError> {
        let snapshot = self.persisted_snapshot();
        let json = serde_json::to_vec_pretty(&snapshot).map_err(|e| PidiconError::Persistence {
            message: format!("failed to serialize state: {e}"),
        })?;

        if let Some(parent) = self.persist_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let tmp_path = self.persist_path.with_extension(format!(
            "tmp-{}",
            std::process::id()
        ));

        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| PidiconError::Persistence {
                message: format!("failed to write temp state file: {e}"),
            })?;

        tokio::fs::rename(&tmp_path, &self.persist_path)
            .await
            .map_err(|e| PidiconError::Persistence {
                message: format!("failed to rename temp state file into place: {e}"),
            })?;

        Ok(())
    }

    fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Runs forever, coalescing dirty marks for `debounce` and then writing
    /// once. Intended to be spawned as a background task at startup.
    pub async fn run_persistence_loop(self: Arc<Self>) {
        loop {
            self.dirty.notified().await;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.debounce) => break,
                    _ = self.dirty.notified() => continue,
                }
            }
            if let Err(err) = self.flush().await {
                tracing::warn!(%err, "debounced persistence write failed, will retry on next change");
            }
        }
    }

    fn notify(&self, scope: &Scope) {
        let inner = self.inner.lock().expect("store mutex poisoned");
        for (sub_scope, cb) in &inner.subscribers {
            if sub_scope == scope {
                cb(scope);
            }
        }
    }

    pub fn subscribe(&self, scope: Scope, callback: Subscriber) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.subscribers.push((scope, callback));
    }

    // --- global tier -----------------------------------------------------

    pub fn get_global(&self, key: &str) -> Option<Value> {
        self.inner.lock().expect("store mutex poisoned").global.get(key).cloned()
    }

    pub fn set_global(&self, key: &str, value: Value) {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .global
            .insert(key.to_string(), value);
        self.notify(&Scope::Global);
    }

    pub fn has_global(&self, key: &str) -> bool {
        self.inner.lock().expect("store mutex poisoned").global.contains_key(key)
    }

    pub fn delete_global(&self, key: &str) {
        self.inner.lock().expect("store mutex poisoned").global.remove(key);
        self.notify(&Scope::Global);
    }

    // --- per-device opaque tier -------------------------------------------

    pub fn get_device(&self, device: &DeviceId, key: &str) -> Option<Value> {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .device_bag
            .get(device)
            .and_then(|bag| bag.get(key))
            .cloned()
    }

    pub fn set_device(&self, device: &DeviceId, key: &str, value: Value) {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .device_bag
            .entry(device.clone())
            .or_default()
            .insert(key.to_string(), value);
        self.notify(&Scope::Device(device.clone()));
    }

    pub fn has_device(&self, device: &DeviceId, key: &str) -> bool {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .device_bag
            .get(device)
            .map(|bag| bag.contains_key(key))
            .unwrap_or(false)
    }

    pub fn delete_device(&self, device: &DeviceId, key: &str) {
        if let Some(bag) = self.inner.lock().expect("store mutex poisoned").device_bag.get_mut(device) {
            bag.remove(key);
        }
        self.notify(&Scope::Device(device.clone()));
    }

    // --- per-(device,scene) bag tier --------------------------------------

    pub fn scene_get(&self, device: &DeviceId, scene: &str, key: &str, default: Value) -> Value {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .scene_bags
            .get(&(device.clone(), scene.to_string()))
            .and_then(|bag| bag.get(key))
            .cloned()
            .unwrap_or(default)
    }

    pub fn scene_set(&self, device: &DeviceId, scene: &str, key: &str, value: Value) {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .scene_bags
            .entry((device.clone(), scene.to_string()))
            .or_default()
            .insert(key.to_string(), value);
        self.notify(&Scope::Scene(device.clone(), scene.to_string()));
    }

    pub fn scene_has(&self, device: &DeviceId, scene: &str, key: &str) -> bool {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .scene_bags
            .get(&(device.clone(), scene.to_string()))
            .map(|bag| bag.contains_key(key))
            .unwrap_or(false)
    }

    pub fn scene_delete(&self, device: &DeviceId, scene: &str, key: &str) {
        if let Some(bag) = self
            .inner
            .lock()
            .expect("store mutex poisoned")
            .scene_bags
            .get_mut(&(device.clone(), scene.to_string()))
        {
            bag.remove(key);
        }
        self.notify(&Scope::Scene(device.clone(), scene.to_string()));
    }

    pub fn clear_scene(&self, device: &DeviceId, scene: &str) {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .scene_bags
            .remove(&(device.clone(), scene.to_string()));
        self.notify(&Scope::Scene(device.clone(), scene.to_string()));
    }

    // --- typed per-device runtime state -----------------------------------

    pub fn ensure_device(&self, device: &DeviceId) {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .runtime
            .entry(device.clone())
            .or_default();
    }

    pub fn runtime_state(&self, device: &DeviceId) -> DeviceRuntimeState {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .runtime
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    fn with_runtime_mut<F: FnOnce(&mut DeviceRuntimeState)>(&self, device: &DeviceId, f: F) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        f(inner.runtime.entry(device.clone()).or_default());
        drop(inner);
        self.notify(&Scope::Device(device.clone()));
    }

    pub fn set_active_scene(&self, device: &DeviceId, scene: Option<String>) {
        self.with_runtime_mut(device, |s| s.active_scene = scene);
        self.mark_dirty();
    }

    pub fn set_status(&self, device: &DeviceId, status: Status) {
        self.with_runtime_mut(device, |s| s.status = status);
    }

    pub fn set_play_state(&self, device: &DeviceId, play_state: PlayState) {
        self.with_runtime_mut(device, |s| s.play_state = play_state);
        self.mark_dirty();
    }

    pub fn set_loop_scheduled(&self, device: &DeviceId, scheduled: bool) {
        self.with_runtime_mut(device, |s| s.loop_scheduled = scheduled);
    }

    /// Increments the device's generation and returns the new value.
    pub fn bump_generation(&self, device: &DeviceId) -> u64 {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let entry = inner.runtime.entry(device.clone()).or_default();
        entry.generation_id += 1;
        let gen = entry.generation_id;
        drop(inner);
        self.notify(&Scope::Device(device.clone()));
        gen
    }

    /// Increments the device's loop epoch and returns the new value. Called
    /// on every loop cancellation and every loop spawn so a task running
    /// under a stale epoch is fenced out immediately, independent of
    /// whether `generation_id` itself has moved yet.
    pub fn bump_loop_epoch(&self, device: &DeviceId) -> u64 {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let entry = inner.runtime.entry(device.clone()).or_default();
        entry.loop_epoch += 1;
        let epoch = entry.loop_epoch;
        drop(inner);
        self.notify(&Scope::Device(device.clone()));
        epoch
    }

    pub fn set_brightness(&self, device: &DeviceId, percent: u8) {
        self.with_runtime_mut(device, |s| s.brightness = percent.min(100));
        self.mark_dirty();
    }

    pub fn set_display_on(&self, device: &DeviceId, on: bool) {
        self.with_runtime_mut(device, |s| s.display_on = on);
        self.mark_dirty();
    }

    pub fn set_logging_level(&self, device: &DeviceId, level: Option<LoggingLevel>) {
        self.with_runtime_mut(device, |s| s.logging_level = level);
        self.mark_dirty();
    }

    pub fn record_push(&self, device: &DeviceId, frametime_ms: u64) {
        self.with_runtime_mut(device, |s| {
            s.pushes += 1;
            s.last_frametime_ms = Some(frametime_ms);
            s.last_seen_ts_ms = Some(now_ms());
            s.consecutive_errors = 0;
        });
    }

    /// Records a driver/render error and returns the new consecutive-error
    /// count (see SPEC_FULL.md §2, the error-threshold supplement).
    pub fn record_error(&self, device: &DeviceId) -> u32 {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let entry = inner.runtime.entry(device.clone()).or_default();
        entry.errors += 1;
        entry.consecutive_errors += 1;
        let count = entry.consecutive_errors;
        drop(inner);
        self.notify(&Scope::Device(device.clone()));
        count
    }

    pub fn record_skip(&self, device: &DeviceId) {
        self.with_runtime_mut(device, |s| s.skipped += 1);
    }

    pub fn touch_last_seen(&self, device: &DeviceId) {
        self.with_runtime_mut(device, |s| s.last_seen_ts_ms = Some(now_ms()));
    }

    pub fn update_heartbeat(&self) {
        self.inner.lock().expect("store mutex poisoned").last_heartbeat_ms = now_ms();
        self.mark_dirty();
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock().expect("store mutex poisoned");
        StoreSnapshot {
            global: inner.global.clone(),
            devices: inner.runtime.clone(),
            scene_bags: inner.scene_bags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Arc<StateStore> {
        let dir = std::env::temp_dir().join(format!("pidicon-test-{}", uuid_ish()));
        StateStore::new(dir.join("state.json"), Duration::from_millis(50))
    }

    fn uuid_ish() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
    }

    #[test]
    fn scene_bag_get_returns_default_until_set() {
        let store = test_store();
        let device = DeviceId::from("10.0.0.1");
        let v = store.scene_get(&device, "clock", "phase", Value::from(0));
        assert_eq!(v, Value::from(0));
        store.scene_set(&device, "clock", "phase", Value::from(5));
        let v = store.scene_get(&device, "clock", "phase", Value::from(0));
        assert_eq!(v, Value::from(5));
    }

    #[test]
    fn clear_scene_drops_the_bag() {
        let store = test_store();
        let device = DeviceId::from("10.0.0.1");
        store.scene_set(&device, "clock", "phase", Value::from(5));
        store.clear_scene(&device, "clock");
        assert!(!store.scene_has(&device, "clock", "phase"));
    }

    #[test]
    fn bump_generation_is_monotonic() {
        let store = test_store();
        let device = DeviceId::from("10.0.0.1");
        let g1 = store.bump_generation(&device);
        let g2 = store.bump_generation(&device);
        assert!(g2 > g1);
    }

    #[tokio::test]
    async fn flush_then_reload_restores_whitelisted_fields_only() {
        let store = test_store();
        let device = DeviceId::from("10.0.0.1");
        store.set_active_scene(&device, Some("A".to_string()));
        store.set_play_state(&device, PlayState::Playing);
        store.set_brightness(&device, 50);
        store.set_display_on(&device, true);
        store.bump_generation(&device);
        store.record_push(&device, 42);

        store.flush().await.unwrap();

        let reloaded = StateStore::new(store.persist_path.clone(), Duration::from_millis(50));
        reloaded.load_from_disk();
        let restored = reloaded.runtime_state(&device);

        assert_eq!(restored.active_scene.as_deref(), Some("A"));
        assert_eq!(restored.play_state, PlayState::Playing);
        assert_eq!(restored.brightness, 50);
        assert!(restored.display_on);
        // transient fields start at defaults, not the pre-restart values
        assert_eq!(restored.generation_id, 0);
        assert_eq!(restored.pushes, 0);
        assert_eq!(restored.status, Status::Idle);
    }

    #[test]
    fn note_documents_the_persisted_field_whitelist() {
        assert!(PERSISTED_FIELDS_NOTE.contains("activeScene"));
    }
}
