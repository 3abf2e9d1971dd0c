//! Command Router (spec §4.6): parses inbound MQTT topic+payload pairs
//! into a dispatch against the Scene Runtime, and queues outbound
//! `ok`/`error`/`scene/state` events for the transport to publish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::PidiconError;
use crate::runtime::SceneRuntime;
use crate::types::{DeviceId, DriverKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub device_id: DeviceId,
    pub section: String,
    pub action: Option<String>,
}

/// `pixoo/<deviceId>/<section>[/<action>]`. Anything else is malformed.
pub fn parse_topic(namespace: &str, topic: &str) -> Option<ParsedTopic> {
    let mut parts = topic.split('/');
    if parts.next()? != namespace {
        return None;
    }
    let device = parts.next()?;
    let section = parts.next()?;
    let action = parts.next().map(|s| s.to_string());
    if parts.next().is_some() {
        return None;
    }
    if device.is_empty() || section.is_empty() {
        return None;
    }
    Some(ParsedTopic {
        device_id: DeviceId::from(device),
        section: section.to_string(),
        action,
    })
}

fn object_fields(payload: &Value) -> HashMap<String, Value> {
    payload.as_object().cloned().unwrap_or_default().into_iter().collect()
}

fn payload_as_json(payload: &[u8]) -> Result<Value, serde_json::Error> {
    if payload.is_empty() {
        Ok(Value::Object(Default::default()))
    } else {
        serde_json::from_slice(payload)
    }
}

enum Playback {
    Play,
    Pause,
    Stop,
}

fn playback_action(section: &str, action: Option<&str>, params: &HashMap<String, Value>) -> Option<Playback> {
    let candidate = match section {
        "play" | "pause" | "stop" => Some(section),
        "playback" => action.or_else(|| params.get("action").and_then(Value::as_str)),
        _ => None,
    }?;
    match candidate {
        "play" => Some(Playback::Play),
        "pause" => Some(Playback::Pause),
        "stop" => Some(Playback::Stop),
        _ => None,
    }
}

/// Bounded-exponential reconnect schedule (spec §4.6): 1s x5, 5s x5,
/// 60s x5, 300s thereafter.
pub struct ReconnectSchedule {
    attempt: u32,
}

impl ReconnectSchedule {
    pub fn new() -> Self {
        ReconnectSchedule { attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let tier = self.attempt;
        self.attempt = self.attempt.saturating_add(1);
        let secs = match tier {
            0..=4 => 1,
            5..=9 => 5,
            10..=14 => 60,
            _ => 300,
        };
        Duration::from_secs(secs)
    }
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses inbound messages, dispatches to the Scene Runtime, and queues
/// outbound events. `outbound` is drained by the MQTT transport; if the
/// transport is disconnected, sends simply queue rather than raising —
/// matching "publish attempts while disconnected return not sent without
/// raising".
pub struct CommandRouter {
    runtime: Arc<SceneRuntime>,
    namespace: String,
    outbound: UnboundedSender<(String, Value)>,
}

impl CommandRouter {
    pub fn new(runtime: Arc<SceneRuntime>, namespace: impl Into<String>, outbound: UnboundedSender<(String, Value)>) -> Self {
        CommandRouter {
            runtime,
            namespace: namespace.into(),
            outbound,
        }
    }

    /// The broker subscription filter covering the whole inbound namespace.
    pub fn subscription_filter(&self) -> String {
        format!("{}/#", self.namespace)
    }

    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let Some(parsed) = parse_topic(&self.namespace, topic) else {
            tracing::warn!(topic, "malformed topic, dropping message");
            return;
        };

        let payload_value = match payload_as_json(payload) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(topic, %err, "malformed JSON payload");
                self.publish_error(&parsed.device_id, "validation", &format!("invalid JSON payload: {err}"));
                return;
            }
        };

        match self.dispatch(&parsed, payload_value).await {
            Ok(()) => self.publish_ok(&parsed.device_id),
            Err(err) => {
                tracing::warn!(device = %parsed.device_id, %err, "command failed");
                self.publish_error(&parsed.device_id, err.kind(), &err.to_string());
            }
        }
        self.publish_scene_state(&parsed.device_id);
    }

    async fn dispatch(&self, parsed: &ParsedTopic, payload: Value) -> Result<(), PidiconError> {
        let params = object_fields(&payload);

        match (parsed.section.as_str(), parsed.action.as_deref()) {
            ("scene", Some("set")) => {
                let scene_name = params
                    .get("scene")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PidiconError::Validation {
                        device_id: Some(parsed.device_id.clone()),
                        message: "scene/set payload missing 'scene'".to_string(),
                    })?
                    .to_string();
                let mut rest = params.clone();
                rest.remove("scene");

                let state = self.runtime.device_state(&parsed.device_id);
                if state.active_scene.as_deref() == Some(scene_name.as_str()) {
                    self.runtime.update_scene_parameters(&parsed.device_id, &scene_name, rest).await
                } else {
                    self.runtime.switch_scene(&parsed.device_id, &scene_name, rest).await
                }
            }

            ("state", Some("upd")) => {
                let state = self.runtime.device_state(&parsed.device_id);
                let scene_name = state.active_scene.clone().ok_or_else(|| PidiconError::Validation {
                    device_id: Some(parsed.device_id.clone()),
                    message: "state/upd with no active scene".to_string(),
                })?;
                self.runtime.update_scene_parameters(&parsed.device_id, &scene_name, params).await
            }

            ("driver", Some("set")) => {
                let kind_str = params.get("driver").and_then(Value::as_str).ok_or_else(|| PidiconError::Validation {
                    device_id: Some(parsed.device_id.clone()),
                    message: "driver/set payload missing 'driver'".to_string(),
                })?;
                let kind: DriverKind = kind_str.parse().map_err(|message: String| PidiconError::Validation {
                    device_id: Some(parsed.device_id.clone()),
                    message,
                })?;
                let host = params
                    .get("host")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| parsed.device_id.as_str())
                    .to_string();
                self.runtime.switch_driver(&parsed.device_id, kind, &host).await
            }

            ("reset", Some("set")) => self.runtime.soft_reset(&parsed.device_id).await,

            (section, action) => {
                if let Some(playback) = playback_action(section, action, &params) {
                    match playback {
                        Playback::Play => {
                            self.runtime.resume_scene(&parsed.device_id).await;
                        }
                        Playback::Pause => {
                            self.runtime.pause_scene(&parsed.device_id).await;
                        }
                        Playback::Stop => {
                            self.runtime.stop_scene(&parsed.device_id).await;
                        }
                    }
                    Ok(())
                } else {
                    Err(PidiconError::Validation {
                        device_id: Some(parsed.device_id.clone()),
                        message: format!("unrecognized section/action '{}/{}'", section, action.unwrap_or("")),
                    })
                }
            }
        }
    }

    fn publish(&self, topic: String, payload: Value) {
        // An Err here means the outbound channel's receiver is gone (shutdown
        // in progress) — nothing to recover, nothing to log loudly about.
        let _ = self.outbound.send((topic, payload));
    }

    fn publish_ok(&self, device_id: &DeviceId) {
        self.publish(
            format!("{}/{}/ok", self.namespace, device_id),
            serde_json::json!({ "ts": chrono::Utc::now().to_rfc3339() }),
        );
    }

    fn publish_error(&self, device_id: &DeviceId, kind: &str, message: &str) {
        self.publish(
            format!("{}/{}/error", self.namespace, device_id),
            serde_json::json!({ "kind": kind, "message": message, "ts": chrono::Utc::now().to_rfc3339() }),
        );
    }

    /// SPEC_FULL.md §2 supplement: publish current scene-machine state
    /// after every handled command.
    fn publish_scene_state(&self, device_id: &DeviceId) {
        let state = self.runtime.device_state(device_id);
        self.publish(
            format!("{}/{}/scene/state", self.namespace, device_id),
            serde_json::json!({
                "activeScene": state.active_scene,
                "status": state.status,
                "playState": state.play_state,
                "generationId": state.generation_id,
            }),
        );
    }

    pub fn publish_metrics(&self, device_id: &DeviceId) {
        let state = self.runtime.device_state(device_id);
        self.publish(
            format!("{}/{}/metrics", self.namespace, device_id),
            serde_json::json!({
                "pushes": state.pushes,
                "skipped": state.skipped,
                "errors": state.errors,
                "lastFrametimeMs": state.last_frametime_ms,
                "lastSeenTs": state.last_seen_ts_ms,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_segment_topic() {
        let parsed = parse_topic("pixoo", "pixoo/10.0.0.1/scene/set").unwrap();
        assert_eq!(parsed.device_id, DeviceId::from("10.0.0.1"));
        assert_eq!(parsed.section, "scene");
        assert_eq!(parsed.action.as_deref(), Some("set"));
    }

    #[test]
    fn parses_two_segment_topic() {
        let parsed = parse_topic("pixoo", "pixoo/10.0.0.1/pause").unwrap();
        assert_eq!(parsed.section, "pause");
        assert_eq!(parsed.action, None);
    }

    #[test]
    fn rejects_wrong_namespace() {
        assert!(parse_topic("pixoo", "other/10.0.0.1/scene/set").is_none());
    }

    #[test]
    fn rejects_too_many_segments() {
        assert!(parse_topic("pixoo", "pixoo/10.0.0.1/scene/set/extra").is_none());
    }

    #[test]
    fn reconnect_schedule_follows_tiers() {
        let mut sched = ReconnectSchedule::new();
        for _ in 0..5 {
            assert_eq!(sched.next_delay(), Duration::from_secs(1));
        }
        for _ in 0..5 {
            assert_eq!(sched.next_delay(), Duration::from_secs(5));
        }
        for _ in 0..5 {
            assert_eq!(sched.next_delay(), Duration::from_secs(60));
        }
        assert_eq!(sched.next_delay(), Duration::from_secs(300));
        assert_eq!(sched.next_delay(), Duration::from_secs(300));
    }

    #[test]
    fn playback_action_recognizes_bare_sections() {
        let params = HashMap::new();
        assert!(matches!(playback_action("play", None, &params), Some(Playback::Play)));
        assert!(matches!(playback_action("stop", None, &params), Some(Playback::Stop)));
        assert!(matches!(playback_action("scene", Some("set"), &params), None));
    }
}
