//! Configuration (spec §6 environment knobs + ambient `toml` overlay).
//! Precedence, following the teacher's `metaconfig` pattern: CLI flag >
//! environment variable > `toml` file field > built-in default. Unknown
//! keys in the file overlay are ignored with a debug-level log, per
//! spec §9 ("config objects with many optional keys").

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::types::DeviceId;
use crate::types::DriverKind;

#[derive(Parser, Debug, Default)]
#[command(name = "pidicond", about = "Drives Pixoo-class LED matrix displays over MQTT")]
pub struct Cli {
    /// Path to an optional TOML config overlay.
    #[arg(long, env = "PIDICON_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "PIDICON_MQTT_HOST")]
    pub mqtt_host: Option<String>,

    #[arg(long, env = "PIDICON_MQTT_PORT")]
    pub mqtt_port: Option<u16>,

    #[arg(long, env = "PIDICON_MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "PIDICON_MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    #[arg(long, env = "PIDICON_MQTT_NAMESPACE")]
    pub mqtt_namespace: Option<String>,

    /// `false` disables the reconnect loop entirely (single connection
    /// attempt, then give up) — used in tests.
    #[arg(long, env = "PIDICON_MQTT_RECONNECT")]
    pub mqtt_reconnect: Option<bool>,

    #[arg(long, env = "PIDICON_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    #[arg(long, env = "PIDICON_SCENE_DIR")]
    pub scene_dir: Option<PathBuf>,

    #[arg(long, env = "PIDICON_USER_SCENE_DIR")]
    pub user_scene_dir: Option<PathBuf>,

    #[arg(long, env = "PIDICON_MEDIA_DIR")]
    pub media_dir: Option<PathBuf>,

    #[arg(long, env = "PIDICON_SECRETS_DIR")]
    pub secrets_dir: Option<PathBuf>,

    #[arg(long, env = "PIDICON_SECRETS_KEY")]
    pub secrets_key: Option<String>,

    /// Default driver kind for devices with no per-device override.
    #[arg(long, env = "PIDICON_DEFAULT_DRIVER")]
    pub default_driver: Option<String>,

    /// `host=kind;host=kind` per-device driver overrides.
    #[arg(long, env = "PIDICON_DEVICE_DRIVERS")]
    pub device_drivers: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    mqtt_host: Option<String>,
    mqtt_port: Option<u16>,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_namespace: Option<String>,
    mqtt_reconnect: Option<bool>,
    state_file: Option<String>,
    scene_dir: Option<String>,
    user_scene_dir: Option<String>,
    media_dir: Option<String>,
    secrets_dir: Option<String>,
    secrets_key: Option<String>,
    default_driver: Option<String>,
    device_drivers: Option<String>,
    persistence_debounce_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    consecutive_error_threshold: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub namespace: String,
    pub reconnect: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttSettings,
    pub state_file: Option<PathBuf>,
    pub scene_dirs: Vec<PathBuf>,
    pub media_dir: Option<PathBuf>,
    pub secrets_dir: Option<PathBuf>,
    pub secrets_key: Option<String>,
    pub default_driver: DriverKind,
    pub device_drivers: HashMap<DeviceId, DriverKind>,
    pub persistence_debounce: Duration,
    pub heartbeat_interval: Duration,
    pub consecutive_error_threshold: u32,
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::full(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.to_string()))
}

fn parse_device_drivers(raw: &str) -> HashMap<DeviceId, DriverKind> {
    let mut map = HashMap::new();
    for entry in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((host, kind)) = entry.split_once('=') else {
            tracing::debug!(entry, "ignoring malformed device driver override");
            continue;
        };
        match kind.trim().parse::<DriverKind>() {
            Ok(kind) => {
                map.insert(DeviceId::from(host.trim()), kind);
            }
            Err(err) => tracing::debug!(entry, %err, "ignoring device driver override with unknown kind"),
        }
    }
    map
}

impl Config {
    pub fn load(cli: Cli) -> Result<Config> {
        let file_config = match &cli.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let mqtt_host = cli.mqtt_host.or(file_config.mqtt_host).unwrap_or_else(|| "localhost".to_string());
        let mqtt_port = cli.mqtt_port.or(file_config.mqtt_port).unwrap_or(1883);
        let mqtt_username = cli.mqtt_username.or(file_config.mqtt_username);
        let mqtt_password = cli.mqtt_password.or(file_config.mqtt_password);
        let mqtt_namespace = cli.mqtt_namespace.or(file_config.mqtt_namespace).unwrap_or_else(|| "pixoo".to_string());
        let mqtt_reconnect = cli.mqtt_reconnect.or(file_config.mqtt_reconnect).unwrap_or(true);

        let state_file = cli
            .state_file
            .or_else(|| file_config.state_file.as_deref().map(expand_path));

        let mut scene_dirs = Vec::new();
        if let Some(dir) = cli.scene_dir.or_else(|| file_config.scene_dir.as_deref().map(expand_path)) {
            scene_dirs.push(dir);
        }
        if let Some(dir) = cli
            .user_scene_dir
            .or_else(|| file_config.user_scene_dir.as_deref().map(expand_path))
        {
            scene_dirs.push(dir);
        }

        let media_dir = cli.media_dir.or_else(|| file_config.media_dir.as_deref().map(expand_path));
        let secrets_dir = cli.secrets_dir.or_else(|| file_config.secrets_dir.as_deref().map(expand_path));
        let secrets_key = cli.secrets_key.or(file_config.secrets_key);

        let default_driver_raw = cli.default_driver.or(file_config.default_driver).unwrap_or_else(|| "mock".to_string());
        let default_driver = default_driver_raw
            .parse::<DriverKind>()
            .with_context(|| format!("invalid default driver kind '{default_driver_raw}'"))?;

        let device_drivers = cli
            .device_drivers
            .or(file_config.device_drivers)
            .map(|raw| parse_device_drivers(&raw))
            .unwrap_or_default();

        let persistence_debounce = Duration::from_secs(file_config.persistence_debounce_secs.unwrap_or(10));
        let heartbeat_interval = Duration::from_secs(file_config.heartbeat_interval_secs.unwrap_or(30));
        let consecutive_error_threshold = file_config.consecutive_error_threshold.unwrap_or(5);

        Ok(Config {
            mqtt: MqttSettings {
                host: mqtt_host,
                port: mqtt_port,
                username: mqtt_username,
                password: mqtt_password,
                namespace: mqtt_namespace,
                reconnect: mqtt_reconnect,
            },
            state_file,
            scene_dirs,
            media_dir,
            secrets_dir,
            secrets_key,
            default_driver,
            device_drivers,
            persistence_debounce,
            heartbeat_interval,
            consecutive_error_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_device_driver_overrides() {
        let map = parse_device_drivers("10.0.0.1=real;10.0.0.2=mock");
        assert_eq!(map.get(&DeviceId::from("10.0.0.1")), Some(&DriverKind::Real));
        assert_eq!(map.get(&DeviceId::from("10.0.0.2")), Some(&DriverKind::Mock));
    }

    #[test]
    fn ignores_malformed_entry_without_panicking() {
        let map = parse_device_drivers("not-valid;10.0.0.2=mock");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn cli_defaults_produce_a_loadable_config() {
        let cli = Cli::default();
        let config = Config::load(cli).unwrap();
        assert_eq!(config.mqtt.namespace, "pixoo");
        assert_eq!(config.default_driver, DriverKind::Mock);
    }
}
