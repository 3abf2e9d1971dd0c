//! The real driver: encodes the canvas as base-64 RGB and POSTs it to the
//! physical Pixoo device's local HTTP API (spec §6).

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::canvas::PixelCanvas;
use crate::error::PidiconError;
use crate::types::DriverKind;

use super::Driver;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, Default)]
struct DeviceResponse {
    #[serde(default)]
    error_code: i64,
}

pub struct RealDriver {
    host: String,
    client: reqwest::Client,
    canvas: PixelCanvas,
    pic_id: u32,
    initialized: bool,
}

impl RealDriver {
    pub fn new(host: String) -> Self {
        RealDriver {
            host,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            canvas: PixelCanvas::new(),
            pic_id: 0,
            initialized: false,
        }
    }

    fn endpoint(&self) -> String {
        format!("http://{}/post", self.host)
    }

    async fn post_command(&self, body: serde_json::Value) -> Result<(), PidiconError> {
        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| PidiconError::DeviceTransport {
                device_id: self.host.clone().into(),
                message: format!("request failed: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(PidiconError::DeviceTransport {
                device_id: self.host.clone().into(),
                message: format!("http status {}", resp.status()),
            });
        }

        let parsed: DeviceResponse = resp.json().await.unwrap_or_default();
        if parsed.error_code != 0 {
            return Err(PidiconError::DeviceTransport {
                device_id: self.host.clone().into(),
                message: format!("device returned error_code {}", parsed.error_code),
            });
        }

        Ok(())
    }

    /// Best-effort init sequence run once before the first push. Errors are
    /// logged and swallowed, never surfaced — matching the source device's
    /// documented tolerance for a channel that's already in the right state.
    async fn ensure_initialized(&mut self) {
        if self.initialized {
            return;
        }
        if let Err(err) = self.post_command(json!({"Command": "Draw/ResetHttpGifId"})).await {
            tracing::debug!(host = %self.host, %err, "best-effort ResetHttpGifId failed");
        }
        if let Err(err) = self
            .post_command(json!({"Command": "Channel/SetCurrentChannel", "Channel": 4}))
            .await
        {
            tracing::debug!(host = %self.host, %err, "best-effort SetCurrentChannel failed");
        }
        self.initialized = true;
    }
}

#[async_trait]
impl Driver for RealDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Real
    }

    fn canvas(&self) -> &PixelCanvas {
        &self.canvas
    }

    fn canvas_mut(&mut self) -> &mut PixelCanvas {
        &mut self.canvas
    }

    async fn push(&mut self) -> Result<(), PidiconError> {
        self.ensure_initialized().await;

        let rgb = self.canvas.to_rgb_bytes();
        let pic_data = base64::engine::general_purpose::STANDARD.encode(rgb);
        self.pic_id = self.pic_id.wrapping_add(1);

        self.post_command(json!({
            "Command": "Draw/SendHttpGif",
            "PicNum": 1,
            "PicWidth": 64,
            "PicHeight": 64,
            "PicOffset": 0,
            "PicID": self.pic_id,
            "PicSpeed": 1000,
            "PicData": pic_data,
        }))
        .await
    }

    async fn set_brightness(&mut self, percent: u8) -> Result<(), PidiconError> {
        let percent = percent.min(100);
        self.post_command(json!({"Command": "Channel/SetBrightness", "Brightness": percent}))
            .await
    }

    async fn set_power(&mut self, on: bool) -> Result<(), PidiconError> {
        self.post_command(json!({"Command": "Channel/OnOffScreen", "OnOff": if on { 1 } else { 0 }}))
            .await
    }

    async fn reset(&mut self) -> Result<(), PidiconError> {
        self.post_command(json!({"Command": "Channel/SetIndex", "SelectIndex": 0}))
            .await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.post_command(json!({"Command": "Channel/SetIndex", "SelectIndex": 3}))
            .await
    }

    fn is_ready(&self) -> bool {
        self.initialized
    }
}
