//! MQTT transport glue: a thin wrapper over `rumqttc`'s `AsyncClient` /
//! `EventLoop` that feeds parsed messages to the Command Router and drains
//! its outbound publish queue. Broker client plumbing itself is treated as
//! an external collaborator (spec §1); this module is just the seam.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::router::{CommandRouter, ReconnectSchedule};

pub struct MqttConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl MqttConfig {
    fn into_options(self) -> MqttOptions {
        let mut opts = MqttOptions::new(self.client_id, self.host, self.port);
        opts.set_keep_alive(self.keep_alive);
        if let (Some(user), Some(pass)) = (self.username, self.password) {
            opts.set_credentials(user, pass);
        }
        opts
    }
}

/// Builds the shared client/event-loop pair. The client handle is cloned
/// into both the inbound and outbound tasks; the event loop is driven
/// exclusively by `run_inbound`.
pub fn connect(config: MqttConfig) -> (AsyncClient, EventLoop) {
    AsyncClient::new(config.into_options(), 64)
}

/// Runs the inbound event loop forever: reconnects using the router's
/// bounded-exponential schedule, (re-)subscribes to the namespace filter
/// on every successful connect, and forwards publishes to the router.
pub async fn run_inbound(client: AsyncClient, mut event_loop: EventLoop, router: &CommandRouter) {
    let filter = router.subscription_filter();
    let mut backoff = ReconnectSchedule::new();

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                backoff.reset();
                if let Err(err) = client.subscribe(&filter, QoS::AtLeastOnce).await {
                    tracing::warn!(%err, "failed to subscribe after connect");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                router.handle_message(&publish.topic, &publish.payload).await;
            }
            Ok(_) => {}
            Err(err) => {
                let delay = backoff.next_delay();
                tracing::warn!(%err, delay_secs = delay.as_secs(), "mqtt connection error, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Drains the router's outbound queue and publishes each `(topic,
/// payload)` pair. A disconnected client simply fails this publish; the
/// error is logged and the message is dropped rather than retried, per
/// spec's "publish attempts while disconnected return not sent".
pub async fn run_outbound(client: AsyncClient, mut outbound: UnboundedReceiver<(String, Value)>) {
    while let Some((topic, payload)) = outbound.recv().await {
        let bytes = match serde_json::to_vec(&payload) {
            Ok(b) => b,
            Err(err) => {
                tracing::warn!(topic, %err, "failed to serialize outbound payload");
                continue;
            }
        };
        if let Err(err) = client.publish(&topic, QoS::AtMostOnce, false, bytes).await {
            tracing::debug!(topic, %err, "outbound publish failed, message dropped");
        }
    }
}
