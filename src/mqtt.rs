//! MQTT probe for telemetry injection and command round-trips.
//!
//! The DUT consumes wallbox power telemetry on a plain topic and answers
//! config commands on a request/response topic pair. The probe wraps a
//! rumqttc client with a background event loop and a broadcast fan-out of
//! inbound publishes, so collection can subscribe before a command is sent
//! and never race the reply.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MqttConfig;
use crate::error::{HarnessError, HarnessResult};

/// Budget for the initial CONNACK.
const CONNECT_BUDGET: Duration = Duration::from_secs(10);

/// One message received from the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Connected MQTT client with a running event loop.
pub struct MqttProbe {
    client: AsyncClient,
    inbound: broadcast::Sender<InboundMessage>,
    event_loop: JoinHandle<()>,
    config: MqttConfig,
}

impl MqttProbe {
    /// Connect to the broker and wait for the CONNACK.
    pub async fn connect(config: &MqttConfig) -> HarnessResult<Self> {
        let client_id = format!("harness-{}", Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_credentials(&config.username, &config.password);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut connection) = AsyncClient::new(options, 32);

        let deadline = Instant::now() + CONNECT_BUDGET;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HarnessError::Mqtt(format!(
                    "no CONNACK from {}:{} within {CONNECT_BUDGET:?}",
                    config.host, config.port
                )));
            }
            match tokio::time::timeout(remaining, connection.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => break,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    return Err(HarnessError::Mqtt(format!(
                        "connecting to {}:{}: {e}",
                        config.host, config.port
                    )))
                }
                Err(_) => {
                    return Err(HarnessError::Mqtt(format!(
                        "no CONNACK from {}:{} within {CONNECT_BUDGET:?}",
                        config.host, config.port
                    )))
                }
            }
        }

        let (inbound, _) = broadcast::channel(256);
        let fanout = inbound.clone();
        let event_loop = tokio::spawn(async move {
            loop {
                match connection.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage {
                            topic: publish.topic.clone(),
                            payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                        };
                        debug!(topic = %message.topic, "inbound publish");
                        let _ = fanout.send(message);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT event loop error; backing off");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            inbound,
            event_loop,
            config: config.clone(),
        })
    }

    /// Publish raw telemetry to the wallbox topic (plain numeric string or
    /// JSON with a `power`/`chargePower` key: the DUT accepts both).
    pub async fn publish_wallbox(&self, payload: impl Into<String>) -> HarnessResult<()> {
        self.publish(&self.config.wallbox_topic, payload.into())
            .await
    }

    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> HarnessResult<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.into())
            .await
            .map_err(|e| HarnessError::Mqtt(format!("publish to '{topic}': {e}")))
    }

    /// Publish a config command without waiting for a reply.
    pub async fn publish_command(&self, command: &Value) -> HarnessResult<()> {
        self.publish(&self.config.command_topic, command.to_string())
            .await
    }

    /// Publish a config command and await the JSON reply on the response
    /// topic. The response subscription is in place before the command goes
    /// out.
    pub async fn request(&self, command: &Value, budget: Duration) -> HarnessResult<Value> {
        let response_topic = self.config.response_topic.clone();
        let mut rx = self.inbound.subscribe();
        self.subscribe(&response_topic).await?;

        let outcome = async {
            self.publish(&self.config.command_topic, command.to_string())
                .await?;

            let deadline = Instant::now() + budget;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(HarnessError::timeout(
                        format!("reply on '{response_topic}'"),
                        budget,
                    ));
                }
                match tokio::time::timeout(remaining, rx.recv()).await {
                    Ok(Ok(message)) if message.topic == response_topic => {
                        return serde_json::from_str(&message.payload).map_err(|e| {
                            HarnessError::Protocol(format!("command reply is not JSON: {e}"))
                        });
                    }
                    Ok(Ok(_)) => continue,
                    Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                    Ok(Err(broadcast::error::RecvError::Closed)) => {
                        return Err(HarnessError::Mqtt("event loop stopped".to_string()))
                    }
                    Err(_) => {
                        return Err(HarnessError::timeout(
                            format!("reply on '{response_topic}'"),
                            budget,
                        ))
                    }
                }
            }
        }
        .await;

        self.unsubscribe(&response_topic).await;
        outcome
    }

    /// Collect up to `count` payloads from a topic. Lenient: returns what
    /// arrived when the budget runs out, which may be fewer than requested.
    pub async fn collect(
        &self,
        topic: &str,
        count: usize,
        budget: Duration,
    ) -> HarnessResult<Vec<String>> {
        let mut rx = self.inbound.subscribe();
        self.subscribe(topic).await?;

        let mut collected = Vec::new();
        let deadline = Instant::now() + budget;
        while collected.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(message)) if message.topic == topic => collected.push(message.payload),
                Ok(Ok(_)) => {}
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Err(_) => break,
            }
        }

        self.unsubscribe(topic).await;
        Ok(collected)
    }

    async fn subscribe(&self, topic: &str) -> HarnessResult<()> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| HarnessError::Mqtt(format!("subscribe to '{topic}': {e}")))
    }

    async fn unsubscribe(&self, topic: &str) {
        if let Err(e) = self.client.unsubscribe(topic).await {
            warn!(error = %e, topic, "unsubscribe failed");
        }
    }

    /// Disconnect and stop the event loop.
    pub async fn disconnect(self) {
        let _ = self.client.disconnect().await;
        self.event_loop.abort();
    }
}
