use crate::config::MqttConfig;
use anyhow::Result;
use gps_telemetry::TelemetryReport;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Fan-out capability that delivers an event to every connected subscriber.
///
/// Publishing never blocks and never reports delivery; a slow or vanished
/// subscriber is the transport's problem, not the caller's.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, event: &'static str, report: &TelemetryReport);

    /// Signals that no further events will be published.
    fn close(&self) {}
}

#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub name: &'static str,
    pub data: String,
}

#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Event(Arc<LiveEvent>),
    Closed,
}

/// In-process broadcaster backing the `/events` subscriber stream.
#[derive(Debug)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<ChannelMessage>,
    closed: AtomicBool,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, event: &'static str, report: &TelemetryReport) {
        let data = match serde_json::to_string(report) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(error=%err, "failed to encode report for subscribers");
                return;
            }
        };
        let message = ChannelMessage::Event(Arc::new(LiveEvent { name: event, data }));
        if self.tx.send(message).is_err() {
            tracing::trace!(event, "no live subscribers");
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(ChannelMessage::Closed);
        }
    }
}

/// Mirrors broadcasts onto an MQTT broker as `<prefix>/<event>`.
pub struct MqttBroadcaster {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttBroadcaster {
    pub fn new(config: &MqttConfig) -> Result<(Self, MqttDrain)> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(10));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 256);
        let stopping = Arc::new(AtomicBool::new(false));
        let loop_stopping = stopping.clone();
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        tracing::debug!("mqtt disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) if loop_stopping.load(Ordering::Acquire) => {
                        tracing::debug!(error = %err, "mqtt event loop stopped while disconnecting");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "mqtt event loop error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
        tracing::info!(host = %config.host, port = config.port, "mqtt broadcast mirror enabled");
        let drain = MqttDrain {
            client: client.clone(),
            stopping,
            handle,
        };
        Ok((
            Self {
                client,
                topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
            },
            drain,
        ))
    }
}

/// Owns the MQTT event loop task so shutdown can let queued publishes reach
/// the broker before the connection goes away.
pub struct MqttDrain {
    client: AsyncClient,
    stopping: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl MqttDrain {
    /// Queues a DISCONNECT behind every pending publish and waits, at most
    /// `timeout`, for the event loop to write it out.
    pub async fn finish(mut self, timeout: Duration) {
        self.stopping.store(true, Ordering::Release);
        if let Err(err) = self.client.try_disconnect() {
            tracing::warn!(error = %err, "mqtt disconnect could not be queued");
        }
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(())) => tracing::info!("mqtt mirror disconnected"),
            Ok(Err(err)) => tracing::warn!(error = %err, "mqtt event loop task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "mqtt mirror did not disconnect in time"
                );
                self.handle.abort();
            }
        }
    }
}

impl Broadcaster for MqttBroadcaster {
    fn publish(&self, event: &'static str, report: &TelemetryReport) {
        let bytes = match serde_json::to_vec(report) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(error=%err, "failed to encode report for mqtt");
                return;
            }
        };
        let topic = format!("{}/{}", self.topic_prefix, event);
        if let Err(err) = self.client.try_publish(topic, QoS::AtMostOnce, false, bytes) {
            tracing::warn!(error=%err, event, "mqtt publish dropped");
        }
    }
}

pub struct FanoutBroadcaster {
    targets: Vec<Arc<dyn Broadcaster>>,
}

impl FanoutBroadcaster {
    pub fn new(targets: Vec<Arc<dyn Broadcaster>>) -> Self {
        Self { targets }
    }
}

impl Broadcaster for FanoutBroadcaster {
    fn publish(&self, event: &'static str, report: &TelemetryReport) {
        for target in &self.targets {
            target.publish(event, report);
        }
    }

    fn close(&self) {
        for target in &self.targets {
            target.close();
        }
    }
}
