use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use serde::{de::DeserializeOwned, Deserialize};
use tokio::{
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use thermocktat_common::{
    config::MqttConfig,
    topics::{
        command_field, command_filter, snapshot_topic, FIELD_ENABLED, FIELD_FAN_SPEED,
        FIELD_MAX_SETPOINT, FIELD_MIN_SETPOINT, FIELD_MODE, FIELD_SETPOINT,
    },
    wait_for_shutdown, Snapshot, ThermostatService,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandPayload<T> {
    value: Option<T>,
}

pub fn qos_from_level(level: u8) -> anyhow::Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        other => Err(anyhow!("unsupported mqtt qos {other}")),
    }
}

/// Runs the MQTT front end until shutdown: applies `<base>/set/<field>`
/// commands and publishes the snapshot whenever it changes.
pub async fn run(
    service: Arc<dyn ThermostatService>,
    config: MqttConfig,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let qos = qos_from_level(config.qos)?;

    let mut mqtt_options = MqttOptions::new(
        config.client_id.clone(),
        config.broker_host.clone(),
        config.broker_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !config.username.is_empty() {
        mqtt_options.set_credentials(config.username.clone(), config.password.clone());
    }

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 64);
    let mut publisher = SnapshotPublisher {
        topic: snapshot_topic(&config.base_topic),
        qos,
        retain: config.retain_snapshot,
        last: None,
    };

    // The first tick fires immediately, which publishes the initial snapshot.
    let mut publish_tick = time::interval(config.publish_interval());
    publish_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "mqtt controller connecting to {}:{} as {}",
        config.broker_host, config.broker_port, config.client_id
    );

    loop {
        let event = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = publish_tick.tick() => {
                publisher.publish_if_changed(&client, service.get());
                continue;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("mqtt connected");
                let filter = command_filter(&config.base_topic);
                if let Err(err) = client.try_subscribe(filter.as_str(), qos) {
                    warn!("mqtt subscribe to {filter} failed: {err}");
                }
            }
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                if let Err(err) = handle_message(
                    service.as_ref(),
                    &config.base_topic,
                    &message.topic,
                    &message.payload,
                ) {
                    warn!("mqtt message handling error on {}: {err:#}", message.topic);
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!("mqtt poll error: {err}");
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    _ = time::sleep(POLL_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    disconnect(&client, &mut eventloop).await;
    info!("mqtt controller stopped");
    Ok(())
}

struct SnapshotPublisher {
    topic: String,
    qos: QoS,
    retain: bool,
    last: Option<Snapshot>,
}

impl SnapshotPublisher {
    fn publish_if_changed(&mut self, client: &AsyncClient, current: Snapshot) {
        if self.last == Some(current) {
            return;
        }

        let body = match serde_json::to_vec(&current) {
            Ok(body) => body,
            Err(err) => {
                warn!("snapshot serialization failed: {err}");
                return;
            }
        };

        // Left unrecorded on failure so the next tick retries.
        match client.try_publish(self.topic.as_str(), self.qos, self.retain, body) {
            Ok(()) => self.last = Some(current),
            Err(err) => warn!("snapshot publish failed: {err}"),
        }
    }
}

async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if client.try_disconnect().is_err() {
        return;
    }

    let flushed = time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if flushed.is_err() {
        debug!("mqtt disconnect not flushed before grace period");
    }
}

/// Applies one command message. Topics outside `<base>/set/` and unknown
/// fields are ignored.
pub fn handle_message(
    service: &dyn ThermostatService,
    base_topic: &str,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let Some(field) = command_field(base_topic, topic) else {
        return Ok(());
    };

    match field {
        FIELD_ENABLED => service.set_enabled(decode_value(payload)?),
        FIELD_SETPOINT => service.set_setpoint(decode_value(payload)?)?,
        FIELD_MIN_SETPOINT => service.set_min(decode_value(payload)?)?,
        FIELD_MAX_SETPOINT => service.set_max(decode_value(payload)?)?,
        FIELD_MODE => {
            let mode = decode_value::<String>(payload)?;
            service.set_mode(mode.parse()?)?;
        }
        FIELD_FAN_SPEED => {
            let fan_speed = decode_value::<String>(payload)?;
            service.set_fan_speed(fan_speed.parse()?)?;
        }
        other => debug!("ignoring unknown mqtt command field {other}"),
    }

    Ok(())
}

fn decode_value<T: DeserializeOwned>(payload: &[u8]) -> anyhow::Result<T> {
    let command: CommandPayload<T> =
        serde_json::from_slice(payload).context("invalid command payload")?;
    command.value.context("missing field 'value'")
}
