use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use rumqttc::v5::{
    AsyncClient, Event, EventLoop, MqttOptions, mqttbytes::QoS, mqttbytes::v5::Packet,
};

use tokio::sync::mpsc;

use tracing::{debug, error, warn};

use eltako::actor::{PositionMessage, PositionUpdate};
use eltako::commands;
use eltako::config::MqttConfig;
use eltako::registry::ActorRegistry;

// Client identifier announced to the broker.
const CLIENT_ID: &str = "eltako_mqtt";

// The capacity of the bounded asynchronous channel.
const ASYNC_CHANNEL_CAPACITY: usize = 10;

// Keep alive time to send `pingreq` to broker when the connection is idle.
const KEEP_ALIVE_TIME: Duration = Duration::from_secs(5);

// Pause before polling the broker again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Creates the broker client and its event loop.
///
/// The command topic subscription is issued by the command router on
/// every connection acknowledgement, see [`run_command_router`].
pub fn connect(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(CLIENT_ID, config.host.clone(), config.port);
    options.set_keep_alive(KEEP_ALIVE_TIME);
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username.clone(), password.clone());
    }

    AsyncClient::new(options, ASYNC_CHANNEL_CAPACITY)
}

// Extracts the actor name out of a `{base}/{name}/set` topic.
fn actor_name<'a>(topic: &'a str, base: &str) -> Option<&'a str> {
    let name = topic
        .strip_prefix(base)?
        .strip_prefix('/')?
        .strip_suffix("/set")?;
    (!name.is_empty() && !name.contains('/')).then_some(name)
}

#[inline]
fn is_connect_ack(event: &Event) -> bool {
    matches!(event, Event::Incoming(Packet::ConnAck(_)))
}

#[inline]
fn parse_publish(event: &Event) -> Option<(String, Bytes)> {
    let packet = match event {
        Event::Incoming(packet) => packet,
        Event::Outgoing(_) => return None,
    };

    let Packet::Publish(publish) = packet else {
        return None;
    };

    match core::str::from_utf8(&publish.topic) {
        Ok(topic) => Some((topic.to_string(), publish.payload.clone())),
        Err(e) => {
            warn!("Non UTF-8 topic, discard it: {e}");
            None
        }
    }
}

/// Routes inbound command messages to the matching actor.
///
/// The subscription to `{base}/+/set` is issued on every connection
/// acknowledgement; sessions start clean, so a reconnect would
/// otherwise drop the subscription silently.
///
/// Command application runs as a detached task per message; the router
/// never waits on device completion.
pub async fn run_command_router(
    client: AsyncClient,
    mut eventloop: EventLoop,
    registry: Arc<ActorRegistry>,
    base_topic: String,
) {
    let filter = format!("{base_topic}/+/set");

    loop {
        let event = match eventloop.poll().await {
            Ok(event) => event,
            Err(e) => {
                error!("Lost connection to the broker: {e}");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        if is_connect_ack(&event) {
            if let Err(e) = client.subscribe(filter.as_str(), QoS::AtMostOnce).await {
                error!("Failed to subscribe to topic {filter}: {e}");
            }
            continue;
        }

        let Some((topic, payload)) = parse_publish(&event) else {
            continue;
        };
        debug!("Received message on {topic}");

        let Some(name) = actor_name(&topic, &base_topic) else {
            debug!("Ignoring message on unexpected topic {topic}");
            continue;
        };

        let Some(actor) = registry.get_actor(name) else {
            error!("Unknown actor `{name}`");
            continue;
        };

        let command = match commands::parse(&payload) {
            Ok(command) => command,
            Err(e) => {
                error!("Failed parsing command: {e}");
                continue;
            }
        };

        drop(tokio::spawn(async move {
            actor.apply(command).await;
        }));
    }
}

/// Forwards polled position changes to the per-device topics
/// `{base}/{name}` as retained messages.
pub async fn run_position_publisher(
    client: AsyncClient,
    mut updates: mpsc::Receiver<PositionUpdate>,
    base_topic: String,
) {
    while let Some(update) = updates.recv().await {
        let message = PositionMessage {
            position: update.position,
        };
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize position of {}: {e}", update.name);
                continue;
            }
        };

        let topic = format!("{base_topic}/{}", update.name);
        if let Err(e) = client.publish(topic, QoS::AtLeastOnce, true, payload).await {
            error!("Failed to publish position of {}: {e}", update.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::v5::Event;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Packet, PingResp};

    use super::{actor_name, is_connect_ack};

    #[test]
    fn connection_acknowledgements_are_detected() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(is_connect_ack(&connack));

        assert!(!is_connect_ack(&Event::Incoming(Packet::PingResp(
            PingResp
        ))));
    }

    #[test]
    fn name_between_base_and_set_suffix() {
        assert_eq!(actor_name("eltako/Office East/set", "eltako"), Some("Office East"));
        assert_eq!(actor_name("home/blinds/west/set", "home/blinds"), Some("west"));
    }

    #[test]
    fn non_command_topics_are_ignored() {
        assert_eq!(actor_name("eltako/Office East", "eltako"), None);
        assert_eq!(actor_name("other/Office East/set", "eltako"), None);
        assert_eq!(actor_name("eltako//set", "eltako"), None);
        assert_eq!(actor_name("eltako/a/b/set", "eltako"), None);
    }
}
