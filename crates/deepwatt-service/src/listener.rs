//! MQTT subscriber feeding the ingestion queue.
//!
//! # Connection lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^                            |
//!      +------ connection lost -----+
//! ```
//!
//! [`Listener::connect`] performs the first connection under
//! `mqtt.connect_timeout`; failing here is fatal for the process. Afterwards
//! [`Listener::run`] polls the event loop forever: on a connection error it
//! waits according to [`ReconnectOptions`](crate::config::ReconnectOptions)
//! and lets the event loop reconnect. Every `ConnAck` re-subscribes to
//! `{topic_prefix}/#` because the broker session is not persisted.
//!
//! The event loop only forwards publishes into the bounded ingestion queue
//! with [`enqueue`]; it never waits on the store.

use std::sync::Arc;
use std::time::Duration;

use deepwatt_types::topic::subscription_filter;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{MqttConfig, ReconnectOptions, parse_broker_url};
use crate::ingest::{InboundMessage, enqueue};
use crate::state::{AppState, ConnectionState};

/// Capacity of the client's outgoing request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Errors that can occur while establishing the MQTT connection.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Invalid MQTT broker URL: {0}")]
    InvalidBroker(String),

    #[error("Failed to connect to MQTT broker: {0}")]
    Connect(#[from] ConnectionError),

    #[error("Timed out after {0:?} waiting for the MQTT broker")]
    ConnectTimeout(Duration),

    #[error("Failed to subscribe: {0}")]
    Subscribe(#[from] rumqttc::ClientError),
}

/// Build client options from configuration.
pub fn mqtt_options(config: &MqttConfig) -> Result<MqttOptions, ListenerError> {
    let endpoint = parse_broker_url(&config.broker).map_err(ListenerError::InvalidBroker)?;

    let mut options = MqttOptions::new(&config.client_id, endpoint.host, endpoint.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive));

    if let Some(username) = &config.username {
        let password = config.password.as_deref().unwrap_or_default();
        options.set_credentials(username, password);
    }

    if endpoint.use_tls {
        options.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    Ok(options)
}

/// A connected MQTT subscriber.
pub struct Listener {
    client: AsyncClient,
    eventloop: EventLoop,
    filter: String,
    reconnect: ReconnectOptions,
}

impl Listener {
    /// Connect to the broker and subscribe.
    ///
    /// Resolves once the broker has acknowledged the connection, or fails
    /// after `mqtt.connect_timeout` seconds.
    pub async fn connect(state: &AppState) -> Result<Self, ListenerError> {
        let config = &state.config.mqtt;
        let options = mqtt_options(config)?;
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let filter = subscription_filter(&config.topic_prefix);

        info!("Connecting to MQTT broker {}", config.broker);
        state
            .listener
            .set_connection_state(ConnectionState::Connecting);

        let timeout = Duration::from_secs(config.connect_timeout);
        let connected = tokio::time::timeout(timeout, wait_for_connack(&mut eventloop)).await;
        match connected {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                state
                    .listener
                    .set_connection_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
            Err(_) => {
                state
                    .listener
                    .set_connection_state(ConnectionState::Disconnected);
                return Err(ListenerError::ConnectTimeout(timeout));
            }
        }

        client.subscribe(filter.as_str(), QoS::AtMostOnce).await?;
        state
            .listener
            .set_connection_state(ConnectionState::Connected);
        info!("MQTT connected, subscribed to '{}'", filter);

        Ok(Self {
            client,
            eventloop,
            filter,
            reconnect: config.reconnect_options(),
        })
    }

    /// A handle for publishing on this connection.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Poll the connection until the stop signal fires.
    ///
    /// Publishes are forwarded to `tx`. Connection errors never end the loop.
    pub async fn run(mut self, state: Arc<AppState>, tx: mpsc::Sender<InboundMessage>) {
        let mut stop_rx = state.listener.subscribe_stop();
        let mut attempt: u32 = 0;

        loop {
            let event = tokio::select! {
                event = self.eventloop.poll() => event,
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        info!("MQTT listener received stop signal");
                        break;
                    }
                    continue;
                }
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = String::from_utf8_lossy(publish.topic.as_ref()).into_owned();
                    enqueue(&state, &tx, InboundMessage::new(topic, publish.payload));
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("MQTT reconnected: {:?}", ack);
                    state.listener.record_reconnect();
                    state
                        .listener
                        .set_connection_state(ConnectionState::Connected);
                    attempt = 0;
                    if let Err(e) = self.client.try_subscribe(self.filter.as_str(), QoS::AtMostOnce)
                    {
                        warn!("Failed to re-subscribe to '{}': {}", self.filter, e);
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    debug!("MQTT subscription acknowledged");
                }
                Ok(_) => {}
                Err(e) => {
                    state
                        .listener
                        .set_connection_state(ConnectionState::Disconnected);
                    let delay = self.reconnect.delay_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        "MQTT connection error: {}. Reconnecting in {:?} (attempt {})",
                        e, delay, attempt
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop_rx.changed() => {
                            info!("MQTT listener received stop signal");
                            break;
                        }
                    }
                    state
                        .listener
                        .set_connection_state(ConnectionState::Connecting);
                }
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!("Error disconnecting MQTT client: {}", e);
        }
        state
            .listener
            .set_connection_state(ConnectionState::Disconnected);
        info!("MQTT listener stopped");
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            debug!("MQTT connection acknowledged: {:?}", ack);
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use deepwatt_store::Store;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    /// Read one MQTT control packet, returning its first header byte and body.
    async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let header = stream.read_u8().await.unwrap();
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.unwrap();
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await.unwrap();
        (header, body)
    }

    async fn accept_connect(tcp: &TcpListener) -> TcpStream {
        let (mut stream, _) = tcp.accept().await.unwrap();
        let (header, _) = read_packet(&mut stream).await;
        assert_eq!(header >> 4, 1, "expected CONNECT");
        stream
    }

    /// Read a SUBSCRIBE, acknowledge it and return its first topic filter.
    async fn read_subscribe(stream: &mut TcpStream) -> String {
        let (header, body) = read_packet(stream).await;
        assert_eq!(header >> 4, 8, "expected SUBSCRIBE");
        let filter_len = u16::from_be_bytes([body[2], body[3]]) as usize;
        let filter = String::from_utf8(body[4..4 + filter_len].to_vec()).unwrap();
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
            .await
            .unwrap();
        filter
    }

    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let remaining = 2 + topic.len() + payload.len();
        assert!(remaining < 128);
        let mut packet = vec![0x30, remaining as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn test_mqtt_options_from_config() {
        let config = MqttConfig {
            broker: "mqtt://broker.local:1884".to_string(),
            client_id: "ingest-test".to_string(),
            username: Some("meter".to_string()),
            password: Some("secret".to_string()),
            keep_alive: 45,
            ..MqttConfig::default()
        };

        let options = mqtt_options(&config).unwrap();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "ingest-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(45));
    }

    #[test]
    fn test_mqtt_options_default_port() {
        let config = MqttConfig {
            broker: "mqtt://broker.local".to_string(),
            ..MqttConfig::default()
        };
        let options = mqtt_options(&config).unwrap();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1883));
    }

    #[test]
    fn test_mqtt_options_invalid_broker() {
        let config = MqttConfig {
            broker: "http://localhost".to_string(),
            ..MqttConfig::default()
        };
        assert!(matches!(
            mqtt_options(&config),
            Err(ListenerError::InvalidBroker(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let mut config = Config::default();
        // Nothing listens on port 1 on a test host.
        config.mqtt.broker = "mqtt://127.0.0.1:1".to_string();
        config.mqtt.connect_timeout = 5;
        let state = AppState::new(Store::open_in_memory().unwrap(), config);

        let result = Listener::connect(&state).await;
        assert!(matches!(
            result,
            Err(ListenerError::Connect(_) | ListenerError::ConnectTimeout(_))
        ));
        assert_eq!(
            state.listener.connection_state(),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_and_forwards_publishes() {
        const PAYLOAD: &[u8] = br#"{"power":230.0,"timestamp":1700000000}"#;

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = tcp.local_addr().unwrap().port();

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (reconnecting_tx, reconnecting_rx) = oneshot::channel::<()>();
        let (proceed_tx, proceed_rx) = oneshot::channel::<()>();

        let broker = tokio::spawn(async move {
            let mut first = accept_connect(&tcp).await;
            first.write_all(&CONNACK).await.unwrap();
            let first_filter = read_subscribe(&mut first).await;
            first
                .write_all(&publish_packet("deepwatt/dev1", PAYLOAD))
                .await
                .unwrap();

            // Drop the connection once the publish has been forwarded
            release_rx.await.unwrap();
            drop(first);

            let mut second = accept_connect(&tcp).await;
            reconnecting_tx.send(()).unwrap();
            proceed_rx.await.unwrap();
            second.write_all(&CONNACK).await.unwrap();
            let second_filter = read_subscribe(&mut second).await;
            (first_filter, second_filter, second)
        });

        let mut config = Config::default();
        config.mqtt.broker = format!("mqtt://127.0.0.1:{}", port);
        config.mqtt.connect_timeout = 5;
        config.mqtt.reconnect_initial_delay_ms = 10;
        config.mqtt.reconnect_max_delay_ms = 50;
        let state = AppState::new(Store::open_in_memory().unwrap(), config);

        let listener = Listener::connect(&state).await.unwrap();
        assert_eq!(
            state.listener.connection_state(),
            ConnectionState::Connected
        );

        let (tx, mut rx) = mpsc::channel(8);
        let run = tokio::spawn(listener.run(Arc::clone(&state), tx));

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("publish should be forwarded")
            .unwrap();
        assert_eq!(message.topic, "deepwatt/dev1");
        assert_eq!(message.payload.as_ref(), PAYLOAD);

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), reconnecting_rx)
            .await
            .expect("listener should reconnect")
            .unwrap();
        assert_eq!(
            state.listener.connection_state(),
            ConnectionState::Connecting
        );
        proceed_tx.send(()).unwrap();

        let (first_filter, second_filter, _second) =
            tokio::time::timeout(Duration::from_secs(5), broker)
                .await
                .expect("listener should re-subscribe")
                .unwrap();
        assert_eq!(first_filter, "deepwatt/#");
        assert_eq!(second_filter, "deepwatt/#");
        assert_eq!(state.listener.stats().reconnects, 1);
        assert_eq!(
            state.listener.connection_state(),
            ConnectionState::Connected
        );

        state.listener.signal_stop();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("listener should stop")
            .unwrap();
        assert_eq!(
            state.listener.connection_state(),
            ConnectionState::Disconnected
        );
    }
}
