//! WebSocket alert client for vehicles.
//!
//! Provides:
//! - Connection lifecycle (connect at a fixed location, disconnect)
//! - Accident reports and nearby-accident queries
//! - Decoded server frames delivered as [`AlertEvent`]s

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::geo::Coordinate;
use crate::protocol::{self, ClientMessage, NearbyAccident, ProtocolError, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the alert client.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    /// Connection established
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// An accident was reported near us
    Alert {
        accident_id: u64,
        text: String,
        location: Coordinate,
    },
    /// Our report was stored under this id
    Reported { id: u64 },
    /// Reply to a nearby query
    Nearby(Vec<NearbyAccident>),
    /// The server rejected a frame
    Error(String),
}

impl From<ServerMessage> for AlertEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Alert {
                alert,
                latitude,
                longitude,
                accident_id,
            } => AlertEvent::Alert {
                accident_id,
                text: alert,
                location: Coordinate::new(latitude, longitude),
            },
            ServerMessage::Reported { id, .. } => AlertEvent::Reported { id },
            ServerMessage::Nearby { alerts } => AlertEvent::Nearby(alerts),
            ServerMessage::Error { message } => AlertEvent::Error(message),
        }
    }
}

/// The alert client.
///
/// Holds one WebSocket connection registered at `location`. Outgoing frames
/// go through a writer task; incoming frames are decoded by a reader task
/// and surfaced on the event channel.
pub struct AlertClient {
    location: Coordinate,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<AlertEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<AlertEvent>,

    /// Server base URL, e.g. `ws://127.0.0.1:8000`
    server_url: String,
}

impl AlertClient {
    pub fn new(location: Coordinate, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            location,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<AlertEvent>> {
        self.event_rx.take()
    }

    /// Full connect URL including the location query.
    pub fn connect_url(&self) -> String {
        format!(
            "{}/ws/alerts?lat={}&lon={}",
            self.server_url.trim_end_matches('/'),
            self.location.latitude,
            self.location.longitude
        )
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = self.connect_url();
        let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Connect to {url} failed: {e}");
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectFailed(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(AlertEvent::Connected).await;
        log::debug!("Connected to {url}");

        // Reader task: decode incoming frames into events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match protocol::decode::<ServerMessage>(text.as_str()) {
                            Ok(server_msg) => {
                                let _ = event_tx.send(AlertEvent::from(server_msg)).await;
                            }
                            Err(e) => log::warn!("Ignoring unreadable server frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(AlertEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Report an accident at `location`.
    pub async fn report(
        &self,
        location: Coordinate,
        description: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Report {
            latitude: location.latitude,
            longitude: location.longitude,
            description: description.into(),
        })
        .await
    }

    /// Ask for stored accidents around our own location.
    pub async fn request_nearby(&self, max_km: Option<f64>) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Nearby { max_km }).await
    }

    /// Send a close frame and stop writing.
    ///
    /// The state is `Disconnected` as soon as this returns, even if the
    /// writer task had already gone away.
    pub async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Disconnected;
        if let Some(tx) = self.outgoing_tx.take() {
            tx.send(Message::Close(None))
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }

        let text = protocol::encode(msg)?;
        match self.outgoing_tx {
            Some(ref tx) => tx
                .send(Message::Text(text.into()))
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Location this client registers at.
    pub fn location(&self) -> Coordinate {
        self.location
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
