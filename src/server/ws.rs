// src/server/ws.rs

//! WebSocket glue: the axum upgrade route and the transport adapter that
//! lets an upgraded socket serve as a hub transport.

use crate::connection::transport::{Frame, Transport, TransportReader, TransportWriter, Upgrade};
use crate::core::{Hub, HubError};
use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// `GET /ws`: upgrades the request and hands the socket to the hub.
pub async fn upgrade_handler(State(hub): State<Arc<Hub>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        match hub.accept(WsUpgrade::new(socket)).await {
            Ok(id) => debug!("accepted websocket connection {id}"),
            Err(err) => warn!("failed to accept websocket connection: {err}"),
        }
    })
}

/// The upgrade collaborator for sockets the HTTP layer already upgraded;
/// axum completes the protocol switch before the hub ever sees the request.
pub struct WsUpgrade {
    socket: WebSocket,
}

impl WsUpgrade {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Upgrade for WsUpgrade {
    async fn upgrade(self) -> Result<Box<dyn Transport>, HubError> {
        Ok(Box::new(WsTransport {
            socket: self.socket,
        }))
    }
}

/// One established WebSocket as a hub transport.
pub struct WsTransport {
    socket: WebSocket,
}

impl Transport for WsTransport {
    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (sink, stream) = self.socket.split();
        (Box::new(WsReader { stream }), Box::new(WsWriter { sink }))
    }
}

struct WsReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl TransportReader for WsReader {
    async fn next(&mut self) -> Option<Result<Bytes, HubError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(Ok(Bytes::copy_from_slice(text.as_bytes())));
                }
                Some(Ok(Message::Binary(data))) => return Some(Ok(data)),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return None,
                Some(Err(err)) => return Some(Err(HubError::Transport(err.to_string()))),
                None => return None,
            }
        }
    }
}

struct WsWriter {
    sink: SplitSink<WebSocket, Message>,
}

impl WsWriter {
    fn to_message(message: Bytes) -> Message {
        // Commands serialize to JSON text; anything else rides as binary.
        match std::str::from_utf8(&message) {
            Ok(text) => Message::Text(text.to_string().into()),
            Err(_) => Message::Binary(message),
        }
    }
}

#[async_trait]
impl TransportWriter for WsWriter {
    async fn write(&mut self, frame: Frame) -> Result<(), HubError> {
        let message = match frame {
            Frame::Message(message) => Self::to_message(message),
            Frame::Ping => Message::Ping(Bytes::new()),
            Frame::Close => Message::Close(None),
        };
        self.sink
            .send(message)
            .await
            .map_err(|err| HubError::Transport(err.to_string()))
    }

    async fn write_batch(&mut self, batch: Vec<Bytes>) -> Result<(), HubError> {
        for message in batch {
            self.sink
                .feed(Self::to_message(message))
                .await
                .map_err(|err| HubError::Transport(err.to_string()))?;
        }
        self.sink
            .flush()
            .await
            .map_err(|err| HubError::Transport(err.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}
