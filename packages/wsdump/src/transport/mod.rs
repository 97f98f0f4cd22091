//! tokio-tungstenite backed [`Connection`].

pub mod tls;

use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Control, Data, OpCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::connection::{Connection, Frame, Opcode};
use crate::error::{ConnectionError, StartupError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Details fixed at handshake time.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub url: String,
    /// Subprotocol the server picked, if any.
    pub subprotocol: Option<String>,
    pub origin: Option<String>,
}

/// One open WebSocket session.
///
/// The read half is only touched by the dispatcher. The write half sits
/// behind its own lock, which is the single serialization point for text,
/// pong and close frames.
pub struct WsConnection {
    reader: Mutex<SplitStream<WsStream>>,
    writer: Mutex<SplitSink<WsStream, Message>>,
    close_sent: AtomicBool,
    info: ConnectionInfo,
}

impl WsConnection {
    /// Perform the opening handshake described by `config`.
    pub async fn connect(config: &SessionConfig) -> Result<Self, StartupError> {
        let request = build_request(config)?;
        let secure = request.uri().scheme_str() == Some("wss");

        let connector = if secure {
            Some(tls::connector(config.nocert)?)
        } else {
            if config.nocert {
                warn!("--nocert has no effect on a ws:// url");
            }
            None
        };

        debug!(url = %config.url, "opening websocket");
        let handshake =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
        let result = match config.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| StartupError::HandshakeTimeout(limit))?,
            None => handshake.await,
        };
        let (stream, response) = result.map_err(StartupError::Handshake)?;

        let subprotocol = response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        info!(url = %config.url, subprotocol = ?subprotocol, "websocket connected");

        Ok(Self::from_stream(
            stream,
            ConnectionInfo {
                url: config.url.clone(),
                subprotocol,
                origin: config.origin.clone(),
            },
        ))
    }

    pub fn from_stream(stream: WsStream, info: ConnectionInfo) -> Self {
        let (writer, reader) = stream.split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            close_sent: AtomicBool::new(false),
            info,
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn is_open(&self) -> bool {
        !self.close_sent.load(Ordering::Acquire)
    }

    async fn write(&self, message: Message) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        writer.send(message).await.map_err(ConnectionError::from)
    }
}

impl Connection for WsConnection {
    async fn receive_frame(&self) -> Result<Frame, ConnectionError> {
        let mut reader = self.reader.lock().await;
        match reader.next().await {
            Some(Ok(message)) => Ok(frame_from_message(message)),
            Some(Err(e)) => Err(e.into()),
            None => Err(ConnectionError::Closed),
        }
    }

    async fn send_text(&self, payload: &str) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        self.write(Message::Text(payload.to_owned().into())).await
    }

    /// Reading a ping already queued a pong with the same payload inside
    /// tungstenite, and any later write carries it out. Flushing sends that
    /// queued reply if it is still pending, so each ping gets one pong.
    async fn send_pong(&self, _payload: Vec<u8>) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await.map_err(ConnectionError::from)
    }

    async fn send_close(&self) -> Result<(), ConnectionError> {
        if self.close_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        // Closing the sink sends our close frame, or just flushes the reply
        // tungstenite already queued when the peer closed first.
        match writer.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the handshake request: scheme check, Origin and subprotocol headers.
pub fn build_request(config: &SessionConfig) -> Result<Request, StartupError> {
    let mut request = config.url.as_str().into_client_request().map_err(|source| {
        StartupError::InvalidUrl {
            url: config.url.clone(),
            source,
        }
    })?;

    match request.uri().scheme_str() {
        Some("ws") | Some("wss") => {}
        other => {
            return Err(StartupError::UnsupportedScheme(
                other.unwrap_or_default().to_string(),
            ));
        }
    }

    let headers = request.headers_mut();
    if let Some(origin) = &config.origin {
        let value = HeaderValue::from_str(origin)
            .map_err(|_| StartupError::InvalidHeader { name: "Origin" })?;
        headers.insert("Origin", value);
    }
    if !config.subprotocols.is_empty() {
        let value = HeaderValue::from_str(&config.subprotocols.join(", ")).map_err(|_| {
            StartupError::InvalidHeader {
                name: "Sec-WebSocket-Protocol",
            }
        })?;
        headers.insert("Sec-WebSocket-Protocol", value);
    }
    Ok(request)
}

fn frame_from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::text(text.as_str()),
        Message::Binary(data) => Frame::new(Opcode::Binary, data.to_vec()),
        Message::Ping(data) => Frame::new(Opcode::Ping, data.to_vec()),
        Message::Pong(data) => Frame::new(Opcode::Pong, data.to_vec()),
        Message::Close(Some(close)) => {
            Frame::close(Some(u16::from(close.code)), close.reason.as_str())
        }
        Message::Close(None) => Frame::close(None, ""),
        Message::Frame(frame) => Frame::new(
            opcode_from_wire(frame.header().opcode),
            frame.payload().to_vec(),
        ),
    }
}

fn opcode_from_wire(opcode: OpCode) -> Opcode {
    match opcode {
        OpCode::Data(Data::Continue) => Opcode::Continuation,
        OpCode::Data(Data::Text) => Opcode::Text,
        OpCode::Data(Data::Binary) => Opcode::Binary,
        OpCode::Data(Data::Reserved(code)) => Opcode::Other(code),
        OpCode::Control(Control::Close) => Opcode::Close,
        OpCode::Control(Control::Ping) => Opcode::Ping,
        OpCode::Control(Control::Pong) => Opcode::Pong,
        OpCode::Control(Control::Reserved(code)) => Opcode::Other(code),
    }
}
