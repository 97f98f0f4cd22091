use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::connection::{Connection, Frame};
use crate::error::ConnectionError;

/// In-memory console sink that tests can read back.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Pong(Vec<u8>),
    Close,
}

/// Scripted connection. Queued results are handed out in order; once the
/// queue is empty `receive_frame` waits forever.
pub struct MockConnection {
    inbound_tx: mpsc::UnboundedSender<Result<Frame, ConnectionError>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Frame, ConnectionError>>>,
    sent: Mutex<Vec<Sent>>,
    close_sent: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            sent: Mutex::new(Vec::new()),
            close_sent: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        })
    }

    pub fn push(&self, frame: Frame) {
        let _ = self.inbound_tx.send(Ok(frame));
    }

    pub fn push_err(&self, err: ConnectionError) {
        let _ = self.inbound_tx.send(Err(err));
    }

    /// Make every later send fail with a transport error.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, sent: Sent) -> Result<(), ConnectionError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(sent);
        Ok(())
    }
}

impl Connection for MockConnection {
    async fn receive_frame(&self) -> Result<Frame, ConnectionError> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await.unwrap_or(Err(ConnectionError::Closed))
    }

    async fn send_text(&self, payload: &str) -> Result<(), ConnectionError> {
        if self.close_sent.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        self.record(Sent::Text(payload.to_string()))
    }

    async fn send_pong(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        self.record(Sent::Pong(payload))
    }

    async fn send_close(&self) -> Result<(), ConnectionError> {
        if self.close_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.record(Sent::Close)
    }
}
