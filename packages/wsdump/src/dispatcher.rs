//! Background reader: one frame per iteration, control frames answered
//! inline, everything renderable handed to the console.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Frame, Opcode};
use crate::console::Console;
use crate::error::ConnectionError;

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    pub verbosity: u8,
    /// Stop when no frame arrives for this long. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

/// Why the dispatcher stopped reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The peer sent a close frame and it was acknowledged.
    Closed,
    /// A malformed frame was received and treated as a close.
    ProtocolClosed(String),
    /// Receiving or answering a control frame failed at the socket level.
    TransportFailed(ConnectionError),
    IdleTimeout,
    Cancelled,
}

impl DispatchOutcome {
    /// Short operator-facing description.
    pub fn describe(&self) -> String {
        match self {
            DispatchOutcome::Closed => "connection closed".to_string(),
            DispatchOutcome::ProtocolClosed(reason) => format!("connection closed ({reason})"),
            DispatchOutcome::TransportFailed(e) => format!("connection lost: {e}"),
            DispatchOutcome::IdleTimeout => "no data received, giving up".to_string(),
            DispatchOutcome::Cancelled => "reader stopped".to_string(),
        }
    }
}

/// Render a frame according to the verbosity level.
///
/// Level 0 shows only data payloads, unlabeled. Level 1 and up show every
/// frame as `<opcode>: <payload>`.
pub fn format_frame(frame: &Frame, verbosity: u8) -> Option<String> {
    if verbosity == 0 {
        return frame.opcode.is_data().then(|| payload_text(frame));
    }
    Some(format!("{}: {}", frame.opcode, payload_text(frame)))
}

fn payload_text(frame: &Frame) -> String {
    if frame.opcode == Opcode::Close {
        return match frame.close_status() {
            Some((code, reason)) if reason.is_empty() => code.to_string(),
            Some((code, reason)) => format!("{code} {reason}"),
            None => String::new(),
        };
    }
    match std::str::from_utf8(&frame.payload) {
        Ok(text) => text.to_string(),
        Err(_) => frame
            .payload
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Read frames until the session ends. `closed` is cancelled on the way out
/// so the foreground loop can notice.
pub async fn run_dispatcher<C: Connection>(
    conn: Arc<C>,
    console: Console,
    options: DispatchOptions,
    cancel: CancellationToken,
    closed: CancellationToken,
) -> DispatchOutcome {
    let outcome = dispatch_loop(conn.as_ref(), &console, options, &cancel).await;
    match &outcome {
        DispatchOutcome::Closed | DispatchOutcome::Cancelled => {
            info!("dispatcher stopped: {}", outcome.describe())
        }
        _ => warn!("dispatcher stopped: {}", outcome.describe()),
    }
    closed.cancel();
    outcome
}

async fn dispatch_loop<C: Connection>(
    conn: &C,
    console: &Console,
    options: DispatchOptions,
    cancel: &CancellationToken,
) -> DispatchOutcome {
    let render = |frame: &Frame| {
        if let Some(line) = format_frame(frame, options.verbosity) {
            console.render_inbound(&line);
        }
    };

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return DispatchOutcome::Cancelled,
            received = receive(conn, options.idle_timeout) => received,
        };

        let frame = match received {
            Some(Ok(frame)) => frame,
            Some(Err(ConnectionError::Protocol(reason))) => {
                warn!("invalid frame, treating as close: {}", reason);
                render(&Frame::close(None, ""));
                return DispatchOutcome::ProtocolClosed(reason);
            }
            Some(Err(e)) => return DispatchOutcome::TransportFailed(e),
            None => return DispatchOutcome::IdleTimeout,
        };
        debug!(opcode = %frame.opcode, len = frame.payload.len(), "frame received");

        match frame.opcode {
            Opcode::Close => {
                if let Err(e) = conn.send_close().await {
                    debug!("close acknowledgment failed: {}", e);
                }
                render(&frame);
                return DispatchOutcome::Closed;
            }
            Opcode::Ping => {
                if let Err(e) = conn.send_pong(frame.payload.clone()).await {
                    return DispatchOutcome::TransportFailed(e);
                }
                render(&frame);
            }
            _ => render(&frame),
        }
    }
}

/// `None` means the idle timeout elapsed.
async fn receive<C: Connection>(
    conn: &C,
    idle_timeout: Option<Duration>,
) -> Option<Result<Frame, ConnectionError>> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, conn.receive_frame()).await.ok(),
        None => Some(conn.receive_frame().await),
    }
}
