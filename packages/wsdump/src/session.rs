use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::connection::Connection;
use crate::console::Console;
use crate::dispatcher::{DispatchOptions, DispatchOutcome, run_dispatcher};
use crate::error::{ConnectionError, SessionError};
use crate::input::{self, InputEvent};
use crate::transport::WsConnection;

/// How long to wait for our close frame to go out before giving up on it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Why the interactive loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Interrupted,
    EndOfInput,
    /// The dispatcher stopped reading, so there is nobody left to talk to.
    RemoteClosed,
}

/// How a session ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Interrupted,
    EndOfInput,
    RemoteClosed(DispatchOutcome),
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub dispatch: DispatchOptions,
    /// Sent once before the first prompt.
    pub initial_text: Option<String>,
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            dispatch: DispatchOptions {
                verbosity: config.verbosity,
                idle_timeout: config.idle_timeout,
            },
            initial_text: config.initial_text.clone(),
        }
    }
}

/// Tokens the interactive loop watches besides its input.
#[derive(Debug, Clone, Default)]
pub struct LoopSignals {
    /// Operator interrupt (Ctrl-C).
    pub interrupt: CancellationToken,
    /// Cancelled by the dispatcher when it stops.
    pub remote_closed: CancellationToken,
}

/// Forward operator lines as text frames, one at a time, until interrupted,
/// out of input, or the connection is gone.
pub async fn run_interactive<C: Connection>(
    conn: &C,
    console: &Console,
    lines: &mut mpsc::Receiver<InputEvent>,
    signals: &LoopSignals,
) -> Result<LoopExit, ConnectionError> {
    loop {
        let event = tokio::select! {
            biased;
            _ = signals.interrupt.cancelled() => return Ok(LoopExit::Interrupted),
            _ = signals.remote_closed.cancelled() => return Ok(LoopExit::RemoteClosed),
            event = lines.recv() => event,
        };

        let line = match event {
            Some(InputEvent::Line(line)) => line,
            Some(InputEvent::Eof) | None => return Ok(LoopExit::EndOfInput),
        };

        tokio::select! {
            biased;
            _ = signals.interrupt.cancelled() => return Ok(LoopExit::Interrupted),
            sent = conn.send_text(&line) => sent?,
        }
        debug!(len = line.len(), "line sent");
        console.show_prompt();
    }
}

/// Connect, then run the session on stdin/stdout until it ends.
pub async fn run(config: &SessionConfig) -> Result<SessionEnd, SessionError> {
    let conn = Arc::new(WsConnection::connect(config).await?);
    let console = Console::stdout(config.prompt.clone(), config.color);

    if config.verbosity > 0 {
        if let Some(subprotocol) = &conn.info().subprotocol {
            console.println(&format!("subprotocol: {subprotocol}"));
        }
    }
    console.println("Press Ctrl+C to quit");

    let interrupt = CancellationToken::new();
    let ctrl_c = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            ctrl_c.cancel();
        }
    });

    let lines = input::stdin_lines(config.encoding);
    let end = run_with(
        conn,
        console.clone(),
        lines,
        SessionOptions::from(config),
        interrupt,
    )
    .await?;
    if !matches!(end, SessionEnd::RemoteClosed(_)) {
        // leave the prompt line
        console.println("");
    }
    Ok(end)
}

/// Run a session over an open connection.
///
/// The dispatcher is spawned first, then the initial text goes out, then the
/// interactive loop runs in the calling task. When the loop ends the
/// dispatcher is cancelled and left to wind down on its own.
pub async fn run_with<C: Connection>(
    conn: Arc<C>,
    console: Console,
    mut lines: mpsc::Receiver<InputEvent>,
    options: SessionOptions,
    interrupt: CancellationToken,
) -> Result<SessionEnd, SessionError> {
    let cancel = CancellationToken::new();
    let signals = LoopSignals {
        interrupt,
        remote_closed: CancellationToken::new(),
    };
    let dispatcher = tokio::spawn(run_dispatcher(
        conn.clone(),
        console.clone(),
        options.dispatch,
        cancel.clone(),
        signals.remote_closed.clone(),
    ));
    // Dropping the guard cancels the dispatcher on every exit path below.
    let _cancel_on_exit = cancel.drop_guard();

    if let Some(text) = &options.initial_text {
        conn.send_text(text).await?;
        debug!("initial text sent");
    }
    console.show_prompt();

    let end = match run_interactive(conn.as_ref(), &console, &mut lines, &signals).await? {
        LoopExit::Interrupted => {
            close_best_effort(conn.as_ref()).await;
            SessionEnd::Interrupted
        }
        LoopExit::EndOfInput => {
            close_best_effort(conn.as_ref()).await;
            SessionEnd::EndOfInput
        }
        LoopExit::RemoteClosed => {
            // The dispatcher has already decided to stop; this only collects
            // its reason.
            let outcome = dispatcher.await.unwrap_or(DispatchOutcome::Cancelled);
            // The peer never started a closing handshake in these cases.
            if matches!(
                outcome,
                DispatchOutcome::IdleTimeout | DispatchOutcome::Cancelled
            ) {
                close_best_effort(conn.as_ref()).await;
            }
            console.render_status(&outcome.describe());
            SessionEnd::RemoteClosed(outcome)
        }
    };
    Ok(end)
}

async fn close_best_effort<C: Connection>(conn: &C) {
    match tokio::time::timeout(CLOSE_GRACE, conn.send_close()).await {
        Ok(Ok(())) => debug!("close sent"),
        Ok(Err(e)) => debug!("close failed: {}", e),
        Err(_) => debug!("close timed out"),
    }
}
