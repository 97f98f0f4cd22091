// Library interface for wsdump
// Exposes the session engine so it can be driven without a real terminal

pub mod config;
pub mod connection;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod input;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use config::{CliOverrides, SessionConfig};
pub use connection::{Connection, Frame, Opcode};
pub use console::Console;
pub use dispatcher::{DispatchOptions, DispatchOutcome, format_frame, run_dispatcher};
pub use error::{ConnectionError, SessionError, StartupError};
pub use session::{SessionEnd, SessionOptions, run, run_with};
pub use transport::WsConnection;
