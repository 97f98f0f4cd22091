use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::RenderError;

const CLEAR_LINE: &[u8] = b"\r\x1b[2K";
const INBOUND_COLOR: &[u8] = b"\x1b[34m";
const DEFAULT_COLOR: &[u8] = b"\x1b[39m";
const INBOUND_MARKER: &str = "< ";

struct ConsoleState {
    out: Box<dyn Write + Send>,
    prompt: String,
    color: bool,
}

/// Shared terminal writer.
///
/// Every method performs one complete update while holding the lock, so an
/// inbound message rendered from the dispatcher can never land in the middle
/// of a prompt redraw from the interactive loop. Output failures are logged
/// and dropped.
#[derive(Clone)]
pub struct Console {
    state: Arc<Mutex<ConsoleState>>,
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>, prompt: impl Into<String>, color: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConsoleState {
                out,
                prompt: prompt.into(),
                color,
            })),
        }
    }

    /// Console on stdout. Color is only used when stdout is a terminal.
    pub fn stdout(prompt: impl Into<String>, color: bool) -> Self {
        let color = color && std::io::stdout().is_terminal();
        Self::new(Box::new(std::io::stdout()), prompt, color)
    }

    /// Clear the operator's line, print `line` as inbound data and redraw the
    /// prompt.
    pub fn render_inbound(&self, line: &str) {
        self.update(|state| {
            state.out.write_all(CLEAR_LINE)?;
            if state.color {
                state.out.write_all(INBOUND_COLOR)?;
            }
            state.out.write_all(INBOUND_MARKER.as_bytes())?;
            state.out.write_all(line.as_bytes())?;
            if state.color {
                state.out.write_all(DEFAULT_COLOR)?;
            }
            state.out.write_all(b"\n")?;
            state.out.write_all(state.prompt.as_bytes())?;
            Ok(())
        });
    }

    /// Session status line, e.g. `[wsdump: connection closed]`. No prompt is
    /// redrawn after it.
    pub fn render_status(&self, line: &str) {
        self.update(|state| {
            state.out.write_all(CLEAR_LINE)?;
            writeln!(state.out, "[wsdump: {line}]")?;
            Ok(())
        });
    }

    pub fn show_prompt(&self) {
        self.update(|state| {
            state.out.write_all(state.prompt.as_bytes())?;
            Ok(())
        });
    }

    pub fn println(&self, line: &str) {
        self.update(|state| {
            writeln!(state.out, "{line}")?;
            Ok(())
        });
    }

    fn update(&self, f: impl FnOnce(&mut ConsoleState) -> std::io::Result<()>) {
        if let Err(e) = self.try_update(f) {
            debug!("console update dropped: {}", e);
        }
    }

    fn try_update(
        &self,
        f: impl FnOnce(&mut ConsoleState) -> std::io::Result<()>,
    ) -> Result<(), RenderError> {
        let mut state = self.state.lock().map_err(|_| RenderError::Poisoned)?;
        f(&mut state)?;
        state.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::SharedBuffer;

    #[test]
    fn inbound_clears_line_and_redraws_prompt() {
        let buf = SharedBuffer::default();
        let console = Console::new(Box::new(buf.clone()), "> ", false);
        console.render_inbound("hello");
        assert_eq!(buf.contents(), "\r\x1b[2K< hello\n> ");
    }

    #[test]
    fn inbound_is_colored_when_enabled() {
        let buf = SharedBuffer::default();
        let console = Console::new(Box::new(buf.clone()), "> ", true);
        console.render_inbound("hi");
        assert_eq!(buf.contents(), "\r\x1b[2K\x1b[34m< hi\x1b[39m\n> ");
    }

    #[test]
    fn status_has_no_prompt() {
        let buf = SharedBuffer::default();
        let console = Console::new(Box::new(buf.clone()), "> ", true);
        console.render_status("connection closed");
        assert_eq!(buf.contents(), "\r\x1b[2K[wsdump: connection closed]\n");
    }

    #[test]
    fn write_failures_are_swallowed() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("gone"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Err(std::io::Error::other("gone"))
            }
        }

        let console = Console::new(Box::new(Broken), "> ", false);
        console.render_inbound("ignored");
        console.show_prompt();
    }

    #[test]
    fn concurrent_updates_do_not_interleave() {
        let buf = SharedBuffer::default();
        let console = Console::new(Box::new(buf.clone()), "> ", false);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let console = console.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        console.render_inbound(&format!("t{i}-{j}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let out = buf.contents();
        let chunks: Vec<&str> = out.split("\r\x1b[2K").filter(|c| !c.is_empty()).collect();
        assert_eq!(chunks.len(), 200);
        for chunk in chunks {
            assert!(chunk.starts_with("< t"), "corrupted chunk: {chunk:?}");
            assert!(chunk.ends_with("\n> "), "corrupted chunk: {chunk:?}");
        }
    }
}
