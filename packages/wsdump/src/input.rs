//! Operator input: blocking line reads on a dedicated thread, normalized to
//! UTF-8 before they reach the interactive loop.

use std::io::BufRead;

use encoding_rs::{Encoding, UTF_8};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ConfigError;

const INPUT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// One line of input without its terminator.
    Line(String),
    Eof,
}

/// Pick the encoding of the operator's terminal.
///
/// An explicit label wins; otherwise the charset part of the locale
/// (`LC_ALL`, `LC_CTYPE`, then `LANG`) is used, falling back to UTF-8.
pub fn resolve_encoding(
    label: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<&'static Encoding, ConfigError> {
    if let Some(label) = label {
        return Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| ConfigError::UnknownEncoding(label.to_string()));
    }

    let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
        .into_iter()
        .filter_map(|name| env(name))
        .find(|value| !value.is_empty());
    Ok(locale
        .as_deref()
        .and_then(locale_charset)
        .and_then(|charset| Encoding::for_label(charset.as_bytes()))
        .unwrap_or(UTF_8))
}

/// `ja_JP.SJIS@euro` → `SJIS`.
fn locale_charset(locale: &str) -> Option<&str> {
    let (_, rest) = locale.split_once('.')?;
    let charset = rest.split('@').next().unwrap_or(rest);
    (!charset.is_empty()).then_some(charset)
}

/// Strip the line terminator and decode to UTF-8. Malformed sequences become
/// U+FFFD.
pub fn decode_line(mut raw: &[u8], encoding: &'static Encoding) -> String {
    if let Some(stripped) = raw.strip_suffix(b"\n") {
        raw = stripped.strip_suffix(b"\r").unwrap_or(stripped);
    }
    let (text, had_errors) = encoding.decode_without_bom_handling(raw);
    if had_errors {
        debug!(encoding = encoding.name(), "replaced malformed input bytes");
    }
    text.into_owned()
}

/// Spawn a thread that reads lines from `reader` and forwards them.
///
/// The thread blocks in `read_until`; it is not joined and goes away with the
/// process. It stops after sending `Eof` or when the receiver is dropped.
pub fn spawn_line_reader<R>(
    mut reader: R,
    encoding: &'static Encoding,
) -> mpsc::Receiver<InputEvent>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode_line(&buf, encoding);
                    if tx.blocking_send(InputEvent::Line(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!("stdin read failed: {}", e);
                    break;
                }
            }
        }
        let _ = tx.blocking_send(InputEvent::Eof);
    });
    rx
}

/// Line reader over the process's stdin.
pub fn stdin_lines(encoding: &'static Encoding) -> mpsc::Receiver<InputEvent> {
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()), encoding)
}
