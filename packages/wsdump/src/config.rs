use std::path::{Path, PathBuf};
use std::time::Duration;

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::input::resolve_encoding;

// =============================================================================
// Tunables (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     verbose = 1
//                    subprotocols = ["chat", "superchat"]
//
//   env var:         WSDUMP_VERBOSE=1
//                    WSDUMP_SUBPROTOCOLS='["chat"]'
//
// Command-line flags are applied on top of the extracted values.

pub const DEFAULT_PROMPT: &str = "> ";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub verbose: u8,
    #[serde(default)]
    pub nocert: bool,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub subprotocols: Vec<String>,
    /// Encoding label of the operator's terminal (e.g. `shift_jis`).
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default = "default_color")]
    pub color: bool,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Give up on the opening handshake after this many seconds.
    #[serde(default)]
    pub handshake_timeout_secs: Option<u64>,
    /// End the session when nothing arrives for this many seconds.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            nocert: false,
            origin: None,
            subprotocols: Vec::new(),
            encoding: None,
            color: default_color(),
            prompt: default_prompt(),
            handshake_timeout_secs: None,
            idle_timeout_secs: None,
        }
    }
}

fn default_color() -> bool {
    true
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

/// `<config_dir>/wsdump/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("wsdump").join("config.toml"))
}

/// Build a figment that layers: defaults → config.toml → WSDUMP_* env vars.
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_path
        .map(Path::to_path_buf)
        .or_else(default_config_path)
    {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("WSDUMP_"))
}

/// Values given on the command line. `None`/`false` leave the file value alone.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub url: String,
    pub verbose: Option<u8>,
    pub nocert: bool,
    pub subprotocols: Option<Vec<String>>,
    pub origin: Option<String>,
    pub text: Option<String>,
    pub encoding: Option<String>,
    pub no_color: bool,
}

/// Resolved session settings (runtime view).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub url: String,
    pub verbosity: u8,
    /// Skip certificate and hostname verification for `wss://`.
    pub nocert: bool,
    pub subprotocols: Vec<String>,
    pub origin: Option<String>,
    /// Sent once right after the handshake.
    pub initial_text: Option<String>,
    pub encoding: &'static Encoding,
    pub color: bool,
    pub prompt: String,
    pub handshake_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

impl SessionConfig {
    /// A config for `url` with every tunable at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_file(&FileConfig::default(), url.into(), encoding_rs::UTF_8)
    }

    pub fn resolve(figment: &figment::Figment, cli: CliOverrides) -> Result<Self, ConfigError> {
        let fc: FileConfig = figment.extract()?;
        let label = cli.encoding.as_deref().or(fc.encoding.as_deref());
        let encoding = resolve_encoding(label, |name| std::env::var(name).ok())?;

        let mut config = Self::from_file(&fc, cli.url, encoding);
        if let Some(verbose) = cli.verbose {
            config.verbosity = verbose;
        }
        config.nocert |= cli.nocert;
        if let Some(subprotocols) = cli.subprotocols {
            config.subprotocols = subprotocols;
        }
        if cli.origin.is_some() {
            config.origin = cli.origin;
        }
        config.initial_text = cli.text;
        if cli.no_color {
            config.color = false;
        }
        Ok(config)
    }

    fn from_file(fc: &FileConfig, url: String, encoding: &'static Encoding) -> Self {
        Self {
            url,
            verbosity: fc.verbose,
            nocert: fc.nocert,
            subprotocols: fc.subprotocols.clone(),
            origin: fc.origin.clone(),
            initial_text: None,
            encoding,
            color: fc.color,
            prompt: fc.prompt.clone(),
            handshake_timeout: fc
                .handshake_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            idle_timeout: fc
                .idle_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

/// Parse a `--verbose` value: either a number, or a run of `v` characters
/// left over from a repeated short flag (`-vvv` arrives as `"vv"` and means 3).
pub fn parse_verbosity(value: &str) -> Result<u8, ConfigError> {
    let value = value.trim();
    if let Ok(level) = value.parse::<u8>() {
        return Ok(level);
    }
    if !value.is_empty() && value.chars().all(|c| c == 'v') {
        let level = value.len().saturating_add(1);
        return u8::try_from(level)
            .map_err(|_| ConfigError::InvalidVerbosity(value.to_string()));
    }
    Err(ConfigError::InvalidVerbosity(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };

    fn figment_from_toml(toml: &str) -> Figment {
        Figment::from(Serialized::defaults(FileConfig::default())).merge(Toml::string(toml))
    }

    fn overrides(url: &str) -> CliOverrides {
        CliOverrides {
            url: url.to_string(),
            encoding: Some("utf-8".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn verbosity_accepts_numbers() {
        assert_eq!(parse_verbosity("0").unwrap(), 0);
        assert_eq!(parse_verbosity("2").unwrap(), 2);
        assert_eq!(parse_verbosity(" 1 ").unwrap(), 1);
    }

    #[test]
    fn verbosity_counts_repeated_v() {
        assert_eq!(parse_verbosity("v").unwrap(), 2);
        assert_eq!(parse_verbosity("vv").unwrap(), 3);
    }

    #[test]
    fn verbosity_rejects_garbage() {
        assert!(parse_verbosity("").is_err());
        assert!(parse_verbosity("loud").is_err());
        assert!(parse_verbosity("-1").is_err());
    }

    #[test]
    fn defaults_when_nothing_configured() {
        let config = SessionConfig::resolve(&figment_from_toml(""), overrides("ws://h/")).unwrap();
        assert_eq!(config.url, "ws://h/");
        assert_eq!(config.verbosity, 0);
        assert!(!config.nocert);
        assert!(config.subprotocols.is_empty());
        assert!(config.color);
        assert_eq!(config.prompt, DEFAULT_PROMPT);
        assert_eq!(config.encoding, encoding_rs::UTF_8);
        assert!(config.handshake_timeout.is_none());
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn file_values_are_used() {
        let figment = figment_from_toml(
            r#"
            verbose = 1
            origin = "http://example.com"
            subprotocols = ["chat"]
            color = false
            handshake_timeout_secs = 5
            idle_timeout_secs = 0
            "#,
        );
        let config = SessionConfig::resolve(&figment, overrides("ws://h/")).unwrap();
        assert_eq!(config.verbosity, 1);
        assert_eq!(config.origin.as_deref(), Some("http://example.com"));
        assert_eq!(config.subprotocols, vec!["chat".to_string()]);
        assert!(!config.color);
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(5)));
        // zero disables the idle timeout
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn zero_timeouts_mean_no_limit() {
        let figment = figment_from_toml(
            r#"
            handshake_timeout_secs = 0
            idle_timeout_secs = 0
            "#,
        );
        let config = SessionConfig::resolve(&figment, overrides("ws://h/")).unwrap();
        assert!(config.handshake_timeout.is_none());
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn cli_overrides_file() {
        let figment = figment_from_toml(
            r#"
            verbose = 1
            origin = "http://file"
            subprotocols = ["a"]
            "#,
        );
        let cli = CliOverrides {
            verbose: Some(2),
            origin: Some("http://cli".to_string()),
            subprotocols: Some(vec!["b".to_string(), "c".to_string()]),
            text: Some("ping!".to_string()),
            no_color: true,
            nocert: true,
            ..overrides("wss://h/")
        };
        let config = SessionConfig::resolve(&figment, cli).unwrap();
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.origin.as_deref(), Some("http://cli"));
        assert_eq!(config.subprotocols, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(config.initial_text.as_deref(), Some("ping!"));
        assert!(!config.color);
        assert!(config.nocert);
    }

    #[test]
    fn unknown_encoding_is_an_error() {
        let cli = CliOverrides {
            encoding: Some("klingon".to_string()),
            ..overrides("ws://h/")
        };
        let err = SessionConfig::resolve(&figment_from_toml(""), cli).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEncoding(_)));
    }

    #[test]
    fn config_file_on_disk_is_layered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "verbose = 1\nprompt = \"$ \"\n").unwrap();

        let config =
            SessionConfig::resolve(&load_config(Some(&path)), overrides("ws://h/")).unwrap();
        assert_eq!(config.verbosity, 1);
        assert_eq!(config.prompt, "$ ");
    }
}
