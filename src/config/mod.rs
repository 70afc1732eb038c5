//! Configuration for the bridge.
//!
//! The configuration is a TOML file:
//!
//! ```toml
//! listen = "unix:/run/lmtp-bridge/lmtp.sock"
//! forward = "/run/dovecot/lmtp"
//! hostname = "mx.example.org"
//! max_message_size = 26214400
//!
//! [timeouts]
//! status_wait_secs = 5
//!
//! [recipients]
//! alice = "alice@mail.example.org"
//! ```
//!
//! - [`timeouts`]: timeouts for the inbound session, the downstream client
//!   and the status wait

pub mod timeouts;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

pub use timeouts::{ClientTimeouts, ServerTimeouts, TimeoutConfig, Timeouts};

use crate::{
    error::{ConfigError, ConfigResult},
    listener::ListenAddress,
};

/// Environment variable that names the configuration file.
pub const CONFIG_ENV: &str = "LMTP_BRIDGE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Where inbound sessions are accepted.
    pub listen: ListenAddress,

    /// Unix socket of the downstream LMTP server.
    pub forward: PathBuf,

    /// Name used in our greeting and in LHLO towards the downstream server.
    #[serde(default = "defaults::hostname")]
    pub hostname: String,

    /// Largest message body accepted, in bytes.
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,

    #[serde(default)]
    pub timeouts: Timeouts,

    /// Static resolution table: local part to forwarding address.
    #[serde(default)]
    pub recipients: HashMap<String, String>,
}

impl Config {
    /// Parse and validate a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Fails if the text is not valid TOML for this structure or if
    /// [`Config::validate`] rejects it.
    pub fn parse(path: &Path, content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is invalid.
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        Self::parse(path, &content)
    }

    /// Check the values serde cannot.
    ///
    /// # Errors
    ///
    /// Rejects an empty forward path, an empty hostname, a zero message size
    /// and a zero status wait.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.forward.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "forward socket path must not be empty".to_string(),
            ));
        }

        if self.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "hostname must not be empty".to_string(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be greater than zero".to_string(),
            ));
        }

        if self.timeouts.status_wait_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.status_wait_secs must be greater than zero".to_string(),
            ));
        }

        if let Some((local, _)) = self.recipients.iter().find(|(_, to)| to.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "recipient '{local}' has an empty forwarding address"
            )));
        }

        Ok(())
    }
}

/// Find the configuration file using the following precedence:
/// 1. An explicitly supplied path (`--config`)
/// 2. `LMTP_BRIDGE_CONFIG` environment variable
/// 3. `./lmtp-bridge.toml`
/// 4. `/etc/lmtp-bridge/lmtp-bridge.toml`
///
/// # Errors
///
/// Fails if an explicit or environment path does not exist, or if none of
/// the default locations hold a file.
pub fn find(explicit: Option<PathBuf>) -> ConfigResult<PathBuf> {
    find_in(
        explicit,
        std::env::var(CONFIG_ENV).ok(),
        &[
            PathBuf::from("./lmtp-bridge.toml"),
            PathBuf::from("/etc/lmtp-bridge/lmtp-bridge.toml"),
        ],
    )
}

fn find_in(
    explicit: Option<PathBuf>,
    env: Option<String>,
    default_paths: &[PathBuf],
) -> ConfigResult<PathBuf> {
    let named = explicit
        .map(|path| (path, "--config"))
        .or_else(|| env.map(|path| (PathBuf::from(path), CONFIG_ENV)));

    if let Some((path, source)) = named {
        if path.exists() {
            return Ok(path);
        }

        return Err(ConfigError::NotFound {
            searched: format!("{} (from {source})", path.display()),
        });
    }

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    Err(ConfigError::NotFound {
        searched: default_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

mod defaults {
    pub fn hostname() -> String {
        String::from("localhost")
    }

    pub const fn max_message_size() -> usize {
        10 * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    const MINIMAL: &str = r#"
listen = "unix:/tmp/bridge.sock"
forward = "/tmp/downstream.sock"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse(Path::new("test.toml"), MINIMAL).unwrap();

        assert_eq!(
            config.listen,
            ListenAddress::Unix(PathBuf::from("/tmp/bridge.sock"))
        );
        assert_eq!(config.forward, PathBuf::from("/tmp/downstream.sock"));
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.max_message_size, 10 * 1024 * 1024);
        assert_eq!(config.timeouts.status_wait(), Duration::from_secs(5));
        assert!(config.recipients.is_empty());
    }

    #[test]
    fn full_config() {
        let config = Config::parse(
            Path::new("test.toml"),
            r#"
listen = "127.0.0.1:2424"
forward = "/run/dovecot/lmtp"
hostname = "mx.example.org"
max_message_size = 1024

[timeouts]
status_wait_secs = 2

[timeouts.client]
command_secs = 5

[recipients]
alice = "alice@mail.example.org"
"#,
        )
        .unwrap();

        assert_eq!(
            config.listen,
            ListenAddress::Tcp("127.0.0.1:2424".parse().unwrap())
        );
        assert_eq!(config.hostname, "mx.example.org");
        assert_eq!(config.timeouts.status_wait_secs, 2);
        assert_eq!(config.timeouts.client.command_secs, 5);
        assert_eq!(config.timeouts.client.data_secs, 120);
        assert_eq!(
            config.recipients.get("alice").map(String::as_str),
            Some("alice@mail.example.org")
        );
    }

    #[test]
    fn zero_status_wait_is_rejected() {
        let content = format!("{MINIMAL}\n[timeouts]\nstatus_wait_secs = 0\n");
        let err = Config::parse(Path::new("test.toml"), &content).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_forward_is_rejected() {
        let err = Config::parse(
            Path::new("test.toml"),
            "listen = \"unix:/tmp/a.sock\"\nforward = \"\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_listen_address_is_a_parse_error() {
        let err = Config::parse(
            Path::new("test.toml"),
            "listen = \"nonsense\"\nforward = \"/tmp/b.sock\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn find_prefers_explicit_then_env_then_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.toml");
        let from_env = dir.path().join("env.toml");
        let fallback = dir.path().join("fallback.toml");
        for path in [&explicit, &from_env, &fallback] {
            std::fs::write(path, MINIMAL).unwrap();
        }
        let defaults = [dir.path().join("missing.toml"), fallback.clone()];

        assert_eq!(
            find_in(
                Some(explicit.clone()),
                Some(from_env.display().to_string()),
                &defaults
            )
            .unwrap(),
            explicit
        );
        assert_eq!(
            find_in(None, Some(from_env.display().to_string()), &defaults).unwrap(),
            from_env
        );
        assert_eq!(find_in(None, None, &defaults).unwrap(), fallback);
    }

    #[test]
    fn find_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");

        assert!(matches!(
            find_in(Some(missing.clone()), None, &[]),
            Err(ConfigError::NotFound { .. })
        ));
        assert!(matches!(
            find_in(None, None, &[missing]),
            Err(ConfigError::NotFound { .. })
        ));
    }
}
