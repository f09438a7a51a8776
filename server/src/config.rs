use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Command line options for the server.
#[derive(Parser, Debug, Default)]
#[command(name = "huddle", about = "Realtime group chat server")]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Path to the SQLite database.
    #[arg(long)]
    pub database: Option<PathBuf>,
}

/// Who must pass the membership guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MembershipPolicy {
    /// Every mutating event is checked.
    #[default]
    Strict,
    /// `removeReaction`, `unpinMessage`, `markAsRead` and `kickUser` skip the check.
    Compatible,
}

/// Shape of the `typing` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TypingPayloadMode {
    /// One name on start, the remaining list on stop.
    #[default]
    Legacy,
    /// Always the full list.
    Roster,
}

/// Tunables of the realtime core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub typing_ttl: Duration,
    pub store_timeout: Duration,
    pub handshake_timeout: Duration,
    pub membership_policy: MembershipPolicy,
    pub typing_payload: TypingPayloadMode,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        FileRealtime::default().into()
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    pub database: PathBuf,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    pub realtime: RealtimeConfig,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    storage: FileStorage,
    #[serde(default)]
    realtime: FileRealtime,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileStorage {
    database: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(default)]
struct FileRealtime {
    typing_ttl_secs: u64,
    store_timeout_ms: u64,
    handshake_timeout_ms: u64,
    membership_policy: MembershipPolicy,
    typing_payload: TypingPayloadMode,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_database() -> PathBuf {
    PathBuf::from("data/huddle.db")
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for FileRealtime {
    fn default() -> Self {
        Self {
            typing_ttl_secs: 8,
            store_timeout_ms: 5000,
            handshake_timeout_ms: 10_000,
            membership_policy: MembershipPolicy::default(),
            typing_payload: TypingPayloadMode::default(),
        }
    }
}

impl From<FileRealtime> for RealtimeConfig {
    fn from(f: FileRealtime) -> Self {
        Self {
            typing_ttl: Duration::from_secs(f.typing_ttl_secs),
            store_timeout: Duration::from_millis(f.store_timeout_ms),
            handshake_timeout: Duration::from_millis(f.handshake_timeout_ms),
            membership_policy: f.membership_policy,
            typing_payload: f.typing_payload,
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // built-in defaults
        let mut port = default_port();
        let mut logging = default_logging();
        let mut database = default_database();
        let mut realtime = FileRealtime::default();

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("HUDDLE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/huddle.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            port = file_cfg.server.port;
            logging = file_cfg.logging.enabled;
            if let Some(db) = file_cfg.storage.database {
                database = db;
            }
            realtime = file_cfg.realtime;
        }

        // environment overrides
        if let Ok(p) = std::env::var("HUDDLE_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("HUDDLE_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(db) = std::env::var("HUDDLE_DATABASE") {
            database = PathBuf::from(db);
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }
        if let Some(db) = &cli.database {
            database = db.clone();
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        if realtime.store_timeout_ms == 0 || realtime.handshake_timeout_ms == 0 {
            anyhow::bail!("invalid_timeout");
        }

        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        Ok(Self {
            bind,
            database,
            logging_enabled: logging,
            realtime: realtime.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for key in ["HUDDLE_PORT", "HUDDLE_LOGGING", "HUDDLE_DATABASE", "HUDDLE_CONFIG", "BIND"] {
            std::env::remove_var(key);
        }
    }

    fn load_file(contents: &str) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.toml");
        fs::write(&path, contents).unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        Config::load(&cli)
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let cfg = load_file(
            "[server]\nport=5555\n[logging]\nenabled=false\n[storage]\ndatabase=\"/tmp/x.db\"\n",
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5555");
        assert!(!cfg.logging_enabled);
        assert_eq!(cfg.database, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    #[serial]
    fn invalid_port_fails() {
        clear_env();
        assert!(load_file("[server]\nport=80\n").is_err());
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let cfg = load_file("").unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8787");
        assert!(cfg.logging_enabled);
        assert_eq!(cfg.database, default_database());
        assert_eq!(cfg.realtime, RealtimeConfig::default());
        assert_eq!(cfg.realtime.typing_ttl, Duration::from_secs(8));
        assert_eq!(cfg.realtime.membership_policy, MembershipPolicy::Strict);
        assert_eq!(cfg.realtime.typing_payload, TypingPayloadMode::Legacy);
    }

    #[test]
    #[serial]
    fn realtime_table_parses() {
        clear_env();
        let cfg = load_file(
            "[realtime]\ntyping_ttl_secs=3\nmembership_policy=\"compatible\"\ntyping_payload=\"roster\"\n",
        )
        .unwrap();
        assert_eq!(cfg.realtime.typing_ttl, Duration::from_secs(3));
        assert_eq!(cfg.realtime.store_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.realtime.membership_policy, MembershipPolicy::Compatible);
        assert_eq!(cfg.realtime.typing_payload, TypingPayloadMode::Roster);
        assert!(load_file("[realtime]\nmembership_policy=\"lax\"\n").is_err());
        assert!(load_file("[realtime]\nstore_timeout_ms=0\n").is_err());
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.toml");
        fs::write(&path, "[server]\nport=1111\n").unwrap();
        std::env::set_var("HUDDLE_PORT", "2222");
        std::env::set_var("HUDDLE_DATABASE", "/env.db");
        let cli = Cli {
            config: Some(path.clone()),
            port: Some(3333),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:3333");
        assert_eq!(cfg.database, PathBuf::from("/env.db"));

        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        assert_eq!(Config::load(&cli).unwrap().bind, "127.0.0.1:2222");
        clear_env();
    }

    #[test]
    #[serial]
    fn config_path_from_env() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.toml");
        fs::write(&path, "[server]\nport=4444\n").unwrap();
        std::env::set_var("HUDDLE_CONFIG", &path);
        let cfg = Config::load(&Cli::default()).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:4444");
        clear_env();
    }
}
