use crate::server::settings::SettingError;
use anyhow::bail;
use clap::Parser;
use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Runtime configuration for the `segid-resp-server` binary.
///
/// All values are parsed from CLI arguments or environment variables. Values
/// persisted with `SET cfg.<name>` are layered on top at start-up (see
/// [`ServerConfig::overlay`]).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "segid-resp-server",
    version,
    about = "A Redis-protocol service for segment-allocated unique IDs"
)]
pub struct CliArgs {
    /// Log filter directive, e.g. `info` or `segid=debug,info`.
    ///
    /// `RUST_LOG` takes precedence at start-up.
    ///
    /// Environment variable: `LOG_LEVEL`
    #[arg(long, env = "LOG_LEVEL", default_value_t = String::from("info"))]
    pub log_level: String,

    /// Directory the log file is written to.
    ///
    /// Environment variable: `LOG_PATH`
    #[arg(long, env = "LOG_PATH", default_value = "./logs")]
    pub log_path: PathBuf,

    /// Interface to listen on.
    ///
    /// Environment variable: `SERVER_HOST`
    #[arg(long, env = "SERVER_HOST", default_value_t = String::from("0.0.0.0"))]
    pub server_host: String,

    /// RESP port.
    ///
    /// Environment variable: `SERVER_PORT`
    #[arg(long, env = "SERVER_PORT", default_value_t = 6389)]
    pub server_port: u16,

    /// Port reserved for node-to-node traffic.
    ///
    /// Environment variable: `TRANS_PORT`
    #[arg(long, env = "TRANS_PORT", default_value_t = 6390)]
    pub trans_port: u16,

    /// Numeric identifier of this server among its peers.
    ///
    /// Environment variable: `SERVER_ID`
    #[arg(long, env = "SERVER_ID", default_value_t = 1)]
    pub server_id: u64,

    /// Peer list as JSON:
    /// `[{"server_host":"10.0.0.2","server_port":6389,"trans_port":6390}]`.
    ///
    /// Environment variable: `NODES`
    #[arg(long, env = "NODES", default_value_t = String::from("[]"))]
    pub nodes: String,

    /// Seconds without a heartbeat before a peer is considered gone.
    ///
    /// Environment variable: `HEARTBEAT_TIME_OUT`
    #[arg(long, env = "HEARTBEAT_TIME_OUT", default_value_t = 10)]
    pub heartbeat_time_out: u64,

    /// Seconds between heartbeats.
    ///
    /// Environment variable: `HEARTBEAT_TIME_INTERVAL`
    #[arg(long, env = "HEARTBEAT_TIME_INTERVAL", default_value_t = 1)]
    pub heartbeat_time_interval: u64,

    /// Worker threads of the async runtime. Defaults to the number of CPUs.
    ///
    /// Environment variable: `THREADS`
    #[arg(long, env = "THREADS", default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Directory holding the counter store.
    ///
    /// Environment variable: `DATA_PATH`
    #[arg(long, env = "DATA_PATH", default_value = "./data")]
    pub data_path: PathBuf,

    /// Number of IDs reserved from the store per refill.
    ///
    /// Larger batches mean fewer durable writes, and more IDs skipped when
    /// the process restarts.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = 1000)]
    pub batch_size: i64,

    /// Seconds open connections are given to finish after a shutdown signal.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

/// A peer entry of the `nodes` setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub server_host: String,
    pub server_port: u16,
    pub trans_port: u16,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub log_level: String,
    pub log_path: PathBuf,
    pub server_host: String,
    pub server_port: u16,
    pub trans_port: u16,
    pub server_id: u64,
    pub nodes: Vec<Node>,
    pub heartbeat_time_out: u64,
    pub heartbeat_time_interval: u64,
    pub threads: usize,
    pub data_path: PathBuf,
    pub batch_size: i64,
    pub shutdown_timeout: Duration,
    /// Text of every setting changed through [`apply`](Self::apply), exactly
    /// as it was written.
    written: HashMap<Setting, String>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.batch_size <= 0 {
            bail!("BATCH_SIZE must be greater than 0");
        }

        if args.threads == 0 {
            bail!("THREADS must be greater than 0");
        }

        if let Err(e) = EnvFilter::try_new(&args.log_level) {
            bail!("LOG_LEVEL `{}` is not a valid filter: {e}", args.log_level);
        }

        let nodes = parse_nodes(&args.nodes).map_err(|e| anyhow::anyhow!("NODES: {e}"))?;

        Ok(Self {
            log_level: args.log_level,
            log_path: args.log_path,
            server_host: args.server_host,
            server_port: args.server_port,
            trans_port: args.trans_port,
            server_id: args.server_id,
            nodes,
            heartbeat_time_out: args.heartbeat_time_out,
            heartbeat_time_interval: args.heartbeat_time_interval,
            threads: args.threads,
            data_path: args.data_path,
            batch_size: args.batch_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            written: HashMap::new(),
        })
    }
}

/// Result of layering persisted overrides over a [`ServerConfig`].
#[derive(Debug, Default)]
pub struct Overlay {
    pub applied: Vec<Setting>,
    pub rejected: Vec<(String, SettingError)>,
}

impl ServerConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host.trim(), self.server_port)
    }

    /// Returns the text of `setting`: the value last written with
    /// [`apply`](Self::apply), or the rendered start-up value.
    pub fn get(&self, setting: Setting) -> String {
        if let Some(value) = self.written.get(&setting) {
            return value.clone();
        }
        match setting {
            Setting::LogLevel => self.log_level.clone(),
            Setting::LogPath => self.log_path.display().to_string(),
            Setting::ServerHost => self.server_host.clone(),
            Setting::ServerPort => self.server_port.to_string(),
            Setting::TransPort => self.trans_port.to_string(),
            Setting::ServerId => self.server_id.to_string(),
            // Serializing plain strings and integers cannot fail.
            Setting::Nodes => serde_json::to_string(&self.nodes).unwrap_or_default(),
            Setting::HeartbeatTimeOut => self.heartbeat_time_out.to_string(),
            Setting::HeartbeatTimeInterval => self.heartbeat_time_interval.to_string(),
            Setting::Threads => self.threads.to_string(),
            Setting::DataPath => self.data_path.display().to_string(),
            Setting::BatchSize => self.batch_size.to_string(),
        }
    }

    /// Validates `raw` for `setting` and stores it. `raw` is kept verbatim
    /// and is what [`get`](Self::get) returns from now on; surrounding
    /// whitespace is only ignored while parsing typed values. Nothing changes
    /// if `raw` is invalid.
    pub fn apply(&mut self, setting: Setting, raw: &str) -> Result<String, SettingError> {
        let trimmed = raw.trim();
        match setting {
            Setting::LogLevel => {
                EnvFilter::try_new(trimmed).map_err(|e| setting.invalid(e))?;
                self.log_level = raw.to_string();
            }
            Setting::LogPath => self.log_path = non_empty(setting, raw)?.into(),
            Setting::ServerHost => self.server_host = non_empty(setting, raw)?.to_string(),
            Setting::ServerPort => self.server_port = parse(setting, trimmed)?,
            Setting::TransPort => self.trans_port = parse(setting, trimmed)?,
            Setting::ServerId => self.server_id = parse(setting, trimmed)?,
            Setting::Nodes => self.nodes = parse_nodes(raw).map_err(|e| setting.invalid(e))?,
            Setting::HeartbeatTimeOut => self.heartbeat_time_out = parse(setting, trimmed)?,
            Setting::HeartbeatTimeInterval => {
                self.heartbeat_time_interval = parse(setting, trimmed)?;
            }
            Setting::Threads => self.threads = positive(setting, parse(setting, trimmed)?)?,
            Setting::DataPath => self.data_path = non_empty(setting, raw)?.into(),
            Setting::BatchSize => {
                let batch_size: i64 = parse(setting, trimmed)?;
                if batch_size <= 0 {
                    return Err(setting.invalid("must be greater than 0"));
                }
                self.batch_size = batch_size;
            }
        }
        self.written.insert(setting, raw.to_string());
        Ok(raw.to_string())
    }

    /// Applies persisted `(name, value)` overrides in order. Unknown names and
    /// invalid values are skipped and reported; the rest are applied.
    pub fn overlay(&mut self, overrides: Vec<(String, String)>) -> Overlay {
        let mut overlay = Overlay::default();
        for (name, value) in overrides {
            match name.parse::<Setting>() {
                Ok(setting) => match self.apply(setting, &value) {
                    Ok(_) => overlay.applied.push(setting),
                    Err(e) => overlay.rejected.push((name, e)),
                },
                Err(e) => overlay.rejected.push((name, e)),
            }
        }
        overlay
    }
}

fn parse<T>(setting: Setting, raw: &str) -> Result<T, SettingError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e| setting.invalid(e))
}

fn positive(setting: Setting, value: usize) -> Result<usize, SettingError> {
    if value == 0 {
        return Err(setting.invalid("must be greater than 0"));
    }
    Ok(value)
}

fn non_empty(setting: Setting, raw: &str) -> Result<&str, SettingError> {
    if raw.trim().is_empty() {
        return Err(setting.invalid("must not be empty"));
    }
    Ok(raw)
}

fn parse_nodes(raw: &str) -> Result<Vec<Node>, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Names addressable under the `cfg.` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    LogLevel,
    LogPath,
    ServerHost,
    ServerPort,
    TransPort,
    ServerId,
    Nodes,
    HeartbeatTimeOut,
    HeartbeatTimeInterval,
    Threads,
    DataPath,
    BatchSize,
}

impl Setting {
    pub const ALL: [Self; 12] = [
        Self::LogLevel,
        Self::LogPath,
        Self::ServerHost,
        Self::ServerPort,
        Self::TransPort,
        Self::ServerId,
        Self::Nodes,
        Self::HeartbeatTimeOut,
        Self::HeartbeatTimeInterval,
        Self::Threads,
        Self::DataPath,
        Self::BatchSize,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LogLevel => "log_level",
            Self::LogPath => "log_path",
            Self::ServerHost => "server_host",
            Self::ServerPort => "server_port",
            Self::TransPort => "trans_port",
            Self::ServerId => "server_id",
            Self::Nodes => "nodes",
            Self::HeartbeatTimeOut => "heartbeat_time_out",
            Self::HeartbeatTimeInterval => "heartbeat_time_interval",
            Self::Threads => "threads",
            Self::DataPath => "data_path",
            Self::BatchSize => "batch_size",
        }
    }

    /// Whether a new value takes effect without a restart.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::LogLevel | Self::BatchSize)
    }

    fn invalid(self, reason: impl fmt::Display) -> SettingError {
        SettingError::Invalid {
            name: self.as_str(),
            reason: reason.to_string(),
        }
    }
}

impl FromStr for Setting {
    type Err = SettingError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|setting| setting.as_str() == name)
            .ok_or_else(|| SettingError::Unknown {
                name: name.to_string(),
            })
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
