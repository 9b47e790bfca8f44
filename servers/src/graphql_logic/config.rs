use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Local GraphQL API simulator", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SIMULATOR_PORT", help = "Port to listen on. Scans the 8900-9999 range when omitted.")]
    pub port: Option<u16>,

    #[clap(long, env = "SIMULATOR_HOST", help = "Host interface to bind.")]
    pub host: Option<String>,

    #[clap(long, env = "SIMULATOR_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SIMULATOR_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SIMULATOR_LOG_LEVEL", help = "Logging level (debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SIMULATOR_API_KEY", help = "Require this api key on realtime handshakes.")]
    pub api_key: Option<String>,

    #[clap(long, env = "SIMULATOR_CONNECTION_TIMEOUT_MS", help = "Keepalive grace window advertised to realtime clients.")]
    pub connection_timeout_ms: Option<u64>,

    #[clap(long, env = "SIMULATOR_KEEPALIVE_INTERVAL_MS", help = "Milliseconds between ka frames to realtime clients.")]
    pub keepalive_interval_ms: Option<u64>,

    #[clap(long, env = "SIMULATOR_INIT_TIMEOUT_MS", help = "How long a fresh socket may wait before connection_init.")]
    pub init_timeout_ms: Option<u64>,
}

impl Config {
    // Merge two Configs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            host: other.host.or(self.host),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            api_key: other.api_key.or(self.api_key),
            connection_timeout_ms: other.connection_timeout_ms.or(self.connection_timeout_ms),
            keepalive_interval_ms: other.keepalive_interval_ms.or(self.keepalive_interval_ms),
            init_timeout_ms: other.init_timeout_ms.or(self.init_timeout_ms),
        }
    }
}

pub fn load_config() -> Config {
    // 1. Load defaults
    let default_config = Config {
        host: Some("0.0.0.0".to_string()),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        connection_timeout_ms: Some(300_000),
        keepalive_interval_ms: Some(60_000),
        init_timeout_ms: Some(3_000),
        ..Default::default()
    };

    // 2. Load from config file (server_graphql.conf) if present.
    //    Allow overriding default config file path with CLI arg.
    let cli_args_for_path = Config::parse();

    let config_file_path = cli_args_for_path
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_graphql.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!("Failed to parse config file: {}. Falling back to other sources.", config_file_path.display());
            }
        } else {
            log::warn!("Failed to read config file: {}. Falling back to other sources.", config_file_path.display());
        }
    }

    // 3. Environment variables and CLI arguments win over the file config.
    let cli_args_final = Config::parse();
    current_config.merge(cli_args_final)
}
