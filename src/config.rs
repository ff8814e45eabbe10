use std::path::PathBuf;

use clap::Parser;

/// Server settings. Every flag can also come from its `RENTD_*` variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "rentd", about = "Rental availability and reservation engine")]
pub struct Config {
    #[arg(long, env = "RENTD_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(long, env = "RENTD_PORT", default_value_t = 5433)]
    pub port: u16,

    /// Directory holding the reservation log.
    #[arg(long, env = "RENTD_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "RENTD_PASSWORD", default_value = "rentd", hide_env_values = true)]
    pub password: String,

    #[arg(long, env = "RENTD_MAX_CONNECTIONS", default_value_t = 256)]
    pub max_connections: usize,

    /// Log appends after which the background task compacts.
    #[arg(long, env = "RENTD_COMPACT_THRESHOLD", default_value_t = 1000)]
    pub compact_threshold: u64,

    /// Seconds between compaction checks.
    #[arg(long, env = "RENTD_COMPACT_INTERVAL", default_value_t = 30)]
    pub compact_interval_secs: u64,

    /// Prometheus exporter port. Disabled when unset.
    #[arg(long, env = "RENTD_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[arg(long, env = "RENTD_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "RENTD_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Seconds to wait for open connections on shutdown.
    #[arg(long, env = "RENTD_DRAIN_TIMEOUT", default_value_t = 10)]
    pub drain_timeout_secs: u64,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
