use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub listen_addr: String,
    pub max_concurrency: usize,
    /// Per-request scratch space for downloaded datasets.
    pub work_dir: PathBuf,
    pub records_dir: PathBuf,
    pub download_timeout_secs: u64,
}

impl ApiConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8080";
    const DEFAULT_WORK_DIR: &'static str = "data/work";
    const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;

    /// Read API settings from the environment, falling back to `records_dir`
    /// from the pipeline configuration.
    pub fn from_env(records_dir: PathBuf) -> Result<Self> {
        let listen_addr = env::var("PROFIT_ORACLE_API_ADDR")
            .unwrap_or_else(|_| Self::DEFAULT_LISTEN_ADDR.to_string());

        let max_concurrency = match env::var("PROFIT_ORACLE_MAX_CONCURRENT_REQUESTS") {
            Ok(value) => value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|limit| *limit > 0)
                .with_context(|| {
                    "PROFIT_ORACLE_MAX_CONCURRENT_REQUESTS must be a positive integer"
                })?,
            Err(_) => std::thread::available_parallelism()
                .map(|nz| nz.get())
                .unwrap_or(4),
        };

        let work_dir = env::var("PROFIT_ORACLE_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_WORK_DIR));

        let download_timeout_secs = env::var("PROFIT_ORACLE_DOWNLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_DOWNLOAD_TIMEOUT_SECS);

        Ok(Self {
            listen_addr,
            max_concurrency,
            work_dir,
            records_dir,
            download_timeout_secs,
        })
    }
}
