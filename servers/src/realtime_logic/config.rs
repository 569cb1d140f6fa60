use anyhow::{Context, Result, ensure};
use clap::Parser;
use lib_realtime::ingestors::BackfillConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_realtime.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Realtime quote hub and historical backfill server", version)]
// File keys are camelCase; unknown keys (including snake_case spellings) are rejected.
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[clap(long, env = "REALTIME_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "REALTIME_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "REALTIME_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "REALTIME_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "REALTIME_WATCHLIST_PATH", help = "CSV file whose first column lists the symbols to poll and backfill.")]
    pub watchlist_path: Option<PathBuf>,

    #[clap(long, env = "REALTIME_QUOTE_URL", help = "Realtime quote endpoint; symbols are appended comma separated.")]
    pub quote_url: Option<String>,

    #[clap(long, env = "REALTIME_HISTORY_URL", help = "Daily K-line history endpoint.")]
    pub history_url: Option<String>,

    #[clap(long, env = "REALTIME_REFERER", help = "Referer header sent with realtime quote requests.")]
    pub referer: Option<String>,

    #[clap(long, env = "REALTIME_POLL_INTERVAL_MS", help = "Milliseconds between realtime polls.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "REALTIME_SESSION_QUEUE_CAPACITY", help = "Outbound frames buffered per client before it is evicted.")]
    pub session_queue_capacity: Option<usize>,

    #[clap(long, env = "REALTIME_BACKFILL_WORKERS", help = "Number of concurrent backfill workers.")]
    pub backfill_workers: Option<usize>,

    #[clap(long, env = "REALTIME_BACKFILL_MAX_ATTEMPTS", help = "Tries per symbol before it is abandoned.")]
    pub backfill_max_attempts: Option<u32>,

    #[clap(long, env = "REALTIME_BACKFILL_BACKOFF_MS", help = "Linear backoff base in milliseconds between tries.")]
    pub backfill_backoff_ms: Option<u64>,

    #[clap(long, env = "REALTIME_BACKFILL_POLITENESS_MS", help = "Pause in milliseconds after each backfilled symbol.")]
    pub backfill_politeness_ms: Option<u64>,

    #[clap(long, env = "REALTIME_BACKFILL_DAYS", help = "Daily bars requested per symbol.")]
    pub backfill_days: Option<u32>,

    #[clap(long, env = "REALTIME_BACKFILL_CRON", help = "Cron expression (Asia/Shanghai) for the daily backfill.")]
    pub backfill_cron: Option<String>,

    #[clap(long, env = "REALTIME_PROBE_SYMBOL", help = "Symbol probed by the market-open check when none is given.")]
    pub probe_symbol: Option<String>,

    #[clap(long, env = "REALTIME_HTTP_TIMEOUT_SECS", help = "Timeout in seconds for upstream HTTP requests.")]
    pub http_timeout_secs: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            watchlist_path: other.watchlist_path.or(self.watchlist_path),
            quote_url: other.quote_url.or(self.quote_url),
            history_url: other.history_url.or(self.history_url),
            referer: other.referer.or(self.referer),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            session_queue_capacity: other.session_queue_capacity.or(self.session_queue_capacity),
            backfill_workers: other.backfill_workers.or(self.backfill_workers),
            backfill_max_attempts: other.backfill_max_attempts.or(self.backfill_max_attempts),
            backfill_backoff_ms: other.backfill_backoff_ms.or(self.backfill_backoff_ms),
            backfill_politeness_ms: other.backfill_politeness_ms.or(self.backfill_politeness_ms),
            backfill_days: other.backfill_days.or(self.backfill_days),
            backfill_cron: other.backfill_cron.or(self.backfill_cron),
            probe_symbol: other.probe_symbol.or(self.probe_symbol),
            http_timeout_secs: other.http_timeout_secs.or(self.http_timeout_secs),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            watchlist_path: Some(PathBuf::from("stock_list.csv")),
            quote_url: Some("http://hq.sinajs.cn/list=".to_string()),
            history_url: Some(
                "http://money.finance.sina.com.cn/quotes_service/api/json_v2.php/CN_MarketData.getKLineData"
                    .to_string(),
            ),
            referer: Some("http://finance.sina.com.cn/".to_string()),
            poll_interval_ms: Some(3000),
            session_queue_capacity: Some(256),
            backfill_workers: Some(4),
            backfill_max_attempts: Some(3),
            backfill_backoff_ms: Some(1000),
            backfill_politeness_ms: Some(200),
            backfill_days: Some(300),
            backfill_cron: Some("0 0 15 * * Mon-Fri".to_string()),
            probe_symbol: Some("sh000001".to_string()),
            http_timeout_secs: Some(10),
            ..Default::default()
        }
    }
}

/// Fully resolved, validated configuration. Nothing downstream sees an `Option`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub watchlist_path: PathBuf,
    pub quote_url: String,
    pub history_url: String,
    pub referer: String,
    pub poll_interval: Duration,
    pub session_queue_capacity: usize,
    pub backfill: BackfillConfig,
    pub backfill_cron: String,
    pub probe_symbol: String,
    pub http_timeout: Duration,
}

/// Defaults, then the JSON config file, then environment and CLI.
pub fn load_config() -> Result<Settings> {
    let cli = Config::parse();
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let file_config = read_config_file(&config_file_path)?;
    resolve(Config::defaults(), file_config, cli)
}

fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        );
        return Ok(None);
    }
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let file_config = serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(Some(file_config))
}

fn resolve(defaults: Config, file: Option<Config>, cli: Config) -> Result<Settings> {
    let mut merged = defaults;
    if let Some(file) = file {
        merged = merged.merge(file);
    }
    merged = merged.merge(cli);
    Settings::try_from(merged)
}

fn required<T>(value: Option<T>, key: &str) -> Result<T> {
    value.with_context(|| format!("missing configuration value '{}'", key))
}

impl TryFrom<Config> for Settings {
    type Error = anyhow::Error;

    fn try_from(c: Config) -> Result<Self> {
        let poll_interval_ms = required(c.poll_interval_ms, "pollIntervalMs")?;
        let session_queue_capacity = required(c.session_queue_capacity, "sessionQueueCapacity")?;
        let workers = required(c.backfill_workers, "backfillWorkers")?;
        let max_attempts = required(c.backfill_max_attempts, "backfillMaxAttempts")?;
        let days = required(c.backfill_days, "backfillDays")?;
        let http_timeout_secs = required(c.http_timeout_secs, "httpTimeoutSecs")?;
        let backfill_cron = required(c.backfill_cron, "backfillCron")?;
        let quote_url = required(c.quote_url, "quoteUrl")?;
        let history_url = required(c.history_url, "historyUrl")?;
        let probe_symbol = required(c.probe_symbol, "probeSymbol")?;

        ensure!(poll_interval_ms > 0, "pollIntervalMs must be greater than zero");
        ensure!(session_queue_capacity > 0, "sessionQueueCapacity must be greater than zero");
        ensure!(workers > 0, "backfillWorkers must be greater than zero");
        ensure!(max_attempts > 0, "backfillMaxAttempts must be greater than zero");
        ensure!(days > 0, "backfillDays must be greater than zero");
        ensure!(http_timeout_secs > 0, "httpTimeoutSecs must be greater than zero");
        ensure!(!backfill_cron.trim().is_empty(), "backfillCron must not be empty");
        ensure!(!quote_url.trim().is_empty(), "quoteUrl must not be empty");
        ensure!(!history_url.trim().is_empty(), "historyUrl must not be empty");
        ensure!(!probe_symbol.trim().is_empty(), "probeSymbol must not be empty");

        Ok(Settings {
            port: required(c.port, "port")?,
            log_dir: required(c.log_dir, "logDir")?,
            log_level: required(c.log_level, "logLevel")?,
            watchlist_path: required(c.watchlist_path, "watchlistPath")?,
            quote_url,
            history_url,
            referer: c.referer.unwrap_or_default(),
            poll_interval: Duration::from_millis(poll_interval_ms),
            session_queue_capacity,
            backfill: BackfillConfig {
                workers,
                max_attempts,
                backoff: Duration::from_millis(required(c.backfill_backoff_ms, "backfillBackoffMs")?),
                politeness_delay: Duration::from_millis(required(
                    c.backfill_politeness_ms,
                    "backfillPolitenessMs",
                )?),
                days,
            },
            backfill_cron,
            probe_symbol,
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }
}
