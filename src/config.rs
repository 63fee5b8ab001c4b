//! Environment-driven configuration for the backup daemon.
//!
//! All values are read once at startup into an immutable `Config` that is
//! passed to each component; nothing reads the environment afterwards.

use std::path::PathBuf;
use std::time::Duration;

use crate::utils::errors::{CourierError, Result};

/// Cron expression fired every 10 minutes (seconds-resolution field first).
pub const DEFAULT_CRON: &str = "0 */10 * * * *";

/// Snapshots retained per application when `BAK_MAX_COUNT` is unset.
pub const DEFAULT_RETENTION: usize = 30;

const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone)]
pub struct Config {
    /// Owner namespace of the remote store
    pub owner: String,

    /// Remote store (repository) name
    pub store_name: String,

    /// Auth token for the content API
    pub token: String,

    /// Application namespace; snapshots live under this top-level directory
    pub app_name: String,

    /// Local directory that is snapshotted and restored
    pub watch_dir: PathBuf,

    /// Optional proxy URL for all store traffic
    pub proxy_url: Option<String>,

    /// Seconds-resolution cron expression driving backup cycles
    pub cron: String,

    /// Maximum snapshots kept per application
    pub retention: usize,

    /// Verbose (debug-level) logging requested via `BAK_LOG=1`
    pub verbose: bool,

    /// Branch all writes target
    pub branch: String,

    /// Delay before the startup restore is attempted
    pub restore_delay: Duration,
}

impl Config {
    /// Read the `BAK_*` environment surface. Missing mandatory keys are a
    /// startup error; malformed optional values fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            owner: required("BAK_OWNER")?,
            store_name: required("BAK_STORE")?,
            token: required("BAK_TOKEN")?,
            app_name: required("BAK_APP_NAME")?,
            watch_dir: PathBuf::from(required("BAK_DATA_DIR")?),
            proxy_url: std::env::var("BAK_PROXY").ok().filter(|v| !v.is_empty()),
            cron: std::env::var("BAK_CRON")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_CRON.to_string()),
            retention: parse_retention(std::env::var("BAK_MAX_COUNT").ok().as_deref()),
            verbose: std::env::var("BAK_LOG").as_deref() == Ok("1"),
            branch: std::env::var("BAK_BRANCH")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            restore_delay: Duration::from_secs(
                60 * std::env::var("BAK_RESTORE_DELAY_MIN")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0u64),
            ),
        })
    }

    /// Log the effective configuration at debug level, token redacted.
    pub fn log_summary(&self) {
        tracing::debug!("BAK_OWNER: {}", self.owner);
        tracing::debug!("BAK_STORE: {}", self.store_name);
        tracing::debug!("BAK_TOKEN: ***********");
        tracing::debug!("BAK_APP_NAME: {}", self.app_name);
        tracing::debug!("BAK_DATA_DIR: {}", self.watch_dir.display());
        tracing::debug!("BAK_PROXY: {}", self.proxy_url.as_deref().unwrap_or("<none>"));
        tracing::debug!("BAK_CRON: {}", self.cron);
        tracing::debug!("BAK_MAX_COUNT: {}", self.retention);
        tracing::debug!("BAK_BRANCH: {}", self.branch);
        tracing::debug!("BAK_RESTORE_DELAY_MIN: {}", self.restore_delay.as_secs() / 60);
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CourierError::Config(format!("{key} must be set")))
}

/// Retention count parsing; anything unparsable keeps the default rather
/// than failing the process.
fn parse_retention(raw: Option<&str>) -> usize {
    match raw {
        None | Some("") => DEFAULT_RETENTION,
        Some(v) => match v.parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(
                    value = v,
                    default = DEFAULT_RETENTION,
                    "BAK_MAX_COUNT is not a number, using default"
                );
                DEFAULT_RETENTION
            }
        },
    }
}
