use crate::error::{AscendError, Result};
use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HouseConfig {
    pub database_path: PathBuf,
    pub xlogfile_path: PathBuf,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub ante: Amount,
    /// Seeds the pot the first time the database is created.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub pot_initial: Amount,
    pub poll_interval: Duration,
    pub transfer_timeout: Duration,
    pub max_active_sessions: u64,
    pub mock_payouts: bool,
    pub payout_endpoint: Option<String>,
    pub payout_api_key: Option<String>,
}

impl Default for HouseConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("/var/lib/ascend/ascend.db"),
            xlogfile_path: PathBuf::from("/var/games/nethack/xlogfile"),
            ante: Amount::from_sat(1000),
            pot_initial: Amount::from_sat(10_000),
            poll_interval: Duration::from_secs(2),
            transfer_timeout: Duration::from_secs(30),
            max_active_sessions: 100,
            mock_payouts: true,
            payout_endpoint: None,
            payout_api_key: None,
        }
    }
}

impl HouseConfig {
    /// Defaults with the database kept under `data_dir`.
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self {
            database_path: data_dir.join("ascend.db"),
            ..Self::default()
        }
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            AscendError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply `ASCEND_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ASCEND_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ASCEND_XLOGFILE") {
            self.xlogfile_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ASCEND_ANTE_SATS") {
            self.ante = Amount::from_sat(parse_env("ASCEND_ANTE_SATS", &v)?);
        }
        if let Some(v) = lookup("ASCEND_POT_INITIAL_SATS") {
            self.pot_initial = Amount::from_sat(parse_env("ASCEND_POT_INITIAL_SATS", &v)?);
        }
        if let Some(v) = lookup("ASCEND_POLL_INTERVAL_MS") {
            self.poll_interval = Duration::from_millis(parse_env("ASCEND_POLL_INTERVAL_MS", &v)?);
        }
        if let Some(v) = lookup("ASCEND_TRANSFER_TIMEOUT_SECS") {
            self.transfer_timeout =
                Duration::from_secs(parse_env("ASCEND_TRANSFER_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("ASCEND_MAX_ACTIVE_SESSIONS") {
            self.max_active_sessions = parse_env("ASCEND_MAX_ACTIVE_SESSIONS", &v)?;
        }
        if let Some(v) = lookup("ASCEND_MOCK_PAYOUTS") {
            self.mock_payouts = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(AscendError::config(format!(
                        "ASCEND_MOCK_PAYOUTS must be true or false, got '{}'",
                        v
                    )))
                }
            };
        }
        if let Some(v) = lookup("ASCEND_PAYOUT_ENDPOINT") {
            self.payout_endpoint = Some(v);
        }
        if let Some(v) = lookup("ASCEND_PAYOUT_API_KEY") {
            self.payout_api_key = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ante == Amount::ZERO {
            return Err(AscendError::config("Ante must be greater than 0"));
        }

        if self.poll_interval.is_zero() {
            return Err(AscendError::config("Poll interval must be greater than 0"));
        }

        if self.transfer_timeout.is_zero() {
            return Err(AscendError::config("Transfer timeout must be greater than 0"));
        }

        if self.max_active_sessions == 0 {
            return Err(AscendError::config("Max active sessions must be greater than 0"));
        }

        if !self.mock_payouts {
            match self.payout_endpoint.as_deref() {
                None | Some("") => {
                    return Err(AscendError::config(
                        "Payout endpoint is required when mock payouts are off",
                    ))
                }
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    return Err(AscendError::config(format!(
                        "Payout endpoint must be an http(s) URL: {}",
                        url
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AscendError::config(format!("{} has an invalid value '{}'", key, value)))
}
