use crate::error::{AscendError, Result};
use async_trait::async_trait;
use bitcoin::Amount;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Provider-side identifier such as a payment hash.
    pub reference: Option<String>,
}

/// Moves sats from the house wallet to a player.
#[async_trait]
pub trait PayoutTransfer: Send + Sync {
    /// Format check only. Runs before the pot is touched.
    fn validate_destination(&self, destination: &str) -> std::result::Result<(), String> {
        validate_lightning_destination(destination)
    }

    /// Anything other than `Ok` is treated as "not sent".
    async fn send(&self, destination: &str, amount: Amount) -> Result<TransferReceipt>;
}

const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Accepts a Lightning address (`user@domain.tld`) or a bech32 `lnurl1...`
/// string.
pub fn validate_lightning_destination(destination: &str) -> std::result::Result<(), String> {
    let destination = destination.trim();
    if destination.is_empty() {
        return Err("destination is empty".to_string());
    }

    let lower = destination.to_ascii_lowercase();
    if let Some(data) = lower.strip_prefix("lnurl1") {
        if destination != lower && destination != destination.to_ascii_uppercase() {
            return Err("lnurl mixes upper and lower case".to_string());
        }
        if data.len() < 6 || !data.chars().all(|c| BECH32_CHARSET.contains(c)) {
            return Err("lnurl is not valid bech32".to_string());
        }
        return Ok(());
    }

    let (user, domain) = destination
        .split_once('@')
        .ok_or_else(|| "expected user@domain or lnurl".to_string())?;

    if user.is_empty()
        || !user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'))
    {
        return Err(format!("invalid user part '{}'", user));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    let valid_labels = labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    if labels.len() < 2 || !valid_labels {
        return Err(format!("invalid domain '{}'", domain));
    }

    Ok(())
}

/// Pays nothing. Records every send and can be told to fail.
#[derive(Default)]
pub struct MockTransfer {
    sent: Mutex<Vec<(String, Amount)>>,
    failure: Option<String>,
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(reason.into()),
        }
    }

    /// Destinations and amounts passed to `send`, including failed attempts.
    pub fn sent(&self) -> Vec<(String, Amount)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl PayoutTransfer for MockTransfer {
    async fn send(&self, destination: &str, amount: Amount) -> Result<TransferReceipt> {
        self.sent.lock().push((destination.to_string(), amount));

        if let Some(reason) = &self.failure {
            return Err(AscendError::transfer(reason.clone()));
        }

        tracing::info!("[mock] Paid {} sats to {}", amount.to_sat(), destination);
        Ok(TransferReceipt {
            reference: Some(format!("mock_{}", hex::encode(rand::random::<[u8; 16]>()))),
        })
    }
}

#[derive(Serialize)]
struct TransferRequest<'a> {
    destination: &'a str,
    amount_sats: u64,
}

/// JSON-over-HTTP payout service.
pub struct HttpTransfer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransfer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl PayoutTransfer for HttpTransfer {
    async fn send(&self, destination: &str, amount: Amount) -> Result<TransferReceipt> {
        let mut request = self.client.post(&self.endpoint).json(&TransferRequest {
            destination,
            amount_sats: amount.to_sat(),
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        let json: Option<serde_json::Value> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let detail = json
                .as_ref()
                .and_then(|v| v.get("detail"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or(body);
            return Err(AscendError::transfer(format!("{}: {}", status, detail)));
        }

        let reference = json.as_ref().and_then(|v| {
            v.get("reference")
                .or_else(|| v.get("payment_hash"))
                .and_then(|r| r.as_str())
                .map(str::to_string)
        });

        tracing::info!("Paid {} sats to {} via {}", amount.to_sat(), destination, self.endpoint);
        Ok(TransferReceipt { reference })
    }
}
