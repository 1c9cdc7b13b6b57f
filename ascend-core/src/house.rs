use crate::config::HouseConfig;
use crate::error::{AscendError, Result};
use crate::payment::{Confirmation, PaymentConfirmer};
use crate::payout::{HttpTransfer, MockTransfer, PayoutCoordinator, PayoutTransfer};
use crate::storage::{Ledger, OutcomeStore, SessionStore, Storage};
use crate::types::{PayoutRecord, Session};
use crate::watcher::OutcomeWatcher;
use std::sync::Arc;

/// Everything wired together over one database.
pub struct House {
    config: HouseConfig,
    ledger: Ledger,
    sessions: SessionStore,
    outcomes: OutcomeStore,
    payments: PaymentConfirmer,
    payouts: Arc<PayoutCoordinator>,
}

impl House {
    pub async fn open(config: HouseConfig) -> Result<Self> {
        let transfer: Arc<dyn PayoutTransfer> = if config.mock_payouts {
            tracing::warn!("Mock payouts enabled, no real sats will move");
            Arc::new(MockTransfer::new())
        } else {
            let endpoint = config
                .payout_endpoint
                .clone()
                .ok_or_else(|| AscendError::config("Payout endpoint is not set"))?;
            Arc::new(HttpTransfer::new(
                endpoint,
                config.payout_api_key.clone(),
                config.transfer_timeout,
            )?)
        };

        Self::with_transfer(config, transfer).await
    }

    pub async fn with_transfer(config: HouseConfig, transfer: Arc<dyn PayoutTransfer>) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::new(&config.database_path, config.pot_initial).await?);
        let ledger = Ledger::new(storage.clone());
        let sessions = SessionStore::new(storage.clone());
        let outcomes = OutcomeStore::new(storage);

        let payments = PaymentConfirmer::new(sessions.clone(), ledger.clone());
        let payouts = Arc::new(PayoutCoordinator::new(
            ledger.clone(),
            sessions.clone(),
            outcomes.clone(),
            transfer,
            config.transfer_timeout,
        ));

        tracing::debug!("House opened at {}", config.database_path.display());
        Ok(Self {
            config,
            ledger,
            sessions,
            outcomes,
            payments,
            payouts,
        })
    }

    /// New pending session at the configured ante.
    pub async fn open_session(
        &self,
        payout_destination: Option<&str>,
        email: Option<&str>,
    ) -> Result<Session> {
        let active = self.sessions.count_live().await?;
        if active >= self.config.max_active_sessions {
            return Err(AscendError::ServerFull {
                active,
                max: self.config.max_active_sessions,
            });
        }

        let payout_destination = payout_destination.map(str::trim);
        if let Some(destination) = payout_destination {
            self.payouts
                .transfer()
                .validate_destination(destination)
                .map_err(AscendError::invalid_destination)?;
        }

        self.sessions
            .create_pending(self.config.ante, payout_destination, email)
            .await
    }

    pub async fn confirm_payment(&self, session_id: &str) -> Result<Confirmation> {
        self.payments.confirm_payment(session_id).await
    }

    pub async fn set_payout_destination(&self, session_id: &str, destination: &str) -> Result<()> {
        let destination = destination.trim();
        self.payouts
            .transfer()
            .validate_destination(destination)
            .map_err(AscendError::invalid_destination)?;
        self.sessions.set_payout_destination(session_id, destination).await
    }

    /// Operator retry of an unpaid ascension.
    pub async fn retry_payout(&self, outcome_id: i64) -> Result<PayoutRecord> {
        let outcome = self
            .outcomes
            .get(outcome_id)
            .await?
            .ok_or(AscendError::OutcomeNotFound { id: outcome_id })?;
        if !outcome.ascended {
            return Err(AscendError::internal(format!(
                "Outcome {} is not an ascension",
                outcome_id
            )));
        }
        self.payouts.handle(&outcome).await
    }

    /// Put a payout stuck in flight back on the unpaid list. The operator
    /// must first confirm with the provider that no transfer went out.
    pub async fn release_payout(&self, outcome_id: i64) -> Result<bool> {
        self.outcomes
            .release_claim(outcome_id, "released by operator after manual check")
            .await
    }

    /// A watcher positioned at the current end of the configured xlogfile.
    pub async fn watcher(&self) -> Result<OutcomeWatcher> {
        OutcomeWatcher::new(
            &self.config.xlogfile_path,
            self.sessions.clone(),
            self.payouts.clone(),
            self.config.poll_interval,
        )
        .await
    }

    pub fn config(&self) -> &HouseConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn outcomes(&self) -> &OutcomeStore {
        &self.outcomes
    }
}
