//! Turning an ascension into a transfer of the whole pot.
//!
//! The order is fixed: claim the outcome in storage, validate the
//! destination, drain, send, and on any send failure put back exactly what
//! was drained. The claim is a conditional update on the outcome row, so
//! two coordinators sharing a database (the monitor and an operator retry)
//! can never both pay one ascension. Within a process payouts also run one
//! at a time so each ascension is paid the pot it was matched against.

pub mod transfer;

pub use transfer::{
    validate_lightning_destination, HttpTransfer, MockTransfer, PayoutTransfer, TransferReceipt,
};

use crate::error::{AscendError, Result};
use crate::storage::{Ledger, OutcomeStore, SessionStore};
use crate::types::{OutcomeRecord, PayoutRecord, PayoutStatus};
use bitcoin::Amount;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct PayoutCoordinator {
    ledger: Ledger,
    sessions: SessionStore,
    outcomes: OutcomeStore,
    transfer: Arc<dyn PayoutTransfer>,
    transfer_timeout: Duration,
    in_flight: Mutex<()>,
}

impl PayoutCoordinator {
    pub fn new(
        ledger: Ledger,
        sessions: SessionStore,
        outcomes: OutcomeStore,
        transfer: Arc<dyn PayoutTransfer>,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            sessions,
            outcomes,
            transfer,
            transfer_timeout,
            in_flight: Mutex::new(()),
        }
    }

    pub fn transfer(&self) -> &Arc<dyn PayoutTransfer> {
        &self.transfer
    }

    /// Pay out an ascension and attach the result to the outcome.
    ///
    /// Safe to call again for an outcome that was skipped or failed. An
    /// outcome that is paid, or held by another coordinator, is returned
    /// untouched.
    pub async fn handle(&self, outcome: &OutcomeRecord) -> Result<PayoutRecord> {
        let _guard = self.in_flight.lock().await;

        if !outcome.ascended {
            return Ok(outcome.payout.clone());
        }
        if !self.outcomes.claim_payout(outcome.id).await? {
            let current = self
                .outcomes
                .get(outcome.id)
                .await?
                .ok_or(AscendError::OutcomeNotFound { id: outcome.id })?;
            tracing::warn!(
                "Outcome {} payout is {}, not paying again",
                current.id,
                current.payout.status
            );
            return Ok(current.payout);
        }

        // Nothing has moved when pay() errors: it only fails before or
        // inside the drain transaction.
        let record = match self.pay(outcome).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Payout for outcome {} did not start: {}", outcome.id, e);
                PayoutRecord::failed(e.to_string())
            }
        };

        if let Err(e) = self.outcomes.record_payout(outcome.id, &record).await {
            tracing::error!(
                "Payout for outcome {} finished as {} ({} sats) but could not be recorded, \
                 left in flight for manual reconciliation: {}",
                outcome.id,
                record.status,
                record.amount.map(|a| a.to_sat()).unwrap_or(0),
                e
            );
        }
        Ok(record)
    }

    async fn pay(&self, outcome: &OutcomeRecord) -> Result<PayoutRecord> {
        let session = self
            .sessions
            .get(&outcome.session_id)
            .await?
            .ok_or_else(|| AscendError::session_not_found(&outcome.session_id))?;

        let destination = match session.payout_destination.as_deref().map(str::trim) {
            Some(destination) => destination,
            None => {
                tracing::warn!("No payout destination for session {}", session.id);
                return Ok(PayoutRecord::skipped("missing payout destination"));
            }
        };
        if let Err(reason) = self.transfer.validate_destination(destination) {
            tracing::warn!(
                "Invalid payout destination for session {}: {}",
                session.id,
                reason
            );
            return Ok(PayoutRecord::skipped(format!(
                "invalid payout destination: {}",
                reason
            )));
        }

        let amount = self.ledger.drain().await?;
        if amount == Amount::ZERO {
            tracing::warn!("Pot is empty, nothing to pay for outcome {}", outcome.id);
            return Ok(PayoutRecord::skipped("pot is empty"));
        }

        tracing::info!(
            "Paying {} sats to {} for outcome {}",
            amount.to_sat(),
            destination,
            outcome.id
        );

        let sent = tokio::time::timeout(
            self.transfer_timeout,
            self.transfer.send(destination, amount),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AscendError::Timeout(format!(
                "transfer did not finish within {:?}",
                self.transfer_timeout
            )))
        });

        match sent {
            Ok(receipt) => {
                tracing::info!(
                    "Payout of {} sats for outcome {} sent ({})",
                    amount.to_sat(),
                    outcome.id,
                    receipt.reference.as_deref().unwrap_or("no reference")
                );
                Ok(PayoutRecord::paid(amount, receipt.reference))
            }
            Err(e) => {
                tracing::warn!("Payout for outcome {} failed: {}", outcome.id, e);
                Ok(self.restore(amount, e).await)
            }
        }
    }

    async fn restore(&self, amount: Amount, cause: AscendError) -> PayoutRecord {
        match self.ledger.set(amount).await {
            Ok(()) => {
                tracing::info!("Restored pot to {} sats", amount.to_sat());
                PayoutRecord::failed(cause.to_string())
            }
            Err(e) => {
                tracing::error!(
                    "Failed to restore {} sats to the pot after failed payout: {}",
                    amount.to_sat(),
                    e
                );
                PayoutRecord::failed(format!(
                    "{}; pot restore of {} sats failed: {}",
                    cause,
                    amount.to_sat(),
                    e
                ))
            }
        }
    }
}
