use crate::error::{AscendError, Result};
use crate::storage::{Ledger, SessionStore};
use bitcoin::Amount;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub session_id: String,
    /// A previous delivery already activated the session; nothing was added.
    pub already_processed: bool,
    pub pot_balance: Amount,
}

/// Entry point for "payment received" signals, which may arrive any number
/// of times for the same session.
#[derive(Clone)]
pub struct PaymentConfirmer {
    sessions: SessionStore,
    ledger: Ledger,
}

impl PaymentConfirmer {
    pub fn new(sessions: SessionStore, ledger: Ledger) -> Self {
        Self { sessions, ledger }
    }

    pub async fn confirm_payment(&self, session_id: &str) -> Result<Confirmation> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| AscendError::session_not_found(session_id))?;

        if !self.sessions.confirm(session_id).await? {
            tracing::info!("Duplicate payment confirmation for session {}", session_id);
            return Ok(Confirmation {
                session_id: session_id.to_string(),
                already_processed: true,
                pot_balance: self.ledger.balance().await?,
            });
        }

        let pot_balance = self.ledger.add(session.ante).await?;
        tracing::info!(
            "Payment confirmed for session {}, pot is now {} sats",
            session_id,
            pot_balance.to_sat()
        );

        Ok(Confirmation {
            session_id: session_id.to_string(),
            already_processed: false,
            pot_balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_deliveries_add_ante_once() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(
            Storage::new(&dir.path().join("ascend.db"), Amount::ZERO)
                .await
                .unwrap(),
        );
        let sessions = SessionStore::new(storage.clone());
        let ledger = Ledger::new(storage);
        let confirmer = PaymentConfirmer::new(sessions.clone(), ledger.clone());

        let session = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let confirmer = confirmer.clone();
            let id = session.id.clone();
            handles.push(tokio::spawn(async move {
                confirmer.confirm_payment(&id).await.unwrap()
            }));
        }

        let mut fresh = 0;
        for handle in handles {
            if !handle.await.unwrap().already_processed {
                fresh += 1;
            }
        }

        assert_eq!(fresh, 1);
        assert_eq!(ledger.balance().await.unwrap(), Amount::from_sat(1000));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(
            Storage::new(&dir.path().join("ascend.db"), Amount::ZERO)
                .await
                .unwrap(),
        );
        let confirmer = PaymentConfirmer::new(SessionStore::new(storage.clone()), Ledger::new(storage));

        let err = confirmer.confirm_payment("nope").await.unwrap_err();
        assert!(matches!(err, AscendError::SessionNotFound { .. }));
    }
}
