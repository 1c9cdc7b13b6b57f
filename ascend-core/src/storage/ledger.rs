//! The shared pot.
//!
//! Every operation is a single statement or a single IMMEDIATE transaction
//! run while holding the connection lock, so no caller ever observes or
//! writes a balance that another caller has already read.

use crate::error::{AscendError, Result};
use crate::storage::Storage;
use bitcoin::Amount;
use chrono::Utc;
use rusqlite::{params, TransactionBehavior};
use std::sync::Arc;

#[derive(Clone)]
pub struct Ledger {
    storage: Arc<Storage>,
}

impl Ledger {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn balance(&self) -> Result<Amount> {
        let conn = self.storage.get_connection().await;

        let sats: i64 = conn.query_row("SELECT balance_sats FROM pot WHERE id = 1", [], |row| {
            row.get(0)
        })?;

        Ok(Amount::from_sat(sats as u64))
    }

    /// Increase the pot and return the post-update balance.
    pub async fn add(&self, amount: Amount) -> Result<Amount> {
        let sats = sats_to_i64(amount)?;
        let conn = self.storage.get_connection().await;

        let balance: i64 = conn.query_row(
            "UPDATE pot SET balance_sats = balance_sats + ?1, updated_at = ?2
             WHERE id = 1
             RETURNING balance_sats",
            params![sats, Utc::now().timestamp()],
            |row| row.get(0),
        )?;

        tracing::debug!("Pot +{} sats -> {} sats", sats, balance);
        Ok(Amount::from_sat(balance as u64))
    }

    /// Zero the pot and return what it held. Two concurrent drains never
    /// both see the same sats.
    pub async fn drain(&self) -> Result<Amount> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let drained: i64 =
            tx.query_row("SELECT balance_sats FROM pot WHERE id = 1", [], |row| {
                row.get(0)
            })?;
        tx.execute(
            "UPDATE pot SET balance_sats = 0, updated_at = ?1 WHERE id = 1",
            params![Utc::now().timestamp()],
        )?;
        tx.commit()?;

        tracing::info!("Drained {} sats from pot", drained);
        Ok(Amount::from_sat(drained as u64))
    }

    /// Overwrite the pot. Only for restoring a drained amount after a failed
    /// payout, or for operator resets.
    ///
    /// Any `add` that landed between the drain and this call is overwritten.
    pub async fn set(&self, amount: Amount) -> Result<()> {
        let sats = sats_to_i64(amount)?;
        let conn = self.storage.get_connection().await;

        conn.execute(
            "UPDATE pot SET balance_sats = ?1, updated_at = ?2 WHERE id = 1",
            params![sats, Utc::now().timestamp()],
        )?;

        tracing::info!("Pot set to {} sats", sats);
        Ok(())
    }
}

fn sats_to_i64(amount: Amount) -> Result<i64> {
    i64::try_from(amount.to_sat())
        .map_err(|_| AscendError::internal(format!("Amount out of range: {}", amount)))
}
