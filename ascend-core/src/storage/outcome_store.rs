use crate::error::{AscendError, Result};
use crate::storage::{sql_list, timestamp_to_datetime, Storage};
use crate::types::{CheatMode, GameStats, NewOutcome, OutcomeRecord, PayoutRecord, PayoutStatus};
use bitcoin::Amount;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

const OUTCOME_COLUMNS: &str = "id, session_id, account_id, character_name, ascended, cheat_mode, \
     score, turns, death, end_time, recorded_at, payout_status, payout_sats, payout_reference, payout_error";

#[derive(Clone)]
pub struct OutcomeStore {
    storage: Arc<Storage>,
}

impl OutcomeStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn get(&self, outcome_id: i64) -> Result<Option<OutcomeRecord>> {
        let conn = self.storage.get_connection().await;

        let outcome = conn
            .query_row(
                &format!("SELECT {} FROM outcomes WHERE id = ?1", OUTCOME_COLUMNS),
                params![outcome_id],
                row_to_outcome,
            )
            .optional()?;

        Ok(outcome)
    }

    pub async fn for_session(&self, session_id: &str) -> Result<Option<OutcomeRecord>> {
        let conn = self.storage.get_connection().await;

        let outcome = conn
            .query_row(
                &format!("SELECT {} FROM outcomes WHERE session_id = ?1", OUTCOME_COLUMNS),
                params![session_id],
                row_to_outcome,
            )
            .optional()?;

        Ok(outcome)
    }

    /// Take exclusive ownership of an ascension's payout: pending, failed
    /// or skipped -> in_flight. Returns false when another coordinator, in
    /// this process or another, already holds it or it is settled.
    pub async fn claim_payout(&self, outcome_id: i64) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let changed = conn.execute(
            &format!(
                "UPDATE outcomes SET payout_status = ?1, payout_error = NULL
                 WHERE id = ?2 AND ascended = 1 AND payout_status IN ({})",
                claimable_statuses()
            ),
            params![PayoutStatus::InFlight.as_str(), outcome_id],
        )?;

        if changed == 1 {
            tracing::debug!("Outcome {} payout claimed", outcome_id);
        }
        Ok(changed == 1)
    }

    /// Attach the coordinator's result to an outcome it has claimed.
    pub async fn record_payout(&self, outcome_id: i64, payout: &PayoutRecord) -> Result<()> {
        let conn = self.storage.get_connection().await;

        let changed = conn.execute(
            "UPDATE outcomes
             SET payout_status = ?1, payout_sats = ?2, payout_reference = ?3, payout_error = ?4
             WHERE id = ?5 AND payout_status = ?6",
            params![
                payout.status.as_str(),
                payout.amount.map(|a| a.to_sat() as i64),
                payout.reference,
                payout.error,
                outcome_id,
                PayoutStatus::InFlight.as_str(),
            ],
        )?;

        if changed == 0 {
            let status: Option<String> = conn
                .query_row(
                    "SELECT payout_status FROM outcomes WHERE id = ?1",
                    params![outcome_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match status {
                Some(status) => AscendError::PayoutNotClaimed {
                    id: outcome_id,
                    status,
                },
                None => AscendError::OutcomeNotFound { id: outcome_id },
            });
        }

        tracing::info!("Outcome {} payout recorded: {}", outcome_id, payout.status);
        Ok(())
    }

    /// Operator override for a payout stuck in flight (the coordinator died
    /// mid-transfer or could not record its result). Only call this after
    /// checking the transfer provider: it puts the outcome back on the
    /// unpaid list as failed.
    pub async fn release_claim(&self, outcome_id: i64, reason: &str) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let changed = conn.execute(
            "UPDATE outcomes SET payout_status = ?1, payout_error = ?2
             WHERE id = ?3 AND payout_status = ?4",
            params![
                PayoutStatus::Failed.as_str(),
                reason,
                outcome_id,
                PayoutStatus::InFlight.as_str(),
            ],
        )?;

        if changed == 1 {
            tracing::warn!("Outcome {} payout claim released: {}", outcome_id, reason);
        }
        Ok(changed == 1)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<OutcomeRecord>> {
        self.query(
            &format!(
                "SELECT {} FROM outcomes ORDER BY recorded_at DESC, id DESC LIMIT ?1",
                OUTCOME_COLUMNS
            ),
            Some(limit),
        )
        .await
    }

    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<OutcomeRecord>> {
        self.query(
            &format!(
                "SELECT {} FROM outcomes ORDER BY score DESC, id ASC LIMIT ?1",
                OUTCOME_COLUMNS
            ),
            Some(limit),
        )
        .await
    }

    pub async fn ascensions(&self) -> Result<Vec<OutcomeRecord>> {
        self.query(
            &format!(
                "SELECT {} FROM outcomes WHERE ascended = 1 ORDER BY recorded_at DESC, id DESC",
                OUTCOME_COLUMNS
            ),
            None,
        )
        .await
    }

    /// Ascensions the house still owes and that no coordinator holds.
    pub async fn unpaid_ascensions(&self) -> Result<Vec<OutcomeRecord>> {
        self.query(
            &format!(
                "SELECT {} FROM outcomes
                 WHERE ascended = 1 AND payout_status IN ({})
                 ORDER BY recorded_at ASC, id ASC",
                OUTCOME_COLUMNS,
                claimable_statuses()
            ),
            None,
        )
        .await
    }

    /// Payouts claimed by a coordinator and not yet settled.
    pub async fn in_flight_payouts(&self) -> Result<Vec<OutcomeRecord>> {
        self.query(
            &format!(
                "SELECT {} FROM outcomes WHERE payout_status = '{}' ORDER BY id ASC",
                OUTCOME_COLUMNS,
                PayoutStatus::InFlight.as_str()
            ),
            None,
        )
        .await
    }

    pub async fn stats(&self) -> Result<GameStats> {
        let conn = self.storage.get_connection().await;

        let stats = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN ascended THEN 1 ELSE 0 END), 0),
                MAX(score),
                AVG(score),
                COALESCE(SUM(CASE WHEN payout_status = 'paid' THEN payout_sats ELSE 0 END), 0)
             FROM outcomes",
            [],
            |row| {
                Ok(GameStats {
                    total_games: row.get::<_, i64>(0)? as u64,
                    total_ascensions: row.get::<_, i64>(1)? as u64,
                    high_score: row.get(2)?,
                    avg_score: row.get(3)?,
                    total_paid: Amount::from_sat(row.get::<_, i64>(4)? as u64),
                })
            },
        )?;

        Ok(stats)
    }

    async fn query(&self, sql: &str, limit: Option<usize>) -> Result<Vec<OutcomeRecord>> {
        let conn = self.storage.get_connection().await;
        let mut stmt = conn.prepare(sql)?;

        let rows = match limit {
            Some(limit) => stmt.query_map(params![limit as i64], row_to_outcome)?,
            None => stmt.query_map([], row_to_outcome)?,
        };

        let mut outcomes = Vec::new();
        for outcome in rows {
            outcomes.push(outcome?);
        }

        Ok(outcomes)
    }
}

fn claimable_statuses() -> String {
    sql_list(PayoutStatus::CLAIMABLE.iter().map(|status| status.as_str()))
}

/// Insert an outcome inside the caller's transaction. The initial payout
/// status is `pending` for ascensions and `not_eligible` otherwise.
pub(crate) fn insert_outcome(
    tx: &rusqlite::Transaction<'_>,
    session_id: &str,
    outcome: &NewOutcome,
    recorded_at: DateTime<Utc>,
) -> rusqlite::Result<OutcomeRecord> {
    let payout = if outcome.ascended {
        PayoutRecord::pending()
    } else {
        PayoutRecord::not_eligible()
    };

    tx.execute(
        "INSERT INTO outcomes
         (session_id, account_id, character_name, ascended, cheat_mode, score, turns,
          death, end_time, recorded_at, payout_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            session_id,
            outcome.account_id,
            outcome.character_name,
            outcome.ascended,
            outcome.cheat_mode.map(|m| m.as_str()),
            outcome.score,
            outcome.turns,
            outcome.death,
            outcome.end_time,
            recorded_at.timestamp(),
            payout.status.as_str(),
        ],
    )?;

    Ok(OutcomeRecord {
        id: tx.last_insert_rowid(),
        session_id: session_id.to_string(),
        account_id: outcome.account_id.clone(),
        character_name: outcome.character_name.clone(),
        ascended: outcome.ascended,
        cheat_mode: outcome.cheat_mode,
        score: outcome.score,
        turns: outcome.turns,
        death: outcome.death.clone(),
        end_time: outcome.end_time,
        recorded_at,
        payout,
    })
}

fn row_to_outcome(row: &Row<'_>) -> rusqlite::Result<OutcomeRecord> {
    let cheat_mode: Option<String> = row.get(5)?;
    let cheat_mode = cheat_mode
        .map(|m| {
            m.parse::<CheatMode>().map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    5,
                    "cheat_mode".to_string(),
                    rusqlite::types::Type::Text,
                )
            })
        })
        .transpose()?;

    let payout_status: String = row.get(11)?;
    let status = payout_status.parse::<PayoutStatus>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(
            11,
            "payout_status".to_string(),
            rusqlite::types::Type::Text,
        )
    })?;
    let payout_sats: Option<i64> = row.get(12)?;

    Ok(OutcomeRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        account_id: row.get(2)?,
        character_name: row.get(3)?,
        ascended: row.get(4)?,
        cheat_mode,
        score: row.get(6)?,
        turns: row.get(7)?,
        death: row.get(8)?,
        end_time: row.get(9)?,
        recorded_at: timestamp_to_datetime(row.get(10)?),
        payout: PayoutRecord {
            status,
            amount: payout_sats.map(|s| Amount::from_sat(s as u64)),
            reference: row.get(13)?,
            error: row.get(14)?,
        },
    })
}
