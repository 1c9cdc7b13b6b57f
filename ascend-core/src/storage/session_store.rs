//! Session records and their state machine.
//!
//! Every transition is a single conditional `UPDATE ... WHERE status IN (..)`
//! whose guard comes from the transition table in [`crate::types`]; the
//! affected row count says whether this caller won the transition.

use crate::error::{AscendError, Result};
use crate::storage::outcome_store::insert_outcome;
use crate::storage::{live_statuses, sql_list, timestamp_to_datetime, Storage};
use crate::types::{NewOutcome, OutcomeRecord, Session, SessionStatus};
use bitcoin::Amount;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use std::sync::Arc;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, status, ante_sats, account_id, payout_destination, email, \
     access_token, created_at, started_at, ended_at, outcome_id";

#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<Storage>,
}

impl SessionStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// New session awaiting payment. Nothing touches the pot yet.
    pub async fn create_pending(
        &self,
        ante: Amount,
        payout_destination: Option<&str>,
        email: Option<&str>,
    ) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            status: SessionStatus::Pending,
            ante,
            account_id: None,
            payout_destination: payout_destination.map(str::to_string),
            email: email.map(str::to_string),
            access_token: generate_access_token(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            outcome_id: None,
        };

        let conn = self.storage.get_connection().await;
        conn.execute(
            "INSERT INTO sessions
             (id, status, ante_sats, payout_destination, email, access_token, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id,
                session.status.as_str(),
                session.ante.to_sat() as i64,
                session.payout_destination,
                session.email,
                session.access_token,
                session.created_at.timestamp(),
            ],
        )?;

        tracing::info!(
            "Created pending session {} (ante {} sats)",
            session.id,
            ante.to_sat()
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.storage.get_connection().await;

        let session = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id],
                row_to_session,
            )
            .optional()?;

        Ok(session)
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Session>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sessions ORDER BY created_at DESC LIMIT ?1",
            SESSION_COLUMNS
        ))?;
        let session_iter = stmt.query_map(params![limit as i64], row_to_session)?;

        let mut sessions = Vec::new();
        for session in session_iter {
            sessions.push(session?);
        }

        Ok(sessions)
    }

    /// Sessions currently Active or Playing.
    pub async fn count_live(&self) -> Result<u64> {
        let conn = self.storage.get_connection().await;

        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM sessions WHERE status IN ({})",
                live_statuses()
            ),
            [],
            |row| row.get(0),
        )?;

        Ok(count as u64)
    }

    /// Pending -> Active, exactly once. Returns true only for the caller that
    /// performed the transition; duplicate deliveries get false. Stamps the
    /// default session start time.
    pub async fn confirm(&self, session_id: &str) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let changed = conn.execute(
            &format!(
                "UPDATE sessions SET status = ?1, started_at = ?2
                 WHERE id = ?3 AND status IN ({})",
                status_guard(SessionStatus::Active)
            ),
            params![
                SessionStatus::Active.as_str(),
                Utc::now().timestamp(),
                session_id
            ],
        )?;

        if changed == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                params![session_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(AscendError::session_not_found(session_id));
            }
            tracing::debug!("Session {} already confirmed", session_id);
            return Ok(false);
        }

        tracing::info!("Session {} confirmed", session_id);
        Ok(true)
    }

    /// Active -> Playing. Observability only.
    pub async fn mark_playing(&self, session_id: &str) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let changed = conn.execute(
            &format!(
                "UPDATE sessions SET status = ?1 WHERE id = ?2 AND status IN ({})",
                status_guard(SessionStatus::Playing)
            ),
            params![SessionStatus::Playing.as_str(), session_id],
        )?;

        Ok(changed == 1)
    }

    /// Bind the provisioned account and its authoritative start time to a
    /// live session.
    pub async fn attach_account(
        &self,
        session_id: &str,
        account_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.storage.get_connection().await;

        let changed = conn
            .execute(
                &format!(
                    "UPDATE sessions SET account_id = ?1, started_at = ?2
                     WHERE id = ?3 AND status IN ({})",
                    live_statuses()
                ),
                params![account_id, started_at.timestamp(), session_id],
            )
            .map_err(AscendError::from)
            .map_err(|e| {
                if e.is_constraint_violation() {
                    AscendError::AccountInUse {
                        account: account_id.to_string(),
                    }
                } else {
                    e
                }
            })?;

        if changed == 0 {
            let status: Option<String> = conn
                .query_row(
                    "SELECT status FROM sessions WHERE id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match status {
                None => AscendError::session_not_found(session_id),
                Some(status) => AscendError::SessionNotLive {
                    id: session_id.to_string(),
                    status,
                },
            });
        }

        tracing::info!("Session {} bound to account {}", session_id, account_id);
        Ok(())
    }

    pub async fn set_payout_destination(&self, session_id: &str, destination: &str) -> Result<()> {
        let conn = self.storage.get_connection().await;

        let changed = conn.execute(
            "UPDATE sessions SET payout_destination = ?1 WHERE id = ?2 AND status != 'ended'",
            params![destination, session_id],
        )?;

        if changed == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                params![session_id],
                |row| row.get(0),
            )?;
            return Err(if exists {
                AscendError::SessionEnded {
                    id: session_id.to_string(),
                }
            } else {
                AscendError::session_not_found(session_id)
            });
        }

        Ok(())
    }

    /// Most recent Active/Playing session for an external account.
    pub async fn find_by_account(&self, account_id: &str) -> Result<Option<Session>> {
        let conn = self.storage.get_connection().await;

        let session = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions
                     WHERE account_id = ?1 AND status IN ({})
                     ORDER BY started_at DESC, created_at DESC
                     LIMIT 1",
                    SESSION_COLUMNS,
                    live_statuses()
                ),
                params![account_id],
                row_to_session,
            )
            .optional()?;

        Ok(session)
    }

    /// Operator override: close a live session that will never produce a
    /// log entry. No outcome is recorded.
    pub async fn abandon(&self, session_id: &str) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let changed = conn.execute(
            &format!(
                "UPDATE sessions SET status = ?1, ended_at = ?2
                 WHERE id = ?3 AND status IN ({})",
                status_guard(SessionStatus::Ended)
            ),
            params![SessionStatus::Ended.as_str(), Utc::now().timestamp(), session_id],
        )?;

        if changed == 1 {
            tracing::warn!("Session {} abandoned by operator", session_id);
        }
        Ok(changed == 1)
    }

    /// Active/Playing -> Ended together with the outcome row, in one
    /// transaction. `None` means the session was not live (already ended,
    /// or never confirmed) and nothing was written.
    pub async fn end(&self, session_id: &str, outcome: &NewOutcome) -> Result<Option<OutcomeRecord>> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        let changed = tx.execute(
            &format!(
                "UPDATE sessions SET status = ?1, ended_at = ?2
                 WHERE id = ?3 AND status IN ({})",
                status_guard(SessionStatus::Ended)
            ),
            params![SessionStatus::Ended.as_str(), now.timestamp(), session_id],
        )?;

        if changed == 0 {
            tracing::debug!("Session {} not live, end is a no-op", session_id);
            return Ok(None);
        }

        let record = insert_outcome(&tx, session_id, outcome, now)?;
        tx.execute(
            "UPDATE sessions SET outcome_id = ?1 WHERE id = ?2",
            params![record.id, session_id],
        )?;
        tx.commit()?;

        tracing::info!(
            "Session {} ended: {} (score {}, outcome {})",
            session_id,
            record.death,
            record.score,
            record.id
        );
        Ok(Some(record))
    }
}

/// SQL list of the states that may move into `target`.
fn status_guard(target: SessionStatus) -> String {
    sql_list(
        SessionStatus::predecessors(target)
            .iter()
            .map(|from| from.as_str()),
    )
}

fn generate_access_token() -> String {
    hex::encode(rand::random::<[u8; 24]>())
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status_str: String = row.get(1)?;
    let status = status_str.parse::<SessionStatus>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(1, "status".to_string(), rusqlite::types::Type::Text)
    })?;
    let ante_sats: i64 = row.get(2)?;
    let started_at: Option<i64> = row.get(8)?;
    let ended_at: Option<i64> = row.get(9)?;

    Ok(Session {
        id: row.get(0)?,
        status,
        ante: Amount::from_sat(ante_sats as u64),
        account_id: row.get(3)?,
        payout_destination: row.get(4)?,
        email: row.get(5)?,
        access_token: row.get(6)?,
        created_at: timestamp_to_datetime(row.get(7)?),
        started_at: started_at.map(timestamp_to_datetime),
        ended_at: ended_at.map(timestamp_to_datetime),
        outcome_id: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::OutcomeStore;
    use crate::types::PayoutStatus;
    use tempfile::{tempdir, TempDir};

    async fn store() -> (SessionStore, OutcomeStore, TempDir) {
        let temp_dir = tempdir().unwrap();
        let storage = Arc::new(
            Storage::new(&temp_dir.path().join("ascend.db"), Amount::ZERO)
                .await
                .unwrap(),
        );
        (
            SessionStore::new(storage.clone()),
            OutcomeStore::new(storage),
            temp_dir,
        )
    }

    fn outcome(account: &str, ascended: bool, end_time: i64) -> NewOutcome {
        NewOutcome {
            account_id: account.to_string(),
            character_name: "Agnes".to_string(),
            ascended,
            cheat_mode: None,
            score: if ascended { 999_999 } else { 1234 },
            turns: 5000,
            death: if ascended {
                "ascended".to_string()
            } else {
                "killed by a jackal".to_string()
            },
            end_time,
        }
    }

    #[test]
    fn test_status_guard() {
        assert_eq!(status_guard(SessionStatus::Active), "'pending'");
        assert_eq!(status_guard(SessionStatus::Ended), "'active', 'playing'");
        assert_eq!(status_guard(SessionStatus::Pending), "");
    }

    #[tokio::test]
    async fn test_create_pending() {
        let (sessions, _, _dir) = store().await;

        let session = sessions
            .create_pending(Amount::from_sat(1000), Some("alice@example.com"), None)
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.access_token.len(), 48);

        let loaded = sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Pending);
        assert_eq!(loaded.ante, Amount::from_sat(1000));
        assert_eq!(loaded.payout_destination.as_deref(), Some("alice@example.com"));
        assert!(loaded.started_at.is_none());
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let (sessions, _, _dir) = store().await;
        let session = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();

        assert!(sessions.confirm(&session.id).await.unwrap());
        assert!(!sessions.confirm(&session.id).await.unwrap());

        let loaded = sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Active);
        assert!(loaded.started_at.is_some());
    }

    #[tokio::test]
    async fn test_confirm_unknown_session() {
        let (sessions, _, _dir) = store().await;

        let err = sessions.confirm("missing").await.unwrap_err();
        assert!(matches!(err, AscendError::SessionNotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirms_have_one_winner() {
        let (sessions, _, _dir) = store().await;
        let session = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let sessions = sessions.clone();
            let id = session.id.clone();
            handles.push(tokio::spawn(async move { sessions.confirm(&id).await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        let loaded = sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_attach_account_requires_live_session() {
        let (sessions, _, _dir) = store().await;
        let session = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();

        let err = sessions
            .attach_account(&session.id, "1001", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AscendError::SessionNotLive { .. }));

        let err = sessions
            .attach_account("missing", "1001", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AscendError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_one_live_session_per_account() {
        let (sessions, _, _dir) = store().await;

        let first = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();
        let second = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();
        sessions.confirm(&first.id).await.unwrap();
        sessions.confirm(&second.id).await.unwrap();

        sessions
            .attach_account(&first.id, "1001", Utc::now())
            .await
            .unwrap();
        let err = sessions
            .attach_account(&second.id, "1001", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AscendError::AccountInUse { .. }));

        // Once the first session ends the account can be reused
        sessions
            .end(&first.id, &outcome("1001", false, Utc::now().timestamp()))
            .await
            .unwrap()
            .unwrap();
        sessions
            .attach_account(&second.id, "1001", Utc::now())
            .await
            .unwrap();

        let found = sessions.find_by_account("1001").await.unwrap().unwrap();
        assert_eq!(found.id, second.id);
    }

    #[tokio::test]
    async fn test_find_by_account_ignores_pending_and_ended() {
        let (sessions, _, _dir) = store().await;
        assert!(sessions.find_by_account("1001").await.unwrap().is_none());

        let session = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();
        sessions.confirm(&session.id).await.unwrap();
        sessions
            .attach_account(&session.id, "1001", Utc::now())
            .await
            .unwrap();
        assert!(sessions.mark_playing(&session.id).await.unwrap());
        assert!(!sessions.mark_playing(&session.id).await.unwrap());

        let found = sessions.find_by_account("1001").await.unwrap().unwrap();
        assert_eq!(found.status, SessionStatus::Playing);

        sessions
            .end(&session.id, &outcome("1001", false, Utc::now().timestamp()))
            .await
            .unwrap();
        assert!(sessions.find_by_account("1001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let (sessions, outcomes, _dir) = store().await;
        let session = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();
        sessions.confirm(&session.id).await.unwrap();

        let end = outcome("1001", true, Utc::now().timestamp());
        let record = sessions.end(&session.id, &end).await.unwrap().unwrap();
        assert!(record.ascended);
        assert_eq!(record.payout.status, PayoutStatus::Pending);

        assert!(sessions.end(&session.id, &end).await.unwrap().is_none());

        let loaded = sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Ended);
        assert_eq!(loaded.outcome_id, Some(record.id));
        assert!(loaded.ended_at.is_some());

        assert_eq!(outcomes.recent(10).await.unwrap().len(), 1);
        let stored = outcomes.for_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.id, record.id);
        assert_eq!(stored.death, "ascended");
    }

    #[tokio::test]
    async fn test_pending_session_cannot_end() {
        let (sessions, outcomes, _dir) = store().await;
        let session = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();

        let result = sessions
            .end(&session.id, &outcome("1001", false, 0))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(outcomes.recent(10).await.unwrap().is_empty());
        assert_eq!(
            sessions.get(&session.id).await.unwrap().unwrap().status,
            SessionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_set_payout_destination_until_ended() {
        let (sessions, _, _dir) = store().await;
        let session = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();

        sessions
            .set_payout_destination(&session.id, "bob@example.com")
            .await
            .unwrap();
        sessions.confirm(&session.id).await.unwrap();
        sessions
            .end(&session.id, &outcome("1001", false, 0))
            .await
            .unwrap();

        let err = sessions
            .set_payout_destination(&session.id, "carol@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AscendError::SessionEnded { .. }));

        let loaded = sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.payout_destination.as_deref(), Some("bob@example.com"));
        assert_eq!(sessions.count_live().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_abandon_only_closes_live_sessions() {
        let (sessions, outcomes, _dir) = store().await;
        let session = sessions
            .create_pending(Amount::from_sat(1000), None, None)
            .await
            .unwrap();

        assert!(!sessions.abandon(&session.id).await.unwrap());
        sessions.confirm(&session.id).await.unwrap();
        assert!(sessions.abandon(&session.id).await.unwrap());
        assert!(!sessions.abandon(&session.id).await.unwrap());

        let loaded = sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Ended);
        assert!(loaded.outcome_id.is_none());
        assert!(outcomes.for_session(&session.id).await.unwrap().is_none());
    }
}
