//! Follows the xlogfile and closes sessions as their games finish.
//!
//! Single tailer per file. Each line is fully handled (session ended,
//! outcome stored, payout attempted) before the cursor moves past it.

pub mod tail;

pub use tail::{LogTail, TailLine, WatchCursor};

use crate::error::Result;
use crate::payout::PayoutCoordinator;
use crate::storage::SessionStore;
use crate::types::PayoutStatus;
use crate::xlog::{XlogEntry, XlogError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What happened to one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineDisposition {
    Recorded {
        outcome_id: i64,
        session_id: String,
        payout: PayoutStatus,
    },
    Malformed(XlogError),
    /// No live session for the account.
    Orphan,
    /// Game ended no later than the session started.
    Stale,
    /// Session was closed by an earlier delivery of the same game.
    Duplicate,
}

#[derive(Debug, Default)]
pub struct WatchStats {
    lines: AtomicU64,
    recorded: AtomicU64,
    ascensions: AtomicU64,
    malformed: AtomicU64,
    orphan: AtomicU64,
    stale: AtomicU64,
    duplicate: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchStatsSnapshot {
    pub lines: u64,
    pub recorded: u64,
    pub ascensions: u64,
    pub malformed: u64,
    pub orphan: u64,
    pub stale: u64,
    pub duplicate: u64,
}

impl WatchStats {
    fn count(&self, disposition: &LineDisposition) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        let counter = match disposition {
            LineDisposition::Recorded { payout, .. } => {
                if *payout != PayoutStatus::NotEligible {
                    self.ascensions.fetch_add(1, Ordering::Relaxed);
                }
                &self.recorded
            }
            LineDisposition::Malformed(_) => &self.malformed,
            LineDisposition::Orphan => &self.orphan,
            LineDisposition::Stale => &self.stale,
            LineDisposition::Duplicate => &self.duplicate,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WatchStatsSnapshot {
        WatchStatsSnapshot {
            lines: self.lines.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
            ascensions: self.ascensions.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            orphan: self.orphan.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub dispositions: Vec<LineDisposition>,
}

pub struct OutcomeWatcher {
    tail: LogTail,
    sessions: SessionStore,
    payouts: Arc<PayoutCoordinator>,
    stats: Arc<WatchStats>,
    poll_interval: Duration,
}

impl OutcomeWatcher {
    /// Starts at the current end of `path`; earlier games are never replayed.
    pub async fn new(
        path: impl Into<PathBuf>,
        sessions: SessionStore,
        payouts: Arc<PayoutCoordinator>,
        poll_interval: Duration,
    ) -> Result<Self> {
        Ok(Self {
            tail: LogTail::open_at_end(path).await?,
            sessions,
            payouts,
            stats: Arc::new(WatchStats::default()),
            poll_interval,
        })
    }

    pub fn stats(&self) -> Arc<WatchStats> {
        self.stats.clone()
    }

    pub fn cursor(&self) -> WatchCursor {
        self.tail.cursor()
    }

    /// Handle every complete line appended since the last tick. Stops at the
    /// first line that fails with a storage error; that line is retried on
    /// the next tick.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let lines = self.tail.read_new_lines().await?;
        let mut report = TickReport::default();

        for line in lines {
            let disposition = self.process_line(&line.text).await?;
            self.stats.count(&disposition);
            self.tail.commit(&line);
            report.dispositions.push(disposition);
        }

        Ok(report)
    }

    pub async fn process_line(&self, line: &str) -> Result<LineDisposition> {
        let entry = match XlogEntry::parse(line) {
            Ok(entry) => entry,
            Err(XlogError::Blank) => return Ok(LineDisposition::Malformed(XlogError::Blank)),
            Err(e) => {
                tracing::warn!("Skipping malformed xlogfile line ({}): {}", e, line);
                return Ok(LineDisposition::Malformed(e));
            }
        };

        let session = match self.sessions.find_by_account(&entry.uid).await? {
            Some(session) => session,
            None => {
                tracing::info!(
                    "No live session for uid {} ({}: {}), ignoring",
                    entry.uid,
                    entry.name,
                    entry.death
                );
                return Ok(LineDisposition::Orphan);
            }
        };

        let started_at = match session.started_at {
            Some(started_at) => started_at.timestamp(),
            None => {
                tracing::warn!(
                    "Session {} has no start time, treating uid {} entry as stale",
                    session.id,
                    entry.uid
                );
                return Ok(LineDisposition::Stale);
            }
        };
        if entry.endtime <= started_at {
            tracing::warn!(
                "Stale entry for uid {}: ended at {}, session {} started at {}",
                entry.uid,
                entry.endtime,
                session.id,
                started_at
            );
            return Ok(LineDisposition::Stale);
        }

        if let Some(mode) = entry.cheat_mode() {
            tracing::warn!(
                "{} mode game for uid {} ({}), no score and no payout",
                mode.as_str(),
                entry.uid,
                entry.name
            );
        }

        let outcome = entry.to_new_outcome();
        let record = match self.sessions.end(&session.id, &outcome).await? {
            Some(record) => record,
            None => {
                tracing::debug!("Session {} already ended, duplicate entry", session.id);
                return Ok(LineDisposition::Duplicate);
            }
        };

        let mut payout = record.payout.status;
        if record.ascended {
            tracing::info!(
                "ASCENSION! uid {} ({}) on session {}",
                entry.uid,
                entry.name,
                session.id
            );
            // The outcome is already stored as pending; a failure here leaves
            // it on the unpaid list rather than replaying the line.
            match self.payouts.handle(&record).await {
                Ok(result) => payout = result.status,
                Err(e) => tracing::error!("Payout for outcome {} did not run: {}", record.id, e),
            }
        }

        Ok(LineDisposition::Recorded {
            outcome_id: record.id,
            session_id: session.id,
            payout,
        })
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            "Watching {} every {:?}",
            self.tail.path().display(),
            self.poll_interval
        );

        while !*shutdown.borrow() {
            match self.tick().await {
                Ok(report) if !report.dispositions.is_empty() => {
                    tracing::debug!("Handled {} xlogfile lines", report.dispositions.len())
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Watcher tick failed, retrying: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Watcher stopped at offset {}", self.tail.cursor().offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::MockTransfer;
    use crate::storage::{Ledger, OutcomeStore, Storage};
    use crate::types::{Session, SessionStatus};
    use bitcoin::Amount;
    use chrono::{DateTime, Utc};
    use std::io::Write;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        ledger: Ledger,
        sessions: SessionStore,
        outcomes: OutcomeStore,
        transfer: Arc<MockTransfer>,
        watcher: OutcomeWatcher,
        xlog: PathBuf,
        _dir: TempDir,
    }

    impl Fixture {
        async fn new(pot: u64) -> Self {
            let dir = tempdir().unwrap();
            let xlog = dir.path().join("xlogfile");
            std::fs::write(&xlog, "uid=1000\tdeath=old game\tendtime=1\n").unwrap();

            let storage = Arc::new(
                Storage::new(&dir.path().join("ascend.db"), Amount::from_sat(pot))
                    .await
                    .unwrap(),
            );
            let ledger = Ledger::new(storage.clone());
            let sessions = SessionStore::new(storage.clone());
            let outcomes = OutcomeStore::new(storage);
            let transfer = Arc::new(MockTransfer::new());
            let payouts = Arc::new(PayoutCoordinator::new(
                ledger.clone(),
                sessions.clone(),
                outcomes.clone(),
                transfer.clone(),
                Duration::from_secs(5),
            ));
            let watcher = OutcomeWatcher::new(
                &xlog,
                sessions.clone(),
                payouts,
                Duration::from_millis(10),
            )
            .await
            .unwrap();

            Self {
                ledger,
                sessions,
                outcomes,
                transfer,
                watcher,
                xlog,
                _dir: dir,
            }
        }

        async fn live_session(&self, account: &str, started_at: DateTime<Utc>) -> Session {
            let session = self
                .sessions
                .create_pending(Amount::from_sat(1000), Some("alice@example.com"), None)
                .await
                .unwrap();
            self.sessions.confirm(&session.id).await.unwrap();
            self.sessions
                .attach_account(&session.id, account, started_at)
                .await
                .unwrap();
            self.sessions.get(&session.id).await.unwrap().unwrap()
        }
    }

    fn append(path: &Path, line: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        writeln!(file, "{}", line).unwrap();
    }

    fn game_line(uid: &str, death: &str, endtime: i64) -> String {
        format!(
            "version=3.6.6\tpoints=4200\tuid={}\trole=Val\trace=Hum\tname=Agnes\tdeath={}\tturns=900\tendtime={}\tflags=0x0",
            uid, death, endtime
        )
    }

    #[tokio::test]
    async fn test_history_is_not_replayed() {
        let mut fixture = Fixture::new(0).await;
        let report = fixture.watcher.tick().await.unwrap();
        assert!(report.dispositions.is_empty());
    }

    #[tokio::test]
    async fn test_death_ends_session() {
        let mut fixture = Fixture::new(5000).await;
        let session = fixture.live_session("1001", Utc::now()).await;

        append(&fixture.xlog, &game_line("1001", "killed by a jackal", Utc::now().timestamp() + 60));
        let report = fixture.watcher.tick().await.unwrap();

        assert!(matches!(
            report.dispositions.as_slice(),
            [LineDisposition::Recorded { payout: PayoutStatus::NotEligible, .. }]
        ));
        let ended = fixture.sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        let outcome = fixture.outcomes.for_session(&session.id).await.unwrap().unwrap();
        assert_eq!(outcome.score, 4200);
        assert_eq!(outcome.death, "killed by a jackal");
        assert_eq!(fixture.ledger.balance().await.unwrap(), Amount::from_sat(5000));
        assert!(fixture.transfer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ascension_pays_pot() {
        let mut fixture = Fixture::new(5000).await;
        let session = fixture.live_session("1001", Utc::now()).await;

        append(&fixture.xlog, &game_line("1001", "ascended", Utc::now().timestamp() + 60));
        let report = fixture.watcher.tick().await.unwrap();

        assert!(matches!(
            report.dispositions.as_slice(),
            [LineDisposition::Recorded { payout: PayoutStatus::Paid, .. }]
        ));
        let outcome = fixture.outcomes.for_session(&session.id).await.unwrap().unwrap();
        assert_eq!(outcome.payout.amount, Some(Amount::from_sat(5000)));
        assert_eq!(fixture.ledger.balance().await.unwrap(), Amount::ZERO);
        assert_eq!(fixture.watcher.stats().snapshot().ascensions, 1);
    }

    #[tokio::test]
    async fn test_replayed_line_recorded_once() {
        let mut fixture = Fixture::new(5000).await;
        let session = fixture.live_session("1001", Utc::now()).await;
        let line = game_line("1001", "ascended", Utc::now().timestamp() + 60);

        append(&fixture.xlog, &line);
        append(&fixture.xlog, &line);
        let report = fixture.watcher.tick().await.unwrap();

        assert_eq!(report.dispositions.len(), 2);
        assert!(matches!(report.dispositions[0], LineDisposition::Recorded { .. }));
        // The session is gone from the live index, so the replay resolves to nothing
        assert_eq!(report.dispositions[1], LineDisposition::Orphan);
        assert_eq!(fixture.outcomes.recent(10).await.unwrap().len(), 1);
        assert_eq!(fixture.transfer.sent().len(), 1);

        // Processing the same game directly against the ended session is a no-op
        let record = fixture.outcomes.for_session(&session.id).await.unwrap().unwrap();
        let again = fixture
            .sessions
            .end(&session.id, &XlogEntry::parse(&line).unwrap().to_new_outcome())
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(fixture.outcomes.recent(10).await.unwrap()[0].id, record.id);
    }

    #[tokio::test]
    async fn test_stale_entry_changes_nothing() {
        let mut fixture = Fixture::new(5000).await;
        let started = Utc::now();
        let session = fixture.live_session("1001", started).await;

        append(&fixture.xlog, &game_line("1001", "ascended", started.timestamp()));
        append(&fixture.xlog, &game_line("1001", "killed by a newt", started.timestamp() - 30));
        let report = fixture.watcher.tick().await.unwrap();

        assert_eq!(
            report.dispositions,
            vec![LineDisposition::Stale, LineDisposition::Stale]
        );
        let loaded = fixture.sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Active);
        assert!(fixture.outcomes.recent(10).await.unwrap().is_empty());
        assert_eq!(fixture.ledger.balance().await.unwrap(), Amount::from_sat(5000));
        assert_eq!(fixture.watcher.stats().snapshot().stale, 2);
    }

    #[tokio::test]
    async fn test_orphan_and_malformed_lines_are_skipped() {
        let mut fixture = Fixture::new(5000).await;
        let session = fixture.live_session("1001", Utc::now()).await;
        let endtime = Utc::now().timestamp() + 60;

        append(&fixture.xlog, "this is not an xlog line");
        append(&fixture.xlog, &game_line("4242", "ascended", endtime));
        append(&fixture.xlog, &game_line("1001", "died of starvation", endtime));
        let report = fixture.watcher.tick().await.unwrap();

        assert!(matches!(report.dispositions[0], LineDisposition::Malformed(_)));
        assert_eq!(report.dispositions[1], LineDisposition::Orphan);
        assert!(matches!(report.dispositions[2], LineDisposition::Recorded { .. }));
        assert_eq!(
            fixture.sessions.get(&session.id).await.unwrap().unwrap().status,
            SessionStatus::Ended
        );

        let stats = fixture.watcher.stats().snapshot();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.orphan, 1);
        assert_eq!(stats.recorded, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let fixture = Fixture::new(5000).await;
        let session = fixture.live_session("1001", Utc::now()).await;
        append(&fixture.xlog, &game_line("1001", "ascended", Utc::now().timestamp() + 60));

        let (tx, rx) = watch::channel(false);
        let stats = fixture.watcher.stats();
        let mut watcher = fixture.watcher;
        let handle = tokio::spawn(async move { watcher.run(rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(stats.snapshot().recorded, 1);
        assert_eq!(
            fixture.sessions.get(&session.id).await.unwrap().unwrap().status,
            SessionStatus::Ended
        );
    }
}
