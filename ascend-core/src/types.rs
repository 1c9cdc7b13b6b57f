use bitcoin::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Playing,
    Ended,
}

/// Every legal session transition. Anything not listed is rejected.
pub const SESSION_TRANSITIONS: &[(SessionStatus, SessionStatus)] = &[
    (SessionStatus::Pending, SessionStatus::Active),
    (SessionStatus::Active, SessionStatus::Playing),
    (SessionStatus::Active, SessionStatus::Ended),
    (SessionStatus::Playing, SessionStatus::Ended),
];

impl SessionStatus {
    pub const ALL: [SessionStatus; 4] = [
        SessionStatus::Pending,
        SessionStatus::Active,
        SessionStatus::Playing,
        SessionStatus::Ended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Playing => "playing",
            SessionStatus::Ended => "ended",
        }
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        SESSION_TRANSITIONS
            .iter()
            .any(|&(from, to)| from == self && to == next)
    }

    /// States from which `target` is reachable in one step.
    pub fn predecessors(target: SessionStatus) -> Vec<SessionStatus> {
        SESSION_TRANSITIONS
            .iter()
            .filter(|(_, to)| *to == target)
            .map(|(from, _)| *from)
            .collect()
    }

    /// Active or Playing: the account is bound to a running game.
    pub fn is_live(self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Playing)
    }

    pub fn live() -> Vec<SessionStatus> {
        SessionStatus::ALL
            .into_iter()
            .filter(|status| status.is_live())
            .collect()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SessionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown session status '{}'", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub ante: Amount,
    pub account_id: Option<String>,
    pub payout_destination: Option<String>,
    pub email: Option<String>,
    pub access_token: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheatMode {
    Wizard,
    Explore,
}

impl CheatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheatMode::Wizard => "wizard",
            CheatMode::Explore => "explore",
        }
    }

    pub fn from_flags(flags: u64) -> Option<Self> {
        if flags & 0x1 != 0 {
            Some(CheatMode::Wizard)
        } else if flags & 0x2 != 0 {
            Some(CheatMode::Explore)
        } else {
            None
        }
    }
}

impl FromStr for CheatMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "wizard" => Ok(CheatMode::Wizard),
            "explore" => Ok(CheatMode::Explore),
            other => Err(format!("unknown cheat mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    /// Not an ascension, nothing to pay.
    NotEligible,
    /// Ascension recorded, no coordinator has claimed it yet.
    Pending,
    /// Claimed by a coordinator. Funds may be moving; never retried
    /// automatically.
    InFlight,
    Paid,
    /// Pot was drained, the transfer failed and the pot was restored.
    Failed,
    /// Blocked before any fund movement (missing/invalid destination, empty pot).
    Skipped,
}

impl PayoutStatus {
    /// States a coordinator may claim. No money has moved in any of them.
    pub const CLAIMABLE: [PayoutStatus; 3] = [
        PayoutStatus::Pending,
        PayoutStatus::Failed,
        PayoutStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::NotEligible => "not_eligible",
            PayoutStatus::Pending => "pending",
            PayoutStatus::InFlight => "in_flight",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
            PayoutStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_eligible" => Ok(PayoutStatus::NotEligible),
            "pending" => Ok(PayoutStatus::Pending),
            "in_flight" => Ok(PayoutStatus::InFlight),
            "paid" => Ok(PayoutStatus::Paid),
            "failed" => Ok(PayoutStatus::Failed),
            "skipped" => Ok(PayoutStatus::Skipped),
            other => Err(format!("unknown payout status '{}'", other)),
        }
    }
}

/// Payout result attached to an outcome after the coordinator runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub status: PayoutStatus,
    pub amount: Option<Amount>,
    pub reference: Option<String>,
    pub error: Option<String>,
}

impl PayoutRecord {
    pub fn not_eligible() -> Self {
        Self {
            status: PayoutStatus::NotEligible,
            amount: None,
            reference: None,
            error: None,
        }
    }

    pub fn pending() -> Self {
        Self {
            status: PayoutStatus::Pending,
            ..Self::not_eligible()
        }
    }

    pub fn paid(amount: Amount, reference: Option<String>) -> Self {
        Self {
            status: PayoutStatus::Paid,
            amount: Some(amount),
            reference,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: PayoutStatus::Failed,
            amount: None,
            reference: None,
            error: Some(reason.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: PayoutStatus::Skipped,
            amount: None,
            reference: None,
            error: Some(reason.into()),
        }
    }

    pub fn in_flight() -> Self {
        Self {
            status: PayoutStatus::InFlight,
            ..Self::not_eligible()
        }
    }

    /// An ascension the operator still owes and may retry.
    pub fn is_unpaid(&self) -> bool {
        PayoutStatus::CLAIMABLE.contains(&self.status)
    }
}

/// Terminal game facts extracted from one log entry, before storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOutcome {
    pub account_id: String,
    pub character_name: String,
    pub ascended: bool,
    pub cheat_mode: Option<CheatMode>,
    pub score: i64,
    pub turns: i64,
    pub death: String,
    pub end_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub id: i64,
    pub session_id: String,
    pub account_id: String,
    pub character_name: String,
    pub ascended: bool,
    pub cheat_mode: Option<CheatMode>,
    pub score: i64,
    pub turns: i64,
    pub death: String,
    pub end_time: i64,
    pub recorded_at: DateTime<Utc>,
    pub payout: PayoutRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStats {
    pub total_games: u64,
    pub total_ascensions: u64,
    pub high_score: Option<i64>,
    pub avg_score: Option<f64>,
    pub total_paid: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use SessionStatus::*;

        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Playing));
        assert!(Active.can_transition_to(Ended));
        assert!(Playing.can_transition_to(Ended));

        assert!(!Pending.can_transition_to(Ended));
        assert!(!Pending.can_transition_to(Playing));
        assert!(!Ended.can_transition_to(Active));
        assert!(!Playing.can_transition_to(Active));
        for status in SessionStatus::ALL {
            assert!(!Ended.can_transition_to(status));
        }
    }

    #[test]
    fn test_predecessors() {
        use SessionStatus::*;

        assert_eq!(SessionStatus::predecessors(Active), vec![Pending]);
        assert_eq!(SessionStatus::predecessors(Ended), vec![Active, Playing]);
        assert!(SessionStatus::predecessors(Pending).is_empty());
        assert_eq!(SessionStatus::live(), vec![Active, Playing]);
        assert_eq!(SessionStatus::live(), SessionStatus::predecessors(Ended));
    }

    #[test]
    fn test_status_strings() {
        for status in SessionStatus::ALL {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("finished".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_only_claimable_payouts_are_unpaid() {
        let owed = [
            PayoutRecord::pending(),
            PayoutRecord::failed("no route"),
            PayoutRecord::skipped("pot is empty"),
        ];
        assert!(owed.iter().all(PayoutRecord::is_unpaid));

        let settled = [
            PayoutRecord::not_eligible(),
            PayoutRecord::in_flight(),
            PayoutRecord::paid(Amount::from_sat(1), None),
        ];
        assert!(!settled.iter().any(PayoutRecord::is_unpaid));
        assert_eq!(
            "in_flight".parse::<PayoutStatus>().unwrap(),
            PayoutStatus::InFlight
        );
    }

    #[test]
    fn test_cheat_mode_flags() {
        assert_eq!(CheatMode::from_flags(0x0), None);
        assert_eq!(CheatMode::from_flags(0x1), Some(CheatMode::Wizard));
        assert_eq!(CheatMode::from_flags(0x2), Some(CheatMode::Explore));
        assert_eq!(CheatMode::from_flags(0x3), Some(CheatMode::Wizard));
        assert_eq!(CheatMode::from_flags(0x4), None);
    }
}
