//! Ascend core - pot ledger, sessions, xlogfile watcher and payouts for
//! pay-to-play NetHack.
//!
//! A paid session adds its ante to a shared pot. When the game's entry
//! shows up in the xlogfile the session is closed, and an ascension wins
//! the whole pot.

pub mod config;
pub mod error;
pub mod house;
pub mod payment;
pub mod payout;
pub mod storage;
pub mod types;
pub mod watcher;
pub mod xlog;

pub use config::HouseConfig;
pub use error::{AscendError, Result};
pub use house::House;
pub use payment::{Confirmation, PaymentConfirmer};
pub use payout::{HttpTransfer, MockTransfer, PayoutCoordinator, PayoutTransfer, TransferReceipt};
pub use storage::{Ledger, OutcomeStore, SessionStore, Storage};
pub use types::{
    CheatMode, GameStats, NewOutcome, OutcomeRecord, PayoutRecord, PayoutStatus, Session,
    SessionStatus,
};
pub use watcher::{LineDisposition, OutcomeWatcher, WatchStats, WatchStatsSnapshot};
pub use xlog::{XlogEntry, XlogError};

pub use ::bitcoin::Amount;
