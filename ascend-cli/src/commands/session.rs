use super::format_time;
use ascend_core::{AscendError, House, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Open a pending session at the configured ante
    Create {
        /// Lightning address or LNURL for a payout
        #[arg(short, long)]
        address: Option<String>,
        /// Contact email
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Record that a session's ante was paid
    Confirm {
        /// Session ID
        session_id: String,
    },
    /// Bind a provisioned game account to a paid session
    Attach {
        /// Session ID
        session_id: String,
        /// Account uid as written to the xlogfile
        account: String,
        /// Session start as unix seconds (defaults to now)
        #[arg(long)]
        started_at: Option<i64>,
    },
    /// Mark a session as playing
    Play {
        /// Session ID
        session_id: String,
    },
    /// Close a live session without an outcome
    Abandon {
        /// Session ID
        session_id: String,
    },
    /// List recent sessions
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show one session
    Show {
        /// Session ID
        session_id: String,
    },
    /// Set or change the payout destination
    SetAddress {
        /// Session ID
        session_id: String,
        /// Lightning address or LNURL
        address: String,
    },
}

pub async fn handle_session_command(cmd: SessionCommands, house: &House) -> Result<()> {
    match cmd {
        SessionCommands::Create { address, email } => {
            let session = house
                .open_session(address.as_deref(), email.as_deref())
                .await?;

            println!("Session created");
            println!("  ID: {}", session.id);
            println!("  Ante: {} sats", session.ante.to_sat());
            println!("  Access token: {}", session.access_token);
            if let Some(address) = &session.payout_destination {
                println!("  Payout to: {}", address);
            }
            println!();
            println!("Confirm payment with: ascend session confirm {}", session.id);
        }

        SessionCommands::Confirm { session_id } => {
            let confirmation = house.confirm_payment(&session_id).await?;

            if confirmation.already_processed {
                println!("Session {} was already confirmed", session_id);
            } else {
                println!("Payment confirmed for session {}", session_id);
            }
            println!("  Pot: {} sats", confirmation.pot_balance.to_sat());
        }

        SessionCommands::Attach {
            session_id,
            account,
            started_at,
        } => {
            let started_at = parse_started_at(started_at)?;
            house
                .sessions()
                .attach_account(&session_id, &account, started_at)
                .await?;

            println!(
                "Session {} bound to account {} (started {})",
                session_id,
                account,
                format_time(started_at)
            );
        }

        SessionCommands::Play { session_id } => {
            if house.sessions().mark_playing(&session_id).await? {
                println!("Session {} is playing", session_id);
            } else {
                println!("Session {} is not active, unchanged", session_id);
            }
        }

        SessionCommands::Abandon { session_id } => {
            if house.sessions().abandon(&session_id).await? {
                println!("Session {} ended without an outcome", session_id);
            } else {
                println!("Session {} is not live, unchanged", session_id);
            }
        }

        SessionCommands::List { limit } => {
            let sessions = house.sessions().list(limit).await?;

            if sessions.is_empty() {
                println!("No sessions found.");
                println!("Create one with: ascend session create");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["ID", "Status", "Account", "Ante", "Payout To", "Created"]);

            for session in sessions {
                table.add_row(vec![
                    session.id.clone(),
                    session.status.to_string(),
                    session.account_id.clone().unwrap_or_else(|| "-".to_string()),
                    format!("{} sats", session.ante.to_sat()),
                    session
                        .payout_destination
                        .clone()
                        .unwrap_or_else(|| "-".to_string()),
                    format_time(session.created_at),
                ]);
            }

            println!("{}", table);
        }

        SessionCommands::Show { session_id } => {
            let session = house
                .sessions()
                .get(&session_id)
                .await?
                .ok_or_else(|| AscendError::session_not_found(&session_id))?;

            println!("Session {}", session.id);
            println!("  Status: {}", session.status);
            println!("  Ante: {} sats", session.ante.to_sat());
            println!("  Account: {}", session.account_id.as_deref().unwrap_or("-"));
            println!(
                "  Payout to: {}",
                session.payout_destination.as_deref().unwrap_or("-")
            );
            println!("  Email: {}", session.email.as_deref().unwrap_or("-"));
            println!("  Created: {}", format_time(session.created_at));
            if let Some(started) = session.started_at {
                println!("  Started: {}", format_time(started));
            }
            if let Some(ended) = session.ended_at {
                println!("  Ended: {}", format_time(ended));
            }

            if let Some(outcome) = house.outcomes().for_session(&session.id).await? {
                println!();
                println!("Outcome #{}", outcome.id);
                println!("  Character: {}", outcome.character_name);
                println!("  Death: {}", outcome.death);
                println!("  Score: {} in {} turns", outcome.score, outcome.turns);
                println!("  Payout: {}", outcome.payout.status);
                if let Some(amount) = outcome.payout.amount {
                    println!("  Paid: {} sats", amount.to_sat());
                }
                if let Some(error) = &outcome.payout.error {
                    println!("  Payout error: {}", error);
                }
            }
        }

        SessionCommands::SetAddress {
            session_id,
            address,
        } => {
            house.set_payout_destination(&session_id, &address).await?;
            println!("Payout destination for {} set to {}", session_id, address);
        }
    }

    Ok(())
}

fn parse_started_at(started_at: Option<i64>) -> Result<DateTime<Utc>> {
    match started_at {
        Some(ts) => DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| AscendError::invalid_input(format!("Invalid start time: {}", ts))),
        None => Ok(Utc::now()),
    }
}
