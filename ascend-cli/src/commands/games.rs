use super::format_time;
use ascend_core::{House, OutcomeRecord, PayoutStatus, Result};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};

#[derive(Subcommand)]
pub enum GamesCommands {
    /// Most recently finished games
    Recent {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Highest scores
    Leaderboard {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Every ascension
    Ascensions,
    /// Ascensions whose payout is pending, failed or skipped
    Unpaid,
    /// Retry the payout for an unpaid ascension
    Retry {
        /// Outcome ID
        outcome_id: i64,
    },
    /// Return a payout stuck in flight to the unpaid list. Check with the
    /// payout provider first that nothing was sent
    Release {
        /// Outcome ID
        outcome_id: i64,
    },
    /// Totals across all games
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_games_command(cmd: GamesCommands, house: &House) -> Result<()> {
    let outcomes = house.outcomes();

    match cmd {
        GamesCommands::Recent { limit } => print_outcomes(&outcomes.recent(limit).await?),
        GamesCommands::Leaderboard { limit } => {
            print_outcomes(&outcomes.leaderboard(limit).await?)
        }
        GamesCommands::Ascensions => print_outcomes(&outcomes.ascensions().await?),

        GamesCommands::Unpaid => {
            let unpaid = outcomes.unpaid_ascensions().await?;
            if unpaid.is_empty() {
                println!("No unpaid ascensions.");
            } else {
                println!(
                    "Unpaid ascensions (pot: {} sats):",
                    house.ledger().balance().await?.to_sat()
                );
                print_outcomes(&unpaid);
                println!("Retry with: ascend games retry <outcome-id>");
            }

            let in_flight = outcomes.in_flight_payouts().await?;
            if !in_flight.is_empty() {
                println!();
                println!("Payouts in flight (a transfer may have been sent):");
                print_outcomes(&in_flight);
                println!("If one is stuck and the provider shows no transfer:");
                println!("  ascend games release <outcome-id>");
            }
        }

        GamesCommands::Retry { outcome_id } => {
            let record = house.retry_payout(outcome_id).await?;

            println!("Outcome {} payout: {}", outcome_id, record.status);
            if record.status == PayoutStatus::InFlight {
                println!("  Another payout for this ascension has not finished");
            }
            if let Some(amount) = record.amount {
                println!("  Amount: {} sats", amount.to_sat());
            }
            if let Some(reference) = &record.reference {
                println!("  Reference: {}", reference);
            }
            if let Some(error) = &record.error {
                println!("  Error: {}", error);
            }
        }

        GamesCommands::Release { outcome_id } => {
            if house.release_payout(outcome_id).await? {
                println!("Outcome {} is unpaid again, retry when ready", outcome_id);
            } else {
                println!("Outcome {} has no payout in flight, unchanged", outcome_id);
            }
        }

        GamesCommands::Stats { json } => {
            let stats = outcomes.stats().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }

            println!("Games played: {}", stats.total_games);
            println!("Ascensions: {}", stats.total_ascensions);
            match stats.high_score {
                Some(score) => println!("High score: {}", score),
                None => println!("High score: -"),
            }
            match stats.avg_score {
                Some(avg) => println!("Average score: {:.0}", avg),
                None => println!("Average score: -"),
            }
            println!("Total paid out: {} sats", stats.total_paid.to_sat());
            println!("Current pot: {} sats", house.ledger().balance().await?.to_sat());
        }
    }

    Ok(())
}

fn print_outcomes(outcomes: &[OutcomeRecord]) {
    if outcomes.is_empty() {
        println!("No games found.");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "ID", "Account", "Character", "Score", "Turns", "Death", "Payout", "Finished",
    ]);

    for outcome in outcomes {
        let payout = match outcome.payout.amount {
            Some(amount) => format!("{} ({} sats)", outcome.payout.status, amount.to_sat()),
            None => outcome.payout.status.to_string(),
        };
        table.add_row(vec![
            outcome.id.to_string(),
            outcome.account_id.clone(),
            outcome.character_name.clone(),
            outcome.score.to_string(),
            outcome.turns.to_string(),
            outcome.death.clone(),
            payout,
            format_time(outcome.recorded_at),
        ]);
    }

    println!("{}", table);
}
