use ascend_core::{Amount, House, Result};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum PotCommands {
    /// Show the pot balance
    Show,
    /// Overwrite the pot balance
    Set {
        /// New balance in sats
        sats: u64,
    },
    /// Reset the pot to its configured initial value
    Reset,
}

pub async fn handle_pot_command(cmd: PotCommands, house: &House) -> Result<()> {
    let ledger = house.ledger();

    match cmd {
        PotCommands::Show => {
            let balance = ledger.balance().await?;
            let live = house.sessions().count_live().await?;

            println!("Pot: {} sats ({:.8} BTC)", balance.to_sat(), balance.to_btc());
            println!("Live sessions: {}", live);
        }

        PotCommands::Set { sats } => {
            let previous = ledger.balance().await?;
            ledger.set(Amount::from_sat(sats)).await?;

            println!("Pot balance updated:");
            println!("  Previous: {} sats", previous.to_sat());
            println!("  New:      {} sats", sats);
        }

        PotCommands::Reset => {
            let previous = ledger.balance().await?;
            let initial = house.config().pot_initial;
            ledger.set(initial).await?;

            println!("Pot balance reset:");
            println!("  Previous: {} sats", previous.to_sat());
            println!("  New:      {} sats (initial)", initial.to_sat());
        }
    }

    Ok(())
}
