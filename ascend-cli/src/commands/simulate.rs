use ascend_core::{House, Result, XlogEntry};
use chrono::Utc;
use clap::Args;
use tokio::io::AsyncWriteExt;

#[derive(Args)]
pub struct SimulateArgs {
    /// Account uid the game ran under
    account: String,

    /// Ascend instead of dying
    #[arg(long)]
    ascend: bool,

    /// Death text (ignored with --ascend)
    #[arg(long, default_value = "killed by a goblin")]
    death: String,

    #[arg(long, default_value = "100")]
    score: i64,

    #[arg(long, default_value = "50")]
    turns: i64,

    /// Character name
    #[arg(long, default_value = "TestHero")]
    name: String,

    /// Mark the game as played in wizard mode
    #[arg(long, conflicts_with = "explore")]
    wizard: bool,

    /// Mark the game as played in explore mode
    #[arg(long)]
    explore: bool,

    /// End time as unix seconds. Defaults to one second from now so a game
    /// simulated right after `session attach` is not dropped as stale
    #[arg(long)]
    endtime: Option<i64>,
}

pub async fn handle_simulate_command(args: SimulateArgs, house: &House) -> Result<()> {
    let (death, score) = if args.ascend {
        ("ascended to demigod-hood".to_string(), args.score.max(50_000))
    } else {
        (args.death, args.score)
    };
    let flags = match (args.wizard, args.explore) {
        (true, _) => 0x1,
        (_, true) => 0x2,
        _ => 0x0,
    };

    let entry = XlogEntry {
        uid: args.account,
        name: args.name,
        death,
        points: score,
        turns: args.turns,
        endtime: args.endtime.unwrap_or_else(default_endtime),
        flags,
        role: Some("Val".to_string()),
        race: Some("Hum".to_string()),
    };

    match house.sessions().find_by_account(&entry.uid).await? {
        Some(session) => println!("Account {} is playing session {}", entry.uid, session.id),
        None => println!("Warning: no live session for account {}", entry.uid),
    }

    let path = &house.config().xlogfile_path;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", entry.to_line()).as_bytes())
        .await?;
    file.flush().await?;

    println!("Appended to {}:", path.display());
    println!("  Character: {}", entry.name);
    println!("  Death: {}", entry.death);
    println!("  Score: {}", entry.points);
    println!("  End time: {}", entry.endtime);
    println!();
    println!("A running 'ascend monitor' will pick it up on its next poll.");

    Ok(())
}

/// Entries ending at or before the session start are stale, and `attach`
/// stamps the start with the current second.
fn default_endtime() -> i64 {
    Utc::now().timestamp() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endtime_is_after_attach() {
        let attached_at = Utc::now().timestamp();
        assert!(default_endtime() > attached_at);
    }
}
