use ascend_core::{House, Result};
use tokio::sync::watch;

pub async fn handle_monitor_command(house: &House) -> Result<()> {
    let mut watcher = house.watcher().await?;
    let stats = watcher.stats();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    println!(
        "Watching {} (Ctrl-C to stop)",
        house.config().xlogfile_path.display()
    );

    let run = tokio::spawn(async move { watcher.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    run.await
        .map_err(|e| ascend_core::AscendError::internal(format!("Watcher task failed: {}", e)))??;

    let stats = stats.snapshot();
    println!();
    println!("Lines read: {}", stats.lines);
    println!("  Recorded:   {} ({} ascensions)", stats.recorded, stats.ascensions);
    println!("  Stale:      {}", stats.stale);
    println!("  Orphan:     {}", stats.orphan);
    println!("  Duplicate:  {}", stats.duplicate);
    println!("  Malformed:  {}", stats.malformed);

    Ok(())
}
