pub mod games;
pub mod monitor;
pub mod pot;
pub mod session;
pub mod simulate;

pub use games::{handle_games_command, GamesCommands};
pub use monitor::handle_monitor_command;
pub use pot::{handle_pot_command, PotCommands};
pub use session::{handle_session_command, SessionCommands};
pub use simulate::{handle_simulate_command, SimulateArgs};

use chrono::{DateTime, Local, Utc};

pub(crate) fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
