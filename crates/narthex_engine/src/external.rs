//! Out-of-process command invocation.

use std::process::Command;
use tracing::warn;

/// Exit code reported when the command cannot be spawned or yields no
/// code (killed by signal)
pub const SPAWN_FAILED: i64 = -1;

/// Run a command to completion and return its numeric exit code
///
/// Spawn failures are logged and reported as [`SPAWN_FAILED`]; they do
/// not abort the chain.
#[must_use]
pub fn invoke(command: &str, args: &[String]) -> i64 {
    match Command::new(command).args(args).status() {
        Ok(status) => status.code().map_or(SPAWN_FAILED, i64::from),
        Err(err) => {
            warn!(command, %err, "external command failed to spawn");
            SPAWN_FAILED
        }
    }
}
