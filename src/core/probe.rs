//! Remote path existence checks used as idempotence guards.

use crate::error::Result;
use crate::executor::{Executor, RemoteCommand};
use crate::utils::shell;

/// Whether `path` exists on the session target.
///
/// `test -e` exiting 1 means absent; any other non-zero exit (255 is a
/// connection failure) is an error, never a silent "absent".
pub fn exists(exec: &Executor, path: &str) -> Result<bool> {
    let probe = RemoteCommand::new(format!("test -e {}", shell::quote_path(path)));
    let (rendered, output) = exec.run_unchecked(&probe);
    match output.exit_code {
        0 => Ok(true),
        1 => Ok(false),
        _ => Err(exec.failure(rendered, &output)),
    }
}
