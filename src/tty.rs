//! Terminal I/O for the CLI.
//!
//! Provides status output and the operator prompt behind the failure gate.

use roadie::gate::{parse_answer, Answer, Confirm};
use std::io::{self, BufRead, IsTerminal, Write};

/// Read one line from stdin. `None` at end of input.
pub fn prompt(message: &str) -> roadie::Result<Option<String>> {
    eprint!("{}", message);
    io::stderr().flush().ok();

    let stdin = io::stdin();
    let mut line = String::new();
    let read = stdin.lock().read_line(&mut line).map_err(|e| {
        roadie::Error::internal_io(e.to_string(), Some("read operator answer".to_string()))
    })?;

    if read == 0 {
        eprintln!();
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Print status message to stderr if running in a terminal.
pub fn status(message: &str) {
    if io::stderr().is_terminal() {
        eprintln!("{}", message);
    }
}

/// Asks on stderr and reads the answer from stdin until it is a yes or a no.
pub struct TtyConfirm;

impl Confirm for TtyConfirm {
    fn confirm(&mut self, message: &str) -> roadie::Result<bool> {
        loop {
            let line = prompt(&format!("{} [Y/n] ", message))?;
            match parse_answer(line.as_deref()) {
                Answer::Yes => return Ok(true),
                Answer::No => return Ok(false),
                Answer::Unclear => eprintln!("Please answer yes or no."),
            }
        }
    }
}
