use roadie::config;
use roadie::ssh::SshClient;
use roadie::tasks::{self, RunReport, Runner};

use super::{CmdResult, GlobalArgs};
use crate::tty::TtyConfirm;

/// Parse the chain, load configuration, and run every task against real hosts.
///
/// Task tokens are checked before the config is read so a typo fails fast.
pub fn run(tokens: &[String], global: &GlobalArgs) -> CmdResult<RunReport> {
    let chain = tasks::parse_chain(global.env.as_deref(), tokens)?;
    let config = config::load(global.config.as_deref())?;

    let shell = SshClient::new();
    let mut confirm = TtyConfirm;
    let mut runner = Runner::new(&config, &shell, &mut confirm, global.run_options());
    let report = runner.run_chain(&chain)?;
    Ok((report, 0))
}
