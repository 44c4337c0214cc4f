use clap::Args;
use roadie::pipeline::FailurePolicy;
use roadie::tasks::RunOptions;

pub type CmdResult<T> = roadie::Result<(T, i32)>;

/// Flags that apply to the whole task chain.
#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Config file (default: $ROADIE_CONFIG, then ~/.config/roadie/roadie.json)
    #[arg(long, value_name = "FILE")]
    pub config: Option<String>,

    /// Select an environment before the first task (same as a leading set-host:<name>)
    #[arg(long, value_name = "NAME")]
    pub env: Option<String>,

    /// Run remote tasks on every host of the environment, one after another
    #[arg(long)]
    pub all_hosts: bool,

    /// Ask whether to continue when a step fails instead of stopping
    #[arg(long)]
    pub confirm_failures: bool,
}

impl GlobalArgs {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            all_hosts: self.all_hosts,
            policy: if self.confirm_failures {
                FailurePolicy::Confirm
            } else {
                FailurePolicy::Abort
            },
        }
    }
}

pub mod list;
pub mod run;

pub(crate) fn run_markdown() -> (String, i32) {
    (list::render(), 0)
}

pub(crate) fn run_json(
    tasks: &[String],
    global: &GlobalArgs,
) -> (roadie::Result<serde_json::Value>, i32) {
    crate::tty::status("roadie is working...");
    crate::output::map_cmd_result_to_json(run::run(tasks, global))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_failures_selects_confirm_policy() {
        let global = GlobalArgs {
            confirm_failures: true,
            ..Default::default()
        };
        assert_eq!(global.run_options().policy, FailurePolicy::Confirm);
        assert_eq!(
            GlobalArgs::default().run_options().policy,
            FailurePolicy::Abort
        );
    }
}
