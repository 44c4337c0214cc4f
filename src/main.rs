use clap::Parser;

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "roadie")]
#[command(version = VERSION)]
#[command(about = "Provision hosts and deploy a web application, one task at a time")]
#[command(after_help = "Example: roadie --env production deploy\n         roadie set-host:staging migrate:orders restart")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// List available tasks
    #[arg(long)]
    list: bool,

    /// Tasks to run left to right, as name or name:arg
    #[arg(value_name = "TASK")]
    tasks: Vec<String>,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if cli.list {
        let (content, exit_code) = commands::run_markdown();
        print!("{}", content);
        return std::process::ExitCode::from(exit_code_to_u8(exit_code));
    }

    let (json_result, exit_code) = commands::run_json(&cli.tasks, &cli.global);
    if let Err(err) = output::print_result(json_result) {
        eprintln!("{}", err.message);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
