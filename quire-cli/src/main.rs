mod cmd;
mod config;
mod logger;

use anyhow::{Result, bail};
use clap::Command;

fn cli() -> Command {
    Command::new("quire")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(cmd::dev::make_subcommand())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("dev", args)) => cmd::dev::execute(args).await,
        Some((name, _)) => bail!("Unknown command: {name}"),
        None => bail!("No command given"),
    }
}
