use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use quire_core::config::config_path;
use quire_dev_server::{DevOptions, DevServer};
use std::path::PathBuf;

use crate::config::QuireConfig;
use crate::logger::init_logger;

pub fn make_subcommand() -> Command {
    Command::new("dev")
        .about("Start development server with hot reload")
        .arg(
            Arg::new("source")
                .value_name("DIR")
                .help("Source directory of the site (defaults to the current directory)"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Port to serve on, the next free one above it is used if taken"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Host to bind to"),
        )
        .arg(
            Arg::new("open")
                .long("open")
                .help("Open browser automatically")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    let config = QuireConfig::load(args)?;
    init_logger(config.dev.debug);

    let source_dir = PathBuf::from(&config.dev.source);
    match config_path(&source_dir) {
        Some(path) => tracing::debug!(config = %path.display(), "Using site config"),
        None => tracing::debug!("No site config found, using defaults"),
    }

    let options = DevOptions {
        host: config.dev.host(),
        port: config.dev.port(),
        open: config.dev.open,
        configure_bundle: None,
    };

    if let Err(e) = DevServer::new(source_dir, options).run().await {
        tracing::error!("{e}");
        return Err(e.into());
    }

    Ok(())
}
