mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use url::Url;

use commands::{play::PlayArgs, ptz::PtzArgs};
use config::Config;

#[derive(Parser, Debug)]
#[clap(name = "relayview", version, about)]
struct RelayViewArgs {
    /// Path to the configuration file
    #[clap(short, long, global = true, env = "RELAYVIEW_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the media relay, overrides the configuration file
    #[clap(short, long, global = true, env = "RELAYVIEW_SERVER")]
    server: Option<Url>,

    /// Debug output
    #[clap(long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a stream and control it from stdin
    Play(PlayArgs),
    /// Send a single pan-tilt-zoom command
    Ptz(PtzArgs),
    /// List streams published by the relay
    Streams,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = RelayViewArgs::parse();

    let default_level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref())?;
    let Some(server) = args.server.clone().or_else(|| config.server.clone()) else {
        anyhow::bail!("no relay server given, pass --server or set `server` in the config");
    };

    match args.command {
        Command::Play(play) => play.run(config, server).await,
        Command::Ptz(ptz) => ptz.run(config, server).await,
        Command::Streams => commands::streams::run(server).await,
    }
}
