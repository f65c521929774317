use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Args;
use relayview::{
    HttpClient, PlaybackMode, Player, PlayerEvent, PtzCommand, PtzDispatcher, RecordingSurface,
    RelayEndpoints,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use url::Url;

use crate::config::Config;

const HELP: &str = "commands: mode <webrtc|mse|hls|mjpeg>, retry, stop, src <name>, \
ptz <command> [ms], state, quit";

#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Stream name on the relay
    pub src: String,

    /// Transport to start with
    #[clap(short, long, default_value = "webrtc")]
    pub mode: PlaybackMode,

    /// Directory received media is written to
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Wait for `retry` instead of connecting right away
    #[clap(long)]
    pub no_autoplay: bool,
}

impl PlayArgs {
    pub async fn run(self, config: Config, server: Url) -> anyhow::Result<()> {
        let output = self
            .output
            .or_else(|| config.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        let surface = Arc::new(RecordingSurface::new(output));

        let options = config
            .player_options(server.clone())
            .with_mode(self.mode)
            .with_autoplay(!self.no_autoplay);
        let mut player = Player::new(options, self.src.as_str(), surface.clone())?;
        let dispatcher = PtzDispatcher::new(
            HttpClient::default(),
            RelayEndpoints::new(server)?,
            self.src.as_str(),
        )
        .with_settings(config.ptz_settings());

        let mut events = player.subscribe();
        if player.autoplay() {
            player.start();
        }
        log::info!("{HELP}");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(PlayerEvent::Playing) => {
                        log::info!("Playing {} over {}", player.src(), player.mode())
                    }
                    Ok(PlayerEvent::Error(message)) => {
                        log::error!("{message}, type `retry` to reconnect")
                    }
                    Ok(PlayerEvent::ModeChange(mode)) => log::info!("Switched to {mode}"),
                    Err(RecvError::Lagged(skipped)) => log::warn!("Missed {skipped} player events"),
                    Err(RecvError::Closed) => break,
                },
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if !handle_line(&mut player, &dispatcher, line.trim()) {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        player.stop();
        log::info!(
            "Wrote {} frames to {}",
            surface.frames(),
            surface.output_dir().display()
        );
        Ok(())
    }
}

/// Returns `false` when the user asks to quit.
fn handle_line(player: &mut Player, dispatcher: &PtzDispatcher, line: &str) -> bool {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => {}
        (Some("quit" | "exit"), _) => return false,
        (Some("retry" | "start"), _) => player.start(),
        (Some("stop"), _) => player.stop(),
        (Some("state"), _) => log::info!("{:?}", player.state()),
        (Some("mode"), Some(mode)) => match mode.parse::<PlaybackMode>() {
            Ok(mode) => player.switch_mode(mode),
            Err(e) => log::warn!("{e}"),
        },
        (Some("src"), Some(src)) => {
            dispatcher.set_src(src);
            player.set_src(src);
        }
        (Some("ptz"), Some(command)) => match command.parse::<PtzCommand>() {
            Ok(command) => {
                let millis = words.next().and_then(|ms| ms.parse().ok()).unwrap_or(500);
                let hold = dispatcher.press(command);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    hold.release();
                });
            }
            Err(e) => log::warn!("{e}"),
        },
        _ => log::warn!("Unknown command `{line}`, {HELP}"),
    }
    true
}
