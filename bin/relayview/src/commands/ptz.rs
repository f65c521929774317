use std::time::Duration;

use clap::Args;
use relayview::{HttpClient, PtzCommand, PtzDispatcher, RelayEndpoints};
use url::Url;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct PtzArgs {
    /// Stream the camera belongs to
    pub src: String,

    /// up, down, left, right, up-left, up-right, down-left, down-right,
    /// home, cruise-start or cruise-stop
    pub command: PtzCommand,

    /// How long a direction is held, in milliseconds
    #[clap(long, default_value = "500")]
    pub hold: u64,
}

impl PtzArgs {
    pub async fn run(self, config: Config, server: Url) -> anyhow::Result<()> {
        let dispatcher = PtzDispatcher::new(
            HttpClient::default(),
            RelayEndpoints::new(server)?,
            self.src,
        )
        .with_settings(config.ptz_settings());

        if !self.command.is_repeatable() {
            dispatcher.dispatch(self.command).await?;
            log::info!("Sent {}", self.command);
            return Ok(());
        }

        log::info!("Holding {} for {}ms", self.command, self.hold);
        let hold = dispatcher.press(self.command);
        tokio::time::sleep(Duration::from_millis(self.hold)).await;
        hold.release();

        // let the last request settle before the runtime goes away
        tokio::time::sleep(config.ptz_settings().repeat_interval).await;
        Ok(())
    }
}
