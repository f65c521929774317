use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use relayview::{DeviceControl, PlayerOptions, PtzSettings};
use serde::Deserialize;
use url::Url;

const DEFAULT_CONFIG_FILE: &str = "relayview.toml";

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: Option<Url>,
    pub output_dir: Option<PathBuf>,
    pub webrtc: WebRtcConfig,
    pub hls: HlsConfig,
    pub ptz: PtzConfig,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    pub ice_servers: Vec<String>,
    /// Milliseconds to wait for ICE gathering before sending the offer
    pub gathering_timeout: u64,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            gathering_timeout: 5000,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    pub retry: u32,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self { retry: 3 }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct PtzConfig {
    /// Milliseconds between repeated commands while a direction is held
    pub repeat_interval: u64,
    pub device: Option<DeviceControl>,
}

impl Default for PtzConfig {
    fn default() -> Self {
        Self {
            repeat_interval: 150,
            device: None,
        }
    }
}

impl Config {
    /// Reads `path`, or `relayview.toml` in the working directory when it
    /// exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => path.to_path_buf(),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => PathBuf::from(DEFAULT_CONFIG_FILE),
            None => return Ok(Self::default()),
        };

        log::debug!("Loading config from {}", file.display());
        let data = std::fs::read_to_string(file)?;
        let config = toml::from_str(&data)?;
        Ok(config)
    }

    pub fn player_options(&self, server: Url) -> PlayerOptions {
        PlayerOptions::new(server)
            .with_ice_servers(self.webrtc.ice_servers.clone())
            .with_ice_gathering_timeout(Duration::from_millis(self.webrtc.gathering_timeout))
            .with_playlist_retry(self.hls.retry)
    }

    pub fn ptz_settings(&self) -> PtzSettings {
        PtzSettings {
            repeat_interval: Duration::from_millis(self.ptz.repeat_interval),
            device: self.ptz.device.clone(),
        }
    }
}
