use std::fmt;

use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::PtzCommand;
use crate::{
    error::{PlayerError, PlayerResult},
    util::http::HttpClient,
};

pub const USERNAME_HEADER: &str = "X-Camera-Username";
pub const PASSWORD_HEADER: &str = "X-Camera-Password";

/// Direct access to a camera's control API, bypassing the relay.
#[derive(Clone, Deserialize)]
pub struct DeviceControl {
    pub base_url: Url,
    pub camera_ip: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for DeviceControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceControl")
            .field("base_url", &self.base_url.as_str())
            .field("camera_ip", &self.camera_ip)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl DeviceControl {
    pub fn new(
        base_url: Url,
        camera_ip: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url,
            camera_ip: camera_ip.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Address and credentials are all present.
    pub fn is_configured(&self) -> bool {
        !self.camera_ip.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }

    pub fn command_url(&self, command: PtzCommand) -> PlayerResult<Url> {
        let action = match command {
            PtzCommand::Home => "calibrate",
            PtzCommand::CruiseStart => "cruise/start",
            PtzCommand::CruiseStop => "cruise/stop",
            _ => "step",
        };

        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(&format!("api/cameras/{}/ptz/{action}", self.camera_ip))?)
    }

    pub async fn send(&self, client: &HttpClient, command: PtzCommand) -> PlayerResult<()> {
        let url = self.command_url(command)?;
        let mut request = client
            .post(url)
            .header(USERNAME_HEADER, &self.username)
            .header(PASSWORD_HEADER, &self.password);
        if let Some(direction) = command.degrees() {
            request = request.json(&json!({ "direction": direction }));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PlayerError::Control(format!(
                "camera {} rejected {command}: {}",
                self.camera_ip,
                response.status()
            )));
        }
        Ok(())
    }
}
