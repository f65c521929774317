use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use url::Url;

use crate::{
    error::{PlayerError, PlayerResult},
    relay::RelayEndpoints,
    util::http::HttpClient,
};

mod device;

pub use device::DeviceControl;

pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PtzCommand {
    Up,
    UpRight,
    Right,
    DownRight,
    Down,
    DownLeft,
    Left,
    UpLeft,
    /// Recalibrate to the home position.
    Home,
    CruiseStart,
    CruiseStop,
}

impl PtzCommand {
    pub const DIRECTIONS: [PtzCommand; 8] = [
        Self::Up,
        Self::UpRight,
        Self::Right,
        Self::DownRight,
        Self::Down,
        Self::DownLeft,
        Self::Left,
        Self::UpLeft,
    ];

    /// Compass bearing of a directional step, clockwise from up.
    pub fn degrees(&self) -> Option<u16> {
        let degrees = match self {
            Self::Up => 0,
            Self::UpRight => 45,
            Self::Right => 90,
            Self::DownRight => 135,
            Self::Down => 180,
            Self::DownLeft => 225,
            Self::Left => 270,
            Self::UpLeft => 315,
            Self::Home | Self::CruiseStart | Self::CruiseStop => return None,
        };
        Some(degrees)
    }

    /// Directional steps repeat while held; the rest fire once.
    pub fn is_repeatable(&self) -> bool {
        self.degrees().is_some()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::UpRight => "up-right",
            Self::Right => "right",
            Self::DownRight => "down-right",
            Self::Down => "down",
            Self::DownLeft => "down-left",
            Self::Left => "left",
            Self::UpLeft => "up-left",
            Self::Home => "home",
            Self::CruiseStart => "cruise-start",
            Self::CruiseStop => "cruise-stop",
        }
    }
}

impl fmt::Display for PtzCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PtzCommand {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s.to_lowercase().replace('_', "-").as_str() {
            "up" => Self::Up,
            "up-right" => Self::UpRight,
            "right" => Self::Right,
            "down-right" => Self::DownRight,
            "down" => Self::Down,
            "down-left" => Self::DownLeft,
            "left" => Self::Left,
            "up-left" => Self::UpLeft,
            "home" | "calibrate" => Self::Home,
            "cruise-start" => Self::CruiseStart,
            "cruise-stop" => Self::CruiseStop,
            _ => return Err(PlayerError::Control(format!("unknown PTZ command: {s}"))),
        };
        Ok(command)
    }
}

/// Application supplied command sink. Takes precedence over every other
/// route while set.
#[async_trait]
pub trait PtzHandler: Send + Sync {
    async fn handle(&self, command: PtzCommand) -> PlayerResult<()>;
}

#[derive(Debug, Clone)]
pub struct PtzSettings {
    pub repeat_interval: Duration,
    pub device: Option<DeviceControl>,
}

impl Default for PtzSettings {
    fn default() -> Self {
        Self {
            repeat_interval: DEFAULT_REPEAT_INTERVAL,
            device: None,
        }
    }
}

enum Route {
    Custom(Arc<dyn PtzHandler>),
    Device(DeviceControl),
    Relay(Url),
}

struct Inner {
    client: HttpClient,
    endpoints: RelayEndpoints,
    src: RwLock<String>,
    handler: RwLock<Option<Arc<dyn PtzHandler>>>,
    device: RwLock<Option<DeviceControl>>,
    repeat_interval: RwLock<Duration>,
}

/// Sends camera movement commands, repeating them while a control is held.
///
/// The route is picked again for every single command from the current
/// settings, so changes apply from the next command on.
#[derive(Clone)]
pub struct PtzDispatcher {
    inner: Arc<Inner>,
}

impl PtzDispatcher {
    pub fn new(client: HttpClient, endpoints: RelayEndpoints, src: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                endpoints,
                src: RwLock::new(src.into()),
                handler: RwLock::new(None),
                device: RwLock::new(None),
                repeat_interval: RwLock::new(DEFAULT_REPEAT_INTERVAL),
            }),
        }
    }

    pub fn with_settings(self, settings: PtzSettings) -> Self {
        self.set_repeat_interval(settings.repeat_interval);
        self.set_device(settings.device);
        self
    }

    pub fn set_src(&self, src: impl Into<String>) {
        *self.inner.src.write() = src.into();
    }

    pub fn set_handler(&self, handler: Option<Arc<dyn PtzHandler>>) {
        *self.inner.handler.write() = handler;
    }

    pub fn set_device(&self, device: Option<DeviceControl>) {
        *self.inner.device.write() = device;
    }

    pub fn set_repeat_interval(&self, interval: Duration) {
        *self.inner.repeat_interval.write() = interval;
    }

    fn route(&self, command: PtzCommand) -> PlayerResult<Route> {
        if let Some(handler) = self.inner.handler.read().clone() {
            return Ok(Route::Custom(handler));
        }
        if let Some(device) = self
            .inner
            .device
            .read()
            .as_ref()
            .filter(|d| d.is_configured())
        {
            return Ok(Route::Device(device.clone()));
        }
        let src = self.inner.src.read().clone();
        Ok(Route::Relay(
            self.inner.endpoints.ptz(&src, command.as_str())?,
        ))
    }

    /// Sends `command` once through the current route.
    pub async fn dispatch(&self, command: PtzCommand) -> PlayerResult<()> {
        match self.route(command)? {
            Route::Custom(handler) => handler.handle(command).await,
            Route::Device(device) => device.send(&self.inner.client, command).await,
            Route::Relay(url) => {
                log::debug!("PTZ {command} via {url}");
                let response = self.inner.client.post(url).send().await?;
                if !response.status().is_success() {
                    return Err(PlayerError::Control(format!(
                        "relay rejected {command}: {}",
                        response.status()
                    )));
                }
                Ok(())
            }
        }
    }

    /// Dispatches on a background task. Failures are only logged.
    pub fn fire(&self, command: PtzCommand) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(command).await {
                log::warn!("PTZ command {command} failed: {e}");
            }
        });
    }

    /// Sends `command` now and, for directional steps, again every repeat
    /// interval until the returned handle is released or dropped.
    pub fn press(&self, command: PtzCommand) -> HoldHandle {
        self.fire(command);
        if !command.is_repeatable() {
            return HoldHandle { timer: None };
        }

        let period = *self.inner.repeat_interval.read();
        let dispatcher = self.clone();
        let timer = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                dispatcher.fire(command);
            }
        });
        HoldHandle { timer: Some(timer) }
    }
}

/// A held control. Releasing stops the repetition; commands already sent
/// are left to finish.
#[must_use = "dropping the handle releases the control immediately"]
pub struct HoldHandle {
    timer: Option<JoinHandle<()>>,
}

impl HoldHandle {
    pub fn release(mut self) {
        self.cancel();
    }

    pub fn is_held(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for HoldHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
