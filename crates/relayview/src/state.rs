use std::{fmt, str::FromStr};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::PlayerError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Transport used to deliver the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Low latency peer-to-peer media.
    #[default]
    WebRtc,
    /// Binary chunks over a WebSocket, appended to a media buffer.
    Mse,
    /// Segmented HTTP playlist.
    Hls,
    /// A single never-ending multipart image response.
    Mjpeg,
}

impl PlaybackMode {
    pub const ALL: [PlaybackMode; 4] = [Self::WebRtc, Self::Mse, Self::Hls, Self::Mjpeg];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebRtc => "webrtc",
            Self::Mse => "mse",
            Self::Hls => "hls",
            Self::Mjpeg => "mjpeg",
        }
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackMode {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "webrtc" | "peer2peer" => Ok(Self::WebRtc),
            "mse" | "buffered" => Ok(Self::Mse),
            "hls" | "playlist" => Ok(Self::Hls),
            "mjpeg" | "polling" => Ok(Self::Mjpeg),
            _ => Err(PlayerError::InvalidMode(s.to_string())),
        }
    }
}

/// Observable player state.
///
/// `loading` and `playing` are never both set, and an `error` always comes
/// with `loading == false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerState {
    pub mode: PlaybackMode,
    pub loading: bool,
    pub playing: bool,
    pub error: Option<String>,
    pub connection_state: String,
}

impl PlayerState {
    pub(crate) const IDLE: &'static str = "idle";
    pub(crate) const CONNECTING: &'static str = "connecting";
    pub(crate) const CONNECTED: &'static str = "connected";
    pub(crate) const CLOSED: &'static str = "closed";

    fn new(mode: PlaybackMode) -> Self {
        Self {
            mode,
            loading: false,
            playing: false,
            error: None,
            connection_state: Self::IDLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Playing,
    Error(String),
    ModeChange(PlaybackMode),
}

struct Inner {
    state: PlayerState,
    generation: u64,
}

/// State shared between the player and the callbacks of its live session.
///
/// Every mutation coming from a session is checked against the generation it
/// was started with, under the same lock `stop()` uses to bump it.
pub(crate) struct PlayerShared {
    inner: Mutex<Inner>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerShared {
    pub(crate) fn new(mode: PlaybackMode) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                state: PlayerState::new(mode),
                generation: 0,
            }),
            events,
        }
    }

    pub(crate) fn snapshot(&self) -> PlayerState {
        self.inner.lock().state.clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: PlayerEvent) {
        // no subscribers is fine
        _ = self.events.send(event);
    }

    /// Invalidates every outstanding session callback and resets the
    /// transient flags. `error` is kept.
    pub(crate) fn invalidate(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.state.loading = false;
        inner.state.playing = false;
        inner.state.connection_state = PlayerState::IDLE.to_string();
        inner.generation
    }

    /// Marks a new session as loading and returns its generation.
    pub(crate) fn begin(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.state.loading = true;
        inner.state.playing = false;
        inner.state.error = None;
        inner.state.connection_state = PlayerState::CONNECTING.to_string();
        inner.generation
    }

    pub(crate) fn set_mode(&self, mode: PlaybackMode) {
        self.inner.lock().state.mode = mode;
    }

    /// Runs `f` only when `generation` is still the live one.
    pub(crate) fn with_current<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut PlayerState) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return None;
        }
        Some(f(&mut inner.state))
    }
}
