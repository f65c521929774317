use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast;
use url::Url;

use crate::{
    error::PlayerResult,
    relay::RelayEndpoints,
    session::{
        hls::HlsSession, mjpeg::MjpegSession, mse::MseSession, webrtc::WebRtcSession,
        SessionContext, TransportSession,
    },
    state::{PlaybackMode, PlayerEvent, PlayerShared, PlayerState},
    surface::Surface,
    util::http::HttpClient,
};

#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Base URL of the relay server.
    pub server: Url,
    pub mode: PlaybackMode,
    pub autoplay: bool,

    /// STUN/TURN servers for the peer connection.
    pub ice_servers: Vec<String>,
    /// Upper bound on ICE candidate gathering before the offer is sent.
    pub ice_gathering_timeout: Duration,
    /// Attempts per playlist fetch.
    pub playlist_retry: u32,
}

impl PlayerOptions {
    pub fn new(server: Url) -> Self {
        Self {
            server,
            mode: PlaybackMode::default(),
            autoplay: true,
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            ice_gathering_timeout: Duration::from_secs(5),
            playlist_retry: 3,
        }
    }

    pub fn with_mode(mut self, mode: PlaybackMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }

    pub fn with_ice_servers(mut self, ice_servers: Vec<String>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    pub fn with_ice_gathering_timeout(mut self, timeout: Duration) -> Self {
        self.ice_gathering_timeout = timeout;
        self
    }

    pub fn with_playlist_retry(mut self, retry: u32) -> Self {
        self.playlist_retry = retry;
        self
    }
}

/// Builds the session for a playback mode.
pub trait SessionFactory: Send {
    fn create(&self, mode: PlaybackMode, src: &str) -> Box<dyn TransportSession>;
}

/// Creates sessions talking to a relay server and rendering into `S`.
pub struct RelaySessionFactory<S: Surface> {
    surface: Arc<S>,
    client: HttpClient,
    endpoints: RelayEndpoints,
    options: PlayerOptions,
}

impl<S: Surface> RelaySessionFactory<S> {
    pub fn new(surface: Arc<S>, client: HttpClient, options: PlayerOptions) -> PlayerResult<Self> {
        let endpoints = RelayEndpoints::new(options.server.clone())?;
        Ok(Self {
            surface,
            client,
            endpoints,
            options,
        })
    }
}

impl<S: Surface> SessionFactory for RelaySessionFactory<S> {
    fn create(&self, mode: PlaybackMode, src: &str) -> Box<dyn TransportSession> {
        let surface = self.surface.clone();
        let client = self.client.clone();
        let endpoints = self.endpoints.clone();

        match mode {
            PlaybackMode::WebRtc => Box::new(
                WebRtcSession::new(surface, client, endpoints, src)
                    .with_ice_servers(self.options.ice_servers.clone())
                    .with_gathering_timeout(self.options.ice_gathering_timeout),
            ),
            PlaybackMode::Mse => Box::new(MseSession::new(surface, endpoints, src)),
            PlaybackMode::Hls => Box::new(
                HlsSession::new(surface, client, endpoints, src)
                    .with_retry(self.options.playlist_retry),
            ),
            PlaybackMode::Mjpeg => Box::new(MjpegSession::new(surface, client, endpoints, src)),
        }
    }
}

/// Plays one stream through one transport at a time.
///
/// ```text
///            start()                      session reports playing
///   Idle ───────────► Starting(mode) ─────────────────────────► Playing(mode)
///    ▲                      │ session reports error                 │
///    │                      ▼                                       │
///    │               Failed(mode, error)                            │
///    │                      │                                       │
///    └──────────────────────┴──────────── stop() ───────────────────┘
/// ```
///
/// `switch_mode` is `stop`, change mode, emit [`PlayerEvent::ModeChange`],
/// `start`. Nothing is retried automatically.
pub struct Player {
    shared: Arc<PlayerShared>,
    factory: Box<dyn SessionFactory>,
    src: String,
    autoplay: bool,
    session: Option<Box<dyn TransportSession>>,
}

impl Player {
    pub fn new<S: Surface>(
        options: PlayerOptions,
        src: impl Into<String>,
        surface: Arc<S>,
    ) -> PlayerResult<Self> {
        let mode = options.mode;
        let autoplay = options.autoplay;
        let factory = RelaySessionFactory::new(surface, HttpClient::default(), options)?;
        Ok(Self::with_factory(factory, mode, src, autoplay))
    }

    pub fn with_factory(
        factory: impl SessionFactory + 'static,
        mode: PlaybackMode,
        src: impl Into<String>,
        autoplay: bool,
    ) -> Self {
        Self {
            shared: Arc::new(PlayerShared::new(mode)),
            factory: Box::new(factory),
            src: src.into(),
            autoplay,
            session: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.subscribe()
    }

    pub fn state(&self) -> PlayerState {
        self.shared.snapshot()
    }

    pub fn mode(&self) -> PlaybackMode {
        self.shared.snapshot().mode
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn play(&mut self) {
        self.start();
    }

    /// Tears down the current session, if any, and starts a new one for the
    /// current mode.
    pub fn start(&mut self) {
        self.stop();

        let mode = self.mode();
        let generation = self.shared.begin();
        log::info!("Starting {mode} session for {}", self.src);

        let mut session = self.factory.create(mode, &self.src);
        session.start(SessionContext::new(self.shared.clone(), generation));
        self.session = Some(session);
    }

    /// Idempotent. The error of the last session is kept.
    pub fn stop(&mut self) {
        self.shared.invalidate();
        if let Some(mut session) = self.session.take() {
            log::debug!("Stopping {} session", session.mode());
            session.stop();
        }
    }

    pub fn switch_mode(&mut self, mode: PlaybackMode) {
        self.stop();
        self.shared.set_mode(mode);
        self.shared.emit(PlayerEvent::ModeChange(mode));
        self.start();
    }

    /// Restarts with the new stream when autoplay is on. Otherwise only
    /// records it for the next `start`.
    pub fn set_src(&mut self, src: impl Into<String>) {
        self.src = src.into();
        if self.autoplay {
            self.start();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}
