use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::{runtime::Handle, task::JoinHandle};
use url::Url;
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        setting_engine::SettingEngine, APIBuilder,
    },
    ice_transport::ice_server::RTCIceServer,
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::RTPCodecType, rtp_transceiver_direction::RTCRtpTransceiverDirection,
        RTCRtpTransceiverInit,
    },
};

use super::{spawn_session, PhaseCell, SessionContext, SessionPhase, TransportSession};
use crate::{
    error::{PlayerError, PlayerResult},
    relay::RelayEndpoints,
    state::PlaybackMode,
    surface::Surface,
    util::http::HttpClient,
};

type PeerSlot = Arc<Mutex<Option<Arc<RTCPeerConnection>>>>;

/// Answer body returned by the relay. `type` is optional there.
#[derive(Deserialize)]
struct Answer {
    sdp: String,
}

/// Receive-only peer connection negotiated with a single offer/answer
/// exchange over HTTP.
pub struct WebRtcSession<S: Surface> {
    surface: Arc<S>,
    client: HttpClient,
    endpoints: RelayEndpoints,
    src: String,
    ice_servers: Vec<String>,
    gathering_timeout: Duration,

    phase: PhaseCell,
    peer: PeerSlot,
    task: Option<JoinHandle<()>>,
}

impl<S: Surface> WebRtcSession<S> {
    pub fn new(
        surface: Arc<S>,
        client: HttpClient,
        endpoints: RelayEndpoints,
        src: impl Into<String>,
    ) -> Self {
        Self {
            surface,
            client,
            endpoints,
            src: src.into(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            gathering_timeout: Duration::from_secs(5),
            phase: PhaseCell::new(),
            peer: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    pub fn with_ice_servers(mut self, ice_servers: Vec<String>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    pub fn with_gathering_timeout(mut self, timeout: Duration) -> Self {
        self.gathering_timeout = timeout;
        self
    }
}

async fn new_peer_connection(ice_servers: Vec<String>) -> PlayerResult<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let mut settings = SettingEngine::default();
    settings.set_ice_timeouts(
        Some(Duration::from_secs(5)),
        Some(Duration::from_secs(30)),
        Some(Duration::from_millis(2000)),
    );

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(settings)
        .build();

    let ice_servers = if ice_servers.is_empty() {
        vec![]
    } else {
        vec![RTCIceServer {
            urls: ice_servers,
            ..Default::default()
        }]
    };
    let config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    Ok(api.new_peer_connection(config).await?)
}

struct Negotiation<S: Surface> {
    surface: Arc<S>,
    client: HttpClient,
    url: Url,
    ice_servers: Vec<String>,
    gathering_timeout: Duration,
    phase: PhaseCell,
    peer: PeerSlot,
    ctx: SessionContext,
}

impl<S: Surface> Negotiation<S> {
    async fn run(self) -> PlayerResult<()> {
        let peer_connection = Arc::new(new_peer_connection(self.ice_servers).await?);
        if let Some(peer_connection) =
            store_unless_closed(&self.peer, &self.phase, peer_connection.clone())
        {
            log::debug!("Session stopped while creating the peer connection");
            close_in_background(peer_connection);
            return Ok(());
        }

        // one video and one audio track, both receive only
        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            peer_connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await?;
        }

        let surface = self.surface.clone();
        let phase = self.phase.clone();
        let ctx = self.ctx.clone();
        peer_connection.on_track(Box::new(move |track, _, _| {
            if phase.get() != SessionPhase::Closed {
                log::debug!("Got {} track", track.codec().capability.mime_type);
                surface.attach_track(track);
                phase.advance(SessionPhase::Active);
                ctx.report_playing();
            }
            Box::pin(async {})
        }));

        let ctx = self.ctx.clone();
        let was_connected = AtomicBool::new(false);
        peer_connection.on_peer_connection_state_change(Box::new(
            move |connection_state: RTCPeerConnectionState| {
                handle_connection_state(connection_state, &was_connected, &ctx);
                Box::pin(async {})
            },
        ));

        let offer = peer_connection.create_offer(None).await?;

        // Without trickle ICE the offer has to carry the candidates, so wait
        // for gathering. Slow STUN servers must not hang the session forever.
        let mut gather_complete = peer_connection.gathering_complete_promise().await;
        peer_connection.set_local_description(offer).await?;
        if tokio::time::timeout(self.gathering_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            log::warn!(
                "ICE gathering did not complete in {:?}, sending the candidates gathered so far",
                self.gathering_timeout
            );
        }

        let local_description = peer_connection
            .local_description()
            .await
            .ok_or_else(|| PlayerError::Negotiation("no local description".to_string()))?;

        log::info!("Sending offer to {}", self.url);
        let response = self
            .client
            .post(self.url)
            .json(&local_description)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PlayerError::HttpError(response.status()));
        }

        let answer: Answer = response.json().await?;
        let answer = RTCSessionDescription::answer(answer.sdp)?;
        peer_connection.set_remote_description(answer).await?;
        log::debug!("Remote description applied");

        Ok(())
    }
}

/// Stores `value` in `slot` unless the session is already closed, in which
/// case the value is handed back to the caller. The phase is checked under the
/// slot lock so a concurrent `stop()` either sees the value or the caller sees
/// `Closed`.
fn store_unless_closed<T>(slot: &Mutex<Option<T>>, phase: &PhaseCell, value: T) -> Option<T> {
    let mut slot = slot.lock();
    if phase.get() == SessionPhase::Closed {
        return Some(value);
    }
    *slot = Some(value);
    None
}

fn close_in_background(peer_connection: Arc<RTCPeerConnection>) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                _ = peer_connection
                    .close()
                    .await
                    .inspect_err(|e| log::warn!("failed to close peer connection: {e}"));
            });
        }
        Err(_) => log::warn!("no runtime to close the peer connection on"),
    }
}

/// `Failed` is always an error. `Disconnected` only counts once the
/// connection has been up.
fn handle_connection_state(
    connection_state: RTCPeerConnectionState,
    was_connected: &AtomicBool,
    ctx: &SessionContext,
) {
    log::debug!("Connection State has changed {connection_state}");
    ctx.set_connection_state(connection_state.to_string());

    match connection_state {
        RTCPeerConnectionState::Connected => {
            was_connected.store(true, Ordering::SeqCst);
        }
        RTCPeerConnectionState::Failed => {
            ctx.report_error(PlayerError::Disconnected("failed".into()).to_string());
        }
        RTCPeerConnectionState::Disconnected if was_connected.load(Ordering::SeqCst) => {
            ctx.report_error(PlayerError::Disconnected("disconnected".into()).to_string());
        }
        _ => {}
    }
}

impl<S: Surface> TransportSession for WebRtcSession<S> {
    fn mode(&self) -> PlaybackMode {
        PlaybackMode::WebRtc
    }

    fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    fn start(&mut self, ctx: SessionContext) {
        if !self.phase.advance(SessionPhase::Connecting) {
            return;
        }

        let url = match self.endpoints.webrtc(&self.src) {
            Ok(url) => url,
            Err(e) => return ctx.report_error(e.to_string()),
        };

        let negotiation = Negotiation {
            surface: self.surface.clone(),
            client: self.client.clone(),
            url,
            ice_servers: self.ice_servers.clone(),
            gathering_timeout: self.gathering_timeout,
            phase: self.phase.clone(),
            peer: self.peer.clone(),
            ctx: ctx.clone(),
        };
        self.task = Some(spawn_session(ctx, negotiation.run()));
    }

    fn stop(&mut self) {
        if !self.phase.advance(SessionPhase::Closed) {
            return;
        }

        if let Some(task) = self.task.take() {
            task.abort();
        }

        if let Some(peer_connection) = self.peer.lock().take() {
            close_in_background(peer_connection);
        }

        self.surface.clear_source();
    }
}

impl<S: Surface> Drop for WebRtcSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
