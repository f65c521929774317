use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use m3u8_rs::{ByteRange, MediaPlaylist, Playlist};
use reqwest::header::RANGE;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use url::Url;

use super::{
    mse::BufferQueue, spawn_session, PhaseCell, SessionContext, SessionPhase, TransportSession,
};
use crate::{
    error::{PlayerError, PlayerResult},
    relay::RelayEndpoints,
    state::{PlaybackMode, PlayerState},
    surface::{BufferEvent, Surface},
    util::http::HttpClient,
};

/// Number of segments from the end of a live playlist to start from.
const LIVE_SYNC_SEGMENTS: usize = 3;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The media playlist was loaded. Always the first event.
    ManifestParsed { mime_type: String },
    /// Init section or media segment, in playback order.
    Segment(Bytes),
    /// The playlist carries `EXT-X-ENDLIST` and every segment was sent.
    Ended,
}

async fn fetch_playlist(client: &HttpClient, url: &Url, total_retry: u32) -> PlayerResult<Playlist> {
    let mut retry = total_retry;
    loop {
        if retry == 0 {
            return Err(PlayerError::M3u8FetchError);
        }

        match client.get(url.clone()).send().await {
            Ok(resp) if !resp.status().is_success() => {
                log::warn!("Failed to fetch M3U8 file: HTTP {}", resp.status());
                retry -= 1;
            }
            Ok(resp) => match resp.bytes().await {
                Ok(m3u8_bytes) => match m3u8_rs::parse_playlist_res(&m3u8_bytes) {
                    Ok(parsed) => return Ok(parsed),
                    Err(error) => {
                        log::warn!("Failed to parse M3U8 file: {error}");
                        retry -= 1;
                    }
                },
                Err(error) => {
                    log::warn!("Failed to fetch M3U8 file: {error}");
                    retry -= 1;
                }
            },
            Err(error) => {
                log::warn!("Failed to fetch M3U8 file: {error}");
                retry -= 1;
            }
        }
    }
}

/// Loads `url`, following a master playlist to its best variant. Returns the
/// media playlist URL, the playlist and the codecs the variant announced.
pub async fn load_playlist(
    client: &HttpClient,
    url: Url,
    total_retry: u32,
) -> PlayerResult<(Url, MediaPlaylist, Option<String>)> {
    log::info!("Start fetching M3U8 file.");
    match fetch_playlist(client, &url, total_retry).await? {
        Playlist::MediaPlaylist(pl) => Ok((url, pl, None)),
        Playlist::MasterPlaylist(pl) => {
            log::info!("Master playlist input detected. Auto selecting best quality streams.");
            let mut variants = pl.variants;
            variants.sort_by(|a, b| {
                // compare resolution first
                if let (Some(a), Some(b)) = (a.resolution, b.resolution) {
                    if a.width != b.width {
                        return b.width.cmp(&a.width);
                    }
                }

                // compare framerate then
                if let (Some(a), Some(b)) = (a.frame_rate, b.frame_rate) {
                    let a = a as u64;
                    let b = b as u64;
                    if a != b {
                        return b.cmp(&a);
                    }
                }

                // compare bandwidth finally
                b.bandwidth.cmp(&a.bandwidth)
            });
            let variant = variants
                .into_iter()
                .next()
                .ok_or_else(|| PlayerError::UnsupportedPlaylist("no variant found".to_string()))?;
            let variant_url = url.join(&variant.uri)?;
            log::info!(
                "Best stream: {variant_url}; Bandwidth: {bandwidth}",
                bandwidth = variant.bandwidth
            );

            match fetch_playlist(client, &variant_url, total_retry).await? {
                Playlist::MediaPlaylist(pl) => Ok((variant_url, pl, variant.codecs)),
                Playlist::MasterPlaylist(_) => Err(PlayerError::UnsupportedPlaylist(format!(
                    "nested master playlist at {variant_url}"
                ))),
            }
        }
    }
}

/// Container MIME type of the segments in `playlist`.
pub fn detect_mime_type(
    playlist_url: &Url,
    playlist: &MediaPlaylist,
    codecs: Option<&str>,
) -> PlayerResult<String> {
    let has_init = playlist.segments.iter().any(|s| s.map.is_some());
    let extension = playlist
        .segments
        .first()
        .and_then(|s| playlist_url.join(&s.uri).ok())
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut c| c.next_back())
                .and_then(|name| name.rsplit_once('.'))
                .map(|(_, ext)| ext.to_lowercase())
        });

    let container = match extension.as_deref() {
        _ if has_init => "video/mp4",
        Some("m4s" | "mp4" | "m4v" | "cmfv") => "video/mp4",
        Some("ts") => "video/mp2t",
        Some(ext) => {
            return Err(PlayerError::UnsupportedPlaylist(format!(
                "unknown segment format: .{ext}"
            )))
        }
        None => {
            return Err(PlayerError::UnsupportedPlaylist(
                "playlist has no segments".to_string(),
            ))
        }
    };

    Ok(match codecs {
        Some(codecs) => format!("{container}; codecs=\"{codecs}\""),
        None => container.to_string(),
    })
}

/// `Range` header for a sub-range, and the offset the next sub-range of the
/// same resource starts at when the playlist leaves it out.
fn range_header(range: &ByteRange, next_offset: u64) -> PlayerResult<(String, u64)> {
    let start = range.offset.unwrap_or(next_offset);
    let last = range
        .length
        .checked_sub(1)
        .ok_or_else(|| PlayerError::UnsupportedPlaylist("empty byte range".to_string()))?;
    Ok((format!("bytes={start}-{}", start + last), start + range.length))
}

/// Resolved URL and `Range` header of every segment in `playlist`.
fn segment_requests(
    playlist_url: &Url,
    playlist: &MediaPlaylist,
) -> PlayerResult<Vec<(Url, Option<String>)>> {
    let mut next_offsets: HashMap<Url, u64> = HashMap::new();
    playlist
        .segments
        .iter()
        .map(|segment| -> PlayerResult<(Url, Option<String>)> {
            let url = playlist_url.join(&segment.uri)?;
            let range = match &segment.byte_range {
                Some(range) => {
                    let next_offset = next_offsets.get(&url).copied().unwrap_or_default();
                    let (header, next_offset) = range_header(range, next_offset)?;
                    next_offsets.insert(url.clone(), next_offset);
                    Some(header)
                }
                None => None,
            };
            Ok((url, range))
        })
        .collect()
}

fn poll_interval(playlist: &MediaPlaylist) -> Duration {
    Duration::from_secs_f64(playlist.target_duration as f64 / 2.)
        .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

/// Low-latency playlist loader for hosts without native playlist playback.
///
/// Starts near the live edge, then keeps reloading the media playlist and
/// sends every segment it has not seen before. Runs on its own task and stops
/// as soon as the receiving side is dropped.
pub struct PlaylistEngine {
    client: HttpClient,
    url: Url,
    retry: u32,

    latest_media_sequence: Option<u64>,
    loaded_init: Option<(Url, Option<String>)>,
}

impl PlaylistEngine {
    pub fn new(client: HttpClient, url: Url) -> Self {
        Self {
            client,
            url,
            retry: 3,
            latest_media_sequence: None,
            loaded_init: None,
        }
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn spawn(
        self,
    ) -> (
        mpsc::UnboundedReceiver<PlayerResult<EngineEvent>>,
        JoinHandle<()>,
    ) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            if let Err(e) = self.run(&sender).await {
                log::error!("Playlist engine stopped: {e}");
                _ = sender.send(Err(e));
            }
        });
        (receiver, handle)
    }

    async fn run(
        mut self,
        sender: &mpsc::UnboundedSender<PlayerResult<EngineEvent>>,
    ) -> PlayerResult<()> {
        let (url, mut playlist, codecs) =
            load_playlist(&self.client, self.url.clone(), self.retry).await?;
        self.url = url;

        let mime_type = detect_mime_type(&self.url, &playlist, codecs.as_deref())?;
        if sender
            .send(Ok(EngineEvent::ManifestParsed { mime_type }))
            .is_err()
        {
            return Ok(());
        }

        loop {
            let before_load = Instant::now();

            for data in self.take_new_segments(&playlist).await? {
                if sender.send(Ok(EngineEvent::Segment(data))).is_err() {
                    return Ok(());
                }
            }

            if playlist.end_list {
                _ = sender.send(Ok(EngineEvent::Ended));
                return Ok(());
            }

            // playlist does not end, wait for a while and fetch again
            tokio::time::sleep_until(before_load + poll_interval(&playlist)).await;
            if sender.is_closed() {
                return Ok(());
            }

            playlist = match fetch_playlist(&self.client, &self.url, self.retry).await? {
                Playlist::MediaPlaylist(pl) => pl,
                Playlist::MasterPlaylist(_) => {
                    return Err(PlayerError::UnsupportedPlaylist(
                        "media playlist turned into a master playlist".to_string(),
                    ))
                }
            };
        }
    }

    /// Downloads the segments newer than the last one sent, preceded by the
    /// init section when it changed.
    async fn take_new_segments(&mut self, playlist: &MediaPlaylist) -> PlayerResult<Vec<Bytes>> {
        let live_edge = if playlist.end_list {
            0
        } else {
            playlist.segments.len().saturating_sub(LIVE_SYNC_SEGMENTS)
        };

        let requests = segment_requests(&self.url, playlist)?;
        let mut fresh: Vec<(u64, Url, Option<String>)> = Vec::new();
        for (i, (url, range)) in requests.into_iter().enumerate() {
            let media_sequence = playlist.media_sequence + i as u64;
            let is_new = match self.latest_media_sequence {
                Some(latest) => media_sequence > latest,
                None => i >= live_edge,
            };
            if is_new {
                fresh.push((media_sequence, url, range));
            }
        }
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let mut data = Vec::with_capacity(fresh.len() + 1);

        if let Some(map) = playlist.segments.iter().find_map(|s| s.map.as_ref()) {
            let init = (
                self.url.join(&map.uri)?,
                map.byte_range
                    .as_ref()
                    .map(|range| range_header(range, 0).map(|(header, _)| header))
                    .transpose()?,
            );
            if self.loaded_init.as_ref() != Some(&init) {
                log::debug!("Loading init section {}", init.0);
                data.push(self.fetch(&init.0, init.1.clone()).await?);
                self.loaded_init = Some(init);
            }
        }

        for (media_sequence, url, range) in fresh {
            log::debug!("Loading segment #{media_sequence}: {url}");
            data.push(self.fetch(&url, range).await?);
            self.latest_media_sequence = Some(media_sequence);
        }

        Ok(data)
    }

    async fn fetch(&self, url: &Url, range: Option<String>) -> PlayerResult<Bytes> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PlayerError::HttpError(response.status()));
        }
        Ok(response.bytes().await?)
    }
}

/// Playlist playback, natively when the surface can, through
/// [`PlaylistEngine`] otherwise.
pub struct HlsSession<S: Surface> {
    surface: Arc<S>,
    client: HttpClient,
    endpoints: RelayEndpoints,
    src: String,
    retry: u32,

    phase: PhaseCell,
    task: Option<JoinHandle<()>>,
    engine: Option<JoinHandle<()>>,
}

impl<S: Surface> HlsSession<S> {
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
            retry: 3,
            phase: PhaseCell::new(),
            task: None,
            engine: None,
        }
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }
}

async fn play_native<S: Surface>(
    surface: Arc<S>,
    url: Url,
    phase: PhaseCell,
    ctx: SessionContext,
) -> PlayerResult<()> {
    log::info!("Loading {url} with native playlist support");
    surface.load_native_playlist(&url).await?;
    ctx.set_connection_state(PlayerState::CONNECTED);
    phase.advance(SessionPhase::Active);
    ctx.report_playing();
    Ok(())
}

async fn play_engine<S: Surface>(
    surface: Arc<S>,
    mut engine_events: mpsc::UnboundedReceiver<PlayerResult<EngineEvent>>,
    phase: PhaseCell,
    ctx: SessionContext,
) -> PlayerResult<()> {
    surface.attach_media_source().await?;

    let (buffer_tx, mut buffer_rx) = mpsc::unbounded_channel();
    let mut queue = BufferQueue::new();
    let mut engine_done = false;

    loop {
        tokio::select! {
            event = engine_events.recv(), if !engine_done => match event {
                Some(Ok(EngineEvent::ManifestParsed { mime_type })) => {
                    if !surface.is_type_supported(&mime_type) {
                        return Err(PlayerError::UnsupportedMime(mime_type));
                    }
                    log::info!("Manifest parsed, creating source buffer for {mime_type}");
                    let buffer = surface.add_source_buffer(&mime_type, buffer_tx.clone())?;
                    queue.attach(buffer)?;
                    ctx.set_connection_state(PlayerState::CONNECTED);
                    phase.advance(SessionPhase::Active);
                    ctx.report_playing();
                }
                Some(Ok(EngineEvent::Segment(data))) => {
                    queue.push(data)?;
                }
                None => return Err(PlayerError::EngineStopped),
                Some(Ok(EngineEvent::Ended)) => {
                    log::info!("Playlist ended");
                    engine_done = true;
                    if queue.is_empty() {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
            },
            Some(event) = buffer_rx.recv() => match event {
                BufferEvent::UpdateEnd => {
                    queue.drain_next()?;
                    if engine_done && queue.is_empty() {
                        return Ok(());
                    }
                }
                BufferEvent::Error(e) => return Err(PlayerError::Buffer(e)),
            },
        }
    }
}

impl<S: Surface> TransportSession for HlsSession<S> {
    fn mode(&self) -> PlaybackMode {
        PlaybackMode::Hls
    }

    fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    fn start(&mut self, ctx: SessionContext) {
        if !self.phase.advance(SessionPhase::Connecting) {
            return;
        }

        let url = match self.endpoints.playlist(&self.src) {
            Ok(url) => url,
            Err(e) => return ctx.report_error(e.to_string()),
        };

        let surface = self.surface.clone();
        let phase = self.phase.clone();
        if surface.supports_native_playlist() {
            self.task = Some(spawn_session(
                ctx.clone(),
                play_native(surface, url, phase, ctx),
            ));
        } else {
            let (events, engine) = PlaylistEngine::new(self.client.clone(), url)
                .with_retry(self.retry)
                .spawn();
            self.engine = Some(engine);
            self.task = Some(spawn_session(
                ctx.clone(),
                play_engine(surface, events, phase, ctx),
            ));
        }
    }

    fn stop(&mut self) {
        if !self.phase.advance(SessionPhase::Closed) {
            return;
        }

        if let Some(engine) = self.engine.take() {
            engine.abort();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.surface.detach_media_source();
        self.surface.clear_source();
    }
}

impl<S: Surface> Drop for HlsSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
