use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{spawn_session, PhaseCell, SessionContext, SessionPhase, TransportSession};
use crate::{
    error::{PlayerError, PlayerResult},
    relay::RelayEndpoints,
    state::{PlaybackMode, PlayerState},
    surface::{BufferEvent, BufferEvents, SourceBuffer, Surface},
    util::ws::prepare_websocket_request,
};

/// FIFO of media chunks waiting for a [`SourceBuffer`].
///
/// At most one append is in flight: a chunk is handed to the buffer only when
/// it is idle and nothing older is waiting. Chunks pushed before a buffer is
/// attached are held and flushed in order once it is.
pub struct BufferQueue<B: SourceBuffer> {
    buffer: Option<B>,
    pending: VecDeque<Bytes>,
}

impl<B: SourceBuffer> Default for BufferQueue<B> {
    fn default() -> Self {
        Self {
            buffer: None,
            pending: VecDeque::new(),
        }
    }
}

impl<B: SourceBuffer> BufferQueue<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Attaches the buffer and starts flushing held chunks.
    pub fn attach(&mut self, buffer: B) -> PlayerResult<bool> {
        self.buffer = Some(buffer);
        self.drain_next()
    }

    /// Returns true when `data` was appended right away.
    pub fn push(&mut self, data: Bytes) -> PlayerResult<bool> {
        let idle = self.pending.is_empty() && self.buffer.as_ref().is_some_and(|b| !b.updating());
        match self.buffer.as_mut() {
            Some(buffer) if idle => {
                buffer.append_buffer(data)?;
                Ok(true)
            }
            _ => {
                self.pending.push_back(data);
                Ok(false)
            }
        }
    }

    /// Appends the oldest held chunk if the buffer is idle. Call on every
    /// update-end signal.
    pub fn drain_next(&mut self) -> PlayerResult<bool> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(false);
        };
        if buffer.updating() {
            return Ok(false);
        }
        match self.pending.pop_front() {
            Some(data) => {
                buffer.append_buffer(data)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Deserialize)]
struct RelayMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Option<String>,
}

/// Fragmented media pushed by the relay over a WebSocket and appended to a
/// media source on the surface.
pub struct MseSession<S: Surface> {
    surface: Arc<S>,
    endpoints: RelayEndpoints,
    src: String,

    phase: PhaseCell,
    task: Option<JoinHandle<()>>,
}

impl<S: Surface> MseSession<S> {
    pub fn new(surface: Arc<S>, endpoints: RelayEndpoints, src: impl Into<String>) -> Self {
        Self {
            surface,
            endpoints,
            src: src.into(),
            phase: PhaseCell::new(),
            task: None,
        }
    }
}

struct MseStream<S: Surface> {
    surface: Arc<S>,
    url: Url,
    phase: PhaseCell,
    ctx: SessionContext,
}

impl<S: Surface> MseStream<S> {
    async fn run(self) -> PlayerResult<()> {
        let (socket, _) = connect_async(prepare_websocket_request(&self.url)?).await?;
        log::info!("Connected to {}", self.url);
        self.ctx.set_connection_state(PlayerState::CONNECTED);
        let (mut sink, mut stream) = socket.split();

        self.surface.attach_media_source().await?;
        sink.send(Message::Text(json!({ "type": "mse" }).to_string()))
            .await?;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut queue = BufferQueue::new();

        loop {
            tokio::select! {
                message = stream.next() => {
                    let message = match message {
                        Some(message) => message?,
                        None => return Err(PlayerError::ConnectionClosed),
                    };
                    match message {
                        Message::Text(text) => self.handle_text(&text, &mut queue, &events_tx)?,
                        Message::Binary(data) => {
                            queue.push(Bytes::from(data))?;
                        }
                        Message::Close(frame) => {
                            log::debug!("relay closed the socket: {frame:?}");
                            return Err(PlayerError::ConnectionClosed);
                        }
                        _ => {}
                    }
                }
                Some(event) = events_rx.recv() => match event {
                    BufferEvent::UpdateEnd => {
                        if self.phase.advance(SessionPhase::Active) {
                            self.ctx.report_playing();
                        }
                        queue.drain_next()?;
                    }
                    BufferEvent::Error(e) => return Err(PlayerError::Buffer(e)),
                },
            }
        }
    }

    fn handle_text(
        &self,
        text: &str,
        queue: &mut BufferQueue<S::Buffer>,
        events: &BufferEvents,
    ) -> PlayerResult<()> {
        let message: RelayMessage = serde_json::from_str(text)?;
        match message.kind.as_str() {
            "mse" => {
                let mime_type = message.value.unwrap_or_default();
                if queue.is_attached() {
                    log::debug!("ignoring repeated codec announcement: {mime_type}");
                    return Ok(());
                }
                if !self.surface.is_type_supported(&mime_type) {
                    return Err(PlayerError::UnsupportedMime(mime_type));
                }

                log::info!("Creating source buffer for {mime_type}");
                let buffer = self.surface.add_source_buffer(&mime_type, events.clone())?;
                queue.attach(buffer)?;
            }
            "error" => {
                return Err(PlayerError::Relay(message.value.unwrap_or_default()));
            }
            kind => log::debug!("ignoring relay message of type {kind}"),
        }
        Ok(())
    }
}

impl<S: Surface> TransportSession for MseSession<S> {
    fn mode(&self) -> PlaybackMode {
        PlaybackMode::Mse
    }

    fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    fn start(&mut self, ctx: SessionContext) {
        if !self.phase.advance(SessionPhase::Connecting) {
            return;
        }

        let url = match self.endpoints.ws(&self.src) {
            Ok(url) => url,
            Err(e) => return ctx.report_error(e.to_string()),
        };

        let stream = MseStream {
            surface: self.surface.clone(),
            url,
            phase: self.phase.clone(),
            ctx: ctx.clone(),
        };
        self.task = Some(spawn_session(ctx, stream.run()));
    }

    fn stop(&mut self) {
        if !self.phase.advance(SessionPhase::Closed) {
            return;
        }

        // dropping the socket with the task closes the connection
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.surface.detach_media_source();
        self.surface.clear_source();
    }
}

impl<S: Surface> Drop for MseSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
