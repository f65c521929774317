use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{
    error::PlayerResult,
    state::{PlaybackMode, PlayerEvent, PlayerShared, PlayerState},
};

pub mod hls;
pub mod mjpeg;
pub mod mse;
pub mod webrtc;

/// ┌──────────────┐  start(ctx)   ┌─────────────────────┐   frames/tracks  ┌───────────┐
/// │              ├───────────────►                     ├──────────────────►           │
/// │    Player    │               │  TransportSession   │                  │  Surface  │
/// │              ◄───────────────┤   [spawned tasks]   │                  │           │
/// │              │ playing/error │                     ◄──────────────────┤           │
/// │              │   via ctx     │                     │   UpdateEnd      │           │
/// │              ├───────────────►                     │                  │           │
/// └──────────────┘  stop()       └──────────┬──────────┘                  └───────────┘
///                                           │ HTTP / WS
///                                 ┌─────────▼─────────┐
///                                 │   Relay server    │
///                                 └───────────────────┘
///
/// `start` must not block: the session spawns its work and reports back
/// through the [`SessionContext`]. `stop` is synchronous. It aborts the
/// spawned work, fires close operations without awaiting them and hands every
/// surface resource back. Calling it twice is a no-op.
pub trait TransportSession: Send {
    fn mode(&self) -> PlaybackMode;

    fn phase(&self) -> SessionPhase;

    fn start(&mut self, ctx: SessionContext);

    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Active,
    Closed,
}

impl SessionPhase {
    pub fn can_advance(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Idle, Connecting) | (Connecting, Active) | (Idle | Connecting | Active, Closed)
        )
    }
}

/// Phase of a session, shared with its spawned tasks.
#[derive(Clone)]
pub(crate) struct PhaseCell(Arc<Mutex<SessionPhase>>);

impl PhaseCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(SessionPhase::Idle)))
    }

    pub(crate) fn get(&self) -> SessionPhase {
        *self.0.lock()
    }

    /// Returns false when the transition is not allowed, leaving the phase
    /// unchanged.
    pub(crate) fn advance(&self, next: SessionPhase) -> bool {
        let mut phase = self.0.lock();
        if phase.can_advance(next) {
            *phase = next;
            true
        } else {
            log::debug!("ignored session phase change {:?} -> {next:?}", *phase);
            false
        }
    }
}

/// Handle a session uses to report back to the player that started it.
///
/// Reports from a context whose player has since been stopped or restarted
/// are dropped.
#[derive(Clone)]
pub struct SessionContext {
    shared: Arc<PlayerShared>,
    generation: u64,
    playing_reported: Arc<AtomicBool>,
}

impl SessionContext {
    pub(crate) fn new(shared: Arc<PlayerShared>, generation: u64) -> Self {
        Self {
            shared,
            generation,
            playing_reported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reports the first rendered media. Later calls are ignored.
    pub fn report_playing(&self) {
        let shared = &self.shared;
        shared.with_current(self.generation, |state| {
            if self.playing_reported.swap(true, Ordering::SeqCst) {
                return;
            }
            state.loading = false;
            state.playing = true;
            state.error = None;
            shared.emit(PlayerEvent::Playing);
        });
    }

    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        let shared = &self.shared;
        let applied = shared.with_current(self.generation, |state| {
            state.loading = false;
            state.playing = false;
            state.error = Some(message.clone());
            shared.emit(PlayerEvent::Error(message.clone()));
        });
        if applied.is_some() {
            log::error!("playback failed: {message}");
        }
    }

    pub fn set_connection_state(&self, connection_state: impl Into<String>) {
        let connection_state = connection_state.into();
        self.shared.with_current(self.generation, |state| {
            state.connection_state = connection_state;
        });
    }
}

/// Spawns the body of a session. A returned error closes the connection state
/// and is reported through `ctx`.
pub(crate) fn spawn_session<F>(ctx: SessionContext, future: F) -> JoinHandle<()>
where
    F: Future<Output = PlayerResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = future.await {
            ctx.set_connection_state(PlayerState::CLOSED);
            ctx.report_error(e.to_string());
        }
    })
}
