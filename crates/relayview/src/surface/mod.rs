use std::{future::Future, sync::Arc};

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;
use webrtc::track::track_remote::TrackRemote;

use crate::error::PlayerResult;

mod record;

pub use record::RecordingSurface;

/// Signals raised by a [`SourceBuffer`] once an append has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferEvent {
    UpdateEnd,
    Error(String),
}

pub type BufferEvents = mpsc::UnboundedSender<BufferEvent>;

/// A typed sub-buffer of an attached media source.
///
/// An append must only be issued while `updating()` is false. Completion is
/// reported through the [`BufferEvents`] channel handed to
/// [`Surface::add_source_buffer`].
pub trait SourceBuffer: Send + 'static {
    fn updating(&self) -> bool;

    fn append_buffer(&mut self, data: Bytes) -> PlayerResult<()>;
}

/// The host the player renders into.
///
/// Decoding is the host's job. Sessions only hand it tracks, media bytes,
/// playlist URLs or image frames, and take them back on teardown.
pub trait Surface: Send + Sync + 'static {
    type Buffer: SourceBuffer;

    /// Binds a remote peer-to-peer track to the video output.
    fn attach_track(&self, track: Arc<TrackRemote>);

    /// Creates a media source and binds it to the video output. Resolves once
    /// the source is open.
    fn attach_media_source(&self) -> impl Future<Output = PlayerResult<()>> + Send;

    /// Detaches the media source and revokes whatever handle the video output
    /// was using for it.
    fn detach_media_source(&self);

    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn add_source_buffer(
        &self,
        mime_type: &str,
        events: BufferEvents,
    ) -> PlayerResult<Self::Buffer>;

    fn supports_native_playlist(&self) -> bool;

    /// Hands a playlist URL to the host's own player. Resolves on metadata
    /// loaded.
    fn load_native_playlist(&self, url: &Url) -> impl Future<Output = PlayerResult<()>> + Send;

    fn set_video_visible(&self, visible: bool);

    fn create_image(&self);

    fn show_image_frame(&self, frame: Bytes);

    fn remove_image(&self);

    /// Drops any source still bound to the video output.
    fn clear_source(&self);
}
