use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use tokio::{
    io::AsyncWriteExt,
    runtime::Handle,
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use url::Url;
use webrtc::{
    api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS},
    media::io::{h264_writer::H264Writer, ogg_writer::OggWriter, Writer},
    track::track_remote::TrackRemote,
};

use super::{BufferEvent, BufferEvents, SourceBuffer, Surface};
use crate::error::{PlayerError, PlayerResult};

type TrackWriter = Arc<Mutex<dyn Writer + Send + Sync>>;

/// A headless surface which records whatever the player hands it into
/// `output_dir`.
///
/// | source            | file            |
/// |-------------------|-----------------|
/// | H264 track        | `output.h264`   |
/// | Opus track        | `output.opus`   |
/// | fMP4 sub-buffer   | `stream.mp4`    |
/// | MPEG-TS sub-buffer| `stream.ts`     |
/// | JPEG frames       | `frame.jpg`     |
pub struct RecordingSurface {
    output_dir: PathBuf,
    /// Bumped by `clear_source`. Track writers subscribe when they are
    /// attached, so a clear that lands before they start waiting still counts.
    closing: watch::Sender<u64>,
    latest_frame: watch::Sender<Option<Bytes>>,
    frame_writer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    media_attached: AtomicBool,
    image_visible: AtomicBool,
    frames: AtomicU64,
}

impl RecordingSurface {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let (closing, _) = watch::channel(0);
        let (latest_frame, _) = watch::channel(None);
        Self {
            output_dir: output_dir.into(),
            closing,
            latest_frame,
            frame_writer: parking_lot::Mutex::new(None),
            media_attached: AtomicBool::new(false),
            image_visible: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

fn open_track_writer(
    output_dir: &Path,
    mime_type: &str,
) -> PlayerResult<Option<(TrackWriter, PathBuf)>> {
    std::fs::create_dir_all(output_dir)?;
    if mime_type == MIME_TYPE_OPUS.to_lowercase() {
        let path = output_dir.join("output.opus");
        let file = BufWriter::new(File::create(&path)?);
        let writer: TrackWriter = Arc::new(Mutex::new(
            OggWriter::new(file, 48000, 2)
                .map_err(|e| PlayerError::Buffer(format!("failed to create ogg writer: {e}")))?,
        ));
        Ok(Some((writer, path)))
    } else if mime_type == MIME_TYPE_H264.to_lowercase() {
        let path = output_dir.join("output.h264");
        let file = BufWriter::new(File::create(&path)?);
        let writer: TrackWriter = Arc::new(Mutex::new(H264Writer::new(file)));
        Ok(Some((writer, path)))
    } else {
        Ok(None)
    }
}

async fn record_track(
    output_dir: PathBuf,
    track: Arc<TrackRemote>,
    closing: watch::Receiver<u64>,
) {
    let mime_type = track.codec().capability.mime_type.to_lowercase();
    let opened = {
        let mime_type = mime_type.clone();
        tokio::task::spawn_blocking(move || open_track_writer(&output_dir, &mime_type)).await
    };
    match opened {
        Ok(Ok(Some((writer, path)))) => {
            log::info!("Recording {mime_type} track to {}", path.display());
            save_to_disk(writer, track, closing).await;
        }
        Ok(Ok(None)) => log::warn!("Got unknown track {mime_type}"),
        Ok(Err(e)) => log::error!("Failed to open output for {mime_type}: {e}"),
        Err(e) => log::error!("Failed to open output for {mime_type}: {e}"),
    }
}

async fn save_to_disk(
    writer: TrackWriter,
    track: Arc<TrackRemote>,
    mut closing: watch::Receiver<u64>,
) {
    loop {
        tokio::select! {
            result = track.read_rtp() => {
                match result {
                    Ok((rtp_packet, _)) => {
                        let mut w = writer.lock().await;
                        _ = w.write_rtp(&rtp_packet).inspect_err(|e| {
                            log::error!("writer error: {e}, len={}", rtp_packet.payload.len())
                        });
                    }
                    Err(e) => {
                        log::debug!("closing track file after read_rtp error: {e}");
                        let mut w = writer.lock().await;
                        _ = w.close().inspect_err(|e| log::error!("file close err: {e}"));
                        return;
                    }
                }
            }
            // a dropped surface closes the file too
            _ = closing.changed() => {
                log::debug!("closing track file after source cleared");
                let mut w = writer.lock().await;
                _ = w.close().inspect_err(|e| log::error!("file close err: {e}"));
                return;
            }
        }
    }
}

/// Writes the most recent frame to `frame.jpg`. Frames shown while a write is
/// in flight replace each other, only the newest reaches the disk.
async fn write_frames(output_dir: PathBuf, mut frames: watch::Receiver<Option<Bytes>>) {
    if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
        log::error!("Failed to create {}: {e}", output_dir.display());
        return;
    }
    let path = output_dir.join("frame.jpg");
    while frames.changed().await.is_ok() {
        let frame = frames.borrow_and_update().clone();
        if let Some(frame) = frame {
            if let Err(e) = tokio::fs::write(&path, &frame).await {
                log::error!("Failed to write frame: {e}");
            }
        }
    }
}

impl Surface for RecordingSurface {
    type Buffer = RecordingBuffer;

    fn attach_track(&self, track: Arc<TrackRemote>) {
        tokio::spawn(record_track(
            self.output_dir.clone(),
            track,
            self.closing.subscribe(),
        ));
    }

    async fn attach_media_source(&self) -> PlayerResult<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        self.media_attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn detach_media_source(&self) {
        self.media_attached.store(false, Ordering::SeqCst);
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        let container = mime_type.split(';').next().unwrap_or_default().trim();
        matches!(container, "video/mp4" | "audio/mp4" | "video/mp2t")
    }

    fn add_source_buffer(
        &self,
        mime_type: &str,
        events: BufferEvents,
    ) -> PlayerResult<Self::Buffer> {
        if !self.media_attached.load(Ordering::SeqCst) {
            return Err(PlayerError::Buffer("no media source attached".to_string()));
        }
        if !self.is_type_supported(mime_type) {
            return Err(PlayerError::UnsupportedMime(mime_type.to_string()));
        }

        let extension = if mime_type.starts_with("video/mp2t") {
            "ts"
        } else {
            "mp4"
        };
        let path = self.output_dir.join(format!("stream.{extension}"));
        log::info!("Recording {mime_type} buffer to {}", path.display());
        Ok(RecordingBuffer::spawn(path, events))
    }

    fn supports_native_playlist(&self) -> bool {
        false
    }

    async fn load_native_playlist(&self, url: &Url) -> PlayerResult<()> {
        Err(PlayerError::UnsupportedPlaylist(format!(
            "native playback is not available for {url}"
        )))
    }

    fn set_video_visible(&self, visible: bool) {
        log::debug!("video output visible: {visible}");
    }

    fn create_image(&self) {
        self.image_visible.store(true, Ordering::SeqCst);
        let mut frame_writer = self.frame_writer.lock();
        if frame_writer.is_some() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                *frame_writer = Some(handle.spawn(write_frames(
                    self.output_dir.clone(),
                    self.latest_frame.subscribe(),
                )));
            }
            Err(_) => log::warn!("no runtime to write frames on"),
        }
    }

    fn show_image_frame(&self, frame: Bytes) {
        if !self.image_visible.load(Ordering::SeqCst) {
            return;
        }
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!("frame #{count}: {} bytes", frame.len());
        self.latest_frame.send_replace(Some(frame));
    }

    fn remove_image(&self) {
        self.image_visible.store(false, Ordering::SeqCst);
        if let Some(frame_writer) = self.frame_writer.lock().take() {
            frame_writer.abort();
        }
    }

    fn clear_source(&self) {
        self.closing.send_modify(|n| *n += 1);
        self.media_attached.store(false, Ordering::SeqCst);
    }
}

/// Appends are written by a background task. `updating` stays set until the
/// bytes reach the file.
pub struct RecordingBuffer {
    updating: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl RecordingBuffer {
    fn spawn(path: PathBuf, events: BufferEvents) -> Self {
        let updating = Arc::new(AtomicBool::new(false));
        let (sender, mut receiver) = mpsc::unbounded_channel::<Bytes>();

        let flag = updating.clone();
        tokio::spawn(async move {
            let mut file = match tokio::fs::File::create(&path).await {
                Ok(file) => file,
                Err(e) => {
                    _ = events.send(BufferEvent::Error(e.to_string()));
                    return;
                }
            };

            while let Some(data) = receiver.recv().await {
                if let Err(e) = file.write_all(&data).await {
                    flag.store(false, Ordering::SeqCst);
                    _ = events.send(BufferEvent::Error(e.to_string()));
                    return;
                }
                flag.store(false, Ordering::SeqCst);
                if events.send(BufferEvent::UpdateEnd).is_err() {
                    break;
                }
            }
            _ = file.flush().await;
        });

        Self { updating, sender }
    }
}

impl SourceBuffer for RecordingBuffer {
    fn updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    fn append_buffer(&mut self, data: Bytes) -> PlayerResult<()> {
        if self.updating() {
            return Err(PlayerError::Buffer("append while updating".to_string()));
        }
        self.updating.store(true, Ordering::SeqCst);
        self.sender.send(data).map_err(|_| {
            self.updating.store(false, Ordering::SeqCst);
            PlayerError::Buffer("buffer writer closed".to_string())
        })
    }
}
