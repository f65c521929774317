use std::sync::{Arc, LazyLock};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::StreamExt;
use memchr::memmem;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use tokio::task::JoinHandle;
use url::Url;

use super::{spawn_session, PhaseCell, SessionContext, SessionPhase, TransportSession};
use crate::{
    error::{PlayerError, PlayerResult},
    relay::RelayEndpoints,
    state::{PlaybackMode, PlayerState},
    surface::Surface,
    util::http::HttpClient,
};

/// A part larger than this without a boundary means the stream is broken.
const MAX_PART_SIZE: usize = 16 * 1024 * 1024;

static BOUNDARY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)boundary="?([^";]+)"?"#).unwrap());

pub fn parse_boundary(content_type: &str) -> PlayerResult<String> {
    BOUNDARY_REGEX
        .captures(content_type)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .ok_or_else(|| PlayerError::Multipart(format!("no boundary in {content_type}")))
}

/// Incremental parser for `multipart/x-mixed-replace` bodies.
///
/// Parts are cut by their `Content-Length` header when present, by the next
/// delimiter otherwise.
pub struct MultipartParser {
    delimiter: memmem::Finder<'static>,
    buffer: BytesMut,
    /// Length of the current part body already searched for the next
    /// delimiter.
    scanned: usize,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        let delimiter = if boundary.starts_with("--") {
            boundary.as_bytes().to_vec()
        } else {
            format!("--{boundary}").into_bytes()
        };
        Self {
            delimiter: memmem::Finder::new(&delimiter).into_owned(),
            buffer: BytesMut::new(),
            scanned: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete part body, or `None` until more data
    /// arrives.
    pub fn next_frame(&mut self) -> PlayerResult<Option<Bytes>> {
        let Some(start) = self.delimiter.find(&self.buffer) else {
            if self.buffer.len() > MAX_PART_SIZE {
                return Err(PlayerError::Multipart("boundary not found".to_string()));
            }
            return Ok(None);
        };
        if start > 0 {
            // preamble or the CRLF ending the previous part
            self.buffer.advance(start);
            self.scanned = 0;
        }

        let after_delimiter = self.delimiter.needle().len();
        if self.buffer.len() < after_delimiter + 2 {
            return Ok(None);
        }
        if &self.buffer[after_delimiter..after_delimiter + 2] == b"--" {
            self.buffer.clear();
            self.scanned = 0;
            return Ok(None);
        }

        let Some(headers_len) = memmem::find(&self.buffer[after_delimiter..], b"\r\n\r\n") else {
            if self.buffer.len() > MAX_PART_SIZE {
                return Err(PlayerError::Multipart("part headers too long".to_string()));
            }
            return Ok(None);
        };
        let body_start = after_delimiter + headers_len + 4;

        let headers = String::from_utf8_lossy(&self.buffer[after_delimiter..body_start]);
        let content_length = headers.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        });

        let body_end = match content_length {
            Some(length) => {
                if self.buffer.len() < body_start + length {
                    return Ok(None);
                }
                body_start + length
            }
            None => {
                // a delimiter may straddle the end of the previous scan
                let resume = self.scanned.saturating_sub(after_delimiter - 1);
                match self.delimiter.find(&self.buffer[body_start + resume..]) {
                    Some(next) => {
                        let mut end = body_start + resume + next;
                        if self.buffer[body_start..end].ends_with(b"\r\n") {
                            end -= 2;
                        }
                        end
                    }
                    None => {
                        if self.buffer.len() > MAX_PART_SIZE {
                            return Err(PlayerError::Multipart("part too large".to_string()));
                        }
                        self.scanned = self.buffer.len() - body_start;
                        return Ok(None);
                    }
                }
            }
        };

        let mut part = self.buffer.split_to(body_end);
        self.scanned = 0;
        Ok(Some(part.split_off(body_start).freeze()))
    }
}

/// Motion JPEG over a single long-lived HTTP response, shown frame by frame
/// on the surface's image output.
pub struct MjpegSession<S: Surface> {
    surface: Arc<S>,
    client: HttpClient,
    endpoints: RelayEndpoints,
    src: String,

    phase: PhaseCell,
    task: Option<JoinHandle<()>>,
}

impl<S: Surface> MjpegSession<S> {
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
            phase: PhaseCell::new(),
            task: None,
        }
    }
}

async fn show_frames<S: Surface>(
    surface: Arc<S>,
    client: HttpClient,
    url: Url,
    phase: PhaseCell,
    ctx: SessionContext,
) -> PlayerResult<()> {
    log::info!("Requesting {url}");
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(PlayerError::HttpError(response.status()));
    }
    ctx.set_connection_state(PlayerState::CONNECTED);

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mut parser = MultipartParser::new(&parse_boundary(content_type)?);

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        parser.push(&chunk?);
        while let Some(frame) = parser.next_frame()? {
            surface.show_image_frame(frame);
            if phase.advance(SessionPhase::Active) {
                ctx.report_playing();
            }
        }
    }

    Err(PlayerError::ConnectionClosed)
}

impl<S: Surface> TransportSession for MjpegSession<S> {
    fn mode(&self) -> PlaybackMode {
        PlaybackMode::Mjpeg
    }

    fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    fn start(&mut self, ctx: SessionContext) {
        if !self.phase.advance(SessionPhase::Connecting) {
            return;
        }

        let url = match self.endpoints.mjpeg(&self.src) {
            Ok(url) => url,
            Err(e) => return ctx.report_error(e.to_string()),
        };

        self.surface.set_video_visible(false);
        self.surface.create_image();
        self.task = Some(spawn_session(
            ctx.clone(),
            show_frames(
                self.surface.clone(),
                self.client.clone(),
                url,
                self.phase.clone(),
                ctx,
            ),
        ));
    }

    fn stop(&mut self) {
        let was_started = self.phase.get() != SessionPhase::Idle;
        if !self.phase.advance(SessionPhase::Closed) {
            return;
        }

        // aborting drops the response, which cancels the request
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if was_started {
            self.surface.remove_image();
            self.surface.set_video_visible(true);
        }
        self.surface.clear_source();
    }
}

impl<S: Surface> Drop for MjpegSession<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
