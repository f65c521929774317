use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Unsupported MIME type: {0}")]
    UnsupportedMime(String),

    #[error("Unsupported playlist: {0}")]
    UnsupportedPlaylist(String),

    #[error("M3u8 fetch error")]
    M3u8FetchError,

    #[error("Playlist engine stopped before the playlist ended")]
    EngineStopped,

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Peer connection {0}")]
    Disconnected(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Media buffer error: {0}")]
    Buffer(String),

    #[error("Multipart stream error: {0}")]
    Multipart(String),

    #[error("PTZ control error: {0}")]
    Control(String),

    #[error("Unknown playback mode: {0}")]
    InvalidMode(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    WebRtcError(#[from] webrtc::Error),

    #[error(transparent)]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    HttpRequestError(#[from] tokio_tungstenite::tungstenite::http::Error),
}

pub type PlayerResult<T> = Result<T, PlayerError>;
