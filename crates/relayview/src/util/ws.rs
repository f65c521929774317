use std::str::FromStr;

use tokio_tungstenite::tungstenite::{
    error::UrlError,
    handshake::client::{generate_key, Request},
    http::Uri,
    Error as TungsteniteError,
};
use url::Url;

use crate::error::{PlayerError, PlayerResult};

pub(crate) fn prepare_websocket_request(ws_url: &Url) -> PlayerResult<Request> {
    log::debug!("ws_url: {ws_url}");
    let uri = Uri::from_str(ws_url.as_str())
        .map_err(|e| PlayerError::InvalidEndpoint(format!("{ws_url}: {e}")))?;
    let host = uri
        .authority()
        .ok_or(TungsteniteError::Url(UrlError::NoHostName))?
        .as_str()
        .to_string();

    let request = Request::builder()
        .method("GET")
        .header("Host", host)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key())
        .header(
            "User-Agent",
            concat!("relayview/", env!("CARGO_PKG_VERSION")),
        )
        .uri(uri)
        .body(())?;

    Ok(request)
}
