use relayview::{
    HttpClient, PlaybackMode, Player, PlayerError, PlayerOptions, RelayClient, RelayEndpoints,
};
use serde_json::json;
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{common::MockSurface, AssertWrapper};

#[tokio::test]
async fn list_streams_sorted() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/streams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "garage": { "producers": [] },
            "cam1": { "producers": [{ "url": "rtsp://10.0.0.5/stream1" }] },
            "backyard": {},
        })))
        .mount(&server)
        .await;

    let endpoints = RelayEndpoints::new(Url::parse(&server.uri())?)?;
    let client = RelayClient::new(HttpClient::default(), endpoints);
    assert_eq!(client.list_streams().await?, vec!["backyard", "cam1", "garage"]);
    Ok(())
}

#[tokio::test]
async fn list_streams_http_error() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/streams"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let endpoints = RelayEndpoints::new(Url::parse(&server.uri())?)?;
    let result = RelayClient::new(HttpClient::default(), endpoints)
        .list_streams()
        .await;
    assert!(matches!(result, Err(PlayerError::HttpError(status)) if status.as_u16() == 401));
    Ok(())
}

#[test]
fn player_requires_http_server() {
    let options = PlayerOptions::new(Url::parse("ftp://relay.local").unwrap());
    Player::new(options, "cam1", MockSurface::new()).assert_error();
}

#[test]
fn player_starts_idle() {
    let options =
        PlayerOptions::new(Url::parse("http://relay.local:1984").unwrap()).with_mode(PlaybackMode::Hls);
    let player = Player::new(options, "cam1", MockSurface::new()).assert_success();

    let state = player.state();
    assert_eq!(state.mode, PlaybackMode::Hls);
    assert!(!state.loading);
    assert!(!state.playing);
    assert!(state.error.is_none());
    assert_eq!(state.connection_state, "idle");
    assert!(player.autoplay());
}
