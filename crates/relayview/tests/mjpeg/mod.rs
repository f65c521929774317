use bytes::Bytes;
use relayview::{PlaybackMode, Player, PlayerError, PlayerEvent, PlayerOptions};
use url::Url;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::{
    common::{next_event, MockSurface},
    AssertWrapper,
};

fn multipart_body(frames: &[&[u8]]) -> Vec<u8> {
    let mut body = Vec::new();
    for frame in frames {
        body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n");
        body.extend_from_slice(format!("Content-Length: {}\r\n\r\n", frame.len()).as_bytes());
        body.extend_from_slice(frame);
        body.extend_from_slice(b"\r\n");
    }
    body
}

fn options(server: &MockServer) -> PlayerOptions {
    PlayerOptions::new(Url::parse(&server.uri()).unwrap()).with_mode(PlaybackMode::Mjpeg)
}

#[tokio::test]
async fn frames_are_shown_until_stream_ends() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let frames: [&[u8]; 3] = [b"\xff\xd8one\xff\xd9", b"\xff\xd8two\xff\xd9", b"\xff\xd8three\xff\xd9"];
    Mock::given(method("GET"))
        .and(path("/api/stream.mjpeg"))
        .and(query_param("src", "cam1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            multipart_body(&frames),
            "multipart/x-mixed-replace; boundary=frame",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let surface = MockSurface::new();
    let mut player = Player::new(options(&server), "cam1", surface.clone())?;
    let mut events = player.subscribe();
    player.start();

    assert_eq!(
        surface.calls(),
        vec!["set_video_visible false".to_string(), "create_image".to_string()]
    );

    assert_eq!(next_event(&mut events).await, PlayerEvent::Playing);
    assert_eq!(
        next_event(&mut events).await,
        PlayerEvent::Error(PlayerError::ConnectionClosed.to_string())
    );
    assert_eq!(player.state().connection_state, "closed");
    assert_eq!(
        surface.frames(),
        frames.iter().map(|f| Bytes::copy_from_slice(f)).collect::<Vec<_>>()
    );

    player.stop();
    let remove_image = surface.position("remove_image").assert_success();
    let restore_video = surface.position("set_video_visible true").assert_success();
    assert!(remove_image < restore_video);
    assert!(surface.called("clear_source"));

    // stopping again touches nothing
    let calls = surface.calls().len();
    player.stop();
    assert_eq!(surface.calls().len(), calls);
    Ok(())
}

#[tokio::test]
async fn http_failure_is_reported() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stream.mjpeg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let surface = MockSurface::new();
    let mut player = Player::new(options(&server), "cam1", surface.clone())?;
    let mut events = player.subscribe();
    player.start();

    match next_event(&mut events).await {
        PlayerEvent::Error(message) => assert!(message.contains("404")),
        event => panic!("unexpected event {event:?}"),
    }
    assert!(surface.frames().is_empty());
    assert!(!player.state().playing);
    Ok(())
}

#[tokio::test]
async fn missing_boundary_is_reported() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stream.mjpeg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"\xff\xd8".to_vec(), "image/jpeg"))
        .mount(&server)
        .await;

    let surface = MockSurface::new();
    let mut player = Player::new(options(&server), "cam1", surface.clone())?;
    let mut events = player.subscribe();
    player.start();

    match next_event(&mut events).await {
        PlayerEvent::Error(message) => assert!(message.contains("boundary")),
        event => panic!("unexpected event {event:?}"),
    }
    Ok(())
}
