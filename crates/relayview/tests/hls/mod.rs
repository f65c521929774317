use std::time::Duration;

use bytes::Bytes;
use relayview::{
    session::hls::{EngineEvent, PlaylistEngine},
    HttpClient, PlaybackMode, Player, PlayerError, PlayerEvent, PlayerOptions,
};
use url::Url;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::{
    common::{eventually, next_event, MockSurface},
    AssertWrapper,
};

trait HlsMock {
    async fn mock<S>(&self, mock_path: &str, body: S) -> &Self
    where
        S: AsRef<[u8]>;

    async fn mock_relay_playlist(&self, src: &str, body: &str) -> &Self;
}

impl HlsMock for MockServer {
    async fn mock<S>(&self, mock_path: &str, body: S) -> &Self
    where
        S: AsRef<[u8]>,
    {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.as_ref()))
            .mount(self)
            .await;
        self
    }

    async fn mock_relay_playlist(&self, src: &str, body: &str) -> &Self {
        Mock::given(method("GET"))
            .and(path("/api/stream.m3u8"))
            .and(query_param("src", src))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(self)
            .await;
        self
    }
}

fn options(server: &MockServer, mode: PlaybackMode) -> PlayerOptions {
    PlayerOptions::new(Url::parse(&server.uri()).unwrap()).with_mode(mode)
}

const VOD_FMP4: &str = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-TARGETDURATION:2
#EXT-X-MEDIA-SEQUENCE:0
#EXT-X-MAP:URI=\"init.mp4\"
#EXTINF:2.0,
seg0.m4s
#EXTINF:2.0,
seg1.m4s
#EXTINF:2.0,
seg2.m4s
#EXT-X-ENDLIST";

#[tokio::test]
async fn switch_to_playlist_on_cam1() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stream.mjpeg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
        .mock_relay_playlist("cam1", VOD_FMP4)
        .await
        .mock("/api/init.mp4", "init")
        .await
        .mock("/api/seg0.m4s", "seg0")
        .await
        .mock("/api/seg1.m4s", "seg1")
        .await
        .mock("/api/seg2.m4s", "seg2")
        .await;

    let surface = MockSurface::new();
    let mut player = Player::new(options(&server, PlaybackMode::Mjpeg), "cam1", surface.clone())?;
    let mut events = player.subscribe();

    player.start();
    assert!(matches!(next_event(&mut events).await, PlayerEvent::Error(_)));
    assert!(player.state().error.is_some());

    player.switch_mode(PlaybackMode::Hls);
    assert_eq!(
        next_event(&mut events).await,
        PlayerEvent::ModeChange(PlaybackMode::Hls)
    );
    assert_eq!(next_event(&mut events).await, PlayerEvent::Playing);

    let state = player.state();
    assert_eq!(state.mode, PlaybackMode::Hls);
    assert!(state.playing);
    assert!(!state.loading);
    assert!(state.error.is_none());

    // image output of the old session is gone before the new one attaches
    let removed = surface.position("remove_image").assert_success();
    let attached = surface.position("attach_media_source").assert_success();
    assert!(removed < attached);
    assert!(surface.called("add_source_buffer video/mp4"));

    assert!(eventually(|| surface.appended().len() == 4).await);
    assert_eq!(
        surface.appended(),
        vec![
            Bytes::from_static(b"init"),
            Bytes::from_static(b"seg0"),
            Bytes::from_static(b"seg1"),
            Bytes::from_static(b"seg2"),
        ]
    );
    assert_eq!(surface.busy_violations(), 0);

    player.stop();
    assert!(surface.called("detach_media_source"));
    Ok(())
}

#[tokio::test]
async fn live_playlist_starts_near_the_edge() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock_relay_playlist(
            "cam1",
            "#EXTM3U
#EXT-X-TARGETDURATION:2
#EXT-X-MEDIA-SEQUENCE:100
#EXTINF:2.0,
s100.ts
#EXTINF:2.0,
s101.ts
#EXTINF:2.0,
s102.ts
#EXTINF:2.0,
s103.ts
#EXTINF:2.0,
s104.ts",
        )
        .await
        .mock("/api/s102.ts", "s102")
        .await
        .mock("/api/s103.ts", "s103")
        .await
        .mock("/api/s104.ts", "s104")
        .await;
    for skipped in ["/api/s100.ts", "/api/s101.ts"] {
        Mock::given(method("GET"))
            .and(path(skipped))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
    }

    let surface = MockSurface::new();
    let mut player = Player::new(options(&server, PlaybackMode::Hls), "cam1", surface.clone())?;
    let mut events = player.subscribe();
    player.start();
    assert_eq!(next_event(&mut events).await, PlayerEvent::Playing);
    assert_eq!(player.state().connection_state, "connected");
    assert!(surface.called("add_source_buffer video/mp2t"));

    assert!(eventually(|| surface.appended().len() == 3).await);
    // a reload of the unchanged playlist adds nothing
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        surface.appended(),
        vec![
            Bytes::from_static(b"s102"),
            Bytes::from_static(b"s103"),
            Bytes::from_static(b"s104"),
        ]
    );

    player.stop();
    Ok(())
}

#[tokio::test]
async fn engine_follows_best_variant() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock(
            "/master.m3u8",
            "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401e\"
low.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080,CODECS=\"avc1.640028,mp4a.40.2\"
high.m3u8",
        )
        .await
        .mock(
            "/high.m3u8",
            "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXTINF:4.0,
high0.ts
#EXT-X-ENDLIST",
        )
        .await
        .mock("/high0.ts", "high0")
        .await;
    Mock::given(method("GET"))
        .and(path("/low.m3u8"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/master.m3u8", server.uri()))?;
    let (mut events, _engine) = PlaylistEngine::new(HttpClient::default(), url).spawn();

    assert_eq!(
        events.recv().await.assert_success()?,
        EngineEvent::ManifestParsed {
            mime_type: "video/mp2t; codecs=\"avc1.640028,mp4a.40.2\"".to_string()
        }
    );
    assert_eq!(
        events.recv().await.assert_success()?,
        EngineEvent::Segment(Bytes::from_static(b"high0"))
    );
    assert_eq!(events.recv().await.assert_success()?, EngineEvent::Ended);
    events.recv().await.assert_error();
    Ok(())
}

#[tokio::test]
async fn engine_requests_continued_byte_ranges() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock(
            "/ranged.m3u8",
            "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXTINF:4.0,
#EXT-X-BYTERANGE:4@0
all.ts
#EXTINF:4.0,
#EXT-X-BYTERANGE:4
all.ts
#EXT-X-ENDLIST",
        )
        .await;
    for (range, body) in [("bytes=0-3", "aaaa"), ("bytes=4-7", "bbbb")] {
        Mock::given(method("GET"))
            .and(path("/all.ts"))
            .and(header("Range", range))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(body))
            .expect(1)
            .mount(&server)
            .await;
    }

    let url = Url::parse(&format!("{}/ranged.m3u8", server.uri()))?;
    let (mut events, _engine) = PlaylistEngine::new(HttpClient::default(), url).spawn();

    assert!(matches!(
        events.recv().await.assert_success()?,
        EngineEvent::ManifestParsed { .. }
    ));
    assert_eq!(
        events.recv().await.assert_success()?,
        EngineEvent::Segment(Bytes::from_static(b"aaaa"))
    );
    assert_eq!(
        events.recv().await.assert_success()?,
        EngineEvent::Segment(Bytes::from_static(b"bbbb"))
    );
    assert_eq!(events.recv().await.assert_success()?, EngineEvent::Ended);
    Ok(())
}

#[tokio::test]
async fn engine_gives_up_after_retries() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/stream.m3u8"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let surface = MockSurface::new();
    let options = options(&server, PlaybackMode::Hls).with_playlist_retry(2);
    let mut player = Player::new(options, "cam1", surface.clone())?;
    let mut events = player.subscribe();
    player.start();

    assert_eq!(
        next_event(&mut events).await,
        PlayerEvent::Error(PlayerError::M3u8FetchError.to_string())
    );
    let state = player.state();
    assert!(!state.loading);
    assert!(!state.playing);
    Ok(())
}

#[tokio::test]
async fn unsupported_container_is_fatal() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server.mock_relay_playlist("cam1", VOD_FMP4).await;

    let surface = MockSurface::with_supported(vec!["video/mp2t"]);
    let mut player = Player::new(options(&server, PlaybackMode::Hls), "cam1", surface.clone())?;
    let mut events = player.subscribe();
    player.start();

    match next_event(&mut events).await {
        PlayerEvent::Error(message) => assert!(message.contains("video/mp4")),
        event => panic!("unexpected event {event:?}"),
    }
    assert!(!surface.calls().iter().any(|c| c.starts_with("add_source_buffer")));
    Ok(())
}

#[tokio::test]
async fn native_playlist_skips_engine() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let surface = MockSurface::with_native_playlist();
    let mut player = Player::new(options(&server, PlaybackMode::Hls), "cam1", surface.clone())?;
    let mut events = player.subscribe();
    player.start();

    assert_eq!(next_event(&mut events).await, PlayerEvent::Playing);
    let expected = format!("load_native_playlist {}/api/stream.m3u8?src=cam1", server.uri());
    assert!(surface.called(&expected));
    assert!(!surface.called("attach_media_source"));
    Ok(())
}
