use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use relayview::{
    ptz::{DeviceControl, PtzCommand, PtzDispatcher, PtzHandler, PtzSettings},
    HttpClient, PlayerError, PlayerResult, RelayEndpoints,
};
use serde_json::Value;
use url::Url;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::AssertWrapper;

const CAMERA_IP: &str = "192.168.1.20";

#[derive(Default)]
struct RecordingHandler {
    commands: Mutex<Vec<PtzCommand>>,
}

#[async_trait]
impl PtzHandler for RecordingHandler {
    async fn handle(&self, command: PtzCommand) -> PlayerResult<()> {
        self.commands.lock().push(command);
        Ok(())
    }
}

fn dispatcher(server: &MockServer) -> PtzDispatcher {
    let endpoints = RelayEndpoints::new(Url::parse(&server.uri()).unwrap()).unwrap();
    PtzDispatcher::new(HttpClient::default(), endpoints, "cam1")
}

fn device(server: &MockServer) -> DeviceControl {
    DeviceControl::new(
        Url::parse(&server.uri()).unwrap(),
        CAMERA_IP,
        "admin",
        "secret",
    )
}

async fn mock_device_step(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/api/cameras/{CAMERA_IP}/ptz/step")))
        .and(header("X-Camera-Username", "admin"))
        .and(header("X-Camera-Password", "secret"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

#[tokio::test]
async fn hold_repeats_until_release() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_device_step(&server).await;

    let dispatcher = dispatcher(&server).with_settings(PtzSettings {
        repeat_interval: Duration::from_millis(150),
        device: Some(device(&server)),
    });

    let hold = dispatcher.press(PtzCommand::Right);
    assert!(hold.is_held());
    tokio::time::sleep(Duration::from_millis(500)).await;
    hold.release();

    // in-flight requests finish, nothing new is sent
    tokio::time::sleep(Duration::from_millis(400)).await;
    let requests = server.received_requests().await.assert_success();
    assert_eq!(requests.len(), 4);
    for request in requests {
        let body: Value = serde_json::from_slice(&request.body)?;
        assert_eq!(body["direction"], 90);
    }
    Ok(())
}

#[tokio::test]
async fn dropped_hold_stops_repeating() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_device_step(&server).await;

    let dispatcher = dispatcher(&server);
    dispatcher.set_device(Some(device(&server)));
    {
        let _hold = dispatcher.press(PtzCommand::UpLeft);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    let requests = server.received_requests().await.assert_success();
    assert_eq!(requests.len(), 2);
    let body: Value = serde_json::from_slice(&requests[0].body)?;
    assert_eq!(body["direction"], 315);
    Ok(())
}

#[tokio::test]
async fn route_is_chosen_per_command() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_device_step(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/ptz"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(&server);
    let handler = Arc::new(RecordingHandler::default());

    // custom handler wins over everything
    dispatcher.set_handler(Some(handler.clone()));
    dispatcher.set_device(Some(device(&server)));
    dispatcher.dispatch(PtzCommand::Up).await?;
    assert_eq!(*handler.commands.lock(), vec![PtzCommand::Up]);
    assert!(server.received_requests().await.assert_success().is_empty());

    // then the device API
    dispatcher.set_handler(None);
    dispatcher.dispatch(PtzCommand::Down).await?;
    let requests = server.received_requests().await.assert_success();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), format!("/api/cameras/{CAMERA_IP}/ptz/step"));

    // incomplete credentials fall through to the relay
    let mut anonymous = device(&server);
    anonymous.password.clear();
    dispatcher.set_device(Some(anonymous));
    dispatcher.set_src("cam2");
    dispatcher.dispatch(PtzCommand::Left).await?;
    let requests = server.received_requests().await.assert_success();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].url.path(), "/api/ptz");
    assert_eq!(requests[1].url.query(), Some("src=cam2&command=left"));

    // a non-directional press fires once and holds nothing
    assert!(!dispatcher.press(PtzCommand::CruiseStop).is_held());
    Ok(())
}

#[tokio::test]
async fn device_extra_commands() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    for action in ["calibrate", "cruise/start", "cruise/stop"] {
        Mock::given(method("POST"))
            .and(path(format!("/api/cameras/{CAMERA_IP}/ptz/{action}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dispatcher = dispatcher(&server);
    dispatcher.set_device(Some(device(&server)));
    for command in [PtzCommand::Home, PtzCommand::CruiseStart, PtzCommand::CruiseStop] {
        dispatcher.dispatch(command).await?;
    }
    Ok(())
}

#[tokio::test]
async fn relay_rejection_is_a_control_error() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ptz"))
        .and(query_param("src", "cam1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = dispatcher(&server).dispatch(PtzCommand::Right).await;
    assert!(matches!(result, Err(PlayerError::Control(_))));
    result.assert_error();
    Ok(())
}
