use serde_json::{Map, Value};
use url::Url;

use crate::{
    error::{PlayerError, PlayerResult},
    util::http::HttpClient,
};

/// URL builder for the relay server's HTTP and WebSocket API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoints {
    base: Url,
}

impl RelayEndpoints {
    pub fn new(server: Url) -> PlayerResult<Self> {
        if !matches!(server.scheme(), "http" | "https") {
            return Err(PlayerError::InvalidEndpoint(format!(
                "relay server must be http or https: {server}"
            )));
        }

        let mut base = server;
        base.set_query(None);
        base.set_fragment(None);
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> PlayerResult<Url> {
        let mut url = self.base.join(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    pub fn webrtc(&self, src: &str) -> PlayerResult<Url> {
        self.endpoint("api/webrtc", &[("src", src)])
    }

    /// `http` maps to `ws` and `https` to `wss`.
    pub fn ws(&self, src: &str) -> PlayerResult<Url> {
        let mut url = self.endpoint("api/ws", &[("src", src)])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| PlayerError::InvalidEndpoint(format!("cannot use {scheme} for {url}")))?;
        Ok(url)
    }

    pub fn playlist(&self, src: &str) -> PlayerResult<Url> {
        self.endpoint("api/stream.m3u8", &[("src", src)])
    }

    pub fn mjpeg(&self, src: &str) -> PlayerResult<Url> {
        self.endpoint("api/stream.mjpeg", &[("src", src)])
    }

    pub fn ptz(&self, src: &str, command: &str) -> PlayerResult<Url> {
        self.endpoint("api/ptz", &[("src", src), ("command", command)])
    }

    pub fn streams(&self) -> PlayerResult<Url> {
        self.endpoint("api/streams", &[])
    }
}

pub struct RelayClient {
    client: HttpClient,
    endpoints: RelayEndpoints,
}

impl RelayClient {
    pub fn new(client: HttpClient, endpoints: RelayEndpoints) -> Self {
        Self { client, endpoints }
    }

    /// Names of the streams the relay currently knows about, sorted.
    pub async fn list_streams(&self) -> PlayerResult<Vec<String>> {
        let response = self.client.get(self.endpoints.streams()?).send().await?;
        if !response.status().is_success() {
            return Err(PlayerError::HttpError(response.status()));
        }

        let streams: Map<String, Value> = response.json().await?;
        let mut names: Vec<String> = streams.into_iter().map(|(name, _)| name).collect();
        names.sort();
        Ok(names)
    }
}
