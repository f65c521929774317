use relayview::{HttpClient, RelayClient, RelayEndpoints};
use url::Url;

pub async fn run(server: Url) -> anyhow::Result<()> {
    let client = RelayClient::new(HttpClient::default(), RelayEndpoints::new(server)?);
    let streams = client.list_streams().await?;
    if streams.is_empty() {
        log::warn!("The relay publishes no streams");
    }
    for name in streams {
        println!("{name}");
    }
    Ok(())
}
