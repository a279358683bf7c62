use std::time::Duration;
use tracing::{info, warn};

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub connect_timeout: Duration,
}

/// Builds the reqwest HTTP client shared by all virtual users.
///
/// Read timeouts are set per request (3s, or 60s for optimization calls), so
/// only the connect timeout lives on the client.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, reqwest::Error> {
    let client_builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(concat!("geo_loadtest/", env!("CARGO_PKG_VERSION")));

    let client = if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?
    } else {
        client_builder.build()?
    };

    info!(
        connect_timeout_ms = config.connect_timeout.as_millis() as u64,
        skip_tls_verify = config.skip_tls_verify,
        "HTTP client configured"
    );

    Ok(client)
}
