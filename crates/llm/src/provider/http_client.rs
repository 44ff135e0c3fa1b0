use std::time::Duration;

use reqwest::Client;

use config::HttpTimeouts;

/// Build a `reqwest::Client` with the configured connect/read/write timeouts and
/// keep-alive tuning, mirroring the teacher's `default_http_client_builder`.
pub(super) fn build(timeouts: HttpTimeouts) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.read.max(timeouts.write))
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
}
