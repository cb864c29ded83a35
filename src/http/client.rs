use reqwest::Client;
use reqwest::redirect::Policy;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 10;

/// Dispatcher timeout: 30 s unless `RMETER_HTTP_TIMEOUT_SECS` says
/// otherwise.
pub fn request_timeout() -> Duration {
    std::env::var("RMETER_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT)
}

/// One shared client per run, pooled for the expected VU population.
pub fn create_client(
    expected_vus: u32,
    timeout: Duration,
) -> Result<Client, Box<dyn std::error::Error + Send + Sync>> {
    let builder = Client::builder()
        .timeout(timeout)
        .tcp_nodelay(true)
        .gzip(true)
        .brotli(true)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .pool_max_idle_per_host(expected_vus.max(1) as usize)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60));

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_thirty_seconds() {
        // Only meaningful when the env override is unset, as in CI.
        if std::env::var("RMETER_HTTP_TIMEOUT_SECS").is_err() {
            assert_eq!(request_timeout(), Duration::from_secs(30));
        }
    }

    #[test]
    fn client_builds() {
        assert!(create_client(8, DEFAULT_TIMEOUT).is_ok());
    }
}
