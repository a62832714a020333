use crate::error::CrmError;
use backon::ExponentialBuilder;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Shared HTTP client for every provider.
pub fn build_client(proxy: Option<&Url>) -> Result<reqwest::Client, CrmError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("settlement-crm/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30))
        .http2_adaptive_window(true);
    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url.as_str())
            .map_err(|e| CrmError::Config(format!("invalid proxy url: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| CrmError::Config(format!("failed to build HTTP client: {e}")))
}

/// Turn a non-success response into a provider error; 5xx and 429 are transient.
pub async fn check_status(
    provider: &'static str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, CrmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = format!("{status}: {}", body.chars().take(300).collect::<String>());
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        warn!(provider, %status, "provider returned retryable status");
        Err(CrmError::transient(provider, message))
    } else {
        Err(CrmError::provider(provider, message))
    }
}

/// Join a relative path onto a configured base URL, tolerating a missing trailing slash.
pub fn join(base: &str, path: &str) -> Result<Url, CrmError> {
    let base = if base.ends_with('/') {
        Url::parse(base)?
    } else {
        Url::parse(&format!("{base}/"))?
    };
    Ok(base.join(path.trim_start_matches('/'))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_keeps_base_path() {
        let url = join("https://api.example.com/v2", "/users/1/messages").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v2/users/1/messages");
        let url = join("https://api.example.com/v2/", "users").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v2/users");
    }
}
