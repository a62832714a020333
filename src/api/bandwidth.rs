use crate::api::http::{check_status, default_retry_policy, join};
use crate::config::BandwidthConfig;
use crate::error::CrmError;
use crate::types::bandwidth::{SendMessageRequest, SendMessageResponse};
use backon::Retryable;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PROVIDER: &str = "bandwidth";

/// Bandwidth messaging v2 client. Sends are throttled to `per_second`.
#[derive(Clone)]
pub struct BandwidthApi {
    client: reqwest::Client,
    cfg: BandwidthConfig,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl BandwidthApi {
    pub fn new(client: reqwest::Client, cfg: BandwidthConfig) -> Self {
        let per_second = NonZeroU32::new(cfg.per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));
        Self {
            client,
            cfg,
            limiter,
        }
    }

    pub fn from_number(&self) -> &str {
        &self.cfg.from_number
    }

    /// Send one SMS and return the provider message id.
    pub async fn send_sms(&self, to: &str, text: &str) -> Result<String, CrmError> {
        if self.cfg.from_number.is_empty() {
            return Err(CrmError::Config("bandwidth.from_number is not set".to_string()));
        }
        let url = join(
            &self.cfg.base_url,
            &format!("users/{}/messages", self.cfg.account_id),
        )?;
        let body = SendMessageRequest {
            to: vec![to],
            from: &self.cfg.from_number,
            text,
            application_id: &self.cfg.application_id,
        };

        let resp: SendMessageResponse = (|| async {
            self.limiter.until_ready().await;
            let resp = self
                .client
                .post(url.clone())
                .basic_auth(&self.cfg.username, Some(&self.cfg.password))
                .json(&body)
                .send()
                .await?;
            Ok::<SendMessageResponse, CrmError>(check_status(PROVIDER, resp).await?.json().await?)
        })
        .retry(default_retry_policy())
        .when(|e: &CrmError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!(provider = PROVIDER, %err, ?dur, "retrying request");
        })
        .await?;

        info!(message_id = %resp.id, "sms accepted by bandwidth");
        Ok(resp.id)
    }
}
