use crate::api::http::{check_status, default_retry_policy, join};
use crate::config::DocusignConfig;
use crate::error::CrmError;
use crate::types::docusign::{EnvelopeDefinition, EnvelopeSummary, Tabs, TemplateRole, TextTab};
use backon::Retryable;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenResponse,
};
use oauth2::{
    AuthUrl, Client as OAuth2Client, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    RefreshToken, StandardRevocableToken, TokenResponse, TokenUrl,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

const PROVIDER: &str = "docusign";
const CLIENT_ROLE: &str = "Client";
// refresh this long before the token actually expires
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

type DocusignOauth2Client = OAuth2Client<
    BasicErrorResponse,
    BasicTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Docusign eSignature REST client.
#[derive(Clone)]
pub struct DocusignApi {
    client: reqwest::Client,
    cfg: DocusignConfig,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl DocusignApi {
    pub fn new(client: reqwest::Client, cfg: DocusignConfig) -> Self {
        Self {
            client,
            cfg,
            token: Arc::new(Mutex::new(None)),
        }
    }

    fn oauth2_client(&self) -> Result<DocusignOauth2Client, CrmError> {
        Ok(OAuth2Client::new(ClientId::new(self.cfg.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.cfg.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(self.cfg.auth_url.clone())?)
            .set_token_uri(TokenUrl::new(self.cfg.token_url.clone())?))
    }

    /// Current access token, refreshed through the refresh-token grant when stale.
    pub async fn access_token(&self) -> Result<String, CrmError> {
        if let Some(token) = self.cfg.access_token.as_ref() {
            return Ok(token.clone());
        }

        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref()
            && cached.expires_at > Instant::now() + EXPIRY_SKEW
        {
            return Ok(cached.access_token.clone());
        }
        if self.cfg.refresh_token.is_empty() {
            return Err(CrmError::Config(
                "docusign.refresh_token is not set".to_string(),
            ));
        }

        let oauth = self.oauth2_client()?;
        let refresh = RefreshToken::new(self.cfg.refresh_token.clone());
        let resp = (|| async {
            oauth
                .exchange_refresh_token(&refresh)
                .request_async(&self.client)
                .await
                .map_err(CrmError::from)
        })
        .retry(default_retry_policy())
        .when(|e: &CrmError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!(provider = PROVIDER, %err, ?dur, "retrying token refresh");
        })
        .await?;

        let expires_in = resp.expires_in().unwrap_or(Duration::from_secs(3600));
        let cached = CachedToken {
            access_token: resp.access_token().secret().clone(),
            expires_at: Instant::now() + expires_in,
        };
        info!(expires_in_secs = expires_in.as_secs(), "docusign access token refreshed");
        let token = cached.access_token.clone();
        *guard = Some(cached);
        Ok(token)
    }

    /// Create and send an envelope from the configured template.
    pub async fn create_envelope(
        &self,
        signer_name: &str,
        signer_email: &str,
        text_tabs: Vec<TextTab>,
    ) -> Result<String, CrmError> {
        let token = self.access_token().await?;
        let url = join(
            &self.cfg.base_url,
            &format!("v2.1/accounts/{}/envelopes", self.cfg.account_id),
        )?;
        let body = EnvelopeDefinition {
            template_id: self.cfg.template_id.clone(),
            status: "sent",
            template_roles: vec![TemplateRole {
                role_name: CLIENT_ROLE.to_string(),
                name: signer_name.to_string(),
                email: signer_email.to_string(),
                tabs: Tabs { text_tabs },
            }],
        };

        let summary: EnvelopeSummary = (|| async {
            let resp = self
                .client
                .post(url.clone())
                .bearer_auth(&token)
                .json(&body)
                .send()
                .await?;
            Ok::<EnvelopeSummary, CrmError>(check_status(PROVIDER, resp).await?.json().await?)
        })
        .retry(default_retry_policy())
        .when(|e: &CrmError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!(provider = PROVIDER, %err, ?dur, "retrying request");
        })
        .await?;

        info!(envelope_id = %summary.envelope_id, status = ?summary.status, "envelope created");
        Ok(summary.envelope_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn cfg(server: &MockServer) -> DocusignConfig {
        DocusignConfig {
            base_url: server.url("/restapi"),
            account_id: "acct".into(),
            template_id: "tpl".into(),
            client_id: "cid".into(),
            client_secret: "secret".into(),
            refresh_token: "rt-1".into(),
            auth_url: server.url("/oauth/auth"),
            token_url: server.url("/oauth/token"),
            access_token: None,
        }
    }

    #[tokio::test]
    async fn token_is_refreshed_once_and_cached() {
        let server = MockServer::start();
        let token_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_contains("grant_type=refresh_token")
                .body_contains("refresh_token=rt-1");
            then.status(200).json_body(serde_json::json!({
                "access_token": "at-1",
                "token_type": "Bearer",
                "expires_in": 3600
            }));
        });
        let envelope_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/restapi/v2.1/accounts/acct/envelopes")
                .header("authorization", "Bearer at-1")
                .body_contains("\"tabLabel\":\"client_full_name\"");
            then.status(201)
                .json_body(serde_json::json!({"envelopeId": "env-1", "status": "sent"}));
        });

        let api = DocusignApi::new(reqwest::Client::new(), cfg(&server));
        let tabs = vec![TextTab {
            tab_label: "client_full_name".into(),
            value: "Ada Byrne".into(),
        }];
        assert_eq!(
            api.create_envelope("Ada Byrne", "ada@example.com", tabs.clone())
                .await
                .unwrap(),
            "env-1"
        );
        api.create_envelope("Ada Byrne", "ada@example.com", tabs)
            .await
            .unwrap();

        token_mock.assert_hits(1);
        envelope_mock.assert_hits(2);
    }

    #[tokio::test]
    async fn static_token_skips_refresh() {
        let server = MockServer::start();
        let mut cfg = cfg(&server);
        cfg.access_token = Some("static".into());
        let api = DocusignApi::new(reqwest::Client::new(), cfg);
        assert_eq!(api.access_token().await.unwrap(), "static");
    }
}
