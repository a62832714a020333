use crate::api::http::{check_status, default_retry_policy, join};
use crate::config::SmartCreditConfig;
use crate::error::CrmError;
use crate::types::smart_credit::{
    AnswerRequest, AnswerResponse, CreateCustomerRequest, CreateCustomerResponse,
    CreditReportResponse, SecurityAnswer, SecurityQuestion, SecurityQuestionsResponse,
    StartSignupRequest, StartSignupResponse, TradeLine,
};
use backon::Retryable;
use std::time::Duration;
use tracing::{info, warn};

const PROVIDER: &str = "smart_credit";

/// Smart Credit JSON API client.
#[derive(Clone)]
pub struct SmartCreditApi {
    client: reqwest::Client,
    cfg: SmartCreditConfig,
}

impl SmartCreditApi {
    pub fn new(client: reqwest::Client, cfg: SmartCreditConfig) -> Self {
        Self { client, cfg }
    }

    pub fn client_key(&self) -> &str {
        &self.cfg.client_key
    }

    pub async fn start_signup(&self) -> Result<String, CrmError> {
        let body = StartSignupRequest {
            client_key: &self.cfg.client_key,
            sponsor_code: &self.cfg.sponsor_code,
        };
        let resp: StartSignupResponse = self.post("signup/start", &body).await?;
        info!("smart credit signup started");
        Ok(resp.tracking_token)
    }

    pub async fn create_customer(&self, req: &CreateCustomerRequest<'_>) -> Result<String, CrmError> {
        let resp: CreateCustomerResponse = self.post("signup/customer/create", req).await?;
        Ok(resp.customer_token)
    }

    pub async fn security_questions(
        &self,
        tracking_token: &str,
        customer_token: &str,
    ) -> Result<Vec<SecurityQuestion>, CrmError> {
        let url = join(&self.cfg.base_url, "signup/id-verification")?;
        let resp: SecurityQuestionsResponse = self
            .get(url, &[
                ("clientKey", self.cfg.client_key.as_str()),
                ("trackingToken", tracking_token),
                ("customerToken", customer_token),
            ])
            .await?;
        Ok(resp.questions)
    }

    pub async fn answer_security_questions(
        &self,
        tracking_token: &str,
        customer_token: &str,
        answers: &[SecurityAnswer],
    ) -> Result<AnswerResponse, CrmError> {
        let body = AnswerRequest {
            client_key: &self.cfg.client_key,
            tracking_token,
            customer_token,
            answers,
        };
        self.post("signup/id-verification", &body).await
    }

    pub async fn fetch_report(&self, customer_token: &str) -> Result<Vec<TradeLine>, CrmError> {
        let url = join(&self.cfg.base_url, "credit-report")?;
        let resp: CreditReportResponse = self
            .get(url, &[
                ("clientKey", self.cfg.client_key.as_str()),
                ("customerToken", customer_token),
            ])
            .await?;
        info!(trade_lines = resp.trade_lines.len(), "credit report fetched");
        Ok(resp.trade_lines)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, CrmError>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let url = join(&self.cfg.base_url, path)?;
        (|| async {
            let resp = self.client.post(url.clone()).json(body).send().await?;
            Ok::<T, CrmError>(check_status(PROVIDER, resp).await?.json::<T>().await?)
        })
        .retry(default_retry_policy())
        .when(|e: &CrmError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!(provider = PROVIDER, %err, ?dur, "retrying request");
        })
        .await
    }

    async fn get<T>(&self, url: url::Url, query: &[(&str, &str)]) -> Result<T, CrmError>
    where
        T: serde::de::DeserializeOwned,
    {
        (|| async {
            let resp = self.client.get(url.clone()).query(query).send().await?;
            Ok::<T, CrmError>(check_status(PROVIDER, resp).await?.json::<T>().await?)
        })
        .retry(default_retry_policy())
        .when(|e: &CrmError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!(provider = PROVIDER, %err, ?dur, "retrying request");
        })
        .await
    }
}
