use crate::api::http::{check_status, default_retry_policy};
use crate::config::DataxConfig;
use crate::db::models::BankValidation;
use crate::error::CrmError;
use crate::types::datax::{Authentication, DataxInquiry, DataxResponse, Query, QueryData};
use backon::Retryable;
use std::time::Duration;
use tracing::{debug, warn};

const PROVIDER: &str = "datax";

/// Outcome of a bank-account verification inquiry.
#[derive(Debug, Clone, PartialEq)]
pub struct BavResult {
    pub validation: BankValidation,
    pub message: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Clone)]
pub struct DataxApi {
    client: reqwest::Client,
    cfg: DataxConfig,
}

impl DataxApi {
    pub fn new(client: reqwest::Client, cfg: DataxConfig) -> Self {
        Self { client, cfg }
    }

    pub fn inquiry_xml(
        &self,
        track_id: &str,
        first_name: &str,
        last_name: &str,
        routing_number: &str,
        account_number: &str,
    ) -> Result<String, CrmError> {
        let inquiry = DataxInquiry {
            authentication: Authentication {
                license_key: self.cfg.license_key.clone(),
                password: self.cfg.password.clone(),
            },
            query: Query {
                track_id: track_id.to_string(),
                call_type: self.cfg.call_type.clone(),
                data: QueryData {
                    first_name: first_name.to_string(),
                    last_name: last_name.to_string(),
                    routing_number: routing_number.to_string(),
                    account_number: account_number.to_string(),
                },
            },
        };
        Ok(quick_xml::se::to_string(&inquiry)?)
    }

    pub async fn verify_account(
        &self,
        track_id: &str,
        first_name: &str,
        last_name: &str,
        routing_number: &str,
        account_number: &str,
    ) -> Result<BavResult, CrmError> {
        let xml = self.inquiry_xml(track_id, first_name, last_name, routing_number, account_number)?;
        let body = (|| async {
            let resp = self
                .client
                .post(self.cfg.endpoint.as_str())
                .header(reqwest::header::CONTENT_TYPE, "application/xml")
                .body(xml.clone())
                .send()
                .await?;
            Ok::<String, CrmError>(check_status(PROVIDER, resp).await?.text().await?)
        })
        .retry(default_retry_policy())
        .when(|e: &CrmError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!(provider = PROVIDER, %err, ?dur, "retrying request");
        })
        .await?;
        debug!(track_id, "datax response received");
        parse_response(&body)
    }
}

/// Map a DataX response document to a validation state.
pub fn parse_response(xml: &str) -> Result<BavResult, CrmError> {
    let resp: DataxResponse = quick_xml::de::from_str(xml)?;
    if let Some(code) = resp.error_code.filter(|c| !c.trim().is_empty()) {
        return Err(CrmError::provider(
            PROVIDER,
            format!("{code}: {}", resp.error_msg.unwrap_or_default()),
        ));
    }

    let body = resp.response;
    let decision = body
        .as_ref()
        .and_then(|b| b.summary.as_ref())
        .and_then(|s| s.decision.clone())
        .unwrap_or_default();
    let bav = body.as_ref().and_then(|b| b.bav.as_ref());
    let message = bav.and_then(|b| match (&b.code, &b.description) {
        (Some(c), Some(d)) => Some(format!("{c}: {d}")),
        (Some(c), None) => Some(c.clone()),
        (None, d) => d.clone(),
    });

    let validation = match decision.trim().to_ascii_uppercase().as_str() {
        "A" | "APPROVE" | "PASS" => BankValidation::Valid,
        "D" | "DENY" | "FAIL" => BankValidation::Invalid,
        _ => BankValidation::Unknown,
    };
    Ok(BavResult {
        validation,
        message,
        transaction_id: resp.transaction_id,
    })
}
