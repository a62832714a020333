use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSignupRequest<'a> {
    pub client_key: &'a str,
    pub sponsor_code: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSignupResponse {
    pub tracking_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerRequest<'a> {
    pub client_key: &'a str,
    pub tracking_token: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub street: Option<&'a str>,
    pub zip: Option<&'a str>,
    pub ssn: &'a str,
    pub birth_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerResponse {
    pub customer_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityQuestion {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub choices: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityQuestionsResponse {
    #[serde(default)]
    pub questions: Vec<SecurityQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAnswer {
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest<'a> {
    pub client_key: &'a str,
    pub tracking_token: &'a str,
    pub customer_token: &'a str,
    pub answers: &'a [SecurityAnswer],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    pub verified: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditReportResponse {
    #[serde(default)]
    pub trade_lines: Vec<TradeLine>,
}

/// One account line from a bureau report.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLine {
    pub creditor_name: String,
    pub account_number: String,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub high_balance: Option<Decimal>,
    pub balance: Decimal,
    #[serde(default)]
    pub account_status: Option<String>,
}
