//! DataX bank-account verification XML documents.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename = "DATAXINQUIRY")]
pub struct DataxInquiry {
    #[serde(rename = "AUTHENTICATION")]
    pub authentication: Authentication,
    #[serde(rename = "QUERY")]
    pub query: Query,
}

#[derive(Debug, Serialize)]
pub struct Authentication {
    #[serde(rename = "LICENSEKEY")]
    pub license_key: String,
    #[serde(rename = "PASSWORD")]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct Query {
    #[serde(rename = "TRACKID")]
    pub track_id: String,
    #[serde(rename = "TYPE")]
    pub call_type: String,
    #[serde(rename = "DATA")]
    pub data: QueryData,
}

#[derive(Debug, Serialize)]
pub struct QueryData {
    #[serde(rename = "NAMEFIRST")]
    pub first_name: String,
    #[serde(rename = "NAMELAST")]
    pub last_name: String,
    #[serde(rename = "BANKABA")]
    pub routing_number: String,
    #[serde(rename = "BANKACCTNUMBER")]
    pub account_number: String,
}

#[derive(Debug, Deserialize)]
pub struct DataxResponse {
    #[serde(rename = "TransactionId", default)]
    pub transaction_id: Option<String>,
    #[serde(rename = "Response", default)]
    pub response: Option<ResponseBody>,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: Option<String>,
    #[serde(rename = "ErrorMsg", default)]
    pub error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseBody {
    #[serde(rename = "Summary", default)]
    pub summary: Option<Summary>,
    #[serde(rename = "BAVSegment", default)]
    pub bav: Option<BavSegment>,
}

#[derive(Debug, Deserialize)]
pub struct Summary {
    #[serde(rename = "Decision", default)]
    pub decision: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BavSegment {
    #[serde(rename = "Code", default)]
    pub code: Option<String>,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
}
