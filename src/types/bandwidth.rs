use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest<'a> {
    pub to: Vec<&'a str>,
    pub from: &'a str,
    pub text: &'a str,
    pub application_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageResponse {
    pub id: String,
}

/// One element of the messaging callback array.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageCallback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    pub message: CallbackMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMessage {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCallback {
    pub event_type: String,
    pub call_id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub answer_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cause: Option<String>,
}

/// BXML reply to an `initiate` voice callback.
#[derive(Debug, Default, Serialize)]
#[serde(rename = "Response")]
pub struct BxmlResponse {
    #[serde(rename = "SpeakSentence", skip_serializing_if = "Option::is_none")]
    pub speak_sentence: Option<String>,
    #[serde(rename = "Transfer", skip_serializing_if = "Option::is_none")]
    pub transfer: Option<BxmlTransfer>,
}

#[derive(Debug, Serialize)]
pub struct BxmlTransfer {
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
}
