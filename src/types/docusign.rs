use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeDefinition {
    pub template_id: String,
    pub status: &'static str,
    pub template_roles: Vec<TemplateRole>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRole {
    pub role_name: String,
    pub name: String,
    pub email: String,
    pub tabs: Tabs,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tabs {
    pub text_tabs: Vec<TextTab>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextTab {
    pub tab_label: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeSummary {
    pub envelope_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Connect webhook body (JSON SIM format).
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectEvent {
    pub event: String,
    pub data: ConnectData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectData {
    pub envelope_id: String,
}
