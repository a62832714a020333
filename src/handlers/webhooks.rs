//! Provider callbacks. These routes sit outside `/api/v1` and use the shared
//! webhook secret instead of user credentials.

use crate::error::CrmError;
use crate::middleware::WebhookAuth;
use crate::router::CrmState;
use crate::service::{comms, esign};
use crate::types::bandwidth::{MessageCallback, VoiceCallback};
use crate::types::docusign::ConnectEvent;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

/// POST /webhooks/bandwidth/messaging
pub async fn bandwidth_messaging(
    State(state): State<CrmState>,
    _auth: WebhookAuth,
    Json(callbacks): Json<Vec<MessageCallback>>,
) -> Result<StatusCode, CrmError> {
    let handled =
        comms::handle_message_callbacks(&state.storage, &state.notifier, &callbacks).await?;
    debug!(received = callbacks.len(), handled, "messaging callbacks applied");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /webhooks/bandwidth/voice: answers `initiate` with BXML.
pub async fn bandwidth_voice(
    State(state): State<CrmState>,
    _auth: WebhookAuth,
    Json(callback): Json<VoiceCallback>,
) -> Result<Response, CrmError> {
    match comms::handle_voice_callback(&state.storage, &state.notifier, &callback).await? {
        Some(reply) => Ok((
            [(header::CONTENT_TYPE, "application/xml")],
            comms::bxml(&reply)?,
        )
            .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /webhooks/docusign
pub async fn docusign(
    State(state): State<CrmState>,
    _auth: WebhookAuth,
    Json(event): Json<ConnectEvent>,
) -> Result<Response, CrmError> {
    match esign::handle_connect_event(&state.storage, &state.notifier, &event).await? {
        Some(contract) => Ok(Json(json!({
            "envelope_id": contract.envelope_id,
            "status": contract.status,
        }))
        .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
