use crate::error::CrmError;
use crate::middleware::AuthUser;
use crate::router::CrmState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tracing::debug;

/// GET /api/v1/notifications/stream: server-sent events for the caller.
pub async fn stream(
    State(state): State<CrmState>,
    AuthUser(principal): AuthUser,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, CrmError> {
    let user_id = principal.user_id.ok_or_else(|| {
        CrmError::BadRequest("the admin key has no notification stream".to_string())
    })?;
    debug!(user_id, "notification stream opened");
    let events = state
        .notifier
        .subscribe(user_id)
        .map(|n| Event::default().event(n.kind.as_str()).json_data(&n));
    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
