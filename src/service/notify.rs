use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

/// Push message for one logged-in user.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub user_id: i64,
    pub kind: String,
    pub payload: Value,
    pub at: DateTime<Utc>,
}

/// Fan-out hub behind the SSE endpoint.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to `user_id`. Returns how many open streams received it.
    pub fn notify(&self, user_id: i64, kind: &str, payload: Value) -> usize {
        let n = Notification {
            user_id,
            kind: kind.to_string(),
            payload,
            at: Utc::now(),
        };
        // no subscribers is not an error
        let delivered = self.tx.send(n).unwrap_or(0);
        debug!(user_id, kind, delivered, "notification published");
        delivered
    }

    pub fn subscribe(&self, user_id: i64) -> impl Stream<Item = Notification> + Send + use<> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| async move {
            match item {
                Ok(n) if n.user_id == user_id => Some(n),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(user_id, skipped, "notification stream lagged");
                    None
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn streams_only_see_their_user() {
        let notifier = Notifier::new(16);
        let mut mine = Box::pin(notifier.subscribe(1));

        notifier.notify(2, "sms.inbound", json!({"customer_id": 5}));
        notifier.notify(1, "lead.assigned", json!({"customer_id": 9}));

        let n = mine.next().await.unwrap();
        assert_eq!(n.user_id, 1);
        assert_eq!(n.kind, "lead.assigned");
        assert_eq!(n.payload["customer_id"], 9);
    }

    #[test]
    fn notify_without_subscribers_is_fine() {
        let notifier = Notifier::default();
        assert_eq!(notifier.notify(1, "x", Value::Null), 0);
    }
}
