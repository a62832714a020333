//! Outbound SMS and the Bandwidth messaging/voice callbacks.

use crate::api::bandwidth::BandwidthApi;
use crate::db::CrmStorage;
use crate::db::models::{Channel, Communication, Direction, NewCommunication};
use crate::error::CrmError;
use crate::service::funnel::normalize_phone;
use crate::service::notify::Notifier;
use crate::types::bandwidth::{BxmlResponse, BxmlTransfer, MessageCallback, VoiceCallback};
use serde_json::json;
use tracing::{debug, info, warn};

pub const MAX_SMS_LEN: usize = 1600;
const VOICE_GREETING: &str = "Thank you for calling. An agent will return your call shortly.";

/// Send one SMS and record it as an outbound communication.
pub async fn send_sms(
    storage: &CrmStorage,
    api: &BandwidthApi,
    customer_id: Option<i64>,
    user_id: Option<i64>,
    to: &str,
    text: &str,
) -> Result<Communication, CrmError> {
    let to = normalize_phone(to)
        .ok_or_else(|| CrmError::BadRequest(format!("invalid destination number `{to}`")))?;
    if text.trim().is_empty() || text.chars().count() > MAX_SMS_LEN {
        return Err(CrmError::BadRequest(format!(
            "sms text must be 1..={MAX_SMS_LEN} characters"
        )));
    }

    let message_id = api.send_sms(&to, text).await?;
    storage
        .insert_communication(&NewCommunication {
            customer_id,
            user_id,
            channel: Channel::Sms,
            direction: Direction::Outbound,
            from_number: api.from_number().to_string(),
            to_number: to,
            body: Some(text.to_string()),
            provider_id: Some(message_id),
            status: "sent".to_string(),
            duration_secs: None,
        })
        .await
}

/// Apply a batch of messaging callbacks. Returns how many were recorded.
pub async fn handle_message_callbacks(
    storage: &CrmStorage,
    notifier: &Notifier,
    callbacks: &[MessageCallback],
) -> Result<usize, CrmError> {
    let mut handled = 0;
    for cb in callbacks {
        match cb.kind.as_str() {
            "message-received" => {
                record_inbound_sms(storage, notifier, cb).await?;
                handled += 1;
            }
            "message-delivered" | "message-failed" => {
                let status = if cb.kind == "message-delivered" {
                    "delivered"
                } else {
                    "failed"
                };
                if storage
                    .update_communication_status(&cb.message.id, status, None)
                    .await?
                {
                    handled += 1;
                } else {
                    warn!(message_id = %cb.message.id, status, "status callback for unknown message");
                }
                if let Some(reason) = cb.description.as_deref().filter(|_| status == "failed") {
                    warn!(message_id = %cb.message.id, reason, "sms delivery failed");
                }
            }
            other => debug!(kind = other, "ignoring messaging callback"),
        }
    }
    Ok(handled)
}

async fn record_inbound_sms(
    storage: &CrmStorage,
    notifier: &Notifier,
    cb: &MessageCallback,
) -> Result<(), CrmError> {
    let from = normalize_phone(&cb.message.from).unwrap_or_else(|| cb.message.from.clone());
    let to = cb
        .message
        .to
        .first()
        .cloned()
        .or_else(|| cb.to.clone())
        .unwrap_or_default();
    let customer = storage.customer_by_phone(&from).await?;

    let Some(comm) = storage
        .insert_inbound_sms(&NewCommunication {
            customer_id: customer.as_ref().map(|c| c.id),
            user_id: None,
            channel: Channel::Sms,
            direction: Direction::Inbound,
            from_number: from,
            to_number: to,
            body: cb.message.text.clone(),
            provider_id: Some(cb.message.id.clone()),
            status: "received".to_string(),
            duration_secs: None,
        })
        .await?
    else {
        debug!(message_id = %cb.message.id, "replayed inbound sms ignored");
        return Ok(());
    };

    if let Some(customer) = customer {
        if let Some(agent) = customer.assigned_to {
            notifier.notify(
                agent,
                "sms.inbound",
                json!({
                    "communication_id": comm.id,
                    "customer_id": customer.id,
                    "customer_name": customer.full_name(),
                    "text": comm.body,
                }),
            );
        }
    } else {
        info!(communication_id = comm.id, "inbound sms from unknown number");
    }
    Ok(())
}

/// Apply a voice callback. `initiate` returns the BXML answering the call.
pub async fn handle_voice_callback(
    storage: &CrmStorage,
    notifier: &Notifier,
    cb: &VoiceCallback,
) -> Result<Option<BxmlResponse>, CrmError> {
    match cb.event_type.as_str() {
        "initiate" => {
            let from = normalize_phone(&cb.from).unwrap_or_else(|| cb.from.clone());
            let customer = storage.customer_by_phone(&from).await?;
            let agent = match customer.as_ref().and_then(|c| c.assigned_to) {
                Some(id) => Some(storage.get_user(id).await?),
                None => None,
            };
            let comm = storage
                .insert_communication(&NewCommunication {
                    customer_id: customer.as_ref().map(|c| c.id),
                    user_id: agent.as_ref().map(|a| a.id),
                    channel: Channel::Voice,
                    direction: Direction::Inbound,
                    from_number: from,
                    to_number: cb.to.clone(),
                    body: None,
                    provider_id: Some(cb.call_id.clone()),
                    status: "initiated".to_string(),
                    duration_secs: None,
                })
                .await?;

            let reply = match agent.as_ref().and_then(|a| a.phone.clone().map(|p| (a.id, p))) {
                Some((agent_id, phone)) => {
                    notifier.notify(
                        agent_id,
                        "call.inbound",
                        json!({"communication_id": comm.id, "customer_id": comm.customer_id}),
                    );
                    BxmlResponse {
                        transfer: Some(BxmlTransfer {
                            phone_number: phone,
                        }),
                        ..Default::default()
                    }
                }
                None => BxmlResponse {
                    speak_sentence: Some(VOICE_GREETING.to_string()),
                    ..Default::default()
                },
            };
            Ok(Some(reply))
        }
        "answer" => {
            storage
                .update_communication_status(&cb.call_id, "answered", None)
                .await?;
            Ok(None)
        }
        "disconnect" => {
            let (status, duration) = match (cb.answer_time, cb.end_time) {
                (Some(start), Some(end)) => ("completed", Some((end - start).num_seconds().max(0))),
                _ => ("missed", None),
            };
            storage
                .update_communication_status(&cb.call_id, status, duration)
                .await?;
            info!(call_id = %cb.call_id, status, ?duration, cause = ?cb.cause, "call ended");
            Ok(None)
        }
        other => {
            debug!(event = other, "ignoring voice callback");
            Ok(None)
        }
    }
}

pub fn bxml(reply: &BxmlResponse) -> Result<String, CrmError> {
    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>{}"#,
        quick_xml::se::to_string(reply)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewCustomer;
    use crate::service::funnel;
    use chrono::{Duration, Utc};
    use futures::StreamExt;
    use rust_decimal::Decimal;

    fn received(id: &str, from: &str, text: &str) -> MessageCallback {
        serde_json::from_value(json!({
            "type": "message-received",
            "time": "2025-01-01T00:00:00Z",
            "to": "+15550001111",
            "message": {
                "id": id, "from": from, "to": ["+15550001111"],
                "text": text, "direction": "in"
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn inbound_sms_is_matched_and_pushed_to_agent() {
        let storage = CrmStorage::connect("sqlite::memory:").await.unwrap();
        let agent = storage
            .create_user("Jo", "jo@example.com", None, "sales_agent", Decimal::ZERO)
            .await
            .unwrap();
        let customer = funnel::create_lead(
            &storage,
            NewCustomer {
                first_name: "Ada".into(),
                last_name: "Byrne".into(),
                phone: Some("555-123-4567".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        storage.assign_customer(customer.id, agent.id).await.unwrap();

        let notifier = Notifier::new(8);
        let mut stream = Box::pin(notifier.subscribe(agent.id));
        let n = handle_message_callbacks(
            &storage,
            &notifier,
            &[
                received("in-1", "+15551234567", "call me"),
                received("in-2", "+15559990000", "hi"),
            ],
        )
        .await
        .unwrap();
        assert_eq!(n, 2);

        let comms = storage.list_communications(customer.id).await.unwrap();
        assert_eq!(comms.len(), 1);
        assert_eq!(comms[0].direction, Direction::Inbound);
        assert_eq!(comms[0].body.as_deref(), Some("call me"));

        let pushed = stream.next().await.unwrap();
        assert_eq!(pushed.kind, "sms.inbound");
        assert_eq!(pushed.payload["customer_id"], customer.id);
    }

    #[tokio::test]
    async fn replayed_inbound_sms_is_stored_once() {
        let storage = CrmStorage::connect("sqlite::memory:").await.unwrap();
        let customer = funnel::create_lead(
            &storage,
            NewCustomer {
                first_name: "Ada".into(),
                last_name: "Byrne".into(),
                phone: Some("5551234567".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let notifier = Notifier::default();
        let cb = received("in-7", "+15551234567", "call me");

        handle_message_callbacks(&storage, &notifier, &[cb.clone()]).await.unwrap();
        handle_message_callbacks(&storage, &notifier, &[cb.clone(), cb]).await.unwrap();

        let comms = storage.list_communications(customer.id).await.unwrap();
        assert_eq!(comms.len(), 1);
        assert_eq!(comms[0].provider_id.as_deref(), Some("in-7"));
    }

    #[tokio::test]
    async fn voice_lifecycle_updates_one_row() {
        let storage = CrmStorage::connect("sqlite::memory:").await.unwrap();
        let notifier = Notifier::default();
        let start = Utc::now();
        let cb = |event: &str| VoiceCallback {
            event_type: event.to_string(),
            call_id: "c-1".into(),
            from: "+15557654321".into(),
            to: "+15550001111".into(),
            answer_time: Some(start),
            end_time: Some(start + Duration::seconds(95)),
            cause: None,
        };

        let reply = handle_voice_callback(&storage, &notifier, &cb("initiate"))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.speak_sentence.is_some());
        assert!(bxml(&reply).unwrap().contains("<SpeakSentence>"));

        handle_voice_callback(&storage, &notifier, &cb("answer")).await.unwrap();
        handle_voice_callback(&storage, &notifier, &cb("disconnect")).await.unwrap();
        let row = storage.communication_by_provider_id("c-1").await.unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.duration_secs, Some(95));
    }
}
