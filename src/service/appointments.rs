use crate::db::CrmStorage;
use crate::db::models::{Appointment, AppointmentStatus};
use crate::error::CrmError;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Length of the slot an appointment occupies on the agent's calendar.
pub const SLOT_MINUTES: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct NewAppointment {
    pub customer_id: i64,
    /// Defaults to the customer's assigned agent.
    #[serde(default)]
    pub agent_id: Option<i64>,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentPatch {
    pub starts_at: Option<DateTime<Utc>>,
    pub status: Option<AppointmentStatus>,
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentQuery {
    pub agent_id: Option<i64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

fn overlaps(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_minutes().abs() < SLOT_MINUTES
}

fn slot() -> Duration {
    Duration::minutes(SLOT_MINUTES)
}

/// Build the `Conflict` for a booking the storage layer refused, naming the
/// clashing appointment when it is still there.
async fn slot_taken(
    storage: &CrmStorage,
    agent_id: i64,
    starts_at: DateTime<Utc>,
    ignore: Option<i64>,
) -> Result<CrmError, CrmError> {
    let taken = storage
        .scheduled_for_agent(agent_id, starts_at - slot(), starts_at + slot())
        .await?;
    Ok(
        match taken
            .iter()
            .find(|a| Some(a.id) != ignore && overlaps(a.starts_at, starts_at))
        {
            Some(clash) => CrmError::Conflict(format!(
                "agent {agent_id} already has appointment {} at {}",
                clash.id, clash.starts_at
            )),
            None => CrmError::Conflict(format!(
                "agent {agent_id} is not free at {starts_at}"
            )),
        },
    )
}

fn closed(current: AppointmentStatus, to: Option<AppointmentStatus>) -> CrmError {
    CrmError::InvalidTransition {
        from: format!("{current:?}").to_lowercase(),
        to: format!("{:?}", to.unwrap_or(current)).to_lowercase(),
    }
}

pub async fn create(storage: &CrmStorage, req: NewAppointment) -> Result<Appointment, CrmError> {
    let customer = storage.get_customer(req.customer_id).await?;
    let agent_id = req
        .agent_id
        .or(customer.assigned_to)
        .ok_or_else(|| CrmError::BadRequest("agent_id is required for unassigned customers".to_string()))?;
    storage.get_user(agent_id).await?;
    if req.starts_at <= Utc::now() {
        return Err(CrmError::BadRequest(
            "appointments must start in the future".to_string(),
        ));
    }
    match storage
        .insert_appointment_if_free(
            customer.id,
            agent_id,
            req.starts_at,
            req.summary.as_deref(),
            slot(),
        )
        .await?
    {
        Some(appointment) => Ok(appointment),
        None => Err(slot_taken(storage, agent_id, req.starts_at, None).await?),
    }
}

/// Only scheduled appointments change; rescheduling rechecks the slot.
pub async fn update(
    storage: &CrmStorage,
    current: &Appointment,
    patch: &AppointmentPatch,
) -> Result<Appointment, CrmError> {
    if current.status != AppointmentStatus::Scheduled {
        return Err(closed(current.status, patch.status));
    }
    let applied = match patch.starts_at {
        Some(starts_at) => {
            if patch.status.is_some_and(|s| s != AppointmentStatus::Scheduled) {
                return Err(CrmError::BadRequest(
                    "a reschedule keeps the appointment scheduled".to_string(),
                ));
            }
            storage
                .reschedule_appointment_if_free(current.id, starts_at, patch.summary.as_deref(), slot())
                .await?
        }
        None => {
            storage
                .update_appointment(current.id, patch.status, patch.summary.as_deref())
                .await?
        }
    };
    let latest = storage.get_appointment(current.id).await?;
    if applied {
        return Ok(latest);
    }
    if latest.status != AppointmentStatus::Scheduled {
        return Err(closed(latest.status, patch.status));
    }
    match patch.starts_at {
        Some(starts_at) => Err(slot_taken(storage, latest.agent_id, starts_at, Some(latest.id)).await?),
        None => Ok(latest),
    }
}

/// Defaults to the next seven days.
pub async fn list(
    storage: &CrmStorage,
    agent_id: Option<i64>,
    query: &AppointmentQuery,
) -> Result<Vec<Appointment>, CrmError> {
    let from = query.from.unwrap_or_else(Utc::now);
    let to = query.to.unwrap_or(from + Duration::days(7));
    if to <= from {
        return Err(CrmError::BadRequest("`to` must be after `from`".to_string()));
    }
    storage.list_appointments(agent_id, from, to).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewCustomer;
    use crate::service::funnel;
    use rust_decimal::Decimal;

    async fn seed(storage: &CrmStorage) -> (i64, i64) {
        let agent = storage
            .create_user("Jo", "jo@example.com", None, "sales_agent", Decimal::ZERO)
            .await
            .unwrap();
        let customer = funnel::create_lead(
            storage,
            NewCustomer {
                first_name: "Ada".into(),
                last_name: "Byrne".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        storage.assign_customer(customer.id, agent.id).await.unwrap();
        (customer.id, agent.id)
    }

    async fn fixture() -> (CrmStorage, i64, i64) {
        let storage = CrmStorage::connect("sqlite::memory:").await.unwrap();
        let (customer_id, agent_id) = seed(&storage).await;
        (storage, customer_id, agent_id)
    }

    #[test]
    fn slots_overlap_within_thirty_minutes() {
        let t = Utc::now();
        assert!(overlaps(t, t + Duration::minutes(29)));
        assert!(!overlaps(t, t + Duration::minutes(30)));
        assert!(overlaps(t + Duration::minutes(10), t));
    }

    #[tokio::test]
    async fn double_booking_is_a_conflict() {
        let (storage, customer_id, _) = fixture().await;
        let at = Utc::now() + Duration::days(1);
        let req = |starts_at| NewAppointment {
            customer_id,
            agent_id: None,
            starts_at,
            summary: None,
        };
        let first = create(&storage, req(at)).await.unwrap();
        let err = create(&storage, req(at + Duration::minutes(15))).await.unwrap_err();
        assert!(matches!(err, CrmError::Conflict(_)));
        create(&storage, req(at + Duration::minutes(30))).await.unwrap();

        // moving within its own slot is fine
        let moved = update(
            &storage,
            &first,
            &AppointmentPatch {
                starts_at: Some(at - Duration::minutes(5)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(moved.starts_at, at - Duration::minutes(5));

        let err = update(
            &storage,
            &moved,
            &AppointmentPatch {
                starts_at: Some(at + Duration::minutes(40)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CrmError::Conflict(_)));
        let kept = storage.get_appointment(first.id).await.unwrap();
        assert_eq!(kept.starts_at, at - Duration::minutes(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bookings_never_share_a_slot() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("crm.db").display());
        let storage = CrmStorage::connect(&url).await.unwrap();
        let (customer_id, _) = seed(&storage).await;
        let req = |starts_at| NewAppointment {
            customer_id,
            agent_id: None,
            starts_at,
            summary: None,
        };

        for day in 1..=10 {
            let at = Utc::now() + Duration::days(day);
            let (a, b) = tokio::join!(
                create(&storage, req(at)),
                create(&storage, req(at + Duration::minutes(5)))
            );
            match (a, b) {
                (Ok(_), Err(CrmError::Conflict(_))) | (Err(CrmError::Conflict(_)), Ok(_)) => {}
                other => panic!("day {day}: expected exactly one booking, got {other:?}"),
            }
        }
        let booked = storage
            .list_appointments(None, Utc::now(), Utc::now() + Duration::days(12))
            .await
            .unwrap();
        assert_eq!(booked.len(), 10);
    }

    #[tokio::test]
    async fn closed_appointments_are_final() {
        let (storage, customer_id, _) = fixture().await;
        let appt = create(
            &storage,
            NewAppointment {
                customer_id,
                agent_id: None,
                starts_at: Utc::now() + Duration::hours(3),
                summary: Some("intake call".into()),
            },
        )
        .await
        .unwrap();
        let done = update(
            &storage,
            &appt,
            &AppointmentPatch {
                status: Some(AppointmentStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let err = update(
            &storage,
            &done,
            &AppointmentPatch {
                status: Some(AppointmentStatus::Scheduled),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CrmError::InvalidTransition { .. }));
    }
}
