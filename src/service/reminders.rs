use crate::db::CrmStorage;
use crate::db::models::Appointment;
use crate::error::CrmError;
use crate::service::jobs::{JobKind, JobQueue};
use chrono::{Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SWEEP_EVERY: std::time::Duration = std::time::Duration::from_secs(60);

fn reminder_text(agent: &str, starts_at: chrono::DateTime<Utc>) -> String {
    format!(
        "Reminder: your call with {agent} is scheduled for {} UTC.",
        starts_at.format("%b %-d at %H:%M")
    )
}

/// Queue the reminder SMS for one appointment. `false` when the customer has
/// no phone.
async fn remind(storage: &CrmStorage, jobs: &JobQueue, appt: &Appointment) -> Result<bool, CrmError> {
    let customer = storage.get_customer(appt.customer_id).await?;
    let Some(phone) = customer.phone.as_deref() else {
        return Ok(false);
    };
    let agent = storage.get_user(appt.agent_id).await?;
    jobs.enqueue(JobKind::SendSms {
        customer_id: Some(customer.id),
        user_id: Some(agent.id),
        to: phone.to_string(),
        text: reminder_text(&agent.name, appt.starts_at),
    })
    .await?;
    Ok(true)
}

/// Queue an SMS for every appointment starting within `lead_minutes`.
/// Returns how many reminders were queued. Every due appointment is marked
/// reminded, including ones whose reminder could not be queued.
pub async fn sweep_once(
    storage: &CrmStorage,
    jobs: &JobQueue,
    lead_minutes: i64,
) -> Result<usize, CrmError> {
    let due = storage
        .due_reminders(Utc::now() + Duration::minutes(lead_minutes))
        .await?;
    let mut queued = 0;
    for appt in due {
        match remind(storage, jobs, &appt).await {
            Ok(true) => queued += 1,
            Ok(false) => debug!(appointment_id = appt.id, "customer has no phone, reminder skipped"),
            Err(e) => warn!(appointment_id = appt.id, error = %e, "reminder not queued"),
        }
        if let Err(e) = storage.mark_reminded(appt.id).await {
            warn!(appointment_id = appt.id, error = %e, "cannot mark appointment reminded");
        }
    }
    Ok(queued)
}

/// Run [`sweep_once`] every minute until the runtime shuts down.
pub fn spawn(storage: CrmStorage, jobs: JobQueue, lead_minutes: i64) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(lead_minutes, "appointment reminder sweeper started");
        let mut ticker = tokio::time::interval(SWEEP_EVERY);
        loop {
            ticker.tick().await;
            match sweep_once(&storage, &jobs, lead_minutes).await {
                Ok(0) => {}
                Ok(n) => info!(queued = n, "appointment reminders queued"),
                Err(e) => warn!(error = %e, "reminder sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Providers;
    use crate::config::Config;
    use crate::db::models::NewCustomer;
    use crate::service::jobs::{self, JobContext};
    use crate::service::lead_distro::DistroMode;
    use crate::service::notify::Notifier;
    use crate::service::{distro_actor, funnel};
    use rust_decimal::Decimal;

    async fn setup() -> (CrmStorage, JobQueue, i64, i64) {
        let storage = CrmStorage::connect("sqlite::memory:").await.unwrap();
        let mut cfg = Config::default();
        // nothing listens here; queued sms jobs fail without leaving the host
        cfg.bandwidth.base_url = "http://127.0.0.1:9/".to_string();
        let ctx = JobContext {
            storage: storage.clone(),
            providers: Providers::new(&cfg).unwrap(),
            notifier: Notifier::default(),
            distro: distro_actor::spawn(storage.clone(), DistroMode::RoundRobin)
                .await
                .unwrap(),
        };
        let queue = jobs::start(ctx, 1).await.unwrap();

        let agent = storage
            .create_user("Jo", "jo@example.com", None, "sales_agent", Decimal::ZERO)
            .await
            .unwrap();
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
        (storage, queue, agent.id, customer.id)
    }

    async fn book(storage: &CrmStorage, customer_id: i64, agent_id: i64, in_minutes: i64) -> Appointment {
        storage
            .insert_appointment_if_free(
                customer_id,
                agent_id,
                Utc::now() + Duration::minutes(in_minutes),
                None,
                Duration::minutes(30),
            )
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn due_appointments_are_reminded_once() {
        let (storage, queue, agent_id, customer_id) = setup().await;
        let soon = book(&storage, customer_id, agent_id, 20).await;
        book(&storage, customer_id, agent_id, 300).await;

        assert_eq!(sweep_once(&storage, &queue, 60).await.unwrap(), 1);
        assert!(storage.get_appointment(soon.id).await.unwrap().reminded);
        assert_eq!(sweep_once(&storage, &queue, 60).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn a_broken_appointment_does_not_block_later_ones() {
        let (storage, queue, agent_id, customer_id) = setup().await;
        // an appointment whose agent row is gone
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(storage.pool())
            .await
            .unwrap();
        let broken = book(&storage, customer_id, 999, 10).await;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(storage.pool())
            .await
            .unwrap();
        let good = book(&storage, customer_id, agent_id, 20).await;

        assert_eq!(sweep_once(&storage, &queue, 60).await.unwrap(), 1);
        assert!(storage.get_appointment(broken.id).await.unwrap().reminded);
        assert!(storage.get_appointment(good.id).await.unwrap().reminded);
        assert_eq!(sweep_once(&storage, &queue, 60).await.unwrap(), 0);
    }

    #[test]
    fn text_names_agent_and_time() {
        let at = chrono::DateTime::parse_from_rfc3339("2025-03-04T15:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            reminder_text("Jo", at),
            "Reminder: your call with Jo is scheduled for Mar 4 at 15:30 UTC."
        );
    }
}
