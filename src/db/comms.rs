use crate::db::models::{
    Appointment, AppointmentStatus, Communication, NewCommunication,
};
use crate::db::sqlite::CrmStorage;
use crate::error::CrmError;
use chrono::{DateTime, Duration, Utc};

const COMM_SELECT: &str = r#"SELECT id, customer_id, user_id, channel, direction, from_number,
    to_number, body, provider_id, status, duration_secs, created_at FROM communications"#;

const APPOINTMENT_SELECT: &str = r#"SELECT id, customer_id, agent_id, starts_at, summary, status,
    reminded, created_at FROM appointments"#;

impl CrmStorage {
    async fn insert_communication_row(
        &self,
        new: &NewCommunication,
        skip_duplicate: bool,
    ) -> Result<Option<Communication>, CrmError> {
        let on_conflict = if skip_duplicate { " ON CONFLICT DO NOTHING" } else { "" };
        let result = sqlx::query(&format!(
            r#"INSERT INTO communications (
                customer_id, user_id, channel, direction, from_number, to_number, body,
                provider_id, status, duration_secs, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?){on_conflict}"#
        ))
        .bind(new.customer_id)
        .bind(new.user_id)
        .bind(new.channel)
        .bind(new.direction)
        .bind(&new.from_number)
        .bind(&new.to_number)
        .bind(&new.body)
        .bind(&new.provider_id)
        .bind(&new.status)
        .bind(new.duration_secs)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(
            sqlx::query_as::<_, Communication>(&format!("{COMM_SELECT} WHERE id = ?"))
                .bind(result.last_insert_rowid())
                .fetch_one(self.pool())
                .await?,
        ))
    }

    pub async fn insert_communication(
        &self,
        new: &NewCommunication,
    ) -> Result<Communication, CrmError> {
        self.insert_communication_row(new, false)
            .await?
            .ok_or_else(|| CrmError::Conflict("communication already recorded".to_string()))
    }

    /// Record an inbound SMS once per provider message id. Returns `None`
    /// for a replayed callback.
    pub async fn insert_inbound_sms(
        &self,
        new: &NewCommunication,
    ) -> Result<Option<Communication>, CrmError> {
        self.insert_communication_row(new, true).await
    }

    pub async fn communication_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<Communication>, CrmError> {
        Ok(sqlx::query_as::<_, Communication>(&format!(
            "{COMM_SELECT} WHERE provider_id = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(provider_id)
        .fetch_optional(self.pool())
        .await?)
    }

    /// Update delivery status (and call duration) of the row tracking `provider_id`.
    /// Returns whether a row matched.
    pub async fn update_communication_status(
        &self,
        provider_id: &str,
        status: &str,
        duration_secs: Option<i64>,
    ) -> Result<bool, CrmError> {
        let result = sqlx::query(
            r#"UPDATE communications SET status = ?, duration_secs = COALESCE(?, duration_secs)
               WHERE provider_id = ?"#,
        )
        .bind(status)
        .bind(duration_secs)
        .bind(provider_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_communications(
        &self,
        customer_id: i64,
    ) -> Result<Vec<Communication>, CrmError> {
        Ok(sqlx::query_as::<_, Communication>(&format!(
            "{COMM_SELECT} WHERE customer_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(customer_id)
        .fetch_all(self.pool())
        .await?)
    }

    /// Insert a scheduled appointment unless `agent_id` already holds a
    /// scheduled one starting less than `slot` away. The check and the insert
    /// are one statement, so concurrent bookings cannot both succeed.
    /// Returns `None` when the slot is taken.
    pub async fn insert_appointment_if_free(
        &self,
        customer_id: i64,
        agent_id: i64,
        starts_at: DateTime<Utc>,
        summary: Option<&str>,
        slot: Duration,
    ) -> Result<Option<Appointment>, CrmError> {
        let result = sqlx::query(
            r#"INSERT INTO appointments (customer_id, agent_id, starts_at, summary, status, reminded, created_at)
               SELECT ?, ?, ?, ?, ?, 0, ?
               WHERE NOT EXISTS (
                   SELECT 1 FROM appointments
                    WHERE agent_id = ? AND status = ? AND starts_at > ? AND starts_at < ?
               )"#,
        )
        .bind(customer_id)
        .bind(agent_id)
        .bind(starts_at)
        .bind(summary)
        .bind(AppointmentStatus::Scheduled)
        .bind(Utc::now())
        .bind(agent_id)
        .bind(AppointmentStatus::Scheduled)
        .bind(starts_at - slot)
        .bind(starts_at + slot)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_appointment(result.last_insert_rowid()).await.map(Some)
    }

    pub async fn get_appointment(&self, id: i64) -> Result<Appointment, CrmError> {
        sqlx::query_as::<_, Appointment>(&format!("{APPOINTMENT_SELECT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| CrmError::NotFound(format!("appointment {id}")))
    }

    /// Appointments in `[from, to)`, optionally for one agent.
    pub async fn list_appointments(
        &self,
        agent_id: Option<i64>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, CrmError> {
        Ok(sqlx::query_as::<_, Appointment>(&format!(
            r#"{APPOINTMENT_SELECT}
               WHERE starts_at >= ? AND starts_at < ? AND (? IS NULL OR agent_id = ?)
               ORDER BY starts_at, id"#
        ))
        .bind(from)
        .bind(to)
        .bind(agent_id)
        .bind(agent_id)
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn scheduled_for_agent(
        &self,
        agent_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, CrmError> {
        Ok(sqlx::query_as::<_, Appointment>(&format!(
            r#"{APPOINTMENT_SELECT}
               WHERE agent_id = ? AND status = ? AND starts_at >= ? AND starts_at < ?
               ORDER BY starts_at"#
        ))
        .bind(agent_id)
        .bind(AppointmentStatus::Scheduled)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?)
    }

    /// Change status or summary of a still scheduled appointment.
    /// Returns `false` when it is no longer scheduled.
    pub async fn update_appointment(
        &self,
        id: i64,
        status: Option<AppointmentStatus>,
        summary: Option<&str>,
    ) -> Result<bool, CrmError> {
        let result = sqlx::query(
            r#"UPDATE appointments SET
                status = COALESCE(?, status),
                summary = COALESCE(?, summary)
              WHERE id = ? AND status = ?"#,
        )
        .bind(status)
        .bind(summary)
        .bind(id)
        .bind(AppointmentStatus::Scheduled)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a scheduled appointment to `starts_at` unless another scheduled
    /// appointment of the same agent starts less than `slot` away. Clears the
    /// reminder flag. Returns `false` when the slot is taken or the
    /// appointment is no longer scheduled.
    pub async fn reschedule_appointment_if_free(
        &self,
        id: i64,
        starts_at: DateTime<Utc>,
        summary: Option<&str>,
        slot: Duration,
    ) -> Result<bool, CrmError> {
        let result = sqlx::query(
            r#"UPDATE appointments SET
                starts_at = ?,
                summary = COALESCE(?, summary),
                reminded = 0
              WHERE id = ? AND status = ?
                AND NOT EXISTS (
                    SELECT 1 FROM appointments other
                     WHERE other.agent_id = appointments.agent_id
                       AND other.id != appointments.id
                       AND other.status = ?
                       AND other.starts_at > ? AND other.starts_at < ?
                )"#,
        )
        .bind(starts_at)
        .bind(summary)
        .bind(id)
        .bind(AppointmentStatus::Scheduled)
        .bind(AppointmentStatus::Scheduled)
        .bind(starts_at - slot)
        .bind(starts_at + slot)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Scheduled appointments starting before `until` that have had no reminder.
    pub async fn due_reminders(&self, until: DateTime<Utc>) -> Result<Vec<Appointment>, CrmError> {
        Ok(sqlx::query_as::<_, Appointment>(&format!(
            r#"{APPOINTMENT_SELECT}
               WHERE status = ? AND reminded = 0 AND starts_at >= ? AND starts_at <= ?
               ORDER BY starts_at"#
        ))
        .bind(AppointmentStatus::Scheduled)
        .bind(Utc::now())
        .bind(until)
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn mark_reminded(&self, id: i64) -> Result<(), CrmError> {
        sqlx::query("UPDATE appointments SET reminded = 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
