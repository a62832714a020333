//! Persisted background jobs and the worker pipeline that runs them.

use crate::api::Providers;
use crate::db::CrmStorage;
use crate::db::models::JobStatus;
use crate::error::CrmError;
use crate::service::distro_actor::DistroHandle;
use crate::service::notify::Notifier;
use crate::service::rac::Principal;
use crate::service::{bank, comms, credit_report, lead_import};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Attempts before a job is marked failed.
pub const MAX_ATTEMPTS: i64 = 3;
const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    RecordAudit {
        actor_id: Option<i64>,
        entity: String,
        entity_id: i64,
        action: String,
        detail: Value,
    },
    ImportCreditReport {
        customer_id: i64,
    },
    ImportLeads {
        csv: String,
        distribute: bool,
    },
    ValidateBankAccount {
        customer_id: i64,
    },
    SendSms {
        customer_id: Option<i64>,
        user_id: Option<i64>,
        to: String,
        text: String,
    },
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::RecordAudit { .. } => "record_audit",
            JobKind::ImportCreditReport { .. } => "import_credit_report",
            JobKind::ImportLeads { .. } => "import_leads",
            JobKind::ValidateBankAccount { .. } => "validate_bank_account",
            JobKind::SendSms { .. } => "send_sms",
        }
    }
}

/// Everything a job may touch while it runs.
#[derive(Clone)]
pub struct JobContext {
    pub storage: CrmStorage,
    pub providers: Providers,
    pub notifier: Notifier,
    pub distro: DistroHandle,
}

/// Handle for submitting jobs. Every job is written to `jobs` before it is
/// handed to the worker, so a restart picks it up again.
#[derive(Clone)]
pub struct JobQueue {
    storage: CrmStorage,
    tx: mpsc::Sender<i64>,
}

impl JobQueue {
    pub async fn enqueue(&self, job: JobKind) -> Result<i64, CrmError> {
        let payload = serde_json::to_string(&job)?;
        let id = self.storage.insert_job(job.name(), &payload).await?;
        self.tx
            .send(id)
            .await
            .map_err(|e| CrmError::Queue(format!("job worker stopped: {e}")))?;
        debug!(job_id = id, kind = job.name(), "job enqueued");
        Ok(id)
    }

    /// Record an audit entry in the background. Failures are logged only.
    pub async fn audit(
        &self,
        actor: &Principal,
        entity: &str,
        entity_id: i64,
        action: &str,
        detail: Value,
    ) {
        let job = JobKind::RecordAudit {
            actor_id: actor.user_id,
            entity: entity.to_string(),
            entity_id,
            action: action.to_string(),
            detail,
        };
        if let Err(e) = self.enqueue(job).await {
            warn!(entity, entity_id, action, error = %e, "failed to enqueue audit entry");
        }
    }
}

/// Delay before attempt `attempts + 1`.
fn retry_delay(attempts: i64) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempts.clamp(1, 6) as u32))
}

/// Spawn the worker pipeline and re-dispatch jobs a previous process left
/// queued or running.
pub async fn start(ctx: JobContext, concurrency: usize) -> Result<JobQueue, CrmError> {
    let (tx, rx) = mpsc::channel::<i64>(QUEUE_CAPACITY);
    let concurrency = concurrency.max(1);
    let worker_tx = tx.clone();
    let storage = ctx.storage.clone();

    tokio::spawn(async move {
        info!(concurrency, "job pipeline started");
        let mut pipeline = ReceiverStream::new(rx)
            .map(|id| {
                let ctx = ctx.clone();
                let tx = worker_tx.clone();
                async move { run_job(&ctx, &tx, id).await }
            })
            .buffer_unordered(concurrency);
        while pipeline.next().await.is_some() {}
        info!("job pipeline stopped");
    });

    let pending = storage.unfinished_jobs().await?;
    if !pending.is_empty() {
        info!(count = pending.len(), "re-dispatching unfinished jobs");
    }
    let queue = JobQueue { storage, tx };
    for id in pending {
        queue
            .tx
            .send(id)
            .await
            .map_err(|e| CrmError::Queue(format!("job worker stopped: {e}")))?;
    }
    Ok(queue)
}

async fn run_job(ctx: &JobContext, tx: &mpsc::Sender<i64>, id: i64) {
    let current = match ctx.storage.get_job(id).await {
        Ok(job) => job,
        Err(e) => {
            error!(job_id = id, error = %e, "cannot load job");
            return;
        }
    };
    if matches!(current.status, JobStatus::Succeeded | JobStatus::Failed) {
        return;
    }
    if current.attempts >= MAX_ATTEMPTS {
        finish(ctx, id, JobStatus::Failed, current.last_error.as_deref()).await;
        return;
    }
    let record = match ctx.storage.start_job(id).await {
        Ok(job) => job,
        Err(e) => {
            error!(job_id = id, error = %e, "cannot start job");
            return;
        }
    };

    let job: JobKind = match serde_json::from_str(&record.payload) {
        Ok(job) => job,
        Err(e) => {
            finish(ctx, id, JobStatus::Failed, Some(&format!("undecodable payload: {e}"))).await;
            return;
        }
    };

    match execute(ctx, id, &job).await {
        Ok(()) => {
            finish(ctx, id, JobStatus::Succeeded, None).await;
            debug!(job_id = id, kind = job.name(), "job succeeded");
        }
        Err(e) if e.is_retryable() && record.attempts < MAX_ATTEMPTS => {
            let delay = retry_delay(record.attempts);
            warn!(
                job_id = id,
                kind = job.name(),
                attempt = record.attempts,
                error = %e,
                "job failed, retrying after {:?}",
                delay
            );
            finish(ctx, id, JobStatus::Queued, Some(&e.to_string())).await;
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if tx.send(id).await.is_err() {
                    warn!(job_id = id, "job worker stopped before retry");
                }
            });
        }
        Err(e) => {
            error!(job_id = id, kind = job.name(), attempt = record.attempts, error = %e, "job failed");
            finish(ctx, id, JobStatus::Failed, Some(&e.to_string())).await;
        }
    }
}

async fn finish(ctx: &JobContext, id: i64, status: JobStatus, last_error: Option<&str>) {
    if let Err(e) = ctx.storage.finish_job(id, status, last_error).await {
        error!(job_id = id, ?status, error = %e, "cannot record job outcome");
    }
}

async fn execute(ctx: &JobContext, id: i64, job: &JobKind) -> Result<(), CrmError> {
    let storage = &ctx.storage;
    match job {
        JobKind::RecordAudit {
            actor_id,
            entity,
            entity_id,
            action,
            detail,
        } => {
            storage
                .insert_audit(*actor_id, entity, *entity_id, action, detail)
                .await
        }
        JobKind::ImportCreditReport { customer_id } => {
            credit_report::import_report(
                storage,
                &ctx.providers.smart_credit,
                &ctx.notifier,
                *customer_id,
            )
            .await?;
            Ok(())
        }
        JobKind::ImportLeads { csv, distribute } => {
            let distro = distribute.then_some(&ctx.distro);
            let report = lead_import::import_leads(storage, distro, csv).await?;
            storage
                .insert_audit(None, "job", id, "leads.imported", &json!(report))
                .await
        }
        JobKind::ValidateBankAccount { customer_id } => {
            bank::verify(storage, &ctx.providers.datax, *customer_id).await?;
            Ok(())
        }
        JobKind::SendSms {
            customer_id,
            user_id,
            to,
            text,
        } => {
            comms::send_sms(
                storage,
                &ctx.providers.bandwidth,
                *customer_id,
                *user_id,
                to,
                text,
            )
            .await?;
            Ok(())
        }
    }
}
