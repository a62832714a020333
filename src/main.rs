use mimalloc::MiMalloc;
use settlement_crm::api::Providers;
use settlement_crm::config::Config;
use settlement_crm::db::CrmStorage;
use settlement_crm::service::distro_actor;
use settlement_crm::service::document_store::DocumentStore;
use settlement_crm::service::jobs::{self, JobContext};
use settlement_crm::service::notify::Notifier;
use settlement_crm::service::reminders;
use settlement_crm::{CrmState, crm_router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let mut cfg = Config::load()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    if cfg.basic.admin_key.is_empty() {
        cfg.basic.admin_key = uuid::Uuid::new_v4().simple().to_string();
        warn!(
            admin_key = %cfg.basic.admin_key,
            "CRM_BASIC__ADMIN_KEY is not set; generated a key for this run"
        );
    }
    info!(
        database_url = %cfg.basic.database_url,
        proxy = %cfg.basic.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.basic.loglevel,
        distro_mode = ?cfg.distro.mode,
        job_concurrency = cfg.job_concurrency(),
    );

    let storage = CrmStorage::connect(&cfg.basic.database_url).await?;
    let providers = Providers::new(&cfg)?;
    let documents = DocumentStore::from_config(&cfg.storage).await?;
    let distro = distro_actor::spawn(storage.clone(), cfg.distro.mode).await?;
    let notifier = Notifier::default();

    let jobs = jobs::start(
        JobContext {
            storage: storage.clone(),
            providers: providers.clone(),
            notifier: notifier.clone(),
            distro: distro.clone(),
        },
        cfg.job_concurrency(),
    )
    .await?;
    reminders::spawn(storage.clone(), jobs.clone(), cfg.basic.reminder_lead_minutes);

    let addr = cfg.socket_addr()?;
    let state = CrmState {
        cfg: Arc::new(cfg),
        storage,
        jobs,
        distro,
        notifier,
        providers,
        documents,
    };
    let app = crm_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
        })
        .await?;
    Ok(())
}
