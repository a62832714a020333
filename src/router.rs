use crate::api::Providers;
use crate::config::Config;
use crate::db::CrmStorage;
use crate::handlers::{
    self, admin, comms, customers, docproc, finance, notifications, tasks, users, webhooks,
};
use crate::service::distro_actor::DistroHandle;
use crate::service::document_store::DocumentStore;
use crate::service::jobs::JobQueue;
use crate::service::notify::Notifier;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post, put},
};
use std::sync::Arc;

const BODY_LIMIT: usize = 10 * 1024 * 1024;
const DOCUMENT_BODY_LIMIT: usize = 25 * 1024 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct CrmState {
    pub cfg: Arc<Config>,
    pub storage: CrmStorage,
    pub jobs: JobQueue,
    pub distro: DistroHandle,
    pub notifier: Notifier,
    pub providers: Providers,
    pub documents: DocumentStore,
}

pub fn crm_router(state: CrmState) -> Router {
    let docproc_routes = Router::new()
        .route("/docproc", get(docproc::list).post(docproc::upload))
        .route("/docproc/{id}/file", get(docproc::download))
        .route("/docproc/{id}/triage", put(docproc::triage))
        .route("/docproc/{id}/status", put(docproc::set_status))
        .layer(DefaultBodyLimit::max(DOCUMENT_BODY_LIMIT));

    let api = Router::new()
        .route("/users", get(users::list).post(users::create))
        .route("/users/{id}/commissions", get(users::commissions))
        .route("/roles", get(users::roles))
        .route("/agents", post(users::upsert_agent))
        .route("/me", get(users::me))
        .route("/leads", post(customers::create_lead))
        .route("/leads/import", post(customers::import_leads))
        .route("/dispositions", get(customers::dispositions))
        .route("/customers", get(customers::list))
        .route(
            "/customers/{id}",
            get(customers::get)
                .patch(customers::update)
                .delete(customers::delete),
        )
        .route("/customers/{id}/disposition", put(customers::set_disposition))
        .route("/customers/{id}/assign", post(customers::assign))
        .route("/customers/{id}/credit-report", post(finance::start_credit_report))
        .route(
            "/customers/{id}/credit-report/answers",
            post(finance::answer_credit_report),
        )
        .route("/customers/{id}/credit-report/pull", post(finance::pull_credit_report))
        .route(
            "/customers/{id}/debts",
            get(finance::list_debts).post(finance::add_debt),
        )
        .route(
            "/debts/{id}",
            patch(finance::update_debt).delete(finance::delete_debt),
        )
        .route("/customers/{id}/bank-account", post(finance::save_bank_account))
        .route(
            "/customers/{id}/payment-schedule",
            get(finance::payment_schedule).post(finance::create_payment_schedule),
        )
        .route("/payments/{id}/status", put(finance::set_payment_status))
        .route("/customers/{id}/sms", post(comms::send_sms))
        .route("/customers/{id}/communications", get(comms::communications))
        .route("/customers/{id}/contract", post(customers::send_contract))
        .route(
            "/appointments",
            get(comms::list_appointments).post(comms::create_appointment),
        )
        .route("/appointments/{id}", patch(comms::update_appointment))
        .route("/tasks", get(tasks::list).post(tasks::create))
        .route("/tasks/{id}/complete", put(tasks::complete))
        .route("/audit/{entity}/{id}", get(admin::audit))
        .route("/jobs/{id}", get(admin::job))
        .route("/notifications/stream", get(notifications::stream))
        .merge(docproc_routes);

    let hooks = Router::new()
        .route("/bandwidth/messaging", post(webhooks::bandwidth_messaging))
        .route("/bandwidth/voice", post(webhooks::bandwidth_voice))
        .route("/docusign", post(webhooks::docusign));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .nest("/webhooks", hooks)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}
