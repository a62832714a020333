use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use base64::Engine;
use futures::StreamExt;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use settlement_crm::api::Providers;
use settlement_crm::config::Config;
use settlement_crm::db::CrmStorage;
use settlement_crm::service::distro_actor;
use settlement_crm::service::document_store::DocumentStore;
use settlement_crm::service::jobs::{self, JobContext};
use settlement_crm::service::notify::Notifier;
use settlement_crm::{CrmState, crm_router};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ADMIN_KEY: &str = "admin-secret";

enum Auth<'a> {
    None,
    Admin,
    Token(&'a str),
}

struct TestApp {
    router: Router,
    storage: CrmStorage,
    notifier: Notifier,
    _docs: tempfile::TempDir,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let docs = tempfile::tempdir().expect("tempdir");
        let mut cfg = Config::default();
        cfg.basic.admin_key = ADMIN_KEY.to_string();
        tweak(&mut cfg);

        let storage = CrmStorage::connect("sqlite::memory:").await.expect("db");
        let providers = Providers::new(&cfg).expect("providers");
        let distro = distro_actor::spawn(storage.clone(), cfg.distro.mode)
            .await
            .expect("distro actor");
        let notifier = Notifier::default();
        let jobs = jobs::start(
            JobContext {
                storage: storage.clone(),
                providers: providers.clone(),
                notifier: notifier.clone(),
                distro: distro.clone(),
            },
            2,
        )
        .await
        .expect("job queue");

        let state = CrmState {
            cfg: Arc::new(cfg),
            storage: storage.clone(),
            jobs,
            distro,
            notifier: notifier.clone(),
            providers,
            documents: DocumentStore::local(docs.path()),
        };
        Self {
            router: crm_router(state),
            storage,
            notifier,
            _docs: docs,
        }
    }

    async fn raw(
        &self,
        method: &str,
        uri: &str,
        auth: Auth<'_>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>, Option<String>) {
        let mut req = Request::builder().method(method).uri(uri);
        req = match auth {
            Auth::None => req,
            Auth::Admin => req.header("x-api-key", ADMIN_KEY),
            Auth::Token(t) => req.header("authorization", format!("Bearer {t}")),
        };
        let req = match body {
            Some(v) => req
                .header("content-type", "application/json")
                .body(Body::from(v.to_string())),
            None => req.body(Body::empty()),
        }
        .expect("request");

        let resp = self.router.clone().oneshot(req).await.expect("response");
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        (status, bytes.to_vec(), content_type)
    }

    async fn call(
        &self,
        method: &str,
        uri: &str,
        auth: Auth<'_>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes, _) = self.raw(method, uri, auth, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Create a user through the API and return `(id, token)`.
    async fn user(&self, name: &str, role: &str) -> (i64, String) {
        let (status, body) = self
            .call(
                "POST",
                "/api/v1/users",
                Auth::Admin,
                Some(json!({
                    "name": name,
                    "email": format!("{name}@example.com"),
                    "role": role,
                    "commission_rate": "0.1",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["id"].as_i64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn lead(&self, auth: Auth<'_>, first: &str, phone: Option<&str>) -> Value {
        let (status, body) = self
            .call(
                "POST",
                "/api/v1/leads",
                auth,
                Some(json!({"first_name": first, "last_name": "Tester", "phone": phone, "email": format!("{first}@example.com")})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    async fn wait_job(&self, id: i64) -> Value {
        for _ in 0..100 {
            let (_, job) = self
                .call("GET", &format!("/api/v1/jobs/{id}"), Auth::Admin, None)
                .await;
            if matches!(job["status"].as_str(), Some("succeeded" | "failed")) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {id} did not finish");
    }
}

#[tokio::test]
async fn credentials_are_required_and_checked() {
    let app = TestApp::new().await;

    let (status, body) = app.call("GET", "/health", Auth::None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.call("GET", "/api/v1/customers", Auth::None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _) = app
        .call("GET", "/api/v1/customers", Auth::Token("1.wrong"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, token) = app.user("viewer", "viewer").await;
    let (status, me) = app.call("GET", "/api/v1/me", Auth::Token(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["role"], "viewer");
    assert_eq!(me["permissions"], json!(["customers_read"]));

    let (status, body) = app
        .call("GET", "/api/v1/users", Auth::Token(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) = app
        .call(
            "POST",
            "/api/v1/leads",
            Auth::Token(&token),
            Some(json!({"first_name": "A", "last_name": "B"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn agents_only_see_their_own_customers() {
    let app = TestApp::new().await;
    let (agent_id, token) = app.user("agent", "sales_agent").await;

    let mine = app.lead(Auth::Token(&token), "Mine", Some("(555) 100-2000")).await;
    assert_eq!(mine["assigned_to"], agent_id);
    assert_eq!(mine["phone"], "+15551002000");
    assert_eq!(mine["disposition"], "New Lead");
    let other = app.lead(Auth::Admin, "Other", None).await;

    let (status, page) = app
        .call("GET", "/api/v1/customers", Auth::Token(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["id"], mine["id"]);

    let (_, page) = app.call("GET", "/api/v1/customers", Auth::Admin, None).await;
    assert_eq!(page["total"], 2);

    let (status, _) = app
        .call(
            "GET",
            &format!("/api/v1/customers/{}", other["id"]),
            Auth::Token(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn leads_are_distributed_to_active_agents() {
    let app = TestApp::new().await;
    let (a, _) = app.user("alpha", "sales_agent").await;
    let (b, _) = app.user("beta", "sales_agent").await;
    for id in [a, b] {
        let (status, _) = app
            .call("POST", "/api/v1/agents", Auth::Admin, Some(json!({"user_id": id})))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let mut assigned = Vec::new();
    for name in ["One", "Two", "Three"] {
        let (status, body) = app
            .call(
                "POST",
                "/api/v1/leads?distribute=true",
                Auth::Admin,
                Some(json!({"first_name": name, "last_name": "Lead"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assigned.push(body["assigned_to"].as_i64().unwrap());
    }
    assert_eq!(assigned, vec![a, b, a]);
}

#[tokio::test]
async fn distributing_a_lead_needs_the_distribute_permission() {
    let app = TestApp::new().await;
    let (other, _) = app.user("other", "sales_agent").await;
    let (_, token) = app.user("agent", "sales_agent").await;
    let (status, _) = app
        .call("POST", "/api/v1/agents", Auth::Admin, Some(json!({"user_id": other})))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/leads?distribute=true",
            Auth::Token(&token),
            Some(json!({"first_name": "Pushed", "last_name": "Lead"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (_, page) = app.call("GET", "/api/v1/customers", Auth::Admin, None).await;
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn disposition_changes_only_move_forward() {
    let app = TestApp::new().await;
    let lead = app.lead(Auth::Admin, "Ada", None).await;
    let uri = format!("/api/v1/customers/{}/disposition", lead["id"]);

    let (status, body) = app
        .call("PUT", &uri, Auth::Admin, Some(json!({"disposition": "Active Client"})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, body) = app
        .call("PUT", &uri, Auth::Admin, Some(json!({"disposition": "Credit Report Pulled"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stage"], "candidate");

    let (status, _) = app
        .call("PUT", &uri, Auth::Admin, Some(json!({"disposition": "Contacted"})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // candidates are no longer deletable
    let (status, _) = app
        .call("DELETE", &format!("/api/v1/customers/{}", lead["id"]), Auth::Admin, None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn payment_schedule_spreads_program_cost() {
    let app = TestApp::new().await;
    let lead = app.lead(Auth::Admin, "Ada", None).await;
    let uri = format!("/api/v1/customers/{}/payment-schedule", lead["id"]);

    let (status, _) = app.call("GET", &uri, Auth::Admin, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .call(
            "POST",
            &uri,
            Auth::Admin,
            Some(json!({
                "enrolled_debt": "10000",
                "fee_pct": "0.25",
                "savings_pct": "0.5",
                "term_months": 12,
                "first_payment": "2025-01-31",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let payments = body["payments"].as_array().unwrap();
    assert_eq!(payments.len(), 12);
    assert_eq!(payments[1]["due_date"], "2025-02-28");

    let total: Decimal = payments
        .iter()
        .map(|p| Decimal::from_str(p["amount"].as_str().unwrap()).unwrap())
        .sum();
    assert_eq!(total, Decimal::from(7500));

    let (status, _) = app
        .call(
            "PUT",
            &format!("/api/v1/payments/{}/status", payments[0]["id"]),
            Auth::Admin,
            Some(json!({"status": "cleared"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app
        .call(
            "POST",
            &uri,
            Auth::Admin,
            Some(json!({
                "enrolled_debt": "8000",
                "fee_pct": "0.25",
                "savings_pct": "0.5",
                "term_months": 12,
                "first_payment": "2025-01-31",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    let (_, schedule) = app.call("GET", &uri, Auth::Admin, None).await;
    assert_eq!(schedule["payments"][0]["status"], "cleared");
    assert_eq!(schedule["plan"]["enrolled_debt"], "10000");

    let (status, body) = app
        .call(
            "POST",
            &uri,
            Auth::Admin,
            Some(json!({
                "enrolled_debt": "10000",
                "fee_pct": "0.25",
                "savings_pct": "0.5",
                "term_months": 3,
                "first_payment": "2025-01-31",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn documents_flow_through_review() {
    let app = TestApp::new().await;
    let lead = app.lead(Auth::Admin, "Ada", None).await;
    let content = base64::engine::general_purpose::STANDARD.encode(b"statement body");

    let (status, doc) = app
        .call(
            "POST",
            "/api/v1/docproc",
            Auth::Admin,
            Some(json!({"file_name": "statement.pdf", "content_type": "application/pdf", "content": content})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{doc}");
    assert_eq!(doc["status"], "received");
    let id = doc["id"].as_i64().unwrap();

    let (status, _) = app
        .call(
            "PUT",
            &format!("/api/v1/docproc/{id}/triage"),
            Auth::Admin,
            Some(json!({"doc_type": "bank_statement"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, doc) = app
        .call(
            "PUT",
            &format!("/api/v1/docproc/{id}/triage"),
            Auth::Admin,
            Some(json!({"doc_type": "bank_statement", "customer_id": lead["id"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["status"], "triaged");

    let status_uri = format!("/api/v1/docproc/{id}/status");
    let (status, _) = app
        .call("PUT", &status_uri, Auth::Admin, Some(json!({"status": "completed"})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, doc) = app
        .call("PUT", &status_uri, Auth::Admin, Some(json!({"status": "in_review"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["status"], "in_review");

    let (status, bytes, content_type) = app
        .raw("GET", &format!("/api/v1/docproc/{id}/file"), Auth::Admin, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"statement body");
    assert_eq!(content_type.as_deref(), Some("application/pdf"));
}

#[tokio::test]
async fn lead_import_runs_as_a_job() {
    let app = TestApp::new().await;
    let (status, body) = app
        .call(
            "POST",
            "/api/v1/leads/import",
            Auth::Admin,
            Some(json!({"csv": "first_name,last_name,phone\nAda,Byrne,5551234567\nBo,Chan,\n,Nope,\n"})),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_i64().unwrap();

    let job = app.wait_job(job_id).await;
    assert_eq!(job["status"], "succeeded");
    assert_eq!(job["kind"], "import_leads");

    let (_, page) = app.call("GET", "/api/v1/customers", Auth::Admin, None).await;
    assert_eq!(page["total"], 2);

    let (status, _) = app
        .call(
            "POST",
            "/api/v1/leads/import",
            Auth::Admin,
            Some(json!({"csv": "name\nAda\n"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bandwidth_callbacks_record_communications() {
    let app = TestApp::new().await;
    let lead = app.lead(Auth::Admin, "Ada", Some("5551234567")).await;

    let (status, _) = app
        .call(
            "POST",
            "/webhooks/bandwidth/messaging",
            Auth::None,
            Some(json!([{
                "type": "message-received",
                "time": "2025-01-01T00:00:00Z",
                "to": "+15550001111",
                "message": {"id": "m-1", "from": "+15551234567", "to": ["+15550001111"], "text": "call me"}
            }])),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, comms) = app
        .call(
            "GET",
            &format!("/api/v1/customers/{}/communications", lead["id"]),
            Auth::Admin,
            None,
        )
        .await;
    assert_eq!(comms.as_array().unwrap().len(), 1);
    assert_eq!(comms[0]["direction"], "inbound");
    assert_eq!(comms[0]["body"], "call me");

    let (status, bytes, content_type) = app
        .raw(
            "POST",
            "/webhooks/bandwidth/voice",
            Auth::None,
            Some(json!({
                "eventType": "initiate",
                "callId": "c-1",
                "from": "+15551234567",
                "to": "+15550001111"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/xml"));
    let xml = String::from_utf8(bytes).unwrap();
    assert!(xml.contains("<Response>"), "{xml}");
}

#[tokio::test]
async fn webhooks_check_the_shared_secret() {
    let app = TestApp::with_config(|cfg| cfg.basic.webhook_secret = Some("hook".into())).await;
    let event = json!({"event": "envelope-completed", "data": {"envelopeId": "missing"}});

    let (status, _) = app
        .call("POST", "/webhooks/docusign", Auth::None, Some(event.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/docusign")
        .header("content-type", "application/json")
        .header("x-webhook-secret", "hook")
        .body(Body::from(event.to_string()))
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    // unknown envelopes are acknowledged and ignored
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn mutations_are_audited() {
    let app = TestApp::new().await;
    let lead = app.lead(Auth::Admin, "Ada", None).await;
    let id = lead["id"].as_i64().unwrap();

    let mut entries = Vec::new();
    for _ in 0..100 {
        entries = app.storage.list_audit("customer", id).await.unwrap();
        if !entries.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "create");

    let (status, body) = app
        .call("GET", &format!("/api/v1/audit/customer/{id}"), Auth::Admin, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["action"], "create");
}

#[tokio::test]
async fn notification_stream_pushes_to_its_user() {
    let app = TestApp::new().await;
    let (agent_id, token) = app.user("agent", "sales_agent").await;

    let (status, _) = app
        .call("GET", "/api/v1/notifications/stream", Auth::None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .call("GET", "/api/v1/notifications/stream", Auth::Admin, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .uri(format!("/api/v1/notifications/stream?token={token}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "text/event-stream"
    );

    app.notifier.notify(agent_id + 100, "lead.assigned", json!({"customer_id": 1}));
    app.notifier.notify(agent_id, "sms.inbound", json!({"customer_id": 7}));

    let mut body = resp.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("event within timeout")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    assert!(text.contains("event: sms.inbound"), "{text}");
    assert!(text.contains("\"customer_id\":7"), "{text}");
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let app = TestApp::new().await;
    let oversized = "a".repeat(11 * 1024 * 1024);
    let (status, _) = app
        .call(
            "POST",
            "/api/v1/leads",
            Auth::Admin,
            Some(json!({"first_name": oversized, "last_name": "B"})),
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
