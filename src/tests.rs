//! Integration tests for the SiteScribe backend.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::advisor::DisabledAdvisor;
use crate::config::{AdvisorConfig, Config};
use crate::db::{init_database, Repository};
use crate::editing::{Debouncer, SessionRegistry};
use crate::sync::{LocalMirror, MirrorSubscription};
use crate::{create_router, AppState};

const DEBOUNCE: Duration = Duration::from_millis(50);

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _subscription: MirrorSubscription,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        let (mirror, subscription) = LocalMirror::start(repo.clone());
        assert!(mirror.wait_for_revision(0, Duration::from_secs(5)).await);

        // Create config
        let config = Config {
            db_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            allowance_debounce: DEBOUNCE,
            session_idle_timeout: Duration::from_secs(60),
            mark_sundays: false,
            advisor: AdvisorConfig::default(),
        };

        let state = AppState {
            repo,
            mirror,
            sessions: Arc::new(SessionRegistry::new(config.session_idle_timeout)),
            allowance_debouncer: Arc::new(Debouncer::new(DEBOUNCE)),
            advisor: Arc::new(DisabledAdvisor),
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        TestFixture {
            client: Client::new(),
            base_url,
            _subscription: subscription,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .request(method, self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn create_employee(&self, name: &str) -> String {
        let (status, body) = self
            .send(
                reqwest::Method::POST,
                "/api/employees",
                json!({ "name": name, "phone": "0771234567" }),
            )
            .await;
        assert_eq!(status, 200, "{}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn open_session(&self, date: &str) -> String {
        let (status, body) = self
            .send(reqwest::Method::POST, "/api/sessions", json!({ "date": date }))
            .await;
        assert_eq!(status, 200, "{}", body);
        body["data"]["sessionId"].as_str().unwrap().to_string()
    }

    async fn mark(&self, session: &str, employee_id: &str, status: &str) -> Value {
        let (code, body) = self
            .send(
                reqwest::Method::POST,
                &format!("/api/sessions/{}/status", session),
                json!({ "employeeId": employee_id, "status": status }),
            )
            .await;
        assert_eq!(code, 200, "{}", body);
        body
    }

    async fn commit(&self, session: &str) -> Value {
        let (code, body) = self
            .send(
                reqwest::Method::POST,
                &format!("/api/sessions/{}/commit", session),
                json!({}),
            )
            .await;
        assert_eq!(code, 200, "{}", body);
        body
    }
}

fn entry<'a>(view: &'a Value, employee_id: &str) -> &'a Value {
    view["entries"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["employeeId"] == employee_id)
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_datastore_get() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.get("/api/datastore").await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["initialized"], true);
    assert!(body["data"]["employees"].as_array().unwrap().is_empty());

    let (status, body) = fixture.get("/api/datastore/revision").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["revisionId"], 0);
}

#[tokio::test]
async fn test_employee_crud() {
    let fixture = TestFixture::new().await;

    let id = fixture.create_employee("Amara Perera").await;
    fixture.create_employee("Kamal Silva").await;

    // Writes are visible through the mirror straight away
    let (_, body) = fixture.get("/api/datastore").await;
    assert_eq!(body["data"]["employees"].as_array().unwrap().len(), 2);
    assert_eq!(body["revisionId"], 2);

    let (status, body) = fixture.get("/api/employees?search=amara").await;
    assert_eq!(status, 200);
    let found = body["data"].as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["name"], "Amara Perera");

    let (status, body) = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/employees/{}", id),
            json!({ "dailyAllowance": 1500 }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["dailyAllowance"], 1500);
    assert_eq!(body["data"]["phone"], "0771234567");

    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/employees/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let (status, body) = fixture.get(&format!("/api/employees/{}", id)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_employee_validation_errors() {
    let fixture = TestFixture::new().await;

    for payload in [
        json!({ "name": "A" }),
        json!({ "name": "Amara", "age": 0 }),
        json!({ "name": "Amara", "dailyAllowance": -1 }),
    ] {
        let (status, body) = fixture
            .send(reqwest::Method::POST, "/api/employees", payload)
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn test_edit_then_commit_day() {
    let fixture = TestFixture::new().await;
    let amara = fixture.create_employee("Amara").await;
    let kamal = fixture.create_employee("Kamal").await;

    let session = fixture.open_session("2024-03-02").await;
    fixture.mark(&session, &amara, "present").await;
    let body = fixture.mark(&session, &kamal, "half-day").await;

    let view = &body["data"]["session"];
    assert_eq!(view["pendingChanges"], 2);
    assert_eq!(view["totalAllowance"], 2000);
    assert_eq!(entry(view, &kamal)["status"], "half-day");
    assert_eq!(entry(view, &kamal)["allowanceEditable"], true);

    // Nothing is committed yet
    let (_, committed) = fixture.get("/api/attendance/2024-03-02").await;
    assert_eq!(entry(&committed["data"], &amara)["status"], Value::Null);

    let body = fixture.commit(&session).await;
    assert_eq!(body["data"]["upserted"], 2);
    assert_eq!(body["data"]["session"]["pendingChanges"], 0);
    let revision = body["revisionId"].as_i64().unwrap();

    let (_, committed) = fixture.get("/api/attendance/2024-03-02").await;
    assert_eq!(committed["revisionId"].as_i64().unwrap(), revision);
    assert_eq!(entry(&committed["data"], &amara)["status"], "present");
    assert_eq!(entry(&committed["data"], &kamal)["status"], "half-day");
    assert_eq!(committed["data"]["totalAllowance"], 2000);

    // Committing an empty overlay is a no-op
    let body = fixture.commit(&session).await;
    assert_eq!(body["revisionId"].as_i64().unwrap(), revision);
}

#[tokio::test]
async fn test_unmarking_committed_status_deletes_record() {
    let fixture = TestFixture::new().await;
    let amara = fixture.create_employee("Amara").await;

    let session = fixture.open_session("2024-03-02").await;
    fixture.mark(&session, &amara, "absent").await;
    fixture.commit(&session).await;

    let body = fixture.mark(&session, &amara, "absent").await;
    assert_eq!(body["data"]["record"]["status"], Value::Null);
    assert_eq!(body["data"]["session"]["pending"][0]["status"], "cleared");

    let body = fixture.commit(&session).await;
    assert_eq!(body["data"]["deleted"], 1);

    let (_, store) = fixture.get("/api/datastore").await;
    assert!(store["data"]["attendance"]
        .as_object()
        .unwrap()
        .get("2024-03-02")
        .is_none());
}

#[tokio::test]
async fn test_date_change_discards_pending_edits() {
    let fixture = TestFixture::new().await;
    let amara = fixture.create_employee("Amara").await;

    let session = fixture.open_session("2024-03-02").await;
    fixture.mark(&session, &amara, "present").await;

    let (status, body) = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/sessions/{}/date", session),
            json!({ "date": "2024-03-03" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["date"], "2024-03-03");
    assert_eq!(body["data"]["pendingChanges"], 0);

    let (status, body) = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/sessions/{}/date", session),
            json!({ "date": "2999-01-01" }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_allowance_edit_on_committed_day_is_written_through() {
    let fixture = TestFixture::new().await;
    let amara = fixture.create_employee("Amara").await;

    let session = fixture.open_session("2024-03-02").await;
    fixture.mark(&session, &amara, "present").await;
    fixture.commit(&session).await;

    for amount in [1100, 1200, 1300] {
        let (status, body) = fixture
            .send(
                reqwest::Method::PUT,
                &format!("/api/sessions/{}/allowance", session),
                json!({ "employeeId": amara, "allowance": amount }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["record"]["allowance"], amount);
    }

    tokio::time::sleep(DEBOUNCE * 10).await;

    let (_, committed) = fixture.get("/api/attendance/2024-03-02").await;
    assert_eq!(entry(&committed["data"], &amara)["allowance"], 1300);
    assert_eq!(committed["data"]["totalAllowance"], 1300);
}

#[tokio::test]
async fn test_allowance_edit_on_unmarked_day_waits_for_commit() {
    let fixture = TestFixture::new().await;
    let amara = fixture.create_employee("Amara").await;

    let session = fixture.open_session("2024-03-02").await;
    fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/sessions/{}/allowance", session),
            json!({ "employeeId": amara, "allowance": 800 }),
        )
        .await;
    tokio::time::sleep(DEBOUNCE * 10).await;

    let (_, store) = fixture.get("/api/datastore").await;
    assert!(store["data"]["attendance"].as_object().unwrap().is_empty());

    fixture.mark(&session, &amara, "present").await;
    fixture.commit(&session).await;

    let (_, committed) = fixture.get("/api/attendance/2024-03-02").await;
    assert_eq!(entry(&committed["data"], &amara)["allowance"], 800);
}

#[tokio::test]
async fn test_commit_after_status_change_is_not_overwritten_by_allowance_edit() {
    let fixture = TestFixture::new().await;
    let amara = fixture.create_employee("Amara").await;

    let session = fixture.open_session("2024-03-02").await;
    fixture.mark(&session, &amara, "present").await;
    fixture.commit(&session).await;

    let (status, _) = fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/sessions/{}/allowance", session),
            json!({ "employeeId": amara, "allowance": 1300 }),
        )
        .await;
    assert_eq!(status, 200);
    fixture.mark(&session, &amara, "absent").await;
    fixture.commit(&session).await;

    tokio::time::sleep(DEBOUNCE * 10).await;

    let (_, committed) = fixture.get("/api/attendance/2024-03-02").await;
    assert_eq!(entry(&committed["data"], &amara)["status"], "absent");
    assert_eq!(committed["data"]["totalAllowance"], 0);
}

#[tokio::test]
async fn test_discarded_allowance_edit_is_not_written_through() {
    let fixture = TestFixture::new().await;
    let amara = fixture.create_employee("Amara").await;

    let session = fixture.open_session("2024-03-02").await;
    fixture.mark(&session, &amara, "present").await;
    fixture.commit(&session).await;

    fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/sessions/{}/allowance", session),
            json!({ "employeeId": amara, "allowance": 9999 }),
        )
        .await;
    let (status, body) = fixture
        .send(
            reqwest::Method::DELETE,
            &format!("/api/sessions/{}/pending", session),
            json!({}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["pendingChanges"], 0);

    // Same for an edit left behind by a date change
    fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/sessions/{}/allowance", session),
            json!({ "employeeId": amara, "allowance": 7777 }),
        )
        .await;
    fixture
        .send(
            reqwest::Method::PUT,
            &format!("/api/sessions/{}/date", session),
            json!({ "date": "2024-03-01" }),
        )
        .await;

    tokio::time::sleep(DEBOUNCE * 10).await;

    let (_, committed) = fixture.get("/api/attendance/2024-03-02").await;
    assert_eq!(entry(&committed["data"], &amara)["allowance"], 1000);
}

#[tokio::test]
async fn test_commit_skips_employee_deleted_after_edit() {
    let fixture = TestFixture::new().await;
    let amara = fixture.create_employee("Amara").await;
    let kamal = fixture.create_employee("Kamal").await;

    let session = fixture.open_session("2024-03-02").await;
    fixture.mark(&session, &amara, "present").await;
    fixture.mark(&session, &kamal, "present").await;

    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/employees/{}", kamal)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body = fixture.commit(&session).await;
    assert_eq!(body["data"]["upserted"], 1);
    assert_eq!(body["data"]["session"]["pendingChanges"], 0);

    let (_, committed) = fixture.get("/api/attendance/2024-03-02").await;
    assert_eq!(entry(&committed["data"], &amara)["status"], "present");
    assert_eq!(committed["data"]["totalAllowance"], 1000);
}

#[tokio::test]
async fn test_employee_update_null_clears_optional_fields() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_employee("Amara").await;

    let path = format!("/api/employees/{}", id);
    let (status, body) = fixture
        .send(reqwest::Method::PUT, &path, json!({ "dailyAllowance": 1500 }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["dailyAllowance"], 1500);

    let (status, body) = fixture
        .send(
            reqwest::Method::PUT,
            &path,
            json!({ "dailyAllowance": null, "phone": null }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["dailyAllowance"], Value::Null);
    assert_eq!(body["data"]["phone"], Value::Null);
    assert_eq!(body["data"]["name"], "Amara");
}

#[tokio::test]
async fn test_monthly_report_and_export() {
    let fixture = TestFixture::new().await;
    let amara = fixture.create_employee("Amara").await;
    let kamal = fixture.create_employee("Kamal").await;

    for (date, status) in [
        ("2024-04-01", "present"),
        ("2024-04-02", "present"),
        ("2024-04-03", "half-day"),
    ] {
        let session = fixture.open_session(date).await;
        fixture.mark(&session, &kamal, status).await;
        fixture.commit(&session).await;
    }
    let session = fixture.open_session("2024-01-05").await;
    fixture.mark(&session, &amara, "absent").await;
    fixture.commit(&session).await;

    let (status, body) = fixture.get("/api/reports/months").await;
    assert_eq!(status, 200);
    assert_eq!(
        body["data"],
        json!([
            { "value": "2024-04", "label": "April 2024" },
            { "value": "2024-01", "label": "January 2024" },
        ])
    );

    let (status, body) = fixture.get("/api/reports/2024-04").await;
    assert_eq!(status, 200);
    let employees = body["data"]["employees"].as_array().unwrap();
    let kamal_row = employees.iter().find(|e| e["employeeId"] == kamal).unwrap();
    assert_eq!(kamal_row["present"], 2.5);
    assert_eq!(kamal_row["absent"], 0);
    assert_eq!(kamal_row["allowance"], 3000);
    let amara_row = employees.iter().find(|e| e["employeeId"] == amara).unwrap();
    assert!(amara_row["marks"]
        .as_array()
        .unwrap()
        .iter()
        .all(|m| *m == "-"));

    let (_, body) = fixture
        .get(&format!("/api/employees/{}/summary/2024-04", kamal))
        .await;
    assert_eq!(body["data"]["halfDays"], 1);

    let resp = fixture
        .client
        .get(fixture.url("/api/reports/2024-04/export"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"SiteScribe_Attendance_2024-04.xlsx\""
    );
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(&bytes[..2], b"PK");

    let (status, body) = fixture.get("/api/reports/2024-13").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_integrity_check_degrades_without_advisor() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .send(reqwest::Method::POST, "/api/integrity/2024-03", json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["isConsistent"], false);
    assert_eq!(
        body["data"]["assessment"],
        "An error occurred while assessing data integrity. Please try again."
    );
}

#[tokio::test]
async fn test_not_found_errors() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.get("/api/sessions/nonexistent").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let session = fixture.open_session("2024-03-02").await;
    let (status, _) = fixture
        .send(
            reqwest::Method::POST,
            &format!("/api/sessions/{}/status", session),
            json!({ "employeeId": "ghost", "status": "present" }),
        )
        .await;
    assert_eq!(status, 404);

    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/sessions/{}", session)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let (status, _) = fixture.get(&format!("/api/sessions/{}", session)).await;
    assert_eq!(status, 404);
}
