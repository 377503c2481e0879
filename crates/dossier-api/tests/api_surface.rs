use axum_test::TestServer;
use dossier_api::{router, AppState, MemoryInvestigationStore};
use dossier_connectors::{CannedResponse, ConnectorRegistry, MockConnector};
use dossier_core::{EntityType, MediaType, Settings};
use dossier_pipeline::PipelineContext;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn test_server() -> TestServer {
    let registry = ConnectorRegistry::new();
    registry.register(Arc::new(
        MockConnector::new("domain_registry")
            .with_entity_types([EntityType::Domain, EntityType::Person])
            .with_base_confidence(0.95)
            .respond_when(
                "aroe.example",
                CannedResponse::single(
                    "https://rdap.example/domain/aroe.example",
                    "Registration record for aroe.example",
                    r#"{"domain": "aroe.example", "registrants": ["Alice Roe"]}"#,
                    MediaType::Json,
                ),
            ),
    ));
    let store = Arc::new(MemoryInvestigationStore::new());
    let ctx = Arc::new(PipelineContext::new(
        Settings::default(),
        Arc::new(registry),
        store,
    ));
    TestServer::new(router(AppState::new(ctx))).expect("server builds")
}

fn seed_body() -> Value {
    json!({
        "subject_identifiers": {
            "full_name": "Alice Roe",
            "known_domains": ["aroe.example"]
        },
        "constraints": { "max_search_depth": 1 }
    })
}

#[tokio::test]
async fn test_health() {
    let server = test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "ok");
}

#[tokio::test]
async fn test_submit_and_poll_to_completion() {
    let server = test_server();

    let response = server.post("/investigations").json(&seed_body()).await;
    assert_eq!(response.status_code(), 202);
    let body: Value = response.json();
    let id = body["investigation_id"].as_str().unwrap().to_string();

    // poll until terminal
    let mut status = String::new();
    for _ in 0..100 {
        let response = server.get(&format!("/investigations/{}", id)).await;
        response.assert_status_ok();
        status = response.json::<Value>()["status"]
            .as_str()
            .unwrap()
            .to_string();
        if status == "completed" || status == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, "completed");

    let response = server.get(&format!("/investigations/{}/report", id)).await;
    response.assert_status_ok();
    let report: Value = response.json();
    assert_eq!(report["subject_name"], "Alice Roe");
    assert!(report["risk"]["overall"].is_number());
}

#[tokio::test]
async fn test_submit_rejects_invalid_seed() {
    let server = test_server();

    let response = server
        .post("/investigations")
        .json(&json!({
            "subject_identifiers": { "full_name": "" }
        }))
        .await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .post("/investigations")
        .json(&json!({
            "subject_identifiers": {
                "full_name": "Alice Roe",
                "emails": ["not-an-email"]
            }
        }))
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(response.json::<Value>()["kind"], "validation");
}

#[tokio::test]
async fn test_report_not_ready_then_not_found() {
    let server = test_server();

    // unknown id
    let response = server
        .get("/investigations/00000000-0000-0000-0000-000000000000/report")
        .await;
    assert_eq!(response.status_code(), 404);

    // submitted but (very likely) still running: not_ready maps to 409
    let response = server.post("/investigations").json(&seed_body()).await;
    let id = response.json::<Value>()["investigation_id"]
        .as_str()
        .unwrap()
        .to_string();
    let response = server.get(&format!("/investigations/{}/report", id)).await;
    assert!(
        response.status_code() == 409 || response.status_code() == 200,
        "got {}",
        response.status_code()
    );
}

#[tokio::test]
async fn test_cancel_endpoint() {
    let server = test_server();

    let response = server.post("/investigations").json(&seed_body()).await;
    let id = response.json::<Value>()["investigation_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = server
        .post(&format!("/investigations/{}/cancel", id))
        .await;
    assert_eq!(response.status_code(), 202);

    let response = server
        .post("/investigations/00000000-0000-0000-0000-000000000000/cancel")
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_connector_listing() {
    let server = test_server();
    let response = server.get("/connectors").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["connectors"][0]["source_name"], "domain_registry");
}
