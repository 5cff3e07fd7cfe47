//! Collaborator HTTP clients exercised against mock servers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use fleet_orchestrator::AgentStarter;
use fleet_orchestrator::RoomDescriptor;
use fleet_orchestrator::client::DailyRoomsClient;
use fleet_orchestrator::client::PipecatCloudClient;
use fleet_orchestrator::create_rooms;
use fleet_orchestrator::error::ProvisionError;
use fleet_orchestrator::error::StartAgentError;
use fleet_orchestrator::error::VerifyError;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::Request;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_partial_json;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

/// Answers a batch request with one room per requested name.
fn echo_rooms(request: &Request) -> ResponseTemplate {
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    let data: Vec<Value> = body["rooms"]
        .as_array()
        .unwrap()
        .iter()
        .map(|room| {
            let name = room["name"].as_str().unwrap();
            json!({
                "name": name,
                "url": format!("https://example.daily.co/{name}"),
                "config": { "exp": room["properties"]["exp"] },
            })
        })
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
}

fn room(name: &str) -> RoomDescriptor {
    RoomDescriptor {
        name: name.to_string(),
        url: format!("https://example.daily.co/{name}"),
        token: None,
        expires_at: Utc::now(),
    }
}

#[tokio::test]
async fn batch_create_sends_one_request_for_all_rooms() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch/rooms"))
        .and(header("authorization", "Bearer daily-key"))
        .respond_with(echo_rooms)
        .expect(1)
        .mount(&server)
        .await;

    let client = DailyRoomsClient::new(server.uri(), "daily-key");
    let rooms = create_rooms(&client, 250, "load", Duration::from_secs(180))
        .await
        .unwrap();

    assert_eq!(rooms.len(), 250);
    assert_eq!(rooms[0].name, "load-0");
    assert_eq!(rooms[249].name, "load-249");
    let unique: HashSet<&str> = rooms.iter().map(|room| room.name.as_str()).collect();
    assert_eq!(unique.len(), 250);
    assert!(rooms[0].expires_at > Utc::now());

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let exp = body["rooms"][0]["properties"]["exp"].as_i64().unwrap();
    let ttl = exp - Utc::now().timestamp();
    assert!((170..=181).contains(&ttl), "ttl {ttl}");
}

#[tokio::test]
async fn batch_create_error_status_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch/rooms"))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"error\":\"invalid-request-error\"}"))
        .expect(1)
        .mount(&server)
        .await;

    let client = DailyRoomsClient::new(server.uri(), "daily-key");
    let err = create_rooms(&client, 3, "load", Duration::from_secs(180))
        .await
        .unwrap_err();

    match err {
        ProvisionError::Status { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid-request-error"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn batch_create_short_response_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch/rooms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "name": "load-0", "url": "https://example.daily.co/load-0" }]
        })))
        .mount(&server)
        .await;

    let client = DailyRoomsClient::new(server.uri(), "daily-key");
    let err = create_rooms(&client, 2, "load", Duration::from_secs(180))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::CountMismatch {
            requested: 2,
            returned: 1
        }
    ));
}

#[tokio::test]
async fn start_agent_posts_room_url_and_reads_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/public/voice-bot/start"))
        .and(header("authorization", "Bearer public-key"))
        .and(body_partial_json(json!({
            "createDailyRoom": false,
            "transport": "daily",
            "dailyRoomUrl": "https://example.daily.co/load-0",
            "body": { "dailyRoomUrl": "https://example.daily.co/load-0" },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sessionId": "abc-123" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = PipecatCloudClient::new(server.uri(), "public-key");
    let started = client.start_agent(&room("load-0"), "voice-bot").await.unwrap();
    assert_eq!(started.session_id.as_deref(), Some("abc-123"));
}

#[tokio::test]
async fn start_agent_passes_room_token_when_present() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/public/voice-bot/start"))
        .and(body_partial_json(json!({
            "body": { "dailyRoomToken": "meeting-token" },
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut private_room = room("load-1");
    private_room.token = Some("meeting-token".to_string());
    let client = PipecatCloudClient::new(server.uri(), "public-key");
    let started = client.start_agent(&private_room, "voice-bot").await.unwrap();
    assert_eq!(started.session_id, None);
}

#[tokio::test]
async fn start_agent_classifies_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/public/throttled/start"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/public/missing/start"))
        .respond_with(ResponseTemplate::new(404).set_body_string("agent\nnot found"))
        .mount(&server)
        .await;

    let client = PipecatCloudClient::new(server.uri(), "public-key");
    let throttled = client.start_agent(&room("a"), "throttled").await.unwrap_err();
    assert_eq!(
        throttled,
        StartAgentError::RateLimited {
            retry_after: Some(Duration::from_secs(3))
        }
    );

    let missing = client.start_agent(&room("a"), "missing").await.unwrap_err();
    assert_eq!(
        missing,
        StartAgentError::Permanent {
            status: 404,
            body: "agent not found".to_string()
        }
    );
}

#[tokio::test]
async fn start_agent_connection_failure_is_transient() {
    // Reserve a free port, then release it so nothing is listening there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = PipecatCloudClient::new(format!("http://127.0.0.1:{port}"), "public-key");
    let err = client.start_agent(&room("a"), "voice-bot").await.unwrap_err();
    assert!(matches!(err, StartAgentError::Transient(_)), "{err:?}");
}

#[tokio::test]
async fn verification_counts_active_sessions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/agents/voice-bot/sessions"))
        .and(header("authorization", "Bearer private-key"))
        .and(query_param("status", "active"))
        .and(query_param("limit", "110"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 9,
            "sessions": [
                { "coldStart": true },
                { "coldStart": false },
                {},
            ],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = PipecatCloudClient::new(server.uri(), "public-key")
        .with_private_key(Some("private-key".to_string()));
    let report = client
        .verify_active_sessions("voice-bot", 10)
        .await
        .unwrap()
        .expect("private key configured");

    assert_eq!(report.active, 9);
    assert_eq!((report.cold_starts, report.warm_starts), (1, 2));
    assert!(!report.verified());
}

#[tokio::test]
async fn verification_needs_private_key() {
    let server = MockServer::start().await;
    let client = PipecatCloudClient::new(server.uri(), "public-key").with_private_key(None);
    assert!(!client.can_verify());
    assert!(client.verify_active_sessions("voice-bot", 10).await.unwrap().is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn verification_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/agents/voice-bot/sessions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let client = PipecatCloudClient::new(server.uri(), "public-key")
        .with_private_key(Some("wrong".to_string()));
    let err = client
        .verify_active_sessions("voice-bot", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::Status { status: 401, .. }));
}
