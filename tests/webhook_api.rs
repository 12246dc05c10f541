//! Integration tests for the webhook HTTP surface.
//!
//! Each test spins up an Axum server on a random port with an in-memory
//! database and stub outbound services, then exercises the real HTTP
//! contract with reqwest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::time::timeout;

use wa_agent::agent::ReplyAgent;
use wa_agent::arbiter::ControlArbiter;
use wa_agent::dispatch::{Delivery, MessageSender};
use wa_agent::error::{AgentError, DispatchError, MediaError};
use wa_agent::media::{MediaBlob, MediaBridge};
use wa_agent::pipeline::MessagePipeline;
use wa_agent::session::{SessionId, derive_session_id};
use wa_agent::store::{ControlStore, Direction, HistoryStore, LibSqlBackend};
use wa_agent::webhook::{AppState, webhook_routes};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const VERIFY_TOKEN: &str = "secret-token";

/// Records outbound texts instead of calling the platform.
#[derive(Default)]
struct StubSender {
    texts: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MessageSender for StubSender {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<Delivery, DispatchError> {
        self.texts
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(Delivery::default())
    }

    async fn send_audio(
        &self,
        _recipient: &str,
        _audio: Vec<u8>,
        _mime_type: &str,
    ) -> Result<Delivery, DispatchError> {
        unimplemented!("voice is not exercised by these tests")
    }
}

struct NoMedia;

#[async_trait]
impl MediaBridge for NoMedia {
    async fn download(&self, _media_id: &str) -> Option<MediaBlob> {
        None
    }

    async fn transcribe(&self, _audio: MediaBlob) -> Result<String, MediaError> {
        unimplemented!("voice is not exercised by these tests")
    }

    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, MediaError> {
        unimplemented!("voice is not exercised by these tests")
    }
}

/// Stub agent for integration tests (no real API calls).
struct GreetingAgent;

#[async_trait]
impl ReplyAgent for GreetingAgent {
    async fn generate_reply(
        &self,
        _session_id: &SessionId,
        _text: &str,
        _customer_number: &str,
        customer_name: Option<&str>,
    ) -> Result<String, AgentError> {
        Ok(format!("Hello {}", customer_name.unwrap_or("there")))
    }
}

struct TestServer {
    base_url: String,
    store: Arc<LibSqlBackend>,
    sender: Arc<StubSender>,
}

impl TestServer {
    fn sent_texts(&self) -> Vec<(String, String)> {
        self.sender.texts.lock().unwrap().clone()
    }
}

/// Start an Axum server on a random port with stubbed-out externals.
async fn start_server() -> TestServer {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let sender = Arc::new(StubSender::default());

    let history: Arc<dyn HistoryStore> = store.clone();
    let control: Arc<dyn ControlStore> = store.clone();

    let pipeline = Arc::new(MessagePipeline::new(
        history,
        ControlArbiter::new(control),
        Arc::new(NoMedia),
        sender.clone(),
        Arc::new(GreetingAgent),
        "wa-".to_string(),
    ));

    let app = webhook_routes(AppState {
        pipeline,
        verify_token: VERIFY_TOKEN.to_string(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base_url: format!("http://127.0.0.1:{port}"),
        store,
        sender,
    }
}

fn alice_payload(body: &str) -> serde_json::Value {
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "1337",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "contacts": [{ "wa_id": "27821234567", "profile": { "name": "Alice" } }],
                    "messages": [{
                        "from": "27821234567",
                        "id": "wamid.1",
                        "type": "text",
                        "text": { "body": body }
                    }]
                }
            }]
        }]
    })
}

// ── Verification handshake ───────────────────────────────────────────

#[tokio::test]
async fn verification_echoes_the_challenge() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let url = format!(
            "{}/webhook?hub.mode=subscribe&hub.verify_token={}&hub.challenge=12345",
            server.base_url, VERIFY_TOKEN
        );
        let response = reqwest::get(&url).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "12345");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn verification_rejects_a_bad_token() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let url = format!(
            "{}/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345",
            server.base_url
        );
        let response = reqwest::get(&url).await.unwrap();

        assert_eq!(response.status(), 403);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn verification_rejects_missing_params() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let response = reqwest::get(format!("{}/webhook", server.base_url))
            .await
            .unwrap();

        assert_eq!(response.status(), 403);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn health_reports_healthy() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let response = reqwest::get(format!("{}/health", server.base_url))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    })
    .await
    .expect("test timed out");
}

// ── Event intake ─────────────────────────────────────────────────────

#[tokio::test]
async fn text_message_round_trip() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.store.allow_number("27821234567", None).await.unwrap();

        let response = reqwest::Client::new()
            .post(format!("{}/webhook", server.base_url))
            .json(&alice_payload("Hi"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        assert_eq!(
            server.sent_texts(),
            vec![("27821234567".to_string(), "Hello Alice".to_string())]
        );

        let session = derive_session_id("27821234567", "wa-");
        let entries = server.store.recent_history(&session, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].direction, Direction::Human);
        assert_eq!(entries[0].content, "Hi");
        assert_eq!(entries[1].direction, Direction::Agent);
        assert_eq!(entries[1].content, "Hello Alice");
        assert_eq!(
            entries[1].metadata.as_ref().unwrap()["delivery_status"],
            "delivered"
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unlisted_sender_is_recorded_but_not_answered() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let response = reqwest::Client::new()
            .post(format!("{}/webhook", server.base_url))
            .json(&alice_payload("Hi"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["message"], "Number not enabled for automated replies");

        assert!(server.sent_texts().is_empty());

        let session = derive_session_id("27821234567", "wa-");
        let entries = server.store.recent_history(&session, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].direction, Direction::Human);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn human_takeover_suppresses_the_reply() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.store.allow_number("27821234567", None).await.unwrap();
        let session = derive_session_id("27821234567", "wa-");
        server.store.set_human_control(&session, true).await.unwrap();

        let response = reqwest::Client::new()
            .post(format!("{}/webhook", server.base_url))
            .json(&alice_payload("Hi"))
            .send()
            .await
            .unwrap();

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Human operator active");

        assert!(server.sent_texts().is_empty());
        let entries = server.store.recent_history(&session, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_json_is_still_acknowledged() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let response = reqwest::Client::new()
            .post(format!("{}/webhook", server.base_url))
            .header("content-type", "application/json")
            .body("this is not json {{")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert!(server.sent_texts().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn status_update_is_acknowledged_without_a_reply() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.store.allow_number("27821234567", None).await.unwrap();

        let payload = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "messaging_product": "whatsapp",
                        "statuses": [{ "id": "wamid.1", "status": "delivered" }]
                    }
                }]
            }]
        });

        let response = reqwest::Client::new()
            .post(format!("{}/webhook", server.base_url))
            .json(&payload)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert!(server.sent_texts().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn wildcard_allow_enables_everyone() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.store.allow_number("*", Some("open beta")).await.unwrap();

        reqwest::Client::new()
            .post(format!("{}/webhook", server.base_url))
            .json(&alice_payload("Hi"))
            .send()
            .await
            .unwrap();

        assert_eq!(server.sent_texts().len(), 1);
    })
    .await
    .expect("test timed out");
}
