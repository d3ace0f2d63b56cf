use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use executa_core::{
    Account, Assistant, ExecutaConfig, HandoffSettings, MemoryStore, Repositories, Services, User,
    UserRole,
};
use executa_server::{router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OWNER_KEY: &str = "owner-key";
const MEMBER_KEY: &str = "member-key";

struct TestApp {
    app: Router,
    repos: Repositories,
    assistant_id: Uuid,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(ExecutaConfig::default()).await
    }

    async fn with_config(config: ExecutaConfig) -> Self {
        let repos = Repositories::memory(Arc::new(MemoryStore::new()));
        let services = Services::new(&config, repos.clone()).unwrap();

        let account = repos.users.insert_account(&Account::new("Acme")).await.unwrap();
        repos
            .users
            .insert_user(&User::new(account.id, "Olive", "olive@acme.com", UserRole::Owner, OWNER_KEY))
            .await
            .unwrap();
        repos
            .users
            .insert_user(&User::new(account.id, "Max", "max@acme.com", UserRole::Member, MEMBER_KEY))
            .await
            .unwrap();

        let mut settings = HandoffSettings::default();
        settings.email_settings.support_email = "help@acme.com".to_string();
        let assistant = repos
            .assistants
            .insert_assistant(&Assistant::new(account.id, "Helper").with_handoff(&settings).unwrap())
            .await
            .unwrap();

        Self {
            app: router(AppState::new(services)),
            repos,
            assistant_id: assistant.id,
        }
    }

    async fn send(&self, method: Method, uri: &str, key: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn create_ticket(&self, session_id: &str, priority: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/support/tickets",
                Some(OWNER_KEY),
                Some(json!({
                    "assistantId": self.assistant_id,
                    "sessionId": session_id,
                    "priority": priority,
                    "context": "Order #42",
                    "customerInfo": { "name": "Grace", "email": "grace@example.com" }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["ticket"]["id"].as_str().unwrap().to_string()
    }
}

mod ticket_inbox_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_requires_ids() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(Method::POST, "/api/support/tickets", Some(OWNER_KEY), Some(json!({})))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "assistantId and sessionId are required");
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let app = TestApp::new().await;
        app.create_ticket("sess-a", "HIGH").await;
        app.create_ticket("sess-b", "LOW").await;

        let (status, body) = app
            .send(Method::GET, "/api/support/tickets", Some(MEMBER_KEY), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tickets"].as_array().unwrap().len(), 2);
        assert_eq!(body["pagination"]["total"], 2);
        assert_eq!(body["pagination"]["totalPages"], 1);

        let (_, body) = app
            .send(
                Method::GET,
                "/api/support/tickets?priority=HIGH&status=all",
                Some(OWNER_KEY),
                None,
            )
            .await;
        let tickets = body["tickets"].as_array().unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0]["sessionId"], "sess-a");
        assert_eq!(tickets[0]["customer"]["name"], "Grace");
        assert_eq!(tickets[0]["assistant"]["name"], "Helper");
    }

    #[tokio::test]
    async fn test_list_rejects_unknown_status() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(Method::GET, "/api/support/tickets?status=LOST", Some(OWNER_KEY), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid status 'LOST'");
    }

    #[tokio::test]
    async fn test_assigned_to_me_without_profile_is_empty() {
        let app = TestApp::new().await;
        app.create_ticket("sess-a", "HIGH").await;

        let (status, body) = app
            .send(
                Method::GET,
                "/api/support/tickets?assignedToMe=true",
                Some(OWNER_KEY),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["tickets"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detail() {
        let app = TestApp::new().await;
        let id = app.create_ticket("sess-a", "URGENT").await;

        let (status, body) = app
            .send(Method::GET, &format!("/api/support/tickets/{}", id), Some(MEMBER_KEY), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ticket"]["id"], id.as_str());
        assert_eq!(body["ticket"]["priority"], "URGENT");
        assert_eq!(body["ticket"]["assistant"]["name"], "Helper");
        assert_eq!(body["ticket"]["assignedTo"]["name"], "Olive");
        assert_eq!(body["ticket"]["session"]["customerName"], "Grace");
        assert_eq!(body["ticket"]["session"]["messages"].as_array().unwrap().len(), 1);

        let (status, body) = app
            .send(
                Method::GET,
                &format!("/api/support/tickets/{}", Uuid::new_v4()),
                Some(OWNER_KEY),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Ticket not found", "code": "E4002" }));
    }
}

mod ticket_action_tests {
    use super::*;

    fn uri(id: &str) -> String {
        format!("/api/support/tickets/{}", id)
    }

    #[tokio::test]
    async fn test_only_owner_manages_tickets() {
        let app = TestApp::new().await;
        let id = app.create_ticket("sess-a", "HIGH").await;

        let (status, body) = app
            .send(Method::PUT, &uri(&id), Some(MEMBER_KEY), Some(json!({ "action": "accept" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Only account owner can manage tickets");

        let (status, _) = app
            .send(
                Method::PUT,
                &uri(&Uuid::new_v4().to_string()),
                Some(MEMBER_KEY),
                Some(json!({ "action": "accept" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_accept_then_resolve() {
        let app = TestApp::new().await;
        let id = app.create_ticket("sess-a", "HIGH").await;

        let (status, body) = app
            .send(Method::PUT, &uri(&id), Some(OWNER_KEY), Some(json!({ "action": "accept" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ticket"]["status"], "ACCEPTED");
        assert!(body["ticket"]["acceptedAt"].is_string());

        let (status, body) = app
            .send(
                Method::PUT,
                &uri(&id),
                Some(OWNER_KEY),
                Some(json!({ "action": "resolve", "data": { "resolutionNotes": "Refunded" } })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ticket"]["status"], "RESOLVED");
        assert_eq!(body["ticket"]["context"], "Order #42\n\nResolution: Refunded");
    }

    #[tokio::test]
    async fn test_add_message() {
        let app = TestApp::new().await;
        let id = app.create_ticket("sess-a", "HIGH").await;

        let (status, body) = app
            .send(
                Method::PUT,
                &uri(&id),
                Some(OWNER_KEY),
                Some(json!({ "action": "add_message", "data": { "content": "On it", "isInternal": true } })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"]["content"], "On it");
        assert_eq!(body["message"]["senderName"], "Olive");
        assert_eq!(body["message"]["isInternal"], true);

        let (status, body) = app
            .send(
                Method::PUT,
                &uri(&id),
                Some(OWNER_KEY),
                Some(json!({ "action": "add_message", "data": {} })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message content is required");
    }

    #[tokio::test]
    async fn test_invalid_action() {
        let app = TestApp::new().await;
        let id = app.create_ticket("sess-a", "HIGH").await;

        let (status, body) = app
            .send(Method::PUT, &uri(&id), Some(OWNER_KEY), Some(json!({ "action": "escalate" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid action", "code": "E4004" }));
    }
}

mod agent_tests {
    use super::*;

    #[tokio::test]
    async fn test_profile_upsert_and_directory() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send(
                Method::POST,
                "/api/support/agents",
                Some(MEMBER_KEY),
                Some(json!({ "department": "Billing", "skills": ["refunds"] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["agent"]["name"], "Max");
        assert_eq!(body["agent"]["department"], "Billing");
        assert_eq!(body["agent"]["isAvailable"], true);
        assert_eq!(body["agent"]["activeTickets"], 0);

        let (status, body) = app
            .send(Method::GET, "/api/support/agents", Some(OWNER_KEY), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let agents = body["agents"].as_array().unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0]["email"], "max@acme.com");
        assert_eq!(agents[0]["skills"], json!(["refunds"]));
    }
}

mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_zendesk_invalid_action() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(
                Method::POST,
                "/api/integrations/zendesk/tickets",
                Some(OWNER_KEY),
                Some(json!({ "action": "delete_everything" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid action");
    }

    #[tokio::test]
    async fn test_zendesk_requires_configuration() {
        let app = TestApp::new().await;
        let id = app.create_ticket("sess-a", "HIGH").await;

        let (status, body) = app
            .send(
                Method::POST,
                "/api/integrations/zendesk/tickets",
                Some(OWNER_KEY),
                Some(json!({ "action": "create_zendesk_ticket", "ticketId": id })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Zendesk not configured", "code": "E5007" }));

        let (status, body) = app
            .send(
                Method::POST,
                "/api/integrations/zendesk/tickets",
                Some(OWNER_KEY),
                Some(json!({ "action": "create_zendesk_ticket", "ticketId": Uuid::new_v4() })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Ticket not found");
    }

    #[tokio::test]
    async fn test_executa_ticket_validation() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(
                Method::POST,
                "/api/support/executa-ticket",
                Some(MEMBER_KEY),
                Some(json!({ "subject": "Broken" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "All fields are required");
    }

    #[tokio::test]
    async fn test_executa_ticket_submitted() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(
                Method::POST,
                "/api/support/executa-ticket",
                Some(MEMBER_KEY),
                Some(json!({
                    "subject": "Widget broken",
                    "category": "bug-report",
                    "priority": "HIGH",
                    "description": "It crashes",
                    "userEmail": "max@acme.com",
                    "userName": "Max"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Support ticket submitted successfully");
        assert!(body["ticketId"].as_str().unwrap().starts_with("EXEC-"));
    }

    #[tokio::test]
    async fn test_executa_ticket_provider_failure_is_generic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let mut config = ExecutaConfig::default();
        config.email.sendgrid_api_key = Some("SG.test".to_string());
        config.email.sendgrid_base_url = server.uri();
        let app = TestApp::with_config(config).await;

        let (status, body) = app
            .send(
                Method::POST,
                "/api/support/executa-ticket",
                Some(MEMBER_KEY),
                Some(json!({
                    "subject": "Widget broken",
                    "category": "technical",
                    "description": "It crashes",
                    "userEmail": "max@acme.com",
                    "userName": "Max"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Failed to submit support ticket", "code": "E6001" }));
    }
}

mod outbox_tests {
    use super::*;
    use chrono::Utc;
    use executa_core::{NotifyChannel, OutboxEntry, OutboxStatus};
    use std::time::Duration;

    async fn handoff(app: &TestApp) {
        let (status, _) = app
            .send(
                Method::POST,
                &format!("/api/chat/{}/handoff", app.assistant_id),
                Some(OWNER_KEY),
                Some(json!({ "sessionId": "sess-o" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_outbox_lists_account_entries() {
        let app = TestApp::new().await;
        handoff(&app).await;

        let (status, body) = app
            .send(Method::GET, "/api/notifications/outbox", Some(MEMBER_KEY), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let entries = body["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["channel"], "email");
        assert_eq!(entries[0]["target"], "help@acme.com");

        let (status, _) = app
            .send(Method::GET, "/api/notifications/outbox?status=lost", Some(MEMBER_KEY), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    async fn seed_entry(app: &TestApp, status: OutboxStatus) -> Uuid {
        let account_id = app
            .repos
            .assistants
            .get_assistant(app.assistant_id)
            .await
            .unwrap()
            .unwrap()
            .account_id;
        let mut entry = OutboxEntry::new(
            account_id,
            None,
            NotifyChannel::Email,
            "help@acme.com",
            json!({}),
            5,
        );
        entry.status = status;
        entry.attempts = 5;
        entry.last_error = Some("smtp down".to_string());
        app.repos.outbox.enqueue(&[entry.clone()]).await.unwrap();
        entry.id
    }

    #[tokio::test]
    async fn test_retry_is_owner_only() {
        let app = TestApp::new().await;
        let id = seed_entry(&app, OutboxStatus::Dead).await;
        let uri = format!("/api/notifications/outbox/{}/retry", id);

        let (status, _) = app.send(Method::POST, &uri, Some(MEMBER_KEY), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app.send(Method::POST, &uri, Some(OWNER_KEY), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entry"]["id"], id.to_string());
        assert_eq!(body["entry"]["attempts"], 0);
        assert_eq!(body["entry"]["status"], "pending");

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/notifications/outbox/{}/retry", Uuid::new_v4()),
                Some(OWNER_KEY),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "E6002");
    }

    #[tokio::test]
    async fn test_retry_conflicts_on_delivered_or_in_flight_entries() {
        let app = TestApp::new().await;

        let delivered = seed_entry(&app, OutboxStatus::Delivered).await;
        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/notifications/outbox/{}/retry", delivered),
                Some(OWNER_KEY),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "E6004");

        let in_flight = seed_entry(&app, OutboxStatus::Pending).await;
        let claimed = app
            .repos
            .outbox
            .claim_ids(&[in_flight], Utc::now(), Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        let (status, _) = app
            .send(
                Method::POST,
                &format!("/api/notifications/outbox/{}/retry", in_flight),
                Some(OWNER_KEY),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let entry = app.repos.outbox.get_entry(in_flight).await.unwrap().unwrap();
        assert!(entry.leased_until.is_some());
        assert_eq!(entry.attempts, 5);
    }
}

mod email_reply_tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    const SECRET: &str = "whsec_test";

    async fn signed_app() -> TestApp {
        let mut config = ExecutaConfig::default();
        config.email.webhook_secret = Some(SECRET.to_string());
        config.email.company_domain = Some("acme.com".to_string());
        TestApp::with_config(config).await
    }

    fn sign(body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    async fn post_reply(app: &TestApp, body: &str, signature: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/support/email/reply")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-webhook-signature", signature);
        }
        let response = app
            .app
            .clone()
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_bad_signature_is_unauthorized() {
        let app = signed_app().await;
        let ticket_id = app.create_ticket("sess-mail-1", "NORMAL").await;
        let body = json!({
            "from": "ann@acme.com",
            "subject": format!("Re: [{}] Order", ticket_id),
            "text": "On it",
        })
        .to_string();

        let (status, reply) = post_reply(&app, &body, Some("sha256=deadbeef")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply, json!({ "error": "Invalid signature", "code": "E9009" }));

        let (status, _) = post_reply(&app, &body, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_ticket_is_not_found() {
        let app = signed_app().await;
        let body = json!({
            "from": "ann@acme.com",
            "subject": "Re: New Support Request - Helper",
            "references": format!("<ticket-{}@executa.ai>", Uuid::new_v4()),
            "text": "On it",
        })
        .to_string();

        let (status, reply) = post_reply(&app, &body, Some(&sign(&body))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(reply["code"], "E4002");
    }

    #[tokio::test]
    async fn test_outside_sender_is_forbidden() {
        let app = signed_app().await;
        let ticket_id = app.create_ticket("sess-mail-2", "HIGH").await;
        let body = json!({
            "from": "someone@gmail.com",
            "subject": format!("[{}]", ticket_id),
            "text": "Let me in",
        })
        .to_string();

        let (status, reply) = post_reply(&app, &body, Some(&sign(&body))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(reply["error"], "Unauthorized sender");
    }

    #[tokio::test]
    async fn test_reply_is_cleaned_and_starts_ticket() {
        let app = signed_app().await;
        let ticket_id = app.create_ticket("sess-mail-3", "NORMAL").await;
        let body = json!({
            "from": "Ann <ann@acme.com>",
            "subject": format!("Re: [{}] Order #42", ticket_id),
            "text": "Your order ships today.\n\nBest regards,\nAnn\n\nOn Mon Grace wrote:\n> where is my order",
            "messageId": "<r1@mail.acme.com>",
        })
        .to_string();

        let (status, reply) = post_reply(&app, &body, Some(&sign(&body))).await;
        assert_eq!(status, StatusCode::OK, "{}", reply);
        assert_eq!(reply["success"], true);
        assert_eq!(reply["ticketId"], ticket_id.as_str());

        let (_, detail) = app
            .send(
                Method::GET,
                &format!("/api/support/tickets/{}", ticket_id),
                Some(OWNER_KEY),
                None,
            )
            .await;
        assert_eq!(detail["status"], "IN_PROGRESS");
        let messages = detail["session"]["messages"].as_array().unwrap();
        let last = messages.last().unwrap();
        assert_eq!(last["content"], "Your order ships today.");
        assert_eq!(last["sender"], "HUMAN_AGENT");
        assert_eq!(last["id"], reply["messageId"]);
    }
}

mod event_stream_tests {
    use super::*;

    #[tokio::test]
    async fn test_event_stream_requires_auth_and_streams_sse() {
        let app = TestApp::new().await;

        let (status, _) = app.send(Method::GET, "/api/support/events", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/api/support/events")
            .header(header::AUTHORIZATION, format!("Bearer {}", OWNER_KEY))
            .body(Body::empty())
            .unwrap();
        let response = app.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
    }
}
