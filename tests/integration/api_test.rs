use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use executa_core::{
    Account, Assistant, ExecutaConfig, HandoffMethod, HandoffSettings, MemoryStore, Repositories,
    Services, User, UserRole,
};
use executa_server::{router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const OWNER_KEY: &str = "owner-key";
const MEMBER_KEY: &str = "member-key";

struct TestApp {
    app: Router,
    repos: Repositories,
    account_id: Uuid,
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

        Self {
            app: router(AppState::new(services)),
            repos,
            account_id: account.id,
        }
    }

    async fn assistant(&self, settings: &HandoffSettings) -> Uuid {
        let assistant = Assistant::new(self.account_id, "Helper")
            .with_handoff(settings)
            .unwrap();
        self.repos
            .assistants
            .insert_assistant(&assistant)
            .await
            .unwrap()
            .id
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
}

fn email_settings() -> HandoffSettings {
    let mut settings = HandoffSettings::default();
    settings.email_settings.support_email = "help@acme.com".to_string();
    settings
}

fn handoff_body(session_id: &str) -> Value {
    json!({
        "sessionId": session_id,
        "reason": "CUSTOMER_REQUEST",
        "priority": "HIGH",
        "customerQuery": "Where is my order?",
        "customerInfo": { "name": "Grace", "email": "grace@example.com" }
    })
}

mod health_and_auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_memory_storage() {
        let app = TestApp::new().await;
        let (status, body) = app.send(Method::GET, "/health", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn test_missing_api_key_is_unauthorized() {
        let app = TestApp::new().await;
        let (status, body) = app.send(Method::GET, "/api/support/tickets", None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Unauthorized", "code": "E9007" }));
    }

    #[tokio::test]
    async fn test_unknown_api_key_is_unauthorized() {
        let app = TestApp::new().await;
        let (status, _) = app
            .send(Method::GET, "/api/support/agents", Some("nope"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

mod handoff_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_handoff() {
        let app = TestApp::new().await;
        let assistant_id = app.assistant(&email_settings()).await;

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/chat/{}/handoff", assistant_id),
                Some(OWNER_KEY),
                Some(handoff_body("sess-1")),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["handoffId"].as_str().is_some());
        assert_eq!(body["estimatedWaitTime"], 5);
        assert_eq!(
            body["message"],
            "Please wait while we connect you with our support team."
        );

        let session = app.repos.sessions.get_session("sess-1").await.unwrap().unwrap();
        assert_eq!(session.assistant_id, assistant_id);
    }

    #[tokio::test]
    async fn test_unknown_assistant_is_not_found() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/chat/{}/handoff", Uuid::new_v4()),
                Some(OWNER_KEY),
                Some(handoff_body("sess-2")),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Assistant not found", "code": "E3001" }));
        assert!(app.repos.sessions.get_session("sess-2").await.unwrap().is_none());

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/chat/{}/handoff", Uuid::new_v4()),
                Some(OWNER_KEY),
                Some(json!({ "sessionId": "  " })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "E3001");

        let (status, _) = app
            .send(
                Method::POST,
                "/api/chat/not-a-uuid/handoff",
                Some(OWNER_KEY),
                Some(handoff_body("sess-2")),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handoff_validation_errors() {
        let app = TestApp::new().await;
        let assistant_id = app.assistant(&email_settings()).await;
        let uri = format!("/api/chat/{}/handoff", assistant_id);

        let (status, body) = app
            .send(Method::POST, &uri, Some(OWNER_KEY), Some(json!({ "reason": "COMPLEX_ISSUE" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Session ID required");
        assert_eq!(body["code"], "E9004");

        let (status, body) = app
            .send(Method::POST, &uri, Some(OWNER_KEY), Some(json!({ "sessionId": "s", "priority": "SOMEDAY" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "E9004");
    }

    #[tokio::test]
    async fn test_disabled_handoff_is_rejected() {
        let app = TestApp::new().await;
        let assistant = app
            .repos
            .assistants
            .insert_assistant(&Assistant::new(app.account_id, "Plain"))
            .await
            .unwrap();

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/chat/{}/handoff", assistant.id),
                Some(OWNER_KEY),
                Some(handoff_body("sess-3")),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Handoff not enabled for this assistant");
    }

    #[tokio::test]
    async fn test_status_is_public() {
        let app = TestApp::new().await;
        let assistant_id = app.assistant(&email_settings()).await;
        let uri = format!("/api/chat/{}/handoff", assistant_id);
        app.send(Method::POST, &uri, Some(OWNER_KEY), Some(handoff_body("sess-4")))
            .await;

        let (status, body) = app
            .send(Method::GET, &format!("{}?sessionId=sess-4", uri), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["assignedTo"]["name"], "Olive");

        let (status, body) = app.send(Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Session ID required");

        let (status, body) = app
            .send(Method::GET, &format!("{}?sessionId=other", uri), None, None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Handoff request not found");
    }

    #[tokio::test]
    async fn test_evaluate_message() {
        let app = TestApp::new().await;
        let mut settings = email_settings();
        settings.trigger_on_keywords = vec!["human".to_string()];
        let assistant_id = app.assistant(&settings).await;

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/chat/{}/handoff/evaluate", assistant_id),
                Some(MEMBER_KEY),
                Some(json!({ "message": "Can I talk to a HUMAN please" })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["evaluation"]["keywordTriggered"], true);
        assert_eq!(body["evaluation"]["keywordMatches"], json!(["human"]));
    }
}

mod settings_tests {
    use super::*;

    #[tokio::test]
    async fn test_settings_round_trip() {
        let app = TestApp::new().await;
        let assistant_id = app.assistant(&email_settings()).await;
        let uri = format!("/api/assistants/{}/handoff-settings", assistant_id);

        let (status, body) = app.send(Method::GET, &uri, Some(OWNER_KEY), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["handoffEnabled"], true);
        assert_eq!(body["handoffSettings"]["emailSettings"]["supportEmail"], "help@acme.com");

        let (status, body) = app
            .send(
                Method::PUT,
                &uri,
                Some(OWNER_KEY),
                Some(json!({
                    "handoffEnabled": true,
                    "handoffSettings": { "handoffMethod": "internal_notification" }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["handoffSettings"]["handoffMethod"], "internal_notification");
        assert_eq!(body["handoffSettings"]["version"], 1);

        let stored = app.repos.assistants.get_assistant(assistant_id).await.unwrap().unwrap();
        assert_eq!(stored.settings().unwrap().handoff_method, HandoffMethod::InternalNotification);
    }

    #[tokio::test]
    async fn test_enabled_settings_are_validated() {
        let app = TestApp::new().await;
        let assistant_id = app.assistant(&email_settings()).await;
        let uri = format!("/api/assistants/{}/handoff-settings", assistant_id);

        let (status, body) = app
            .send(
                Method::PUT,
                &uri,
                Some(OWNER_KEY),
                Some(json!({ "handoffEnabled": true, "handoffSettings": {} })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Support email is required when using email handoff method"
        );
        assert_eq!(body["code"], "E3002");

        let (status, _) = app
            .send(
                Method::PUT,
                &uri,
                Some(OWNER_KEY),
                Some(json!({ "handoffEnabled": false, "handoffSettings": {} })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_json_body() {
        let app = TestApp::new().await;
        let assistant_id = app.assistant(&email_settings()).await;

        let request = Request::builder()
            .method(Method::PUT)
            .uri(format!("/api/assistants/{}/handoff-settings", assistant_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", OWNER_KEY))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{ not json"))
            .unwrap();
        let response = app.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "E9004");
    }
}
