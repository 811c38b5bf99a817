use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use rally_crypto::{Codec, keys::generate_key};
use rally_db::Database;
use rally_gateway::Dispatcher;
use rally_types::api::Claims;
use rally_types::models::{ConversationId, MessageId};

use crate::media::{FILE_NAME_HEADER, LocalBlobStore};
use crate::routes::router;
use crate::state::{AppState, AppStateInner};

pub const SECRET: &str = "test-secret";

pub fn token(user_id: Uuid, username: &str) -> String {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role: "user".to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    _uploads: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let uploads = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory(Codec::new(generate_key())).unwrap();
        let state: AppState = Arc::new(AppStateInner {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            jwt_secret: SECRET.to_string(),
            media: LocalBlobStore::new(uploads.path().join("blobs")),
        });
        Self {
            router: router(state.clone()),
            state,
            _uploads: uploads,
        }
    }

    /// A user known to the store, with a valid token.
    pub async fn login(&self, username: &str) -> TestUser {
        let id = Uuid::new_v4();
        self.state.db.upsert_user(id, username).unwrap();
        TestUser {
            id,
            token: token(id, username),
        }
    }

    pub async fn raw(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        self.send_request(req).await
    }

    async fn send_request(&self, req: Request<Body>) -> (StatusCode, Value) {
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    /// `Value::Null` sends no body.
    pub async fn call(&self, user: &TestUser, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let body = (!body.is_null()).then_some(body);
        self.raw(method, uri, Some(&user.token), body).await
    }

    pub async fn get(&self, user: &TestUser, uri: &str) -> (StatusCode, Value) {
        self.raw("GET", uri, Some(&user.token), None).await
    }

    pub async fn upload(&self, user: &TestUser, name: &str, bytes: &[u8]) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri("/files")
            .header(header::AUTHORIZATION, format!("Bearer {}", user.token))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(FILE_NAME_HEADER, name)
            .body(Body::from(bytes.to_vec()))
            .unwrap();
        self.send_request(req).await
    }

    pub async fn direct(&self, a: &TestUser, b: &TestUser) -> ConversationId {
        let (_, body) = self
            .call(a, "POST", "/conversations", serde_json::json!({ "user_id": b.id }))
            .await;
        body["conversation_id"].as_i64().unwrap()
    }

    pub async fn send(&self, from: &TestUser, conversation_id: ConversationId, content: &str) -> MessageId {
        let (_, body) = self
            .call(
                from,
                "POST",
                "/messages",
                serde_json::json!({ "conversation_id": conversation_id, "content": content }),
            )
            .await;
        body["id"].as_i64().unwrap()
    }
}
