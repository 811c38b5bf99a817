mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use rally_api::middleware::{identity_from_claims, verify_token};
use rally_api::media::LocalBlobStore;
use rally_api::{ApiError, AppState, AppStateInner};
use rally_crypto::Codec;
use rally_db::Database;
use rally_gateway::{Dispatcher, connection};
use rally_types::models::{DeviceClass, Identity};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rally=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Database::open(&config.db_path, Codec::new(config.encryption_key))?
        .with_page_size(config.page_size);

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db: Arc::new(db),
        dispatcher: Dispatcher::new(),
        jwt_secret: config.jwt_secret.clone(),
        media: LocalBlobStore::new(&config.upload_dir),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(rally_api::router(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Rally server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct GatewayParams {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    device: Option<String>,
}

/// Resolve the identity a gateway connection will run as.
fn gateway_identity(secret: &str, params: &GatewayParams) -> Result<Identity, ApiError> {
    let token = params
        .token
        .as_deref()
        .ok_or(ApiError::Unauthorized)?;
    let claims = verify_token(secret, token)?;
    let device_class = match params.device.as_deref() {
        None => DeviceClass::default(),
        Some(device) => device
            .parse()
            .map_err(|e| ApiError::BadRequest(format!("{}", e)))?,
    };
    Ok(identity_from_claims(claims, device_class))
}

/// GET /gateway?token=&device=: the token is checked before the upgrade.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<GatewayParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = match gateway_identity(&state.jwt_secret, &params) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejected gateway connection: {}", e);
            return e.into_response();
        }
    };

    let (user_id, username) = (identity.user_id, identity.username.clone());
    if let Err(e) = state.store(move |db| db.upsert_user(user_id, &username)).await {
        return e.into_response();
    }

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db, identity))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use rally_types::api::Claims;
    use uuid::Uuid;

    use super::*;

    const SECRET: &str = "gateway-secret";

    fn token(user_id: Uuid) -> String {
        let claims = Claims {
            sub: user_id,
            username: "ana".to_string(),
            role: "user".to_string(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn missing_or_bad_token_is_unauthorized() {
        let missing = gateway_identity(SECRET, &GatewayParams::default()).unwrap_err();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let bad = GatewayParams { token: Some("nope".into()), device: None };
        assert_eq!(gateway_identity(SECRET, &bad).unwrap_err().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn device_defaults_to_desktop_and_is_validated() {
        let ana = Uuid::new_v4();
        let params = GatewayParams { token: Some(token(ana)), device: None };
        let identity = gateway_identity(SECRET, &params).unwrap();
        assert_eq!((identity.user_id, identity.device_class), (ana, DeviceClass::Desktop));

        let phone = GatewayParams { token: Some(token(ana)), device: Some("mobile".into()) };
        assert_eq!(gateway_identity(SECRET, &phone).unwrap().device_class, DeviceClass::Mobile);

        let toaster = GatewayParams { token: Some(token(ana)), device: Some("toaster".into()) };
        assert_eq!(gateway_identity(SECRET, &toaster).unwrap_err().status(), StatusCode::BAD_REQUEST);
    }
}
