use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use rally_types::api::Claims;
use rally_types::models::{DeviceClass, Identity};

use crate::error::ApiError;
use crate::state::AppState;

pub const DEVICE_CLASS_HEADER: &str = "x-device-class";

/// Decode and validate an HS256 token.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized)
}

pub fn identity_from_claims(claims: Claims, device_class: DeviceClass) -> Identity {
    Identity {
        user_id: claims.sub,
        username: claims.username,
        role: claims.role,
        device_class,
    }
}

/// Extract and validate the bearer token, then attach an [`Identity`] to the
/// request. The caller's shadow user row is refreshed so participant views
/// can resolve the display name.
pub async fn require_auth(
    State(state): State<AppState>,
    auth: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = auth.map_err(|_| ApiError::Unauthorized)?;
    let claims = verify_token(&state.jwt_secret, bearer.token())?;
    let device_class = device_class(req.headers())?;
    let identity = identity_from_claims(claims, device_class);

    let (user_id, username) = (identity.user_id, identity.username.clone());
    state
        .store(move |db| db.upsert_user(user_id, &username))
        .await?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

fn device_class(headers: &HeaderMap) -> Result<DeviceClass, ApiError> {
    match headers.get(DEVICE_CLASS_HEADER) {
        None => Ok(DeviceClass::default()),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().to_ascii_lowercase().parse().ok())
            .ok_or_else(|| ApiError::BadRequest("invalid device class".into())),
    }
}
