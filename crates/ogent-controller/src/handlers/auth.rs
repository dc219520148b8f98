use axum::{extract::State, http::StatusCode, Form, Json};

use ogent_shared::{OgentError, TokenRequest, TokenResponse};

use crate::AppState;

/// Exchanges the configured bootstrap credential for a bearer token
/// (`POST /token`). There is no multi-user store: a single admin
/// username/password pair is configured at startup.
pub async fn token(
    State(state): State<AppState>,
    Form(request): Form<TokenRequest>,
) -> Result<Json<TokenResponse>, (StatusCode, Json<serde_json::Value>)> {
    if !state
        .auth_service
        .verify_credentials(&request.username, &request.password)
    {
        return Err(handle_error(OgentError::AuthFailure));
    }

    let access_token = state
        .auth_service
        .generate_token(&request.username)
        .map_err(handle_error)?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

pub fn handle_error(error: OgentError) -> (StatusCode, Json<serde_json::Value>) {
    let (status, message) = match error {
        OgentError::AuthFailure => (StatusCode::UNAUTHORIZED, "authentication failed".to_string()),
        OgentError::AgentNotFound(msg) => (StatusCode::NOT_FOUND, msg),
        OgentError::CommandNotFound(msg) => (StatusCode::NOT_FOUND, msg),
        OgentError::NotDeliverable(msg) => (StatusCode::CONFLICT, msg),
        OgentError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        OgentError::ProtocolViolation(msg) => (StatusCode::BAD_REQUEST, msg),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error".to_string(),
        ),
    };

    (status, Json(serde_json::json!({ "error": message })))
}
