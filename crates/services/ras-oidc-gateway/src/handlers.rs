//! HTTP entry points.

use crate::error::{ApiError, GatewayError};
use crate::middleware::RequestId;
use crate::state::AppState;
use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use ras_identity_core::IdentityClaims;
use ras_identity_oidc::CallbackParams;
use tracing::{debug, info};

/// `GET /login/{provider}`: send the browser to the provider's consent screen.
pub async fn login(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(provider): Path<String>,
) -> Result<Response, ApiError> {
    let redirect = state
        .oidc
        .begin_login(&provider)
        .await
        .map_err(|e| GatewayError::from(e).at(&request_id))?;

    info!(request_id = %request_id, provider = %provider, "Redirecting to identity provider");

    Ok((StatusCode::FOUND, [(header::LOCATION, redirect.url)]).into_response())
}

/// `GET /auth/{provider}`: finish the login, set the session cookie and
/// redirect to the application.
pub async fn auth(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(provider): Path<String>,
    jar: CookieJar,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = query
        .map_err(|e| GatewayError::MalformedCallback(e.body_text()).at(&request_id))?;

    let login = state
        .oidc
        .authenticate(&provider, params)
        .await
        .map_err(|e| GatewayError::from(e).at(&request_id))?;

    let cookie = state
        .sessions
        .issue(&login.claims, &login.id_token)
        .await
        .map_err(|e| GatewayError::from(e).at(&request_id))?;

    info!(request_id = %request_id, provider = %provider, "Login completed");
    debug!(request_id = %request_id, subject = %login.claims.subject, "Session issued");

    Ok((
        StatusCode::FOUND,
        jar.add(cookie),
        [(header::LOCATION, state.post_login_url.to_string())],
    )
        .into_response())
}

/// `GET /session`: claims behind the session cookie.
pub async fn session(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    jar: CookieJar,
) -> Result<Json<IdentityClaims>, ApiError> {
    let cookie = jar
        .get(state.sessions.cookie_name())
        .ok_or_else(|| GatewayError::Unauthenticated.at(&request_id))?;

    let claims = state
        .sessions
        .resolve(cookie.value())
        .await
        .map_err(|e| GatewayError::from(e).at(&request_id))?;

    Ok(Json(claims))
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn not_found(Extension(request_id): Extension<RequestId>) -> ApiError {
    GatewayError::RouteNotFound.at(&request_id)
}
