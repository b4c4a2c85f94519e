use crate::middleware::RequestId;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ras_identity_oidc::OidcError;
use ras_identity_session::SessionError;
use serde::Serialize;
use tracing::{error, warn};

/// Body of every error response. Internal detail stays in the logs.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub correlation_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Oidc(#[from] OidcError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Malformed callback query: {0}")]
    MalformedCallback(String),

    #[error("No session cookie")]
    Unauthenticated,

    #[error("Route not found")]
    RouteNotFound,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Oidc(err) => match err {
                OidcError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
                OidcError::InvalidState
                | OidcError::CallbackError(_)
                | OidcError::MissingAuthorizationCode => StatusCode::BAD_REQUEST,
                OidcError::Upstream(_) => StatusCode::BAD_GATEWAY,
                OidcError::SignatureInvalid(_) | OidcError::ClaimInvalid(_) => {
                    StatusCode::UNAUTHORIZED
                }
                OidcError::Config(_) | OidcError::Url(_) | OidcError::Serialization(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            GatewayError::Session(_) | GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::MalformedCallback(_) => StatusCode::BAD_REQUEST,
            GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
        }
    }

    /// Message safe to show to the browser
    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::Oidc(err) => match err {
                OidcError::ProviderNotFound(_) => "Unknown identity provider",
                OidcError::InvalidState => "Invalid or expired login request",
                OidcError::CallbackError(_) => "Login was not completed by the identity provider",
                OidcError::MissingAuthorizationCode => "Missing authorization code",
                OidcError::Upstream(_) => "Identity provider unavailable",
                OidcError::SignatureInvalid(_) | OidcError::ClaimInvalid(_) => {
                    "Identity token rejected"
                }
                OidcError::Config(_) | OidcError::Url(_) | OidcError::Serialization(_) => {
                    "Internal server error"
                }
            },
            GatewayError::Session(_) | GatewayError::Unauthenticated => "Not authenticated",
            GatewayError::MalformedCallback(_) => "Malformed callback request",
            GatewayError::RouteNotFound => "Not found",
        }
    }

    /// Attach the request's correlation id for the response body.
    pub fn at(self, request_id: &RequestId) -> ApiError {
        ApiError {
            error: self,
            correlation_id: request_id.to_string(),
        }
    }
}

/// A gateway error bound to the request it occurred in
#[derive(Debug)]
pub struct ApiError {
    pub error: GatewayError,
    pub correlation_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();

        if status.is_server_error() {
            error!(
                correlation_id = %self.correlation_id,
                %status,
                "Request failed: {}",
                self.error
            );
        } else {
            warn!(
                correlation_id = %self.correlation_id,
                %status,
                "Request rejected: {}",
                self.error
            );
        }

        let body = Json(ErrorResponse {
            error: self.error.public_message().to_string(),
            correlation_id: self.correlation_id,
        });

        (status, body).into_response()
    }
}
