use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde_json::json,
    zapgate_channels::ProviderError,
    zapgate_phone::PhoneError,
    zapgate_sessions::SessionError,
    zapgate_whatsapp::events::WebhookError,
};

use crate::dispatcher::DispatchError;

/// Every failure the gateway hands back to a caller.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Phone(#[from] PhoneError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("provider refused the message: {0}")]
    Provider(#[from] ProviderError),

    #[error("send to '{0}' timed out")]
    SendTimeout(String),

    #[error("failed to render QR code: {0}")]
    Render(String),
}

fn session_code(err: &SessionError) -> (StatusCode, &'static str) {
    match err {
        SessionError::UnknownInstance(_) => (StatusCode::NOT_FOUND, "unknown_instance"),
        SessionError::DuplicateInstance(_) => (StatusCode::CONFLICT, "duplicate_instance"),
        SessionError::AlreadyConnected(_) => (StatusCode::CONFLICT, "already_connected"),
        SessionError::NoPairingInProgress(_) => (StatusCode::CONFLICT, "no_pairing_in_progress"),
        SessionError::PairingTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "pairing_timeout"),
        SessionError::SessionNotConnected(_) => (StatusCode::CONFLICT, "session_not_connected"),
    }
}

impl GatewayError {
    /// HTTP status and stable machine-readable code.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Session(e) | Self::Phone(PhoneError::Session(e)) => session_code(e),
            Self::Phone(e) => match e {
                PhoneError::InvalidFormat { .. } => (StatusCode::BAD_REQUEST, "invalid_format"),
                PhoneError::UnsupportedPlan { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "unsupported_plan")
                },
                PhoneError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                PhoneError::UnknownLid(_) => (StatusCode::NOT_FOUND, "unknown_lid"),
                PhoneError::ResolutionTimeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "resolution_timeout")
                },
                PhoneError::SessionNotConnected(_) => {
                    (StatusCode::CONFLICT, "session_not_connected")
                },
                PhoneError::Session(_) | PhoneError::Provider(_) => {
                    (StatusCode::BAD_GATEWAY, "provider_error")
                },
            },
            Self::Dispatch(DispatchError::UnknownTenantEvent(_)) => {
                (StatusCode::NOT_FOUND, "unknown_tenant_event")
            },
            Self::Webhook(_) | Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Provider(ProviderError::NotConnected(_)) => {
                (StatusCode::CONFLICT, "session_not_connected")
            },
            Self::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            Self::SendTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "send_timeout"),
            Self::Render(_) => (StatusCode::INTERNAL_SERVER_ERROR, "render_failed"),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Phone(e) if e.is_retryable())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let body = json!({
            "error": code,
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}
