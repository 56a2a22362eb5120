use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use timelock_core::LedgerError;
use tracing::error;

/// A handler failure rendered as `{"error": ...}` with a matching status.
#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Ledger(e) => match e {
                LedgerError::NotFound | LedgerError::ContractNotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::StillLocked { .. } => StatusCode::FORBIDDEN,
                LedgerError::UnlockInPast => StatusCode::BAD_REQUEST,
                LedgerError::StaleTemplate | LedgerError::MiningAborted => StatusCode::CONFLICT,
                LedgerError::Collaborator { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::BadRequest(msg) => json!({ "error": msg }),
            Self::Ledger(LedgerError::StillLocked { unlock_time }) => json!({
                "error": "message is still locked",
                "unlock_time": unlock_time,
            }),
            Self::Ledger(e) => {
                if status.is_server_error() {
                    error!(error = ?e, "request failed");
                }
                json!({ "error": e.to_string() })
            }
        };
        (status, Json(body)).into_response()
    }
}
