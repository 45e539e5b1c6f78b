use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use driftwatch_engine::DispatchError;
use driftwatch_store::StoreError;
use serde_json::json;
use tracing::error;

/// Error body is always `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NotFound(id) => Self::NotFound(format!("event not found: {id}")),
            DispatchError::AlreadyRunning(_) => Self::Conflict(e.to_string()),
            DispatchError::ShuttingDown => Self::Unavailable(e.to_string()),
            DispatchError::Store(store) => store.into(),
            DispatchError::Failed(_) => Self::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwatch_core::ids::EventId;

    #[test]
    fn dispatch_errors_map_to_statuses() {
        let id = EventId::from_raw("evt_x");
        assert_eq!(
            ApiError::from(DispatchError::NotFound(id.clone())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(DispatchError::AlreadyRunning(id)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(DispatchError::ShuttingDown).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn store_not_found_is_404() {
        let err = ApiError::from(StoreError::NotFound("event evt_1".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = ApiError::from(StoreError::Database("locked".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
