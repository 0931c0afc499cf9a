use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use foodbridge_shared::CoreError;
use foodbridge_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        ServerError::Core(e.into())
    }
}

impl ServerError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::Core(e) => e.kind(),
            ServerError::BadRequest(_) => "bad_request",
            ServerError::Unauthenticated(_) => "unauthenticated",
            ServerError::Forbidden(_) => "forbidden",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Core(core) => match core {
                CoreError::Validation(_) => (StatusCode::BAD_REQUEST, core.to_string()),
                CoreError::Authorization(_) => (StatusCode::FORBIDDEN, core.to_string()),
                CoreError::NotFound(_) => (StatusCode::NOT_FOUND, core.to_string()),
                CoreError::Conflict => (StatusCode::CONFLICT, core.to_string()),
                CoreError::Guard(_) => (StatusCode::UNPROCESSABLE_ENTITY, core.to_string()),
                CoreError::Store(detail) => {
                    tracing::error!(error = %detail, "store failure");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
            },
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
            "kind": self.kind(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use foodbridge_shared::error::GuardViolation;
    use serde_json::Value;

    use super::*;

    async fn render(err: ServerError) -> (StatusCode, Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn conflict_maps_to_409() {
        let (status, body) = render(CoreError::Conflict.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");
        assert_eq!(body["error"], "Conflict, please try again");
    }

    #[tokio::test]
    async fn guard_and_store_failures() {
        let (status, body) = render(CoreError::Guard(GuardViolation::AlreadyClaimed).into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "guard_violation");

        let (status, body) = render(CoreError::Store("disk I/O error".into()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }
}
