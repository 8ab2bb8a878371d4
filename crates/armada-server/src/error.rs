use armada_core::error::{ArmadaError, ErrorCategory};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

// ---------------------------------------------------------------------------
// Transport-only errors
// ---------------------------------------------------------------------------

/// Missing or unknown `x-armada-user` header.
#[derive(Debug)]
struct UnauthorizedError(String);

impl std::fmt::Display for UnauthorizedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UnauthorizedError {}

/// Malformed path segment or request body.
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

/// Route exists but not for this entity kind.
#[derive(Debug)]
struct NotFoundError(String);

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self(UnauthorizedError(msg.into()).into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }

    fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<UnauthorizedError>().is_some() {
            return StatusCode::UNAUTHORIZED;
        }
        if self.0.downcast_ref::<BadRequestError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        if self.0.downcast_ref::<NotFoundError>().is_some() {
            return StatusCode::NOT_FOUND;
        }
        match self.0.downcast_ref::<ArmadaError>().map(ArmadaError::category) {
            Some(ErrorCategory::Validation) => StatusCode::BAD_REQUEST,
            Some(ErrorCategory::PermissionDenied) => StatusCode::FORBIDDEN,
            Some(ErrorCategory::NotFound) | Some(ErrorCategory::NotApplicable) => {
                StatusCode::NOT_FOUND
            }
            Some(ErrorCategory::Conflict) => StatusCode::CONFLICT,
            Some(ErrorCategory::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
            Some(ErrorCategory::Internal) | None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let mut body = serde_json::json!({ "error": self.0.to_string() });
        if let Some(ArmadaError::EngineRejected { history_id, .. }) = self.0.downcast_ref() {
            body["history_id"] = serde_json::json!(history_id);
        }
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_core::history::EngineHandle;
    use armada_core::types::EntityRef;

    fn status_of(err: ArmadaError) -> StatusCode {
        AppError(err.into()).into_response().status()
    }

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(
            status_of(ArmadaError::Validation("dup".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn permission_denied_maps_to_403() {
        assert_eq!(
            status_of(ArmadaError::PermissionDenied("no".into())),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn not_found_and_not_applicable_map_to_404() {
        assert_eq!(
            status_of(ArmadaError::NotFound(EntityRef::host(3))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ArmadaError::NotApplicable("See project permissions.".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(ArmadaError::UserNotFound(9)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ArmadaError::RunNotFound(EngineHandle::new())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn conflict_maps_to_409() {
        assert_eq!(
            status_of(ArmadaError::Conflict("cycle".into())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn engine_rejection_maps_to_503() {
        assert_eq!(
            status_of(ArmadaError::EngineRejected {
                history_id: 4,
                reason: "offline".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn storage_maps_to_500() {
        assert_eq!(
            status_of(ArmadaError::Db("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let other = AppError(anyhow::anyhow!("unexpected")).into_response();
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn transport_constructors() {
        assert_eq!(
            AppError::unauthorized("who?").into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::bad_request("bad").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::not_found("nope").into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
