//! RFC 7807 error bodies.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use modhub::{ErrorKind, ModuleError};
use serde::Serialize;

pub const APPLICATION_PROBLEM_JSON: &str = "application/problem+json";

#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_url: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl Problem {
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            type_url: "about:blank".to_string(),
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not Found", detail)
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, APPLICATION_PROBLEM_JSON)],
            Json(self),
        )
            .into_response()
    }
}

impl From<ModuleError> for Problem {
    fn from(err: ModuleError) -> Self {
        let (status, title) = match err.kind() {
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "Module Not Found"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "Lifecycle Conflict"),
            ErrorKind::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "Module Unavailable"),
            ErrorKind::Invalid => (StatusCode::UNPROCESSABLE_ENTITY, "Invalid Module"),
            ErrorKind::Internal => {
                tracing::error!(error = %err, "Module operation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Module Operation Failed")
            }
        };
        Problem::new(status, title, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        let p = Problem::from(ModuleError::ModuleUnavailable("blog".into()));
        assert_eq!(p.status, 503);

        let p = Problem::from(ModuleError::DependentActive {
            module: "blog".into(),
            dependents: vec!["analysis".into()],
        });
        assert_eq!(p.status(), StatusCode::CONFLICT);
        assert!(p.detail.contains("analysis"));
    }

    #[test]
    fn response_uses_problem_content_type() {
        let resp = Problem::not_found("nothing here").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            APPLICATION_PROBLEM_JSON
        );
    }
}
