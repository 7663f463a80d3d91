use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use markmap_api_types::{ErrorBody, ErrorMessage};

use crate::application::error::{ErrorReport, SubmitError};
use crate::infra::storage::StoreError;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const RENDER: &str = "render_error";
    pub const STORAGE: &str = "storage_error";
}

/// JSON error response. The full diagnostic goes to the log through the
/// attached [`ErrorReport`]; clients get `message` and an optional `hint`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            detail: None,
        }
    }

    /// Log `detail` instead of the hint.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn rate_limited(retry_after: u64) -> Response {
        let mut response = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            codes::RATE_LIMITED,
            "Rate limit exceeded",
            Some(format!("Retry after {retry_after} seconds")),
        )
        .into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let logged = self
            .detail
            .clone()
            .or_else(|| self.hint.clone())
            .unwrap_or_else(|| self.message.to_string());
        let body = ErrorBody {
            success: false,
            error: ErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(
            "infra::http::error",
            self.status,
            format!("{}: {logged}", self.code),
        )
        .attach(&mut response);
        response
    }
}

impl From<SubmitError> for ApiError {
    fn from(error: SubmitError) -> Self {
        match &error {
            SubmitError::Validation(reason) => {
                ApiError::bad_request("Submission rejected", Some(reason.clone()))
            }
            SubmitError::Conversion(_) | SubmitError::InFlightFailed(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::RENDER,
                "Markdown conversion failed",
                Some(error.diagnostic()),
            )
            .with_detail(error_chain(&error)),
            SubmitError::Storage(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE,
                "Artifact storage failed",
                None,
            )
            .with_detail(error_chain(&error)),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::InvalidName(_) | StoreError::NotFound(_) => {
                ApiError::not_found("Artifact not found")
            }
            other => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE,
                "Artifact storage failed",
                None,
            )
            .with_detail(error_chain(&other)),
        }
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut current = error.source();
    while let Some(inner) = current {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        current = inner.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::application::render::CliError;

    async fn body_of(response: Response) -> ErrorBody {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("error body")
    }

    #[tokio::test]
    async fn conversion_errors_expose_converter_stderr() {
        let error = SubmitError::Conversion(CliError::Exit {
            program: "markmap".to_string(),
            exit_code: Some(1),
            stderr: "unexpected indent".to_string(),
        });

        let response = ApiError::from(error).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<ErrorReport>().is_some());

        let body = body_of(response).await;
        assert!(!body.success);
        assert_eq!(body.error.code, codes::RENDER);
        assert_eq!(body.error.hint.as_deref(), Some("unexpected indent"));
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let response = ApiError::rate_limited(60);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok()),
            Some("60")
        );
        assert_eq!(body_of(response).await.error.code, codes::RATE_LIMITED);
    }

    #[test]
    fn missing_files_map_to_not_found() {
        let error = ApiError::from(StoreError::NotFound("a.html".to_string()));
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }
}
