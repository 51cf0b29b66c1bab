//! The user-facing web server. Serves the upload form, runs one analysis per
//! submit, and renders the report back as HTML or JSON

use crate::analysis::{AnalysisError, UploadError};
use crate::config::Settings;
use crate::gemini::{GeminiClient, ModelError};
use actix_multipart::form::MultipartFormConfig;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use anyhow::anyhow;
use std::collections::HashMap;

mod page;
mod protocol;
pub mod routes;

/// Multipart framing allowance on top of the image itself
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared, read-only state for every request
#[derive(Debug)]
pub struct AppState {
    pub model: GeminiClient,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(settings: &Settings, api_key: String) -> anyhow::Result<Self> {
        Ok(AppState {
            model: GeminiClient::new(settings, api_key)?,
            max_upload_bytes: settings.max_upload_bytes,
        })
    }
}

/// Register the state, the upload limits and every route
pub fn configure(cfg: &mut web::ServiceConfig, state: web::Data<AppState>) {
    let max_upload_bytes = state.max_upload_bytes;
    let form_limit = max_upload_bytes + FORM_OVERHEAD_BYTES;
    let form_config = MultipartFormConfig::default()
        .total_limit(form_limit)
        .memory_limit(form_limit)
        .error_handler(move |err, req| {
            routes::upload_rejected(err, req, max_upload_bytes, form_limit)
        });

    cfg.app_data(state)
        .app_data(form_config)
        .service(routes::index)
        .service(routes::analyze)
        .service(routes::api_analyze)
        .service(routes::health);
}

#[derive(Debug)]
pub struct WebError {
    err: anyhow::Error,
    status: StatusCode,
}

impl WebError {
    pub fn new(err: anyhow::Error, status: StatusCode) -> Self {
        WebError { err, status }
    }
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl actix_web::error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        let err = HashMap::from([("errors", vec![self.to_string()])]);

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(err)
    }

    fn status_code(&self) -> StatusCode {
        self.status
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> WebError {
        WebError::new(err, StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<askama::Error> for WebError {
    fn from(err: askama::Error) -> Self {
        WebError::new(anyhow!(err), StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<AnalysisError> for WebError {
    fn from(err: AnalysisError) -> Self {
        let status = status_for(&err);
        WebError::new(anyhow!(err), status)
    }
}

impl From<UploadError> for WebError {
    fn from(err: UploadError) -> Self {
        AnalysisError::from(err).into()
    }
}

/// The HTTP status each failure class maps to
pub fn status_for(err: &AnalysisError) -> StatusCode {
    match err {
        AnalysisError::Upload(UploadError::Missing) => StatusCode::BAD_REQUEST,
        AnalysisError::Upload(UploadError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        AnalysisError::Upload(UploadError::UnsupportedType(_)) => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        AnalysisError::Model(ModelError::Blocked(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisError::Model(ModelError::Quota(_)) => StatusCode::TOO_MANY_REQUESTS,
        AnalysisError::Model(ModelError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        AnalysisError::Model(_) => StatusCode::BAD_GATEWAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn upload_errors_map_to_client_statuses() {
        let too_large = WebError::from(UploadError::TooLarge { size: 10, limit: 5 });
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let unsupported = WebError::from(UploadError::UnsupportedType("x.gif".into()));
        assert_eq!(unsupported.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let missing = WebError::from(UploadError::Missing);
        assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn model_errors_map_to_gateway_statuses() {
        let cases = [
            (ModelError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (ModelError::Quota("slow down".into()), StatusCode::TOO_MANY_REQUESTS),
            (ModelError::Blocked("SAFETY".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ModelError::Empty, StatusCode::BAD_GATEWAY),
            (
                ModelError::Provider {
                    status: 500,
                    message: "boom".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (ModelError::Transport("refused".into()), StatusCode::BAD_GATEWAY),
        ];

        for (err, status) in cases {
            assert_eq!(status_for(&AnalysisError::from(err)), status);
        }
    }

    #[test]
    fn anyhow_errors_are_internal() {
        let err = WebError::from(anyhow!("oops"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "oops");
    }
}
