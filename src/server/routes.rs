//! Routes: the upload form, the HTML and JSON analysis endpoints, and a
//! health check. Each submit makes at most one call to the model

use super::page::{IndexPage, ReportPage};
use super::protocol::{AnalysisJson, UploadForm};
use super::{status_for, AppState, WebError};
use crate::analysis::{
    AnalysisError, AnalysisRequest, AnalysisResponse, UploadError, UploadedImage,
};
use crate::config::REPORT_FILE_NAME;
use actix_multipart::form::MultipartForm;
use actix_multipart::MultipartError;
use actix_web::error::{InternalError, PayloadError};
use actix_web::http::header::{self, ContentType};
use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use anyhow::anyhow;
use askama::Template;
use serde_json::json;
use tracing::*;

type Result<T> = std::result::Result<T, WebError>;

const NO_UPLOAD_NOTICE: &str = "Upload a PNG or JPEG image before generating the analysis.";

/// Validate the upload and, if there is one, ask the model about it
async fn run_analysis(
    state: &AppState,
    form: UploadForm,
) -> std::result::Result<Option<(UploadedImage, AnalysisResponse)>, AnalysisError> {
    let Some(image) = form.into_image(state.max_upload_bytes)? else {
        debug!("submit without an upload, skipping the model call");
        return Ok(None);
    };

    info!(
        "analyzing {} byte {} upload",
        image.bytes().len(),
        image.mime_type()
    );

    let request = AnalysisRequest::new(image);
    let response = state.model.generate(&request).await?;

    Ok(Some((request.image, response)))
}

fn html(status: StatusCode, body: String) -> HttpResponse {
    HttpResponse::build(status)
        .content_type(ContentType::html())
        .body(body)
}

/// Reject a form the multipart extractor could not read. A form over the
/// size limit is a 413, anything else a 400. The HTML form gets its page back
pub(super) fn upload_rejected(
    err: MultipartError,
    req: &HttpRequest,
    max_upload_bytes: usize,
    form_limit: usize,
) -> actix_web::Error {
    let content_length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    let oversized = matches!(err, MultipartError::Payload(PayloadError::Overflow))
        || content_length.is_some_and(|len| len > form_limit);

    let (status, message) = if oversized {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("image is larger than the {max_upload_bytes} byte limit"),
        )
    } else {
        (StatusCode::BAD_REQUEST, format!("invalid upload: {err}"))
    };
    warn!("rejected upload: {message}");

    if req.path() == "/analyze" {
        let page = IndexPage {
            notice: None,
            error: Some(message.clone()),
        };
        if let Ok(body) = page.render() {
            return InternalError::from_response(err, html(status, body)).into();
        }
    }

    WebError::new(anyhow!(message), status).into()
}

#[get("/")]
pub async fn index() -> Result<impl Responder> {
    Ok(html(StatusCode::OK, IndexPage::default().render()?))
}

/// Form submit: render the report page, or the form again with a notice or
/// an error
#[post("/analyze")]
pub async fn analyze(
    form: MultipartForm<UploadForm>,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    match run_analysis(&state, form.into_inner()).await {
        Ok(Some((image, response))) => {
            let image_uri = image.data_uri();
            let download_uri = response.download_uri();
            let page = ReportPage {
                image_uri: &image_uri,
                report: &response.text,
                download_uri: &download_uri,
                file_name: REPORT_FILE_NAME,
            };
            Ok(html(StatusCode::OK, page.render()?))
        }
        Ok(None) => {
            let page = IndexPage {
                notice: Some(NO_UPLOAD_NOTICE.to_string()),
                error: None,
            };
            Ok(html(StatusCode::OK, page.render()?))
        }
        Err(err) => {
            warn!("analysis failed: {err}");
            let page = IndexPage {
                notice: None,
                error: Some(err.to_string()),
            };
            Ok(html(status_for(&err), page.render()?))
        }
    }
}

/// The same pipeline as `/analyze`, answering in JSON
#[post("/api/analyze")]
pub async fn api_analyze(
    form: MultipartForm<UploadForm>,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    let (image, response) = run_analysis(&state, form.into_inner())
        .await?
        .ok_or(UploadError::Missing)?;

    info!("finished serving analysis request");

    Ok(web::Json(AnalysisJson {
        mime_type: image.mime_type(),
        report: response.text,
        file_name: REPORT_FILE_NAME,
    }))
}

#[get("/health")]
pub async fn health() -> impl Responder {
    web::Json(json!({ "status": "ok" }))
}
