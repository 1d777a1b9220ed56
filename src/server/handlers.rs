//! Route handlers.

use super::error::ApiError;
use super::forms::{read_convert_form, read_fill_form};
use super::response::download_response;
use super::AppState;
use crate::error::DocfillError;
use crate::generate::GenerateRequest;
use crate::output::TargetFormat;
use crate::payload::RawFillRequest;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use serde::Serialize;

/// `POST /generate-docx`: fill a template with JSON data.
///
/// Accepts `multipart/form-data` (fields `data`/`jsonPayload`, `templateUrl`,
/// `outputFormat`, file `template`) or a JSON body with the same keys.
pub async fn generate_docx(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let (raw, template) = if is_multipart(&request) {
        let mut multipart = multipart(request, &state).await?;
        let form = read_fill_form(&mut multipart, state.upload_dir()).await?;
        (form.request, form.template)
    } else {
        let body = axum::body::to_bytes(request.into_body(), state.max_body_bytes)
            .await
            .map_err(|e| DocfillError::InvalidRequest {
                reason: e.to_string(),
            })?;
        (RawFillRequest::from_json_body(&body)?, None)
    };

    let payload = raw.normalize()?;
    let generated = state
        .generator
        .generate(GenerateRequest::from_payload(payload, template))
        .await?;

    Ok(download_response(generated.artifact, Some(&generated.origin)))
}

/// `POST /upload`: convert an uploaded document (default target: PDF).
pub async fn convert_upload(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    if !is_multipart(&request) {
        return Err(DocfillError::NoFileUploaded.into());
    }
    let mut multipart = multipart(request, &state).await?;
    let form = read_convert_form(&mut multipart, state.upload_dir()).await?;

    let file = form.file.ok_or(DocfillError::NoFileUploaded)?;
    let target = match form.format.as_deref().map(str::trim) {
        None | Some("") => TargetFormat::Pdf,
        Some(format) => format.parse()?,
    };

    let artifact = state.generator.convert_upload(file, target).await?;
    Ok(download_response(artifact, None))
}

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    converter: bool,
}

/// `GET /healthz`
pub async fn healthz(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        converter: state.generator.converter().is_available(),
    })
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
}

async fn multipart(request: Request, state: &AppState) -> Result<Multipart, DocfillError> {
    Multipart::from_request(request, state)
        .await
        .map_err(|e| DocfillError::InvalidRequest {
            reason: e.body_text(),
        })
}
