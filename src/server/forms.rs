//! Multipart form intake.
//!
//! File parts are streamed chunk by chunk into a [`StagedUpload`]; they are
//! never buffered whole in memory. If reading fails half way the partially
//! written staging file is dropped, and with it deleted.

use crate::error::DocfillError;
use crate::payload::RawFillRequest;
use crate::pipeline::source::StagedUpload;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Fields of a multipart `/generate-docx` request.
#[derive(Debug, Default)]
pub struct FillForm {
    pub request: RawFillRequest,
    pub template: Option<StagedUpload>,
}

/// Fields of a multipart `/upload` request.
#[derive(Debug, Default)]
pub struct ConvertForm {
    pub file: Option<StagedUpload>,
    pub format: Option<String>,
}

pub async fn read_fill_form(
    multipart: &mut Multipart,
    upload_dir: Option<&Path>,
) -> Result<FillForm, DocfillError> {
    let mut form = FillForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("data") => form.request.data = Some(Value::String(text(field).await?)),
            Some("jsonPayload") => {
                form.request.json_payload = Some(Value::String(text(field).await?));
            }
            Some("templateUrl") => form.request.template_url = Some(text(field).await?),
            Some("outputFormat") => form.request.output_format = Some(text(field).await?),
            Some("template") if form.template.is_none() => {
                form.template = stage(field, upload_dir).await?;
            }
            other => debug!("Ignoring form field {:?}", other),
        }
    }

    Ok(form)
}

pub async fn read_convert_form(
    multipart: &mut Multipart,
    upload_dir: Option<&Path>,
) -> Result<ConvertForm, DocfillError> {
    let mut form = ConvertForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") if form.file.is_none() => form.file = stage(field, upload_dir).await?,
            Some("format") => form.format = Some(text(field).await?),
            other => debug!("Ignoring form field {:?}", other),
        }
    }

    Ok(form)
}

async fn text(field: Field<'_>) -> Result<String, DocfillError> {
    field.text().await.map_err(multipart_error)
}

/// Stream a file part to disk.
///
/// Browsers submit an empty part with no filename when no file was chosen;
/// that counts as no upload at all.
async fn stage(
    mut field: Field<'_>,
    upload_dir: Option<&Path>,
) -> Result<Option<StagedUpload>, DocfillError> {
    let name = field.file_name().unwrap_or_default().to_string();
    let mut staged = StagedUpload::new_in(upload_dir, name)?;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        staged.append(&chunk).await?;
    }
    staged.finish().await?;

    if staged.is_empty() && staged.original_name().trim().is_empty() {
        return Ok(None);
    }
    debug!(
        "Staged upload '{}' ({} bytes)",
        staged.original_name(),
        staged.len()
    );
    Ok(Some(staged))
}

fn multipart_error(err: MultipartError) -> DocfillError {
    let reason = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        "request body is larger than the configured limit".to_string()
    } else {
        err.body_text()
    };
    DocfillError::InvalidRequest { reason }
}
