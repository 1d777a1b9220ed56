//! Download responses.

use crate::output::{RenderedArtifact, TemplateOrigin};
use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use once_cell::sync::Lazy;
use regex::Regex;

/// Header describing which template a filled document was rendered from.
pub static TEMPLATE_SOURCE_HEADER: HeaderName = HeaderName::from_static("x-template-source");

static NON_PRINTABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\x20-\x7E]").unwrap());

/// Strip everything outside printable ASCII so the value is a legal header.
pub fn sanitize_header_value(value: &str) -> String {
    NON_PRINTABLE.replace_all(value, "").into_owned()
}

/// `attachment; filename=...`, quoting only when the name needs it.
pub fn content_disposition(filename: &str) -> String {
    let plain = !filename.is_empty()
        && filename
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if plain {
        format!("attachment; filename={filename}")
    } else {
        let safe = sanitize_header_value(filename).replace('"', "'");
        format!("attachment; filename=\"{safe}\"")
    }
}

/// Build a `200 OK` file download for `artifact`.
pub fn download_response(artifact: RenderedArtifact, origin: Option<&TemplateOrigin>) -> Response {
    let content_type = artifact.media_type();
    let disposition = content_disposition(&artifact.filename);
    let len = artifact.len();

    let mut response = Response::new(Body::from(artifact.bytes));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(origin) = origin {
        if let Ok(value) = HeaderValue::from_str(&sanitize_header_value(&origin.describe())) {
            headers.insert(TEMPLATE_SOURCE_HEADER.clone(), value);
        }
    }

    response
}
