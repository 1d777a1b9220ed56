//! Error types for the docfill library.
//!
//! Every failure of the generation pipeline is a [`DocfillError`]. Variants
//! are grouped by the stage that produced them (see [`ErrorCategory`]):
//!
//! * **Client input**: the request itself is unusable (no data, bad JSON,
//!   no file). Nothing was attempted.
//! * **Template resolution**: the template bytes could not be obtained.
//!   A bad client-supplied URL ([`DocfillError::TemplateDownloadFailed`]) is
//!   distinct from a misconfigured deployment
//!   ([`DocfillError::TemplateMissing`]).
//! * **Render**: the template archive or its tags could not be merged with
//!   the data.
//! * **Conversion**: the external conversion engine was absent, failed, or
//!   timed out.
//! * **Internal**: anything else.
//!
//! `Display` carries full detail for logs and the CLI. The HTTP boundary uses
//! [`DocfillError::public_message`] instead, which never includes server
//! paths, engine output, or panic payloads.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the docfill library.
#[derive(Debug, Error)]
pub enum DocfillError {
    // ── Client input errors ───────────────────────────────────────────────
    /// Fill mode was requested without a `data` payload.
    #[error("Missing 'data' field")]
    MissingData,

    /// The `data` payload is not valid structured data.
    #[error("Invalid JSON in 'data': {reason}")]
    InvalidDataFormat { reason: String },

    /// Convert mode was requested without an uploaded source file.
    #[error("No file uploaded")]
    NoFileUploaded,

    /// The request body could not be read (bad multipart framing, oversized body).
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The requested output format is not one the converter can produce.
    #[error("Unsupported output format '{format}'")]
    UnsupportedFormat { format: String },

    // ── Template resolution errors ────────────────────────────────────────
    /// No default template exists at any of the searched locations.
    #[error("Default template not found; searched: {}", display_paths(searched))]
    TemplateMissing { searched: Vec<PathBuf> },

    /// The resolved template has zero bytes.
    #[error("Template from {origin} is empty")]
    EmptyTemplate { origin: String, client_supplied: bool },

    /// `templateUrl` is not an absolute HTTP/HTTPS URL.
    #[error("Invalid template URL '{url}': expected an http:// or https:// URL")]
    InvalidTemplateUrl { url: String },

    /// The remote template could not be fetched.
    #[error("Failed to download template from '{url}': {reason}")]
    TemplateDownloadFailed { url: String, reason: String },

    /// The remote template did not arrive within the download timeout.
    #[error("Template download timed out after {secs}s for '{url}'")]
    TemplateDownloadTimeout { url: String, secs: u64 },

    // ── Render errors ─────────────────────────────────────────────────────
    /// The template bytes are not a zip-packaged word-processing document.
    #[error("Template is not a valid DOCX archive: {detail}")]
    InvalidTemplateFormat { detail: String },

    /// A tag in the template is syntactically invalid.
    #[error("Malformed template markup in {part}: {detail}")]
    MalformedTemplateMarkup { part: String, detail: String },

    /// A tag references data that is not present in the render context.
    #[error("Missing field '{tag}' (referenced in {part})")]
    MissingField { tag: String, part: String },

    /// The renderer failed for a reason unrelated to the template or data.
    #[error("Render engine failure: {0}")]
    RenderEngineFailure(String),

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The conversion engine is not installed or could not be started.
    #[error("Conversion engine '{engine}' is unavailable: {reason}")]
    ConversionEngineUnavailable { engine: String, reason: String },

    /// The conversion engine ran but did not produce output.
    #[error("Conversion failed: {detail}")]
    ConversionFailed { detail: String },

    /// The conversion engine exceeded its time budget.
    #[error("Conversion timed out after {secs}s")]
    ConversionTimeout { secs: u64 },

    // ── I/O and config errors ─────────────────────────────────────────────
    /// Could not write an output file (CLI).
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The stage of the pipeline an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ClientInput,
    TemplateResolution,
    Render,
    Conversion,
    Internal,
}

impl DocfillError {
    /// Stable snake_case code identifying the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DocfillError::MissingData => "missing_data",
            DocfillError::InvalidDataFormat { .. } => "invalid_data_format",
            DocfillError::NoFileUploaded => "no_file_uploaded",
            DocfillError::InvalidRequest { .. } => "invalid_request",
            DocfillError::UnsupportedFormat { .. } => "unsupported_format",
            DocfillError::TemplateMissing { .. } => "template_missing",
            DocfillError::EmptyTemplate { .. } => "template_empty",
            DocfillError::InvalidTemplateUrl { .. } => "invalid_template_url",
            DocfillError::TemplateDownloadFailed { .. } => "template_download_failed",
            DocfillError::TemplateDownloadTimeout { .. } => "template_download_timeout",
            DocfillError::InvalidTemplateFormat { .. } => "invalid_template_format",
            DocfillError::MalformedTemplateMarkup { .. } => "malformed_template_markup",
            DocfillError::MissingField { .. } => "missing_field",
            DocfillError::RenderEngineFailure(_) => "render_engine_failure",
            DocfillError::ConversionEngineUnavailable { .. } => "conversion_engine_unavailable",
            DocfillError::ConversionFailed { .. } => "conversion_failed",
            DocfillError::ConversionTimeout { .. } => "conversion_timeout",
            DocfillError::OutputWriteFailed { .. }
            | DocfillError::InvalidConfig(_)
            | DocfillError::Internal(_) => "internal",
        }
    }

    /// Which pipeline stage produced the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            DocfillError::MissingData
            | DocfillError::InvalidDataFormat { .. }
            | DocfillError::NoFileUploaded
            | DocfillError::InvalidRequest { .. }
            | DocfillError::UnsupportedFormat { .. } => ErrorCategory::ClientInput,
            DocfillError::TemplateMissing { .. }
            | DocfillError::EmptyTemplate { .. }
            | DocfillError::InvalidTemplateUrl { .. }
            | DocfillError::TemplateDownloadFailed { .. }
            | DocfillError::TemplateDownloadTimeout { .. } => ErrorCategory::TemplateResolution,
            DocfillError::InvalidTemplateFormat { .. }
            | DocfillError::MalformedTemplateMarkup { .. }
            | DocfillError::MissingField { .. }
            | DocfillError::RenderEngineFailure(_) => ErrorCategory::Render,
            DocfillError::ConversionEngineUnavailable { .. }
            | DocfillError::ConversionFailed { .. }
            | DocfillError::ConversionTimeout { .. } => ErrorCategory::Conversion,
            DocfillError::OutputWriteFailed { .. }
            | DocfillError::InvalidConfig(_)
            | DocfillError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// `true` when the caller (not the deployment) is at fault.
    pub fn is_client_error(&self) -> bool {
        match self {
            DocfillError::EmptyTemplate {
                client_supplied, ..
            } => *client_supplied,
            DocfillError::RenderEngineFailure(_) | DocfillError::TemplateMissing { .. } => false,
            other => matches!(
                other.category(),
                ErrorCategory::ClientInput
                    | ErrorCategory::TemplateResolution
                    | ErrorCategory::Render
            ),
        }
    }

    /// Message safe to show to a remote client.
    ///
    /// Client-caused failures repeat their full `Display` text (it only
    /// contains what the client sent). Server-side failures are reduced to a
    /// fixed sentence.
    pub fn public_message(&self) -> String {
        match self {
            DocfillError::TemplateMissing { .. } => "Default template not found".to_string(),
            DocfillError::EmptyTemplate {
                client_supplied: false,
                ..
            } => "Default template is empty".to_string(),
            DocfillError::RenderEngineFailure(_) => "Template rendering failed".to_string(),
            DocfillError::ConversionEngineUnavailable { .. } => {
                "Conversion engine is unavailable".to_string()
            }
            DocfillError::ConversionFailed { .. } => "Conversion failed".to_string(),
            DocfillError::ConversionTimeout { secs } => {
                format!("Conversion timed out after {secs}s")
            }
            DocfillError::OutputWriteFailed { .. }
            | DocfillError::InvalidConfig(_)
            | DocfillError::Internal(_) => "Internal server error".to_string(),
            client => client.to_string(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(no locations configured)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
