//! Request orchestration: resolve → render → (convert).
//!
//! [`Generator`] owns the long-lived pieces (config, HTTP client for remote
//! templates, conversion engine) and runs one request at a time through the
//! pipeline. It holds no per-request state, so one instance is shared by
//! every concurrent request.

use crate::config::GeneratorConfig;
use crate::error::DocfillError;
use crate::output::{RenderedArtifact, TargetFormat, TemplateOrigin};
use crate::payload::FillPayload;
use crate::pipeline::convert::{FormatConverter, SofficeEngine};
use crate::pipeline::render::{inspect_template, render_document, TemplateField};
use crate::pipeline::source::{ResolvedTemplate, StagedUpload, TemplateResolver, TemplateSource};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// One fill request.
#[derive(Debug)]
pub struct GenerateRequest {
    /// Render context.
    pub data: Value,
    pub source: TemplateSource,
    /// `Docx` returns the filled document as is; anything else converts it.
    pub output_format: TargetFormat,
}

impl GenerateRequest {
    /// Combine a normalised payload with an optional uploaded template.
    pub fn from_payload(payload: FillPayload, upload: Option<StagedUpload>) -> Self {
        Self {
            source: TemplateSource::select(upload, payload.template_url.as_deref()),
            data: payload.data,
            output_format: payload.output_format,
        }
    }
}

/// A finished fill request.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub artifact: RenderedArtifact,
    pub origin: TemplateOrigin,
}

/// Runs the pipeline.
#[derive(Debug, Clone)]
pub struct Generator {
    config: GeneratorConfig,
    resolver: TemplateResolver,
    converter: FormatConverter,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Result<Self, DocfillError> {
        let resolver = TemplateResolver::new(
            config.default_template.clone(),
            config.download_timeout_secs,
        )?;

        let engine = match (&config.engine, &config.soffice_path) {
            (Some(engine), _) => Arc::clone(engine),
            (None, Some(path)) => Arc::new(SofficeEngine::with_executable(path.clone())),
            (None, None) => Arc::new(SofficeEngine::discover()),
        };
        let converter = FormatConverter::new(engine, config.conversion_timeout_secs);

        debug!(
            "Generator ready: default template {:?}, engine {}",
            config.default_template,
            converter.engine_name()
        );

        Ok(Self {
            config,
            resolver,
            converter,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn converter(&self) -> &FormatConverter {
        &self.converter
    }

    /// Fill a template and optionally convert the result.
    pub async fn generate(&self, request: GenerateRequest) -> Result<GeneratedDocument, DocfillError> {
        let start = Instant::now();

        // ── Step 1: Resolve template ─────────────────────────────────────
        let ResolvedTemplate { bytes, origin } = self.resolver.resolve(request.source).await?;
        info!("Template: {} ({} bytes)", origin.describe(), bytes.len());

        // ── Step 2: Render ───────────────────────────────────────────────
        let rendered = render_document(
            bytes,
            request.data,
            self.config.missing_fields,
            self.config.docx_filename.clone(),
        )
        .await?;

        // ── Step 3: Convert (optional) ───────────────────────────────────
        let artifact = match request.output_format {
            TargetFormat::Docx => rendered,
            target => {
                self.converter
                    .convert_bytes(
                        &rendered.bytes,
                        &rendered.filename,
                        target,
                        self.config.converted_filename(target.extension()),
                    )
                    .await?
            }
        };

        info!(
            "Generated {} ({} bytes) in {}ms",
            artifact.filename,
            artifact.len(),
            start.elapsed().as_millis()
        );
        Ok(GeneratedDocument { artifact, origin })
    }

    /// Convert an uploaded document. The staged file is removed afterwards.
    pub async fn convert_upload(
        &self,
        mut upload: StagedUpload,
        target: TargetFormat,
    ) -> Result<RenderedArtifact, DocfillError> {
        if upload.is_empty() {
            return Err(DocfillError::InvalidRequest {
                reason: format!("uploaded file '{}' is empty", upload.original_name()),
            });
        }
        upload.finish().await?;
        info!(
            "Converting upload '{}' ({} bytes) → {}",
            upload.original_name(),
            upload.len(),
            target
        );
        self.converter
            .convert_file(
                upload.path(),
                upload.original_name(),
                target,
                self.config.converted_filename(target.extension()),
            )
            .await
    }

    /// Convert a local file (CLI).
    pub async fn convert_path(
        &self,
        path: &Path,
        target: TargetFormat,
    ) -> Result<RenderedArtifact, DocfillError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("input");
        self.converter
            .convert_file(
                path,
                name,
                target,
                self.config.converted_filename(target.extension()),
            )
            .await
    }

    /// List the tags of a template without rendering it.
    pub async fn inspect(
        &self,
        source: TemplateSource,
    ) -> Result<(Vec<TemplateField>, TemplateOrigin), DocfillError> {
        let ResolvedTemplate { bytes, origin } = self.resolver.resolve(source).await?;
        let fields = tokio::task::spawn_blocking(move || inspect_template(&bytes))
            .await
            .map_err(|e| DocfillError::RenderEngineFailure(format!("Inspect task panicked: {e}")))??;
        Ok((fields, origin))
    }
}
