//! Template resolution: turn one of three template sources into bytes.
//!
//! Precedence is fixed: an uploaded file beats a `templateUrl`, which beats
//! the deployment default. Uploads are staged in a [`NamedTempFile`] so the
//! bytes never sit in the multipart buffer longer than necessary; the file is
//! removed when the [`StagedUpload`] is dropped, whichever way the request
//! ends.

use crate::config::DefaultTemplate;
use crate::error::DocfillError;
use crate::output::TemplateOrigin;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

// ── Staged uploads ───────────────────────────────────────────────────────

/// An uploaded file written to a private temp file.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    writer: tokio::fs::File,
    original_name: String,
    len: u64,
}

impl StagedUpload {
    /// Create an empty staging file in `dir` (or the system temp dir).
    pub fn new_in(dir: Option<&Path>, original_name: impl Into<String>) -> Result<Self, DocfillError> {
        let original_name = original_name.into();
        let suffix = extension_of(&original_name)
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();

        let mut builder = tempfile::Builder::new();
        builder.prefix("docfill-upload-").suffix(&suffix);
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| DocfillError::Internal(format!("Failed to stage upload: {e}")))?;

        let writer = file
            .reopen()
            .map(tokio::fs::File::from_std)
            .map_err(|e| DocfillError::Internal(format!("Failed to open staged upload: {e}")))?;

        debug!("Staging upload '{}' at {}", original_name, file.path().display());
        Ok(Self {
            file,
            writer,
            original_name,
            len: 0,
        })
    }

    /// Stage an in-memory buffer in one step.
    pub async fn from_bytes(
        dir: Option<&Path>,
        original_name: impl Into<String>,
        bytes: &[u8],
    ) -> Result<Self, DocfillError> {
        let mut staged = Self::new_in(dir, original_name)?;
        staged.append(bytes).await?;
        Ok(staged)
    }

    /// Append a chunk of the upload body.
    pub async fn append(&mut self, chunk: &[u8]) -> Result<(), DocfillError> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| DocfillError::Internal(format!("Failed to write staged upload: {e}")))?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Flush buffered writes so the file on disk is complete.
    pub async fn finish(&mut self) -> Result<(), DocfillError> {
        self.writer
            .flush()
            .await
            .map_err(|e| DocfillError::Internal(format!("Failed to flush staged upload: {e}")))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Filename as sent by the client (may be empty).
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the staged bytes back. The temp file is removed afterwards.
    pub async fn into_bytes(mut self) -> Result<Vec<u8>, DocfillError> {
        self.finish().await?;
        tokio::fs::read(self.file.path())
            .await
            .map_err(|e| DocfillError::Internal(format!("Failed to read staged upload: {e}")))
    }
}

/// Lowercased extension of a client filename, if it is short and alphanumeric.
pub(crate) fn extension_of(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// ── Source selection ─────────────────────────────────────────────────────

/// Where a request's template should come from, after precedence is applied.
#[derive(Debug)]
pub enum TemplateSource {
    Uploaded(StagedUpload),
    RemoteUrl(String),
    Default,
}

impl TemplateSource {
    /// Apply upload > URL > default. A blank URL counts as absent.
    pub fn select(upload: Option<StagedUpload>, url: Option<&str>) -> Self {
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        match (upload, url) {
            (Some(upload), Some(url)) => {
                warn!(
                    "Both an uploaded template and templateUrl '{}' were supplied; using the upload",
                    url
                );
                TemplateSource::Uploaded(upload)
            }
            (Some(upload), None) => TemplateSource::Uploaded(upload),
            (None, Some(url)) => TemplateSource::RemoteUrl(url.to_string()),
            (None, None) => TemplateSource::Default,
        }
    }
}

/// Template bytes plus where they came from.
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub bytes: Vec<u8>,
    pub origin: TemplateOrigin,
}

// ── Resolver ─────────────────────────────────────────────────────────────

/// Reads templates from uploads, remote URLs, or the default location.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    default: DefaultTemplate,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl TemplateResolver {
    pub fn new(default: DefaultTemplate, timeout_secs: u64) -> Result<Self, DocfillError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DocfillError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            default,
            client,
            timeout_secs,
        })
    }

    pub fn default_template(&self) -> &DefaultTemplate {
        &self.default
    }

    /// Obtain the template bytes for `source`.
    ///
    /// Zero-byte templates are rejected here so the renderer never sees them.
    pub async fn resolve(&self, source: TemplateSource) -> Result<ResolvedTemplate, DocfillError> {
        let resolved = match source {
            TemplateSource::Uploaded(upload) => {
                let original_name = upload.original_name().to_string();
                let bytes = upload.into_bytes().await?;
                info!("Using uploaded template '{}' ({} bytes)", original_name, bytes.len());
                ResolvedTemplate {
                    bytes,
                    origin: TemplateOrigin::Uploaded { original_name },
                }
            }
            TemplateSource::RemoteUrl(url) => {
                let bytes = self.download(&url).await?;
                ResolvedTemplate {
                    bytes,
                    origin: TemplateOrigin::Url { url },
                }
            }
            TemplateSource::Default => {
                let path = self.read_default_path()?;
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(DocfillError::TemplateMissing {
                            searched: vec![path],
                        });
                    }
                    Err(e) => {
                        return Err(DocfillError::Internal(format!(
                            "Failed to read default template '{}': {e}",
                            path.display()
                        )));
                    }
                };
                debug!("Using default template {} ({} bytes)", path.display(), bytes.len());
                ResolvedTemplate {
                    bytes,
                    origin: TemplateOrigin::Default { path },
                }
            }
        };

        if resolved.bytes.is_empty() {
            return Err(DocfillError::EmptyTemplate {
                origin: empty_origin_label(&resolved.origin),
                client_supplied: resolved.origin.is_client_supplied(),
            });
        }

        Ok(resolved)
    }

    fn read_default_path(&self) -> Result<PathBuf, DocfillError> {
        match &self.default {
            DefaultTemplate::Found(path) => Ok(path.clone()),
            DefaultTemplate::Missing { searched } => Err(DocfillError::TemplateMissing {
                searched: searched.clone(),
            }),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, DocfillError> {
        validate_template_url(url)?;
        info!("Downloading template from: {}", url);

        let to_error = |e: reqwest::Error| {
            if e.is_timeout() {
                DocfillError::TemplateDownloadTimeout {
                    url: url.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                DocfillError::TemplateDownloadFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(to_error)?;

        if !response.status().is_success() {
            return Err(DocfillError::TemplateDownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let bytes = response.bytes().await.map_err(to_error)?;
        info!("Downloaded template: {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}

/// Reject anything that is not an absolute `http`/`https` URL.
pub fn validate_template_url(url: &str) -> Result<reqwest::Url, DocfillError> {
    let invalid = || DocfillError::InvalidTemplateUrl {
        url: url.to_string(),
    };
    let parsed = reqwest::Url::parse(url).map_err(|_| invalid())?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(invalid()),
    }
}

fn empty_origin_label(origin: &TemplateOrigin) -> String {
    match origin {
        TemplateOrigin::Uploaded { original_name } => format!("upload '{original_name}'"),
        TemplateOrigin::Url { url } => format!("URL '{url}'"),
        TemplateOrigin::Default { .. } => "default template".to_string(),
    }
}
