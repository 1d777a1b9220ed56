//! Format conversion through an external engine (LibreOffice by default).
//!
//! ## Isolation
//!
//! Every conversion gets its own temp directory holding a copy of the
//! input, an output directory, and (for `soffice`) a private user profile.
//! Concurrent conversions therefore never share a lock file or profile, and
//! dropping the [`TempDir`] removes everything whether the engine succeeded,
//! failed, or was killed on timeout.

use crate::error::DocfillError;
use crate::output::{RenderedArtifact, TargetFormat};
use crate::pipeline::source::extension_of;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// One conversion request handed to an engine.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Source document (a private copy; the engine may read it freely).
    pub input_path: PathBuf,
    /// Empty directory the engine must write its output into.
    pub out_dir: PathBuf,
    /// Private scratch space for engine state.
    pub scratch_dir: PathBuf,
    pub target: TargetFormat,
}

/// An external converter between document formats.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the engine can be started right now.
    fn is_available(&self) -> bool {
        true
    }

    /// Convert `job.input_path` and return the path of the produced file.
    async fn run(&self, job: &ConversionJob) -> Result<PathBuf, DocfillError>;
}

// ── LibreOffice ──────────────────────────────────────────────────────────

/// Headless LibreOffice (`soffice --convert-to`).
#[derive(Debug, Clone, Default)]
pub struct SofficeEngine {
    executable: Option<PathBuf>,
}

impl SofficeEngine {
    /// Locate `soffice` via `soffice-auto` on first use.
    pub fn discover() -> Self {
        Self { executable: None }
    }

    /// Use a specific executable.
    pub fn with_executable(path: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(path.into()),
        }
    }

    fn executable(&self) -> Result<PathBuf, DocfillError> {
        let found = match &self.executable {
            Some(path) => soffice_auto::soffice_from_path(path),
            None => soffice_auto::ensure_soffice(),
        };
        found.map_err(|e| DocfillError::ConversionEngineUnavailable {
            engine: "soffice".to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ConversionEngine for SofficeEngine {
    fn name(&self) -> &str {
        "soffice"
    }

    fn is_available(&self) -> bool {
        self.executable().is_ok()
    }

    async fn run(&self, job: &ConversionJob) -> Result<PathBuf, DocfillError> {
        let exe = self.executable()?;

        let profile = job.scratch_dir.join("profile");
        let profile_url = reqwest::Url::from_directory_path(&profile).map_err(|_| {
            DocfillError::Internal(format!(
                "Cannot express profile directory '{}' as a URL",
                profile.display()
            ))
        })?;

        debug!(
            "Running {} --convert-to {} for {}",
            exe.display(),
            job.target.soffice_filter(),
            job.input_path.display()
        );

        let output = tokio::process::Command::new(&exe)
            .arg("--headless")
            .arg("--norestore")
            .arg("--nologo")
            .arg("--nolockcheck")
            .arg(format!("-env:UserInstallation={profile_url}"))
            .arg("--convert-to")
            .arg(job.target.soffice_filter())
            .arg("--outdir")
            .arg(&job.out_dir)
            .arg(&job.input_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DocfillError::ConversionEngineUnavailable {
                engine: self.name().to_string(),
                reason: format!("failed to start {}: {e}", exe.display()),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(DocfillError::ConversionFailed {
                detail: format!("soffice exited with {}: {}", output.status, stderr.trim()),
            });
        }

        let stem = job
            .input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("input");
        let produced = job
            .out_dir
            .join(format!("{stem}.{}", job.target.extension()));
        if !produced.is_file() {
            return Err(DocfillError::ConversionFailed {
                detail: format!(
                    "soffice produced no {} output: {}",
                    job.target,
                    stderr.trim()
                ),
            });
        }
        Ok(produced)
    }
}

// ── Converter ────────────────────────────────────────────────────────────

/// Runs one engine with a timeout and private staging.
#[derive(Clone)]
pub struct FormatConverter {
    engine: Arc<dyn ConversionEngine>,
    timeout_secs: u64,
}

impl std::fmt::Debug for FormatConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatConverter")
            .field("engine", &self.engine.name())
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl FormatConverter {
    pub fn new(engine: Arc<dyn ConversionEngine>, timeout_secs: u64) -> Self {
        Self {
            engine,
            timeout_secs,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }

    /// Convert a file on disk. `source_name` supplies the input extension.
    pub async fn convert_file(
        &self,
        input: &Path,
        source_name: &str,
        target: TargetFormat,
        filename: String,
    ) -> Result<RenderedArtifact, DocfillError> {
        let workspace = Workspace::new(source_name)?;
        tokio::fs::copy(input, &workspace.input_path)
            .await
            .map_err(|e| DocfillError::Internal(format!("Failed to stage conversion input: {e}")))?;
        self.run(workspace, target, filename).await
    }

    /// Convert an in-memory document.
    pub async fn convert_bytes(
        &self,
        bytes: &[u8],
        source_name: &str,
        target: TargetFormat,
        filename: String,
    ) -> Result<RenderedArtifact, DocfillError> {
        let workspace = Workspace::new(source_name)?;
        tokio::fs::write(&workspace.input_path, bytes)
            .await
            .map_err(|e| DocfillError::Internal(format!("Failed to stage conversion input: {e}")))?;
        self.run(workspace, target, filename).await
    }

    async fn run(
        &self,
        workspace: Workspace,
        target: TargetFormat,
        filename: String,
    ) -> Result<RenderedArtifact, DocfillError> {
        let job = ConversionJob {
            input_path: workspace.input_path.clone(),
            out_dir: workspace.out_dir.clone(),
            scratch_dir: workspace.dir.path().to_path_buf(),
            target,
        };

        info!("Converting with {} → {}", self.engine.name(), target);
        let limit = Duration::from_secs(self.timeout_secs);
        let produced = match tokio::time::timeout(limit, self.engine.run(&job)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "{} did not finish within {}s",
                    self.engine.name(),
                    self.timeout_secs
                );
                return Err(DocfillError::ConversionTimeout {
                    secs: self.timeout_secs,
                });
            }
        };

        let bytes = tokio::fs::read(&produced)
            .await
            .map_err(|e| DocfillError::ConversionFailed {
                detail: format!("cannot read {}: {e}", produced.display()),
            })?;
        if bytes.is_empty() {
            return Err(DocfillError::ConversionFailed {
                detail: "engine produced an empty file".to_string(),
            });
        }

        info!("Converted {} bytes → {} ({})", bytes.len(), filename, target);
        Ok(RenderedArtifact {
            bytes,
            format: target,
            filename,
        })
    }
}

/// Temp directory layout for one conversion; removed on drop.
struct Workspace {
    dir: TempDir,
    input_path: PathBuf,
    out_dir: PathBuf,
}

impl Workspace {
    fn new(source_name: &str) -> Result<Self, DocfillError> {
        let internal = |e: std::io::Error| {
            DocfillError::Internal(format!("Failed to create conversion workspace: {e}"))
        };
        let dir = tempfile::Builder::new()
            .prefix("docfill-convert-")
            .tempdir()
            .map_err(internal)?;

        let ext = extension_of(source_name).unwrap_or_else(|| "bin".to_string());
        let input_dir = dir.path().join("in");
        let out_dir = dir.path().join("out");
        std::fs::create_dir(&input_dir).map_err(internal)?;
        std::fs::create_dir(&out_dir).map_err(internal)?;

        Ok(Self {
            input_path: input_dir.join(format!("source.{ext}")),
            out_dir,
            dir,
        })
    }
}
