//! Configuration types for document generation.
//!
//! All pipeline behaviour is controlled through [`GeneratorConfig`], built
//! via its [`GeneratorConfigBuilder`]. The default template location is an
//! explicit value ([`DefaultTemplate`]) resolved once at startup and injected
//! here; the pipeline never searches the filesystem per request.

use crate::error::DocfillError;
use crate::pipeline::convert::ConversionEngine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Port used when neither `--port` nor `PORT` is given.
pub const DEFAULT_PORT: u16 = 3000;

/// Request body cap; matches the 10 MB JSON limit of earlier deployments.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Configuration for the generation pipeline.
///
/// Built via [`GeneratorConfig::builder()`] or using
/// [`GeneratorConfig::default()`].
///
/// # Example
/// ```rust
/// use docfill::{GeneratorConfig, MissingFieldPolicy};
///
/// let config = GeneratorConfig::builder()
///     .download_timeout_secs(10)
///     .missing_fields(MissingFieldPolicy::Blank)
///     .build()
///     .unwrap();
/// assert_eq!(config.download_timeout_secs, 10);
/// ```
#[derive(Clone)]
pub struct GeneratorConfig {
    /// Template used when a request supplies neither an upload nor a URL.
    pub default_template: DefaultTemplate,

    /// Timeout for fetching a remote template, in seconds. Default: 30.
    pub download_timeout_secs: u64,

    /// Timeout for one conversion-engine round trip, in seconds. Default: 120.
    pub conversion_timeout_secs: u64,

    /// What to do with a tag whose path is absent from the data. Default: [`MissingFieldPolicy::Error`].
    pub missing_fields: MissingFieldPolicy,

    /// Download filename of a filled document. Default: `result.docx`.
    pub docx_filename: String,

    /// Base name (no extension) of converted downloads. Default: `converted`.
    pub converted_basename: String,

    /// Directory where uploads are staged. `None` uses the system temp dir.
    pub upload_dir: Option<PathBuf>,

    /// Explicit `soffice` executable. `None` searches via `soffice-auto`.
    pub soffice_path: Option<PathBuf>,

    /// Pre-constructed conversion engine. Takes precedence over `soffice_path`.
    pub engine: Option<Arc<dyn ConversionEngine>>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            default_template: DefaultTemplate::Missing {
                searched: Vec::new(),
            },
            download_timeout_secs: 30,
            conversion_timeout_secs: 120,
            missing_fields: MissingFieldPolicy::default(),
            docx_filename: "result.docx".to_string(),
            converted_basename: "converted".to_string(),
            upload_dir: None,
            soffice_path: None,
            engine: None,
        }
    }
}

impl fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("default_template", &self.default_template)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("conversion_timeout_secs", &self.conversion_timeout_secs)
            .field("missing_fields", &self.missing_fields)
            .field("docx_filename", &self.docx_filename)
            .field("converted_basename", &self.converted_basename)
            .field("upload_dir", &self.upload_dir)
            .field("soffice_path", &self.soffice_path)
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}

impl GeneratorConfig {
    /// Create a new builder for `GeneratorConfig`.
    pub fn builder() -> GeneratorConfigBuilder {
        GeneratorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Download filename for an artifact converted to `extension`.
    pub fn converted_filename(&self, extension: &str) -> String {
        format!("{}.{}", self.converted_basename, extension)
    }
}

/// Builder for [`GeneratorConfig`].
#[derive(Debug)]
pub struct GeneratorConfigBuilder {
    config: GeneratorConfig,
}

impl GeneratorConfigBuilder {
    pub fn default_template(mut self, template: DefaultTemplate) -> Self {
        self.config.default_template = template;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn missing_fields(mut self, policy: MissingFieldPolicy) -> Self {
        self.config.missing_fields = policy;
        self
    }

    pub fn docx_filename(mut self, name: impl Into<String>) -> Self {
        self.config.docx_filename = name.into();
        self
    }

    pub fn converted_basename(mut self, name: impl Into<String>) -> Self {
        self.config.converted_basename = name.into();
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = Some(dir.into());
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = Some(path.into());
        self
    }

    pub fn engine(mut self, engine: Arc<dyn ConversionEngine>) -> Self {
        self.config.engine = Some(engine);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GeneratorConfig, DocfillError> {
        let c = &self.config;
        if c.download_timeout_secs == 0 {
            return Err(DocfillError::InvalidConfig(
                "download timeout must be ≥ 1 second".into(),
            ));
        }
        if c.conversion_timeout_secs == 0 {
            return Err(DocfillError::InvalidConfig(
                "conversion timeout must be ≥ 1 second".into(),
            ));
        }
        if c.docx_filename.trim().is_empty() || c.converted_basename.trim().is_empty() {
            return Err(DocfillError::InvalidConfig(
                "output filenames must not be empty".into(),
            ));
        }
        if let Some(dir) = &c.upload_dir {
            if !dir.is_dir() {
                return Err(DocfillError::InvalidConfig(format!(
                    "upload directory '{}' does not exist",
                    dir.display()
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Default template ─────────────────────────────────────────────────────

/// The deployment's default template, resolved once at startup.
///
/// A missing default is not a startup error: requests that bring their own
/// template still work, and requests that need the default fail with
/// [`DocfillError::TemplateMissing`] listing every searched location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultTemplate {
    /// The template file that will be read on each request.
    Found(PathBuf),
    /// No candidate existed.
    Missing { searched: Vec<PathBuf> },
}

impl DefaultTemplate {
    /// Template path relative to each search root.
    pub const RELATIVE_PATH: &'static str = "Assets/template.docx";

    /// Search roots, in order:
    ///
    /// 1. the current working directory
    /// 2. the directory holding the running executable
    /// 3. that directory's parent (covers `target/debug` and `bin/` layouts)
    pub fn standard_roots() -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            if let Some(parent) = exe_dir.parent() {
                let parent = parent.to_path_buf();
                roots.push(exe_dir);
                roots.push(parent);
            } else {
                roots.push(exe_dir);
            }
        }
        roots.dedup();
        roots
    }

    /// Resolve the default template against the standard roots.
    ///
    /// `explicit` overrides [`Self::RELATIVE_PATH`]; an absolute explicit
    /// path is the only candidate.
    pub fn discover(explicit: Option<&Path>) -> Self {
        Self::locate(explicit, &Self::standard_roots())
    }

    /// Resolve the default template against the given roots.
    pub fn locate(explicit: Option<&Path>, roots: &[PathBuf]) -> Self {
        let candidates: Vec<PathBuf> = match explicit {
            Some(path) if path.is_absolute() => vec![path.to_path_buf()],
            Some(path) => roots.iter().map(|root| root.join(path)).collect(),
            None => roots
                .iter()
                .map(|root| root.join(Self::RELATIVE_PATH))
                .collect(),
        };

        for candidate in &candidates {
            debug!("Checking default template candidate: {}", candidate.display());
            if candidate.is_file() {
                info!("Default template: {}", candidate.display());
                return DefaultTemplate::Found(candidate.clone());
            }
        }

        warn!(
            "No default template found ({} locations searched)",
            candidates.len()
        );
        DefaultTemplate::Missing {
            searched: candidates,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            DefaultTemplate::Found(path) => Some(path),
            DefaultTemplate::Missing { .. } => None,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Behaviour for tags whose path does not resolve in the render context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFieldPolicy {
    /// Fail the render with [`DocfillError::MissingField`]. (default)
    #[default]
    Error,
    /// Render unresolved values as empty text and unresolved sections as false.
    Blank,
}

// ── Server settings ──────────────────────────────────────────────────────

/// Listener settings for the HTTP service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerSettings {
    /// `host:port` string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), DocfillError> {
        if self.max_body_bytes < 1024 {
            return Err(DocfillError::InvalidConfig(format!(
                "body limit must be ≥ 1024 bytes, got {}",
                self.max_body_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = GeneratorConfig::default();
        assert_eq!(c.download_timeout_secs, 30);
        assert_eq!(c.conversion_timeout_secs, 120);
        assert_eq!(c.missing_fields, MissingFieldPolicy::Error);
        assert_eq!(c.docx_filename, "result.docx");
        assert_eq!(c.converted_filename("pdf"), "converted.pdf");
    }

    #[test]
    fn builder_rejects_zero_timeouts() {
        assert!(GeneratorConfig::builder()
            .download_timeout_secs(0)
            .build()
            .is_err());
        assert!(GeneratorConfig::builder()
            .conversion_timeout_secs(0)
            .build()
            .is_err());
    }

    #[test]
    fn builder_rejects_missing_upload_dir() {
        let err = GeneratorConfig::builder()
            .upload_dir("/definitely/not/a/dir")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("/definitely/not/a/dir"));
    }

    #[test]
    fn locate_takes_first_existing_root() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let assets = second.path().join("Assets");
        std::fs::create_dir_all(&assets).unwrap();
        std::fs::write(assets.join("template.docx"), b"PK").unwrap();

        let found = DefaultTemplate::locate(
            None,
            &[first.path().to_path_buf(), second.path().to_path_buf()],
        );
        assert_eq!(
            found,
            DefaultTemplate::Found(second.path().join(DefaultTemplate::RELATIVE_PATH))
        );
    }

    #[test]
    fn locate_reports_every_candidate() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let missing =
            DefaultTemplate::locate(None, &[a.path().to_path_buf(), b.path().to_path_buf()]);
        match missing {
            DefaultTemplate::Missing { searched } => {
                assert_eq!(searched.len(), 2);
                assert!(searched[0].starts_with(a.path()));
                assert!(searched[1].starts_with(b.path()));
            }
            other => panic!("expected Missing, got {other:?}"),
        }
    }

    #[test]
    fn absolute_explicit_path_is_sole_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("custom.docx");
        let missing = DefaultTemplate::locate(Some(&explicit), &[PathBuf::from("/srv")]);
        assert_eq!(
            missing,
            DefaultTemplate::Missing {
                searched: vec![explicit]
            }
        );
    }

    #[test]
    fn server_settings_bind_address() {
        let s = ServerSettings {
            port: 8080,
            ..ServerSettings::default()
        };
        assert_eq!(s.bind_address(), "0.0.0.0:8080");
        assert!(s.validate().is_ok());
        let tiny = ServerSettings {
            max_body_bytes: 10,
            ..ServerSettings::default()
        };
        assert!(tiny.validate().is_err());
    }
}
