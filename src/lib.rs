//! # docfill
//!
//! Fill Word (DOCX) templates with JSON data and, optionally, convert the
//! result to PDF or another format through headless LibreOffice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Payload  normalise `data` / `jsonPayload`, unwrap one level of double wrapping
//!  ├─ 2. Source   uploaded template > templateUrl > default template
//!  ├─ 3. Render   substitute {tags}, sections and paragraph loops (spawn_blocking)
//!  ├─ 4. Convert  optional; soffice with a private profile and a timeout
//!  └─ 5. Output   bytes + media type + download filename
//! ```
//!
//! ## Template syntax
//!
//! | Tag            | Meaning                                                 |
//! |----------------|---------------------------------------------------------|
//! | `{name}`       | value of `name`; dotted paths (`{course.code}`) descend |
//! | `{#items}…{/items}` | repeat for each element, or once if truthy         |
//! | `{^items}…{/items}` | render only if `items` is falsy                    |
//! | `{.}`          | the current loop element                                |
//!
//! Tags may be split across runs by Word's editor. A section whose opening
//! and closing tags each sit alone in their own paragraph repeats whole
//! paragraphs. Newlines in values become line breaks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docfill::{DefaultTemplate, GenerateRequest, Generator, GeneratorConfig, TemplateSource, TargetFormat};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GeneratorConfig::builder()
//!         .default_template(DefaultTemplate::discover(None))
//!         .build()?;
//!     let generator = Generator::new(config)?;
//!     let doc = generator
//!         .generate(GenerateRequest {
//!             data: json!({"CourseTitle": "Sample Course", "CourseCode": "CS101"}),
//!             source: TemplateSource::Default,
//!             output_format: TargetFormat::Docx,
//!         })
//!         .await?;
//!     std::fs::write(&doc.artifact.filename, &doc.artifact.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docfill` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod generate;
pub mod output;
pub mod payload;
pub mod pipeline;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    DefaultTemplate, GeneratorConfig, GeneratorConfigBuilder, MissingFieldPolicy, ServerSettings,
};
pub use error::{DocfillError, ErrorCategory};
pub use generate::{GenerateRequest, GeneratedDocument, Generator};
pub use output::{RenderedArtifact, TargetFormat, TemplateOrigin, DOCX_MEDIA_TYPE};
pub use payload::{FillPayload, RawFillRequest};
pub use pipeline::convert::{ConversionEngine, ConversionJob, FormatConverter, SofficeEngine};
pub use pipeline::render::{inspect_template, render_blocking, render_document, TemplateField};
pub use pipeline::source::{StagedUpload, TemplateResolver, TemplateSource};
