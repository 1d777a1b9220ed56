//! Pipeline outputs: the rendered artifact and its format metadata.

use crate::error::DocfillError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Media type of a word-processing (OOXML) document.
pub const DOCX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// A finished document: bytes plus how the client should treat them.
///
/// Produced once per request and never written anywhere by the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    /// The document bytes.
    pub bytes: Vec<u8>,
    /// Format of `bytes`.
    pub format: TargetFormat,
    /// Suggested download filename.
    pub filename: String,
}

impl RenderedArtifact {
    /// Declared media type of the artifact.
    pub fn media_type(&self) -> &'static str {
        self.format.media_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// File formats the pipeline can hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// Word-processing document; the renderer's native output.
    #[default]
    Docx,
    /// Fixed-layout PDF.
    Pdf,
    /// OpenDocument text.
    Odt,
    Html,
    Txt,
}

impl TargetFormat {
    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Docx => "docx",
            TargetFormat::Pdf => "pdf",
            TargetFormat::Odt => "odt",
            TargetFormat::Html => "html",
            TargetFormat::Txt => "txt",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            TargetFormat::Docx => DOCX_MEDIA_TYPE,
            TargetFormat::Pdf => "application/pdf",
            TargetFormat::Odt => "application/vnd.oasis.opendocument.text",
            TargetFormat::Html => "text/html; charset=utf-8",
            TargetFormat::Txt => "text/plain; charset=utf-8",
        }
    }

    /// LibreOffice `--convert-to` filter argument.
    pub fn soffice_filter(self) -> &'static str {
        match self {
            TargetFormat::Docx => "docx:MS Word 2007 XML",
            TargetFormat::Pdf => "pdf",
            TargetFormat::Odt => "odt",
            TargetFormat::Html => "html",
            TargetFormat::Txt => "txt:Text (encoded):UTF8",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TargetFormat {
    type Err = DocfillError;

    /// Accepts an extension with or without a leading dot, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalised.as_str() {
            "docx" => Ok(TargetFormat::Docx),
            "pdf" => Ok(TargetFormat::Pdf),
            "odt" => Ok(TargetFormat::Odt),
            "html" | "htm" => Ok(TargetFormat::Html),
            "txt" | "text" => Ok(TargetFormat::Txt),
            _ => Err(DocfillError::UnsupportedFormat {
                format: s.to_string(),
            }),
        }
    }
}

/// Where the template bytes for a request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateOrigin {
    /// A file uploaded with the request.
    Uploaded { original_name: String },
    /// A remote URL supplied by the client.
    Url { url: String },
    /// The deployment's default template.
    Default { path: PathBuf },
}

impl TemplateOrigin {
    /// Human-readable description, used for the `X-Template-Source` header.
    pub fn describe(&self) -> String {
        match self {
            TemplateOrigin::Uploaded { original_name } => format!("Uploaded: {original_name}"),
            TemplateOrigin::Url { url } => format!("From URL: {url}"),
            TemplateOrigin::Default { .. } => "Default template".to_string(),
        }
    }

    pub fn is_client_supplied(&self) -> bool {
        !matches!(self, TemplateOrigin::Default { .. })
    }
}
