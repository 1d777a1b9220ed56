//! The zip container of a word-processing document.
//!
//! Entries are kept in archive order with their original compression so a
//! template that is merely re-saved comes out structurally unchanged.

use crate::error::DocfillError;
use std::io::{Cursor, Read, Write};
use zip::read::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

/// Main body part; every document must have one.
pub const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    data: Vec<u8>,
    stored: bool,
    is_dir: bool,
}

/// An unpacked DOCX package.
#[derive(Debug, Clone)]
pub struct PackagedDocument {
    entries: Vec<Entry>,
}

impl PackagedDocument {
    /// Unpack template bytes.
    ///
    /// Fails with [`DocfillError::InvalidTemplateFormat`] if the bytes are not
    /// a zip archive or the archive has no `word/document.xml`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocfillError> {
        let invalid = |detail: String| DocfillError::InvalidTemplateFormat { detail };

        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| invalid(e.to_string()))?;
        let mut entries = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(|e| invalid(e.to_string()))?;
            let name = file.name().to_string();
            let is_dir = file.is_dir();
            let stored = file.compression() == CompressionMethod::Stored;

            let mut data = Vec::new();
            if !is_dir {
                file.read_to_end(&mut data)
                    .map_err(|e| invalid(format!("{name}: {e}")))?;
            }
            entries.push(Entry {
                name,
                data,
                stored,
                is_dir,
            });
        }

        let doc = Self { entries };
        if !doc.contains(DOCUMENT_PART) {
            return Err(invalid(format!("archive has no {DOCUMENT_PART}")));
        }
        Ok(doc)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| !e.is_dir && e.name == name)
            .map(|e| e.data.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace an existing part's contents, or append a new deflated part.
    pub fn set(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|e| !e.is_dir && e.name == name) {
            Some(entry) => entry.data = data,
            None => self.entries.push(Entry {
                name: name.to_string(),
                data,
                stored: false,
                is_dir: false,
            }),
        }
    }

    /// File part names in archive order.
    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.name.as_str())
    }

    /// Repack into zip bytes.
    ///
    /// Timestamps are fixed so identical input yields identical output.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocfillError> {
        let fail = |e: &dyn std::fmt::Display| {
            DocfillError::RenderEngineFailure(format!("Failed to repack document: {e}"))
        };

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let base = SimpleFileOptions::default().last_modified_time(zip::DateTime::default());

        for entry in &self.entries {
            let method = if entry.stored {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            };
            let options = base.compression_method(method);
            if entry.is_dir {
                zip.add_directory(entry.name.as_str(), options)
                    .map_err(|e| fail(&e))?;
                continue;
            }
            zip.start_file(entry.name.as_str(), options)
                .map_err(|e| fail(&e))?;
            zip.write_all(&entry.data).map_err(|e| fail(&e))?;
        }

        let cursor = zip.finish().map_err(|e| fail(&e))?;
        Ok(cursor.into_inner())
    }
}

/// Whether a part carries template text: the body, headers, footers, and notes.
pub fn is_text_part(name: &str) -> bool {
    let Some(file) = name.strip_prefix("word/") else {
        return false;
    };
    if file == "document.xml" || file == "footnotes.xml" || file == "endnotes.xml" {
        return true;
    }
    let Some(stem) = file.strip_suffix(".xml") else {
        return false;
    };
    ["header", "footer"].iter().any(|prefix| {
        stem.strip_prefix(prefix)
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn rejects_non_zip() {
        let err = PackagedDocument::from_bytes(b"hello, not a zip").unwrap_err();
        assert_eq!(err.kind(), "invalid_template_format");
    }

    #[test]
    fn rejects_zip_without_body() {
        let bytes = sample(&[("word/styles.xml", "<w:styles/>")]);
        let err = PackagedDocument::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn set_and_repack_preserves_order() {
        let bytes = sample(&[
            ("[Content_Types].xml", "<Types/>"),
            ("word/document.xml", "<w:document/>"),
            ("word/styles.xml", "<w:styles/>"),
        ]);
        let mut doc = PackagedDocument::from_bytes(&bytes).unwrap();
        doc.set("word/document.xml", b"<w:document>x</w:document>".to_vec());

        let again = PackagedDocument::from_bytes(&doc.to_bytes().unwrap()).unwrap();
        let names: Vec<_> = again.part_names().collect();
        assert_eq!(
            names,
            vec!["[Content_Types].xml", "word/document.xml", "word/styles.xml"]
        );
        assert_eq!(
            again.get("word/document.xml"),
            Some(&b"<w:document>x</w:document>"[..])
        );
    }

    #[test]
    fn repack_is_deterministic() {
        let bytes = sample(&[("word/document.xml", "<w:document/>")]);
        let doc = PackagedDocument::from_bytes(&bytes).unwrap();
        assert_eq!(doc.to_bytes().unwrap(), doc.to_bytes().unwrap());
    }

    #[test]
    fn text_parts() {
        assert!(is_text_part("word/document.xml"));
        assert!(is_text_part("word/header1.xml"));
        assert!(is_text_part("word/footer12.xml"));
        assert!(is_text_part("word/footnotes.xml"));
        assert!(!is_text_part("word/headerX.xml"));
        assert!(!is_text_part("word/styles.xml"));
        assert!(!is_text_part("word/_rels/document.xml.rels"));
    }
}
