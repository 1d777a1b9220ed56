//! Pipeline stages for template filling and conversion.
//!
//! Each submodule implements one step; they run strictly in sequence for a
//! request and share no mutable state.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ package ──▶ markup ──▶ render ──▶ convert
//! (bytes)    (unzip)     (tags)     (merge)    (soffice, optional)
//! ```
//!
//! 1. [`source`]  pick upload / URL / default and obtain the template bytes;
//!    uploads are staged in self-deleting temp files
//! 2. [`package`] unpack and repack the DOCX zip container
//! 3. [`markup`]  tokenise each XML part and build the tag tree, including
//!    tags split across runs and paragraph loops
//! 4. [`render`]  substitute JSON values; runs in `spawn_blocking`
//! 5. [`convert`] hand a document to an external engine with a timeout and
//!    a private temp workspace

pub mod convert;
pub mod markup;
pub mod package;
pub mod render;
pub mod source;
