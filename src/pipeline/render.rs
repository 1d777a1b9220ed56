//! Field-bound rendering: merge JSON data into a DOCX template.
//!
//! The template archive is unpacked, each text-bearing part (body, headers,
//! footers, notes) is parsed into a section tree by [`super::markup`], and
//! the tree is written back out with values substituted. Lookup walks a
//! scope stack innermost-first, so inside `{#items}` a tag first sees the
//! current element and then the enclosing data.
//!
//! Rendering is CPU-bound and synchronous; [`render_document`] moves it onto
//! the blocking pool.

use super::markup::{collect_tags, parse_part, Node, TagKind, TagPath};
use super::package::{is_text_part, PackagedDocument};
use crate::config::MissingFieldPolicy;
use crate::error::DocfillError;
use crate::output::{RenderedArtifact, TargetFormat};
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

/// Closes the current text element, emits a line break, and reopens.
const LINE_BREAK: &[u8] = br#"</w:t><w:br/><w:t xml:space="preserve">"#;

/// Block-level children that keep a table cell valid.
const CELL_BLOCKS: [&[u8]; 5] = [b"w:p", b"w:tbl", b"w:sdt", b"w:customXml", b"w:altChunk"];

/// Render `template` with `data` on the blocking pool.
pub async fn render_document(
    template: Vec<u8>,
    data: Value,
    policy: MissingFieldPolicy,
    filename: String,
) -> Result<RenderedArtifact, DocfillError> {
    let bytes = tokio::task::spawn_blocking(move || render_blocking(&template, &data, policy))
        .await
        .map_err(|e| DocfillError::RenderEngineFailure(format!("Render task panicked: {e}")))??;

    Ok(RenderedArtifact {
        bytes,
        format: TargetFormat::Docx,
        filename,
    })
}

/// Render every text part of the template and repack the archive.
pub fn render_blocking(
    template: &[u8],
    data: &Value,
    policy: MissingFieldPolicy,
) -> Result<Vec<u8>, DocfillError> {
    let mut doc = PackagedDocument::from_bytes(template)?;

    let parts: Vec<String> = doc
        .part_names()
        .filter(|name| is_text_part(name))
        .map(str::to_string)
        .collect();

    for part in &parts {
        let Some(xml) = doc.get(part) else {
            continue;
        };
        let rendered = render_part(part, xml, data, policy)?;
        debug!("Rendered {} ({} bytes)", part, rendered.len());
        doc.set(part, rendered);
    }

    let bytes = doc.to_bytes()?;
    info!("Rendered {} parts → {} bytes", parts.len(), bytes.len());
    Ok(bytes)
}

/// Render a single XML part.
pub fn render_part(
    part: &str,
    xml: &[u8],
    data: &Value,
    policy: MissingFieldPolicy,
) -> Result<Vec<u8>, DocfillError> {
    let nodes = parse_part(part, xml)?;
    let renderer = PartRenderer { part, policy };
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut scopes = vec![data];
    renderer.write_nodes(&mut writer, &nodes, &mut scopes)?;
    let rendered = writer.into_inner();
    if rendered.windows(5).any(|w| w == b"<w:tc") {
        fill_empty_cells(&rendered)
    } else {
        Ok(rendered)
    }
}

/// Give every `w:tc` left without a block-level child an empty paragraph.
///
/// A paragraph loop that runs zero times inside a cell removes all of the
/// cell's paragraphs, and Word refuses to open a cell with none.
fn fill_empty_cells(xml: &[u8]) -> Result<Vec<u8>, DocfillError> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 16));
    let mut buf = Vec::new();
    // (depth of the cell element, whether it holds a block yet)
    let mut cells: Vec<(usize, bool)> = Vec::new();
    let mut depth = 0usize;

    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf).map_err(write_failed)?;
        match &event {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                if let Some((cell_depth, has_block)) = cells.last_mut() {
                    let name = e.name();
                    if depth == *cell_depth + 1 && CELL_BLOCKS.iter().any(|b| *b == name.as_ref()) {
                        *has_block = true;
                    }
                }
                let is_cell = e.name().as_ref() == b"w:tc";
                if matches!(event, Event::Start(_)) {
                    if is_cell {
                        cells.push((depth, false));
                    }
                    depth += 1;
                } else if is_cell {
                    writer
                        .write_event(Event::Start(e.borrow()))
                        .map_err(write_failed)?;
                    writer
                        .write_event(Event::Empty(BytesStart::new("w:p")))
                        .map_err(write_failed)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("w:tc")))
                        .map_err(write_failed)?;
                    continue;
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if e.name().as_ref() == b"w:tc" {
                    if let Some((_, has_block)) = cells.pop() {
                        if !has_block {
                            debug!("Filled an emptied table cell");
                            writer
                                .write_event(Event::Empty(BytesStart::new("w:p")))
                                .map_err(write_failed)?;
                        }
                    }
                }
            }
            _ => {}
        }
        writer.write_event(event).map_err(write_failed)?;
    }

    Ok(writer.into_inner())
}

struct PartRenderer<'p> {
    part: &'p str,
    policy: MissingFieldPolicy,
}

impl PartRenderer<'_> {
    fn write_nodes<'v>(
        &self,
        writer: &mut Writer<Vec<u8>>,
        nodes: &[Node],
        scopes: &mut Vec<&'v Value>,
    ) -> Result<(), DocfillError> {
        for node in nodes {
            match node {
                Node::Markup(event) => {
                    writer.write_event(event.clone()).map_err(write_failed)?;
                }
                Node::Text(text) => write_text(writer, text)?,
                Node::Value(path) => {
                    if let Some(value) = self.resolve(scopes, path)? {
                        write_value(writer, &format_value(value)?)?;
                    }
                }
                Node::Section {
                    path,
                    inverted,
                    body,
                } => {
                    let value = self.resolve(scopes, path)?;
                    if *inverted {
                        if !value.is_some_and(is_truthy) {
                            self.write_nodes(writer, body, scopes)?;
                        }
                        continue;
                    }
                    match value {
                        Some(Value::Array(items)) => {
                            for item in items {
                                scopes.push(item);
                                self.write_nodes(writer, body, scopes)?;
                                scopes.pop();
                            }
                        }
                        Some(value) if is_truthy(value) => {
                            scopes.push(value);
                            self.write_nodes(writer, body, scopes)?;
                            scopes.pop();
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Look up `path`; `Ok(None)` only under [`MissingFieldPolicy::Blank`].
    fn resolve<'v>(
        &self,
        scopes: &[&'v Value],
        path: &TagPath,
    ) -> Result<Option<&'v Value>, DocfillError> {
        match lookup(scopes, path) {
            Some(value) => Ok(Some(value)),
            None => match self.policy {
                MissingFieldPolicy::Error => Err(DocfillError::MissingField {
                    tag: path.as_str().to_string(),
                    part: self.part.to_string(),
                }),
                MissingFieldPolicy::Blank => Ok(None),
            },
        }
    }
}

/// Innermost-first lookup.
///
/// A key spelled exactly like the tag (dots included) wins over a dotted
/// descent. Once the first segment is found in a scope, outer scopes are
/// not consulted for the rest of the path.
fn lookup<'v>(scopes: &[&'v Value], path: &TagPath) -> Option<&'v Value> {
    if path.is_current_scope() {
        return scopes.last().copied();
    }
    let (first, rest) = path.segments().split_first()?;

    for scope in scopes.iter().rev() {
        if let Some(value) = scope.as_object().and_then(|o| o.get(path.as_str())) {
            return Some(value);
        }
        if let Some(head) = child(scope, first) {
            return rest.iter().try_fold(head, |value, segment| child(value, segment));
        }
    }
    None
}

fn child<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn format_value(value: &Value) -> Result<String, DocfillError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value)
            .map_err(|e| DocfillError::RenderEngineFailure(format!("Failed to format value: {e}"))),
    }
}

fn write_text(writer: &mut Writer<Vec<u8>>, text: &str) -> Result<(), DocfillError> {
    if text.is_empty() {
        return Ok(());
    }
    writer
        .write_event(Event::Text(BytesText::from_escaped(partial_escape(text))))
        .map_err(write_failed)
}

/// Characters XML 1.0 allows in text content.
fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Write a substituted value, turning newlines into `<w:br/>`.
///
/// Control characters XML cannot carry are dropped.
fn write_value(writer: &mut Writer<Vec<u8>>, value: &str) -> Result<(), DocfillError> {
    let normalised: String = value
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| is_xml_char(*c))
        .collect();
    for (i, line) in normalised.split('\n').enumerate() {
        if i > 0 {
            writer.get_mut().extend_from_slice(LINE_BREAK);
        }
        write_text(writer, line)?;
    }
    Ok(())
}

fn write_failed(e: impl fmt::Display) -> DocfillError {
    DocfillError::RenderEngineFailure(format!("Failed to write XML: {e}"))
}

// ── Inspection ───────────────────────────────────────────────────────────

/// One tag found in a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateField {
    pub name: String,
    pub kind: TagKind,
    pub part: String,
}

/// List the distinct tags of every text part, in document order.
pub fn inspect_template(template: &[u8]) -> Result<Vec<TemplateField>, DocfillError> {
    let doc = PackagedDocument::from_bytes(template)?;
    let mut fields: Vec<TemplateField> = Vec::new();

    for part in doc.part_names().filter(|name| is_text_part(name)) {
        let Some(xml) = doc.get(part) else {
            continue;
        };
        let nodes = parse_part(part, xml)?;
        let mut tags = Vec::new();
        collect_tags(&nodes, &mut tags);
        for (kind, path) in tags {
            let field = TemplateField {
                name: path.as_str().to_string(),
                kind,
                part: part.to_string(),
            };
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PART: &str = "word/document.xml";

    fn body(inner: &str) -> String {
        format!(r#"<w:document xmlns:w="urn:w"><w:body>{inner}</w:body></w:document>"#)
    }

    fn render(inner: &str, data: Value) -> Result<String, DocfillError> {
        render_with(inner, data, MissingFieldPolicy::Error)
    }

    fn render_with(
        inner: &str,
        data: Value,
        policy: MissingFieldPolicy,
    ) -> Result<String, DocfillError> {
        let out = render_part(PART, body(inner).as_bytes(), &data, policy)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn substitutes_values() {
        let out = render(
            "<w:p><w:r><w:t>{CourseTitle} / {CourseCode}</w:t></w:r></w:p>",
            json!({"CourseTitle": "Intro to Rust", "CourseCode": "RS101"}),
        )
        .unwrap();
        assert!(
            out.contains(r#"<w:t xml:space="preserve">Intro to Rust / RS101</w:t>"#),
            "{out}"
        );
    }

    #[test]
    fn escapes_markup_in_values() {
        let out = render(
            "<w:p><w:r><w:t>{name}</w:t></w:r></w:p>",
            json!({"name": "A & B <c>"}),
        )
        .unwrap();
        assert!(out.contains("A &amp; B &lt;c&gt;"), "{out}");
    }

    #[test]
    fn missing_field_fails_fast() {
        let err = render(
            "<w:p><w:r><w:t>{CourseTitle} {CourseCode}</w:t></w:r></w:p>",
            json!({"CourseTitle": "x"}),
        )
        .unwrap_err();
        match err {
            DocfillError::MissingField { tag, part } => {
                assert_eq!(tag, "CourseCode");
                assert_eq!(part, PART);
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn blank_policy_renders_empty() {
        let out = render_with(
            "<w:p><w:r><w:t>[{missing}]{^gone}none{/gone}</w:t></w:r></w:p>",
            json!({}),
            MissingFieldPolicy::Blank,
        )
        .unwrap();
        assert!(out.contains("[]none"), "{out}");
    }

    #[test]
    fn dotted_paths_and_indices() {
        let out = render(
            "<w:p><w:r><w:t>{course.code}-{items.1.name}</w:t></w:r></w:p>",
            json!({"course": {"code": "RS101"}, "items": [{"name": "a"}, {"name": "b"}]}),
        )
        .unwrap();
        assert!(out.contains("RS101-b"), "{out}");
    }

    #[test]
    fn literal_dotted_key_wins() {
        let out = render(
            "<w:p><w:r><w:t>{a.b}</w:t></w:r></w:p>",
            json!({"a.b": "flat", "a": {"b": "nested"}}),
        )
        .unwrap();
        assert!(out.contains(">flat<"), "{out}");
    }

    #[test]
    fn loops_over_arrays_with_outer_scope() {
        let out = render(
            "<w:p><w:r><w:t>{#items}{name}@{school};{/items}</w:t></w:r></w:p>",
            json!({"school": "ENS", "items": [{"name": "a"}, {"name": "b"}]}),
        )
        .unwrap();
        assert!(out.contains("a@ENS;b@ENS;"), "{out}");
    }

    #[test]
    fn current_scope_tag() {
        let out = render(
            "<w:p><w:r><w:t>{#tags}[{.}]{/tags}</w:t></w:r></w:p>",
            json!({"tags": ["x", "y"]}),
        )
        .unwrap();
        assert!(out.contains("[x][y]"), "{out}");
    }

    #[test]
    fn falsy_values_hide_sections() {
        for falsy in [json!(false), json!(null), json!(0), json!(""), json!([])] {
            let out = render(
                "<w:p><w:r><w:t>a{#flag}HIDDEN{/flag}b{^flag}SHOWN{/flag}</w:t></w:r></w:p>",
                json!({ "flag": falsy }),
            )
            .unwrap();
            assert!(!out.contains("HIDDEN"), "{falsy}: {out}");
            assert!(out.contains("SHOWN"), "{falsy}: {out}");
        }
    }

    #[test]
    fn value_formatting() {
        let out = render(
            "<w:p><w:r><w:t>{n}|{b}|{z}|{o}</w:t></w:r></w:p>",
            json!({"n": 3.5, "b": true, "z": null, "o": {"k": [1, 2]}}),
        )
        .unwrap();
        assert!(out.contains(r#"3.5|true||{"k":[1,2]}"#), "{out}");
    }

    #[test]
    fn newlines_become_breaks() {
        let out = render(
            "<w:p><w:r><w:t>{address}</w:t></w:r></w:p>",
            json!({"address": "1 Main St\r\nSpringfield\rUSA"}),
        )
        .unwrap();
        assert!(
            out.contains(r#"1 Main St</w:t><w:br/><w:t xml:space="preserve">Springfield</w:t><w:br/><w:t xml:space="preserve">USA"#),
            "{out}"
        );
        assert!(!out.contains('\r'), "{out:?}");
    }

    #[test]
    fn control_characters_are_dropped() {
        let out = render(
            "<w:p><w:r><w:t>{a}</w:t></w:r></w:p>",
            json!({"a": "x\u{1}y\u{b}z\u{fffe}\tend"}),
        )
        .unwrap();
        assert!(out.contains(">xyz\tend<"), "{out:?}");
        assert!(!out.contains('\u{1}') && !out.contains('\u{b}'), "{out:?}");
    }

    #[test]
    fn empty_loop_leaves_cell_with_paragraph() {
        let out = render(
            "<w:tbl><w:tr><w:tc><w:tcPr/><w:p><w:r><w:t>{#rows}</w:t></w:r></w:p><w:p><w:r><w:t>{name}</w:t></w:r></w:p><w:p><w:r><w:t>{/rows}</w:t></w:r></w:p></w:tc></w:tr></w:tbl>",
            json!({"rows": []}),
        )
        .unwrap();
        assert!(out.contains("<w:tc><w:tcPr/><w:p/></w:tc>"), "{out}");
    }

    #[test]
    fn filled_cells_are_untouched() {
        let out = render(
            "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>{#rows}</w:t></w:r></w:p><w:p><w:r><w:t>{name}</w:t></w:r></w:p><w:p><w:r><w:t>{/rows}</w:t></w:r></w:p></w:tc><w:tc/></w:tr></w:tbl>",
            json!({"rows": [{"name": "Ada"}]}),
        )
        .unwrap();
        assert_eq!(out.matches("<w:p>").count(), 1, "{out}");
        assert!(out.contains("Ada"), "{out}");
        assert!(out.contains("<w:tc><w:p/></w:tc>"), "{out}");
    }

    #[test]
    fn paragraph_loop_repeats_paragraphs() {
        let out = render(
            "<w:p><w:r><w:t>{#rows}</w:t></w:r></w:p><w:p><w:r><w:t>Row {n}</w:t></w:r></w:p><w:p><w:r><w:t>{/rows}</w:t></w:r></w:p>",
            json!({"rows": [{"n": 1}, {"n": 2}, {"n": 3}]}),
        )
        .unwrap();
        assert_eq!(out.matches("<w:p>").count(), 3, "{out}");
        assert!(out.contains("Row 3"));
        assert!(!out.contains("{#rows}"));
    }

    #[test]
    fn missing_section_fails_in_strict_mode() {
        let err = render(
            "<w:p><w:r><w:t>{^absent}x{/absent}</w:t></w:r></w:p>",
            json!({}),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "missing_field");
    }
}
