//! Template markup: find `{tags}` in a part's XML and build a section tree.
//!
//! Parsing runs in three passes over one part:
//!
//! 1. **Tokenise.** quick-xml events are kept verbatim, except that the text
//!    of every `<w:t>` element is unescaped into a text token.
//! 2. **Scan.** A small state machine walks the text tokens. Because Word
//!    splits text into runs freely, a tag may start in one `<w:t>` and end
//!    several runs later; its characters are removed from every token and a
//!    single tag item is placed where the `{` was.
//! 3. **Tree.** Opening and closing section tags are paired. A pair whose
//!    tags each sit alone in their own paragraph becomes a *paragraph loop*:
//!    the two tag paragraphs are dropped so that only whole paragraphs
//!    repeat. The result is a [`Node`] tree for the renderer.

use crate::error::DocfillError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use std::fmt;

/// A dotted lookup path. `{.}` has no segments and means "current scope".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPath {
    raw: String,
    segments: Vec<String>,
}

impl TagPath {
    /// Parse a tag name. Returns `None` for an empty name or an empty segment.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw == "." {
            return Some(Self {
                raw: raw.to_string(),
                segments: Vec::new(),
            });
        }
        let segments: Vec<String> = raw.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The name as written in the template.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_current_scope(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// What a tag does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    /// `{name}`
    Value,
    /// `{#name}`
    Section,
    /// `{^name}`
    InvertedSection,
    /// `{/name}`
    Close,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TagKind::Value => "value",
            TagKind::Section => "section",
            TagKind::InvertedSection => "inverted_section",
            TagKind::Close => "close",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Tag {
    kind: TagKind,
    path: TagPath,
}

impl Tag {
    fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let (kind, name) = match trimmed.chars().next() {
            Some('#') => (TagKind::Section, &trimmed[1..]),
            Some('^') => (TagKind::InvertedSection, &trimmed[1..]),
            Some('/') => (TagKind::Close, &trimmed[1..]),
            _ => (TagKind::Value, trimmed),
        };
        let path = TagPath::parse(name).ok_or_else(|| {
            if name.trim().is_empty() {
                format!("empty tag '{{{raw}}}'")
            } else {
                format!("invalid tag name '{{{raw}}}'")
            }
        })?;
        Ok(Self { kind, path })
    }
}

/// One node of a parsed part.
#[derive(Debug, Clone)]
pub enum Node {
    /// XML copied through unchanged.
    Markup(Event<'static>),
    /// Literal text inside a `<w:t>`.
    Text(String),
    /// `{name}` substitution.
    Value(TagPath),
    /// `{#name}…{/name}` or `{^name}…{/name}`.
    Section {
        path: TagPath,
        inverted: bool,
        body: Vec<Node>,
    },
}

// ── Pass 1: tokenise ─────────────────────────────────────────────────────

#[derive(Debug)]
enum Token {
    Markup(Event<'static>),
    Text(String),
}

fn tokenize(part: &str, xml: &[u8]) -> Result<Vec<Token>, DocfillError> {
    let invalid = |e: &dyn fmt::Display| DocfillError::InvalidTemplateFormat {
        detail: format!("{part}: {e}"),
    };

    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut tokens = Vec::new();
    let mut text_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| invalid(&e))? {
            Event::Eof => break,
            Event::Start(e) if e.name().as_ref() == b"w:t" => {
                text_depth += 1;
                tokens.push(Token::Markup(Event::Start(preserve_space(e))));
            }
            Event::End(e) if e.name().as_ref() == b"w:t" => {
                text_depth = text_depth.saturating_sub(1);
                tokens.push(Token::Markup(Event::End(e.into_owned())));
            }
            Event::Text(t) if text_depth > 0 => {
                let text = t.unescape().map_err(|e| invalid(&e))?;
                tokens.push(Token::Text(text.into_owned()));
            }
            Event::CData(c) if text_depth > 0 => {
                let text = String::from_utf8(c.into_inner().into_owned()).map_err(|e| invalid(&e))?;
                tokens.push(Token::Text(text));
            }
            other => tokens.push(Token::Markup(other.into_owned())),
        }
        buf.clear();
    }

    Ok(tokens)
}

/// Substituted values may carry leading or trailing spaces.
fn preserve_space(start: BytesStart<'_>) -> BytesStart<'static> {
    let mut owned = start.into_owned();
    let has_space = owned
        .attributes()
        .flatten()
        .any(|a| a.key.as_ref() == b"xml:space");
    if !has_space {
        owned.push_attribute(("xml:space", "preserve"));
    }
    owned
}

// ── Pass 2: scan tags ────────────────────────────────────────────────────

#[derive(Debug)]
enum Item {
    Markup(Event<'static>),
    Text(String),
    Tag { tag: Tag, paragraph: Option<usize> },
    /// Placeholder for a tag whose closing brace has not been seen yet.
    Pending,
}

#[derive(Debug)]
struct Paragraph {
    start: usize,
    end: Option<usize>,
}

enum ScanState {
    Outside,
    Inside {
        at: usize,
        name: String,
        paragraph: Option<usize>,
    },
}

struct Scan {
    items: Vec<Item>,
    paragraphs: Vec<Paragraph>,
}

fn scan(part: &str, tokens: Vec<Token>) -> Result<Scan, DocfillError> {
    let malformed = |detail: String| DocfillError::MalformedTemplateMarkup {
        part: part.to_string(),
        detail,
    };

    let mut items = Vec::with_capacity(tokens.len());
    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut open_paragraphs: Vec<usize> = Vec::new();
    let mut state = ScanState::Outside;

    for token in tokens {
        let text = match token {
            Token::Markup(event) => {
                match &event {
                    Event::Start(e) if e.name().as_ref() == b"w:p" => {
                        open_paragraphs.push(paragraphs.len());
                        paragraphs.push(Paragraph {
                            start: items.len(),
                            end: None,
                        });
                    }
                    Event::End(e) if e.name().as_ref() == b"w:p" => {
                        if let Some(id) = open_paragraphs.pop() {
                            paragraphs[id].end = Some(items.len());
                        }
                    }
                    _ => {}
                }
                items.push(Item::Markup(event));
                continue;
            }
            Token::Text(text) => text,
        };

        let current = open_paragraphs.last().copied();
        let mut plain = String::new();
        for c in text.chars() {
            state = match state {
                ScanState::Outside => match c {
                    '{' => {
                        if !plain.is_empty() {
                            items.push(Item::Text(std::mem::take(&mut plain)));
                        }
                        items.push(Item::Pending);
                        ScanState::Inside {
                            at: items.len() - 1,
                            name: String::new(),
                            paragraph: current,
                        }
                    }
                    '}' => {
                        return Err(malformed(format!(
                            "'}}' without a matching '{{' after \"{}\"",
                            tail(&plain)
                        )));
                    }
                    _ => {
                        plain.push(c);
                        ScanState::Outside
                    }
                },
                ScanState::Inside {
                    at,
                    mut name,
                    paragraph,
                } => match c {
                    '{' => {
                        return Err(malformed(format!("tag '{{{name}' contains '{{'")));
                    }
                    '}' => {
                        if paragraph != current {
                            return Err(malformed(format!(
                                "tag '{{{name}}}' spans more than one paragraph"
                            )));
                        }
                        let tag = Tag::parse(&name).map_err(malformed)?;
                        items[at] = Item::Tag { tag, paragraph };
                        ScanState::Outside
                    }
                    _ => {
                        name.push(c);
                        ScanState::Inside {
                            at,
                            name,
                            paragraph,
                        }
                    }
                },
            };
        }
        if !plain.is_empty() {
            items.push(Item::Text(plain));
        }
    }

    if let ScanState::Inside { name, .. } = state {
        return Err(malformed(format!("unclosed tag '{{{name}'")));
    }

    Ok(Scan { items, paragraphs })
}

fn tail(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(20);
    chars[start..].iter().collect()
}

// ── Pass 3: pair sections, collapse paragraph loops, build the tree ──────

fn pair_sections(part: &str, items: &[Item]) -> Result<Vec<(usize, usize)>, DocfillError> {
    let malformed = |detail: String| DocfillError::MalformedTemplateMarkup {
        part: part.to_string(),
        detail,
    };

    let mut open: Vec<(usize, &Tag)> = Vec::new();
    let mut pairs = Vec::new();

    for (idx, item) in items.iter().enumerate() {
        let Item::Tag { tag, .. } = item else {
            continue;
        };
        match tag.kind {
            TagKind::Value => {}
            TagKind::Section | TagKind::InvertedSection => open.push((idx, tag)),
            TagKind::Close => {
                let Some((open_idx, opener)) = open.pop() else {
                    return Err(malformed(format!(
                        "closing tag '{{/{}}}' has no opening tag",
                        tag.path
                    )));
                };
                if opener.path != tag.path {
                    return Err(malformed(format!(
                        "closing tag '{{/{}}}' does not match opening tag '{{{}{}}}'",
                        tag.path,
                        if opener.kind == TagKind::Section { '#' } else { '^' },
                        opener.path
                    )));
                }
                pairs.push((open_idx, idx));
            }
        }
    }

    if let Some((_, opener)) = open.pop() {
        return Err(malformed(format!(
            "section '{}' is never closed",
            opener.path
        )));
    }

    Ok(pairs)
}

/// Item indices to drop so paragraph loops repeat whole paragraphs.
fn paragraph_loop_drops(scan: &Scan, pairs: &[(usize, usize)]) -> Vec<bool> {
    let mut dropped = vec![false; scan.items.len()];

    let paragraph_of = |idx: usize| match &scan.items[idx] {
        Item::Tag { paragraph, .. } => *paragraph,
        _ => None,
    };

    let alone_in = |paragraph: usize, tag_idx: usize| -> Option<(usize, usize)> {
        let p = &scan.paragraphs[paragraph];
        let end = p.end?;
        let alone = (p.start..=end).all(|idx| match &scan.items[idx] {
            Item::Text(text) => text.trim().is_empty(),
            Item::Tag { .. } => idx == tag_idx,
            Item::Markup(_) | Item::Pending => true,
        });
        alone.then_some((p.start, end))
    };

    for &(open, close) in pairs {
        let (Some(open_para), Some(close_para)) = (paragraph_of(open), paragraph_of(close)) else {
            continue;
        };
        if open_para == close_para {
            continue;
        }
        let (Some(open_range), Some(close_range)) =
            (alone_in(open_para, open), alone_in(close_para, close))
        else {
            continue;
        };
        for (range, keep) in [(open_range, open), (close_range, close)] {
            for (idx, flag) in dropped.iter_mut().enumerate().take(range.1 + 1).skip(range.0) {
                *flag = idx != keep;
            }
        }
    }

    dropped
}

fn build_tree(part: &str, items: Vec<Item>) -> Result<Vec<Node>, DocfillError> {
    let mut root: Vec<Node> = Vec::new();
    let mut open: Vec<(TagPath, bool, Vec<Node>)> = Vec::new();

    for item in items {
        let node = match item {
            Item::Markup(event) => Node::Markup(event),
            Item::Text(text) => Node::Text(text),
            Item::Tag { tag, .. } => match tag.kind {
                TagKind::Value => Node::Value(tag.path),
                TagKind::Section => {
                    open.push((tag.path, false, Vec::new()));
                    continue;
                }
                TagKind::InvertedSection => {
                    open.push((tag.path, true, Vec::new()));
                    continue;
                }
                TagKind::Close => {
                    let (path, inverted, body) = open.pop().ok_or_else(|| {
                        DocfillError::MalformedTemplateMarkup {
                            part: part.to_string(),
                            detail: format!("closing tag '{{/{}}}' has no opening tag", tag.path),
                        }
                    })?;
                    Node::Section {
                        path,
                        inverted,
                        body,
                    }
                }
            },
            Item::Pending => {
                return Err(DocfillError::RenderEngineFailure(format!(
                    "{part}: unresolved tag placeholder"
                )));
            }
        };
        match open.last_mut() {
            Some((_, _, body)) => body.push(node),
            None => root.push(node),
        }
    }

    if let Some((path, ..)) = open.pop() {
        return Err(DocfillError::MalformedTemplateMarkup {
            part: part.to_string(),
            detail: format!("section '{path}' is never closed"),
        });
    }

    Ok(root)
}

/// Parse one XML part into a render tree.
pub fn parse_part(part: &str, xml: &[u8]) -> Result<Vec<Node>, DocfillError> {
    let tokens = tokenize(part, xml)?;
    let scan = scan(part, tokens)?;
    let pairs = pair_sections(part, &scan.items)?;
    let dropped = paragraph_loop_drops(&scan, &pairs);

    let items = scan
        .items
        .into_iter()
        .zip(dropped)
        .filter_map(|(item, skip)| (!skip).then_some(item))
        .collect();

    build_tree(part, items)
}

/// Every tag in a parsed tree, in document order, with closing tags omitted.
pub fn collect_tags(nodes: &[Node], out: &mut Vec<(TagKind, TagPath)>) {
    for node in nodes {
        match node {
            Node::Value(path) => out.push((TagKind::Value, path.clone())),
            Node::Section {
                path,
                inverted,
                body,
            } => {
                let kind = if *inverted {
                    TagKind::InvertedSection
                } else {
                    TagKind::Section
                };
                out.push((kind, path.clone()));
                collect_tags(body, out);
            }
            Node::Markup(_) | Node::Text(_) => {}
        }
    }
}
