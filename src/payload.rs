//! Fill-request payload normalisation.
//!
//! Requests arrive either as multipart forms (every field is text) or as
//! JSON bodies (fields are already structured). Both are collected into a
//! [`RawFillRequest`] and normalised into a [`FillPayload`] in one place:
//!
//! 1. `data` falls back to `jsonPayload`; a string is parsed as JSON.
//! 2. A double-wrapped payload (`data` holding both `templateUrl` and
//!    `data`) is unwrapped exactly once. A second level of wrapping is
//!    rejected rather than guessed at.
//! 3. The render context must be a JSON object.

use crate::error::DocfillError;
use crate::output::TargetFormat;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Fill-request fields as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFillRequest {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, rename = "jsonPayload")]
    pub json_payload: Option<Value>,
    #[serde(default, rename = "templateUrl")]
    pub template_url: Option<String>,
    #[serde(default, rename = "outputFormat")]
    pub output_format: Option<String>,
}

/// A validated fill request.
#[derive(Debug, Clone, PartialEq)]
pub struct FillPayload {
    /// The render context (always a JSON object).
    pub data: Value,
    pub template_url: Option<String>,
    pub output_format: TargetFormat,
}

impl RawFillRequest {
    /// Parse a JSON request body. An empty body yields an empty request.
    pub fn from_json_body(body: &[u8]) -> Result<Self, DocfillError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| DocfillError::InvalidDataFormat {
            reason: format!("request body: {e}"),
        })
    }

    /// Validate and normalise into a [`FillPayload`].
    pub fn normalize(self) -> Result<FillPayload, DocfillError> {
        let raw = self
            .data
            .filter(|v| !v.is_null())
            .or(self.json_payload.filter(|v| !v.is_null()))
            .ok_or(DocfillError::MissingData)?;
        let data = parse_data(raw)?;

        let outer_url = self.template_url.filter(|u| !u.trim().is_empty());
        let (data, inner_url) = unwrap_double(data)?;
        let template_url = match (outer_url, inner_url) {
            (Some(outer), Some(inner)) => {
                if outer != inner {
                    warn!(
                        "templateUrl given twice ('{}' and nested '{}'); using the outer value",
                        outer, inner
                    );
                }
                Some(outer)
            }
            (outer, inner) => outer.or(inner),
        };

        if !data.is_object() {
            return Err(DocfillError::InvalidDataFormat {
                reason: format!("'data' must be a JSON object, got {}", type_name(&data)),
            });
        }

        let output_format = match self.output_format.as_deref().map(str::trim) {
            None | Some("") => TargetFormat::Docx,
            Some(format) => format.parse()?,
        };

        Ok(FillPayload {
            data,
            template_url,
            output_format,
        })
    }
}

/// Strings hold JSON text (multipart fields, legacy clients); anything else is used as is.
fn parse_data(raw: Value) -> Result<Value, DocfillError> {
    match raw {
        Value::String(text) if text.trim().is_empty() => Err(DocfillError::MissingData),
        Value::String(text) => {
            let parsed: Value =
                serde_json::from_str(&text).map_err(|e| DocfillError::InvalidDataFormat {
                    reason: e.to_string(),
                })?;
            if parsed.is_null() {
                return Err(DocfillError::MissingData);
            }
            Ok(parsed)
        }
        other => Ok(other),
    }
}

fn is_wrapped(map: &Map<String, Value>) -> bool {
    map.contains_key("templateUrl") && map.contains_key("data")
}

/// Unwrap `{templateUrl, data}` nested inside `data`, exactly one level.
fn unwrap_double(data: Value) -> Result<(Value, Option<String>), DocfillError> {
    let mut map = match data {
        Value::Object(map) if is_wrapped(&map) => map,
        other => return Ok((other, None)),
    };

    debug!("Unwrapping double-wrapped payload");
    let inner_url = match map.remove("templateUrl") {
        Some(Value::String(url)) if !url.trim().is_empty() => Some(url),
        Some(Value::String(_)) | Some(Value::Null) | None => None,
        Some(other) => {
            return Err(DocfillError::InvalidDataFormat {
                reason: format!("nested 'templateUrl' must be a string, got {}", type_name(&other)),
            });
        }
    };
    let inner = parse_data(map.remove("data").unwrap_or(Value::Null))?;

    if inner.as_object().is_some_and(is_wrapped) {
        return Err(DocfillError::InvalidDataFormat {
            reason: "payload is wrapped more than once".to_string(),
        });
    }

    Ok((inner, inner_url))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
