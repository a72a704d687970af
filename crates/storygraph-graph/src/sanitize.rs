//! Query-value sanitization.
//!
//! Values are bound as parameters wherever Cypher allows it. Labels and
//! relationship types cannot be parameterized, so they pass through a narrow
//! allow-list: ASCII letters, digits and underscore. Literal rendering is
//! used only by the script renderer in [`crate::cypher`].

use storygraph_core::PropertyValue;

/// Label used when an extracted label has no usable characters.
pub const FALLBACK_LABEL: &str = "Entity";

/// Relationship type used when an extracted type has no usable characters.
pub const FALLBACK_REL_TYPE: &str = "RELATED_TO";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("Identifier {raw:?} has no valid characters")]
    Rejected { raw: String },
}

/// Clean an identifier: invalid characters become `_`, runs of `_`
/// collapse to one, and leading/trailing `_` are dropped.
pub fn sanitize_identifier(raw: &str) -> Result<String, SanitizeError> {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let cleaned = out.trim_matches('_');
    if cleaned.is_empty() {
        return Err(SanitizeError::Rejected {
            raw: raw.to_string(),
        });
    }
    Ok(cleaned.to_string())
}

/// An identifier after sanitization, remembering whether it fell back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub value: String,
    pub fell_back: bool,
}

/// Sanitize a node label, falling back to [`FALLBACK_LABEL`].
pub fn label(raw: &str) -> Identifier {
    match sanitize_identifier(raw) {
        Ok(value) => Identifier {
            value,
            fell_back: false,
        },
        Err(e) => {
            tracing::warn!(error = %e, fallback = FALLBACK_LABEL, "Label rejected");
            Identifier {
                value: FALLBACK_LABEL.to_string(),
                fell_back: true,
            }
        }
    }
}

/// Sanitize a relationship type (upper snake case), falling back to
/// [`FALLBACK_REL_TYPE`].
pub fn rel_type(raw: &str) -> Identifier {
    match sanitize_identifier(raw) {
        Ok(value) => Identifier {
            value: value.to_ascii_uppercase(),
            fell_back: false,
        },
        Err(e) => {
            tracing::warn!(error = %e, fallback = FALLBACK_REL_TYPE, "Relationship type rejected");
            Identifier {
                value: FALLBACK_REL_TYPE.to_string(),
                fell_back: true,
            }
        }
    }
}

/// Escape a string so it can sit between single quotes in Cypher.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Render a property value as a Cypher literal.
pub fn literal(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Text(s) => format!("'{}'", escape_string(s)),
        PropertyValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        PropertyValue::Null => "null".to_string(),
        PropertyValue::Integer(i) => i.to_string(),
        PropertyValue::Float(f) if f.is_finite() => format!("{f:?}"),
        PropertyValue::Float(_) => "null".to_string(),
    }
}

/// Render a string as a quoted Cypher literal.
pub fn quote(s: &str) -> String {
    literal(&PropertyValue::Text(s.to_string()))
}
