//! `%(name)s` placeholder substitution.

use std::sync::LazyLock;

use regex::Regex;

use crate::document::Document;
use crate::error::{ManifestError, Origin, Result};

/// Placeholders may reference placeholders this many levels deep.
pub const MAX_DEPTH: usize = 10;

// Alternation order matters: `%%` and full placeholders win over a bare `%`.
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%%|%\(([^()]*)\)s|%").expect("placeholder regex is valid")
});

/// Expands every placeholder in `raw`, the value of `key` in `section`.
pub fn interpolate(
    doc: &Document,
    section: &str,
    key: &str,
    raw: &str,
    origin: &Origin,
) -> Result<String> {
    expand(doc, section, key, raw, origin, 1)
}

fn expand(
    doc: &Document,
    section: &str,
    key: &str,
    raw: &str,
    origin: &Origin,
    depth: usize,
) -> Result<String> {
    if depth > MAX_DEPTH {
        return Err(ManifestError::ReferenceDepth {
            key: key.to_string(),
            origin: origin.clone(),
        });
    }

    let mut out = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in TOKEN.captures_iter(raw) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&raw[last..whole.start()]);
        last = whole.end();

        match caps.get(1) {
            Some(name) => {
                let reference = name.as_str().trim().to_lowercase();
                let value = doc
                    .lookup(section, &reference)
                    .and_then(|entry| entry.value.as_deref())
                    .ok_or_else(|| ManifestError::InvalidReference {
                        key: key.to_string(),
                        reference: reference.clone(),
                        origin: origin.clone(),
                    })?;
                out.push_str(&expand(doc, section, key, value, origin, depth + 1)?);
            }
            None if whole.as_str() == "%%" => out.push('%'),
            None => {
                return Err(ManifestError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: "'%' must be followed by '%' or '(name)s'".to_string(),
                    origin: origin.clone(),
                });
            }
        }
    }
    out.push_str(&raw[last..]);
    Ok(out)
}

/// Escapes `%` so that the value survives [`interpolate`] unchanged.
pub fn escape(value: &str) -> String {
    value.replace('%', "%%")
}
