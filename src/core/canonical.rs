//! Canonical byte encodings. Two honest implementations must produce the same
//! bytes for the same logical value, so the rules here are deliberately rigid:
//! object keys sorted ascending by code point, compact separators, UTF-8
//! strings verbatim, f64 in shortest round-trip form (integral floats keep a
//! trailing `.0`).

use serde_json::Value;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Serializes a JSON value to its canonical byte form.
///
/// `serde_json::Value` objects are backed by a BTreeMap, so key order is
/// already sorted; `to_vec` emits compact separators and raw UTF-8. Callers
/// that start from a struct must convert through `serde_json::to_value` first
/// so field order cannot leak into the bytes.
pub fn canonical_json_bytes(value: &Value) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Signature of a ranking snapshot: lowercase hex SHA-256 of the canonical
/// bytes.
pub fn ranking_signature(snapshot: &Value) -> serde_json::Result<String> {
    Ok(sha256_hex(&canonical_json_bytes(snapshot)?))
}

/// Deterministic hash of a clinical narrative. The raw narrative is never
/// persisted; only this digest is.
///
/// Normalization: NFKC, whitespace collapsed to single spaces, trimmed, and
/// lowercased only for English locales. The locale is folded into the hashed
/// payload to avoid cross-locale collisions.
pub fn narrative_hash(narrative: &str, locale: Option<&str>) -> String {
    let normalized: String = narrative.nfkc().collect();
    let collapsed = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

    let is_english = locale
        .map(|l| l.to_ascii_lowercase().starts_with("en"))
        .unwrap_or(false);
    let text = if is_english {
        collapsed.to_lowercase()
    } else {
        collapsed
    };

    let payload = format!("locale:{}:{}", locale.unwrap_or("unknown"), text);
    sha256_hex(payload.as_bytes())
}
