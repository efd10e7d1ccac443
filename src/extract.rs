//! Entered-at extraction from unstructured vendor card payloads.
//!
//! Card detail JSON is an arbitrarily nested object whose exact shape varies
//! by vendor version. The only contract is that *some* key ends in
//! `entered_at` (`entered_at`, `status_entered_at`, `pipeline_entered_at`,
//! ...). The search is a depth-capped pre-order walk; the first match in
//! document order wins, with no ranking between candidate field names.

use serde_json::Value;

/// Maximum nesting depth the entered-at search descends into.
pub const MAX_SCAN_DEPTH: usize = 4;

/// Find the first value under a key whose name ends in `entered_at`
/// (case-insensitive), walking objects and arrays pre-order up to
/// [`MAX_SCAN_DEPTH`] levels deep.
pub fn find_entered_at(value: &Value) -> Option<Value> {
    find_suffixed(value, "entered_at", 0)
}

fn find_suffixed(value: &Value, suffix: &str, depth: usize) -> Option<Value> {
    if depth >= MAX_SCAN_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key.to_ascii_lowercase().ends_with(suffix) {
                    return Some(child.clone());
                }
                if let Some(found) = find_suffixed(child, suffix, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items
            .iter()
            .find_map(|item| find_suffixed(item, suffix, depth + 1)),
        _ => None,
    }
}

/// Convert a raw entered-at candidate to epoch milliseconds.
///
/// - numeric > 1e12: already milliseconds
/// - numeric > 1e9: seconds, scaled to ms
/// - string: date parsing first (RFC 3339, then the CRM's
///   `YYYY-MM-DD HH:MM:SS` form), then a bare-numeric retry under the same
///   ms/seconds heuristic
/// - anything else, including numerics <= 1e9: no timestamp
pub fn to_epoch_ms(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_f64().and_then(numeric_to_ms),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
                if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(dt.and_utc().timestamp_millis());
                }
            }
            s.parse::<f64>().ok().and_then(numeric_to_ms)
        }
        _ => None,
    }
}

fn numeric_to_ms(n: f64) -> Option<i64> {
    if !n.is_finite() {
        return None;
    }
    if n > 1e12 {
        Some(n as i64)
    } else if n > 1e9 {
        Some((n * 1000.0) as i64)
    } else {
        None
    }
}

/// Render the raw candidate for diagnostics: strings verbatim, numbers via
/// display. Structured values carry no useful raw form.
pub fn raw_display(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
