//! Lenient JSON for documents written by Python's `json` module
//!
//! Python emits bare `NaN`, `Infinity` and `-Infinity` tokens, which are
//! not JSON. They are rewritten to `null` (outside string literals) so the
//! non-finite values surface as absent metrics instead of parse failures.

use std::borrow::Cow;

use serde_json::Value;

/// Parse JSON, accepting `NaN`/`Infinity`/`-Infinity` as `null`.
///
/// # Errors
///
/// Returns the parse error when the text is malformed beyond those tokens.
pub fn parse_relaxed(text: &str) -> serde_json::Result<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(strict) => match replace_non_finite(text) {
            Cow::Borrowed(_) => Err(strict),
            Cow::Owned(rewritten) => serde_json::from_str(&rewritten),
        },
    }
}

fn replace_non_finite(text: &str) -> Cow<'_, str> {
    const TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

    let mut out = String::new();
    let mut copied = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    let bytes = text.as_bytes();

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match (escaped, b) {
                (true, _) => escaped = false,
                (false, b'\\') => escaped = true,
                (false, b'"') => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        if b == b'"' {
            in_string = true;
            i += 1;
            continue;
        }
        if let Some(token) = TOKENS.iter().find(|t| bytes[i..].starts_with(t.as_bytes())) {
            out.push_str(&text[copied..i]);
            out.push_str("null");
            i += token.len();
            copied = i;
            continue;
        }
        i += 1;
    }

    if copied == 0 {
        Cow::Borrowed(text)
    } else {
        out.push_str(&text[copied..]);
        Cow::Owned(out)
    }
}

/// Non-negative integer, accepting whole floats (`3.0`) as well.
pub(crate) fn json_u64(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

/// Island index, rejecting values that do not fit a `u32`.
pub(crate) fn json_u32(value: &Value) -> Option<u32> {
    json_u64(value).and_then(|v| u32::try_from(v).ok())
}

/// Owned string for string values only.
pub(crate) fn json_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// List of strings; non-string members are dropped.
pub(crate) fn json_string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(json_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_json_passes() {
        let v = parse_relaxed(r#"{"x": 1.5}"#).unwrap();
        assert_eq!(v["x"], 1.5);
    }

    #[test]
    fn test_non_finite_tokens_become_null() {
        let v = parse_relaxed(r#"{"a": NaN, "b": Infinity, "c": -Infinity, "d": [NaN, 2]}"#).unwrap();
        assert!(v["a"].is_null());
        assert!(v["b"].is_null());
        assert!(v["c"].is_null());
        assert!(v["d"][0].is_null());
        assert_eq!(v["d"][1], 2);
    }

    #[test]
    fn test_tokens_inside_strings_untouched() {
        let v = parse_relaxed(r#"{"code": "x = float(\"NaN\")", "y": NaN}"#).unwrap();
        assert_eq!(v["code"], "x = float(\"NaN\")");
        assert!(v["y"].is_null());
    }

    #[test]
    fn test_lenient_field_helpers() {
        assert_eq!(json_u64(&serde_json::json!(3)), Some(3));
        assert_eq!(json_u64(&serde_json::json!(3.0)), Some(3));
        assert_eq!(json_u64(&serde_json::json!(-1)), None);
        assert_eq!(json_u32(&serde_json::json!(u64::MAX)), None);
        assert_eq!(json_string_list(&serde_json::json!(["a", 1, "b"])), vec!["a", "b"]);
    }

    #[test]
    fn test_garbage_still_fails() {
        assert!(parse_relaxed("{not json").is_err());
        assert!(parse_relaxed("{\"a\": NaN").is_err());
    }
}
