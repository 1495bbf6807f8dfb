//! Strict extraction of JSON payloads from model output.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use super::client::ModelError;

fn fenced_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap_or_else(|e| {
            unreachable!("static regex failed to compile: {e}");
        })
    })
}

/// Locate the JSON object in raw model text.
///
/// Accepts a bare object, an object inside a fenced code block, or an object
/// surrounded by prose. Returns `None` when no braces are present.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    if let Some(caps) = fenced_block().captures(trimmed) {
        return caps.get(1).map(|m| m.as_str());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse model output into `T`, failing with `ModelError::Parse`.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ModelError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| ModelError::Parse("no JSON object in model output".to_string()))?;
    serde_json::from_str(json).map_err(|e| ModelError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Small {
        score: u32,
    }

    #[test]
    fn test_bare_object() {
        assert_eq!(extract_json_object(" {\"a\":1} "), Some("{\"a\":1}"));
    }

    #[test]
    fn test_fenced_object() {
        let raw = "Here you go:\n```json\n{\"score\": 70}\n```\nThanks";
        let parsed: Small = parse_structured(raw).unwrap();
        assert_eq!(parsed, Small { score: 70 });
    }

    #[test]
    fn test_object_in_prose() {
        let raw = "My answer is {\"score\": 12} as requested.";
        let parsed: Small = parse_structured(raw).unwrap();
        assert_eq!(parsed.score, 12);
    }

    #[test]
    fn test_no_object_is_parse_error() {
        let err = parse_structured::<Small>("I cannot help with that").unwrap_err();
        assert!(matches!(err, ModelError::Parse(_)));
    }

    #[test]
    fn test_schema_mismatch_is_parse_error() {
        let err = parse_structured::<Small>("{\"score\": \"high\"}").unwrap_err();
        assert!(matches!(err, ModelError::Parse(_)));
        assert!(err.is_retryable());
    }
}
