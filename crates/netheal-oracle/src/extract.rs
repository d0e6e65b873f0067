//! JSON extraction from free-text answers
//!
//! Answers often wrap the payload in a fenced code block or leave a trailing
//! comma behind. Extraction takes the first fenced block (with or without a
//! `json` tag), falling back to the whole text; if strict parsing fails,
//! trailing commas before `]` or `}` are removed and parsing is tried once
//! more.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::ParseError;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n```").expect("fence pattern"));

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([\]}])").expect("trailing comma pattern"));

/// The JSON-looking part of an answer
#[must_use]
pub fn extract_payload(text: &str) -> &str {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or(text, |m| m.as_str())
        .trim()
}

/// Drop commas that directly precede a closing bracket or brace
#[must_use]
pub fn repair_trailing_commas(payload: &str) -> String {
    TRAILING_COMMA.replace_all(payload, "$1").into_owned()
}

/// Extract, parse, and on failure repair and parse again
///
/// # Errors
/// `ParseError` carrying the raw and cleaned text when both attempts fail.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let payload = extract_payload(raw);
    match serde_json::from_str(payload) {
        Ok(value) => Ok(value),
        Err(first) => {
            let cleaned = repair_trailing_commas(payload);
            serde_json::from_str(&cleaned).map_err(|second| ParseError {
                raw: raw.to_string(),
                cleaned,
                reason: format!("{first}; after repair: {second}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    #[test]
    fn test_fenced_json_block() {
        let value: Value = parse_structured("```json\n{\"commands\":[]}\n```").unwrap();
        assert_eq!(value, json!({"commands": []}));
    }

    #[test]
    fn test_untagged_fence_with_prose() {
        let text = "Here is the plan:\n```\n{\"R1\": [\"no shutdown\"]}\n```\nLet me know.";
        let value: Value = parse_structured(text).unwrap();
        assert_eq!(value, json!({"R1": ["no shutdown"]}));
    }

    #[test]
    fn test_bare_json_falls_back_to_whole_text() {
        let value: Value = parse_structured("  {\"status\": \"Null\"}  ").unwrap();
        assert_eq!(value, json!({"status": "Null"}));
    }

    #[test]
    fn test_trailing_commas_repaired() {
        let value: Value =
            parse_structured("{\"traffic-path\": [\"R1\", \"SW1\",], \"x\": 1,\n}").unwrap();
        assert_eq!(value, json!({"traffic-path": ["R1", "SW1"], "x": 1}));
    }

    #[test]
    fn test_unrepairable_keeps_raw_and_cleaned() {
        let err = parse_structured::<Value>("```json\n{\"a\": [1,],\n```").unwrap_err();
        assert!(err.raw.starts_with("```json"));
        assert_eq!(err.cleaned, "{\"a\": [1],");
        assert!(err.reason.contains("after repair"));
    }

    #[test]
    fn test_typed_target() {
        #[derive(serde::Deserialize)]
        struct Path {
            #[serde(rename = "traffic-path")]
            path: Vec<String>,
        }
        let parsed: Path = parse_structured("{\"traffic-path\": [\"FW\"]}").unwrap();
        assert_eq!(parsed.path, vec!["FW".to_string()]);
    }
}
