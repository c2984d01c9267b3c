use serde::de::DeserializeOwned;

use crate::error::{GraphRefineError, Result};

/// Slice from the leftmost `{` to the rightmost `}`.
///
/// Completion output often wraps the object in prose or code fences; this
/// tolerates both. Returns `None` when there is no such span.
pub fn locate_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Locate and decode the JSON object in a completion.
pub fn parse_json_payload<T: DeserializeOwned>(text: &str) -> Result<T> {
    let object = locate_json_object(text).ok_or_else(|| {
        GraphRefineError::Parse(format!("No JSON object in completion: {}", preview(text)))
    })?;
    serde_json::from_str(object).map_err(|e| {
        GraphRefineError::Parse(format!("Invalid JSON payload ({}): {}", e, preview(object)))
    })
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    let mut out: String = text.chars().take(LIMIT).collect();
    if text.chars().count() > LIMIT {
        out.push_str("...");
    }
    out
}
