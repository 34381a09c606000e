use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::ConnectorError;

/// Build a CallToolResult carrying structured JSON plus, when given, the
/// human-readable summary as text content.
pub fn structured_result_with_text<T: Serialize>(
    data: &T,
    text: Option<String>,
) -> Result<CallToolResult, ConnectorError> {
    let value = serde_json::to_value(data).map_err(|e| ConnectorError::Other(e.to_string()))?;

    // Non-object payloads are wrapped under a `data` key.
    let map: JsonMap<String, JsonValue> = match value {
        JsonValue::Object(m) => m,
        other => {
            let mut m = JsonMap::new();
            m.insert("data".to_string(), other);
            m
        }
    };

    Ok(CallToolResult {
        content: text.map(|t| vec![Content::text(t)]).unwrap_or_default(),
        structured_content: Some(JsonValue::Object(map)),
        is_error: Some(false),
        meta: None,
    })
}

/// Tool-level failure the agent can act on (bad arguments, unknown folder).
pub fn error_result(err: &ConnectorError) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(err.to_string())],
        structured_content: Some(serde_json::json!({
            "error": err.code_str(),
            "message": err.to_string(),
        })),
        is_error: Some(true),
        meta: None,
    }
}

pub fn arg_str<'a>(args: &'a JsonMap<String, JsonValue>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn require_str<'a>(
    args: &'a JsonMap<String, JsonValue>,
    key: &str,
) -> Result<&'a str, ConnectorError> {
    arg_str(args, key).ok_or_else(|| ConnectorError::InvalidParams(format!("{} is required", key)))
}

/// Booleans also accepted as the strings "true"/"false", which some clients send.
pub fn arg_bool(args: &JsonMap<String, JsonValue>, key: &str) -> Option<bool> {
    match args.get(key)? {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn arg_u64(args: &JsonMap<String, JsonValue>, key: &str) -> Option<u64> {
    match args.get(key)? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Comma-separated string or JSON array of strings.
pub fn arg_list(args: &JsonMap<String, JsonValue>, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(JsonValue::String(s)) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

pub fn strip_multiple_newlines(text: &str) -> String {
    let mut result = String::new();
    let mut consecutive_blank = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            consecutive_blank += 1;
            if consecutive_blank > 1 {
                continue;
            }
        } else {
            consecutive_blank = 0;
        }
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str(line);
    }
    result.trim().to_string()
}

/// Wrap width for rendered message bodies.
const BODY_WRAP_WIDTH: usize = 120;

/// Plain-text rendering of an HTML message body. Comments, `<style>` and
/// `<script>` are dropped and table cells keep a visible separator.
pub fn html_to_text(html: &str) -> String {
    // html2text can panic on pathological markup
    let rendered = std::panic::catch_unwind(|| {
        html2text::from_read(html.as_bytes(), BODY_WRAP_WIDTH)
    })
    .unwrap_or_else(|_| html.to_string());
    strip_multiple_newlines(&rendered.replace('\u{a0}', " "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn html_to_text_drops_tags_and_styles() {
        let html = "<html><head><style>p { color: red; }</style></head><body><p>Hello</p><p>World &amp; co</p><br/>Bye</body></html>";
        let text = html_to_text(html);
        assert!(text.starts_with("Hello\n"));
        assert!(text.contains("World & co"));
        assert!(text.ends_with("Bye"));
        assert!(!text.contains("color"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn html_to_text_respects_quoted_attributes() {
        assert_eq!(html_to_text("<p title=\"a>b\">Hi</p>"), "Hi");
    }

    #[test]
    fn html_to_text_skips_comments() {
        assert_eq!(html_to_text("<!-- <b> x > y --><p>Body</p>"), "Body");
    }

    #[test]
    fn html_to_text_separates_table_cells() {
        let text = html_to_text("<table><tr><td>Total</td><td>42</td></tr></table>");
        assert!(text.contains("Total"));
        assert!(text.contains("42"));
        assert!(!text.contains("Total42"));
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(strip_multiple_newlines("a\n\n\n\nb  \n"), "a\n\nb");
    }

    #[test]
    fn arg_helpers() {
        let args = json!({
            "to": "a@x.com, b@x.com,,",
            "ids": ["1", " 2 "],
            "flag": "true",
            "count": "7",
            "blank": "   "
        });
        let args = args.as_object().unwrap();
        assert_eq!(arg_list(args, "to"), vec!["a@x.com", "b@x.com"]);
        assert_eq!(arg_list(args, "ids"), vec!["1", "2"]);
        assert_eq!(arg_bool(args, "flag"), Some(true));
        assert_eq!(arg_u64(args, "count"), Some(7));
        assert_eq!(arg_str(args, "blank"), None);
        assert!(matches!(
            require_str(args, "subject"),
            Err(ConnectorError::InvalidParams(_))
        ));
    }

    #[test]
    fn structured_result_wraps_non_objects() {
        let r = structured_result_with_text(&vec![1, 2], Some("two".into())).unwrap();
        assert_eq!(r.structured_content.unwrap()["data"], json!([1, 2]));
        assert_eq!(r.content.len(), 1);
        assert_eq!(r.is_error, Some(false));
    }

    #[test]
    fn error_result_is_flagged() {
        let r = error_result(&ConnectorError::FolderNotFound("X".into()));
        assert_eq!(r.is_error, Some(true));
        assert_eq!(r.structured_content.unwrap()["error"], "folder_not_found");
    }
}
