// `{{path}}` placeholder interpolation over JSON templates
//
// A placeholder is `{{path}}` where `path` is a dotted traversal into a
// context value (object keys, numeric array indices). Substitution happens
// on the serialized template: the quoted form `"{{path}}"` is replaced by
// the JSON encoding of the resolved value (preserving its type), the bare
// form by its string rendering. Unresolved placeholders stay in place.

use regex::Regex;
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Walk `context` along a dotted path; `None` when any segment is missing
pub fn lookup_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String rendering of a resolved value for bare placeholders: strings keep
/// their content un-quoted, everything else uses its JSON encoding
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn placeholder_regex() -> Regex {
    // Compiled per call; template rendering is not on a hot path
    Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder pattern is valid")
}

/// Render a JSON template against a context.
///
/// Used by dynamic task groups (context `{item, index}`) and workflow
/// templates (context = merged parameters). The substituted string must
/// parse back to JSON, which fails only when a bare placeholder injects
/// text that breaks the document (e.g. an unescaped quote) - surfaced as
/// a `Template` error.
pub fn render_template(template: &Value, context: &Value) -> Result<Value> {
    let mut rendered = serde_json::to_string(template)
        .map_err(|e| EngineError::template(format!("template is not serializable: {e}")))?;

    let pattern = placeholder_regex();
    let paths: Vec<String> = pattern
        .captures_iter(&rendered)
        .map(|captures| captures[1].to_string())
        .collect();

    for path in paths {
        let Some(value) = lookup_path(context, &path) else {
            continue;
        };
        let quoted = format!("\"{{{{{path}}}}}\"");
        let bare = format!("{{{{{path}}}}}");
        let encoded = serde_json::to_string(value)
            .map_err(|e| EngineError::template(format!("unencodable value at '{path}': {e}")))?;
        rendered = rendered.replace(&quoted, &encoded);
        rendered = rendered.replace(&bare, &escape_for_json_string(&render_scalar(value)));
    }

    serde_json::from_str(&rendered)
        .map_err(|e| EngineError::template(format!("interpolated template is not valid JSON: {e}")))
}

// Bare placeholders are substituted inside JSON string literals, so the
// replacement text must stay string-safe.
fn escape_for_json_string(raw: &str) -> String {
    let encoded = serde_json::to_string(raw).unwrap_or_default();
    encoded
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_object_path() {
        let context = json!({"item": {"user": {"id": 7}}});
        assert_eq!(lookup_path(&context, "item.user.id"), Some(&json!(7)));
        assert_eq!(lookup_path(&context, "item.user.missing"), None);
    }

    #[test]
    fn test_lookup_array_index() {
        let context = json!({"items": ["a", "b"]});
        assert_eq!(lookup_path(&context, "items.1"), Some(&json!("b")));
        assert_eq!(lookup_path(&context, "items.9"), None);
    }

    #[test]
    fn test_quoted_placeholder_preserves_type() {
        let template = json!({"count": "{{item.n}}", "flag": "{{item.ok}}"});
        let context = json!({"item": {"n": 42, "ok": true}});
        let rendered = render_template(&template, &context).unwrap();
        assert_eq!(rendered, json!({"count": 42, "flag": true}));
    }

    #[test]
    fn test_bare_placeholder_renders_as_string() {
        let template = json!({"greeting": "hello {{item.name}} ({{index}})"});
        let context = json!({"item": {"name": "ada"}, "index": 2});
        let rendered = render_template(&template, &context).unwrap();
        assert_eq!(rendered, json!({"greeting": "hello ada (2)"}));
    }

    #[test]
    fn test_object_substitution_keeps_structure() {
        let template = json!({"payload": "{{item}}"});
        let context = json!({"item": {"id": 1, "tags": ["x"]}});
        let rendered = render_template(&template, &context).unwrap();
        assert_eq!(rendered, json!({"payload": {"id": 1, "tags": ["x"]}}));
    }

    #[test]
    fn test_unresolved_placeholder_left_in_place() {
        let template = json!({"url": "{{item.url}}"});
        let context = json!({"index": 0});
        let rendered = render_template(&template, &context).unwrap();
        assert_eq!(rendered, json!({"url": "{{item.url}}"}));
    }

    #[test]
    fn test_string_with_quote_stays_valid_json() {
        let template = json!({"note": "said {{item.quote}}"});
        let context = json!({"item": {"quote": "\"hi\""}});
        let rendered = render_template(&template, &context).unwrap();
        assert_eq!(rendered, json!({"note": "said \"hi\""}));
    }

    #[test]
    fn test_idempotent_when_fully_resolved() {
        let template = json!({"a": "{{item.a}}", "b": "x {{item.b}}"});
        let context = json!({"item": {"a": 1, "b": "y"}});
        let once = render_template(&template, &context).unwrap();
        let twice = render_template(&once, &context).unwrap();
        assert_eq!(once, twice);
    }
}
