//! `{{path}}` placeholder substitution for node configuration strings.
//!
//! Paths are dot-separated. Unresolved placeholders are left untouched.

use serde_json::Value;

/// Walk `root` along dot-separated segments (object keys or array indices)
pub fn resolve_path<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a value as text for splicing into a string
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace every `{{path}}` whose path `lookup` resolves
pub fn render(template: &str, lookup: &dyn Fn(&str) -> Option<Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len;
        let path = rest[start + 2..end].trim();

        out.push_str(&rest[..start]);
        match lookup(path) {
            Some(value) => out.push_str(&to_text(&value)),
            None => out.push_str(&rest[start..end + 2]),
        }
        rest = &rest[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Render every string inside a JSON value. A string that is exactly one
/// placeholder is replaced by the resolved value itself, keeping its type.
pub fn render_value(value: &Value, lookup: &dyn Fn(&str) -> Option<Value>) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(inner) = trimmed
                .strip_prefix("{{")
                .and_then(|t| t.strip_suffix("}}"))
                .filter(|inner| !inner.contains("{{") && !inner.contains("}}"))
            {
                if let Some(resolved) = lookup(inner.trim()) {
                    return resolved;
                }
            }
            Value::String(render(s, lookup))
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_value(v, lookup)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, lookup)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Value {
        json!({
            "input": { "query": "what is rust?" },
            "fetch": { "body": { "items": [ { "id": 7 } ] }, "ok": true }
        })
    }

    fn lookup(path: &str) -> Option<Value> {
        let root = scope();
        let segments: Vec<&str> = path.split('.').collect();
        resolve_path(&root, &segments).cloned()
    }

    #[test]
    fn test_render_substitutes_paths() {
        let text = render("Q: {{input.query}} id={{ fetch.body.items.0.id }}", &lookup);
        assert_eq!(text, "Q: what is rust? id=7");
    }

    #[test]
    fn test_unresolved_placeholder_is_kept() {
        assert_eq!(render("hi {{nobody.name}}!", &lookup), "hi {{nobody.name}}!");
        assert_eq!(render("open {{ never closed", &lookup), "open {{ never closed");
    }

    #[test]
    fn test_render_value_keeps_types_for_whole_placeholders() {
        let payload = json!({
            "ok": "{{fetch.ok}}",
            "items": "{{fetch.body.items}}",
            "note": "query was {{input.query}}",
            "n": 3
        });

        let rendered = render_value(&payload, &lookup);
        assert_eq!(rendered["ok"], json!(true));
        assert_eq!(rendered["items"], json!([{ "id": 7 }]));
        assert_eq!(rendered["note"], json!("query was what is rust?"));
        assert_eq!(rendered["n"], json!(3));
    }

    #[test]
    fn test_objects_render_as_json_text() {
        assert_eq!(
            render("{{fetch.body}}", &lookup),
            r#"{"items":[{"id":7}]}"#
        );
    }
}
