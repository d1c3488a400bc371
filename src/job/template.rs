/// Template resolution language for wiring steps together
///
/// Templates are `{{ dotted.path }}` references evaluated against a job
/// context. A field whose entire value is one template adopts the referenced
/// value with its native type; templates embedded inside a larger string are
/// stringified in place. Resolution is purely functional: no side effects,
/// deterministic, left-to-right, no re-evaluation of substituted text.

use crate::job::types::JobContext;
use serde_json::{Map, Value};

/// Walk a dotted path through the context mapping
///
/// Each segment looks up a field of the current mapping. Indexing sequences
/// by numeric segment is not supported: the walk stops with `None` as soon
/// as the current value is not a mapping.
pub fn lookup_path<'a>(ctx: &'a JobContext, path: &str) -> Option<&'a Value> {
    let mut current: Option<&Value> = None;
    for segment in path.split('.') {
        let map = match current {
            None => ctx.as_map(),
            Some(Value::Object(map)) => map,
            Some(_) => return None,
        };
        current = Some(map.get(segment)?);
    }
    current
}

/// If the whole string is a single `{{…}}` reference, return the inner path
fn whole_template(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Stringify a resolved value for in-string substitution
///
/// Strings substitute verbatim, null becomes the empty string, everything
/// else renders as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitute every `{{path}}` occurrence inside a larger string
///
/// A reference that does not resolve stays in the output as its literal
/// `{{path}}` text.
pub fn interpolate(template: &str, ctx: &JobContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let path = after_open[..close].trim();
                match lookup_path(ctx, path) {
                    Some(value) => out.push_str(&stringify(value)),
                    None => {
                        out.push_str("{{");
                        out.push_str(&after_open[..close]);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated braces pass through untouched
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolve one value from a step input or effect record
///
/// Returns `None` when the value is a whole-string template whose path does
/// not resolve — the caller drops the field, which is how an undefined
/// reference passes through without inventing a value.
pub fn resolve_value(value: &Value, ctx: &JobContext) -> Option<Value> {
    match value {
        Value::String(s) => match whole_template(s) {
            Some(path) => lookup_path(ctx, path).cloned(),
            None => Some(Value::String(interpolate(s, ctx))),
        },
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                // Array positions are preserved: an unresolved whole-string
                // element becomes null instead of shifting its neighbors
                .map(|item| resolve_value(item, ctx).unwrap_or(Value::Null))
                .collect(),
        )),
        Value::Object(map) => Some(Value::Object(resolve_map(map, ctx))),
        other => Some(other.clone()),
    }
}

/// Resolve every field of a step input mapping
///
/// Fields whose whole-string template does not resolve are omitted from the
/// resolved payload.
pub fn resolve_map(input: &Map<String, Value>, ctx: &JobContext) -> Map<String, Value> {
    let mut resolved = Map::new();
    for (key, value) in input {
        if let Some(v) = resolve_value(value, ctx) {
            resolved.insert(key.clone(), v);
        }
    }
    resolved
}

/// Interpolate an entire sub-object by round-tripping through its serialized
/// form
///
/// Used for the `enqueue` effect's child-job template: the object is
/// serialized, substituted as one string, then parsed back. The template
/// must stay shape-compatible with its schema before and after.
pub fn deep_interpolate(value: &Value, ctx: &JobContext) -> Result<Value, serde_json::Error> {
    let serialized = serde_json::to_string(value)?;
    let substituted = interpolate(&serialized, ctx);
    serde_json::from_str(&substituted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> JobContext {
        let mut ctx = JobContext::new(json!({
            "name": "whisper",
            "count": 3,
            "nothing": null,
            "nested": {"url": "s3://b/a.wav"},
            "items": [1, 2, 3]
        }));
        ctx.add_step_result("fetch", 0, json!({"path": "/tmp/a.wav", "size": 1024}));
        ctx
    }

    #[test]
    fn whole_template_preserves_native_type() {
        let c = ctx();
        let v = resolve_value(&json!("{{payload.items}}"), &c).unwrap();
        assert_eq!(v, json!([1, 2, 3]));

        let v = resolve_value(&json!("{{ payload.count }}"), &c).unwrap();
        assert_eq!(v, json!(3));
    }

    #[test]
    fn interpolation_stringifies() {
        let c = ctx();
        let v = resolve_value(&json!("model={{payload.name}} n={{payload.count}}"), &c).unwrap();
        assert_eq!(v, json!("model=whisper n=3"));
    }

    #[test]
    fn unresolved_interpolation_keeps_literal() {
        let c = ctx();
        assert_eq!(interpolate("x={{payload.missing}}", &c), "x={{payload.missing}}");
    }

    #[test]
    fn null_interpolates_to_empty_string() {
        let c = ctx();
        assert_eq!(interpolate("v={{payload.nothing}}", &c), "v=");
    }

    #[test]
    fn unresolved_whole_template_drops_field() {
        let c = ctx();
        let input: Map<String, Value> = serde_json::from_value(json!({
            "keep": "{{payload.name}}",
            "drop": "{{payload.missing}}"
        }))
        .unwrap();
        let resolved = resolve_map(&input, &c);
        assert_eq!(resolved.get("keep"), Some(&json!("whisper")));
        assert!(!resolved.contains_key("drop"));
    }

    #[test]
    fn sequences_are_leaves_only() {
        let c = ctx();
        // Numeric indexing into a sequence is unsupported
        assert!(lookup_path(&c, "payload.items.0").is_none());
        // But a path through mappings works at any depth
        assert_eq!(
            lookup_path(&c, "steps.fetch.path"),
            Some(&json!("/tmp/a.wav"))
        );
    }

    #[test]
    fn resolution_is_pure() {
        let c = ctx();
        let first = resolve_value(&json!("{{steps.fetch.size}}"), &c);
        let second = resolve_value(&json!("{{steps.fetch.size}}"), &c);
        assert_eq!(first, second);
        assert_eq!(first.unwrap(), json!(1024));
    }

    #[test]
    fn no_reevaluation_of_substituted_text() {
        let mut c = JobContext::new(json!({"a": "{{payload.b}}", "b": "secret"}));
        c.add_step_result("s", 0, json!({}));
        // The substituted value contains template syntax but is not resolved
        // a second time
        assert_eq!(interpolate("{{payload.a}}", &c), "{{payload.b}}");
    }

    #[test]
    fn deep_interpolate_round_trips() {
        let c = ctx();
        let template = json!({
            "type": "image.detect",
            "payload": {"src": "{{steps.fetch.path}}", "note": "from {{payload.name}}"}
        });
        let out = deep_interpolate(&template, &c).unwrap();
        assert_eq!(out["payload"]["src"], json!("/tmp/a.wav"));
        assert_eq!(out["payload"]["note"], json!("from whisper"));
    }

    #[test]
    fn nested_objects_resolve_recursively() {
        let c = ctx();
        let v = resolve_value(
            &json!({"outer": {"inner": "{{payload.nested.url}}"}}),
            &c,
        )
        .unwrap();
        assert_eq!(v["outer"]["inner"], json!("s3://b/a.wav"));
    }
}
