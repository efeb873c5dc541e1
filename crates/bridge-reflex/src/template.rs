//! `{{expr}}` template substitution for reflex arguments. This evaluator
//! only ever does dotted-path lookups against `event`, `state`, and
//! `trigger` — no slicing, no method calls, no string joins, no general
//! expression evaluation.
//!
//! A template that is *entirely* one `{{expr}}` keeps the looked-up value's
//! JSON type; a template with surrounding text stringifies the lookup and
//! substitutes it inline.

use serde_json::Value;

/// Roots a dotted-path expression can start from.
struct Context<'a> {
    event: &'a Value,
    state: &'a Value,
    trigger: &'a Value,
}

fn lookup(ctx: &Context<'_>, expr: &str) -> Option<Value> {
    let mut parts = expr.split('.');
    let root = parts.next()?;
    let mut current = match root {
        "event" => ctx.event,
        "state" => ctx.state,
        "trigger" => ctx.trigger,
        _ => return None,
    };
    for part in parts {
        current = current.get(part)?;
    }
    Some(current.clone())
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Finds the next `{{...}}` span, returning `(prefix, expr, rest)`.
fn next_expr(s: &str) -> Option<(&str, &str, &str)> {
    let start = s.find("{{")?;
    let after = &s[start + 2..];
    let end = after.find("}}")?;
    Some((&s[..start], after[..end].trim(), &after[end + 2..]))
}

/// Resolves every `{{expr}}` span in `template` against `event`/`state`/
/// `trigger`. A template that is exactly one `{{expr}}` (no surrounding
/// text) preserves the resolved value's JSON type; anything else is
/// rendered to a string. Unresolvable expressions are left verbatim
/// (including their braces).
#[must_use]
pub fn resolve(template: &str, event: &Value, state: &Value, trigger: &Value) -> Value {
    let ctx = Context { event, state, trigger };
    let trimmed = template.trim();
    if let Some(expr) = trimmed.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        if !expr.contains("{{") {
            let expr = expr.trim();
            return lookup(&ctx, expr).unwrap_or_else(|| Value::String(template.to_string()));
        }
    }

    let mut out = String::new();
    let mut rest = template;
    while let Some((prefix, expr, tail)) = next_expr(rest) {
        out.push_str(prefix);
        match lookup(&ctx, expr) {
            Some(v) => out.push_str(&stringify(&v)),
            None => {
                out.push_str("{{");
                out.push_str(expr);
                out.push_str("}}");
            }
        }
        rest = tail;
    }
    out.push_str(rest);
    Value::String(out)
}

/// Recursively resolves every string leaf of a JSON object: string values
/// are templated, nested objects are recursed into, everything else
/// passes through unchanged.
#[must_use]
pub fn resolve_arguments(args: &Value, event: &Value, state: &Value, trigger: &Value) -> Value {
    match args {
        Value::String(s) => resolve(s, event, state, trigger),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_arguments(v, event, state, trigger));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_match_preserves_type() {
        let trigger = json!({"cron": "0 9 * * *", "count": 3});
        let resolved = resolve("{{trigger.count}}", &json!({}), &json!({}), &trigger);
        assert_eq!(resolved, json!(3));
    }

    #[test]
    fn partial_match_stringifies() {
        let trigger = json!({"cron": "0 9 * * *"});
        let resolved = resolve("cron is {{trigger.cron}} today", &json!({}), &json!({}), &trigger);
        assert_eq!(resolved, json!("cron is 0 9 * * * today"));
    }

    #[test]
    fn unresolvable_expression_is_left_verbatim() {
        let resolved = resolve("{{event.missing}}", &json!({}), &json!({}), &json!({}));
        assert_eq!(resolved, json!("{{event.missing}}"));
    }

    #[test]
    fn nested_path_lookup() {
        let event = json!({"data": {"content": "hello"}});
        let resolved = resolve("{{event.data.content}}", &event, &json!({}), &json!({}));
        assert_eq!(resolved, json!("hello"));
    }

    #[test]
    fn resolve_arguments_recurses_into_objects() {
        let args = json!({"text": "{{event.name}}", "nested": {"v": "{{trigger.cron}}"}, "n": 5});
        let event = json!({"name": "wakeword"});
        let trigger = json!({"cron": "* * * * *"});
        let resolved = resolve_arguments(&args, &event, &json!({}), &trigger);
        assert_eq!(
            resolved,
            json!({"text": "wakeword", "nested": {"v": "* * * * *"}, "n": 5})
        );
    }

    #[test]
    fn no_template_markers_is_unchanged() {
        let resolved = resolve("plain string", &json!({}), &json!({}), &json!({}));
        assert_eq!(resolved, json!("plain string"));
    }
}
