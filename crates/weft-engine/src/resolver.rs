use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::context::RunContext;

/// Matches `${{token}}` (legacy template spelling) or `${token}`.
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\{([^{}]+)\}\}|\$\{([^{}]+)\}").unwrap())
}

/// Rewrite a parameter tree, substituting placeholders that point at
/// earlier steps' outputs.
///
/// A string that is exactly one placeholder takes the referenced value's
/// native type; a placeholder embedded in surrounding text is stringified
/// and spliced in. Unresolved placeholders pass through as literal text.
pub fn resolve_value(value: &Value, ctx: &RunContext) -> Value {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, ctx)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_value(v, ctx)).collect())
        }
        other => other.clone(),
    }
}

/// Convenience wrapper for a node's `params` map.
pub fn resolve_params(
    params: &serde_json::Map<String, Value>,
    ctx: &RunContext,
) -> serde_json::Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, ctx)))
        .collect()
}

fn resolve_string(s: &str, ctx: &RunContext) -> Value {
    if let Some(token) = whole_token(s) {
        return match resolve_token(token.trim(), ctx) {
            Some(value) => value,
            None => Value::String(s.to_string()),
        };
    }

    let replaced = placeholder_regex().replace_all(s, |caps: &regex::Captures| {
        let token = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|g| g.as_str().trim())
            .unwrap_or_default();
        match resolve_token(token, ctx) {
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        }
    });
    Value::String(replaced.into_owned())
}

/// The token text when the whole string is exactly one placeholder.
fn whole_token(s: &str) -> Option<&str> {
    let inner = s
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .or_else(|| s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')))?;
    (!inner.contains(['{', '}']) && !inner.is_empty()).then_some(inner)
}

fn resolve_token(token: &str, ctx: &RunContext) -> Option<Value> {
    // Direct node-id or step_<N> lookup.
    if let Some(value) = ctx.get(token) {
        return Some(value.clone());
    }

    let (base, path) = token.split_once('.')?;
    match ctx.get(base).and_then(|value| extract_path(value, path)) {
        Some(value) => Some(value),
        None if base.starts_with("step_") => scan_steps_for_path(ctx, base, path),
        None => None,
    }
}

/// Navigate `path` (dot-separated keys, numeric segments index sequences)
/// into `value`. A string base is first parsed as structured data.
fn extract_path(value: &Value, path: &str) -> Option<Value> {
    let parsed;
    let mut current = match value {
        Value::String(text) => {
            parsed = parse_structured(text)?;
            &parsed
        }
        other => other,
    };

    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Fallback for a dotted `step_<N>` reference whose own step lacks the
/// field: scan every other `step_*` entry for the same path. Substitutes
/// only when exactly one distinct value matches; conflicting candidates
/// are never guessed between.
fn scan_steps_for_path(ctx: &RunContext, base: &str, path: &str) -> Option<Value> {
    let mut found: Option<(&str, Value)> = None;
    for (key, value) in ctx.step_entries(base) {
        let Some(candidate) = extract_path(value, path) else {
            continue;
        };
        match &found {
            None => found = Some((key, candidate)),
            Some((_, existing)) if *existing == candidate => {}
            Some((first, _)) => {
                warn!(
                    reference = format!("{}.{}", base, path),
                    candidates = format!("{}, {}", first, key),
                    "Ambiguous fallback match, leaving placeholder unresolved"
                );
                return None;
            }
        }
    }
    found.map(|(_, value)| value)
}

/// Best-effort structured interpretation of model output: strip a fenced
/// code block wrapper, take the first outermost `{...}` or `[...]` span,
/// parse as strict JSON, then as quoted-literal data.
fn parse_structured(text: &str) -> Option<Value> {
    let body = strip_code_fence(text);
    let span = first_structure_span(body)?;
    serde_json::from_str(span)
        .ok()
        .or_else(|| parse_quoted_literals(span))
}

/// Body of the first triple-backtick fence (language tag dropped), or the
/// input unchanged when no fence is present.
fn strip_code_fence(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    }
}

/// The first outermost brace or bracket span, respecting string literals.
fn first_structure_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let open = text.as_bytes()[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(&text[start..=i]);
            }
        }
    }
    None
}

/// Permissive pass for single-quoted maps/lists with Python-style
/// constants, as emitted by some models.
fn parse_quoted_literals(span: &str) -> Option<Value> {
    let normalized = span
        .replace('\'', "\"")
        .replace("True", "true")
        .replace("False", "false")
        .replace("None", "null");
    serde_json::from_str(&normalized).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with(entries: &[(&str, usize, Value)]) -> RunContext {
        let mut ctx = RunContext::new();
        for (id, index, value) in entries {
            ctx.record(id, *index, value.clone());
        }
        ctx
    }

    #[test]
    fn test_whole_placeholder_preserves_native_type() {
        let ctx = ctx_with(&[("count", 0, json!(42))]);
        assert_eq!(resolve_value(&json!("${step_0}"), &ctx), json!(42));
        assert_eq!(resolve_value(&json!("${count}"), &ctx), json!(42));
    }

    #[test]
    fn test_doubled_brace_spelling_is_identical() {
        let ctx = ctx_with(&[("fetch", 0, json!({"items": [1, 2]}))]);
        assert_eq!(
            resolve_value(&json!("${{step_0}}"), &ctx),
            json!({"items": [1, 2]})
        );
    }

    #[test]
    fn test_embedded_placeholder_stringifies() {
        let ctx = ctx_with(&[("count", 0, json!(42))]);
        assert_eq!(
            resolve_value(&json!("found ${step_0} items"), &ctx),
            json!("found 42 items")
        );
    }

    #[test]
    fn test_embedded_string_value_splices_raw() {
        let ctx = ctx_with(&[("name", 0, json!("Ada"))]);
        assert_eq!(
            resolve_value(&json!("hello ${name}!"), &ctx),
            json!("hello Ada!")
        );
    }

    #[test]
    fn test_unresolved_placeholder_passes_through() {
        let ctx = RunContext::new();
        assert_eq!(
            resolve_value(&json!("${step_9.missing}"), &ctx),
            json!("${step_9.missing}")
        );
    }

    #[test]
    fn test_dotted_path_into_object() {
        let ctx = ctx_with(&[("user", 0, json!({"profile": {"email": "a@b.com"}}))]);
        assert_eq!(
            resolve_value(&json!("${user.profile.email}"), &ctx),
            json!("a@b.com")
        );
    }

    #[test]
    fn test_numeric_segment_indexes_arrays() {
        let ctx = ctx_with(&[("list", 0, json!({"items": ["x", "y"]}))]);
        assert_eq!(resolve_value(&json!("${step_0.items.1}"), &ctx), json!("y"));
    }

    #[test]
    fn test_fenced_json_string_base_extraction() {
        let output = "```json\n{\"email\": \"a@b.com\"}\n```";
        let ctx = ctx_with(&[("gen", 1, json!(output))]);
        assert_eq!(
            resolve_value(&json!("${step_1.email}"), &ctx),
            json!("a@b.com")
        );
    }

    #[test]
    fn test_prose_around_json_span() {
        let output = "Here is the result: {\"status\": \"ok\"} as requested.";
        let ctx = ctx_with(&[("gen", 0, json!(output))]);
        assert_eq!(resolve_value(&json!("${step_0.status}"), &ctx), json!("ok"));
    }

    #[test]
    fn test_single_quoted_literal_parse() {
        let ctx = ctx_with(&[("gen", 0, json!("{'done': True, 'note': None}"))]);
        assert_eq!(resolve_value(&json!("${step_0.done}"), &ctx), json!(true));
    }

    #[test]
    fn test_fallback_scan_unique_match() {
        let ctx = ctx_with(&[
            ("a", 0, json!({"name": "Ada"})),
            ("b", 1, json!({"other": 1})),
        ]);
        // step_1 lacks "name"; step_0 is the only candidate.
        assert_eq!(resolve_value(&json!("${step_1.name}"), &ctx), json!("Ada"));
    }

    #[test]
    fn test_fallback_scan_ambiguity_is_not_guessed() {
        let ctx = ctx_with(&[
            ("a", 0, json!({"name": "Ada"})),
            ("b", 1, json!({"name": "Grace"})),
            ("c", 2, json!({"other": 1})),
        ]);
        assert_eq!(
            resolve_value(&json!("${step_2.name}"), &ctx),
            json!("${step_2.name}")
        );
    }

    #[test]
    fn test_fallback_only_for_step_aliases() {
        let ctx = ctx_with(&[
            ("a", 0, json!({"name": "Ada"})),
            ("b", 1, json!({"other": 1})),
        ]);
        // A node-id base that lacks the field never borrows from siblings.
        assert_eq!(
            resolve_value(&json!("${b.name}"), &ctx),
            json!("${b.name}")
        );
    }

    #[test]
    fn test_recurses_through_maps_and_lists() {
        let ctx = ctx_with(&[("n", 0, json!(7))]);
        let tree = json!({"outer": [{"inner": "${step_0}"}, "plain"]});
        assert_eq!(
            resolve_value(&tree, &ctx),
            json!({"outer": [{"inner": 7}, "plain"]})
        );
    }

    #[test]
    fn test_first_structure_span_respects_strings() {
        let span = first_structure_span(r#"note {"a": "}"} tail"#).unwrap();
        assert_eq!(span, r#"{"a": "}"}"#);
    }

    #[test]
    fn test_unparseable_string_base_leaves_placeholder() {
        let ctx = ctx_with(&[("gen", 0, json!("no structure here"))]);
        assert_eq!(
            resolve_value(&json!("${gen.field}"), &ctx),
            json!("${gen.field}")
        );
    }
}
