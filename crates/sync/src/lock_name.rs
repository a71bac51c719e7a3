use crate::error::Result;
use jm_core::ids::{LockName, RunKind};
use serde_json::Value;

/// Field whose value is used bare, so `{"key": "ABC"}` locks as `sync-project-ABC`.
const BARE_FIELD: &str = "key";

/// Lock name protecting runs of `kind` over `scope`.
///
/// `sync-{kind}` plus one segment per scope field in key order: the `key` field as its
/// bare value, every other field as `{name}={value}`. Nulls and empty strings are
/// skipped. A scalar scope is shorthand for `{"key": scalar}`, and a number locks the
/// same as its decimal string.
///
/// `-`, `=`, `%`, whitespace and control characters are percent-escaped, so distinct
/// scopes never share a name.
pub fn derive_lock_name(kind: &RunKind, scope: &Value) -> Result<LockName> {
    let parts = scope_parts(scope);
    Ok(LockName::for_job(kind, parts.iter().map(String::as_str))?)
}

fn scope_parts(scope: &Value) -> Vec<String> {
    match scope {
        Value::Null => Vec::new(),
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            fields
                .into_iter()
                .filter_map(|(name, value)| {
                    let value = render_value(value)?;
                    Some(if name == BARE_FIELD {
                        value
                    } else {
                        format!("{}={value}", escape(name))
                    })
                })
                .collect()
        }
        other => render_value(other).into_iter().collect(),
    }
}

fn render_value(value: &Value) -> Option<String> {
    let raw = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!raw.is_empty()).then(|| escape(&raw))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '-' | '=' | '%') || ch.is_whitespace() || ch.is_control() {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kind(value: &str) -> RunKind {
        RunKind::try_new(value).unwrap()
    }

    fn name(kind_value: &str, scope: Value) -> String {
        derive_lock_name(&kind(kind_value), &scope)
            .unwrap()
            .as_str()
            .to_string()
    }

    #[test]
    fn project_scope_uses_key_value() {
        assert_eq!(name("project", json!({"key": "ABC"})), "sync-project-ABC");
    }

    #[test]
    fn empty_scope_is_kind_only() {
        assert_eq!(name("all", json!({})), "sync-all");
        assert_eq!(name("all", Value::Null), "sync-all");
    }

    #[test]
    fn fields_are_ordered_by_key_and_named() {
        let scope = json!({"sprint": 42, "board": "Team Board", "skip": null, "empty": ""});
        assert_eq!(
            name("metrics", scope),
            "sync-metrics-board=Team%20Board-sprint=42"
        );
    }

    #[test]
    fn scalar_scope_is_single_segment() {
        assert_eq!(name("project", json!("XYZ")), "sync-project-XYZ");
    }

    #[test]
    fn distinct_scopes_get_distinct_names() {
        let scopes = [
            json!({"key": "A-B"}),
            json!({"key": "A", "sub": "B"}),
            json!({"key": "ABC"}),
            json!({"board": "ABC"}),
            json!({"key": "A B"}),
            json!({"key": "A_B"}),
            json!({"key": "a=b"}),
            json!({"a": "b"}),
            json!({"key": "%2D"}),
        ];
        let names: Vec<String> = scopes.into_iter().map(|s| name("project", s)).collect();
        for (i, left) in names.iter().enumerate() {
            for right in &names[i + 1..] {
                assert_ne!(left, right);
            }
        }
        assert_eq!(names[0], "sync-project-A%2DB");
        assert_eq!(names[1], "sync-project-A-sub=B");
    }
}
