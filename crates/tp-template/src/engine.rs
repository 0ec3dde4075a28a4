//! Pure tree-rewrite `{{...}}` substitution engine.
//!
//! Three variable namespaces are recognized, checked in this order against
//! a *full string* match (spec §4.7 decision (a) — full-string-only, so
//! substituting a non-string config value preserves its JSON type):
//!
//! 1. `{{$^request-params.a.b.c}}` — application config, under the
//!    required `request-params.` prefix.
//! 2. `{{'someKey'}}` — topic metadata.
//! 3. `{{fieldName}}` — exactly one of `topic`, `role`, `clientPrincipal`.
//!
//! Any other leaf type passes through unchanged. All unresolved references
//! within one template are accumulated and reported together, never just
//! the first (spec §8 property 8).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tp_core::config::Config;
use tp_core::types::TopicDirective;

static CONFIG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{\$\^([^}]*)\}\}$").expect("valid regex"));
static METADATA_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{'([^']*)'\}\}$").expect("valid regex"));
static FIELD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{([A-Za-z][A-Za-z0-9_]*)\}\}$").expect("valid regex"));

/// Characters permitted after the mandatory `request-params.` prefix
/// (spec §4.7 security invariants).
static SAFE_PATH_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid regex"));

const REQUIRED_PREFIX: &str = "request-params.";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// One or more `{{...}}` references could not be resolved. Carries
    /// every unresolved reference found in the template, not just the
    /// first (spec §8 property 8).
    #[error("unresolved template references: {0:?}")]
    Unresolved(Vec<String>),

    /// A config-path reference failed the security invariants (spec
    /// §4.7). Fails closed: the configuration store is never consulted
    /// for a path that fails validation (spec §8 property 7).
    #[error("template security violation: {0:?}")]
    Security(Vec<String>),
}

/// Rewrite `template` by substituting every recognized `{{...}}` string
/// leaf. Non-string leaves (numbers, bools, null) pass through unchanged;
/// object keys are never rewritten. An empty template (`{}` or `null`)
/// produces an empty object without error.
pub fn substitute(
    template: &Value,
    directive: &TopicDirective,
    config: &Config,
) -> Result<Value, TemplateError> {
    let mut unresolved = Vec::new();
    let mut security_violations = Vec::new();

    let result = walk(
        template,
        directive,
        config,
        &mut unresolved,
        &mut security_violations,
    );

    // Security violations take priority: a path that fails validation
    // must never be treated as merely "unresolved" — it fails closed.
    if !security_violations.is_empty() {
        return Err(TemplateError::Security(security_violations));
    }
    if !unresolved.is_empty() {
        return Err(TemplateError::Unresolved(unresolved));
    }
    Ok(result)
}

fn walk(
    node: &Value,
    directive: &TopicDirective,
    config: &Config,
    unresolved: &mut Vec<String>,
    security_violations: &mut Vec<String>,
) -> Value {
    match node {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(
                    k.clone(),
                    walk(v, directive, config, unresolved, security_violations),
                );
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| walk(v, directive, config, unresolved, security_violations))
                .collect(),
        ),
        Value::String(s) => resolve_string(s, directive, config, unresolved, security_violations),
        other => other.clone(),
    }
}

fn resolve_string(
    s: &str,
    directive: &TopicDirective,
    config: &Config,
    unresolved: &mut Vec<String>,
    security_violations: &mut Vec<String>,
) -> Value {
    if let Some(caps) = CONFIG_PATTERN.captures(s) {
        let raw_path = &caps[1];
        return resolve_config_path(s, raw_path, config, unresolved, security_violations);
    }

    if let Some(caps) = METADATA_PATTERN.captures(s) {
        let key = &caps[1];
        return match directive.metadata.get(key) {
            Some(v) => Value::String(v.clone()),
            None => {
                unresolved.push(s.to_string());
                Value::String(s.to_string())
            }
        };
    }

    if let Some(caps) = FIELD_PATTERN.captures(s) {
        let field = &caps[1];
        return match resolve_field(field, directive) {
            Some(v) => Value::String(v),
            None => {
                unresolved.push(s.to_string());
                Value::String(s.to_string())
            }
        };
    }

    Value::String(s.to_string())
}

fn resolve_config_path(
    original: &str,
    raw_path: &str,
    config: &Config,
    unresolved: &mut Vec<String>,
    security_violations: &mut Vec<String>,
) -> Value {
    if !raw_path.starts_with(REQUIRED_PREFIX) {
        security_violations.push(original.to_string());
        return Value::String(original.to_string());
    }
    let remainder = &raw_path[REQUIRED_PREFIX.len()..];
    if remainder.is_empty() || !SAFE_PATH_SUFFIX.is_match(remainder) {
        security_violations.push(original.to_string());
        return Value::String(original.to_string());
    }

    // Only a validated path ever reaches the configuration store.
    match config.lookup_request_param(remainder) {
        Some(value) => Value::String(value),
        None => {
            unresolved.push(original.to_string());
            Value::String(original.to_string())
        }
    }
}

fn resolve_field(field: &str, directive: &TopicDirective) -> Option<String> {
    match field {
        "topic" => Some(directive.topic.clone()),
        "role" => Some(match directive.role {
            tp_core::types::TopicRole::Producer => "PRODUCER".to_string(),
            tp_core::types::TopicRole::Consumer => "CONSUMER".to_string(),
        }),
        "clientPrincipal" => Some(directive.client_principal.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tp_core::types::TopicRole;

    fn directive() -> TopicDirective {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("region".to_string(), "us-east-1".to_string());
        TopicDirective {
            topic: "orders".to_string(),
            role: TopicRole::Producer,
            client_principal: "alpha".to_string(),
            event_filters: vec![],
            metadata,
        }
    }

    fn config_with_param(path: &str, value: &str) -> Config {
        let mut cfg = Config::default();
        // Build nested toml table `x.y = "P1"` style for arbitrary dotted paths.
        let mut segments: Vec<&str> = path.split('.').collect();
        let leaf = segments.pop().unwrap();
        let mut current = toml::value::Table::new();
        current.insert(leaf.to_string(), toml::Value::String(value.to_string()));
        while let Some(seg) = segments.pop() {
            let mut parent = toml::value::Table::new();
            parent.insert(seg.to_string(), toml::Value::Table(current));
            current = parent;
        }
        cfg.request_params = current;
        cfg
    }

    /// spec §8 S5: all three namespaces resolved in one template.
    #[test]
    fn s5_all_three_namespaces() {
        let directive = directive();
        let config = config_with_param("x.y", "P1");
        let template: Value = serde_json::json!({
            "a": "{{topic}}",
            "b": "{{'region'}}",
            "c": "{{$^request-params.x.y}}",
        });

        let result = substitute(&template, &directive, &config).unwrap();
        assert_eq!(
            result,
            serde_json::json!({"a": "orders", "b": "us-east-1", "c": "P1"})
        );
    }

    /// spec §8 S6: disallowed config path fails closed with zero reads.
    #[test]
    fn s6_template_security_violation() {
        let directive = directive();
        let config = config_with_param("x.y", "P1");
        let template: Value = serde_json::json!({"a": "{{$^secrets.db.password}}"});

        let err = substitute(&template, &directive, &config).unwrap_err();
        match err {
            TemplateError::Security(paths) => {
                assert_eq!(paths, vec!["{{$^secrets.db.password}}".to_string()]);
            }
            other => panic!("expected Security error, got {other:?}"),
        }
    }

    #[test]
    fn security_error_rejects_traversal_characters() {
        let directive = directive();
        let config = config_with_param("x.y", "P1");
        let template: Value = serde_json::json!({"a": "{{$^request-params.x/y}}"});
        let err = substitute(&template, &directive, &config).unwrap_err();
        assert!(matches!(err, TemplateError::Security(_)));
    }

    #[test]
    fn security_error_requires_segment_beyond_prefix() {
        let directive = directive();
        let config = Config::default();
        let template: Value = serde_json::json!({"a": "{{$^request-params.}}"});
        let err = substitute(&template, &directive, &config).unwrap_err();
        assert!(matches!(err, TemplateError::Security(_)));
    }

    /// spec §8 property 8: k >= 2 unresolved references are all named.
    #[test]
    fn error_accumulation_names_all_unresolved() {
        let directive = directive();
        let config = Config::default();
        let template: Value = serde_json::json!({
            "a": "{{'missing1'}}",
            "b": "{{'missing2'}}",
        });

        let err = substitute(&template, &directive, &config).unwrap_err();
        match err {
            TemplateError::Unresolved(refs) => assert_eq!(refs.len(), 2),
            other => panic!("expected Unresolved, got {other:?}"),
        }
    }

    /// spec §8 property 6: substitute is idempotent on fully-resolved output.
    #[test]
    fn idempotent_on_fully_resolved_output() {
        let directive = directive();
        let config = config_with_param("x.y", "P1");
        let template: Value = serde_json::json!({"a": "{{topic}}", "c": "{{$^request-params.x.y}}"});

        let once = substitute(&template, &directive, &config).unwrap();
        let twice = substitute(&once, &directive, &config).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_template_produces_empty_object_without_error() {
        let directive = directive();
        let config = Config::default();
        let template: Value = serde_json::json!({});
        let result = substitute(&template, &directive, &config).unwrap();
        assert_eq!(result, serde_json::json!({}));
    }

    #[test]
    fn non_template_strings_pass_through_literally() {
        let directive = directive();
        let config = Config::default();
        let template: Value = serde_json::json!({"a": "plain text, no braces here"});
        let result = substitute(&template, &directive, &config).unwrap();
        assert_eq!(result, template);
    }

    #[test]
    fn non_string_leaves_pass_through_unchanged() {
        let directive = directive();
        let config = Config::default();
        let template: Value = serde_json::json!({"count": 3, "enabled": true, "nil": null});
        let result = substitute(&template, &directive, &config).unwrap();
        assert_eq!(result, template);
    }
}
