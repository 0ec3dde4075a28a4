//! Credential mapping — the response side of a Rosetta mapping file (spec
//! §4.8, §6.5).

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One of the transformations a mapping entry's pipeline may apply, in
/// order. `base64Decode` is the only one spec.md defines; the pipeline is
/// ordered so additional transformations (trim, URL-decode, Unicode
/// normalization) can be appended without reordering existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transformation {
    Base64Decode,
    Trim,
}

impl Transformation {
    fn apply(self, input: String) -> Result<String, MappingError> {
        match self {
            Transformation::Base64Decode => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(input.as_bytes())
                    .map_err(|e| MappingError::TransformationFailed(e.to_string()))?;
                String::from_utf8(decoded)
                    .map_err(|e| MappingError::TransformationFailed(e.to_string()))
            }
            Transformation::Trim => Ok(input.trim().to_string()),
        }
    }
}

/// One entry in a Rosetta `mappings` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSpec {
    pub target_field: String,
    pub source_path: String,
    #[serde(default)]
    pub transformations: Vec<Transformation>,
    #[serde(default)]
    pub default_value: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("transformation failed: {0}")]
    TransformationFailed(String),
    /// Missing mappings aggregate into a single error listing every
    /// deficient field (spec §4.8 validation).
    #[error("response missing required fields: {0:?}")]
    MissingRequired(Vec<String>),
}

/// Apply `mappings` against a vault response body, then check that
/// `required` is a subset of the resulting keys.
pub fn apply_mappings(
    response: &Value,
    mappings: &[MappingSpec],
    required: &[String],
) -> Result<HashMap<String, String>, MappingError> {
    let mut out = HashMap::with_capacity(mappings.len());

    for m in mappings {
        let mut value = extract_path(response, &m.source_path)
            .or_else(|| m.default_value.clone());

        if let Some(v) = value.take() {
            let mut transformed = v;
            for t in &m.transformations {
                transformed = t.apply(transformed)?;
            }
            out.insert(m.target_field.clone(), transformed);
        }
    }

    let missing: Vec<String> = required
        .iter()
        .filter(|f| !out.contains_key(f.as_str()))
        .cloned()
        .collect();

    if !missing.is_empty() {
        return Err(MappingError::MissingRequired(missing));
    }

    Ok(out)
}

/// A minimal dotted-path JSON extractor (`a.b.c`), string leaves only —
/// matching what vault responses carry for credential fields.
fn extract_path(value: &Value, path: &str) -> Option<String> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_decodes_base64() {
        let response = serde_json::json!({
            "data": { "client_secret": base64::engine::general_purpose::STANDARD.encode("s3cr3t") }
        });
        let mappings = vec![MappingSpec {
            target_field: "clientSecret".to_string(),
            source_path: "data.client_secret".to_string(),
            transformations: vec![Transformation::Base64Decode],
            default_value: None,
        }];
        let out = apply_mappings(&response, &mappings, &["clientSecret".to_string()]).unwrap();
        assert_eq!(out["clientSecret"], "s3cr3t");
    }

    #[test]
    fn default_value_used_when_source_missing() {
        let response = serde_json::json!({});
        let mappings = vec![MappingSpec {
            target_field: "scope".to_string(),
            source_path: "data.scope".to_string(),
            transformations: vec![],
            default_value: Some("default-scope".to_string()),
        }];
        let out = apply_mappings(&response, &mappings, &[]).unwrap();
        assert_eq!(out["scope"], "default-scope");
    }

    #[test]
    fn missing_required_fields_aggregate_into_one_error() {
        let response = serde_json::json!({});
        let mappings = vec![
            MappingSpec {
                target_field: "clientId".to_string(),
                source_path: "data.id".to_string(),
                transformations: vec![],
                default_value: None,
            },
            MappingSpec {
                target_field: "clientSecret".to_string(),
                source_path: "data.secret".to_string(),
                transformations: vec![],
                default_value: None,
            },
        ];
        let required = vec!["clientId".to_string(), "clientSecret".to_string()];
        let err = apply_mappings(&response, &mappings, &required).unwrap_err();
        match err {
            MappingError::MissingRequired(fields) => assert_eq!(fields.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
