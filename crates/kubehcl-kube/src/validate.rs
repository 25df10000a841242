//! Manifest validation before anything touches the cluster

use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;

use crate::error::{KubeError, Result};

/// Checks one JSON manifest, returning every violation found
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, manifest: &[u8]) -> Vec<String>;
}

/// Schema set compiled into the binary
///
/// Every object needs `apiVersion`, `kind` and `metadata.name`, with string
/// labels and annotations. Core workload kinds also get a `spec` schema.
pub struct BuiltinSchemaValidator {
    base: jsonschema::Validator,
    kinds: HashMap<&'static str, jsonschema::Validator>,
}

impl BuiltinSchemaValidator {
    pub fn new() -> Result<Self> {
        let base = compile(&base_schema())?;
        let mut kinds = HashMap::new();
        for (kind, schema) in kind_schemas() {
            kinds.insert(kind, compile(&schema)?);
        }
        Ok(Self { base, kinds })
    }
}

impl SchemaValidator for BuiltinSchemaValidator {
    fn validate(&self, manifest: &[u8]) -> Vec<String> {
        let instance: JsonValue = match serde_json::from_slice(manifest) {
            Ok(v) => v,
            Err(e) => return vec![format!("(root): not valid JSON: {e}")],
        };
        let mut errors = collect(&self.base, &instance);
        let kind = instance.get("kind").and_then(JsonValue::as_str);
        if let Some(validator) = kind.and_then(|k| self.kinds.get(k)) {
            errors.extend(collect(validator, &instance));
        }
        errors
    }
}

fn compile(schema: &JsonValue) -> Result<jsonschema::Validator> {
    jsonschema::validator_for(schema)
        .map_err(|e| KubeError::InvalidManifest(format!("invalid schema: {e}")))
}

fn collect(validator: &jsonschema::Validator, instance: &JsonValue) -> Vec<String> {
    if validator.is_valid(instance) {
        return Vec::new();
    }
    validator
        .iter_errors(instance)
        .map(|e| {
            let path = e.instance_path.to_string();
            let path = if path.is_empty() { "(root)".to_string() } else { path };
            format!("{}: {}", path, e.to_string().replace('"', "'"))
        })
        .collect()
}

fn base_schema() -> JsonValue {
    let string_map = json!({
        "type": "object",
        "additionalProperties": { "type": "string" }
    });
    json!({
        "type": "object",
        "required": ["apiVersion", "kind", "metadata"],
        "properties": {
            "apiVersion": { "type": "string", "minLength": 1 },
            "kind": { "type": "string", "minLength": 1 },
            "metadata": {
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": { "type": "string", "minLength": 1, "maxLength": 253 },
                    "namespace": { "type": "string", "minLength": 1 },
                    "labels": string_map,
                    "annotations": string_map
                }
            }
        }
    })
}

fn kind_schemas() -> Vec<(&'static str, JsonValue)> {
    let pod_template = json!({
        "type": "object",
        "properties": {
            "spec": {
                "type": "object",
                "required": ["containers"],
                "properties": { "containers": containers() }
            }
        }
    });
    let workload = json!({
        "type": "object",
        "required": ["spec"],
        "properties": {
            "spec": {
                "type": "object",
                "required": ["selector", "template"],
                "properties": {
                    "replicas": { "type": "integer", "minimum": 0 },
                    "selector": { "type": "object" },
                    "template": pod_template
                }
            }
        }
    });
    vec![
        ("Deployment", workload.clone()),
        ("StatefulSet", workload.clone()),
        ("DaemonSet", workload),
        (
            "Job",
            json!({
                "type": "object",
                "required": ["spec"],
                "properties": {
                    "spec": {
                        "type": "object",
                        "required": ["template"],
                        "properties": { "template": pod_template }
                    }
                }
            }),
        ),
        (
            "Pod",
            json!({
                "type": "object",
                "required": ["spec"],
                "properties": {
                    "spec": {
                        "type": "object",
                        "required": ["containers"],
                        "properties": { "containers": containers() }
                    }
                }
            }),
        ),
        (
            "Service",
            json!({
                "type": "object",
                "properties": {
                    "spec": {
                        "type": "object",
                        "properties": {
                            "type": {
                                "enum": ["ClusterIP", "NodePort", "LoadBalancer", "ExternalName"]
                            },
                            "ports": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "required": ["port"],
                                    "properties": {
                                        "port": { "type": "integer", "minimum": 1, "maximum": 65535 }
                                    }
                                }
                            }
                        }
                    }
                }
            }),
        ),
        (
            "ConfigMap",
            json!({
                "type": "object",
                "properties": {
                    "data": { "type": "object", "additionalProperties": { "type": "string" } }
                }
            }),
        ),
        (
            "Secret",
            json!({
                "type": "object",
                "properties": {
                    "data": { "type": "object", "additionalProperties": { "type": "string" } },
                    "stringData": { "type": "object", "additionalProperties": { "type": "string" } }
                }
            }),
        ),
    ]
}

fn containers() -> JsonValue {
    json!({
        "type": "array",
        "minItems": 1,
        "items": {
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": { "type": "string", "minLength": 1 },
                "image": { "type": "string" }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(value: JsonValue) -> Vec<String> {
        BuiltinSchemaValidator::new()
            .unwrap()
            .validate(&serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn test_minimal_object_is_valid() {
        let errors = validate(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": "demo" }
        }));
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_missing_name_and_bad_label() {
        let errors = validate(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "labels": { "tier": 3 } }
        }));
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("name")));
        assert!(errors.iter().any(|e| e.starts_with("/metadata/labels/tier")));
    }

    #[test]
    fn test_deployment_requires_template() {
        let errors = validate(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web" },
            "spec": { "replicas": 2, "selector": {} }
        }));
        assert!(errors.iter().any(|e| e.contains("template")), "{errors:?}");
    }

    #[test]
    fn test_service_port_range() {
        let errors = validate(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "web" },
            "spec": { "ports": [{ "port": 70000 }] }
        }));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("/spec/ports/0/port"));
    }
}
