//! Contract drift: structural comparison of a response body against the
//! schema its operation declares for the observed status.
//!
//! Findings are data, not errors. They come out in walk order: declared
//! properties first (missing / nested), then undeclared keys (extra).

use crate::jsonpath;
use crate::openapi::{Endpoint, Operation, Schema};
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    Missing,
    Extra,
    TypeMismatch,
    EnumViolation,
}

impl DriftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Extra => "extra",
            Self::TypeMismatch => "type_mismatch",
            Self::EnumViolation => "enum_violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftFinding {
    pub kind: DriftKind,
    /// `$`-rooted location, e.g. `$.items[0].name`.
    pub path: String,
    /// Declared schema type, empty when not applicable.
    pub expected: String,
    /// Observed value or JSON type.
    pub actual: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DriftResult {
    pub path: String,
    pub method: String,
    pub findings: Vec<DriftFinding>,
    pub ok: bool,
}

impl DriftResult {
    fn from_findings(findings: Vec<DriftFinding>) -> Self {
        Self {
            ok: findings.is_empty(),
            findings,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DriftOptions {
    /// Nesting limit of the walk; deeper subtrees are not inspected.
    pub max_depth: usize,
}

impl Default for DriftOptions {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

/// Drift of `body` against the schema `op` declares for `status`.
pub fn run_drift(body: &[u8], op: &Operation, status: u16) -> DriftResult {
    run_drift_with(body, op, status, DriftOptions::default())
}

pub fn run_drift_with(body: &[u8], op: &Operation, status: u16, opts: DriftOptions) -> DriftResult {
    let Some(schema) = op.response_schema(status) else {
        debug!("no response schema for status {status}, drift trivially ok");
        return DriftResult::from_findings(Vec::new());
    };

    let value = match serde_json::from_slice::<Value>(body) {
        Ok(v @ (Value::Object(_) | Value::Array(_))) => v,
        _ => {
            return DriftResult::from_findings(vec![DriftFinding {
                kind: DriftKind::TypeMismatch,
                path: "$".to_string(),
                expected: schema.type_name().to_string(),
                actual: "invalid JSON".to_string(),
                allowed: Vec::new(),
            }]);
        }
    };

    DriftResult::from_findings(compare_with(schema, &value, opts))
}

/// [`run_drift`] labelled with the endpoint's path and method.
pub fn check_endpoint(endpoint: &Endpoint, body: &[u8], status: u16) -> DriftResult {
    DriftResult {
        path: endpoint.path.clone(),
        method: endpoint.method.clone(),
        ..run_drift(body, &endpoint.operation, status)
    }
}

/// Walk `value` against `schema` from the root `$`.
pub fn compare(schema: &Schema, value: &Value) -> Vec<DriftFinding> {
    compare_with(schema, value, DriftOptions::default())
}

pub fn compare_with(schema: &Schema, value: &Value, opts: DriftOptions) -> Vec<DriftFinding> {
    let mut walker = Walker {
        opts,
        findings: Vec::new(),
    };
    walker.walk(schema, "$", value, 0);
    walker.findings
}

pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct Walker {
    opts: DriftOptions,
    findings: Vec<DriftFinding>,
}

impl Walker {
    fn push(&mut self, kind: DriftKind, path: &str, expected: &str, actual: String) {
        self.findings.push(DriftFinding {
            kind,
            path: path.to_string(),
            expected: expected.to_string(),
            actual,
            allowed: Vec::new(),
        });
    }

    fn mismatch(&mut self, path: &str, expected: &str, value: &Value) {
        self.push(DriftKind::TypeMismatch, path, expected, json_kind(value).to_string());
    }

    fn walk(&mut self, schema: &Schema, path: &str, value: &Value, depth: usize) {
        if depth > self.opts.max_depth {
            debug!("drift depth limit reached at {path}");
            return;
        }
        match schema.type_name() {
            "object" => match value {
                Value::Object(obj) => self.walk_object(schema, path, obj, depth),
                other => self.mismatch(path, "object", other),
            },
            "array" => match value {
                Value::Array(items) => {
                    if let Some(item_schema) = schema.items.as_deref() {
                        for (i, item) in items.iter().enumerate() {
                            self.walk(item_schema, &format!("{path}[{i}]"), item, depth + 1);
                        }
                    }
                }
                other => self.mismatch(path, "array", other),
            },
            "string" => self.check_string(schema, path, value),
            t @ ("number" | "integer") => match value {
                Value::Number(_) | Value::Null => {}
                other => self.mismatch(path, t, other),
            },
            "boolean" => match value {
                Value::Bool(_) | Value::Null => {}
                other => self.mismatch(path, "boolean", other),
            },
            // untyped schema accepts anything
            _ => {}
        }
    }

    fn walk_object(&mut self, schema: &Schema, path: &str, obj: &Map<String, Value>, depth: usize) {
        for (name, prop) in &schema.properties {
            let sub = format!("{path}.{name}");
            match obj.get(name) {
                Some(actual) => self.walk(prop, &sub, actual, depth + 1),
                None if schema.is_required(name) => {
                    self.push(DriftKind::Missing, &sub, prop.type_name(), String::new())
                }
                None => {}
            }
        }
        for (name, actual) in obj {
            if !schema.properties.contains_key(name) {
                self.push(
                    DriftKind::Extra,
                    &format!("{path}.{name}"),
                    "",
                    json_kind(actual).to_string(),
                );
            }
        }
    }

    fn check_string(&mut self, schema: &Schema, path: &str, value: &Value) {
        match value {
            Value::String(_) | Value::Null => {}
            other => self.mismatch(path, "string", other),
        }
        if schema.enum_values.is_empty() {
            return;
        }
        let Some(s) = value.as_str().filter(|s| !s.is_empty()) else {
            return;
        };
        let allowed: Vec<String> = schema.enum_values.iter().map(jsonpath::render).collect();
        if !allowed.iter().any(|a| a == s) {
            self.findings.push(DriftFinding {
                kind: DriftKind::EnumViolation,
                path: path.to_string(),
                expected: "string".to_string(),
                actual: s.to_string(),
                allowed,
            });
        }
    }
}
