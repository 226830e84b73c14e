//! OpenAPI 3 loading: the subset of the document the probes need.
//!
//! Endpoints own an `Arc<Operation>` so worker tasks can share them without
//! copying schemas. Local `#/components/schemas/*` references are inlined at
//! load time; anything else (remote files, a reference back into a schema
//! already being expanded) is left as an untyped schema.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use reqwest::Url;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

const MAX_REF_DEPTH: usize = 32;
const JSON_MEDIA: &str = "application/json";

/// Schema node. Only the keywords the synthesizer and drift comparator
/// look at are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Schema {
    #[serde(rename = "type", default, deserialize_with = "de_schema_type")]
    pub schema_type: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Schema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub items: Option<Box<Schema>>,
    #[serde(rename = "enum", default)]
    pub enum_values: Vec<Value>,
    #[serde(default)]
    pub example: Option<Value>,
    #[serde(rename = "$ref", default)]
    pub reference: Option<String>,
}

impl Schema {
    pub fn of_type(t: &str) -> Self {
        Self {
            schema_type: Some(t.to_string()),
            ..Default::default()
        }
    }

    pub fn type_name(&self) -> &str {
        self.schema_type.as_deref().unwrap_or("")
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaType {
    #[serde(default)]
    pub schema: Option<Schema>,
    #[serde(default)]
    pub example: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestBody {
    #[serde(default)]
    pub content: BTreeMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: BTreeMap<String, MediaType>,
}

/// One operation (path + method) of the document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operation {
    #[serde(rename = "operationId", default)]
    pub operation_id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "requestBody", default)]
    pub request_body: Option<RequestBody>,
    #[serde(default, deserialize_with = "de_responses")]
    pub responses: BTreeMap<String, Response>,
}

impl Operation {
    /// JSON schema declared for `status`, falling back to `default`.
    pub fn response_schema(&self, status: u16) -> Option<&Schema> {
        let response = self
            .responses
            .get(&status.to_string())
            .or_else(|| self.responses.get("default"))?;
        response.content.get(JSON_MEDIA)?.schema.as_ref()
    }

    pub fn request_body_schema(&self) -> Option<&Schema> {
        self.request_media()?.schema.as_ref()
    }

    /// Media-level example of the JSON request body, if declared.
    pub fn request_body_example(&self) -> Option<&Value> {
        self.request_media()?.example.as_ref()
    }

    fn request_media(&self) -> Option<&MediaType> {
        self.request_body.as_ref()?.content.get(JSON_MEDIA)
    }
}

/// One path + method pair. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub path: String,
    pub method: String,
    pub operation_id: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub operation: Arc<Operation>,
}

impl Endpoint {
    pub fn new(path: impl Into<String>, method: impl Into<String>, operation: Operation) -> Self {
        let summary = if operation.summary.is_empty() {
            operation.operation_id.clone()
        } else {
            operation.summary.clone()
        };
        Self {
            path: path.into(),
            method: method.into().to_uppercase(),
            operation_id: operation.operation_id.clone(),
            summary,
            tags: operation.tags.clone(),
            operation: Arc::new(operation),
        }
    }

    /// POST, PUT and PATCH carry a synthesized body.
    pub fn is_mutating(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH")
    }
}

/// Loaded document: title, version and flattened endpoints.
#[derive(Debug, Clone)]
pub struct ApiSpec {
    pub title: String,
    pub version: String,
    pub endpoints: Vec<Endpoint>,
}

impl ApiSpec {
    /// Endpoint lookup by path and (case-insensitive) method.
    pub fn find(&self, path: &str, method: &str) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.path == path && e.method.eq_ignore_ascii_case(method))
    }

    /// Endpoints carrying at least one of `tags`; all endpoints if `tags` is empty.
    pub fn filter_by_tags(&self, tags: &[String]) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .filter(|e| tags.is_empty() || e.tags.iter().any(|t| tags.contains(t)))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default, deserialize_with = "de_scalar_string")]
    openapi: String,
    #[serde(default)]
    info: Info,
    #[serde(default)]
    paths: BTreeMap<String, PathItem>,
    #[serde(default)]
    components: Components,
}

#[derive(Debug, Default, Deserialize)]
struct Info {
    #[serde(default)]
    title: String,
    #[serde(default, deserialize_with = "de_scalar_string")]
    version: String,
}

#[derive(Debug, Default, Deserialize)]
struct Components {
    #[serde(default)]
    schemas: BTreeMap<String, Schema>,
}

#[derive(Debug, Default, Deserialize)]
struct PathItem {
    get: Option<Operation>,
    put: Option<Operation>,
    post: Option<Operation>,
    delete: Option<Operation>,
    options: Option<Operation>,
    head: Option<Operation>,
    patch: Option<Operation>,
    trace: Option<Operation>,
}

impl PathItem {
    fn into_operations(self) -> Vec<(&'static str, Operation)> {
        [
            ("GET", self.get),
            ("PUT", self.put),
            ("POST", self.post),
            ("DELETE", self.delete),
            ("OPTIONS", self.options),
            ("HEAD", self.head),
            ("PATCH", self.patch),
            ("TRACE", self.trace),
        ]
        .into_iter()
        .filter_map(|(m, op)| op.map(|op| (m, op)))
        .collect()
    }
}

/// Read and parse an OpenAPI document (YAML or JSON).
pub fn load_openapi(path: impl AsRef<Path>) -> Result<ApiSpec> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read openapi file {}", path.display()))?;
    let spec = parse_openapi(&raw).with_context(|| format!("parse openapi {}", path.display()))?;
    info!(
        "📖 Loaded {} endpoints from {} ({} {})",
        spec.endpoints.len(),
        path.display(),
        spec.title,
        spec.version
    );
    Ok(spec)
}

/// Parse an OpenAPI document from text. JSON is accepted as YAML.
pub fn parse_openapi(raw: &str) -> Result<ApiSpec> {
    let doc: Document = serde_yaml::from_str(raw)?;
    if !doc.openapi.starts_with('3') {
        bail!("unsupported or missing `openapi` version (expected 3.x)");
    }

    let components = doc.components.schemas;
    let mut endpoints = Vec::new();
    for (path, item) in doc.paths {
        for (method, mut op) in item.into_operations() {
            inline_operation_refs(&mut op, &components);
            endpoints.push(Endpoint::new(path.clone(), method, op));
        }
    }

    Ok(ApiSpec {
        title: doc.info.title,
        version: doc.info.version,
        endpoints,
    })
}

/// Join `base_url` and `path`: trailing `/` of the base trimmed, leading `/`
/// of the path ensured. Path templates are kept literally.
pub fn build_url(base_url: &str, path: &str) -> Result<Url> {
    let mut url = Url::parse(base_url).with_context(|| format!("invalid base URL {base_url:?}"))?;
    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    Ok(url)
}

fn inline_operation_refs(op: &mut Operation, components: &BTreeMap<String, Schema>) {
    let media = op
        .request_body
        .iter_mut()
        .flat_map(|b| b.content.values_mut())
        .chain(op.responses.values_mut().flat_map(|r| r.content.values_mut()));
    for m in media {
        if let Some(schema) = m.schema.as_mut() {
            inline_refs(schema, components, &mut Vec::new(), 0);
        }
    }
}

/// `expanding` holds the component names on the current path; a name that
/// recurs keeps its `$ref` and stays untyped.
fn inline_refs(
    schema: &mut Schema,
    components: &BTreeMap<String, Schema>,
    expanding: &mut Vec<String>,
    depth: usize,
) {
    if depth >= MAX_REF_DEPTH {
        debug!("schema reference depth guard hit, leaving subtree unresolved");
        return;
    }
    let mark = expanding.len();
    while let Some(reference) = schema.reference.clone() {
        let Some(name) = reference.strip_prefix("#/components/schemas/") else {
            debug!("unresolved schema reference {reference}");
            break;
        };
        if expanding.iter().any(|n| n == name) {
            debug!("recursive schema reference {reference} left unresolved");
            break;
        }
        let Some(target) = components.get(name) else {
            debug!("unresolved schema reference {reference}");
            break;
        };
        *schema = target.clone();
        expanding.push(name.to_string());
    }
    if schema.reference.is_none() {
        for prop in schema.properties.values_mut() {
            inline_refs(prop, components, expanding, depth + 1);
        }
        if let Some(items) = schema.items.as_mut() {
            inline_refs(items, components, expanding, depth + 1);
        }
    }
    expanding.truncate(mark);
}

fn de_schema_type<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TypeField {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<TypeField>::deserialize(deserializer)? {
        Some(TypeField::One(t)) => Some(t),
        Some(TypeField::Many(ts)) => ts.into_iter().find(|t| t != "null"),
        None => None,
    })
}

/// `openapi: 3.1` and `version: 1.2` parse as YAML numbers when unquoted.
fn de_scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Response keys are often unquoted integers in YAML; accept any scalar key.
fn de_responses<'de, D>(deserializer: D) -> Result<BTreeMap<String, Response>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    for (key, value) in mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            other => return Err(D::Error::custom(format!("invalid response key {other:?}"))),
        };
        let response: Response = serde_yaml::from_value(value).map_err(D::Error::custom)?;
        out.insert(key, response);
    }
    Ok(out)
}
