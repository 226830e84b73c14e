//! A/B comparison: the same synthesized request sent to two environments,
//! diffed on status, header keys and body.
//!
//! Body differences are split into *structural* (key on one side only,
//! differing JSON kind, differing array length) and *value* (same shape,
//! different scalar). Arrays are compared position by position.

use crate::drift::json_kind;
use crate::request::endpoint_request;
use crate::openapi::Endpoint;
use anyhow::Result;
use log::{debug, info};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ABCompareResult {
    pub path: String,
    pub method: String,
    pub status_a: u16,
    pub status_b: u16,
    /// Both sides answered with the same status.
    pub status_match: bool,
    /// Header names present on one side only, lower-cased.
    pub headers_diff: Vec<String>,
    pub body_structure_diff: Vec<String>,
    pub body_value_diff: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_a: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_b: Option<String>,
}

impl ABCompareResult {
    /// No status, header or body difference and no request error.
    pub fn is_identical(&self) -> bool {
        self.status_match
            && self.error_a.is_none()
            && self.error_b.is_none()
            && self.headers_diff.is_empty()
            && self.body_structure_diff.is_empty()
            && self.body_value_diff.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ABConfig {
    pub base_url_a: String,
    pub base_url_b: String,
    pub headers: HashMap<String, String>,
    pub auth_headers: HashMap<String, String>,
    pub timeout: Duration,
}

impl ABConfig {
    /// Compare environment A against B. A's headers are sent to both sides
    /// so the requests differ only in their target.
    pub fn between(base_url_a: &str, headers_a: &HashMap<String, String>, base_url_b: &str) -> Self {
        Self {
            base_url_a: base_url_a.to_string(),
            base_url_b: base_url_b.to_string(),
            headers: headers_a.clone(),
            ..Default::default()
        }
    }
}

struct Side {
    status: u16,
    header_keys: BTreeSet<String>,
    body: Vec<u8>,
}

/// Send the endpoint's request to both environments and diff the answers.
pub async fn run_ab_compare(endpoint: &Endpoint, config: &ABConfig) -> Result<ABCompareResult> {
    let timeout = if config.timeout.is_zero() {
        crate::smoke::DEFAULT_TIMEOUT
    } else {
        config.timeout
    };
    let client = Client::builder().timeout(timeout).build()?;

    info!(
        "🔀 A/B {} {}: {} vs {}",
        endpoint.method, endpoint.path, config.base_url_a, config.base_url_b
    );
    let (a, b) = tokio::join!(
        fetch_side(&client, &config.base_url_a, endpoint, config),
        fetch_side(&client, &config.base_url_b, endpoint, config),
    );

    let mut res = ABCompareResult {
        path: endpoint.path.clone(),
        method: endpoint.method.clone(),
        ..Default::default()
    };

    let (a, b) = match (a, b) {
        (Ok(a), Ok(b)) => (a, b),
        (a, b) => {
            if let Ok(side) = &a {
                res.status_a = side.status;
            }
            if let Ok(side) = &b {
                res.status_b = side.status;
            }
            res.error_a = a.err().map(|e| format!("{e:#}"));
            res.error_b = b.err().map(|e| format!("{e:#}"));
            debug!("A/B request failure: a={:?} b={:?}", res.error_a, res.error_b);
            return Ok(res);
        }
    };

    res.status_a = a.status;
    res.status_b = b.status;
    res.status_match = a.status == b.status;
    res.headers_diff = header_key_diff(&a.header_keys, &b.header_keys);
    let diff = diff_bodies(&a.body, &b.body);
    res.body_structure_diff = diff.structure;
    res.body_value_diff = diff.values;
    Ok(res)
}

async fn fetch_side(
    client: &Client,
    base_url: &str,
    endpoint: &Endpoint,
    config: &ABConfig,
) -> Result<Side> {
    let resp = endpoint_request(client, base_url, endpoint, &[&config.headers, &config.auth_headers])?
        .send()
        .await?;
    let status = resp.status().as_u16();
    let header_keys = resp
        .headers()
        .keys()
        .map(|k| k.as_str().to_ascii_lowercase())
        .collect();
    let body = resp.bytes().await?.to_vec();
    Ok(Side {
        status,
        header_keys,
        body,
    })
}

/// Symmetric difference of header names.
pub fn header_key_diff(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Vec<String> {
    let only_a = a.difference(b).map(|k| format!("header only in A: {k}"));
    let only_b = b.difference(a).map(|k| format!("header only in B: {k}"));
    only_a.chain(only_b).collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyDiff {
    pub structure: Vec<String>,
    pub values: Vec<String>,
}

/// Diff two raw bodies. Both JSON: recursive diff. Neither JSON: a byte
/// difference is one value difference at `$`. One JSON only: structural.
pub fn diff_bodies(a: &[u8], b: &[u8]) -> BodyDiff {
    let mut diff = BodyDiff::default();
    let parsed_a = serde_json::from_slice::<Value>(a).ok();
    let parsed_b = serde_json::from_slice::<Value>(b).ok();
    match (parsed_a, parsed_b) {
        (Some(va), Some(vb)) => diff_values(&va, &vb, "$", &mut diff),
        (None, None) => {
            if a != b {
                diff.values.push("$ (non-JSON bodies differ)".to_string());
            }
        }
        (Some(_), None) => diff.structure.push("$ body B is not JSON".to_string()),
        (None, Some(_)) => diff.structure.push("$ body A is not JSON".to_string()),
    }
    diff
}

pub fn diff_values(a: &Value, b: &Value, path: &str, diff: &mut BodyDiff) {
    match (a, b) {
        (Value::Object(ma), Value::Object(mb)) => {
            let keys: BTreeSet<&String> = ma.keys().chain(mb.keys()).collect();
            for key in keys {
                let sub = format!("{path}.{key}");
                match (ma.get(key), mb.get(key)) {
                    (Some(va), Some(vb)) => diff_values(va, vb, &sub, diff),
                    (Some(_), None) => diff.structure.push(format!("{sub} only in A")),
                    (None, Some(_)) => diff.structure.push(format!("{sub} only in B")),
                    (None, None) => {}
                }
            }
        }
        (Value::Array(xa), Value::Array(xb)) => {
            if xa.len() != xb.len() {
                diff.structure
                    .push(format!("{path} array length: {} vs {}", xa.len(), xb.len()));
            }
            for (i, (va, vb)) in xa.iter().zip(xb.iter()).enumerate() {
                diff_values(va, vb, &format!("{path}[{i}]"), diff);
            }
        }
        (Value::Number(na), Value::Number(nb)) => {
            if na.as_f64() != nb.as_f64() {
                diff.values.push(format!("{path}: {na} vs {nb}"));
            }
        }
        (va, vb) if json_kind(va) != json_kind(vb) => {
            diff.structure
                .push(format!("{path} type: {} vs {}", json_kind(va), json_kind(vb)));
        }
        (va, vb) => {
            if va != vb {
                diff.values.push(format!("{path}: {va} vs {vb}"));
            }
        }
    }
}
