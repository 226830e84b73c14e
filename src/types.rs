//! Load-test plan model (Taurus-style YAML) and the run report it produces.

use crate::drift::json_kind;
use crate::jsonpath;
use crate::metrics::{Snapshot, ThresholdViolations};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_HOLD_FOR: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub execution: Vec<ExecutionBlock>,
    #[serde(default)]
    pub scenarios: BTreeMap<String, Scenario>,
    #[serde(default, rename = "data-sources")]
    pub data_sources: Vec<DataSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionBlock {
    #[serde(default)]
    pub executor: String,
    #[serde(default)]
    pub concurrency: i64,
    #[serde(default, rename = "ramp-up", deserialize_with = "de_duration")]
    pub ramp_up: Duration,
    #[serde(default, rename = "hold-for", deserialize_with = "de_duration")]
    pub hold_for: Duration,
    pub scenario: String,
}

impl ExecutionBlock {
    pub fn users(&self) -> usize {
        self.concurrency.max(1) as usize
    }

    pub fn hold_for(&self) -> Duration {
        if self.hold_for.is_zero() {
            DEFAULT_HOLD_FOR
        } else {
            self.hold_for
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default, rename = "base-url")]
    pub base_url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, rename = "think-time")]
    pub think_time: ThinkTime,
    #[serde(default)]
    pub requests: Vec<Request>,
}

/// Only the constant form is applied; `uniform_random` is kept for
/// round-tripping plans but has no effect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThinkTime {
    #[serde(default, deserialize_with = "de_duration")]
    pub constant: Duration,
    #[serde(default)]
    pub uniform_random: Option<String>,
}

impl ThinkTime {
    pub fn delay(&self) -> Duration {
        self.constant
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub method: String,
    pub url: String,
    #[serde(default, deserialize_with = "de_body")]
    pub body: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, rename = "extract-jsonpath")]
    pub extract: Vec<ExtractRule>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

impl Request {
    pub fn name(&self) -> &str {
        if self.label.is_empty() {
            &self.url
        } else {
            &self.label
        }
    }

    /// With no assertions a request passes on any status in [200,400);
    /// otherwise every assertion must hold.
    pub fn check(&self, status: u16, body: &[u8]) -> Result<(), String> {
        if self.assertions.is_empty() {
            return if (200..400).contains(&status) {
                Ok(())
            } else {
                Err(format!("status {status}"))
            };
        }
        self.assertions.iter().try_for_each(|a| a.check(status, body))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractRule {
    pub jsonpath: String,
    pub variable: String,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Assertion {
    #[serde(default, rename = "status-code")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub jsonpath: Option<JsonPathAssertion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonPathAssertion {
    pub path: String,
    /// Expected JSON kind of the value (`string`, `number`, ...).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl Assertion {
    pub fn check(&self, status: u16, body: &[u8]) -> Result<(), String> {
        if let Some(expected) = self.status_code {
            if expected != status {
                return Err(format!("expected status {expected}, got {status}"));
            }
        }
        if let Some(needle) = self.contains.as_deref() {
            if !String::from_utf8_lossy(body).contains(needle) {
                return Err(format!("body does not contain {needle:?}"));
            }
        }
        if let Some(jp) = &self.jsonpath {
            let doc: serde_json::Value = serde_json::from_slice(body)
                .map_err(|_| format!("jsonpath {}: body is not JSON", jp.path))?;
            let hit = jsonpath::lookup(&doc, &jp.path)
                .ok_or_else(|| format!("jsonpath {} not found", jp.path))?;
            if let Some(kind) = jp.kind.as_deref().filter(|k| !k.is_empty()) {
                let kind = if kind == "integer" { "number" } else { kind };
                if json_kind(hit) != kind {
                    return Err(format!(
                        "jsonpath {}: expected {kind}, got {}",
                        jp.path,
                        json_kind(hit)
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSource {
    pub path: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    pub variable: String,
}

fn default_delimiter() -> String {
    ",".to_string()
}

/// Read, parse and validate a load-test plan.
pub fn load_plan(path: impl AsRef<Path>) -> Result<Plan> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read plan {}", path.display()))?;
    parse_plan(&raw).with_context(|| format!("load plan {}", path.display()))
}

pub fn parse_plan(raw: &str) -> Result<Plan> {
    let mut plan: Plan = serde_yaml::from_str(raw).context("parse yaml")?;
    for block in &mut plan.execution {
        block.concurrency = block.concurrency.max(1);
    }
    for scenario in plan.scenarios.values_mut() {
        for req in &mut scenario.requests {
            req.method = req.method.trim().to_ascii_uppercase();
            if req.method.is_empty() {
                req.method = "GET".to_string();
            }
        }
    }

    let first = plan
        .execution
        .first()
        .ok_or_else(|| anyhow!("plan has no execution blocks"))?;
    let scenario = plan
        .scenarios
        .get(&first.scenario)
        .ok_or_else(|| anyhow!("scenario {:?} not found", first.scenario))?;
    if scenario.requests.is_empty() {
        bail!("scenario {:?} has no requests", first.scenario);
    }
    for req in &scenario.requests {
        if let Some(rule) = req.extract.iter().find(|r| r.variable.trim().is_empty()) {
            bail!("request {:?}: extract rule {:?} has no variable", req.name(), rule.jsonpath);
        }
    }
    for ds in &plan.data_sources {
        if ds.variable.trim().is_empty() {
            bail!("data source {:?} has no variable", ds.path);
        }
    }
    Ok(plan)
}

impl Plan {
    /// One line per scenario: request and assertion counts.
    pub fn summary(&self) -> Vec<String> {
        self.scenarios
            .iter()
            .map(|(name, sc)| {
                let assertions: usize = sc.requests.iter().map(|r| r.assertions.len()).sum();
                format!("{name}: {} requests, {assertions} assertions", sc.requests.len())
            })
            .collect()
    }
}

/// Duration string: a sequence of `<number><unit>` with units
/// `ns`, `us`, `ms`, `s`, `m`, `h` (e.g. `300ms`, `1h30m`, `1.5s`).
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    if s.is_empty() || s == "0" {
        return Ok(Duration::ZERO);
    }
    let is_num = |c: char| c.is_ascii_digit() || c == '.';
    let mut nanos = 0u64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest.find(|c: char| !is_num(c)).unwrap_or(rest.len());
        if num_len == 0 {
            bail!("invalid duration {raw:?}");
        }
        let value: f64 = rest[..num_len]
            .parse()
            .with_context(|| format!("invalid duration {raw:?}"))?;
        rest = &rest[num_len..];
        let unit_len = rest.find(is_num).unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => bail!("missing unit in duration {raw:?}"),
            other => bail!("unknown unit {other:?} in duration {raw:?}"),
        };
        nanos = nanos.saturating_add((value * scale).round() as u64);
        rest = &rest[unit_len..];
    }
    Ok(Duration::from_nanos(nanos))
}

fn de_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Bodies may be written as a string or as a YAML mapping; mappings are
/// sent as JSON.
fn de_body<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_yaml::Value::deserialize(d)? {
        serde_yaml::Value::Null => Ok(String::new()),
        serde_yaml::Value::String(s) => Ok(s),
        other => serde_json::to_string(&other).map_err(serde::de::Error::custom),
    }
}

/// Replace `${name}` and `${name.field}` with values from `vars`. Unknown
/// names are left as written.
pub fn resolve_vars(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                match vars.get(&after[..end]) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + end + 3]),
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub rps: f64,
    pub p95_ms: u64,
    pub error_rate_pct: f64,
}

impl TimeSeriesPoint {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            timestamp: Utc::now(),
            rps: snapshot.rps,
            p95_ms: snapshot.p95_ms,
            error_rate_pct: snapshot.error_rate_pct,
        }
    }
}

/// Final outcome of a load-test run.
#[derive(Debug, Clone, Serialize)]
pub struct LoadTestReport {
    pub run_id: Uuid,
    pub scenario: String,
    pub users: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub snapshot: Snapshot,
    pub violations: ThresholdViolations,
    pub time_series: Vec<TimeSeriesPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
execution:
  - executor: http
    concurrency: 0
    ramp-up: 45s
    hold-for: 4m
    scenario: checkout
scenarios:
  checkout:
    base-url: http://localhost:8080/
    headers: { X-Client: lt }
    think-time: { constant: 300ms }
    requests:
      - label: login
        method: post
        url: /login
        body: { user: "${user.name}" }
        extract-jsonpath:
          - { jsonpath: $.token, variable: token, default: none }
        assertions:
          - status-code: 200
      - url: /cart
        headers: { Authorization: "Bearer ${token}" }
data-sources:
  - path: users.csv
    variable: user
"#;

    #[test]
    fn parses_and_normalizes() {
        let plan = parse_plan(PLAN).unwrap();
        let block = &plan.execution[0];
        assert_eq!(block.users(), 1);
        assert_eq!(block.ramp_up, Duration::from_secs(45));
        assert_eq!(block.hold_for(), Duration::from_secs(240));
        let sc = &plan.scenarios["checkout"];
        assert_eq!(sc.think_time.delay(), Duration::from_millis(300));
        assert_eq!(sc.requests[0].method, "POST");
        assert_eq!(sc.requests[1].method, "GET");
        assert_eq!(sc.requests[0].body, r#"{"user":"${user.name}"}"#);
        assert_eq!(sc.requests[0].extract[0].default.as_deref(), Some("none"));
        assert_eq!(plan.data_sources[0].delimiter, ",");
        assert_eq!(plan.summary(), vec!["checkout: 2 requests, 1 assertions"]);
    }

    #[test]
    fn missing_scenario_is_an_error() {
        let raw = "execution: [{scenario: nope}]\nscenarios: {}\n";
        assert!(parse_plan(raw).is_err());
        assert!(parse_plan("scenarios: {}\n").is_err());
        assert!(parse_plan("execution: [{scenario: a, hold-for: 4x}]\nscenarios: {a: {requests: [{url: /}]}}").is_err());
    }

    #[test]
    fn default_hold_for() {
        let plan = parse_plan("execution: [{scenario: a}]\nscenarios: {a: {requests: [{url: /}]}}").unwrap();
        assert_eq!(plan.execution[0].hold_for(), DEFAULT_HOLD_FOR);
        assert!(plan.execution[0].ramp_up.is_zero());
    }

    #[test]
    fn go_durations() {
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("").unwrap(), Duration::ZERO);
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("ms").is_err());
    }

    #[test]
    fn resolves_placeholders() {
        let vars: HashMap<String, String> = [("token", "abc"), ("user.name", "ann")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(resolve_vars("Bearer ${token}", &vars), "Bearer abc");
        assert_eq!(resolve_vars("/u/${user.name}/${missing}", &vars), "/u/ann/${missing}");
        assert_eq!(resolve_vars("${} and ${token", &vars), "${} and ${token");
        assert_eq!(resolve_vars("plain", &vars), "plain");
    }

    #[test]
    fn request_checks() {
        let bare = Request {
            url: "/".into(),
            ..Default::default()
        };
        assert!(bare.check(302, b"").is_ok());
        assert!(bare.check(404, b"").is_err());

        let asserted = Request {
            url: "/".into(),
            assertions: vec![
                Assertion {
                    status_code: Some(404),
                    ..Default::default()
                },
                Assertion {
                    contains: Some("gone".into()),
                    jsonpath: Some(JsonPathAssertion {
                        path: "$.error".into(),
                        kind: Some("string".into()),
                    }),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert!(asserted.check(404, br#"{"error":"gone"}"#).is_ok());
        assert!(asserted.check(200, br#"{"error":"gone"}"#).is_err());
        assert!(asserted.check(404, br#"{"error":1,"m":"gone"}"#).is_err());
    }
}
