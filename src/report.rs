//! Report serializers: a JSON document for every engine, JUnit XML for smoke,
//! drift and TCP runs.

use crate::abcompare::ABCompareResult;
use crate::drift::DriftResult;
use crate::smoke::SmokeResult;
use crate::stats::{SmokeSummary, Statistics};
use crate::tcp::RunResult;
use crate::types::LoadTestReport;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    pub generated: DateTime<Utc>,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke: Option<SmokeSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ab_compare: Option<Vec<ABCompareResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp: Option<RunResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_test: Option<LoadTestReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeSection {
    #[serde(flatten)]
    pub summary: SmokeSummary,
    pub results: Vec<SmokeResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftSection {
    pub total: usize,
    pub ok: usize,
    pub drifted: usize,
    pub results: Vec<DriftResult>,
}

impl JsonReport {
    pub fn new(duration: Duration) -> Self {
        Self {
            generated: Utc::now(),
            duration_seconds: duration.as_secs_f64(),
            smoke: None,
            drift: None,
            ab_compare: None,
            tcp: None,
            load_test: None,
        }
    }

    pub fn with_smoke(mut self, results: &[SmokeResult]) -> Self {
        self.smoke = Some(SmokeSection {
            summary: Statistics::from_results(results).summary(),
            results: results.to_vec(),
        });
        self
    }

    pub fn with_drift(mut self, results: &[DriftResult]) -> Self {
        let ok = results.iter().filter(|r| r.ok).count();
        self.drift = Some(DriftSection {
            total: results.len(),
            ok,
            drifted: results.len() - ok,
            results: results.to_vec(),
        });
        self
    }

    pub fn with_ab_compare(mut self, results: &[ABCompareResult]) -> Self {
        self.ab_compare = Some(results.to_vec());
        self
    }

    pub fn with_tcp(mut self, result: &RunResult) -> Self {
        self.tcp = Some(result.clone());
        self
    }

    pub fn with_load_test(mut self, report: &LoadTestReport) -> Self {
        self.load_test = Some(report.clone());
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("write report {}", path.display()))
    }
}

struct Case {
    name: String,
    classname: &'static str,
    seconds: f64,
    failure: Option<Failure>,
}

struct Failure {
    message: String,
    kind: String,
    body: String,
}

fn render_junit(suite: &str, seconds: f64, cases: &[Case]) -> String {
    let failures = cases.iter().filter(|c| c.failure.is_some()).count();
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    // writing into a String cannot fail
    let _ = writeln!(
        xml,
        "<testsuites name=\"contractprobe\" tests=\"{}\" failures=\"{failures}\" time=\"{seconds:.3}\">",
        cases.len()
    );
    let _ = writeln!(
        xml,
        "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{failures}\" time=\"{seconds:.3}\">",
        escape(suite),
        cases.len()
    );
    for case in cases {
        let head = format!(
            "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
            escape(&case.name),
            case.classname,
            case.seconds
        );
        match &case.failure {
            None => {
                let _ = writeln!(xml, "{head}></testcase>");
            }
            Some(f) => {
                let _ = writeln!(xml, "{head}>");
                let _ = writeln!(
                    xml,
                    "      <failure message=\"{}\" type=\"{}\">{}</failure>",
                    escape(&f.message),
                    escape(&f.kind),
                    escape(&f.body)
                );
                let _ = writeln!(xml, "    </testcase>");
            }
        }
    }
    xml.push_str("  </testsuite>\n</testsuites>\n");
    xml
}

/// XML text and attribute escaping.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}

pub fn junit_smoke(results: &[SmokeResult], duration: Duration) -> String {
    let cases: Vec<Case> = results
        .iter()
        .map(|r| {
            let err = r.error.clone().unwrap_or_default();
            Case {
                name: format!("{} {}", r.method, r.path),
                classname: "contractprobe.smoke",
                seconds: r.latency_ms as f64 / 1000.0,
                failure: (!r.ok).then(|| Failure {
                    body: format!("status={} err={err}", r.status_code),
                    message: err,
                    kind: "SmokeTestFailure".to_string(),
                }),
            }
        })
        .collect();
    render_junit("contractprobe-smoke", duration.as_secs_f64(), &cases)
}

pub fn junit_drift(results: &[DriftResult], duration: Duration) -> String {
    let cases: Vec<Case> = results
        .iter()
        .map(|r| {
            let summary: Vec<String> = r
                .findings
                .iter()
                .map(|f| format!("{} {}", f.kind.as_str(), f.path))
                .collect();
            let message = summary.join("; ");
            Case {
                name: format!("{} {}", r.method, r.path),
                classname: "contractprobe.drift",
                seconds: 0.0,
                failure: (!r.ok).then(|| Failure {
                    body: message.clone(),
                    message,
                    kind: "ContractDrift".to_string(),
                }),
            }
        })
        .collect();
    render_junit("contractprobe-drift", duration.as_secs_f64(), &cases)
}

/// One test case per step of the last attempt.
pub fn junit_tcp(result: &RunResult) -> String {
    let cases: Vec<Case> = result
        .steps
        .iter()
        .map(|st| Case {
            name: format!("tcp/{}/{}-{}", result.plan_name, st.index, st.kind),
            classname: "contractprobe.tcp",
            seconds: st.latency_ms / 1000.0,
            failure: st.error.as_ref().map(|err| Failure {
                message: err.clone(),
                kind: st
                    .error_class
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "error".to_string()),
                body: format!("hexdump={}", st.hexdump),
            }),
        })
        .collect();
    render_junit("contractprobe-tcp", result.duration_ms / 1000.0, &cases)
}

pub fn write_junit(path: impl AsRef<Path>, xml: &str) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, xml).with_context(|| format!("write junit report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::{DriftFinding, DriftKind};

    fn smoke(path: &str, status: u16, ok: bool, error: Option<&str>) -> SmokeResult {
        SmokeResult {
            path: path.to_string(),
            method: "GET".to_string(),
            status_code: status,
            latency_ms: 12,
            error: error.map(str::to_string),
            ok,
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&apos;");
        assert_eq!(escape("bell\u{7}"), "bell");
    }

    #[test]
    fn junit_counts_failures() {
        let results = vec![
            smoke("/ok", 200, true, None),
            smoke("/boom", 500, false, Some("status 500")),
        ];
        let xml = junit_smoke(&results, Duration::from_millis(1500));
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"tests="2" failures="1" time="1.500""#));
        assert!(xml.contains(r#"<testcase name="GET /ok" classname="contractprobe.smoke" time="0.012"></testcase>"#));
        assert!(xml.contains(r#"<failure message="status 500" type="SmokeTestFailure">status=500 err=status 500</failure>"#));
    }

    #[test]
    fn junit_drift_lists_findings() {
        let r = DriftResult {
            path: "/users".into(),
            method: "GET".into(),
            findings: vec![DriftFinding {
                kind: DriftKind::Missing,
                path: "$.id".into(),
                expected: "string".into(),
                actual: String::new(),
                allowed: Vec::new(),
            }],
            ok: false,
        };
        let xml = junit_drift(&[r], Duration::ZERO);
        assert!(xml.contains(r#"type="ContractDrift">missing $.id</failure>"#));
    }

    #[test]
    fn json_report_sections() {
        let report = JsonReport::new(Duration::from_secs(2))
            .with_smoke(&[smoke("/a", 200, true, None), smoke("/b", 0, false, Some("refused"))]);
        let v: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(v["smoke"]["total"], 2);
        assert_eq!(v["smoke"]["failed"], 1);
        assert_eq!(v["smoke"]["results"][1]["error"], "refused");
        assert!(v.get("drift").is_none());
        assert_eq!(v["duration_seconds"], 2.0);
    }
}
