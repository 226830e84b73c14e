mod common;

use common::{respond, serve};
use contractprobe::cancel::{cancel_pair, CancelToken};
use contractprobe::load_test::{LoadTestRunner, RunConfig};
use contractprobe::types::parse_plan;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn quick_config() -> RunConfig {
    RunConfig {
        warm_up: Duration::ZERO,
        http_timeout: Duration::from_secs(2),
        snapshot_interval: Duration::from_millis(50),
        ..RunConfig::default()
    }
}

fn single_request_plan(base: &str, hold_for: &str) -> String {
    format!(
        r#"
execution:
  - concurrency: 2
    hold-for: {hold_for}
    scenario: ping
scenarios:
  ping:
    base-url: {base}
    think-time: {{ constant: 10ms }}
    requests:
      - url: /ping
"#
    )
}

#[tokio::test]
async fn chains_extracted_token_and_feeds_csv_rows() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let base = serve(move |req| {
        let auth = req
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        log.lock()
            .unwrap()
            .push((req.path.clone(), auth.clone(), String::from_utf8_lossy(&req.body).into_owned()));
        match req.path.as_str() {
            "/login" => respond(200, r#"{"token":"tok-1"}"#),
            "/me" if auth == "Bearer tok-1" => respond(200, r#"{"id":7}"#),
            _ => respond(401, "{}"),
        }
    })
    .await;

    let mut users = tempfile::NamedTempFile::new().unwrap();
    users.write_all(b"name;pin\nann;1\nbob;2\n").unwrap();
    let plan = parse_plan(&format!(
        r#"
execution:
  - concurrency: 2
    hold-for: 300ms
    scenario: session
data-sources:
  - path: {csv}
    delimiter: ";"
    variable: user
scenarios:
  session:
    base-url: {base}
    headers: {{ X-Client: probe }}
    think-time: {{ constant: 5ms }}
    requests:
      - label: login
        method: post
        url: /login
        body: {{ user: "${{user.name}}" }}
        extract-jsonpath:
          - {{ jsonpath: $.token, variable: token }}
      - label: me
        url: /me
        headers: {{ Authorization: "Bearer ${{token}}" }}
        assertions:
          - {{ status-code: 200 }}
          - {{ jsonpath: {{ path: $.id, type: integer }} }}
"#,
        csv = users.path().display()
    ))
    .unwrap();

    let (tx, mut rx) = mpsc::channel(64);
    let runner = LoadTestRunner::new(plan, quick_config());
    let report = runner.run(&CancelToken::never(), Some(tx)).await.unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.users, 2);
    assert_eq!(report.scenario, "session");
    assert!(report.snapshot.total >= 2);
    assert_eq!(report.snapshot.error_rate_pct, 0.0);
    assert_eq!(report.snapshot.status_dist.keys().copied().collect::<Vec<_>>(), vec![200]);
    assert!(!report.violations.any());
    assert!(report.time_series.len() >= 2);

    let mut progress = 0;
    while rx.try_recv().is_ok() {
        progress += 1;
    }
    assert!(progress >= 1);

    let seen = seen.lock().unwrap();
    let logins: Vec<&String> = seen.iter().filter(|(p, _, _)| p == "/login").map(|(_, _, b)| b).collect();
    assert!(logins.iter().any(|b| b.contains("ann")));
    assert!(logins.iter().all(|b| b.contains("ann") || b.contains("bob")));
    assert!(seen
        .iter()
        .filter(|(p, _, _)| p == "/me")
        .all(|(_, auth, _)| auth == "Bearer tok-1"));
}

#[tokio::test]
async fn warm_up_samples_are_discarded() {
    let base = serve(|_| respond(200, "{}")).await;
    let plan = parse_plan(&single_request_plan(&base, "200ms")).unwrap();
    let config = RunConfig {
        warm_up: Duration::from_secs(10),
        ..quick_config()
    };

    let runner = LoadTestRunner::new(plan, config);
    let report = runner.run(&CancelToken::never(), None).await.unwrap();

    assert_eq!(report.snapshot.total, 0);
    assert!(runner.metrics().is_empty());
}

#[tokio::test]
async fn cancellation_ends_the_run_early() {
    let base = serve(|_| respond(200, "{}")).await;
    let plan = parse_plan(&single_request_plan(&base, "1m")).unwrap();
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.cancel();
    });

    let start = Instant::now();
    let report = LoadTestRunner::new(plan, quick_config())
        .run(&token, None)
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(report.cancelled);
    assert!(report.snapshot.total > 0);
}

#[tokio::test]
async fn error_budget_violation() {
    let base = serve(|_| respond(503, "{}")).await;
    let plan = parse_plan(&single_request_plan(&base, "200ms")).unwrap();
    let config = RunConfig {
        max_error_pct: Some(1.0),
        ..quick_config()
    };

    let report = LoadTestRunner::new(plan, config)
        .run(&CancelToken::never(), None)
        .await
        .unwrap();

    assert!(report.snapshot.total > 0);
    assert_eq!(report.snapshot.error_rate_pct, 100.0);
    assert_eq!(report.snapshot.status_dist.get(&503), Some(&report.snapshot.total));
    assert!(report.violations.error_budget);
    assert!(!report.violations.p95);
}

#[tokio::test]
async fn request_headers_replace_scenario_headers_on_the_wire() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let base = serve(move |req| {
        let values = |name: &str| -> Vec<String> {
            req.headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_string))
                .collect()
        };
        log.lock()
            .unwrap()
            .push((values("authorization"), values("content-type")));
        respond(200, "{}")
    })
    .await;
    let plan = parse_plan(&format!(
        r#"
execution:
  - concurrency: 1
    hold-for: 150ms
    scenario: auth
scenarios:
  auth:
    base-url: {base}
    headers: {{ Authorization: Bearer scenario }}
    think-time: {{ constant: 20ms }}
    requests:
      - method: POST
        url: /orders
        body: "a=1"
        headers:
          Authorization: Bearer request
          Content-Type: application/x-www-form-urlencoded
"#
    ))
    .unwrap();

    LoadTestRunner::new(plan, quick_config())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    for (auth, content_type) in seen.iter() {
        assert_eq!(auth, &["Bearer request"]);
        assert_eq!(content_type, &["application/x-www-form-urlencoded"]);
    }
}

#[tokio::test]
async fn ramp_up_staggers_user_start_times() {
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let log = arrivals.clone();
    let base = serve(move |_| {
        log.lock().unwrap().push(Instant::now());
        respond(200, "{}")
    })
    .await;
    // a long think time leaves each user with exactly one request
    let plan = parse_plan(&format!(
        r#"
execution:
  - concurrency: 4
    ramp-up: 300ms
    hold-for: 800ms
    scenario: once
scenarios:
  once:
    base-url: {base}
    think-time: {{ constant: 10s }}
    requests:
      - url: /hello
"#
    ))
    .unwrap();

    let start = Instant::now();
    let report = LoadTestRunner::new(plan, quick_config())
        .run(&CancelToken::never(), None)
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(5), "think time is cut at hold-for");
    assert_eq!(report.snapshot.total, 4);
    let mut arrivals = arrivals.lock().unwrap().clone();
    arrivals.sort();
    assert_eq!(arrivals.len(), 4);
    // users start 75ms apart
    for pair in arrivals.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(40), "{arrivals:?}");
    }
    assert!(arrivals[3] - arrivals[0] >= Duration::from_millis(200));
}
