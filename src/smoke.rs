//! Smoke probing: one request per endpoint, classified by status.
//!
//! [`run_smoke_bulk`] drives a fixed worker pool over a pre-filled, closed
//! job queue. A single ticker shared by all workers gates every dispatch, so
//! aggregate throughput is bounded by `rate_limit_rps` whatever the worker
//! count. Result positions always match endpoint positions.

use crate::cancel::CancelToken;
use crate::openapi::Endpoint;
use crate::request::endpoint_request;
use anyhow::Result;
use log::{debug, info, warn};
use parking_lot::Mutex;
use reqwest::{redirect, Client};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_RATE_LIMIT_RPS: u32 = 10;

#[derive(Debug, Clone, Default)]
pub struct SmokeConfig {
    pub base_url: String,
    pub headers: HashMap<String, String>,
    pub auth_headers: HashMap<String, String>,
    pub timeout: Duration,
    pub workers: usize,
    pub rate_limit_rps: u32,
}

impl SmokeConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Zero values replaced by defaults.
    pub fn normalized(mut self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        if self.rate_limit_rps == 0 {
            self.rate_limit_rps = DEFAULT_RATE_LIMIT_RPS;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmokeResult {
    pub path: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ok: bool,
}

impl SmokeResult {
    fn pending(endpoint: &Endpoint) -> Self {
        Self {
            path: endpoint.path.clone(),
            method: endpoint.method.clone(),
            status_code: 0,
            latency_ms: 0,
            error: None,
            ok: false,
        }
    }

    fn cancelled(endpoint: &Endpoint) -> Self {
        Self {
            error: Some("cancelled".to_string()),
            ..Self::pending(endpoint)
        }
    }
}

/// 2xx is success; so is a 4xx, which confirms a documented client-error
/// contract. Everything else fails.
pub fn is_contract_status(status: u16) -> bool {
    (200..300).contains(&status) || (400..500).contains(&status)
}

/// Status and raw body of a single request, used for drift checks.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Single-endpoint prober holding one pooled client.
#[derive(Debug, Clone)]
pub struct SmokeProber {
    client: Client,
    config: SmokeConfig,
}

impl SmokeProber {
    pub fn new(config: SmokeConfig) -> Result<Self> {
        let config = config.normalized();
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SmokeConfig {
        &self.config
    }

    /// Probe one endpoint. Transport failures land in the result.
    pub async fn probe(&self, endpoint: &Endpoint) -> SmokeResult {
        let mut result = SmokeResult::pending(endpoint);
        let start = Instant::now();

        let request = match endpoint_request(
            &self.client,
            &self.config.base_url,
            endpoint,
            &[&self.config.headers, &self.config.auth_headers],
        ) {
            Ok(r) => r,
            Err(e) => {
                result.error = Some(format!("{e:#}"));
                return result;
            }
        };

        let response = request.send().await;
        result.latency_ms = start.elapsed().as_millis() as u64;
        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                result.status_code = status;
                result.ok = is_contract_status(status);
            }
            Err(e) => {
                debug!("smoke {} {} failed: {}", endpoint.method, endpoint.path, e);
                result.error = Some(e.to_string());
            }
        }
        result
    }

    /// One request returning status and body.
    pub async fn fetch(&self, endpoint: &Endpoint) -> Result<FetchedResponse> {
        let resp = endpoint_request(
            &self.client,
            &self.config.base_url,
            endpoint,
            &[&self.config.headers, &self.config.auth_headers],
        )?
        .send()
        .await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse { status, body })
    }
}

/// Fetch one endpoint with a throwaway prober.
pub async fn fetch_response(config: SmokeConfig, endpoint: &Endpoint) -> Result<FetchedResponse> {
    SmokeProber::new(config)?.fetch(endpoint).await
}

/// Probe every endpoint once through the worker pool. Returns one result per
/// endpoint, index-aligned with `endpoints`. Endpoints skipped because of
/// cancellation come back with error `cancelled`.
pub async fn run_smoke_bulk(
    config: SmokeConfig,
    endpoints: &[Endpoint],
    cancel: &CancelToken,
) -> Result<Vec<SmokeResult>> {
    let prober = Arc::new(SmokeProber::new(config)?);
    let config = prober.config().clone();
    let total = endpoints.len();

    info!(
        "🎯 Smoke: {} endpoints @ {} RPS with {} workers",
        total, config.rate_limit_rps, config.workers
    );

    let (tx, rx) = mpsc::channel(total.max(1));
    for idx in 0..total {
        // capacity equals job count, the queue cannot be full
        let _ = tx.try_send(idx);
    }
    drop(tx);
    let jobs = Arc::new(tokio::sync::Mutex::new(rx));

    let mut ticker = interval(Duration::from_secs_f64(
        1.0 / f64::from(config.rate_limit_rps),
    ));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ticker = Arc::new(tokio::sync::Mutex::new(ticker));

    let endpoints: Arc<Vec<Endpoint>> = Arc::new(endpoints.to_vec());
    let results: Arc<Mutex<Vec<Option<SmokeResult>>>> = Arc::new(Mutex::new(vec![None; total]));

    let mut handles = Vec::with_capacity(config.workers);
    for _ in 0..config.workers.min(total.max(1)) {
        let jobs = jobs.clone();
        let ticker = ticker.clone();
        let prober = prober.clone();
        let endpoints = endpoints.clone();
        let results = results.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            loop {
                let next = jobs.lock().await.recv().await;
                let Some(idx) = next else { break };
                if cancel.is_cancelled() {
                    break;
                }
                ticker.lock().await.tick().await;
                let r = prober.probe(&endpoints[idx]).await;
                results.lock()[idx] = Some(r);
            }
        }));
    }

    for outcome in futures::future::join_all(handles).await {
        if let Err(e) = outcome {
            warn!("smoke worker terminated abnormally: {e}");
        }
    }

    let collected = std::mem::take(&mut *results.lock());
    let results: Vec<SmokeResult> = collected
        .into_iter()
        .zip(endpoints.iter())
        .map(|(r, ep)| r.unwrap_or_else(|| SmokeResult::cancelled(ep)))
        .collect();

    let passed = results.iter().filter(|r| r.ok).count();
    info!(
        "✅ Smoke finished: {} passed, {} failed",
        passed,
        results.len() - passed
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(is_contract_status(200));
        assert!(is_contract_status(204));
        assert!(is_contract_status(404));
        assert!(is_contract_status(422));
        assert!(!is_contract_status(500));
        assert!(!is_contract_status(302));
        assert!(!is_contract_status(0));
    }

    #[test]
    fn defaults_applied_once() {
        let cfg = SmokeConfig::new("http://x").normalized();
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        assert_eq!(cfg.workers, DEFAULT_WORKERS);
        assert_eq!(cfg.rate_limit_rps, DEFAULT_RATE_LIMIT_RPS);

        let custom = SmokeConfig {
            workers: 3,
            rate_limit_rps: 50,
            ..SmokeConfig::new("http://x")
        }
        .normalized();
        assert_eq!(custom.workers, 3);
        assert_eq!(custom.rate_limit_rps, 50);
    }

    #[tokio::test]
    async fn empty_batch() {
        let out = run_smoke_bulk(SmokeConfig::new("http://127.0.0.1:9"), &[], &CancelToken::never())
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn cancelled_batch_keeps_positions() {
        use crate::cancel::cancel_pair;
        use crate::openapi::Operation;

        let (handle, token) = cancel_pair();
        handle.cancel();
        let eps = vec![
            Endpoint::new("/a", "GET", Operation::default()),
            Endpoint::new("/b", "POST", Operation::default()),
        ];
        let out = run_smoke_bulk(SmokeConfig::new("http://127.0.0.1:9"), &eps, &token)
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].path, "/a");
        assert_eq!(out[1].method, "POST");
        assert!(out.iter().all(|r| !r.ok && r.error.as_deref() == Some("cancelled")));
    }
}
