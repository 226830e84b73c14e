//! Scenario execution: one connection per attempt, steps strictly in order,
//! the first failing step aborts the attempt and closes the connection.
//!
//! Attempts are sequential. Before each one the breaker is consulted; after
//! each one it is fed the outcome. Between attempts the retry policy's
//! backoff applies.

use super::breaker::{BreakerState, CircuitBreaker};
use super::scenario::{ReadMode, Scenario, Step, Target};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::{sleep, timeout};

const HEXDUMP_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    DialTimeout,
    ReadTimeout,
    WriteTimeout,
    UnexpectedClose,
    AssertFailed,
    Error,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DialTimeout => "dial_timeout",
            Self::ReadTimeout => "read_timeout",
            Self::WriteTimeout => "write_timeout",
            Self::UnexpectedClose => "unexpected_close",
            Self::AssertFailed => "assert_failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single step.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StepError {
    pub class: ErrorClass,
    pub message: String,
}

impl StepError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

/// Failure surfaced for a whole run, after retries.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioError {
    #[error("circuit breaker open")]
    BreakerOpen,
    #[error("step {index} ({kind}) failed [{class}]: {message}")]
    Step {
        index: usize,
        kind: &'static str,
        class: ErrorClass,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub index: usize,
    pub kind: &'static str,
    pub latency_ms: f64,
    pub bytes_read: usize,
    pub bytes_written: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hexdump: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
}

impl StepResult {
    fn new(index: usize, kind: &'static str) -> Self {
        Self {
            index,
            kind,
            latency_ms: 0.0,
            bytes_read: 0,
            bytes_written: 0,
            hexdump: String::new(),
            error: None,
            error_class: None,
        }
    }
}

/// Outcome of a scenario run. `steps` is the trace of the last attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub plan_name: String,
    pub ok: bool,
    pub attempts: u32,
    pub duration_ms: f64,
    pub steps: Vec<StepResult>,
    pub breaker_state: BreakerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ScenarioError>,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Dial,
    Read,
    Write,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Self::Dial => "dial",
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    fn timeout_class(self) -> ErrorClass {
        match self {
            Self::Dial => ErrorClass::DialTimeout,
            Self::Read => ErrorClass::ReadTimeout,
            Self::Write => ErrorClass::WriteTimeout,
        }
    }
}

fn io_error(phase: Phase, err: io::Error) -> StepError {
    use io::ErrorKind::*;
    let class = match err.kind() {
        TimedOut => phase.timeout_class(),
        UnexpectedEof | ConnectionReset | ConnectionAborted | BrokenPipe | NotConnected => {
            ErrorClass::UnexpectedClose
        }
        _ => ErrorClass::Error,
    };
    StepError::new(class, format!("{}: {err}", phase.name()))
}

fn timed_out(phase: Phase, after: Duration) -> StepError {
    StepError::new(
        phase.timeout_class(),
        format!("{}: timed out after {after:?}", phase.name()),
    )
}

/// Connection state of one attempt.
enum Link {
    NotConnected,
    Connected(BufReader<TcpStream>),
    Closed,
}

impl Link {
    fn stream(&mut self) -> Result<&mut BufReader<TcpStream>, StepError> {
        match self {
            Link::Connected(s) => Ok(s),
            Link::NotConnected => Err(StepError::new(ErrorClass::Error, "not connected")),
            Link::Closed => Err(StepError::new(ErrorClass::Error, "connection already closed")),
        }
    }

    /// Idempotent.
    async fn close(&mut self) {
        if let Link::Connected(mut s) = std::mem::replace(self, Link::Closed) {
            if let Err(e) = s.get_mut().shutdown().await {
                debug!("shutdown: {e}");
            }
        }
    }
}

/// Run the scenario with its retry and breaker policies.
pub async fn run_scenario(scenario: &Scenario) -> RunResult {
    let target = &scenario.target;
    let retry = &scenario.options.retry;
    let max_attempts = retry.attempts();
    info!(
        "🔌 TCP scenario {} against {}:{} ({} steps, up to {} attempts)",
        scenario.name,
        target.host,
        target.port,
        scenario.steps.len(),
        max_attempts
    );

    let start = Instant::now();
    let mut breaker = CircuitBreaker::new(scenario.options.breaker.failures);
    let mut result = RunResult {
        plan_name: scenario.name.clone(),
        ok: false,
        attempts: 0,
        duration_ms: 0.0,
        steps: Vec::new(),
        breaker_state: BreakerState::Closed,
        failure: None,
    };

    for attempt in 0..max_attempts {
        if !breaker.allow() {
            warn!("circuit breaker open, giving up after {} attempts", result.attempts);
            result.failure = Some(ScenarioError::BreakerOpen);
            break;
        }

        let (trace, outcome) = run_attempt(scenario).await;
        result.attempts = attempt + 1;
        result.steps = trace;
        breaker.record(outcome.is_ok());

        match outcome {
            Ok(()) => {
                result.ok = true;
                result.failure = None;
                break;
            }
            Err(e) => {
                debug!("attempt {} failed: {e}", attempt + 1);
                result.failure = Some(e);
                if attempt + 1 < max_attempts && breaker.allow() {
                    sleep(retry.delay(attempt)).await;
                }
            }
        }
    }

    result.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    result.breaker_state = breaker.state();
    match &result.failure {
        None => info!(
            "✅ TCP {}: ok after {} attempt(s) in {:.1}ms",
            result.plan_name, result.attempts, result.duration_ms
        ),
        Some(e) => warn!(
            "❌ TCP {}: failed after {} attempt(s): {e}",
            result.plan_name, result.attempts
        ),
    }
    result
}

async fn run_attempt(scenario: &Scenario) -> (Vec<StepResult>, Result<(), ScenarioError>) {
    let mut link = Link::NotConnected;
    let mut trace = Vec::with_capacity(scenario.steps.len());

    for (index, step) in scenario.steps.iter().enumerate() {
        let started = Instant::now();
        let mut sr = StepResult::new(index, step.kind());
        let outcome = execute_step(scenario, step, &mut link, &mut sr).await;
        sr.latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        if let Err(e) = outcome {
            sr.error = Some(e.message.clone());
            sr.error_class = Some(e.class);
            trace.push(sr);
            link.close().await;
            return (
                trace,
                Err(ScenarioError::Step {
                    index,
                    kind: step.kind(),
                    class: e.class,
                    message: e.message,
                }),
            );
        }
        trace.push(sr);
    }

    link.close().await;
    (trace, Ok(()))
}

async fn execute_step(
    scenario: &Scenario,
    step: &Step,
    link: &mut Link,
    sr: &mut StepResult,
) -> Result<(), StepError> {
    let opts = &scenario.options;
    match step {
        Step::Connect => {
            link.close().await;
            let stream = dial(&scenario.target, opts.dial_timeout()).await?;
            *link = Link::Connected(BufReader::new(stream));
        }
        Step::Write(payload) => {
            let bytes = payload.decode()?;
            let stream = link.stream()?;
            let limit = opts.write_timeout();
            match timeout(limit, stream.get_mut().write_all(&bytes)).await {
                Err(_) => return Err(timed_out(Phase::Write, limit)),
                Ok(Err(e)) => return Err(io_error(Phase::Write, e)),
                Ok(Ok(())) => sr.bytes_written = bytes.len(),
            }
        }
        Step::Read(spec) => {
            let stream = link.stream()?;
            let limit = spec.timeout.unwrap_or_else(|| opts.read_timeout());
            let mut buf = Vec::new();
            let outcome = timeout(limit, read_into(stream, spec.mode, &mut buf)).await;
            sr.bytes_read = buf.len();
            sr.hexdump = hex::encode(&buf[..buf.len().min(HEXDUMP_LIMIT)]);
            match outcome {
                Err(_) => return Err(timed_out(Phase::Read, limit)),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(())) => {}
            }
            if let Some(assert) = &spec.assert {
                assert
                    .evaluate(&buf)
                    .map_err(|m| StepError::new(ErrorClass::AssertFailed, m))?;
            }
        }
        Step::Sleep(d) => sleep(*d).await,
        Step::Close => link.close().await,
    }
    Ok(())
}

async fn dial(target: &Target, limit: Duration) -> Result<TcpStream, StepError> {
    let connect = async {
        let addr = lookup_host((target.host.as_str(), target.port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no address"))?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(target.keepalive_ms > 0)?;
        let stream = socket.connect(addr).await?;
        Ok::<TcpStream, io::Error>(stream)
    };

    let stream = match timeout(limit, connect).await {
        Err(_) => return Err(timed_out(Phase::Dial, limit)),
        Ok(Err(e)) => return Err(io_error(Phase::Dial, e)),
        Ok(Ok(s)) => s,
    };
    if target.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay: {e}");
        }
    }
    Ok(stream)
}

async fn read_into(
    stream: &mut BufReader<TcpStream>,
    mode: ReadMode,
    buf: &mut Vec<u8>,
) -> Result<(), StepError> {
    match mode {
        ReadMode::Until(terminator) => {
            stream
                .read_until(terminator, buf)
                .await
                .map_err(|e| io_error(Phase::Read, e))?;
            if buf.last() != Some(&terminator) {
                return Err(StepError::new(
                    ErrorClass::UnexpectedClose,
                    format!("read: connection closed before terminator 0x{terminator:02x}"),
                ));
            }
        }
        ReadMode::Exact(size) => {
            (&mut *stream)
                .take(size as u64)
                .read_to_end(buf)
                .await
                .map_err(|e| io_error(Phase::Read, e))?;
            if buf.len() < size {
                return Err(StepError::new(
                    ErrorClass::UnexpectedClose,
                    format!("read: connection closed after {} of {size} bytes", buf.len()),
                ));
            }
        }
    }
    Ok(())
}
