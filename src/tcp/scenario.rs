//! TCP scenario documents: target, options and the ordered step script.
//!
//! The YAML shape is flat and loosely typed (`kind: read` plus an optional
//! `read:` block); it is converted into the closed [`Step`] and [`Assert`]
//! variants while deserializing, so the runner only ever sees well-formed
//! steps.

use super::assert::{Assert, RawAssert};
use super::runner::{ErrorClass, StepError};
use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_DIAL_TIMEOUT_MS: u64 = 2000;
const DEFAULT_IO_TIMEOUT_MS: u64 = 1500;
const DEFAULT_BACKOFF_BASE_MS: u64 = 100;
const DEFAULT_BACKOFF_MAX_MS: u64 = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub kind: String,
    pub name: String,
    #[serde(flatten)]
    pub target: Target,
    #[serde(default)]
    pub options: ScenarioOptions,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub nodelay: bool,
    /// Keep-alive is enabled when non-zero.
    #[serde(default)]
    pub keepalive_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioOptions {
    /// Shared read/write timeout.
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub dial_timeout_ms: u64,
    #[serde(default)]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub write_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub breaker: BreakerPolicy,
}

impl ScenarioOptions {
    pub fn dial_timeout(&self) -> Duration {
        ms_or(self.dial_timeout_ms, DEFAULT_DIAL_TIMEOUT_MS)
    }

    pub fn read_timeout(&self) -> Duration {
        ms_or(nonzero_or(self.read_timeout_ms, self.timeout_ms), DEFAULT_IO_TIMEOUT_MS)
    }

    pub fn write_timeout(&self) -> Duration {
        ms_or(nonzero_or(self.write_timeout_ms, self.timeout_ms), DEFAULT_IO_TIMEOUT_MS)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default)]
    pub base_ms: u64,
    #[serde(default)]
    pub max_ms: u64,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the failed attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = ms_or(self.base_ms, DEFAULT_BACKOFF_BASE_MS);
        match self.strategy {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Exponential => {
                let cap = ms_or(self.max_ms, DEFAULT_BACKOFF_MAX_MS);
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(cap)
            }
            BackoffStrategy::None => Duration::ZERO,
        }
    }
}

/// Unknown strategy names map to `None` (no delay).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum BackoffStrategy {
    Constant,
    Exponential,
    #[default]
    None,
}

impl From<String> for BackoffStrategy {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "constant" => Self::Constant,
            "exponential" => Self::Exponential,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BreakerPolicy {
    /// Consecutive failed attempts that open the breaker (at least 1).
    #[serde(default)]
    pub failures: u32,
}

/// One scripted action.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawStep")]
pub enum Step {
    Connect,
    Write(Payload),
    Read(ReadSpec),
    Sleep(Duration),
    Close,
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Write(_) => "write",
            Self::Read(_) => "read",
            Self::Sleep(_) => "sleep",
            Self::Close => "close",
        }
    }
}

/// Write payload; the first non-empty encoding wins.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    pub literal: Vec<u8>,
    pub base64: String,
    pub hex: String,
}

impl Payload {
    pub fn literal(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            literal: bytes.into(),
            ..Default::default()
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, StepError> {
        if !self.literal.is_empty() {
            return Ok(self.literal.clone());
        }
        if !self.base64.is_empty() {
            return base64::engine::general_purpose::STANDARD
                .decode(self.base64.trim())
                .map_err(|e| StepError::new(ErrorClass::Error, format!("decode base64 payload: {e}")));
        }
        if !self.hex.is_empty() {
            return hex::decode(self.hex.trim())
                .map_err(|e| StepError::new(ErrorClass::Error, format!("decode hex payload: {e}")));
        }
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Until(u8),
    Exact(usize),
}

#[derive(Debug, Clone)]
pub struct ReadSpec {
    pub mode: ReadMode,
    pub timeout: Option<Duration>,
    pub assert: Option<Assert>,
}

impl ReadSpec {
    pub fn until(terminator: u8) -> Self {
        Self {
            mode: ReadMode::Until(terminator),
            timeout: None,
            assert: None,
        }
    }

    pub fn exact(size: usize) -> Self {
        Self {
            mode: ReadMode::Exact(size),
            ..Self::until(b'\n')
        }
    }

    pub fn with_assert(mut self, assert: Assert) -> Self {
        self.assert = Some(assert);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for ReadSpec {
    fn default() -> Self {
        Self::until(b'\n')
    }
}

#[derive(Debug, Deserialize)]
struct RawStep {
    kind: String,
    #[serde(default)]
    write: Option<RawWrite>,
    #[serde(default)]
    read: Option<RawRead>,
    #[serde(default)]
    sleep_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
struct RawWrite {
    #[serde(default)]
    bytes: String,
    #[serde(default)]
    base64: String,
    #[serde(default)]
    hex: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawRead {
    #[serde(default)]
    until: String,
    #[serde(default)]
    size: usize,
    #[serde(default)]
    timeout_ms: u64,
    #[serde(default)]
    assert: Option<RawAssert>,
}

impl TryFrom<RawStep> for Step {
    type Error = anyhow::Error;

    fn try_from(raw: RawStep) -> Result<Self> {
        Ok(match raw.kind.trim().to_ascii_lowercase().as_str() {
            "connect" => Step::Connect,
            "close" => Step::Close,
            "sleep" => Step::Sleep(Duration::from_millis(raw.sleep_ms)),
            "write" => {
                let w = raw.write.unwrap_or_default();
                Step::Write(Payload {
                    literal: w.bytes.into_bytes(),
                    base64: w.base64,
                    hex: w.hex,
                })
            }
            "read" => {
                let r = raw.read.unwrap_or_default();
                let mode = if let Some(&t) = r.until.as_bytes().first() {
                    ReadMode::Until(t)
                } else if r.size > 0 {
                    ReadMode::Exact(r.size)
                } else {
                    ReadMode::Until(b'\n')
                };
                Step::Read(ReadSpec {
                    mode,
                    timeout: (r.timeout_ms > 0).then(|| Duration::from_millis(r.timeout_ms)),
                    assert: r.assert.map(Assert::try_from).transpose()?,
                })
            }
            other => return Err(anyhow!("unknown step kind {other:?}")),
        })
    }
}

/// Read, parse and validate a TCP scenario file.
pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read tcp plan {}", path.display()))?;
    parse_scenario(&raw).with_context(|| format!("load tcp plan {}", path.display()))
}

pub fn parse_scenario(raw: &str) -> Result<Scenario> {
    let scenario: Scenario = serde_yaml::from_str(raw)?;
    validate(&scenario)?;
    Ok(scenario)
}

pub fn validate(s: &Scenario) -> Result<()> {
    if s.kind != "tcp" {
        bail!("kind must be tcp, got {:?}", s.kind);
    }
    if s.name.trim().is_empty() {
        bail!("name is required");
    }
    if s.target.host.trim().is_empty() {
        bail!("host is required");
    }
    if s.target.port == 0 {
        bail!("port must be 1..65535");
    }
    if s.steps.is_empty() {
        bail!("steps required");
    }
    Ok(())
}

fn nonzero_or(v: u64, fallback: u64) -> u64 {
    if v == 0 {
        fallback
    } else {
        v
    }
}

fn ms_or(ms: u64, default_ms: u64) -> Duration {
    Duration::from_millis(nonzero_or(ms, default_ms))
}
