//! API and TCP contract testing: smoke probing, schema drift, A/B diffing,
//! scripted TCP scenarios and load tests with live percentile metrics.

pub mod abcompare;
pub mod cancel;
pub mod config;
pub mod datasource;
pub mod drift;
pub mod jsonpath;
pub mod metrics;
pub mod openapi;
pub mod report;
pub mod request;
pub mod smoke;
pub mod stats;
pub mod synth;
pub mod tcp;
pub mod types;

pub use abcompare::{run_ab_compare, ABCompareResult, ABConfig};
pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use drift::{run_drift, DriftFinding, DriftKind, DriftResult};
pub use load_test::{LoadTestRunner, RunConfig};
pub use metrics::{Metrics, Sample, Snapshot, ThresholdViolations};
pub use openapi::{load_openapi, ApiSpec, Endpoint};
pub use smoke::{fetch_response, run_smoke_bulk, SmokeConfig, SmokeResult};
pub use types::{load_plan, LoadTestReport, Plan};
