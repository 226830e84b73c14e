//! Scripted TCP scenarios: connect, write, read with assertions, sleep, close.

pub mod assert;
pub mod breaker;
pub mod runner;
pub mod scenario;

pub use assert::Assert;
pub use breaker::{BreakerState, CircuitBreaker};
pub use runner::{run_scenario, ErrorClass, RunResult, ScenarioError, StepError, StepResult};
pub use scenario::{
    load_scenario, parse_scenario, BackoffStrategy, Payload, ReadMode, ReadSpec, RetryPolicy,
    Scenario, ScenarioOptions, Step, Target,
};
