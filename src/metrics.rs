// Prometheus metrics for the command gate
//
// Exposed on the /metrics endpoint when metrics are enabled:
// - Validation decisions by reason (counter)
// - Executions by outcome (counter)
// - Execution wall time (histogram)

use crate::gate::{Decision, ExecutionResult, Outcome};
use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, Histogram, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref GATE_DECISIONS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("gate_decisions_total", "Validation decisions by reason"),
        &["reason"]
    ).expect("Failed to create gate decisions metric");

    pub static ref GATE_BLOCKED_TOTAL: IntCounter = IntCounter::new(
        "gate_blocked_total",
        "Requests denied by the allowlist or denylist"
    ).expect("Failed to create gate blocked metric");

    pub static ref GATE_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("gate_executions_total", "Executions by outcome"),
        &["outcome"]
    ).expect("Failed to create gate executions metric");

    pub static ref GATE_EXECUTION_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("gate_execution_duration_seconds", "Child process wall time in seconds"),
    ).expect("Failed to create execution duration metric");
}

/// Register all gate metrics; safe to call more than once
pub fn init() -> prometheus::Result<()> {
    register(Box::new(GATE_DECISIONS_TOTAL.clone()))?;
    register(Box::new(GATE_BLOCKED_TOTAL.clone()))?;
    register(Box::new(GATE_EXECUTIONS_TOTAL.clone()))?;
    register(Box::new(GATE_EXECUTION_DURATION_SECONDS.clone()))?;
    Ok(())
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> prometheus::Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Count a validator decision
pub fn record_decision(decision: &Decision) {
    GATE_DECISIONS_TOTAL
        .with_label_values(&[decision.reason.as_str()])
        .inc();
    if decision
        .denial
        .as_ref()
        .is_some_and(|denial| denial.is_security_relevant())
    {
        GATE_BLOCKED_TOTAL.inc();
    }
}

/// Count an execution and its duration
pub fn record_execution(result: &ExecutionResult) {
    let outcome = match result.outcome {
        Outcome::Completed => "completed",
        Outcome::Failed => "failed",
        Outcome::TimedOut => "timed_out",
        Outcome::SpawnFailed => "spawn_failed",
        Outcome::Denied => "denied",
        Outcome::Internal => "internal",
    };
    GATE_EXECUTIONS_TOTAL.with_label_values(&[outcome]).inc();
    GATE_EXECUTION_DURATION_SECONDS.observe(result.duration_ms / 1000.0);
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
