use ops_protocol::{ExecutionRecord, ExecutionStatus};
use serde::Serialize;

/// Summary statistics over the current window only. Records evicted from the
/// window stop contributing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub total_cost_usd: f64,
    pub record_count: usize,
    pub failed_count: usize,
    pub total_tokens: u64,
}

pub fn aggregate(window: &[ExecutionRecord]) -> Metrics {
    if window.is_empty() {
        return Metrics::default();
    }
    let count = window.len();
    let completed = window
        .iter()
        .filter(|record| record.status == ExecutionStatus::Completed)
        .count();
    let failed = window
        .iter()
        .filter(|record| record.status == ExecutionStatus::Failed)
        .count();
    let latency_sum: f64 = window.iter().map(ExecutionRecord::latency_or_zero).sum();
    Metrics {
        success_rate: completed as f64 / count as f64 * 100.0,
        avg_latency_ms: latency_sum / count as f64,
        total_cost_usd: window.iter().map(ExecutionRecord::cost_or_zero).sum(),
        record_count: count,
        failed_count: failed,
        total_tokens: window.iter().map(ExecutionRecord::total_tokens).sum(),
    }
}
