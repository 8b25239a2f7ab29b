//! Running execution statistics.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fill latencies retained for the rolling mean.
const LATENCY_WINDOW: usize = 100;

/// Mutable counters owned by the execution engine.
#[derive(Debug, Default)]
pub struct ExecStats {
    pub placed: u64,
    pub filled: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub rejected: u64,
    pub reposts: u64,
    fill_latencies_ms: VecDeque<u64>,
}

/// Read-only snapshot, copied out for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecStatsSnapshot {
    pub placed: u64,
    pub filled: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub rejected: u64,
    pub reposts: u64,
    pub fill_ratio: f64,
    pub rejection_rate: f64,
    pub repost_rate: f64,
    pub mean_fill_latency_ms: f64,
}

impl ExecStats {
    pub fn record_fill_latency(&mut self, latency_ms: u64) {
        self.fill_latencies_ms.push_back(latency_ms);
        while self.fill_latencies_ms.len() > LATENCY_WINDOW {
            self.fill_latencies_ms.pop_front();
        }
    }

    pub fn mean_fill_latency_ms(&self) -> f64 {
        if self.fill_latencies_ms.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.fill_latencies_ms.iter().sum();
        sum as f64 / self.fill_latencies_ms.len() as f64
    }

    pub fn snapshot(&self) -> ExecStatsSnapshot {
        let placed = self.placed.max(1) as f64;
        ExecStatsSnapshot {
            placed: self.placed,
            filled: self.filled,
            cancelled: self.cancelled,
            failed: self.failed,
            rejected: self.rejected,
            reposts: self.reposts,
            fill_ratio: self.filled as f64 / placed,
            rejection_rate: self.rejected as f64 / placed,
            repost_rate: self.reposts as f64 / placed,
            mean_fill_latency_ms: self.mean_fill_latency_ms(),
        }
    }
}
