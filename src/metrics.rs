use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Process-lifetime counters for the diagnosis engine. Not exposed on the
/// wire as its own entity (§3) — it backs `/status` and structured log
/// summaries, the way the teacher's subscription metrics backed `/metrics`.
#[derive(Clone)]
pub struct CortexMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    discovery_runs: AtomicU64,
    investigations_started: AtomicU64,
    diagnoses_reached: AtomicU64,
    llm_transport_errors: AtomicU64,
    actions_by_status: RwLock<HashMap<String, u64>>,
}

impl Default for CortexMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CortexMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                discovery_runs: AtomicU64::new(0),
                investigations_started: AtomicU64::new(0),
                diagnoses_reached: AtomicU64::new(0),
                llm_transport_errors: AtomicU64::new(0),
                actions_by_status: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn discovery_run_completed(&self) {
        self.inner.discovery_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn investigation_started(&self) {
        self.inner.investigations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn diagnosis_reached(&self) {
        self.inner.diagnoses_reached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn llm_transport_error(&self) {
        self.inner.llm_transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_recorded(&self, status: &str) {
        *self.inner.actions_by_status.write().entry(status.to_string()).or_insert(0) += 1;
    }

    pub fn discovery_runs(&self) -> u64 {
        self.inner.discovery_runs.load(Ordering::Relaxed)
    }

    pub fn investigations_started(&self) -> u64 {
        self.inner.investigations_started.load(Ordering::Relaxed)
    }

    pub fn diagnoses_reached(&self) -> u64 {
        self.inner.diagnoses_reached.load(Ordering::Relaxed)
    }

    pub fn llm_transport_errors(&self) -> u64 {
        self.inner.llm_transport_errors.load(Ordering::Relaxed)
    }

    pub fn actions_by_status(&self) -> HashMap<String, u64> {
        self.inner.actions_by_status.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = CortexMetrics::new();
        assert_eq!(m.discovery_runs(), 0);
        assert_eq!(m.investigations_started(), 0);
    }

    #[test]
    fn action_recorded_tallies_by_status() {
        let m = CortexMetrics::new();
        m.action_recorded("success");
        m.action_recorded("success");
        m.action_recorded("blocked_by_autonomy");
        let by_status = m.actions_by_status();
        assert_eq!(by_status.get("success"), Some(&2));
        assert_eq!(by_status.get("blocked_by_autonomy"), Some(&1));
    }
}
