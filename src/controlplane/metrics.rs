//! Coordinator Metrics
//!
//! Prometheus collectors for discovery fan-out and single-target pod calls,
//! registered on an explicit [`Registry`] so tests can use a private one.

use crate::error::Result;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Outcome label for a successful call
pub const OUTCOME_SUCCESS: &str = "success";
/// Outcome label for a failed call
pub const OUTCOME_FAILURE: &str = "failure";

/// Collectors owned by the RPC coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorMetrics {
    /// Discovery legs by outcome
    discovery_legs: IntCounterVec,
    /// Wall time of a full discovery fan-out
    discovery_duration: Histogram,
    /// Single-target calls by operation and outcome
    pod_calls: IntCounterVec,
}

impl CoordinatorMetrics {
    /// Create the collectors and register them on `registry`
    pub fn new(registry: &Registry) -> Result<Arc<Self>> {
        let discovery_legs = IntCounterVec::new(
            Opts::new(
                "vmhost_discovery_legs_total",
                "Pod discovery calls per rack controller by outcome",
            ),
            &["outcome"],
        )?;
        let discovery_duration = Histogram::with_opts(
            HistogramOpts::new(
                "vmhost_discovery_duration_seconds",
                "Time to settle a pod discovery fan-out",
            )
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0]),
        )?;
        let pod_calls = IntCounterVec::new(
            Opts::new(
                "vmhost_pod_calls_total",
                "Single-target pod calls by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;

        registry.register(Box::new(discovery_legs.clone()))?;
        registry.register(Box::new(discovery_duration.clone()))?;
        registry.register(Box::new(pod_calls.clone()))?;

        Ok(Arc::new(Self {
            discovery_legs,
            discovery_duration,
            pod_calls,
        }))
    }

    /// Collectors attached to a throwaway registry
    pub fn unregistered() -> Arc<Self> {
        // A fresh registry never holds duplicate names
        match Self::new(&Registry::new()) {
            Ok(metrics) => metrics,
            Err(e) => unreachable!("fresh registry rejected collectors: {}", e),
        }
    }

    pub fn record_discovery_leg(&self, success: bool) {
        self.discovery_legs
            .with_label_values(&[outcome(success)])
            .inc();
    }

    pub fn observe_discovery(&self, seconds: f64) {
        self.discovery_duration.observe(seconds);
    }

    pub fn record_pod_call(&self, operation: &str, success: bool) {
        self.pod_calls
            .with_label_values(&[operation, outcome(success)])
            .inc();
    }

    /// Current discovery leg count for an outcome label
    pub fn discovery_legs(&self, outcome: &str) -> u64 {
        self.discovery_legs.with_label_values(&[outcome]).get()
    }

    /// Current call count for an operation and outcome label
    pub fn pod_calls(&self, operation: &str, outcome: &str) -> u64 {
        self.pod_calls.with_label_values(&[operation, outcome]).get()
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        OUTCOME_SUCCESS
    } else {
        OUTCOME_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_registered() {
        let registry = Registry::new();
        let metrics = CoordinatorMetrics::new(&registry).unwrap();

        metrics.record_discovery_leg(true);
        metrics.record_discovery_leg(false);
        metrics.record_discovery_leg(false);
        metrics.record_pod_call("compose", true);
        metrics.observe_discovery(0.25);

        assert_eq!(metrics.discovery_legs(OUTCOME_SUCCESS), 1);
        assert_eq!(metrics.discovery_legs(OUTCOME_FAILURE), 2);
        assert_eq!(metrics.pod_calls("compose", OUTCOME_SUCCESS), 1);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"vmhost_discovery_legs_total".to_string()));
        assert!(names.contains(&"vmhost_discovery_duration_seconds".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        CoordinatorMetrics::new(&registry).unwrap();
        assert!(CoordinatorMetrics::new(&registry).is_err());
    }
}
