//! Performance Monitor (§4.9): bounded-retention ring buffers with
//! on-read aggregation and edge-triggered alerts.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    Tool,
    Task,
    Agent,
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub timestamp: Instant,
    pub sample_type: SampleType,
    pub name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregate {
    pub count: usize,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
}

fn aggregate(mut values: Vec<f64>) -> Aggregate {
    if values.is_empty() {
        return Aggregate::default();
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let count = values.len();
    let avg = values.iter().sum::<f64>() / count as f64;
    let percentile = |p: f64| {
        let idx = ((count as f64 - 1.0) * p).round() as usize;
        values[idx.min(count - 1)]
    };
    Aggregate {
        count,
        avg,
        p50: percentile(0.50),
        p95: percentile(0.95),
    }
}

struct Series {
    max_age: Duration,
    samples: VecDeque<Sample>,
}

impl Series {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.timestamp) > self.max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

pub type AlertPredicate = Box<dyn Fn(&Aggregate) -> bool + Send + Sync>;

struct Alert {
    predicate: AlertPredicate,
    active: bool,
    manually_resolved: bool,
}

pub struct PerformanceMonitor {
    max_age: Duration,
    series: Mutex<HashMap<String, Series>>,
    alerts: Mutex<HashMap<(String, String), Alert>>,
}

impl PerformanceMonitor {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            series: Mutex::new(HashMap::new()),
            alerts: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, sample_type: SampleType, name: &str, value: f64, unit: &str) {
        let now = Instant::now();
        let mut series = self.series.lock();
        let entry = series.entry(name.to_string()).or_insert_with(|| Series {
            max_age: self.max_age,
            samples: VecDeque::new(),
        });
        entry.samples.push_back(Sample {
            timestamp: now,
            sample_type,
            name: name.to_string(),
            value,
            unit: unit.to_string(),
        });
        entry.prune(now);
    }

    /// Recomputes `{count, avg, p50, p95}` over the retained window on
    /// every read, per §4.9.
    pub fn aggregate(&self, name: &str) -> Aggregate {
        let mut series = self.series.lock();
        let Some(entry) = series.get_mut(name) else {
            return Aggregate::default();
        };
        entry.prune(Instant::now());
        aggregate(entry.samples.iter().map(|s| s.value).collect())
    }

    /// Registers a named predicate over a source's aggregate. Firing is
    /// edge-triggered (false→true) and deduplicated by `(source, name)`.
    pub fn register_alert(
        &self,
        source: &str,
        name: &str,
        predicate: impl Fn(&Aggregate) -> bool + Send + Sync + 'static,
    ) {
        self.alerts.lock().insert(
            (source.to_string(), name.to_string()),
            Alert {
                predicate: Box::new(predicate),
                active: false,
                manually_resolved: false,
            },
        );
    }

    /// Evaluates every registered alert against its source's current
    /// aggregate; returns the ones that just transitioned.
    pub fn evaluate_alerts(&self) -> Vec<(String, String, bool)> {
        let mut transitions = Vec::new();
        let mut alerts = self.alerts.lock();
        for ((source, name), alert) in alerts.iter_mut() {
            let agg = self.aggregate(source);
            let firing = (alert.predicate)(&agg);
            if firing && !alert.active {
                alert.active = true;
                alert.manually_resolved = false;
                transitions.push((source.clone(), name.clone(), true));
                warn!(source, name, "performance alert fired");
            } else if !firing && alert.active {
                alert.active = false;
                transitions.push((source.clone(), name.clone(), false));
            }
        }
        transitions
    }

    pub fn resolve_alert(&self, source: &str, name: &str) {
        if let Some(alert) = self
            .alerts
            .lock()
            .get_mut(&(source.to_string(), name.to_string()))
        {
            alert.active = false;
            alert.manually_resolved = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_reflects_recorded_samples() {
        let monitor = PerformanceMonitor::new(Duration::from_secs(60));
        for v in [10.0, 20.0, 30.0, 40.0] {
            monitor.record(SampleType::Tool, "latency", v, "ms");
        }
        let agg = monitor.aggregate("latency");
        assert_eq!(agg.count, 4);
        assert_eq!(agg.avg, 25.0);
    }

    #[test]
    fn alert_fires_once_on_edge_and_resolves() {
        let monitor = PerformanceMonitor::new(Duration::from_secs(60));
        monitor.register_alert("latency", "too_slow", |agg| agg.avg > 100.0);

        monitor.record(SampleType::Tool, "latency", 10.0, "ms");
        let transitions = monitor.evaluate_alerts();
        assert!(transitions.is_empty());

        monitor.record(SampleType::Tool, "latency", 500.0, "ms");
        let transitions = monitor.evaluate_alerts();
        assert_eq!(transitions, vec![("latency".to_string(), "too_slow".to_string(), true)]);

        // Still firing: no duplicate transition on the next read.
        let transitions = monitor.evaluate_alerts();
        assert!(transitions.is_empty());
    }
}
