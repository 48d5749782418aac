use cypher::CompileStrategy;
use pipeline::PipelineError;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub struct Metrics {
    // Graph runs
    runs_started: AtomicUsize,
    runs_succeeded: AtomicUsize,
    runs_failed: AtomicUsize,
    runs_extraction_empty: AtomicUsize,
    runs_cancelled: AtomicUsize,

    // Timing (in microseconds)
    total_run_time_us: AtomicU64,
    total_analysis_time_us: AtomicU64,

    // Counts
    total_entities_extracted: AtomicUsize,
    compiles_model_assisted: AtomicUsize,
    compiles_deterministic: AtomicUsize,
    analyses: AtomicUsize,
    scripts_loaded: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs_started: AtomicUsize::new(0),
            runs_succeeded: AtomicUsize::new(0),
            runs_failed: AtomicUsize::new(0),
            runs_extraction_empty: AtomicUsize::new(0),
            runs_cancelled: AtomicUsize::new(0),
            total_run_time_us: AtomicU64::new(0),
            total_analysis_time_us: AtomicU64::new(0),
            total_entities_extracted: AtomicUsize::new(0),
            compiles_model_assisted: AtomicUsize::new(0),
            compiles_deterministic: AtomicUsize::new(0),
            analyses: AtomicUsize::new(0),
            scripts_loaded: AtomicUsize::new(0),
        })
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_succeeded(&self, duration: Duration, entities: usize) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
        self.total_run_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.total_entities_extracted.fetch_add(entities, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self, error: &PipelineError) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        match error {
            PipelineError::ExtractionEmpty => {
                self.runs_extraction_empty.fetch_add(1, Ordering::Relaxed);
            }
            PipelineError::Cancelled => {
                self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn record_compile(&self, strategy: CompileStrategy) {
        let counter = match strategy {
            CompileStrategy::ModelAssisted => &self.compiles_model_assisted,
            CompileStrategy::Deterministic => &self.compiles_deterministic,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_analysis(&self, duration: Duration) {
        self.analyses.fetch_add(1, Ordering::Relaxed);
        self.total_analysis_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_script_loaded(&self) {
        self.scripts_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_extraction_empty: self.runs_extraction_empty.load(Ordering::Relaxed),
            runs_cancelled: self.runs_cancelled.load(Ordering::Relaxed),
            avg_run_time_ms: avg_time_ms(&self.total_run_time_us, &self.runs_succeeded),
            avg_analysis_time_ms: avg_time_ms(&self.total_analysis_time_us, &self.analyses),
            total_entities_extracted: self.total_entities_extracted.load(Ordering::Relaxed),
            compiles_model_assisted: self.compiles_model_assisted.load(Ordering::Relaxed),
            compiles_deterministic: self.compiles_deterministic.load(Ordering::Relaxed),
            analyses: self.analyses.load(Ordering::Relaxed),
            scripts_loaded: self.scripts_loaded.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub runs_started: usize,
    pub runs_succeeded: usize,
    pub runs_failed: usize,
    pub runs_extraction_empty: usize,
    pub runs_cancelled: usize,
    pub avg_run_time_ms: f64,
    pub avg_analysis_time_ms: f64,
    pub total_entities_extracted: usize,
    pub compiles_model_assisted: usize,
    pub compiles_deterministic: usize,
    pub analyses: usize,
    pub scripts_loaded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_outcomes() {
        let metrics = Metrics::new();
        metrics.record_run_started();
        metrics.record_run_started();
        metrics.record_run_succeeded(Duration::from_millis(40), 5);
        metrics.record_run_failed(&PipelineError::ExtractionEmpty);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_started, 2);
        assert_eq!(snapshot.runs_succeeded, 1);
        assert_eq!(snapshot.runs_failed, 1);
        assert_eq!(snapshot.runs_extraction_empty, 1);
        assert_eq!(snapshot.total_entities_extracted, 5);
        assert!((snapshot.avg_run_time_ms - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_compile_strategies() {
        let metrics = Metrics::new();
        metrics.record_compile(CompileStrategy::Deterministic);
        metrics.record_compile(CompileStrategy::Deterministic);
        metrics.record_compile(CompileStrategy::ModelAssisted);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.compiles_deterministic, 2);
        assert_eq!(snapshot.compiles_model_assisted, 1);
        assert_eq!(snapshot.avg_analysis_time_ms, 0.0);
    }
}
