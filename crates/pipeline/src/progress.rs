use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::orchestrator::GraphArtifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Queued,
    Preparing,
    Prompting,
    Generating,
    Parsing,
    Visualizing,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub run_id: Uuid,
    pub stage: PipelineStage,
    pub percent: u8,
    pub message: String,
}

/// Everything a run tells its listener: progress, then at most one of
/// `Completed` or `Failed`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Progress(ProgressUpdate),
    Completed {
        graph_id: Option<String>,
        artifact: Box<GraphArtifact>,
    },
    Failed {
        code: String,
        message: String,
    },
}

/// Sending half of a run's event channel.
///
/// Progress is best effort: if the listener is slow or gone, updates are
/// dropped rather than stalling the run. Percentages never go backwards.
/// Terminal events wait for channel capacity.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    run_id: Uuid,
    tx: Option<mpsc::Sender<RunEvent>>,
    last_percent: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn channel(run_id: Uuid, capacity: usize) -> (Self, mpsc::Receiver<RunEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let reporter = Self {
            run_id,
            tx: Some(tx),
            last_percent: Arc::new(AtomicU8::new(0)),
        };
        (reporter, rx)
    }

    /// A reporter nobody listens to
    pub fn detached(run_id: Uuid) -> Self {
        Self {
            run_id,
            tx: None,
            last_percent: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent.load(Ordering::Acquire)
    }

    pub fn report(&self, stage: PipelineStage, percent: u8, message: impl Into<String>) {
        let percent = percent.min(100);
        let previous = self.last_percent.fetch_max(percent, Ordering::AcqRel);
        let update = ProgressUpdate {
            run_id: self.run_id,
            stage,
            percent: percent.max(previous),
            message: message.into(),
        };
        debug!(run_id = %self.run_id, stage = ?update.stage, percent = update.percent, "{}", update.message);

        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(RunEvent::Progress(update)) {
                debug!(run_id = %self.run_id, error = %e, "progress update dropped");
            }
        }
    }

    pub async fn complete(&self, graph_id: Option<String>, artifact: GraphArtifact) {
        self.send_terminal(RunEvent::Completed {
            graph_id,
            artifact: Box::new(artifact),
        })
        .await;
    }

    pub async fn fail(&self, code: &str, message: impl Into<String>) {
        self.send_terminal(RunEvent::Failed {
            code: code.to_string(),
            message: message.into(),
        })
        .await;
    }

    async fn send_terminal(&self, event: RunEvent) {
        let Some(tx) = &self.tx else { return };
        if tx.send(event).await.is_err() {
            debug!(run_id = %self.run_id, "listener gone before terminal event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percents(rx: &mut mpsc::Receiver<RunEvent>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RunEvent::Progress(update) = event {
                out.push(update.percent);
            }
        }
        out
    }

    #[test]
    fn test_percent_never_decreases() {
        let (reporter, mut rx) = ProgressReporter::channel(Uuid::new_v4(), 16);
        reporter.report(PipelineStage::Preparing, 10, "a");
        reporter.report(PipelineStage::Generating, 60, "b");
        reporter.report(PipelineStage::Failed, 20, "c");

        assert_eq!(percents(&mut rx), vec![10, 60, 60]);
        assert_eq!(reporter.last_percent(), 60);
    }

    #[test]
    fn test_full_channel_drops_progress() {
        let (reporter, mut rx) = ProgressReporter::channel(Uuid::new_v4(), 1);
        reporter.report(PipelineStage::Preparing, 10, "kept");
        reporter.report(PipelineStage::Prompting, 20, "dropped");

        assert_eq!(percents(&mut rx), vec![10]);
        assert_eq!(reporter.last_percent(), 20);
    }

    #[tokio::test]
    async fn test_detached_reporter_is_silent() {
        let reporter = ProgressReporter::detached(Uuid::new_v4());
        reporter.report(PipelineStage::Preparing, 10, "nobody listens");
        reporter.fail("E_GENERATION", "still fine").await;
        assert_eq!(reporter.last_percent(), 10);
    }

    #[test]
    fn test_event_serialization() {
        let event = RunEvent::Failed {
            code: "E_EXTRACTION_EMPTY".to_string(),
            message: "nothing found".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["code"], "E_EXTRACTION_EMPTY");
    }
}
