//! Graph generation runs: documents in, knowledge graph and diagram out.

pub mod analyzer;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod progress;
pub mod request;

pub use analyzer::{AnalysisReport, DocumentAnalyzer};
pub use error::PipelineError;
pub use orchestrator::{GraphArtifact, GraphMetadata, GraphOrchestrator, PipelineConfig};
pub use progress::{PipelineStage, ProgressReporter, ProgressUpdate, RunEvent};
pub use request::{GenerationRequest, SourceDocument};
