use diagram::DiagramLimits;
use extract::{CompletionEngine, PromptDocument, RawGraph, SamplingOptions, build_graph_prompt};
use ingest::estimate_tokens;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::progress::{PipelineStage, ProgressReporter};
use crate::request::{GenerationRequest, SourceDocument};

const GENERATION_START: u8 = 40;
const GENERATION_END: u8 = 80;
const GENERATION_STEP: u8 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Characters of each document shown to the model
    pub excerpt_chars: usize,
    pub max_tokens: usize,
    pub temperature: f32,
    pub generation_timeout_secs: u64,
    /// How often progress ticks while the model is generating
    pub progress_tick_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            excerpt_chars: 3000,
            max_tokens: 8192,
            temperature: 0.1,
            generation_timeout_secs: 300,
            progress_tick_ms: 2000,
        }
    }
}

impl PipelineConfig {
    /// Per-call options for structured output, layered over the engine's defaults.
    pub fn sampling(&self, defaults: &SamplingOptions) -> SamplingOptions {
        defaults.for_call(self.max_tokens, self.temperature, true)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms.max(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub processing_time_ms: u64,
    pub approximate_tokens_used: usize,
    pub model_identifier: String,
    pub document_count: usize,
    pub truncated_documents: usize,
}

/// A successful run: the graph, its diagram and how it was made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphArtifact {
    pub run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub graph: RawGraph,
    pub diagram: String,
    pub metadata: GraphMetadata,
}

/// Runs graph generation against a shared engine. Cheap to clone; every run
/// builds its own graph and shares nothing with concurrent runs.
#[derive(Clone)]
pub struct GraphOrchestrator {
    engine: Arc<dyn CompletionEngine>,
    config: PipelineConfig,
    limits: DiagramLimits,
}

impl GraphOrchestrator {
    pub fn new(engine: Arc<dyn CompletionEngine>, config: PipelineConfig) -> Self {
        Self {
            engine,
            config,
            limits: DiagramLimits::default(),
        }
    }

    pub fn with_diagram_limits(mut self, limits: DiagramLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn engine(&self) -> &Arc<dyn CompletionEngine> {
        &self.engine
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Extract one graph from `documents` plus any inline content in the
    /// request. Always ends with a `Done` or `Failed` progress update.
    /// Cancellation only interrupts generation.
    pub async fn generate_graph(
        &self,
        request: &GenerationRequest,
        documents: Vec<SourceDocument>,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<GraphArtifact, PipelineError> {
        let run_id = reporter.run_id();
        reporter.report(PipelineStage::Queued, 0, "Run accepted");

        match self.run(request, documents, reporter, cancel).await {
            Ok(artifact) => {
                info!(
                    run_id = %run_id,
                    entities = artifact.graph.entities.len(),
                    relationships = artifact.graph.relationships.len(),
                    elapsed_ms = artifact.metadata.processing_time_ms,
                    "graph generation finished"
                );
                reporter.report(PipelineStage::Done, 100, "Graph ready");
                Ok(artifact)
            }
            Err(e) => {
                warn!(run_id = %run_id, code = e.code(), error = %e, "graph generation failed");
                reporter.report(PipelineStage::Failed, reporter.last_percent(), e.to_string());
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &GenerationRequest,
        mut documents: Vec<SourceDocument>,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<GraphArtifact, PipelineError> {
        let started = Instant::now();

        if !self.engine.is_available() {
            return Err(PipelineError::EngineInit("engine has been disposed".to_string()));
        }

        documents.extend(request.inline_document());
        if documents.is_empty() {
            return Err(PipelineError::NoDocuments);
        }

        reporter.report(
            PipelineStage::Preparing,
            10,
            format!("Preparing {} document(s)", documents.len()),
        );
        let excerpts: Vec<PromptDocument> = documents
            .iter()
            .map(|doc| excerpt(doc, self.config.excerpt_chars))
            .collect();
        let truncated = excerpts.iter().filter(|d| d.truncated_from.is_some()).count();

        let instructions = Some(request.instructions.as_str()).filter(|s| !s.trim().is_empty());
        let prompt = build_graph_prompt(&excerpts, instructions);
        reporter.report(PipelineStage::Prompting, 20, "Prompt built");

        reporter.report(PipelineStage::Generating, GENERATION_START, "Generating graph");
        let response = self.generate(&prompt.text, reporter, cancel).await?;

        reporter.report(PipelineStage::Parsing, 85, "Parsing model response");
        let outcome = extract::parse(&response, &prompt.shape);
        if outcome.is_fallback() {
            warn!(
                run_id = %reporter.run_id(),
                response_chars = response.len(),
                "model response held no usable graph"
            );
            return Err(PipelineError::ExtractionEmpty);
        }
        let graph = outcome.into_graph().unwrap_or_default();
        if graph.entities.is_empty() {
            return Err(PipelineError::ExtractionEmpty);
        }

        reporter.report(
            PipelineStage::Visualizing,
            90,
            format!(
                "Extracted {} entities and {} relationships",
                graph.entities.len(),
                graph.relationships.len()
            ),
        );
        let diagram = diagram::render(&graph, &self.limits);

        Ok(GraphArtifact {
            run_id: reporter.run_id(),
            title: request.title.clone(),
            graph,
            diagram,
            metadata: GraphMetadata {
                processing_time_ms: started.elapsed().as_millis() as u64,
                approximate_tokens_used: estimate_tokens(&prompt.text) + estimate_tokens(&response),
                model_identifier: self.engine.model_id().to_string(),
                document_count: documents.len(),
                truncated_documents: truncated,
            },
        })
    }

    /// The run's single suspension point, bounded by the configured timeout
    /// and interruptible by `cancel`.
    async fn generate(
        &self,
        prompt: &str,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let sampling = self.config.sampling(&self.engine.sampling_defaults());
        let timeout = self.config.generation_timeout();
        let generation = tokio::time::timeout(timeout, self.engine.complete(prompt, &sampling));
        tokio::pin!(generation);

        let tick = self.config.progress_tick();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
        let mut percent = GENERATION_START;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                outcome = &mut generation => {
                    return match outcome {
                        Ok(Ok(text)) => Ok(text),
                        Ok(Err(e)) => Err(e.into()),
                        Err(_) => Err(PipelineError::Generation(format!(
                            "no response within {}s",
                            timeout.as_secs()
                        ))),
                    };
                }
                _ = ticker.tick() => {
                    if percent < GENERATION_END {
                        percent = (percent + GENERATION_STEP).min(GENERATION_END);
                        reporter.report(PipelineStage::Generating, percent, "Generating graph");
                    }
                }
            }
        }
    }
}

fn excerpt(doc: &SourceDocument, max_chars: usize) -> PromptDocument {
    let total = doc.content.chars().count();
    let (excerpt, truncated_from) = if total > max_chars {
        (doc.content.chars().take(max_chars).collect(), Some(total))
    } else {
        (doc.content.clone(), None)
    };

    PromptDocument {
        id: doc.id.clone(),
        title: doc.title.clone(),
        content_type: doc.content_type.clone(),
        excerpt,
        truncated_from,
    }
}
