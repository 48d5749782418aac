use extract::parser::fallback;
use extract::{CompletionEngine, Task, TaskOutput, build_prompt};
use ingest::{Chunker, ChunkerConfig, ContentKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::merge;
use crate::orchestrator::PipelineConfig;
use crate::request::SourceDocument;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub task: Task,
    pub document_id: String,
    pub output: TaskOutput,
    pub chunks_processed: usize,
    /// Chunks whose response could not be used
    pub fallback_chunks: usize,
    pub model_identifier: String,
    pub processing_time_ms: u64,
}

/// Runs a single-document task chunk by chunk and merges the results.
pub struct DocumentAnalyzer {
    engine: Arc<dyn CompletionEngine>,
    chunker: Chunker,
    config: PipelineConfig,
}

impl DocumentAnalyzer {
    pub fn new(engine: Arc<dyn CompletionEngine>, chunker: ChunkerConfig, config: PipelineConfig) -> Self {
        Self {
            engine,
            chunker: Chunker::new(chunker),
            config,
        }
    }

    pub async fn analyze(
        &self,
        task: Task,
        document: &SourceDocument,
        instructions: Option<&str>,
    ) -> Result<AnalysisReport, PipelineError> {
        if task == Task::CypherCompile {
            return Err(PipelineError::UnsupportedTask(task));
        }

        let started = Instant::now();
        let kind = ContentKind::from_content_type(&document.content_type);
        let chunks = self.chunker.chunk(&document.content, kind);
        if chunks.is_empty() {
            return Err(PipelineError::NoDocuments);
        }

        info!(task = %task, document_id = %document.id, chunks = chunks.len(), "analyzing document");

        let sampling = self.config.sampling(&self.engine.sampling_defaults());
        let timeout = self.config.generation_timeout();
        let mut parsed: Vec<(TaskOutput, usize)> = Vec::with_capacity(chunks.len());
        let mut fallback_chunks = 0;
        let mut last_response = String::new();

        for chunk in &chunks {
            let prompt = build_prompt(task, &chunk.content, instructions);
            let response = tokio::time::timeout(timeout, self.engine.complete(&prompt.text, &sampling))
                .await
                .map_err(|_| PipelineError::Generation(format!("no response within {}s", timeout.as_secs())))??;

            let outcome = extract::parse(&response, &prompt.shape);
            if outcome.is_fallback() {
                debug!(chunk = chunk.index, "chunk response unusable");
                fallback_chunks += 1;
            } else {
                parsed.push((outcome.into_output(), chunk.estimated_tokens));
            }
            last_response = response;
        }

        let output = if parsed.is_empty() {
            fallback(task, &last_response)
        } else {
            merge_outputs(task, parsed)
        };

        Ok(AnalysisReport {
            task,
            document_id: document.id.clone(),
            output,
            chunks_processed: chunks.len(),
            fallback_chunks,
            model_identifier: self.engine.model_id().to_string(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn merge_outputs(task: Task, parts: Vec<(TaskOutput, usize)>) -> TaskOutput {
    let mut summaries = Vec::new();
    let mut entities = Vec::new();
    let mut sentiments = Vec::new();
    let mut keywords = Vec::new();
    let mut graphs = Vec::new();
    let mut answers = Vec::new();
    let mut scripts = Vec::new();

    for (output, weight) in parts {
        match output {
            TaskOutput::Summary(s) => summaries.push(s),
            TaskOutput::Entities(e) => entities.push(e),
            TaskOutput::Sentiment(s) => sentiments.push((s, weight)),
            TaskOutput::Keywords(k) => keywords.push(k),
            TaskOutput::Graph(g) => graphs.push(g),
            TaskOutput::Answer(a) => answers.push(a),
            TaskOutput::Script(s) => scripts.push(s),
        }
    }

    match task {
        Task::Summarize => TaskOutput::Summary(merge::merge_summaries(summaries)),
        Task::ExtractEntities => TaskOutput::Entities(merge::merge_entities(entities)),
        Task::AnalyzeSentiment => TaskOutput::Sentiment(merge::merge_sentiment(sentiments)),
        Task::GenerateKeywords => TaskOutput::Keywords(merge::merge_keywords(keywords)),
        Task::ExtractRelationships | Task::KnowledgeGraph => TaskOutput::Graph(merge::merge_graphs(graphs)),
        Task::FreeQuery => merge::merge_answers(answers)
            .map(TaskOutput::Answer)
            .unwrap_or_else(|| fallback(task, "")),
        Task::CypherCompile => TaskOutput::Script(scripts.join("\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::testing::ScriptedEngine;

    fn small_chunks() -> ChunkerConfig {
        ChunkerConfig {
            chunk_size_tokens: 30,
            overlap_tokens: 0,
        }
    }

    fn analyzer(engine: ScriptedEngine) -> DocumentAnalyzer {
        DocumentAnalyzer::new(Arc::new(engine), small_chunks(), PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_cypher_task_rejected() {
        let analyzer = analyzer(ScriptedEngine::replying("{}"));
        let doc = SourceDocument::new("d1", "Doc", "Some text.", "text/plain");

        let err = analyzer.analyze(Task::CypherCompile, &doc, None).await.unwrap_err();
        assert_eq!(err.code(), "E_UNSUPPORTED_TASK");
    }

    #[tokio::test]
    async fn test_keywords_merged_across_chunks() {
        let engine = ScriptedEngine::new()
            .then_reply(r#"{"keywords": ["rust", "graphs"]}"#)
            .then_reply(r#"Sure! {"keywords": ["Graphs", "neo4j"]}"#);
        let analyzer = analyzer(engine);
        let content = "Rust is a systems language with a strong type system and ownership. \
                       Knowledge graphs connect entities through typed relationships for querying.";
        let doc = SourceDocument::new("d1", "Doc", content, "text/plain");

        let report = analyzer.analyze(Task::GenerateKeywords, &doc, None).await.unwrap();

        assert_eq!(report.chunks_processed, 2);
        assert_eq!(report.fallback_chunks, 0);
        assert_eq!(
            report.output,
            TaskOutput::Keywords(vec!["rust".to_string(), "graphs".to_string(), "neo4j".to_string()])
        );
    }

    #[tokio::test]
    async fn test_all_fallback_uses_task_fallback() {
        let analyzer = analyzer(ScriptedEngine::replying("The text is upbeat overall."));
        let doc = SourceDocument::new("d1", "Doc", "What a great day.", "text/plain");

        let report = analyzer.analyze(Task::AnalyzeSentiment, &doc, None).await.unwrap();

        assert_eq!(report.fallback_chunks, 1);
        let TaskOutput::Sentiment(sentiment) = report.output else {
            panic!("expected sentiment output");
        };
        assert_eq!(sentiment.sentiment, "neutral");
    }

    #[tokio::test]
    async fn test_engine_failure_fails_analysis() {
        let analyzer = analyzer(ScriptedEngine::new().then_fail("out of memory"));
        let doc = SourceDocument::new("d1", "Doc", "Short.", "text/plain");

        let err = analyzer.analyze(Task::Summarize, &doc, None).await.unwrap_err();
        assert_eq!(err.code(), "E_GENERATION");
    }
}
