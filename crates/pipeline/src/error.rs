use extract::{EngineError, Task};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("completion engine unavailable: {0}")]
    EngineInit(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("could not extract a graph from the documents; try fewer or shorter documents, or more specific instructions")]
    ExtractionEmpty,

    #[error("no documents to process")]
    NoDocuments,

    #[error("run cancelled")]
    Cancelled,

    #[error("task '{0}' is not supported here")]
    UnsupportedTask(Task),
}

impl PipelineError {
    /// Stable identifier for transports and clients
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::EngineInit(_) => "E_ENGINE_INIT",
            PipelineError::Generation(_) => "E_GENERATION",
            PipelineError::ExtractionEmpty => "E_EXTRACTION_EMPTY",
            PipelineError::NoDocuments => "E_NO_DOCUMENTS",
            PipelineError::Cancelled => "E_CANCELLED",
            PipelineError::UnsupportedTask(_) => "E_UNSUPPORTED_TASK",
        }
    }
}

impl From<EngineError> for PipelineError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Init(_) | EngineError::Unavailable => PipelineError::EngineInit(err.to_string()),
            other => PipelineError::Generation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        let err: PipelineError = EngineError::Unavailable.into();
        assert_eq!(err.code(), "E_ENGINE_INIT");

        let err: PipelineError = EngineError::Generation("boom".to_string()).into();
        assert_eq!(err.code(), "E_GENERATION");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_extraction_empty_is_actionable() {
        let message = PipelineError::ExtractionEmpty.to_string();
        assert!(message.starts_with("could not extract a graph"));
    }
}
