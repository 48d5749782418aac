pub mod ids;
pub mod llm;
pub mod parser;
pub mod prompt;
pub mod schema;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use llm::{Acceleration, CompletionEngine, EngineConfig, EngineError, OllamaEngine, SamplingOptions};
pub use parser::{ParseOutcome, TaskOutput, parse};
pub use prompt::{BuiltPrompt, ExpectedShape, PromptDocument, Task, build_graph_prompt, build_prompt};
pub use schema::{
    Entity, EntityType, QueryAnswer, RawGraph, Relationship, SentimentResult, SummaryResult,
};
