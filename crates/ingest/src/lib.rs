pub mod chunk;
pub mod chunker;
pub mod flatten;
pub mod reader;

pub use chunk::{Chunk, estimate_tokens};
pub use chunker::{Chunker, ChunkerConfig, ContentKind};
pub use reader::{FileReader, SourceFile};

/// Chunk with the default configuration (3000-token chunks, 200-token overlap)
pub fn chunk(content: &str, kind: ContentKind) -> Vec<Chunk> {
    Chunker::new(ChunkerConfig::default()).chunk(content, kind)
}
