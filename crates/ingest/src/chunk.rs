use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Rough characters-per-token ratio used for all budget estimates.
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub index: usize,
    pub content: String,
    pub estimated_tokens: usize,
    /// Heading of the section this chunk came from, when the source had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// 1-based inclusive line range in the source text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<(usize, usize)>,
    /// Byte length of the prefix repeated from the previous chunk
    #[serde(default)]
    pub overlap: usize,
}

impl Chunk {
    pub fn new(
        index: usize,
        content: String,
        section: Option<String>,
        line_range: Option<(usize, usize)>,
        overlap: usize,
    ) -> Self {
        let chunk_id = Self::generate_chunk_id(index, &content);
        let estimated_tokens = estimate_tokens(&content);

        Self {
            chunk_id,
            index,
            content,
            estimated_tokens,
            section,
            line_range,
            overlap,
        }
    }

    fn generate_chunk_id(index: usize, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(index.to_string().as_bytes());
        hasher.update(text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }

    /// The part of the chunk that was not carried over from its predecessor.
    pub fn fresh_content(&self) -> &str {
        self.content.get(self.overlap..).unwrap_or("")
    }
}

/// Estimate token count (rough: ~4 characters per token, rounded up)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[test]
    fn chunk_id_is_stable() {
        let a = Chunk::new(0, "hello".into(), None, None, 0);
        let b = Chunk::new(0, "hello".into(), None, None, 0);
        let c = Chunk::new(1, "hello".into(), None, None, 0);
        assert_eq!(a.chunk_id, b.chunk_id);
        assert_ne!(a.chunk_id, c.chunk_id);
        assert_eq!(a.chunk_id.len(), 32);
    }

    #[test]
    fn fresh_content_skips_overlap() {
        let chunk = Chunk::new(1, "Carried. New text.".into(), None, None, 9);
        assert_eq!(chunk.fresh_content(), "New text.");
    }
}
