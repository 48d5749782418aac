use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::{Chunk, estimate_tokens};
use crate::flatten;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Markdown-like text with headings
    StructuredText,
    /// JSON or CSV
    TabularData,
    PlainText,
}

impl ContentKind {
    /// Pick a kind from a MIME type or a bare file extension.
    pub fn from_content_type(content_type: &str) -> Self {
        let ct = content_type.trim().to_ascii_lowercase();
        let ct = ct.split(';').next().unwrap_or("").trim();

        match ct {
            "text/markdown" | "text/x-markdown" | "markdown" | "md" => ContentKind::StructuredText,
            "application/json" | "text/csv" | "json" | "csv" => ContentKind::TabularData,
            _ => ContentKind::PlainText,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub chunk_size_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 3000,
            overlap_tokens: 200,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

/// A sentence and its byte offset in the text being split.
#[derive(Clone, Copy)]
struct Unit<'a> {
    start: usize,
    text: &'a str,
    tokens: usize,
}

struct Section<'a> {
    start: usize,
    text: &'a str,
    label: Option<String>,
}

/// Byte offsets of every newline, for mapping offsets to 1-based line numbers.
struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        Self {
            newlines: text.match_indices('\n').map(|(i, _)| i).collect(),
        }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.newlines.partition_point(|&nl| nl < offset) + 1
    }

    fn range(&self, start: usize, end: usize) -> (usize, usize) {
        (self.line_of(start), self.line_of(end.saturating_sub(1).max(start)))
    }
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `content` into ordered chunks. Never fails: tabular input that
    /// does not parse is split as plain text.
    pub fn chunk(&self, content: &str, kind: ContentKind) -> Vec<Chunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();

        match kind {
            ContentKind::StructuredText => self.chunk_structured(content, &mut chunks),
            ContentKind::TabularData => match flatten::render_tabular(content) {
                Some(rendered) => self.pack(&rendered, 0, None, None, &mut chunks),
                None => {
                    debug!("tabular input did not parse, splitting as plain text");
                    let lines = LineIndex::new(content);
                    self.pack(content, 0, None, Some(&lines), &mut chunks);
                }
            },
            ContentKind::PlainText => {
                let lines = LineIndex::new(content);
                self.pack(content, 0, None, Some(&lines), &mut chunks);
            }
        }

        debug!(chunks = chunks.len(), kind = ?kind, "chunked content");
        chunks
    }

    fn chunk_structured(&self, text: &str, chunks: &mut Vec<Chunk>) {
        let lines = LineIndex::new(text);

        for section in self.split_by_headings(text) {
            if estimate_tokens(section.text) <= self.config.chunk_size_tokens {
                let end = section.start + section.text.len();
                chunks.push(Chunk::new(
                    chunks.len(),
                    section.text.to_string(),
                    section.label.clone(),
                    Some(lines.range(section.start, end)),
                    0,
                ));
                continue;
            }

            self.pack(section.text, section.start, section.label.as_deref(), Some(&lines), chunks);
        }
    }

    /// Sections start at markdown headings. Headings inside fenced code blocks
    /// are ignored, and whitespace-only preambles are folded into the next section.
    fn split_by_headings<'a>(&self, text: &'a str) -> Vec<Section<'a>> {
        let mut sections = Vec::new();
        let mut current_start = 0;
        let mut current_label: Option<String> = None;
        let mut in_fence = false;
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim_start();

            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
            } else if !in_fence {
                if let Some(label) = heading_label(trimmed) {
                    let pending = &text[current_start..offset];
                    if pending.trim().is_empty() {
                        current_label = Some(label);
                    } else {
                        sections.push(Section {
                            start: current_start,
                            text: pending,
                            label: current_label.replace(label),
                        });
                        current_start = offset;
                    }
                }
            }

            offset += line.len();
        }

        if current_start < text.len() {
            sections.push(Section {
                start: current_start,
                text: &text[current_start..],
                label: current_label,
            });
        }

        sections
    }

    /// Split into sentences, packing greedily up to the budget and carrying
    /// trailing sentences worth at most `overlap_tokens` into the next chunk.
    fn pack(
        &self,
        text: &str,
        base_offset: usize,
        section: Option<&str>,
        lines: Option<&LineIndex>,
        chunks: &mut Vec<Chunk>,
    ) {
        let budget = self.config.chunk_size_tokens.max(1);
        let units = self.split_units(text);

        let mut current: Vec<Unit> = Vec::new();
        let mut current_tokens = 0;
        let mut fresh = 0;

        for unit in units {
            if !current.is_empty() && current_tokens + unit.tokens > budget {
                if fresh > 0 {
                    self.flush(text, base_offset, section, lines, &current, fresh, chunks);

                    let carried = self.overlap_tail(&current);
                    current.drain(..current.len() - carried);
                    current_tokens = current.iter().map(|u| u.tokens).sum();
                    fresh = 0;
                }

                // Carried context never pushes a fresh sentence out of its chunk
                while !current.is_empty() && current_tokens + unit.tokens > budget {
                    let dropped = current.remove(0);
                    current_tokens -= dropped.tokens;
                }
            }

            current_tokens += unit.tokens;
            current.push(unit);
            fresh += 1;
        }

        if fresh > 0 {
            self.flush(text, base_offset, section, lines, &current, fresh, chunks);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn flush(
        &self,
        text: &str,
        base_offset: usize,
        section: Option<&str>,
        lines: Option<&LineIndex>,
        units: &[Unit],
        fresh: usize,
        chunks: &mut Vec<Chunk>,
    ) {
        let (Some(first), Some(last)) = (units.first(), units.last()) else {
            return;
        };
        let start = first.start;
        let end = last.start + last.text.len();
        let overlap: usize = units[..units.len() - fresh].iter().map(|u| u.text.len()).sum();

        chunks.push(Chunk::new(
            chunks.len(),
            text[start..end].to_string(),
            section.map(str::to_string),
            lines.map(|l| l.range(base_offset + start, base_offset + end)),
            overlap,
        ));
    }

    /// Number of trailing units to carry over. Never the whole chunk.
    fn overlap_tail(&self, units: &[Unit]) -> usize {
        let mut tokens = 0;
        let mut count = 0;

        for unit in units.iter().rev() {
            if count + 1 >= units.len() || tokens + unit.tokens > self.config.overlap_tokens {
                break;
            }
            tokens += unit.tokens;
            count += 1;
        }

        count
    }

    fn split_units<'a>(&self, text: &'a str) -> Vec<Unit<'a>> {
        let mut offset = 0;

        text.split_sentence_bounds()
            .map(|sentence| {
                let unit = Unit {
                    start: offset,
                    text: sentence,
                    tokens: estimate_tokens(sentence),
                };
                offset += sentence.len();
                unit
            })
            .collect()
    }
}

fn heading_label(line: &str) -> Option<String> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }

    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let label = rest.trim().trim_end_matches('#').trim();
    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}
