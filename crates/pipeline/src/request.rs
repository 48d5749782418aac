use serde::{Deserialize, Serialize};

/// Input to one graph-generation run. Stored documents are referenced by id
/// and resolved by the caller; inline content is wrapped as an extra document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(default)]
    pub inline_content: Option<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl GenerationRequest {
    pub fn inline(content: impl Into<String>) -> Self {
        Self {
            inline_content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// The inline content as a document, if there is any
    pub fn inline_document(&self) -> Option<SourceDocument> {
        let content = self.inline_content.as_deref()?.trim();
        if content.is_empty() {
            return None;
        }
        Some(SourceDocument {
            id: "inline".to_string(),
            title: self.title.clone().unwrap_or_else(|| "Inline content".to_string()),
            content: content.to_string(),
            content_type: "text/plain".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub content_type: String,
}

impl SourceDocument {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            content_type: content_type.into(),
        }
    }
}

impl From<ingest::SourceFile> for SourceDocument {
    fn from(file: ingest::SourceFile) -> Self {
        Self {
            id: file.path,
            title: file.title,
            content: file.content,
            content_type: file.content_type,
        }
    }
}
