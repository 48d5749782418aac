use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use walkdir::WalkDir;

/// A document discovered on disk, ready to hand to a storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub title: String,
    pub content: String,
    pub content_type: String,
}

pub struct FileReader;

impl FileReader {
    pub fn content_type_for(path: &Path) -> Option<&'static str> {
        let extension = path.extension().and_then(|e| e.to_str())?;

        match extension.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some("text/markdown"),
            "txt" => Some("text/plain"),
            "json" => Some("application/json"),
            "csv" => Some("text/csv"),
            _ => None,
        }
    }

    pub fn read_file(path: &Path) -> Result<SourceFile> {
        let content_type = Self::content_type_for(path).with_context(|| {
            format!("Unsupported file format: {}", path.display())
        })?;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;

        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string();

        Ok(SourceFile {
            path: path.to_string_lossy().to_string(),
            title,
            content,
            content_type: content_type.to_string(),
        })
    }

    /// Recursively read every supported file under `dir`, sorted by path.
    pub fn read_directory(dir: &Path) -> Result<Vec<SourceFile>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
            let path = entry.path();

            if !entry.file_type().is_file() || Self::content_type_for(path).is_none() {
                continue;
            }

            files.push(Self::read_file(path)?);
        }

        Ok(files)
    }
}
