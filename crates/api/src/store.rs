use anyhow::{Context, Result};
use async_trait::async_trait;
use cypher::CompiledScript;
use dashmap::DashMap;
use extract::RawGraph;
use ingest::FileReader;
use pipeline::{GraphArtifact, GraphMetadata, SourceDocument};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredGraph {
    pub id: String,
    pub run_id: Uuid,
    pub title: Option<String>,
    pub graph: RawGraph,
    pub diagram: String,
    pub metadata: GraphMetadata,
    pub script: Option<CompiledScript>,
}

/// Fields a caller may change after a graph is saved.
#[derive(Debug, Clone, Default)]
pub struct GraphUpdate {
    pub title: Option<String>,
    pub script: Option<CompiledScript>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreCounts {
    pub documents: usize,
    pub graphs: usize,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_document(&self, document: SourceDocument) -> Result<String>;

    async fn find_document_by_id(&self, id: &str) -> Result<Option<SourceDocument>>;

    async fn save_graph(&self, artifact: &GraphArtifact) -> Result<String>;

    async fn find_graph(&self, id: &str) -> Result<Option<StoredGraph>>;

    /// Returns the updated graph, or `None` if there is no graph with this id.
    async fn update_graph(&self, id: &str, update: GraphUpdate) -> Result<Option<StoredGraph>>;

    async fn counts(&self) -> Result<StoreCounts>;
}

#[derive(Default)]
pub struct MemoryStore {
    documents: DashMap<String, SourceDocument>,
    graphs: DashMap<String, StoredGraph>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every supported file under `dir` as a document. Returns the count.
    pub fn load_directory(&self, dir: &Path) -> Result<usize> {
        let files = FileReader::read_directory(dir)
            .with_context(|| format!("Failed to load documents from {}", dir.display()))?;
        let count = files.len();

        for file in files {
            let document = SourceDocument::from(file);
            self.documents.insert(document.id.clone(), document);
        }

        info!(dir = %dir.display(), documents = count, "loaded documents");
        Ok(count)
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn save_document(&self, mut document: SourceDocument) -> Result<String> {
        if document.id.trim().is_empty() {
            document.id = Uuid::new_v4().to_string();
        }
        let id = document.id.clone();
        self.documents.insert(id.clone(), document);
        Ok(id)
    }

    async fn find_document_by_id(&self, id: &str) -> Result<Option<SourceDocument>> {
        Ok(self.documents.get(id).map(|d| d.clone()))
    }

    async fn save_graph(&self, artifact: &GraphArtifact) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let stored = StoredGraph {
            id: id.clone(),
            run_id: artifact.run_id,
            title: artifact.title.clone(),
            graph: artifact.graph.clone(),
            diagram: artifact.diagram.clone(),
            metadata: artifact.metadata.clone(),
            script: None,
        };
        self.graphs.insert(id.clone(), stored);
        Ok(id)
    }

    async fn find_graph(&self, id: &str) -> Result<Option<StoredGraph>> {
        Ok(self.graphs.get(id).map(|g| g.clone()))
    }

    async fn update_graph(&self, id: &str, update: GraphUpdate) -> Result<Option<StoredGraph>> {
        let Some(mut stored) = self.graphs.get_mut(id) else {
            return Ok(None);
        };
        if let Some(title) = update.title {
            stored.title = Some(title);
        }
        if let Some(script) = update.script {
            stored.script = Some(script);
        }
        Ok(Some(stored.clone()))
    }

    async fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            documents: self.documents.len(),
            graphs: self.graphs.len(),
        })
    }
}
