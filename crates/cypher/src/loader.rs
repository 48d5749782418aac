use anyhow::{Context, Result};
use neo4rs::{Graph, query};
use tracing::{debug, info};

use crate::syntax::split_statements;

/// Runs compiled scripts against Neo4j, one statement at a time. Schema
/// statements cannot share a transaction with writes, so nothing is batched.
pub struct ScriptLoader {
    graph: Graph,
}

impl ScriptLoader {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .with_context(|| format!("Failed to connect to Neo4j at {}", uri))?;
        info!(uri, "connected to Neo4j");
        Ok(Self::new(graph))
    }

    /// Execute every statement in order. Returns the number executed.
    pub async fn load(&self, script: &str) -> Result<usize> {
        let statements = split_statements(script);

        for (i, statement) in statements.iter().enumerate() {
            debug!(index = i, statement = %statement, "running statement");
            self.graph
                .run(query(statement))
                .await
                .with_context(|| format!("Statement {} failed: {}", i + 1, statement))?;
        }

        info!(statements = statements.len(), "script loaded into Neo4j");
        Ok(statements.len())
    }
}
