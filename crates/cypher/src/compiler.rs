use extract::{CompletionEngine, Entity, EntityType, RawGraph, Relationship, SamplingOptions, Task, TaskOutput};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Write};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::syntax::{check_syntax, contains_keyword};

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").unwrap());

/// Entity fields that are always written and must not be overwritten by a
/// free-form property of the same name.
const RESERVED_KEYS: [&str; 4] = ["id", "label", "description", "importance"];

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("script is empty")]
    Empty,

    #[error("script has an unbalanced '{0}'")]
    Unbalanced(char),

    #[error("script has an unterminated string literal")]
    UnterminatedString,

    #[error("script contains no recognised Cypher keyword")]
    NoKeyword,

    #[error("failed to render script: {0}")]
    Render(#[from] fmt::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStrategy {
    ModelAssisted,
    Deterministic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledScript {
    pub script: String,
    pub strategy: CompileStrategy,
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Skip the engine and go straight to the deterministic path
    pub use_model: bool,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            use_model: true,
            max_tokens: 4096,
            temperature: 0.1,
            timeout: Duration::from_secs(120),
        }
    }
}

impl CompileOptions {
    /// Scripts are plain text, so JSON output mode stays off.
    pub fn sampling(&self, defaults: &SamplingOptions) -> SamplingOptions {
        defaults.for_call(self.max_tokens, self.temperature, false)
    }
}

/// View of the graph handed to the model: only relationships it can load.
#[derive(Serialize)]
struct GraphPayload<'a> {
    entities: &'a [Entity],
    relationships: Vec<&'a Relationship>,
}

/// Compile a graph into an idempotent Cypher load script. The model is asked
/// first; its script is used only if it names a Cypher keyword and passes the
/// syntax check. Anything else falls through to `compile_deterministic`.
pub async fn compile_query_script(
    graph: &RawGraph,
    engine: &dyn CompletionEngine,
    options: &CompileOptions,
) -> Result<CompiledScript, CompileError> {
    if options.use_model && !graph.entities.is_empty() {
        match model_assisted(graph, engine, options).await {
            Some(script) => {
                info!(
                    entities = graph.entities.len(),
                    script_chars = script.len(),
                    "compiled graph with model assistance"
                );
                return Ok(CompiledScript {
                    script,
                    strategy: CompileStrategy::ModelAssisted,
                });
            }
            None => debug!("model-assisted compilation unusable, using deterministic compiler"),
        }
    }

    let script = compile_deterministic(graph)?;
    info!(entities = graph.entities.len(), "compiled graph deterministically");
    Ok(CompiledScript {
        script,
        strategy: CompileStrategy::Deterministic,
    })
}

async fn model_assisted(graph: &RawGraph, engine: &dyn CompletionEngine, options: &CompileOptions) -> Option<String> {
    let payload = GraphPayload {
        entities: &graph.entities,
        relationships: graph.resolved_relationships(),
    };
    let graph_json = match serde_json::to_string_pretty(&payload) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize graph for compilation prompt");
            return None;
        }
    };

    let prompt = extract::build_prompt(Task::CypherCompile, &graph_json, None);
    let sampling = options.sampling(&engine.sampling_defaults());
    let response = match tokio::time::timeout(options.timeout, engine.complete(&prompt.text, &sampling)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "compilation request failed");
            return None;
        }
        Err(_) => {
            warn!(timeout_secs = options.timeout.as_secs(), "compilation request timed out");
            return None;
        }
    };

    let TaskOutput::Script(script) = extract::parse(&response, &prompt.shape).into_output() else {
        return None;
    };

    if !contains_keyword(&script) {
        debug!(response_chars = response.len(), "model script has no Cypher keyword");
        return None;
    }
    if let Err(e) = check_syntax(&script) {
        debug!(error = %e, "model script failed syntax check");
        return None;
    }

    Some(script)
}

/// Script built directly from the graph, no model involved: uniqueness
/// constraints, node upserts, relationship upserts, then label indexes.
/// Relationships with an unknown endpoint are skipped.
pub fn compile_deterministic(graph: &RawGraph) -> Result<String, CompileError> {
    let types: BTreeSet<EntityType> = graph.entities.iter().map(|e| e.entity_type).collect();
    let labels: HashMap<&str, EntityType> = graph.entities.iter().map(|e| (e.id.as_str(), e.entity_type)).collect();

    let mut out = String::new();
    writeln!(
        out,
        "// Knowledge graph load script: {} entities, {} relationships",
        graph.entities.len(),
        graph.relationships.len()
    )?;

    if !types.is_empty() {
        writeln!(out, "\n// Constraints")?;
        for entity_type in &types {
            writeln!(
                out,
                "CREATE CONSTRAINT {}_id_unique IF NOT EXISTS FOR (n:{}) REQUIRE n.id IS UNIQUE;",
                entity_type.as_str(),
                node_label(*entity_type)
            )?;
        }
    }

    if !graph.entities.is_empty() {
        writeln!(out, "\n// Nodes")?;
        for entity in &graph.entities {
            write_node(&mut out, entity)?;
        }
    }

    let relationships = graph.resolved_relationships();
    if !relationships.is_empty() {
        writeln!(out, "\n// Relationships")?;
        for rel in relationships {
            let (Some(source), Some(target)) = (labels.get(rel.source.as_str()), labels.get(rel.target.as_str()))
            else {
                continue;
            };
            write_relationship(&mut out, rel, *source, *target)?;
        }
    }

    if !types.is_empty() {
        writeln!(out, "\n// Indexes")?;
        for entity_type in &types {
            writeln!(
                out,
                "CREATE INDEX {}_label_index IF NOT EXISTS FOR (n:{}) ON (n.label);",
                entity_type.as_str(),
                node_label(*entity_type)
            )?;
        }
    }

    Ok(out)
}

fn write_node(out: &mut String, entity: &Entity) -> fmt::Result {
    let mut assignments = vec![
        format!("n.label = {}", string_literal(&entity.label)),
        format!("n.importance = {}", float_literal(entity.importance)),
    ];
    if let Some(description) = &entity.description {
        assignments.push(format!("n.description = {}", string_literal(description)));
    }
    for (key, value) in &entity.properties {
        let key = property_key(key);
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(literal) = scalar_literal(value) {
            assignments.push(format!("n.{} = {}", key, literal));
        }
    }

    writeln!(
        out,
        "MERGE (n:{} {{id: {}}}) SET {};",
        node_label(entity.entity_type),
        string_literal(&entity.id),
        assignments.join(", ")
    )
}

fn write_relationship(out: &mut String, rel: &Relationship, source: EntityType, target: EntityType) -> fmt::Result {
    let mut assignments = vec![format!("r.weight = {}", float_literal(rel.weight))];
    if let Some(description) = &rel.description {
        assignments.push(format!("r.description = {}", string_literal(description)));
    }

    writeln!(
        out,
        "MATCH (a:{} {{id: {}}}), (b:{} {{id: {}}}) MERGE (a)-[r:{}]->(b) SET {};",
        node_label(source),
        string_literal(&rel.source),
        node_label(target),
        string_literal(&rel.target),
        relationship_type(&rel.relation_type),
        assignments.join(", ")
    )
}

pub fn node_label(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Person => "Person",
        EntityType::Organization => "Organization",
        EntityType::Location => "Location",
        EntityType::Concept => "Concept",
        EntityType::Event => "Event",
        EntityType::Other => "Other",
    }
}

/// Single-quoted Cypher string with backslashes, quotes and line breaks escaped.
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Upper-case, underscore-delimited relationship type: "works at" -> WORKS_AT.
pub fn relationship_type(raw: &str) -> String {
    let token = NON_WORD.replace_all(raw.trim(), "_").trim_matches('_').to_uppercase();
    if token.is_empty() {
        "RELATED_TO".to_string()
    } else if token.starts_with(|c: char| c.is_ascii_digit()) {
        format!("R_{}", token)
    } else {
        token
    }
}

fn property_key(raw: &str) -> String {
    let key = NON_WORD.replace_all(raw.trim(), "_").trim_matches('_').to_lowercase();
    if key.is_empty() {
        "property".to_string()
    } else if key.starts_with(|c: char| c.is_ascii_digit()) {
        format!("p_{}", key)
    } else {
        key
    }
}

fn float_literal(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// Literal for string, number and boolean values; nested values are skipped.
fn scalar_literal(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(string_literal(s)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
