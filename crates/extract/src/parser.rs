//! Recovery of structured data from model output that is only probably well formed.
//!
//! `parse` never fails. It either returns the decoded, validated and
//! backfilled result (`ParseOutcome::Parsed`) or the task's typed fallback
//! (`ParseOutcome::Fallback`), so callers always get a value of the shape they
//! asked for.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::ids::{IdRegistry, normalize_label};
use crate::prompt::{ExpectedShape, FieldKind, OutputFormat, Task};
use crate::schema::{
    DEFAULT_RELATION_TYPE, DEFAULT_SCORE, Entity, EntityType, Properties, QueryAnswer, RawGraph,
    Relationship, SentimentResult, SummaryResult, clamp_score,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TaskOutput {
    Summary(SummaryResult),
    Entities(Vec<Entity>),
    Sentiment(SentimentResult),
    Keywords(Vec<String>),
    /// Output of both relationship extraction and knowledge-graph extraction
    Graph(RawGraph),
    Script(String),
    Answer(QueryAnswer),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(TaskOutput),
    Fallback(TaskOutput),
}

impl ParseOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ParseOutcome::Fallback(_))
    }

    pub fn output(&self) -> &TaskOutput {
        match self {
            ParseOutcome::Parsed(output) | ParseOutcome::Fallback(output) => output,
        }
    }

    pub fn into_output(self) -> TaskOutput {
        match self {
            ParseOutcome::Parsed(output) | ParseOutcome::Fallback(output) => output,
        }
    }

    /// The graph, for graph-shaped tasks
    pub fn into_graph(self) -> Option<RawGraph> {
        match self.into_output() {
            TaskOutput::Graph(graph) => Some(graph),
            _ => None,
        }
    }
}

pub fn parse(raw: &str, shape: &ExpectedShape) -> ParseOutcome {
    match shape.format {
        OutputFormat::Script => parse_script(raw),
        OutputFormat::Json => match locate_document(raw, shape) {
            Some(document) => ParseOutcome::Parsed(decode(shape.task, &document, raw)),
            None => {
                debug!(task = %shape.task, response_chars = raw.len(), "no usable structured span, using fallback");
                ParseOutcome::Fallback(fallback(shape.task, raw))
            }
        },
    }
}

/// The value every task degrades to when the response cannot be used.
pub fn fallback(task: Task, raw: &str) -> TaskOutput {
    match task {
        Task::Summarize => TaskOutput::Summary(SummaryResult {
            summary: raw.trim().to_string(),
            key_points: Vec::new(),
            word_count: raw.split_whitespace().count(),
        }),
        Task::ExtractEntities => TaskOutput::Entities(Vec::new()),
        Task::AnalyzeSentiment => TaskOutput::Sentiment(SentimentResult {
            sentiment: "neutral".to_string(),
            score: 0.0,
            confidence: 0.0,
        }),
        Task::GenerateKeywords => TaskOutput::Keywords(Vec::new()),
        Task::ExtractRelationships | Task::KnowledgeGraph => TaskOutput::Graph(RawGraph::default()),
        Task::CypherCompile => TaskOutput::Script(String::new()),
        Task::FreeQuery => TaskOutput::Answer(QueryAnswer {
            answer: raw.trim().to_string(),
            confidence: 0.0,
        }),
    }
}

/// Top-level bracketed spans in order of appearance. Brackets inside JSON
/// strings are ignored and unterminated spans are skipped.
pub fn structured_spans(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' && bytes[i] != b'[' {
            i += 1;
            continue;
        }

        match span_end(bytes, i) {
            Some(end) => {
                spans.push(&text[i..=end]);
                i = end + 1;
            }
            None => i += 1,
        }
    }

    spans
}

fn span_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

/// First span that decodes strictly and satisfies the shape.
fn locate_document(raw: &str, shape: &ExpectedShape) -> Option<Map<String, Value>> {
    structured_spans(raw).into_iter().find_map(|span| {
        let value = serde_json::from_str::<Value>(span).ok()?;
        let object = match value {
            Value::Object(map) => map,
            Value::Array(items) => wrap_array(items, shape)?,
            _ => return None,
        };
        satisfies(&object, shape).then_some(object)
    })
}

/// A bare array is accepted for shapes with a single required list field.
fn wrap_array(items: Vec<Value>, shape: &ExpectedShape) -> Option<Map<String, Value>> {
    match shape.required {
        [field] if field.kind == FieldKind::List => {
            let mut map = Map::new();
            map.insert(field.name.to_string(), Value::Array(items));
            Some(map)
        }
        _ => None,
    }
}

fn satisfies(object: &Map<String, Value>, shape: &ExpectedShape) -> bool {
    shape.required.iter().all(|field| {
        matches!(
            (field.kind, object.get(field.name)),
            (FieldKind::Text, Some(Value::String(_)))
                | (FieldKind::Number, Some(Value::Number(_)))
                | (FieldKind::List, Some(Value::Array(_)))
                | (FieldKind::Object, Some(Value::Object(_)))
        )
    })
}

fn decode(task: Task, doc: &Map<String, Value>, raw: &str) -> TaskOutput {
    match task {
        Task::Summarize => {
            let summary = text_field(doc, &["summary"]).unwrap_or_default();
            let word_count = doc
                .get("word_count")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or_else(|| raw.split_whitespace().count());
            TaskOutput::Summary(SummaryResult {
                summary,
                key_points: string_list(doc.get("key_points")),
                word_count,
            })
        }
        Task::ExtractEntities => {
            let mut ids = IdRegistry::new();
            TaskOutput::Entities(decode_entities(doc.get("entities"), &mut ids))
        }
        Task::AnalyzeSentiment => TaskOutput::Sentiment(SentimentResult {
            sentiment: text_field(doc, &["sentiment"])
                .map(|s| s.to_lowercase())
                .unwrap_or_else(|| "neutral".to_string()),
            score: doc
                .get("score")
                .and_then(Value::as_f64)
                .map(|s| s.clamp(-1.0, 1.0))
                .unwrap_or(0.0),
            confidence: score_field(doc.get("confidence")).unwrap_or(0.0),
        }),
        Task::GenerateKeywords => TaskOutput::Keywords(string_list(doc.get("keywords"))),
        Task::ExtractRelationships | Task::KnowledgeGraph => TaskOutput::Graph(decode_graph(doc)),
        Task::CypherCompile => TaskOutput::Script(raw.trim().to_string()),
        Task::FreeQuery => TaskOutput::Answer(QueryAnswer {
            answer: text_field(doc, &["answer"]).unwrap_or_default(),
            confidence: score_field(doc.get("confidence")).unwrap_or(0.0),
        }),
    }
}

fn decode_graph(doc: &Map<String, Value>) -> RawGraph {
    let mut entity_ids = IdRegistry::new();
    let entities = decode_entities(doc.get("entities"), &mut entity_ids);

    let known: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    let by_label: HashMap<String, &str> = entities
        .iter()
        .map(|e| (normalize_label(&e.label), e.id.as_str()))
        .collect();

    // Endpoints that name an entity by label instead of id point at that entity
    let resolve = |endpoint: String| -> String {
        if known.contains(endpoint.as_str()) {
            return endpoint;
        }
        by_label
            .get(&normalize_label(&endpoint))
            .map(|id| id.to_string())
            .unwrap_or(endpoint)
    };

    // Relationship ids live in their own namespace
    let mut relationship_ids = IdRegistry::new();
    let relationships = decode_relationships(doc.get("relationships"), &mut relationship_ids)
        .into_iter()
        .map(|mut rel| {
            rel.source = resolve(std::mem::take(&mut rel.source));
            rel.target = resolve(std::mem::take(&mut rel.target));
            rel
        })
        .collect();

    RawGraph {
        entities,
        relationships,
        summary: text_field(doc, &["summary"]).filter(|s| !s.is_empty()),
        themes: string_list(doc.get("themes")),
    }
}

fn decode_entities(value: Option<&Value>, ids: &mut IdRegistry) -> Vec<Entity> {
    let items = value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();

    // Explicit ids win over synthesized ones, in order of first appearance
    let explicit: Vec<Option<String>> = items
        .iter()
        .map(|item| item.as_object().and_then(|o| id_field(o)))
        .collect();
    let mut kept: Vec<Option<String>> = explicit
        .iter()
        .map(|id| {
            let id = id.as_deref()?;
            (!ids.contains(id)).then(|| ids.claim(Some(id), "entity"))
        })
        .collect();

    let mut entities = Vec::with_capacity(items.len());
    for (item, kept_id) in items.iter().zip(kept.iter_mut()) {
        let entity = match item {
            Value::Object(obj) => {
                let Some(label) = text_field(obj, &["label", "name", "title"]).filter(|l| !l.is_empty())
                else {
                    continue;
                };
                Entity {
                    id: kept_id.take().unwrap_or_else(|| ids.claim(None, "entity")),
                    label,
                    entity_type: text_field(obj, &["type", "entity_type", "category"])
                        .map(|t| EntityType::parse(&t))
                        .unwrap_or_default(),
                    properties: properties(obj.get("properties")),
                    description: text_field(obj, &["description"]).filter(|d| !d.is_empty()),
                    importance: score_field(obj.get("importance")).unwrap_or(DEFAULT_SCORE),
                }
            }
            Value::String(label) if !label.trim().is_empty() => Entity::new(
                ids.claim(None, "entity"),
                label.trim(),
                EntityType::Other,
            ),
            _ => continue,
        };
        entities.push(entity);
    }

    entities
}

fn decode_relationships(value: Option<&Value>, ids: &mut IdRegistry) -> Vec<Relationship> {
    let items: Vec<&Map<String, Value>> = value
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_object)
        .collect();

    let mut kept: Vec<Option<String>> = items
        .iter()
        .map(|obj| {
            let id = id_field(obj)?;
            (!ids.contains(&id)).then(|| ids.claim(Some(&id), "rel"))
        })
        .collect();

    let mut relationships = Vec::with_capacity(items.len());
    for (obj, kept_id) in items.into_iter().zip(kept.iter_mut()) {
        let source = text_field(obj, &["source", "from", "source_id"]);
        let target = text_field(obj, &["target", "to", "target_id"]);
        let (Some(source), Some(target)) = (source, target) else {
            continue;
        };

        relationships.push(Relationship {
            id: kept_id.take().unwrap_or_else(|| ids.claim(None, "rel")),
            source,
            target,
            relation_type: text_field(obj, &["type", "relation", "relationship", "label"])
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_RELATION_TYPE.to_string()),
            properties: properties(obj.get("properties")),
            weight: score_field(obj.get("weight")).unwrap_or(DEFAULT_SCORE),
            description: text_field(obj, &["description"]).filter(|d| !d.is_empty()),
        });
    }

    relationships
}

fn parse_script(raw: &str) -> ParseOutcome {
    let script = strip_fences(raw);
    if script.is_empty() {
        ParseOutcome::Fallback(TaskOutput::Script(String::new()))
    } else {
        ParseOutcome::Parsed(TaskOutput::Script(script))
    }
}

/// Contents of the first fenced block, or the whole text when there is none.
fn strip_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    let after = &trimmed[start + 3..];
    // Skip the language tag on the opening fence line
    let body = after.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    let body = body.find("```").map(|end| &body[..end]).unwrap_or(body);
    body.trim().to_string()
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn id_field(obj: &Map<String, Value>) -> Option<String> {
    text_field(obj, &["id"]).filter(|id| !id.is_empty())
}

fn score_field(value: Option<&Value>) -> Option<f64> {
    let score = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(clamp_score(score))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn properties(value: Option<&Value>) -> Properties {
    match value {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Properties::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_shape() -> ExpectedShape {
        Task::KnowledgeGraph.shape()
    }

    fn parse_graph(raw: &str) -> RawGraph {
        match parse(raw, &graph_shape()) {
            ParseOutcome::Parsed(TaskOutput::Graph(graph)) => graph,
            other => panic!("expected parsed graph, got {:?}", other),
        }
    }

    #[test]
    fn test_finds_json_behind_commentary() {
        let raw = r#"Sure! Here is the graph:
```json
{"entities": [{"id": "e1", "label": "Ada", "type": "person"}], "relationships": []}
```
Let me know if you need more."#;
        let graph = parse_graph(raw);
        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.entities[0].entity_type, EntityType::Person);
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_span() {
        let raw = r#"{"entities": [{"id": "e1", "label": "a } tricky [ name", "type": "concept"}], "relationships": []}"#;
        let graph = parse_graph(raw);
        assert_eq!(graph.entities[0].label, "a } tricky [ name");
    }

    #[test]
    fn test_skips_spans_that_do_not_fit_shape() {
        let raw = r#"See [1] and {"note": "x"} then {"entities": [{"label": "Acme"}], "relationships": []}"#;
        let graph = parse_graph(raw);
        assert_eq!(graph.entities[0].label, "Acme");
    }

    #[test]
    fn test_backfills_defaults() {
        let raw = r#"{"entities": [{"label": "Acme"}, {"label": "Bob", "type": "PERSON"}],
                     "relationships": [{"source": "Bob", "target": "Acme"}]}"#;
        let graph = parse_graph(raw);

        assert_eq!(graph.entities[0].id, "entity_1");
        assert_eq!(graph.entities[0].entity_type, EntityType::Other);
        assert_eq!(graph.entities[0].importance, 0.5);

        let rel = &graph.relationships[0];
        assert_eq!(rel.id, "rel_1");
        assert_eq!(rel.relation_type, "related_to");
        assert_eq!(rel.weight, 0.5);
        // Label references are rewritten to ids
        assert_eq!(rel.source, "entity_2");
        assert_eq!(rel.target, "entity_1");
    }

    #[test]
    fn test_entity_ids_unique_after_parse() {
        let raw = r#"{"entities": [
            {"id": "e1", "label": "A"},
            {"id": "e1", "label": "B"},
            {"label": "C"},
            {"id": "entity_1", "label": "D"},
            {"id": "", "label": "E"}
        ], "relationships": []}"#;
        let graph = parse_graph(raw);

        let ids: HashSet<&str> = graph.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(graph.entities[0].id, "e1");
        // An explicit id is never displaced by a synthesized one
        assert_eq!(graph.entities[3].id, "entity_1");
    }

    #[test]
    fn test_dangling_relationships_kept() {
        let raw = r#"{"entities": [{"id": "e1", "label": "A"}],
                     "relationships": [{"source": "e1", "target": "nowhere", "type": "knows"}]}"#;
        let graph = parse_graph(raw);
        assert_eq!(graph.relationships.len(), 1);
        assert_eq!(graph.relationships[0].target, "nowhere");
    }

    #[test]
    fn test_scores_clamped() {
        let raw = r#"{"entities": [{"id": "e1", "label": "A", "importance": 7}, {"id": "e2", "label": "B", "importance": "0.25"}],
                     "relationships": [{"source": "e1", "target": "e2", "weight": -3}]}"#;
        let graph = parse_graph(raw);
        assert_eq!(graph.entities[0].importance, 1.0);
        assert_eq!(graph.entities[1].importance, 0.25);
        assert_eq!(graph.relationships[0].weight, 0.0);
    }

    #[test]
    fn test_round_trip_of_canonical_graph() {
        let mut founder = Entity::new("e1", "Ada Lovelace", EntityType::Person)
            .with_importance(0.9)
            .with_description("Founder");
        founder.properties.insert("born".into(), Value::from(1815));

        let mut rel = Relationship::new("r1", "e1", "e2", "founded").with_weight(0.8);
        rel.description = Some("started it".into());

        let graph = RawGraph {
            entities: vec![founder, Entity::new("e2", "Acme", EntityType::Organization)],
            relationships: vec![rel],
            summary: Some("A company and its founder.".into()),
            themes: vec!["startups".into()],
        };

        let serialized = serde_json::to_string_pretty(&graph).unwrap();
        assert_eq!(parse_graph(&serialized), graph);
    }

    #[test]
    fn test_relationship_ids_independent_of_entity_ids() {
        let graph = RawGraph {
            entities: vec![
                Entity::new("1", "Ada", EntityType::Person),
                Entity::new("2", "Acme", EntityType::Organization),
            ],
            relationships: vec![Relationship::new("1", "1", "2", "founded")],
            ..Default::default()
        };

        let serialized = serde_json::to_string(&graph).unwrap();
        let reparsed = parse_graph(&serialized);

        assert_eq!(reparsed.relationships[0].id, "1");
        assert_eq!(reparsed, graph);
    }

    #[test]
    fn test_explicit_relationship_ids_win_over_synthesized() {
        let raw = r#"{"entities": [{"id": "a", "label": "A"}, {"id": "b", "label": "B"}],
            "relationships": [
                {"source": "a", "target": "b"},
                {"id": "rel_1", "source": "b", "target": "a"},
                {"id": "rel_1", "source": "a", "target": "a"}
            ]}"#;
        let graph = parse_graph(raw);

        let ids: Vec<&str> = graph.relationships.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rel_2", "rel_1", "rel_3"]);
    }

    #[test]
    fn test_fallback_totality() {
        let inputs = ["", "plain prose with no data", "{ broken json", "[1, 2", "}{", "null", "\"str\""];
        for task in Task::ALL {
            for input in inputs {
                let outcome = parse(input, &task.shape());
                let expected = fallback(task, input);
                if task == Task::CypherCompile {
                    continue;
                }
                assert_eq!(outcome, ParseOutcome::Fallback(expected), "task {} input {:?}", task, input);
            }
        }
    }

    #[test]
    fn test_missing_required_field_falls_back() {
        let outcome = parse(r#"{"entities": []}"#, &graph_shape());
        assert_eq!(outcome, ParseOutcome::Fallback(TaskOutput::Graph(RawGraph::default())));
    }

    #[test]
    fn test_summary_fallback_keeps_text() {
        let outcome = parse("The company grew fast.", &Task::Summarize.shape());
        match outcome {
            ParseOutcome::Fallback(TaskOutput::Summary(s)) => {
                assert_eq!(s.summary, "The company grew fast.");
                assert!(s.key_points.is_empty());
                assert_eq!(s.word_count, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bare_array_for_single_list_shape() {
        let outcome = parse(r#"["rust", " graphs ", 42]"#, &Task::GenerateKeywords.shape());
        assert_eq!(
            outcome,
            ParseOutcome::Parsed(TaskOutput::Keywords(vec!["rust".into(), "graphs".into(), "42".into()]))
        );
    }

    #[test]
    fn test_sentiment_parsed() {
        let outcome = parse(
            r#"{"sentiment": "Positive", "score": 1.7, "confidence": 0.9}"#,
            &Task::AnalyzeSentiment.shape(),
        );
        assert_eq!(
            outcome,
            ParseOutcome::Parsed(TaskOutput::Sentiment(SentimentResult {
                sentiment: "positive".into(),
                score: 1.0,
                confidence: 0.9,
            }))
        );
    }

    #[test]
    fn test_script_strips_fences() {
        let outcome = parse("```cypher\nMERGE (n:Person {id: 'e1'});\n```", &Task::CypherCompile.shape());
        assert_eq!(
            outcome,
            ParseOutcome::Parsed(TaskOutput::Script("MERGE (n:Person {id: 'e1'});".into()))
        );
        assert!(parse("   ", &Task::CypherCompile.shape()).is_fallback());
    }

    #[test]
    fn test_structured_spans() {
        let spans = structured_spans(r#"a {"x": "}"} b [1, [2]] c {unclosed"#);
        assert_eq!(spans, vec![r#"{"x": "}"}"#, "[1, [2]]"]);
    }
}
