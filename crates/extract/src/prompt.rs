use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Summarize,
    ExtractEntities,
    AnalyzeSentiment,
    GenerateKeywords,
    ExtractRelationships,
    KnowledgeGraph,
    CypherCompile,
    FreeQuery,
}

impl Task {
    pub const ALL: [Task; 8] = [
        Task::Summarize,
        Task::ExtractEntities,
        Task::AnalyzeSentiment,
        Task::GenerateKeywords,
        Task::ExtractRelationships,
        Task::KnowledgeGraph,
        Task::CypherCompile,
        Task::FreeQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Summarize => "summarize",
            Task::ExtractEntities => "extract_entities",
            Task::AnalyzeSentiment => "analyze_sentiment",
            Task::GenerateKeywords => "generate_keywords",
            Task::ExtractRelationships => "extract_relationships",
            Task::KnowledgeGraph => "knowledge_graph",
            Task::CypherCompile => "cypher_compile",
            Task::FreeQuery => "free_query",
        }
    }

    pub fn shape(&self) -> ExpectedShape {
        let required: &'static [FieldSpec] = match self {
            Task::Summarize => SUMMARY_FIELDS,
            Task::ExtractEntities => ENTITY_FIELDS,
            Task::AnalyzeSentiment => SENTIMENT_FIELDS,
            Task::GenerateKeywords => KEYWORD_FIELDS,
            Task::ExtractRelationships | Task::KnowledgeGraph => GRAPH_FIELDS,
            Task::CypherCompile => &[],
            Task::FreeQuery => ANSWER_FIELDS,
        };

        let format = match self {
            Task::CypherCompile => OutputFormat::Script,
            _ => OutputFormat::Json,
        };

        ExpectedShape {
            task: *self,
            format,
            required,
        }
    }

    fn framing(&self) -> &'static str {
        match self {
            Task::Summarize => {
                "You are a precise analyst. Summarize the document below, keeping every claim grounded in the text."
            }
            Task::ExtractEntities => {
                "You are an information extraction system. Identify the named entities in the document below."
            }
            Task::AnalyzeSentiment => {
                "You are a sentiment analysis system. Judge the overall sentiment of the document below."
            }
            Task::GenerateKeywords => {
                "You are an indexing assistant. Pick the keywords that best describe the document below."
            }
            Task::ExtractRelationships => {
                "You are an information extraction system. Identify entities and the relationships between them in the document below."
            }
            Task::KnowledgeGraph => {
                "You are a knowledge graph builder. Turn the document below into entities, relationships and themes."
            }
            Task::CypherCompile => {
                "You are a Neo4j expert. Write a Cypher script that loads the knowledge graph below into a graph database."
            }
            Task::FreeQuery => {
                "You are a helpful assistant. Answer the question using only the document below."
            }
        }
    }

    fn rules(&self) -> &'static str {
        match self {
            Task::Summarize => {
                "- summary: 2-4 sentences\n\
                 - key_points: 3-7 short bullet strings\n\
                 - word_count: number of words in the source"
            }
            Task::ExtractEntities => ENTITY_RULES,
            Task::AnalyzeSentiment => {
                "- sentiment: one of positive, negative, neutral, mixed\n\
                 - score: from -1 (very negative) to 1 (very positive)\n\
                 - confidence: from 0 to 1"
            }
            Task::GenerateKeywords => "- keywords: 5-15 lowercase keywords or short phrases, most relevant first",
            Task::ExtractRelationships | Task::KnowledgeGraph => GRAPH_RULES,
            Task::CypherCompile => {
                "- Use MERGE so the script can run repeatedly without duplicating data\n\
                 - Order: CREATE CONSTRAINT ... IF NOT EXISTS first, then node MERGE statements, then relationship MERGE statements, then CREATE INDEX ... IF NOT EXISTS\n\
                 - Key every node on its id property and SET label, description and importance\n\
                 - Match both endpoints by id before merging a relationship and SET weight and description\n\
                 - Relationship types are UPPER_SNAKE_CASE\n\
                 - End every statement with a semicolon"
            }
            Task::FreeQuery => {
                "- answer: the answer, or say the document does not contain it\n\
                 - confidence: from 0 to 1"
            }
        }
    }

    fn schema(&self) -> &'static str {
        match self {
            Task::Summarize => r#"{"summary": "...", "key_points": ["..."], "word_count": 0}"#,
            Task::ExtractEntities => {
                r#"{"entities": [{"id": "e1", "label": "Name", "type": "person|organization|location|concept|event|other", "description": "...", "importance": 0.8, "properties": {}}]}"#
            }
            Task::AnalyzeSentiment => r#"{"sentiment": "positive", "score": 0.6, "confidence": 0.9}"#,
            Task::GenerateKeywords => r#"{"keywords": ["..."]}"#,
            Task::ExtractRelationships | Task::KnowledgeGraph => GRAPH_SCHEMA,
            Task::CypherCompile => "",
            Task::FreeQuery => r#"{"answer": "...", "confidence": 0.8}"#,
        }
    }

    fn closing(&self) -> &'static str {
        match self.shape().format {
            OutputFormat::Json => {
                "Respond with a single valid JSON object matching the schema. \
                 No markdown, no code fences, no explanations before or after it."
            }
            OutputFormat::Script => {
                "Respond with the Cypher statements only. \
                 No markdown, no code fences, no explanations before or after them."
            }
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ENTITY_RULES: &str = "- Use sequential ids: e1, e2, e3, ...\n\
- type must be one of: person, organization, location, concept, event, other\n\
- importance is 0 to 1, how central the entity is to the text\n\
- properties holds any extra facts as key/value pairs";

const GRAPH_RULES: &str = "- Use sequential entity ids: e1, e2, e3, ...; relationship ids r1, r2, ...\n\
- type must be one of: person, organization, location, concept, event, other\n\
- importance and weight are 0 to 1\n\
- source and target must be entity ids from the entities list\n\
- Relationship types are short verbs in snake_case: founded, works_at, located_in, uses\n\
- properties holds any extra facts as key/value pairs\n\
- summary is 1-3 sentences; themes are 2-6 short phrases";

const GRAPH_SCHEMA: &str = r#"{
  "entities": [{"id": "e1", "label": "Name", "type": "person", "description": "...", "importance": 0.9, "properties": {}}],
  "relationships": [{"id": "r1", "source": "e1", "target": "e2", "type": "founded", "weight": 0.8, "description": "...", "properties": {}}],
  "summary": "...",
  "themes": ["..."]
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    /// Raw script text rather than a JSON document
    Script,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    List,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

const SUMMARY_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("summary", FieldKind::Text),
    FieldSpec::new("key_points", FieldKind::List),
];
const ENTITY_FIELDS: &[FieldSpec] = &[FieldSpec::new("entities", FieldKind::List)];
const SENTIMENT_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("sentiment", FieldKind::Text),
    FieldSpec::new("score", FieldKind::Number),
];
const KEYWORD_FIELDS: &[FieldSpec] = &[FieldSpec::new("keywords", FieldKind::List)];
const GRAPH_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("entities", FieldKind::List),
    FieldSpec::new("relationships", FieldKind::List),
];
const ANSWER_FIELDS: &[FieldSpec] = &[FieldSpec::new("answer", FieldKind::Text)];

/// Declarative contract for a task's response: which top-level fields must
/// be present and of what kind. Consumed by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpectedShape {
    pub task: Task,
    pub format: OutputFormat,
    pub required: &'static [FieldSpec],
}

#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub text: String,
    pub shape: ExpectedShape,
}

/// A document as it appears inside a multi-document graph prompt.
#[derive(Debug, Clone)]
pub struct PromptDocument {
    pub id: String,
    pub title: String,
    pub content_type: String,
    pub excerpt: String,
    /// Original length in characters, when the excerpt was cut short
    pub truncated_from: Option<usize>,
}

pub fn build_prompt(task: Task, content: &str, instructions: Option<&str>) -> BuiltPrompt {
    let mut text = String::new();
    text.push_str(task.framing());
    text.push_str("\n\n");

    push_instructions(&mut text, instructions);

    text.push_str("RULES:\n");
    text.push_str(task.rules());
    text.push_str("\n\n");

    let schema = task.schema();
    if !schema.is_empty() {
        text.push_str("SCHEMA:\n");
        text.push_str(schema);
        text.push_str("\n\n");
    }

    let heading = match task {
        Task::CypherCompile => "GRAPH",
        _ => "DOCUMENT",
    };
    text.push_str(&format!("{}:\n{}\n\n", heading, content.trim()));
    text.push_str(task.closing());

    BuiltPrompt {
        text,
        shape: task.shape(),
    }
}

/// Combined knowledge-graph prompt over several documents.
pub fn build_graph_prompt(documents: &[PromptDocument], instructions: Option<&str>) -> BuiltPrompt {
    let task = Task::KnowledgeGraph;
    let mut text = String::new();

    text.push_str(&format!(
        "You are a knowledge graph builder. Read the {} document(s) below and extract one combined graph: \
         entities with properties and importance scores, relationships between them, a short summary and the main themes. \
         Merge entities that refer to the same thing across documents.\n\n",
        documents.len()
    ));

    push_instructions(&mut text, instructions);

    text.push_str("RULES:\n");
    text.push_str(task.rules());
    text.push_str("\n- Documents marked as truncated continue beyond the excerpt; do not guess at the missing part\n\n");
    text.push_str("SCHEMA:\n");
    text.push_str(task.schema());
    text.push_str("\n\n");

    for (i, doc) in documents.iter().enumerate() {
        text.push_str(&format!(
            "=== DOCUMENT {} (id: {}, title: {}, type: {}) ===\n{}\n",
            i + 1,
            doc.id,
            doc.title,
            doc.content_type,
            doc.excerpt.trim_end()
        ));
        if let Some(total) = doc.truncated_from {
            text.push_str(&truncation_marker(doc.excerpt.chars().count(), total));
            text.push('\n');
        }
        text.push('\n');
    }

    text.push_str(task.closing());

    BuiltPrompt {
        text,
        shape: task.shape(),
    }
}

pub fn truncation_marker(shown: usize, total: usize) -> String {
    format!("[TRUNCATED: showing the first {} of {} characters]", shown, total)
}

fn push_instructions(text: &mut String, instructions: Option<&str>) {
    if let Some(instructions) = instructions.map(str::trim).filter(|s| !s.is_empty()) {
        text.push_str("USER INSTRUCTIONS:\n");
        text.push_str(instructions);
        text.push_str("\n\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_task_has_closing_instruction() {
        for task in Task::ALL {
            let prompt = build_prompt(task, "Some text.", None);
            assert!(prompt.text.contains("Some text."));
            assert!(prompt.text.contains("No markdown"), "{} lacks closing", task);
            assert_eq!(prompt.shape.task, task);
        }
    }

    #[test]
    fn test_shapes() {
        let shape = Task::KnowledgeGraph.shape();
        assert_eq!(shape.format, OutputFormat::Json);
        let names: Vec<&str> = shape.required.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["entities", "relationships"]);

        assert_eq!(Task::CypherCompile.shape().format, OutputFormat::Script);
        assert!(Task::CypherCompile.shape().required.is_empty());
    }

    #[test]
    fn test_required_fields_per_task() {
        let names = |task: Task| -> Vec<&'static str> { task.shape().required.iter().map(|f| f.name).collect() };

        assert_eq!(names(Task::Summarize), vec!["summary", "key_points"]);
        assert_eq!(names(Task::ExtractEntities), vec!["entities"]);
        assert_eq!(names(Task::AnalyzeSentiment), vec!["sentiment", "score"]);
        assert_eq!(names(Task::GenerateKeywords), vec!["keywords"]);
        assert_eq!(names(Task::ExtractRelationships), names(Task::KnowledgeGraph));
        assert_eq!(names(Task::FreeQuery), vec!["answer"]);

        let score = Task::AnalyzeSentiment.shape().required[1];
        assert_eq!(score.kind, FieldKind::Number);
    }

    #[test]
    fn test_instructions_included_when_present() {
        let with = build_prompt(Task::FreeQuery, "doc", Some("Who founded it?"));
        assert!(with.text.contains("USER INSTRUCTIONS:\nWho founded it?"));

        let without = build_prompt(Task::FreeQuery, "doc", Some("   "));
        assert!(!without.text.contains("USER INSTRUCTIONS"));
    }

    #[test]
    fn test_graph_prompt_marks_truncation() {
        let docs = vec![
            PromptDocument {
                id: "d1".into(),
                title: "Acme".into(),
                content_type: "text/plain".into(),
                excerpt: "abc".into(),
                truncated_from: Some(10),
            },
            PromptDocument {
                id: "d2".into(),
                title: "Founder".into(),
                content_type: "text/plain".into(),
                excerpt: "full".into(),
                truncated_from: None,
            },
        ];

        let prompt = build_graph_prompt(&docs, Some("focus on people"));
        assert!(prompt.text.contains("=== DOCUMENT 1 (id: d1, title: Acme"));
        assert!(prompt.text.contains("[TRUNCATED: showing the first 3 of 10 characters]"));
        assert_eq!(prompt.text.matches("[TRUNCATED").count(), 1);
        assert!(prompt.text.contains("focus on people"));
        assert_eq!(prompt.shape.task, Task::KnowledgeGraph);
    }

    #[test]
    fn test_task_serde_names() {
        assert_eq!(serde_json::to_string(&Task::CypherCompile).unwrap(), "\"cypher_compile\"");
        let task: Task = serde_json::from_str("\"analyze_sentiment\"").unwrap();
        assert_eq!(task, Task::AnalyzeSentiment);
    }
}
