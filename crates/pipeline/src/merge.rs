//! Combining per-chunk task outputs into one result for the whole document.

use extract::ids::{IdRegistry, normalize_label};
use extract::{Entity, EntityType, QueryAnswer, RawGraph, Relationship, SentimentResult, SummaryResult};
use std::collections::{HashMap, HashSet};

pub fn merge_summaries(parts: Vec<SummaryResult>) -> SummaryResult {
    let summary = parts
        .iter()
        .map(|p| p.summary.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let key_points = dedup_text(parts.iter().flat_map(|p| p.key_points.iter().cloned()));
    let word_count = parts.iter().map(|p| p.word_count).sum();

    SummaryResult {
        summary,
        key_points,
        word_count,
    }
}

pub fn merge_keywords(parts: Vec<Vec<String>>) -> Vec<String> {
    dedup_text(parts.into_iter().flatten())
}

/// Scores averaged by chunk weight. The label is kept when every chunk
/// agrees and derived from the averaged score otherwise.
pub fn merge_sentiment(parts: Vec<(SentimentResult, usize)>) -> SentimentResult {
    let total: usize = parts.iter().map(|(_, w)| (*w).max(1)).sum();
    if total == 0 {
        return SentimentResult {
            sentiment: "neutral".to_string(),
            score: 0.0,
            confidence: 0.0,
        };
    }

    let weighted = |f: fn(&SentimentResult) -> f64| {
        parts.iter().map(|(s, w)| f(s) * (*w).max(1) as f64).sum::<f64>() / total as f64
    };
    let score = weighted(|s| s.score);
    let confidence = weighted(|s| s.confidence);

    let labels: HashSet<&str> = parts.iter().map(|(s, _)| s.sentiment.as_str()).collect();
    let sentiment = match labels.into_iter().collect::<Vec<_>>().as_slice() {
        [only] => only.to_string(),
        _ if score > 0.2 => "positive".to_string(),
        _ if score < -0.2 => "negative".to_string(),
        _ => "mixed".to_string(),
    };

    SentimentResult {
        sentiment,
        score,
        confidence,
    }
}

/// The most confident answer; the first one on ties.
pub fn merge_answers(parts: Vec<QueryAnswer>) -> Option<QueryAnswer> {
    parts.into_iter().reduce(|best, next| {
        if next.confidence > best.confidence {
            next
        } else {
            best
        }
    })
}

pub fn merge_entities(parts: Vec<Vec<Entity>>) -> Vec<Entity> {
    let mut merger = GraphMerger::default();
    for entities in parts {
        for entity in entities {
            merger.add_entity(entity);
        }
    }
    merger.entities
}

pub fn merge_graphs(parts: Vec<RawGraph>) -> RawGraph {
    let mut merger = GraphMerger::default();
    for graph in parts {
        merger.add_graph(graph);
    }
    merger.finish()
}

/// Entities are unified by normalized label; each chunk's local ids are
/// remapped onto the merged ones before its relationships are added.
#[derive(Default)]
struct GraphMerger {
    entity_ids: IdRegistry,
    relationship_ids: IdRegistry,
    by_label: HashMap<String, usize>,
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    by_edge: HashMap<(String, String, String), usize>,
    summaries: Vec<String>,
    themes: Vec<String>,
}

impl GraphMerger {
    /// Returns the merged id the entity now lives under.
    fn add_entity(&mut self, entity: Entity) -> String {
        let key = normalize_label(&entity.label);
        if let Some(&index) = self.by_label.get(&key) {
            let existing = &mut self.entities[index];
            existing.importance = existing.importance.max(entity.importance);
            if existing.entity_type == EntityType::Other {
                existing.entity_type = entity.entity_type;
            }
            if existing.description.is_none() {
                existing.description = entity.description;
            }
            for (k, v) in entity.properties {
                existing.properties.entry(k).or_insert(v);
            }
            return existing.id.clone();
        }

        let id = self.entity_ids.claim(Some(&entity.id), "entity");
        self.by_label.insert(key, self.entities.len());
        self.entities.push(Entity { id: id.clone(), ..entity });
        id
    }

    fn add_graph(&mut self, graph: RawGraph) {
        let mut remap: HashMap<String, String> = HashMap::new();
        for entity in graph.entities {
            let local = entity.id.clone();
            let merged = self.add_entity(entity);
            remap.insert(local, merged);
        }

        for rel in graph.relationships {
            let source = self.resolve_endpoint(&rel.source, &mut remap);
            let target = self.resolve_endpoint(&rel.target, &mut remap);
            let key = (source.clone(), target.clone(), normalize_label(&rel.relation_type));

            if let Some(&index) = self.by_edge.get(&key) {
                let existing = &mut self.relationships[index];
                existing.weight = existing.weight.max(rel.weight);
                if existing.description.is_none() {
                    existing.description = rel.description;
                }
                continue;
            }

            let id = self.relationship_ids.claim(Some(&rel.id), "rel");
            self.by_edge.insert(key, self.relationships.len());
            self.relationships.push(Relationship {
                id,
                source,
                target,
                ..rel
            });
        }

        if let Some(summary) = graph.summary.filter(|s| !s.trim().is_empty()) {
            self.summaries.push(summary.trim().to_string());
        }
        self.themes.extend(graph.themes);
    }

    /// Maps a chunk-local endpoint onto the merged graph. An endpoint that names
    /// no entity of its chunk is matched by label; failing that it gets a
    /// reserved id, so it stays dangling instead of landing on another chunk's entity.
    fn resolve_endpoint(&mut self, endpoint: &str, remap: &mut HashMap<String, String>) -> String {
        if let Some(id) = remap.get(endpoint) {
            return id.clone();
        }

        let id = match self.by_label.get(&normalize_label(endpoint)) {
            Some(&index) => self.entities[index].id.clone(),
            None => self.entity_ids.claim(None, "unresolved"),
        };
        remap.insert(endpoint.to_string(), id.clone());
        id
    }

    fn finish(self) -> RawGraph {
        RawGraph {
            entities: self.entities,
            relationships: self.relationships,
            summary: (!self.summaries.is_empty()).then(|| self.summaries.join(" ")),
            themes: dedup_text(self.themes),
        }
    }
}

/// Case-insensitive de-duplication keeping first spelling and order.
fn dedup_text(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .collect()
}
