use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write};
use std::panic::{self, AssertUnwindSafe};

use extract::{Entity, EntityType, RawGraph, Relationship};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sanitize::{NodeIds, sanitize_label};

const MINIMAL_NODES: usize = 10;
const MINIMAL_EDGES: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagramLimits {
    pub max_nodes: usize,
    pub max_edges: usize,
    pub max_label_len: usize,
}

impl Default for DiagramLimits {
    fn default() -> Self {
        Self {
            max_nodes: 50,
            max_edges: 100,
            max_label_len: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTier {
    Strong,
    Medium,
    Weak,
}

impl EdgeTier {
    pub fn for_weight(weight: f64) -> Self {
        if weight >= 0.8 {
            EdgeTier::Strong
        } else if weight >= 0.5 {
            EdgeTier::Medium
        } else {
            EdgeTier::Weak
        }
    }

    fn arrow(&self) -> &'static str {
        match self {
            EdgeTier::Strong => "==>",
            EdgeTier::Medium => "-->",
            EdgeTier::Weak => "-.->",
        }
    }
}

fn class_def(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Person => "fill:#e1f5fe,stroke:#01579b,stroke-width:2px",
        EntityType::Organization => "fill:#f3e5f5,stroke:#4a148c,stroke-width:2px",
        EntityType::Location => "fill:#e8f5e9,stroke:#1b5e20,stroke-width:2px",
        EntityType::Concept => "fill:#fff3e0,stroke:#e65100,stroke-width:2px",
        EntityType::Event => "fill:#fce4ec,stroke:#880e4f,stroke-width:2px",
        EntityType::Other => "fill:#f5f5f5,stroke:#424242,stroke-width:1px",
    }
}

/// Render the graph as a Mermaid flowchart. Never fails: if the full
/// rendering errors or panics, a minimal diagram of the first few entities is
/// returned instead.
pub fn render(graph: &RawGraph, limits: &DiagramLimits) -> String {
    match panic::catch_unwind(AssertUnwindSafe(|| render_full(graph, limits))) {
        Ok(Ok(diagram)) => diagram,
        Ok(Err(e)) => {
            warn!(error = %e, "diagram rendering failed, using minimal diagram");
            render_minimal(graph, limits)
        }
        Err(_) => {
            warn!("diagram rendering panicked, using minimal diagram");
            render_minimal(graph, limits)
        }
    }
}

/// Entities kept for the diagram: highest importance first, ties in input order.
pub fn select_nodes<'a>(graph: &'a RawGraph, max_nodes: usize) -> Vec<&'a Entity> {
    let mut nodes: Vec<&Entity> = graph.entities.iter().collect();
    nodes.sort_by(|a, b| b.importance.partial_cmp(&a.importance).unwrap_or(Ordering::Equal));
    nodes.truncate(max_nodes);
    nodes
}

/// Relationships whose endpoints both survived node selection, heaviest first.
pub fn select_edges<'a>(graph: &'a RawGraph, nodes: &[&Entity], max_edges: usize) -> Vec<&'a Relationship> {
    let kept: HashSet<&str> = nodes.iter().map(|e| e.id.as_str()).collect();
    let mut edges: Vec<&Relationship> = graph
        .relationships
        .iter()
        .filter(|r| kept.contains(r.source.as_str()) && kept.contains(r.target.as_str()))
        .collect();
    edges.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal));
    edges.truncate(max_edges);
    edges
}

fn render_full(graph: &RawGraph, limits: &DiagramLimits) -> Result<String, fmt::Error> {
    if graph.entities.is_empty() {
        return Ok(empty_diagram());
    }

    let nodes = select_nodes(graph, limits.max_nodes);
    let edges = select_edges(graph, &nodes, limits.max_edges);

    let mut out = String::from("graph TD\n");
    write_class_defs(&mut out)?;

    let mut ids = NodeIds::default();
    let mut node_ids: HashMap<&str, String> = HashMap::with_capacity(nodes.len());
    for entity in &nodes {
        let node_id = ids.assign(&entity.id);
        writeln!(
            out,
            "    {}[\"{}\"]:::{}",
            node_id,
            sanitize_label(&entity.label, limits.max_label_len),
            entity.entity_type.as_str()
        )?;
        node_ids.insert(entity.id.as_str(), node_id);
    }

    for edge in edges {
        let (Some(source), Some(target)) = (node_ids.get(edge.source.as_str()), node_ids.get(edge.target.as_str()))
        else {
            continue;
        };
        write_edge(&mut out, source, target, edge, limits)?;
    }

    Ok(out)
}

/// At most the first ten entities and two of the edges between them.
pub(crate) fn render_minimal(graph: &RawGraph, limits: &DiagramLimits) -> String {
    if graph.entities.is_empty() {
        return empty_diagram();
    }

    let mut out = String::from("graph TD\n");
    let mut ids = NodeIds::default();
    let mut node_ids: HashMap<&str, String> = HashMap::new();

    for entity in graph.entities.iter().take(MINIMAL_NODES) {
        let node_id = ids.assign(&entity.id);
        out.push_str(&format!(
            "    {}[\"{}\"]\n",
            node_id,
            sanitize_label(&entity.label, limits.max_label_len)
        ));
        node_ids.insert(entity.id.as_str(), node_id);
    }

    let edges = graph
        .relationships
        .iter()
        .filter_map(|r| Some((node_ids.get(r.source.as_str())?, node_ids.get(r.target.as_str())?, r)))
        .take(MINIMAL_EDGES);
    for (source, target, edge) in edges {
        out.push_str(&format!(
            "    {} -->|\"{}\"| {}\n",
            source,
            sanitize_label(&edge.relation_type, limits.max_label_len),
            target
        ));
    }

    out
}

fn write_class_defs(out: &mut String) -> fmt::Result {
    for entity_type in EntityType::ALL {
        writeln!(out, "    classDef {} {}", entity_type.as_str(), class_def(entity_type))?;
    }
    Ok(())
}

fn write_edge(
    out: &mut String,
    source: &str,
    target: &str,
    edge: &Relationship,
    limits: &DiagramLimits,
) -> fmt::Result {
    let label = sanitize_label(&edge.relation_type.replace('_', " "), limits.max_label_len);
    let arrow = EdgeTier::for_weight(edge.weight).arrow();

    if label.is_empty() {
        writeln!(out, "    {} {} {}", source, arrow, target)
    } else {
        writeln!(out, "    {} {}|\"{}\"| {}", source, arrow, label, target)
    }
}

fn empty_diagram() -> String {
    "graph TD\n    empty[\"No entities extracted\"]\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{Entity, Relationship};

    fn node_lines(diagram: &str) -> Vec<&str> {
        diagram.lines().filter(|l| l.contains("[\"")).collect()
    }

    fn edge_lines(diagram: &str) -> Vec<&str> {
        diagram
            .lines()
            .filter(|l| l.contains("-->") || l.contains("==>") || l.contains("-.->"))
            .collect()
    }

    fn scaled_graph(count: usize) -> RawGraph {
        let entities = (0..count)
            .map(|i| {
                Entity::new(format!("e{}", i), format!("Entity {}", i), EntityType::Concept)
                    .with_importance(i as f64 / count as f64)
            })
            .collect();
        let relationships = (1..count)
            .map(|i| {
                Relationship::new(format!("r{}", i), format!("e{}", i - 1), format!("e{}", i), "next")
                    .with_weight(0.6)
            })
            .collect();
        RawGraph {
            entities,
            relationships,
            ..Default::default()
        }
    }

    #[test]
    fn test_keeps_top_importance_nodes() {
        let graph = scaled_graph(80);
        let diagram = render(&graph, &DiagramLimits::default());

        let nodes = node_lines(&diagram);
        assert_eq!(nodes.len(), 50);
        for i in 30..80 {
            assert!(diagram.contains(&format!("n_e{}[", i)), "missing e{}", i);
        }
        for i in 0..30 {
            assert!(!diagram.contains(&format!("n_e{}[", i)), "unexpected e{}", i);
        }
    }

    #[test]
    fn test_edges_only_between_kept_nodes() {
        let graph = scaled_graph(80);
        let diagram = render(&graph, &DiagramLimits::default());

        let kept: HashSet<String> = (30..80).map(|i| format!("n_e{}", i)).collect();
        let edges = edge_lines(&diagram);
        assert_eq!(edges.len(), 49);
        for line in edges {
            let mut parts = line.split_whitespace();
            let source = parts.next().unwrap();
            let target = line.split_whitespace().last().unwrap();
            assert!(kept.contains(source) && kept.contains(target), "dangling edge: {}", line);
        }
    }

    #[test]
    fn test_dangling_relationships_never_rendered() {
        let graph = RawGraph {
            entities: vec![Entity::new("a", "A", EntityType::Person)],
            relationships: vec![Relationship::new("r1", "a", "missing", "knows")],
            ..Default::default()
        };
        let diagram = render(&graph, &DiagramLimits::default());
        assert!(edge_lines(&diagram).is_empty());
    }

    #[test]
    fn test_edge_limit_keeps_heaviest() {
        let mut graph = scaled_graph(5);
        graph.relationships[2].weight = 0.95;
        let limits = DiagramLimits {
            max_edges: 1,
            ..DiagramLimits::default()
        };
        let diagram = render(&graph, &limits);
        let edges = edge_lines(&diagram);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].trim(), "n_e2 ==>|\"next\"| n_e3");
    }

    #[test]
    fn test_weight_tiers() {
        assert_eq!(EdgeTier::for_weight(0.8), EdgeTier::Strong);
        assert_eq!(EdgeTier::for_weight(0.79), EdgeTier::Medium);
        assert_eq!(EdgeTier::for_weight(0.5), EdgeTier::Medium);
        assert_eq!(EdgeTier::for_weight(0.49), EdgeTier::Weak);
    }

    #[test]
    fn test_type_classes_and_styles() {
        let graph = RawGraph {
            entities: vec![
                Entity::new("p", "Ada", EntityType::Person),
                Entity::new("o", "Acme", EntityType::Organization),
            ],
            relationships: vec![Relationship::new("r", "p", "o", "works_at").with_weight(0.3)],
            ..Default::default()
        };
        let diagram = render(&graph, &DiagramLimits::default());

        assert!(diagram.starts_with("graph TD\n"));
        assert!(diagram.contains("classDef person"));
        assert!(diagram.contains("classDef other"));
        assert!(diagram.contains("n_p[\"Ada\"]:::person"));
        assert!(diagram.contains("n_o[\"Acme\"]:::organization"));
        assert!(diagram.contains("n_p -.->|\"works at\"| n_o"));
    }

    #[test]
    fn test_labels_sanitized_and_ids_independent() {
        let graph = RawGraph {
            entities: vec![Entity::new(
                "weird id/with \"quotes\"",
                "The \"Very\" Long Name Of A Multinational Corporation",
                EntityType::Organization,
            )],
            ..Default::default()
        };
        let diagram = render(&graph, &DiagramLimits::default());
        let node = node_lines(&diagram)[0].trim();

        assert!(node.starts_with("n_weird_id_with__quotes_[\""));
        assert!(node.contains("The Very Long Name Of A Mul..."));
    }

    #[test]
    fn test_minimal_fallback() {
        let mut graph = scaled_graph(15);
        graph.relationships.push(Relationship::new("x", "e0", "ghost", "dangling"));
        let diagram = render_minimal(&graph, &DiagramLimits::default());

        assert_eq!(node_lines(&diagram).len(), 10);
        let edges = edge_lines(&diagram);
        assert_eq!(edges.len(), 2);
        assert!(!diagram.contains("ghost"));
    }

    #[test]
    fn test_empty_graph() {
        let diagram = render(&RawGraph::default(), &DiagramLimits::default());
        assert!(diagram.contains("No entities extracted"));
    }
}
