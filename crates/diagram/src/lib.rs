//! Mermaid diagram rendering for extracted graphs.

pub mod mermaid;
pub mod sanitize;

pub use mermaid::{DiagramLimits, EdgeTier, render, select_edges, select_nodes};
