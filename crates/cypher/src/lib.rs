//! Cypher load scripts for extracted knowledge graphs.

pub mod compiler;
pub mod loader;
pub mod syntax;

pub use compiler::{
    CompileError, CompileOptions, CompileStrategy, CompiledScript, compile_deterministic, compile_query_script,
};
pub use loader::ScriptLoader;
pub use syntax::{check_syntax, contains_keyword, split_statements};
