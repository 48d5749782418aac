use anyhow::{Context, Result};
use clap::ValueEnum;
use diagram::DiagramLimits;
use extract::EngineConfig;
use ingest::ChunkerConfig;
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub pipeline: PipelineConfig,
    pub chunker: ChunkerConfig,
    pub diagram: DiagramLimits,
    pub compile: CompileConfig,
    pub retry: RetryConfig,
    pub neo4j: Option<Neo4jConfig>,
    /// Documents loaded into the store at start-up
    pub documents_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // Small excerpts and budgets, short timeout
    Accurate, // Large excerpts and budgets, long timeout
    #[default]
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Capacity of each run's event channel
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    pub use_model: bool,
    pub timeout_secs: u64,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            event_buffer: 64,
        }
    }
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            use_model: true,
            timeout_secs: 120,
            max_tokens: 4096,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            server: ServerConfig::default(),
            engine: EngineConfig::default(),
            pipeline: PipelineConfig::default(),
            chunker: ChunkerConfig::default(),
            diagram: DiagramLimits::default(),
            compile: CompileConfig::default(),
            retry: RetryConfig::default(),
            neo4j: None,
            documents_dir: None,
        }
    }
}

impl AppConfig {
    pub fn preset(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Balanced => Self::default(),
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
        }
    }

    pub fn fast_mode() -> Self {
        let base = Self::default();
        Self {
            mode: OperationMode::Fast,
            engine: EngineConfig {
                context_size: 4096,
                ..base.engine
            },
            pipeline: PipelineConfig {
                excerpt_chars: 1500,
                max_tokens: 4096,
                generation_timeout_secs: 120,
                ..base.pipeline
            },
            chunker: ChunkerConfig {
                chunk_size_tokens: 1500,
                overlap_tokens: 100,
            },
            diagram: DiagramLimits {
                max_nodes: 30,
                max_edges: 60,
                ..base.diagram
            },
            compile: CompileConfig {
                use_model: false,
                ..base.compile
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            ..base
        }
    }

    pub fn accurate_mode() -> Self {
        let base = Self::default();
        Self {
            mode: OperationMode::Accurate,
            engine: EngineConfig {
                context_size: 16384,
                ..base.engine
            },
            pipeline: PipelineConfig {
                excerpt_chars: 6000,
                max_tokens: 16384,
                generation_timeout_secs: 900,
                ..base.pipeline
            },
            compile: CompileConfig {
                timeout_secs: 300,
                max_tokens: 8192,
                ..base.compile
            },
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 2000,
                max_backoff_ms: 20000,
            },
            ..base
        }
    }

    /// The mode's preset, overridden by whatever the file sets.
    pub fn load(mode: OperationMode, path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::preset(mode));
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(mode, &text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(mode: OperationMode, text: &str) -> Result<Self> {
        let overrides: toml::Value = toml::from_str(text).context("Failed to parse TOML")?;
        let mut merged = toml::Value::try_from(Self::preset(mode)).context("Failed to encode preset")?;
        merge_toml(&mut merged, overrides);

        let mut config: Self = merged.try_into().context("Failed to decode config")?;
        config.mode = mode;
        Ok(config)
    }

    pub fn compile_options(&self) -> cypher::CompileOptions {
        cypher::CompileOptions {
            use_model: self.compile.use_model,
            max_tokens: self.compile.max_tokens,
            timeout: Duration::from_secs(self.compile.timeout_secs),
            ..cypher::CompileOptions::default()
        }
    }
}

/// Tables merge key by key; any other value replaces the base.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
