use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to initialize completion engine: {0}")]
    Init(String),

    #[error("completion engine has been disposed")]
    Unavailable,

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("embeddings are not supported by this engine")]
    EmbeddingUnsupported,

    #[error("embedding failed: {0}")]
    Embedding(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingOptions {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub stop: Vec<String>,
    /// Ask the runtime to constrain output to JSON
    pub json_output: bool,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            stop: Vec::new(),
            json_output: false,
        }
    }
}

impl SamplingOptions {
    /// These defaults with a call's own budget, temperature and output mode.
    /// Everything else (nucleus/top-k sampling, penalties, stops) is kept.
    pub fn for_call(&self, max_tokens: usize, temperature: f32, json_output: bool) -> Self {
        Self {
            max_tokens,
            temperature,
            json_output,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acceleration {
    #[default]
    Auto,
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    /// Model name as known to the runtime
    pub model: String,
    pub embedding_model: Option<String>,
    pub context_size: usize,
    pub sampling: SamplingOptions,
    pub acceleration: Acceleration,
    pub connect_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            embedding_model: None,
            context_size: 8192,
            sampling: SamplingOptions::default(),
            acceleration: Acceleration::Auto,
            connect_timeout_secs: 10,
        }
    }
}

/// A text-completion capability. One instance is shared by every pipeline run
/// and must serialize its own calls.
#[async_trait]
pub trait CompletionEngine: Send + Sync {
    async fn complete(&self, prompt: &str, options: &SamplingOptions) -> Result<String, EngineError>;

    /// Sampling settings the engine was initialized with; callers start from
    /// these and override per call.
    fn sampling_defaults(&self) -> SamplingOptions {
        SamplingOptions::default()
    }

    fn supports_embeddings(&self) -> bool {
        false
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EngineError> {
        Err(EngineError::EmbeddingUnsupported)
    }

    /// Cheap liveness check; no I/O
    fn is_available(&self) -> bool;

    /// Release resources. Idempotent.
    async fn dispose(&self);

    fn model_id(&self) -> &str;
}

/// Completion engine backed by a local Ollama runtime.
pub struct OllamaEngine {
    config: EngineConfig,
    client: reqwest::Client,
    disposed: AtomicBool,
    in_flight: Mutex<()>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: RuntimeOptions<'a>,
}

#[derive(Serialize)]
struct RuntimeOptions<'a> {
    num_predict: usize,
    num_ctx: usize,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repeat_penalty: f32,
    #[serde(skip_serializing_if = "no_stops")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    num_gpu: Option<i32>,
}

fn no_stops(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct ShowRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEngine {
    /// Connect to the runtime and confirm the model is present. This is the
    /// only way to obtain an engine, so nothing can run before it succeeds.
    pub async fn initialize(config: EngineConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| EngineError::Init(e.to_string()))?;

        let url = format!("{}/api/show", config.base_url);
        let response = client
            .post(&url)
            .json(&ShowRequest { name: &config.model })
            .send()
            .await
            .map_err(|e| EngineError::Init(format!("runtime unreachable at {}: {}", config.base_url, e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Init(format!(
                "model '{}' not available: {}",
                config.model,
                response.status()
            )));
        }

        info!(model = %config.model, base_url = %config.base_url, "completion engine ready");

        Ok(Self {
            config,
            client,
            disposed: AtomicBool::new(false),
            in_flight: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn build_request<'a>(&'a self, prompt: &'a str, options: &'a SamplingOptions) -> GenerateRequest<'a> {
        let num_gpu = match self.config.acceleration {
            Acceleration::Auto => None,
            Acceleration::Cpu => Some(0),
            Acceleration::Gpu => Some(-1),
        };

        GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            format: options.json_output.then_some("json"),
            options: RuntimeOptions {
                num_predict: options.max_tokens,
                num_ctx: self.config.context_size,
                temperature: options.temperature,
                top_p: options.top_p,
                top_k: options.top_k,
                repeat_penalty: options.repeat_penalty,
                stop: &options.stop,
                num_gpu,
            },
        }
    }
}

#[async_trait]
impl CompletionEngine for OllamaEngine {
    async fn complete(&self, prompt: &str, options: &SamplingOptions) -> Result<String, EngineError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(EngineError::Unavailable);
        }

        // One generation at a time per engine
        let _guard = self.in_flight.lock().await;

        let url = format!("{}/api/generate", self.config.base_url);
        let request = self.build_request(prompt, options);
        debug!(prompt_chars = prompt.len(), max_tokens = options.max_tokens, "sending completion request");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Generation(format!("request to Ollama failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Generation(format!("Ollama request failed: {}", response.status())));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Generation(format!("failed to parse Ollama response: {}", e)))?;

        Ok(body.response)
    }

    fn sampling_defaults(&self) -> SamplingOptions {
        self.config.sampling.clone()
    }

    fn supports_embeddings(&self) -> bool {
        self.config.embedding_model.is_some()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let Some(model) = self.config.embedding_model.as_deref() else {
            return Err(EngineError::EmbeddingUnsupported);
        };
        if self.disposed.load(Ordering::Acquire) {
            return Err(EngineError::Unavailable);
        }

        let _guard = self.in_flight.lock().await;

        let url = format!("{}/api/embeddings", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest { model, prompt: text })
            .send()
            .await
            .map_err(|e| EngineError::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Embedding(format!("embedding request failed: {}", response.status())));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Embedding(e.to_string()))?;

        Ok(body.embedding)
    }

    fn is_available(&self) -> bool {
        !self.disposed.load(Ordering::Acquire)
    }

    async fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            // Wait out any call still holding the engine
            let _guard = self.in_flight.lock().await;
            info!(model = %self.config.model, "completion engine disposed");
        }
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}
