use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use cypher::{CompileError, CompileOptions, CompiledScript, ScriptLoader, compile_query_script};
use extract::{CompletionEngine, RawGraph, Task};
use pipeline::{
    AnalysisReport, DocumentAnalyzer, GenerationRequest, GraphOrchestrator, PipelineError, ProgressReporter, RunEvent,
    SourceDocument,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::store::{GraphUpdate, Storage, StoredGraph};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn CompletionEngine>,
    pub orchestrator: GraphOrchestrator,
    pub analyzer: Arc<DocumentAnalyzer>,
    pub store: Arc<dyn Storage>,
    pub metrics: Arc<Metrics>,
    pub compile: CompileOptions,
    pub loader: Option<Arc<ScriptLoader>>,
    pub event_buffer: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/documents", post(create_document))
        .route("/documents/:id", get(get_document))
        .route("/graphs/generate", post(generate_graph))
        .route("/graphs/compile", post(compile_inline))
        .route("/graphs/:id", get(get_graph))
        .route("/graphs/:id/compile", post(compile_stored))
        .route("/graphs/:id/load", post(load_graph))
        .route("/analyze", post(analyze_document))
        .with_state(state)
}

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Pipeline(PipelineError),
    Compile(CompileError),
    Internal(anyhow::Error),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

impl From<CompileError> for ApiError {
    fn from(err: CompileError) -> Self {
        ApiError::Compile(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "E_NOT_FOUND", m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "E_BAD_REQUEST", m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, "E_UNAVAILABLE", m),
            ApiError::Pipeline(e) => (pipeline_status(&e), e.code(), e.to_string()),
            ApiError::Compile(e) => (StatusCode::INTERNAL_SERVER_ERROR, "E_COMPILATION", e.to_string()),
            ApiError::Internal(e) => {
                error!(error = %format!("{:#}", e), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "E_INTERNAL", e.to_string())
            }
        };

        (status, Json(json!({ "code": code, "message": message }))).into_response()
    }
}

fn pipeline_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::EngineInit(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Generation(_) => StatusCode::BAD_GATEWAY,
        PipelineError::ExtractionEmpty => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::NoDocuments | PipelineError::UnsupportedTask(_) => StatusCode::BAD_REQUEST,
        PipelineError::Cancelled => StatusCode::REQUEST_TIMEOUT,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model: String,
    engine_available: bool,
    documents: usize,
    graphs: usize,
    neo4j_configured: bool,
}

async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let counts = state.store.counts().await?;
    let engine_available = state.engine.is_available();

    Ok(Json(HealthResponse {
        status: if engine_available { "ok" } else { "degraded" },
        model: state.engine.model_id().to_string(),
        engine_available,
        documents: counts.documents,
        graphs: counts.graphs,
        neo4j_configured: state.loader.is_some(),
    }))
}

async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

#[derive(Deserialize)]
struct NewDocument {
    #[serde(default)]
    id: Option<String>,
    title: String,
    content: String,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Serialize)]
struct DocumentCreated {
    id: String,
}

async fn create_document(
    State(state): State<AppState>,
    Json(req): Json<NewDocument>,
) -> Result<(StatusCode, Json<DocumentCreated>), ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("document content is empty".to_string()));
    }

    let document = SourceDocument::new(
        req.id.unwrap_or_default(),
        req.title,
        req.content,
        req.content_type.unwrap_or_else(|| "text/plain".to_string()),
    );
    let id = state.store.save_document(document).await?;

    Ok((StatusCode::CREATED, Json(DocumentCreated { id })))
}

async fn get_document(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SourceDocument>, ApiError> {
    state
        .store
        .find_document_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("document {} not found", id)))
}

/// Streams the run as server-sent events: `progress` updates, then one
/// `complete` or `error`. Dropping the connection cancels the run.
async fn generate_graph(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let documents = resolve_documents(state.store.as_ref(), &request.document_ids).await?;
    if documents.is_empty() && request.inline_document().is_none() {
        return Err(ApiError::BadRequest("provide document_ids or inline_content".to_string()));
    }

    let run_id = Uuid::new_v4();
    let (reporter, rx) = ProgressReporter::channel(run_id, state.event_buffer);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    info!(run_id = %run_id, documents = documents.len(), "graph generation requested");
    tokio::spawn(run_generation(state, request, documents, reporter, cancel));

    let stream = ReceiverStream::new(rx).map(move |event| {
        // Held by the stream so a disconnect cancels the run
        let _ = &guard;
        sse_event(&event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn run_generation(
    state: AppState,
    request: GenerationRequest,
    documents: Vec<SourceDocument>,
    reporter: ProgressReporter,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    state.metrics.record_run_started();

    let artifact = match state
        .orchestrator
        .generate_graph(&request, documents, &reporter, &cancel)
        .await
    {
        Ok(artifact) => artifact,
        Err(e) => {
            state.metrics.record_run_failed(&e);
            reporter.fail(e.code(), e.to_string()).await;
            return;
        }
    };

    match state.store.save_graph(&artifact).await {
        Ok(graph_id) => {
            state
                .metrics
                .record_run_succeeded(started.elapsed(), artifact.graph.entities.len());
            info!(run_id = %artifact.run_id, graph_id = %graph_id, "graph saved");
            reporter.complete(Some(graph_id), artifact).await;
        }
        Err(e) => {
            error!(run_id = %artifact.run_id, error = %e, "failed to save graph");
            reporter.fail("E_STORAGE", format!("failed to save graph: {}", e)).await;
        }
    }
}

fn sse_event(event: &RunEvent) -> Result<Event, axum::Error> {
    match event {
        RunEvent::Progress(update) => Event::default().event("progress").json_data(update),
        RunEvent::Completed { graph_id, artifact } => Event::default()
            .event("complete")
            .json_data(json!({ "graph_id": graph_id, "artifact": artifact })),
        RunEvent::Failed { code, message } => Event::default()
            .event("error")
            .json_data(json!({ "code": code, "message": message })),
    }
}

async fn resolve_documents(store: &dyn Storage, ids: &[String]) -> Result<Vec<SourceDocument>, ApiError> {
    let mut documents = Vec::with_capacity(ids.len());
    for id in ids {
        let document = store
            .find_document_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("document {} not found", id)))?;
        documents.push(document);
    }
    Ok(documents)
}

async fn get_graph(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<StoredGraph>, ApiError> {
    find_graph(state.store.as_ref(), &id).await.map(Json)
}

async fn find_graph(store: &dyn Storage, id: &str) -> Result<StoredGraph, ApiError> {
    store
        .find_graph(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("graph {} not found", id)))
}

async fn compile(state: &AppState, graph: &RawGraph) -> Result<CompiledScript, ApiError> {
    let compiled = compile_query_script(graph, state.engine.as_ref(), &state.compile).await?;
    state.metrics.record_compile(compiled.strategy);
    Ok(compiled)
}

async fn compile_stored(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CompiledScript>, ApiError> {
    let stored = find_graph(state.store.as_ref(), &id).await?;
    let compiled = compile(&state, &stored.graph).await?;

    let update = GraphUpdate {
        script: Some(compiled.clone()),
        ..Default::default()
    };
    state.store.update_graph(&id, update).await?;

    Ok(Json(compiled))
}

async fn compile_inline(
    State(state): State<AppState>,
    Json(graph): Json<RawGraph>,
) -> Result<Json<CompiledScript>, ApiError> {
    if graph.entities.is_empty() {
        return Err(ApiError::BadRequest("graph has no entities".to_string()));
    }
    compile(&state, &graph).await.map(Json)
}

#[derive(Serialize)]
struct LoadResponse {
    graph_id: String,
    statements: usize,
}

async fn load_graph(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<LoadResponse>, ApiError> {
    let Some(loader) = state.loader.clone() else {
        return Err(ApiError::Unavailable("Neo4j is not configured".to_string()));
    };

    let stored = find_graph(state.store.as_ref(), &id).await?;
    let script = match stored.script {
        Some(script) => script,
        None => {
            let compiled = compile(&state, &stored.graph).await?;
            let update = GraphUpdate {
                script: Some(compiled.clone()),
                ..Default::default()
            };
            state.store.update_graph(&id, update).await?;
            compiled
        }
    };

    let statements = loader.load(&script.script).await?;
    state.metrics.record_script_loaded();

    Ok(Json(LoadResponse { graph_id: id, statements }))
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    task: Task,
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
}

async fn analyze_document(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisReport>, ApiError> {
    let document = match (&req.document_id, req.content) {
        (Some(id), _) => state
            .store
            .find_document_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("document {} not found", id)))?,
        (None, Some(content)) => SourceDocument::new(
            "inline",
            "Inline content",
            content,
            req.content_type.unwrap_or_else(|| "text/plain".to_string()),
        ),
        (None, None) => return Err(ApiError::BadRequest("provide document_id or content".to_string())),
    };

    let started = Instant::now();
    let report = state
        .analyzer
        .analyze(req.task, &document, req.instructions.as_deref())
        .await?;
    state.metrics.record_analysis(started.elapsed());

    Ok(Json(report))
}
