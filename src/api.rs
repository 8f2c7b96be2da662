use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::bootstrap::Runtime;
use crate::ingest::IngestReport;
use crate::model::{Checkpoint, Item, SourceId, TranslationStats, TranslationTask};
use crate::scheduler::{RunOutcome, Scheduler, SchedulerStatus};
use crate::store::{IngestStore, ItemFilter, StoreError};
use crate::translate::{
    BatchReport, CachedTranslation, ConfigOverrides, ItemTranslateError, ItemTranslator, TaskQueue,
    TranslateError, TranslateRequest, TranslationResult, Translator,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IngestStore>,
    pub scheduler: Arc<Scheduler>,
    pub translator: Arc<Translator>,
    pub tasks: Arc<TaskQueue>,
    pub items: Arc<ItemTranslator>,
}

impl AppState {
    pub fn from_runtime(rt: &Runtime) -> Self {
        Self {
            store: rt.store.clone(),
            scheduler: rt.scheduler.clone(),
            translator: rt.translator.clone(),
            tasks: rt.tasks.clone(),
            items: rt.items.clone(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sources/update-all", post(update_all))
        .route("/sources/{id}/fetch", post(fetch_source))
        .route("/sources/{id}/reset", post(reset_source))
        .route("/sources/{id}/progress", get(source_progress))
        .route("/items", get(list_items))
        .route("/items/{guid}/read", post(mark_read))
        .route("/items/{guid}/favorite", post(toggle_favorite))
        .route("/items/{guid}/translate", post(translate_item))
        .route("/items/{guid}/translations", delete(clear_item_translations))
        .route("/items/{guid}/translations/stats", get(item_translation_stats))
        .route("/items/translate-batch", post(translate_items))
        .route("/translate", post(translate))
        .route("/translate/cache", get(cached_translations).delete(clear_cache))
        .route("/translate-async", post(translate_async))
        .route("/task-status/{task_id}", get(task_status))
        .route("/engines", get(engines))
        .route("/scheduler", get(scheduler_status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn err(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": msg.into() })))
}

fn store_err(e: StoreError) -> ApiError {
    match e {
        StoreError::UnknownSource(id) => err(StatusCode::NOT_FOUND, format!("unknown source {id}")),
        other => {
            warn!(error = %other, "store error");
            err(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn ingest_err(e: anyhow::Error) -> ApiError {
    if let Some(StoreError::UnknownSource(id)) = e.downcast_ref::<StoreError>() {
        return err(StatusCode::NOT_FOUND, format!("unknown source {id}"));
    }
    err(StatusCode::BAD_GATEWAY, format!("{e:#}"))
}

fn translate_err(e: TranslateError) -> ApiError {
    let status = match &e {
        TranslateError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
        TranslateError::NotConfigured(_) | TranslateError::LimiterClosed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::BAD_GATEWAY,
    };
    err(status, e.to_string())
}

fn item_translate_err(e: ItemTranslateError) -> ApiError {
    match e {
        ItemTranslateError::UnknownItem(guid) => err(StatusCode::NOT_FOUND, format!("unknown item {guid}")),
        ItemTranslateError::Translate(e) => translate_err(e),
        ItemTranslateError::Store(e) => store_err(e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ForceQuery {
    #[serde(default)]
    force: bool,
}

async fn run_source(state: &AppState, id: SourceId, force: bool) -> ApiResult<IngestReport> {
    match state.scheduler.run_now(id, force).await.map_err(ingest_err)? {
        RunOutcome::Ran(report) => Ok(Json(report)),
        RunOutcome::AlreadyScheduled { job } => Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": format!("source {id} is already queued or running"), "job": job })),
        )),
    }
}

async fn fetch_source(
    State(state): State<AppState>,
    Path(id): Path<SourceId>,
    Query(q): Query<ForceQuery>,
) -> ApiResult<IngestReport> {
    run_source(&state, id, q.force).await
}

async fn reset_source(
    State(state): State<AppState>,
    Path(id): Path<SourceId>,
) -> ApiResult<IngestReport> {
    run_source(&state, id, true).await
}

async fn source_progress(
    State(state): State<AppState>,
    Path(id): Path<SourceId>,
) -> ApiResult<Option<Checkpoint>> {
    if state.store.get_source(id).await.map_err(store_err)?.is_none() {
        return Err(store_err(StoreError::UnknownSource(id)));
    }
    state
        .store
        .latest_checkpoint(id)
        .await
        .map(Json)
        .map_err(store_err)
}

#[derive(Serialize)]
struct UpdateAllOut {
    queued: Vec<SourceId>,
}

async fn update_all(
    State(state): State<AppState>,
    Query(q): Query<ForceQuery>,
) -> Result<(StatusCode, Json<UpdateAllOut>), ApiError> {
    let queued = state
        .scheduler
        .trigger_all(q.force)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok((StatusCode::ACCEPTED, Json(UpdateAllOut { queued })))
}

#[derive(Debug, Default, Deserialize)]
struct ItemsQuery {
    source_id: Option<SourceId>,
    page: Option<usize>,
    limit: Option<usize>,
    #[serde(default)]
    unread: bool,
    #[serde(default)]
    favorite: bool,
}

#[derive(Serialize)]
struct ItemsPage {
    items: Vec<Item>,
    total: usize,
    page: usize,
    limit: usize,
}

async fn list_items(
    State(state): State<AppState>,
    Query(q): Query<ItemsQuery>,
) -> ApiResult<ItemsPage> {
    let filter = ItemFilter {
        source_id: q.source_id,
        unread_only: q.unread,
        favorite_only: q.favorite,
        page: q.page,
        limit: q.limit,
    };
    let (items, total) = state.store.list_items(&filter).await.map_err(store_err)?;
    Ok(Json(ItemsPage {
        items,
        total,
        page: filter.page(),
        limit: filter.limit(),
    }))
}

#[derive(Debug, Deserialize)]
struct ReadQuery {
    #[serde(default = "default_true")]
    read: bool,
}

fn default_true() -> bool {
    true
}

async fn mark_read(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Query(q): Query<ReadQuery>,
) -> ApiResult<Value> {
    let read = q.read;
    if state.store.set_read(&guid, read).await.map_err(store_err)? {
        Ok(Json(json!({ "guid": guid, "is_read": read })))
    } else {
        Err(err(StatusCode::NOT_FOUND, format!("unknown item {guid}")))
    }
}

async fn toggle_favorite(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> ApiResult<Value> {
    match state.store.toggle_favorite(&guid).await.map_err(store_err)? {
        Some(fav) => Ok(Json(json!({ "guid": guid, "is_favorite": fav }))),
        None => Err(err(StatusCode::NOT_FOUND, format!("unknown item {guid}"))),
    }
}

#[derive(Debug, Deserialize)]
struct TranslateReq {
    text: String,
    to: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    engine: Option<String>,
    #[serde(default)]
    options: ConfigOverrides,
}

impl TranslateReq {
    fn validate(&self) -> Result<(), ApiError> {
        if self.to.trim().is_empty() {
            return Err(err(StatusCode::BAD_REQUEST, "`to` must not be empty"));
        }
        Ok(())
    }
}

async fn translate(
    State(state): State<AppState>,
    Json(body): Json<TranslateReq>,
) -> ApiResult<TranslationResult> {
    body.validate()?;
    let req = TranslateRequest {
        text: body.text,
        from: body.from.filter(|f| !f.trim().is_empty()),
        to: body.to,
    };
    state
        .translator
        .translate(&req, body.engine.as_deref(), &body.options)
        .await
        .map(Json)
        .map_err(translate_err)
}

async fn translate_async(
    State(state): State<AppState>,
    Json(body): Json<TranslateReq>,
) -> Result<(StatusCode, Json<TranslationTask>), ApiError> {
    body.validate()?;
    let task = state
        .tasks
        .submit(body.text, body.to, body.from, body.engine)
        .await
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<TranslationTask> {
    state
        .tasks
        .status(&task_id)
        .await
        .map(Json)
        .ok_or_else(|| err(StatusCode::NOT_FOUND, format!("unknown task {task_id}")))
}

#[derive(Debug, Default, Deserialize)]
struct ItemTranslateReq {
    /// Empty means the source's target languages.
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    engine: Option<String>,
    #[serde(default)]
    force: bool,
}

async fn translate_item(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    body: Bytes,
) -> ApiResult<Item> {
    let body: ItemTranslateReq = if body.is_empty() {
        ItemTranslateReq::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| err(StatusCode::BAD_REQUEST, format!("invalid body: {e}")))?
    };
    state
        .items
        .translate(&guid, &body.languages, body.engine.as_deref(), body.force)
        .await
        .map(Json)
        .map_err(item_translate_err)
}

#[derive(Debug, Deserialize)]
struct BatchReq {
    guids: Vec<String>,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    engine: Option<String>,
}

async fn translate_items(
    State(state): State<AppState>,
    Json(body): Json<BatchReq>,
) -> Json<BatchReport> {
    Json(
        state
            .items
            .translate_batch(&body.guids, &body.languages, body.engine.as_deref())
            .await,
    )
}

async fn item_translation_stats(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> ApiResult<TranslationStats> {
    state
        .items
        .stats(&guid)
        .await
        .map(Json)
        .map_err(item_translate_err)
}

#[derive(Debug, Default, Deserialize)]
struct LangQuery {
    lang: Option<String>,
}

async fn clear_item_translations(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Query(q): Query<LangQuery>,
) -> ApiResult<Value> {
    let cleared = state
        .items
        .clear(&guid, q.lang.as_deref())
        .await
        .map_err(item_translate_err)?;
    Ok(Json(json!({ "guid": guid, "cleared": cleared })))
}

#[derive(Serialize)]
struct CacheOut {
    count: usize,
    translations: Vec<CachedTranslation>,
}

async fn cached_translations(State(state): State<AppState>) -> Json<CacheOut> {
    let translations = state.translator.cached_translations().await;
    Json(CacheOut {
        count: translations.len(),
        translations,
    })
}

async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.translator.clear_cache().await;
    Json(json!({ "cleared": cleared }))
}

#[derive(Serialize)]
struct EngineOut {
    name: String,
    description: String,
    languages: Vec<&'static str>,
    default: bool,
}

async fn engines(State(state): State<AppState>) -> Json<Vec<EngineOut>> {
    let reg = state.translator.registry();
    let mut out: Vec<EngineOut> = reg
        .engines()
        .map(|e| EngineOut {
            name: e.name().to_string(),
            description: e.description().to_string(),
            languages: e.supported_languages().to_vec(),
            default: e.name() == reg.default_name(),
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Json(out)
}

async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}
