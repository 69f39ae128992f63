//! HTTP route handlers for the relay agent API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::channel::mpsc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::chat::{plan_delivery, DeliveryPlan, ReplyMode, RunMode, TurnRequest};
use crate::storage::{CrawlRecord, CrawlSite, CrawlSitePatch, NewCrawlSite};

use super::state::AppState;

/// Generic user-facing failure notice; internals go to logs only.
const GENERIC_FAILURE: &str = "message could not be processed";

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat_turn))
        .route("/api/chat/reset", post(chat_reset))
        .route("/api/crawl", post(crawl_stream))
        .route("/api/crawl/sync", post(crawl_sync))
        .route("/api/crawl-sites", post(create_crawl_site).get(list_crawl_sites))
        .route(
            "/api/crawl-sites/{id}",
            put(update_crawl_site).delete(delete_crawl_site),
        )
        .route("/api/crawl-records", get(list_crawl_records))
        .route("/api/crawl-status", get(crawl_status))
        .with_state(state)
}

type ApiFailure = (StatusCode, Json<serde_json::Value>);

/// Log the internal error and map it to the generic failure body.
fn generic_failure(context: &str, err: &dyn std::fmt::Display) -> ApiFailure {
    error!(context, error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": GENERIC_FAILURE })),
    )
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "nabi-agent",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Chat turn request.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Opaque identity from the chat surface.
    pub platform_id: String,
    /// Display name used when the user is first seen.
    pub username: String,
    /// The user's message.
    pub message: String,
    /// Assistant to use; defaults to the configured one.
    #[serde(default)]
    pub assistant_name: Option<String>,
    /// Requested reply shape.
    #[serde(default)]
    pub mode: ReplyMode,
    /// How to drive the run.
    #[serde(default)]
    pub run_mode: RunMode,
}

/// Chat turn response.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// The assistant's reply.
    pub reply: String,
    /// Correlation id of the persisted exchange.
    pub exchange_id: Uuid,
    /// Conversation the turn happened in.
    pub conversation_id: String,
    /// Delivery plan for the configured transport limits.
    pub delivery: DeliveryPlan,
}

/// Handle a chat turn.
async fn chat_turn(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiFailure> {
    let turn = TurnRequest {
        platform_id: request.platform_id,
        username: request.username,
        message: request.message,
        assistant_name: request.assistant_name,
        mode: request.mode,
        run_mode: request.run_mode,
        cancel: None,
    };

    let outcome = state
        .chat
        .generate_reply(turn)
        .await
        .map_err(|err| generic_failure("chat turn", &err))?;

    let delivery = plan_delivery(&outcome.reply, state.chat.delivery_config());

    Ok(Json(ChatResponse {
        reply: outcome.reply,
        exchange_id: outcome.exchange_id,
        conversation_id: outcome.conversation_id,
        delivery,
    }))
}

/// Context reset request.
#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    /// Opaque identity from the chat surface.
    pub platform_id: String,
}

/// Reset a user's conversation context.
async fn chat_reset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let reset = state
        .chat
        .reset_context(&request.platform_id)
        .await
        .map_err(|err| generic_failure("context reset", &err))?;
    Ok(Json(json!({ "reset": reset })))
}

/// Ad-hoc crawl request.
#[derive(Debug, Deserialize)]
pub struct CrawlRequest {
    /// Assistant used to structure the page.
    pub assistant_name: String,
    /// Page URL to fetch.
    pub url: String,
    /// CSS selector extracting the content block.
    pub selector: String,
}

/// Run an ad-hoc crawl, pushing progress as server-sent events:
/// `crawlingStarted` → `crawlingCompleted` → `gptResponse` | `error`.
async fn crawl_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CrawlRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (sender, receiver) = mpsc::unbounded();
    tokio::spawn(run_crawl_stream(state, request, sender));
    Sse::new(receiver).keep_alive(KeepAlive::default())
}

fn push_event(sender: &mpsc::UnboundedSender<Result<Event, Infallible>>, value: &serde_json::Value) {
    if let Ok(event) = Event::default().json_data(value) {
        let _ = sender.unbounded_send(Ok(event));
    }
}

async fn run_crawl_stream(
    state: Arc<AppState>,
    request: CrawlRequest,
    sender: mpsc::UnboundedSender<Result<Event, Infallible>>,
) {
    let guard = match state
        .crawl
        .begin_target(&request.assistant_name, &request.url)
    {
        Ok(guard) => guard,
        Err(err) => {
            error!(error = %err, "crawl rejected");
            push_event(
                &sender,
                &json!({ "status": "error", "message": "crawl already in progress" }),
            );
            return;
        }
    };

    push_event(
        &sender,
        &json!({ "status": "crawlingStarted", "message": "crawling started" }),
    );

    let Some(content) = state
        .crawl
        .fetch_content(&request.url, &request.selector)
        .await
    else {
        push_event(
            &sender,
            &json!({ "status": "error", "message": "failed to fetch content" }),
        );
        return;
    };

    push_event(
        &sender,
        &json!({ "status": "crawlingCompleted", "message": "crawling completed" }),
    );

    match state
        .crawl
        .structure_and_store(&request.assistant_name, &request.url, &content)
        .await
    {
        Ok(data) => push_event(&sender, &json!({ "status": "gptResponse", "data": data })),
        Err(err) => {
            error!(error = %err, "crawl structuring failed");
            push_event(
                &sender,
                &json!({ "status": "error", "message": GENERIC_FAILURE }),
            );
        }
    }

    drop(guard);
}

/// Run an ad-hoc crawl and return the structured payload as one JSON body.
async fn crawl_sync(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CrawlRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let data = state
        .crawl
        .crawl_target(&request.assistant_name, &request.url, &request.selector)
        .await
        .map_err(|err| generic_failure("sync crawl", &err))?;
    Ok(Json(data))
}

/// Create a crawl site.
async fn create_crawl_site(
    State(state): State<Arc<AppState>>,
    Json(site): Json<NewCrawlSite>,
) -> Result<(StatusCode, Json<CrawlSite>), ApiFailure> {
    if url::Url::parse(&site.url).is_err() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid url" })),
        ));
    }
    let created = state
        .crawl_store
        .create_site(site)
        .await
        .map_err(|err| generic_failure("create crawl site", &err))?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List all crawl sites.
async fn list_crawl_sites(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CrawlSite>>, ApiFailure> {
    let sites = state
        .crawl_store
        .list_sites()
        .await
        .map_err(|err| generic_failure("list crawl sites", &err))?;
    Ok(Json(sites))
}

/// Update a crawl site.
async fn update_crawl_site(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(patch): Json<CrawlSitePatch>,
) -> Result<Json<CrawlSite>, ApiFailure> {
    let updated = state
        .crawl_store
        .update_site(id, patch)
        .await
        .map_err(|err| generic_failure("update crawl site", &err))?;

    updated.map(Json).ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "crawl site not found" })),
    ))
}

/// Delete a crawl site.
async fn delete_crawl_site(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiFailure> {
    let removed = state
        .crawl_store
        .delete_site(id)
        .await
        .map_err(|err| generic_failure("delete crawl site", &err))?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "crawl site not found" })),
        ))
    }
}

/// Crawl record listing filter.
#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    /// Restrict to one site.
    #[serde(default)]
    pub site_id: Option<i64>,
}

/// List stored crawl records, newest first.
async fn list_crawl_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordsQuery>,
) -> Result<Json<Vec<CrawlRecord>>, ApiFailure> {
    let records = state
        .crawl_store
        .list_records(query.site_id)
        .await
        .map_err(|err| generic_failure("list crawl records", &err))?;
    Ok(Json(records))
}

/// Snapshot of crawls currently in flight.
async fn crawl_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.crawl.status_snapshot())
}
