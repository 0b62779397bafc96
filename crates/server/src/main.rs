use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use server_api::{conversation_history, send_message, ApiContext, EchoAssistant};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{
        ConversationHistoryQuery, ConversationHistoryResponse, SendMessageQuery,
        SendMessageResponse, CONVERSATION_HISTORY_ROUTE, SEND_MESSAGE_ROUTE,
    },
};
use storage::Storage;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        assistant: Arc::new(EchoAssistant),
    };

    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "assistant service listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let history_route = CONVERSATION_HISTORY_ROUTE.trim_end_matches('/');
    let send_route = SEND_MESSAGE_ROUTE.trim_end_matches('/');
    Router::new()
        .route("/healthz", get(healthz))
        .route(CONVERSATION_HISTORY_ROUTE, get(http_conversation_history))
        .route(history_route, get(http_conversation_history))
        .route(SEND_MESSAGE_ROUTE, post(http_send_message))
        .route(send_route, post(http_send_message))
        .with_state(state)
}

async fn healthz(
    State(state): State<Arc<AppState>>,
) -> Result<&'static str, (StatusCode, Json<ApiError>)> {
    state.api.storage.health_check().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Internal, e.to_string())),
        )
    })?;
    Ok("ok")
}

async fn http_conversation_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConversationHistoryQuery>,
) -> ApiResult<ConversationHistoryResponse> {
    conversation_history(&state.api, &query.thread_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SendMessageQuery>,
) -> ApiResult<SendMessageResponse> {
    send_message(&state.api, &query.thread_id, &query.message)
        .await
        .map(Json)
        .map_err(error_response)
}

fn error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Upstream => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
