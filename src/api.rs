use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures_util::stream::{self, Stream};
use rusqlite::Connection;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::task;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::QueryError;
use crate::models::{ListTransactionsResponse, ListUsersResponse};
use crate::query::{self, TransactionFilters};
use crate::stream::{StreamCoordinator, StreamFrame};
use crate::window::WindowCache;

#[derive(Clone)]
pub struct AppState {
    pub conn: Arc<Mutex<Connection>>,
    pub windows: WindowCache,
    pub tick_interval: Duration,
}

pub async fn serve(cfg: Config, conn: Arc<Mutex<Connection>>, windows: WindowCache) -> eyre::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        conn,
        windows,
        tick_interval: Duration::from_millis(cfg.tick_interval_ms),
    };

    let app = Router::new()
        .route("/", get(|| async { "Anomaly Streamer API running" }))
        .route("/health", get(health))
        .route("/users", get(list_users))
        .route("/transactions", get(list_transactions))
        .route("/sse/transactions/:user_id", get(sse_transactions))
        .with_state(state)
        .layer(cors);

    let addr = SocketAddr::from(([127, 0, 0, 1], cfg.port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "health": "ok" }))
}

async fn list_transactions(
    State(state): State<AppState>,
    Query(filters): Query<TransactionFilters>,
) -> Result<Json<ListTransactionsResponse>, QueryError> {
    let page = query::list_transactions(Arc::clone(&state.conn), filters).await?;
    Ok(Json(page))
}

async fn list_users(State(state): State<AppState>) -> Result<Json<ListUsersResponse>, QueryError> {
    let conn = Arc::clone(&state.conn);
    let users = task::spawn_blocking(move || {
        let db = conn
            .lock()
            .map_err(|_| QueryError::Internal("poisoned db lock".to_string()))?;
        crate::db::distinct_users(&db).map_err(QueryError::from)
    })
    .await
    .map_err(|e| QueryError::Internal(format!("query task failed: {e}")))??;

    Ok(Json(ListUsersResponse { users }))
}

/// Open an SSE connection streaming simulated transactions for one user.
/// The coordinator runs as its own task; dropping the response closes the
/// channel, which the coordinator observes at its next tick.
async fn sse_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(16);
    let coordinator = StreamCoordinator::new(
        user_id,
        state.tick_interval,
        Arc::clone(&state.conn),
        state.windows.clone(),
    );
    tokio::spawn(coordinator.run(tx));

    let events = stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((Ok::<_, Infallible>(frame_to_event(frame)), rx))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn frame_to_event(frame: StreamFrame) -> Event {
    match frame {
        StreamFrame::Ping => Event::default().comment("ping"),
        StreamFrame::Txn(txn) => match serde_json::to_string(&txn) {
            Ok(payload) => Event::default().data(payload),
            Err(e) => Event::default()
                .event("error")
                .data(format!("serialization failure: {e}")),
        },
        StreamFrame::Error(msg) => Event::default().event("error").data(msg),
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = match &self {
            QueryError::BadCursor(_) => StatusCode::BAD_REQUEST,
            QueryError::Store(_) | QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("query path failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}
