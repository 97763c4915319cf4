// HTTP and WebSocket surface. Handlers only read engine output.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use crash_core::{verify_entry, Phase, Snapshot};
use crash_shared::{ApiError, ApiResult, ErrorBody, HistoryResponse, ServerMsg, VerifyResponse};
use futures::StreamExt;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::driver::SnapshotFeed;
use crate::store;

#[derive(Clone)]
pub struct AppState {
    pub feed: SnapshotFeed,
    pub db: SqlitePool,
    pub instant_crash_probability: f64,
}

/// Wrapper so shared API errors can leave a handler as a response.
pub struct AppError(ApiError);

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ApiError::RoundNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/state", get(route_state))
        .route("/history", get(route_history))
        .route("/verify/:round_id", get(route_verify))
        .route("/ws", get(route_ws))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn route_state(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    Json(state.feed.snapshot())
}

async fn route_history(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        rounds: state.feed.snapshot().history.to_vec(),
    })
}

async fn route_verify(
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<String>,
) -> Result<Json<VerifyResponse>, AppError> {
    let round_id: u64 = round_id
        .parse()
        .map_err(|_| ApiError::Invalid(format!("'{round_id}' is not a round id")))?;
    let entry = find_completed(&state, round_id).await?;
    let verification = verify_entry(&entry, state.instant_crash_probability);
    Ok(Json(VerifyResponse::new(&entry, &verification)))
}

async fn find_completed(state: &AppState, round_id: u64) -> ApiResult<crash_core::HistoryEntry> {
    let snap = state.feed.snapshot();
    if let Some(entry) = snap.history.iter().find(|e| e.round_id == round_id) {
        return Ok(entry.clone());
    }
    match store::find_round(&state.db, round_id).await {
        Ok(Some(entry)) => Ok(entry),
        Ok(None) => Err(ApiError::RoundNotFound(round_id)),
        Err(e) => {
            error!(round_id, error = %e, "round lookup failed");
            Err(ApiError::Internal)
        }
    }
}

async fn route_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    info!("subscriber connected");
    let mut rx = state.feed.subscribe();
    let mut last_full = None;
    if !send_msg(&mut socket, &frame(&mut last_full, state.feed.snapshot())).await {
        return;
    }

    loop {
        tokio::select! {
            recv = rx.recv() => {
                let msg = match recv {
                    Ok(snap) => frame(&mut last_full, snap),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        last_full = None;
                        ServerMsg::Lagged(n)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !send_msg(&mut socket, &msg).await {
                    break;
                }
            }
            incoming = socket.next() => {
                match incoming {
                    // read-only feed: anything the client says is ignored
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    info!("subscriber disconnected");
}

/// Full snapshot on every phase change, bare multiplier while a round the
/// client already has in full is flying.
fn frame(last_full: &mut Option<(u64, Phase)>, snap: Snapshot) -> ServerMsg {
    if snap.phase == Phase::Flying && *last_full == Some((snap.round_id, Phase::Flying)) {
        return ServerMsg::Multiplier {
            round_id: snap.round_id,
            multiplier: snap.multiplier,
        };
    }
    *last_full = Some((snap.round_id, snap.phase));
    ServerMsg::Snapshot(snap)
}

async fn send_msg(socket: &mut WebSocket, msg: &ServerMsg) -> bool {
    match serde_json::to_string(msg) {
        Ok(txt) => socket.send(Message::Text(txt)).await.is_ok(),
        Err(e) => {
            error!(error = %e, "failed to serialize ServerMsg");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{EngineTask, TokioClock};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use crash_core::{EngineConfig, HmacSeedSource, RoundEngine};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;
    use tower::ServiceExt;

    // real time: sqlx's pool timeouts do not mix with a paused clock
    async fn app(wait: Duration) -> (Router, EngineTask, SqlitePool) {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        store::init_db(&db).await.unwrap();
        let config = EngineConfig {
            wait,
            growth_rate: 50.0,
            instant_crash_probability: 0.0,
            ..EngineConfig::default()
        };
        let engine = RoundEngine::new(config, TokioClock, HmacSeedSource::new("salt"));
        let task = EngineTask::spawn(engine, Duration::from_millis(5));
        let state = Arc::new(AppState {
            feed: task.feed(),
            db: db.clone(),
            instant_crash_probability: 0.0,
        });
        (build_router(state), task, db)
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn snap(round_id: u64, phase: Phase, multiplier: f64) -> Snapshot {
        Snapshot {
            round_id,
            phase,
            multiplier,
            next_phase_deadline: None,
            commitment: "c".into(),
            seed: None,
            client_seed: None,
            crash_point: None,
            history: Vec::<crash_core::HistoryEntry>::new().into(),
        }
    }

    #[test]
    fn ws_frames_send_history_only_on_phase_changes() {
        let mut last = None;
        let kinds: Vec<&str> = [
            snap(1, Phase::Waiting, 1.0),
            snap(1, Phase::Flying, 1.0),
            snap(1, Phase::Flying, 1.1),
            snap(1, Phase::Flying, 1.2),
            snap(1, Phase::Crashed, 1.2),
            snap(2, Phase::Waiting, 1.0),
        ]
        .into_iter()
        .map(|s| match frame(&mut last, s) {
            ServerMsg::Snapshot(_) => "full",
            ServerMsg::Multiplier { .. } => "tick",
            ServerMsg::Lagged(_) => "lagged",
        })
        .collect();
        assert_eq!(kinds, vec!["full", "full", "tick", "tick", "full", "full"]);

        // a client that lagged gets a full snapshot again
        let mut last = None;
        assert!(matches!(frame(&mut last, snap(4, Phase::Flying, 2.0)), ServerMsg::Snapshot(_)));
    }

    #[tokio::test]
    async fn state_hides_the_seed_while_waiting() {
        let (app, task, _db) = app(Duration::from_secs(60)).await;
        let (status, body) = get_json(&app, "/state").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "waiting");
        assert_eq!(body["round_id"], 1);
        assert!(body["seed"].is_null());
        assert_eq!(body["commitment"].as_str().unwrap().len(), 64);
        task.stop().await.unwrap();
    }

    #[tokio::test]
    async fn verify_completed_round() {
        let (app, task, _db) = app(Duration::from_millis(20)).await;
        let mut rx = task.subscribe();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Ok(snap) if snap.phase == Phase::Crashed => break,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("feed closed"),
                }
            }
        })
        .await
        .expect("round 1 crashed");

        let (status, body) = get_json(&app, "/verify/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fair"], true);
        assert_eq!(body["round_id"], 1);

        let (status, _) = get_json(&app, "/history").await;
        assert_eq!(status, StatusCode::OK);
        task.stop().await.unwrap();
    }

    #[tokio::test]
    async fn verify_falls_back_to_the_store() {
        let (app, task, db) = app(Duration::from_secs(60)).await;
        let seed = "ab".repeat(32);
        let entry = crash_core::HistoryEntry {
            round_id: 900,
            crash_point: crash_core::recompute_crash_point(&seed, "salt", 900, 0.0),
            timestamp: chrono::Utc::now(),
            commitment: crash_core::derive_hash_hex(seed.as_bytes()),
            seed,
            client_seed: "salt".into(),
        };
        store::record_round(&db, &entry).await.unwrap();

        let (status, body) = get_json(&app, "/verify/900").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["commitment_matches"], true);
        assert_eq!(body["fair"], true);
        task.stop().await.unwrap();
    }

    #[tokio::test]
    async fn verify_rejects_unknown_and_malformed_ids() {
        let (app, task, _db) = app(Duration::from_secs(60)).await;
        let (status, body) = get_json(&app, "/verify/42").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("42"));

        let (status, _) = get_json(&app, "/verify/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        task.stop().await.unwrap();
    }
}
