use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State as AxumState};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use commonware_utils::{from_hex, hex};
use fortune_execution::{verify_commit_reveal_slices, SystemClock};
use fortune_types::GameKind;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::{error, info, warn};

mod config;
mod hub;
mod protocol;
mod sqlite;

use config::ServerConfig;
use hub::GameHub;
use protocol::{InboundMessage, OutboundEvent, OutboundResponse};
use sqlite::SqlitePersistence;

type Hub = GameHub<SqlitePersistence, SystemClock>;

/// Open sockets per player.
#[derive(Default)]
struct Sessions {
    open: HashMap<String, usize>,
}

impl Sessions {
    fn attach(&mut self, player_id: &str) {
        *self.open.entry(player_id.to_string()).or_default() += 1;
    }

    /// Returns `true` when the last socket serving `player_id` closed.
    fn detach(&mut self, player_id: &str) -> bool {
        let Some(count) = self.open.get_mut(player_id) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return false;
        }
        self.open.remove(player_id);
        true
    }
}

#[derive(Clone)]
struct AppState {
    hub: Arc<Mutex<Hub>>,
    sessions: Arc<Mutex<Sessions>>,
    broadcaster: broadcast::Sender<OutboundEvent>,
}

impl AppState {
    /// A panic mid-request must not take both games down with it.
    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Release the players joined over a closed socket.
    fn release(&self, players: &Mutex<HashSet<String>>) {
        let joined: Vec<String> = players
            .lock()
            .map(|players| players.iter().cloned().collect())
            .unwrap_or_default();
        let departed: Vec<String> = {
            let mut sessions = self.sessions();
            joined
                .into_iter()
                .filter(|player_id| sessions.detach(player_id))
                .collect()
        };
        if departed.is_empty() {
            return;
        }
        let mut hub = self.hub();
        for player_id in &departed {
            hub.disconnect(player_id);
        }
        info!(players = departed.len(), "released players of closed socket");
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    AxumState(state): AxumState<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let mut broadcast_rx = state.broadcaster.subscribe();
    // Players joined over this socket; addressed events go only to them.
    let players = Arc::new(Mutex::new(HashSet::<String>::new()));

    let write_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let broadcast_task = {
        let tx = tx.clone();
        let players = players.clone();
        tokio::spawn(async move {
            loop {
                let event = match broadcast_rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "socket lagging behind broadcasts");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !addressed_to(&players, &event) {
                    continue;
                }
                if let Ok(payload) = serde_json::to_string(&event) {
                    let _ = tx.send(Message::Text(payload));
                }
            }
        })
    };

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<InboundMessage>(&text) {
                Ok(inbound) => handle_inbound(inbound, &state, &players, &tx),
                Err(err) => {
                    warn!(?err, "invalid inbound message");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    write_task.abort();
    broadcast_task.abort();
    state.release(&players);
}

fn addressed_to(players: &Mutex<HashSet<String>>, event: &OutboundEvent) -> bool {
    let Some(player_id) = event.player_id() else {
        return true;
    };
    players
        .lock()
        .map(|players| players.contains(player_id))
        .unwrap_or(false)
}

fn handle_inbound(
    inbound: InboundMessage,
    state: &AppState,
    players: &Mutex<HashSet<String>>,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let joining = match &inbound {
        InboundMessage::Join { player_id, .. } => Some(player_id.clone()),
        _ => None,
    };
    let (response, events) = state.hub().handle(inbound);
    if let (Some(player_id), Some(response)) = (joining, &response) {
        if admit(players, &player_id, response) {
            state.sessions().attach(&player_id);
        }
    }
    for event in events {
        let _ = state.broadcaster.send(event);
    }
    if let Some(response) = response {
        send_response(tx, response);
    }
}

/// Address `player_id` to this socket once its join was accepted. Returns
/// `true` the first time.
fn admit(
    players: &Mutex<HashSet<String>>,
    player_id: &str,
    response: &OutboundResponse,
) -> bool {
    if !matches!(response, OutboundResponse::Ack { .. }) {
        return false;
    }
    players
        .lock()
        .map(|mut players| players.insert(player_id.to_string()))
        .unwrap_or(false)
}

fn send_response(tx: &mpsc::UnboundedSender<Message>, response: OutboundResponse) {
    if let Ok(payload) = serde_json::to_string(&response) {
        let _ = tx.send(Message::Text(payload));
    }
}

fn parse_game(raw: &str) -> Result<GameKind, (StatusCode, String)> {
    GameKind::parse(raw).ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown game: {raw}")))
}

async fn state_handler(
    Path(game): Path<String>,
    AxumState(state): AxumState<AppState>,
) -> impl IntoResponse {
    let game = match parse_game(&game) {
        Ok(game) => game,
        Err(err) => return err.into_response(),
    };
    Json(state.hub().state(game)).into_response()
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history_handler(
    Path(game): Path<String>,
    Query(query): Query<HistoryQuery>,
    AxumState(state): AxumState<AppState>,
) -> impl IntoResponse {
    let game = match parse_game(&game) {
        Ok(game) => game,
        Err(err) => return err.into_response(),
    };
    let limit = query.limit.unwrap_or(50).min(500);
    match state.hub().history(game, limit) {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => {
            error!(?err, game = game.as_str(), "history query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "history unavailable").into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reveal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Check a published commit against a revealed seed.
async fn verify_handler(Path((commit, reveal)): Path<(String, String)>) -> impl IntoResponse {
    let (Some(commit), Some(reveal)) = (from_hex(&commit), from_hex(&reveal)) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(VerifyResponse {
                valid: false,
                reveal: None,
                error: Some("invalid hex".to_string()),
            }),
        );
    };
    let response = match verify_commit_reveal_slices(&commit, &reveal) {
        Ok(reveal) => VerifyResponse {
            valid: true,
            reveal: Some(hex(&reveal)),
            error: None,
        },
        Err(err) => VerifyResponse {
            valid: false,
            reveal: None,
            error: Some(err.to_string()),
        },
    };
    (StatusCode::OK, Json(response))
}

async fn healthz() -> &'static str {
    "ok"
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/state/:game", get(state_handler))
        .route("/history/:game", get(history_handler))
        .route("/verify/:commit/:reveal", get(verify_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    let persistence = SqlitePersistence::open(&config.db_path)?;
    let hub = GameHub::new(
        &config.wheel,
        &config.crash,
        persistence,
        SystemClock,
        config.starting_balance,
    )?;
    let hub = Arc::new(Mutex::new(hub));
    let (broadcaster, _) = broadcast::channel::<OutboundEvent>(1024);

    let state = AppState {
        hub: hub.clone(),
        sessions: Arc::new(Mutex::new(Sessions::default())),
        broadcaster: broadcaster.clone(),
    };

    // Tick loop
    let tick_state = state.clone();
    let tick_ms = config.tick_ms;
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_millis(tick_ms));
        loop {
            interval.tick().await;
            let events = tick_state.hub().tick();
            for event in events {
                let _ = tick_state.broadcaster.send(event);
            }
        }
    });

    let app = router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid listen addr")?;
    info!(%addr, db = %config.db_path.display(), "round server listening");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fortune_execution::RoundCommitment;

    #[tokio::test]
    async fn test_healthz() {
        assert_eq!(healthz().await, "ok");
    }

    #[tokio::test]
    async fn test_verify_accepts_published_pair() {
        let commitment = RoundCommitment::new("fruity-fortune", GameKind::Wheel, 42);
        let response = verify_handler(Path((hex(&commitment.commit), hex(&commitment.reveal))))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_hex() {
        let response = verify_handler(Path(("zz".to_string(), "00".to_string())))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_parse_game() {
        assert_eq!(parse_game("crash").unwrap(), GameKind::Crash);
        assert_eq!(parse_game("poker").unwrap_err().0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_only_accepted_joins_are_addressed() {
        let players = Mutex::new(HashSet::new());
        let refused = OutboundResponse::Error {
            request_id: "j1".to_string(),
            code: "PERSISTENCE_FAILURE".to_string(),
            message: "store offline".to_string(),
        };
        assert!(!admit(&players, "mallory", &refused));
        let deferred = OutboundEvent::Deferred {
            player_id: "mallory".to_string(),
            game: "wheel",
            round_id: 1,
        };
        assert!(!addressed_to(&players, &deferred));

        let accepted = OutboundResponse::ack("j2".to_string(), None);
        assert!(admit(&players, "alice", &accepted));
        assert!(!admit(&players, "alice", &accepted));
        assert_eq!(players.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_last_socket_releases_player() {
        let mut sessions = Sessions::default();
        sessions.attach("alice");
        sessions.attach("alice");
        assert!(!sessions.detach("alice"));
        assert!(sessions.detach("alice"));
        assert!(!sessions.detach("alice"));
        assert!(!sessions.detach("bob"));
    }

    #[test]
    fn test_addressed_events_are_filtered() {
        let players = Mutex::new(HashSet::from(["alice".to_string()]));
        let deferred = |player: &str| OutboundEvent::Deferred {
            player_id: player.to_string(),
            game: "wheel",
            round_id: 1,
        };
        assert!(addressed_to(&players, &deferred("alice")));
        assert!(!addressed_to(&players, &deferred("bob")));
    }
}
