use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use dungeon_server::config::ServerConfig;
use dungeon_server::db::Database;
use dungeon_server::error::GameError;
use dungeon_server::game::{self, Game, Session};
use dungeon_server::persist::{self, PersistQueue, RetryPolicy};
use dungeon_server::player::PlayerId;
use dungeon_server::protocol::{self, ServerMessage};
use dungeon_server::world::WorldRules;

// ============================================================================
// App State
// ============================================================================

#[derive(Clone)]
struct AppState {
    game: Arc<Game>,
    auth_rate_limiter: RateLimiter,
}

type RateLimitEntry = (u32, std::time::Instant);

/// Simple IP-based rate limiter
#[derive(Clone)]
struct RateLimiter {
    /// IP -> (request_count, window_start)
    entries: Arc<DashMap<String, RateLimitEntry>>,
    max_requests: u32,
    window_duration: Duration,
}

impl RateLimiter {
    fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_requests,
            window_duration: Duration::from_secs(window_secs),
        }
    }

    /// Returns true if the request is allowed.
    fn check(&self, ip: &str) -> bool {
        let now = std::time::Instant::now();

        let mut entry = self.entries.entry(ip.to_string()).or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        if now.duration_since(*window_start) > self.window_duration {
            *count = 0;
            *window_start = now;
        }

        if *count >= self.max_requests {
            return false;
        }

        *count += 1;
        true
    }

    /// Failed logins count extra against the window.
    fn record_failure(&self, ip: &str) {
        let now = std::time::Instant::now();
        let mut entry = self.entries.entry(ip.to_string()).or_insert((0, now));
        let (count, _) = entry.value_mut();
        *count = (*count).saturating_add(2);
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
    confirm: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    success: bool,
    token: Option<String>,
    player_id: Option<PlayerId>,
    username: Option<String>,
    error: Option<String>,
}

impl AuthResponse {
    fn ok(session: Session) -> Self {
        Self {
            success: true,
            token: Some(session.token),
            player_id: Some(session.player_id),
            username: Some(session.username),
            error: None,
        }
    }

    fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            token: None,
            player_id: None,
            username: None,
            error: Some(error.to_string()),
        }
    }
}

fn status_for(err: &GameError) -> StatusCode {
    match err {
        GameError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        GameError::UsernameTaken | GameError::AlreadyConnected(_) => StatusCode::CONFLICT,
        GameError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn register_account(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let client_ip = addr.ip().to_string();

    if !state.auth_rate_limiter.check(&client_ip) {
        warn!("Rate limit exceeded for registration from {}", client_ip);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(AuthResponse::failed("Too many requests. Please try again later.")),
        );
    }

    match state.game.register(&req.username, &req.password, &req.confirm).await {
        Ok(session) => {
            info!("Account registered: {} from {}", session.username, client_ip);
            (StatusCode::OK, Json(AuthResponse::ok(session)))
        }
        Err(e) => (status_for(&e), Json(AuthResponse::failed(e))),
    }
}

async fn login_account(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let client_ip = addr.ip().to_string();

    if !state.auth_rate_limiter.check(&client_ip) {
        warn!("Rate limit exceeded for login from {}", client_ip);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(AuthResponse::failed("Too many login attempts. Please try again later.")),
        );
    }

    match state.game.login(&req.username, &req.password).await {
        Ok(session) => (StatusCode::OK, Json(AuthResponse::ok(session))),
        Err(e) => {
            if e == GameError::InvalidCredentials {
                state.auth_rate_limiter.record_failure(&client_ip);
                warn!("Failed login attempt for '{}' from {}", req.username, client_ip);
            }
            (status_for(&e), Json(AuthResponse::failed(e)))
        }
    }
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "players": state.game.player_count().await,
    }))
}

async fn map_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.game.map_info().await)
}

async fn leaderboard(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.game.leaderboard().await)
}

// ============================================================================
// WebSocket Handler
// ============================================================================

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

/// Frames are answered in the encoding the client last used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    MessagePack,
    Json,
}

fn frame(msg: &ServerMessage, encoding: Encoding) -> Option<Message> {
    let encoded = match encoding {
        Encoding::MessagePack => protocol::encode_server_message(msg).map(Message::Binary),
        Encoding::Json => protocol::encode_server_json(msg).map(Message::Text),
    };
    match encoded {
        Ok(message) => Some(message),
        Err(e) => {
            error!("{}", e);
            None
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(socket: WebSocket, state: AppState, token: String) {
    let (mut sender, mut receiver) = socket.split();

    let (player_id, welcome) = match state.game.connect(&token).await {
        Ok(admitted) => admitted,
        Err(e) => {
            warn!("WebSocket rejected: {}", e);
            if let Some(message) = frame(&ServerMessage::from(&e), Encoding::MessagePack) {
                let _ = sender.send(message).await;
            }
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!("Player {} connected", player_id);

    let mut events = state.game.subscribe();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(32);
    let _ = tx.send(welcome).await;

    let (encoding_tx, encoding_rx) = tokio::sync::watch::channel(Encoding::MessagePack);

    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(msg) = rx.recv() => msg,
                event = events.recv() => match event {
                    Ok(event) if event.audience.includes(player_id) => event.msg,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Player {} lagged, skipped {} events", player_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                else => break,
            };
            let encoding = *encoding_rx.borrow();
            let Some(message) = frame(&msg, encoding) else {
                continue;
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let game = state.game.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let decoded = match msg {
                Message::Binary(data) => {
                    let _ = encoding_tx.send(Encoding::MessagePack);
                    protocol::decode_client_message(&data)
                }
                Message::Text(text) => {
                    let _ = encoding_tx.send(Encoding::Json);
                    protocol::decode_client_json(&text)
                }
                Message::Close(_) => break,
                _ => continue,
            };

            let replies = match decoded {
                Ok(command) => game.handle_command(player_id, command).await,
                Err(e) => vec![ServerMessage::from(&e)],
            };
            for reply in replies {
                if tx.send(reply).await.is_err() {
                    return;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.game.disconnect(player_id).await;
    info!("Player {} disconnected", player_id);
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dungeon_server=info".parse().expect("valid log directive")),
        )
        .init();

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let db = match Database::new(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database {}: {}", config.database_url, e);
            std::process::exit(1);
        }
    };

    let (persist_queue, persist_rx) = PersistQueue::new();
    let (stop_worker, worker_stopped) = oneshot::channel::<()>();
    let worker = tokio::spawn(persist::run_worker_until(
        db.clone(),
        persist_rx,
        RetryPolicy::from(&config.persistence),
        async move {
            let _ = worker_stopped.await;
        },
    ));

    let world = match game::open_world(WorldRules::from(&config), &db, persist_queue).await {
        Ok(world) => world,
        Err(e) => {
            error!("Failed to load world: {}", e);
            std::process::exit(1);
        }
    };

    let tick = config.movement.tick();
    let autosave = Duration::from_secs(config.autosave_secs.max(1));
    let addr = config.bind_addr.clone();
    let game = Arc::new(Game::new(config, world, db));

    // Movement, restocking and combat timeouts
    let tick_game = game.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            tick_game.tick().await;
        }
    });

    let save_game = game.clone();
    let autosaver = tokio::spawn(async move {
        let mut interval = tokio::time::interval(autosave);
        loop {
            interval.tick().await;
            save_game.autosave().await;
        }
    });

    let state = AppState {
        game: game.clone(),
        auth_rate_limiter: RateLimiter::new(10, 60),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/register", post(register_account))
        .route("/api/login", post(login_account))
        .route("/api/map", get(map_info))
        .route("/api/leaderboard", get(leaderboard))
        .route("/ws", get(ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::OPTIONS])
                .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION]),
        )
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Dungeon server listening on http://{}", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    };
    if let Err(e) = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {}", e);
    }

    info!("Shutting down, saving world");
    ticker.abort();
    autosaver.abort();
    let _ = ticker.await;
    let _ = autosaver.await;
    // open sockets keep their sessions; end them so combats settle and players save
    let departed = game.disconnect_all().await;
    game.save_all().await;
    info!("Disconnected {} players", departed);
    let _ = stop_worker.send(());
    if tokio::time::timeout(Duration::from_secs(10), worker).await.is_err() {
        warn!("Persistence worker did not finish in time");
    }
}
