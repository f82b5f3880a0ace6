//! Async facade over the [`World`].
//!
//! The world sits behind one exclusive lock so every command runs to completion
//! before the next one starts. Direct replies are returned to the caller;
//! everything other players should see goes out on a broadcast channel tagged
//! with its audience.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::auth::{self, AuthError, TokenSigner};
use crate::config::ServerConfig;
use crate::db::{Database, PersistError};
use crate::error::GameError;
use crate::item::ItemIdAllocator;
use crate::leaderboard::{LEADERBOARD_SIZE, LeaderboardEntry};
use crate::map::{Coord, Direction, MapError};
use crate::persist::PersistQueue;
use crate::player::{Player, PlayerId};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::world::{CombatResult, MapInfo, Moved, World, WorldRules};

/// A login that has not opened its WebSocket yet is dropped after this long.
const PENDING_LOGIN_TTL: Duration = Duration::from_secs(300);

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Outbound events
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Audience {
    All,
    Players(Vec<PlayerId>),
}

impl Audience {
    pub fn includes(&self, player_id: PlayerId) -> bool {
        match self {
            Audience::All => true,
            Audience::Players(ids) => ids.contains(&player_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub audience: Audience,
    pub msg: ServerMessage,
}

/// Handed to the client after register/login; the token opens the WebSocket.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub player_id: PlayerId,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Storage(#[from] PersistError),
    #[error(transparent)]
    Map(#[from] MapError),
}

fn storage_error(err: PersistError) -> GameError {
    match err {
        PersistError::UsernameTaken => GameError::UsernameTaken,
        other => GameError::Storage(other.to_string()),
    }
}

fn hashing_error(err: AuthError) -> GameError {
    GameError::Storage(err.to_string())
}

/// Load the stored world, or generate and store a new one.
///
/// The leaderboard is seeded from the stored highscores.
pub async fn open_world(rules: WorldRules, db: &Database, persist: PersistQueue) -> Result<World, StartupError> {
    let max_item_id = db.max_item_id().await?;
    let mut world = match db.load_world().await? {
        Some(record) if !record.rooms.is_empty() => World::restore(rules, record, max_item_id, persist),
        stored => {
            // keep an existing salt so stored password hashes stay valid
            let salt = stored.map(|r| r.password_salt).unwrap_or_else(auth::generate_salt);
            let world = World::generate(rules, &salt, ItemIdAllocator::starting_after(max_item_id), persist)?;
            db.save_world(&world.record()).await?;
            world
        }
    };

    for entry in db.top_highscores(LEADERBOARD_SIZE).await? {
        world.consider_entry(entry);
    }
    Ok(world)
}

// ============================================================================
// Game
// ============================================================================

pub struct Game {
    world: Mutex<World>,
    db: Database,
    config: ServerConfig,
    signer: TokenSigner,
    /// Logged-in players waiting for their WebSocket, keyed by token
    pending: DashMap<String, (Player, Instant)>,
    events: broadcast::Sender<Outbound>,
}

impl Game {
    pub fn new(config: ServerConfig, world: World, db: Database) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            world: Mutex::new(world),
            db,
            config,
            signer: TokenSigner::new(),
            pending: DashMap::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.events.subscribe()
    }

    fn publish(&self, audience: Audience, msg: ServerMessage) {
        if let Audience::Players(ids) = &audience {
            if ids.is_empty() {
                return;
            }
        }
        // an error only means nobody is listening
        let _ = self.events.send(Outbound { audience, msg });
    }

    // ------------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------------

    pub async fn register(&self, username: &str, password: &str, confirm: &str) -> Result<Session, GameError> {
        auth::validate_registration(username, password, confirm).map_err(GameError::Validation)?;

        let (salt, spawn) = {
            let world = self.world.lock().await;
            (world.password_salt().to_string(), world.spawn())
        };
        let hash = auth::hash_password(password, &salt).map_err(hashing_error)?;
        let is_admin = self.config.is_admin(username);
        let player_id = self
            .db
            .create_player(username, &hash, is_admin, spawn)
            .await
            .map_err(storage_error)?;

        info!("Registered {} (id: {})", username, player_id);
        let mut player = Player::new(player_id, username, &self.signer.issue(player_id), spawn);
        player.is_admin = is_admin;
        Ok(self.stage(player))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, GameError> {
        let record = self
            .db
            .load_player(username)
            .await
            .map_err(storage_error)?
            .ok_or(GameError::InvalidCredentials)?;
        if !auth::verify_password(password, &record.password_hash) {
            return Err(GameError::InvalidCredentials);
        }
        if self.world.lock().await.player_by_username(username).is_some() {
            return Err(GameError::AlreadyConnected(username.to_string()));
        }

        let mut player = Player::new(record.id, &record.username, &self.signer.issue(record.id), record.coord);
        player.is_admin = record.is_admin || self.config.is_admin(&record.username);
        player.highscore = record.highscore;
        player.inventory = record.items.into_iter().map(|item| (item.id, item)).collect();

        info!("{} logged in", username);
        Ok(self.stage(player))
    }

    fn stage(&self, player: Player) -> Session {
        let session = Session {
            token: player.auth_token.clone(),
            player_id: player.id,
            username: player.username.clone(),
        };
        self.pending.insert(session.token.clone(), (player, Instant::now()));
        session
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    /// Admit the player a token was issued for. Returns their id and the
    /// welcome message.
    pub async fn connect(&self, token: &str) -> Result<(PlayerId, ServerMessage), GameError> {
        let player_id = self.signer.verify(token).ok_or(GameError::InvalidCredentials)?;
        let (_, (player, _)) = self.pending.remove(token).ok_or(GameError::InvalidCredentials)?;
        if player.id != player_id {
            warn!("Token for player {} was staged for player {}", player_id, player.id);
            return Err(GameError::InvalidCredentials);
        }

        let mut world = self.world.lock().await;
        world.admit(player)?;
        let welcome = Self::welcome(&world, player_id)?;

        if let Some(player) = world.player(player_id) {
            let others: Vec<PlayerId> = world.players_at(player.coord).into_iter().filter(|id| *id != player_id).collect();
            self.publish(
                Audience::Players(others),
                ServerMessage::PlayerJoined {
                    player_id,
                    username: player.username.clone(),
                    x: player.coord.x,
                    y: player.coord.y,
                },
            );
        }
        Ok((player_id, welcome))
    }

    pub async fn disconnect(&self, player_id: PlayerId) {
        let mut world = self.world.lock().await;
        let Some(departure) = world.remove_player(player_id) else {
            return;
        };
        if let Some(result) = &departure.combat {
            self.publish_combat_result(&world, result);
        }

        let player = &departure.player;
        self.publish(
            Audience::Players(world.players_at(player.coord)),
            ServerMessage::PlayerLeft {
                player_id,
                username: player.username.clone(),
                x: player.coord.x,
                y: player.coord.y,
            },
        );
    }

    /// Take every live player out of the world. Used on shutdown.
    pub async fn disconnect_all(&self) -> usize {
        let player_ids = self.world.lock().await.player_ids();
        for player_id in &player_ids {
            self.disconnect(*player_id).await;
        }
        player_ids.len()
    }

    pub async fn is_connected(&self, player_id: PlayerId) -> bool {
        self.world.lock().await.player(player_id).is_some()
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Run one client command. Failures come back as an error message.
    pub async fn handle_command(&self, player_id: PlayerId, msg: ClientMessage) -> Vec<ServerMessage> {
        match self.dispatch(player_id, msg).await {
            Ok(replies) => replies,
            Err(e) => {
                debug!("Command from player {} rejected: {}", player_id, e);
                vec![ServerMessage::from(&e)]
            }
        }
    }

    async fn dispatch(&self, player_id: PlayerId, msg: ClientMessage) -> Result<Vec<ServerMessage>, GameError> {
        let mut world = self.world.lock().await;
        match msg {
            ClientMessage::Move { direction } => {
                let Some(direction) = Direction::from_token(&direction) else {
                    return Err(GameError::InvalidDirection(direction));
                };
                let moved = world.move_player(player_id, direction)?;
                self.announce_move(&world, &moved);
                Ok(vec![Self::room_info(&world, moved.to)?])
            }
            ClientMessage::Velocity { vx, vy } => {
                world.queue_velocity(player_id, vx, vy)?;
                Ok(Vec::new())
            }
            ClientMessage::Take { item_id } => {
                let transfer = world.take(player_id, item_id)?;
                self.room_changed(&world, transfer.coord, Some(player_id));
                if transfer.leaderboard_changed {
                    self.publish_leaderboard(&world);
                }
                Ok(vec![
                    Self::player_state(&world, player_id)?,
                    Self::room_info(&world, transfer.coord)?,
                ])
            }
            ClientMessage::Drop { item_id } => {
                let transfer = world.drop_item(player_id, item_id)?;
                self.room_changed(&world, transfer.coord, Some(player_id));
                Ok(vec![
                    Self::player_state(&world, player_id)?,
                    Self::room_info(&world, transfer.coord)?,
                ])
            }
            ClientMessage::Barter { item_ids, store_item_id } => {
                let barter = world.barter(player_id, &item_ids, store_item_id)?;
                self.room_changed(&world, barter.coord, Some(player_id));
                if barter.leaderboard_changed {
                    self.publish_leaderboard(&world);
                }
                Ok(vec![
                    Self::player_state(&world, player_id)?,
                    Self::room_info(&world, barter.coord)?,
                ])
            }
            ClientMessage::Fight { opponent } => {
                let username = Self::player_in(&world, player_id)?.username.clone();
                let start = world.start_combat(&username, &opponent)?;
                self.publish(
                    Audience::Players(vec![start.first, start.second]),
                    ServerMessage::CombatStarted {
                        combat: start.combat,
                        first: start.first_name,
                        second: start.second_name,
                    },
                );
                for id in [start.first, start.second] {
                    if let Ok(state) = Self::player_state(&world, id) {
                        self.publish(Audience::Players(vec![id]), state);
                    }
                }
                Ok(Vec::new())
            }
            ClientMessage::Stake { combat_id, item_ids } => {
                if let Some(result) = world.submit_stake(player_id, combat_id, &item_ids)? {
                    self.publish_combat_result(&world, &result);
                }
                Ok(vec![ServerMessage::StakeAccepted { combat_id }])
            }
            ClientMessage::Inventory => Ok(vec![Self::player_state(&world, player_id)?]),
            ClientMessage::Look => {
                let coord = Self::player_in(&world, player_id)?.coord;
                Ok(vec![Self::room_info(&world, coord)?])
            }
            ClientMessage::MapInfo => Ok(vec![ServerMessage::MapInfo { map: world.map_info() }]),
            ClientMessage::Leaderboard => Ok(vec![ServerMessage::Leaderboard {
                entries: world.leaderboard_snapshot(),
            }]),
            ClientMessage::Init => Ok(vec![Self::welcome(&world, player_id)?]),
            ClientMessage::AdminSave => {
                Self::require_admin(&world, player_id)?;
                world.save_all();
                info!("World save requested by player {}", player_id);
                Ok(vec![ServerMessage::Saved])
            }
            ClientMessage::AdminReset { seed } => {
                Self::require_admin(&world, player_id)?;
                let regenerated = world
                    .regenerate(seed)
                    .map_err(|e| GameError::Validation(e.to_string()))?;
                for result in &regenerated.combats {
                    self.publish_combat_result(&world, result);
                }
                self.publish(
                    Audience::All,
                    ServerMessage::MapReset {
                        seed: regenerated.seed,
                        spawn: regenerated.spawn,
                    },
                );
                self.publish(Audience::All, ServerMessage::MapInfo { map: world.map_info() });
                if let Ok(info) = Self::room_info(&world, regenerated.spawn) {
                    self.publish(Audience::Players(world.player_ids()), info);
                }
                Ok(Vec::new())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------------

    /// One movement tick: flush buffered velocities, restock rooms and
    /// expire stale combats.
    pub async fn tick(&self) {
        let now = Instant::now();
        self.pending
            .retain(|_, (_, issued)| now.saturating_duration_since(*issued) < PENDING_LOGIN_TTL);

        let mut world = self.world.lock().await;
        let batch = world.flush_movement();
        for (coord, players) in batch.positions {
            self.publish(
                Audience::Players(world.players_at(coord)),
                ServerMessage::Positions {
                    x: coord.x,
                    y: coord.y,
                    players,
                },
            );
        }
        for moved in &batch.transitions {
            self.announce_move(&world, moved);
            if let Ok(info) = Self::room_info(&world, moved.to) {
                self.publish(Audience::Players(vec![moved.player_id]), info);
            }
        }

        for coord in world.refresh_rooms(now) {
            self.room_changed(&world, coord, None);
        }
        for result in world.expire_combats(now) {
            self.publish_combat_result(&world, &result);
        }
    }

    pub async fn autosave(&self) -> usize {
        let saved = self.world.lock().await.autosave();
        if saved > 0 {
            info!("Queued autosave for {} player(s)", saved);
        }
        saved
    }

    /// Queue a full save, e.g. on shutdown.
    pub async fn save_all(&self) {
        self.world.lock().await.save_all();
    }

    pub async fn map_info(&self) -> MapInfo {
        self.world.lock().await.map_info()
    }

    pub async fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.world.lock().await.leaderboard_snapshot()
    }

    pub async fn player_count(&self) -> usize {
        self.world.lock().await.player_count()
    }

    // ------------------------------------------------------------------------
    // Message helpers
    // ------------------------------------------------------------------------

    fn player_in(world: &World, player_id: PlayerId) -> Result<&Player, GameError> {
        world
            .player(player_id)
            .ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))
    }

    fn require_admin(world: &World, player_id: PlayerId) -> Result<(), GameError> {
        if Self::player_in(world, player_id)?.is_admin {
            Ok(())
        } else {
            Err(GameError::NotAdmin)
        }
    }

    fn player_state(world: &World, player_id: PlayerId) -> Result<ServerMessage, GameError> {
        Ok(ServerMessage::PlayerState {
            player: Self::player_in(world, player_id)?.to_view(),
        })
    }

    fn room_info(world: &World, coord: Coord) -> Result<ServerMessage, GameError> {
        let room = world
            .room_view(coord)
            .ok_or_else(|| GameError::Validation("You are not in a room".to_string()))?;
        Ok(ServerMessage::RoomInfo {
            room,
            players: world.usernames_at(coord),
        })
    }

    fn welcome(world: &World, player_id: PlayerId) -> Result<ServerMessage, GameError> {
        let player = Self::player_in(world, player_id)?;
        let room = world
            .room_view(player.coord)
            .ok_or_else(|| GameError::Validation("You are not in a room".to_string()))?;
        Ok(ServerMessage::Welcome {
            player: player.to_view(),
            room,
            players: world.usernames_at(player.coord),
            map: world.map_info(),
        })
    }

    fn announce_move(&self, world: &World, moved: &Moved) {
        self.publish(
            Audience::Players(world.players_at(moved.from)),
            ServerMessage::PlayerLeft {
                player_id: moved.player_id,
                username: moved.username.clone(),
                x: moved.from.x,
                y: moved.from.y,
            },
        );
        let arrivals: Vec<PlayerId> = world
            .players_at(moved.to)
            .into_iter()
            .filter(|id| *id != moved.player_id)
            .collect();
        self.publish(
            Audience::Players(arrivals),
            ServerMessage::PlayerJoined {
                player_id: moved.player_id,
                username: moved.username.clone(),
                x: moved.to.x,
                y: moved.to.y,
            },
        );
    }

    /// Tell everyone in `coord` (but `except`) what the room holds now.
    fn room_changed(&self, world: &World, coord: Coord, except: Option<PlayerId>) {
        let Some(room) = world.room_view(coord) else {
            return;
        };
        let audience: Vec<PlayerId> = world
            .players_at(coord)
            .into_iter()
            .filter(|id| Some(*id) != except)
            .collect();
        self.publish(Audience::Players(audience), ServerMessage::RoomUpdate { room });
    }

    fn publish_leaderboard(&self, world: &World) {
        self.publish(
            Audience::All,
            ServerMessage::Leaderboard {
                entries: world.leaderboard_snapshot(),
            },
        );
    }

    fn publish_combat_result(&self, world: &World, result: &CombatResult) {
        let settlement = &result.settlement;
        self.publish(
            Audience::Players(vec![settlement.first, settlement.second]),
            ServerMessage::CombatResolved {
                combat_id: settlement.combat_id,
                first: result.first_name.clone(),
                second: result.second_name.clone(),
                first_score: settlement.first_score,
                second_score: settlement.second_score,
                winner: result.winner_name().map(str::to_string),
                returned: settlement.returned.len(),
            },
        );
        for id in [settlement.first, settlement.second] {
            if let Ok(state) = Self::player_state(world, id) {
                self.publish(Audience::Players(vec![id]), state);
            }
        }
        self.room_changed(world, result.coord, None);
        if result.leaderboard_changed {
            self.publish_leaderboard(world);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::db::PlayerSnapshot;
    use crate::persist::{PersistJob, RetryPolicy, run_worker};
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.map.size = 9;
        config.map.room_limit = 20;
        config.map.seed = Some(42);
        config.admin_usernames = vec!["root".to_string()];
        config
    }

    async fn test_game(dir: &TempDir) -> (Game, Database) {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("game.db").display());
        let db = Database::new(&url).await.unwrap();
        let (queue, rx) = PersistQueue::new();
        tokio::spawn(run_worker(
            db.clone(),
            rx,
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
        ));
        let config = test_config();
        let world = open_world(WorldRules::from(&config), &db, queue).await.unwrap();
        (Game::new(config, world, db.clone()), db)
    }

    /// A game whose persistence queue is never drained.
    async fn stalled_game(dir: &TempDir) -> (Game, Database, UnboundedReceiver<PersistJob>) {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("game.db").display());
        let db = Database::new(&url).await.unwrap();
        let (queue, rx) = PersistQueue::new();
        let config = test_config();
        let world = open_world(WorldRules::from(&config), &db, queue).await.unwrap();
        (Game::new(config, world, db.clone()), db, rx)
    }

    async fn join(game: &Game, username: &str) -> (PlayerId, ServerMessage) {
        let session = game.register(username, "secret", "secret").await.unwrap();
        game.connect(&session.token).await.unwrap()
    }

    fn error_kind(replies: &[ServerMessage]) -> Option<ErrorKind> {
        match replies {
            [ServerMessage::Error { kind, .. }] => Some(*kind),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_open_world_reuses_stored_map() {
        let dir = tempfile::tempdir().unwrap();
        let (first, db) = test_game(&dir).await;
        let map = first.map_info().await;

        let (queue, _rx) = PersistQueue::new();
        let mut config = test_config();
        config.map.seed = Some(7);
        let world = open_world(WorldRules::from(&config), &db, queue).await.unwrap();
        assert_eq!(world.map_info(), map);
        assert_eq!(world.map_seed(), 42);
    }

    #[tokio::test]
    async fn test_register_connect_and_reject_replays() {
        let dir = tempfile::tempdir().unwrap();
        let (game, _db) = test_game(&dir).await;

        let session = game.register("ant", "secret", "secret").await.unwrap();
        let (player_id, welcome) = game.connect(&session.token).await.unwrap();
        assert_eq!(player_id, session.player_id);
        assert!(matches!(welcome, ServerMessage::Welcome { ref player, .. } if player.username == "ant"));
        assert_eq!(game.connect(&session.token).await.err(), Some(GameError::InvalidCredentials));

        assert_eq!(
            game.register("ant", "secret", "secret").await.err(),
            Some(GameError::UsernameTaken)
        );
        assert!(matches!(
            game.register("an", "secret", "secret").await,
            Err(GameError::Validation(_))
        ));
        assert_eq!(
            game.login("ant", "secret").await.err(),
            Some(GameError::AlreadyConnected("ant".into()))
        );
        assert_eq!(game.connect("forged.token.sig").await.err(), Some(GameError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_login_restores_saved_items() {
        let dir = tempfile::tempdir().unwrap();
        let (game, db) = test_game(&dir).await;
        let (player_id, welcome) = join(&game, "ant").await;
        let ServerMessage::Welcome { room, .. } = welcome else {
            panic!("expected welcome");
        };
        let item_id = room.items[0].id;
        let replies = game.handle_command(player_id, ClientMessage::Take { item_id }).await;
        assert!(matches!(&replies[0], ServerMessage::PlayerState { player } if player.items.len() == 1));

        game.disconnect(player_id).await;
        assert!(!game.is_connected(player_id).await);
        assert_eq!(game.login("ant", "wrong!").await.err(), Some(GameError::InvalidCredentials));

        let mut saved = false;
        for _ in 0..100 {
            let record = db.load_player("ant").await.unwrap().unwrap();
            if record.items.iter().any(|item| item.id == item_id) {
                saved = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saved);

        let session = game.login("ant", "secret").await.unwrap();
        let (_, welcome) = game.connect(&session.token).await.unwrap();
        assert!(matches!(welcome, ServerMessage::Welcome { ref player, .. } if player.items[0].id == item_id));
    }

    #[tokio::test]
    async fn test_relogin_before_saves_land_does_not_duplicate_items() {
        let dir = tempfile::tempdir().unwrap();
        let (game, db, _rx) = stalled_game(&dir).await;
        let (player_id, welcome) = join(&game, "ant").await;
        let ServerMessage::Welcome { room, .. } = welcome else {
            panic!("expected welcome");
        };
        let item_id = room.items[0].id;
        game.handle_command(player_id, ClientMessage::Take { item_id }).await;

        // storage catches up with the pickup but not with the drop that follows
        let snapshot = {
            let world = game.world.lock().await;
            let player = world.player(player_id).unwrap();
            PlayerSnapshot {
                id: player_id,
                is_admin: false,
                coord: player.coord,
                highscore: player.highscore,
                items: player.inventory.values().cloned().collect(),
            }
        };
        db.save_player(&snapshot).await.unwrap();
        game.handle_command(player_id, ClientMessage::Drop { item_id }).await;
        game.disconnect(player_id).await;
        assert!(db.load_player("ant").await.unwrap().unwrap().items.iter().any(|i| i.id == item_id));

        let session = game.login("ant", "secret").await.unwrap();
        let (_, welcome) = game.connect(&session.token).await.unwrap();
        let ServerMessage::Welcome { player, room, .. } = welcome else {
            panic!("expected welcome");
        };
        assert!(player.items.iter().all(|i| i.id != item_id));
        assert_eq!(room.items.iter().filter(|i| i.id == item_id).count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_all_empties_the_world() {
        let dir = tempfile::tempdir().unwrap();
        let (game, _db) = test_game(&dir).await;
        let (ant, _) = join(&game, "ant").await;
        join(&game, "bee").await;
        game.handle_command(ant, ClientMessage::Fight { opponent: "bee".into() }).await;

        assert_eq!(game.disconnect_all().await, 2);
        assert_eq!(game.player_count().await, 0);
        assert!(!game.is_connected(ant).await);
    }

    #[tokio::test]
    async fn test_bad_commands_report_their_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (game, _db) = test_game(&dir).await;
        let (player_id, _) = join(&game, "ant").await;

        let replies = game
            .handle_command(player_id, ClientMessage::Move { direction: "up".into() })
            .await;
        assert_eq!(error_kind(&replies), Some(ErrorKind::Validation));

        let replies = game.handle_command(player_id, ClientMessage::Take { item_id: 999_999 }).await;
        assert_eq!(error_kind(&replies), Some(ErrorKind::Precondition));

        let replies = game
            .handle_command(player_id, ClientMessage::Stake { combat_id: 5, item_ids: vec![] })
            .await;
        assert_eq!(error_kind(&replies), Some(ErrorKind::Conflict));

        let replies = game.handle_command(player_id, ClientMessage::AdminSave).await;
        assert_eq!(error_kind(&replies), Some(ErrorKind::Precondition));
    }

    #[tokio::test]
    async fn test_combat_events_reach_both_players() {
        let dir = tempfile::tempdir().unwrap();
        let (game, _db) = test_game(&dir).await;
        let (ant, _) = join(&game, "ant").await;
        let (bee, _) = join(&game, "bee").await;
        let mut events = game.subscribe();

        let replies = game.handle_command(ant, ClientMessage::Fight { opponent: "bee".into() }).await;
        assert!(replies.is_empty());
        let combat_id = loop {
            let event = events.recv().await.unwrap();
            if let ServerMessage::CombatStarted { combat, .. } = event.msg {
                assert!(event.audience.includes(ant) && event.audience.includes(bee));
                break combat.id;
            }
        };

        let replies = game
            .handle_command(bee, ClientMessage::Move { direction: "n".into() })
            .await;
        assert_eq!(error_kind(&replies), Some(ErrorKind::Conflict));

        game.handle_command(ant, ClientMessage::Stake { combat_id, item_ids: vec![] }).await;
        let replies = game.handle_command(bee, ClientMessage::Stake { combat_id, item_ids: vec![] }).await;
        assert!(matches!(replies[..], [ServerMessage::StakeAccepted { .. }]));

        loop {
            let event = events.recv().await.unwrap();
            if let ServerMessage::CombatResolved { winner, .. } = event.msg {
                assert_eq!(winner, None);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_admin_reset_moves_everyone_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let (game, _db) = test_game(&dir).await;
        let (root, _) = join(&game, "root").await;
        let mut events = game.subscribe();

        let replies = game.handle_command(root, ClientMessage::AdminSave).await;
        assert!(matches!(replies[..], [ServerMessage::Saved]));

        game.handle_command(root, ClientMessage::AdminReset { seed: Some(99) }).await;
        let spawn = loop {
            if let ServerMessage::MapReset { seed, spawn } = events.recv().await.unwrap().msg {
                assert_eq!(seed, 99);
                break spawn;
            }
        };
        let replies = game.handle_command(root, ClientMessage::Inventory).await;
        assert!(matches!(&replies[0], ServerMessage::PlayerState { player } if player.x == spawn.x && player.y == spawn.y));
    }

    #[tokio::test]
    async fn test_tick_batches_positions() {
        let dir = tempfile::tempdir().unwrap();
        let (game, _db) = test_game(&dir).await;
        let (ant, _) = join(&game, "ant").await;
        let mut events = game.subscribe();

        for _ in 0..3 {
            game.handle_command(ant, ClientMessage::Velocity { vx: 0.1, vy: 0.0 }).await;
        }
        game.tick().await;

        let event = events.recv().await.unwrap();
        match event.msg {
            ServerMessage::Positions { players, .. } => {
                assert_eq!(players.len(), 1);
                assert!((players[0].x - 0.3).abs() < 1e-5);
            }
            other => panic!("unexpected {}", other.msg_type()),
        }
    }
}
