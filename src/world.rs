//! The authoritative world state.
//!
//! [`World`] owns the room graph, every connected player, open combats and the
//! leaderboard. All methods are synchronous and complete their in-memory change
//! before returning; anything that should reach storage is pushed onto the
//! persistence queue and applied later.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::combat::{Combat, CombatId, CombatView, Settlement};
use crate::config::{MapConfig, ServerConfig};
use crate::db::{ItemOwner, ItemPlacement, PlayerSnapshot, RoomRecord, WorldRecord};
use crate::error::GameError;
use crate::graph::WorldGraph;
use crate::item::{Item, ItemId, ItemIdAllocator};
use crate::leaderboard::{Leaderboard, LeaderboardEntry};
use crate::map::{self, Coord, Direction, GeneratedGrid, MapError};
use crate::persist::{PersistJob, PersistQueue};
use crate::player::{MotionBounds, Player, PlayerId, SubCell, Trade};
use crate::room::{Room, RoomView};

/// The tunable parts of the simulation.
#[derive(Debug, Clone)]
pub struct WorldRules {
    pub map: MapConfig,
    pub max_weight: i32,
    pub bounds: MotionBounds,
    pub stake_weight_cap: i32,
    pub combat_timeout: Option<Duration>,
}

impl From<&ServerConfig> for WorldRules {
    fn from(config: &ServerConfig) -> Self {
        Self {
            map: config.map.clone(),
            max_weight: config.player.max_weight,
            bounds: config.movement.bounds(),
            stake_weight_cap: config.combat.stake_weight_cap,
            combat_timeout: config.combat.timeout(),
        }
    }
}

impl Default for WorldRules {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub coord: Coord,
    pub item: Item,
    pub leaderboard_changed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Barter {
    pub coord: Coord,
    pub trade: Trade,
    pub leaderboard_changed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Moved {
    pub player_id: PlayerId,
    pub username: String,
    pub from: Coord,
    pub to: Coord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionUpdate {
    pub player_id: PlayerId,
    pub username: String,
    pub x: f32,
    pub y: f32,
}

/// Result of one movement tick.
#[derive(Debug, Clone, Default)]
pub struct MovementBatch {
    /// Updated positions grouped by the cell the players are now in
    pub positions: BTreeMap<Coord, Vec<PositionUpdate>>,
    pub transitions: Vec<Moved>,
}

#[derive(Debug, Clone)]
pub struct CombatStart {
    pub combat: CombatView,
    pub first: PlayerId,
    pub second: PlayerId,
    pub first_name: String,
    pub second_name: String,
}

#[derive(Debug, Clone)]
pub struct CombatResult {
    pub coord: Coord,
    pub settlement: Settlement,
    pub first_name: String,
    pub second_name: String,
    pub leaderboard_changed: bool,
}

impl CombatResult {
    pub fn winner_name(&self) -> Option<&str> {
        let winner = self.settlement.winner?;
        if winner == self.settlement.first {
            Some(&self.first_name)
        } else {
            Some(&self.second_name)
        }
    }
}

#[derive(Debug)]
pub struct Departure {
    pub player: Player,
    pub combat: Option<CombatResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapInfo {
    pub rooms: Vec<Coord>,
    pub stores: Vec<Coord>,
    pub spawn: Coord,
}

#[derive(Debug)]
pub struct Regenerated {
    pub seed: u64,
    pub spawn: Coord,
    pub combats: Vec<CombatResult>,
}

// ============================================================================
// World
// ============================================================================

pub struct World {
    rules: WorldRules,
    graph: WorldGraph,
    map_seed: u64,
    password_salt: String,
    players: HashMap<PlayerId, Player>,
    tokens: HashMap<String, PlayerId>,
    combats: HashMap<CombatId, Combat>,
    next_combat_id: CombatId,
    leaderboard: Leaderboard,
    ids: ItemIdAllocator,
    rng: StdRng,
    pending_velocity: Vec<(PlayerId, SubCell)>,
    /// Last known state of players who left, newer than storage until the
    /// queued save lands.
    departed: HashMap<PlayerId, PlayerSnapshot>,
    persist: PersistQueue,
}

fn build_graph(
    config: &MapConfig,
    seed: Option<u64>,
    ids: &mut ItemIdAllocator,
    now: Instant,
) -> Result<(WorldGraph, u64, StdRng), MapError> {
    let GeneratedGrid { grid, seed, mut rng } = config.generator().generate(seed)?;
    let stores = map::place_stores(&grid, config.store_count, &mut rng);
    let blueprints = map::blueprints(&grid, &stores, &mut rng);
    let graph = WorldGraph::from_blueprints(blueprints, grid.center(), ids, &mut rng, now);
    info!(
        "Generated map: {} rooms, {} stores, seed {}",
        graph.len(),
        graph.store_coords().len(),
        seed
    );
    Ok((graph, seed, rng))
}

fn room_placements(room: &Room) -> Vec<ItemPlacement> {
    room.items
        .values()
        .map(|item| ItemPlacement {
            item: item.clone(),
            owner: ItemOwner::Room(room.id),
        })
        .collect()
}

fn player_placements<'a>(player_id: PlayerId, items: impl IntoIterator<Item = &'a Item>) -> Vec<ItemPlacement> {
    items
        .into_iter()
        .map(|item| ItemPlacement {
            item: item.clone(),
            owner: ItemOwner::Player(player_id),
        })
        .collect()
}

fn not_in_a_room() -> GameError {
    GameError::Validation("You are not in a room".to_string())
}

impl World {
    /// Generate a fresh map. `ids` should start past every id already stored.
    pub fn generate(
        rules: WorldRules,
        password_salt: &str,
        mut ids: ItemIdAllocator,
        persist: PersistQueue,
    ) -> Result<Self, MapError> {
        let (graph, map_seed, rng) = build_graph(&rules.map, rules.map.seed, &mut ids, Instant::now())?;
        Ok(Self::assemble(rules, graph, map_seed, password_salt, ids, rng, persist))
    }

    /// Rebuild from a stored world. Rooms restock on their normal schedule.
    pub fn restore(rules: WorldRules, record: WorldRecord, max_item_id: ItemId, persist: PersistQueue) -> Self {
        let now = Instant::now();
        let rooms: Vec<Room> = record
            .rooms
            .into_iter()
            .map(|r: RoomRecord| {
                let mut room = Room::new(r.id, r.coord, r.kind, &r.name, &r.description, now);
                for item in r.items {
                    room.put(item);
                }
                room
            })
            .collect();
        let centre = (rules.map.size / 2) as i32;
        let graph = WorldGraph::from_rooms(rooms, Coord::new(centre, centre));
        info!("Restored map: {} rooms (seed {})", graph.len(), record.map_seed);

        let ids = ItemIdAllocator::starting_after(max_item_id);
        Self::assemble(
            rules,
            graph,
            record.map_seed,
            &record.password_salt,
            ids,
            StdRng::from_entropy(),
            persist,
        )
    }

    fn assemble(
        rules: WorldRules,
        graph: WorldGraph,
        map_seed: u64,
        password_salt: &str,
        ids: ItemIdAllocator,
        rng: StdRng,
        persist: PersistQueue,
    ) -> Self {
        Self {
            rules,
            graph,
            map_seed,
            password_salt: password_salt.to_string(),
            players: HashMap::new(),
            tokens: HashMap::new(),
            combats: HashMap::new(),
            next_combat_id: 1,
            leaderboard: Leaderboard::new(),
            ids,
            rng,
            pending_velocity: Vec::new(),
            departed: HashMap::new(),
            persist,
        }
    }

    pub fn rules(&self) -> &WorldRules {
        &self.rules
    }

    pub fn map_seed(&self) -> u64 {
        self.map_seed
    }

    pub fn password_salt(&self) -> &str {
        &self.password_salt
    }

    pub fn graph(&self) -> &WorldGraph {
        &self.graph
    }

    pub fn spawn(&self) -> Coord {
        self.graph.spawn()
    }

    // ------------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------------

    /// Bring a player into the live world.
    ///
    /// A player loaded from storage may be behind what this world last saw of
    /// them, so the departure snapshot wins and any item already owned by
    /// someone else is left where it is.
    pub fn admit(&mut self, mut player: Player) -> Result<(), GameError> {
        if self.players.values().any(|p| p.username == player.username) {
            return Err(GameError::AlreadyConnected(player.username));
        }
        if let Some(snapshot) = self.departed.remove(&player.id) {
            player.coord = snapshot.coord;
            player.highscore = player.highscore.max(snapshot.highscore);
            player.inventory = snapshot.items.into_iter().map(|item| (item.id, item)).collect();
        }
        let foreign: Vec<ItemId> = player
            .inventory
            .keys()
            .copied()
            .filter(|item_id| self.is_owned(*item_id))
            .collect();
        for item_id in foreign {
            warn!("{} loaded item {} that is owned elsewhere, ignoring it", player.username, item_id);
            player.inventory.remove(&item_id);
        }
        if !self.graph.contains(player.coord) {
            debug!("{} was outside the map, moving to spawn", player.username);
            player.coord = self.graph.spawn();
            player.position = SubCell::default();
        }
        player.max_weight = self.rules.max_weight;
        player.combat = None;
        player.record_score();

        self.leaderboard.consider(LeaderboardEntry::from(&player));
        self.tokens.insert(player.auth_token.clone(), player.id);
        info!("{} entered the world at ({}, {})", player.username, player.coord.x, player.coord.y);
        self.players.insert(player.id, player);
        Ok(())
    }

    /// Take a player out of the world, settling any open combat first.
    pub fn remove_player(&mut self, player_id: PlayerId) -> Option<Departure> {
        let combat_id = self.players.get(&player_id)?.combat;
        let combat = combat_id.and_then(|id| self.finish_combat(id));

        let player = self.players.remove(&player_id)?;
        self.tokens.remove(&player.auth_token);
        self.pending_velocity.retain(|(id, _)| *id != player_id);
        let snapshot = Self::snapshot_of(&player);
        self.departed.insert(player_id, snapshot.clone());
        self.persist.push(PersistJob::SavePlayer(snapshot));
        info!("{} left the world", player.username);
        Some(Departure { player, combat })
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.get(&player_id)
    }

    pub fn player_by_token(&self, token: &str) -> Option<&Player> {
        self.tokens.get(token).and_then(|id| self.players.get(id))
    }

    pub fn player_by_username(&self, username: &str) -> Option<&Player> {
        self.players.values().find(|p| p.username == username)
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn players_at(&self, coord: Coord) -> Vec<PlayerId> {
        self.players.values().filter(|p| p.coord == coord).map(|p| p.id).collect()
    }

    pub fn usernames_at(&self, coord: Coord) -> Vec<String> {
        let mut names: Vec<String> = self
            .players
            .values()
            .filter(|p| p.coord == coord)
            .map(|p| p.username.clone())
            .collect();
        names.sort();
        names
    }

    fn player_mut(&mut self, player_id: PlayerId) -> Result<&mut Player, GameError> {
        self.players
            .get_mut(&player_id)
            .ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))
    }

    /// Whether a room, a live player or a combat pool holds the item.
    fn is_owned(&self, item_id: ItemId) -> bool {
        self.graph.rooms().any(|room| room.items.contains_key(&item_id))
            || self.players.values().any(|p| p.inventory.contains_key(&item_id))
            || self.combats.values().any(|c| c.full_items.contains_key(&item_id))
    }

    fn snapshot_of(player: &Player) -> PlayerSnapshot {
        PlayerSnapshot {
            id: player.id,
            is_admin: player.is_admin,
            coord: player.coord,
            highscore: player.highscore,
            items: player.inventory.values().cloned().collect(),
        }
    }

    fn consider_for_leaderboard(&mut self, player_id: PlayerId) -> bool {
        match self.players.get(&player_id) {
            Some(player) => self.leaderboard.consider(LeaderboardEntry::from(player)),
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------------

    pub fn take(&mut self, player_id: PlayerId, item_id: ItemId) -> Result<Transfer, GameError> {
        let player = self.players.get_mut(&player_id).ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))?;
        let coord = player.coord;
        let room = self.graph.get_mut(coord).ok_or_else(not_in_a_room)?;
        let pickup = player.take_item(room, item_id)?;

        self.persist.push(PersistJob::ReassignItems(player_placements(player_id, [&pickup.item])));
        let leaderboard_changed = pickup.new_highscore && self.consider_for_leaderboard(player_id);
        Ok(Transfer {
            coord,
            item: pickup.item,
            leaderboard_changed,
        })
    }

    pub fn drop_item(&mut self, player_id: PlayerId, item_id: ItemId) -> Result<Transfer, GameError> {
        let player = self.players.get_mut(&player_id).ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))?;
        let coord = player.coord;
        let room = self.graph.get_mut(coord).ok_or_else(not_in_a_room)?;
        let item = player.drop_item(room, item_id)?;

        self.persist.push(PersistJob::ReassignItems(vec![ItemPlacement {
            item: item.clone(),
            owner: ItemOwner::Room(room.id),
        }]));
        Ok(Transfer {
            coord,
            item,
            leaderboard_changed: false,
        })
    }

    pub fn barter(&mut self, player_id: PlayerId, offered: &[ItemId], store_item: ItemId) -> Result<Barter, GameError> {
        let player = self.players.get_mut(&player_id).ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))?;
        let coord = player.coord;
        let store = self.graph.get_mut(coord).ok_or_else(not_in_a_room)?;
        let trade = player.barter(store, offered, store_item)?;

        let mut placements: Vec<ItemPlacement> = trade
            .given
            .iter()
            .map(|item| ItemPlacement {
                item: item.clone(),
                owner: ItemOwner::Room(store.id),
            })
            .collect();
        placements.extend(player_placements(player_id, [&trade.received]));
        self.persist.push(PersistJob::ReassignItems(placements));

        let leaderboard_changed = trade.new_highscore && self.consider_for_leaderboard(player_id);
        Ok(Barter {
            coord,
            trade,
            leaderboard_changed,
        })
    }

    // ------------------------------------------------------------------------
    // Movement
    // ------------------------------------------------------------------------

    pub fn move_player(&mut self, player_id: PlayerId, direction: Direction) -> Result<Moved, GameError> {
        let player = self.players.get_mut(&player_id).ok_or_else(|| GameError::PlayerNotFound(player_id.to_string()))?;
        let from = player.coord;
        let to = player.travel(&self.graph, direction)?;
        Ok(Moved {
            player_id,
            username: player.username.clone(),
            from,
            to,
        })
    }

    /// Buffer a velocity input for the next movement tick.
    pub fn queue_velocity(&mut self, player_id: PlayerId, vx: f32, vy: f32) -> Result<(), GameError> {
        if !vx.is_finite() || !vy.is_finite() {
            return Err(GameError::Validation("Velocity must be a finite number".to_string()));
        }
        if self.player_mut(player_id)?.in_combat() {
            return Err(GameError::BusyInCombat);
        }
        self.pending_velocity.push((player_id, SubCell { x: vx, y: vy }));
        Ok(())
    }

    /// Apply every buffered velocity input as one batch.
    pub fn flush_movement(&mut self) -> MovementBatch {
        let mut batch = MovementBatch::default();
        if self.pending_velocity.is_empty() {
            return batch;
        }

        let mut touched: Vec<PlayerId> = Vec::new();
        for (player_id, velocity) in std::mem::take(&mut self.pending_velocity) {
            let Some(player) = self.players.get_mut(&player_id) else {
                continue;
            };
            let from = player.coord;
            if player.integrate(&self.graph, velocity, self.rules.bounds).is_some() {
                batch.transitions.push(Moved {
                    player_id,
                    username: player.username.clone(),
                    from,
                    to: player.coord,
                });
            }
            if !touched.contains(&player_id) {
                touched.push(player_id);
            }
        }

        for player_id in touched {
            if let Some(player) = self.players.get(&player_id) {
                batch.positions.entry(player.coord).or_default().push(PositionUpdate {
                    player_id,
                    username: player.username.clone(),
                    x: player.position.x,
                    y: player.position.y,
                });
            }
        }
        batch
    }

    // ------------------------------------------------------------------------
    // Combat
    // ------------------------------------------------------------------------

    pub fn start_combat(&mut self, first_name: &str, second_name: &str) -> Result<CombatStart, GameError> {
        if first_name == second_name {
            return Err(GameError::Validation("You cannot fight yourself".to_string()));
        }
        let first_id = self
            .player_by_username(first_name)
            .ok_or_else(|| GameError::PlayerNotFound(first_name.to_string()))?
            .id;
        let second_id = self
            .player_by_username(second_name)
            .ok_or_else(|| GameError::PlayerNotFound(second_name.to_string()))?
            .id;

        let mut first = self.players.remove(&first_id).ok_or_else(|| GameError::PlayerNotFound(first_name.to_string()))?;
        let Some(mut second) = self.players.remove(&second_id) else {
            self.players.insert(first_id, first);
            return Err(GameError::PlayerNotFound(second_name.to_string()));
        };

        let id = self.next_combat_id;
        let cap = self.rules.stake_weight_cap.min(self.rules.max_weight);
        let opened = Combat::open(id, &mut first, &mut second, cap, Instant::now());
        self.players.insert(first_id, first);
        self.players.insert(second_id, second);
        let combat = opened?;

        self.next_combat_id += 1;
        self.pending_velocity.retain(|(pid, _)| *pid != first_id && *pid != second_id);
        info!(
            "Combat {} opened between {} and {} at ({}, {}) over {} items",
            id,
            first_name,
            second_name,
            combat.room.x,
            combat.room.y,
            combat.full_items.len()
        );

        let start = CombatStart {
            combat: combat.to_view(),
            first: first_id,
            second: second_id,
            first_name: first_name.to_string(),
            second_name: second_name.to_string(),
        };
        self.combats.insert(id, combat);
        Ok(start)
    }

    /// Record a stake. Resolves the combat once both sides have staked.
    pub fn submit_stake(
        &mut self,
        player_id: PlayerId,
        combat_id: CombatId,
        item_ids: &[ItemId],
    ) -> Result<Option<CombatResult>, GameError> {
        let combat = self.combats.get_mut(&combat_id).ok_or(GameError::CombatNotFound(combat_id))?;
        combat.submit(player_id, item_ids)?;
        if !combat.is_ready() {
            return Ok(None);
        }
        Ok(self.finish_combat(combat_id))
    }

    pub fn combat(&self, combat_id: CombatId) -> Option<&Combat> {
        self.combats.get(&combat_id)
    }

    /// Force-resolve combats older than the configured timeout.
    pub fn expire_combats(&mut self, now: Instant) -> Vec<CombatResult> {
        let Some(timeout) = self.rules.combat_timeout else {
            return Vec::new();
        };
        let mut expired: Vec<CombatId> = self
            .combats
            .values()
            .filter(|c| c.is_expired(timeout, now))
            .map(|c| c.id)
            .collect();
        expired.sort_unstable();

        expired
            .into_iter()
            .filter_map(|id| {
                info!("Combat {} timed out", id);
                self.finish_combat(id)
            })
            .collect()
    }

    fn finish_combat(&mut self, combat_id: CombatId) -> Option<CombatResult> {
        let combat = self.combats.remove(&combat_id)?;
        let coord = combat.room;
        let settlement = combat.settle();

        let mut placements = Vec::new();
        let mut leftovers: Vec<Item> = settlement.returned.clone();
        let mut names = [String::new(), String::new()];
        let mut leaderboard_changed = false;

        for (slot, (player_id, items)) in [
            (settlement.first, &settlement.first_items),
            (settlement.second, &settlement.second_items),
        ]
        .into_iter()
        .enumerate()
        {
            match self.players.get_mut(&player_id) {
                Some(player) => {
                    player.combat = None;
                    for item in items {
                        player.inventory.insert(item.id, item.clone());
                    }
                    player.record_score();
                    names[slot] = player.username.clone();
                    placements.extend(player_placements(player_id, items));
                    leaderboard_changed |= self.leaderboard.consider(LeaderboardEntry::from(&*player));
                }
                None => {
                    warn!("Combat {}: player {} is gone, their share stays in the room", combat_id, player_id);
                    leftovers.extend(items.iter().cloned());
                }
            }
        }

        if let Some(room) = self.graph.get_mut(coord) {
            for item in leftovers {
                placements.push(ItemPlacement {
                    item: item.clone(),
                    owner: ItemOwner::Room(room.id),
                });
                room.put(item);
            }
        }
        self.persist.push(PersistJob::ReassignItems(placements));

        let [first_name, second_name] = names;
        let result = CombatResult {
            coord,
            settlement,
            first_name,
            second_name,
            leaderboard_changed,
        };
        info!(
            "Combat {} resolved: {} {} vs {} {}, winner {}",
            combat_id,
            result.first_name,
            result.settlement.first_score,
            result.second_name,
            result.settlement.second_score,
            result.winner_name().unwrap_or("none")
        );
        Some(result)
    }

    // ------------------------------------------------------------------------
    // Rooms and map
    // ------------------------------------------------------------------------

    /// Restock every room whose policy says so. Returns the restocked cells.
    pub fn refresh_rooms(&mut self, now: Instant) -> Vec<Coord> {
        let mut refreshed = Vec::new();
        let mut discarded: Vec<ItemId> = Vec::new();
        let mut placements = Vec::new();

        for room in self.graph.rooms_mut() {
            if !room.needs_refresh(now) {
                continue;
            }
            let dropped = room.refresh(&mut self.ids, &mut self.rng, now);
            discarded.extend(dropped.iter().map(|item| item.id));
            placements.extend(room_placements(room));
            refreshed.push(room.coord);
        }

        if !discarded.is_empty() {
            self.persist.push(PersistJob::DeleteItems(discarded));
        }
        if !placements.is_empty() {
            self.persist.push(PersistJob::ReassignItems(placements));
        }
        if !refreshed.is_empty() {
            debug!("Restocked {} rooms", refreshed.len());
        }
        refreshed.sort();
        refreshed
    }

    pub fn room_view(&self, coord: Coord) -> Option<RoomView> {
        self.graph.get(coord).map(Room::to_view)
    }

    pub fn map_info(&self) -> MapInfo {
        MapInfo {
            rooms: self.graph.coords(),
            stores: self.graph.store_coords(),
            spawn: self.graph.spawn(),
        }
    }

    pub fn leaderboard_snapshot(&self) -> Vec<LeaderboardEntry> {
        self.leaderboard.snapshot()
    }

    /// Seed the leaderboard, e.g. from stored highscores.
    pub fn consider_entry(&mut self, entry: LeaderboardEntry) -> bool {
        self.leaderboard.consider(entry)
    }

    /// Replace the map with a freshly generated one.
    ///
    /// Open combats settle into the old map first; every player keeps their
    /// items and moves to the new spawn room.
    pub fn regenerate(&mut self, seed: Option<u64>) -> Result<Regenerated, MapError> {
        let (graph, map_seed, rng) = build_graph(&self.rules.map, seed, &mut self.ids, Instant::now())?;

        let mut combat_ids: Vec<CombatId> = self.combats.keys().copied().collect();
        combat_ids.sort_unstable();
        let combats: Vec<CombatResult> = combat_ids.into_iter().filter_map(|id| self.finish_combat(id)).collect();

        self.graph = graph;
        self.map_seed = map_seed;
        self.rng = rng;
        self.pending_velocity.clear();
        let spawn = self.graph.spawn();
        for player in self.players.values_mut() {
            player.coord = spawn;
            player.position = SubCell::default();
            player.velocity = SubCell::default();
        }
        for snapshot in self.departed.values_mut() {
            snapshot.coord = spawn;
        }

        self.save_all();
        info!("Map regenerated with seed {}", map_seed);
        Ok(Regenerated {
            seed: map_seed,
            spawn,
            combats,
        })
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn record(&self) -> WorldRecord {
        let mut rooms: Vec<RoomRecord> = self
            .graph
            .rooms()
            .map(|room| {
                let mut items: Vec<Item> = room.items.values().cloned().collect();
                items.sort_by_key(|item| item.id);
                RoomRecord {
                    id: room.id,
                    name: room.name.clone(),
                    description: room.description.clone(),
                    kind: room.kind,
                    coord: room.coord,
                    items,
                }
            })
            .collect();
        rooms.sort_by_key(|room| room.id);

        WorldRecord {
            password_salt: self.password_salt.clone(),
            map_seed: self.map_seed,
            rooms,
        }
    }

    /// Queue a save of every live player. Returns how many were queued.
    pub fn autosave(&self) -> usize {
        for player in self.players.values() {
            self.persist.push(PersistJob::SavePlayer(Self::snapshot_of(player)));
        }
        self.players.len()
    }

    pub fn save_all(&self) {
        self.persist.push(PersistJob::SaveWorld(self.record()));
        self.autosave();
    }
}
