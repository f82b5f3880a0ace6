//! Player entity: identity, position, inventory, weight budget and score.

use serde::Serialize;

use crate::combat::CombatId;
use crate::error::GameError;
use crate::graph::WorldGraph;
use crate::item::{Inventory, Item, ItemId, ItemView, inventory_view, total_score, total_weight};
use crate::map::{Coord, Direction};
use crate::room::Room;

pub type PlayerId = i64;

pub const DEFAULT_MAX_WEIGHT: i32 = 100;

// ============================================================================
// Sub-cell motion
// ============================================================================

/// Continuous position inside the current cell, each axis in `[-bound, bound]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SubCell {
    pub x: f32,
    pub y: f32,
}

/// Bounds for continuous movement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionBounds {
    /// Visual clamp for each axis
    pub bound: f32,
    /// Crossing this (absolute) offset moves the player into the next cell
    pub edge_threshold: f32,
}

impl Default for MotionBounds {
    fn default() -> Self {
        Self { bound: 1.0, edge_threshold: 0.9 }
    }
}

// ============================================================================
// Player
// ============================================================================

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    /// Secret handed to the client at login; stable for the connection.
    pub auth_token: String,
    pub is_admin: bool,
    pub coord: Coord,
    pub position: SubCell,
    pub velocity: SubCell,
    pub inventory: Inventory,
    pub max_weight: i32,
    /// Best inventory score ever held. Never decreases.
    pub highscore: i32,
    pub combat: Option<CombatId>,
}

/// Result of a successful pickup.
#[derive(Debug, Clone, PartialEq)]
pub struct Pickup {
    pub item: Item,
    pub new_highscore: bool,
}

/// Result of a successful barter.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub given: Vec<Item>,
    pub received: Item,
    pub new_highscore: bool,
}

impl Player {
    pub fn new(id: PlayerId, username: &str, auth_token: &str, coord: Coord) -> Self {
        Self {
            id,
            username: username.to_string(),
            auth_token: auth_token.to_string(),
            is_admin: false,
            coord,
            position: SubCell::default(),
            velocity: SubCell::default(),
            inventory: Inventory::new(),
            max_weight: DEFAULT_MAX_WEIGHT,
            highscore: 0,
            combat: None,
        }
    }

    pub fn in_combat(&self) -> bool {
        self.combat.is_some()
    }

    pub fn weight(&self) -> i32 {
        total_weight(self.inventory.values())
    }

    pub fn score(&self) -> i32 {
        total_score(self.inventory.values())
    }

    fn ensure_free(&self) -> Result<(), GameError> {
        if self.in_combat() {
            return Err(GameError::BusyInCombat);
        }
        Ok(())
    }

    fn ensure_can_carry(&self, current: i32, added: i32) -> Result<(), GameError> {
        if current + added > self.max_weight {
            return Err(GameError::Overweight { current, added, max: self.max_weight });
        }
        Ok(())
    }

    /// Raise the highscore to the current score if it is higher.
    pub fn record_score(&mut self) -> bool {
        let score = self.score();
        if score > self.highscore {
            self.highscore = score;
            return true;
        }
        false
    }

    /// Move an item from `room` into this inventory.
    ///
    /// The item stays in the room if it would push the player over budget.
    pub fn take_item(&mut self, room: &mut Room, item_id: ItemId) -> Result<Pickup, GameError> {
        self.ensure_free()?;
        let weight = room.items.get(&item_id).ok_or(GameError::ItemNotPresent(item_id))?.weight;
        self.ensure_can_carry(self.weight(), weight)?;

        let item = room.take(item_id).ok_or(GameError::ItemNotPresent(item_id))?;
        self.inventory.insert(item.id, item.clone());
        let new_highscore = self.record_score();
        Ok(Pickup { item, new_highscore })
    }

    /// Move an item from this inventory into `room`.
    pub fn drop_item(&mut self, room: &mut Room, item_id: ItemId) -> Result<Item, GameError> {
        self.ensure_free()?;
        let item = self.inventory.remove(&item_id).ok_or(GameError::ItemNotHeld(item_id))?;
        room.put(item.clone());
        Ok(item)
    }

    /// Trade held items for a store item worth no more than their total score.
    ///
    /// Nothing moves unless the store accepts the offer and the player can carry
    /// the result.
    pub fn barter(&mut self, store: &mut Room, offered: &[ItemId], store_item: ItemId) -> Result<Trade, GameError> {
        self.ensure_free()?;

        let mut offered_ids: Vec<ItemId> = offered.to_vec();
        offered_ids.sort_unstable();
        offered_ids.dedup();

        let mut offered_value = 0;
        let mut offered_weight = 0;
        for id in &offered_ids {
            let item = self.inventory.get(id).ok_or(GameError::ItemNotHeld(*id))?;
            offered_value += item.score;
            offered_weight += item.weight;
        }

        let wanted_weight = store.barter_item(store_item, offered_value)?.weight;
        self.ensure_can_carry(self.weight() - offered_weight, wanted_weight)?;

        let mut given = Vec::with_capacity(offered_ids.len());
        for id in offered_ids {
            given.push(self.drop_item(store, id)?);
        }
        let Pickup { item, new_highscore } = self.take_item(store, store_item)?;

        Ok(Trade { given, received: item, new_highscore })
    }

    /// Discrete move to the adjacent room in `direction`.
    pub fn travel(&mut self, graph: &WorldGraph, direction: Direction) -> Result<Coord, GameError> {
        self.ensure_free()?;
        let next = graph.neighbor(self.coord, direction).ok_or(GameError::NoRoomInDirection)?;
        self.coord = next;
        self.position = SubCell::default();
        Ok(next)
    }

    /// Integrate one velocity input into the sub-cell position.
    ///
    /// Crossing the edge threshold toward an existing neighbour moves the player
    /// into that room and snaps them to the opposite edge. Toward a wall the
    /// position is simply clamped. Each axis is tried on its own, east/west
    /// first, and at most one transition happens per input. Returns the
    /// direction of that transition.
    pub fn integrate(&mut self, graph: &WorldGraph, velocity: SubCell, bounds: MotionBounds) -> Option<Direction> {
        if self.in_combat() {
            return None;
        }

        self.velocity = velocity;
        self.position.x = (self.position.x + velocity.x).clamp(-bounds.bound, bounds.bound);
        self.position.y = (self.position.y + velocity.y).clamp(-bounds.bound, bounds.bound);

        let horizontal = if self.position.x > bounds.edge_threshold {
            Some(Direction::East)
        } else if self.position.x < -bounds.edge_threshold {
            Some(Direction::West)
        } else {
            None
        };
        let vertical = if self.position.y > bounds.edge_threshold {
            Some(Direction::South)
        } else if self.position.y < -bounds.edge_threshold {
            Some(Direction::North)
        } else {
            None
        };

        let (crossing, next) = [horizontal, vertical]
            .into_iter()
            .flatten()
            .find_map(|direction| graph.neighbor(self.coord, direction).map(|next| (direction, next)))?;
        self.coord = next;
        match crossing {
            Direction::East => self.position.x = -bounds.edge_threshold,
            Direction::West => self.position.x = bounds.edge_threshold,
            Direction::South => self.position.y = -bounds.edge_threshold,
            Direction::North => self.position.y = bounds.edge_threshold,
        }
        Some(crossing)
    }

    pub fn to_view(&self) -> PlayerView {
        PlayerView {
            id: self.id,
            username: self.username.clone(),
            x: self.coord.x,
            y: self.coord.y,
            position: self.position,
            weight: self.weight(),
            max_weight: self.max_weight,
            score: self.score(),
            highscore: self.highscore,
            in_combat: self.in_combat(),
            items: inventory_view(&self.inventory),
        }
    }
}

// ============================================================================
// Player View (sent to client)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub username: String,
    pub x: i32,
    pub y: i32,
    pub position: SubCell,
    pub weight: i32,
    pub max_weight: i32,
    pub score: i32,
    pub highscore: i32,
    pub in_combat: bool,
    pub items: Vec<ItemView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;
    use crate::room::RoomKind;
    use std::time::Instant;

    fn room_at(x: i32, y: i32, kind: RoomKind) -> Room {
        Room::new((x * 10 + y) as u32 + 1, Coord::new(x, y), kind, kind.label(), "", Instant::now())
    }

    fn graph() -> WorldGraph {
        // (0,0) (1,0)
        //       (1,1)
        WorldGraph::from_rooms(
            vec![
                room_at(0, 0, RoomKind::DeadEnd),
                room_at(1, 0, RoomKind::Tunnel),
                room_at(1, 1, RoomKind::DeadEnd),
            ],
            Coord::new(1, 0),
        )
    }

    #[test]
    fn test_take_overweight_leaves_item_in_room() {
        let mut room = room_at(0, 0, RoomKind::Room);
        room.put(Item::new(2, ItemKind::Gem, 50, 100));
        let mut player = Player::new(1, "ant", "token", Coord::new(0, 0));
        player.inventory.insert(1, Item::new(1, ItemKind::Gem, 60, 90));

        let result = player.take_item(&mut room, 2);

        assert_eq!(result, Err(GameError::Overweight { current: 60, added: 50, max: 100 }));
        assert_eq!(player.inventory.len(), 1);
        assert!(room.items.contains_key(&2));
    }

    #[test]
    fn test_take_missing_item() {
        let mut room = room_at(0, 0, RoomKind::Room);
        let mut player = Player::new(1, "ant", "token", Coord::new(0, 0));
        assert_eq!(player.take_item(&mut room, 9), Err(GameError::ItemNotPresent(9)));
    }

    #[test]
    fn test_take_then_drop_is_a_no_op_on_room() {
        let mut room = room_at(0, 0, RoomKind::Room);
        let stick = Item::new(3, ItemKind::Stick, 10, 25);
        room.put(stick.clone());
        let mut player = Player::new(1, "ant", "token", Coord::new(0, 0));

        let pickup = player.take_item(&mut room, 3).unwrap();
        assert!(pickup.new_highscore);
        assert_eq!(player.highscore, 25);
        assert!(room.items.is_empty());

        player.drop_item(&mut room, 3).unwrap();
        assert_eq!(room.items.len(), 1);
        assert_eq!(room.items.get(&3), Some(&stick));
        // highscore is historical
        assert_eq!(player.highscore, 25);
        assert_eq!(player.score(), 0);
    }

    #[test]
    fn test_drop_unheld_item() {
        let mut room = room_at(0, 0, RoomKind::Room);
        let mut player = Player::new(1, "ant", "token", Coord::new(0, 0));
        assert_eq!(player.drop_item(&mut room, 4), Err(GameError::ItemNotHeld(4)));
    }

    #[test]
    fn test_barter_swaps_items() {
        let mut store = room_at(0, 0, RoomKind::Store);
        store.put(Item::new(10, ItemKind::Gem, 30, 150));
        let mut player = Player::new(1, "ant", "token", Coord::new(0, 0));
        player.inventory.insert(1, Item::new(1, ItemKind::Stick, 10, 80));
        player.inventory.insert(2, Item::new(2, ItemKind::Stick, 10, 80));

        let trade = player.barter(&mut store, &[1, 2], 10).unwrap();

        assert_eq!(trade.received.id, 10);
        assert_eq!(trade.given.len(), 2);
        assert_eq!(player.inventory.keys().copied().collect::<Vec<_>>(), vec![10]);
        assert!(store.items.contains_key(&1));
        assert!(store.items.contains_key(&2));
        assert!(!store.items.contains_key(&10));
    }

    #[test]
    fn test_barter_failures_leave_everything_in_place() {
        let mut store = room_at(0, 0, RoomKind::Store);
        store.put(Item::new(10, ItemKind::Gem, 95, 150));
        store.put(Item::new(11, ItemKind::Gem, 30, 500));
        let mut player = Player::new(1, "ant", "token", Coord::new(0, 0));
        player.inventory.insert(1, Item::new(1, ItemKind::Stick, 10, 200));
        player.inventory.insert(2, Item::new(2, ItemKind::Gem, 40, 10));

        // offering an item the player does not hold
        assert_eq!(player.barter(&mut store, &[1, 7], 10), Err(GameError::ItemNotHeld(7)));
        // not enough value
        assert_eq!(
            player.barter(&mut store, &[1], 11),
            Err(GameError::InsufficientValue { offered: 200, required: 500 })
        );
        // would end up at 40 + 95
        assert_eq!(
            player.barter(&mut store, &[1], 10),
            Err(GameError::Overweight { current: 40, added: 95, max: 100 })
        );

        assert_eq!(player.inventory.len(), 2);
        assert_eq!(store.items.len(), 2);
    }

    #[test]
    fn test_barter_outside_store() {
        let mut room = room_at(0, 0, RoomKind::Room);
        room.put(Item::new(10, ItemKind::Trash, 1, 1));
        let mut player = Player::new(1, "ant", "token", Coord::new(0, 0));
        player.inventory.insert(1, Item::new(1, ItemKind::Stick, 10, 200));
        assert_eq!(player.barter(&mut room, &[1], 10), Err(GameError::NotAStore));
    }

    #[test]
    fn test_travel_requires_a_room() {
        let graph = graph();
        let mut player = Player::new(1, "ant", "token", Coord::new(1, 0));

        assert_eq!(player.travel(&graph, Direction::North), Err(GameError::NoRoomInDirection));
        assert_eq!(player.coord, Coord::new(1, 0));
        assert_eq!(player.travel(&graph, Direction::South), Ok(Coord::new(1, 1)));
        assert_eq!(player.travel(&graph, Direction::North), Ok(Coord::new(1, 0)));
        assert_eq!(player.travel(&graph, Direction::West), Ok(Coord::new(0, 0)));
    }

    #[test]
    fn test_busy_players_cannot_act() {
        let graph = graph();
        let mut player = Player::new(1, "ant", "token", Coord::new(1, 0));
        player.combat = Some(3);
        assert_eq!(player.travel(&graph, Direction::South), Err(GameError::BusyInCombat));
    }

    #[test]
    fn test_integrate_crosses_into_neighbour() {
        let graph = graph();
        let bounds = MotionBounds::default();
        let mut player = Player::new(1, "ant", "token", Coord::new(1, 0));

        assert_eq!(player.integrate(&graph, SubCell { x: 0.0, y: 0.5 }, bounds), None);
        assert_eq!(player.integrate(&graph, SubCell { x: 0.0, y: 0.5 }, bounds), Some(Direction::South));
        assert_eq!(player.coord, Coord::new(1, 1));
        assert_eq!(player.position.y, -0.9);
    }

    #[test]
    fn test_integrate_clamps_at_walls() {
        let graph = graph();
        let bounds = MotionBounds::default();
        let mut player = Player::new(1, "ant", "token", Coord::new(1, 0));

        for _ in 0..5 {
            assert_eq!(player.integrate(&graph, SubCell { x: 0.0, y: -0.7 }, bounds), None);
        }
        assert_eq!(player.coord, Coord::new(1, 0));
        assert_eq!(player.position.y, -1.0);
    }

    #[test]
    fn test_integrate_at_corner_tries_both_axes() {
        let graph = graph();
        let bounds = MotionBounds::default();
        let mut player = Player::new(1, "ant", "token", Coord::new(1, 0));

        // east of (1,0) is a wall, south is open
        let crossing = player.integrate(&graph, SubCell { x: 0.95, y: 0.95 }, bounds);
        assert_eq!(crossing, Some(Direction::South));
        assert_eq!(player.coord, Coord::new(1, 1));
        assert_eq!(player.position.y, -0.9);
        assert_eq!(player.position.x, 0.95);
    }
}
