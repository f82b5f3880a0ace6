//! Rooms: coordinate-addressed nodes of the world graph holding items.
//!
//! Every variant restocks from its own loot table. Ordinary rooms, tunnels and
//! dead ends only restock when they look picked clean (or overstuffed) and
//! their wait window has passed; stores restock on every window and also
//! barter items for score.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::GameError;
use crate::item::{Inventory, Item, ItemId, ItemIdAllocator, ItemKind, ItemView, LootTable, inventory_view};
use crate::map::Coord;

pub type RoomId = u32;

/// A non-store room holding more items than this always qualifies for a restock.
pub const OVERFLOW_THRESHOLD: usize = 35;

// ============================================================================
// Room kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Room,
    Tunnel,
    DeadEnd,
    Store,
}

/// How much a room holds after a restock and how long it waits between restocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub item_max: usize,
    pub minutes_to_wait: u64,
}

impl RefreshPolicy {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.minutes_to_wait * 60)
    }
}

impl RoomKind {
    pub fn refresh_policy(&self) -> RefreshPolicy {
        match self {
            RoomKind::Room => RefreshPolicy { item_max: 10, minutes_to_wait: 15 },
            RoomKind::Tunnel => RefreshPolicy { item_max: 3, minutes_to_wait: 10 },
            RoomKind::DeadEnd => RefreshPolicy { item_max: 4, minutes_to_wait: 10 },
            RoomKind::Store => RefreshPolicy { item_max: 8, minutes_to_wait: 2 },
        }
    }

    pub fn loot_table(&self) -> LootTable {
        match self {
            RoomKind::Room => LootTable(&[
                (ItemKind::Trash, 5),
                (ItemKind::Stick, 4),
                (ItemKind::Gem, 1),
                (ItemKind::Hammer, 1),
            ]),
            RoomKind::Tunnel => LootTable(&[(ItemKind::Trash, 6), (ItemKind::Stick, 3)]),
            // Dead ends are where gems hide
            RoomKind::DeadEnd => LootTable(&[(ItemKind::Trash, 3), (ItemKind::Stick, 2), (ItemKind::Gem, 2)]),
            RoomKind::Store => LootTable(&[(ItemKind::Stick, 2), (ItemKind::Gem, 3), (ItemKind::Hammer, 2)]),
        }
    }

    /// Display name for rooms that are not individually named.
    pub fn label(&self) -> &'static str {
        match self {
            RoomKind::Room => "Room",
            RoomKind::Tunnel => "Tunnel",
            RoomKind::DeadEnd => "Dead End",
            RoomKind::Store => "Store",
        }
    }

    /// Lead-in sentence for descriptions of the unnamed kinds.
    pub fn flavor(&self) -> Option<&'static str> {
        match self {
            RoomKind::Room => None,
            RoomKind::Tunnel => Some("A narrow tunnel winds through the rock."),
            RoomKind::DeadEnd => Some("The passage ends abruptly."),
            RoomKind::Store => Some("A cluttered trading post. The keeper trades goods for score."),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Room => "room",
            RoomKind::Tunnel => "tunnel",
            RoomKind::DeadEnd => "dead_end",
            RoomKind::Store => "store",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "room" => Some(RoomKind::Room),
            "tunnel" => Some(RoomKind::Tunnel),
            "dead_end" => Some(RoomKind::DeadEnd),
            "store" => Some(RoomKind::Store),
            _ => None,
        }
    }
}

// ============================================================================
// Room
// ============================================================================

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub coord: Coord,
    pub kind: RoomKind,
    pub name: String,
    pub description: String,
    /// May exceed `item_max` after players drop things; only a restock trims it.
    pub items: Inventory,
    last_refresh: Instant,
}

impl Room {
    pub fn new(id: RoomId, coord: Coord, kind: RoomKind, name: &str, description: &str, now: Instant) -> Self {
        Self {
            id,
            coord,
            kind,
            name: name.to_string(),
            description: description.to_string(),
            items: Inventory::new(),
            last_refresh: now,
        }
    }

    pub fn is_store(&self) -> bool {
        self.kind == RoomKind::Store
    }

    pub fn put(&mut self, item: Item) {
        self.items.insert(item.id, item);
    }

    pub fn take(&mut self, item_id: ItemId) -> Option<Item> {
        self.items.remove(&item_id)
    }

    /// Whether a restock is due at `now`.
    pub fn needs_refresh(&self, now: Instant) -> bool {
        let policy = self.kind.refresh_policy();
        if now.saturating_duration_since(self.last_refresh) < policy.wait() {
            return false;
        }
        if self.is_store() {
            return true;
        }
        let count = self.items.len();
        count * 2 < policy.item_max || count > OVERFLOW_THRESHOLD
    }

    /// Replace the whole inventory with a fresh draw from the loot table.
    ///
    /// Returns the items that were discarded.
    pub fn refresh<R: Rng + ?Sized>(&mut self, ids: &mut ItemIdAllocator, rng: &mut R, now: Instant) -> Vec<Item> {
        let policy = self.kind.refresh_policy();
        let count = rng.gen_range(policy.item_max.div_ceil(2)..=policy.item_max);
        let fresh = self.kind.loot_table().sample(count, ids, rng);

        let discarded: Vec<Item> = self.items.drain().map(|(_, item)| item).collect();
        self.items = fresh.into_iter().map(|item| (item.id, item)).collect();
        self.last_refresh = now;
        discarded
    }

    /// Check whether `offered_value` buys item `item_id` from this store.
    ///
    /// The item stays in stock; the caller removes it once the buyer is known
    /// to be able to carry it.
    pub fn barter_item(&self, item_id: ItemId, offered_value: i32) -> Result<&Item, GameError> {
        if !self.is_store() {
            return Err(GameError::NotAStore);
        }
        let item = self.items.get(&item_id).ok_or(GameError::NotInStock(item_id))?;
        if item.score > offered_value {
            return Err(GameError::InsufficientValue { offered: offered_value, required: item.score });
        }
        Ok(item)
    }

    pub fn to_view(&self) -> RoomView {
        RoomView {
            id: self.id,
            x: self.coord.x,
            y: self.coord.y,
            kind: self.kind,
            name: self.name.clone(),
            description: self.description.clone(),
            items: inventory_view(&self.items),
        }
    }
}

// ============================================================================
// Room View (sent to client)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RoomView {
    pub id: RoomId,
    pub x: i32,
    pub y: i32,
    pub kind: RoomKind,
    pub name: String,
    pub description: String,
    pub items: Vec<ItemView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn room(kind: RoomKind, now: Instant) -> Room {
        Room::new(1, Coord::new(0, 0), kind, kind.label(), "", now)
    }

    #[test]
    fn test_refresh_waits_for_window() {
        let start = Instant::now();
        let room = room(RoomKind::Room, start);
        assert!(!room.needs_refresh(start));
        assert!(!room.needs_refresh(start + Duration::from_secs(10 * 60)));
        assert!(room.needs_refresh(start + Duration::from_secs(15 * 60)));
    }

    #[test]
    fn test_ordinary_rooms_hold_more_and_wait_longer() {
        let ordinary = RoomKind::Room.refresh_policy();
        for kind in [RoomKind::Tunnel, RoomKind::DeadEnd] {
            let policy = kind.refresh_policy();
            assert!(ordinary.item_max > policy.item_max, "{:?}", kind);
            assert!(ordinary.minutes_to_wait >= policy.minutes_to_wait, "{:?}", kind);
        }
    }

    #[test]
    fn test_healthy_room_is_left_alone() {
        let start = Instant::now();
        let mut room = room(RoomKind::Room, start);
        for id in 0..6 {
            room.put(Item::new(id, ItemKind::Stick, 5, 10));
        }
        let later = start + Duration::from_secs(60 * 60);
        assert!(!room.needs_refresh(later));

        for id in 6..40 {
            room.put(Item::new(id, ItemKind::Trash, 1, 1));
        }
        assert!(room.needs_refresh(later));
    }

    #[test]
    fn test_store_refreshes_regardless_of_stock() {
        let start = Instant::now();
        let mut store = room(RoomKind::Store, start);
        for id in 0..8 {
            store.put(Item::new(id, ItemKind::Gem, 30, 100));
        }
        assert!(!store.needs_refresh(start + Duration::from_secs(60)));
        assert!(store.needs_refresh(start + Duration::from_secs(2 * 60)));
    }

    #[test]
    fn test_refresh_replaces_inventory() {
        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(3);
        let mut ids = ItemIdAllocator::starting_after(100);
        let mut tunnel = room(RoomKind::Tunnel, start);
        tunnel.put(Item::new(1, ItemKind::Gem, 30, 100));

        let later = start + Duration::from_secs(10 * 60);
        assert!(tunnel.needs_refresh(later));
        let discarded = tunnel.refresh(&mut ids, &mut rng, later);

        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].id, 1);
        assert!((2..=3).contains(&tunnel.items.len()));
        assert!(tunnel.items.keys().all(|id| *id > 100));
        assert!(tunnel.items.values().all(|i| matches!(i.kind, ItemKind::Trash | ItemKind::Stick)));
        assert!(!tunnel.needs_refresh(later));
    }

    #[test]
    fn test_barter_item_rejects_low_offer() {
        let mut store = room(RoomKind::Store, Instant::now());
        store.put(Item::new(7, ItemKind::Gem, 30, 500));

        assert_eq!(
            store.barter_item(7, 300),
            Err(GameError::InsufficientValue { offered: 300, required: 500 })
        );
        assert_eq!(store.items.len(), 1);
        assert_eq!(store.barter_item(8, 1000), Err(GameError::NotInStock(8)));
        assert_eq!(store.barter_item(7, 500).map(|i| i.id), Ok(7));
        // still in stock until the caller takes it
        assert!(store.items.contains_key(&7));
    }

    #[test]
    fn test_barter_needs_a_store() {
        let mut plain = room(RoomKind::Room, Instant::now());
        plain.put(Item::new(7, ItemKind::Gem, 30, 5));
        assert_eq!(plain.barter_item(7, 1000), Err(GameError::NotAStore));
    }

    #[test]
    fn test_kind_round_trips_through_storage_name() {
        for kind in [RoomKind::Room, RoomKind::Tunnel, RoomKind::DeadEnd, RoomKind::Store] {
            assert_eq!(RoomKind::parse(kind.as_str()), Some(kind));
        }
    }
}
