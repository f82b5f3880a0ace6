use std::collections::HashMap;

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use serde::{Deserialize, Serialize};

pub type ItemId = u64;

/// Item-id -> Item. Used by rooms, players and combat pools alike.
pub type Inventory = HashMap<ItemId, Item>;

// ============================================================================
// Item Kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Trash,
    Stick,
    Gem,
    Hammer,
}

impl ItemKind {
    pub const ALL: [ItemKind; 4] = [ItemKind::Trash, ItemKind::Stick, ItemKind::Gem, ItemKind::Hammer];

    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::Trash => "Trash",
            ItemKind::Stick => "Stick",
            ItemKind::Gem => "Gem",
            ItemKind::Hammer => "Hammer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ItemKind::Trash => "Low score, low weight. Try not to get too much.",
            ItemKind::Stick => "Medium score, medium weight. Not bad for an ant.",
            ItemKind::Gem => "High score, high weight.",
            ItemKind::Hammer => "A sturdy tool. Worth something to the right buyer.",
        }
    }

    /// Inclusive weight range a freshly rolled item of this kind falls in.
    pub fn weight_range(&self) -> (i32, i32) {
        match self {
            ItemKind::Trash => (1, 5),
            ItemKind::Stick => (5, 15),
            ItemKind::Gem => (20, 40),
            ItemKind::Hammer => (10, 20),
        }
    }

    /// Inclusive score range a freshly rolled item of this kind falls in.
    pub fn score_range(&self) -> (i32, i32) {
        match self {
            ItemKind::Trash => (1, 10),
            ItemKind::Stick => (10, 40),
            ItemKind::Gem => (80, 200),
            ItemKind::Hammer => (20, 50),
        }
    }

    /// Parse a stored item name back into its kind.
    pub fn from_name(name: &str) -> Option<Self> {
        ItemKind::ALL.into_iter().find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

// ============================================================================
// Item
// ============================================================================

/// An immutable item value. Exactly one room, player or combat pool owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub kind: ItemKind,
    pub weight: i32,
    pub score: i32,
}

impl Item {
    pub fn new(id: ItemId, kind: ItemKind, weight: i32, score: i32) -> Self {
        Self { id, kind, weight, score }
    }

    /// Roll a new item of `kind` with weight and score drawn from its ranges.
    pub fn roll<R: Rng + ?Sized>(id: ItemId, kind: ItemKind, rng: &mut R) -> Self {
        let (min_w, max_w) = kind.weight_range();
        let (min_s, max_s) = kind.score_range();
        Self {
            id,
            kind,
            weight: rng.gen_range(min_w..=max_w),
            score: rng.gen_range(min_s..=max_s),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

pub fn total_weight<'a>(items: impl IntoIterator<Item = &'a Item>) -> i32 {
    items.into_iter().map(|i| i.weight).sum()
}

pub fn total_score<'a>(items: impl IntoIterator<Item = &'a Item>) -> i32 {
    items.into_iter().map(|i| i.score).sum()
}

// ============================================================================
// Id allocation
// ============================================================================

/// Hands out globally unique item ids. Seeded past the highest stored id on load.
#[derive(Debug, Clone)]
pub struct ItemIdAllocator {
    next: ItemId,
}

impl ItemIdAllocator {
    pub fn starting_after(last: ItemId) -> Self {
        Self { next: last + 1 }
    }

    pub fn next_id(&mut self) -> ItemId {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for ItemIdAllocator {
    fn default() -> Self {
        Self::starting_after(0)
    }
}

// ============================================================================
// Loot tables
// ============================================================================

/// Relative odds of each kind showing up when a room restocks.
#[derive(Debug, Clone, Copy)]
pub struct LootTable(pub &'static [(ItemKind, u32)]);

impl LootTable {
    /// Draw `count` items with replacement, each kind picked by its weight.
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, ids: &mut ItemIdAllocator, rng: &mut R) -> Vec<Item> {
        let weights: Vec<u32> = self.0.iter().map(|(_, w)| *w).collect();
        let dist = match WeightedIndex::new(&weights) {
            Ok(dist) => dist,
            Err(e) => {
                tracing::warn!("Empty loot table: {}", e);
                return Vec::new();
            }
        };

        (0..count)
            .map(|_| {
                let kind = self.0[dist.sample(rng)].0;
                Item::roll(ids.next_id(), kind, rng)
            })
            .collect()
    }
}

// ============================================================================
// Item View (sent to client)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    pub id: ItemId,
    pub name: &'static str,
    pub description: &'static str,
    pub weight: i32,
    pub score: i32,
}

impl From<&Item> for ItemView {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            name: item.kind.name(),
            description: item.kind.description(),
            weight: item.weight,
            score: item.score,
        }
    }
}

/// Sorted by id so clients get a stable listing.
pub fn inventory_view(items: &Inventory) -> Vec<ItemView> {
    let mut views: Vec<ItemView> = items.values().map(ItemView::from).collect();
    views.sort_by_key(|v| v.id);
    views
}
