//! Wager combat between two players sharing a room.
//!
//! Opening a combat moves both inventories into one pool. Each side stakes a
//! subset of that pool; once both have staked (or the optional timeout
//! passes) the higher total score wins and the pool is split three ways:
//! winner, loser and the room.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use crate::error::GameError;
use crate::item::{Inventory, Item, ItemId, total_score, total_weight};
use crate::map::Coord;
use crate::player::{Player, PlayerId};

pub type CombatId = u64;

/// Default cap on the total weight of one stake.
pub const STAKE_WEIGHT_CAP: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatSide {
    First,
    Second,
}

#[derive(Debug, Clone)]
pub struct Combat {
    pub id: CombatId,
    pub first: PlayerId,
    pub second: PlayerId,
    pub room: Coord,
    pub full_items: Inventory,
    stakes: [Option<BTreeSet<ItemId>>; 2],
    weight_cap: i32,
    started: Instant,
}

/// Where every pool item ends up once a combat resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub combat_id: CombatId,
    pub first: PlayerId,
    pub second: PlayerId,
    pub first_score: i32,
    pub second_score: i32,
    /// `None` on a tie
    pub winner: Option<PlayerId>,
    pub first_items: Vec<Item>,
    pub second_items: Vec<Item>,
    pub returned: Vec<Item>,
}

impl Combat {
    /// Pair two players and pool their inventories.
    ///
    /// Both players are marked busy and left holding nothing until settlement.
    pub fn open(
        id: CombatId,
        first: &mut Player,
        second: &mut Player,
        weight_cap: i32,
        now: Instant,
    ) -> Result<Self, GameError> {
        if first.in_combat() {
            return Err(GameError::AlreadyInCombat(first.username.clone()));
        }
        if second.in_combat() {
            return Err(GameError::AlreadyInCombat(second.username.clone()));
        }
        if first.coord != second.coord {
            return Err(GameError::NotInSameRoom);
        }

        let mut full_items: Inventory = first.inventory.drain().collect();
        for (item_id, item) in second.inventory.drain() {
            if full_items.insert(item_id, item).is_some() {
                warn!("Combat {} pool: item id {} held by both players, keeping the second copy", id, item_id);
            }
        }

        first.combat = Some(id);
        second.combat = Some(id);

        Ok(Self {
            id,
            first: first.id,
            second: second.id,
            room: first.coord,
            full_items,
            stakes: [None, None],
            weight_cap,
            started: now,
        })
    }

    pub fn side_of(&self, player_id: PlayerId) -> Option<CombatSide> {
        if player_id == self.first {
            Some(CombatSide::First)
        } else if player_id == self.second {
            Some(CombatSide::Second)
        } else {
            None
        }
    }

    pub fn involves(&self, player_id: PlayerId) -> bool {
        self.side_of(player_id).is_some()
    }

    pub fn opponent_of(&self, player_id: PlayerId) -> Option<PlayerId> {
        match self.side_of(player_id)? {
            CombatSide::First => Some(self.second),
            CombatSide::Second => Some(self.first),
        }
    }

    /// Record (or replace) a side's stake.
    pub fn submit(&mut self, player_id: PlayerId, item_ids: &[ItemId]) -> Result<(), GameError> {
        let side = self.side_of(player_id).ok_or(GameError::NotACombatant(self.id))?;

        let stake: BTreeSet<ItemId> = item_ids.iter().copied().collect();
        let mut weight = 0;
        for item_id in &stake {
            let item = self.full_items.get(item_id).ok_or(GameError::NotInCombatPool(*item_id))?;
            weight += item.weight;
        }
        if weight > self.weight_cap {
            return Err(GameError::StakeTooHeavy { weight, cap: self.weight_cap });
        }

        self.stakes[side as usize] = Some(stake);
        Ok(())
    }

    pub fn has_submitted(&self, side: CombatSide) -> bool {
        self.stakes[side as usize].is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.stakes.iter().all(Option::is_some)
    }

    pub fn is_expired(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= timeout
    }

    fn stake(&self, side: CombatSide) -> BTreeSet<ItemId> {
        self.stakes[side as usize].clone().unwrap_or_default()
    }

    fn stake_score(&self, stake: &BTreeSet<ItemId>) -> i32 {
        total_score(stake.iter().filter_map(|id| self.full_items.get(id)))
    }

    /// Split the pool. A side that never staked wagers nothing.
    pub fn settle(mut self) -> Settlement {
        let first_stake = self.stake(CombatSide::First);
        let second_stake = self.stake(CombatSide::Second);
        let first_score = self.stake_score(&first_stake);
        let second_score = self.stake_score(&second_stake);

        let (first_keeps, second_keeps, winner): (BTreeSet<ItemId>, BTreeSet<ItemId>, _) =
            if first_score > second_score {
                let loser_keeps = second_stake.difference(&first_stake).copied().collect();
                (first_stake, loser_keeps, Some(self.first))
            } else if second_score > first_score {
                let loser_keeps = first_stake.difference(&second_stake).copied().collect();
                (loser_keeps, second_stake, Some(self.second))
            } else {
                (
                    first_stake.difference(&second_stake).copied().collect(),
                    second_stake.difference(&first_stake).copied().collect(),
                    None,
                )
            };

        let mut take = |ids: &BTreeSet<ItemId>| -> Vec<Item> {
            ids.iter().filter_map(|id| self.full_items.remove(id)).collect()
        };
        let first_items = take(&first_keeps);
        let second_items = take(&second_keeps);
        let mut returned: Vec<Item> = self.full_items.drain().map(|(_, item)| item).collect();
        returned.sort_by_key(|item| item.id);

        Settlement {
            combat_id: self.id,
            first: self.first,
            second: self.second,
            first_score,
            second_score,
            winner,
            first_items,
            second_items,
            returned,
        }
    }

    pub fn to_view(&self) -> CombatView {
        CombatView {
            id: self.id,
            x: self.room.x,
            y: self.room.y,
            pool_weight: total_weight(self.full_items.values()),
            pool: crate::item::inventory_view(&self.full_items),
        }
    }
}

impl Settlement {
    /// Items awarded to `player_id`, if they took part.
    pub fn items_for(&self, player_id: PlayerId) -> Option<&[Item]> {
        if player_id == self.first {
            Some(&self.first_items)
        } else if player_id == self.second {
            Some(&self.second_items)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CombatView {
    pub id: CombatId,
    pub x: i32,
    pub y: i32,
    pub pool_weight: i32,
    pub pool: Vec<crate::item::ItemView>,
}
