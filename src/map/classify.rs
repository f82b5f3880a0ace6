//! Turns an occupancy grid into typed, named room blueprints.

use std::collections::{HashMap, HashSet};

use rand::Rng;

use super::grid::{Coord, Direction, Grid};
use super::names::{self, NamePool};
use crate::room::{RoomId, RoomKind};

/// Everything needed to build a room, minus its inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomBlueprint {
    pub id: RoomId,
    pub coord: Coord,
    pub kind: RoomKind,
    pub name: String,
    pub description: String,
}

/// Classify one occupied cell from its orthogonal neighbours.
///
/// One neighbour is a dead end, three or more a room. Two opposite neighbours
/// make a straight tunnel; two at a corner make a room only when the diagonal
/// cell inside the corner is occupied too (the cell closes a loop), otherwise a
/// bend in a tunnel. An isolated cell (a one-room map) counts as a room.
pub fn classify(grid: &Grid, coord: Coord) -> Option<RoomKind> {
    if !grid.is_occupied(coord) {
        return None;
    }

    let neighbors = grid.neighbors(coord);
    let kind = match neighbors.as_slice() {
        [] => RoomKind::Room,
        [_] => RoomKind::DeadEnd,
        [a, b] if a.opposite() == *b => RoomKind::Tunnel,
        [a, b] => {
            let diagonal = coord.step(*a).step(*b);
            if grid.is_occupied(diagonal) {
                RoomKind::Room
            } else {
                RoomKind::Tunnel
            }
        }
        _ => RoomKind::Room,
    };
    Some(kind)
}

/// Classify, name and describe every occupied cell, in row-major order.
///
/// Cells listed in `stores` become stores instead of their structural kind.
/// Ordinary rooms draw a unique name pair from `rng`; ids are assigned
/// sequentially from 1.
pub fn blueprints<R: Rng + ?Sized>(grid: &Grid, stores: &HashSet<Coord>, rng: &mut R) -> Vec<RoomBlueprint> {
    let mut pool = NamePool::shuffled(rng);

    // First pass: kind and name for every cell, so descriptions can refer to neighbours.
    let mut named: Vec<(Coord, RoomKind, String)> = Vec::new();
    for coord in grid.occupied_cells() {
        let kind = if stores.contains(&coord) {
            RoomKind::Store
        } else {
            classify(grid, coord).unwrap_or(RoomKind::Room)
        };
        let name = match kind {
            RoomKind::Room => names::display_name(pool.draw()),
            other => other.label().to_string(),
        };
        named.push((coord, kind, name));
    }

    let lookup: HashMap<Coord, (RoomKind, &str)> = named
        .iter()
        .map(|(coord, kind, name)| (*coord, (*kind, name.as_str())))
        .collect();

    named
        .iter()
        .enumerate()
        .map(|(idx, (coord, kind, name))| {
            let clauses: Vec<String> = Direction::ALL
                .into_iter()
                .filter_map(|dir| {
                    lookup.get(&coord.step(dir)).map(|(neighbor_kind, neighbor_name)| {
                        let phrase = match neighbor_kind {
                            RoomKind::Room => neighbor_name.to_lowercase(),
                            other => other.label().to_lowercase(),
                        };
                        format!("to the {} is {}", dir.name(), names::with_article(&phrase))
                    })
                })
                .collect();

            let exits = names::describe_neighbors(&clauses);
            let description = match kind.flavor() {
                Some(flavor) => format!("{} {}", flavor, exits),
                None => exits,
            };

            RoomBlueprint {
                id: idx as RoomId + 1,
                coord: *coord,
                kind: *kind,
                name: name.clone(),
                description,
            }
        })
        .collect()
}
