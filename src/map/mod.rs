//! Procedural map generation: occupancy grid, room classification, naming.

pub mod classify;
pub mod grid;
pub mod names;

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;

pub use classify::{RoomBlueprint, blueprints, classify};
pub use grid::{Coord, Direction, GeneratedGrid, Grid, GridGenerator, MapError, MAX_SEED};

use crate::room::RoomKind;

/// Pick `count` store cells, preferring dead ends, never the spawn cell.
///
/// Draws from the generator's RNG so store placement is reproducible from the
/// map seed.
pub fn place_stores<R: Rng + ?Sized>(grid: &Grid, count: usize, rng: &mut R) -> HashSet<Coord> {
    let spawn = grid.center();
    let mut dead_ends: Vec<Coord> = Vec::new();
    let mut others: Vec<Coord> = Vec::new();

    for coord in grid.occupied_cells().filter(|c| *c != spawn) {
        match classify(grid, coord) {
            Some(RoomKind::DeadEnd) => dead_ends.push(coord),
            _ => others.push(coord),
        }
    }

    dead_ends.shuffle(rng);
    others.shuffle(rng);

    dead_ends.into_iter().chain(others).take(count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_stores_prefer_dead_ends_and_skip_spawn() {
        let generated = GridGenerator {
            size: 15,
            room_limit: 60,
            turn_chance: 0.25,
            walkers: 2,
        }
        .generate(Some(9))
        .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let stores = place_stores(&generated.grid, 2, &mut rng);

        assert_eq!(stores.len(), 2);
        assert!(!stores.contains(&generated.grid.center()));
        let dead_ends = generated
            .grid
            .occupied_cells()
            .filter(|c| *c != generated.grid.center())
            .filter(|c| classify(&generated.grid, *c) == Some(RoomKind::DeadEnd))
            .count();
        let store_dead_ends = stores
            .iter()
            .filter(|c| classify(&generated.grid, **c) == Some(RoomKind::DeadEnd))
            .count();
        assert_eq!(store_dead_ends, dead_ends.min(2));
    }

    #[test]
    fn test_one_room_map_has_no_store() {
        let generated = GridGenerator {
            size: 5,
            room_limit: 1,
            turn_chance: 0.25,
            walkers: 2,
        }
        .generate(Some(1))
        .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(place_stores(&generated.grid, 3, &mut rng).is_empty());
    }
}
