//! Random-walk grid generation.
//!
//! Walkers start on the centre cell and wander, marking every cell they step on
//! until the grid holds the requested number of rooms. Every newly marked cell
//! is adjacent to the walker's previous (already marked) cell, so the occupied
//! set is always one connected component.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound (exclusive) for seeds drawn when the caller does not supply one.
pub const MAX_SEED: u64 = 1 << 53;

// ============================================================================
// Coordinates and directions
// ============================================================================

/// World-cell coordinate. `x` grows east, `y` grows south.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn step(&self, direction: Direction) -> Coord {
        let (dx, dy) = direction.offset();
        Coord::new(self.x + dx, self.y + dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// Clockwise order, starting north.
    pub const ALL: [Direction; 4] = [Direction::North, Direction::East, Direction::South, Direction::West];

    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    pub fn rotate_cw(&self) -> Direction {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
        }
    }

    pub fn opposite(&self) -> Direction {
        self.rotate_cw().rotate_cw()
    }

    /// Parse a movement token: `n`, `s`, `e`, `w` (full names accepted too).
    pub fn from_token(token: &str) -> Option<Direction> {
        match token.trim().to_ascii_lowercase().as_str() {
            "n" | "north" => Some(Direction::North),
            "e" | "east" => Some(Direction::East),
            "s" | "south" => Some(Direction::South),
            "w" | "west" => Some(Direction::West),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::East => "east",
            Direction::South => "south",
            Direction::West => "west",
        }
    }
}

// ============================================================================
// Grid
// ============================================================================

/// Square occupancy grid. A `true` cell holds a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    size: usize,
    cells: Vec<bool>,
    occupied: usize,
}

impl Grid {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![false; size * size],
            occupied: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn center(&self) -> Coord {
        let c = (self.size / 2) as i32;
        Coord::new(c, c)
    }

    pub fn in_bounds(&self, coord: Coord) -> bool {
        coord.x >= 0 && coord.y >= 0 && (coord.x as usize) < self.size && (coord.y as usize) < self.size
    }

    /// Out-of-bounds cells read as unoccupied.
    pub fn is_occupied(&self, coord: Coord) -> bool {
        self.in_bounds(coord) && self.cells[coord.y as usize * self.size + coord.x as usize]
    }

    /// Mark a cell. Returns true only if it was newly occupied.
    pub fn occupy(&mut self, coord: Coord) -> bool {
        if !self.in_bounds(coord) {
            return false;
        }
        let idx = coord.y as usize * self.size + coord.x as usize;
        if self.cells[idx] {
            return false;
        }
        self.cells[idx] = true;
        self.occupied += 1;
        true
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied
    }

    /// Occupied cells in row-major order.
    pub fn occupied_cells(&self) -> impl Iterator<Item = Coord> + '_ {
        self.cells.iter().enumerate().filter(|(_, occupied)| **occupied).map(|(idx, _)| {
            Coord::new((idx % self.size) as i32, (idx / self.size) as i32)
        })
    }

    /// Occupied orthogonal neighbours, in `Direction::ALL` order.
    pub fn neighbors(&self, coord: Coord) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|d| self.is_occupied(coord.step(*d)))
            .collect()
    }

    /// Flood-fill check that every occupied cell is reachable from any other.
    pub fn is_connected(&self) -> bool {
        let Some(start) = self.occupied_cells().next() else {
            return true;
        };

        let mut seen = vec![false; self.cells.len()];
        let mut queue = VecDeque::from([start]);
        seen[start.y as usize * self.size + start.x as usize] = true;
        let mut reached = 1;

        while let Some(coord) = queue.pop_front() {
            for dir in self.neighbors(coord) {
                let next = coord.step(dir);
                let idx = next.y as usize * self.size + next.x as usize;
                if !seen[idx] {
                    seen[idx] = true;
                    reached += 1;
                    queue.push_back(next);
                }
            }
        }

        reached == self.occupied
    }
}

// ============================================================================
// Generator
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    #[error("grid size must be at least 1")]
    EmptyGrid,
    #[error("room limit {limit} must be between 1 and {capacity}")]
    RoomLimitOutOfRange { limit: usize, capacity: usize },
    #[error("at least one walker is required")]
    NoWalkers,
    #[error("turn chance {0} must be within [0, 1)")]
    InvalidTurnChance(f64),
}

/// A random-walk agent.
#[derive(Debug, Clone)]
struct Walker {
    position: Coord,
    heading: Direction,
}

impl Walker {
    fn step(&mut self, grid: &mut Grid, turn_chance: f64, rng: &mut StdRng) {
        if rng.gen_bool(turn_chance) {
            self.heading = self.heading.rotate_cw();
            return;
        }

        let next = self.position.step(self.heading);
        if grid.in_bounds(next) {
            self.position = next;
            grid.occupy(next);
        }
    }
}

/// Parameters for one generation run.
#[derive(Debug, Clone)]
pub struct GridGenerator {
    pub size: usize,
    pub room_limit: usize,
    pub turn_chance: f64,
    pub walkers: usize,
}

/// A generated grid plus the seed and RNG state that produced it.
///
/// The RNG is handed back so later seeded steps (naming, store placement,
/// initial stock) stay reproducible from the same seed.
pub struct GeneratedGrid {
    pub grid: Grid,
    pub seed: u64,
    pub rng: StdRng,
}

impl GridGenerator {
    pub fn validate(&self) -> Result<(), MapError> {
        if self.size == 0 {
            return Err(MapError::EmptyGrid);
        }
        let capacity = self.size * self.size;
        if self.room_limit == 0 || self.room_limit > capacity {
            return Err(MapError::RoomLimitOutOfRange { limit: self.room_limit, capacity });
        }
        if self.walkers == 0 {
            return Err(MapError::NoWalkers);
        }
        if !(0.0..1.0).contains(&self.turn_chance) {
            return Err(MapError::InvalidTurnChance(self.turn_chance));
        }
        Ok(())
    }

    /// Generate a grid. Without a seed one is drawn and returned with the result.
    pub fn generate(&self, seed: Option<u64>) -> Result<GeneratedGrid, MapError> {
        self.validate()?;

        let seed = seed.unwrap_or_else(|| rand::thread_rng().gen_range(0..MAX_SEED));
        let mut rng = StdRng::seed_from_u64(seed);
        let mut grid = Grid::new(self.size);
        let center = grid.center();
        grid.occupy(center);

        let mut walkers: Vec<Walker> = (0..self.walkers)
            .map(|i| Walker {
                position: center,
                heading: Direction::ALL[i % Direction::ALL.len()],
            })
            .collect();

        'walk: while grid.occupied_count() < self.room_limit {
            for walker in &mut walkers {
                if grid.occupied_count() >= self.room_limit {
                    break 'walk;
                }
                walker.step(&mut grid, self.turn_chance, &mut rng);
            }
        }

        tracing::debug!(
            "Generated {}x{} grid with {} rooms (seed {})",
            self.size,
            self.size,
            grid.occupied_count(),
            seed
        );

        Ok(GeneratedGrid { grid, seed, rng })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn generator(size: usize, room_limit: usize) -> GridGenerator {
        GridGenerator {
            size,
            room_limit,
            turn_chance: 0.25,
            walkers: 2,
        }
    }

    #[test]
    fn test_seed_42_reproduces_ten_rooms() {
        let first = generator(25, 10).generate(Some(42)).unwrap();
        let second = generator(25, 10).generate(Some(42)).unwrap();

        assert_eq!(first.grid.occupied_count(), 10);
        assert_eq!(first.seed, 42);
        assert_eq!(
            first.grid.occupied_cells().collect::<Vec<_>>(),
            second.grid.occupied_cells().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_unseeded_generation_reports_its_seed() {
        let generated = generator(9, 20).generate(None).unwrap();
        assert!(generated.seed < MAX_SEED);

        let replay = generator(9, 20).generate(Some(generated.seed)).unwrap();
        assert_eq!(generated.grid, replay.grid);
    }

    #[test]
    fn test_full_grid_is_reachable() {
        let generated = generator(4, 16).generate(Some(3)).unwrap();
        assert_eq!(generated.grid.occupied_count(), 16);
        assert!(generated.grid.is_connected());
    }

    #[test]
    fn test_rejects_impossible_parameters() {
        assert_eq!(generator(0, 1).generate(Some(1)).err(), Some(MapError::EmptyGrid));
        assert!(matches!(
            generator(3, 10).generate(Some(1)),
            Err(MapError::RoomLimitOutOfRange { limit: 10, capacity: 9 })
        ));
        let mut no_walkers = generator(5, 5);
        no_walkers.walkers = 0;
        assert_eq!(no_walkers.generate(Some(1)).err(), Some(MapError::NoWalkers));
        let mut always_turning = generator(5, 5);
        always_turning.turn_chance = 1.0;
        assert_eq!(always_turning.generate(Some(1)).err(), Some(MapError::InvalidTurnChance(1.0)));
    }

    #[test]
    fn test_occupy_is_idempotent() {
        let mut grid = Grid::new(3);
        assert!(grid.occupy(Coord::new(1, 1)));
        assert!(!grid.occupy(Coord::new(1, 1)));
        assert!(!grid.occupy(Coord::new(5, 1)));
        assert_eq!(grid.occupied_count(), 1);
    }

    #[test]
    fn test_direction_tokens() {
        assert_eq!(Direction::from_token("n"), Some(Direction::North));
        assert_eq!(Direction::from_token("W"), Some(Direction::West));
        assert_eq!(Direction::from_token("up"), None);
        assert_eq!(Direction::North.opposite(), Direction::South);
        assert_eq!(Coord::new(2, 2).step(Direction::North), Coord::new(2, 1));
    }

    proptest! {
        #[test]
        fn prop_exact_room_count_and_connected(
            size in 1usize..12,
            fill in 0.0f64..1.0,
            seed in any::<u64>(),
        ) {
            let capacity = size * size;
            let room_limit = ((capacity as f64 * fill) as usize).clamp(1, capacity);
            let generated = generator(size, room_limit).generate(Some(seed)).unwrap();

            prop_assert_eq!(generated.grid.occupied_count(), room_limit);
            prop_assert_eq!(generated.grid.occupied_cells().count(), room_limit);
            prop_assert!(generated.grid.is_connected());
        }
    }
}
