use std::collections::HashMap;
use std::time::Instant;

use rand::Rng;

use crate::item::ItemIdAllocator;
use crate::map::{Coord, Direction, RoomBlueprint};
use crate::room::{Room, RoomId, RoomKind};

/// Coordinate -> room mapping with directional traversal.
#[derive(Debug, Clone)]
pub struct WorldGraph {
    rooms: HashMap<Coord, Room>,
    spawn: Coord,
}

impl WorldGraph {
    /// Build rooms from blueprints and give each its first stock of items.
    pub fn from_blueprints<R: Rng + ?Sized>(
        blueprints: Vec<RoomBlueprint>,
        spawn: Coord,
        ids: &mut ItemIdAllocator,
        rng: &mut R,
        now: Instant,
    ) -> Self {
        let rooms = blueprints
            .into_iter()
            .map(|bp| {
                let mut room = Room::new(bp.id, bp.coord, bp.kind, &bp.name, &bp.description, now);
                room.refresh(ids, rng, now);
                (bp.coord, room)
            })
            .collect();
        Self { rooms, spawn }
    }

    /// Rebuild from stored rooms. The spawn room is `spawn` if it exists,
    /// otherwise the room with the lowest id.
    pub fn from_rooms(rooms: Vec<Room>, spawn: Coord) -> Self {
        let rooms: HashMap<Coord, Room> = rooms.into_iter().map(|r| (r.coord, r)).collect();
        let spawn = if rooms.contains_key(&spawn) {
            spawn
        } else {
            rooms
                .values()
                .min_by_key(|r| r.id)
                .map(|r| r.coord)
                .unwrap_or(spawn)
        };
        Self { rooms, spawn }
    }

    pub fn spawn(&self) -> Coord {
        self.spawn
    }

    pub fn contains(&self, coord: Coord) -> bool {
        self.rooms.contains_key(&coord)
    }

    pub fn get(&self, coord: Coord) -> Option<&Room> {
        self.rooms.get(&coord)
    }

    pub fn get_mut(&mut self, coord: Coord) -> Option<&mut Room> {
        self.rooms.get_mut(&coord)
    }

    /// The adjacent coordinate in `direction`, if a room exists there.
    pub fn neighbor(&self, coord: Coord, direction: Direction) -> Option<Coord> {
        let next = coord.step(direction);
        self.rooms.contains_key(&next).then_some(next)
    }

    pub fn exits(&self, coord: Coord) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|d| self.neighbor(coord, *d).is_some())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn rooms_mut(&mut self) -> impl Iterator<Item = &mut Room> {
        self.rooms.values_mut()
    }

    pub fn room_by_id(&self, id: RoomId) -> Option<&Room> {
        self.rooms.values().find(|r| r.id == id)
    }

    /// All room coordinates, sorted for stable output.
    pub fn coords(&self) -> Vec<Coord> {
        let mut coords: Vec<Coord> = self.rooms.keys().copied().collect();
        coords.sort();
        coords
    }

    pub fn store_coords(&self) -> Vec<Coord> {
        let mut coords: Vec<Coord> = self
            .rooms
            .values()
            .filter(|r| r.kind == RoomKind::Store)
            .map(|r| r.coord)
            .collect();
        coords.sort();
        coords
    }
}
