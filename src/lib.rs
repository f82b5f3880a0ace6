//! Simulation core of a multiplayer dungeon crawl: procedural maps, rooms and
//! stores, player inventories, wager combat and the highscore board, plus the
//! storage and protocol boundaries the server binary wires together.

pub mod auth;
pub mod combat;
pub mod config;
pub mod db;
pub mod error;
pub mod game;
pub mod graph;
pub mod item;
pub mod leaderboard;
pub mod map;
pub mod persist;
pub mod player;
pub mod protocol;
pub mod room;
pub mod world;
