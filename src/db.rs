use std::collections::HashMap;

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use thiserror::Error;

use crate::item::{Item, ItemId, ItemKind};
use crate::leaderboard::LeaderboardEntry;
use crate::map::Coord;
use crate::player::PlayerId;
use crate::room::{RoomId, RoomKind};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("username already exists")]
    UsernameTaken,

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct WorldRecord {
    pub password_salt: String,
    pub map_seed: u64,
    pub rooms: Vec<RoomRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    pub kind: RoomKind,
    pub coord: Coord,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub coord: Coord,
    pub highscore: i32,
    pub items: Vec<Item>,
}

/// The mutable part of a player row, written on autosave and disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub is_admin: bool,
    pub coord: Coord,
    pub highscore: i32,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOwner {
    Player(PlayerId),
    Room(RoomId),
}

impl ItemOwner {
    fn columns(&self) -> (Option<i64>, Option<i64>) {
        match self {
            ItemOwner::Player(id) => (Some(*id), None),
            ItemOwner::Room(id) => (None, Some(i64::from(*id))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemPlacement {
    pub item: Item,
    pub owner: ItemOwner,
}

fn item_from_row(row: &SqliteRow) -> Result<Item, PersistError> {
    let id: i64 = row.try_get("id")?;
    let name: String = row.try_get("name")?;
    let kind = ItemKind::from_name(&name).ok_or_else(|| PersistError::Corrupt(format!("item {} has unknown kind '{}'", id, name)))?;
    Ok(Item::new(id as ItemId, kind, row.try_get("weight")?, row.try_get("score")?))
}

const UPSERT_ITEM: &str = r#"
    INSERT INTO items (id, name, weight, score, player_id, room_id)
    VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        weight = excluded.weight,
        score = excluded.score,
        player_id = excluded.player_id,
        room_id = excluded.room_id
"#;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, PersistError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS worlds (
                id INTEGER PRIMARY KEY,
                password_salt TEXT NOT NULL,
                map_seed INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                kind TEXT NOT NULL,
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                UNIQUE(x, y)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS players (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                highscore INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        // Owners are plain columns rather than foreign keys: a room row is
        // replaced wholesale on regeneration while its items may already have
        // been handed to players.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                weight INTEGER NOT NULL,
                score INTEGER NOT NULL,
                player_id INTEGER,
                room_id INTEGER
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_player ON items(player_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_room ON items(room_id)")
            .execute(pool)
            .await?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // World
    // ------------------------------------------------------------------------

    /// The stored world, or `None` if the database has never held one.
    pub async fn load_world(&self) -> Result<Option<WorldRecord>, PersistError> {
        let Some(world) = sqlx::query("SELECT password_salt, map_seed FROM worlds WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let mut items_by_room: HashMap<i64, Vec<Item>> = HashMap::new();
        let item_rows = sqlx::query("SELECT id, name, weight, score, room_id FROM items WHERE room_id IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        for row in &item_rows {
            let room_id: i64 = row.try_get("room_id")?;
            items_by_room.entry(room_id).or_default().push(item_from_row(row)?);
        }

        let room_rows = sqlx::query("SELECT id, name, description, kind, x, y FROM rooms ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut rooms = Vec::with_capacity(room_rows.len());
        for row in &room_rows {
            let id: i64 = row.try_get("id")?;
            let kind_name: String = row.try_get("kind")?;
            let kind = RoomKind::parse(&kind_name)
                .ok_or_else(|| PersistError::Corrupt(format!("room {} has unknown kind '{}'", id, kind_name)))?;
            rooms.push(RoomRecord {
                id: id as RoomId,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                kind,
                coord: Coord::new(row.try_get("x")?, row.try_get("y")?),
                items: items_by_room.remove(&id).unwrap_or_default(),
            });
        }

        let map_seed: i64 = world.try_get("map_seed")?;
        Ok(Some(WorldRecord {
            password_salt: world.try_get("password_salt")?,
            map_seed: map_seed as u64,
            rooms,
        }))
    }

    /// Replace the stored map: world row, every room and every room-owned item.
    /// Player-owned items are left alone.
    pub async fn save_world(&self, world: &WorldRecord) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO worlds (id, password_salt, map_seed) VALUES (1, ?, ?)
               ON CONFLICT(id) DO UPDATE SET password_salt = excluded.password_salt, map_seed = excluded.map_seed"#,
        )
        .bind(&world.password_salt)
        .bind(world.map_seed as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM items WHERE room_id IS NOT NULL")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM rooms").execute(&mut *tx).await?;

        for room in &world.rooms {
            sqlx::query("INSERT INTO rooms (id, name, description, kind, x, y) VALUES (?, ?, ?, ?, ?, ?)")
                .bind(i64::from(room.id))
                .bind(&room.name)
                .bind(&room.description)
                .bind(room.kind.as_str())
                .bind(room.coord.x)
                .bind(room.coord.y)
                .execute(&mut *tx)
                .await?;

            for item in &room.items {
                sqlx::query(UPSERT_ITEM)
                    .bind(item.id as i64)
                    .bind(item.name())
                    .bind(item.weight)
                    .bind(item.score)
                    .bind(None::<i64>)
                    .bind(Some(i64::from(room.id)))
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        tracing::info!("Saved world: {} rooms (seed {})", world.rooms.len(), world.map_seed);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------------

    pub async fn create_player(
        &self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
        coord: Coord,
    ) -> Result<PlayerId, PersistError> {
        let result = sqlx::query("INSERT INTO players (username, password_hash, is_admin, x, y) VALUES (?, ?, ?, ?, ?)")
            .bind(username)
            .bind(password_hash)
            .bind(is_admin)
            .bind(coord.x)
            .bind(coord.y)
            .execute(&self.pool)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db) if db.is_unique_violation() => PersistError::UsernameTaken,
                _ => PersistError::Sqlx(e),
            })?;

        tracing::info!("Created player: {} (id: {})", username, result.last_insert_rowid());
        Ok(result.last_insert_rowid())
    }

    pub async fn load_player(&self, username: &str) -> Result<Option<PlayerRecord>, PersistError> {
        let Some(row) = sqlx::query("SELECT id, username, password_hash, is_admin, x, y, highscore FROM players WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let item_rows = sqlx::query("SELECT id, name, weight, score FROM items WHERE player_id = ? ORDER BY id")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        let items = item_rows.iter().map(item_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(PlayerRecord {
            id,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            is_admin: row.try_get("is_admin")?,
            coord: Coord::new(row.try_get("x")?, row.try_get("y")?),
            highscore: row.try_get("highscore")?,
            items,
        }))
    }

    /// Update the player row and claim every held item for them.
    pub async fn save_player(&self, player: &PlayerSnapshot) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE players SET is_admin = ?, x = ?, y = ?, highscore = MAX(highscore, ?) WHERE id = ?")
            .bind(player.is_admin)
            .bind(player.coord.x)
            .bind(player.coord.y)
            .bind(player.highscore)
            .bind(player.id)
            .execute(&mut *tx)
            .await?;

        for item in &player.items {
            sqlx::query(UPSERT_ITEM)
                .bind(item.id as i64)
                .bind(item.name())
                .bind(item.weight)
                .bind(item.score)
                .bind(Some(player.id))
                .bind(None::<i64>)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------------

    /// Write the full item row with its new owner. Safe to repeat.
    pub async fn reassign_item_owner(&self, item: &Item, owner: ItemOwner) -> Result<(), PersistError> {
        self.reassign_items(&[ItemPlacement { item: item.clone(), owner }]).await
    }

    pub async fn reassign_items(&self, placements: &[ItemPlacement]) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;
        for placement in placements {
            let (player_id, room_id) = placement.owner.columns();
            sqlx::query(UPSERT_ITEM)
                .bind(placement.item.id as i64)
                .bind(placement.item.name())
                .bind(placement.item.weight)
                .bind(placement.item.score)
                .bind(player_id)
                .bind(room_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_items(&self, ids: &[ItemId]) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM items WHERE id = ?")
                .bind(*id as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Highest item id ever stored, so in-memory allocation continues past it.
    pub async fn max_item_id(&self) -> Result<ItemId, PersistError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0).max(0) as ItemId)
    }

    pub async fn top_highscores(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, PersistError> {
        let rows = sqlx::query("SELECT id, username, highscore FROM players ORDER BY highscore DESC, id ASC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<LeaderboardEntry, PersistError> {
                Ok(LeaderboardEntry {
                    player_id: row.try_get("id")?,
                    username: row.try_get("username")?,
                    highscore: row.try_get("highscore")?,
                })
            })
            .collect()
    }
}
