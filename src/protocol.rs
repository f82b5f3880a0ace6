use serde::{Deserialize, Serialize};

use crate::combat::{CombatId, CombatView};
use crate::error::{ErrorKind, GameError};
use crate::item::ItemId;
use crate::leaderboard::LeaderboardEntry;
use crate::map::Coord;
use crate::player::{PlayerId, PlayerView};
use crate::room::RoomView;
use crate::world::{MapInfo, PositionUpdate};

// ============================================================================
// Client -> Server Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Discrete step to a neighbouring room: "n", "s", "e" or "w"
    #[serde(rename = "move")]
    Move { direction: String },

    /// Continuous movement input, applied on the next tick
    #[serde(rename = "velocity")]
    Velocity { vx: f32, vy: f32 },

    #[serde(rename = "take")]
    Take { item_id: ItemId },

    #[serde(rename = "drop")]
    Drop { item_id: ItemId },

    #[serde(rename = "barter")]
    Barter { item_ids: Vec<ItemId>, store_item_id: ItemId },

    /// Challenge another player in the same room
    #[serde(rename = "fight")]
    Fight { opponent: String },

    #[serde(rename = "stake")]
    Stake { combat_id: CombatId, item_ids: Vec<ItemId> },

    #[serde(rename = "inventory")]
    Inventory,

    #[serde(rename = "look")]
    Look,

    #[serde(rename = "mapInfo")]
    MapInfo,

    #[serde(rename = "leaderboard")]
    Leaderboard,

    /// Full state resend, e.g. after a client reload
    #[serde(rename = "init")]
    Init,

    #[serde(rename = "adminSave")]
    AdminSave,

    #[serde(rename = "adminReset")]
    AdminReset {
        #[serde(default)]
        seed: Option<u64>,
    },
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Welcome {
        player: PlayerView,
        room: RoomView,
        players: Vec<String>,
        map: MapInfo,
    },
    RoomInfo {
        room: RoomView,
        players: Vec<String>,
    },
    PlayerState {
        player: PlayerView,
    },
    PlayerJoined {
        player_id: PlayerId,
        username: String,
        x: i32,
        y: i32,
    },
    PlayerLeft {
        player_id: PlayerId,
        username: String,
        x: i32,
        y: i32,
    },
    /// Batched sub-cell positions for every player that moved in one cell
    Positions {
        x: i32,
        y: i32,
        players: Vec<PositionUpdate>,
    },
    RoomUpdate {
        room: RoomView,
    },
    MapInfo {
        map: MapInfo,
    },
    Leaderboard {
        entries: Vec<LeaderboardEntry>,
    },
    CombatStarted {
        combat: CombatView,
        first: String,
        second: String,
    },
    StakeAccepted {
        combat_id: CombatId,
    },
    CombatResolved {
        combat_id: CombatId,
        first: String,
        second: String,
        first_score: i32,
        second_score: i32,
        /// `None` on a tie
        winner: Option<String>,
        returned: usize,
    },
    MapReset {
        seed: u64,
        spawn: Coord,
    },
    Saved,
    Error {
        kind: ErrorKind,
        error: String,
    },
}

impl ServerMessage {
    pub fn msg_type(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::RoomInfo { .. } => "roomInfo",
            ServerMessage::PlayerState { .. } => "playerState",
            ServerMessage::PlayerJoined { .. } => "playerJoined",
            ServerMessage::PlayerLeft { .. } => "playerLeft",
            ServerMessage::Positions { .. } => "positions",
            ServerMessage::RoomUpdate { .. } => "roomUpdate",
            ServerMessage::MapInfo { .. } => "mapInfo",
            ServerMessage::Leaderboard { .. } => "leaderboard",
            ServerMessage::CombatStarted { .. } => "combatStarted",
            ServerMessage::StakeAccepted { .. } => "stakeAccepted",
            ServerMessage::CombatResolved { .. } => "combatResolved",
            ServerMessage::MapReset { .. } => "mapReset",
            ServerMessage::Saved => "saved",
            ServerMessage::Error { .. } => "error",
        }
    }
}

impl From<&GameError> for ServerMessage {
    fn from(err: &GameError) -> Self {
        ServerMessage::Error {
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Encode a server message as a MessagePack map (field names kept).
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, String> {
    rmp_serde::to_vec_named(msg).map_err(|e| format!("Failed to encode {}: {}", msg.msg_type(), e))
}

pub fn encode_server_json(msg: &ServerMessage) -> Result<String, String> {
    serde_json::to_string(msg).map_err(|e| format!("Failed to encode {}: {}", msg.msg_type(), e))
}

/// Decode a binary (MessagePack) client frame.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, GameError> {
    rmp_serde::from_slice(data).map_err(|e| GameError::Validation(format!("Malformed message: {}", e)))
}

/// Decode a text (JSON) client frame.
pub fn decode_client_json(text: &str) -> Result<ClientMessage, GameError> {
    serde_json::from_str(text).map_err(|e| GameError::Validation(format!("Malformed message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_json_commands() {
        assert_eq!(
            decode_client_json(r#"{"type":"move","direction":"n"}"#).unwrap(),
            ClientMessage::Move { direction: "n".into() }
        );
        assert_eq!(
            decode_client_json(r#"{"type":"barter","item_ids":[1,2],"store_item_id":9}"#).unwrap(),
            ClientMessage::Barter { item_ids: vec![1, 2], store_item_id: 9 }
        );
        assert_eq!(decode_client_json(r#"{"type":"inventory"}"#).unwrap(), ClientMessage::Inventory);
        assert_eq!(
            decode_client_json(r#"{"type":"adminReset"}"#).unwrap(),
            ClientMessage::AdminReset { seed: None }
        );
    }

    #[test]
    fn test_decode_msgpack_command() {
        let frame = rmp_serde::to_vec_named(&json!({"type": "stake", "combat_id": 3, "item_ids": [7, 8]})).unwrap();
        assert_eq!(
            decode_client_message(&frame).unwrap(),
            ClientMessage::Stake { combat_id: 3, item_ids: vec![7, 8] }
        );

        let frame = rmp_serde::to_vec_named(&json!({"type": "velocity", "vx": 0.5, "vy": -0.25})).unwrap();
        assert_eq!(
            decode_client_message(&frame).unwrap(),
            ClientMessage::Velocity { vx: 0.5, vy: -0.25 }
        );
    }

    #[test]
    fn test_malformed_input_is_a_validation_error() {
        for bad in [
            r#"{"type":"take","item_id":"seven"}"#,
            r#"{"type":"take"}"#,
            r#"{"type":"teleport"}"#,
            "not json",
        ] {
            let err = decode_client_json(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{}", bad);
        }
        assert!(decode_client_message(&[0xc1]).is_err());
    }

    #[test]
    fn test_server_messages_are_tagged() {
        let msg = ServerMessage::CombatResolved {
            combat_id: 1,
            first: "ant".into(),
            second: "bee".into(),
            first_score: 300,
            second_score: 150,
            winner: Some("ant".into()),
            returned: 2,
        };
        let value: serde_json::Value = serde_json::from_str(&encode_server_json(&msg).unwrap()).unwrap();
        assert_eq!(value["type"], "combatResolved");
        assert_eq!(value["first_score"], 300);
        assert_eq!(value["winner"], "ant");

        let err = ServerMessage::from(&GameError::BusyInCombat);
        let value: serde_json::Value = serde_json::from_str(&encode_server_json(&err).unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["kind"], "conflict");

        let bytes = encode_server_message(&ServerMessage::Saved).unwrap();
        let decoded: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded["type"], "saved");
    }
}
