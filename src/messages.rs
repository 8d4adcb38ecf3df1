//! Application messages exchanged by the demo server and client.
//!
//! Field names follow the JSON keys the existing peers use, so payloads are
//! wire-compatible with them.
//!
//! | Tag | Client → server | Server → client |
//! |-----|-----------------|-----------------|
//! | 0 | [`Echo`] | [`Echo`] |
//! | 1 | [`OnlineRequest`] | [`OnlineReply`] |
//! | 2 | [`OfflineRequest`] | [`OfflineNotice`] |
//! | 3 | [`LoginRequest`] | [`LoginReply`] |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::{Message, Tag};

/// Echo request and reply.
pub const ECHO: Tag = 0;
/// Client announces itself.
pub const ONLINE: Tag = 1;
/// Client leaves, or server kicks a client.
pub const OFFLINE: Tag = 2;
/// Login request and reply.
pub const LOGIN: Tag = 3;

/// Lifecycle state reported by the server. Encoded as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ServerState {
    /// Going away; no new work is accepted.
    Shutdown = 1,
    /// Serving normally.
    Running = 2,
    /// Up, but still warming up.
    Maintaining = 3,
}

impl From<ServerState> for i32 {
    fn from(state: ServerState) -> Self {
        state as i32
    }
}

impl TryFrom<i32> for ServerState {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ServerState::Shutdown),
            2 => Ok(ServerState::Running),
            3 => Ok(ServerState::Maintaining),
            other => Err(format!("unknown server state {}", other)),
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Shutdown => "shutdown",
            ServerState::Running => "running",
            ServerState::Maintaining => "maintaining",
        };
        f.write_str(name)
    }
}

/// Echo payload, identical in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    /// Value sent back unchanged.
    #[serde(rename = "Value")]
    pub value: i64,
}

impl Message for Echo {
    fn tag(&self) -> Tag {
        ECHO
    }
}

/// Client announces it is online. Empty body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineRequest {}

impl Message for OnlineRequest {
    fn tag(&self) -> Tag {
        ONLINE
    }
}

/// Server answer to [`OnlineRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineReply {
    /// Current server state.
    #[serde(rename = "State")]
    pub state: ServerState,
    /// Error text, empty on success.
    #[serde(rename = "Error", default)]
    pub error: String,
}

impl Message for OnlineReply {
    fn tag(&self) -> Tag {
        ONLINE
    }
}

/// Client is leaving. Empty body; the server closes the connection on receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineRequest {}

impl Message for OfflineRequest {
    fn tag(&self) -> Tag {
        OFFLINE
    }
}

/// Sent by the server before it drops a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineNotice {
    /// State the server is moving to.
    #[serde(rename = "ServerState")]
    pub server_state: ServerState,
    /// Reason, empty if none.
    #[serde(rename = "Error", default)]
    pub error: String,
}

impl Message for OfflineNotice {
    fn tag(&self) -> Tag {
        OFFLINE
    }
}

/// Credentials sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Account name.
    #[serde(rename = "Username")]
    pub username: String,
    /// Plain-text password.
    #[serde(rename = "Password")]
    pub password: String,
}

impl Message for LoginRequest {
    fn tag(&self) -> Tag {
        LOGIN
    }
}

/// A player's character sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerData {
    /// Attack.
    #[serde(rename = "ATK")]
    pub atk: i64,
    /// Defense.
    #[serde(rename = "DEF")]
    pub def: i64,
    /// Hit points.
    #[serde(rename = "HP")]
    pub hp: i64,
    /// Character level.
    #[serde(rename = "Level")]
    pub level: i64,
    /// Mana points.
    #[serde(rename = "MP")]
    pub mp: i64,
    /// Gold held.
    #[serde(rename = "Money")]
    pub money: i64,
    /// Character name.
    #[serde(rename = "RoleName")]
    pub role_name: String,
}

impl Default for PlayerData {
    /// Stats handed to every new login.
    fn default() -> Self {
        Self {
            atk: 10,
            def: 10,
            hp: 10,
            level: 1,
            mp: 10,
            money: 0,
            role_name: "TEST".to_string(),
        }
    }
}

/// Server answer to [`LoginRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginReply {
    /// The logged-in player's character.
    #[serde(rename = "Player")]
    pub player: PlayerData,
    /// Set when the account has no character yet.
    #[serde(rename = "NeedCreateRole")]
    pub need_create_role: bool,
}

impl Message for LoginReply {
    fn tag(&self) -> Tag {
        LOGIN
    }
}
