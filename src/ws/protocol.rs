//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity assigned to a connection when its socket is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// World-space position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Spawn point used when a join omits its position
    pub const fn spawn() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Yaw-only rotation, as sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    pub y: f32,
}

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Not enough players to start
    Waiting,
    /// Round about to start
    Countdown,
    /// Round in progress
    Active,
    /// Round resolved
    Ended,
    /// Delay before the next round is considered
    Cooldown,
}

/// Why a round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundEndReason {
    AllInfected,
    Timeout,
    InsufficientPlayers,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Register as a player
    Join {
        name: String,
        #[serde(default)]
        position: Option<Vec3>,
    },

    /// Client-reported self state
    Move {
        position: Vec3,
        rotation: Rotation,
        /// Advisory only, the server keeps the authoritative flag
        #[serde(default)]
        infected: bool,
    },

    /// Explicit tag request against another player
    AttemptInfect { target_id: ConnectionId },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        connection_id: ConnectionId,
        server_time: u64,
    },

    /// Session summary
    Snapshot {
        phase: Phase,
        survivor_count: usize,
        player_count: usize,
        /// Time left on the pending timer, if any
        remaining_ms: Option<u64>,
    },

    /// Every current player, sent once on admission
    Roster { players: Vec<PlayerView> },

    /// Player joined the session
    PlayerJoined { player: JoinedPlayer },

    /// Player moved
    PlayerMoved {
        id: ConnectionId,
        position: Vec3,
        rotation: Rotation,
        infected: bool,
    },

    /// Player left the session
    PlayerLeft { id: ConnectionId },

    /// Player became infected
    PlayerInfected { id: ConnectionId },

    /// Phase transition
    PhaseChanged {
        phase: Phase,
        survivor_count: usize,
        message: Option<String>,
    },

    /// Round resolved
    RoundOver {
        reason: RoundEndReason,
        message: String,
        survivors: Vec<SurvivorInfo>,
    },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Full player state for the roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: ConnectionId,
    pub name: String,
    pub position: Vec3,
    pub rotation: Rotation,
    pub infected: bool,
}

/// Player info broadcast on join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedPlayer {
    pub id: ConnectionId,
    pub name: String,
    pub position: Vec3,
    pub infected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivorInfo {
    pub id: ConnectionId,
    pub name: String,
}
