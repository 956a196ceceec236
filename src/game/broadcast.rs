//! Session fan-out: who receives which event, and per-connection delivery

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::ws::protocol::{
    ConnectionId, JoinedPlayer, Phase, Rotation, RoundEndReason, ServerMsg, SurvivorInfo, Vec3,
};

/// Outbound queue depth per connection
pub const OUTBOUND_BUFFER: usize = 256;

/// Delivery target of an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    All,
    AllExcept(ConnectionId),
    Only(ConnectionId),
}

impl Recipients {
    pub fn includes(&self, id: ConnectionId) -> bool {
        match *self {
            Recipients::All => true,
            Recipients::AllExcept(excluded) => excluded != id,
            Recipients::Only(target) => target == id,
        }
    }
}

/// A message paired with its recipients
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub recipients: Recipients,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn to(id: ConnectionId, msg: ServerMsg) -> Self {
        Self {
            recipients: Recipients::Only(id),
            msg,
        }
    }

    pub fn all(msg: ServerMsg) -> Self {
        Self {
            recipients: Recipients::All,
            msg,
        }
    }

    pub fn all_except(id: ConnectionId, msg: ServerMsg) -> Self {
        Self {
            recipients: Recipients::AllExcept(id),
            msg,
        }
    }
}

/// State change to announce to the session
#[derive(Debug, Clone)]
pub enum Delta {
    PlayerJoined(JoinedPlayer),
    PlayerMoved {
        id: ConnectionId,
        position: Vec3,
        rotation: f32,
        infected: bool,
    },
    PlayerLeft(ConnectionId),
    PlayerInfected(ConnectionId),
    PhaseChanged {
        phase: Phase,
        survivor_count: usize,
        message: Option<String>,
    },
    RoundOver {
        reason: RoundEndReason,
        message: String,
        survivors: Vec<SurvivorInfo>,
    },
}

/// Decide recipients for a delta.
///
/// The joiner already has a full roster and the mover knows where it is, so
/// those two are excluded from their own events. Everything else goes to all.
pub fn broadcast_delta(delta: Delta) -> Outbound {
    match delta {
        Delta::PlayerJoined(player) => {
            let id = player.id;
            Outbound::all_except(id, ServerMsg::PlayerJoined { player })
        }
        Delta::PlayerMoved {
            id,
            position,
            rotation,
            infected,
        } => Outbound::all_except(
            id,
            ServerMsg::PlayerMoved {
                id,
                position,
                rotation: Rotation { y: rotation },
                infected,
            },
        ),
        Delta::PlayerLeft(id) => Outbound::all(ServerMsg::PlayerLeft { id }),
        Delta::PlayerInfected(id) => Outbound::all(ServerMsg::PlayerInfected { id }),
        Delta::PhaseChanged {
            phase,
            survivor_count,
            message,
        } => Outbound::all(ServerMsg::PhaseChanged {
            phase,
            survivor_count,
            message,
        }),
        Delta::RoundOver {
            reason,
            message,
            survivors,
        } => Outbound::all(ServerMsg::RoundOver {
            reason,
            message,
            survivors,
        }),
    }
}

/// Per-connection outbound channels, in connection order
#[derive(Debug, Default)]
pub struct Broadcaster {
    connections: Vec<(ConnectionId, mpsc::Sender<ServerMsg>)>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ConnectionId, tx: mpsc::Sender<ServerMsg>) {
        self.unregister(id);
        self.connections.push((id, tx));
    }

    pub fn unregister(&mut self, id: ConnectionId) {
        self.connections.retain(|(existing, _)| *existing != id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Queue a message on every matching connection. Never blocks: a full or
    /// closed queue drops the message for that connection only.
    pub fn deliver(&self, outbound: &Outbound) {
        for (id, tx) in &self.connections {
            if !outbound.recipients.includes(*id) {
                continue;
            }
            match tx.try_send(outbound.msg.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(connection_id = %id, "Outbound queue full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection_id = %id, "Outbound queue closed");
                }
            }
        }
    }

    pub fn deliver_all<'a>(&self, outbound: impl IntoIterator<Item = &'a Outbound>) {
        for out in outbound {
            self.deliver(out);
        }
    }
}
