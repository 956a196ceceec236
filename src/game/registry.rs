//! Player registry - one record per joined connection

use tracing::debug;

use crate::ws::protocol::{ConnectionId, JoinedPlayer, PlayerView, Rotation, SurvivorInfo, Vec3};

use super::SessionError;

/// Authoritative player record
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub id: ConnectionId,
    pub name: String,
    pub position: Vec3,
    /// Yaw in radians
    pub rotation: f32,
    pub infected: bool,
}

impl PlayerRecord {
    pub fn new(id: ConnectionId, name: String, position: Vec3) -> Self {
        Self {
            id,
            name,
            position,
            rotation: 0.0,
            infected: false,
        }
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id,
            name: self.name.clone(),
            position: self.position,
            rotation: Rotation { y: self.rotation },
            infected: self.infected,
        }
    }

    pub fn joined(&self) -> JoinedPlayer {
        JoinedPlayer {
            id: self.id,
            name: self.name.clone(),
            position: self.position,
            infected: self.infected,
        }
    }

    pub fn survivor_info(&self) -> SurvivorInfo {
        SurvivorInfo {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Insertion-ordered set of player records.
///
/// Rosters are a handful of players, so lookups scan the vector; this keeps
/// snapshot order deterministic without a secondary index.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: Vec<PlayerRecord>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new player. Fails if the connection already has a record.
    pub fn admit(
        &mut self,
        id: ConnectionId,
        name: String,
        position: Vec3,
    ) -> Result<PlayerRecord, SessionError> {
        if self.contains(id) {
            return Err(SessionError::DuplicateIdentity(id));
        }

        let record = PlayerRecord::new(id, name, position);
        self.players.push(record.clone());
        debug!(connection_id = %id, player_count = self.players.len(), "Player admitted");
        Ok(record)
    }

    /// Remove a player; returns `None` if it was never admitted or already gone
    pub fn remove(&mut self, id: ConnectionId) -> Option<PlayerRecord> {
        let idx = self.players.iter().position(|p| p.id == id)?;
        Some(self.players.remove(idx))
    }

    pub fn get(&self, id: ConnectionId) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut PlayerRecord> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_some()
    }

    /// All players in insertion order
    pub fn all(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.iter()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.players.iter().map(|p| p.id).collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn survivors(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.iter().filter(|p| !p.infected)
    }

    pub fn survivor_count(&self) -> usize {
        self.survivors().count()
    }

    pub fn infected_count(&self) -> usize {
        self.players.len() - self.survivor_count()
    }

    /// Flag a player as infected. Returns false if unknown or already infected.
    pub fn mark_infected(&mut self, id: ConnectionId) -> bool {
        match self.get_mut(id) {
            Some(player) if !player.infected => {
                player.infected = true;
                true
            }
            _ => false,
        }
    }

    pub fn reset_infections(&mut self) {
        for player in &mut self.players {
            player.infected = false;
        }
    }
}
