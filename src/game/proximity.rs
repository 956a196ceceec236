//! Movement tracking and infection range checks

use tracing::debug;

use crate::ws::protocol::{ConnectionId, Vec3};

use super::registry::{PlayerRecord, PlayerRegistry};

/// Default tag distance in world units
pub const INFECTION_RANGE: f32 = 2.5;

/// Applies client movement and answers proximity questions.
///
/// The explicit infect request and the server-side sweep both go through
/// [`ProximityTracker::check_infection_attempt`], so they share one threshold.
#[derive(Debug, Clone, Copy)]
pub struct ProximityTracker {
    infection_range: f32,
}

impl ProximityTracker {
    pub fn new(infection_range: f32) -> Self {
        Self { infection_range }
    }

    /// Distance on the ground plane; the vertical axis is ignored
    pub fn distance_between(a: Vec3, b: Vec3) -> f32 {
        let dx = b.x - a.x;
        let dz = b.z - a.z;
        (dx * dx + dz * dz).sqrt()
    }

    /// Store the latest reported position and yaw.
    ///
    /// Returns the updated record, or `None` when the connection has no record
    /// (movement racing a disconnect). The reported infected flag is advisory
    /// and never overrides the server's.
    pub fn apply_movement<'a>(
        &self,
        registry: &'a mut PlayerRegistry,
        id: ConnectionId,
        position: Vec3,
        rotation: f32,
        reported_infected: bool,
    ) -> Option<&'a PlayerRecord> {
        let Some(player) = registry.get_mut(id) else {
            debug!(connection_id = %id, "Movement for unknown connection ignored");
            return None;
        };

        player.position = position;
        player.rotation = rotation;
        if player.infected != reported_infected {
            debug!(
                connection_id = %id,
                reported = reported_infected,
                authoritative = player.infected,
                "Client infection flag disagrees with server"
            );
        }
        Some(player)
    }

    /// Whether `source` may tag `target` right now
    pub fn check_infection_attempt(
        &self,
        registry: &PlayerRegistry,
        source: ConnectionId,
        target: ConnectionId,
    ) -> bool {
        if source == target {
            return false;
        }
        match (registry.get(source), registry.get(target)) {
            (Some(source), Some(target)) => self.can_infect(source, target),
            _ => false,
        }
    }

    fn can_infect(&self, source: &PlayerRecord, target: &PlayerRecord) -> bool {
        source.infected
            && !target.infected
            && Self::distance_between(source.position, target.position) < self.infection_range
    }

    /// Infections implied by `mover`'s current position.
    ///
    /// An infected mover tags every survivor in range. A surviving mover is
    /// tagged by the first infected player in range. Pairs are `(source, target)`.
    pub fn sweep(
        &self,
        registry: &PlayerRegistry,
        mover: ConnectionId,
    ) -> Vec<(ConnectionId, ConnectionId)> {
        let Some(player) = registry.get(mover) else {
            return Vec::new();
        };

        if player.infected {
            registry
                .all()
                .filter(|other| self.check_infection_attempt(registry, mover, other.id))
                .map(|other| (mover, other.id))
                .collect()
        } else {
            registry
                .all()
                .find(|other| self.check_infection_attempt(registry, other.id, mover))
                .map(|other| vec![(other.id, mover)])
                .unwrap_or_default()
        }
    }
}

impl Default for ProximityTracker {
    fn default() -> Self {
        Self::new(INFECTION_RANGE)
    }
}
