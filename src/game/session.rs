//! Session state machine: waiting, countdown, active round, end and cooldown
//!
//! [`Session::handle`] is a pure transition: it takes one event and the current
//! instant, mutates the session and returns the messages to fan out. Timers are
//! a single [`PendingTimer`] slot that every transition replaces or clears; the
//! coordinator sleeps on whatever is in the slot.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::ws::protocol::{ConnectionId, Phase, RoundEndReason, ServerMsg, SurvivorInfo, Vec3};

use super::broadcast::{broadcast_delta, Delta, Outbound};
use super::proximity::ProximityTracker;
use super::registry::PlayerRegistry;
use super::SessionError;

/// Longest accepted display name, in characters
pub const MAX_NAME_LEN: usize = 32;

/// Which phase a pending timer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Countdown,
    Round,
    Cooldown,
}

impl TimerKind {
    fn phase(self) -> Phase {
        match self {
            TimerKind::Countdown => Phase::Countdown,
            TimerKind::Round => Phase::Active,
            TimerKind::Cooldown => Phase::Cooldown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    pub kind: TimerKind,
    pub deadline: Instant,
}

/// Inbound event, already attributed to a connection
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected(ConnectionId),
    Join {
        id: ConnectionId,
        name: String,
        position: Vec3,
    },
    Move {
        id: ConnectionId,
        position: Vec3,
        rotation: f32,
        infected: bool,
    },
    AttemptInfect {
        source: ConnectionId,
        target: ConnectionId,
    },
    Disconnected(ConnectionId),
    TimerExpired(TimerKind),
}

/// Outcome of the last resolved round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundResult {
    pub round: u64,
    pub reason: RoundEndReason,
    pub message: String,
    pub survivors: Vec<SurvivorInfo>,
}

/// Point-in-time summary for health checks
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub phase: Phase,
    pub player_count: usize,
    pub survivor_count: usize,
    pub round: u64,
    pub last_round: Option<RoundResult>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Waiting,
            player_count: 0,
            survivor_count: 0,
            round: 0,
            last_round: None,
        }
    }
}

/// The authoritative session
pub struct Session {
    config: GameConfig,
    registry: PlayerRegistry,
    tracker: ProximityTracker,
    phase: Phase,
    timer: Option<PendingTimer>,
    rng: ChaCha8Rng,
    round: u64,
    last_result: Option<RoundResult>,
}

impl Session {
    pub fn new(config: GameConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        Self {
            tracker: ProximityTracker::new(config.infection_range),
            config,
            registry: PlayerRegistry::new(),
            phase: Phase::Waiting,
            timer: None,
            rng,
            round: 0,
            last_result: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn pending_timer(&self) -> Option<PendingTimer> {
        self.timer
    }

    pub fn survivor_count(&self) -> usize {
        self.registry.survivor_count()
    }

    pub fn last_result(&self) -> Option<&RoundResult> {
        self.last_result.as_ref()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            player_count: self.registry.len(),
            survivor_count: self.registry.survivor_count(),
            round: self.round,
            last_round: self.last_result().cloned(),
        }
    }

    /// Apply one event and return the messages it produces
    pub fn handle(&mut self, event: SessionEvent, now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();

        match event {
            SessionEvent::Connected(id) => {
                out.push(Outbound::to(id, self.snapshot_msg(now)));
            }
            SessionEvent::Join { id, name, position } => {
                if let Err(e) = self.handle_join(id, name, position, now, &mut out) {
                    warn!(connection_id = %id, error = %e, "Join rejected");
                    out.push(Outbound::to(id, e.to_server_msg()));
                }
            }
            SessionEvent::Move {
                id,
                position,
                rotation,
                infected,
            } => self.handle_move(id, position, rotation, infected, now, &mut out),
            SessionEvent::AttemptInfect { source, target } => {
                self.handle_attempt_infect(source, target, now, &mut out)
            }
            SessionEvent::Disconnected(id) => self.handle_disconnect(id, now, &mut out),
            SessionEvent::TimerExpired(kind) => self.handle_timer(kind, now, &mut out),
        }

        out
    }

    /// Full roster and session summary for a newly admitted player
    pub fn push_snapshot_to(&self, id: ConnectionId, now: Instant) -> Vec<Outbound> {
        vec![
            Outbound::to(id, self.snapshot_msg(now)),
            Outbound::to(
                id,
                ServerMsg::Roster {
                    players: self.registry.all().map(|p| p.view()).collect(),
                },
            ),
        ]
    }

    fn snapshot_msg(&self, now: Instant) -> ServerMsg {
        ServerMsg::Snapshot {
            phase: self.phase,
            survivor_count: self.registry.survivor_count(),
            player_count: self.registry.len(),
            remaining_ms: self
                .timer
                .map(|t| t.deadline.saturating_duration_since(now).as_millis() as u64),
        }
    }

    fn handle_join(
        &mut self,
        id: ConnectionId,
        name: String,
        position: Vec3,
        now: Instant,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(SessionError::InvalidPayload(format!(
                "display name must be 1-{} characters",
                MAX_NAME_LEN
            )));
        }
        if !position.is_finite() {
            return Err(SessionError::InvalidPayload(
                "position must be finite".to_string(),
            ));
        }

        let record = self.registry.admit(id, name.to_string(), position)?;

        info!(
            connection_id = %id,
            name = %record.name,
            player_count = self.registry.len(),
            "Player joined session"
        );

        out.extend(self.push_snapshot_to(id, now));
        out.push(broadcast_delta(Delta::PlayerJoined(record.joined())));
        out.push(Outbound::all_except(id, self.snapshot_msg(now)));

        self.maybe_arm_countdown(now, out);
        Ok(())
    }

    fn handle_move(
        &mut self,
        id: ConnectionId,
        position: Vec3,
        rotation: f32,
        reported_infected: bool,
        now: Instant,
        out: &mut Vec<Outbound>,
    ) {
        if !position.is_finite() || !rotation.is_finite() {
            warn!(connection_id = %id, "Non-finite movement ignored");
            return;
        }

        let Some(player) =
            self.tracker
                .apply_movement(&mut self.registry, id, position, rotation, reported_infected)
        else {
            return;
        };

        out.push(broadcast_delta(Delta::PlayerMoved {
            id,
            position: player.position,
            rotation: player.rotation,
            infected: player.infected,
        }));

        if self.phase == Phase::Active && self.config.proximity_sweep {
            for (source, target) in self.tracker.sweep(&self.registry, id) {
                if self.phase != Phase::Active {
                    break;
                }
                self.try_infect(source, target, now, out);
            }
        }
    }

    fn handle_attempt_infect(
        &mut self,
        source: ConnectionId,
        target: ConnectionId,
        now: Instant,
        out: &mut Vec<Outbound>,
    ) {
        if self.phase != Phase::Active {
            debug!(source = %source, target = %target, phase = ?self.phase, "Infect attempt outside round");
            return;
        }
        self.try_infect(source, target, now, out);
    }

    fn try_infect(
        &mut self,
        source: ConnectionId,
        target: ConnectionId,
        now: Instant,
        out: &mut Vec<Outbound>,
    ) {
        if let Some(unknown) = [source, target]
            .into_iter()
            .find(|id| !self.registry.contains(*id))
        {
            let err = SessionError::UnknownConnection(unknown);
            debug!(error = %err, "Infect attempt ignored");
            return;
        }
        if !self
            .tracker
            .check_infection_attempt(&self.registry, source, target)
        {
            debug!(source = %source, target = %target, "Infect attempt rejected");
            return;
        }

        self.registry.mark_infected(target);
        let survivors = self.registry.survivor_count();
        info!(source = %source, target = %target, survivors, "Player infected");

        out.push(broadcast_delta(Delta::PlayerInfected(target)));
        out.push(Outbound::all(self.snapshot_msg(now)));

        if survivors == 0 {
            self.end_round(RoundEndReason::AllInfected, now, out);
        }
    }

    fn handle_disconnect(&mut self, id: ConnectionId, now: Instant, out: &mut Vec<Outbound>) {
        let Some(player) = self.registry.remove(id) else {
            debug!(connection_id = %id, "Disconnect without joined player");
            return;
        };

        info!(
            connection_id = %id,
            name = %player.name,
            player_count = self.registry.len(),
            "Player left session"
        );
        out.push(broadcast_delta(Delta::PlayerLeft(id)));

        if self.phase == Phase::Active {
            if self.registry.len() < self.config.min_players {
                self.end_round(RoundEndReason::InsufficientPlayers, now, out);
            } else if self.registry.survivor_count() == 0 {
                self.end_round(RoundEndReason::AllInfected, now, out);
            } else if self.registry.infected_count() == 0 {
                info!("Last infected player left, choosing a new one");
                self.seed_infection(out);
                if self.registry.survivor_count() == 0 {
                    self.end_round(RoundEndReason::AllInfected, now, out);
                }
            }
        }

        out.push(Outbound::all(self.snapshot_msg(now)));
    }

    fn handle_timer(&mut self, kind: TimerKind, now: Instant, out: &mut Vec<Outbound>) {
        match self.timer {
            Some(timer) if timer.kind == kind && timer.deadline <= now => {}
            pending => {
                debug!(?kind, ?pending, "Stale timer expiry ignored");
                return;
            }
        }
        self.timer = None;

        if self.phase != kind.phase() {
            warn!(?kind, phase = ?self.phase, "Timer fired in unexpected phase");
            return;
        }

        match kind {
            TimerKind::Countdown => self.start_round(now, out),
            TimerKind::Round => self.end_round(RoundEndReason::Timeout, now, out),
            TimerKind::Cooldown => self.finish_cooldown(now, out),
        }
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration, now: Instant) {
        self.timer = Some(PendingTimer {
            kind,
            deadline: now + delay,
        });
    }

    fn phase_changed(&self, message: Option<String>) -> Outbound {
        broadcast_delta(Delta::PhaseChanged {
            phase: self.phase,
            survivor_count: self.registry.survivor_count(),
            message,
        })
    }

    fn maybe_arm_countdown(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        if self.phase != Phase::Waiting || self.registry.len() < self.config.min_players {
            return;
        }

        self.phase = Phase::Countdown;
        self.arm(TimerKind::Countdown, self.config.countdown, now);
        info!(player_count = self.registry.len(), "Countdown started");

        let message = format!(
            "Round starting in {} seconds...",
            self.config.countdown.as_secs()
        );
        out.push(self.phase_changed(Some(message)));
    }

    fn start_round(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        if self.registry.len() < self.config.min_players {
            info!(player_count = self.registry.len(), "Countdown expired without enough players");
            self.phase = Phase::Waiting;
            out.push(self.phase_changed(Some("Waiting for more players...".to_string())));
            return;
        }

        self.registry.reset_infections();
        self.round += 1;
        self.phase = Phase::Active;
        self.arm(TimerKind::Round, self.config.round, now);

        info!(round = self.round, player_count = self.registry.len(), "Round started");
        out.push(self.phase_changed(Some(format!(
            "Round {} started! Avoid the infected!",
            self.round
        ))));
        self.seed_infection(out);

        if self.registry.survivor_count() == 0 {
            self.end_round(RoundEndReason::AllInfected, now, out);
        }
    }

    /// Pick one player uniformly at random as infected
    fn seed_infection(&mut self, out: &mut Vec<Outbound>) {
        let ids = self.registry.ids();
        if ids.is_empty() {
            return;
        }

        let chosen = ids[self.rng.gen_range(0..ids.len())];
        self.registry.mark_infected(chosen);
        info!(connection_id = %chosen, "Initial infected player chosen");
        out.push(broadcast_delta(Delta::PlayerInfected(chosen)));
    }

    fn end_round(&mut self, reason: RoundEndReason, now: Instant, out: &mut Vec<Outbound>) {
        if self.phase != Phase::Active {
            return;
        }
        self.timer = None;

        let survivors: Vec<SurvivorInfo> = match reason {
            RoundEndReason::AllInfected => Vec::new(),
            RoundEndReason::Timeout | RoundEndReason::InsufficientPlayers => {
                self.registry.survivors().map(|p| p.survivor_info()).collect()
            }
        };
        let message = match reason {
            RoundEndReason::AllInfected => "Everyone has been infected!".to_string(),
            RoundEndReason::Timeout if survivors.is_empty() => {
                "Time's up! No one survived.".to_string()
            }
            RoundEndReason::Timeout => {
                format!("Time's up! {} survivor(s) win.", survivors.len())
            }
            RoundEndReason::InsufficientPlayers => {
                "Not enough players to continue the round.".to_string()
            }
        };

        info!(
            round = self.round,
            ?reason,
            survivors = survivors.len(),
            "Round ended"
        );

        self.phase = Phase::Ended;
        out.push(self.phase_changed(Some(message.clone())));
        out.push(broadcast_delta(Delta::RoundOver {
            reason,
            message: message.clone(),
            survivors: survivors.clone(),
        }));
        self.last_result = Some(RoundResult {
            round: self.round,
            reason,
            message,
            survivors,
        });

        // Infection flags stay as they ended until the cooldown elapses
        self.phase = Phase::Cooldown;
        self.arm(TimerKind::Cooldown, self.config.restart_delay, now);
        let message = format!(
            "Next round in {} seconds...",
            self.config.restart_delay.as_secs()
        );
        out.push(self.phase_changed(Some(message)));
    }

    fn finish_cooldown(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        self.registry.reset_infections();
        self.phase = Phase::Waiting;
        debug!(player_count = self.registry.len(), "Cooldown finished");

        if self.registry.len() >= self.config.min_players {
            self.maybe_arm_countdown(now, out);
        } else {
            out.push(self.phase_changed(Some("Waiting for more players...".to_string())));
        }
    }
}
