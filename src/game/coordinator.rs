//! Session task: serializes commands and timer expiries onto one [`Session`]

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::config::GameConfig;
use crate::ws::protocol::{ClientMsg, ConnectionId, ServerMsg, Vec3};

use super::broadcast::{Broadcaster, Outbound};
use super::session::{PendingTimer, Session, SessionEvent, SessionStatus, TimerKind};

/// Command queue depth shared by all connections
const COMMAND_BUFFER: usize = 1024;

/// Commands sent by connection tasks to the session task
#[derive(Debug)]
pub enum SessionCommand {
    /// Socket accepted; `outbound` receives everything addressed to it
    Connect {
        id: ConnectionId,
        outbound: mpsc::Sender<ServerMsg>,
    },
    /// Parsed client frame
    Client { id: ConnectionId, msg: ClientMsg },
    /// Socket closed or errored
    Disconnect { id: ConnectionId },
}

/// Cloneable handle to the running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: Arc<RwLock<SessionStatus>>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }
}

/// Owns the session and its connections
pub struct SessionCoordinator {
    session: Session,
    broadcaster: Broadcaster,
    commands: mpsc::Receiver<SessionCommand>,
    status: Arc<RwLock<SessionStatus>>,
}

impl SessionCoordinator {
    pub fn new(config: GameConfig) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let session = Session::new(config);
        let status = Arc::new(RwLock::new(session.status()));

        let handle = SessionHandle {
            commands: commands_tx,
            status: status.clone(),
        };

        let coordinator = Self {
            session,
            broadcaster: Broadcaster::new(),
            commands: commands_rx,
            status,
        };

        (coordinator, handle)
    }

    /// Run until every [`SessionHandle`] is dropped
    pub async fn run(mut self) {
        info!("Session coordinator started");

        loop {
            let timer = self.session.pending_timer();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                kind = wait_for(timer) => {
                    self.dispatch(SessionEvent::TimerExpired(kind));
                }
            }
        }

        info!("Session coordinator stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect { id, outbound } => {
                self.broadcaster.register(id, outbound);
                debug!(
                    connection_id = %id,
                    connections = self.broadcaster.connection_count(),
                    "Connection registered"
                );
                self.dispatch(SessionEvent::Connected(id));
            }
            SessionCommand::Client { id, msg } => self.handle_client(id, msg),
            SessionCommand::Disconnect { id } => {
                // Unregister first so the leaver gets none of its own departure traffic
                self.broadcaster.unregister(id);
                self.dispatch(SessionEvent::Disconnected(id));
                debug!(
                    connection_id = %id,
                    connections = self.broadcaster.connection_count(),
                    "Connection unregistered"
                );
            }
        }
    }

    fn handle_client(&mut self, id: ConnectionId, msg: ClientMsg) {
        let event = match msg {
            ClientMsg::Join { name, position } => SessionEvent::Join {
                id,
                name,
                position: position.unwrap_or_else(Vec3::spawn),
            },
            ClientMsg::Move {
                position,
                rotation,
                infected,
            } => SessionEvent::Move {
                id,
                position,
                rotation: rotation.y,
                infected,
            },
            ClientMsg::AttemptInfect { target_id } => SessionEvent::AttemptInfect {
                source: id,
                target: target_id,
            },
            ClientMsg::Ping { t } => {
                self.broadcaster.deliver(&Outbound::to(id, ServerMsg::Pong { t }));
                return;
            }
        };

        self.dispatch(event);
    }

    fn dispatch(&mut self, event: SessionEvent) {
        let now = Instant::now().into_std();
        let outbound = self.session.handle(event, now);
        self.broadcaster.deliver_all(&outbound);
        *self.status.write() = self.session.status();
    }
}

/// Resolve when the pending timer is due; never resolves without one
async fn wait_for(timer: Option<PendingTimer>) -> TimerKind {
    match timer {
        Some(timer) => {
            sleep_until(Instant::from_std(timer.deadline)).await;
            timer.kind
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::assert_ok;

    use crate::ws::protocol::{Phase, RoundEndReason};

    async fn connect(handle: &SessionHandle) -> (ConnectionId, mpsc::Receiver<ServerMsg>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(64);
        assert!(handle.send(SessionCommand::Connect { id, outbound: tx }).await);
        (id, rx)
    }

    async fn join(handle: &SessionHandle, id: ConnectionId, name: &str, x: f32) {
        let msg = ClientMsg::Join {
            name: name.to_string(),
            position: Some(Vec3::new(x, 1.0, 0.0)),
        };
        assert!(handle.send(SessionCommand::Client { id, msg }).await);
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn spawn_session() -> SessionHandle {
        let (coordinator, handle) = SessionCoordinator::new(GameConfig {
            rng_seed: Some(11),
            ..GameConfig::default()
        });
        tokio::spawn(coordinator.run());
        handle
    }

    /// Let the coordinator drain its queue without moving the paused clock far
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_timer_starts_round() {
        let handle = spawn_session();
        let (a, mut rx_a) = connect(&handle).await;
        let (b, mut rx_b) = connect(&handle).await;
        join(&handle, a, "a", 0.0).await;
        join(&handle, b, "b", 40.0).await;
        settle().await;
        assert_eq!(handle.status().phase, Phase::Countdown);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        settle().await;

        let status = handle.status();
        assert_eq!(status.phase, Phase::Active);
        assert_eq!(status.survivor_count, 1);
        assert_eq!(status.round, 1);

        let a_msgs = drain(&mut rx_a);
        let b_msgs = drain(&mut rx_b);
        for msgs in [&a_msgs, &b_msgs] {
            assert!(msgs.iter().any(|m| matches!(
                m,
                ServerMsg::PhaseChanged {
                    phase: Phase::Active,
                    ..
                }
            )));
            assert_eq!(
                msgs.iter()
                    .filter(|m| matches!(m, ServerMsg::PlayerInfected { .. }))
                    .count(),
                1
            );
        }

        // The joiner never hears about its own arrival
        assert!(!b_msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerJoined { player } if player.id == b)));
        assert!(a_msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerJoined { player } if player.id == b)));
    }

    #[tokio::test(start_paused = true)]
    async fn round_times_out_and_cooldown_restarts() {
        let handle = spawn_session();
        let (a, mut rx_a) = connect(&handle).await;
        let (b, _rx_b) = connect(&handle).await;
        join(&handle, a, "a", 0.0).await;
        join(&handle, b, "b", 40.0).await;

        tokio::time::sleep(Duration::from_millis(5000 + 60000)).await;
        settle().await;
        let status = handle.status();
        assert_eq!(status.phase, Phase::Cooldown);
        let last_round = status.last_round.unwrap();
        assert_eq!(last_round.reason, RoundEndReason::Timeout);
        assert_eq!(last_round.round, 1);
        assert_eq!(last_round.survivors.len(), 1);
        assert!(drain(&mut rx_a).iter().any(|m| matches!(
            m,
            ServerMsg::RoundOver {
                reason: RoundEndReason::Timeout,
                survivors,
                ..
            } if survivors.len() == 1
        )));

        tokio::time::sleep(Duration::from_millis(5000)).await;
        settle().await;
        let status = handle.status();
        assert_eq!(status.phase, Phase::Countdown);
        assert_eq!(status.survivor_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_ends_two_player_round() {
        let handle = spawn_session();
        let (a, _rx_a) = connect(&handle).await;
        let (b, mut rx_b) = connect(&handle).await;
        join(&handle, a, "a", 0.0).await;
        join(&handle, b, "b", 40.0).await;
        tokio::time::sleep(Duration::from_millis(5000)).await;
        settle().await;
        drain(&mut rx_b);

        assert!(handle.send(SessionCommand::Disconnect { id: a }).await);
        settle().await;

        let msgs = drain(&mut rx_b);
        assert_eq!(msgs.first(), Some(&ServerMsg::PlayerLeft { id: a }));
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::RoundOver {
                reason: RoundEndReason::InsufficientPlayers,
                ..
            }
        )));
        assert_eq!(handle.status().phase, Phase::Cooldown);
        assert_eq!(handle.status().player_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_and_unknown_targets_keep_session_live() {
        let handle = spawn_session();
        let (a, mut rx_a) = connect(&handle).await;
        join(&handle, a, "a", 0.0).await;
        settle().await;
        drain(&mut rx_a);

        let bogus = ClientMsg::AttemptInfect {
            target_id: ConnectionId::new(),
        };
        assert!(handle.send(SessionCommand::Client { id: a, msg: bogus }).await);
        let ping = ClientMsg::Ping { t: 42 };
        assert!(handle.send(SessionCommand::Client { id: a, msg: ping }).await);
        settle().await;

        assert_eq!(drain(&mut rx_a), vec![ServerMsg::Pong { t: 42 }]);
        assert_eq!(handle.status().player_count, 1);
    }

    #[tokio::test]
    async fn coordinator_stops_when_handles_drop() {
        let (coordinator, handle) = SessionCoordinator::new(GameConfig::default());
        let task = tokio::spawn(coordinator.run());
        drop(handle);
        assert_ok!(task.await);
    }
}
