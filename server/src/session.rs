//! One match between two players, run as a single task.
//!
//! Each session owns its two connections and its simulation. All input
//! arrives over one event channel: joins forwarded by the matchmaker and
//! per-connection events piped in by small forwarder tasks. The session
//! task is the only writer of game state, so no locking is needed.

use crate::connection::{Connection, ConnectionEvent};
use crate::game::{GameRules, GameState, TickOutcome};
use crate::map::SnakeMap;
use crate::player::{Player, Seat};
use crate::rng::GameRng;
use log::{error, info};
use shared::{ClientMessage, ServerMessage, StatusLine, COUNTDOWN_SECS, TICK_INTERVAL_MS};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub tick_interval: Duration,
    pub countdown: Duration,
    pub rules: GameRules,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
            countdown: Duration::from_secs(COUNTDOWN_SECS),
            rules: GameRules::default(),
        }
    }
}

/// Where the session is in its lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitingForOpponent,
    CountDown,
    Playing,
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    SessionFull,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::SessionFull => write!(f, "session already has two players"),
        }
    }
}

impl std::error::Error for SessionError {}

enum SessionEvent {
    Join {
        conn: Connection,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    },
    Conn {
        seat: Seat,
        event: ConnectionEvent,
    },
}

/// Sender half of a running session's event channel.
pub struct SessionHandle {
    pub id: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    /// Hands a connection to the session task. If the task has already
    /// finished, the connection and its event receiver come back so the
    /// caller can seat them elsewhere.
    pub fn join(
        &self,
        conn: Connection,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> Result<(), (Connection, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        match self.tx.send(SessionEvent::Join { conn, events }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(SessionEvent::Join { conn, events })) => {
                Err((conn, events))
            }
            // send returns the exact value it was given
            Err(_) => unreachable!(),
        }
    }
}

pub struct GameSession {
    pub id: u64,
    config: SessionConfig,
    phase: Phase,
    players: Vec<Player>,
    game: GameState,
}

impl GameSession {
    pub fn new(id: u64, map: Arc<SnakeMap>, config: SessionConfig, rng: GameRng) -> Self {
        Self {
            id,
            phase: Phase::WaitingForOpponent,
            players: Vec::with_capacity(2),
            game: GameState::new(map, config.rules, rng),
            config,
        }
    }

    /// Starts the session task and returns a handle for joining players.
    /// When the session ends for any reason, its id is sent on `finished`.
    pub fn spawn(self, finished: mpsc::UnboundedSender<u64>) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.id;
        let self_tx = tx.clone();
        tokio::spawn(self.run(rx, self_tx, finished));
        SessionHandle { id, tx }
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        self_tx: mpsc::UnboundedSender<SessionEvent>,
        finished: mpsc::UnboundedSender<u64>,
    ) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut countdown_at: Option<Instant> = None;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Join { conn, events: conn_events }) => {
                        match self.add_player(conn.clone()) {
                            Ok(seat) => {
                                spawn_forwarder(seat, conn_events, self_tx.clone());
                                if self.phase == Phase::CountDown {
                                    countdown_at = Some(Instant::now() + self.config.countdown);
                                }
                            }
                            Err(e) => {
                                error!("Session {}: rejecting join from {}: {}", self.id, conn.addr(), e);
                                conn.abort();
                            }
                        }
                    }
                    Some(SessionEvent::Conn { seat, event }) => match event {
                        ConnectionEvent::Line(line) => self.handle_line(seat, &line),
                        ConnectionEvent::Closed(reason) => {
                            info!("Session {}: player {} disconnected ({:?})", self.id, seat, reason);
                            if self.phase == Phase::Playing {
                                let winner = seat.other();
                                if let Some(player) = self.player(winner) {
                                    player.send(&ServerMessage::Winner(winner.number()));
                                }
                                info!("Session {}: player {} wins by forfeit", self.id, winner);
                            }
                            self.finish();
                        }
                    },
                    None => break,
                },
                _ = async {
                    match countdown_at {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if countdown_at.is_some() && self.phase == Phase::CountDown => {
                    countdown_at = None;
                    self.start_playing(&mut ticker);
                },
                _ = ticker.tick(), if self.phase == Phase::Playing => {
                    self.run_tick();
                },
            }

            if self.phase == Phase::GameOver {
                break;
            }
        }

        let _ = finished.send(self.id);
    }

    /// Seats a connection and sends its assignment. The second join starts
    /// the countdown on both connections.
    fn add_player(&mut self, conn: Connection) -> Result<Seat, SessionError> {
        let seat = match self.players.len() {
            0 => Seat::One,
            1 => Seat::Two,
            _ => return Err(SessionError::SessionFull),
        };

        let player = Player::new(seat, conn);
        player.send(&ServerMessage::Player(seat.number()));
        match seat {
            Seat::One => info!(
                "Session {}: first player connected from {}",
                self.id,
                player.conn.addr()
            ),
            Seat::Two => info!(
                "Session {}: second player connected from {}",
                self.id,
                player.conn.addr()
            ),
        }
        self.players.push(player);

        if self.players.len() == 2 {
            let secs = self.config.countdown.as_secs();
            for player in &self.players {
                player.send(&ServerMessage::Countdown(secs));
            }
            self.phase = Phase::CountDown;
        }
        Ok(seat)
    }

    /// Unparseable lines are ignored, matching how clients are expected to
    /// treat unknown server messages.
    fn handle_line(&mut self, seat: Seat, line: &str) {
        if let Some(message) = ClientMessage::parse(line) {
            if let Some(player) = self.players.get_mut(seat.index()) {
                player.state.apply_message(message);
            }
        }
    }

    fn start_playing(&mut self, ticker: &mut Interval) {
        if self.players.len() < 2 {
            return;
        }
        let (first, rest) = self.players.split_at_mut(1);
        self.game.start(&mut first[0].state, &mut rest[0].state);
        self.phase = Phase::Playing;
        ticker.reset();
        info!("Session {}: game started", self.id);
    }

    fn run_tick(&mut self) {
        if self.players.len() < 2 {
            return;
        }
        let outcome = {
            let (first, rest) = self.players.split_at_mut(1);
            self.game.tick(&mut first[0].state, &mut rest[0].state)
        };
        match outcome {
            TickOutcome::Continue => self.broadcast_status(),
            TickOutcome::Draw => {
                info!("Session {}: game ended in a draw", self.id);
                for player in &self.players {
                    player.send(&ServerMessage::Draw);
                }
                self.finish();
            }
            TickOutcome::Winner(seat) => {
                info!("Session {}: player {} wins", self.id, seat);
                for player in &self.players {
                    player.send(&ServerMessage::Winner(seat.number()));
                }
                self.finish();
            }
        }
    }

    /// One status line per player; the turbo flag and counter are personal,
    /// everything else is shared state.
    fn broadcast_status(&self) {
        let snake1 = self.players[0].state.snake.clone();
        let snake2 = self.players[1].state.snake.clone();
        for player in &self.players {
            let status = StatusLine {
                walls: self.game.map.walls.clone(),
                food: self.game.food.clone(),
                turbo: self.game.turbo.clone(),
                snake1: snake1.clone(),
                snake2: snake2.clone(),
                turbo_enabled: player.state.turbo_enabled,
                turbo_left: player.state.turbo,
            };
            player.send(&ServerMessage::Status(status));
        }
    }

    // Players are pushed in seat order, so the seat index is the vec index.
    fn player(&self, seat: Seat) -> Option<&Player> {
        self.players.get(seat.index())
    }

    /// Ends the session. Pending messages are flushed before the sockets
    /// shut down. Idempotent.
    fn finish(&mut self) {
        if self.phase == Phase::GameOver {
            return;
        }
        self.phase = Phase::GameOver;
        for player in &self.players {
            player.conn.disconnect();
        }
        info!("Session {}: players disconnected", self.id);
    }
}

/// Pipes one connection's events into the session channel, tagged with the
/// seat. Exits when either side goes away.
fn spawn_forwarder(
    seat: Seat,
    mut conn_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    tx: mpsc::UnboundedSender<SessionEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = conn_events.recv().await {
            if tx.send(SessionEvent::Conn { seat, event }).is_err() {
                break;
            }
        }
    });
}
