//! Per-player state: the snake body, buffered steering input and turbo fuel.

use crate::connection::Connection;
use shared::{
    ClientMessage, Direction, Point, ServerMessage, DIRECTION_QUEUE_CAP, MAX_TURBO, TURBO_AMOUNT,
};
use std::collections::VecDeque;
use std::fmt;

/// Which side of the match a player occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seat {
    One,
    Two,
}

impl Seat {
    pub fn number(&self) -> u8 {
        match self {
            Seat::One => 1,
            Seat::Two => 2,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Seat::One => 0,
            Seat::Two => 1,
        }
    }

    pub fn other(&self) -> Seat {
        match self {
            Seat::One => Seat::Two,
            Seat::Two => Seat::One,
        }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Simulation state for one snake. The body is stored tail first, so the
/// head is always the last element.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub snake: Vec<Point>,
    pub current_direction: Direction,
    pub direction_queue: VecDeque<Direction>,
    pub turbo: u32,
    pub turbo_enabled: bool,
}

impl PlayerState {
    pub fn new() -> Self {
        Self {
            snake: Vec::new(),
            current_direction: Direction::Right,
            direction_queue: VecDeque::new(),
            turbo: 0,
            turbo_enabled: false,
        }
    }

    /// Resets the player for a fresh round with the given starting body.
    pub fn reset(&mut self, snake: Vec<Point>, direction: Direction) {
        self.snake = snake;
        self.current_direction = direction;
        self.direction_queue.clear();
        self.turbo = 0;
        self.turbo_enabled = false;
    }

    pub fn head(&self) -> Option<Point> {
        self.snake.last().copied()
    }

    /// Applies one steering or turbo command. Turn requests are buffered;
    /// only the most recent `DIRECTION_QUEUE_CAP` survive until the next tick.
    pub fn apply_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Turn(direction) => {
                self.direction_queue.push_back(direction);
                while self.direction_queue.len() > DIRECTION_QUEUE_CAP {
                    self.direction_queue.pop_front();
                }
            }
            ClientMessage::TurboOn => {
                if self.turbo > 0 {
                    self.turbo_enabled = true;
                }
            }
            ClientMessage::TurboOff => self.turbo_enabled = false,
            ClientMessage::MaxTurbo => self.turbo = MAX_TURBO,
        }
    }

    /// Pops at most one queued turn and commits it, unless it would reverse
    /// the snake onto itself; a reversing request is consumed and discarded.
    pub fn resolve_direction(&mut self) -> Direction {
        if let Some(requested) = self.direction_queue.pop_front() {
            if requested != self.current_direction.opposite() {
                self.current_direction = requested;
            }
        }
        self.current_direction
    }

    pub fn grant_turbo(&mut self) {
        self.turbo = (self.turbo + TURBO_AMOUNT).min(MAX_TURBO);
    }

    /// Burns one unit of turbo fuel, switching boost off when the tank
    /// runs dry.
    pub fn consume_turbo(&mut self) {
        if self.turbo_enabled {
            self.turbo = self.turbo.saturating_sub(1);
            if self.turbo == 0 {
                self.turbo_enabled = false;
            }
        }
    }

    pub fn drop_tail(&mut self) {
        if !self.snake.is_empty() {
            self.snake.remove(0);
        }
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::new()
    }
}

/// A seated player: the network connection plus simulation state.
pub struct Player {
    pub seat: Seat,
    pub conn: Connection,
    pub state: PlayerState,
}

impl Player {
    pub fn new(seat: Seat, conn: Connection) -> Self {
        Self {
            seat,
            conn,
            state: PlayerState::new(),
        }
    }

    pub fn send(&self, message: &ServerMessage) {
        self.conn.send(&message.to_string());
    }
}
