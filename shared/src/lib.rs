use std::fmt;

pub const TICK_INTERVAL_MS: u64 = 40;
pub const COUNTDOWN_SECS: u64 = 3;
pub const INITIAL_FOOD: usize = 1;
pub const INITIAL_TURBO: usize = 3;
pub const TURBO_AMOUNT: u32 = 20;
pub const MAX_TURBO: u32 = 100;
pub const FIELD_WIDTH: i32 = 70;
pub const FIELD_HEIGHT: i32 = 40;
pub const DEFAULT_START_LENGTH: usize = 8;
pub const DIRECTION_QUEUE_CAP: usize = 2;

/// Offset added to each coordinate when encoding point lists, so that the
/// smallest on-grid coordinate maps to a printable character.
pub const POINT_ENCODE_OFFSET: i32 = 20;

/// One cell on the 1-based game grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the neighboring cell one step in the given direction,
    /// without wrapping.
    pub fn step(self, direction: Direction) -> Point {
        let (dx, dy) = direction.offset();
        Point::new(self.x + dx, self.y + dy)
    }

    /// Wraps a coordinate back onto the 1-based field, so that moving off
    /// the left edge lands on column `width` rather than column 0.
    pub fn wrapped(self, width: i32, height: i32) -> Point {
        let mut q = self;
        if q.x < 1 {
            q.x = q.x % width + width;
        }
        if q.x > width {
            q.x %= width;
        }
        if q.y < 1 {
            q.y = q.y % height + height;
        }
        if q.y > height {
            q.y %= height;
        }
        q
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Grid delta for one step; y grows downward.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    /// Parses the single-letter form used by `#D` control messages.
    pub fn from_key(key: &str) -> Option<Direction> {
        match key {
            "U" => Some(Direction::Up),
            "D" => Some(Direction::Down),
            "L" => Some(Direction::Left),
            "R" => Some(Direction::Right),
            _ => None,
        }
    }

    /// Parses the word form used by level file headers.
    pub fn from_name(name: &str) -> Option<Direction> {
        match name.to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Direction::Up => "U",
            Direction::Down => "D",
            Direction::Left => "L",
            Direction::Right => "R",
        }
    }
}

/// Encodes a point list for the wire: each point becomes two characters,
/// `(x + 20)` then `(y + 20)`, with no delimiter. An empty list encodes as
/// an empty string. Coordinates outside the encodable range are skipped.
pub fn encode_points(points: &[Point]) -> String {
    let mut out = String::with_capacity(points.len() * 2);
    for p in points {
        let cx = char::from_u32((p.x + POINT_ENCODE_OFFSET) as u32);
        let cy = char::from_u32((p.y + POINT_ENCODE_OFFSET) as u32);
        if let (Some(cx), Some(cy)) = (cx, cy) {
            out.push(cx);
            out.push(cy);
        }
    }
    out
}

/// Decodes a point list produced by [`encode_points`]. A trailing odd
/// character is ignored.
pub fn decode_points(encoded: &str) -> Vec<Point> {
    let chars: Vec<char> = encoded.chars().collect();
    let mut points = Vec::with_capacity(chars.len() / 2);
    for pair in chars.chunks_exact(2) {
        let x = pair[0] as i32 - POINT_ENCODE_OFFSET;
        let y = pair[1] as i32 - POINT_ENCODE_OFFSET;
        points.push(Point::new(x, y));
    }
    points
}

/// Per-tick field snapshot carried by `#Status`. The turbo flag and counter
/// are specific to the receiving player; everything else is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub walls: Vec<Point>,
    pub food: Vec<Point>,
    pub turbo: Vec<Point>,
    pub snake1: Vec<Point>,
    pub snake2: Vec<Point>,
    pub turbo_enabled: bool,
    pub turbo_left: u32,
}

impl StatusLine {
    pub fn parse(fields: &str) -> Option<StatusLine> {
        let parts: Vec<&str> = fields.split('\t').collect();
        if parts.len() != 7 {
            return None;
        }
        let turbo_enabled = match parts[5] {
            "E" => true,
            "D" => false,
            _ => return None,
        };
        Some(StatusLine {
            walls: decode_points(parts[0]),
            food: decode_points(parts[1]),
            turbo: decode_points(parts[2]),
            snake1: decode_points(parts[3]),
            snake2: decode_points(parts[4]),
            turbo_enabled,
            turbo_left: parts[6].parse().ok()?,
        })
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            encode_points(&self.walls),
            encode_points(&self.food),
            encode_points(&self.turbo),
            encode_points(&self.snake1),
            encode_points(&self.snake2),
            if self.turbo_enabled { "E" } else { "D" },
            self.turbo_left
        )
    }
}

/// Messages the server sends to clients, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Seat assignment sent on join.
    Player(u8),
    /// Countdown started; payload is the duration in seconds.
    Countdown(u64),
    /// Per-tick field broadcast.
    Status(StatusLine),
    /// Session ended in a tie.
    Draw,
    /// Session ended; payload is the winning seat.
    Winner(u8),
}

impl ServerMessage {
    pub fn parse(line: &str) -> Option<ServerMessage> {
        if let Some(rest) = line.strip_prefix("#Player ") {
            return rest.trim().parse().ok().map(ServerMessage::Player);
        }
        if let Some(rest) = line.strip_prefix("#Countdown ") {
            return rest.trim().parse().ok().map(ServerMessage::Countdown);
        }
        if let Some(rest) = line.strip_prefix("#Status ") {
            return StatusLine::parse(rest).map(ServerMessage::Status);
        }
        if line == "#Draw" {
            return Some(ServerMessage::Draw);
        }
        if let Some(rest) = line.strip_prefix("#Winner ") {
            return rest.trim().parse().ok().map(ServerMessage::Winner);
        }
        None
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Player(seat) => write!(f, "#Player {}", seat),
            ServerMessage::Countdown(secs) => write!(f, "#Countdown {}", secs),
            ServerMessage::Status(status) => write!(f, "#Status {}", status),
            ServerMessage::Draw => write!(f, "#Draw"),
            ServerMessage::Winner(seat) => write!(f, "#Winner {}", seat),
        }
    }
}

/// Control messages clients send to the server. Anything that does not
/// parse is ignored by the server, so `parse` returns an `Option` rather
/// than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    /// Queue a direction change for an upcoming tick.
    Turn(Direction),
    TurboOn,
    TurboOff,
    /// Debug command: refill the turbo counter to its maximum.
    MaxTurbo,
}

impl ClientMessage {
    pub fn parse(line: &str) -> Option<ClientMessage> {
        if let Some(key) = line.strip_prefix("#D ") {
            return Direction::from_key(key).map(ClientMessage::Turn);
        }
        match line {
            "#Turbo on" => Some(ClientMessage::TurboOn),
            "#Turbo off" => Some(ClientMessage::TurboOff),
            "#MaxTurbo" => Some(ClientMessage::MaxTurbo),
            _ => None,
        }
    }
}

impl fmt::Display for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMessage::Turn(direction) => write!(f, "#D {}", direction.key()),
            ClientMessage::TurboOn => write!(f, "#Turbo on"),
            ClientMessage::TurboOff => write!(f, "#Turbo off"),
            ClientMessage::MaxTurbo => write!(f, "#MaxTurbo"),
        }
    }
}
