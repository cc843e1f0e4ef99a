//! Level parsing and validation.
//!
//! A level is a header line (`name | startLength | dir1 | dir2`) followed by
//! one row of characters per grid row: `%` for walls, `1` and `2` for the
//! two snake head cells, space for empty floor. Coordinates are 1-based;
//! snake bodies are reconstructed by walking backwards from each head along
//! that player's starting direction, wrapping across the field edges.

use log::{info, warn};
use shared::{Direction, Point, DEFAULT_START_LENGTH, FIELD_HEIGHT, FIELD_WIDTH};
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    MissingHeader,
    BadHeader(String),
    RowCount { expected: usize, found: usize },
    DuplicateMarker(char),
    MissingMarker(char),
    /// A reconstructed start body cell overlaps a wall or the other body.
    StartOverlap(Point),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::MissingHeader => write!(f, "level has no header line"),
            MapError::BadHeader(header) => write!(f, "malformed header line: {:?}", header),
            MapError::RowCount { expected, found } => {
                write!(f, "expected {} rows, found {}", expected, found)
            }
            MapError::DuplicateMarker(marker) => {
                write!(f, "more than one '{}' marker", marker)
            }
            MapError::MissingMarker(marker) => write!(f, "no '{}' marker", marker),
            MapError::StartOverlap(cell) => {
                write!(f, "start body cell {} overlaps a wall or the other snake", cell)
            }
        }
    }
}

impl std::error::Error for MapError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartConfig {
    pub position: Point,
    pub direction: Direction,
}

/// Immutable level data: wall cells plus two validated start configurations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnakeMap {
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub start_length: usize,
    pub walls: Vec<Point>,
    pub starts: [StartConfig; 2],
}

impl SnakeMap {
    pub fn parse(level: &str, width: i32, height: i32) -> Result<SnakeMap, MapError> {
        let rows: Vec<&str> = level
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .collect();

        let header = *rows.first().ok_or(MapError::MissingHeader)?;
        let parts: Vec<&str> = header.split('|').map(str::trim).collect();
        if parts.len() < 4 {
            return Err(MapError::BadHeader(header.to_string()));
        }
        let start_length: usize = parts[1]
            .parse()
            .map_err(|_| MapError::BadHeader(header.to_string()))?;
        if start_length == 0 {
            return Err(MapError::BadHeader(header.to_string()));
        }
        let dir1 =
            Direction::from_name(parts[2]).ok_or_else(|| MapError::BadHeader(header.to_string()))?;
        let dir2 =
            Direction::from_name(parts[3]).ok_or_else(|| MapError::BadHeader(header.to_string()))?;

        if rows.len() != height as usize + 1 {
            return Err(MapError::RowCount {
                expected: height as usize,
                found: rows.len() - 1,
            });
        }

        let mut walls = Vec::new();
        let mut heads: [Option<Point>; 2] = [None, None];
        for (r, row) in rows.iter().enumerate().skip(1) {
            let y = r as i32;
            for (j, ch) in row.chars().enumerate() {
                if j as i32 >= width {
                    break;
                }
                let cell = Point::new(j as i32 + 1, y);
                match ch {
                    '%' => walls.push(cell),
                    '1' | '2' => {
                        let index = if ch == '1' { 0 } else { 1 };
                        if heads[index].is_some() {
                            return Err(MapError::DuplicateMarker(ch));
                        }
                        heads[index] = Some(cell);
                    }
                    _ => {}
                }
            }
        }

        let head1 = heads[0].ok_or(MapError::MissingMarker('1'))?;
        let head2 = heads[1].ok_or(MapError::MissingMarker('2'))?;

        let map = SnakeMap {
            name: parts[0].to_string(),
            width,
            height,
            start_length,
            walls,
            starts: [
                StartConfig {
                    position: head1,
                    direction: dir1,
                },
                StartConfig {
                    position: head2,
                    direction: dir2,
                },
            ],
        };

        let body1 = map.start_body(0);
        let body2 = map.start_body(1);
        for cell in body1.iter().chain(body2.iter()) {
            if map.walls.contains(cell) {
                return Err(MapError::StartOverlap(*cell));
            }
        }
        for cell in &body1 {
            if body2.contains(cell) {
                return Err(MapError::StartOverlap(*cell));
            }
        }

        Ok(map)
    }

    /// Reconstructs a player's initial snake, tail first with the head as
    /// the last element, walking `start_length` cells backwards from the
    /// marked head cell with wraparound.
    pub fn start_body(&self, index: usize) -> Vec<Point> {
        let start = self.starts[index];
        let mut body = Vec::with_capacity(self.start_length);
        let mut cell = start.position;
        for _ in 0..self.start_length {
            body.push(cell);
            cell = cell
                .step(start.direction.opposite())
                .wrapped(self.width, self.height);
        }
        body.reverse();
        body
    }

    /// Builds the fallback level: a bordered empty field with both snakes
    /// on the middle row facing each other from opposite sides.
    pub fn default_map(width: i32, height: i32) -> SnakeMap {
        let mut walls = Vec::new();
        for y in 1..=height {
            for x in 1..=width {
                if y == 1 || y == height || x == 1 || x == width {
                    walls.push(Point::new(x, y));
                }
            }
        }
        let middle = height / 2 + 1;
        SnakeMap {
            name: "Blank level".to_string(),
            width,
            height,
            start_length: DEFAULT_START_LENGTH,
            walls,
            starts: [
                StartConfig {
                    position: Point::new(11, middle),
                    direction: Direction::Right,
                },
                StartConfig {
                    position: Point::new(width - 10, middle),
                    direction: Direction::Left,
                },
            ],
        }
    }
}

/// Loads the level file if one was given, falling back to the generated
/// default map on any read or validation failure. Map faults are fatal for
/// the file, never for the server.
pub fn load_or_default(path: Option<&Path>) -> SnakeMap {
    if let Some(path) = path {
        match fs::read_to_string(path) {
            Ok(text) => match SnakeMap::parse(&text, FIELD_WIDTH, FIELD_HEIGHT) {
                Ok(map) => {
                    info!("Loaded level '{}' from {}", map.name, path.display());
                    return map;
                }
                Err(e) => warn!(
                    "Invalid level file {}: {}; using default map",
                    path.display(),
                    e
                ),
            },
            Err(e) => warn!(
                "Could not read level file {}: {}; using default map",
                path.display(),
                e
            ),
        }
    }
    SnakeMap::default_map(FIELD_WIDTH, FIELD_HEIGHT)
}
