//! End-to-end tests that boot the full server stack on an ephemeral port
//! and drive matches through real TCP connections.

use server::connection::{CloseReason, Connection, ConnectionEvent};
use server::map::SnakeMap;
use server::matchmaker::Matchmaker;
use server::registry::Registry;
use server::session::SessionConfig;
use shared::{Direction, Point, ServerMessage, StatusLine};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// A 20x20 open field without walls: player 1 at (5,10) facing right,
/// player 2 at (15,10) facing left, three segments each.
fn open_level() -> SnakeMap {
    let mut level = String::from("Open field | 3 | Right | Left\n");
    for y in 1..=20 {
        for x in 1..=20 {
            if y == 10 && x == 5 {
                level.push('1');
            } else if y == 10 && x == 15 {
                level.push('2');
            } else {
                level.push(' ');
            }
        }
        level.push('\n');
    }
    SnakeMap::parse(&level, 20, 20).unwrap()
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        tick_interval: Duration::from_millis(10),
        countdown: Duration::from_millis(50),
        ..SessionConfig::default()
    }
}

/// Spawns registry and matchmaker tasks and returns the listen address.
async fn boot(map: SnakeMap, config: SessionConfig) -> SocketAddr {
    let registry = Registry::bind("127.0.0.1:0").await.unwrap();
    let addr = registry.local_addr().unwrap();
    let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();
    tokio::spawn(registry.run(arrivals_tx));
    tokio::spawn(Matchmaker::new(Arc::new(map), config).run(arrivals_rx));
    addr
}

struct TestClient {
    conn: Connection,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> TestClient {
        let (conn, events) = Connection::connect(addr).await.unwrap();
        TestClient { conn, events }
    }

    fn send(&self, text: &str) {
        self.conn.send(text);
    }

    async fn next_message(&mut self) -> ServerMessage {
        loop {
            match timeout(WAIT, self.events.recv()).await.unwrap().unwrap() {
                ConnectionEvent::Line(line) => {
                    if let Some(message) = ServerMessage::parse(&line) {
                        return message;
                    }
                    panic!("Unparseable server line: {:?}", line);
                }
                ConnectionEvent::Closed(reason) => panic!("Connection closed: {:?}", reason),
            }
        }
    }

    async fn next_status(&mut self) -> StatusLine {
        loop {
            if let ServerMessage::Status(status) = self.next_message().await {
                return status;
            }
        }
    }

    /// Drains remaining messages until the close event, returning the
    /// winner announcement if one was seen on the way.
    async fn winner_then_close(&mut self) -> (Option<u8>, CloseReason) {
        let mut winner = None;
        loop {
            match timeout(WAIT, self.events.recv()).await.unwrap().unwrap() {
                ConnectionEvent::Line(line) => {
                    if let Some(ServerMessage::Winner(seat)) = ServerMessage::parse(&line) {
                        winner = Some(seat);
                    }
                }
                ConnectionEvent::Closed(reason) => return (winner, reason),
            }
        }
    }
}

#[tokio::test]
async fn test_full_match_lifecycle() {
    let addr = boot(open_level(), fast_config()).await;

    let mut player1 = TestClient::connect(addr).await;
    assert_eq!(player1.next_message().await, ServerMessage::Player(1));

    let mut player2 = TestClient::connect(addr).await;
    assert_eq!(player2.next_message().await, ServerMessage::Player(2));

    // Countdown reaches both players (50ms rounds down to 0 whole seconds)
    assert_eq!(player1.next_message().await, ServerMessage::Countdown(0));
    assert_eq!(player2.next_message().await, ServerMessage::Countdown(0));

    // The first status shows the untouched starting field
    let status = player1.next_status().await;
    assert!(status.walls.is_empty());
    assert_eq!(status.food.len(), 1);
    assert_eq!(status.turbo.len(), 3);
    assert_eq!(
        status.snake1,
        vec![Point::new(3, 10), Point::new(4, 10), Point::new(5, 10)]
    );
    assert_eq!(
        status.snake2,
        vec![Point::new(17, 10), Point::new(16, 10), Point::new(15, 10)]
    );
    assert!(!status.turbo_enabled);
    assert_eq!(status.turbo_left, 0);

    // Steer player 1 upward and watch the head climb. Only every other
    // tick moves non-boosting snakes, so scan a window of statuses.
    player1.send(&format!("#D {}", Direction::Up.key()));
    let mut head = Point::new(0, 0);
    for _ in 0..14 {
        let status = player1.next_status().await;
        head = *status.snake1.last().unwrap();
    }
    assert_eq!(head.x, 5);
    assert!(head.y < 10, "head should have moved up, got {}", head);

    // Player 2 walks out mid-game; player 1 wins by forfeit and the
    // server closes the surviving socket afterwards
    player2.conn.abort();
    let (winner, _reason) = player1.winner_then_close().await;
    assert_eq!(winner, Some(1));
    assert!(!player1.conn.is_connected());
}

#[tokio::test]
async fn test_two_matches_run_concurrently() {
    let addr = boot(open_level(), fast_config()).await;

    let mut a1 = TestClient::connect(addr).await;
    assert_eq!(a1.next_message().await, ServerMessage::Player(1));
    let mut a2 = TestClient::connect(addr).await;
    assert_eq!(a2.next_message().await, ServerMessage::Player(2));

    let mut b1 = TestClient::connect(addr).await;
    assert_eq!(b1.next_message().await, ServerMessage::Player(1));
    let mut b2 = TestClient::connect(addr).await;
    assert_eq!(b2.next_message().await, ServerMessage::Player(2));

    // Both matches progress independently past their countdowns
    let status_a = a1.next_status().await;
    let status_b = b1.next_status().await;
    assert_eq!(status_a.snake1.len(), 3);
    assert_eq!(status_b.snake1.len(), 3);
    drop((a2, b2));
}

#[tokio::test]
async fn test_turbo_commands_change_personal_flag() {
    let addr = boot(open_level(), fast_config()).await;

    let mut player1 = TestClient::connect(addr).await;
    assert_eq!(player1.next_message().await, ServerMessage::Player(1));
    let mut player2 = TestClient::connect(addr).await;
    assert_eq!(player2.next_message().await, ServerMessage::Player(2));

    // The debug refill makes the boost request succeed regardless of
    // pickup luck
    player1.send("#MaxTurbo");
    player1.send("#Turbo on");

    let mut saw_enabled = false;
    for _ in 0..20 {
        let status = player1.next_status().await;
        if status.turbo_enabled {
            assert!(status.turbo_left > 0);
            saw_enabled = true;
            break;
        }
    }
    assert!(saw_enabled, "boost never engaged");

    // The opponent's own flag stays off
    let status = player2.next_status().await;
    assert!(!status.turbo_enabled);
    drop(player2);
}

#[tokio::test]
async fn test_draw_when_both_hit_walls_head_on() {
    // Both heads start one cell away from a shared wall column, so they
    // crash into it on the same movement tick.
    let mut level = String::from("Corridor | 2 | Right | Left\n");
    for y in 1..=5 {
        for x in 1..=11 {
            if y == 1 || y == 5 || x == 6 {
                level.push('%');
            } else if y == 3 && x == 5 {
                level.push('1');
            } else if y == 3 && x == 7 {
                level.push('2');
            } else {
                level.push(' ');
            }
        }
        level.push('\n');
    }
    let map = SnakeMap::parse(&level, 11, 5).unwrap();
    let addr = boot(map, fast_config()).await;

    let mut player1 = TestClient::connect(addr).await;
    assert_eq!(player1.next_message().await, ServerMessage::Player(1));
    let mut player2 = TestClient::connect(addr).await;
    assert_eq!(player2.next_message().await, ServerMessage::Player(2));

    // Both snakes drive into the center wall on the same tick
    let ended = loop {
        match player1.next_message().await {
            ServerMessage::Draw => break true,
            ServerMessage::Status(_) | ServerMessage::Countdown(_) => continue,
            other => panic!("Unexpected message: {:?}", other),
        }
    };
    assert!(ended);
    drop(player2);
}
