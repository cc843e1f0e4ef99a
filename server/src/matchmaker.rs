//! First-come pairing of arriving connections into game sessions.
//!
//! At most one session is waiting for an opponent at a time. A new arrival
//! joins the waiting session if there is one, otherwise a fresh session is
//! spawned and becomes the waiting one. Any number of filled sessions run
//! concurrently; each reports back on a completion channel when it ends so
//! its entry can be dropped.

use crate::map::SnakeMap;
use crate::registry::NewConnection;
use crate::rng::GameRng;
use crate::session::{GameSession, SessionConfig, SessionHandle};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Matchmaker {
    map: Arc<SnakeMap>,
    config: SessionConfig,
    sessions: HashMap<u64, SessionHandle>,
    waiting: Option<u64>,
    next_id: u64,
}

impl Matchmaker {
    pub fn new(map: Arc<SnakeMap>, config: SessionConfig) -> Self {
        Self {
            map,
            config,
            sessions: HashMap::new(),
            waiting: None,
            next_id: 1,
        }
    }

    /// Consumes arrivals until the registry side hangs up.
    pub async fn run(mut self, mut arrivals: mpsc::UnboundedReceiver<NewConnection>) {
        let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
        loop {
            tokio::select! {
                arrival = arrivals.recv() => match arrival {
                    Some(arrival) => self.place(arrival, &finished_tx),
                    None => break,
                },
                Some(id) = finished_rx.recv() => {
                    self.sessions.remove(&id);
                    if self.waiting == Some(id) {
                        self.waiting = None;
                    }
                    info!("Session {} finished ({} sessions live)", id, self.sessions.len());
                }
            }
        }
    }

    fn place(&mut self, mut arrival: NewConnection, finished: &mpsc::UnboundedSender<u64>) {
        if let Some(id) = self.waiting.take() {
            if let Some(handle) = self.sessions.get(&id) {
                match handle.join(arrival.conn, arrival.events) {
                    Ok(()) => {
                        debug!("Paired {} into session {}", arrival.addr, id);
                        return;
                    }
                    // The waiting session died racing this arrival (its
                    // finished notice is still in flight); seat the
                    // arrival in a fresh session instead.
                    Err((conn, events)) => {
                        self.sessions.remove(&id);
                        arrival = NewConnection {
                            conn,
                            events,
                            addr: arrival.addr,
                        };
                    }
                }
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let rng = GameRng::from_entropy();
        let seed = rng.seed();
        let session = GameSession::new(id, Arc::clone(&self.map), self.config, rng);
        let handle = session.spawn(finished.clone());
        if handle.join(arrival.conn, arrival.events).is_err() {
            debug!("Session {} exited before its first join", id);
            return;
        }
        self.sessions.insert(id, handle);
        self.waiting = Some(id);
        info!("Opened session {} for {} (seed {})", id, arrival.addr, seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionEvent, ConnectionTracker};
    use crate::registry::Registry;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn next_line(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> String {
        loop {
            match timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap()
            {
                ConnectionEvent::Line(line) => return line,
                ConnectionEvent::Closed(reason) => panic!("Connection closed: {:?}", reason),
            }
        }
    }

    fn idle_config() -> SessionConfig {
        SessionConfig {
            countdown: Duration::from_secs(60),
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_pairs_arrivals_into_concurrent_sessions() {
        let map = Arc::new(SnakeMap::default_map(70, 40));
        let registry = Registry::bind("127.0.0.1:0").await.unwrap();
        let addr = registry.local_addr().unwrap();

        let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();
        tokio::spawn(registry.run(arrivals_tx));
        tokio::spawn(Matchmaker::new(map, idle_config()).run(arrivals_rx));

        // Two full sessions: seats repeat 1, 2, 1, 2
        let (_c1, mut rx1) = Connection::connect(addr).await.unwrap();
        assert_eq!(next_line(&mut rx1).await, "#Player 1");
        let (_c2, mut rx2) = Connection::connect(addr).await.unwrap();
        assert_eq!(next_line(&mut rx2).await, "#Player 2");
        let (_c3, mut rx3) = Connection::connect(addr).await.unwrap();
        assert_eq!(next_line(&mut rx3).await, "#Player 1");
        let (_c4, mut rx4) = Connection::connect(addr).await.unwrap();
        assert_eq!(next_line(&mut rx4).await, "#Player 2");

        // Both pairs entered their countdown independently
        assert_eq!(next_line(&mut rx1).await, "#Countdown 60");
        assert_eq!(next_line(&mut rx3).await, "#Countdown 60");
    }

    /// One accepted connection as the matchmaker would receive it, plus
    /// the client end driving it.
    async fn arrival_pair() -> (
        NewConnection,
        Connection,
        mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let (conn, events) = Connection::from_stream(stream, ConnectionTracker::new());
            NewConnection { conn, events, addr: peer }
        });
        let (client, client_rx) = Connection::connect(addr).await.unwrap();
        (accept.await.unwrap(), client, client_rx)
    }

    #[tokio::test]
    async fn test_stale_waiting_session_does_not_drop_arrival() {
        let map = Arc::new(SnakeMap::default_map(70, 40));
        let mut matchmaker = Matchmaker::new(Arc::clone(&map), idle_config());
        let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();

        // A waiting session whose lone player walks out, leaving the
        // finished notice unprocessed
        let session = GameSession::new(1, map, idle_config(), GameRng::seeded(5));
        let handle = session.spawn(finished_tx.clone());
        let (first, walkout, _walkout_rx) = arrival_pair().await;
        assert!(handle.join(first.conn, first.events).is_ok());
        walkout.abort();
        assert_eq!(
            timeout(Duration::from_secs(5), finished_rx.recv()).await.unwrap(),
            Some(1)
        );
        // Let the session task unwind so its channel is really gone
        tokio::time::sleep(Duration::from_millis(20)).await;
        matchmaker.sessions.insert(1, handle);
        matchmaker.waiting = Some(1);
        matchmaker.next_id = 2;

        // The next arrival must be reseated into a fresh session, not
        // dropped with the stale one
        let (arrival, _client, mut client_rx) = arrival_pair().await;
        matchmaker.place(arrival, &finished_tx);
        assert_eq!(next_line(&mut client_rx).await, "#Player 1");
        assert_eq!(matchmaker.waiting, Some(2));
        assert!(!matchmaker.sessions.contains_key(&1));
    }

    #[tokio::test]
    async fn test_waiting_session_is_replaced_after_walkout() {
        let map = Arc::new(SnakeMap::default_map(70, 40));
        let registry = Registry::bind("127.0.0.1:0").await.unwrap();
        let addr = registry.local_addr().unwrap();

        let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();
        tokio::spawn(registry.run(arrivals_tx));
        tokio::spawn(Matchmaker::new(map, idle_config()).run(arrivals_rx));

        let (c1, mut rx1) = Connection::connect(addr).await.unwrap();
        assert_eq!(next_line(&mut rx1).await, "#Player 1");
        c1.abort();
        // Give the walkout time to unwind
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The next two arrivals form a fresh pair
        let (_c2, mut rx2) = Connection::connect(addr).await.unwrap();
        assert_eq!(next_line(&mut rx2).await, "#Player 1");
        let (_c3, mut rx3) = Connection::connect(addr).await.unwrap();
        assert_eq!(next_line(&mut rx3).await, "#Player 2");
        assert_eq!(next_line(&mut rx2).await, "#Countdown 60");
    }
}
