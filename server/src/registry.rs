//! TCP accept loop. Every accepted socket is wrapped into a line-framed
//! connection and handed to the matchmaker for seating.

use crate::connection::{Connection, ConnectionEvent, ConnectionTracker};
use log::{info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// A freshly accepted connection, not yet seated in a session.
pub struct NewConnection {
    pub conn: Connection,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pub addr: SocketAddr,
}

pub struct Registry {
    listener: TcpListener,
    tracker: ConnectionTracker,
}

impl Registry {
    pub async fn bind(addr: &str) -> std::io::Result<Registry> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Registry {
            listener,
            tracker: ConnectionTracker::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accepts connections forever, until the arrival channel is dropped.
    pub async fn run(self, arrivals: mpsc::UnboundedSender<NewConnection>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Could not set TCP_NODELAY for {}: {}", addr, e);
                    }
                    let (conn, events) = Connection::from_stream(stream, self.tracker.clone());
                    info!("Accepted {} ({} connections live)", addr, self.tracker.len());
                    if arrivals.send(NewConnection { conn, events, addr }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_accepted_connections_are_delivered() {
        let registry = Registry::bind("127.0.0.1:0").await.unwrap();
        let addr = registry.local_addr().unwrap();
        let tracker = registry.tracker().clone();

        let (arrivals_tx, mut arrivals_rx) = mpsc::unbounded_channel();
        tokio::spawn(registry.run(arrivals_tx));

        let (client, _client_rx) = Connection::connect(addr).await.unwrap();
        let arrival = timeout(Duration::from_secs(5), arrivals_rx.recv())
            .await
            .unwrap()
            .unwrap();

        client.send("#D U");
        let mut events = arrival.events;
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap() {
            ConnectionEvent::Line(line) => assert_eq!(line, "#D U"),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(tracker.len(), 1);
        assert!(arrival.addr.ip().is_loopback());
    }
}
