//! Server network layer: TCP accept loop and the main event loop.
//!
//! One lightweight task per connection reads newline-delimited JSON
//! commands; a companion task drains that connection's outbound queue. All
//! events funnel into a single main loop that owns the connection manager
//! and the session registry, processing each command to completion before
//! the next. That loop is both the registry's atomicity guarantee and the
//! per-session mutual exclusion: updates reach each player in the order
//! their commands were accepted.

use std::io;
use std::net::SocketAddr;

use log::{debug, info, warn};
use shared::{Command, GameFactory};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::broadcast::Broadcaster;
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionManager, Player};
use crate::registry::SessionRegistry;
use crate::router::Router;

/// Messages from per-connection read tasks to the main loop.
#[derive(Debug)]
pub enum ServerEvent {
    Line { conn: ConnectionId, line: String },
    Closed { conn: ConnectionId },
}

pub struct GameServer {
    listener: TcpListener,
    connections: ConnectionManager,
    registry: SessionRegistry,
    router: Router,
    broadcaster: Broadcaster,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl GameServer {
    /// Binds the listener and assembles a fresh server around the supplied
    /// game factory.
    pub async fn bind(addr: &str, factory: GameFactory) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("server listening on {}", listener.local_addr()?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            listener,
            connections: ConnectionManager::new(),
            registry: SessionRegistry::new(factory),
            router: Router::new(),
            broadcaster: Broadcaster::new(),
            events_tx,
            events_rx,
        })
    }

    /// The bound address; lets tests run against an ephemeral port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop and the main event loop until shutdown.
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.register_connection(stream, addr),
                        Err(e) => warn!("failed to accept connection: {}", e),
                    }
                }

                event = self.events_rx.recv() => {
                    match event {
                        Some(ServerEvent::Line { conn, line }) => self.handle_line(conn, line),
                        Some(ServerEvent::Closed { conn }) => self.handle_closed(conn),
                        None => {
                            info!("event channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn register_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn = self.connections.next_id();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (read_half, mut write_half) = stream.into_split();

        // Writer task: drains this connection's outbound queue. A write
        // failure just ends the task; the read side observes the close.
        tokio::spawn(async move {
            while let Some(mut line) = out_rx.recv().await {
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        // Reader task: forwards lines until EOF or error, then reports the
        // close. Cancelling this task never touches other connections.
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if events_tx.send(ServerEvent::Line { conn, line }).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("read error on connection {}: {}", conn, e);
                        break;
                    }
                }
            }
            let _ = events_tx.send(ServerEvent::Closed { conn });
        });

        let player = Player::new();
        info!("new connection {} from {} (player {})", conn, addr, player.id);
        self.connections.insert(conn, ConnectionHandle { addr, tx: out_tx }, player);
    }

    fn handle_line(&mut self, conn: ConnectionId, line: String) {
        let command = match Command::from_line(&line) {
            Ok(command) => command,
            Err(e) => {
                // Protocol error: logged, connection kept.
                warn!("malformed message on connection {}: {}", conn, e);
                return;
            }
        };
        debug!("connection {} -> {:?}", conn, command.command_type);

        let dead = self.router.handle(
            &mut self.connections,
            &mut self.registry,
            &self.broadcaster,
            conn,
            command,
        );
        self.reap(dead);
    }

    fn handle_closed(&mut self, conn: ConnectionId) {
        if let Some(player) = self.connections.remove(conn) {
            info!("player {} disconnected", player.id);
            let dead = self
                .registry
                .disconnect(&mut self.connections, &self.broadcaster, &player.id);
            self.reap(dead);
        }
    }

    /// Delivery failures surface as disconnects for the affected players
    /// only; processed transitively until quiescent.
    fn reap(&mut self, mut dead: Vec<String>) {
        while let Some(player_id) = dead.pop() {
            if let Some(conn) = self.connections.connection_of(&player_id) {
                self.connections.remove(conn);
            }
            dead.extend(
                self.registry
                    .disconnect(&mut self.connections, &self.broadcaster, &player_id),
            );
        }
    }
}
