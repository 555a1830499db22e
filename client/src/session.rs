//! Client session handler: a cheap handle over a background transport task.
//!
//! The handle serializes commands onto an outbound queue and pops decoded
//! updates off an inbound queue; the transport task owns the socket. When
//! the connection drops while a session is remembered, the task reconnects
//! with exponential backoff and re-issues a `join_game` for the remembered
//! session before anything else, so the server answers with a fresh full
//! projection and play resumes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use shared::{Command, CommandType, Update, UpdateType};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use serde_json::{Map, Value};

const BACKOFF_INITIAL: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(8);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to the server")]
    NotConnected,
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What it takes to rejoin after an unexpected drop. The session name is
/// filled in lazily for matchmade games, once the server announces it.
#[derive(Debug, Clone, Default)]
struct ResumeInfo {
    game_name: Option<String>,
    player_name: Option<String>,
    password: Option<String>,
}

pub struct SessionClient {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<Update>,
    connected: watch::Receiver<bool>,
    resume: Arc<Mutex<Option<ResumeInfo>>>,
}

impl SessionClient {
    /// Connects and spawns the transport task. The returned handle is
    /// ready to send immediately.
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        info!("connected to {}", addr);

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = watch::channel(true);
        let resume = Arc::new(Mutex::new(None));

        tokio::spawn(transport(
            addr.to_string(),
            stream,
            out_rx,
            in_tx,
            conn_tx,
            Arc::clone(&resume),
        ));

        Ok(Self {
            outbound: out_tx,
            inbound: in_rx,
            connected: conn_rx,
            resume,
        })
    }

    /// Queues a command for the transport task. Fails locally with
    /// [`ClientError::NotConnected`] while the connection is down.
    ///
    /// `create_game`, `join_game` and `find_game` also record the session
    /// coordinates used for automatic resume.
    pub fn send(&self, command: &Command) -> Result<(), ClientError> {
        if !*self.connected.borrow() {
            return Err(ClientError::NotConnected);
        }

        match command.command_type {
            CommandType::CreateGame | CommandType::JoinGame | CommandType::FindGame => {
                self.remember(command);
            }
            CommandType::Disconnect => {
                // Deliberate exit: nothing to resume.
                if let Ok(mut guard) = self.resume.lock() {
                    *guard = None;
                }
            }
            _ => {}
        }

        let line = command.to_line()?;
        self.outbound.send(line).map_err(|_| ClientError::NotConnected)
    }

    /// Pops the next pending update without blocking; `None` when the
    /// queue is empty.
    pub fn receive(&mut self) -> Option<Update> {
        self.inbound.try_recv().ok()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Waits until the transport reports an open connection. Returns
    /// immediately when already connected.
    pub async fn wait_connected(&mut self) {
        while !*self.connected.borrow() {
            if self.connected.changed().await.is_err() {
                return;
            }
        }
    }

    /// Tells the server this is a deliberate exit, then drops the handle,
    /// which stops the transport task.
    pub fn close(self) {
        let _ = self.send(&Command::new(CommandType::Disconnect, Map::new()));
    }

    fn remember(&self, command: &Command) {
        let info = ResumeInfo {
            game_name: command.str_field("game_name").map(str::to_string),
            player_name: command.str_field("player_name").map(str::to_string),
            password: command.str_field("password").map(str::to_string),
        };
        if let Ok(mut guard) = self.resume.lock() {
            *guard = Some(info);
        }
    }
}

/// Owns the socket for the handle's lifetime, reconnecting as needed.
/// Returns when the handle is dropped or when the connection dies with no
/// session to resume.
async fn transport(
    addr: String,
    stream: TcpStream,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    in_tx: mpsc::UnboundedSender<Update>,
    connected: watch::Sender<bool>,
    resume: Arc<Mutex<Option<ResumeInfo>>>,
) {
    let mut stream = stream;
    let mut reconnected = false;
    loop {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // After a reconnect the resume goes out before any queued command
        // so the server restores the seat first. The initial connection has
        // nothing to restore: whatever the handle sent is already in the
        // outbound queue.
        if reconnected {
            if let Some(mut line) = resume_line(&resume) {
                info!("re-issuing join for remembered session");
                line.push('\n');
                let _ = write_half.write_all(line.as_bytes()).await;
            }
        }

        let mut open = true;
        while open {
            tokio::select! {
                read = lines.next_line() => match read {
                    Ok(Some(line)) => match Update::from_line(&line) {
                        Ok(update) => {
                            remember_announced_session(&resume, &update);
                            if in_tx.send(update).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("malformed update from server: {}", e),
                    },
                    Ok(None) => {
                        info!("server closed the connection");
                        open = false;
                    }
                    Err(e) => {
                        warn!("read error: {}", e);
                        open = false;
                    }
                },

                queued = out_rx.recv() => match queued {
                    Some(mut line) => {
                        line.push('\n');
                        if write_half.write_all(line.as_bytes()).await.is_err() {
                            open = false;
                        }
                    }
                    None => return,
                },
            }
        }

        let _ = connected.send(false);
        if resume.lock().map(|guard| guard.is_none()).unwrap_or(true) {
            return;
        }

        let mut backoff = BACKOFF_INITIAL;
        stream = loop {
            tokio::select! {
                attempt = TcpStream::connect(&addr) => match attempt {
                    Ok(fresh) => break fresh,
                    Err(e) => {
                        warn!("reconnect to {} failed: {}, retrying in {:?}", addr, e, backoff);
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                    }
                },
                queued = out_rx.recv() => match queued {
                    Some(_) => warn!("dropping command while disconnected"),
                    None => return,
                },
            }
        };
        info!("reconnected to {}", addr);
        reconnected = true;
        let _ = connected.send(true);
    }
}

/// Matchmade sessions get their name from the server; capture it from the
/// announcement so a later resume has a target.
fn remember_announced_session(resume: &Mutex<Option<ResumeInfo>>, update: &Update) {
    if !matches!(update.update_type, UpdateType::GameCreated | UpdateType::GameStarted) {
        return;
    }
    if let Some(name) = update.str_field("game_name") {
        if let Ok(mut guard) = resume.lock() {
            if let Some(info) = guard.as_mut() {
                info.game_name = Some(name.to_string());
            }
        }
    }
}

fn resume_line(resume: &Mutex<Option<ResumeInfo>>) -> Option<String> {
    let guard = resume.lock().ok()?;
    let info = guard.as_ref()?;
    let game_name = info.game_name.as_ref()?;

    let mut fields = vec![("game_name".to_string(), Value::String(game_name.clone()))];
    if let Some(name) = &info.player_name {
        fields.push(("player_name".to_string(), Value::String(name.clone())));
    }
    if let Some(password) = &info.password {
        fields.push(("password".to_string(), Value::String(password.clone())));
    }
    Command::with_fields(CommandType::JoinGame, fields).to_line().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn read_wire_line(stream: &mut TcpStream) -> String {
        let mut line = String::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                return line;
            }
            line.push(byte[0] as char);
        }
    }

    async fn recv_update(client: &mut SessionClient) -> Update {
        timeout(WAIT, async {
            loop {
                if let Some(update) = client.receive() {
                    return update;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn sent_commands_arrive_as_wire_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = SessionClient::connect(&addr.to_string()).await.unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        let command = Command::with_fields(
            CommandType::CreateGame,
            [("game_name", json!("S")), ("player_name", json!("alice"))],
        );
        client.send(&command).unwrap();

        let line = timeout(WAIT, read_wire_line(&mut server_side)).await.unwrap();
        let decoded = Command::from_line(&line).unwrap();
        assert_eq!(decoded, command);
    }

    #[tokio::test]
    async fn first_command_after_connect_is_sent_exactly_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = SessionClient::connect(&addr.to_string()).await.unwrap();

        // Sent before the transport task ever runs: the remembered session
        // must not be replayed ahead of the queued command.
        let join = Command::with_fields(
            CommandType::JoinGame,
            [("game_name", json!("S")), ("player_name", json!("bob"))],
        );
        client.send(&join).unwrap();

        let (mut server_side, _) = listener.accept().await.unwrap();
        let line = timeout(WAIT, read_wire_line(&mut server_side)).await.unwrap();
        assert_eq!(Command::from_line(&line).unwrap(), join);

        let extra = timeout(Duration::from_millis(300), read_wire_line(&mut server_side)).await;
        assert!(extra.is_err(), "only the queued command reaches the server");
    }

    #[tokio::test]
    async fn updates_are_queued_until_received() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = SessionClient::connect(&addr.to_string()).await.unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        assert!(client.receive().is_none());

        let update = Update::with_fields(
            UpdateType::GameStateUpdate,
            [("game_name", json!("S")), ("current_player", json!("O"))],
        );
        let mut line = update.to_line().unwrap();
        line.push('\n');
        server_side.write_all(line.as_bytes()).await.unwrap();

        assert_eq!(recv_update(&mut client).await, update);
        assert!(client.receive().is_none());
    }

    #[tokio::test]
    async fn send_fails_locally_once_the_connection_drops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = SessionClient::connect(&addr.to_string()).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        assert!(client.is_connected());

        // No session was ever joined, so the drop is final.
        drop(server_side);
        timeout(WAIT, async {
            while client.is_connected() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let command = Command::with_fields(CommandType::MakeMove, [("row", json!(0))]);
        assert!(matches!(client.send(&command), Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn reconnect_reissues_join_for_the_remembered_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = SessionClient::connect(&addr.to_string()).await.unwrap();
        let (mut first, _) = listener.accept().await.unwrap();

        let join = Command::with_fields(
            CommandType::JoinGame,
            [
                ("game_name", json!("S")),
                ("player_name", json!("bob")),
                ("password", json!("pw")),
            ],
        );
        client.send(&join).unwrap();
        timeout(WAIT, read_wire_line(&mut first)).await.unwrap();

        // Simulate a crash of the first connection.
        drop(first);

        let (mut second, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let line = timeout(WAIT, read_wire_line(&mut second)).await.unwrap();
        let resumed = Command::from_line(&line).unwrap();

        assert_eq!(resumed.command_type, CommandType::JoinGame);
        assert_eq!(resumed.str_field("game_name"), Some("S"));
        assert_eq!(resumed.str_field("player_name"), Some("bob"));
        assert_eq!(resumed.str_field("password"), Some("pw"));

        timeout(WAIT, client.wait_connected()).await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn matchmade_session_name_is_captured_for_resume() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = SessionClient::connect(&addr.to_string()).await.unwrap();
        let (mut first, _) = listener.accept().await.unwrap();

        let find = Command::with_fields(CommandType::FindGame, [("player_name", json!("carol"))]);
        client.send(&find).unwrap();
        timeout(WAIT, read_wire_line(&mut first)).await.unwrap();

        let started = Update::with_fields(
            UpdateType::GameStarted,
            [("game_name", json!("match_1")), ("players", json!(["carol", "dave"]))],
        );
        let mut line = started.to_line().unwrap();
        line.push('\n');
        first.write_all(line.as_bytes()).await.unwrap();
        recv_update(&mut client).await;

        drop(first);

        let (mut second, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let line = timeout(WAIT, read_wire_line(&mut second)).await.unwrap();
        let resumed = Command::from_line(&line).unwrap();
        assert_eq!(resumed.command_type, CommandType::JoinGame);
        assert_eq!(resumed.str_field("game_name"), Some("match_1"));
        assert_eq!(resumed.str_field("player_name"), Some("carol"));
    }
}
