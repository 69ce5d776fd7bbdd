//! Server network layer handling TCP connections and the session loop

use crate::auth::generate_token;
use crate::config::ServerConfig;
use crate::host::{bind_in_range, HostAnnouncement};
use crate::roster::RosterEvent;
use crate::session::{Effect, SessionContext};
use log::{debug, error, info, warn};
use shared::{read_packet, write_packet, CodecError, Packet};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from network tasks and timers to the session loop
#[derive(Debug)]
pub enum ServerMessage {
    ConnectionOpened {
        player_id: u32,
        addr: SocketAddr,
        reader: OwnedReadHalf,
        sender: mpsc::UnboundedSender<Packet>,
        writer: JoinHandle<()>,
    },
    PacketReceived {
        player_id: u32,
        packet: Packet,
    },
    ConnectionLost {
        player_id: u32,
    },
    CloseConnection {
        player_id: u32,
    },
    AuthDeadlineElapsed {
        player_id: u32,
    },
    CountdownElapsed {
        epoch: u64,
    },
    Shutdown,
}

struct Connection {
    addr: SocketAddr,
    sender: mpsc::UnboundedSender<Packet>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Lets other tasks stop a running server
#[derive(Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        let _ = self.server_tx.send(ServerMessage::Shutdown);
    }
}

/// Authoritative race server. All session state is mutated from [`Server::run`]
/// only; connection tasks just move packets in and out.
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    session: SessionContext,
    connections: HashMap<u32, Connection>,
    acceptor: Option<JoinHandle<()>>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    /// Binds the first free port in the configured range and creates the
    /// session, generating a token unless one was configured.
    pub async fn bind(config: &ServerConfig) -> Result<Self, BoxError> {
        let listener = bind_in_range(&config.host, config.ports.clone()).await?;
        let token = config
            .token
            .clone()
            .unwrap_or_else(|| generate_token(&mut rand::thread_rng()));

        Self::with_listener(listener, SessionContext::new(token, config.race.clone()))
    }

    pub fn with_listener(listener: TcpListener, session: SessionContext) -> Result<Self, BoxError> {
        let local_addr = listener.local_addr()?;
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            session,
            connections: HashMap::new(),
            acceptor: None,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn token(&self) -> &str {
        self.session.token()
    }

    pub fn announcement(&self) -> HostAnnouncement {
        HostAnnouncement::new(self.local_addr, self.session.token())
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RosterEvent> {
        self.session.subscribe()
    }

    /// Spawns the task accepting new TCP connections
    fn spawn_acceptor(&mut self) -> Result<(), BoxError> {
        let listener = self.listener.take().ok_or("Server is already running")?;
        let server_tx = self.server_tx.clone();

        self.acceptor = Some(tokio::spawn(async move {
            let mut next_player_id: u32 = 1;

            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                        }

                        let player_id = next_player_id;
                        next_player_id += 1;

                        let (reader, writer) = stream.into_split();
                        let (sender, outbox) = mpsc::unbounded_channel();
                        let writer = tokio::spawn(write_loop(player_id, writer, outbox));

                        let opened = ServerMessage::ConnectionOpened {
                            player_id,
                            addr,
                            reader,
                            sender,
                            writer,
                        };
                        if server_tx.send(opened).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));

        Ok(())
    }

    fn open_connection(
        &mut self,
        player_id: u32,
        addr: SocketAddr,
        reader: OwnedReadHalf,
        sender: mpsc::UnboundedSender<Packet>,
        writer: JoinHandle<()>,
    ) {
        info!("Connection {} opened from {}", player_id, addr);

        let reader = tokio::spawn(read_loop(player_id, reader, self.server_tx.clone()));
        self.connections.insert(
            player_id,
            Connection {
                addr,
                sender,
                reader,
                writer,
            },
        );
        let effects = self.session.on_connect(player_id, addr);
        self.apply(effects);
    }

    /// Tears down a connection and lets the session react to the departure.
    fn drop_connection(&mut self, player_id: u32) {
        let Some(connection) = self.connections.remove(&player_id) else {
            return;
        };
        info!("Connection {} from {} closed", player_id, connection.addr);

        // Dropping the sender lets the writer drain its queue and shut down
        connection.reader.abort();
        drop(connection.sender);

        let effects = self.session.on_disconnect(player_id);
        self.apply(effects);
    }

    fn send_to(&self, player_id: u32, packet: Packet) {
        match self.connections.get(&player_id) {
            Some(connection) => {
                if connection.sender.send(packet).is_err() {
                    debug!("Writer for connection {} already gone", player_id);
                }
            }
            None => debug!("No connection {} to send {} to", player_id, packet.kind()),
        }
    }

    /// Carries out session effects in order
    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { player_id, packet } => self.send_to(player_id, packet),

                Effect::Broadcast(packet) => {
                    for player_id in self.session.roster().player_ids() {
                        self.send_to(player_id, packet.clone());
                    }
                }

                Effect::Close { player_id, after } => {
                    let server_tx = self.server_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = server_tx.send(ServerMessage::CloseConnection { player_id });
                    });
                }

                Effect::AuthDeadline { player_id, after } => {
                    let server_tx = self.server_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = server_tx.send(ServerMessage::AuthDeadlineElapsed { player_id });
                    });
                }

                Effect::ScheduleRaceStart { epoch, after } => {
                    let server_tx = self.server_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = server_tx.send(ServerMessage::CountdownElapsed { epoch });
                    });
                }
            }
        }
    }

    /// Main server loop; returns after [`ServerHandle::shutdown`].
    pub async fn run(&mut self) -> Result<(), BoxError> {
        self.spawn_acceptor()?;
        info!("Server listening on {}", self.local_addr);

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::ConnectionOpened {
                    player_id,
                    addr,
                    reader,
                    sender,
                    writer,
                } => self.open_connection(player_id, addr, reader, sender, writer),

                ServerMessage::PacketReceived { player_id, packet } => {
                    if !self.connections.contains_key(&player_id) {
                        continue;
                    }
                    debug!("{} from connection {}", packet.kind(), player_id);
                    let effects = self.session.on_packet(player_id, packet);
                    self.apply(effects);
                }

                ServerMessage::ConnectionLost { player_id }
                | ServerMessage::CloseConnection { player_id } => {
                    self.drop_connection(player_id);
                }

                ServerMessage::AuthDeadlineElapsed { player_id } => {
                    if !self.connections.contains_key(&player_id) {
                        continue;
                    }
                    let effects = self.session.on_auth_deadline(player_id);
                    self.apply(effects);
                }

                ServerMessage::CountdownElapsed { epoch } => {
                    let effects = self.session.on_countdown_elapsed(epoch);
                    self.apply(effects);
                }

                ServerMessage::Shutdown => break,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&mut self) {
        info!("Server shutting down");

        let effects = self.session.shutdown();
        self.apply(effects);

        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }

        let grace = self.session.coordinator().settings().auth_grace;
        let mut writers = Vec::new();
        for (_, connection) in self.connections.drain() {
            connection.reader.abort();
            writers.push(connection.writer);
        }

        for writer in writers {
            if tokio::time::timeout(grace, writer).await.is_err() {
                warn!("Writer did not flush before shutdown");
            }
        }
    }
}

/// Forwards decoded packets until the peer goes away
async fn read_loop(
    player_id: u32,
    mut reader: OwnedReadHalf,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        match read_packet(&mut reader).await {
            Ok(packet) => {
                if server_tx
                    .send(ServerMessage::PacketReceived { player_id, packet })
                    .is_err()
                {
                    return;
                }
            }
            Err(CodecError::ConnectionClosed) => {
                debug!("Connection {} closed by peer", player_id);
                break;
            }
            Err(e) => {
                warn!("Dropping connection {}: {}", player_id, e);
                break;
            }
        }
    }

    let _ = server_tx.send(ServerMessage::ConnectionLost { player_id });
}

/// Writes queued packets; ends once every sender is dropped
async fn write_loop(
    player_id: u32,
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<Packet>,
) {
    while let Some(packet) = outbox.recv().await {
        if let Err(e) = write_packet(&mut writer, &packet).await {
            debug!("Failed to send {} to {}: {}", packet.kind(), player_id, e);
            break;
        }
    }

    let _ = writer.shutdown().await;
}
