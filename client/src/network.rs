use crate::lobby::{ClientPhase, LobbyView};
use crate::progress::{FinishLineOutcome, ProgressTracker, StuckDetector, VehicleBody};
use log::{debug, error, info, warn};
use shared::{read_packet, write_packet, AuthCode, CodecError, Packet, Transform};
use std::io;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};

pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);
const TICK_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Rejected by server ({code:?}): {message}")]
    Rejected { code: AuthCode, message: String },

    #[error("No answer from server within {0:?}")]
    Timeout(Duration),

    #[error("Unexpected {0} during handshake")]
    UnexpectedPacket(&'static str),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the race server
    pub address: String,
    pub name: String,
    pub token: String,
    pub vehicle: u32,
    /// Send `PlayerReady` on join and after every lobby reset
    pub auto_ready: bool,
    pub auth_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7777".to_string(),
            name: "Player".to_string(),
            token: String::new(),
            vehicle: 0,
            auto_ready: false,
            auth_timeout: AUTH_TIMEOUT,
        }
    }
}

/// Reported by the world-geometry collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    CheckpointTriggered { index: usize, transform: Transform },
    FinishLinePassed,
    RespawnRequested,
    SpeedSample { speed: f32 },
}

/// Player intents from the lobby screen
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyCommand {
    Ready,
    SelectVehicle(u32),
    Kick(u32),
    ReturnToLobby,
    Leave,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Disconnected { reason: String },
    Left,
}

pub struct Client {
    writer: OwnedWriteHalf,
    incoming: mpsc::UnboundedReceiver<Packet>,
    config: ClientConfig,
    player_id: u32,

    view: LobbyView,
    view_tx: watch::Sender<LobbyView>,

    tracker: Option<ProgressTracker>,
    stuck: StuckDetector,
    /// Latest speed sample not yet fed to the stuck detector
    last_speed: Option<f32>,
    /// Racing time since the stuck detector last saw a sample
    since_sample: f32,
}

/// Connects, authenticates and registers the display name.
pub async fn join(config: ClientConfig) -> Result<Client, ClientError> {
    info!("Connecting to {}...", config.address);
    let stream = TcpStream::connect(&config.address)
        .await
        .map_err(|source| ClientError::Connect {
            addr: config.address.clone(),
            source,
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY: {}", e);
    }

    let (mut reader, mut writer) = stream.into_split();
    write_packet(
        &mut writer,
        &Packet::AuthRequest {
            token: config.token.clone(),
        },
    )
    .await?;

    let response = timeout(config.auth_timeout, read_packet(&mut reader))
        .await
        .map_err(|_| ClientError::Timeout(config.auth_timeout))??;

    let player_id = match response {
        Packet::AuthResponse {
            code: AuthCode::Success,
            player_id: Some(player_id),
            ..
        } => player_id,
        Packet::AuthResponse { code, message, .. } if !code.is_success() => {
            return Err(ClientError::Rejected { code, message });
        }
        other => return Err(ClientError::UnexpectedPacket(other.kind())),
    };
    info!("Joined as player {}", player_id);

    write_packet(
        &mut writer,
        &Packet::SetPlayerName {
            name: config.name.clone(),
        },
    )
    .await?;
    if config.vehicle != 0 {
        write_packet(
            &mut writer,
            &Packet::SelectVehicle {
                vehicle: config.vehicle,
            },
        )
        .await?;
    }

    let (incoming_tx, incoming) = mpsc::unbounded_channel();
    tokio::spawn(read_loop(reader, incoming_tx));

    let view = LobbyView::new(player_id);
    let (view_tx, _) = watch::channel(view.clone());

    Ok(Client {
        writer,
        incoming,
        config,
        player_id,
        view,
        view_tx,
        tracker: None,
        stuck: StuckDetector::default(),
        last_speed: None,
        since_sample: 0.0,
    })
}

/// Reads frames off the socket; the channel closing means the connection is gone.
async fn read_loop(mut reader: OwnedReadHalf, incoming_tx: mpsc::UnboundedSender<Packet>) {
    loop {
        match read_packet(&mut reader).await {
            Ok(packet) => {
                if incoming_tx.send(packet).is_err() {
                    return;
                }
            }
            Err(CodecError::ConnectionClosed) => {
                info!("Server closed the connection");
                return;
            }
            Err(e) => {
                error!("Error receiving packet: {}", e);
                return;
            }
        }
    }
}

impl Client {
    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub fn view(&self) -> &LobbyView {
        &self.view
    }

    /// Presentation layers watch this for every change to the lobby view
    pub fn subscribe(&self) -> watch::Receiver<LobbyView> {
        self.view_tx.subscribe()
    }

    pub fn tracker(&self) -> Option<&ProgressTracker> {
        self.tracker.as_ref()
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<(), CodecError> {
        write_packet(&mut self.writer, packet).await
    }

    fn publish_view(&self) {
        self.view_tx.send_replace(self.view.clone());
    }

    fn lost(&mut self, reason: String) -> SessionOutcome {
        warn!("Disconnected: {}", reason);
        self.tracker = None;
        self.view.connection_lost(&reason);
        self.publish_view();
        SessionOutcome::Disconnected { reason }
    }

    async fn handle_packet<B: VehicleBody>(
        &mut self,
        packet: Packet,
        body: &mut B,
    ) -> Result<Option<SessionOutcome>, CodecError> {
        let changed = self.view.apply(&packet);

        match packet {
            Packet::RaceSetup { .. } => {
                let spawn = self
                    .view
                    .local_spawn()
                    .map(|s| s.transform)
                    .unwrap_or(Transform::IDENTITY);
                body.set_pose(&spawn);
                body.stop();
                self.tracker = Some(ProgressTracker::new(self.view.layout(), true).with_spawn(spawn));
            }

            Packet::StartRace => {
                if let Some(tracker) = self.tracker.as_mut() {
                    tracker.enable_racing();
                }
                self.stuck.reset();
                self.last_speed = None;
                self.since_sample = 0.0;
            }

            Packet::ShowFinalResults { ranking } => {
                for entry in &ranking {
                    info!(
                        "{}. {} {:.3}s",
                        entry.position, entry.name, entry.elapsed_time
                    );
                }
            }

            Packet::SessionReset => {
                self.tracker = None;
                if self.config.auto_ready {
                    self.send_packet(&Packet::PlayerReady).await?;
                }
            }

            Packet::Disconnected { reason } => {
                return Ok(Some(self.lost(reason)));
            }

            Packet::AuthResponse { .. } => debug!("Ignoring repeated AuthResponse"),

            _ => {}
        }

        if changed {
            self.publish_view();
        }
        Ok(None)
    }

    async fn handle_track_event<B: VehicleBody>(
        &mut self,
        event: TrackEvent,
        body: &mut B,
    ) -> Result<(), CodecError> {
        let Some(tracker) = self.tracker.as_mut() else {
            return Ok(());
        };

        match event {
            TrackEvent::CheckpointTriggered { index, transform } => {
                tracker.on_checkpoint_triggered(index, transform);
            }
            TrackEvent::FinishLinePassed => {
                if let FinishLineOutcome::Finished { elapsed_time } = tracker.on_finish_line_passed() {
                    self.view.mark_finished();
                    self.publish_view();
                    self.send_packet(&Packet::ReportFinish { elapsed_time })
                        .await?;
                }
            }
            TrackEvent::RespawnRequested => {
                tracker.respawn_to_last_checkpoint(body);
            }
            TrackEvent::SpeedSample { speed } => {
                self.last_speed = Some(speed);
            }
        }
        Ok(())
    }

    async fn handle_command(
        &mut self,
        command: LobbyCommand,
    ) -> Result<Option<SessionOutcome>, CodecError> {
        let packet = match command {
            LobbyCommand::Ready => Packet::PlayerReady,
            LobbyCommand::SelectVehicle(vehicle) => Packet::SelectVehicle { vehicle },
            LobbyCommand::Kick(player_id) => Packet::KickPlayer { player_id },
            LobbyCommand::ReturnToLobby => Packet::ReturnToLobby,
            LobbyCommand::Leave => {
                self.send_packet(&Packet::Leave).await?;
                self.tracker = None;
                self.view.connection_lost("Left the session");
                self.publish_view();
                return Ok(Some(SessionOutcome::Left));
            }
        };

        self.send_packet(&packet).await?;
        Ok(None)
    }

    fn tick<B: VehicleBody>(&mut self, dt: f32, body: &mut B) {
        let Some(tracker) = self.tracker.as_mut() else {
            return;
        };
        if !tracker.is_racing() {
            return;
        }

        tracker.tick(dt);

        // Without a fresh sample there is nothing to judge. A sample stands
        // for the whole stretch since the previous one.
        self.since_sample += dt;
        let Some(speed) = self.last_speed.take() else {
            return;
        };
        let elapsed = std::mem::take(&mut self.since_sample);
        if self.stuck.sample(speed, elapsed) {
            info!("Vehicle stuck, respawning at last checkpoint");
            tracker.respawn_to_last_checkpoint(body);
        }
    }

    /// Runs the session until the connection is lost or the player leaves.
    /// Either way the view ends in [`ClientPhase::PreRace`].
    pub async fn run<B: VehicleBody>(
        &mut self,
        mut events: mpsc::UnboundedReceiver<TrackEvent>,
        mut commands: mpsc::UnboundedReceiver<LobbyCommand>,
        body: &mut B,
    ) -> SessionOutcome {
        if self.config.auto_ready {
            if let Err(e) = self.send_packet(&Packet::PlayerReady).await {
                return self.lost(e.to_string());
            }
        }

        let mut clock = interval(TICK_INTERVAL);
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            let step = tokio::select! {
                incoming = self.incoming.recv() => match incoming {
                    Some(packet) => self.handle_packet(packet, body).await,
                    None => return self.lost("Connection to server lost".to_string()),
                },

                Some(event) = events.recv() => {
                    self.handle_track_event(event, body).await.map(|_| None)
                }

                Some(command) = commands.recv() => self.handle_command(command).await,

                _ = clock.tick() => {
                    let now = Instant::now();
                    let dt = (now - last_tick).as_secs_f32();
                    last_tick = now;
                    self.tick(dt, body);
                    Ok(None)
                }
            };

            match step {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => {}
                Err(e) => return self.lost(e.to_string()),
            }
        }
    }

    pub fn phase(&self) -> ClientPhase {
        self.view.phase()
    }
}
