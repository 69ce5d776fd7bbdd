//! Server configuration
//!
//! The binary parses its command line with clap and converts it into a
//! [`ServerConfig`]; everything below the network layer only sees the plain
//! [`RaceSettings`] struct.

use clap::Parser;
use shared::{
    Transform, DEFAULT_AUTH_GRACE_MS, DEFAULT_AUTH_TIMEOUT_MS, DEFAULT_COUNTDOWN_SECS,
    DEFAULT_TOTAL_CHECKPOINTS, DEFAULT_TOTAL_LAPS,
};
use std::ops::RangeInclusive;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid port range '{0}', expected START-END")]
    InvalidPortRange(String),

    #[error("A race needs at least one lap")]
    NoLaps,

    #[error("A track needs at least one checkpoint")]
    NoCheckpoints,

    #[error("max players must be at least 1")]
    NoPlayers,

    #[error("Token must not be empty")]
    EmptyToken,
}

/// Command line arguments for the race server
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Ports to try, first free one wins
    #[arg(short, long, default_value = "7777-7787")]
    pub port_range: String,

    /// Shared session token (generated when omitted)
    #[arg(short, long)]
    pub token: Option<String>,

    /// Countdown before the race starts, in seconds
    #[arg(short, long, default_value_t = DEFAULT_COUNTDOWN_SECS)]
    pub countdown: u32,

    /// Laps per race
    #[arg(short, long, default_value_t = DEFAULT_TOTAL_LAPS)]
    pub laps: u32,

    /// Checkpoints per lap
    #[arg(long, default_value_t = DEFAULT_TOTAL_CHECKPOINTS)]
    pub checkpoints: usize,

    /// Maximum number of participants
    #[arg(short, long, default_value = "8")]
    pub max_players: usize,

    /// Delay before a rejected connection is closed, in milliseconds
    #[arg(long, default_value_t = DEFAULT_AUTH_GRACE_MS)]
    pub grace_ms: u64,

    /// Time a new connection gets to present its token, in milliseconds
    #[arg(long, default_value_t = DEFAULT_AUTH_TIMEOUT_MS)]
    pub auth_timeout_ms: u64,
}

/// Race rules shared by the coordinator and the authenticator
#[derive(Debug, Clone)]
pub struct RaceSettings {
    pub total_laps: u32,
    pub total_checkpoints: usize,
    pub countdown: Duration,
    pub auth_grace: Duration,
    pub auth_timeout: Duration,
    pub max_players: usize,
    pub spawn_points: Vec<Transform>,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            total_laps: DEFAULT_TOTAL_LAPS,
            total_checkpoints: DEFAULT_TOTAL_CHECKPOINTS,
            countdown: Duration::from_secs(DEFAULT_COUNTDOWN_SECS as u64),
            auth_grace: Duration::from_millis(DEFAULT_AUTH_GRACE_MS),
            auth_timeout: Duration::from_millis(DEFAULT_AUTH_TIMEOUT_MS),
            max_players: 8,
            spawn_points: starting_grid(8),
        }
    }
}

impl RaceSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_laps == 0 {
            return Err(ConfigError::NoLaps);
        }
        if self.total_checkpoints == 0 {
            return Err(ConfigError::NoCheckpoints);
        }
        if self.max_players == 0 {
            return Err(ConfigError::NoPlayers);
        }
        Ok(())
    }

    /// Countdown length as announced to clients, rounded up to whole seconds.
    pub fn countdown_seconds(&self) -> u32 {
        self.countdown.as_secs_f32().ceil() as u32
    }
}

/// Two-column staggered grid behind the start line.
pub fn starting_grid(slots: usize) -> Vec<Transform> {
    (0..slots)
        .map(|slot| {
            let column = (slot % 2) as f32;
            let row = (slot / 2) as f32;
            Transform::at(column * 4.0 - 2.0, 0.0, -(row * 8.0 + column * 4.0))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub ports: RangeInclusive<u16>,
    pub token: Option<String>,
    pub race: RaceSettings,
}

impl TryFrom<Args> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let ports = parse_port_range(&args.port_range)?;

        let token = match args.token {
            Some(token) if token.trim().is_empty() => return Err(ConfigError::EmptyToken),
            Some(token) => Some(token.trim().to_string()),
            None => None,
        };

        let race = RaceSettings {
            total_laps: args.laps,
            total_checkpoints: args.checkpoints,
            countdown: Duration::from_secs(args.countdown as u64),
            auth_grace: Duration::from_millis(args.grace_ms),
            auth_timeout: Duration::from_millis(args.auth_timeout_ms),
            max_players: args.max_players,
            spawn_points: starting_grid(args.max_players),
        };
        race.validate()?;

        Ok(Self {
            host: args.host,
            ports,
            token,
            race,
        })
    }
}

/// Parses `START-END` or a single port.
pub fn parse_port_range(raw: &str) -> Result<RangeInclusive<u16>, ConfigError> {
    let invalid = || ConfigError::InvalidPortRange(raw.to_string());

    let (start, end) = match raw.split_once('-') {
        Some((start, end)) => (start.trim(), end.trim()),
        None => (raw.trim(), raw.trim()),
    };

    let start: u16 = start.parse().map_err(|_| invalid())?;
    let end: u16 = end.parse().map_err(|_| invalid())?;

    if start > end {
        return Err(invalid());
    }
    Ok(start..=end)
}
