use serde::{Deserialize, Serialize};

pub mod codec;

pub use codec::{read_packet, write_packet, CodecError, MAX_FRAME_LEN};

pub const TOKEN_LENGTH: usize = 6;
/// Token alphabet with the visually ambiguous 0/O, 1/I/L removed.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const HOST_NAME: &str = "Host";
pub const MAX_NAME_LEN: usize = 16;
pub const DEFAULT_COUNTDOWN_SECS: u32 = 10;
pub const DEFAULT_AUTH_GRACE_MS: u64 = 500;
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_TOTAL_LAPS: u32 = 3;
pub const DEFAULT_TOTAL_CHECKPOINTS: usize = 6;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    AuthRequest {
        token: String,
    },
    SetPlayerName {
        name: String,
    },
    SelectVehicle {
        vehicle: u32,
    },
    PlayerReady,
    ReportFinish {
        elapsed_time: f32,
    },
    KickPlayer {
        player_id: u32,
    },
    ReturnToLobby,
    Leave,

    AuthResponse {
        code: AuthCode,
        message: String,
        player_id: Option<u32>,
    },
    RosterUpdate {
        players: Vec<PlayerInfo>,
    },
    RaceSetup {
        total_laps: u32,
        total_checkpoints: usize,
        spawns: Vec<SpawnAssignment>,
    },
    StartCountdown {
        seconds: u32,
    },
    StartRace,
    ShowFinalResults {
        ranking: Vec<RankingEntry>,
    },
    SessionReset,
    Disconnected {
        reason: String,
    },
}

impl Packet {
    /// Short variant name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::AuthRequest { .. } => "AuthRequest",
            Packet::SetPlayerName { .. } => "SetPlayerName",
            Packet::SelectVehicle { .. } => "SelectVehicle",
            Packet::PlayerReady => "PlayerReady",
            Packet::ReportFinish { .. } => "ReportFinish",
            Packet::KickPlayer { .. } => "KickPlayer",
            Packet::ReturnToLobby => "ReturnToLobby",
            Packet::Leave => "Leave",
            Packet::AuthResponse { .. } => "AuthResponse",
            Packet::RosterUpdate { .. } => "RosterUpdate",
            Packet::RaceSetup { .. } => "RaceSetup",
            Packet::StartCountdown { .. } => "StartCountdown",
            Packet::StartRace => "StartRace",
            Packet::ShowFinalResults { .. } => "ShowFinalResults",
            Packet::SessionReset => "SessionReset",
            Packet::Disconnected { .. } => "Disconnected",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AuthCode {
    Success,
    InvalidToken,
    SessionInProgress,
    ServerFull,
}

impl AuthCode {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthCode::Success)
    }
}

/// Position plus orientation quaternion (x, y, z, w).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: [0.0, 0.0, 0.0],
        rotation: [0.0, 0.0, 0.0, 1.0],
    };

    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: [x, y, z],
            ..Self::IDENTITY
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerInfo {
    pub player_id: u32,
    pub ordinal: u32,
    pub name: String,
    pub vehicle: u32,
    pub ready: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SpawnAssignment {
    pub player_id: u32,
    pub ordinal: u32,
    pub vehicle: u32,
    pub transform: Transform,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RankingEntry {
    /// 1-based finishing position
    pub position: u32,
    pub player_id: u32,
    pub name: String,
    pub elapsed_time: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_token_alphabet_excludes_ambiguous_characters() {
        for c in [b'0', b'O', b'1', b'I', b'L'] {
            assert!(!TOKEN_ALPHABET.contains(&c), "{} should be excluded", c as char);
        }
        assert!(TOKEN_ALPHABET.iter().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_transform_at() {
        let t = Transform::at(1.0, 2.0, 3.0);
        assert_eq!(t.position, [1.0, 2.0, 3.0]);
        assert_eq!(t.rotation, Transform::IDENTITY.rotation);
        assert_eq!(Transform::default(), Transform::IDENTITY);
    }

    #[test]
    fn test_auth_code_success() {
        assert!(AuthCode::Success.is_success());
        assert!(!AuthCode::InvalidToken.is_success());
        assert!(!AuthCode::SessionInProgress.is_success());
        assert!(!AuthCode::ServerFull.is_success());
    }

    #[test]
    fn test_packet_serialization_show_final_results() {
        let packet = Packet::ShowFinalResults {
            ranking: vec![
                RankingEntry {
                    position: 1,
                    player_id: 2,
                    name: "B".to_string(),
                    elapsed_time: 58.9,
                },
                RankingEntry {
                    position: 2,
                    player_id: 1,
                    name: "A".to_string(),
                    elapsed_time: 61.2,
                },
            ],
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::ShowFinalResults { ranking } => {
                assert_eq!(ranking.len(), 2);
                assert_eq!(ranking[0].name, "B");
                assert_eq!(ranking[0].position, 1);
                assert_approx_eq!(ranking[1].elapsed_time, 61.2, 0.0001);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_race_setup() {
        let packet = Packet::RaceSetup {
            total_laps: 3,
            total_checkpoints: 6,
            spawns: vec![SpawnAssignment {
                player_id: 7,
                ordinal: 0,
                vehicle: 2,
                transform: Transform::at(4.0, 0.0, -6.0),
            }],
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();
        assert_eq!(deserialized, packet);
    }

    #[test]
    fn test_packet_kind() {
        assert_eq!(Packet::PlayerReady.kind(), "PlayerReady");
        assert_eq!(
            Packet::AuthRequest {
                token: "ABC".to_string()
            }
            .kind(),
            "AuthRequest"
        );
        assert_eq!(Packet::StartRace.kind(), "StartRace");
    }
}
