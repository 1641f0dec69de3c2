use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::station::Station;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Presentation clients check this on connect and can refuse
/// to talk to an incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Full published state of the controller.  Invariant: `now_playing` is
/// `None` exactly when `playback` is `Stopped`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub stations: Vec<Station>,
    pub playback: PlaybackState,
    pub now_playing: Option<Station>,
    pub metadata: Metadata,
}

/// Commands sent from the presentation layer into the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { station: Station },
    Toggle,
    Stop,
    SetStations { stations: Vec<Station> },
    GetState,
}

/// Messages pushed from the core out to presentation clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        state: StateSnapshot,
    },
    State {
        state: StateSnapshot,
    },
    Metadata {
        metadata: Metadata,
    },
    Error {
        title: String,
        message: String,
    },
    Notice {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encode_decode() {
        let station = Station::new("Jazz FM", "http://jazz.example/stream");
        let msg = Message::Command(Command::Play {
            station: station.clone(),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Play { station: s }) => assert_eq!(s, station),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_hello_encode_decode() {
        let state = StateSnapshot {
            stations: vec![Station::new("A", "http://a.example/stream")],
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.playback, PlaybackState::Stopped);
                assert!(state.now_playing.is_none());
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_needs_full_frame() {
        let msg = Message::Command(Command::Stop);
        let encoded = msg.encode().unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }
}
