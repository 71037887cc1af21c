//! Transport packets and datagram framing
//!
//! # Wire Format
//!
//! ```text
//! [TTTP][version:u16][length:u32][bitcode payload...]
//! ```

use bitcode::{Decode, Encode};

use super::Channel;

/// Packet magic bytes
pub const PACKET_MAGIC: [u8; 4] = *b"TTTP";

/// Current packet format version
pub const PACKET_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + length (4)
pub const PACKET_HEADER_SIZE: usize = 10;

/// One datagram's worth of transport traffic
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Packet {
    /// Client -> host: please accept me
    ConnectRequest,
    /// Host -> client: accepted
    ConnectAccept,
    /// Either side: closing the connection
    Disconnect,
    /// Keepalive when there is nothing else to send
    Heartbeat,
    /// Application payload
    Data {
        channel: Channel,
        sequence: u32,
        payload: Vec<u8>,
    },
    /// Acknowledges a reliable `Data` packet
    Ack { sequence: u32 },
}

/// Errors that can occur when decoding a datagram
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("datagram too short for packet header")]
    TooShort,
    #[error("invalid packet magic bytes")]
    InvalidMagic,
    #[error("packet version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u16, got: u16 },
    #[error("incomplete payload: expected {expected} bytes, got {got}")]
    IncompletePayload { expected: usize, got: usize },
    #[error("failed to decode packet: {0}")]
    DecodeFailed(String),
}

impl Packet {
    /// Serialize with framing header
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = bitcode::encode(self);
        let mut bytes = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());

        bytes.extend_from_slice(&PACKET_MAGIC);
        bytes.extend_from_slice(&PACKET_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);

        bytes
    }

    /// Deserialize, validating magic, version and length first
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(PacketError::TooShort);
        }

        if bytes[0..4] != PACKET_MAGIC {
            return Err(PacketError::InvalidMagic);
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != PACKET_VERSION {
            return Err(PacketError::VersionMismatch {
                expected: PACKET_VERSION,
                got: version,
            });
        }

        let length = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let available = bytes.len() - PACKET_HEADER_SIZE;
        if available < length {
            return Err(PacketError::IncompletePayload {
                expected: length,
                got: available,
            });
        }

        let payload = &bytes[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + length];
        bitcode::decode(payload).map_err(|e| PacketError::DecodeFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_packet_roundtrip() {
        let packet = Packet::Data {
            channel: Channel::ReliableOrdered,
            sequence: 42,
            payload: vec![3, 1, 2, 0],
        };
        assert_eq!(Packet::from_bytes(&packet.to_bytes()), Ok(packet));
    }

    #[test]
    fn test_header_layout() {
        let bytes = Packet::Heartbeat.to_bytes();
        assert_eq!(&bytes[0..4], b"TTTP");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), PACKET_VERSION);
        let length = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        assert_eq!(bytes.len(), PACKET_HEADER_SIZE + length);
    }

    #[test]
    fn test_too_short() {
        assert_eq!(Packet::from_bytes(b"TTTP"), Err(PacketError::TooShort));
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = Packet::ConnectRequest.to_bytes();
        bytes[0] = b'X';
        assert_eq!(Packet::from_bytes(&bytes), Err(PacketError::InvalidMagic));
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = Packet::ConnectAccept.to_bytes();
        bytes[4..6].copy_from_slice(&99u16.to_le_bytes());
        assert_eq!(
            Packet::from_bytes(&bytes),
            Err(PacketError::VersionMismatch {
                expected: PACKET_VERSION,
                got: 99
            })
        );
    }

    #[test]
    fn test_incomplete_payload() {
        let bytes = Packet::Data {
            channel: Channel::Unreliable,
            sequence: 0,
            payload: vec![0; 32],
        }
        .to_bytes();
        let truncated = &bytes[..bytes.len() - 4];
        assert!(matches!(
            Packet::from_bytes(truncated),
            Err(PacketError::IncompletePayload { .. })
        ));
    }
}
