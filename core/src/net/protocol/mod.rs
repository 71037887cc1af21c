//! Game protocol messages
//!
//! Four messages drive a session. [`Message::Setup`] and [`Message::Start`]
//! go from the authority to the players. [`Message::PlayRequest`] goes from a
//! player to the authority, and [`Message::PlayResult`] comes back from the
//! authority.
//!
//! # Wire Format
//!
//! ```text
//! Setup        [0][symbol]
//! Start        [1][symbol]
//! PlayRequest  [2][x][y]
//! PlayResult   [3][valid][x][y]
//! ```
//!
//! Every field is one byte. There is no length prefix: the transport delivers
//! exactly one message per user-data event, so a buffer is one message.

mod coord;

#[cfg(test)]
mod tests;

pub use coord::Coord;

use crate::game::Cell;

/// Message discriminant, the first byte on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Setup = 0,
    Start = 1,
    PlayRequest = 2,
    PlayResult = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Setup),
            1 => Ok(Self::Start),
            2 => Ok(Self::PlayRequest),
            3 => Ok(Self::PlayResult),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

/// A protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Authority -> player: the symbol this player holds for the session
    Setup { symbol: Cell },
    /// Authority -> everyone: the game starts, `symbol` moves first
    Start { symbol: Cell },
    /// Player -> authority: ask to play at `(x, y)`
    PlayRequest { x: Coord, y: Coord },
    /// Authority -> player(s): verdict on a play request
    PlayResult { valid: bool, x: Coord, y: Coord },
}

/// Errors that can occur when decoding a message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("message truncated while reading {field}")]
    Truncated { field: &'static str },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u8 },
    #[error("invalid symbol {0}")]
    InvalidSymbol(u8),
    #[error("invalid boolean {0}")]
    InvalidBool(u8),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Setup { .. } => MessageType::Setup,
            Self::Start { .. } => MessageType::Start,
            Self::PlayRequest { .. } => MessageType::PlayRequest,
            Self::PlayResult { .. } => MessageType::PlayResult,
        }
    }

    /// Serialize to wire bytes: discriminant, then fields in declaration order
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4);
        bytes.push(self.message_type() as u8);
        match *self {
            Self::Setup { symbol } | Self::Start { symbol } => {
                bytes.push(u8::from(symbol));
            }
            Self::PlayRequest { x, y } => {
                bytes.extend_from_slice(&[x.get(), y.get()]);
            }
            Self::PlayResult { valid, x, y } => {
                bytes.extend_from_slice(&[u8::from(valid), x.get(), y.get()]);
            }
        }
        bytes
    }

    /// Deserialize from wire bytes
    ///
    /// Either the whole buffer is one valid message or an error is returned;
    /// no partially-read message ever escapes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let tag = reader.byte("type").map_err(|_| DecodeError::Empty)?;

        let msg = match MessageType::try_from(tag)? {
            MessageType::Setup => Self::Setup {
                symbol: reader.symbol()?,
            },
            MessageType::Start => Self::Start {
                symbol: reader.symbol()?,
            },
            MessageType::PlayRequest => Self::PlayRequest {
                x: reader.coord("x")?,
                y: reader.coord("y")?,
            },
            MessageType::PlayResult => Self::PlayResult {
                valid: reader.boolean()?,
                x: reader.coord("x")?,
                y: reader.coord("y")?,
            },
        };

        reader.finish()?;
        Ok(msg)
    }
}

/// Byte cursor with typed, range-checked reads
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn byte(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        let value = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::Truncated { field })?;
        self.pos += 1;
        Ok(value)
    }

    fn coord(&mut self, field: &'static str) -> Result<Coord, DecodeError> {
        let value = self.byte(field)?;
        Coord::new(value).ok_or(DecodeError::OutOfRange { field, value })
    }

    /// A player symbol: `X` or `O`, never `Empty`
    fn symbol(&mut self) -> Result<Cell, DecodeError> {
        let value = self.byte("symbol")?;
        match Cell::try_from(value) {
            Ok(cell) if cell.is_player() => Ok(cell),
            _ => Err(DecodeError::InvalidSymbol(value)),
        }
    }

    fn boolean(&mut self) -> Result<bool, DecodeError> {
        match self.byte("valid")? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }

    fn finish(self) -> Result<(), DecodeError> {
        match self.bytes.len() - self.pos {
            0 => Ok(()),
            extra => Err(DecodeError::TrailingBytes(extra)),
        }
    }
}
