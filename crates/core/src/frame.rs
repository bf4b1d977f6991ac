use std::fmt;

use bincode::error::{DecodeError, EncodeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SeqNum;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] EncodeError),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Nack,
    Ack,
    Data,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Nack => "NACK",
            FrameKind::Ack => "ACK",
            FrameKind::Data => "DATA",
        };
        f.write_str(name)
    }
}

/// A link-layer frame as it travels over the simulated wire.
///
/// `ack_num` carries the sender's slot index for DATA frames and echoes it
/// back on ACK/NACK. `parity` is only present on DATA frames, where it covers
/// the encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub kind: FrameKind,
    pub seq_num: SeqNum,
    pub ack_num: u32,
    pub payload: Vec<u8>,
    pub parity: Option<u8>,
}

impl Frame {
    pub fn data(seq_num: SeqNum, ack_num: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Data,
            seq_num,
            ack_num,
            payload,
            parity: None,
        }
    }

    /// ACK or NACK answering a DATA frame.
    pub fn reply(kind: FrameKind, seq_num: SeqNum, ack_num: u32) -> Self {
        Self {
            kind,
            seq_num,
            ack_num,
            payload: Vec::new(),
            parity: None,
        }
    }

    pub fn is_data(&self) -> bool {
        self.kind == FrameKind::Data
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let (frame, read): (Frame, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        if read != bytes.len() {
            return Err(FrameError::TrailingBytes(bytes.len() - read));
        }
        Ok(frame)
    }
}
