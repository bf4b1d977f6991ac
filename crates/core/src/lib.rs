//! core data types for the ARQ link simulator: byte-stuffing codec, parity,
//! wire frames and scripted messages

pub mod codec;
pub mod frame;
pub mod message;
pub mod types;

pub use frame::{Frame, FrameError, FrameKind};
pub use message::{parse_messages, FaultFlags, Message, MessageParseError};
pub use types::{MessageId, NodeId, SeqNum};
