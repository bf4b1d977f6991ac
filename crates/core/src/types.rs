pub type NodeId = usize;
pub type SeqNum = u32;
pub type MessageId = u32;

/// Frame delimiter placed at both ends of an encoded payload.
pub const FLAG_BYTE: u8 = b'$';
/// Escape byte inserted before a literal flag or escape byte.
pub const ESCAPE_BYTE: u8 = b'/';

pub const FAULT_FLAG_COUNT: usize = 4;
