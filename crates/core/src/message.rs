use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{MessageId, FAULT_FLAG_COUNT};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageParseError {
    #[error("invalid fault flags {flags:?}: expected 4 characters of '0' or '1'")]
    InvalidFlags { flags: String },

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<MessageParseError>,
    },
}

/// Scripted channel faults for one message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultFlags {
    pub modification: bool,
    pub loss: bool,
    pub duplication: bool,
    pub delay: bool,
}

impl FaultFlags {
    pub const NONE: FaultFlags = FaultFlags {
        modification: false,
        loss: false,
        duplication: false,
        delay: false,
    };

    pub fn is_clean(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for FaultFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flag in [self.modification, self.loss, self.duplication, self.delay] {
            f.write_str(if flag { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromStr for FaultFlags {
    type Err = MessageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MessageParseError::InvalidFlags { flags: s.to_string() };
        let bits = s.as_bytes();
        if bits.len() != FAULT_FLAG_COUNT {
            return Err(invalid());
        }

        let mut parsed = [false; FAULT_FLAG_COUNT];
        for (slot, bit) in parsed.iter_mut().zip(bits) {
            *slot = match bit {
                b'0' => false,
                b'1' => true,
                _ => return Err(invalid()),
            };
        }

        Ok(Self {
            modification: parsed[0],
            loss: parsed[1],
            duplication: parsed[2],
            delay: parsed[3],
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub text: Vec<u8>,
    pub faults: FaultFlags,
}

impl Message {
    pub fn new(id: MessageId, text: impl Into<Vec<u8>>, faults: FaultFlags) -> Self {
        Self {
            id,
            text: text.into(),
            faults,
        }
    }
}

/// Parses a node's message list, one `FFFF <text>` entry per line.
///
/// Blank lines are skipped and do not consume an id.
pub fn parse_messages(input: &str) -> Result<Vec<Message>, MessageParseError> {
    let mut messages = Vec::new();

    for (index, raw) in input.lines().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.trim().is_empty() {
            continue;
        }

        let (flags, text) = line.split_once(' ').unwrap_or((line, ""));
        let faults = flags.parse::<FaultFlags>().map_err(|e| MessageParseError::Line {
            line: index + 1,
            source: Box::new(e),
        })?;

        let id = messages.len() as MessageId;
        messages.push(Message::new(id, text, faults));
    }

    Ok(messages)
}
