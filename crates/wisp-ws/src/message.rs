//! Application-level messages carried by data frames.

use crate::frame::{Frame, Opcode};

/// A complete application message: text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    /// Opcode used to frame this message.
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Text(_) => Opcode::Text,
            Message::Binary(_) => Opcode::Binary,
        }
    }

    /// Raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(s) => s.as_bytes(),
            Message::Binary(b) => b.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Convert a decoded data frame into a message.
    ///
    /// Returns `None` for close frames. Text payloads are not validated as
    /// UTF-8; invalid sequences are replaced rather than rejected.
    pub fn from_frame(frame: Frame) -> Option<Message> {
        match frame.opcode {
            Opcode::Text => Some(Message::Text(match String::from_utf8(frame.payload) {
                Ok(s) => s,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            })),
            Opcode::Binary => Some(Message::Binary(frame.payload)),
            Opcode::Close => None,
        }
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_string())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<Vec<u8>> for Message {
    fn from(b: Vec<u8>) -> Self {
        Message::Binary(b)
    }
}
