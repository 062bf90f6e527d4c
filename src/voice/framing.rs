//! Tagged binary frames for the duplex wire protocol
//!
//! Every duplex binary message starts with a single tag byte:
//! `0x01` for an encoded audio frame, `0x02` for an incremental text token.

use crate::{Error, Result};

/// Tag byte for encoded audio frames
pub const TAG_AUDIO: u8 = 0x01;

/// Tag byte for incremental transcript tokens
pub const TAG_TEXT: u8 = 0x02;

/// A parsed duplex binary frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaggedFrame {
    /// Encoded audio payload
    Audio(Vec<u8>),
    /// UTF-8 text token
    Text(String),
}

impl TaggedFrame {
    /// Serialize with the leading tag byte
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let (tag, payload) = match self {
            Self::Audio(bytes) => (TAG_AUDIO, bytes.as_slice()),
            Self::Text(text) => (TAG_TEXT, text.as_bytes()),
        };
        let mut out = Vec::with_capacity(payload.len() + 1);
        out.push(tag);
        out.extend_from_slice(payload);
        out
    }

    /// Parse a tagged binary message
    ///
    /// # Errors
    ///
    /// Returns error for empty messages, unknown tags, or non-UTF-8 text
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (&tag, payload) = bytes
            .split_first()
            .ok_or_else(|| Error::Frame("empty binary message".to_string()))?;

        match tag {
            TAG_AUDIO => {
                if payload.is_empty() {
                    return Err(Error::Frame("audio frame without payload".to_string()));
                }
                Ok(Self::Audio(payload.to_vec()))
            }
            TAG_TEXT => std::str::from_utf8(payload)
                .map(|s| Self::Text(s.to_string()))
                .map_err(|e| Error::Frame(format!("text frame is not utf-8: {e}"))),
            other => Err(Error::Frame(format!("unknown frame tag 0x{other:02x}"))),
        }
    }
}
