// SPDX-License-Identifier: BSD-3-Clause

use bytes::Bytes;

use crate::{error::CoreError, protocol::BINARY_CHUNK_LEN};

/// Classification of a reply frame, per §4.1 of the design: `<` is success,
/// `?` is error, and a trailing `:` after the id marks a binary chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Ok,
    Err,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPayload {
    Text(String),
    Binary(Bytes),
}

/// One parsed reply frame.
///
/// `marker` retains the original leading byte (`<`, `?`, or the reserved
/// `|`) so that [`Reply::to_bytes`] can round-trip a frame exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub marker: u8,
    pub kind: ReplyKind,
    pub command_id: u8,
    pub payload: ReplyPayload,
}

impl Reply {
    /// Parses a single complete reply frame per the grammar
    /// `^[<|?]([0-9A-F]{2})(:?)(.*)\n?$`.
    ///
    /// `frame` must already contain exactly one frame's worth of bytes: the
    /// reader loop is responsible for knowing how many bytes to read before
    /// calling this (see [`crate::device::client`]). This function is pure
    /// and never touches the network.
    pub fn parse(frame: &[u8]) -> Result<Reply, CoreError> {
        if frame.len() < 3 {
            return Err(CoreError::ProtocolParse(frame.to_vec()));
        }

        let marker = frame[0];
        let kind_base = match marker {
            b'<' | b'|' => ReplyKind::Ok,
            b'?' => ReplyKind::Err,
            _ => return Err(CoreError::ProtocolParse(frame.to_vec())),
        };

        let hi = hex_digit(frame[1]).ok_or_else(|| CoreError::ProtocolParse(frame.to_vec()))?;
        let lo = hex_digit(frame[2]).ok_or_else(|| CoreError::ProtocolParse(frame.to_vec()))?;
        let command_id = (hi << 4) | lo;

        let rest = &frame[3..];

        if rest.first() == Some(&b':') {
            let body = &rest[1..];
            if body.len() != BINARY_CHUNK_LEN {
                return Err(CoreError::ProtocolParse(frame.to_vec()));
            }
            return Ok(Reply {
                marker,
                kind: ReplyKind::Binary,
                command_id,
                payload: ReplyPayload::Binary(Bytes::copy_from_slice(body)),
            });
        }

        let text = std::str::from_utf8(rest)
            .map_err(|_| CoreError::ProtocolParse(frame.to_vec()))?
            .trim_end_matches('\n')
            .trim()
            .to_string();

        Ok(Reply {
            marker,
            kind: kind_base,
            command_id,
            payload: ReplyPayload::Text(text),
        })
    }

    /// Serializes back to wire bytes. For textual replies this reproduces
    /// the frame modulo the whitespace normalization the parser performs.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + BINARY_CHUNK_LEN);
        out.push(self.marker);
        out.push(hex_upper((self.command_id >> 4) & 0xF));
        out.push(hex_upper(self.command_id & 0xF));

        match &self.payload {
            ReplyPayload::Text(text) => {
                out.extend_from_slice(text.as_bytes());
                out.push(b'\n');
            },
            ReplyPayload::Binary(body) => {
                out.push(b':');
                out.extend_from_slice(body);
            },
        }

        out
    }

    pub fn is_error(&self) -> bool {
        self.kind == ReplyKind::Err
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            ReplyPayload::Text(text) => Some(text),
            ReplyPayload::Binary(_) => None,
        }
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

fn hex_upper(nibble: u8) -> u8 {
    match nibble {
        0..=9 => b'0' + nibble,
        _ => b'A' + (nibble - 10),
    }
}
