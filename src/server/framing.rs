// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! NETCONF wire framing (RFC 6242).
//!
//! base:1.0 messages end with the `]]>]]>` marker; base:1.1 negotiates
//! chunked framing (`\n#<len>\n` chunks closed by `\n##\n`). A session
//! starts in EOM mode and switches after a successful `<hello>` exchange.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Hard cap on one decoded message.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const EOM_MARKER: &[u8] = b"]]>]]>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// End-of-message marker framing (base:1.0).
    #[default]
    Eom,
    /// Chunked framing (base:1.1).
    Chunked,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame exceeds {MAX_FRAME_LEN} bytes")]
    TooBig,
    #[error("malformed chunk header")]
    BadChunk,
}

/// Incremental frame decoder fed by the session reader task.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    framing: Framing,
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches framing mode; takes effect for the next message.
    pub fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extracts the next complete message, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buf.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooBig);
        }
        match self.framing {
            Framing::Eom => self.next_eom(),
            Framing::Chunked => self.next_chunked(),
        }
    }

    fn next_eom(&mut self) -> Result<Option<Bytes>, FrameError> {
        let Some(pos) = find(&self.buf, EOM_MARKER) else {
            return Ok(None);
        };
        let frame = self.buf.split_to(pos).freeze();
        let _ = self.buf.split_to(EOM_MARKER.len());
        Ok(Some(frame))
    }

    /// Parses `\n#len\n<data>...\n##\n` without consuming a partial message.
    fn next_chunked(&mut self) -> Result<Option<Bytes>, FrameError> {
        let buf = &self.buf[..];
        let mut pos = 0usize;
        let mut msg = Vec::new();

        loop {
            // "\n#" then digits-or-# then "\n".
            if buf.len() < pos + 3 {
                return Ok(None);
            }
            if buf[pos] != b'\n' || buf[pos + 1] != b'#' {
                return Err(FrameError::BadChunk);
            }
            let header_start = pos + 2;
            let Some(nl_off) = buf[header_start..]
                .iter()
                .position(|b| *b == b'\n')
            else {
                // Header still incomplete.
                if buf.len() - header_start > 12 {
                    return Err(FrameError::BadChunk);
                }
                return Ok(None);
            };
            let header = &buf[header_start..header_start + nl_off];

            if header == b"#" {
                // End-of-chunks.
                let consumed = header_start + nl_off + 1;
                let _ = self.buf.split_to(consumed);
                return Ok(Some(Bytes::from(msg)));
            }

            let text = std::str::from_utf8(header).map_err(|_| FrameError::BadChunk)?;
            let len: usize = text.parse().map_err(|_| FrameError::BadChunk)?;
            if len == 0 || len > MAX_FRAME_LEN || msg.len() + len > MAX_FRAME_LEN {
                return Err(FrameError::TooBig);
            }

            let data_start = header_start + nl_off + 1;
            if buf.len() < data_start + len {
                return Ok(None);
            }
            msg.extend_from_slice(&buf[data_start..data_start + len]);
            pos = data_start + len;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

/// Wraps one outbound message in the session's framing.
pub fn encode_frame(framing: Framing, payload: &[u8]) -> Vec<u8> {
    match framing {
        Framing::Eom => {
            let mut out = Vec::with_capacity(payload.len() + EOM_MARKER.len());
            out.extend_from_slice(payload);
            out.extend_from_slice(EOM_MARKER);
            out
        },
        Framing::Chunked => {
            let header = format!("\n#{}\n", payload.len());
            let mut out =
                Vec::with_capacity(header.len() + payload.len() + 4);
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(payload);
            out.extend_from_slice(b"\n##\n");
            out
        },
    }
}
