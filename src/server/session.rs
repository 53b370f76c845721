// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-connection session control blocks.
//!
//! Transport state (write half, framing switch) lives here with the event
//! loop; protocol-visible metadata lives in
//! [`crate::server::state::SessionMeta`] so the handler layer stays free
//! of socket types.

use std::collections::VecDeque;

use tokio::{
    io::AsyncWriteExt,
    net::unix::OwnedWriteHalf,
    sync::watch,
    time::Instant,
};
use tracing::debug;

use crate::server::framing::{Framing, encode_frame};

/// Why a session went away (mirrors the protocol's termination reasons).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermReason {
    /// Clean `<close-session>`.
    Closed,
    /// `<kill-session>` from another session.
    Killed,
    /// Transport dropped by the peer.
    Dropped,
    /// Hello or idle timer expired.
    Timeout,
    /// No valid `<hello>` arrived.
    BadHello,
    /// Session could not be started.
    BadStart,
    Other,
}

impl TermReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Killed => "killed",
            Self::Dropped => "dropped",
            Self::Timeout => "timeout",
            Self::BadHello => "bad-hello",
            Self::BadStart => "bad-start",
            Self::Other => "other",
        }
    }
}

/// Transport-side control block owned by the event loop.
pub struct SessionIo {
    pub sid: u64,
    writer: OwnedWriteHalf,
    /// Tells the reader task which framing to decode with.
    framing_tx: watch::Sender<Framing>,
    framing: Framing,
    /// Messages waiting for the writable path.
    out_q: VecDeque<Vec<u8>>,
    pub established: Instant,
    pub last_activity: Instant,
}

impl SessionIo {
    pub fn new(sid: u64, writer: OwnedWriteHalf, framing_tx: watch::Sender<Framing>) -> Self {
        let now = Instant::now();
        Self {
            sid,
            writer,
            framing_tx,
            framing: Framing::Eom,
            out_q: VecDeque::new(),
            established: now,
            last_activity: now,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Switches both sides of the connection to chunked framing.
    pub fn switch_to_chunked(&mut self) {
        self.framing = Framing::Chunked;
        let _ = self.framing_tx.send(Framing::Chunked);
        debug!(sid = self.sid, "switched to chunked framing");
    }

    /// Queues one protocol message for delivery.
    pub fn enqueue(&mut self, payload: &[u8]) {
        self.out_q.push_back(encode_frame(self.framing, payload));
    }

    pub fn has_output(&self) -> bool {
        !self.out_q.is_empty()
    }

    /// Writes one queued message; the loop calls this while writable.
    pub async fn flush_one(&mut self) -> std::io::Result<bool> {
        let Some(frame) = self.out_q.pop_front() else {
            return Ok(false);
        };
        self.writer.write_all(&frame).await?;
        Ok(true)
    }

    /// Drains the whole out queue (session teardown path).
    pub async fn flush_all(&mut self) -> std::io::Result<()> {
        while self.flush_one().await? {}
        self.writer.flush().await
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
