// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The server I/O loop.
//!
//! One task owns every piece of shared state. Per-session reader tasks do
//! nothing but framing: they forward complete messages over a channel and
//! die on EOF or cancellation. All protocol processing, every write, every
//! timer and every notification send happens here, so callback and
//! delivery ordering holds without a single lock.

use std::{collections::HashMap, fs, os::unix::fs::PermissionsExt, time::Duration};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use chrono::Utc;
use tokio::{
    io::AsyncReadExt,
    net::{UnixListener, unix::OwnedReadHalf},
    select,
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    handlers::{self, RpcAction},
    server::{
        cap,
        framing::{FrameDecoder, Framing},
        session::{SessionIo, TermReason},
        state::{ServerState, SessionMeta},
        timer::TimerSet,
    },
};

/// How long the loop sleeps at most before running the tick path.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Messages from reader tasks to the loop.
enum LoopEvent {
    Frame { sid: u64, bytes: Bytes },
    Closed { sid: u64, reason: TermReason },
}

struct SessionEntry {
    io: SessionIo,
    cancel: CancellationToken,
}

/// Runs the server until cancellation or a fatal condition.
pub async fn run(mut state: ServerState, cancel: CancellationToken) -> Result<()> {
    let sock_path = state.cfg.transport.socket_path.clone();
    if sock_path.exists() {
        bail!(
            "stale socket file {} exists; if no other instance is running, delete it",
            sock_path.display()
        );
    }
    let listener = UnixListener::bind(&sock_path)
        .with_context(|| format!("cannot bind {}", sock_path.display()))?;
    fs::set_permissions(&sock_path, fs::Permissions::from_mode(0o666))
        .with_context(|| format!("cannot chmod {}", sock_path.display()))?;
    info!(path = %sock_path.display(), "listening");

    let (tx, mut rx) = mpsc::channel::<LoopEvent>(256);
    let mut sessions: HashMap<u64, SessionEntry> = HashMap::new();
    let mut timers = TimerSet::new();
    let mut next_sid: u64 = 1;

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if state.shutdown_requested || cancel.is_cancelled() {
            break;
        }

        select! {
            _ = cancel.cancelled() => break,

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        if sessions.len() as u32 >= state.cfg.transport.max_sessions {
                            warn!("session limit reached, refusing connection");
                            drop(stream);
                            continue;
                        }
                        let sid = next_sid;
                        next_sid += 1;
                        let entry = start_session(&mut state, stream, sid, tx.clone()).await;
                        sessions.insert(sid, entry);
                    },
                    Err(e) => {
                        // Listener failure is fatal for the whole server.
                        warn!(error = %e, "accept failed");
                        bail!("listening socket failed: {e}");
                    },
                }
            },

            Some(ev) = rx.recv() => {
                match ev {
                    LoopEvent::Frame { sid, bytes } => {
                        process_frame(&mut state, &mut sessions, sid, &bytes).await;
                        // Interleave notification sends with the drain.
                        deliver_notifications(&mut state, &mut sessions).await;
                    },
                    LoopEvent::Closed { sid, reason } => {
                        kill_session(&mut state, &mut sessions, sid, reason, None).await;
                    },
                }
            },

            _ = tick.tick() => {
                timers.fire_due(Instant::now(), &mut state);
                state.check_confirmed_commit(Utc::now());
                check_timeouts(&mut state, &mut sessions).await;
                deliver_notifications(&mut state, &mut sessions).await;
            },
        }
    }

    // Final writes, then teardown.
    for (_, entry) in sessions.iter_mut() {
        let _ = entry.io.flush_all().await;
        entry.cancel.cancel();
    }
    drop(listener);
    let _ = fs::remove_file(&sock_path);
    info!("server stopped");
    Ok(())
}

/// Allocates a control block, spawns the reader, sends our `<hello>`.
async fn start_session(
    state: &mut ServerState,
    stream: tokio::net::UnixStream,
    sid: u64,
    tx: mpsc::Sender<LoopEvent>,
) -> SessionEntry {
    let (read_half, write_half) = stream.into_split();
    let (framing_tx, framing_rx) = watch::channel(Framing::Eom);
    let cancel = CancellationToken::new();

    let mut io = SessionIo::new(sid, write_half, framing_tx);

    // Peer identity on a local socket is the invoking user; the transport
    // wrapper outside the core would fill in real credentials.
    state.session_started(SessionMeta::new(sid, "local", "localhost"));

    let hello = cap::hello_message(&state.cfg, &state.schema, sid);
    io.enqueue(&hello);
    if let Err(e) = io.flush_all().await {
        warn!(sid, error = %e, "hello write failed");
    }

    spawn_reader(sid, read_half, framing_rx, tx, cancel.clone());
    debug!(sid, "session started");
    SessionEntry { io, cancel }
}

/// The per-session reader: framing only, no protocol state.
fn spawn_reader(
    sid: u64,
    mut read_half: OwnedReadHalf,
    framing_rx: watch::Receiver<Framing>,
    tx: mpsc::Sender<LoopEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let current = *framing_rx.borrow();
            if decoder.framing() != current {
                decoder.set_framing(current);
            }

            let n = select! {
                _ = cancel.cancelled() => break,
                res = read_half.read(&mut buf) => match res {
                    Ok(0) => {
                        let _ = tx
                            .send(LoopEvent::Closed { sid, reason: TermReason::Dropped })
                            .await;
                        break;
                    },
                    Ok(n) => n,
                    Err(e) => {
                        debug!(sid, error = %e, "read failed");
                        let _ = tx
                            .send(LoopEvent::Closed { sid, reason: TermReason::Other })
                            .await;
                        break;
                    },
                },
            };

            decoder.push(&buf[..n]);
            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => {
                        if tx.send(LoopEvent::Frame { sid, bytes: frame }).await.is_err() {
                            return;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        debug!(sid, error = %e, "framing error");
                        let _ = tx
                            .send(LoopEvent::Closed { sid, reason: TermReason::Other })
                            .await;
                        return;
                    },
                }
            }
        }
    });
}

async fn process_frame(
    state: &mut ServerState,
    sessions: &mut HashMap<u64, SessionEntry>,
    sid: u64,
    bytes: &[u8],
) {
    let Some(entry) = sessions.get_mut(&sid) else {
        return;
    };
    entry.io.touch();

    let result = handlers::dispatch_frame(state, sid, bytes);

    if let Some(reply) = result.reply {
        entry.io.enqueue(&reply);
        if let Err(e) = entry.io.flush_all().await {
            warn!(sid, error = %e, "write failed");
            kill_session(state, sessions, sid, TermReason::Other, None).await;
            return;
        }
    }

    match result.action {
        RpcAction::None => {},
        RpcAction::HelloDone { base11 } => {
            if base11 {
                entry.io.switch_to_chunked();
            }
        },
        RpcAction::CloseSelf => {
            kill_session(state, sessions, sid, TermReason::Closed, None).await;
        },
        RpcAction::KillSession(target) => {
            kill_session(state, sessions, target, TermReason::Killed, Some(sid)).await;
        },
        RpcAction::KillSelf(reason) => {
            kill_session(state, sessions, sid, reason, None).await;
        },
    }
}

/// Flushes what it can, cancels the reader, releases session resources.
async fn kill_session(
    state: &mut ServerState,
    sessions: &mut HashMap<u64, SessionEntry>,
    sid: u64,
    reason: TermReason,
    killed_by: Option<u64>,
) {
    let Some(mut entry) = sessions.remove(&sid) else {
        return;
    };
    let _ = entry.io.flush_all().await;
    entry.cancel.cancel();
    state.session_ended(sid, reason.as_str(), killed_by);
    info!(sid, reason = reason.as_str(), "session ended");
}

/// Hello-timeout and idle-timeout sweep; subscribers are idle-exempt.
async fn check_timeouts(
    state: &mut ServerState,
    sessions: &mut HashMap<u64, SessionEntry>,
) {
    let hello_timeout = state.cfg.transport.hello_timeout;
    let idle_timeout = state.cfg.transport.idle_timeout;
    let now = Instant::now();

    let mut to_kill: Vec<(u64, TermReason)> = Vec::new();
    for (sid, entry) in sessions.iter() {
        let hello_done = state.session(*sid).is_some_and(|m| m.hello_done);
        if !hello_done {
            if now.duration_since(entry.io.established) > hello_timeout {
                to_kill.push((*sid, TermReason::BadHello));
            }
        } else if now.duration_since(entry.io.last_activity) > idle_timeout
            && !state.notif.has_subscription(*sid)
        {
            to_kill.push((*sid, TermReason::Timeout));
        }
    }
    for (sid, reason) in to_kill {
        kill_session(state, sessions, sid, reason, None).await;
    }
}

/// Sends up to `max-burst` notifications across all subscriptions.
async fn deliver_notifications(
    state: &mut ServerState,
    sessions: &mut HashMap<u64, SessionEntry>,
) {
    let max_burst = state.cfg.notifications.max_burst;
    let mut outbound: Vec<(u64, Vec<u8>)> = Vec::new();
    state
        .notif
        .deliver_burst(Utc::now(), max_burst, &mut |sid, bytes| {
            outbound.push((sid, bytes));
        });

    for (sid, bytes) in outbound {
        if let Some(meta) = state.session_mut(sid) {
            meta.notifications_sent += 1;
        }
        state
            .stats
            .total_notifications
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Some(entry) = sessions.get_mut(&sid) {
            entry.io.enqueue(&bytes);
            if let Err(e) = entry.io.flush_all().await {
                warn!(sid, error = %e, "notification write failed");
                kill_session(state, sessions, sid, TermReason::Other, None).await;
            }
        }
    }
}
