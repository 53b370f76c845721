// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The aggregated server state.
//!
//! Everything the original treats as module globals (profile, registry,
//! session table, datastores, notification queues) lives in one value
//! constructed at init and passed explicitly to every subsystem, so tests
//! can build isolated instances.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    cfg::{config::Config, logger},
    datastore::{
        locks::LockTable,
        store::{Datastores, load_startup},
        value::{ValueNode, VirtualGetter},
    },
    error::{ErrorKind, RpcError},
    notif::{engine::NotifEngine, event},
    registry::CallbackRegistry,
    yang::{
        ast::{ModuleDecl, NodeDecl, NodeKind, TypeSpec},
        resolve::load_module,
        schema::SchemaContext,
        typedef::ScalarValue,
    },
};

/// Counters shared with virtual state leaves.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub active_sessions: AtomicU64,
    pub total_rpcs: AtomicU64,
    pub total_notifications: AtomicU64,
}

/// Allow/deny oracle; policy evaluation lives outside the core.
pub trait AccessOracle: Send {
    fn allow(&self, user: &str, operation: &str) -> bool;
}

/// The default oracle: everything is permitted.
pub struct AllowAll;

impl AccessOracle for AllowAll {
    fn allow(&self, _user: &str, _operation: &str) -> bool {
        true
    }
}

/// Protocol-visible session metadata, kept apart from the transport block
/// so the handler layer stays synchronous and socket-free.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub sid: u64,
    pub user: String,
    pub peer: String,
    pub hello_done: bool,
    pub base11: bool,
    pub in_rpcs: u64,
    pub in_bad_rpcs: u64,
    pub out_rpc_errors: u64,
    pub notifications_sent: u64,
}

impl SessionMeta {
    pub fn new(sid: u64, user: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            sid,
            user: user.into(),
            peer: peer.into(),
            hello_done: false,
            base11: false,
            in_rpcs: 0,
            in_bad_rpcs: 0,
            out_rpc_errors: 0,
            notifications_sent: 0,
        }
    }
}

/// An armed confirmed commit: the pre-commit running tree comes back if
/// no confirming commit arrives before the deadline.
pub struct ConfirmedCommit {
    pub previous: crate::datastore::value::ValueTree,
    pub deadline: DateTime<Utc>,
}

/// Everything the server knows, owned by the event-loop task.
pub struct ServerState {
    pub cfg: Config,
    pub schema: SchemaContext,
    pub registry: CallbackRegistry,
    pub stores: Datastores,
    pub locks: LockTable,
    pub notif: NotifEngine,
    pub sessions: HashMap<u64, SessionMeta>,
    pub access: Box<dyn AccessOracle>,
    pub stats: Arc<ServerStats>,
    pub started_at: DateTime<Utc>,
    pub confirmed_commit: Option<ConfirmedCommit>,
    /// Set by a fatal condition; the loop exits at the next iteration top.
    pub shutdown_requested: bool,
}

impl ServerState {
    /// Builds a fully initialized state: built-in module, datastores,
    /// persisted startup content, and the sysStartup event.
    pub fn new(cfg: Config) -> Result<Self> {
        let mut schema = SchemaContext::new();
        load_module(&mut schema, &builtin_module())
            .map_err(|errs| anyhow!("builtin module failed to load: {errs:?}"))?;

        let mut stores = Datastores::new(
            cfg.datastores.family.is_candidate(),
            cfg.datastores.with_startup,
        );

        // Persisted startup content seeds both startup and running.
        if cfg.datastores.with_startup
            && let Some(path) = &cfg.datastores.startup_path
            && let Some(tree) = load_startup(path)
                .with_context(|| format!("loading startup from {}", path.display()))?
        {
            if let Some(startup) = stores.startup.as_mut() {
                startup.install_root(tree.clone());
            }
            stores.running.install_root(tree);
            info!(path = %path.display(), "startup configuration loaded");
        }
        if let Some(candidate) = stores.candidate.as_mut() {
            candidate.copy_from(&stores.running);
        }

        let mut notif = NotifEngine::new(cfg.notifications.eventlog_size as usize);
        notif.queue(event::sys_startup());

        let mut state = Self {
            cfg,
            schema,
            registry: CallbackRegistry::new(),
            stores,
            locks: LockTable::new(),
            notif,
            sessions: HashMap::new(),
            access: Box::new(AllowAll),
            stats: Arc::new(ServerStats::default()),
            started_at: Utc::now(),
            confirmed_commit: None,
            shutdown_requested: false,
        };
        state.ensure_state_nodes();

        // The set-log-level extension is a registrant like any plugin RPC.
        state.registry.register_rpc(
            "netconfd",
            "set-log-level",
            Box::new(|op| {
                let level = op.child_text("log-level").ok_or_else(|| {
                    RpcError::protocol(ErrorKind::MissingElement)
                        .with_message("missing <log-level>")
                })?;
                logger::set_log_level(level).map_err(|e| {
                    RpcError::protocol(ErrorKind::InvalidValue)
                        .with_message(e.to_string())
                })?;
                Ok(Vec::new())
            }),
        );

        Ok(state)
    }

    /// Registers a new session and emits sysSessionStart.
    pub fn session_started(&mut self, meta: SessionMeta) {
        self.stats.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.notif.queue(event::sys_session_start(
            meta.sid,
            &meta.user,
            &meta.peer,
        ));
        self.sessions.insert(meta.sid, meta);
    }

    /// Tears down session-owned resources and emits sysSessionEnd.
    pub fn session_ended(&mut self, sid: u64, reason: &str, killed_by: Option<u64>) {
        self.locks.release_session(sid);
        self.notif.remove_session(sid);
        if let Some(meta) = self.sessions.remove(&sid) {
            self.stats.active_sessions.fetch_sub(1, Ordering::Relaxed);
            self.notif
                .queue(event::sys_session_end(sid, &meta.user, reason, killed_by));
        }
    }

    pub fn session(&self, sid: u64) -> Option<&SessionMeta> {
        self.sessions.get(&sid)
    }

    pub fn session_mut(&mut self, sid: u64) -> Option<&mut SessionMeta> {
        self.sessions.get_mut(&sid)
    }

    /// Reverts an expired confirmed commit; called from the tick path.
    pub fn check_confirmed_commit(&mut self, now: DateTime<Utc>) {
        let expired = self
            .confirmed_commit
            .as_ref()
            .is_some_and(|cc| cc.deadline <= now);
        if expired
            && let Some(cc) = self.confirmed_commit.take()
        {
            info!("confirmed commit expired, reverting running");
            self.stores.running.install_root(cc.previous);
            self.ensure_state_nodes();
            self.notif
                .queue(event::sys_config_change("system", 0, "running"));
        }
    }

    /// Plants the virtual state container into the running tree. Called
    /// again after anything replaces the running root (commit, copy-config,
    /// confirmed-commit revert); a present container is left alone.
    pub fn ensure_state_nodes(&mut self) {
        if self
            .stores
            .running
            .tree
            .find_child(self.stores.running.tree.root(), "netconfd-state")
            .is_some()
        {
            return;
        }
        let Some(container) = self.schema.resolve_schema_path("/netconfd:netconfd-state")
        else {
            return;
        };
        let started = self.started_at;
        let stats = Arc::clone(&self.stats);
        let stats2 = Arc::clone(&self.stats);

        let tree = &mut self.stores.running.tree;
        let root = tree.root();
        let mut cnode = ValueNode::new("netconfd-state");
        cnode.schema = Some(container);
        let cref = tree.append_child(root, cnode);

        let uptime: VirtualGetter = Arc::new(move || {
            let secs = (Utc::now() - started).num_seconds().max(0) as u64;
            Ok(ScalarValue::Uint(secs))
        });
        let sessions: VirtualGetter = Arc::new(move || {
            Ok(ScalarValue::Uint(stats.active_sessions.load(Ordering::Relaxed)))
        });
        let rpcs: VirtualGetter = Arc::new(move || {
            Ok(ScalarValue::Uint(stats2.total_rpcs.load(Ordering::Relaxed)))
        });

        for (name, getter) in [
            ("uptime", uptime),
            ("active-sessions", sessions),
            ("total-rpcs", rpcs),
        ] {
            let mut leaf = ValueNode::new(name);
            leaf.schema = self.schema.find_child(container, name);
            leaf.getter = Some(getter);
            tree.append_child(cref, leaf);
        }
    }
}

/// The server's own YANG module: system notifications plus a small state
/// subtree backed by virtual leaves.
pub fn builtin_module() -> ModuleDecl {
    let mut m = ModuleDecl::new("netconfd", "ncx", "urn:netconfd:system", "2025-06-01");
    m.source = BUILTIN_SOURCE.to_string();

    let notif = |name: &str, leaves: &[(&str, &str)]| {
        let mut n = NodeDecl::new(NodeKind::Notification, name);
        n.children = leaves
            .iter()
            .map(|(leaf, ty)| NodeDecl::leaf(*leaf, TypeSpec::named(ty)))
            .collect();
        n
    };

    let mut state = NodeDecl::container(
        "netconfd-state",
        vec![
            NodeDecl::leaf("uptime", TypeSpec::named("uint64")),
            NodeDecl::leaf("active-sessions", TypeSpec::named("uint64")),
            NodeDecl::leaf("total-rpcs", TypeSpec::named("uint64")),
        ],
    );
    state.config = Some(false);

    m.body = vec![
        notif("sysStartup", &[]),
        notif(
            "sysSessionStart",
            &[
                ("userName", "string"),
                ("sessionId", "uint64"),
                ("remoteHost", "string"),
            ],
        ),
        notif(
            "sysSessionEnd",
            &[
                ("userName", "string"),
                ("sessionId", "uint64"),
                ("terminationReason", "string"),
                ("killedBy", "uint64"),
            ],
        ),
        notif(
            "sysConfigChange",
            &[
                ("userName", "string"),
                ("sessionId", "uint64"),
                ("target", "string"),
            ],
        ),
    ];
    m.body.push(state);
    m
}

const BUILTIN_SOURCE: &str = r#"module netconfd {
  namespace "urn:netconfd:system";
  prefix ncx;
  revision 2025-06-01;

  notification sysStartup { }
  notification sysSessionStart {
    leaf userName { type string; }
    leaf sessionId { type uint64; }
    leaf remoteHost { type string; }
  }
  notification sysSessionEnd {
    leaf userName { type string; }
    leaf sessionId { type uint64; }
    leaf terminationReason { type string; }
    leaf killedBy { type uint64; }
  }
  notification sysConfigChange {
    leaf userName { type string; }
    leaf sessionId { type uint64; }
    leaf target { type string; }
  }
  container netconfd-state {
    config false;
    leaf uptime { type uint64; }
    leaf active-sessions { type uint64; }
    leaf total-rpcs { type uint64; }
  }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_builtin_schema_and_state_nodes() {
        let state = ServerState::new(Config::default()).expect("state builds");
        assert!(state.schema.find_module("netconfd").is_some());

        let tree = &state.stores.running.tree;
        let sc = tree.find_child(tree.root(), "netconfd-state").expect("state node");
        let uptime = tree.find_child(sc, "uptime").expect("uptime leaf");
        assert!(tree.get(uptime).is_virtual());
        // Reading a virtual leaf never bumps last-modified.
        let stamp = state.stores.running.last_modified;
        let _ = tree.canonical_value(uptime);
        assert_eq!(state.stores.running.last_modified, stamp);
    }

    #[test]
    fn session_lifecycle_updates_counters_and_events() {
        let mut state = ServerState::new(Config::default()).expect("state builds");
        let before = state.notif.log().len();

        state.session_started(SessionMeta::new(1, "admin", "local"));
        assert_eq!(state.stats.active_sessions.load(Ordering::Relaxed), 1);

        state.locks.lock_global(crate::datastore::store::DatastoreName::Running, 1)
            .expect("lock");
        state.session_ended(1, "dropped", None);
        assert_eq!(state.stats.active_sessions.load(Ordering::Relaxed), 0);
        assert_eq!(
            state
                .locks
                .global_holder(crate::datastore::store::DatastoreName::Running),
            None,
            "session death releases its locks"
        );
        assert_eq!(state.notif.log().len(), before + 2, "start and end events");
    }

    #[test]
    fn virtual_counter_is_non_decreasing() {
        let state = ServerState::new(Config::default()).expect("state builds");
        let tree = &state.stores.running.tree;
        let sc = tree.find_child(tree.root(), "netconfd-state").expect("state");
        let uptime = tree.find_child(sc, "uptime").expect("uptime");
        let a: u64 = tree.canonical_value(uptime).expect("read").parse().expect("num");
        let b: u64 = tree.canonical_value(uptime).expect("read").parse().expect("num");
        assert!(b >= a);
    }
}
