// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Schema-path-indexed callback tables.
//!
//! Plugins register callback sets against canonical schema paths before or
//! after the owning module is loaded; early registrations park on a
//! per-module waiting list and bind when the module arrives. Binding
//! writes an opaque slot into the schema node; unloading the module clears
//! every slot it owned and releases the records.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::{
    error::RpcError,
    txn::plan::{EditNode, EditOperation},
    xml::XmlElement,
    yang::schema::SchemaContext,
};

/// The four transaction phases a data callback can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPhase {
    Validate,
    Apply,
    Commit,
    Rollback,
}

/// Everything a data callback gets to see about one affected node.
pub struct EditEvent<'a> {
    pub session_id: u64,
    pub user: &'a str,
    pub message_id: &'a str,
    pub phase: CallbackPhase,
    pub operation: EditOperation,
    /// Canonical schema path of the affected node.
    pub path: &'a str,
    /// The incoming subtree; `None` for delete/remove.
    pub newval: Option<&'a EditNode>,
    /// Canonical value currently in the datastore; `None` for create.
    pub curval: Option<String>,
}

pub type EditCallback =
    Box<dyn FnMut(&EditEvent<'_>) -> Result<(), RpcError> + Send>;

/// Up to four phase handlers for one schema path.
#[derive(Default)]
pub struct CallbackSet {
    pub validate: Option<EditCallback>,
    pub apply: Option<EditCallback>,
    pub commit: Option<EditCallback>,
    pub rollback: Option<EditCallback>,
}

impl CallbackSet {
    fn phase_mut(&mut self, phase: CallbackPhase) -> Option<&mut EditCallback> {
        match phase {
            CallbackPhase::Validate => self.validate.as_mut(),
            CallbackPhase::Apply => self.apply.as_mut(),
            CallbackPhase::Commit => self.commit.as_mut(),
            CallbackPhase::Rollback => self.rollback.as_mut(),
        }
    }
}

/// Handler for a plugin-provided RPC operation.
pub type RpcCallback =
    Box<dyn FnMut(&XmlElement) -> Result<Vec<XmlElement>, RpcError> + Send>;

/// Bind state of one registered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStatus {
    /// Registered before the module was loaded.
    Waiting,
    Bound,
}

struct CallbackRecord {
    defpath: String,
    set_slot: u32,
    status: BindStatus,
    /// Revision of the module actually bound against.
    bound_revision: Option<String>,
}

#[derive(Default)]
struct ModuleCallbacks {
    records: Vec<CallbackRecord>,
}

/// The registry. Data records are grouped per owning module; sets live in
/// a slot arena so schema nodes can reference them by index.
#[derive(Default)]
pub struct CallbackRegistry {
    modules: BTreeMap<String, ModuleCallbacks>,
    sets: Vec<Option<CallbackSet>>,
    rpcs: BTreeMap<(String, String), RpcCallback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback set for `(module, defpath)`.
    ///
    /// Idempotent per key: re-registration replaces the set in place and
    /// keeps the bind status. If the module is already loaded the record
    /// binds immediately; otherwise it parks until the module arrives.
    pub fn register(
        &mut self,
        ctx: &mut SchemaContext,
        module: &str,
        defpath: &str,
        set: CallbackSet,
    ) {
        let entry = self.modules.entry(module.to_string()).or_default();
        if let Some(rec) = entry.records.iter().find(|r| r.defpath == defpath) {
            self.sets[rec.set_slot as usize] = Some(set);
            return;
        }

        let set_slot = self.sets.len() as u32;
        self.sets.push(Some(set));
        entry.records.push(CallbackRecord {
            defpath: defpath.to_string(),
            set_slot,
            status: BindStatus::Waiting,
            bound_revision: None,
        });
        entry.records.sort_by(|a, b| a.defpath.cmp(&b.defpath));

        if ctx.find_module(module).is_some() {
            self.bind_module(ctx, module);
        }
    }

    /// Binds every parked record of `module` after the module loads.
    pub fn bind_module(&mut self, ctx: &mut SchemaContext, module: &str) {
        let Some((_, loaded)) = ctx.find_module(module) else {
            return;
        };
        let revision = loaded.revision.clone();
        let Some(entry) = self.modules.get_mut(module) else {
            return;
        };
        for rec in &mut entry.records {
            if rec.status == BindStatus::Bound {
                continue;
            }
            match ctx.resolve_schema_path(&rec.defpath) {
                Some(node) => {
                    ctx.node_mut(node).callback_slot = Some(rec.set_slot);
                    rec.status = BindStatus::Bound;
                    rec.bound_revision = Some(revision.clone());
                    debug!(module, path = %rec.defpath, "callback bound");
                },
                None => {
                    warn!(module, path = %rec.defpath, "callback path not in schema");
                },
            }
        }
    }

    /// Releases every record of a module being unloaded, clearing the
    /// schema-node slots it owned.
    pub fn unregister_module(&mut self, ctx: &mut SchemaContext, module: &str) {
        let Some(entry) = self.modules.remove(module) else {
            return;
        };
        for rec in &entry.records {
            if rec.status == BindStatus::Bound
                && let Some(node) = ctx.resolve_schema_path(&rec.defpath)
                && ctx.node(node).callback_slot == Some(rec.set_slot)
            {
                ctx.node_mut(node).callback_slot = None;
            }
            self.sets[rec.set_slot as usize] = None;
        }
    }

    /// Runs the `phase` handler bound at `slot`, if one exists.
    pub fn invoke(
        &mut self,
        slot: u32,
        event: &EditEvent<'_>,
    ) -> Result<(), RpcError> {
        let Some(Some(set)) = self.sets.get_mut(slot as usize) else {
            return Ok(());
        };
        match set.phase_mut(event.phase) {
            Some(cb) => cb(event),
            None => Ok(()),
        }
    }

    /// True when `slot` has a handler for `phase` (used to decide whether a
    /// node counts as "touched" for rollback ordering).
    pub fn has_phase(&self, slot: u32, phase: CallbackPhase) -> bool {
        let Some(Some(set)) = self.sets.get(slot as usize) else {
            return false;
        };
        match phase {
            CallbackPhase::Validate => set.validate.is_some(),
            CallbackPhase::Apply => set.apply.is_some(),
            CallbackPhase::Commit => set.commit.is_some(),
            CallbackPhase::Rollback => set.rollback.is_some(),
        }
    }

    /// Registers a plugin RPC handler.
    pub fn register_rpc(&mut self, module: &str, name: &str, cb: RpcCallback) {
        self.rpcs
            .insert((module.to_string(), name.to_string()), cb);
    }

    /// Dispatches to a plugin RPC handler, if one is installed.
    pub fn invoke_rpc(
        &mut self,
        name: &str,
        input: &XmlElement,
    ) -> Option<Result<Vec<XmlElement>, RpcError>> {
        let cb = self
            .rpcs
            .iter_mut()
            .find(|((_, n), _)| n == name)
            .map(|(_, cb)| cb)?;
        Some(cb(input))
    }

    /// Bind status of `(module, defpath)`, for introspection.
    pub fn status(&self, module: &str, defpath: &str) -> Option<BindStatus> {
        self.modules
            .get(module)?
            .records
            .iter()
            .find(|r| r.defpath == defpath)
            .map(|r| r.status)
    }

    /// Revision actually bound for `(module, defpath)`.
    pub fn bound_revision(&self, module: &str, defpath: &str) -> Option<&str> {
        self.modules
            .get(module)?
            .records
            .iter()
            .find(|r| r.defpath == defpath)
            .and_then(|r| r.bound_revision.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        error::ErrorKind,
        yang::{
            ast::{ModuleDecl, NodeDecl, TypeSpec},
            resolve::load_module,
        },
    };

    fn test_module() -> ModuleDecl {
        let mut m = ModuleDecl::new("sys", "sys", "urn:test:sys", "2025-01-01");
        m.body = vec![NodeDecl::container(
            "foo",
            vec![NodeDecl::leaf("a", TypeSpec::named("string"))],
        )];
        m
    }

    fn logging_set(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> CallbackSet {
        let l1 = Arc::clone(log);
        let l2 = Arc::clone(log);
        CallbackSet {
            validate: Some(Box::new(move |e| {
                l1.lock().expect("lock").push(format!("{tag}:validate:{}", e.path));
                Ok(())
            })),
            apply: Some(Box::new(move |e| {
                l2.lock().expect("lock").push(format!("{tag}:apply:{}", e.path));
                Ok(())
            })),
            commit: None,
            rollback: None,
        }
    }

    fn event(phase: CallbackPhase, path: &str) -> EditEvent<'_> {
        EditEvent {
            session_id: 1,
            user: "admin",
            message_id: "1",
            phase,
            operation: EditOperation::Merge,
            path,
            newval: None,
            curval: None,
        }
    }

    #[test]
    fn early_registration_parks_then_binds_on_load() {
        let mut ctx = SchemaContext::new();
        let mut reg = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        // The module is not loaded yet: the record waits.
        reg.register(&mut ctx, "sys", "/sys:foo", logging_set("foo", &log));
        assert_eq!(reg.status("sys", "/sys:foo"), Some(BindStatus::Waiting));
        assert_eq!(reg.bound_revision("sys", "/sys:foo"), None);

        load_module(&mut ctx, &test_module()).expect("module loads");
        reg.bind_module(&mut ctx, "sys");

        assert_eq!(reg.status("sys", "/sys:foo"), Some(BindStatus::Bound));
        assert_eq!(reg.bound_revision("sys", "/sys:foo"), Some("2025-01-01"));
        let node = ctx.resolve_schema_path("/sys:foo").expect("node");
        assert!(ctx.node(node).callback_slot.is_some());
    }

    #[test]
    fn late_registration_binds_immediately() {
        let mut ctx = SchemaContext::new();
        load_module(&mut ctx, &test_module()).expect("module loads");
        let mut reg = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        reg.register(&mut ctx, "sys", "/sys:foo", logging_set("foo", &log));
        assert_eq!(reg.status("sys", "/sys:foo"), Some(BindStatus::Bound));

        let slot = ctx
            .node(ctx.resolve_schema_path("/sys:foo").expect("node"))
            .callback_slot
            .expect("slot written");
        reg.invoke(slot, &event(CallbackPhase::Validate, "/sys:foo"))
            .expect("validate handler runs");
        // No commit handler was installed: the invoke is a no-op.
        reg.invoke(slot, &event(CallbackPhase::Commit, "/sys:foo"))
            .expect("missing phase is not an error");
        assert!(reg.has_phase(slot, CallbackPhase::Apply));
        assert!(!reg.has_phase(slot, CallbackPhase::Rollback));

        assert_eq!(
            log.lock().expect("lock").as_slice(),
            ["foo:validate:/sys:foo"]
        );
    }

    #[test]
    fn reregistration_replaces_the_set_in_place() {
        let mut ctx = SchemaContext::new();
        load_module(&mut ctx, &test_module()).expect("module loads");
        let mut reg = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        reg.register(&mut ctx, "sys", "/sys:foo", logging_set("old", &log));
        let slot = ctx
            .node(ctx.resolve_schema_path("/sys:foo").expect("node"))
            .callback_slot
            .expect("slot");

        // Idempotent per (module, path): the slot stays, the set changes.
        reg.register(&mut ctx, "sys", "/sys:foo", logging_set("new", &log));
        assert_eq!(reg.status("sys", "/sys:foo"), Some(BindStatus::Bound));
        reg.invoke(slot, &event(CallbackPhase::Apply, "/sys:foo"))
            .expect("replacement handler runs");
        assert_eq!(
            log.lock().expect("lock").as_slice(),
            ["new:apply:/sys:foo"]
        );
    }

    #[test]
    fn unregister_releases_records_and_clears_slots() {
        let mut ctx = SchemaContext::new();
        load_module(&mut ctx, &test_module()).expect("module loads");
        let mut reg = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        reg.register(&mut ctx, "sys", "/sys:foo", logging_set("foo", &log));
        let node = ctx.resolve_schema_path("/sys:foo").expect("node");
        let slot = ctx.node(node).callback_slot.expect("slot");

        reg.unregister_module(&mut ctx, "sys");
        assert_eq!(ctx.node(node).callback_slot, None);
        assert_eq!(reg.status("sys", "/sys:foo"), None);
        reg.invoke(slot, &event(CallbackPhase::Validate, "/sys:foo"))
            .expect("released slot is a no-op");
        assert!(log.lock().expect("lock").is_empty());
    }

    #[test]
    fn rpc_table_dispatches_by_name() {
        let mut reg = CallbackRegistry::new();
        reg.register_rpc(
            "sys",
            "ping",
            Box::new(|op| {
                let mut pong = XmlElement::new("pong");
                pong.text = op.child_text("payload").unwrap_or_default().to_string();
                Ok(vec![pong])
            }),
        );
        reg.register_rpc(
            "sys",
            "always-fails",
            Box::new(|_| Err(crate::error::RpcError::new(ErrorKind::OperationFailed))),
        );

        let mut input = XmlElement::new("ping");
        let mut payload = XmlElement::new("payload");
        payload.text = "hi".to_string();
        input.children.push(payload);

        let out = reg
            .invoke_rpc("ping", &input)
            .expect("handler installed")
            .expect("handler succeeds");
        assert_eq!(out[0].name, "pong");
        assert_eq!(out[0].text, "hi");

        let err = reg
            .invoke_rpc("always-fails", &input)
            .expect("handler installed")
            .expect_err("handler fails");
        assert_eq!(err.kind, ErrorKind::OperationFailed);

        assert!(reg.invoke_rpc("no-such-rpc", &input).is_none());
    }
}
