// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The three-phase transaction driver.
//!
//! Phase 1 validates the whole delta against the live tree without
//! mutating anything. Phase 2 replays the delta onto a scratch clone.
//! Phase 3 swaps the scratch in atomically and runs commit callbacks, or
//! unwinds by firing rollback callbacks in reverse order over every node
//! that had received a phase callback.

use tracing::{debug, warn};

use crate::{
    datastore::{
        store::Datastore,
        value::{NodeRef, ValueNode, ValueTree, virtual_edit_error},
    },
    error::{ErrorKind, RpcError},
    registry::{CallbackPhase, CallbackRegistry, EditEvent},
    xpath,
    txn::plan::{
        DefaultOperation, EditNode, EditOperation, EditPlan, ErrorOption, InsertMode,
        TestOption,
    },
    yang::{
        ast::NodeKind,
        schema::SchemaContext,
        typedef::BaseKind,
    },
};

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Init,
    Validating,
    ValidateOk,
    ValidateFailed,
    Applying,
    ApplyOk,
    ApplyFailed,
    Committed,
    RolledBack,
    Aborted,
}

/// Who is editing, threaded into every callback.
#[derive(Debug, Clone, Copy)]
pub struct EditContext<'a> {
    pub session_id: u64,
    pub user: &'a str,
    pub message_id: &'a str,
}

/// Terminal result of one transaction.
#[derive(Debug)]
pub struct TxnOutcome {
    pub state: TxnState,
    pub errors: Vec<RpcError>,
    pub changed: bool,
}

impl TxnOutcome {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A node that received a successful phase callback; rollback unwinds
/// these in reverse order, commit confirms them in document order.
struct TouchedNode {
    slot: u32,
    path: String,
    op: EditOperation,
    delta: EditNode,
}

struct Txn<'a> {
    ctx: &'a SchemaContext,
    registry: &'a mut CallbackRegistry,
    ectx: EditContext<'a>,
    error_option: ErrorOption,
    default_op: DefaultOperation,
    errors: Vec<RpcError>,
    touched: Vec<TouchedNode>,
    /// Set once this walk must stop recording further work.
    halted: bool,
}

/// Runs one `<edit-config>` transaction against `store`.
pub fn run_edit(
    ctx: &SchemaContext,
    registry: &mut CallbackRegistry,
    store: &mut Datastore,
    plan: &EditPlan,
    ectx: EditContext<'_>,
) -> TxnOutcome {
    let mut txn = Txn {
        ctx,
        registry,
        ectx,
        error_option: plan.error_option,
        default_op: plan.default_op,
        errors: Vec::new(),
        touched: Vec::new(),
        halted: false,
    };

    debug!(session = ectx.session_id, target = %store.name, "edit-config begin");

    // ----- phase 1: validate -----
    let root = store.tree.root();
    let mut root_ok = Vec::with_capacity(plan.roots.len());
    for delta in &plan.roots {
        if txn.halted {
            root_ok.push(false);
            continue;
        }
        let ok = txn.validate_node(&store.tree, Some(root), delta, None);
        root_ok.push(ok);
    }

    let state = if txn.errors.is_empty() {
        TxnState::ValidateOk
    } else {
        TxnState::ValidateFailed
    };

    if state == TxnState::ValidateFailed {
        match plan.error_option {
            ErrorOption::RollbackOnError => {
                txn.unwind_rollback();
                return txn.finish(TxnState::RolledBack, false);
            },
            ErrorOption::StopOnError => {
                return txn.finish(TxnState::Aborted, false);
            },
            ErrorOption::ContinueOnError => {
                if !root_ok.iter().any(|ok| *ok) {
                    return txn.finish(TxnState::Aborted, false);
                }
                // Unaffected subtrees continue into the apply phase.
            },
        }
    }

    if plan.test_option == TestOption::TestOnly {
        return txn.finish(state, false);
    }

    // ----- phase 2: apply onto a scratch clone -----
    txn.halted = false;
    let errors_after_validate = txn.errors.len();
    let mut scratch = store.tree.clone();
    let scratch_root = scratch.root();
    let mut applied_any = false;

    for (delta, ok) in plan.roots.iter().zip(root_ok.iter()) {
        if !*ok || txn.halted {
            continue;
        }
        txn.apply_node(&mut scratch, scratch_root, delta, None, &mut applied_any);
    }

    let apply_failed = txn.errors.len() > errors_after_validate;
    if apply_failed && plan.error_option == ErrorOption::RollbackOnError {
        txn.unwind_rollback();
        return txn.finish(TxnState::RolledBack, false);
    }

    // ----- phase 3: commit -----
    // Under stop/continue-on-error the successfully applied part is kept
    // and the recorded errors ride back in the reply.
    if applied_any {
        store.install_root(scratch);
        txn.confirm_commit();
        txn.finish(TxnState::Committed, true)
    } else if txn.errors.is_empty() {
        txn.finish(TxnState::Committed, false)
    } else {
        txn.finish(TxnState::Aborted, false)
    }
}

impl<'a> Txn<'a> {
    fn finish(self, state: TxnState, changed: bool) -> TxnOutcome {
        debug!(?state, errors = self.errors.len(), "edit-config end");
        TxnOutcome {
            state,
            errors: self.errors,
            changed,
        }
    }

    fn record_error(&mut self, err: RpcError) {
        match self.error_option {
            ErrorOption::ContinueOnError => {},
            _ => self.halted = true,
        }
        self.errors.push(err);
    }

    /// Locates the instance a delta node addresses under `parent`.
    fn find_current(
        &self,
        tree: &ValueTree,
        parent: NodeRef,
        delta: &EditNode,
    ) -> Option<NodeRef> {
        let kind = self.ctx.node(delta.schema).kind;
        match kind {
            NodeKind::List => tree.find_list_entry(parent, &delta.name, &delta.keys),
            NodeKind::LeafList => {
                let want = delta.value.as_deref().unwrap_or_default();
                tree.find_children(parent, &delta.name)
                    .into_iter()
                    .find(|e| tree.canonical_value(*e).as_deref() == Some(want))
            },
            _ => tree.find_child(parent, &delta.name),
        }
    }

    // ----- validate -----

    fn validate_node(
        &mut self,
        tree: &ValueTree,
        parent: Option<NodeRef>,
        delta: &EditNode,
        inherited: Option<EditOperation>,
    ) -> bool {
        if self.halted {
            return false;
        }
        let snode = self.ctx.node(delta.schema);
        let path = self.ctx.canonical_path(delta.schema);
        let effective = delta.operation.or(inherited).or(self.default_op.as_op());
        let before = self.errors.len();

        // Nested operations must not contradict a destructive ancestor.
        if let Some(inh) = inherited
            && inh.is_destructive()
            && delta.operation.is_some_and(|op| !op.is_destructive())
        {
            self.record_error(
                RpcError::protocol(ErrorKind::BadAttribute)
                    .with_path(path.clone())
                    .with_message("non-destructive operation nested under delete"),
            );
            return false;
        }

        let cur = parent.and_then(|p| self.find_current(tree, p, delta));

        // State data and virtual regions never take edits.
        if effective.is_some() {
            if !snode.config {
                self.record_error(
                    RpcError::protocol(ErrorKind::OperationNotSupported)
                        .with_path(path.clone())
                        .with_message("cannot edit state data"),
                );
                return false;
            }
            if let Some(c) = cur
                && tree.in_virtual_region(c)
            {
                self.record_error(virtual_edit_error(&path));
                return false;
            }
        }

        // Operation vs. existence.
        match effective {
            Some(EditOperation::Create) if cur.is_some() => {
                self.record_error(
                    RpcError::protocol(ErrorKind::DataExists).with_path(path.clone()),
                );
                return false;
            },
            Some(EditOperation::Delete) if cur.is_none() => {
                self.record_error(
                    RpcError::protocol(ErrorKind::DataMissing).with_path(path.clone()),
                );
                return false;
            },
            None if cur.is_none() => {
                // default-operation=none: pure selectors must exist.
                self.record_error(
                    RpcError::protocol(ErrorKind::DataMissing)
                        .with_path(path.clone())
                        .with_message("node addressed with no operation does not exist"),
                );
                return false;
            },
            _ => {},
        }

        // Typed payload checks for leafy nodes.
        if snode.is_leafy()
            && let Some(value) = &delta.value
            && !effective.is_some_and(|op| op.is_destructive())
            && let Some(tid) = snode.typedef
        {
            let td = self.ctx.typedef(tid);
            match td.parse_value(self.ctx, value) {
                Err(e) => {
                    self.record_error(e.with_path(path.clone()));
                    return false;
                },
                Ok(_) => {
                    if let Err(e) =
                        self.check_leafref_instance(tree, parent, cur, td, value)
                    {
                        self.record_error(e.with_path(path.clone()));
                        return false;
                    }
                },
            }
        }

        // `when` gates applicability, `must` adds predicates.
        let eval_ctx = cur.or(parent).unwrap_or(tree.root());
        if let Some(when) = &snode.when
            && when.eval(tree, eval_ctx).is_empty()
        {
            self.record_error(
                RpcError::new(ErrorKind::OperationFailed)
                    .with_path(path.clone())
                    .with_message("when condition is false"),
            );
            return false;
        }
        for must in &snode.must {
            if must.eval(tree, eval_ctx).is_empty() {
                self.record_error(
                    RpcError::new(ErrorKind::OperationFailed)
                        .with_path(path.clone())
                        .with_message(format!("must condition '{must}' is false")),
                );
                return false;
            }
        }

        // Ordered-by-user inserts must name a reachable anchor.
        if let Some(insert) = &delta.insert {
            if !snode.ordered_by_user {
                self.record_error(
                    RpcError::protocol(ErrorKind::UnknownAttribute)
                        .with_path(path.clone())
                        .with_message("insert on a node not ordered-by user"),
                );
                return false;
            }
            if let Some(p) = parent
                && let InsertMode::Before(anchor) | InsertMode::After(anchor) = insert
                && self.resolve_anchor(tree, p, delta, anchor).is_none()
            {
                self.record_error(
                    RpcError::protocol(ErrorKind::BadAttribute)
                        .with_path(path.clone())
                        .with_message("insert anchor does not exist"),
                );
                return false;
            }
        }

        // List cardinality and uniqueness, checked prospectively.
        if snode.kind == NodeKind::List
            && let Some(p) = parent
            && let Err(e) = self.check_list_constraints(tree, p, delta, effective)
        {
            self.record_error(e);
            return false;
        }

        // Mandatory children must arrive with a fresh container instance.
        if matches!(snode.kind, NodeKind::Container | NodeKind::List)
            && cur.is_none()
            && effective.is_some_and(|op| !op.is_destructive())
        {
            for child_id in &snode.children {
                let child = self.ctx.node(*child_id);
                if child.mandatory
                    && child.default.is_none()
                    && !delta.children.iter().any(|c| c.name == child.name)
                {
                    self.record_error(
                        RpcError::protocol(ErrorKind::MissingElement)
                            .with_path(path.clone())
                            .with_message(format!(
                                "mandatory leaf '{}' is missing",
                                child.name
                            )),
                    );
                    return false;
                }
            }
        }

        // Engine checks passed; give the registered validator its turn.
        if let Some(slot) = snode.callback_slot {
            let event = EditEvent {
                session_id: self.ectx.session_id,
                user: self.ectx.user,
                message_id: self.ectx.message_id,
                phase: CallbackPhase::Validate,
                operation: effective.unwrap_or(EditOperation::Merge),
                path: &path,
                newval: (!effective.is_some_and(|op| op.is_destructive()))
                    .then_some(delta),
                curval: cur.and_then(|c| tree.canonical_value(c)),
            };
            match self.registry.invoke(slot, &event) {
                Ok(()) => self.touched.push(TouchedNode {
                    slot,
                    path: path.clone(),
                    op: event.operation,
                    delta: delta.clone(),
                }),
                Err(e) => {
                    self.record_error(e.with_path(path.clone()));
                    return false;
                },
            }
        }

        // Recurse unless this node is being deleted outright.
        if !effective.is_some_and(|op| op.is_destructive()) {
            for child in &delta.children {
                self.validate_node(tree, cur, child, effective);
            }
        }

        self.errors.len() == before
    }

    /// `require-instance` leafrefs must point at live data at validate time.
    fn check_leafref_instance(
        &self,
        tree: &ValueTree,
        parent: Option<NodeRef>,
        leaf: Option<NodeRef>,
        td: &crate::yang::typedef::Typedef,
        value: &str,
    ) -> Result<(), RpcError> {
        let mut cur = td;
        loop {
            if cur.base == BaseKind::Leafref {
                break;
            }
            match cur.parent {
                Some(p) => cur = self.ctx.typedef(p),
                None => return Ok(()),
            }
        }
        let Some(lref) = &cur.leafref else {
            return Ok(());
        };
        if !lref.require_instance {
            return Ok(());
        }

        // Relative paths anchor at the leaf. While the leaf is still being
        // created, its first `..` step collapses onto the parent instead.
        let targets = if let Some(l) = leaf {
            lref.path.eval(tree, l)
        } else if lref.path.absolute {
            lref.path.eval(tree, tree.root())
        } else {
            let mut steps = lref.path.steps.clone();
            if steps.first().is_some_and(|s| s.axis == xpath::Axis::Parent) {
                steps.remove(0);
            }
            let trimmed = xpath::Path {
                absolute: false,
                steps,
            };
            trimmed.eval(tree, parent.unwrap_or(tree.root()))
        };
        let hit = targets
            .into_iter()
            .any(|r| tree.canonical_value(r).as_deref() == Some(value));
        if hit {
            Ok(())
        } else {
            Err(RpcError::new(ErrorKind::DataMissing)
                .with_message(format!("leafref target '{value}' does not exist")))
        }
    }

    fn resolve_anchor(
        &self,
        tree: &ValueTree,
        parent: NodeRef,
        delta: &EditNode,
        anchor: &[(String, String)],
    ) -> Option<NodeRef> {
        let kind = self.ctx.node(delta.schema).kind;
        match kind {
            NodeKind::LeafList => {
                let want = anchor.first().map(|(_, v)| v.as_str())?;
                tree.find_children(parent, &delta.name)
                    .into_iter()
                    .find(|e| tree.canonical_value(*e).as_deref() == Some(want))
            },
            _ => tree.find_list_entry(parent, &delta.name, anchor),
        }
    }

    fn check_list_constraints(
        &self,
        tree: &ValueTree,
        parent: NodeRef,
        delta: &EditNode,
        effective: Option<EditOperation>,
    ) -> Result<(), RpcError> {
        let snode = self.ctx.node(delta.schema);
        let path = self.ctx.canonical_path(delta.schema);
        let existing = tree.find_children(parent, &delta.name);
        let exists = tree
            .find_list_entry(parent, &delta.name, &delta.keys)
            .is_some();

        let prospective = match effective {
            Some(EditOperation::Create) => existing.len() + 1,
            Some(EditOperation::Merge) | Some(EditOperation::Replace) if !exists => {
                existing.len() + 1
            },
            Some(op) if op.is_destructive() && exists => existing.len() - 1,
            _ => existing.len(),
        };

        if let Some(max) = snode.max_elements
            && prospective > max as usize
        {
            return Err(RpcError::new(ErrorKind::OperationFailed)
                .with_app_tag("too-many-elements")
                .with_path(path));
        }
        if let Some(min) = snode.min_elements
            && prospective < min as usize
        {
            return Err(RpcError::new(ErrorKind::OperationFailed)
                .with_app_tag("too-few-elements")
                .with_path(path));
        }

        // Unique tuples: the incoming entry must not collide with a
        // surviving existing entry.
        if !exists && !effective.is_some_and(|op| op.is_destructive()) {
            for unique in &snode.unique {
                let new_tuple: Vec<Option<String>> = unique
                    .iter()
                    .map(|leaf| {
                        delta
                            .children
                            .iter()
                            .find(|c| &c.name == leaf)
                            .and_then(|c| c.value.clone())
                    })
                    .collect();
                if new_tuple.iter().any(Option::is_none) {
                    continue;
                }
                for entry in &existing {
                    let entry_tuple: Vec<Option<String>> = unique
                        .iter()
                        .map(|leaf| {
                            tree.find_child(*entry, leaf)
                                .and_then(|c| tree.canonical_value(c))
                        })
                        .collect();
                    if entry_tuple == new_tuple {
                        return Err(RpcError::new(ErrorKind::OperationFailed)
                            .with_app_tag("data-not-unique")
                            .with_path(path));
                    }
                }
            }
        }
        Ok(())
    }

    // ----- apply -----

    fn apply_node(
        &mut self,
        scratch: &mut ValueTree,
        parent: NodeRef,
        delta: &EditNode,
        inherited: Option<EditOperation>,
        applied_any: &mut bool,
    ) {
        if self.halted {
            return;
        }
        let snode = self.ctx.node(delta.schema);
        let path = self.ctx.canonical_path(delta.schema);
        let effective = delta.operation.or(inherited).or(self.default_op.as_op());
        let cur = self.find_current(scratch, parent, delta);
        // Callbacks see the pre-edit value.
        let cur_canonical = cur.and_then(|c| scratch.canonical_value(c));

        let mut recurse_into: Option<NodeRef> = None;

        match effective {
            Some(EditOperation::Merge) | None => match cur {
                Some(existing) => {
                    if snode.is_leafy()
                        && let Some(value) = &delta.value
                    {
                        self.overwrite_leaf(scratch, existing, delta, value);
                        *applied_any = true;
                    }
                    recurse_into = Some(existing);
                },
                None => {
                    if effective.is_some() {
                        self.create_subtree(scratch, parent, delta);
                        *applied_any = true;
                    }
                },
            },
            Some(EditOperation::Replace) => {
                if let Some(existing) = cur {
                    scratch.remove_subtree(existing);
                }
                self.create_subtree(scratch, parent, delta);
                *applied_any = true;
            },
            Some(EditOperation::Create) => {
                self.create_subtree(scratch, parent, delta);
                *applied_any = true;
            },
            Some(EditOperation::Delete) | Some(EditOperation::Remove) => {
                if let Some(existing) = cur {
                    scratch.remove_subtree(existing);
                    *applied_any = true;
                }
            },
        }

        // Apply callbacks fire in document order, node before children.
        if let Some(slot) = snode.callback_slot
            && effective.is_some()
        {
            let op = effective.unwrap_or(EditOperation::Merge);
            let event = EditEvent {
                session_id: self.ectx.session_id,
                user: self.ectx.user,
                message_id: self.ectx.message_id,
                phase: CallbackPhase::Apply,
                operation: op,
                path: &path,
                newval: (!op.is_destructive()).then_some(delta),
                curval: cur_canonical,
            };
            match self.registry.invoke(slot, &event) {
                Ok(()) => self.touched.push(TouchedNode {
                    slot,
                    path: path.clone(),
                    op,
                    delta: delta.clone(),
                }),
                Err(e) => {
                    self.record_error(e.with_path(path));
                    return;
                },
            }
        }

        if let Some(into) = recurse_into {
            for child in &delta.children {
                self.apply_node(scratch, into, child, effective, applied_any);
            }
        }
    }

    fn overwrite_leaf(
        &mut self,
        scratch: &mut ValueTree,
        node: NodeRef,
        delta: &EditNode,
        value: &str,
    ) {
        let payload = self
            .ctx
            .node_typedef(delta.schema)
            .map(|tid| self.ctx.typedef(tid).parse_value(self.ctx, value));
        match payload {
            // Validate already vetted the value; a late failure here means
            // the scratch diverged, which is a bug worth surfacing loudly.
            Some(Err(e)) => {
                warn!(path = %scratch.instance_path(node), "late parse failure");
                self.record_error(e);
            },
            Some(Ok(v)) => {
                scratch.get_mut(node).payload = Some(v);
                scratch.touch(node);
            },
            None => {},
        }
    }

    /// Builds the delta subtree under `parent`, honoring insert position.
    fn create_subtree(
        &mut self,
        scratch: &mut ValueTree,
        parent: NodeRef,
        delta: &EditNode,
    ) -> NodeRef {
        let snode = self.ctx.node(delta.schema);
        let mut node = ValueNode::new(delta.name.clone());
        node.schema = Some(delta.schema);

        if snode.is_leafy()
            && let Some(value) = &delta.value
            && let Some(tid) = snode.typedef
            && let Ok(v) = self.ctx.typedef(tid).parse_value(self.ctx, value)
        {
            node.payload = Some(v);
        } else if snode.kind == NodeKind::Anyxml
            && let Some(value) = &delta.value
            && !value.is_empty()
        {
            // Anyxml content is opaque; keep the raw text.
            node.payload = Some(crate::yang::typedef::ScalarValue::Text(value.clone()));
        }

        let pos = self.insert_position(scratch, parent, delta);
        let new_ref = match pos {
            Some(p) => scratch.insert_child_at(parent, p, node),
            None => scratch.append_child(parent, node),
        };

        // Key leaves are marked so instance paths can name the entry.
        let key_names: Vec<String> = snode
            .keys
            .iter()
            .map(|k| self.ctx.node(*k).name.clone())
            .collect();

        for child in &delta.children {
            let r = self.create_subtree(scratch, new_ref, child);
            if key_names.contains(&child.name) {
                scratch
                    .get_mut(r)
                    .attrs
                    .insert("key".to_string(), "true".to_string());
            }
        }
        scratch.touch(new_ref);
        new_ref
    }

    /// Child-sequence position for ordered-by-user inserts; `None` appends.
    fn insert_position(
        &self,
        scratch: &ValueTree,
        parent: NodeRef,
        delta: &EditNode,
    ) -> Option<usize> {
        let insert = delta.insert.as_ref()?;
        let siblings = scratch.find_children(parent, &delta.name);
        match insert {
            InsertMode::First => siblings
                .first()
                .and_then(|f| scratch.child_position(*f)),
            InsertMode::Last => None,
            InsertMode::Before(anchor) => self
                .resolve_anchor(scratch, parent, delta, anchor)
                .and_then(|a| scratch.child_position(a)),
            InsertMode::After(anchor) => self
                .resolve_anchor(scratch, parent, delta, anchor)
                .and_then(|a| scratch.child_position(a))
                .map(|p| p + 1),
        }
    }

    // ----- phase 3 helpers -----

    /// Fires rollback handlers in reverse order over touched nodes.
    fn unwind_rollback(&mut self) {
        let touched = std::mem::take(&mut self.touched);
        for t in touched.iter().rev() {
            let event = EditEvent {
                session_id: self.ectx.session_id,
                user: self.ectx.user,
                message_id: self.ectx.message_id,
                phase: CallbackPhase::Rollback,
                operation: t.op,
                path: &t.path,
                newval: Some(&t.delta),
                curval: None,
            };
            if let Err(e) = self.registry.invoke(t.slot, &event) {
                // A failing rollback handler cannot stop the unwind.
                warn!(path = %t.path, error = %e, "rollback callback failed");
                self.errors
                    .push(RpcError::new(ErrorKind::RollbackFailed).with_path(&t.path));
            }
        }
    }

    /// Fires commit handlers in document order over touched nodes.
    fn confirm_commit(&mut self) {
        let mut seen = std::collections::HashSet::new();
        let touched = std::mem::take(&mut self.touched);
        for t in &touched {
            // A node touched in both validate and apply confirms once.
            if !seen.insert((t.slot, t.path.clone())) {
                continue;
            }
            let event = EditEvent {
                session_id: self.ectx.session_id,
                user: self.ectx.user,
                message_id: self.ectx.message_id,
                phase: CallbackPhase::Commit,
                operation: t.op,
                path: &t.path,
                newval: Some(&t.delta),
                curval: None,
            };
            if let Err(e) = self.registry.invoke(t.slot, &event) {
                warn!(path = %t.path, error = %e, "commit callback failed");
            }
        }
    }
}
