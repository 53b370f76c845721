// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Instance value trees.
//!
//! Nodes live in a slot arena with parent indices instead of pointers, so
//! subtree removal and scratch cloning stay cheap and safe. A node is
//! either *materialized* (payload stored inline) or *virtual* (payload
//! produced by a registered getter at read time).

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    error::{ErrorKind, RpcError},
    yang::{schema::NodeId, typedef::ScalarValue},
};

/// Index of a node inside its [`ValueTree`].
pub type NodeRef = usize;

/// Read-time producer for a virtual leaf.
pub type VirtualGetter =
    Arc<dyn Fn() -> Result<ScalarValue, RpcError> + Send + Sync>;

/// One instance node.
#[derive(Clone)]
pub struct ValueNode {
    /// Compiled schema node this instance was parsed against.
    pub schema: Option<NodeId>,
    /// Local element name, denormalized for filter matching.
    pub name: String,
    pub parent: Option<NodeRef>,
    /// Ordered child sequence (document order).
    pub children: Vec<NodeRef>,
    pub payload: Option<ScalarValue>,
    /// Metadata attributes (`operation`, `insert`, vendor extras).
    pub attrs: BTreeMap<String, String>,
    /// Set for virtual nodes; read-only from the transaction engine.
    pub getter: Option<VirtualGetter>,
    /// Last mutation instant.
    pub modified: DateTime<Utc>,
}

impl std::fmt::Debug for ValueNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueNode")
            .field("name", &self.name)
            .field("payload", &self.payload)
            .field("children", &self.children.len())
            .field("virtual", &self.getter.is_some())
            .finish()
    }
}

impl ValueNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            parent: None,
            children: Vec::new(),
            payload: None,
            attrs: BTreeMap::new(),
            getter: None,
            modified: Utc::now(),
        }
    }

    pub fn leaf(name: impl Into<String>, payload: ScalarValue) -> Self {
        let mut n = Self::new(name);
        n.payload = Some(payload);
        n
    }

    pub fn is_virtual(&self) -> bool {
        self.getter.is_some()
    }
}

/// An ordered tree of value nodes.
#[derive(Clone, Debug, Default)]
pub struct ValueTree {
    slots: Vec<Option<ValueNode>>,
    free: Vec<NodeRef>,
    root: NodeRef,
}

impl ValueTree {
    /// A tree holding just a root node with the given name.
    pub fn with_root(name: impl Into<String>) -> Self {
        let mut t = Self::default();
        let root = t.alloc(ValueNode::new(name));
        t.root = root;
        t
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    fn alloc(&mut self, node: ValueNode) -> NodeRef {
        if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(node);
            slot
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        }
    }

    pub fn get(&self, r: NodeRef) -> &ValueNode {
        self.slots[r].as_ref().expect("stale node ref")
    }

    pub fn get_mut(&mut self, r: NodeRef) -> &mut ValueNode {
        self.slots[r].as_mut().expect("stale node ref")
    }

    pub fn name(&self, r: NodeRef) -> &str {
        &self.get(r).name
    }

    pub fn parent(&self, r: NodeRef) -> Option<NodeRef> {
        self.get(r).parent
    }

    pub fn children(&self, r: NodeRef) -> impl Iterator<Item = NodeRef> + '_ {
        self.get(r).children.iter().copied()
    }

    /// Appends `node` under `parent` and returns its ref.
    pub fn append_child(&mut self, parent: NodeRef, mut node: ValueNode) -> NodeRef {
        node.parent = Some(parent);
        let r = self.alloc(node);
        self.get_mut(parent).children.push(r);
        r
    }

    /// Inserts `node` under `parent` at `pos` in the child sequence.
    pub fn insert_child_at(
        &mut self,
        parent: NodeRef,
        pos: usize,
        mut node: ValueNode,
    ) -> NodeRef {
        node.parent = Some(parent);
        let r = self.alloc(node);
        let children = &mut self.get_mut(parent).children;
        let pos = pos.min(children.len());
        children.insert(pos, r);
        r
    }

    /// Position of `child` in its parent's ordered sequence.
    pub fn child_position(&self, child: NodeRef) -> Option<usize> {
        let p = self.parent(child)?;
        self.get(p).children.iter().position(|c| *c == child)
    }

    /// Detaches and frees an entire subtree.
    pub fn remove_subtree(&mut self, r: NodeRef) {
        if let Some(p) = self.parent(r) {
            self.get_mut(p).children.retain(|c| *c != r);
        }
        let mut stack = vec![r];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.slots[cur].take() {
                stack.extend(node.children);
                self.free.push(cur);
            }
        }
    }

    /// First direct child with the given local name.
    pub fn find_child(&self, parent: NodeRef, name: &str) -> Option<NodeRef> {
        self.children(parent).find(|c| self.name(*c) == name)
    }

    /// All direct children with the given local name (list entries).
    pub fn find_children(&self, parent: NodeRef, name: &str) -> Vec<NodeRef> {
        self.children(parent)
            .filter(|c| self.name(*c) == name)
            .collect()
    }

    /// Finds a list entry by its key-leaf tuple.
    pub fn find_list_entry(
        &self,
        parent: NodeRef,
        name: &str,
        keys: &[(String, String)],
    ) -> Option<NodeRef> {
        self.find_children(parent, name).into_iter().find(|entry| {
            keys.iter().all(|(k, v)| {
                self.find_child(*entry, k)
                    .and_then(|kc| self.canonical_value(kc))
                    .as_deref()
                    == Some(v.as_str())
            })
        })
    }

    /// Canonical string payload; virtual leaves call their getter.
    pub fn canonical_value(&self, r: NodeRef) -> Option<String> {
        let node = self.get(r);
        if let Some(getter) = &node.getter {
            return getter().ok().map(|v| v.to_canonical());
        }
        node.payload.as_ref().map(ScalarValue::to_canonical)
    }

    /// True when `r` or any ancestor is virtual; such nodes refuse edits.
    pub fn in_virtual_region(&self, r: NodeRef) -> bool {
        let mut cur = Some(r);
        while let Some(n) = cur {
            if self.get(n).is_virtual() {
                return true;
            }
            cur = self.parent(n);
        }
        false
    }

    /// Copies the subtree rooted at `src` in `src_tree` under `dst_parent`.
    pub fn graft_subtree(
        &mut self,
        dst_parent: NodeRef,
        src_tree: &ValueTree,
        src: NodeRef,
    ) -> NodeRef {
        let mut node = src_tree.get(src).clone();
        node.children = Vec::new();
        let new_ref = self.append_child(dst_parent, node);
        for child in src_tree.children(src) {
            self.graft_subtree(new_ref, src_tree, child);
        }
        new_ref
    }

    /// Canonical instance-identifier of a node, for `error-path`.
    pub fn instance_path(&self, r: NodeRef) -> String {
        let mut segs = Vec::new();
        let mut cur = Some(r);
        while let Some(n) = cur {
            if self.parent(n).is_none() {
                break; // synthetic root is not part of the path
            }
            let node = self.get(n);
            // List entries are distinguished by their key leaves.
            let keys: Vec<String> = self
                .children(n)
                .filter_map(|c| {
                    let child = self.get(c);
                    let is_key = child.attrs.contains_key("key");
                    is_key.then(|| {
                        format!(
                            "[{}='{}']",
                            child.name,
                            self.canonical_value(c).unwrap_or_default()
                        )
                    })
                })
                .collect();
            segs.push(format!("{}{}", node.name, keys.concat()));
            cur = self.parent(n);
        }
        segs.reverse();
        format!("/{}", segs.join("/"))
    }

    /// Marks `r` and every ancestor as modified now.
    pub fn touch(&mut self, r: NodeRef) {
        let now = Utc::now();
        let mut cur = Some(r);
        while let Some(n) = cur {
            self.get_mut(n).modified = now;
            cur = self.parent(n);
        }
    }

    /// Number of live nodes (diagnostics and tests).
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

/// The edit rejection every virtual node produces.
pub fn virtual_edit_error(path: &str) -> RpcError {
    RpcError::new(ErrorKind::OperationNotSupported)
        .with_path(path)
        .with_message("virtual nodes are read-only")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_getter(v: u64) -> VirtualGetter {
        Arc::new(move || Ok(ScalarValue::Uint(v)))
    }

    #[test]
    fn arena_reuses_freed_slots() {
        let mut t = ValueTree::with_root("data");
        let a = t.append_child(t.root(), ValueNode::new("a"));
        t.append_child(a, ValueNode::new("b"));
        let before = t.slots.len();
        t.remove_subtree(a);
        let c = t.append_child(t.root(), ValueNode::new("c"));
        assert!(c < before, "freed slot should be reused");
        assert_eq!(t.find_child(t.root(), "c"), Some(c));
        assert_eq!(t.find_child(t.root(), "a"), None);
    }

    #[test]
    fn list_entry_lookup_by_keys() {
        let mut t = ValueTree::with_root("data");
        let list_parent = t.root();
        for name in ["eth0", "eth1"] {
            let entry = t.append_child(list_parent, ValueNode::new("interface"));
            t.append_child(
                entry,
                ValueNode::leaf("name", ScalarValue::Text(name.into())),
            );
        }
        let hit = t
            .find_list_entry(
                list_parent,
                "interface",
                &[("name".to_string(), "eth1".to_string())],
            )
            .expect("entry found");
        assert_eq!(
            t.find_child(hit, "name").and_then(|c| t.canonical_value(c)),
            Some("eth1".to_string())
        );
    }

    #[test]
    fn virtual_leaf_reads_through_getter() {
        let mut t = ValueTree::with_root("data");
        let mut leaf = ValueNode::new("rx-packets");
        leaf.getter = Some(counter_getter(42));
        let r = t.append_child(t.root(), leaf);
        assert_eq!(t.canonical_value(r), Some("42".to_string()));
        assert!(t.in_virtual_region(r));
        assert!(!t.in_virtual_region(t.root()));
    }

    #[test]
    fn graft_preserves_order() {
        let mut src = ValueTree::with_root("data");
        let c = src.append_child(src.root(), ValueNode::new("c"));
        for n in ["one", "two", "three"] {
            src.append_child(c, ValueNode::leaf(n, ScalarValue::Empty));
        }

        let mut dst = ValueTree::with_root("data");
        let grafted = dst.graft_subtree(dst.root(), &src, c);
        let names: Vec<String> =
            dst.children(grafted).map(|r| dst.name(r).to_string()).collect();
        assert_eq!(names, ["one", "two", "three"]);
    }
}
