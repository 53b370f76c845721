// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Compiled schema tree.
//!
//! Modules own their nodes, typedefs and identities in per-module arenas;
//! every cross-module reference is an index pair, so unloading a module can
//! never leave a dangling pointer behind.

use crate::{
    xpath,
    yang::{ast::NodeKind, typedef::Typedef},
};

/// Index of a loaded module inside the context.
pub type ModuleIdx = u16;

/// Arena reference to a typedef.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypedefId {
    pub module: ModuleIdx,
    pub index: u32,
}

/// Arena reference to a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub module: ModuleIdx,
    pub index: u32,
}

/// Arena reference to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityId {
    pub module: ModuleIdx,
    pub index: u32,
}

/// A compiled `identity` statement.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub base: Option<IdentityId>,
}

/// A node in the compiled schema tree.
#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub kind: NodeKind,
    pub module: ModuleIdx,
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Resolved type, for leaf / leaf-list.
    pub typedef: Option<TypedefId>,
    /// Key leaves, for lists, in declaration order.
    pub keys: Vec<NodeId>,
    pub min_elements: Option<u32>,
    pub max_elements: Option<u32>,
    pub default: Option<String>,
    /// False for state (`config false`) data.
    pub config: bool,
    pub mandatory: bool,
    pub ordered_by_user: bool,
    /// `unique` constraints: descendant leaf names per constraint.
    pub unique: Vec<Vec<String>>,
    pub when: Option<xpath::Path>,
    pub must: Vec<xpath::Path>,
    /// Opaque slot written by the callback registry on bind.
    pub callback_slot: Option<u32>,
}

impl SchemaNode {
    pub fn new(kind: NodeKind, module: ModuleIdx, name: impl Into<String>) -> Self {
        Self {
            kind,
            module,
            name: name.into(),
            parent: None,
            children: Vec::new(),
            typedef: None,
            keys: Vec::new(),
            min_elements: None,
            max_elements: None,
            default: None,
            config: true,
            mandatory: false,
            ordered_by_user: false,
            unique: Vec::new(),
            when: None,
            must: Vec::new(),
            callback_slot: None,
        }
    }

    pub fn is_leafy(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf | NodeKind::LeafList)
    }
}

/// A loaded module with its arenas.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub prefix: String,
    pub namespace: String,
    pub revision: String,
    /// Verbatim source text, served by `get-schema`.
    pub source: String,
    /// Prefix bindings established by `import` statements.
    pub imports: Vec<(String, ModuleIdx)>,
    pub typedefs: Vec<Typedef>,
    /// Slots of module-scope typedefs, the only ones visible to importers.
    pub top_typedefs: Vec<u32>,
    pub nodes: Vec<SchemaNode>,
    pub identities: Vec<Identity>,
    /// Top-level data, rpc and notification nodes.
    pub top: Vec<NodeId>,
}

impl Module {
    /// Capability URI contributed by this module.
    pub fn capability_uri(&self) -> String {
        format!(
            "{}?module={}&revision={}",
            self.namespace, self.name, self.revision
        )
    }
}

/// All loaded modules; the synthetic root is the union of their top nodes.
#[derive(Debug, Default)]
pub struct SchemaContext {
    modules: Vec<Option<Module>>,
}

impl SchemaContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next [`Self::install`] call will use; the resolver bakes
    /// it into arena ids while the module is still under construction.
    pub fn next_index(&self) -> ModuleIdx {
        self.modules
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.modules.len()) as ModuleIdx
    }

    /// Installs a compiled module and returns its index.
    pub fn install(&mut self, module: Module) -> ModuleIdx {
        // Reuse a hole left by an unload if one exists.
        if let Some(slot) = self.modules.iter().position(Option::is_none) {
            self.modules[slot] = Some(module);
            slot as ModuleIdx
        } else {
            self.modules.push(Some(module));
            (self.modules.len() - 1) as ModuleIdx
        }
    }

    /// Removes a module. Refused while another loaded module imports it.
    pub fn unload(&mut self, name: &str) -> Result<Module, String> {
        let (idx, _) = self
            .find_module(name)
            .ok_or_else(|| format!("module not loaded: {name}"))?;
        let depended = self.modules.iter().flatten().any(|m| {
            m.name != name && m.imports.iter().any(|(_, mi)| *mi == idx)
        });
        if depended {
            return Err(format!("module {name} is imported by a loaded module"));
        }
        let m = self.modules[idx as usize]
            .take()
            .ok_or_else(|| format!("module not loaded: {name}"))?;
        Ok(m)
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleIdx, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.as_ref().map(|m| (i as ModuleIdx, m)))
    }

    pub fn module(&self, idx: ModuleIdx) -> &Module {
        self.modules[idx as usize]
            .as_ref()
            .expect("module index out of date")
    }

    fn module_mut(&mut self, idx: ModuleIdx) -> &mut Module {
        self.modules[idx as usize]
            .as_mut()
            .expect("module index out of date")
    }

    pub fn find_module(&self, name: &str) -> Option<(ModuleIdx, &Module)> {
        self.modules().find(|(_, m)| m.name == name)
    }

    pub fn find_module_by_namespace(&self, ns: &str) -> Option<(ModuleIdx, &Module)> {
        self.modules().find(|(_, m)| m.namespace == ns)
    }

    pub fn typedef(&self, id: TypedefId) -> &Typedef {
        &self.module(id.module).typedefs[id.index as usize]
    }

    pub fn typedef_mut(&mut self, id: TypedefId) -> &mut Typedef {
        &mut self.module_mut(id.module).typedefs[id.index as usize]
    }

    pub fn node(&self, id: NodeId) -> &SchemaNode {
        &self.module(id.module).nodes[id.index as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SchemaNode {
        &mut self.module_mut(id.module).nodes[id.index as usize]
    }

    pub fn identity(&self, id: IdentityId) -> &Identity {
        &self.module(id.module).identities[id.index as usize]
    }

    /// Type of the leaf behind a node, when it has one.
    pub fn node_typedef(&self, id: NodeId) -> Option<TypedefId> {
        self.node(id).typedef
    }

    /// Every top-level node across all loaded modules.
    pub fn top_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.modules().flat_map(|(_, m)| m.top.iter().copied())
    }

    /// Finds a top-level node by local name, optionally pinned to a module.
    pub fn find_top(&self, module: Option<&str>, name: &str) -> Option<NodeId> {
        for (_, m) in self.modules() {
            if let Some(want) = module
                && m.name != want
            {
                continue;
            }
            for id in &m.top {
                if self.node(*id).name == name {
                    return Some(*id);
                }
            }
        }
        None
    }

    /// Finds a direct child of `parent` by local name.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|c| self.node(*c).name == name)
    }

    /// Looks up an identity; empty module name searches every module.
    pub fn find_identity(&self, module: &str, name: &str) -> Option<IdentityId> {
        for (idx, m) in self.modules() {
            if !module.is_empty() && m.name != module && m.prefix != module {
                continue;
            }
            if let Some(pos) = m.identities.iter().position(|i| i.name == name) {
                return Some(IdentityId {
                    module: idx,
                    index: pos as u32,
                });
            }
        }
        None
    }

    /// True when `id` is transitively derived from `base`.
    pub fn identity_derived_from(&self, id: IdentityId, base: IdentityId) -> bool {
        let mut cur = self.identity(id).base;
        while let Some(b) = cur {
            if b == base {
                return true;
            }
            cur = self.identity(b).base;
        }
        false
    }

    /// Canonical absolute path of a schema node, `/module:a/b/c`.
    pub fn canonical_path(&self, id: NodeId) -> String {
        let mut segs = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            let node = self.node(n);
            match node.parent {
                Some(p) if self.node(p).module == node.module => {
                    segs.push(node.name.clone());
                },
                _ => {
                    let m = self.module(node.module);
                    segs.push(format!("{}:{}", m.name, node.name));
                },
            }
            cur = node.parent;
        }
        segs.reverse();
        format!("/{}", segs.join("/"))
    }

    /// Dereferences a canonical `/module:a/b/c` path to a schema node.
    pub fn resolve_schema_path(&self, path: &str) -> Option<NodeId> {
        let mut cur: Option<NodeId> = None;
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            let (module, name) = match seg.split_once(':') {
                Some((m, n)) => (Some(m), n),
                None => (None, seg),
            };
            cur = match cur {
                None => self.find_top(module, name),
                Some(p) => self.find_child(p, name),
            };
            cur?;
        }
        cur
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yang::typedef::BaseKind;

    fn tiny_module() -> Module {
        let mut nodes = Vec::new();
        let mut top_node = SchemaNode::new(NodeKind::Container, 0, "system");
        top_node.children = vec![NodeId { module: 0, index: 1 }];
        nodes.push(top_node);
        let mut leaf = SchemaNode::new(NodeKind::Leaf, 0, "hostname");
        leaf.parent = Some(NodeId { module: 0, index: 0 });
        leaf.typedef = Some(TypedefId { module: 0, index: 0 });
        nodes.push(leaf);

        Module {
            name: "sys".into(),
            prefix: "sys".into(),
            namespace: "urn:test:sys".into(),
            revision: "2025-01-01".into(),
            source: String::new(),
            imports: Vec::new(),
            typedefs: vec![Typedef::plain("string", BaseKind::String)],
            top_typedefs: vec![0],
            nodes,
            identities: Vec::new(),
            top: vec![NodeId { module: 0, index: 0 }],
        }
    }

    #[test]
    fn path_resolution_roundtrip() {
        let mut ctx = SchemaContext::new();
        let idx = ctx.install(tiny_module());
        assert_eq!(idx, 0);

        let leaf = ctx
            .resolve_schema_path("/sys:system/hostname")
            .expect("path resolves");
        assert_eq!(ctx.node(leaf).name, "hostname");
        assert_eq!(ctx.canonical_path(leaf), "/sys:system/hostname");
    }

    #[test]
    fn unload_refuses_while_imported() {
        let mut ctx = SchemaContext::new();
        let base = ctx.install(tiny_module());
        let mut dep = tiny_module();
        dep.name = "dep".into();
        dep.namespace = "urn:test:dep".into();
        dep.imports = vec![("sys".into(), base)];
        ctx.install(dep);

        assert!(ctx.unload("sys").is_err());
        ctx.unload("dep").expect("dep unloads");
        ctx.unload("sys").expect("sys unloads after dep");
    }

    #[test]
    fn capability_uri_carries_revision() {
        let m = tiny_module();
        assert_eq!(
            m.capability_uri(),
            "urn:test:sys?module=sys&revision=2025-01-01"
        );
    }
}
