// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The multi-pass typedef and schema resolver.
//!
//! Resolution runs in four passes over a tokenized module:
//!
//! 1. name resolution (scope chain, imports, shadow detection)
//! 2. named-typedef loop detection
//! 3. restriction keyword legality per base kind
//! 4. finalization: `min`/`max` replacement, interval normalization,
//!    pattern accumulation, enum/bit numbering, leafref and identityref
//!    late binding, default-value validation
//!
//! A module either installs completely or not at all; warnings (enum value
//! order, bit position order) never block installation.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::{
    xpath,
    yang::{
        ast::{
            BitDecl, EnumDecl, GroupingDecl, ModuleDecl, NodeDecl, NodeKind, QualName,
            RangeBound, RangeExpr, TypeSpec, TypedefDecl,
        },
        schema::{
            Identity, IdentityId, Module, ModuleIdx, NodeId, SchemaContext, SchemaNode,
            TypedefId,
        },
        typedef::{
            BaseKind, BitMember, CompiledPattern, EnumMember, Interval, Leafref,
            RangeDescriptor, RangeVal, Typedef, parse_decimal64,
        },
    },
};

/// Fatal resolution failures. `code()` gives the stable diagnostic name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("import {import}: revision {wanted} wanted, {loaded} loaded")]
    WrongVersion {
        import: String,
        wanted: String,
        loaded: String,
    },
    #[error("typedef loop through '{typedef}'")]
    Loop { typedef: String },
    #[error("'{keyword}' not allowed on {base} (typedef '{typedef}')")]
    RestrictionNotAllowed {
        typedef: String,
        keyword: &'static str,
        base: BaseKind,
    },
    #[error("derived range of '{typedef}' escapes its ancestor")]
    NotInRange { typedef: String },
    #[error("overlapping range intervals in '{typedef}'")]
    OverlapRange { typedef: String },
    #[error("range lower bound above upper bound in '{typedef}'")]
    InvalidRange { typedef: String },
    #[error("duplicate enum name '{name}' in '{typedef}'")]
    DuplicateEnumName { typedef: String, name: String },
    #[error("duplicate enum value {value} in '{typedef}'")]
    DuplicateEnumValue { typedef: String, value: i64 },
    #[error("'{name}' has no usable type")]
    MissingType { name: String },
    #[error("definition not found: '{name}'")]
    DefNotFound { name: String },
    #[error("invalid default '{value}' for '{typedef}': {reason}")]
    InvalidDefault {
        typedef: String,
        value: String,
        reason: String,
    },
    #[error("local typedef '{name}' shadows an outer definition")]
    ShadowedTypedef { name: String },
    #[error("bad pattern in '{typedef}': {source_text}")]
    BadPattern { typedef: String, source_text: String },
    #[error("bad path in '{context}': {path}")]
    InvalidPath { context: String, path: String },
}

impl ResolveError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::WrongVersion { .. } => "wrong-version",
            Self::Loop { .. } => "loop",
            Self::RestrictionNotAllowed { .. } => "restriction-not-allowed",
            Self::NotInRange { .. } => "not-in-range",
            Self::OverlapRange { .. } => "overlap-range",
            Self::InvalidRange { .. } => "invalid-range",
            Self::DuplicateEnumName { .. } => "duplicate-enum-name",
            Self::DuplicateEnumValue { .. } => "duplicate-enum-value",
            Self::MissingType { .. } => "missing-type",
            Self::DefNotFound { .. } => "def-not-found",
            Self::InvalidDefault { .. } => "invalid-default",
            Self::ShadowedTypedef { .. } => "shadowed-typedef",
            Self::BadPattern { .. } => "bad-pattern",
            Self::InvalidPath { .. } => "bad-path",
        }
    }
}

/// Non-fatal findings surfaced alongside a successful load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    /// Enum declarations out of increasing value order.
    EnumValueOrder { typedef: String, name: String },
    /// Bit declarations out of increasing position order.
    BitPositionOrder { typedef: String, name: String },
}

#[derive(Debug)]
pub struct ResolveOutcome {
    pub module: ModuleIdx,
    pub warnings: Vec<ResolveWarning>,
}

/// Loads one tokenized module into the context. Modules must arrive in
/// dependency order; imports of not-yet-loaded modules fail.
pub fn load_module(
    ctx: &mut SchemaContext,
    decl: &ModuleDecl,
) -> Result<ResolveOutcome, Vec<ResolveError>> {
    let midx = ctx.next_index();
    let mut b = Builder::new(ctx, decl, midx);

    b.resolve_imports(decl);
    let body = match b.expand_uses(&decl.body, &decl.groupings, 0) {
        Ok(body) => body,
        Err(e) => {
            b.errors.push(e);
            Vec::new()
        },
    };

    // Pass 1: allocate arenas, resolve every name through the scope chain.
    b.alloc_identities(decl);
    b.push_scope(&decl.typedefs);
    b.module.top_typedefs = (0..b.module.typedefs.len() as u32).collect();
    let top: Vec<NodeId> = body
        .iter()
        .filter_map(|n| b.build_node(n, None, true))
        .collect();
    b.module.top = top;
    b.pop_scope();

    b.resolve_identity_bases(decl);

    // Pass 2: named-typedef loops are fatal before any chain walk.
    b.detect_loops();

    if !b.has_loop_errors() {
        // Pass 3: restriction keywords must belong to the base kind.
        b.check_restrictions();
        // Pass 4: literal endpoints, normalized intervals, members, bases.
        b.finalize_typedefs();
    }

    let Builder {
        module,
        errors,
        warnings,
        pending,
        ..
    } = b;

    if !errors.is_empty() {
        return Err(errors);
    }

    let installed = ctx.install(module);
    debug_assert_eq!(installed, midx);

    // Late pass over the installed tree: leafref targets and defaults need
    // the full schema root, including this module's own top nodes.
    let mut late_errors = Vec::new();
    resolve_leafref_targets(ctx, midx, &mut late_errors);
    validate_defaults(ctx, midx, &pending, &mut late_errors);

    if !late_errors.is_empty() {
        let name = ctx.module(midx).name.clone();
        let _ = ctx.unload(&name);
        return Err(late_errors);
    }

    debug!(module = %ctx.module(midx).name, "module loaded");
    Ok(ResolveOutcome {
        module: midx,
        warnings,
    })
}

/// Unresolved restriction data kept beside each arena slot until pass 4.
#[derive(Debug, Clone)]
struct Pending {
    slot: u32,
    spec: TypeSpec,
    default: Option<String>,
}

struct Builder<'a> {
    ctx: &'a SchemaContext,
    midx: ModuleIdx,
    module: Module,
    pending: Vec<Pending>,
    /// Scope chain of typedef name -> arena slot, innermost last.
    scopes: Vec<HashMap<String, u32>>,
    errors: Vec<ResolveError>,
    warnings: Vec<ResolveWarning>,
}

impl<'a> Builder<'a> {
    fn new(ctx: &'a SchemaContext, decl: &ModuleDecl, midx: ModuleIdx) -> Self {
        Self {
            ctx,
            midx,
            module: Module {
                name: decl.name.clone(),
                prefix: decl.prefix.clone(),
                namespace: decl.namespace.clone(),
                revision: decl.revision.clone(),
                source: decl.source.clone(),
                imports: Vec::new(),
                typedefs: Vec::new(),
                top_typedefs: Vec::new(),
                nodes: Vec::new(),
                identities: Vec::new(),
                top: Vec::new(),
            },
            pending: Vec::new(),
            scopes: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn resolve_imports(&mut self, decl: &ModuleDecl) {
        for imp in &decl.imports {
            match self.ctx.find_module(&imp.module) {
                Some((idx, loaded)) => {
                    if let Some(rev) = &imp.revision
                        && rev != &loaded.revision
                    {
                        self.errors.push(ResolveError::WrongVersion {
                            import: imp.module.clone(),
                            wanted: rev.clone(),
                            loaded: loaded.revision.clone(),
                        });
                        continue;
                    }
                    self.module.imports.push((imp.prefix.clone(), idx));
                },
                None => self.errors.push(ResolveError::DefNotFound {
                    name: imp.module.clone(),
                }),
            }
        }
    }

    /// Replaces `uses` references with cloned grouping content. Grouping
    /// typedefs ride along as node-local typedefs at the expansion point.
    fn expand_uses(
        &mut self,
        nodes: &[NodeDecl],
        groupings: &[GroupingDecl],
        depth: usize,
    ) -> Result<Vec<NodeDecl>, ResolveError> {
        if depth > 32 {
            return Err(ResolveError::Loop {
                typedef: "uses".to_string(),
            });
        }
        let mut out = Vec::with_capacity(nodes.len());
        for n in nodes {
            let mut node = n.clone();
            let mut grafted = Vec::new();
            for g in &node.uses {
                let Some(grp) = groupings.iter().find(|grp| grp.name == g.name) else {
                    return Err(ResolveError::DefNotFound {
                        name: g.name.clone(),
                    });
                };
                node.typedefs.extend(grp.typedefs.iter().cloned());
                grafted.extend(grp.children.iter().cloned());
            }
            node.uses.clear();
            grafted.extend(std::mem::take(&mut node.children));
            node.children = self.expand_uses(&grafted, groupings, depth + 1)?;
            out.push(node);
        }
        Ok(out)
    }

    fn alloc_identities(&mut self, decl: &ModuleDecl) {
        for id in &decl.identities {
            self.module.identities.push(Identity {
                name: id.name.clone(),
                base: None,
            });
        }
    }

    fn resolve_identity_bases(&mut self, decl: &ModuleDecl) {
        for (i, id) in decl.identities.iter().enumerate() {
            let Some(base) = &id.base else { continue };
            match self.lookup_identity(base) {
                Some(found) => self.module.identities[i].base = Some(found),
                None => self.errors.push(ResolveError::DefNotFound {
                    name: base.name.clone(),
                }),
            }
        }
    }

    fn lookup_identity(&self, qn: &QualName) -> Option<IdentityId> {
        if qn.prefix.is_empty() || qn.prefix == self.module.prefix {
            let pos = self.module.identities.iter().position(|i| i.name == qn.name)?;
            return Some(IdentityId {
                module: self.midx,
                index: pos as u32,
            });
        }
        let (_, target) = self
            .module
            .imports
            .iter()
            .find(|(p, _)| *p == qn.prefix)?;
        let m = self.ctx.module(*target);
        let pos = m.identities.iter().position(|i| i.name == qn.name)?;
        Some(IdentityId {
            module: *target,
            index: pos as u32,
        })
    }

    /// Opens a typedef scope; shadowing an outer visible name is reported.
    fn push_scope(&mut self, typedefs: &[TypedefDecl]) {
        let mut level = HashMap::new();
        for td in typedefs {
            if self.lookup_visible(&td.name).is_some() {
                self.errors.push(ResolveError::ShadowedTypedef {
                    name: td.name.clone(),
                });
            }
            let slot = self.alloc_typedef(&td.name, &td.typ, td.default.clone());
            if let Some(u) = &td.units {
                self.module.typedefs[slot as usize].units = Some(u.clone());
            }
            level.insert(td.name.clone(), slot);
        }
        self.scopes.push(level);
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn lookup_visible(&self, name: &str) -> Option<u32> {
        self.scopes
            .iter()
            .rev()
            .find_map(|level| level.get(name).copied())
    }

    /// Allocates one arena slot for a typedef (named or anonymous) and
    /// resolves its base reference through the scope chain.
    fn alloc_typedef(
        &mut self,
        name: &str,
        spec: &TypeSpec,
        default: Option<String>,
    ) -> u32 {
        let slot = self.module.typedefs.len() as u32;
        // Placeholder base; pass 3 derives the real one from the chain.
        let mut td = Typedef::plain(name, BaseKind::String);
        td.default = default.clone();
        self.module.typedefs.push(td);

        match &spec.name {
            None => self.errors.push(ResolveError::MissingType {
                name: name.to_string(),
            }),
            Some(qn) => {
                if qn.prefix.is_empty()
                    && let Some(base) = BaseKind::from_name(&qn.name)
                {
                    self.module.typedefs[slot as usize].base = base;
                } else {
                    match self.lookup_typedef(qn) {
                        Some(parent) => {
                            self.module.typedefs[slot as usize].parent = Some(parent);
                        },
                        None => self.errors.push(ResolveError::DefNotFound {
                            name: qn.name.clone(),
                        }),
                    }
                }
            },
        }

        // Union members become anonymous typedefs of their own.
        let members: Vec<TypedefId> = spec
            .union_members
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let mslot = self.alloc_typedef(&format!("{name}${i}"), m, None);
                TypedefId {
                    module: self.midx,
                    index: mslot,
                }
            })
            .collect();
        self.module.typedefs[slot as usize].union_members = members;

        self.pending.push(Pending {
            slot,
            spec: spec.clone(),
            default,
        });
        slot
    }

    fn lookup_typedef(&self, qn: &QualName) -> Option<TypedefId> {
        // (a) + (b) + (c): enclosing scopes down to module level.
        if qn.prefix.is_empty() || qn.prefix == self.module.prefix {
            if let Some(slot) = self.lookup_visible(&qn.name) {
                return Some(TypedefId {
                    module: self.midx,
                    index: slot,
                });
            }
            if !qn.prefix.is_empty() {
                return None;
            }
        }
        // (d): imported modules, by prefix then by name.
        let (_, target) = self
            .module
            .imports
            .iter()
            .find(|(p, _)| *p == qn.prefix)?;
        let m = self.ctx.module(*target);
        m.top_typedefs
            .iter()
            .find(|slot| m.typedefs[**slot as usize].name == qn.name)
            .map(|slot| TypedefId {
                module: *target,
                index: *slot,
            })
    }

    /// Builds one schema node subtree; returns `None` when the node is so
    /// broken it cannot participate (errors were recorded).
    fn build_node(
        &mut self,
        decl: &NodeDecl,
        parent: Option<NodeId>,
        config_inherited: bool,
    ) -> Option<NodeId> {
        let index = self.module.nodes.len() as u32;
        let id = NodeId {
            module: self.midx,
            index,
        };

        let config = match decl.kind {
            NodeKind::Rpc | NodeKind::Notification => false,
            _ => decl.config.unwrap_or(config_inherited),
        };

        let mut node = SchemaNode::new(decl.kind, self.midx, decl.name.clone());
        node.parent = parent;
        node.config = config;
        node.mandatory = decl.mandatory;
        node.min_elements = decl.min_elements;
        node.max_elements = decl.max_elements;
        node.ordered_by_user = decl.ordered_by_user;
        node.unique = decl.unique.clone();
        node.default = decl.default.clone();

        if let Some(w) = &decl.when {
            match xpath::Path::compile(w) {
                Ok(p) => node.when = Some(p),
                Err(_) => self.errors.push(ResolveError::InvalidPath {
                    context: decl.name.clone(),
                    path: w.clone(),
                }),
            }
        }
        for m in &decl.must {
            match xpath::Path::compile(m) {
                Ok(p) => node.must.push(p),
                Err(_) => self.errors.push(ResolveError::InvalidPath {
                    context: decl.name.clone(),
                    path: m.clone(),
                }),
            }
        }

        self.module.nodes.push(node);

        // Leafy nodes need a type; plain named references share the target
        // typedef, restricted or inline ones get an anonymous arena entry.
        if matches!(decl.kind, NodeKind::Leaf | NodeKind::LeafList) {
            match &decl.typ {
                None => self.errors.push(ResolveError::MissingType {
                    name: decl.name.clone(),
                }),
                Some(spec) => {
                    let tid = if spec_is_plain_reference(spec) {
                        let qn = spec.name.as_ref().expect("plain reference has a name");
                        let found = self.lookup_typedef(qn);
                        if found.is_none() {
                            self.errors.push(ResolveError::DefNotFound {
                                name: qn.name.clone(),
                            });
                        }
                        found
                    } else {
                        // Bare built-ins and restricted references get an
                        // anonymous arena entry named after the leaf.
                        let slot = self.alloc_typedef(&decl.name, spec, None);
                        Some(TypedefId {
                            module: self.midx,
                            index: slot,
                        })
                    };
                    self.module.nodes[index as usize].typedef = tid;
                },
            }
        }

        self.push_scope(&decl.typedefs);
        let children: Vec<NodeId> = decl
            .children
            .iter()
            .filter_map(|c| self.build_node(c, Some(id), config))
            .collect();
        self.pop_scope();

        // List keys must name direct leaf children.
        let mut keys = Vec::new();
        for key in &decl.keys {
            match children
                .iter()
                .find(|c| self.module.nodes[c.index as usize].name == *key)
            {
                Some(k) => keys.push(*k),
                None => self.errors.push(ResolveError::DefNotFound {
                    name: format!("{}:{key}", decl.name),
                }),
            }
        }

        let n = &mut self.module.nodes[index as usize];
        n.children = children;
        n.keys = keys;
        Some(id)
    }

    // ----- pass 2 -----

    fn detect_loops(&mut self) {
        let count = self.module.typedefs.len();
        for start in 0..count {
            let mut seen = vec![false; count];
            let mut cur = start;
            loop {
                if seen[cur] {
                    self.errors.push(ResolveError::Loop {
                        typedef: self.module.typedefs[start].name.clone(),
                    });
                    break;
                }
                seen[cur] = true;
                match self.module.typedefs[cur].parent {
                    Some(p) if p.module == self.midx => cur = p.index as usize,
                    // External parents are finalized and acyclic.
                    _ => break,
                }
            }
        }
    }

    fn has_loop_errors(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, ResolveError::Loop { .. }))
    }

    /// Base kind at the bottom of a typedef's chain.
    fn chain_base(&self, slot: u32) -> BaseKind {
        let mut cur = TypedefId {
            module: self.midx,
            index: slot,
        };
        loop {
            let td = if cur.module == self.midx {
                &self.module.typedefs[cur.index as usize]
            } else {
                self.ctx.typedef(cur)
            };
            match td.parent {
                Some(p) => cur = p,
                None => return td.base,
            }
        }
    }

    fn chain_fraction_digits(&self, slot: u32) -> Option<u8> {
        let mut cur = Some(TypedefId {
            module: self.midx,
            index: slot,
        });
        while let Some(id) = cur {
            if id.module == self.midx {
                // Same-module ancestors may not be finalized yet; their
                // raw spec still carries the declared value.
                if let Some(p) = self.pending.iter().find(|p| p.slot == id.index)
                    && let Some(fd) = p.spec.fraction_digits
                {
                    return Some(fd);
                }
                let t = &self.module.typedefs[id.index as usize];
                if let Some(fd) = t.fraction_digits {
                    return Some(fd);
                }
                cur = t.parent;
            } else {
                let t = self.ctx.typedef(id);
                if let Some(fd) = t.fraction_digits {
                    return Some(fd);
                }
                cur = t.parent;
            }
        }
        None
    }

    // ----- pass 3 -----

    fn check_restrictions(&mut self) {
        for i in 0..self.pending.len() {
            let p = self.pending[i].clone();
            let base = self.chain_base(p.slot);
            let name = self.module.typedefs[p.slot as usize].name.clone();
            let derived = self.module.typedefs[p.slot as usize].parent.is_some();
            let rna = |keyword| ResolveError::RestrictionNotAllowed {
                typedef: name.clone(),
                keyword,
                base,
            };

            if p.spec.range.is_some() && !base.is_numeric() {
                self.errors.push(rna("range"));
            }
            if p.spec.length.is_some()
                && !matches!(base, BaseKind::String | BaseKind::Binary)
            {
                self.errors.push(rna("length"));
            }
            if !p.spec.patterns.is_empty() && base != BaseKind::String {
                self.errors.push(rna("pattern"));
            }
            if let Some(fd) = p.spec.fraction_digits {
                if base != BaseKind::Decimal64 {
                    self.errors.push(rna("fraction-digits"));
                } else if !(1..=18).contains(&fd) {
                    self.errors.push(rna("fraction-digits"));
                }
            }
            if base == BaseKind::Decimal64
                && !derived
                && self.chain_fraction_digits(p.slot).is_none()
            {
                self.errors.push(ResolveError::MissingType {
                    name: format!("{name}: fraction-digits"),
                });
            }
            if !p.spec.enums.is_empty() && (base != BaseKind::Enumeration || derived) {
                self.errors.push(rna("enum"));
            }
            if base == BaseKind::Enumeration && !derived && p.spec.enums.is_empty() {
                self.errors.push(ResolveError::MissingType {
                    name: format!("{name}: enum"),
                });
            }
            if !p.spec.bits.is_empty() && (base != BaseKind::Bits || derived) {
                self.errors.push(rna("bit"));
            }
            if base == BaseKind::Bits && !derived && p.spec.bits.is_empty() {
                self.errors.push(ResolveError::MissingType {
                    name: format!("{name}: bit"),
                });
            }
            if !p.spec.union_members.is_empty() && base != BaseKind::Union {
                self.errors.push(rna("type"));
            }
            if p.spec.leafref_path.is_some() && base != BaseKind::Leafref {
                self.errors.push(rna("path"));
            }
            if base == BaseKind::Leafref && !derived && p.spec.leafref_path.is_none() {
                self.errors.push(ResolveError::MissingType {
                    name: format!("{name}: path"),
                });
            }
            if p.spec.identity_base.is_some() && base != BaseKind::Identityref {
                self.errors.push(rna("base"));
            }
            if base == BaseKind::Identityref && !derived && p.spec.identity_base.is_none()
            {
                self.errors.push(ResolveError::MissingType {
                    name: format!("{name}: base"),
                });
            }
        }
    }

    // ----- pass 4 -----

    fn finalize_typedefs(&mut self) {
        // Ancestors first so effective restrictions are ready to inherit.
        let order = self.topo_order();
        for slot in order {
            let Some(pos) = self.pending.iter().position(|p| p.slot == slot) else {
                continue;
            };
            let pending = self.pending[pos].clone();
            self.finalize_one(&pending);
        }
    }

    fn topo_order(&self) -> Vec<u32> {
        let count = self.module.typedefs.len();
        let mut done = vec![false; count];
        let mut order = Vec::with_capacity(count);
        // Loops were rejected in pass 2, so this terminates.
        while order.len() < count {
            let before = order.len();
            for slot in 0..count {
                if done[slot] {
                    continue;
                }
                let ready = match self.module.typedefs[slot].parent {
                    Some(p) if p.module == self.midx => done[p.index as usize],
                    _ => true,
                };
                if ready {
                    done[slot] = true;
                    order.push(slot as u32);
                }
            }
            if order.len() == before {
                break;
            }
        }
        order
    }

    fn parent_typedef(&self, slot: u32) -> Option<&Typedef> {
        match self.module.typedefs[slot as usize].parent {
            Some(p) if p.module == self.midx => {
                Some(&self.module.typedefs[p.index as usize])
            },
            Some(p) => Some(self.ctx.typedef(p)),
            None => None,
        }
    }

    fn finalize_one(&mut self, pending: &Pending) {
        let slot = pending.slot;
        let base = self.chain_base(slot);
        let name = self.module.typedefs[slot as usize].name.clone();
        let fd = self.chain_fraction_digits(slot);

        // Effective restrictions start from the ancestor (or the base kind).
        let ancestor_range: Option<RangeDescriptor> = self
            .parent_typedef(slot)
            .and_then(|p| p.range.clone())
            .or_else(|| default_range(base));
        let ancestor_length: Option<RangeDescriptor> = self
            .parent_typedef(slot)
            .and_then(|p| p.length.clone())
            .or_else(|| {
                matches!(base, BaseKind::String | BaseKind::Binary)
                    .then(|| RangeDescriptor::single(0, u64::MAX as i128))
            });
        let mut patterns: Vec<CompiledPattern> = self
            .parent_typedef(slot)
            .map(|p| p.patterns.clone())
            .unwrap_or_default();
        let inherited_enums = self.parent_typedef(slot).map(|p| p.enums.clone());
        let inherited_bits = self.parent_typedef(slot).map(|p| p.bits.clone());
        let inherited_leafref = self.parent_typedef(slot).and_then(|p| p.leafref.clone());
        let inherited_base = self.parent_typedef(slot).and_then(|p| p.identity_base);
        let inherited_union = self
            .parent_typedef(slot)
            .map(|p| p.union_members.clone())
            .unwrap_or_default();

        // Ranges.
        let range = match &pending.spec.range {
            Some(expr) => {
                match self.literalize(expr, ancestor_range.as_ref(), base, fd, &name) {
                    Some(mut own) => {
                        own.error_app_tag = expr.error_app_tag.clone();
                        own.error_message = expr.error_message.clone();
                        if let Some(anc) = &ancestor_range
                            && !own.subset_of(anc)
                        {
                            self.errors.push(ResolveError::NotInRange {
                                typedef: name.clone(),
                            });
                        }
                        Some(own)
                    },
                    None => ancestor_range.clone(),
                }
            },
            None => ancestor_range.clone(),
        };

        // Lengths use the same machinery over non-negative values.
        let length = match &pending.spec.length {
            Some(expr) => {
                match self.literalize(expr, ancestor_length.as_ref(), base, None, &name) {
                    Some(mut own) => {
                        own.error_app_tag = expr.error_app_tag.clone();
                        own.error_message = expr.error_message.clone();
                        if let Some(anc) = &ancestor_length
                            && !own.subset_of(anc)
                        {
                            self.errors.push(ResolveError::NotInRange {
                                typedef: name.clone(),
                            });
                        }
                        Some(own)
                    },
                    None => ancestor_length.clone(),
                }
            },
            None => ancestor_length.clone(),
        };

        // Patterns accumulate conjunctively with ancestors.
        for src in &pending.spec.patterns {
            match CompiledPattern::compile(src) {
                Ok(p) => patterns.push(p),
                Err(_) => self.errors.push(ResolveError::BadPattern {
                    typedef: name.clone(),
                    source_text: src.clone(),
                }),
            }
        }

        // Enum / bits numbering.
        let enums = if pending.spec.enums.is_empty() {
            inherited_enums.unwrap_or_default()
        } else {
            self.number_enums(&name, &pending.spec.enums)
        };
        let bits = if pending.spec.bits.is_empty() {
            inherited_bits.unwrap_or_default()
        } else {
            self.number_bits(&name, &pending.spec.bits)
        };

        // Leafref compilation; target binding happens after install.
        let leafref = match &pending.spec.leafref_path {
            Some(path) => match xpath::Path::compile(path) {
                Ok(p) => Some(Leafref {
                    path: p,
                    target: None,
                    require_instance: pending.spec.require_instance.unwrap_or(true),
                }),
                Err(_) => {
                    self.errors.push(ResolveError::InvalidPath {
                        context: name.clone(),
                        path: path.clone(),
                    });
                    None
                },
            },
            None => inherited_leafref,
        };

        // Identityref base.
        let identity_base = match &pending.spec.identity_base {
            Some(qn) => match self.lookup_identity(qn) {
                Some(id) => Some(id),
                None => {
                    self.errors.push(ResolveError::DefNotFound {
                        name: qn.name.clone(),
                    });
                    None
                },
            },
            None => inherited_base,
        };

        let inherited_default = self.parent_typedef(slot).and_then(|p| p.default.clone());

        let td = &mut self.module.typedefs[slot as usize];
        td.base = base;
        td.range = range;
        td.length = length;
        td.patterns = patterns;
        td.fraction_digits = fd;
        td.enums = enums;
        td.bits = bits;
        td.leafref = leafref;
        td.identity_base = identity_base;
        if td.union_members.is_empty() {
            td.union_members = inherited_union;
        }
        if td.default.is_none() {
            td.default = inherited_default;
        }
    }

    /// Turns a token-level range expression into literal intervals:
    /// `min`/`max` resolve through the ancestor chain, decimals scale by
    /// fraction-digits, the list is sorted, adjacent intervals merge, and
    /// overlap is an error.
    fn literalize(
        &mut self,
        expr: &RangeExpr,
        ancestor: Option<&RangeDescriptor>,
        base: BaseKind,
        fd: Option<u8>,
        name: &str,
    ) -> Option<RangeDescriptor> {
        let lo_default = ancestor
            .and_then(RangeDescriptor::min_val)
            .unwrap_or(RangeVal::NegInf);
        let hi_default = ancestor
            .and_then(RangeDescriptor::max_val)
            .unwrap_or(RangeVal::PosInf);

        let mut intervals = Vec::with_capacity(expr.parts.len());
        for (lo, hi) in &expr.parts {
            let lo = self.bound_value(lo, lo_default, base, fd, name)?;
            let hi = self.bound_value(hi, hi_default, base, fd, name)?;
            if lo > hi {
                self.errors.push(ResolveError::InvalidRange {
                    typedef: name.to_string(),
                });
                return None;
            }
            intervals.push(Interval { lo, hi });
        }

        intervals.sort_by(|a, b| a.lo.cmp(&b.lo));
        let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
        for iv in intervals {
            match merged.last_mut() {
                Some(prev) if overlaps(prev, &iv) => {
                    self.errors.push(ResolveError::OverlapRange {
                        typedef: name.to_string(),
                    });
                    return None;
                },
                Some(prev) if adjacent(prev, &iv) => {
                    prev.hi = iv.hi;
                },
                _ => merged.push(iv),
            }
        }

        Some(RangeDescriptor {
            intervals: merged,
            error_app_tag: None,
            error_message: None,
        })
    }

    fn bound_value(
        &mut self,
        b: &RangeBound,
        edge: RangeVal,
        base: BaseKind,
        fd: Option<u8>,
        name: &str,
    ) -> Option<RangeVal> {
        match b {
            RangeBound::Min | RangeBound::Max => Some(edge),
            RangeBound::Int(v) => {
                if base == BaseKind::Decimal64 {
                    let fd = fd.unwrap_or(1);
                    Some(RangeVal::Num(v * 10i128.pow(fd as u32)))
                } else {
                    Some(RangeVal::Num(*v))
                }
            },
            RangeBound::Dec(text) => {
                if base != BaseKind::Decimal64 {
                    self.errors.push(ResolveError::InvalidRange {
                        typedef: name.to_string(),
                    });
                    return None;
                }
                match text.as_str() {
                    "-INF" => Some(RangeVal::NegInf),
                    "INF" => Some(RangeVal::PosInf),
                    _ => match parse_decimal64(text, fd.unwrap_or(1)) {
                        Ok(v) => Some(RangeVal::Num(v as i128)),
                        Err(_) => {
                            self.errors.push(ResolveError::InvalidRange {
                                typedef: name.to_string(),
                            });
                            None
                        },
                    },
                }
            },
        }
    }

    fn number_enums(&mut self, typedef: &str, decls: &[EnumDecl]) -> Vec<EnumMember> {
        let mut members: Vec<EnumMember> = Vec::with_capacity(decls.len());
        let mut last_value: Option<i32> = None;
        for d in decls {
            if members.iter().any(|m| m.name == d.name) {
                self.errors.push(ResolveError::DuplicateEnumName {
                    typedef: typedef.to_string(),
                    name: d.name.clone(),
                });
                continue;
            }
            let value = match d.value {
                Some(v) => v,
                None => members.iter().map(|m| m.value).max().map_or(0, |m| m + 1),
            };
            if members.iter().any(|m| m.value == value) {
                self.errors.push(ResolveError::DuplicateEnumValue {
                    typedef: typedef.to_string(),
                    value: value as i64,
                });
                continue;
            }
            if let Some(prev) = last_value
                && value < prev
            {
                self.warnings.push(ResolveWarning::EnumValueOrder {
                    typedef: typedef.to_string(),
                    name: d.name.clone(),
                });
            }
            last_value = Some(value);
            members.push(EnumMember {
                name: d.name.clone(),
                value,
                explicit: d.value.is_some(),
            });
        }
        members
    }

    fn number_bits(&mut self, typedef: &str, decls: &[BitDecl]) -> Vec<BitMember> {
        let mut members: Vec<BitMember> = Vec::with_capacity(decls.len());
        let mut last_pos: Option<u32> = None;
        for d in decls {
            if members.iter().any(|m| m.name == d.name) {
                self.errors.push(ResolveError::DuplicateEnumName {
                    typedef: typedef.to_string(),
                    name: d.name.clone(),
                });
                continue;
            }
            let position = match d.position {
                Some(p) => p,
                None => members.iter().map(|m| m.position).max().map_or(0, |m| m + 1),
            };
            if members.iter().any(|m| m.position == position) {
                self.errors.push(ResolveError::DuplicateEnumValue {
                    typedef: typedef.to_string(),
                    value: position as i64,
                });
                continue;
            }
            if let Some(prev) = last_pos
                && position < prev
            {
                self.warnings.push(ResolveWarning::BitPositionOrder {
                    typedef: typedef.to_string(),
                    name: d.name.clone(),
                });
            }
            last_pos = Some(position);
            members.push(BitMember {
                name: d.name.clone(),
                position,
                explicit: d.position.is_some(),
            });
        }
        members
    }
}

fn spec_is_plain_reference(spec: &TypeSpec) -> bool {
    spec.name.is_some()
        && spec.range.is_none()
        && spec.length.is_none()
        && spec.patterns.is_empty()
        && spec.fraction_digits.is_none()
        && spec.enums.is_empty()
        && spec.bits.is_empty()
        && spec.union_members.is_empty()
        && spec.leafref_path.is_none()
        && spec.identity_base.is_none()
        && spec
            .name
            .as_ref()
            .map(|qn| {
                !qn.prefix.is_empty() || BaseKind::from_name(&qn.name).is_none()
            })
            .unwrap_or(false)
}

fn default_range(base: BaseKind) -> Option<RangeDescriptor> {
    if let Some((lo, hi)) = base.integer_bounds() {
        return Some(RangeDescriptor::single(lo, hi));
    }
    if base == BaseKind::Decimal64 {
        return Some(RangeDescriptor {
            intervals: vec![Interval {
                lo: RangeVal::NegInf,
                hi: RangeVal::PosInf,
            }],
            error_app_tag: None,
            error_message: None,
        });
    }
    None
}

fn overlaps(a: &Interval, b: &Interval) -> bool {
    b.lo <= a.hi
}

fn adjacent(a: &Interval, b: &Interval) -> bool {
    match (a.hi, b.lo) {
        (RangeVal::Num(h), RangeVal::Num(l)) => l == h + 1,
        _ => false,
    }
}

/// Binds leafref targets by walking the installed schema. Runs after
/// install so self-referencing paths can see the module's own top nodes.
fn resolve_leafref_targets(
    ctx: &mut SchemaContext,
    midx: ModuleIdx,
    errors: &mut Vec<ResolveError>,
) {
    let node_count = ctx.module(midx).nodes.len();
    for index in 0..node_count {
        let nid = NodeId {
            module: midx,
            index: index as u32,
        };
        let Some(tid) = ctx.node(nid).typedef else { continue };
        let td = ctx.typedef(tid);
        if td.base != BaseKind::Leafref {
            continue;
        }
        let Some(lref) = &td.leafref else { continue };
        if lref.target.is_some() {
            continue;
        }
        let path = lref.path.clone();
        let require = lref.require_instance;

        let target = walk_schema_path(ctx, nid, &path);
        match target {
            Some(t) => {
                if let Some(l) = &mut ctx.typedef_mut(tid).leafref {
                    l.target = Some(t);
                }
            },
            None if require => errors.push(ResolveError::DefNotFound {
                name: path.to_string(),
            }),
            None => {},
        }
    }
}

fn walk_schema_path(
    ctx: &SchemaContext,
    start: NodeId,
    path: &xpath::Path,
) -> Option<NodeId> {
    let mut cur: Option<NodeId> = if path.absolute { None } else { Some(start) };
    for step in &path.steps {
        match step.axis {
            xpath::Axis::Current => {},
            xpath::Axis::Parent => {
                cur = ctx.node(cur?).parent;
                cur?;
            },
            xpath::Axis::Child => {
                cur = match cur {
                    None => ctx.find_top(None, &step.name),
                    Some(p) => ctx.find_child(p, &step.name),
                };
                cur?;
            },
        }
    }
    cur
}

/// Validates every recorded default against its fully resolved type.
fn validate_defaults(
    ctx: &SchemaContext,
    midx: ModuleIdx,
    pending: &[Pending],
    errors: &mut Vec<ResolveError>,
) {
    for p in pending {
        let Some(default) = &p.default else { continue };
        let tid = TypedefId {
            module: midx,
            index: p.slot,
        };
        let td = ctx.typedef(tid);
        if let Err(e) = td.parse_value(ctx, default) {
            errors.push(ResolveError::InvalidDefault {
                typedef: td.name.clone(),
                value: default.clone(),
                reason: e.message.unwrap_or_else(|| e.kind.tag().to_string()),
            });
        }
    }

    // Leaf defaults declared on the node rather than the typedef.
    let module = ctx.module(midx);
    for node in &module.nodes {
        let (Some(default), Some(tid)) = (&node.default, node.typedef) else {
            continue;
        };
        let td = ctx.typedef(tid);
        if td.default.as_deref() == Some(default.as_str()) {
            continue;
        }
        if let Err(e) = td.parse_value(ctx, default) {
            errors.push(ResolveError::InvalidDefault {
                typedef: node.name.clone(),
                value: default.clone(),
                reason: e.message.unwrap_or_else(|| e.kind.tag().to_string()),
            });
        }
    }
}
