// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Resolver input: a module that has been tokenized by an external YANG
//! front end but not yet resolved.
//!
//! Type names are still names, range expressions still contain `min`/`max`
//! tokens, leafref paths are raw strings. The resolver in
//! [`crate::yang::resolve`] turns this into the compiled form.

/// A possibly-prefixed name, e.g. `if:interface-ref` or plain `counter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualName {
    /// Import prefix; empty for the local module scope.
    pub prefix: String,
    pub name: String,
}

impl QualName {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            prefix: String::new(),
            name: name.into(),
        }
    }

    pub fn prefixed(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
        }
    }

    /// Parses `prefix:name` or bare `name`.
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((p, n)) => Self::prefixed(p, n),
            None => Self::local(s),
        }
    }
}

/// One endpoint of a range or length part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeBound {
    /// The `min` keyword: lowest endpoint reachable through the ancestors.
    Min,
    /// The `max` keyword.
    Max,
    /// Integer literal (covers every integer base kind and lengths).
    Int(i128),
    /// Decimal literal kept as source text until fraction-digits is known.
    Dec(String),
}

/// A `range` or `length` expression: `1..10 | 100 | min..0`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeExpr {
    pub parts: Vec<(RangeBound, RangeBound)>,
    pub error_app_tag: Option<String>,
    pub error_message: Option<String>,
}

/// One `enum` statement inside an enumeration type.
#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    /// Explicit `value`; auto-assigned when absent.
    pub value: Option<i32>,
}

/// One `bit` statement inside a bits type.
#[derive(Debug, Clone)]
pub struct BitDecl {
    pub name: String,
    /// Explicit `position`; auto-assigned when absent.
    pub position: Option<u32>,
}

/// An unresolved `type` statement with its restrictions.
#[derive(Debug, Clone, Default)]
pub struct TypeSpec {
    /// Referenced type name: a base kind or a named typedef.
    pub name: Option<QualName>,
    pub range: Option<RangeExpr>,
    pub length: Option<RangeExpr>,
    pub patterns: Vec<String>,
    pub fraction_digits: Option<u8>,
    pub enums: Vec<EnumDecl>,
    pub bits: Vec<BitDecl>,
    pub union_members: Vec<TypeSpec>,
    pub leafref_path: Option<String>,
    pub require_instance: Option<bool>,
    pub identity_base: Option<QualName>,
}

impl TypeSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(QualName::parse(name)),
            ..Self::default()
        }
    }
}

/// A `typedef` statement.
#[derive(Debug, Clone)]
pub struct TypedefDecl {
    pub name: String,
    pub typ: TypeSpec,
    pub default: Option<String>,
    pub units: Option<String>,
}

/// An `identity` statement.
#[derive(Debug, Clone)]
pub struct IdentityDecl {
    pub name: String,
    pub base: Option<QualName>,
}

/// An `import` statement.
#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub module: String,
    pub prefix: String,
    /// `revision-date` substatement, when present.
    pub revision: Option<String>,
}

/// Schema node statement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Container,
    List,
    Leaf,
    LeafList,
    Choice,
    Case,
    Anyxml,
    Rpc,
    Notification,
}

/// An unresolved data / rpc / notification node declaration.
#[derive(Debug, Clone)]
pub struct NodeDecl {
    pub kind: NodeKind,
    pub name: String,
    pub typ: Option<TypeSpec>,
    pub default: Option<String>,
    /// `config` statement; inherited when `None`.
    pub config: Option<bool>,
    pub mandatory: bool,
    /// Key leaf names, for lists.
    pub keys: Vec<String>,
    pub min_elements: Option<u32>,
    pub max_elements: Option<u32>,
    pub ordered_by_user: bool,
    /// `unique` statements: each a set of descendant leaf names.
    pub unique: Vec<Vec<String>>,
    pub when: Option<String>,
    pub must: Vec<String>,
    /// Typedefs scoped to this node.
    pub typedefs: Vec<TypedefDecl>,
    /// `uses` references to groupings, expanded during resolution.
    pub uses: Vec<QualName>,
    pub children: Vec<NodeDecl>,
}

impl NodeDecl {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            typ: None,
            default: None,
            config: None,
            mandatory: false,
            keys: Vec::new(),
            min_elements: None,
            max_elements: None,
            ordered_by_user: false,
            unique: Vec::new(),
            when: None,
            must: Vec::new(),
            typedefs: Vec::new(),
            uses: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn leaf(name: impl Into<String>, typ: TypeSpec) -> Self {
        let mut n = Self::new(NodeKind::Leaf, name);
        n.typ = Some(typ);
        n
    }

    pub fn container(name: impl Into<String>, children: Vec<NodeDecl>) -> Self {
        let mut n = Self::new(NodeKind::Container, name);
        n.children = children;
        n
    }

    pub fn list(name: impl Into<String>, keys: &[&str], children: Vec<NodeDecl>) -> Self {
        let mut n = Self::new(NodeKind::List, name);
        n.keys = keys.iter().map(|k| (*k).to_string()).collect();
        n.children = children;
        n
    }
}

/// A `grouping` statement: reusable subtree plus scoped typedefs.
#[derive(Debug, Clone)]
pub struct GroupingDecl {
    pub name: String,
    pub typedefs: Vec<TypedefDecl>,
    pub children: Vec<NodeDecl>,
}

/// A tokenized, unresolved module.
#[derive(Debug, Clone)]
pub struct ModuleDecl {
    pub name: String,
    pub prefix: String,
    pub namespace: String,
    /// Latest revision date, `YYYY-MM-DD`.
    pub revision: String,
    pub imports: Vec<ImportDecl>,
    pub typedefs: Vec<TypedefDecl>,
    pub identities: Vec<IdentityDecl>,
    pub groupings: Vec<GroupingDecl>,
    pub body: Vec<NodeDecl>,
    /// Verbatim module source, served by `get-schema`.
    pub source: String,
}

impl ModuleDecl {
    pub fn new(name: &str, prefix: &str, namespace: &str, revision: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            namespace: namespace.to_string(),
            revision: revision.to_string(),
            imports: Vec::new(),
            typedefs: Vec::new(),
            identities: Vec::new(),
            groupings: Vec::new(),
            body: Vec::new(),
            source: String::new(),
        }
    }
}
