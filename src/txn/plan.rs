// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Edit plans: the delta tree an `<edit-config>` payload compiles into
//! before the engine runs its phases.

use core::fmt;

use crate::{
    datastore::store::DatastoreName,
    error::{ErrorKind, RpcError},
    xml::XmlElement,
    yang::{
        ast::NodeKind,
        schema::{NodeId, SchemaContext},
    },
};

/// Per-node edit operations (RFC 6241 §7.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOperation {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
}

impl EditOperation {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "merge" => Self::Merge,
            "replace" => Self::Replace,
            "create" => Self::Create,
            "delete" => Self::Delete,
            "remove" => Self::Remove,
            _ => return None,
        })
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Delete | Self::Remove)
    }
}

impl fmt::Display for EditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Merge => "merge",
            Self::Replace => "replace",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Remove => "remove",
        })
    }
}

/// `default-operation` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultOperation {
    #[default]
    Merge,
    Replace,
    None,
}

impl DefaultOperation {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "merge" => Self::Merge,
            "replace" => Self::Replace,
            "none" => Self::None,
            _ => return None,
        })
    }

    pub fn as_op(&self) -> Option<EditOperation> {
        match self {
            Self::Merge => Some(EditOperation::Merge),
            Self::Replace => Some(EditOperation::Replace),
            Self::None => None,
        }
    }
}

/// `test-option` values (RFC 6241 §8.6.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestOption {
    #[default]
    TestThenSet,
    Set,
    TestOnly,
}

impl TestOption {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "test-then-set" => Self::TestThenSet,
            "set" => Self::Set,
            "test-only" => Self::TestOnly,
            _ => return None,
        })
    }
}

/// `error-option` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorOption {
    #[default]
    StopOnError,
    ContinueOnError,
    RollbackOnError,
}

impl ErrorOption {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "stop-on-error" => Self::StopOnError,
            "continue-on-error" => Self::ContinueOnError,
            "rollback-on-error" => Self::RollbackOnError,
            _ => return None,
        })
    }
}

/// `insert` attribute on ordered-by-user entries (RFC 7950 §7.8.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertMode {
    First,
    Last,
    /// Carries the sibling reference from the `key` / `value` attribute.
    Before(Vec<(String, String)>),
    After(Vec<(String, String)>),
}

/// One node of the delta tree.
#[derive(Debug, Clone)]
pub struct EditNode {
    pub schema: NodeId,
    pub name: String,
    /// Explicit per-node operation; inherited when `None`.
    pub operation: Option<EditOperation>,
    /// Canonical source text for leaf payloads.
    pub value: Option<String>,
    /// Key-leaf tuple identifying a list entry.
    pub keys: Vec<(String, String)>,
    pub insert: Option<InsertMode>,
    pub children: Vec<EditNode>,
}

/// A compiled `<edit-config>` request.
#[derive(Debug, Clone)]
pub struct EditPlan {
    pub target: DatastoreName,
    pub default_op: DefaultOperation,
    pub test_option: TestOption,
    pub error_option: ErrorOption,
    pub roots: Vec<EditNode>,
}

fn unknown_element(name: &str) -> RpcError {
    RpcError::protocol(ErrorKind::UnknownElement)
        .with_message(format!("unknown element '{name}'"))
}

fn bad_attribute(name: &str, value: &str) -> RpcError {
    RpcError::protocol(ErrorKind::BadAttribute)
        .with_message(format!("bad {name} attribute value '{value}'"))
}

impl EditPlan {
    /// Compiles the `<config>` payload against the schema.
    pub fn from_config(
        ctx: &SchemaContext,
        config: &XmlElement,
        target: DatastoreName,
        default_op: DefaultOperation,
        test_option: TestOption,
        error_option: ErrorOption,
    ) -> Result<Self, RpcError> {
        let mut roots = Vec::new();
        for child in &config.children {
            let module = if child.namespace.is_empty() {
                None
            } else {
                ctx.find_module_by_namespace(&child.namespace)
                    .map(|(_, m)| m.name.clone())
            };
            let Some(schema) = ctx.find_top(module.as_deref(), &child.name) else {
                return Err(unknown_element(&child.name));
            };
            roots.push(compile_node(ctx, child, schema)?);
        }
        Ok(Self {
            target,
            default_op,
            test_option,
            error_option,
            roots,
        })
    }
}

fn compile_node(
    ctx: &SchemaContext,
    elem: &XmlElement,
    schema: NodeId,
) -> Result<EditNode, RpcError> {
    let snode = ctx.node(schema);

    let operation = match elem.attr("operation") {
        Some(raw) => Some(
            EditOperation::parse(raw).ok_or_else(|| bad_attribute("operation", raw))?,
        ),
        None => None,
    };

    let insert = parse_insert(elem, snode.kind)?;

    let mut node = EditNode {
        schema,
        name: elem.name.clone(),
        operation,
        value: None,
        keys: Vec::new(),
        insert,
        children: Vec::new(),
    };

    match snode.kind {
        NodeKind::Leaf | NodeKind::LeafList | NodeKind::Anyxml => {
            node.value = Some(elem.text.trim().to_string());
        },
        _ => {
            for child in &elem.children {
                let Some(cschema) = ctx.find_child(schema, &child.name) else {
                    return Err(unknown_element(&child.name)
                        .with_path(ctx.canonical_path(schema)));
                };
                node.children.push(compile_node(ctx, child, cschema)?);
            }
            // A list entry is identified by its key tuple.
            if snode.kind == NodeKind::List {
                for key in &snode.keys {
                    let key_name = ctx.node(*key).name.clone();
                    let Some(kv) = node
                        .children
                        .iter()
                        .find(|c| c.name == key_name)
                        .and_then(|c| c.value.clone())
                    else {
                        return Err(RpcError::protocol(ErrorKind::MissingElement)
                            .with_path(ctx.canonical_path(schema))
                            .with_message(format!("missing key leaf '{key_name}'")));
                    };
                    node.keys.push((key_name, kv));
                }
            }
        },
    }
    Ok(node)
}

fn parse_insert(
    elem: &XmlElement,
    kind: NodeKind,
) -> Result<Option<InsertMode>, RpcError> {
    let Some(raw) = elem.attr("insert") else {
        return Ok(None);
    };
    let mode = match raw {
        "first" => InsertMode::First,
        "last" => InsertMode::Last,
        "before" | "after" => {
            // Lists carry a `key` attribute, leaf-lists a `value` one.
            let anchor = match kind {
                NodeKind::List => {
                    let key = elem.attr("key").ok_or_else(|| {
                        RpcError::protocol(ErrorKind::MissingAttribute)
                            .with_message("insert before/after requires a key attribute")
                    })?;
                    parse_key_predicates(key)
                        .ok_or_else(|| bad_attribute("key", key))?
                },
                NodeKind::LeafList => {
                    let value = elem.attr("value").ok_or_else(|| {
                        RpcError::protocol(ErrorKind::MissingAttribute)
                            .with_message("insert before/after requires a value attribute")
                    })?;
                    vec![(String::new(), value.to_string())]
                },
                _ => return Err(bad_attribute("insert", raw)),
            };
            if raw == "before" {
                InsertMode::Before(anchor)
            } else {
                InsertMode::After(anchor)
            }
        },
        other => return Err(bad_attribute("insert", other)),
    };
    Ok(Some(mode))
}

/// Parses `[name='eth0'][unit='0']` style key attributes.
fn parse_key_predicates(raw: &str) -> Option<Vec<(String, String)>> {
    let mut out = Vec::new();
    let mut rest = raw.trim();
    while !rest.is_empty() {
        let rest2 = rest.strip_prefix('[')?;
        let end = rest2.find(']')?;
        let (k, v) = rest2[..end].split_once('=')?;
        let k = k.trim();
        let k = k.split_once(':').map_or(k, |(_, n)| n);
        let v = v.trim().trim_matches('\'').trim_matches('"');
        out.push((k.to_string(), v.to_string()));
        rest = &rest2[end + 1..];
    }
    (!out.is_empty()).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_predicate_lists() {
        assert_eq!(
            parse_key_predicates("[name='eth0'][unit=\"3\"]"),
            Some(vec![
                ("name".to_string(), "eth0".to_string()),
                ("unit".to_string(), "3".to_string()),
            ])
        );
        assert_eq!(parse_key_predicates("name='eth0'"), None);
        assert_eq!(parse_key_predicates("[broken"), None);
    }

    #[test]
    fn operation_parse_rejects_unknown() {
        assert_eq!(EditOperation::parse("merge"), Some(EditOperation::Merge));
        assert_eq!(EditOperation::parse("smash"), None);
        assert_eq!(
            ErrorOption::parse("rollback-on-error"),
            Some(ErrorOption::RollbackOnError)
        );
    }
}
