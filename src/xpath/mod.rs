// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The location-path subset YANG needs: leafref `path` expressions,
//! instance-identifiers, partial-lock selections and XPath notification
//! filters.
//!
//! Grammar: `('/')? step ('/' step)*` where a step is `..`, `.`, or a
//! possibly-prefixed name followed by zero or more `[key = value]`
//! predicates. Predicate values are quoted literals or
//! `current()/..`-relative paths.

use core::fmt;

use thiserror::Error;

use crate::datastore::value::{NodeRef, ValueTree};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("empty step in '{0}'")]
    EmptyStep(String),
    #[error("unterminated predicate in '{0}'")]
    UnterminatedPredicate(String),
    #[error("malformed predicate '{0}'")]
    BadPredicate(String),
}

/// A step axis. Only the axes YANG location paths use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Axis {
    Child,
    Parent,
    Current,
}

/// Predicate right-hand side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredValue {
    Literal(String),
    /// `current()/../x` style reference, relative to the evaluation
    /// context node.
    CurrentRelative(Path),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub key: String,
    pub value: PredValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub axis: Axis,
    /// Optional module prefix; matching ignores it when empty.
    pub prefix: String,
    pub name: String,
    pub predicates: Vec<Predicate>,
}

/// A compiled location path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub absolute: bool,
    pub steps: Vec<Step>,
}

impl Path {
    pub fn compile(src: &str) -> Result<Self, PathError> {
        let src = src.trim();
        if src.is_empty() {
            return Err(PathError::Empty);
        }
        let absolute = src.starts_with('/');
        let body = src.trim_start_matches('/');
        let mut steps = Vec::new();
        if body.is_empty() {
            // "/" alone selects the root.
            return Ok(Self { absolute, steps });
        }

        for raw in split_steps(body, src)? {
            if raw.is_empty() {
                return Err(PathError::EmptyStep(src.to_string()));
            }
            steps.push(parse_step(&raw, src)?);
        }
        Ok(Self { absolute, steps })
    }

    /// Evaluates to a node-set. `ctx` anchors relative paths and
    /// `current()` references; pass the tree root for absolute contexts.
    pub fn eval(&self, tree: &ValueTree, ctx: NodeRef) -> Vec<NodeRef> {
        let mut set: Vec<NodeRef> = if self.absolute {
            vec![tree.root()]
        } else {
            vec![ctx]
        };

        for step in &self.steps {
            let mut next = Vec::new();
            for node in set {
                match step.axis {
                    Axis::Current => next.push(node),
                    Axis::Parent => {
                        if let Some(p) = tree.parent(node) {
                            next.push(p);
                        }
                    },
                    Axis::Child => {
                        for child in tree.children(node) {
                            if tree.name(child) == step.name
                                && step
                                    .predicates
                                    .iter()
                                    .all(|p| pred_matches(p, tree, child, ctx))
                            {
                                next.push(child);
                            }
                        }
                    },
                }
            }
            next.dedup();
            set = next;
            if set.is_empty() {
                break;
            }
        }
        set
    }

    /// Leaf name of the final child step, if the path ends in one.
    pub fn target_leaf_name(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.axis == Axis::Child)
            .map(|s| s.name.as_str())
    }
}

fn pred_matches(pred: &Predicate, tree: &ValueTree, node: NodeRef, ctx: NodeRef) -> bool {
    let Some(key_child) = tree
        .children(node)
        .find(|c| tree.name(*c) == pred.key)
    else {
        return false;
    };
    let key_val = tree.canonical_value(key_child);

    match &pred.value {
        PredValue::Literal(lit) => key_val.as_deref() == Some(lit.as_str()),
        PredValue::CurrentRelative(path) => {
            let refs = path.eval(tree, ctx);
            refs.first()
                .and_then(|r| tree.canonical_value(*r))
                .as_deref()
                == key_val.as_deref()
        },
    }
}

/// Splits on `/` while respecting `[...]` predicate brackets.
fn split_steps(body: &str, whole: &str) -> Result<Vec<String>, PathError> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for c in body.chars() {
        match c {
            '[' => {
                depth += 1;
                cur.push(c);
            },
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| PathError::UnterminatedPredicate(whole.to_string()))?;
                cur.push(c);
            },
            '/' if depth == 0 => {
                out.push(std::mem::take(&mut cur));
            },
            _ => cur.push(c),
        }
    }
    if depth != 0 {
        return Err(PathError::UnterminatedPredicate(whole.to_string()));
    }
    out.push(cur);
    Ok(out)
}

fn parse_step(raw: &str, whole: &str) -> Result<Step, PathError> {
    if raw == ".." {
        return Ok(Step {
            axis: Axis::Parent,
            prefix: String::new(),
            name: String::new(),
            predicates: Vec::new(),
        });
    }
    if raw == "." || raw == "current()" {
        return Ok(Step {
            axis: Axis::Current,
            prefix: String::new(),
            name: String::new(),
            predicates: Vec::new(),
        });
    }

    let (name_part, mut rest) = match raw.find('[') {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    };
    let (prefix, name) = match name_part.split_once(':') {
        Some((p, n)) => (p.to_string(), n.to_string()),
        None => (String::new(), name_part.to_string()),
    };
    if name.is_empty() {
        return Err(PathError::EmptyStep(whole.to_string()));
    }

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let end = rest
            .find(']')
            .ok_or_else(|| PathError::UnterminatedPredicate(whole.to_string()))?;
        let inner = &rest[1..end];
        predicates.push(parse_predicate(inner)?);
        rest = &rest[end + 1..];
    }

    Ok(Step {
        axis: Axis::Child,
        prefix,
        name,
        predicates,
    })
}

fn parse_predicate(inner: &str) -> Result<Predicate, PathError> {
    let (key, value) = inner
        .split_once('=')
        .ok_or_else(|| PathError::BadPredicate(inner.to_string()))?;
    let key = key.trim();
    let key = key.split_once(':').map_or(key, |(_, n)| n);
    let value = value.trim();

    let pv = if (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
        || (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
    {
        PredValue::Literal(value[1..value.len() - 1].to_string())
    } else if let Some(rel) = value.strip_prefix("current()/") {
        PredValue::CurrentRelative(
            Path::compile(rel).map_err(|_| PathError::BadPredicate(inner.to_string()))?,
        )
    } else {
        // Unquoted literal, common in instance-identifiers.
        PredValue::Literal(value.to_string())
    };

    Ok(Predicate {
        key: key.to_string(),
        value: pv,
    })
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/")?;
        }
        let mut first = true;
        for s in &self.steps {
            if !first {
                write!(f, "/")?;
            }
            first = false;
            match s.axis {
                Axis::Parent => write!(f, "..")?,
                Axis::Current => write!(f, ".")?,
                Axis::Child => {
                    if s.prefix.is_empty() {
                        write!(f, "{}", s.name)?;
                    } else {
                        write!(f, "{}:{}", s.prefix, s.name)?;
                    }
                    for p in &s.predicates {
                        match &p.value {
                            PredValue::Literal(l) => {
                                write!(f, "[{}='{}']", p.key, l)?;
                            },
                            PredValue::CurrentRelative(path) => {
                                write!(f, "[{}=current()/{}]", p.key, path)?;
                            },
                        }
                    }
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_absolute_with_predicates() {
        let p = Path::compile("/if:interfaces/interface[name='eth0']/mtu")
            .expect("compile");
        assert!(p.absolute);
        assert_eq!(p.steps.len(), 3);
        assert_eq!(p.steps[1].predicates.len(), 1);
        assert_eq!(
            p.steps[1].predicates[0].value,
            PredValue::Literal("eth0".into())
        );
        assert_eq!(p.target_leaf_name(), Some("mtu"));
    }

    #[test]
    fn compiles_current_relative_predicate() {
        let p = Path::compile("../interface[name=current()/../ifname]/mtu")
            .expect("compile");
        assert!(!p.absolute);
        assert_eq!(p.steps[0].axis, Axis::Parent);
        match &p.steps[1].predicates[0].value {
            PredValue::CurrentRelative(rel) => {
                assert_eq!(rel.steps.len(), 2);
            },
            other => panic!("unexpected predicate value: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(Path::compile(""), Err(PathError::Empty));
        assert!(Path::compile("/a//b").is_err());
        assert!(Path::compile("/a[name='x'").is_err());
    }

    #[test]
    fn display_roundtrip() {
        let src = "/interfaces/interface[name='eth0']/mtu";
        let p = Path::compile(src).expect("compile");
        assert_eq!(p.to_string(), src);
    }
}
