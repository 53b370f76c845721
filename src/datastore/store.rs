// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, io::Write as _, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

use crate::{datastore::value::ValueTree, xml};

/// The recognized datastore names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatastoreName {
    Running,
    Candidate,
    Startup,
}

impl DatastoreName {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "running" => Self::Running,
            "candidate" => Self::Candidate,
            "startup" => Self::Startup,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Candidate => "candidate",
            Self::Startup => "startup",
        }
    }
}

impl std::fmt::Display for DatastoreName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named top-level configuration tree.
#[derive(Debug, Clone)]
pub struct Datastore {
    pub name: DatastoreName,
    pub tree: ValueTree,
    /// Bumped on every committed change, strictly monotonic.
    pub last_modified: DateTime<Utc>,
}

impl Datastore {
    pub fn new(name: DatastoreName) -> Self {
        Self {
            name,
            tree: ValueTree::with_root("data"),
            last_modified: Utc::now(),
        }
    }

    /// Atomically replaces the live tree, bumping last-modified.
    ///
    /// Wall clocks can stand still or step backwards; the stamp still has
    /// to grow on every commit (commit ordering is observable).
    pub fn install_root(&mut self, tree: ValueTree) {
        self.tree = tree;
        let now = Utc::now();
        self.last_modified = if now > self.last_modified {
            now
        } else {
            self.last_modified + Duration::nanoseconds(1)
        };
    }

    /// Replaces the whole content from another store (`copy-config`).
    pub fn copy_from(&mut self, other: &Datastore) {
        self.install_root(other.tree.clone());
    }
}

/// The datastore family: `running` always exists, the other two depend on
/// the advertised capability set.
#[derive(Debug)]
pub struct Datastores {
    pub running: Datastore,
    pub candidate: Option<Datastore>,
    pub startup: Option<Datastore>,
}

impl Datastores {
    pub fn new(with_candidate: bool, with_startup: bool) -> Self {
        Self {
            running: Datastore::new(DatastoreName::Running),
            candidate: with_candidate.then(|| Datastore::new(DatastoreName::Candidate)),
            startup: with_startup.then(|| Datastore::new(DatastoreName::Startup)),
        }
    }

    pub fn get(&self, name: DatastoreName) -> Option<&Datastore> {
        match name {
            DatastoreName::Running => Some(&self.running),
            DatastoreName::Candidate => self.candidate.as_ref(),
            DatastoreName::Startup => self.startup.as_ref(),
        }
    }

    pub fn get_mut(&mut self, name: DatastoreName) -> Option<&mut Datastore> {
        match name {
            DatastoreName::Running => Some(&mut self.running),
            DatastoreName::Candidate => self.candidate.as_mut(),
            DatastoreName::Startup => self.startup.as_mut(),
        }
    }
}

/// Serializes `store` to `path` with write-temp-then-rename, so a crash
/// mid-write never leaves a torn startup file behind.
pub fn persist_startup(store: &Datastore, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let bytes = xml::emit_value_tree(&store.tree);

    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        f.write_all(&bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename into {}", path.display()))?;
    Ok(())
}

/// Loads a previously persisted startup file, if present.
pub fn load_startup(path: &Path) -> Result<Option<ValueTree>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let tree = xml::parse_value_tree(&bytes)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{datastore::value::ValueNode, yang::typedef::ScalarValue};

    #[test]
    fn last_modified_strictly_increases() {
        let mut ds = Datastore::new(DatastoreName::Running);
        let mut stamps = Vec::new();
        for _ in 0..5 {
            ds.install_root(ValueTree::with_root("data"));
            stamps.push(ds.last_modified);
        }
        for w in stamps.windows(2) {
            assert!(w[1] > w[0], "stamps must strictly increase");
        }
    }

    #[test]
    fn copy_config_roundtrip_preserves_content() {
        let mut a = Datastore::new(DatastoreName::Running);
        let mut tree = ValueTree::with_root("data");
        let c = tree.append_child(tree.root(), ValueNode::new("system"));
        tree.append_child(c, ValueNode::leaf("hostname", ScalarValue::Text("nc1".into())));
        a.install_root(tree);

        let mut b = Datastore::new(DatastoreName::Candidate);
        b.copy_from(&a);
        let mut back = Datastore::new(DatastoreName::Running);
        back.copy_from(&b);

        let sys = back.tree.find_child(back.tree.root(), "system").expect("system");
        let hn = back.tree.find_child(sys, "hostname").expect("hostname");
        assert_eq!(back.tree.canonical_value(hn), Some("nc1".to_string()));
    }
}
