// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use crate::{
    datastore::store::DatastoreName,
    error::{ErrorKind, RpcError},
};

/// One granted partial lock (RFC 5717).
#[derive(Debug, Clone)]
pub struct PartialLock {
    pub lock_id: u32,
    pub session: u64,
    /// Canonical instance paths of the locked node-set.
    pub paths: Vec<String>,
}

/// Lock state for one datastore.
#[derive(Debug, Default)]
struct StoreLocks {
    global: Option<u64>,
    partial: Vec<PartialLock>,
}

/// Lock bookkeeping across all datastores. Session death releases
/// everything that session held.
#[derive(Debug, Default)]
pub struct LockTable {
    stores: HashMap<DatastoreName, StoreLocks>,
    next_lock_id: u32,
}

fn lock_denied(holder: u64, msg: &str) -> RpcError {
    RpcError::protocol(ErrorKind::LockDenied)
        .with_message(msg)
        .with_info("session-id", holder.to_string())
}

/// Segment-wise prefix test: `/x` covers `/x/y` but not `/xy`.
fn paths_intersect(a: &str, b: &str) -> bool {
    let seg = |s: &str| s.split('/').filter(|p| !p.is_empty()).count();
    let (short, long) = if seg(a) <= seg(b) { (a, b) } else { (b, a) };
    let short_segs: Vec<&str> = short.split('/').filter(|p| !p.is_empty()).collect();
    let long_segs: Vec<&str> = long.split('/').filter(|p| !p.is_empty()).collect();
    short_segs
        .iter()
        .zip(long_segs.iter())
        .all(|(s, l)| s == l)
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&mut self, name: DatastoreName) -> &mut StoreLocks {
        self.stores.entry(name).or_default()
    }

    /// `<lock>`: refused while any partial lock exists or another session
    /// holds the global lock.
    pub fn lock_global(
        &mut self,
        name: DatastoreName,
        session: u64,
    ) -> Result<(), RpcError> {
        let s = self.store(name);
        if let Some(holder) = s.global {
            return Err(lock_denied(holder, "datastore is already locked"));
        }
        if let Some(pl) = s.partial.first() {
            return Err(lock_denied(
                pl.session,
                "partial locks exist on the datastore",
            ));
        }
        s.global = Some(session);
        Ok(())
    }

    /// `<unlock>`: only the holder may release.
    pub fn unlock_global(
        &mut self,
        name: DatastoreName,
        session: u64,
    ) -> Result<(), RpcError> {
        let s = self.store(name);
        match s.global {
            Some(h) if h == session => {
                s.global = None;
                Ok(())
            },
            Some(h) => Err(lock_denied(h, "lock is held by another session")),
            None => Err(RpcError::protocol(ErrorKind::OperationFailed)
                .with_message("datastore is not locked")),
        }
    }

    /// `<partial-lock>`: refused while the global lock is held or the
    /// requested node-set intersects an existing partial lock.
    pub fn lock_partial(
        &mut self,
        name: DatastoreName,
        session: u64,
        paths: Vec<String>,
    ) -> Result<u32, RpcError> {
        let next_id = self.next_lock_id;
        let s = self.store(name);
        if let Some(holder) = s.global {
            return Err(lock_denied(holder, "global lock is held"));
        }
        for pl in &s.partial {
            for held in &pl.paths {
                for want in &paths {
                    if paths_intersect(held, want) {
                        return Err(lock_denied(
                            pl.session,
                            "node-set intersects an existing partial lock",
                        )
                        .with_info("locked-node", held.clone()));
                    }
                }
            }
        }
        self.next_lock_id = next_id.wrapping_add(1);
        let lock_id = next_id;
        self.store(name).partial.push(PartialLock {
            lock_id,
            session,
            paths,
        });
        Ok(lock_id)
    }

    /// `<partial-unlock>`: only the owner may release.
    pub fn unlock_partial(
        &mut self,
        name: DatastoreName,
        session: u64,
        lock_id: u32,
    ) -> Result<(), RpcError> {
        let s = self.store(name);
        let Some(pos) = s.partial.iter().position(|pl| pl.lock_id == lock_id) else {
            return Err(RpcError::protocol(ErrorKind::InvalidValue)
                .with_message(format!("unknown lock-id {lock_id}")));
        };
        if s.partial[pos].session != session {
            return Err(lock_denied(
                s.partial[pos].session,
                "partial lock is owned by another session",
            ));
        }
        s.partial.remove(pos);
        Ok(())
    }

    /// Write-permission check for an edit under `path`.
    pub fn check_edit_allowed(
        &self,
        name: DatastoreName,
        session: u64,
        path: &str,
    ) -> Result<(), RpcError> {
        let Some(s) = self.stores.get(&name) else {
            return Ok(());
        };
        if let Some(holder) = s.global
            && holder != session
        {
            return Err(lock_denied(holder, "datastore is locked by another session"));
        }
        for pl in &s.partial {
            if pl.session != session
                && pl.paths.iter().any(|p| paths_intersect(p, path))
            {
                return Err(lock_denied(
                    pl.session,
                    "target is partially locked by another session",
                ));
            }
        }
        Ok(())
    }

    /// Releases every lock owned by a dying session.
    pub fn release_session(&mut self, session: u64) {
        for s in self.stores.values_mut() {
            if s.global == Some(session) {
                s.global = None;
            }
            s.partial.retain(|pl| pl.session != session);
        }
    }

    pub fn global_holder(&self, name: DatastoreName) -> Option<u64> {
        self.stores.get(&name).and_then(|s| s.global)
    }

    pub fn partial_locks(&self, name: DatastoreName) -> &[PartialLock] {
        self.stores
            .get(&name)
            .map(|s| s.partial.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_one_global_lock() {
        let mut t = LockTable::new();
        t.lock_global(DatastoreName::Running, 1).expect("first lock");
        let err = t.lock_global(DatastoreName::Running, 2).expect_err("denied");
        assert_eq!(err.kind, ErrorKind::LockDenied);
        assert_eq!(err.info[0].value, "1");
        t.unlock_global(DatastoreName::Running, 1).expect("unlock");
        t.lock_global(DatastoreName::Running, 2).expect("relock");
    }

    #[test]
    fn partial_lock_conflicts_on_ancestor() {
        let mut t = LockTable::new();
        t.lock_partial(DatastoreName::Running, 1, vec!["/x/y".into()])
            .expect("lock /x/y");
        // /x covers /x/y, so the sets intersect.
        let err = t
            .lock_partial(DatastoreName::Running, 2, vec!["/x".into()])
            .expect_err("denied");
        assert_eq!(err.kind, ErrorKind::LockDenied);
        assert_eq!(err.info[0].value, "1");
        // A disjoint subtree is fine.
        t.lock_partial(DatastoreName::Running, 2, vec!["/z".into()])
            .expect("lock /z");
    }

    #[test]
    fn global_and_partial_exclude_each_other() {
        let mut t = LockTable::new();
        t.lock_partial(DatastoreName::Running, 1, vec!["/x".into()])
            .expect("partial");
        assert!(t.lock_global(DatastoreName::Running, 1).is_err());

        let mut t = LockTable::new();
        t.lock_global(DatastoreName::Running, 1).expect("global");
        assert!(t.lock_partial(DatastoreName::Running, 1, vec!["/x".into()]).is_err());
    }

    #[test]
    fn session_death_releases_locks() {
        let mut t = LockTable::new();
        t.lock_global(DatastoreName::Running, 7).expect("global");
        t.lock_partial(DatastoreName::Candidate, 7, vec!["/a".into()])
            .expect("partial");
        t.release_session(7);
        assert_eq!(t.global_holder(DatastoreName::Running), None);
        assert!(t.partial_locks(DatastoreName::Candidate).is_empty());
    }

    #[test]
    fn prefix_test_is_segment_wise() {
        assert!(paths_intersect("/x", "/x/y"));
        assert!(!paths_intersect("/x", "/xy"));
        assert!(paths_intersect("/a/b", "/a/b"));
        assert!(!paths_intersect("/a/b", "/a/c"));
    }
}
