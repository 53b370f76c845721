// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use netconfd_rs::cfg::{config::Config, enums::DatastoreFamily};

use crate::unit_tests::{open_session, rpc, test_state};

fn running_cfg() -> Config {
    let mut cfg = Config::default();
    cfg.datastores.family = DatastoreFamily::WritableRunning;
    cfg
}

#[test]
fn lock_then_unlock_leaves_state_unchanged() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);

    let reply = rpc(&mut state, 1, "1", "<lock><target><running/></target></lock>");
    assert!(reply.has_child("ok"));
    let reply = rpc(&mut state, 1, "2", "<unlock><target><running/></target></unlock>");
    assert!(reply.has_child("ok"));
    // Lock state is back to free: a second session can lock now.
    open_session(&mut state, 2);
    let reply = rpc(&mut state, 2, "3", "<lock><target><running/></target></lock>");
    assert!(reply.has_child("ok"));
}

#[test]
fn global_lock_blocks_other_sessions_edits() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    open_session(&mut state, 2);

    rpc(&mut state, 1, "1", "<lock><target><running/></target></lock>");
    let reply = rpc(
        &mut state,
        2,
        "2",
        r#"<edit-config><target><running/></target>
           <config><foo xmlns="uri:x"><bar>1</bar></foo></config></edit-config>"#,
    );
    let err = reply.child("rpc-error").expect("denied");
    assert_eq!(err.child_text("error-tag"), Some("lock-denied"));
    let info = err.child("error-info").expect("holder named");
    assert_eq!(info.child_text("session-id"), Some("1"));
}

#[test]
fn partial_lock_conflict_names_the_holder() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    open_session(&mut state, 2);

    // Seed /iface[name='eth0'] so selects match something.
    rpc(
        &mut state,
        1,
        "1",
        r#"<edit-config><target><running/></target>
           <config><iface xmlns="uri:x"><name>eth0</name><mtu>1500</mtu></iface></config></edit-config>"#,
    );

    // Session 1 locks the mtu leaf below the entry.
    let reply = rpc(
        &mut state,
        1,
        "2",
        "<partial-lock><select>/iface/mtu</select></partial-lock>",
    );
    let lock_id = reply.child_text("lock-id").expect("lock granted");
    assert!(!lock_id.is_empty());
    assert!(reply.child("locked-node").is_some());

    // Session 2 wants the whole entry; the node-sets intersect.
    let reply = rpc(
        &mut state,
        2,
        "3",
        "<partial-lock><select>/iface</select></partial-lock>",
    );
    let err = reply.child("rpc-error").expect("denied");
    assert_eq!(err.child_text("error-tag"), Some("lock-denied"));
    let info = err.child("error-info").expect("info");
    assert_eq!(info.child_text("session-id"), Some("1"));

    // Releasing frees the subtree for session 2.
    let reply = rpc(
        &mut state,
        1,
        "4",
        &format!("<partial-unlock><lock-id>{lock_id}</lock-id></partial-unlock>"),
    );
    assert!(reply.has_child("ok"));
    let reply = rpc(
        &mut state,
        2,
        "5",
        "<partial-lock><select>/iface</select></partial-lock>",
    );
    assert!(reply.child("lock-id").is_some());
}

#[test]
fn partial_lock_with_no_matches_fails() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    let reply = rpc(
        &mut state,
        1,
        "1",
        "<partial-lock><select>/nothing/here</select></partial-lock>",
    );
    let err = reply.child("rpc-error").expect("error");
    assert_eq!(err.child_text("error-tag"), Some("operation-failed"));
}

#[test]
fn global_lock_refused_while_partial_held() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    open_session(&mut state, 2);

    rpc(
        &mut state,
        1,
        "1",
        r#"<edit-config><target><running/></target>
           <config><iface xmlns="uri:x"><name>eth0</name></iface></config></edit-config>"#,
    );
    rpc(&mut state, 1, "2", "<partial-lock><select>/iface</select></partial-lock>");

    let reply = rpc(&mut state, 2, "3", "<lock><target><running/></target></lock>");
    let err = reply.child("rpc-error").expect("denied");
    assert_eq!(err.child_text("error-tag"), Some("lock-denied"));
}

#[test]
fn session_end_releases_locks_for_others() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    open_session(&mut state, 2);

    rpc(&mut state, 1, "1", "<lock><target><running/></target></lock>");
    state.session_ended(1, "dropped", None);

    let reply = rpc(&mut state, 2, "2", "<lock><target><running/></target></lock>");
    assert!(reply.has_child("ok"));
}
