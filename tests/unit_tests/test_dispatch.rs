// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use netconfd_rs::cfg::{config::Config, enums::DatastoreFamily};

use crate::unit_tests::{open_session, rpc, test_state};

fn candidate_cfg() -> Config {
    Config::default()
}

fn running_cfg() -> Config {
    let mut cfg = Config::default();
    cfg.datastores.family = DatastoreFamily::WritableRunning;
    cfg
}

#[test]
fn create_then_commit_then_get() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);

    // RPC 1: edit the candidate store.
    let reply = rpc(
        &mut state,
        1,
        "101",
        r#"<edit-config><target><candidate/></target>
           <config><foo xmlns="uri:x"><bar>7</bar></foo></config></edit-config>"#,
    );
    assert!(reply.has_child("ok"), "edit-config replies ok: {reply:?}");

    // RPC 2: commit.
    let reply = rpc(&mut state, 1, "102", "<commit/>");
    assert!(reply.has_child("ok"), "commit replies ok");

    // RPC 3: running now contains the change.
    let reply = rpc(
        &mut state,
        1,
        "103",
        "<get-config><source><running/></source></get-config>",
    );
    let data = reply.child("data").expect("data");
    let foo = data.child("foo").expect("foo present in running");
    assert_eq!(foo.child_text("bar"), Some("7"));
}

#[test]
fn editing_running_directly_requires_writable_running() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);

    let reply = rpc(
        &mut state,
        1,
        "1",
        r#"<edit-config><target><running/></target>
           <config><foo xmlns="uri:x"><bar>1</bar></foo></config></edit-config>"#,
    );
    let err = reply.child("rpc-error").expect("must fail");
    assert_eq!(err.child_text("error-tag"), Some("operation-not-supported"));

    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    let reply = rpc(
        &mut state,
        1,
        "1",
        r#"<edit-config><target><running/></target>
           <config><foo xmlns="uri:x"><bar>1</bar></foo></config></edit-config>"#,
    );
    assert!(reply.has_child("ok"));
}

#[test]
fn rollback_keeps_running_untouched() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    let stamp = state.stores.running.last_modified;

    // bar is an int32; the second node carries garbage.
    let reply = rpc(
        &mut state,
        1,
        "9",
        r#"<edit-config><target><running/></target>
           <error-option>rollback-on-error</error-option>
           <config><foo xmlns="uri:x"><bar>not-a-number</bar></foo></config></edit-config>"#,
    );
    let err = reply.child("rpc-error").expect("error reported");
    assert_eq!(err.child_text("error-tag"), Some("invalid-value"));
    assert_eq!(state.stores.running.last_modified, stamp);

    let reply = rpc(
        &mut state,
        1,
        "10",
        "<get-config><source><running/></source></get-config>",
    );
    let data = reply.child("data").expect("data");
    assert!(data.child("foo").is_none(), "running unchanged");
}

#[test]
fn copy_config_roundtrip_preserves_running() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);

    rpc(
        &mut state,
        1,
        "1",
        r#"<edit-config><target><candidate/></target>
           <config><foo xmlns="uri:x"><bar>42</bar></foo></config></edit-config>"#,
    );
    rpc(&mut state, 1, "2", "<commit/>");
    let before = netconfd_rs::xml::emit_value_tree(&state.stores.running.tree);

    // running -> candidate -> running must be a no-op on content.
    let reply = rpc(
        &mut state,
        1,
        "3",
        "<copy-config><target><candidate/></target><source><running/></source></copy-config>",
    );
    assert!(reply.has_child("ok"));
    let reply = rpc(
        &mut state,
        1,
        "4",
        "<copy-config><target><running/></target><source><candidate/></source></copy-config>",
    );
    assert!(reply.has_child("ok"));

    let after = netconfd_rs::xml::emit_value_tree(&state.stores.running.tree);
    assert_eq!(before, after);
}

#[test]
fn get_reports_state_data_but_get_config_does_not() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);

    let reply = rpc(&mut state, 1, "1", "<get/>");
    let data = reply.child("data").expect("data");
    let sc = data.child("netconfd-state").expect("state visible in get");
    assert!(sc.child("uptime").is_some());

    let reply = rpc(
        &mut state,
        1,
        "2",
        "<get-config><source><running/></source></get-config>",
    );
    let data = reply.child("data").expect("data");
    assert!(
        data.child("netconfd-state").is_none(),
        "state data filtered from get-config"
    );
}

#[test]
fn get_with_subtree_filter_narrows_reply() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    for (name, mtu) in [("eth0", 1500), ("eth1", 9000)] {
        rpc(
            &mut state,
            1,
            "1",
            &format!(
                r#"<edit-config><target><running/></target>
                   <config><iface xmlns="uri:x"><name>{name}</name><mtu>{mtu}</mtu></iface></config></edit-config>"#
            ),
        );
    }

    let reply = rpc(
        &mut state,
        1,
        "2",
        r#"<get><filter type="subtree"><iface><name>eth1</name></iface></filter></get>"#,
    );
    let data = reply.child("data").expect("data");
    let ifaces: Vec<_> = data.children.iter().filter(|c| c.name == "iface").collect();
    assert_eq!(ifaces.len(), 1);
    assert_eq!(ifaces[0].child_text("mtu"), Some("9000"));
}

#[test]
fn kill_session_validations() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);
    open_session(&mut state, 2);

    let reply = rpc(&mut state, 1, "1", "<kill-session><session-id>1</session-id></kill-session>");
    let err = reply.child("rpc-error").expect("self-kill rejected");
    assert_eq!(err.child_text("error-tag"), Some("invalid-value"));

    let reply = rpc(&mut state, 1, "2", "<kill-session><session-id>99</session-id></kill-session>");
    assert!(reply.child("rpc-error").is_some(), "unknown session rejected");

    let reply = rpc(&mut state, 1, "3", "<kill-session><session-id>2</session-id></kill-session>");
    assert!(reply.has_child("ok"));
}

#[test]
fn unknown_operation_is_not_supported() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);
    let reply = rpc(&mut state, 1, "1", "<frobnicate/>");
    let err = reply.child("rpc-error").expect("error");
    assert_eq!(err.child_text("error-tag"), Some("operation-not-supported"));
}

#[test]
fn registrant_rpc_is_reachable_through_dispatch() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);

    state.registry.register_rpc(
        "x",
        "ping",
        Box::new(|op| {
            let mut pong = netconfd_rs::xml::XmlElement::new("pong");
            pong.text = op.child_text("payload").unwrap_or_default().to_string();
            Ok(vec![pong])
        }),
    );

    let reply = rpc(&mut state, 1, "1", "<ping><payload>hi</payload></ping>");
    assert_eq!(reply.child_text("pong"), Some("hi"));
}

#[test]
fn set_log_level_routes_through_the_registry() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);

    // The extension is installed at init; without an initialized logger it
    // reports invalid-value, which proves the registered handler ran.
    let reply = rpc(
        &mut state,
        1,
        "1",
        "<set-log-level><log-level>debug</log-level></set-log-level>",
    );
    let err = reply.child("rpc-error").expect("handler reached");
    assert_eq!(err.child_text("error-tag"), Some("invalid-value"));

    let reply = rpc(&mut state, 1, "2", "<set-log-level/>");
    let err = reply.child("rpc-error").expect("missing parameter flagged");
    assert_eq!(err.child_text("error-tag"), Some("missing-element"));
}

#[test]
fn missing_message_id_is_missing_attribute() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);
    let frame = br#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><get/></rpc>"#;
    let result = netconfd_rs::handlers::dispatch_frame(&mut state, 1, frame);
    let reply =
        netconfd_rs::xml::parse_element(&result.reply.expect("reply")).expect("parses");
    let err = reply.child("rpc-error").expect("error");
    assert_eq!(err.child_text("error-tag"), Some("missing-attribute"));
}

#[test]
fn get_schema_returns_module_source() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);
    let reply = rpc(
        &mut state,
        1,
        "1",
        "<get-schema><identifier>x</identifier><format>yang</format></get-schema>",
    );
    let data = reply.child("data").expect("data");
    assert!(data.text.contains("module x"));

    // Byte-identical on repeat.
    let reply2 = rpc(
        &mut state,
        1,
        "2",
        "<get-schema><identifier>x</identifier><format>yang</format></get-schema>",
    );
    assert_eq!(data.text, reply2.child("data").expect("data").text);

    let reply = rpc(
        &mut state,
        1,
        "3",
        "<get-schema><identifier>nope</identifier></get-schema>",
    );
    assert!(reply.child("rpc-error").is_some());
}

#[test]
fn discard_changes_resets_candidate() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);

    rpc(
        &mut state,
        1,
        "1",
        r#"<edit-config><target><candidate/></target>
           <config><foo xmlns="uri:x"><bar>5</bar></foo></config></edit-config>"#,
    );
    let reply = rpc(&mut state, 1, "2", "<discard-changes/>");
    assert!(reply.has_child("ok"));

    rpc(&mut state, 1, "3", "<commit/>");
    let reply = rpc(
        &mut state,
        1,
        "4",
        "<get-config><source><running/></source></get-config>",
    );
    let data = reply.child("data").expect("data");
    assert!(data.child("foo").is_none(), "discarded edit never lands");
}

#[test]
fn validate_flags_bad_store_content() {
    let mut state = test_state(candidate_cfg());
    open_session(&mut state, 1);

    let reply = rpc(
        &mut state,
        1,
        "1",
        r#"<validate><source><config><foo xmlns="uri:x"><bar>oops</bar></foo></config></source></validate>"#,
    );
    let err = reply.child("rpc-error").expect("invalid content flagged");
    assert_eq!(err.child_text("error-tag"), Some("invalid-value"));

    let reply = rpc(
        &mut state,
        1,
        "2",
        "<validate><source><candidate/></source></validate>",
    );
    assert!(reply.has_child("ok"), "empty candidate validates");
}
