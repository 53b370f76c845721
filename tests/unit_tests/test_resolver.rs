// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Boundary behavior of the type system observed through a full server.

use netconfd_rs::{
    cfg::{config::Config, enums::DatastoreFamily},
    server::state::ServerState,
    yang::{
        ast::{
            EnumDecl, ModuleDecl, NodeDecl, RangeBound, RangeExpr, TypeSpec, TypedefDecl,
        },
        resolve::load_module,
    },
};

use crate::unit_tests::{open_session, rpc};

fn running_cfg() -> Config {
    let mut cfg = Config::default();
    cfg.datastores.family = DatastoreFamily::WritableRunning;
    cfg
}

/// Builds a server whose schema exercises the numeric/enum/leafref edges.
fn boundary_state() -> ServerState {
    let mut state = ServerState::new(running_cfg()).expect("state");

    let mut m = ModuleDecl::new("b", "b", "uri:b", "2025-01-01");

    let mut full_range = TypeSpec::named("int32");
    full_range.range = Some(RangeExpr {
        parts: vec![(RangeBound::Min, RangeBound::Max)],
        error_app_tag: None,
        error_message: None,
    });
    m.typedefs = vec![TypedefDecl {
        name: "whole-int32".into(),
        typ: full_range,
        default: None,
        units: None,
    }];

    let mut price = TypeSpec::named("decimal64");
    price.fraction_digits = Some(2);

    let mut severity = TypeSpec::named("enumeration");
    severity.enums = vec![
        EnumDecl {
            name: "major".into(),
            value: Some(5),
        },
        EnumDecl {
            name: "minor".into(),
            value: None,
        },
    ];

    let mut target = TypeSpec::named("leafref");
    target.leafref_path = Some("/host/name".into());

    m.body = vec![
        NodeDecl::leaf("count", TypeSpec::named("whole-int32")),
        NodeDecl::leaf("price", price),
        NodeDecl::leaf("severity", severity),
        NodeDecl::container(
            "host",
            vec![NodeDecl::leaf("name", TypeSpec::named("string"))],
        ),
        NodeDecl::leaf("primary-host", target),
    ];
    load_module(&mut state.schema, &m).expect("boundary module loads");
    state
}

fn edit(state: &mut ServerState, mid: &str, leaf: &str, value: &str) -> Option<String> {
    let reply = rpc(
        state,
        1,
        mid,
        &format!(
            r#"<edit-config><target><running/></target>
               <config><{leaf} xmlns="uri:b">{value}</{leaf}></config></edit-config>"#
        ),
    );
    reply
        .child("rpc-error")
        .and_then(|e| e.child_text("error-tag"))
        .map(str::to_string)
}

#[test]
fn int32_min_max_range_boundaries() {
    let mut state = boundary_state();
    open_session(&mut state, 1);

    assert_eq!(edit(&mut state, "1", "count", "2147483647"), None);
    assert_eq!(edit(&mut state, "2", "count", "-2147483648"), None);
    assert_eq!(
        edit(&mut state, "3", "count", "2147483648"),
        Some("invalid-value".to_string())
    );
}

#[test]
fn decimal64_fraction_digit_boundaries() {
    let mut state = boundary_state();
    open_session(&mut state, 1);

    assert_eq!(edit(&mut state, "1", "price", "0.01"), None);
    assert_eq!(
        edit(&mut state, "2", "price", "0.001"),
        Some("invalid-value".to_string())
    );
}

#[test]
fn enum_auto_value_follows_explicit() {
    let mut state = boundary_state();
    open_session(&mut state, 1);

    assert_eq!(edit(&mut state, "1", "severity", "minor"), None);
    assert_eq!(
        edit(&mut state, "2", "severity", "critical"),
        Some("invalid-value".to_string())
    );

    // minor auto-assigned 6, right after explicit 5.
    let leaf = state
        .schema
        .resolve_schema_path("/b:severity")
        .expect("leaf");
    let td = state
        .schema
        .typedef(state.schema.node_typedef(leaf).expect("typed"));
    assert_eq!(td.find_enum("minor").expect("minor").value, 6);
    assert_eq!(td.find_enum("major").expect("major").value, 5);
}

#[test]
fn leafref_requires_live_target_instance() {
    let mut state = boundary_state();
    open_session(&mut state, 1);

    // Target absent: require-instance (the default) rejects the value.
    assert_eq!(
        edit(&mut state, "1", "primary-host", "db1"),
        Some("data-missing".to_string())
    );

    // Create the referenced leaf, then the same edit goes through.
    let reply = rpc(
        &mut state,
        1,
        "2",
        r#"<edit-config><target><running/></target>
           <config><host xmlns="uri:b"><name>db1</name></host></config></edit-config>"#,
    );
    assert!(reply.has_child("ok"));
    assert_eq!(edit(&mut state, "3", "primary-host", "db1"), None);
}

#[test]
fn list_create_of_existing_entry_is_data_exists() {
    let mut state = crate::unit_tests::test_state(running_cfg());
    open_session(&mut state, 1);

    let entry = r#"<edit-config><target><running/></target>
        <config><iface xmlns="uri:x" operation="create"><name>eth0</name></iface></config></edit-config>"#;
    let reply = rpc(&mut state, 1, "1", entry);
    assert!(reply.has_child("ok"));
    let reply = rpc(&mut state, 1, "2", entry);
    assert_eq!(
        reply.child("rpc-error").expect("error").child_text("error-tag"),
        Some("data-exists")
    );
}
