// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::{Duration, Utc};
use netconfd_rs::cfg::{config::Config, enums::DatastoreFamily};

use crate::unit_tests::{open_session, rpc, test_state};

fn running_cfg() -> Config {
    let mut cfg = Config::default();
    cfg.datastores.family = DatastoreFamily::WritableRunning;
    cfg
}

fn fmt(t: chrono::DateTime<Utc>) -> String {
    t.to_rfc3339()
}

#[test]
fn create_subscription_validation_table() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    let now = Utc::now();

    // Unknown stream.
    let reply = rpc(
        &mut state,
        1,
        "1",
        "<create-subscription><stream>SYSLOG</stream></create-subscription>",
    );
    let err = reply.child("rpc-error").expect("error");
    assert_eq!(err.child_text("error-tag"), Some("invalid-value"));
    assert_eq!(err.child_text("error-app-tag"), Some("not-found"));

    // Malformed timestamp.
    let reply = rpc(
        &mut state,
        1,
        "2",
        "<create-subscription><startTime>yesterday</startTime></create-subscription>",
    );
    assert_eq!(
        reply.child("rpc-error").expect("error").child_text("error-tag"),
        Some("invalid-value")
    );

    // startTime in the future.
    let reply = rpc(
        &mut state,
        1,
        "3",
        &format!(
            "<create-subscription><startTime>{}</startTime></create-subscription>",
            fmt(now + Duration::minutes(10))
        ),
    );
    assert_eq!(
        reply.child("rpc-error").expect("error").child_text("error-tag"),
        Some("bad-element")
    );

    // stopTime without startTime.
    let reply = rpc(
        &mut state,
        1,
        "4",
        &format!(
            "<create-subscription><stopTime>{}</stopTime></create-subscription>",
            fmt(now)
        ),
    );
    assert_eq!(
        reply.child("rpc-error").expect("error").child_text("error-tag"),
        Some("missing-element")
    );

    // stopTime before startTime.
    let reply = rpc(
        &mut state,
        1,
        "5",
        &format!(
            "<create-subscription><startTime>{}</startTime><stopTime>{}</stopTime></create-subscription>",
            fmt(now - Duration::minutes(1)),
            fmt(now - Duration::minutes(5))
        ),
    );
    assert_eq!(
        reply.child("rpc-error").expect("error").child_text("error-tag"),
        Some("bad-element")
    );

    // A valid subscription, then a second one on the same session.
    let reply = rpc(&mut state, 1, "6", "<create-subscription/>");
    assert!(reply.has_child("ok"));
    let reply = rpc(&mut state, 1, "7", "<create-subscription/>");
    assert_eq!(
        reply.child("rpc-error").expect("error").child_text("error-tag"),
        Some("in-use")
    );
}

#[test]
fn commit_queues_config_change_after_edit() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    open_session(&mut state, 2);

    // Session 2 subscribes live before the change happens.
    let reply = rpc(&mut state, 2, "1", "<create-subscription/>");
    assert!(reply.has_child("ok"));

    rpc(
        &mut state,
        1,
        "2",
        r#"<edit-config><target><running/></target>
           <config><foo xmlns="uri:x"><bar>3</bar></foo></config></edit-config>"#,
    );

    let mut deliveries: Vec<(u64, String)> = Vec::new();
    state.notif.deliver_burst(Utc::now(), 0, &mut |sid, bytes| {
        deliveries.push((sid, String::from_utf8_lossy(&bytes).into_owned()));
    });

    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, 2);
    assert!(deliveries[0].1.contains("sysConfigChange"));
    assert!(deliveries[0].1.contains("<eventTime>"));
}

#[test]
fn filtered_subscription_skips_unmatched_events() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    open_session(&mut state, 2);

    let reply = rpc(
        &mut state,
        2,
        "1",
        r#"<create-subscription><filter type="subtree"><sysSessionEnd/></filter></create-subscription>"#,
    );
    assert!(reply.has_child("ok"));

    // A config change does not match the sysSessionEnd selector.
    rpc(
        &mut state,
        1,
        "2",
        r#"<edit-config><target><running/></target>
           <config><foo xmlns="uri:x"><bar>3</bar></foo></config></edit-config>"#,
    );
    let mut count = 0;
    state.notif.deliver_burst(Utc::now(), 0, &mut |_, _| count += 1);
    assert_eq!(count, 0);

    // A session death does.
    state.session_ended(1, "dropped", None);
    let mut bodies = Vec::new();
    state.notif.deliver_burst(Utc::now(), 0, &mut |_, b| {
        bodies.push(String::from_utf8_lossy(&b).into_owned());
    });
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].contains("sysSessionEnd"));
}

#[test]
fn replay_subscription_honors_start_and_stop() {
    let mut state = test_state(running_cfg());
    open_session(&mut state, 1);
    open_session(&mut state, 2);

    // Two pre-seeded changes spaced in time.
    rpc(
        &mut state,
        1,
        "1",
        r#"<edit-config><target><running/></target>
           <config><foo xmlns="uri:x"><bar>1</bar></foo></config></edit-config>"#,
    );
    let boundary = Utc::now();
    std::thread::sleep(std::time::Duration::from_millis(20));
    rpc(
        &mut state,
        1,
        "2",
        r#"<edit-config><target><running/></target>
           <config><foo xmlns="uri:x"><bar>2</bar></foo></config></edit-config>"#,
    );

    // Replay window ends at the boundary: only the first change plus the
    // two completion markers may arrive.
    let start = boundary - Duration::seconds(30);
    let reply = rpc(
        &mut state,
        2,
        "3",
        &format!(
            "<create-subscription><startTime>{}</startTime><stopTime>{}</stopTime></create-subscription>",
            fmt(start),
            fmt(boundary)
        ),
    );
    assert!(reply.has_child("ok"));

    let mut bodies = Vec::new();
    state.notif.deliver_burst(Utc::now(), 0, &mut |sid, b| {
        assert_eq!(sid, 2);
        bodies.push(String::from_utf8_lossy(&b).into_owned());
    });

    let config_changes = bodies.iter().filter(|b| b.contains("sysConfigChange")).count();
    assert_eq!(config_changes, 1, "only the in-window event replays");
    assert!(bodies.iter().any(|b| b.contains("replayComplete")));
    assert!(bodies.iter().any(|b| b.contains("notificationComplete")));

    // Nothing further after shutdown.
    let mut more = 0;
    state.notif.deliver_burst(Utc::now(), 0, &mut |_, _| more += 1);
    assert_eq!(more, 0);
}
