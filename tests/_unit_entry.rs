// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

#![allow(clippy::all)]

mod unit_tests {
    use netconfd_rs::{
        cfg::config::Config,
        server::state::{ServerState, SessionMeta},
        xml::{self, XmlElement},
        yang::{
            ast::{ModuleDecl, NodeDecl, TypeSpec},
            resolve::load_module,
        },
    };

    /// A server whose schema carries the `uri:x` test module from the
    /// protocol examples: container foo { leaf bar (int32) }, plus an
    /// interface list for lock and filter tests.
    pub fn test_state(cfg: Config) -> ServerState {
        let mut state = ServerState::new(cfg).expect("server state");
        let mut m = ModuleDecl::new("x", "x", "uri:x", "2025-01-01");
        m.source = "module x { namespace \"uri:x\"; prefix x; }".to_string();
        m.body = vec![
            NodeDecl::container("foo", vec![NodeDecl::leaf("bar", TypeSpec::named("int32"))]),
            NodeDecl::list(
                "iface",
                &["name"],
                vec![
                    NodeDecl::leaf("name", TypeSpec::named("string")),
                    NodeDecl::leaf("mtu", TypeSpec::named("uint32")),
                ],
            ),
        ];
        load_module(&mut state.schema, &m).expect("test module loads");
        state
    }

    /// Registers a hello-complete session so RPC dispatch is reachable.
    pub fn open_session(state: &mut ServerState, sid: u64) {
        state.session_started(SessionMeta::new(sid, "admin", "localhost"));
        if let Some(meta) = state.session_mut(sid) {
            meta.hello_done = true;
        }
    }

    /// Wraps an operation into `<rpc>` and dispatches it.
    pub fn rpc(
        state: &mut ServerState,
        sid: u64,
        message_id: &str,
        op_xml: &str,
    ) -> XmlElement {
        let frame = format!(
            r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="{message_id}">{op_xml}</rpc>"#
        );
        let result =
            netconfd_rs::handlers::dispatch_frame(state, sid, frame.as_bytes());
        let bytes = result.reply.expect("rpc produces a reply");
        xml::parse_element(&bytes).expect("reply parses")
    }

    pub mod test_dispatch;
    pub mod test_locks;
    pub mod test_notify;
    pub mod test_resolver;
}
