// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Advertised capability URIs and the server `<hello>`.

use crate::{
    cfg::{config::Config, enums::BaseVersion},
    xml::{self, XmlElement},
    yang::schema::SchemaContext,
};

pub const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

const CAP_PREFIX: &str = "urn:ietf:params:netconf:capability";

/// The full capability set for the current profile and loaded modules.
pub fn capability_uris(cfg: &Config, schema: &SchemaContext) -> Vec<String> {
    let mut caps = Vec::new();

    for v in &cfg.protocol.base_versions {
        caps.push(match v {
            BaseVersion::Base10 => "urn:ietf:params:netconf:base:1.0".to_string(),
            BaseVersion::Base11 => "urn:ietf:params:netconf:base:1.1".to_string(),
        });
    }

    if cfg.datastores.family.is_candidate() {
        caps.push(format!("{CAP_PREFIX}:candidate:1.0"));
        caps.push(format!("{CAP_PREFIX}:confirmed-commit:1.1"));
    } else {
        caps.push(format!("{CAP_PREFIX}:writable-running:1.0"));
    }

    caps.push(format!("{CAP_PREFIX}:rollback-on-error:1.0"));

    if cfg.protocol.validate {
        caps.push(format!("{CAP_PREFIX}:validate:1.1"));
    }
    if cfg.datastores.with_startup {
        caps.push(format!("{CAP_PREFIX}:startup:1.0"));
    }
    caps.push(format!("{CAP_PREFIX}:url:1.0?scheme=file"));
    caps.push(format!("{CAP_PREFIX}:xpath:1.0"));
    if cfg.protocol.notifications {
        caps.push(format!("{CAP_PREFIX}:notification:1.0"));
        caps.push(format!("{CAP_PREFIX}:interleave:1.0"));
    }
    if cfg.protocol.partial_lock {
        caps.push(format!("{CAP_PREFIX}:partial-lock:1.0"));
    }
    caps.push(format!(
        "{CAP_PREFIX}:with-defaults:1.0?basic-mode={}",
        cfg.datastores.with_defaults
    ));

    // Every loaded module contributes its namespace + name + revision.
    for (_, module) in schema.modules() {
        caps.push(module.capability_uri());
    }

    caps
}

/// Builds the server `<hello>` message body.
pub fn hello_message(cfg: &Config, schema: &SchemaContext, session_id: u64) -> Vec<u8> {
    let mut hello = XmlElement::new("hello");
    hello.namespace = BASE_NS.to_string();

    let mut caps = XmlElement::new("capabilities");
    for uri in capability_uris(cfg, schema) {
        let mut cap = XmlElement::new("capability");
        cap.text = uri;
        caps.children.push(cap);
    }
    hello.children.push(caps);

    let mut sid = XmlElement::new("session-id");
    sid.text = session_id.to_string();
    hello.children.push(sid);

    xml::emit_element(&hello)
}

/// Extracts the peer's capability URIs from its `<hello>`.
pub fn peer_capabilities(hello: &XmlElement) -> Vec<String> {
    hello
        .child("capabilities")
        .map(|caps| {
            caps.children
                .iter()
                .filter(|c| c.name == "capability")
                .map(|c| c.text.trim().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// True when the peer advertised base:1.1.
pub fn peer_supports_base11(peer_caps: &[String]) -> bool {
    peer_caps
        .iter()
        .any(|c| c == "urn:ietf:params:netconf:base:1.1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_profile_advertises_candidate_caps() {
        let cfg = Config::default();
        let schema = SchemaContext::new();
        let caps = capability_uris(&cfg, &schema);
        assert!(caps.iter().any(|c| c.contains(":candidate:")));
        assert!(caps.iter().any(|c| c.contains(":confirmed-commit:")));
        assert!(!caps.iter().any(|c| c.contains(":writable-running:")));
        assert!(caps.iter().any(|c| c.contains(":rollback-on-error:")));
        assert!(caps.iter().any(|c| c.contains("with-defaults")));
    }

    #[test]
    fn hello_carries_session_id() {
        let cfg = Config::default();
        let schema = SchemaContext::new();
        let bytes = hello_message(&cfg, &schema, 42);
        let parsed = xml::parse_element(&bytes).expect("hello parses");
        assert_eq!(parsed.child_text("session-id"), Some("42"));
        assert!(parsed.child("capabilities").is_some());
    }

    #[test]
    fn peer_base11_detection() {
        let hello = xml::parse_element(
            br#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
                <capabilities>
                  <capability>urn:ietf:params:netconf:base:1.1</capability>
                </capabilities></hello>"#,
        )
        .expect("parse");
        let caps = peer_capabilities(&hello);
        assert!(peer_supports_base11(&caps));
    }
}
