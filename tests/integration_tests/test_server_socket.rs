// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! End-to-end session over the real local socket.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use netconfd_rs::{
    cfg::{config::Config, enums::DatastoreFamily},
    server::{event_loop, state::ServerState},
};
use serial_test::serial;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

const EOM: &[u8] = b"]]>]]>";

fn test_cfg(sock: &str) -> Config {
    let mut cfg = Config::default();
    cfg.datastores.family = DatastoreFamily::WritableRunning;
    cfg.transport.socket_path = sock.into();
    cfg
}

/// Reads until one EOM-framed message is complete.
async fn read_msg(stream: &mut UnixStream, buf: &mut Vec<u8>) -> Result<String> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(pos) = buf.windows(EOM.len()).position(|w| w == EOM) {
            let msg = buf[..pos].to_vec();
            buf.drain(..pos + EOM.len());
            return Ok(String::from_utf8(msg).context("non-utf8 message")?);
        }
        let n = timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .context("read timed out")??;
        if n == 0 {
            bail!("peer closed");
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn send_msg(stream: &mut UnixStream, body: &str) -> Result<()> {
    stream.write_all(body.as_bytes()).await?;
    stream.write_all(EOM).await?;
    Ok(())
}

#[tokio::test]
#[serial]
async fn hello_edit_get_close_over_socket() -> Result<()> {
    let sock = format!("/tmp/netconfd-test-{}.sock", std::process::id());
    let _ = std::fs::remove_file(&sock);

    let state = ServerState::new(test_cfg(&sock))?;
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move { event_loop::run(state, server_cancel).await });

    // Wait for the socket to appear.
    for _ in 0..50 {
        if std::path::Path::new(&sock).exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut stream = UnixStream::connect(&sock).await.context("connect")?;
    let mut buf = Vec::new();

    // Server speaks first.
    let hello = read_msg(&mut stream, &mut buf).await?;
    assert!(hello.contains("<hello"));
    assert!(hello.contains("urn:ietf:params:netconf:base:1.0"));
    assert!(hello.contains("<session-id>"));

    // Stay on base:1.0 so the EOM framing holds for the whole exchange.
    send_msg(
        &mut stream,
        r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
            <capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>
           </hello>"#,
    )
    .await?;

    // No reply to hello; go straight to an edit.
    send_msg(
        &mut stream,
        r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="1">
            <edit-config><target><running/></target>
            <config><netconfd-state xmlns="urn:netconfd:system"/></config>
           </edit-config></rpc>"#,
    )
    .await?;
    let reply = read_msg(&mut stream, &mut buf).await?;
    // Editing state data is refused, which proves full dispatch ran.
    assert!(reply.contains("rpc-error"));
    assert!(reply.contains("operation-not-supported"));

    send_msg(
        &mut stream,
        r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="2">
            <get/></rpc>"#,
    )
    .await?;
    let reply = read_msg(&mut stream, &mut buf).await?;
    assert!(reply.contains("message-id=\"2\""));
    assert!(reply.contains("<netconfd-state"));
    assert!(reply.contains("<uptime>"));

    send_msg(
        &mut stream,
        r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="3">
            <close-session/></rpc>"#,
    )
    .await?;
    let reply = read_msg(&mut stream, &mut buf).await?;
    assert!(reply.contains("<ok"));

    cancel.cancel();
    let _ = timeout(Duration::from_secs(5), server).await;
    assert!(
        !std::path::Path::new(&sock).exists(),
        "socket unlinked on clean shutdown"
    );
    Ok(())
}

#[tokio::test]
#[serial]
async fn stale_socket_is_a_fatal_init_error() -> Result<()> {
    let sock = format!("/tmp/netconfd-stale-{}.sock", std::process::id());
    std::fs::write(&sock, b"")?;

    let state = ServerState::new(test_cfg(&sock))?;
    let result = event_loop::run(state, CancellationToken::new()).await;
    assert!(result.is_err(), "stale socket file must refuse startup");

    std::fs::remove_file(&sock)?;
    Ok(())
}

#[tokio::test]
#[serial]
async fn notification_arrives_after_subscribe() -> Result<()> {
    let sock = format!("/tmp/netconfd-notif-{}.sock", std::process::id());
    let _ = std::fs::remove_file(&sock);

    let state = ServerState::new(test_cfg(&sock))?;
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move { event_loop::run(state, server_cancel).await });
    for _ in 0..50 {
        if std::path::Path::new(&sock).exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Subscriber session.
    let mut sub = UnixStream::connect(&sock).await?;
    let mut sub_buf = Vec::new();
    let _ = read_msg(&mut sub, &mut sub_buf).await?;
    send_msg(
        &mut sub,
        r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
            <capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>
           </hello>"#,
    )
    .await?;
    send_msg(
        &mut sub,
        r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="1">
            <create-subscription xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"/></rpc>"#,
    )
    .await?;
    let reply = read_msg(&mut sub, &mut sub_buf).await?;
    assert!(reply.contains("<ok"), "subscription accepted: {reply}");

    // Editor session triggers a config change.
    let mut ed = UnixStream::connect(&sock).await?;
    let mut ed_buf = Vec::new();
    let _ = read_msg(&mut ed, &mut ed_buf).await?;
    send_msg(
        &mut ed,
        r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
            <capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>
           </hello>"#,
    )
    .await?;
    send_msg(
        &mut ed,
        r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="2">
            <copy-config><target><running/></target>
            <source><config><x/></config></source></copy-config></rpc>"#,
    )
    .await?;
    let reply = read_msg(&mut ed, &mut ed_buf).await?;
    assert!(reply.contains("<ok"), "copy-config accepted: {reply}");

    // The subscriber receives the sysConfigChange envelope.
    let notif = read_msg(&mut sub, &mut sub_buf).await?;
    assert!(notif.contains("<notification"), "{notif}");
    assert!(notif.contains("sysConfigChange"));

    cancel.cancel();
    let _ = timeout(Duration::from_secs(5), server).await;
    let _ = std::fs::remove_file(&sock);
    Ok(())
}
