//! End-to-end integration tests for Vessel.
//!
//! These tests drive real `/bin/sh` sessions through the bridge:
//! - Session lifecycle over the wire
//! - Output ordering relative to the create acknowledgement
//! - The layout engine running against a remote session manager
#![cfg(unix)]

use std::time::Duration;

use protocol::messages::{Create, Destroy, Resize, Write};
use protocol::{Envelope, FrameReader, FrameWriter, Message};
use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use vessel::bridge::{exit_notice, BridgeClient, BridgeError, BridgeServer};
use vessel::config::SessionConfig;
use vessel::layout::{ClosedPane, IdGenerator, LayoutEngine, LayoutOptions, SplitDirection};
use vessel::session::{SessionEvent, SessionManager};

const WAIT: Duration = Duration::from_secs(10);

fn test_config() -> SessionConfig {
    SessionConfig {
        default_shell: Some("/bin/sh".to_string()),
        ..SessionConfig::default()
    }
}

fn start_server() -> (DuplexStream, JoinHandle<Result<(), BridgeError>>) {
    let (ours, theirs) = duplex(256 * 1024);
    let (read, write) = split(theirs);
    let handle = tokio::spawn(BridgeServer::new(test_config()).serve(read, write));
    (ours, handle)
}

fn connect_client() -> (BridgeClient, JoinHandle<Result<(), BridgeError>>) {
    let (stream, handle) = start_server();
    let (read, write) = split(stream);
    (BridgeClient::new(read, write), handle)
}

/// Raw protocol peer, for checks that need to see every envelope.
struct RawPeer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    sequence: u64,
}

impl RawPeer {
    fn connect() -> (Self, JoinHandle<Result<(), BridgeError>>) {
        let (stream, handle) = start_server();
        let (read, write) = split(stream);
        let peer = Self {
            reader: FrameReader::new(read),
            writer: FrameWriter::new(write),
            sequence: 0,
        };
        (peer, handle)
    }

    async fn send(&mut self, message: Message) -> u64 {
        self.sequence += 1;
        self.writer
            .write_envelope(&Envelope::new(self.sequence, message))
            .await
            .unwrap();
        self.sequence
    }

    async fn recv(&mut self) -> Envelope {
        timeout(WAIT, self.reader.read_envelope())
            .await
            .expect("timed out waiting for envelope")
            .unwrap()
            .expect("server closed the stream")
    }

    /// Collects output for `id` until it contains `needle`.
    async fn output_until(&mut self, id: &str, needle: &str) -> String {
        let mut output = String::new();
        while !output.contains(needle) {
            if let Message::Data(data) = self.recv().await.payload {
                if data.session_id == id {
                    output.push_str(&String::from_utf8_lossy(&data.data));
                }
            }
        }
        output
    }
}

fn create(id: &str, cwd: Option<&str>) -> Message {
    Message::Create(Create {
        session_id: id.to_string(),
        cols: 80,
        rows: 24,
        cwd: cwd.map(str::to_owned),
    })
}

fn write(id: &str, data: &[u8]) -> Message {
    Message::Write(Write {
        session_id: id.to_string(),
        data: data.to_vec(),
    })
}

async fn output_until(rx: &mut mpsc::UnboundedReceiver<SessionEvent>, needle: &str) -> String {
    let mut output = String::new();
    timeout(WAIT, async {
        while !output.contains(needle) {
            match rx.recv().await {
                Some(SessionEvent::Data { data, .. }) => {
                    output.push_str(&String::from_utf8_lossy(&data))
                }
                Some(SessionEvent::Exit { .. }) | None => break,
            }
        }
    })
    .await
    .expect("timed out waiting for output");
    output
}

async fn exit_code(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> i32 {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(SessionEvent::Exit { exit_code, .. }) => return exit_code,
                Some(SessionEvent::Data { .. }) => continue,
                None => panic!("subscription closed without an exit"),
            }
        }
    })
    .await
    .expect("timed out waiting for exit")
}

// =============================================================================
// Raw Protocol Tests
// =============================================================================

#[tokio::test]
async fn test_created_precedes_any_output() {
    let (mut peer, _server) = RawPeer::connect();

    // Output is produced immediately by the shell's startup.
    let seq = peer.send(create("t1", None)).await;
    let seq_other = peer.send(create("t2", None)).await;

    let mut acknowledged = Vec::new();
    while acknowledged.len() < 2 {
        let envelope = peer.recv().await;
        match envelope.payload {
            Message::Created(created) => {
                let expected = if created.session_id == "t1" { seq } else { seq_other };
                assert_eq!(envelope.sequence, expected);
                acknowledged.push(created.session_id);
            }
            Message::Data(data) => assert!(
                acknowledged.contains(&data.session_id),
                "data for {} before its Created",
                data.session_id
            ),
            Message::Exit(exit) => panic!("unexpected exit for {}", exit.session_id),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_write_reaches_shell_and_echoes() {
    let (mut peer, _server) = RawPeer::connect();

    peer.send(create("t1", None)).await;
    assert!(matches!(peer.recv().await.payload, Message::Created(_)));

    peer.send(write("t1", b"echo vessel-$((40+2))\n")).await;
    let output = peer.output_until("t1", "vessel-42").await;
    assert!(output.contains("vessel-42"));
}

#[tokio::test]
async fn test_resize_visible_to_shell() {
    let (mut peer, _server) = RawPeer::connect();

    peer.send(create("t1", None)).await;
    assert!(matches!(peer.recv().await.payload, Message::Created(_)));

    peer.send(Message::Resize(Resize {
        session_id: "t1".to_string(),
        cols: 120,
        rows: 40,
    }))
    .await;
    peer.send(write("t1", b"stty size\n")).await;

    let output = peer.output_until("t1", "40 120").await;
    assert!(output.contains("40 120"));
}

#[tokio::test]
async fn test_cwd_applied_to_new_session() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().canonicalize().unwrap();
    let (mut peer, _server) = RawPeer::connect();

    peer.send(create("t1", Some(canonical.to_str().unwrap()))).await;
    assert!(matches!(peer.recv().await.payload, Message::Created(_)));

    peer.send(write("t1", b"pwd -P\n")).await;
    let needle = canonical.display().to_string();
    let output = peer.output_until("t1", &needle).await;
    assert!(output.contains(&needle));
}

#[tokio::test]
async fn test_destroy_yields_exactly_one_exit() {
    let (mut peer, _server) = RawPeer::connect();

    peer.send(create("t1", None)).await;
    assert!(matches!(peer.recv().await.payload, Message::Created(_)));

    // Destroy twice and once more for an id that never existed.
    for id in ["t1", "t1", "nonexistent-id"] {
        peer.send(Message::Destroy(Destroy {
            session_id: id.to_string(),
        }))
        .await;
    }

    loop {
        if let Message::Exit(exit) = peer.recv().await.payload {
            assert_eq!(exit.session_id, "t1");
            break;
        }
    }

    // A later request is answered with nothing queued for t1 in between.
    let seq = peer.send(create("t2", None)).await;
    loop {
        let envelope = peer.recv().await;
        match envelope.payload {
            Message::Created(created) => {
                assert_eq!(envelope.sequence, seq);
                assert_eq!(created.session_id, "t2");
                break;
            }
            Message::Exit(exit) => panic!("second exit for {}", exit.session_id),
            Message::Data(data) => assert_ne!(data.session_id, "t2"),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_session_id_reusable_after_exit() {
    let (mut peer, _server) = RawPeer::connect();

    peer.send(create("t1", None)).await;
    assert!(matches!(peer.recv().await.payload, Message::Created(_)));
    peer.send(write("t1", b"exit 0\n")).await;
    loop {
        if let Message::Exit(exit) = peer.recv().await.payload {
            assert_eq!(exit.exit_code, 0);
            break;
        }
    }

    let seq = peer.send(create("t1", None)).await;
    loop {
        let envelope = peer.recv().await;
        if envelope.sequence == seq {
            assert!(matches!(envelope.payload, Message::Created(_)));
            break;
        }
    }
}

#[tokio::test]
async fn test_no_output_after_exit() {
    let (mut peer, _server) = RawPeer::connect();

    peer.send(create("t1", None)).await;
    assert!(matches!(peer.recv().await.payload, Message::Created(_)));
    peer.send(write("t1", b"yes vessel | head -n 20000; exit 4\n"))
        .await;

    let mut saw_output = false;
    loop {
        match peer.recv().await.payload {
            Message::Data(data) if data.session_id == "t1" => saw_output = true,
            Message::Exit(exit) => {
                assert_eq!(exit.session_id, "t1");
                assert_eq!(exit.exit_code, 4);
                break;
            }
            _ => {}
        }
    }
    assert!(saw_output);

    // The exit closes the stream for t1.
    let late = timeout(Duration::from_secs(1), peer.reader.read_envelope()).await;
    if let Ok(Ok(Some(envelope))) = late {
        panic!("message after exit: {:?}", envelope.payload);
    }
}

// =============================================================================
// Client Tests
// =============================================================================

#[tokio::test]
async fn test_client_reports_exit_code() {
    let (client, _server) = connect_client();
    let mut events = client.subscribe("t1");

    client.create("t1", 80, 24, None).await.unwrap();
    client.write("t1", b"exit 3\n").await.unwrap();

    let code = exit_code(&mut events).await;
    assert_eq!(code, 3);
    assert!(exit_notice(code).contains("[Process exited with code 3]"));
}

#[tokio::test]
async fn test_client_disconnect_tears_down_server() {
    let (client, server) = connect_client();
    client.create("t1", 80, 24, None).await.unwrap();

    drop(client);
    let result = timeout(WAIT, server).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_bulk_input_through_cat() {
    let (client, _server) = connect_client();
    let mut events = client.subscribe("t1");

    client.create("t1", 80, 24, None).await.unwrap();
    client.write("t1", b"stty -echo; cat\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Several MiB of short lines, sent in 64 KiB writes.
    let line = format!("{}\n", "x".repeat(99));
    let chunk = line.repeat(64 * 1024 / line.len());
    timeout(WAIT, async {
        for _ in 0..64 {
            client.write("t1", chunk.as_bytes()).await.unwrap();
        }
        client.write("t1", b"end-of-bulk\n").await.unwrap();
    })
    .await
    .expect("writes stalled");

    // Requests are still answered while t1 echoes.
    let pid = timeout(WAIT, client.create("t2", 80, 24, None))
        .await
        .expect("create stalled behind bulk input")
        .unwrap();
    assert!(pid > 0);

    let mut tail = String::new();
    let mut received = 0usize;
    timeout(Duration::from_secs(60), async {
        while !tail.contains("end-of-bulk") {
            match events.recv().await {
                Some(SessionEvent::Data { data, .. }) => {
                    received += data.len();
                    tail.push_str(&String::from_utf8_lossy(&data));
                    if tail.len() > 64 {
                        let mut cut = tail.len() - 64;
                        while !tail.is_char_boundary(cut) {
                            cut += 1;
                        }
                        tail.drain(..cut);
                    }
                }
                other => panic!("t1 ended early: {:?}", other),
            }
        }
    })
    .await
    .expect("bulk input never came back");
    assert!(received >= 64 * chunk.len());

    client.destroy_all().await;
}

// =============================================================================
// Layout Over The Bridge
// =============================================================================

#[tokio::test]
async fn test_layout_engine_over_bridge() {
    let (client, _server) = connect_client();
    let mut first = client.subscribe("t1");
    let mut second = client.subscribe("t2");

    let mut engine =
        LayoutEngine::with_ids(client, LayoutOptions::default(), IdGenerator::sequential());

    let workspace = engine.create_workspace("main").await.unwrap();
    let ws = workspace.id().clone();
    assert_eq!(workspace.terminal_ids(), ["t1".to_string()]);

    let split = engine
        .split_pane(&ws, "t1", SplitDirection::Vertical)
        .await
        .unwrap();
    assert_eq!(split.as_deref(), Some("t2"));
    assert_eq!(engine.workspace(&ws).unwrap().leaf_count(), 2);

    // Both panes are live shells.
    engine.sessions().write("t2", b"echo right-pane\n").await.unwrap();
    let output = output_until(&mut second, "right-pane").await;
    assert!(output.contains("right-pane"));

    // Closing a pane destroys its session exactly once.
    let closed = engine.close_pane(&ws, "t1").await.unwrap();
    assert_eq!(closed, Some(ClosedPane::Removed));
    exit_code(&mut first).await;
    assert_eq!(engine.workspace(&ws).unwrap().terminal_ids(), ["t2".to_string()]);

    // Closing the last pane re-seeds the workspace.
    let mut third = engine.sessions().subscribe("t3");
    let closed = engine.close_pane(&ws, "t2").await.unwrap();
    assert_eq!(closed, Some(ClosedPane::Reseeded("t3".to_string())));
    exit_code(&mut second).await;

    let workspace = engine.workspace(&ws).unwrap();
    workspace.assert_consistent();
    assert_eq!(workspace.terminal_ids(), ["t3".to_string()]);

    engine.sessions().write("t3", b"echo reseeded\n").await.unwrap();
    assert!(output_until(&mut third, "reseeded").await.contains("reseeded"));

    engine.shutdown().await;
    exit_code(&mut third).await;
    assert!(engine.workspaces().is_empty());
}

#[tokio::test]
async fn test_workspace_cwd_inherited_by_split() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().canonicalize().unwrap();
    let cwd = canonical.to_str().unwrap().to_string();

    let (client, _server) = connect_client();
    let mut second = client.subscribe("t2");
    let mut engine =
        LayoutEngine::with_ids(client, LayoutOptions::default(), IdGenerator::sequential());

    let ws = engine
        .create_workspace_in("project", Some(cwd.clone()))
        .await
        .unwrap()
        .id()
        .clone();
    engine
        .split_pane(&ws, "t1", SplitDirection::Horizontal)
        .await
        .unwrap();

    engine.sessions().write("t2", b"pwd -P\n").await.unwrap();
    assert!(output_until(&mut second, &cwd).await.contains(&cwd));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_delete_workspace_destroys_its_sessions() {
    let (client, _server) = connect_client();
    let mut first = client.subscribe("t1");
    let mut second = client.subscribe("t2");
    let mut engine =
        LayoutEngine::with_ids(client, LayoutOptions::default(), IdGenerator::sequential());

    let ws = engine.create_workspace("doomed").await.unwrap().id().clone();
    engine
        .split_pane(&ws, "t1", SplitDirection::Vertical)
        .await
        .unwrap();
    assert!(engine.focus_workspace(&ws));

    let removed = engine.delete_workspace(&ws).await.unwrap();
    assert_eq!(removed.leaf_count(), 2);
    assert!(engine.focused().is_none());

    exit_code(&mut first).await;
    exit_code(&mut second).await;
    assert!(engine.sessions().session_ids().is_empty());
}
