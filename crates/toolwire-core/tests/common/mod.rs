//! Scripted fake peer for driving sessions over in-memory pipes.

#![allow(dead_code)]

use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, DuplexStream};
use toolwire::rpc::LineReader;

const PIPE_CAPACITY: usize = 256 * 1024;

/// Client-side ends of the pipes.
pub struct ClientEnds {
    pub reader: DuplexStream,
    pub writer: DuplexStream,
}

/// Peer-side ends of the pipes, with helpers to read requests and answer them.
pub struct FakePeer {
    lines: LineReader<DuplexStream>,
    out: Option<DuplexStream>,
}

pub fn connect() -> (ClientEnds, FakePeer) {
    let (client_writer, peer_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let (peer_writer, client_reader) = tokio::io::duplex(PIPE_CAPACITY);
    (
        ClientEnds {
            reader: client_reader,
            writer: client_writer,
        },
        FakePeer {
            lines: LineReader::new(peer_reader, 1024 * 1024),
            out: Some(peer_writer),
        },
    )
}

impl FakePeer {
    /// Next message the client sent, or `None` once it closed its side.
    pub async fn try_recv(&mut self) -> Option<Value> {
        let line = self.lines.next_line().await.expect("client sent unreadable line")?;
        Some(serde_json::from_str(&line).expect("client sent invalid JSON"))
    }

    pub async fn recv(&mut self) -> Value {
        self.try_recv().await.expect("client closed its output")
    }

    /// Receive a request and assert its method.
    pub async fn expect_request(&mut self, method: &str) -> Value {
        let request = self.recv().await;
        assert_eq!(request["method"], method, "unexpected message: {request}");
        assert!(request.get("id").is_some(), "expected a request: {request}");
        request
    }

    /// Receive a notification and assert its method.
    pub async fn expect_notification(&mut self, method: &str) -> Value {
        let note = self.recv().await;
        assert_eq!(note["method"], method, "unexpected message: {note}");
        assert!(note.get("id").is_none(), "expected a notification: {note}");
        note
    }

    pub async fn send_raw(&mut self, line: &str) {
        let out = self.out.as_mut().expect("peer output already closed");
        out.write_all(line.as_bytes()).await.unwrap();
        out.write_all(b"\n").await.unwrap();
    }

    pub async fn send(&mut self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    pub async fn reply(&mut self, id: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await;
    }

    pub async fn reply_error(&mut self, id: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        }))
        .await;
    }

    /// Simulate the peer going away.
    pub fn close_output(&mut self) {
        self.out = None;
    }

    /// Answer `initialize` with the given capabilities and acknowledge the
    /// `notifications/initialized` that follows.
    pub async fn handshake(&mut self, capabilities: Value) {
        let init = self.expect_request("initialize").await;
        self.reply(
            &init["id"],
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": capabilities,
                "serverInfo": {"name": "fake-peer", "version": "9.9.9"}
            }),
        )
        .await;
        self.expect_notification("notifications/initialized").await;
    }
}
