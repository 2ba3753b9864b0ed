//! Message codec for the newline-delimited JSON-RPC 2.0 wire format.
//!
//! Every outbound message is one JSON object followed by `\n`:
//!
//! ```text
//! {"jsonrpc":"2.0","method":"tools/list","params":{},"id":3}\n
//! {"jsonrpc":"2.0","method":"notifications/initialized","params":{}}\n
//! ```
//!
//! A notification is marked by the *absence* of the `id` field, never by
//! `"id": null`. Ids are assigned by the correlator; the codec only writes
//! the value it is handed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ProtocolConfig;
use crate::{Result, ToolwireError};

/// Request identifier. Non-negative, unique within a session.
pub type RequestId = u64;

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub const METHOD_NOT_FOUND: i64 = -32601;

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }
}

impl From<RpcError> for ToolwireError {
    fn from(err: RpcError) -> Self {
        ToolwireError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Terminal field of a reply: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Result(Value),
    Error(RpcError),
}

/// A decoded reply envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: RequestId,
    pub outcome: ReplyOutcome,
}

impl Reply {
    /// Convert into the caller-facing result.
    pub fn into_result(self) -> Result<Value> {
        match self.outcome {
            ReplyOutcome::Result(value) => Ok(value),
            ReplyOutcome::Error(err) => Err(err.into()),
        }
    }
}

/// Any message the peer can send to us.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to one of our requests.
    Reply(Reply),
    /// Request initiated by the peer. The id is echoed back verbatim.
    PeerRequest {
        id: Value,
        method: String,
        params: Value,
    },
    /// Notification initiated by the peer.
    PeerNotification { method: String, params: Value },
    /// Error reply with a null or missing id; cannot be correlated.
    OrphanError(RpcError),
}

#[derive(Serialize)]
struct OutboundCall<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
}

#[derive(Serialize)]
struct OutboundReply<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RpcError>,
}

fn to_line<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

/// Encode a request envelope as one wire line.
pub fn encode_request(method: &str, params: &Value, id: RequestId) -> Result<Vec<u8>> {
    to_line(&OutboundCall {
        jsonrpc: ProtocolConfig::JSONRPC_VERSION,
        method,
        params,
        id: Some(id),
    })
}

/// Encode a notification envelope as one wire line. No `id` field is written.
pub fn encode_notification(method: &str, params: &Value) -> Result<Vec<u8>> {
    to_line(&OutboundCall {
        jsonrpc: ProtocolConfig::JSONRPC_VERSION,
        method,
        params,
        id: None,
    })
}

/// Encode a successful reply to a peer-initiated request.
pub fn encode_result_reply(id: &Value, result: &Value) -> Result<Vec<u8>> {
    to_line(&OutboundReply {
        jsonrpc: ProtocolConfig::JSONRPC_VERSION,
        id,
        result: Some(result),
        error: None,
    })
}

/// Encode an error reply to a peer-initiated request.
pub fn encode_error_reply(id: &Value, error: &RpcError) -> Result<Vec<u8>> {
    to_line(&OutboundReply {
        jsonrpc: ProtocolConfig::JSONRPC_VERSION,
        id,
        result: None,
        error: Some(error),
    })
}

/// Decode one line as a reply to one of our requests.
///
/// Fails with `MalformedMessage` if the line is not a JSON object, carries
/// the wrong protocol tag, lacks a usable `id`, or does not carry exactly one
/// of `result`/`error`.
pub fn decode_reply(line: &str) -> Result<Reply> {
    let object = parse_envelope(line)?;
    reply_from_object(object)
}

/// Decode one line into whatever the peer sent.
pub fn decode_inbound(line: &str) -> Result<Inbound> {
    let mut object = parse_envelope(line)?;

    if let Some(method) = object.remove("method") {
        let method = match method {
            Value::String(method) => method,
            other => {
                return Err(ToolwireError::malformed(format!(
                    "method must be a string, got {}",
                    other
                )))
            }
        };
        let params = object.remove("params").unwrap_or(Value::Null);
        return Ok(match object.remove("id") {
            Some(id) if !id.is_null() => Inbound::PeerRequest { id, method, params },
            _ => Inbound::PeerNotification { method, params },
        });
    }

    let id_missing = object.get("id").map_or(true, Value::is_null);
    if id_missing && !object.contains_key("result") {
        if let Some(error) = object.remove("error") {
            let error: RpcError = serde_json::from_value(error)
                .map_err(|e| ToolwireError::malformed(format!("invalid error object: {}", e)))?;
            return Ok(Inbound::OrphanError(error));
        }
    }

    reply_from_object(object).map(Inbound::Reply)
}

fn parse_envelope(line: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| ToolwireError::malformed(format!("not valid JSON: {}", e)))?;

    let Value::Object(object) = value else {
        return Err(ToolwireError::malformed("envelope is not a JSON object"));
    };

    match object.get("jsonrpc") {
        Some(Value::String(tag)) if tag == ProtocolConfig::JSONRPC_VERSION => Ok(object),
        Some(other) => Err(ToolwireError::malformed(format!(
            "unsupported jsonrpc tag {}",
            other
        ))),
        None => Err(ToolwireError::malformed("missing jsonrpc tag")),
    }
}

fn reply_from_object(mut object: Map<String, Value>) -> Result<Reply> {
    let id = match object.get("id") {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| ToolwireError::malformed(format!("id {} is not a non-negative integer", n)))?,
        Some(other) => {
            return Err(ToolwireError::malformed(format!(
                "id {} is not a non-negative integer",
                other
            )))
        }
        None => return Err(ToolwireError::malformed("reply has no id")),
    };

    let outcome = match (object.remove("result"), object.remove("error")) {
        (Some(result), None) => ReplyOutcome::Result(result),
        (None, Some(error)) => {
            let error: RpcError = serde_json::from_value(error)
                .map_err(|e| ToolwireError::malformed(format!("invalid error object: {}", e)))?;
            ReplyOutcome::Error(error)
        }
        (Some(_), Some(_)) => {
            return Err(ToolwireError::malformed(format!(
                "reply {} carries both result and error",
                id
            )))
        }
        (None, None) => {
            return Err(ToolwireError::malformed(format!(
                "reply {} carries neither result nor error",
                id
            )))
        }
    };

    Ok(Reply { id, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_line(bytes: &[u8]) -> Value {
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_encode_request_fields() {
        let line = encode_request("tools/list", &json!({"cursor": "a"}), 7).unwrap();
        let value = parse_line(&line);

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "tools/list");
        assert_eq!(value["params"], json!({"cursor": "a"}));
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn test_encode_notification_omits_id() {
        let line = encode_notification("notifications/initialized", &json!({})).unwrap();
        let value = parse_line(&line);

        assert_eq!(value["method"], "notifications/initialized");
        assert!(value.as_object().unwrap().get("id").is_none());
        assert!(!String::from_utf8(line).unwrap().contains("\"id\""));
    }

    #[test]
    fn test_decode_result_reply() {
        let reply = decode_reply(r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[]}}"#).unwrap();
        assert_eq!(reply.id, 3);
        assert_eq!(reply.outcome, ReplyOutcome::Result(json!({"tools": []})));
    }

    #[test]
    fn test_decode_error_reply() {
        let reply = decode_reply(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Invalid params"}}"#,
        )
        .unwrap();

        match reply.into_result() {
            Err(ToolwireError::Remote { code, message, .. }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "Invalid params");
            }
            other => panic!("Expected Remote, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_synthesized_reply_matches_supplied_result() {
        let supplied = json!({"content": [{"type": "text", "text": "hi"}]});
        let line = encode_result_reply(&json!(42), &supplied).unwrap();
        let reply = decode_reply(std::str::from_utf8(&line).unwrap()).unwrap();

        assert_eq!(reply.id, 42);
        assert_eq!(reply.into_result().unwrap(), supplied);
    }

    #[test]
    fn test_decode_reply_rejects_request() {
        let line = encode_request("initialize", &json!({}), 0).unwrap();
        let result = decode_reply(std::str::from_utf8(&line).unwrap());
        assert!(matches!(result, Err(ToolwireError::MalformedMessage { .. })));
    }

    #[test]
    fn test_decode_reply_rejects_malformed_shapes() {
        let cases = [
            "not json",
            "[1,2,3]",
            r#"{"id":1,"result":{}}"#,
            r#"{"jsonrpc":"1.0","id":1,"result":{}}"#,
            r#"{"jsonrpc":"2.0","result":{}}"#,
            r#"{"jsonrpc":"2.0","id":-1,"result":{}}"#,
            r#"{"jsonrpc":"2.0","id":"1","result":{}}"#,
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"x"}}"#,
            r#"{"jsonrpc":"2.0","id":1,"error":"boom"}"#,
        ];

        for case in cases {
            let result = decode_reply(case);
            assert!(
                matches!(result, Err(ToolwireError::MalformedMessage { .. })),
                "expected MalformedMessage for {case}, got {result:?}"
            );
        }
    }

    #[test]
    fn test_decode_inbound_classifies_peer_messages() {
        let ping = decode_inbound(r#"{"jsonrpc":"2.0","id":"srv-1","method":"ping"}"#).unwrap();
        assert_eq!(
            ping,
            Inbound::PeerRequest {
                id: json!("srv-1"),
                method: "ping".to_string(),
                params: Value::Null,
            }
        );

        let note = decode_inbound(
            r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}"#,
        )
        .unwrap();
        assert_eq!(
            note,
            Inbound::PeerNotification {
                method: "notifications/message".to_string(),
                params: json!({"level": "info"}),
            }
        );
    }

    #[test]
    fn test_decode_inbound_orphan_error() {
        let inbound = decode_inbound(
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#,
        )
        .unwrap();
        match inbound {
            Inbound::OrphanError(err) => assert_eq!(err.code, -32700),
            other => panic!("Expected OrphanError, got: {:?}", other),
        }
    }

    #[test]
    fn test_encode_error_reply_shape() {
        let line = encode_error_reply(&json!(5), &RpcError::method_not_found("sampling/createMessage"))
            .unwrap();
        let value = parse_line(&line);

        assert_eq!(value["id"], 5);
        assert_eq!(value["error"]["code"], -32601);
        assert!(value.get("result").is_none());
    }
}
