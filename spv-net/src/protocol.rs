//! Newline-delimited JSON-RPC 2.0 framing and Electrum message types

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Electrum protocol method names
pub mod methods {
    /// Version handshake
    pub const SERVER_VERSION: &str = "server.version";
    /// Keep-alive
    pub const SERVER_PING: &str = "server.ping";
    /// Current tip, then a notification per new tip
    pub const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
    /// Concatenated raw headers
    pub const BLOCK_HEADERS: &str = "blockchain.block.headers";
    /// Confirmed and mempool history of a script hash
    pub const GET_HISTORY: &str = "blockchain.scripthash.get_history";
    /// Status hash of a script hash, then a notification per change
    pub const SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";
    /// Raw transaction
    pub const GET_TRANSACTION: &str = "blockchain.transaction.get";
    /// Merkle branch of a confirmed transaction
    pub const GET_MERKLE: &str = "blockchain.transaction.get_merkle";
    /// Relay a raw transaction
    pub const BROADCAST: &str = "blockchain.transaction.broadcast";
}

/// Error object from a JSON-RPC response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Error::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

/// Message received from a server
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to a request
    Response {
        /// Request id
        id: u64,
        /// Result or error
        result: std::result::Result<Value, RpcError>,
    },
    /// Unsolicited subscription update
    Notification {
        /// Subscription method
        method: String,
        /// Notification parameters
        params: Vec<Value>,
    },
}

/// Encode a request as one line, newline included
pub fn encode_request(id: u64, method: &str, params: &[Value]) -> Result<String> {
    let mut line = serde_json::to_string(&json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    }))?;
    line.push('\n');
    Ok(line)
}

/// Parse one line from a server
pub fn parse_line(line: &str) -> Result<Incoming> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(mut object) = value else {
        return Err(Error::Protocol("message is not an object".to_string()));
    };

    if let Some(Value::String(method)) = object.remove("method") {
        if object.get("id").map_or(true, Value::is_null) {
            let params = match object.remove("params") {
                Some(Value::Array(params)) => params,
                Some(Value::Null) | None => Vec::new(),
                Some(other) => vec![other],
            };
            return Ok(Incoming::Notification { method, params });
        }
        return Err(Error::Protocol(format!("server sent request {method}")));
    }

    let id = object
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Protocol("response without numeric id".to_string()))?;

    let result = match object.remove("error") {
        Some(Value::Null) | None => Ok(object
            .remove("result")
            .ok_or_else(|| Error::Protocol(format!("response {id} has no result")))?),
        Some(error) => Err(rpc_error(error)),
    };
    Ok(Incoming::Response { id, result })
}

fn rpc_error(error: Value) -> RpcError {
    match error {
        Value::Object(map) => {
            let code = map.get("code").and_then(Value::as_i64).unwrap_or(-1);
            let message = message_of(&map);
            RpcError { code, message }
        }
        Value::String(message) => RpcError { code: -1, message },
        other => RpcError {
            code: -1,
            message: other.to_string(),
        },
    }
}

fn message_of(map: &Map<String, Value>) -> String {
    map.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Value::Object(map.clone()).to_string())
}

/// `blockchain.headers.subscribe` result and notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderNotification {
    /// Tip height
    pub height: u32,
    /// Raw tip header, hex
    pub hex: String,
}

/// `blockchain.block.headers` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaders {
    /// Number of headers returned
    pub count: u32,
    /// Concatenated raw headers, hex
    pub hex: String,
    /// Most headers the server returns per call
    #[serde(default)]
    pub max: Option<u32>,
}

/// Entry of `blockchain.scripthash.get_history`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Transaction id, display order hex
    pub tx_hash: String,
    /// Confirmation height; 0 or -1 for mempool transactions
    pub height: i64,
    /// Fee, reported for mempool entries
    #[serde(default)]
    pub fee: Option<u64>,
}

impl HistoryEntry {
    /// Whether the transaction is reported as mined
    pub fn is_confirmed(&self) -> bool {
        self.height > 0
    }
}

/// `blockchain.transaction.get_merkle` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleResponse {
    /// Height of the containing block
    pub block_height: u32,
    /// Sibling hashes, leaf level first, display order hex
    pub merkle: Vec<String>,
    /// Index of the transaction in the block
    pub pos: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request() {
        let line = encode_request(7, methods::GET_HISTORY, &[json!("ab")]).unwrap();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "blockchain.scripthash.get_history");
        assert_eq!(value["params"][0], "ab");
    }

    #[test]
    fn test_parse_response_with_null_result() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        assert_eq!(
            msg,
            Incoming::Response {
                id: 3,
                result: Ok(Value::Null)
            }
        );
    }

    #[test]
    fn test_parse_error_forms() {
        let msg = parse_line(r#"{"id":1,"error":{"code":2,"message":"bad tx"}}"#).unwrap();
        assert_eq!(
            msg,
            Incoming::Response {
                id: 1,
                result: Err(RpcError {
                    code: 2,
                    message: "bad tx".to_string()
                })
            }
        );

        let msg = parse_line(r#"{"id":1,"error":"nope"}"#).unwrap();
        assert!(matches!(msg, Incoming::Response { result: Err(RpcError { code: -1, .. }), .. }));
    }

    #[test]
    fn test_parse_notification() {
        let msg = parse_line(
            r#"{"jsonrpc":"2.0","method":"blockchain.scripthash.subscribe","params":["aa","bb"]}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Incoming::Notification {
                method: methods::SCRIPTHASH_SUBSCRIBE.to_string(),
                params: vec![json!("aa"), json!("bb")]
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_line("not json").is_err());
        assert!(parse_line("[1,2]").is_err());
        assert!(parse_line(r#"{"result":1}"#).is_err());
    }

    #[test]
    fn test_history_entry() {
        let entry: HistoryEntry =
            serde_json::from_str(r#"{"tx_hash":"00","height":0,"fee":200}"#).unwrap();
        assert!(!entry.is_confirmed());
        assert_eq!(entry.fee, Some(200));
    }
}
