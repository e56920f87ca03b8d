//! JSON-RPC 2.0 message shapes. One message per line on stdio.

use serde::{Deserialize, Serialize};

// JSON-RPC 2.0 error codes
pub const INTERNAL_ERROR: i32 = -32603;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const ENGINE_ERROR: i32 = -32000;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: serde_json::Value,
}

/// Either `result` or `error` is set, never both.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
	pub jsonrpc: &'static str,
	pub id: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
	pub fn ok(id: u64, result: serde_json::Value) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION,
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn err(id: u64, error: JsonRpcError) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION,
			id,
			result: None,
			error: Some(error),
		}
	}
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
	pub code: i32,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<serde_json::Value>,
}

/// Server-initiated message; carries no id and expects no reply.
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
	pub jsonrpc: &'static str,
	pub method: &'a str,
	pub params: serde_json::Value,
}
