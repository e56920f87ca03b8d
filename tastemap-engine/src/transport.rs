// ---------------------------------------------------------------------------
// NDJSON transport
// ---------------------------------------------------------------------------
//
// Writes JSON-RPC messages to a sink, one per line. The binary uses stdout;
// tests hand in a `Vec<u8>`. Each message is serialized in full before it
// is written so a line is never interleaved with another.
// ---------------------------------------------------------------------------

use std::io::{self, Write};

use serde::Serialize;

use crate::protocol::{JsonRpcError, JsonRpcNotification, JsonRpcResponse, JSONRPC_VERSION};

pub struct NdjsonTransport<W: Write = io::Stdout> {
	out: W,
}

impl NdjsonTransport<io::Stdout> {
	pub fn new() -> Self {
		Self { out: io::stdout() }
	}
}

impl Default for NdjsonTransport<io::Stdout> {
	fn default() -> Self {
		Self::new()
	}
}

impl<W: Write> NdjsonTransport<W> {
	pub fn with_writer(out: W) -> Self {
		Self { out }
	}

	pub fn writer(&self) -> &W {
		&self.out
	}

	pub fn write_response(&mut self, id: u64, result: serde_json::Value) {
		self.write_line(&JsonRpcResponse::ok(id, result));
	}

	pub fn write_error(
		&mut self,
		id: u64,
		code: i32,
		message: impl Into<String>,
		data: Option<serde_json::Value>,
	) {
		let error = JsonRpcError {
			code,
			message: message.into(),
			data,
		};
		self.write_line(&JsonRpcResponse::err(id, error));
	}

	pub fn write_notification(&mut self, method: &str, params: serde_json::Value) {
		self.write_line(&JsonRpcNotification {
			jsonrpc: JSONRPC_VERSION,
			method,
			params,
		});
	}

	fn write_line(&mut self, message: &impl Serialize) {
		let mut line = match serde_json::to_vec(message) {
			Ok(bytes) => bytes,
			Err(e) => {
				tracing::error!("Failed to serialize: {}", e);
				return;
			}
		};
		line.push(b'\n');
		if let Err(e) = self.out.write_all(&line).and_then(|()| self.out.flush()) {
			tracing::error!("Failed to write message: {}", e);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn lines(transport: &NdjsonTransport<Vec<u8>>) -> Vec<serde_json::Value> {
		String::from_utf8_lossy(transport.writer())
			.lines()
			.map(|l| serde_json::from_str(l).unwrap())
			.collect()
	}

	#[test]
	fn one_message_per_line() {
		let mut transport = NdjsonTransport::with_writer(Vec::new());
		transport.write_response(1, serde_json::json!({ "ok": true }));
		transport.write_notification("recommender/fitted", serde_json::json!({ "algorithm": "svd" }));
		transport.write_error(2, -32601, "Unknown method: x", None);

		let out = lines(&transport);
		assert_eq!(out.len(), 3);
		assert_eq!(out[0]["jsonrpc"], "2.0");
		assert_eq!(out[0]["result"]["ok"], true);
		assert!(out[0].get("error").is_none());
		assert!(out[1].get("id").is_none());
		assert_eq!(out[1]["method"], "recommender/fitted");
		assert_eq!(out[2]["error"]["code"], -32601);
		assert!(out[2]["error"].get("data").is_none());
		assert!(out[2].get("result").is_none());
	}
}
