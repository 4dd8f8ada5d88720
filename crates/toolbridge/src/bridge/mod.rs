//! Line protocol between the bridge and its worker subprocess.
//!
//! # Architecture
//!
//! - **protocol**: JSON-RPC message types (RpcRequest/RpcResponse, tool catalog)
//! - **codec**: newline-delimited JSON framing for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
