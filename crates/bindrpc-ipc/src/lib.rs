//! Framed transport adapter for bindrpc over any async byte stream.

mod error;

pub mod client;
pub mod framing;
pub mod server;
pub mod stream;

pub use client::RpcClient;
pub use error::IpcError;
pub use server::serve_connection;
