//! Data model shared by the bindrpc codec, dispatcher and transport adapter.

pub mod config;
pub mod errors;
pub mod ids;
pub mod protocol;
pub mod time;

pub use config::{ConfigError, RpcConfig};
pub use errors::{ErrorCode, ExceptionDescriptor};
pub use ids::{ConnectionId, InterfaceId, ReqId, StreamId, TypeId};
pub use protocol::{MIN_PROTOCOL_VERSION, PROTOCOL_VERSION, TYPEID_MIN_USER};
pub use time::{from_epoch_ms, to_epoch_ms};
