use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a concrete wire-serializable type across process boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(
    /// Numeric type identifier; `0` is reserved for null objects.
    pub u32,
);

impl TypeId {
    /// Sentinel written in place of an absent object.
    pub const NULL: TypeId = TypeId(0);

    /// Returns true for the null sentinel.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns true for ids in the user range.
    pub fn is_user(self) -> bool {
        self.0 >= crate::protocol::TYPEID_MIN_USER.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the remote interface a method request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceId(
    /// Numeric interface identifier.
    pub u32,
);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates a method result to its request on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReqId(
    /// Monotonic numeric request identifier.
    pub u64,
);

/// Identifies an out-of-band content stream on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(
    /// Monotonic numeric stream identifier.
    pub u64,
);

/// Identifies one transport connection for session lookup and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(
    /// Numeric connection identifier assigned by the transport.
    pub u64,
);
