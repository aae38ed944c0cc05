//! Wire-level constants shared by every peer.

use crate::TypeId;

/// Wire protocol version written by current binaries.
pub const PROTOCOL_VERSION: u64 = 2;

/// Oldest protocol version a peer may still send.
pub const MIN_PROTOCOL_VERSION: u64 = 1;

pub const TYPEID_NULL: TypeId = TypeId(0);
pub const TYPEID_BOOL: TypeId = TypeId(1);
pub const TYPEID_INT8: TypeId = TypeId(2);
pub const TYPEID_INT16: TypeId = TypeId(3);
pub const TYPEID_CHAR: TypeId = TypeId(4);
pub const TYPEID_INT32: TypeId = TypeId(5);
pub const TYPEID_INT64: TypeId = TypeId(6);
pub const TYPEID_FLOAT: TypeId = TypeId(7);
pub const TYPEID_DOUBLE: TypeId = TypeId(8);
pub const TYPEID_BYTES: TypeId = TypeId(9);
pub const TYPEID_STRING: TypeId = TypeId(10);
/// Back-reference to a shared object written earlier in the same archive.
pub const TYPEID_REF: TypeId = TypeId(11);
pub const TYPEID_LIST: TypeId = TypeId(12);
pub const TYPEID_MAP: TypeId = TypeId(13);
pub const TYPEID_SET: TypeId = TypeId(14);
pub const TYPEID_STREAM: TypeId = TypeId(15);
pub const TYPEID_DATE: TypeId = TypeId(17);
pub const TYPEID_VOID: TypeId = TypeId(19);
pub const TYPEID_EXCEPTION: TypeId = TypeId(20);

/// First id available to registered user types.
pub const TYPEID_MIN_USER: TypeId = TypeId(64);

/// Returns true when the id names a built-in scalar result shape.
pub fn is_primitive_shape(type_id: TypeId) -> bool {
    matches!(
        type_id,
        TYPEID_BOOL
            | TYPEID_INT8
            | TYPEID_INT16
            | TYPEID_CHAR
            | TYPEID_INT32
            | TYPEID_INT64
            | TYPEID_FLOAT
            | TYPEID_DOUBLE
            | TYPEID_BYTES
            | TYPEID_STRING
            | TYPEID_DATE
    )
}

/// Negotiates the version both peers understand.
pub fn negotiate_version(local: u64, remote: u64) -> u64 {
    local.min(remote).max(MIN_PROTOCOL_VERSION)
}
