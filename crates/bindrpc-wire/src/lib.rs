//! Type registry and binary wire codec.
//!
//! Every archive starts with the sender's protocol version as a little
//! endian `u64`. Objects are written as `[TypeId][fields]` and rebuilt on the
//! receiving side through a frozen [`TypeRegistry`].

pub mod containers;
pub mod error;
pub mod input;
pub mod object;
pub mod output;
pub mod registry;
pub mod stream;
pub mod value;

pub use containers::{ListOf, MapOf, SetOf};
pub use error::{CodecError, RegistryError};
pub use input::Input;
pub use object::{AsAny, Registered, Serializable};
pub use output::{DEFAULT_MAX_DEPTH, Encoded, Output};
pub use registry::{Factory, RegistryBuilder, TypeRegistry};
pub use stream::{ContentStream, OutgoingStream, StreamBody, StreamResolver};
pub use value::WireValue;
