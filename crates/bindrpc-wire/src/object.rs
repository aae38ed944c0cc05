//! Polymorphic wire objects.

use std::{any::Any, fmt};

use bindrpc_core::TypeId;

use crate::{CodecError, Input, Output};

/// Upcasting helpers implemented for every sized `'static + Send` type.
///
/// Call these through `&dyn Serializable`, never through `&Box<dyn Serializable>`;
/// the box itself also implements `AsAny`.
pub trait AsAny: Any + Send {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
    /// Rust type name of the concrete value, for diagnostics.
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A concrete type whose fields travel behind a stable [`TypeId`].
///
/// `write` and `read` handle only the fields; the type id is written and
/// consumed by the archive. Both receive the archive's version and must agree
/// on field order for every version.
pub trait Serializable: AsAny + Sync + fmt::Debug {
    /// Stable wire identifier of the concrete type.
    fn wire_type_id(&self) -> TypeId;

    fn write(&self, out: &mut Output) -> Result<(), CodecError>;

    /// Fills an empty instance produced by the registry factory.
    fn read(&mut self, input: &mut Input<'_>) -> Result<(), CodecError>;
}

/// A serializable type that can be registered by type.
pub trait Registered: Serializable + Default {
    const TYPE_ID: TypeId;
}

impl dyn Serializable {
    pub fn is<T: Serializable>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Serializable>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Consumes the object and recovers the concrete type.
    pub fn downcast<T: Serializable>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}
