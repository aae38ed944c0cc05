//! Method request and method result envelopes.
//!
//! Request body: `[TypeId][InterfaceId][fields]`.
//! Result body: `[declared TypeId][has_exception][exception | payload]`.

use std::time::SystemTime;

use async_trait::async_trait;
use bindrpc_core::{
    ExceptionDescriptor, InterfaceId, TypeId,
    protocol::{
        TYPEID_BOOL, TYPEID_BYTES, TYPEID_CHAR, TYPEID_DATE, TYPEID_DOUBLE, TYPEID_FLOAT,
        TYPEID_INT8, TYPEID_INT16, TYPEID_INT32, TYPEID_INT64, TYPEID_NULL, TYPEID_STREAM,
        TYPEID_STRING, TYPEID_VOID, is_primitive_shape,
    },
};
use bindrpc_wire::{CodecError, ContentStream, Input, Output, Serializable, WireValue};

use crate::{Completion, Remote, SessionField, completion::Outcome};

/// A decoded call, executed at most once against its bound service.
///
/// A request with a session field writes it in its declared field position.
/// On the serving side the decoded placeholder is dropped and the field is
/// filled by injection before `execute` runs.
#[async_trait]
pub trait MethodRequest: Serializable {
    fn interface_id(&self) -> InterfaceId;

    /// Declared shape of the method's result.
    fn result_type_id(&self) -> TypeId;

    fn session_slot(&mut self) -> Option<&mut SessionField> {
        None
    }

    /// True when the method cannot run without a session.
    fn session_required(&self) -> bool {
        false
    }

    /// Runs the method against `remote`. The outcome goes through
    /// `completion`, now or later from any task.
    async fn execute(self: Box<Self>, remote: Remote, completion: Completion<Value>);
}

impl dyn MethodRequest {
    pub fn is<T: MethodRequest>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: MethodRequest>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Payload of a successful result.
#[derive(Debug)]
pub enum Value {
    Void,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Char(char),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    Date(SystemTime),
    Stream(ContentStream),
    Object(Option<Box<dyn Serializable>>),
}

impl Value {
    pub fn object(obj: impl Serializable) -> Self {
        Value::Object(Some(Box::new(obj)))
    }

    pub fn null() -> Self {
        Value::Object(None)
    }

    /// Built-in shape of the value; `None` for objects.
    pub fn builtin_type_id(&self) -> Option<TypeId> {
        let id = match self {
            Value::Void => TYPEID_VOID,
            Value::Bool(_) => TYPEID_BOOL,
            Value::Int8(_) => TYPEID_INT8,
            Value::Int16(_) => TYPEID_INT16,
            Value::Char(_) => TYPEID_CHAR,
            Value::Int32(_) => TYPEID_INT32,
            Value::Int64(_) => TYPEID_INT64,
            Value::Float(_) => TYPEID_FLOAT,
            Value::Double(_) => TYPEID_DOUBLE,
            Value::Bytes(_) => TYPEID_BYTES,
            Value::String(_) => TYPEID_STRING,
            Value::Date(_) => TYPEID_DATE,
            Value::Stream(_) => TYPEID_STREAM,
            Value::Object(_) => return None,
        };
        Some(id)
    }

    /// Whether the value can be sent as a result declared as `declared`.
    pub fn matches_shape(&self, declared: TypeId) -> bool {
        match self.builtin_type_id() {
            Some(id) => id == declared,
            None => {
                declared != TYPEID_NULL
                    && declared != TYPEID_VOID
                    && declared != TYPEID_STREAM
                    && !is_primitive_shape(declared)
            }
        }
    }

    /// Takes a non-null object of concrete type `T`.
    pub fn into_object<T: Serializable>(self) -> Option<T> {
        match self {
            Value::Object(Some(obj)) => obj.downcast::<T>().map(|boxed| *boxed),
            _ => None,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    char => Char,
    i32 => Int32,
    i64 => Int64,
    f32 => Float,
    f64 => Double,
    Vec<u8> => Bytes,
    String => String,
    SystemTime => Date,
    ContentStream => Stream,
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Void
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

/// Outcome of one method call, immutable once built.
#[derive(Debug)]
pub struct MethodResult {
    type_id: TypeId,
    outcome: Outcome<Value>,
}

impl MethodResult {
    /// Successful result. A value that does not fit the declared shape
    /// becomes an internal exception.
    pub fn ok(type_id: TypeId, value: Value) -> Self {
        Self::from_outcome(type_id, Ok(value))
    }

    pub fn exception(type_id: TypeId, exception: ExceptionDescriptor) -> Self {
        Self {
            type_id,
            outcome: Err(exception),
        }
    }

    pub fn from_outcome(type_id: TypeId, outcome: Outcome<Value>) -> Self {
        match outcome {
            Ok(value) if !value.matches_shape(type_id) => Self::exception(
                type_id,
                ExceptionDescriptor::internal("result does not match declared shape")
                    .with_detail(format!("declared={type_id} value={value:?}")),
            ),
            outcome => Self { type_id, outcome },
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn outcome(&self) -> &Outcome<Value> {
        &self.outcome
    }

    pub fn into_outcome(self) -> Outcome<Value> {
        self.outcome
    }

    pub fn is_exception(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn exception_ref(&self) -> Option<&ExceptionDescriptor> {
        self.outcome.as_ref().err()
    }

    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }
}

pub fn write_request(out: &mut Output, request: &dyn MethodRequest) -> Result<(), CodecError> {
    out.put_type_id(request.wire_type_id());
    out.put_interface_id(request.interface_id());
    out.write_fields(request)
}

pub fn write_result(out: &mut Output, result: &MethodResult) -> Result<(), CodecError> {
    out.put_type_id(result.type_id);
    match &result.outcome {
        Err(exception) => {
            out.put_bool(true);
            exception.write_to(out)
        }
        Ok(value) => {
            out.put_bool(false);
            write_value(out, result.type_id, value)
        }
    }
}

fn write_value(out: &mut Output, declared: TypeId, value: &Value) -> Result<(), CodecError> {
    if !value.matches_shape(declared) {
        return Err(CodecError::TypeMismatch {
            position: out.len(),
            expected: format!("result shape {declared}"),
            actual: value.builtin_type_id().unwrap_or(TYPEID_NULL),
        });
    }
    match value {
        Value::Void => Ok(()),
        Value::Bool(v) => v.write_to(out),
        Value::Int8(v) => v.write_to(out),
        Value::Int16(v) => v.write_to(out),
        Value::Char(v) => v.write_to(out),
        Value::Int32(v) => v.write_to(out),
        Value::Int64(v) => v.write_to(out),
        Value::Float(v) => v.write_to(out),
        Value::Double(v) => v.write_to(out),
        Value::Bytes(v) => out.put_bytes(v),
        Value::String(v) => out.put_str(v),
        Value::Date(v) => v.write_to(out),
        Value::Stream(v) => v.write_to(out),
        Value::Object(v) => v.write_to(out),
    }
}

pub fn read_result(input: &mut Input<'_>) -> Result<MethodResult, CodecError> {
    let type_id = input.get_type_id()?;
    let outcome = if input.get_bool()? {
        Err(ExceptionDescriptor::read_from(input)?)
    } else {
        Ok(read_value(input, type_id)?)
    };
    Ok(MethodResult { type_id, outcome })
}

fn read_value(input: &mut Input<'_>, declared: TypeId) -> Result<Value, CodecError> {
    let value = match declared {
        TYPEID_VOID => Value::Void,
        TYPEID_BOOL => Value::Bool(input.get_bool()?),
        TYPEID_INT8 => Value::Int8(input.get_i8()?),
        TYPEID_INT16 => Value::Int16(input.get_i16()?),
        TYPEID_CHAR => Value::Char(input.get_char()?),
        TYPEID_INT32 => Value::Int32(input.get_i32()?),
        TYPEID_INT64 => Value::Int64(input.get_i64()?),
        TYPEID_FLOAT => Value::Float(input.get_f32()?),
        TYPEID_DOUBLE => Value::Double(input.get_f64()?),
        TYPEID_BYTES => Value::Bytes(input.get_bytes()?),
        TYPEID_STRING => Value::String(input.get_str()?),
        TYPEID_DATE => Value::Date(input.get_date()?),
        TYPEID_STREAM => Value::Stream(ContentStream::read_from(input)?),
        _ => Value::Object(input.read_object()?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_match_declared_ids() {
        assert!(Value::Void.matches_shape(TYPEID_VOID));
        assert!(Value::from("x").matches_shape(TYPEID_STRING));
        assert!(!Value::from(1i32).matches_shape(TYPEID_INT64));
        assert!(Value::null().matches_shape(TypeId(2000)));
        assert!(!Value::null().matches_shape(TYPEID_VOID));
        assert!(!Value::Void.matches_shape(TypeId(2000)));
    }

    #[test]
    fn mismatched_value_becomes_internal_exception() {
        let result = MethodResult::ok(TYPEID_INT32, Value::from("nope"));
        let exc = result.exception_ref().expect("mismatch should be an exception");
        assert_eq!(exc.code, bindrpc_core::ErrorCode::Internal);
        assert_eq!(result.type_id(), TYPEID_INT32);
        assert!(result.value().is_none());
    }
}
