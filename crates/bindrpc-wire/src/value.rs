//! Codecs for field values: primitives, text, dates, containers and the
//! built-in object shapes.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    hash::Hash,
    sync::Arc,
    time::SystemTime,
};

use bindrpc_core::{
    ErrorCode, ExceptionDescriptor, StreamId,
    protocol::{TYPEID_EXCEPTION, TYPEID_STREAM},
};

use crate::{CodecError, ContentStream, Input, Output, Serializable};

/// A value that can be written to and read from an archive field.
pub trait WireValue: Sized {
    /// Smallest encoding of any value of the type. Bounds container counts
    /// before allocation.
    const MIN_LEN: usize = 1;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError>;

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError>;
}

macro_rules! fixed_width {
    ($($ty:ty => $len:expr, $put:ident, $get:ident;)*) => {
        $(
            impl WireValue for $ty {
                const MIN_LEN: usize = $len;

                fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
                    out.$put(*self);
                    Ok(())
                }

                fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
                    input.$get()
                }
            }
        )*
    };
}

fixed_width! {
    bool => 1, put_bool, get_bool;
    i8 => 1, put_i8, get_i8;
    u8 => 1, put_u8, get_u8;
    i16 => 2, put_i16, get_i16;
    u16 => 2, put_u16, get_u16;
    i32 => 4, put_i32, get_i32;
    u32 => 4, put_u32, get_u32;
    i64 => 8, put_i64, get_i64;
    u64 => 8, put_u64, get_u64;
    f32 => 4, put_f32, get_f32;
    f64 => 8, put_f64, get_f64;
    char => 4, put_char, get_char;
    SystemTime => 8, put_date, get_date;
}

impl WireValue for String {
    const MIN_LEN: usize = 4;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        out.put_str(self)
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        input.get_str()
    }
}

impl<T: WireValue> WireValue for Vec<T> {
    const MIN_LEN: usize = 4;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        out.put_len(self.len())?;
        self.iter().try_for_each(|item| item.write_to(out))
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        let count = input.get_count(T::MIN_LEN)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::read_from(input)?);
        }
        Ok(items)
    }
}

impl<T: WireValue + Ord> WireValue for BTreeSet<T> {
    const MIN_LEN: usize = 4;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        out.put_len(self.len())?;
        self.iter().try_for_each(|item| item.write_to(out))
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        let count = input.get_count(T::MIN_LEN)?;
        let mut items = BTreeSet::new();
        for _ in 0..count {
            let position = input.position();
            if !items.insert(T::read_from(input)?) {
                return Err(duplicate(position, "unique set element"));
            }
        }
        Ok(items)
    }
}

impl<T: WireValue + Eq + Hash> WireValue for HashSet<T> {
    const MIN_LEN: usize = 4;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        out.put_len(self.len())?;
        self.iter().try_for_each(|item| item.write_to(out))
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        let count = input.get_count(T::MIN_LEN)?;
        let mut items = HashSet::with_capacity(count);
        for _ in 0..count {
            let position = input.position();
            if !items.insert(T::read_from(input)?) {
                return Err(duplicate(position, "unique set element"));
            }
        }
        Ok(items)
    }
}

impl<K: WireValue + Ord, V: WireValue> WireValue for BTreeMap<K, V> {
    const MIN_LEN: usize = 4;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        out.put_len(self.len())?;
        for (key, value) in self {
            key.write_to(out)?;
            value.write_to(out)?;
        }
        Ok(())
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        let count = input.get_count(K::MIN_LEN + V::MIN_LEN)?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let position = input.position();
            let key = K::read_from(input)?;
            let value = V::read_from(input)?;
            if map.insert(key, value).is_some() {
                return Err(duplicate(position, "unique map key"));
            }
        }
        Ok(map)
    }
}

impl<K: WireValue + Eq + Hash, V: WireValue> WireValue for HashMap<K, V> {
    const MIN_LEN: usize = 4;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        out.put_len(self.len())?;
        for (key, value) in self {
            key.write_to(out)?;
            value.write_to(out)?;
        }
        Ok(())
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        let count = input.get_count(K::MIN_LEN + V::MIN_LEN)?;
        let mut map = HashMap::with_capacity(count);
        for _ in 0..count {
            let position = input.position();
            let key = K::read_from(input)?;
            let value = V::read_from(input)?;
            if map.insert(key, value).is_some() {
                return Err(duplicate(position, "unique map key"));
            }
        }
        Ok(map)
    }
}

fn duplicate(position: usize, expected: &'static str) -> CodecError {
    CodecError::InvalidValue {
        position,
        expected,
        actual: "repeated entry".to_owned(),
    }
}

/// Polymorphic object slot; `None` travels as the null TypeId.
impl WireValue for Option<Box<dyn Serializable>> {
    const MIN_LEN: usize = 4;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        out.write_object(self.as_deref())
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        input.read_object()
    }
}

/// Shared object slot; repeated occurrences of one `Arc` in an archive
/// travel as back-references.
impl WireValue for Option<Arc<dyn Serializable>> {
    const MIN_LEN: usize = 4;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        out.write_shared(self.as_ref())
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        input.read_shared()
    }
}

/// `[EXCEPTION][code][message][has_detail][detail?][has_cause][cause?]`
impl WireValue for ExceptionDescriptor {
    const MIN_LEN: usize = 14;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        out.enter()?;
        let result = write_exception(self, out);
        out.leave();
        result
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        input.enter()?;
        let result = read_exception(input);
        input.leave();
        result
    }
}

fn write_exception(exc: &ExceptionDescriptor, out: &mut Output) -> Result<(), CodecError> {
    out.put_type_id(TYPEID_EXCEPTION);
    out.put_i32(exc.code.as_i32());
    out.put_str(&exc.message)?;
    out.put_bool(exc.detail.is_some());
    if let Some(detail) = &exc.detail {
        out.put_str(detail)?;
    }
    out.put_bool(exc.cause.is_some());
    if let Some(cause) = &exc.cause {
        cause.write_to(out)?;
    }
    Ok(())
}

fn read_exception(input: &mut Input<'_>) -> Result<ExceptionDescriptor, CodecError> {
    expect_builtin(input, TYPEID_EXCEPTION, "exception")?;
    let code = ErrorCode::from(input.get_i32()?);
    let message = input.get_str()?;
    let detail = if input.get_bool()? {
        Some(input.get_str()?)
    } else {
        None
    };
    let cause = if input.get_bool()? {
        Some(Box::new(ExceptionDescriptor::read_from(input)?))
    } else {
        None
    };
    Ok(ExceptionDescriptor {
        code,
        message,
        detail,
        cause,
    })
}

/// `[STREAM][stream_id][content_type][content_length or -1]`
impl WireValue for ContentStream {
    const MIN_LEN: usize = 24;

    fn write_to(&self, out: &mut Output) -> Result<(), CodecError> {
        let body = self.take_body()?;
        let stream_id = out.attach_stream(body);
        out.put_type_id(TYPEID_STREAM);
        out.put_u64(stream_id.0);
        out.put_str(self.content_type())?;
        match self.content_length() {
            Some(len) => {
                let len = i64::try_from(len).map_err(|_| CodecError::LengthOverflow {
                    len: usize::MAX,
                })?;
                out.put_i64(len);
            }
            None => out.put_i64(-1),
        }
        Ok(())
    }

    fn read_from(input: &mut Input<'_>) -> Result<Self, CodecError> {
        expect_builtin(input, TYPEID_STREAM, "content stream")?;
        let stream_id = StreamId(input.get_u64()?);
        let content_type = input.get_str()?;
        let position = input.position();
        let content_length = match input.get_i64()? {
            -1 => None,
            len => Some(u64::try_from(len).map_err(|_| CodecError::InvalidValue {
                position,
                expected: "content length",
                actual: len.to_string(),
            })?),
        };
        let body = input.open_stream(stream_id);
        if body.is_none() {
            tracing::debug!(stream_id = stream_id.0, "content stream has no transport body");
        }
        Ok(ContentStream::received(
            stream_id,
            content_type,
            content_length,
            body,
        ))
    }
}

fn expect_builtin(
    input: &mut Input<'_>,
    expected_id: bindrpc_core::TypeId,
    expected: &str,
) -> Result<(), CodecError> {
    let position = input.position();
    let actual = input.get_type_id()?;
    if actual != expected_id {
        return Err(CodecError::TypeMismatch {
            position,
            expected: expected.to_owned(),
            actual,
        });
    }
    Ok(())
}
