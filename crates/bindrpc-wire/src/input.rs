use std::{sync::Arc, time::SystemTime};

use bindrpc_core::{InterfaceId, StreamId, TypeId, from_epoch_ms, protocol::TYPEID_REF};

use crate::{
    CodecError, DEFAULT_MAX_DEPTH, Serializable, StreamBody, StreamResolver, TypeRegistry,
    WireValue,
};

/// Read side of an archive.
///
/// Every getter fails with a positioned [`CodecError`] instead of producing a
/// default value.
pub struct Input<'a> {
    bytes: &'a [u8],
    pos: usize,
    version: u64,
    registry: &'a TypeRegistry,
    depth: usize,
    max_depth: usize,
    streams: Option<Arc<dyn StreamResolver>>,
    /// Shared objects in the order they were read; `None` while one is
    /// still being filled.
    shared: Vec<Option<Arc<dyn Serializable>>>,
}

impl<'a> Input<'a> {
    /// Opens an archive and reads the sender's version header.
    pub fn new(bytes: &'a [u8], registry: &'a TypeRegistry) -> Result<Self, CodecError> {
        let mut input = Self {
            bytes,
            pos: 0,
            version: 0,
            registry,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            streams: None,
            shared: Vec::new(),
        };
        input.version = input.get_u64()?;
        Ok(input)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_streams(mut self, resolver: Arc<dyn StreamResolver>) -> Self {
        self.streams = Some(resolver);
        self
    }

    /// Protocol version of the sender.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.registry
    }

    fn take(&mut self, n: usize, expected: &'static str) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                position: self.pos,
                expected,
                remaining: self.remaining(),
            });
        }
        let bytes = self.bytes;
        let slice = &bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, expected: &'static str) -> Result<[u8; N], CodecError> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N, expected)?);
        Ok(arr)
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take_array::<1>("u8")?[0])
    }

    pub fn get_i8(&mut self) -> Result<i8, CodecError> {
        Ok(i8::from_le_bytes(self.take_array("i8")?))
    }

    pub fn get_bool(&mut self) -> Result<bool, CodecError> {
        let position = self.pos;
        match self.take_array::<1>("bool")?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidValue {
                position,
                expected: "bool",
                actual: format!("byte {other:#04x}"),
            }),
        }
    }

    pub fn get_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_le_bytes(self.take_array("i16")?))
    }

    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take_array("u16")?))
    }

    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array("i32")?))
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array("u32")?))
    }

    pub fn get_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array("i64")?))
    }

    pub fn get_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take_array("u64")?))
    }

    pub fn get_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(u32::from_le_bytes(self.take_array("f32")?)))
    }

    pub fn get_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(u64::from_le_bytes(self.take_array("f64")?)))
    }

    pub fn get_char(&mut self) -> Result<char, CodecError> {
        let position = self.pos;
        let raw = u32::from_le_bytes(self.take_array("char")?);
        char::from_u32(raw).ok_or_else(|| CodecError::InvalidValue {
            position,
            expected: "char",
            actual: format!("scalar {raw:#x}"),
        })
    }

    pub fn get_type_id(&mut self) -> Result<TypeId, CodecError> {
        Ok(TypeId(u32::from_le_bytes(self.take_array("type id")?)))
    }

    pub fn get_interface_id(&mut self) -> Result<InterfaceId, CodecError> {
        Ok(InterfaceId(u32::from_le_bytes(
            self.take_array("interface id")?,
        )))
    }

    pub fn get_date(&mut self) -> Result<SystemTime, CodecError> {
        let position = self.pos;
        let ms = i64::from_le_bytes(self.take_array("date")?);
        from_epoch_ms(ms).ok_or_else(|| CodecError::InvalidValue {
            position,
            expected: "date",
            actual: format!("{ms} ms is out of range"),
        })
    }

    /// Reads an element count, rejecting counts that cannot fit in the
    /// remaining input when every element takes at least `min_elem_len` bytes.
    pub fn get_count(&mut self, min_elem_len: usize) -> Result<usize, CodecError> {
        let position = self.pos;
        let count = u32::from_le_bytes(self.take_array("length")?) as usize;
        let needed = count.saturating_mul(min_elem_len.max(1));
        if needed > self.remaining() {
            return Err(CodecError::Truncated {
                position,
                expected: "container elements",
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.get_count(1)?;
        Ok(self.take(len, "bytes")?.to_vec())
    }

    pub fn get_str(&mut self) -> Result<String, CodecError> {
        let len = self.get_count(1)?;
        let position = self.pos;
        let raw = self.take(len, "text")?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { position })
    }

    pub fn read<T: WireValue>(&mut self) -> Result<T, CodecError> {
        T::read_from(self)
    }

    /// Reads a polymorphic object slot; TypeId `0` yields `None`.
    pub fn read_object(&mut self) -> Result<Option<Box<dyn Serializable>>, CodecError> {
        let position = self.pos;
        let type_id = self.get_type_id()?;
        if type_id.is_null() {
            return Ok(None);
        }
        let mut obj = self.instantiate(type_id, position)?;
        self.read_fields(&mut *obj)?;
        Ok(Some(obj))
    }

    /// Reads an object slot that must hold a `T` or null.
    pub fn read_object_as<T: Serializable>(&mut self) -> Result<Option<T>, CodecError> {
        let position = self.pos;
        match self.read_object()? {
            None => Ok(None),
            Some(obj) => {
                let actual = obj.wire_type_id();
                obj.downcast::<T>()
                    .map(|boxed| Some(*boxed))
                    .ok_or_else(|| CodecError::TypeMismatch {
                        position,
                        expected: std::any::type_name::<T>().to_owned(),
                        actual,
                    })
            }
        }
    }

    /// Reads a shared object slot written by [`Output::write_shared`].
    ///
    /// A back-reference to an object whose fields are still being read is
    /// rejected, so reference cycles cannot be decoded.
    ///
    /// [`Output::write_shared`]: crate::Output::write_shared
    pub fn read_shared(&mut self) -> Result<Option<Arc<dyn Serializable>>, CodecError> {
        let position = self.pos;
        let type_id = self.get_type_id()?;
        if type_id.is_null() {
            return Ok(None);
        }
        if type_id == TYPEID_REF {
            let index = self.get_u32()? as usize;
            return match self.shared.get(index) {
                Some(Some(obj)) => Ok(Some(Arc::clone(obj))),
                Some(None) => Err(CodecError::InvalidValue {
                    position,
                    expected: "reference to a completed object",
                    actual: format!("object #{index} is still being read"),
                }),
                None => Err(CodecError::InvalidValue {
                    position,
                    expected: "reference to an earlier object",
                    actual: format!("object #{index} of {}", self.shared.len()),
                }),
            };
        }

        let index = self.shared.len();
        self.shared.push(None);
        let mut obj = self.instantiate(type_id, position)?;
        self.read_fields(&mut *obj)?;
        let obj: Arc<dyn Serializable> = Arc::from(obj);
        self.shared[index] = Some(Arc::clone(&obj));
        Ok(Some(obj))
    }

    /// Creates an empty instance for `type_id` through the registry.
    pub fn instantiate(
        &self,
        type_id: TypeId,
        position: usize,
    ) -> Result<Box<dyn Serializable>, CodecError> {
        self.registry
            .create(type_id)
            .map_err(|_| CodecError::UnknownTypeId { position, type_id })
    }

    /// Fills `obj` from the input, with nesting accounted.
    pub fn read_fields(&mut self, obj: &mut dyn Serializable) -> Result<(), CodecError> {
        self.enter()?;
        let result = obj.read(self);
        self.leave();
        result
    }

    pub(crate) fn enter(&mut self) -> Result<(), CodecError> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthExceeded {
                position: self.pos,
                max: self.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn open_stream(&self, stream_id: StreamId) -> Option<StreamBody> {
        self.streams.as_ref().and_then(|resolver| resolver.open(stream_id))
    }

    /// Fails when bytes remain after a complete message.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.remaining() > 0 {
            return Err(CodecError::TrailingBytes {
                position: self.pos,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Input<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Input")
            .field("version", &self.version)
            .field("position", &self.pos)
            .field("remaining", &self.remaining())
            .field("depth", &self.depth)
            .finish()
    }
}
