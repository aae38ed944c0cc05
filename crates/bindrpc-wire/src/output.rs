use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::SystemTime,
};

use bindrpc_core::{InterfaceId, StreamId, TypeId, protocol::TYPEID_REF, to_epoch_ms};

use crate::{CodecError, OutgoingStream, Serializable, StreamBody, WireValue};

/// Default bound on nested objects, matching `RpcConfig::max_depth`.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// A finished archive and the stream bodies it references.
#[derive(Debug, Default)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub streams: Vec<OutgoingStream>,
}

/// Write side of an archive.
///
/// The sender's protocol version is written first; `Serializable::write`
/// implementations consult [`Output::version`] to decide which fields exist.
pub struct Output {
    buf: Vec<u8>,
    version: u64,
    depth: usize,
    max_depth: usize,
    streams: Vec<OutgoingStream>,
    stream_ids: Option<Arc<AtomicU64>>,
    next_stream_id: u64,
    /// Shared objects already written, keyed by address. Holding the `Arc`
    /// keeps the address from being reused while the archive is open.
    shared: HashMap<usize, (u32, Arc<dyn Serializable>)>,
}

impl Output {
    pub fn new(version: u64) -> Self {
        let mut out = Self {
            buf: Vec::with_capacity(64),
            version,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            streams: Vec::new(),
            stream_ids: None,
            next_stream_id: 1,
            shared: HashMap::new(),
        };
        out.put_u64(version);
        out
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Draws stream ids from a counter shared with other archives on the
    /// same connection.
    pub fn with_stream_ids(mut self, counter: Arc<AtomicU64>) -> Self {
        self.stream_ids = Some(counter);
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Bytes written so far, header included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_i8(&mut self, v: i8) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn put_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f32(&mut self, v: f32) {
        self.put_u32(v.to_bits());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.put_u64(v.to_bits());
    }

    pub fn put_char(&mut self, v: char) {
        self.put_u32(u32::from(v));
    }

    pub fn put_type_id(&mut self, id: TypeId) {
        self.put_u32(id.0);
    }

    pub fn put_interface_id(&mut self, id: InterfaceId) {
        self.put_u32(id.0);
    }

    pub fn put_date(&mut self, at: SystemTime) {
        self.put_i64(to_epoch_ms(at));
    }

    /// Writes a `u32` element count or byte length.
    pub fn put_len(&mut self, len: usize) -> Result<(), CodecError> {
        let len = u32::try_from(len).map_err(|_| CodecError::LengthOverflow { len })?;
        self.put_u32(len);
        Ok(())
    }

    pub fn put_str(&mut self, v: &str) -> Result<(), CodecError> {
        self.put_bytes(v.as_bytes())
    }

    pub fn put_bytes(&mut self, v: &[u8]) -> Result<(), CodecError> {
        self.put_len(v.len())?;
        self.buf.extend_from_slice(v);
        Ok(())
    }

    pub fn write<T: WireValue>(&mut self, value: &T) -> Result<(), CodecError> {
        value.write_to(self)
    }

    /// Writes a polymorphic object slot; `None` is the null object.
    pub fn write_object(&mut self, obj: Option<&dyn Serializable>) -> Result<(), CodecError> {
        match obj {
            None => {
                self.put_type_id(TypeId::NULL);
                Ok(())
            }
            Some(obj) => self.put_object(obj),
        }
    }

    /// Writes a non-null object as `[TypeId][fields]`.
    pub fn put_object(&mut self, obj: &dyn Serializable) -> Result<(), CodecError> {
        self.put_type_id(obj.wire_type_id());
        self.write_fields(obj)
    }

    /// Writes a shared object slot. The first occurrence of an object is
    /// written in full and numbered; later occurrences in the same archive
    /// travel as `[REF][index]`.
    pub fn write_shared(&mut self, obj: Option<&Arc<dyn Serializable>>) -> Result<(), CodecError> {
        let Some(obj) = obj else {
            self.put_type_id(TypeId::NULL);
            return Ok(());
        };
        let key = Arc::as_ptr(obj).cast::<()>() as usize;
        if let Some((index, _)) = self.shared.get(&key) {
            let index = *index;
            self.put_type_id(TYPEID_REF);
            self.put_u32(index);
            return Ok(());
        }
        let len = self.shared.len();
        let index = u32::try_from(len).map_err(|_| CodecError::LengthOverflow { len })?;
        self.shared.insert(key, (index, Arc::clone(obj)));
        self.put_object(&**obj)
    }

    /// Writes only the fields of `obj`, with nesting accounted.
    pub fn write_fields(&mut self, obj: &dyn Serializable) -> Result<(), CodecError> {
        self.enter()?;
        let result = obj.write(self);
        self.leave();
        result
    }

    pub(crate) fn enter(&mut self) -> Result<(), CodecError> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthExceeded {
                position: self.buf.len(),
                max: self.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Registers a stream body and returns the id it will travel under.
    pub(crate) fn attach_stream(&mut self, body: StreamBody) -> StreamId {
        let stream_id = match &self.stream_ids {
            Some(counter) => StreamId(counter.fetch_add(1, Ordering::Relaxed)),
            None => {
                let id = self.next_stream_id;
                self.next_stream_id += 1;
                StreamId(id)
            }
        };
        self.streams.push(OutgoingStream { stream_id, body });
        stream_id
    }

    pub fn finish(self) -> Encoded {
        Encoded {
            bytes: self.buf,
            streams: self.streams,
        }
    }

    /// Finishes an archive known to carry no streams.
    pub fn into_bytes(self) -> Vec<u8> {
        if !self.streams.is_empty() {
            tracing::warn!(
                streams = self.streams.len(),
                "dropping stream bodies of an archive finished without streams"
            );
        }
        self.buf
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("version", &self.version)
            .field("len", &self.buf.len())
            .field("depth", &self.depth)
            .field("streams", &self.streams.len())
            .field("shared", &self.shared.len())
            .finish()
    }
}
