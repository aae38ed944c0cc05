//! Registered types plus the subset that are method requests.

use std::{collections::HashMap, sync::Arc};

use bindrpc_core::{PROTOCOL_VERSION, RpcConfig, TypeId};
use bindrpc_wire::{
    CodecError, DEFAULT_MAX_DEPTH, Encoded, Input, Output, Registered, RegistryBuilder,
    RegistryError, Serializable, TypeRegistry,
};

use crate::{
    DispatchError, MethodRequest, MethodResult,
    envelope::{read_result, write_request, write_result},
};

/// Recovers the request view of an object created by the registry.
type Upcast = fn(Box<dyn Serializable>) -> Option<Box<dyn MethodRequest>>;

fn upcast<T: MethodRequest>(obj: Box<dyn Serializable>) -> Option<Box<dyn MethodRequest>> {
    obj.downcast::<T>().map(|req| req as Box<dyn MethodRequest>)
}

pub struct ProtocolBuilder {
    types: RegistryBuilder,
    requests: HashMap<TypeId, Upcast>,
    version: u64,
    max_depth: usize,
}

impl Default for ProtocolBuilder {
    fn default() -> Self {
        Self {
            types: RegistryBuilder::new(),
            requests: HashMap::new(),
            version: PROTOCOL_VERSION,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ProtocolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RpcConfig) -> Self {
        Self {
            version: config.protocol_version,
            max_depth: config.max_depth,
            ..Self::default()
        }
    }

    pub fn register_type<T: Registered>(&mut self) -> Result<&mut Self, RegistryError> {
        self.types.register_type::<T>()?;
        Ok(self)
    }

    /// Registers a request type so it can be decoded and dispatched.
    pub fn register_request<T: MethodRequest + Registered>(
        &mut self,
    ) -> Result<&mut Self, RegistryError> {
        self.types.register_type::<T>()?;
        self.requests.insert(T::TYPE_ID, upcast::<T>);
        Ok(self)
    }

    pub fn build(self) -> Protocol {
        Protocol {
            registry: self.types.freeze(),
            requests: Arc::new(self.requests),
            version: self.version,
            max_depth: self.max_depth,
        }
    }
}

/// Frozen codec settings and type tables, shared by every connection.
#[derive(Clone)]
pub struct Protocol {
    registry: TypeRegistry,
    requests: Arc<HashMap<TypeId, Upcast>>,
    version: u64,
    max_depth: usize,
}

impl Protocol {
    pub fn builder() -> ProtocolBuilder {
        ProtocolBuilder::new()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Version this side writes when the peer's is unknown.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn output(&self, version: u64) -> Output {
        Output::new(version).with_max_depth(self.max_depth)
    }

    pub fn input<'a>(&'a self, bytes: &'a [u8]) -> Result<Input<'a>, CodecError> {
        Ok(Input::new(bytes, &self.registry)?.with_max_depth(self.max_depth))
    }

    pub fn encode_request(&self, request: &dyn MethodRequest) -> Result<Encoded, CodecError> {
        let mut out = self.output(self.version);
        write_request(&mut out, request)?;
        Ok(out.finish())
    }

    pub fn decode_request(&self, bytes: &[u8]) -> Result<Box<dyn MethodRequest>, DispatchError> {
        let mut input = self.input(bytes)?;
        let request = self.read_request(&mut input)?;
        input.finish()?;
        Ok(request)
    }

    /// Reads `[TypeId][InterfaceId][fields]` and checks the interface against
    /// the one the request type declares.
    pub fn read_request(&self, input: &mut Input<'_>) -> Result<Box<dyn MethodRequest>, DispatchError> {
        let position = input.position();
        let type_id = input.get_type_id()?;
        let obj = input.instantiate(type_id, position)?;
        let mut request = self
            .requests
            .get(&type_id)
            .and_then(|upcast| upcast(obj))
            .ok_or(DispatchError::NotAMethod { type_id })?;

        let position = input.position();
        let interface_id = input.get_interface_id()?;
        if interface_id != request.interface_id() {
            return Err(CodecError::InterfaceMismatch {
                position,
                expected: request.interface_id(),
                actual: interface_id,
            }
            .into());
        }
        input.read_fields(&mut *request)?;
        Ok(request)
    }

    pub fn encode_result(&self, result: &MethodResult) -> Result<Encoded, CodecError> {
        let mut out = self.output(self.version);
        write_result(&mut out, result)?;
        Ok(out.finish())
    }

    pub fn decode_result(&self, bytes: &[u8]) -> Result<MethodResult, CodecError> {
        let mut input = self.input(bytes)?;
        let result = read_result(&mut input)?;
        input.finish()?;
        Ok(result)
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut requests: Vec<u32> = self.requests.keys().map(|id| id.0).collect();
        requests.sort_unstable();
        f.debug_struct("Protocol")
            .field("version", &self.version)
            .field("max_depth", &self.max_depth)
            .field("registry", &self.registry)
            .field("requests", &requests)
            .finish()
    }
}
