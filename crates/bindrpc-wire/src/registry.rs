//! TypeId to factory mapping.
//!
//! Built once during startup with [`RegistryBuilder`], then frozen into a
//! [`TypeRegistry`] that is shared read-only by every connection.

use std::{any::TypeId as RustTypeId, collections::HashMap, fmt, sync::Arc};

use bindrpc_core::{TYPEID_MIN_USER, TypeId};

use crate::{Registered, RegistryError, Serializable};

/// Produces an empty, mutable instance ready for field deserialization.
pub type Factory = fn() -> Box<dyn Serializable>;

struct Entry {
    factory: Factory,
    rust_type: RustTypeId,
    type_name: &'static str,
}

/// Mutable registration phase of a type registry.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<TypeId, Entry>,
    by_rust_type: HashMap<RustTypeId, TypeId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for a user type id.
    ///
    /// Registering the same concrete type twice is a no-op; a different type
    /// under an existing id fails with `DuplicateTypeId`.
    pub fn register(&mut self, type_id: TypeId, factory: Factory) -> Result<&mut Self, RegistryError> {
        if type_id < TYPEID_MIN_USER {
            return Err(RegistryError::ReservedTypeId(type_id));
        }

        let probe = factory();
        let produced = probe.wire_type_id();
        if produced != type_id {
            return Err(RegistryError::IdMismatch {
                registered: type_id,
                produced,
            });
        }
        let rust_type = (*probe).as_any().type_id();
        let type_name = (*probe).type_name();

        if let Some(existing) = self.entries.get(&type_id) {
            if existing.rust_type == rust_type {
                return Ok(self);
            }
            return Err(RegistryError::DuplicateTypeId {
                type_id,
                existing: existing.type_name,
            });
        }

        tracing::trace!(type_id = type_id.0, type_name, "registered wire type");
        self.entries.insert(
            type_id,
            Entry {
                factory,
                rust_type,
                type_name,
            },
        );
        self.by_rust_type.insert(rust_type, type_id);
        Ok(self)
    }

    /// Registers `T` under `T::TYPE_ID` with `T::default` as factory.
    pub fn register_type<T: Registered>(&mut self) -> Result<&mut Self, RegistryError> {
        self.register(T::TYPE_ID, boxed_default::<T>)
    }

    /// Ends the registration phase.
    pub fn freeze(self) -> TypeRegistry {
        TypeRegistry {
            inner: Arc::new(Frozen {
                entries: self.entries,
                by_rust_type: self.by_rust_type,
            }),
        }
    }
}

fn boxed_default<T: Registered>() -> Box<dyn Serializable> {
    Box::new(T::default())
}

struct Frozen {
    entries: HashMap<TypeId, Entry>,
    by_rust_type: HashMap<RustTypeId, TypeId>,
}

/// Frozen, cheaply cloneable registry safe for concurrent lookups.
#[derive(Clone)]
pub struct TypeRegistry {
    inner: Arc<Frozen>,
}

impl TypeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Materializes an empty instance for a registered id.
    pub fn create(&self, type_id: TypeId) -> Result<Box<dyn Serializable>, RegistryError> {
        self.inner
            .entries
            .get(&type_id)
            .map(|entry| (entry.factory)())
            .ok_or(RegistryError::UnknownTypeId(type_id))
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.inner.entries.contains_key(&type_id)
    }

    /// Inverse lookup from a concrete Rust type to its wire id.
    pub fn type_id_of<T: 'static>(&self) -> Option<TypeId> {
        self.inner.by_rust_type.get(&RustTypeId::of::<T>()).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<u32> = self.inner.entries.keys().map(|id| id.0).collect();
        ids.sort_unstable();
        f.debug_struct("TypeRegistry").field("type_ids", &ids).finish()
    }
}
