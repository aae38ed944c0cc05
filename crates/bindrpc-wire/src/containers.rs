//! Container values with their own registered TypeId, so a list, set or map
//! can fill a polymorphic slot or be a method's result.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use bindrpc_core::TypeId;

use crate::{CodecError, Input, Output, Registered, Serializable, WireValue};

/// Ordered sequence registered under `ID`.
#[derive(Clone, PartialEq)]
pub struct ListOf<T, const ID: u32>(pub Vec<T>);

/// Set registered under `ID`.
#[derive(Clone, PartialEq)]
pub struct SetOf<T, const ID: u32>(pub BTreeSet<T>);

/// Key/value map registered under `ID`.
#[derive(Clone, PartialEq)]
pub struct MapOf<K, V, const ID: u32>(pub BTreeMap<K, V>);

impl<T, const ID: u32> Default for ListOf<T, ID> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T, const ID: u32> Default for SetOf<T, ID> {
    fn default() -> Self {
        Self(BTreeSet::new())
    }
}

impl<K, V, const ID: u32> Default for MapOf<K, V, ID> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<T: fmt::Debug, const ID: u32> fmt::Debug for ListOf<T, ID> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListOf<{ID}>")?;
        f.debug_list().entries(&self.0).finish()
    }
}

impl<T: fmt::Debug, const ID: u32> fmt::Debug for SetOf<T, ID> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SetOf<{ID}>")?;
        f.debug_set().entries(&self.0).finish()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, const ID: u32> fmt::Debug for MapOf<K, V, ID> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapOf<{ID}>")?;
        f.debug_map().entries(&self.0).finish()
    }
}

impl<T, const ID: u32> Serializable for ListOf<T, ID>
where
    T: WireValue + fmt::Debug + Send + Sync + 'static,
{
    fn wire_type_id(&self) -> TypeId {
        TypeId(ID)
    }

    fn write(&self, out: &mut Output) -> Result<(), CodecError> {
        self.0.write_to(out)
    }

    fn read(&mut self, input: &mut Input<'_>) -> Result<(), CodecError> {
        self.0 = Vec::read_from(input)?;
        Ok(())
    }
}

impl<T, const ID: u32> Registered for ListOf<T, ID>
where
    T: WireValue + fmt::Debug + Send + Sync + 'static,
{
    const TYPE_ID: TypeId = TypeId(ID);
}

impl<T, const ID: u32> Serializable for SetOf<T, ID>
where
    T: WireValue + Ord + fmt::Debug + Send + Sync + 'static,
{
    fn wire_type_id(&self) -> TypeId {
        TypeId(ID)
    }

    fn write(&self, out: &mut Output) -> Result<(), CodecError> {
        self.0.write_to(out)
    }

    fn read(&mut self, input: &mut Input<'_>) -> Result<(), CodecError> {
        self.0 = BTreeSet::read_from(input)?;
        Ok(())
    }
}

impl<T, const ID: u32> Registered for SetOf<T, ID>
where
    T: WireValue + Ord + fmt::Debug + Send + Sync + 'static,
{
    const TYPE_ID: TypeId = TypeId(ID);
}

impl<K, V, const ID: u32> Serializable for MapOf<K, V, ID>
where
    K: WireValue + Ord + fmt::Debug + Send + Sync + 'static,
    V: WireValue + fmt::Debug + Send + Sync + 'static,
{
    fn wire_type_id(&self) -> TypeId {
        TypeId(ID)
    }

    fn write(&self, out: &mut Output) -> Result<(), CodecError> {
        self.0.write_to(out)
    }

    fn read(&mut self, input: &mut Input<'_>) -> Result<(), CodecError> {
        self.0 = BTreeMap::read_from(input)?;
        Ok(())
    }
}

impl<K, V, const ID: u32> Registered for MapOf<K, V, ID>
where
    K: WireValue + Ord + fmt::Debug + Send + Sync + 'static,
    V: WireValue + fmt::Debug + Send + Sync + 'static,
{
    const TYPE_ID: TypeId = TypeId(ID);
}
