//! Remote-object directory: InterfaceId to bound service.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use bindrpc_core::{ExceptionDescriptor, InterfaceId};

/// Implemented on `dyn Trait` for every service trait that can be bound.
pub trait RemoteInterface: Send + Sync + 'static {
    const INTERFACE_ID: InterfaceId;
    const NAME: &'static str;
}

struct Binding {
    interface_id: InterfaceId,
    name: &'static str,
    /// Holds an `Arc<I>` for the bound interface `I`.
    service: Box<dyn Any + Send + Sync>,
    session_required: bool,
}

/// A resolved directory entry, handed to `MethodRequest::execute`.
#[derive(Clone)]
pub struct Remote {
    binding: Arc<Binding>,
}

impl Remote {
    pub fn interface_id(&self) -> InterfaceId {
        self.binding.interface_id
    }

    pub fn name(&self) -> &'static str {
        self.binding.name
    }

    /// Whether the binding only serves requests with a session.
    pub fn session_required(&self) -> bool {
        self.binding.session_required
    }

    /// Capability-checked view of the bound service as interface `I`.
    pub fn interface<I: ?Sized + RemoteInterface>(&self) -> Result<Arc<I>, ExceptionDescriptor> {
        self.binding
            .service
            .downcast_ref::<Arc<I>>()
            .cloned()
            .ok_or_else(|| {
                ExceptionDescriptor::unknown_interface(I::INTERFACE_ID).with_detail(format!(
                    "{} is bound as {}",
                    self.binding.interface_id, self.binding.name
                ))
            })
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("interface_id", &self.binding.interface_id)
            .field("name", &self.binding.name)
            .field("session_required", &self.binding.session_required)
            .finish()
    }
}

#[derive(Default)]
pub struct RemoteDirectory {
    bindings: RwLock<HashMap<InterfaceId, Remote>>,
}

impl RemoteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `service` under `I::INTERFACE_ID`, returning the replaced entry.
    pub fn bind<I: ?Sized + RemoteInterface>(&self, service: Arc<I>) -> Option<Remote> {
        self.insert::<I>(service, false)
    }

    /// Like [`bind`](Self::bind), but every request needs a session.
    pub fn bind_authenticated<I: ?Sized + RemoteInterface>(&self, service: Arc<I>) -> Option<Remote> {
        self.insert::<I>(service, true)
    }

    fn insert<I: ?Sized + RemoteInterface>(
        &self,
        service: Arc<I>,
        session_required: bool,
    ) -> Option<Remote> {
        let remote = Remote {
            binding: Arc::new(Binding {
                interface_id: I::INTERFACE_ID,
                name: I::NAME,
                service: Box::new(service),
                session_required,
            }),
        };
        tracing::info!(
            interface_id = I::INTERFACE_ID.0,
            name = I::NAME,
            session_required,
            "bound remote interface"
        );
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(I::INTERFACE_ID, remote)
    }

    pub fn unbind(&self, interface_id: InterfaceId) -> Option<Remote> {
        let removed = self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&interface_id);
        if removed.is_some() {
            tracing::info!(interface_id = interface_id.0, "unbound remote interface");
        }
        removed
    }

    pub fn resolve(&self, interface_id: InterfaceId) -> Option<Remote> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&interface_id)
            .cloned()
    }

    pub fn interfaces(&self) -> Vec<InterfaceId> {
        let mut ids: Vec<InterfaceId> = self
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable_by_key(|id| id.0);
        ids
    }
}

impl fmt::Debug for RemoteDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDirectory")
            .field("interfaces", &self.interfaces())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    impl RemoteInterface for dyn Greeter {
        const INTERFACE_ID: InterfaceId = InterfaceId(7);
        const NAME: &'static str = "Greeter";
    }

    trait Counter: Send + Sync + fmt::Debug {}

    impl RemoteInterface for dyn Counter {
        const INTERFACE_ID: InterfaceId = InterfaceId(7);
        const NAME: &'static str = "Counter";
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_owned()
        }
    }

    #[test]
    fn bind_resolve_unbind() {
        let directory = RemoteDirectory::new();
        assert!(directory.resolve(InterfaceId(7)).is_none());

        let service: Arc<dyn Greeter> = Arc::new(English);
        assert!(directory.bind::<dyn Greeter>(service).is_none());

        let remote = directory
            .resolve(InterfaceId(7))
            .expect("greeter should resolve");
        assert_eq!(remote.name(), "Greeter");
        assert!(!remote.session_required());
        let greeter = remote
            .interface::<dyn Greeter>()
            .expect("binding should be a greeter");
        assert_eq!(greeter.greet(), "hello");

        assert!(directory.unbind(InterfaceId(7)).is_some());
        assert!(directory.interfaces().is_empty());
    }

    #[test]
    fn capability_check_rejects_other_interface() {
        let directory = RemoteDirectory::new();
        directory.bind_authenticated::<dyn Greeter>(Arc::new(English));
        let remote = directory
            .resolve(InterfaceId(7))
            .expect("greeter should resolve");
        assert!(remote.session_required());

        let err = remote
            .interface::<dyn Counter>()
            .expect_err("greeter is not a counter");
        assert_eq!(err.code, bindrpc_core::ErrorCode::ServiceNotImplemented);
    }
}
