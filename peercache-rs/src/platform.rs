//! Provides a tiny DI like container to expose all components of a node.
//!
//! The platform is more or less a simple map which keeps all central components (like the
//! [GroupRegistry](crate::group::GroupRegistry), the [HttpPool](crate::pool::HttpPool) or the
//! [PeerServer](crate::server::PeerServer)) as **Arc<T>** around. Also this keeps the central
//! **is_running** flag which is toggled to *false* once [Platform::terminate] is invoked.
//!
//! Note that in common cases [Platform::require] is a good way of fetching a service which is
//! known to be there. However, be aware, that once the system shutdown is initiated, the internal
//! map is cleared and empty (so that all Dropped handlers run). Therefore if the code might be
//! executed after [Platform::terminate] was called, you should use [Platform::find] and gracefully
//! handle the **None** case. This is e.g. what the peer server does for each incoming request.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use peercache::platform::Platform;
//! # use peercache::group::GroupRegistry;
//! # use peercache::pool::HttpPool;
//! let platform = Platform::new();
//!
//! // Registers a new service...
//! let _ = GroupRegistry::install(&platform);
//!
//! // Obtains a reference to a previously registered service...
//! let registry = platform.require::<GroupRegistry>();
//! assert_eq!(registry.names().is_empty(), true);
//!
//! // Trying to obtain a service which hasn't been registered yet, returns an empty
//! // optional...
//! assert_eq!(platform.find::<HttpPool>().is_none(), true);
//!
//! // By default the platform is running...
//! assert_eq!(platform.is_running(), true);
//!
//! // Once terminated...
//! platform.terminate();
//! // All services are immediately released so that their "Dropped" handlers run...
//! assert_eq!(platform.find::<GroupRegistry>().is_none(), true);
//!
//! // and the platform is no longer considered active...
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Provides a container to keep all central services in a single place.
pub struct Platform {
    services: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    is_running: AtomicBool,
}

impl Platform {
    /// Creates a new platform instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            services: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    /// Registers a new component.
    ///
    /// Note that a previously registered component of the same type is replaced.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self.services.lock().insert(TypeId::of::<T>(), service);
    }

    /// Tries to resolve a previously registered service.
    ///
    /// Note, if one knows for certain, that a service will be present, [Platform::require] can
    /// be used.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.services
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Resolve a previously registered service.
    ///
    /// Note, if the framework is already shutting down, all services are evicted. Therefore this
    /// might panic even if it worked before [Platform::terminate] was invoked.
    ///
    /// # Panics
    /// Panics if the requested service isn't available.
    ///
    /// ```should_panic
    /// # use peercache::platform::Platform;
    /// # use peercache::server::PeerServer;
    /// let platform = Platform::new();
    ///
    /// // This will panic...
    /// platform.require::<PeerServer>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if self.is_running() {
            match self.find::<T>() {
                Some(service) => service,
                None => panic!(
                    "A required component ({}) was not available in the platform registry!",
                    std::any::type_name::<T>()
                ),
            }
        } else {
            panic!(
                "A required component ({}) has been requested but the system is already shutting down!",
                std::any::type_name::<T>()
            )
        }
    }

    /// Determines if the platform is still running or if [Platform::terminate] has already been
    /// called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// This will immediately release all services (so that the Dropped handlers run eventually).
    /// It will also toggle the [is_running()](Platform::is_running) flag to **false**. All
    /// background tasks (server, config monitor, peer listener) check this flag and exit.
    pub fn terminate(&self) {
        // Drop all services so that the Dropped handlers run (sooner or later)...
        self.services.lock().clear();

        // Mark platform as halted...
        self.is_running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use crate::group::GroupRegistry;
    use crate::platform::Platform;
    use std::sync::Arc;

    #[test]
    fn registering_a_type_twice_replaces_the_service() {
        let platform = Platform::new();
        let first = GroupRegistry::install(&platform);
        let second = Arc::new(GroupRegistry::new());
        platform.register::<GroupRegistry>(second.clone());

        let current = platform.require::<GroupRegistry>();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(!Arc::ptr_eq(&current, &first));
    }

    #[test]
    #[should_panic]
    fn require_panics_after_terminate() {
        let platform = Platform::new();
        let _ = GroupRegistry::install(&platform);
        platform.terminate();

        let _ = platform.require::<GroupRegistry>();
    }
}
