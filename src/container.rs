//! Service container: named factories, singleton lifecycles, and
//! circular-dependency detection.
//!
//! The container is an explicit, constructed object — registered during
//! application bootstrap, resolved lazily, and reset only from tests.
//! Factories receive the container itself so they can resolve their own
//! dependencies, which is also what makes cycle detection meaningful.
//!
//! ```rust
//! use std::sync::Arc;
//! use crosscut::ServiceContainer;
//!
//! struct UserRepository;
//! struct UserService { repo: Arc<UserRepository> }
//!
//! let container = ServiceContainer::new();
//! container.register_singleton(|_| Ok(UserRepository));
//! container.register_singleton(|c| {
//!     Ok(UserService { repo: c.resolve::<UserRepository>()? })
//! });
//!
//! let a = container.resolve::<UserService>().unwrap();
//! let b = container.resolve::<UserService>().unwrap();
//! assert!(Arc::ptr_eq(&a, &b)); // singleton identity
//! assert!(Arc::ptr_eq(&a.repo, &b.repo));
//! ```

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};

use crate::error::{CoreError, CoreResult};

/// Type-erased instance storage.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Identity of a registered service: a concrete type, or a name for
/// registrations that share a type (connection strings, tenants, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Type(TypeId, &'static str),
    Named(&'static str),
}

impl Key {
    /// Human-readable identity, used in every container error message.
    pub fn display_name(&self) -> &'static str {
        match self {
            Key::Type(_, name) => name,
            Key::Named(name) => name,
        }
    }
}

/// Key for a concrete type.
pub fn key_of<T: 'static>() -> Key {
    Key::Type(TypeId::of::<T>(), std::any::type_name::<T>())
}

type Factory = Arc<dyn Fn(&ServiceContainer) -> CoreResult<AnyArc> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    singleton: bool,
    factory: Factory,
}

/// Registry of service factories with lazy singleton caching.
///
/// Thread-safety: registrations, cached singletons, and the in-progress
/// resolution sets all live behind their own locks, and no lock is held
/// while a factory runs. Two threads racing the first resolution of the
/// same singleton may both invoke its factory — one instance wins the
/// cache — so factories are required to be idempotent and
/// side-effect-free.
#[derive(Default)]
pub struct ServiceContainer {
    registrations: RwLock<HashMap<Key, Registration>>,
    singletons: Mutex<HashMap<Key, AnyArc>>,
    // In-progress keys per thread. A key is present exactly while its
    // factory runs; re-entry on the same thread is a cycle.
    resolving: Mutex<HashMap<ThreadId, HashSet<Key>>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a lazily constructed, process-wide instance of `T`.
    pub fn register_singleton<T, F>(&self, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> CoreResult<T> + Send + Sync + 'static,
    {
        self.insert(key_of::<T>(), true, erase(factory));
    }

    /// Registers a factory invoked on every resolution of `T`.
    pub fn register_transient<T, F>(&self, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> CoreResult<T> + Send + Sync + 'static,
    {
        self.insert(key_of::<T>(), false, erase(factory));
    }

    /// Registers a named singleton factory.
    pub fn register_named_singleton<T, F>(&self, name: &'static str, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> CoreResult<T> + Send + Sync + 'static,
    {
        self.insert(Key::Named(name), true, erase(factory));
    }

    /// Registers a named factory invoked on every resolution.
    pub fn register_named_transient<T, F>(&self, name: &'static str, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> CoreResult<T> + Send + Sync + 'static,
    {
        self.insert(Key::Named(name), false, erase(factory));
    }

    /// Bypasses the factory mechanism: `key` resolves to `instance` from
    /// now on. Intended for test substitution.
    pub fn register_instance<T>(&self, instance: T)
    where
        T: Send + Sync + 'static,
    {
        self.install_instance(key_of::<T>(), Arc::new(instance));
    }

    /// Named-key variant of [`Self::register_instance`].
    pub fn register_named_instance<T>(&self, name: &'static str, instance: T)
    where
        T: Send + Sync + 'static,
    {
        self.install_instance(Key::Named(name), Arc::new(instance));
    }

    /// Resolves an instance of `T`.
    ///
    /// Fails with [`CoreError::NotRegistered`] for unknown keys and with
    /// [`CoreError::CircularDependency`] when a factory re-enters
    /// resolution of its own key.
    pub fn resolve<T>(&self) -> CoreResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let key = key_of::<T>();
        let instance = self.resolve_key(&key)?;
        downcast::<T>(instance, key.display_name())
    }

    /// Resolves a named registration as `T`.
    pub fn resolve_named<T>(&self, name: &'static str) -> CoreResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let key = Key::Named(name);
        let instance = self.resolve_key(&key)?;
        downcast::<T>(instance, name)
    }

    /// Whether `T` is registered. No side effects.
    pub fn has<T: 'static>(&self) -> bool {
        self.registrations.read().contains_key(&key_of::<T>())
    }

    /// Whether a named registration exists. No side effects.
    pub fn has_named(&self, name: &'static str) -> bool {
        self.registrations.read().contains_key(&Key::Named(name))
    }

    /// Display names of every registration, sorted for stable output.
    pub fn registered_services(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .registrations
            .read()
            .keys()
            .map(Key::display_name)
            .collect();
        names.sort_unstable();
        names
    }

    /// Clears registrations, cached singletons, and in-progress state.
    /// Test-only lifecycle; production containers live for the process.
    pub fn reset(&self) {
        self.registrations.write().clear();
        self.singletons.lock().clear();
        self.resolving.lock().clear();
    }

    fn insert(&self, key: Key, singleton: bool, factory: Factory) {
        let replaced = self
            .registrations
            .write()
            .insert(key.clone(), Registration { singleton, factory });
        if replaced.is_some() {
            tracing::warn!(
                target: "crosscut",
                service = key.display_name(),
                "replacing existing service registration"
            );
            // A stale cached instance must not shadow the new factory.
            self.singletons.lock().remove(&key);
        }
    }

    fn install_instance(&self, key: Key, instance: AnyArc) {
        let shared = instance.clone();
        self.insert(key.clone(), true, Arc::new(move |_| Ok(shared.clone())));
        self.singletons.lock().insert(key, instance);
    }

    fn resolve_key(&self, key: &Key) -> CoreResult<AnyArc> {
        let registration = self
            .registrations
            .read()
            .get(key)
            .cloned()
            .ok_or(CoreError::NotRegistered(key.display_name()))?;

        if registration.singleton {
            if let Some(cached) = self.singletons.lock().get(key) {
                return Ok(cached.clone());
            }
        }

        let _guard = ResolveGuard::enter(self, key)?;
        let instance = (registration.factory)(self)?;

        if registration.singleton {
            self.singletons.lock().insert(key.clone(), instance.clone());
        }
        Ok(instance)
    }
}

fn erase<T, F>(factory: F) -> Factory
where
    T: Send + Sync + 'static,
    F: Fn(&ServiceContainer) -> CoreResult<T> + Send + Sync + 'static,
{
    Arc::new(move |container| factory(container).map(|value| Arc::new(value) as AnyArc))
}

fn downcast<T: Send + Sync + 'static>(instance: AnyArc, name: &'static str) -> CoreResult<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|_| CoreError::TypeMismatch(name))
}

/// Marks `key` in progress for the current thread; removal on drop keeps
/// a failed factory from poisoning later resolutions.
struct ResolveGuard<'a> {
    container: &'a ServiceContainer,
    key: Key,
    thread: ThreadId,
}

impl<'a> ResolveGuard<'a> {
    fn enter(container: &'a ServiceContainer, key: &Key) -> CoreResult<Self> {
        let thread = std::thread::current().id();
        let mut resolving = container.resolving.lock();
        let in_progress = resolving.entry(thread).or_default();
        if !in_progress.insert(key.clone()) {
            return Err(CoreError::CircularDependency(key.display_name()));
        }
        Ok(Self { container, key: key.clone(), thread })
    }
}

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        let mut resolving = self.container.resolving.lock();
        if let Some(in_progress) = resolving.get_mut(&self.thread) {
            in_progress.remove(&self.key);
            if in_progress.is_empty() {
                resolving.remove(&self.thread);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_registrations_are_independent_of_type_keys() {
        let container = ServiceContainer::new();
        container.register_singleton(|_| Ok(5u32));
        container.register_named_singleton("port", |_| Ok(8080u32));

        assert_eq!(*container.resolve::<u32>().unwrap(), 5);
        assert_eq!(*container.resolve_named::<u32>("port").unwrap(), 8080);
        assert!(container.has_named("port"));
        assert!(!container.has_named("host"));
    }

    #[test]
    fn overwrite_clears_cached_singleton() {
        let container = ServiceContainer::new();
        container.register_singleton(|_| Ok("first".to_string()));
        assert_eq!(*container.resolve::<String>().unwrap(), "first");

        container.register_singleton(|_| Ok("second".to_string()));
        assert_eq!(*container.resolve::<String>().unwrap(), "second");
    }

    #[test]
    fn transient_registrations_rerun_the_factory() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();

        let container = ServiceContainer::new();
        container.register_transient(move |_| {
            Ok(counted.fetch_add(1, Ordering::SeqCst))
        });

        let first = container.resolve::<u32>().unwrap();
        let second = container.resolve::<u32>().unwrap();
        assert_ne!(*first, *second);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn registered_services_lists_display_names() {
        let container = ServiceContainer::new();
        container.register_named_singleton("a", |_| Ok(1u8));
        container.register_named_singleton("b", |_| Ok(2u8));

        assert_eq!(container.registered_services(), vec!["a", "b"]);
    }
}
