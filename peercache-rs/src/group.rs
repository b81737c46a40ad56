//! Provides named cache namespaces which load missing values on demand.
//!
//! A [Group] combines a local [Cache](crate::lru::cache::Cache), a [Loader] which computes the
//! value of a key and an optional [PeerPicker] which knows the other nodes of the cluster.
//!
//! A lookup via [Group::get] proceeds as follows:
//! 1. The local cache is checked. A hit is returned immediately.
//! 2. On a miss, all concurrent lookups for the same key are collapsed into a single call using a
//!    [Deduplicator](crate::flight::Deduplicator).
//! 3. If the key is owned by another node, the value is fetched from there. Such a value is
//!    **not** stored locally, as the owning node already caches it. If the peer fails, the error
//!    is logged and the value is loaded locally instead.
//! 4. Otherwise the loader computes the value, which is then put into the local cache.
//!
//! All groups of a node are kept in a [GroupRegistry] which is installed in the
//! [Platform](crate::platform::Platform) by the [Builder](crate::builder::Builder). This is
//! used by the [PeerServer](crate::server::PeerServer) to resolve incoming requests.
//!
//! # Examples
//! ```
//! # use peercache::group::{loader_fn, Group};
//! # #[tokio::main]
//! # async fn main() {
//! let scores = Group::new(
//!     "scores",
//!     2048,
//!     loader_fn(|key| match key {
//!         "Tom" => Ok(b"630".to_vec()),
//!         _ => Err(anyhow::anyhow!("{} not exist", key)),
//!     }),
//! );
//!
//! assert_eq!(scores.get("Tom").await.unwrap().to_string(), "630");
//! assert_eq!(scores.get("Sam").await.unwrap_err().to_string(), "Sam not exist");
//! assert_eq!(scores.stats().local_loads, 1);
//! # }
//! ```
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::byteview::ByteView;
use crate::error::CacheError;
use crate::flight::Deduplicator;
use crate::fmt::format_size;
use crate::lru::cache::Cache;
use crate::peers::PeerPicker;
use crate::platform::Platform;

/// Computes the value of a key if it isn't cached anywhere.
///
/// This is most probably a database query or some other expensive computation.
#[async_trait::async_trait]
pub trait Loader: Send + Sync {
    /// Loads the data for the given key.
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a plain function or closure as [Loader].
///
/// Use [loader_fn] to create one.
pub struct LoaderFn<F> {
    func: F,
}

/// Wraps the given closure so that it can be used as [Loader].
pub fn loader_fn<F>(func: F) -> LoaderFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    LoaderFn { func }
}

#[async_trait::async_trait]
impl<F> Loader for LoaderFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.func)(key)
    }
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    cache_hits: AtomicU64,
    peer_loads: AtomicU64,
    peer_errors: AtomicU64,
    loads: AtomicU64,
    local_loads: AtomicU64,
    local_load_errors: AtomicU64,
    evictions: Arc<AtomicU64>,
}

fn increment(counter: &AtomicU64) {
    let _ = counter.fetch_add(1, Ordering::Relaxed);
}

/// Provides a snapshot of the metrics of a group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Contains the number of lookups performed via [Group::get].
    pub gets: u64,

    /// Contains the number of lookups which were served by the local cache.
    pub cache_hits: u64,

    /// Contains the number of values which were successfully fetched from a peer.
    pub peer_loads: u64,

    /// Contains the number of failed attempts to fetch a value from a peer.
    pub peer_errors: u64,

    /// Contains the number of cache misses after collapsing concurrent lookups.
    pub loads: u64,

    /// Contains the number of values computed by the loader of the group.
    pub local_loads: u64,

    /// Contains the number of failed invocations of the loader.
    pub local_load_errors: u64,

    /// Contains the number of entries which were evicted from the local cache.
    pub evictions: u64,

    /// Contains the number of entries in the local cache.
    pub entries: usize,

    /// Contains the number of bytes occupied by the local cache.
    pub allocated_memory: usize,

    /// Contains the maximal number of bytes the local cache may occupy (0 = unbounded).
    pub max_memory: usize,
}

impl Display for GroupStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} entries using {} of {}, {} gets, {} hits, {} loads ({} from peers, {} peer errors, {} local, {} local errors), {} evictions",
            self.entries,
            format_size(self.allocated_memory),
            if self.max_memory == 0 {
                "unlimited".to_owned()
            } else {
                format_size(self.max_memory)
            },
            self.gets,
            self.cache_hits,
            self.loads,
            self.peer_loads,
            self.peer_errors,
            self.local_loads,
            self.local_load_errors,
            self.evictions
        )
    }
}

/// Represents a named cache namespace along with the loader which computes its values.
pub struct Group {
    name: String,
    loader: Arc<dyn Loader>,
    main_cache: Cache,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    flight: Deduplicator<Result<ByteView, CacheError>>,
    counters: Counters,
}

impl Group {
    /// Creates a new group whose local cache occupies at most **max_memory** bytes (0 = unbounded).
    ///
    /// Note that the group is not registered anywhere. Use
    /// [GroupRegistry::create_group](GroupRegistry::create_group) so that the group can be
    /// queried by other nodes.
    pub fn new(name: &str, max_memory: usize, loader: impl Loader + 'static) -> Self {
        Group::with_loader(name, max_memory, Arc::new(loader))
    }

    fn with_loader(name: &str, max_memory: usize, loader: Arc<dyn Loader>) -> Self {
        let counters = Counters::default();
        let evictions = counters.evictions.clone();

        Group {
            name: name.to_owned(),
            loader,
            main_cache: Cache::with_eviction_handler(
                max_memory,
                Box::new(move |_: &str, _: &ByteView| increment(&evictions)),
            ),
            peers: OnceLock::new(),
            flight: Deduplicator::new(),
            counters,
        }
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installs the picker used to locate the owning node of a key.
    ///
    /// # Panics
    /// Panics if a picker has already been registered for this group.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.peers.set(peers).is_err() {
            panic!("Peers of group {} have already been registered!", self.name);
        }
    }

    /// Returns the value of the given key.
    ///
    /// The value is either taken from the local cache, fetched from the owning peer or computed
    /// by the loader. Concurrent lookups for the same key are collapsed so that the value is only
    /// computed or fetched once and all callers receive the same result.
    pub async fn get(&self, key: &str) -> Result<ByteView, CacheError> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey);
        }

        increment(&self.counters.gets);
        if let Some(value) = self.main_cache.get(key) {
            increment(&self.counters.cache_hits);
            return Ok(value);
        }

        self.flight.work(key, || self.load(key)).await
    }

    async fn load(&self, key: &str) -> Result<ByteView, CacheError> {
        // Another burst might have populated the cache in the meantime...
        if let Some(value) = self.main_cache.get(key) {
            return Ok(value);
        }

        increment(&self.counters.loads);

        if let Some(peer) = self.peers.get().and_then(|peers| peers.pick_peer(key)) {
            match peer.fetch(&self.name, key).await {
                Ok(data) => {
                    increment(&self.counters.peer_loads);
                    return Ok(ByteView::from(data));
                }
                Err(error) => {
                    increment(&self.counters.peer_errors);
                    log::warn!(
                        "Failed to fetch {} of group {} from peer: {:#}",
                        key,
                        self.name,
                        error
                    );
                }
            }
        }

        self.load_locally(key).await
    }

    async fn load_locally(&self, key: &str) -> Result<ByteView, CacheError> {
        match self.loader.load(key).await {
            Ok(data) => {
                increment(&self.counters.local_loads);
                let value = ByteView::from(data);
                self.main_cache.add(key, value.clone());
                Ok(value)
            }
            Err(error) => {
                increment(&self.counters.local_load_errors);
                log::debug!("Failed to load {} of group {}: {:#}", key, self.name, error);
                Err(CacheError::from(error))
            }
        }
    }

    /// Returns a snapshot of the metrics of this group.
    pub fn stats(&self) -> GroupStats {
        GroupStats {
            gets: self.counters.gets.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            peer_loads: self.counters.peer_loads.load(Ordering::Relaxed),
            peer_errors: self.counters.peer_errors.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            local_loads: self.counters.local_loads.load(Ordering::Relaxed),
            local_load_errors: self.counters.local_load_errors.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.main_cache.len(),
            allocated_memory: self.main_cache.allocated_memory(),
            max_memory: self.main_cache.max_memory(),
        }
    }
}

/// Keeps all groups of a node by their name.
///
/// Note that this is installed by the [Builder](crate::builder::Builder) and can be obtained via
/// `platform.require::<GroupRegistry>()`.
///
/// # Examples
/// ```
/// # use peercache::group::{loader_fn, GroupRegistry};
/// let registry = GroupRegistry::new();
/// let group = registry
///     .create_group("scores", 0, loader_fn(|key| Ok(key.as_bytes().to_vec())))
///     .unwrap();
///
/// assert_eq!(registry.lookup_group("scores").unwrap().name(), group.name());
/// assert_eq!(registry.lookup_group("unknown").is_none(), true);
///
/// // A name can only be used once...
/// assert_eq!(
///     registry
///         .create_group("scores", 0, loader_fn(|_| Ok(Vec::new())))
///         .is_err(),
///     true
/// );
/// ```
#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl GroupRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        GroupRegistry {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Creates and installs a registry into the given platform.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder).
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let registry = Arc::new(GroupRegistry::new());
        platform.register::<GroupRegistry>(registry.clone());

        registry
    }

    /// Creates a new group and registers it under the given name.
    ///
    /// Returns an error if a group with the given name already exists.
    pub fn create_group(
        &self,
        name: &str,
        max_memory: usize,
        loader: impl Loader + 'static,
    ) -> anyhow::Result<Arc<Group>> {
        let mut groups = self.groups.write();
        if groups.contains_key(name) {
            return Err(anyhow::anyhow!("A group named {} already exists!", name));
        }

        let group = Arc::new(Group::with_loader(name, max_memory, Arc::new(loader)));
        let _ = groups.insert(name.to_owned(), group.clone());
        log::info!(
            "Created group {} (max memory: {})...",
            name,
            if max_memory == 0 {
                "unlimited".to_owned()
            } else {
                format_size(max_memory)
            }
        );

        Ok(group)
    }

    /// Returns the group with the given name.
    pub fn lookup_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().get(name).cloned()
    }

    /// Lists the names of all known groups in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().keys().cloned().collect();
        names.sort();

        names
    }
}
