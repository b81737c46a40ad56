//! Peercache is a library for building distributed read-through caches.
//!
//! # Introduction
//! Each node of a **peercache** cluster keeps a bounded cache in its own memory. If a value is
//! missing, the node determines the owner of the key using consistent hashing. If the key is
//! owned by another node, the value is fetched from there via HTTP. Otherwise the value is
//! computed by a user supplied [Loader](group::Loader) (most probably a database query) and then
//! cached locally.
//!
//! As each key is owned by exactly one node, the cluster as a whole caches each value only once
//! and the loader is invoked once per key (rather than once per node). Also, if many tasks miss
//! the same key at once, only a single one performs the actual load while all others wait for its
//! result.
//!
//! Note that there is deliberately no way to update or remove a value. Cached values only leave
//! the cache if they are evicted to make room for others. Therefore, this is best suited for data
//! which is immutable or at least rarely changes.
//!
//! # Features
//! * **Byte bounded LRU cache**: each group specifies how much memory its cache may occupy. The
//!   least recently used entries are evicted once this limit is reached. See [lru].
//! * **Consistent hashing**: keys are mapped to nodes using a [HashRing](ring::HashRing) with
//!   virtual nodes, so that adding a node only moves a small fraction of the keys.
//! * **Request collapsing**: concurrent misses of the same key are collapsed into a single load
//!   using a [Deduplicator](flight::Deduplicator).
//! * **100% Async/Await** - everything builds upon [tokio](https://tokio.rs/) and
//!   [hyper](https://hyper.rs/).
//! * **Reload-aware config facility** which permits to change the set of peers or even the
//!   server address without restarting a node (and thus without losing its cache).
//!
//! # Modules
//! * **Groups**: a [Group](group::Group) is a named cache namespace along with its loader. All
//!   groups of a node are kept in a [GroupRegistry](group::GroupRegistry).
//! * **Peers**: the [peers] module defines the capabilities a group needs to talk to other nodes.
//!   These are implemented via HTTP by the [pool] and the [server] module.
//! * **Platform**: the [builder], [platform], [config] and [signals] modules are used to set up
//!   and run a node.
//!
//! # Examples
//! A complete node can be found in **peercache-io**. A short example on how to initialize the
//! library can be found here: [Builder](builder::Builder).
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod byteview;
pub mod config;
pub mod error;
pub mod flight;
pub mod fmt;
pub mod group;
pub mod lru;
pub mod peers;
pub mod platform;
pub mod pool;
pub mod ring;
pub mod server;
pub mod signals;

/// Contains the version of the peercache library.
pub const PEERCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the peercache build being used.
pub const PEERCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // We need to do this as otherwise the integration tests might crash as the logging system
    // is initialized several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned join handle to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate peercache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
