//! Provides a builder which can be used to setup and initialize a cache node.
//!
//! This can be used to create and setup central parts of the framework. As some of the
//! components are optional (e.g. a node which only uses groups locally doesn't need any peers),
//! a builder permits to selectively enable or disable them. Note that a
//! [GroupRegistry](crate::group::GroupRegistry) is always installed.
//!
//! # Example
//! Setting up a node with all features enabled:
//! ```no_run
//! # use peercache::builder::Builder;
//! # use peercache::group::{loader_fn, GroupRegistry};
//! # use peercache::pool::HttpPool;
//! # use peercache::server::PeerServer;
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the platform...
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Create the groups of this node and attach them to the cluster...
//!     let group = platform
//!         .require::<GroupRegistry>()
//!         .create_group("scores", 2048, loader_fn(|key| Ok(key.as_bytes().to_vec())))
//!         .unwrap();
//!     group.register_peers(platform.require::<HttpPool>());
//!
//!     // Start the main event loop of the server...
//!     platform.require::<PeerServer>().event_loop().await;
//! }
//! ```
use std::sync::Arc;

use crate::group::GroupRegistry;
use crate::platform::Platform;
use crate::pool::HttpPool;
use crate::server::PeerServer;
use crate::{init_logging, PEERCACHE_REVISION, PEERCACHE_VERSION};

/// Initializes a node by creating and initializing all core components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_peers: bool,
    setup_server: bool,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables all features.
    ///
    /// Note that using this method (and then maybe disabling selected components) is quite
    /// convenient, but be aware that new components which might be added in a library update
    /// will then also be enabled by default. This might or might not be the expected behaviour.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_peers = true;
        self.setup_server = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout. As we intend nodes
    /// to be run in docker containers, this is all that is needed for proper logging.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the framework once **CTRL-C** or **SIGHUP**
    /// is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables installing the signal listener after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Installs [config::Config](crate::config::Config) and loads the **settings.yml**.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables setting up a **Config** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Creates and installs a [HttpPool](crate::pool::HttpPool) which knows the peers of
    /// this node.
    ///
    /// Note that each group still has to be attached to the pool via
    /// [Group::register_peers](crate::group::Group::register_peers).
    pub fn enable_peers(mut self) -> Self {
        self.setup_peers = true;
        self
    }

    /// Disables setting up a **HttpPool** after [enable_all()](Builder::enable_all) has been used.
    pub fn disable_peers(mut self) -> Self {
        self.setup_peers = false;
        self
    }

    /// Creates and installs a [PeerServer](crate::server::PeerServer) instance.
    ///
    /// Note that still, the main event loop has to be invoked manually via:
    /// `platform.require::<PeerServer>().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.setup_server = true;
        self
    }

    /// Disables setting up a **PeerServer** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_server(mut self) -> Self {
        self.setup_server = false;
        self
    }

    /// Builds the [Platform](crate::platform::Platform) registry with all the enabled components
    /// being registered.
    pub async fn build(self) -> Arc<Platform> {
        let platform = Platform::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. PEERCACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            PEERCACHE_VERSION,
            PEERCACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(platform.clone());
        }

        if self.setup_config {
            crate::config::install(platform.clone()).await;
        }

        let _ = GroupRegistry::install(&platform);

        if self.setup_peers {
            let _ = HttpPool::install(&platform);
        }

        if self.setup_server {
            let _ = PeerServer::install(&platform);
        }

        platform
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::config::Config;
    use crate::group::GroupRegistry;
    use crate::pool::HttpPool;
    use crate::server::PeerServer;
    use crate::testing::test_async;

    #[test]
    fn only_enabled_components_are_installed() {
        test_async(async {
            let platform = Builder::new().enable_peers().build().await;

            assert!(platform.find::<GroupRegistry>().is_some());
            assert!(platform.find::<HttpPool>().is_some());
            assert!(platform.find::<Config>().is_none());
            assert!(platform.find::<PeerServer>().is_none());

            platform.terminate();
        });
    }

    #[test]
    fn enable_all_can_be_narrowed_down() {
        test_async(async {
            let platform = Builder::new()
                .enable_all()
                .disable_signals()
                .disable_config()
                .disable_server()
                .build()
                .await;

            assert!(platform.find::<HttpPool>().is_some());
            assert!(platform.find::<PeerServer>().is_none());

            platform.terminate();
        });
    }
}
