//! Provides the HTTP based transport between the nodes of a cluster.
//!
//! The [HttpPool] knows all nodes of the cluster and uses a [HashRing](crate::ring::HashRing) to
//! determine the owner of a key. Each remote node is represented by a [HttpGetter] which fetches
//! values via **GET &lt;node&gt;&lt;base_path&gt;&lt;group&gt;/&lt;key&gt;**, as served by the
//! [PeerServer](crate::server::PeerServer).
//!
//! The topology (ring and getters) is replaced as a whole whenever the set of peers changes.
//! Lookups therefore never observe a partially updated topology and never block.
//!
//! The local node has to be listed among the nodes using exactly the URL given as **self**.
//! Otherwise the pool cannot tell which keys it owns itself and therefore loads all keys locally.
//!
//! # Configuration
//! When installed via [HttpPool::install], the pool is configured using the **peers** section
//! of the system config and updated whenever the config changes:
//! ```yaml
//! peers:
//!     # Contains the URL under which this node is known to its peers...
//!     self: http://localhost:8001
//!     base_path: /_peercache/
//!     replicas: 50
//!     nodes:
//!         - http://localhost:8001
//!         - http://localhost:8002
//! ```
//!
//! # Examples
//! ```
//! # use peercache::pool::HttpPool;
//! let pool = HttpPool::new("http://node-a:8001");
//! pool.set_peers(&["http://node-a:8001", "http://node-b:8001"]);
//!
//! // Keys owned by "node-a" itself are never delegated to a peer...
//! for key in ["Tom", "Jack", "Sam", "Kate"] {
//!     if let Some(getter) = pool.owner(key) {
//!         assert_eq!(getter.peer(), "http://node-b:8001");
//!     }
//! }
//! ```
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwap;
use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::{Client, Uri};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::sync::broadcast::error::RecvError;

use crate::config::{Config, Handle};
use crate::peers::{PeerGetter, PeerPicker};
use crate::platform::Platform;
use crate::ring::HashRing;
use crate::spawn;

/// Contains the path prefix under which peers serve their groups.
pub const DEFAULT_BASE_PATH: &str = "/_peercache/";

/// Contains the number of virtual nodes per peer on the hash ring.
pub const DEFAULT_REPLICAS: usize = 50;

/// Specifies how often the config listener checks if the platform is still running.
const CONFIG_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Determines which characters are escaped within a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Contains the settings of a pool as read from the config.
#[derive(Clone, Debug, PartialEq, Eq)]
struct PeerSettings {
    self_url: Option<String>,
    base_path: String,
    replicas: usize,
    nodes: Vec<String>,
}

impl PeerSettings {
    fn new(self_url: Option<&str>) -> Self {
        PeerSettings {
            self_url: self_url.map(normalize_url),
            base_path: DEFAULT_BASE_PATH.to_owned(),
            replicas: DEFAULT_REPLICAS,
            nodes: Vec::new(),
        }
    }

    fn from_config(handle: &Handle) -> Self {
        let nodes = handle
            .query("peers.nodes")
            .as_vec()
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|node| node.as_str())
                    .map(normalize_url)
                    .collect()
            })
            .unwrap_or_default();

        PeerSettings {
            self_url: handle.query("peers.self").as_str().map(normalize_url),
            base_path: normalize_base_path(
                handle
                    .query("peers.base_path")
                    .as_str()
                    .unwrap_or(DEFAULT_BASE_PATH),
            ),
            replicas: handle
                .query("peers.replicas")
                .as_i64()
                .filter(|replicas| *replicas > 0)
                .map(|replicas| replicas as usize)
                .unwrap_or(DEFAULT_REPLICAS),
            nodes,
        }
    }

    fn is_member(&self) -> bool {
        self.self_url
            .as_ref()
            .map(|url| self.nodes.contains(url))
            .unwrap_or(false)
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_owned()
}

fn normalize_base_path(path: &str) -> String {
    let path = path.trim().trim_matches('/');
    if path.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}/", path)
    }
}

/// Represents the currently known cluster.
struct Topology {
    settings: PeerSettings,
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

impl Topology {
    fn build(settings: PeerSettings, client: &Client<HttpConnector>) -> Self {
        if !settings.nodes.is_empty() && !settings.is_member() {
            log::error!(
                "The local node ({}) is not listed among the peers ({}). Loading all keys locally...",
                settings.self_url.as_deref().unwrap_or("peers.self is missing"),
                settings.nodes.join(", ")
            );

            return Topology {
                ring: HashRing::new(settings.replicas),
                getters: HashMap::new(),
                settings,
            };
        }

        let mut ring = HashRing::new(settings.replicas);
        ring.add(&settings.nodes);

        let getters = settings
            .nodes
            .iter()
            .map(|node| {
                let getter = HttpGetter {
                    peer: node.clone(),
                    base_url: format!("{}{}", node, settings.base_path),
                    client: client.clone(),
                };
                (node.clone(), Arc::new(getter))
            })
            .collect();

        Topology {
            settings,
            ring,
            getters,
        }
    }
}

/// Picks peers via consistent hashing and talks to them via HTTP.
pub struct HttpPool {
    client: Client<HttpConnector>,
    topology: ArcSwap<Topology>,
}

impl HttpPool {
    /// Creates a new pool for the node reachable via the given URL.
    ///
    /// Initially no peers are known, therefore all keys are loaded locally. Use
    /// [set_peers](HttpPool::set_peers) to specify the nodes of the cluster.
    pub fn new(self_url: &str) -> Self {
        HttpPool::from_settings(PeerSettings::new(Some(self_url)))
    }

    fn from_settings(settings: PeerSettings) -> Self {
        let client = Client::new();
        let topology = Topology::build(settings, &client);

        HttpPool {
            client,
            topology: ArcSwap::new(Arc::new(topology)),
        }
    }

    /// Creates and installs a pool into the given platform.
    ///
    /// If a [Config](crate::config::Config) is present, the pool is set up using the **peers**
    /// section and updated whenever the config changes. Without a config, the pool knows no
    /// peers and all keys are loaded locally. Note that this is called by the
    /// [Builder](crate::builder::Builder) unless disabled.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let config = platform.find::<Config>();
        let settings = config
            .as_ref()
            .map(|config| PeerSettings::from_config(&config.current()))
            .unwrap_or_else(|| PeerSettings::new(None));

        let pool = Arc::new(HttpPool::from_settings(settings));
        log::info!(
            "Peer pool for {} knows {} node(s)...",
            pool.self_url().as_deref().unwrap_or("-"),
            pool.topology.load().settings.nodes.len()
        );
        platform.register::<HttpPool>(pool.clone());

        if let Some(config) = config {
            HttpPool::watch_config(pool.clone(), platform.clone(), config);
        }

        pool
    }

    fn watch_config(pool: Arc<HttpPool>, platform: Arc<Platform>, config: Arc<Config>) {
        let mut notifier = config.notifier();
        spawn!(async move {
            while platform.is_running() {
                // We use a timeout here so that the platform state is checked every once in a
                // while...
                match tokio::time::timeout(CONFIG_WAIT_TIMEOUT, notifier.recv()).await {
                    Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {
                        let settings = PeerSettings::from_config(&config.current());
                        if settings != pool.topology.load().settings {
                            log::info!("Peer configuration has changed. Updating topology...");
                            pool.apply(settings);
                        }
                    }
                    Ok(Err(RecvError::Closed)) => return,
                    Err(_) => (),
                }
            }
        });
    }

    fn apply(&self, settings: PeerSettings) {
        let topology = Topology::build(settings, &self.client);
        log::info!(
            "Using {} node(s) as peers of {}: {}",
            topology.settings.nodes.len(),
            topology.settings.self_url.as_deref().unwrap_or("-"),
            topology.settings.nodes.join(", ")
        );
        self.topology.store(Arc::new(topology));
    }

    /// Replaces the set of known nodes.
    ///
    /// The list has to contain the local node itself, so that it receives its share of the
    /// keys. Otherwise no peer is ever picked and all keys are loaded locally. The hash ring and all getters are rebuilt and swapped in atomically.
    pub fn set_peers<S: AsRef<str>>(&self, peers: &[S]) {
        let mut settings = self.topology.load().settings.clone();
        settings.nodes = peers
            .iter()
            .map(|peer| normalize_url(peer.as_ref()))
            .collect();

        self.apply(settings);
    }

    /// Returns the URL under which the local node is known (if configured).
    pub fn self_url(&self) -> Option<String> {
        self.topology.load().settings.self_url.clone()
    }

    /// Returns the path prefix under which groups are served.
    pub fn base_path(&self) -> String {
        self.topology.load().settings.base_path.clone()
    }

    /// Returns the getter of the remote node which owns the given key.
    ///
    /// Returns **None** if the key is owned by the local node or if no nodes are known.
    pub fn owner(&self, key: &str) -> Option<Arc<HttpGetter>> {
        let topology = self.topology.load();
        match topology.ring.get(key) {
            Some(peer) if Some(peer) != topology.settings.self_url.as_deref() => {
                log::debug!("Picked peer {} for {}", peer, key);
                topology.getters.get(peer).cloned()
            }
            _ => None,
        }
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let getter = self.owner(key)?;
        Some(getter)
    }
}

/// Fetches values from a single remote node via HTTP.
pub struct HttpGetter {
    peer: String,
    base_url: String,
    client: Client<HttpConnector>,
}

impl HttpGetter {
    /// Returns the URL of the remote node.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn url(&self, group: &str, key: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            utf8_percent_encode(group, PATH_SEGMENT),
            utf8_percent_encode(key, PATH_SEGMENT)
        )
    }
}

#[async_trait::async_trait]
impl PeerGetter for HttpGetter {
    async fn fetch(&self, group: &str, key: &str) -> anyhow::Result<Bytes> {
        let url = self.url(group, key);
        let uri = url
            .parse::<Uri>()
            .with_context(|| format!("Invalid peer URL: {}", url))?;

        let response = self
            .client
            .get(uri)
            .await
            .with_context(|| format!("Failed to query peer {}", self.peer))?;

        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .with_context(|| format!("Failed to read response of peer {}", self.peer))?;

        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "Peer {} returned {}: {}",
                self.peer,
                status,
                String::from_utf8_lossy(&body).trim()
            ));
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::peers::PeerPicker;
    use crate::platform::Platform;
    use crate::pool::{normalize_base_path, HttpPool, DEFAULT_BASE_PATH};
    use crate::testing::test_async;
    use std::sync::Arc;
    use std::time::Duration;

    fn keys() -> Vec<String> {
        (0..500).map(|i| format!("key-{}", i)).collect()
    }

    #[test]
    fn the_local_node_is_never_picked() {
        let pool = HttpPool::new("http://node-a:8001");
        pool.set_peers(&["http://node-a:8001", "http://node-b:8001", "http://node-c:8001"]);

        let mut local = 0;
        for key in keys() {
            match pool.owner(&key) {
                Some(getter) => assert_ne!(getter.peer(), "http://node-a:8001"),
                None => local += 1,
            }
        }

        // Roughly a third of the keys belong to the local node...
        assert!(local > 50 && local < 300, "Unexpected local keys: {}", local);
    }

    #[test]
    fn an_empty_pool_loads_everything_locally() {
        let pool = HttpPool::new("http://node-a:8001");
        assert!(keys().iter().all(|key| pool.pick_peer(key).is_none()));

        // A cluster consisting of the local node only behaves the same...
        pool.set_peers(&["http://node-a:8001/"]);
        assert!(keys().iter().all(|key| pool.pick_peer(key).is_none()));
    }

    #[test]
    fn set_peers_replaces_the_whole_topology() {
        let pool = HttpPool::new("http://node-a:8001");
        pool.set_peers(&["http://node-a:8001", "http://node-b:8001"]);
        pool.set_peers(&["http://node-a:8001", "http://node-c:8001"]);

        for key in keys() {
            if let Some(getter) = pool.owner(&key) {
                assert_eq!(getter.peer(), "http://node-c:8001");
            }
        }
    }

    #[test]
    fn all_nodes_agree_on_the_owner_of_a_key() {
        let nodes = ["http://node-a:8001", "http://node-b:8001", "http://node-c:8001"];
        let pools: Vec<HttpPool> = nodes
            .iter()
            .map(|node| {
                let pool = HttpPool::new(node);
                pool.set_peers(&nodes);
                pool
            })
            .collect();

        for key in keys() {
            // Exactly one node considers itself the owner, all others point to it...
            let owners: Vec<String> = pools
                .iter()
                .zip(nodes.iter())
                .map(|(pool, node)| {
                    pool.owner(&key)
                        .map(|getter| getter.peer().to_owned())
                        .unwrap_or_else(|| node.to_string())
                })
                .collect();
            assert!(owners.iter().all(|owner| owner == &owners[0]));
        }
    }

    #[test]
    fn urls_are_percent_encoded() {
        let pool = HttpPool::new("http://node-a:8001");
        pool.set_peers(&["http://node-a:8001", "http://node-b:8001"]);

        let getter = keys().iter().find_map(|key| pool.owner(key)).unwrap();
        assert_eq!(
            getter.url("scores", "Tom Smith/1"),
            "http://node-b:8001/_peercache/scores/Tom%20Smith%2F1"
        );
        assert_eq!(
            getter.url("my-group", "a.b_c~d"),
            "http://node-b:8001/_peercache/my-group/a.b_c~d"
        );
    }

    #[test]
    fn a_node_missing_from_its_peers_never_picks_a_peer() {
        let pool = HttpPool::new("http://localhost:8001");
        pool.set_peers(&["http://127.0.0.1:8001", "http://node-b:8001"]);
        assert!(keys().iter().all(|key| pool.owner(key).is_none()));

        // Once listed under its own URL, the keys are distributed again...
        pool.set_peers(&["http://localhost:8001", "http://node-b:8001"]);
        assert!(keys().iter().any(|key| pool.owner(key).is_some()));
    }

    #[test]
    fn the_local_url_is_never_guessed() {
        test_async(async {
            let platform = Platform::new();
            let config = Arc::new(Config::new("test.yml"));
            platform.register::<Config>(config.clone());
            config
                .load_from_string(
                    "
server:
    port: 18091
peers:
    nodes:
        - http://127.0.0.1:18091
",
                    None,
                )
                .unwrap();

            let pool = HttpPool::install(&platform);
            assert_eq!(pool.self_url(), None);
            assert!(keys().iter().all(|key| pool.pick_peer(key).is_none()));

            platform.terminate();
        });
    }

    #[test]
    fn base_paths_are_normalized() {
        assert_eq!(normalize_base_path("_cache"), "/_cache/");
        assert_eq!(normalize_base_path("/_cache/"), "/_cache/");
        assert_eq!(normalize_base_path(""), "/");
        assert_eq!(HttpPool::new("http://a").base_path(), DEFAULT_BASE_PATH);
    }

    #[test]
    fn the_pool_follows_config_changes() {
        test_async(async {
            let platform = Platform::new();
            let config = Arc::new(Config::new("test.yml"));
            platform.register::<Config>(config.clone());
            config
                .load_from_string(
                    "
peers:
    self: http://node-a:8001
    base_path: /cache
    nodes:
        - http://node-a:8001
",
                    None,
                )
                .unwrap();

            let pool = HttpPool::install(&platform);
            assert_eq!(pool.self_url().as_deref(), Some("http://node-a:8001"));
            assert_eq!(pool.base_path(), "/cache/");
            assert!(keys().iter().all(|key| pool.owner(key).is_none()));

            config
                .load_from_string(
                    "
peers:
    self: http://node-a:8001
    base_path: /cache
    nodes:
        - http://node-a:8001
        - http://node-b:8001
",
                    None,
                )
                .unwrap();

            let mut attempts = 0;
            while keys().iter().all(|key| pool.owner(key).is_none()) {
                attempts += 1;
                assert!(attempts < 100, "The topology was never updated");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            let getter = keys().iter().find_map(|key| pool.owner(key)).unwrap();
            assert_eq!(getter.peer(), "http://node-b:8001");
            assert_eq!(
                getter.url("scores", "Tom"),
                "http://node-b:8001/cache/scores/Tom"
            );

            platform.terminate();
        });
    }
}
