//! Contains the HTTP endpoint which serves cached values to the other nodes of the cluster.
//!
//! Opens a server socket on the specified port (**server.port** in the config or 8001 as
//! fallback) and binds it to the selected IP (**server.host** in the config or 0.0.0.0 as
//! fallback). Each request has to look like **GET &lt;base_path&gt;&lt;group&gt;/&lt;key&gt;**
//! where both, the group and the key are percent encoded. The base path is determined by the
//! [HttpPool](crate::pool::HttpPool) (**/_peercache/** by default).
//!
//! The following responses are sent:
//! * **200**: the raw bytes of the value as **application/octet-stream**.
//! * **400**: the path is outside of the base path or doesn't contain a group and a key.
//! * **404**: the group is unknown (**no such group: &lt;name&gt;**).
//! * **500**: the value couldn't be loaded. The body contains the error message.
//!
//! Note that in order to achieve zero downtime, the server will periodically try to bind the
//! socket to the selected port, therefore a "new" instance can be started and the "old" one can
//! bleed out and the port will be "handed through" with minimal downtime. Also, this will listen
//! to change events of the config and will relocate to another port or host if changed.
//!
//! # Example
//!
//! ```no_run
//! use peercache::builder::Builder;
//! use peercache::config::Config;
//! use peercache::server::PeerServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     //  Setup and create a platform...
//!     let platform = Builder::new().enable_all().build().await;
//!
//!     // Specify a minimal config so that we run on a different port than a
//!     // production instance.
//!     platform.require::<Config>().load_from_string("
//!         server:
//!             port: 1503
//!     ", None).unwrap();
//!
//!     // Run the platform...
//!     platform.require::<PeerServer>().event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, StatusCode};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::group::GroupRegistry;
use crate::platform::Platform;
use crate::pool::{HttpPool, DEFAULT_BASE_PATH};
use crate::spawn;

/// Contains the port used if none is configured.
pub const DEFAULT_PORT: u16 = 8001;

/// Specifies the timeout when waiting for a config change.
///
/// When waiting for a change we need to interrupt this every once in a while so that
/// we can check if the platform has been shut down.
const CONFIG_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Serves the groups of the local node via HTTP.
pub struct PeerServer {
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    platform: Arc<Platform>,
}

impl PeerServer {
    /// Creates and installs a **PeerServer** into the given **Platform**.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    ///
    /// Also note, that this will not technically start the server. This has to be done manually
    /// via [event_loop](PeerServer::event_loop) as it is most probably done in the main thread.
    pub fn install(platform: &Arc<Platform>) -> Arc<Self> {
        let server = Arc::new(PeerServer {
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            platform: platform.clone(),
        });

        platform.register::<PeerServer>(server.clone());

        server
    }

    /// Determines if the server socket should keep listening for incoming requests.
    ///
    /// In contrast to **Platform::is_running** this is not used to control the shutdown of the
    /// server. Rather we toggle this flag to false if a config and therefore address change was
    /// detected. This way the current server will shut down and a new server socket for the
    /// appropriate address will be setup by the **event_loop**.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the address the server is currently bound to.
    pub fn current_address(&self) -> Option<String> {
        self.current_address.lock().clone()
    }

    /// Determines the server address based on the current configuration.
    ///
    /// If no, an invalid or a partial config is present, fallback values are used. By default we
    /// use port 8001 and bind to "0.0.0.0".
    fn address(&self) -> String {
        self.platform
            .find::<Config>()
            .map(|config| {
                let handle = config.current();
                format!(
                    "{}:{}",
                    handle.query("server.host").as_str().unwrap_or("0.0.0.0"),
                    handle
                        .query("server.port")
                        .as_i64()
                        .filter(|port| port > &0 && port <= &(u16::MAX as i64))
                        .unwrap_or(DEFAULT_PORT as i64)
                )
            })
            .unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_PORT))
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by test scenarios where the tests itself run in the main thread.
    pub fn fork(server: &Arc<PeerServer>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the server socket is bound.
    ///
    /// Just like **fork** this is intended to be used in test environments.
    pub async fn fork_and_await(server: &Arc<PeerServer>) {
        PeerServer::fork(server);

        while server.current_address().is_none() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Tries to open a server socket on the specified address to serve incoming requests.
    ///
    /// The task of this loop is to bind the server socket to the specified address. Once this was
    /// successful, we serve requests until either the platform is no longer running and we should
    /// exit, or the config has changed and we should try to bind the server to the new address.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported = Instant::now();

        while self.platform.is_running() {
            // If the sever is started for the first time or if it has been restarted due to a
            // config change, we need to reload the address...
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match PeerServer::bind(&address).await {
                Ok(incoming) => {
                    log::info!("Opened server socket on {}...", &address);
                    *self.current_address.lock() = Some(address.clone());
                    self.server_loop(incoming).await;
                    *self.current_address.lock() = None;
                    log::info!("Closing server socket on {}.", &address);
                }
                Err(error) => {
                    // If we were unable to bind to the server, we log this every once in a while
                    // (every 5s). Otherwise we would jam the log as re retry every 500ms.
                    if last_bind_error_reported.elapsed().as_secs() > 5 {
                        log::error!(
                            "Cannot open server address: {} ({:#}). Retrying every 500ms...",
                            &address,
                            error
                        );
                        last_bind_error_reported = Instant::now();
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    async fn bind(address: &str) -> anyhow::Result<hyper::server::Builder<AddrIncoming>> {
        let listener = TcpListener::bind(address).await?;
        let builder = hyper::Server::from_tcp(listener.into_std()?)?;

        Ok(builder)
    }

    /// Serves incoming requests until the platform stops or the server address changes.
    async fn server_loop(&self, incoming: hyper::server::Builder<AddrIncoming>) {
        let platform = self.platform.clone();
        let make_service = make_service_fn(move |_conn| {
            let platform = platform.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    handle_request(platform.clone(), request)
                }))
            }
        });

        let server = incoming
            .serve(make_service)
            .with_graceful_shutdown(self.await_shutdown());
        if let Err(error) = server.await {
            log::error!("An error occurred while serving requests: {}", error);
        }
    }

    /// Completes once the platform is terminated or the server address has changed.
    async fn await_shutdown(&self) {
        let mut config_changed_flag = self.platform.find::<Config>().map(|config| config.notifier());

        while self.platform.is_running() && self.is_running() {
            let changed = match config_changed_flag.as_mut() {
                // We use a timeout here so that the while condition (esp. platform.is_running())
                // is checked every once in a while...
                Some(notifier) => matches!(
                    tokio::time::timeout(CONFIG_WAIT_TIMEOUT, notifier.recv()).await,
                    Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_)))
                ),
                None => {
                    tokio::time::sleep(CONFIG_WAIT_TIMEOUT).await;
                    false
                }
            };

            // If the config was changed, we need to check if the address itself changed...
            if changed && self.current_address().as_deref() != Some(self.address().as_str()) {
                log::info!("Server address has changed. Restarting server socket...");

                // Force the event_loop to re-evaluate the expected server address...
                self.running.store(false, Ordering::Release);
            }
        }
    }
}

/// Splits a request path into its group and key.
fn parse_path(path: &str, base_path: &str) -> Option<(String, String)> {
    let (group, key) = path.strip_prefix(base_path)?.split_once('/')?;
    if group.is_empty() || key.is_empty() {
        return None;
    }

    let group = percent_decode_str(group).decode_utf8().ok()?;
    let key = percent_decode_str(key).decode_utf8().ok()?;

    Some((group.into_owned(), key.into_owned()))
}

fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;

    response
}

async fn handle_request(
    platform: Arc<Platform>,
    request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let base_path = platform
        .find::<HttpPool>()
        .map(|pool| pool.base_path())
        .unwrap_or_else(|| DEFAULT_BASE_PATH.to_owned());

    log::debug!("{} {}", request.method(), request.uri().path());

    let (group_name, key) = match parse_path(request.uri().path(), &base_path) {
        Some(group_and_key) => group_and_key,
        None => return Ok(respond(StatusCode::BAD_REQUEST, "bad request")),
    };

    let group = match platform
        .find::<GroupRegistry>()
        .and_then(|registry| registry.lookup_group(&group_name))
    {
        Some(group) => group,
        None => {
            return Ok(respond(
                StatusCode::NOT_FOUND,
                format!("no such group: {}", group_name),
            ))
        }
    };

    match group.get(&key).await {
        Ok(value) => {
            let mut response = respond(StatusCode::OK, value.byte_slice());
            let _ = response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            Ok(response)
        }
        Err(error) => Ok(respond(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::group::{loader_fn, GroupRegistry};
    use crate::peers::PeerGetter;
    use crate::platform::Platform;
    use crate::pool::HttpPool;
    use crate::server::{parse_path, PeerServer};
    use crate::testing::test_async;
    use hyper::{Client, StatusCode, Uri};
    use std::sync::Arc;

    const PORT_A: u16 = 18071;
    const PORT_B: u16 = 18072;

    /// Starts a node which tags every locally loaded value with its name.
    async fn start_node(name: &'static str, port: u16) -> (Arc<Platform>, Arc<HttpPool>) {
        let platform = Platform::new();
        let config = Arc::new(Config::new("test.yml"));
        platform.register::<Config>(config.clone());
        config
            .load_from_string(
                &format!(
                    "
server:
    host: 127.0.0.1
    port: {}
peers:
    self: http://127.0.0.1:{}
    nodes:
        - http://127.0.0.1:{}
        - http://127.0.0.1:{}
",
                    port, port, PORT_A, PORT_B
                ),
                None,
            )
            .unwrap();

        let registry = GroupRegistry::install(&platform);
        let pool = HttpPool::install(&platform);
        let group = registry
            .create_group(
                "scores",
                2048,
                loader_fn(move |key| {
                    if key.starts_with("missing") {
                        Err(anyhow::anyhow!("{} not exist", key))
                    } else {
                        Ok(format!("{}:{}", name, key).into_bytes())
                    }
                }),
            )
            .unwrap();
        group.register_peers(pool.clone());

        PeerServer::fork_and_await(&PeerServer::install(&platform)).await;

        (platform, pool)
    }

    async fn get(url: &str) -> (StatusCode, String) {
        let response = Client::new()
            .get(url.parse::<Uri>().unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();

        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn paths_are_split_and_decoded() {
        assert_eq!(
            parse_path("/_peercache/scores/Tom", "/_peercache/"),
            Some(("scores".to_owned(), "Tom".to_owned()))
        );
        assert_eq!(
            parse_path("/_peercache/my%20group/Tom%20Smith%2F1", "/_peercache/"),
            Some(("my group".to_owned(), "Tom Smith/1".to_owned()))
        );
        assert_eq!(
            parse_path("/_peercache/scores/a/b", "/_peercache/"),
            Some(("scores".to_owned(), "a/b".to_owned()))
        );
        assert_eq!(parse_path("/_peercache/scores", "/_peercache/"), None);
        assert_eq!(parse_path("/_peercache/scores/", "/_peercache/"), None);
        assert_eq!(parse_path("/other/scores/Tom", "/_peercache/"), None);
        assert_eq!(parse_path("/_peercache/scores/%FF", "/_peercache/"), None);
    }

    #[test]
    fn integration_test() {
        // We want exclusive access to our test ports...
        log::info!("Acquiring shared resources...");
        let _guard = crate::testing::SHARED_TEST_RESOURCES.lock().unwrap();
        log::info!("Successfully acquired shared resources.");

        test_async(async {
            let (platform_a, pool_a) = start_node("a", PORT_A).await;
            let (platform_b, _) = start_node("b", PORT_B).await;
            let group_a = platform_a
                .require::<GroupRegistry>()
                .lookup_group("scores")
                .unwrap();

            // Each key is loaded by its owner, no matter which node is asked...
            let mut remote_keys = 0;
            for i in 0..20 {
                let key = format!("key-{}", i);
                let value = group_a.get(&key).await.unwrap().to_string();
                if pool_a.owner(&key).is_some() {
                    remote_keys += 1;
                    assert_eq!(value, format!("b:{}", key));
                } else {
                    assert_eq!(value, format!("a:{}", key));
                }
            }
            assert!(remote_keys > 0);
            assert_eq!(group_a.stats().peer_loads, remote_keys);

            // Keys are percent encoded on the wire...
            let getter = (0..100)
                .find_map(|i| pool_a.owner(&format!("key-{}", i)))
                .unwrap();
            let value = getter.fetch("scores", "Tom Smith/1").await.unwrap();
            assert_eq!(value, "b:Tom Smith/1");

            // Errors are reported with an appropriate status...
            let base = format!("http://127.0.0.1:{}/_peercache/", PORT_B);
            assert_eq!(
                get(&format!("{}scores/Tom", base)).await,
                (StatusCode::OK, "b:Tom".to_owned())
            );
            assert_eq!(
                get(&format!("{}names/Tom", base)).await,
                (StatusCode::NOT_FOUND, "no such group: names".to_owned())
            );
            assert_eq!(
                get(&format!("{}scores", base)).await,
                (StatusCode::BAD_REQUEST, "bad request".to_owned())
            );
            assert_eq!(
                get(&format!("{}scores/missing-1", base)).await,
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "missing-1 not exist".to_owned()
                )
            );
            assert!(getter.fetch("scores", "missing-2").await.is_err());

            // A failing peer is bypassed by loading the value locally...
            platform_b.terminate();
            let key = (0..100)
                .map(|i| format!("other-{}", i))
                .find(|key| pool_a.owner(key).is_some())
                .unwrap();
            assert_eq!(
                group_a.get(&key).await.unwrap().to_string(),
                format!("a:{}", key)
            );
            assert_eq!(group_a.stats().peer_errors, 1);

            platform_a.terminate();
        });
    }
}
