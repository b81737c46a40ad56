//! Defines how a [Group](crate::group::Group) talks to other nodes of the cluster.
//!
//! A group only relies on two small capabilities: a [PeerPicker] determines which node owns a
//! key and a [PeerGetter] fetches a value from that node. The HTTP based implementation of both
//! is provided by [HttpPool](crate::pool::HttpPool), but any other transport can be plugged in.
//!
//! # Examples
//! ```
//! # use std::sync::Arc;
//! # use bytes::Bytes;
//! # use peercache::peers::{PeerGetter, PeerPicker};
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl PeerGetter for Echo {
//!     async fn fetch(&self, group: &str, key: &str) -> anyhow::Result<Bytes> {
//!         Ok(Bytes::from(format!("{}/{}", group, key)))
//!     }
//! }
//!
//! struct Always(Arc<Echo>);
//!
//! impl PeerPicker for Always {
//!     fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
//!         Some(self.0.clone())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let picker = Always(Arc::new(Echo));
//! let peer = picker.pick_peer("Tom").unwrap();
//! assert_eq!(peer.fetch("scores", "Tom").await.unwrap(), "scores/Tom");
//! # }
//! ```
use std::sync::Arc;

use bytes::Bytes;

/// Determines the remote node which owns a key.
pub trait PeerPicker: Send + Sync {
    /// Returns the owning peer of the given key.
    ///
    /// Returns **None** if the key is owned by the local node itself or if no peers are known.
    /// The result has to be deterministic for a given topology.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Fetches values from a remote node.
#[async_trait::async_trait]
pub trait PeerGetter: Send + Sync {
    /// Fetches the value of the given key within the given group from the remote node.
    async fn fetch(&self, group: &str, key: &str) -> anyhow::Result<Bytes>;
}
