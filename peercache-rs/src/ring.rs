//! Provides a consistent hash ring which assigns keys to peers.
//!
//! Each peer is placed on the ring several times (once per **replica**, also known as virtual
//! node) so that keys are distributed evenly even for a small number of peers. To locate the
//! owner of a key, the key is hashed and the ring is searched for the first virtual node whose
//! hash is greater or equal. If there is no such node, the search wraps around to the first node
//! of the ring.
//!
//! Adding a peer to a ring of **n** peers only moves roughly **1/(n+1)** of all keys, as only the
//! segments in front of the new virtual nodes change their owner.
//!
//! Note that all nodes of a cluster must use the same hash function and the same peer names,
//! otherwise they won't agree on the owner of a key. By default, CRC32 (IEEE) is used.
//!
//! # Examples
//! ```
//! # use peercache::ring::HashRing;
//! let mut ring = HashRing::new(3);
//! ring.add(&["p1", "p2", "p3"]);
//!
//! // The lookup is deterministic...
//! let owner = ring.get("x").unwrap().to_owned();
//! assert_eq!(ring.get("x").unwrap(), owner);
//! assert_eq!(["p1", "p2", "p3"].contains(&owner.as_str()), true);
//!
//! // ..and an empty ring has no owner at all.
//! assert_eq!(HashRing::new(3).get("x"), None);
//! ```
use fnv::FnvHashMap;

/// Computes the position of a key (or virtual node) on the ring.
pub type HashFunction = fn(&[u8]) -> u32;

/// Maps keys to peers using consistent hashing.
pub struct HashRing {
    replicas: usize,
    hash: HashFunction,
    keys: Vec<u32>,
    nodes: FnvHashMap<u32, String>,
}

impl HashRing {
    /// Creates an empty ring which places each peer **replicas** times using CRC32.
    pub fn new(replicas: usize) -> Self {
        HashRing::with_hash(replicas, crc32fast::hash)
    }

    /// Creates an empty ring which uses the given hash function.
    ///
    /// # Examples
    /// ```
    /// # use peercache::ring::HashRing;
    /// // Interprets the data as plain number so that the placement is easy to follow...
    /// fn numeric(data: &[u8]) -> u32 {
    ///     std::str::from_utf8(data).unwrap().parse().unwrap()
    /// }
    ///
    /// let mut ring = HashRing::with_hash(3, numeric);
    /// // Yields the virtual nodes 2, 4, 6, 12, 14, 16, 22, 24, 26...
    /// ring.add(&["6", "4", "2"]);
    ///
    /// assert_eq!(ring.get("2"), Some("2"));
    /// assert_eq!(ring.get("11"), Some("2"));
    /// assert_eq!(ring.get("23"), Some("4"));
    /// // 27 is beyond the last node and therefore wraps around to 2...
    /// assert_eq!(ring.get("27"), Some("2"));
    /// ```
    pub fn with_hash(replicas: usize, hash: HashFunction) -> Self {
        HashRing {
            replicas,
            hash,
            keys: Vec::new(),
            nodes: FnvHashMap::default(),
        }
    }

    /// Adds the given peers to the ring.
    pub fn add<S: AsRef<str>>(&mut self, peers: &[S]) {
        for peer in peers {
            let peer = peer.as_ref();
            for replica in 0..self.replicas {
                let hash = (self.hash)(format!("{}{}", replica, peer).as_bytes());
                self.keys.push(hash);
                let _ = self.nodes.insert(hash, peer.to_owned());
            }
        }

        self.keys.sort_unstable();
    }

    /// Returns the peer which owns the given key or **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = self.keys.partition_point(|node| *node < hash) % self.keys.len();

        self.nodes.get(&self.keys[index]).map(|peer| peer.as_str())
    }

    /// Returns the number of virtual nodes on the ring.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Determines if no peer has been added yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
