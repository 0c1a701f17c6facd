//! Block store capability: the content-addressed persistence layer the MST
//! consumes but does not implement itself.

use std::collections::HashMap;

use async_trait::async_trait;
use libipld::cid::Cid;
use parking_lot::RwLock;
use thiserror::Error;

use crate::node::{Node, NodeError};

/// Errors surfaced by a [`BlockStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("block not found: {0}")]
    BlockNotFound(Cid),
    #[error(transparent)]
    Node(#[from] NodeError),
    /// Catch-all for a backing store's own I/O failures (disk, network,
    /// permissions, ...) that don't fit `BlockNotFound`/`Node`. A real
    /// `BlockStore` implementation should wrap its underlying error here
    /// rather than mis-reporting it as a missing block.
    #[error("block store I/O error: {0}")]
    Io(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The injected persistence capability an [`crate::mst::Mst`] handle is
/// built on. `put` must be idempotent: serializing and storing an equal
/// node always yields an equal CID. Implementations are expected to be
/// safely callable concurrently across independent handles; the core
/// never calls back into the store from within a lock it holds.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Serialize `node` to canonical bytes, store it, and return its CID.
    async fn put(&self, node: &Node) -> Result<Cid>;

    /// Fetch and decode the node previously stored at `cid`.
    async fn get(&self, cid: &Cid) -> Result<Node>;
}

/// A reference, in-memory [`BlockStore`]. Useful for tests and for
/// embedding the tree in a process that doesn't need durability. Dropping
/// this value drops every block it holds.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<Cid, Node>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blocks currently held (includes unreferenced
    /// intermediate nodes left behind by prior mutations; the store never
    /// garbage-collects on its own).
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put(&self, node: &Node) -> Result<Cid> {
        let cid = node.cid()?;
        self.blocks.write().entry(cid).or_insert_with(|| node.clone());
        tracing::trace!(%cid, entries = node.len(), "put node");
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Node> {
        let found = self.blocks.read().get(cid).cloned();
        found.ok_or_else(|| {
            tracing::debug!(%cid, "block not found");
            StoreError::BlockNotFound(*cid)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Entry;

    #[tokio::test]
    async fn put_is_idempotent() {
        let store = MemoryBlockStore::new();
        let node = Node::new();
        let cid_a = store.put(&node).await.unwrap();
        let cid_b = store.put(&node).await.unwrap();
        assert_eq!(cid_a, cid_b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_round_trips_put() {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(b"seed");
        let multihash = libipld::multihash::Multihash::wrap(0x12, &hash).unwrap();
        let value = Cid::new_v1(0x71, multihash);

        let store = MemoryBlockStore::new();
        let node = Node::with_entries(vec![Entry::Leaf { key: "k".into(), value }]);
        let cid = store.put(&node).await.unwrap();
        let fetched = store.get(&cid).await.unwrap();
        assert_eq!(fetched, node);
    }

    #[tokio::test]
    async fn get_missing_block_fails() {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(b"never-stored");
        let multihash = libipld::multihash::Multihash::wrap(0x12, &hash).unwrap();
        let absent = Cid::new_v1(0x71, multihash);

        let store = MemoryBlockStore::new();
        assert!(matches!(store.get(&absent).await, Err(StoreError::BlockNotFound(_))));
    }

    #[test]
    fn io_variant_wraps_an_arbitrary_source_error() {
        let source: Box<dyn std::error::Error + Send + Sync> =
            Box::new(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset"));
        let err = StoreError::Io(source);
        assert!(err.to_string().contains("peer reset"));
    }
}
