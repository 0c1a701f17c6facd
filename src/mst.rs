//! Merkle Search Tree operations: add, get, edit, split, merge, and walk.
//!
//! An [`Mst`] handle owns a single persisted [`Node`] plus the layer it
//! lives at. There are no back-pointers to parents: a subtree reached via
//! [`Mst::load`] is an independent value, consistent with an immutable,
//! bottom-up re-persistence model where mutations always rebuild from the
//! leaves up. Every mutating method leaves `self` pointing at the newly
//! persisted node and returns its CID; on failure the caller still holds
//! the previous root CID.

use std::sync::Arc;

use async_recursion::async_recursion;
use libipld::cid::Cid;
use thiserror::Error;

use crate::hash::leading_zeros_on_hash;
use crate::node::{Entry, Node, NodeError};
use crate::store::{BlockStore, StoreError};

/// Errors an MST operation can fail with.
#[derive(Error, Debug)]
pub enum MstError {
    #[error("key already exists: {0}")]
    KeyExists(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("node has no leaves and no layer hint was supplied")]
    LayerUnknown,
    #[error("mergeIn requires both trees at the same layer ({self_layer} != {other_layer})")]
    LayerMismatch { self_layer: u32, other_layer: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Node(#[from] NodeError),
}

pub type Result<T> = std::result::Result<T, MstError>;

/// A nested, serializable view of a subtree, suitable for golden-file style
/// assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structure {
    Leaf { key: String, value: Cid },
    Subtree { layer: u32, cid: Cid, children: Vec<Structure> },
}

/// In-memory handle onto a persisted MST node.
pub struct Mst {
    store: Arc<dyn BlockStore>,
    cid: Cid,
    node: Node,
    layer: u32,
}

impl Mst {
    /// Create a new, empty tree at the given layer.
    pub async fn create(store: Arc<dyn BlockStore>, layer: u32) -> Result<Self> {
        Self::from_data(store, Node::new(), layer).await
    }

    /// Load a handle from a known CID. `layer` must be supplied unless the
    /// node is known to contain at least one leaf: a node of only subtree
    /// pointers cannot infer its own layer.
    pub async fn load(store: Arc<dyn BlockStore>, cid: Cid, layer: Option<u32>) -> Result<Self> {
        let node = store.get(&cid).await?;
        let layer = match layer {
            Some(l) => l,
            None => node.infer_layer().map_err(|_| MstError::LayerUnknown)?,
        };
        Ok(Self { store, cid, node, layer })
    }

    /// Persist `node` at `layer` and return a handle pointing at it.
    pub async fn from_data(store: Arc<dyn BlockStore>, node: Node, layer: u32) -> Result<Self> {
        let cid = store.put(&node).await?;
        Ok(Self { store, cid, node, layer })
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    async fn put(&mut self) -> Result<Cid> {
        let cid = self.store.put(&self.node).await?;
        self.cid = cid;
        tracing::debug!(%cid, layer = self.layer, entries = self.node.len(), "persisted node");
        Ok(cid)
    }

    async fn load_subtree(&self, cid: Cid, layer: u32) -> Result<Mst> {
        Mst::load(Arc::clone(&self.store), cid, Some(layer)).await
    }

    /// Fetch the value CID stored for `key`, recursing into subtrees as
    /// needed.
    #[async_recursion]
    pub async fn get(&self, key: &str) -> Result<Option<Cid>> {
        let i = self.node.find_gt_or_equal_leaf_index(key);
        if let Some((k, v)) = self.node.entries.get(i).and_then(Entry::as_leaf) {
            if k == key {
                return Ok(Some(v));
            }
        }
        if i > 0 {
            if let Some(p) = self.node.entries.get(i - 1).and_then(Entry::as_subtree) {
                let sub = self.load_subtree(p, self.layer.saturating_sub(1)).await?;
                return sub.get(key).await;
            }
        }
        Ok(None)
    }

    /// Insert `(key, value)`, failing if `key` already exists anywhere it
    /// naturally belongs. This is the central algorithm: depending on how
    /// `key`'s hash-derived layer compares to this node's layer, the new
    /// leaf either lands here, recurses into an existing or freshly
    /// created subtree below, or becomes part of a new root above.
    pub async fn add(&mut self, key: &str, value: Cid) -> Result<Cid> {
        let kz = leading_zeros_on_hash(key);
        let z = self.layer;
        if kz == z {
            self.add_here(key, value).await
        } else if kz < z {
            self.add_below(key, value).await
        } else {
            self.add_above(key, value, kz).await
        }
    }

    /// Case A: `kz == z`, the key belongs directly in this node.
    #[async_recursion]
    async fn add_here(&mut self, key: &str, value: Cid) -> Result<Cid> {
        let i = self.node.find_gt_or_equal_leaf_index(key);
        if let Some((k, _)) = self.node.entries.get(i).and_then(Entry::as_leaf) {
            if k == key {
                return Err(MstError::KeyExists(key.to_string()));
            }
        }
        let prev = if i > 0 { self.node.entries.get(i - 1).and_then(Entry::as_subtree) } else { None };
        match prev {
            Some(p) => {
                let sub = self.load_subtree(p, self.layer.saturating_sub(1)).await?;
                let (left, right) = sub.split_around(key).await?;
                let mut entries = Vec::with_capacity(self.node.entries.len() + 2);
                entries.extend_from_slice(&self.node.entries[..i - 1]);
                if let Some(l) = left {
                    entries.push(Entry::Subtree(l));
                }
                entries.push(Entry::Leaf { key: key.to_string(), value });
                if let Some(r) = right {
                    entries.push(Entry::Subtree(r));
                }
                entries.extend_from_slice(&self.node.entries[i..]);
                self.node = Node::with_entries(entries);
                self.put().await
            }
            None => {
                self.node.entries.insert(i, Entry::Leaf { key: key.to_string(), value });
                self.put().await
            }
        }
    }

    /// Case B: `kz < z`, the key belongs below the current layer.
    #[async_recursion]
    async fn add_below(&mut self, key: &str, value: Cid) -> Result<Cid> {
        let i = self.node.find_gt_or_equal_leaf_index(key);
        let prev = if i > 0 { self.node.entries.get(i - 1).and_then(Entry::as_subtree) } else { None };
        match prev {
            Some(p) => {
                let mut sub = self.load_subtree(p, self.layer.saturating_sub(1)).await?;
                let new_cid = sub.add(key, value).await?;
                self.node.entries[i - 1] = Entry::Subtree(new_cid);
                self.put().await
            }
            None => {
                let mut child = Mst::create(Arc::clone(&self.store), self.layer.saturating_sub(1)).await?;
                let child_cid = child.add(key, value).await?;
                self.node.entries.insert(i, Entry::Subtree(child_cid));
                self.put().await
            }
        }
    }

    /// Case C: `kz > z`, the key's natural layer sits above the current
    /// root, so the whole tree is pushed down.
    async fn add_above(&mut self, key: &str, value: Cid, kz: u32) -> Result<Cid> {
        let z = self.layer;
        let (left, right) = self.split_around(key).await?;
        let left = self.wrap_to_layer(left, z, kz - 1).await?;
        let right = self.wrap_to_layer(right, z, kz - 1).await?;

        let mut entries = Vec::with_capacity(3);
        if let Some(l) = left {
            entries.push(Entry::Subtree(l));
        }
        entries.push(Entry::Leaf { key: key.to_string(), value });
        if let Some(r) = right {
            entries.push(Entry::Subtree(r));
        }
        self.node = Node::with_entries(entries);
        self.layer = kz;
        self.put().await
    }

    /// Wrap `cid` (a node at `from_layer`) in successive single-entry
    /// wrapper nodes until it sits at `to_layer`, lifting the CID each time.
    /// A no-op if `to_layer <= from_layer`.
    async fn wrap_to_layer(&self, cid: Option<Cid>, from_layer: u32, to_layer: u32) -> Result<Option<Cid>> {
        let Some(mut current) = cid else { return Ok(None) };
        for _layer in (from_layer + 1)..=to_layer {
            let wrapper = Node::with_entries(vec![Entry::Subtree(current)]);
            current = self.store.put(&wrapper).await?;
        }
        Ok(Some(current))
    }

    /// Split this subtree around `key` into the roots of the strictly-less
    /// and strictly-greater halves. `key` is assumed absent at this layer.
    ///
    /// The terminal subtree pointer straddling `key`, if any, is replaced by
    /// its own recursively split halves rather than duplicated onto one
    /// side and left unsplit on the other.
    #[async_recursion]
    pub async fn split_around(&self, key: &str) -> Result<(Option<Cid>, Option<Cid>)> {
        let i = self.node.find_gt_or_equal_leaf_index(key);
        if i == 0 {
            return Ok((None, Some(self.cid)));
        }
        if i == self.node.len() {
            return Ok((Some(self.cid), None));
        }

        let mut left = Node::with_entries(self.node.entries[..i].to_vec());
        let mut right = Node::with_entries(self.node.entries[i..].to_vec());

        if let Some(p) = left.entries.last().and_then(Entry::as_subtree) {
            let sub = self.load_subtree(p, self.layer.saturating_sub(1)).await?;
            let (pl, pr) = sub.split_around(key).await?;
            left.entries.pop();
            if let Some(pl) = pl {
                left.entries.push(Entry::Subtree(pl));
            }
            if let Some(pr) = pr {
                right.entries.insert(0, Entry::Subtree(pr));
            }
        }

        let left_cid = self.store.put(&left).await?;
        let right_cid = self.store.put(&right).await?;
        Ok((Some(left_cid), Some(right_cid)))
    }

    /// Overwrite the value stored for `key`, failing if it is absent.
    #[async_recursion]
    pub async fn edit(&mut self, key: &str, value: Cid) -> Result<Cid> {
        let i = self.node.find_gt_or_equal_leaf_index(key);
        if let Some((k, _)) = self.node.entries.get(i).and_then(Entry::as_leaf) {
            if k == key {
                self.node.entries[i] = Entry::Leaf { key: key.to_string(), value };
                return self.put().await;
            }
        }
        if i > 0 {
            if let Some(p) = self.node.entries.get(i - 1).and_then(Entry::as_subtree) {
                let mut sub = self.load_subtree(p, self.layer.saturating_sub(1)).await?;
                let new_cid = sub.edit(key, value).await?;
                self.node.entries[i - 1] = Entry::Subtree(new_cid);
                return self.put().await;
            }
        }
        Err(MstError::KeyNotFound(key.to_string()))
    }

    /// Merge `other` (same layer) into `self`, with `other`'s values
    /// winning on key conflicts.
    #[async_recursion]
    pub async fn merge_in(&mut self, other: &Mst) -> Result<Cid> {
        if self.layer != other.layer {
            return Err(MstError::LayerMismatch { self_layer: self.layer, other_layer: other.layer });
        }

        let mut i = 0usize;
        for entry in other.node.entries.iter() {
            match entry {
                Entry::Leaf { key, value } => {
                    i = self.node.find_gt_or_equal_leaf_index(key);
                    match self.node.entries.get(i) {
                        Some(Entry::Leaf { key: k, .. }) if k == key => {
                            self.node.entries[i] = Entry::Leaf { key: key.clone(), value: *value };
                        }
                        _ => {
                            self.node.entries.insert(i, Entry::Leaf { key: key.clone(), value: *value });
                        }
                    }
                    i += 1;
                }
                Entry::Subtree(other_cid) => {
                    match self.node.entries.get(i) {
                        Some(Entry::Subtree(self_cid)) if self_cid == other_cid => {}
                        Some(Entry::Subtree(self_cid)) => {
                            let self_cid = *self_cid;
                            let mut self_sub = self.load_subtree(self_cid, self.layer.saturating_sub(1)).await?;
                            let other_sub = self.load_subtree(*other_cid, other.layer.saturating_sub(1)).await?;
                            let merged_cid = self_sub.merge_in(&other_sub).await?;
                            self.node.entries[i] = Entry::Subtree(merged_cid);
                        }
                        _ => {
                            self.node.entries.insert(i, Entry::Subtree(*other_cid));
                        }
                    }
                    i += 1;
                }
            }
        }
        self.put().await
    }

    /// In-order walk, calling `visitor(layer, key)` for every subtree
    /// pointer (`key = None`, called before descending) and every leaf
    /// (`key = Some(..)`).
    #[async_recursion]
    pub async fn walk<F>(&self, visitor: &mut F) -> Result<()>
    where
        F: FnMut(u32, Option<&str>) + Send,
    {
        for entry in &self.node.entries {
            match entry {
                Entry::Subtree(cid) => {
                    visitor(self.layer, None);
                    let sub = self.load_subtree(*cid, self.layer.saturating_sub(1)).await?;
                    sub.walk(visitor).await?;
                }
                Entry::Leaf { key, .. } => visitor(self.layer, Some(key)),
            }
        }
        Ok(())
    }

    /// A nested, serializable view of this subtree.
    #[async_recursion]
    pub async fn structure(&self) -> Result<Vec<Structure>> {
        let mut out = Vec::with_capacity(self.node.entries.len());
        for entry in &self.node.entries {
            match entry {
                Entry::Leaf { key, value } => {
                    out.push(Structure::Leaf { key: key.clone(), value: *value });
                }
                Entry::Subtree(cid) => {
                    let sub = self.load_subtree(*cid, self.layer.saturating_sub(1)).await?;
                    let children = sub.structure().await?;
                    out.push(Structure::Subtree { layer: sub.layer, cid: *cid, children });
                }
            }
        }
        Ok(out)
    }
}
