//! MST node and entry types: the wire-level content of a single persisted
//! block.
//!
//! A node is an ordered sequence of [`Entry`] values. There is no separate
//! "left pointer" field: a subtree pointer that covers everything below the
//! first leaf is simply the first element of the sequence. This keeps the
//! wire shape a single tagged-union list rather than a map with reserved
//! keys.

use libipld::cid::Cid;
use libipld::codec::Codec;
use libipld::Ipld;
use thiserror::Error;

use crate::hash::leading_zeros_on_hash;

/// Errors decoding or addressing a node.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("node is not a CBOR list")]
    NotAList,
    #[error("leaf entry is not a two-element [key, value] tuple")]
    InvalidLeafShape,
    #[error("leaf key is not a string")]
    InvalidLeafKey,
    #[error("entry is neither a leaf tuple nor a bare CID link")]
    InvalidEntryShape,
    #[error("CBOR encode error: {0}")]
    Encode(String),
    #[error("CBOR decode error: {0}")]
    Decode(String),
    #[error("CID error: {0}")]
    Cid(String),
    #[error("node has no leaves and no layer hint was supplied")]
    LayerUnknown,
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// One element of a node's ordered sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A stored key/value pair, directly owned by this node's layer.
    Leaf { key: String, value: Cid },
    /// A pointer to a subtree one layer below, covering the key range
    /// between its neighboring leaves (or unbounded at either end).
    Subtree(Cid),
}

impl Entry {
    pub fn as_leaf(&self) -> Option<(&str, Cid)> {
        match self {
            Entry::Leaf { key, value } => Some((key.as_str(), *value)),
            Entry::Subtree(_) => None,
        }
    }

    pub fn as_subtree(&self) -> Option<Cid> {
        match self {
            Entry::Subtree(cid) => Some(*cid),
            Entry::Leaf { .. } => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Entry::Leaf { .. })
    }

    fn to_ipld(&self) -> Ipld {
        match self {
            Entry::Leaf { key, value } => {
                Ipld::List(vec![Ipld::String(key.clone()), Ipld::Link(*value)])
            }
            Entry::Subtree(cid) => Ipld::Link(*cid),
        }
    }

    fn from_ipld(ipld: &Ipld) -> Result<Self> {
        match ipld {
            Ipld::Link(cid) => Ok(Entry::Subtree(*cid)),
            Ipld::List(items) => {
                if items.len() != 2 {
                    return Err(NodeError::InvalidLeafShape);
                }
                let key = match &items[0] {
                    Ipld::String(s) => s.clone(),
                    _ => return Err(NodeError::InvalidLeafKey),
                };
                let value = match &items[1] {
                    Ipld::Link(cid) => *cid,
                    _ => return Err(NodeError::InvalidLeafShape),
                };
                Ok(Entry::Leaf { key, value })
            }
            _ => Err(NodeError::InvalidEntryShape),
        }
    }
}

/// An ordered sequence of [`Entry`] values, persisted as a single block.
///
/// `Node` carries no layer field on the wire. The layer of a node is either
/// known by the caller (threaded down through recursive descent) or, for a
/// root loaded cold, inferred from the first leaf it contains.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    pub entries: Vec<Entry>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The entry at position `i`, or `None` if out of bounds.
    pub fn get_entry(&self, i: usize) -> Option<&Entry> {
        self.entries.get(i)
    }

    /// Index of the first leaf entry whose key is `>= key`, or `entries.len()`
    /// if no such leaf exists. Subtree pointers are skipped by the search but
    /// still occupy positions in the returned index space.
    pub fn find_gt_or_equal_leaf_index(&self, key: &str) -> usize {
        for (i, entry) in self.entries.iter().enumerate() {
            if let Entry::Leaf { key: k, .. } = entry {
                if k.as_str() >= key {
                    return i;
                }
            }
        }
        self.entries.len()
    }

    /// Infer this node's layer from the leading-zero count of its first leaf
    /// key. Fails if the node holds only subtree pointers (or is empty).
    pub fn infer_layer(&self) -> Result<u32> {
        self.entries
            .iter()
            .find_map(Entry::as_leaf)
            .map(|(k, _)| leading_zeros_on_hash(k))
            .ok_or(NodeError::LayerUnknown)
    }

    fn to_ipld(&self) -> Ipld {
        Ipld::List(self.entries.iter().map(Entry::to_ipld).collect())
    }

    fn from_ipld(ipld: &Ipld) -> Result<Self> {
        match ipld {
            Ipld::List(items) => {
                let entries = items
                    .iter()
                    .map(Entry::from_ipld)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self { entries })
            }
            _ => Err(NodeError::NotAList),
        }
    }

    /// Serialize to canonical DAG-CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        libipld_cbor::DagCborCodec
            .encode(&self.to_ipld())
            .map_err(|e| NodeError::Encode(e.to_string()))
    }

    /// Decode from DAG-CBOR bytes produced by [`Node::to_cbor`].
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let ipld = libipld_cbor::DagCborCodec
            .decode(bytes)
            .map_err(|e| NodeError::Decode(e.to_string()))?;
        Self::from_ipld(&ipld)
    }

    /// The CID this node would have if persisted now. Equal nodes always
    /// yield equal CIDs (content addressing, spec invariant 5).
    pub fn cid(&self) -> Result<Cid> {
        use sha2::{Digest, Sha256};
        let bytes = self.to_cbor()?;
        let hash = Sha256::digest(&bytes);
        let multihash = libipld::multihash::Multihash::wrap(0x12, &hash)
            .map_err(|e| NodeError::Cid(e.to_string()))?;
        Ok(Cid::new_v1(0x71, multihash))
    }
}
