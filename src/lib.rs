//! Content-addressed Merkle Search Tree (MST) core.
//!
//! This crate implements the deterministic, persistent key/value index used
//! as the authoritative structure inside an AT Protocol style repository.
//! Every structural change produces a new root CID, and a given key/value
//! set always yields the same root regardless of insertion order, because
//! each key's depth in the tree is derived from a hash of the key rather
//! than from insertion history.
//!
//! # Layout
//!
//! - [`hash`]: hash-driven layer assignment (`leading_zeros_on_hash`).
//! - [`node`]: the wire-level [`node::Node`]/[`node::Entry`] types and their
//!   DAG-CBOR encoding.
//! - [`store`]: the injected [`store::BlockStore`] capability, plus an
//!   in-memory reference implementation.
//! - [`mst`]: the [`mst::Mst`] handle and its operations (add, get, edit,
//!   split, merge, walk).
//!
//! # Scope
//!
//! Out of scope: the block store's own byte storage and CID computation
//! primitives (those are consumed, not reimplemented, beyond the in-memory
//! reference store), schema validation of stored blobs, commit/signature/
//! sync semantics, and any CLI or network surface.

pub mod hash;
pub mod mst;
pub mod node;
pub mod store;

pub use hash::leading_zeros_on_hash;
pub use mst::{Mst, MstError};
pub use node::{Entry, Node};
pub use store::{BlockStore, MemoryBlockStore, StoreError};
