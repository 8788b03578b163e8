//! Strata RevTree
//!
//! The revision-tree half of the Strata revision engine: a per-document tree
//! of revisions linked by parent pointers, with insertion (single and
//! with-history), depth-limited pruning, explicit purging, priority sorting,
//! conflict detection, per-remote revision pointers, and a packed binary
//! codec for the record "extra" column.
//!
//! Revisions live in an arena (`Vec<Rev>`) addressed by [`RevIdx`]; parent
//! links and remote pointers hold indices, never references, so compaction
//! is plain index rewriting.

pub mod raw;
pub mod rev;
pub mod tree;

pub use rev::{Rev, RevFlags, RevIdx};
pub use tree::{InsertError, Inserted, RevTree};

/// Default depth limit applied when pruning a tree on save.
pub const DEFAULT_PRUNE_DEPTH: u32 = 20;
