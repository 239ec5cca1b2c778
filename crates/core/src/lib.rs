//! Concord core library.
//!
//! This crate provides the building blocks for replicas that edit the same
//! content independently and converge afterwards: a reversible patch
//! algebra, a structural tree differencer, a pluggable conflict resolution
//! chain, and a bitemporal version store, all persisted in SQLite.

pub mod clock;
pub mod config;
pub mod conflict;
pub mod db;
pub mod edit;
pub mod errors;
pub mod models;
pub mod patch;
pub mod temporal;
pub mod tree_diff;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{ChainOutcome, ConflictReview, ResolutionChain};
pub use db::Database;
pub use edit::{LineEdit, TreeEdit, TreePath};
pub use errors::CoreError;
pub use patch::PatchEngine;
pub use temporal::{TimeQuery, ValidInterval, VersionStore};
pub use tree_diff::TreeDiff;
