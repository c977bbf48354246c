//! # Engine Error Kinds
//!
//! Distinguished error conditions reported by the B-tree engine. These are
//! the errors callers are expected to branch on: an insert that collides
//! with an existing key, a delete of an absent key, a mutation attempted
//! against a read-only snapshot root.
//!
//! All engine entry points return [`eyre::Result`]; a `TreeError` travels
//! inside the report and is recovered with `downcast_ref`:
//!
//! ```ignore
//! match tree.insert(tag, root, key, value, false) {
//!     Err(e) if e.downcast_ref::<TreeError>() == Some(&TreeError::KeyAlreadyExists) => {
//!         tree.insert(tag, root, key, value, true)?;
//!     }
//!     other => other?,
//! }
//! ```
//!
//! Allocator failures are not represented here; they propagate verbatim
//! through every frame as whatever error the allocator produced.

use thiserror::Error;

/// Semantic error kinds surfaced by tree operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Insert with `replace = false` hit a key already present in the tree.
    #[error("key already exists")]
    KeyAlreadyExists,

    /// Delete or lookup could not locate the target key.
    #[error("key not found")]
    KeyNotFound,

    /// A mutating operation was invoked on a root whose block is marked
    /// read-only in the allocator. Clone the root first.
    #[error("root block is immutable")]
    RootImmutable,

    /// Key is empty or exceeds the tree's configured `max_key_size`.
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    /// Value length differs from the tree's configured `entry_size`.
    #[error("invalid value: length must equal entry size")]
    InvalidValue,

    /// Positional lookup rank is outside `[0, total_keys)`.
    #[error("rank out of range")]
    OutOfRange,

    /// Tree configuration rejected at open time.
    #[error("configuration error: {0}")]
    Configuration(&'static str),
}

impl TreeError {
    /// True when `err` carries this exact kind.
    pub fn matches(&self, err: &eyre::Report) -> bool {
        err.downcast_ref::<TreeError>() == Some(self)
    }
}
