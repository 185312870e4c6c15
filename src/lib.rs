//! # Hierarchical values and locks over a redis-compatible backend
//!
//! This crate stores arbitrary JSON values in a redis-compatible server
//! under dotted paths (e.g. `root.child.value`), splitting the namespace
//! into natural sections. Writing a nested mapping stores one leaf per
//! scalar; reading a node reassembles the mapping below it. Accessors
//! return lazy [`Proxy`] handles instead of values, so fetching only
//! happens on [`val`](Proxy::val).
//!
//! Locking works on the same hierarchy: acquiring a proxy (or a standalone
//! [`Lock`]) guards the node and its whole subtree, and locking below an
//! already held node simply re-enters it. The lock is keyed by process and
//! thread, holds no client-side state, spans processes through the shared
//! server, and every held key expires after a configurable timeout so a
//! crashed holder cannot deadlock the tree.
//!
//! Value operations are not implicitly locked; bracket them with
//! [`Proxy::guard`] where concurrent writers exist.
//!
//! ```
//! use treedis::{section, Pool};
//!
//! # fn main() -> treedis::Result<()> {
//! Pool::global().reload_in_memory();
//!
//! let sec = section("quality-control")?;
//! {
//!     let _guard = sec.guard()?;
//!     sec.set("value", &23, None)?;
//!     sec.set("subsection", &serde_json::json!({"a": 42}), None)?;
//!     assert_eq!(sec.get("value")?.val()?, serde_json::json!(23));
//!     assert_eq!(sec.get("subsection.a")?.val()?, serde_json::json!(42));
//! }
//!
//! // Accessing the subsection directly works fine too.
//! let sub = section("quality-control")?.get("subsection")?;
//! assert_eq!(sub.val()?, serde_json::json!({"a": 42}));
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
mod backend;
mod error;
mod lock;
mod memory;
pub mod path;
mod pool;
#[cfg(test)]
mod props;
mod proxy;
mod registry;
mod token;

pub use crate::backend::{Backend, Batch, BatchOp};
pub use crate::error::{Error, Result};
pub use crate::lock::{Guard, Lock};
pub use crate::memory::MemoryBackend;
pub use crate::pool::{Conn, Pool, PoolConfig};
pub use crate::proxy::{
    root, section, Proxy, ProxyOptions, LOCK_TREE_PREFIX, VALUE_TREE_PREFIX,
};
pub use crate::token::{LockToken, Owner};
