//! The storage seam between the library and a redis-compatible server.
//!
//! Everything the locks and proxies need from the server is captured by the
//! [`Backend`] trait: scalar get/set with optional expiry, deletion, prefix
//! scans, and an optimistic watched pipeline. The trait is implemented for a
//! plain [`redis::Connection`] and by the in-memory backend used in tests.

use crate::error::Result;

/// One queued write inside a [`Batch`].
#[derive(Clone, Debug)]
pub enum BatchOp {
    /// `SET key value [EX seconds]`.
    Set {
        /// Key to write.
        key: String,
        /// Raw payload.
        value: String,
        /// Optional expiry in seconds. A plain set drops any existing TTL.
        expire: Option<u64>,
    },
    /// `DEL key`.
    Del {
        /// Key to remove.
        key: String,
    },
    /// `EXPIRE key seconds`.
    Expire {
        /// Key whose TTL to set.
        key: String,
        /// Time to live in seconds.
        seconds: u64,
    },
}

/// An ordered list of writes applied atomically by [`Backend::exec`].
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub(crate) ops: Vec<BatchOp>,
}

impl Batch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no writes are queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queues a `SET`, optionally with an expiry in seconds.
    pub fn set(&mut self, key: &str, value: &str, expire: Option<u64>) {
        self.ops.push(BatchOp::Set {
            key: key.to_string(),
            value: value.to_string(),
            expire,
        });
    }

    /// Queues a `DEL`.
    pub fn del(&mut self, key: &str) {
        self.ops.push(BatchOp::Del {
            key: key.to_string(),
        });
    }

    /// Queues an `EXPIRE`.
    pub fn expire(&mut self, key: &str, seconds: u64) {
        self.ops.push(BatchOp::Expire {
            key: key.to_string(),
            seconds,
        });
    }
}

/// Operations the locks and proxies require from the key/value server.
///
/// The watched pipeline follows the redis model: [`watch`](Backend::watch)
/// marks keys, reads performed afterwards observe a snapshot the server will
/// verify, and [`exec`](Backend::exec) applies the queued batch only if none
/// of the watched keys changed in between. An invalidated watch is reported
/// as `Ok(false)`, not as an error; callers retry.
pub trait Backend {
    /// Returns the raw payload stored under `key`, if any.
    fn get(&mut self, key: &str) -> Result<Option<String>>;
    /// Stores `value` under `key`, optionally expiring after `expire` seconds.
    fn set(&mut self, key: &str, value: &str, expire: Option<u64>) -> Result<()>;
    /// Removes `key`.
    fn del(&mut self, key: &str) -> Result<()>;
    /// Returns true if `key` holds a value.
    fn exists(&mut self, key: &str) -> Result<bool>;
    /// Sets the TTL of `key`; returns false if the key does not exist.
    fn expire(&mut self, key: &str, seconds: u64) -> Result<bool>;
    /// Returns the TTL of `key` in seconds, `-1` without expiry, `-2` if the
    /// key does not exist.
    fn ttl(&mut self, key: &str) -> Result<i64>;
    /// Returns all keys matching `pattern` (a literal prefix followed by
    /// `*`), in scan order.
    fn keys_matching(&mut self, pattern: &str) -> Result<Vec<String>>;
    /// Marks `keys` for optimistic concurrency control until the next
    /// [`exec`](Backend::exec) or [`unwatch`](Backend::unwatch).
    fn watch(&mut self, keys: &[String]) -> Result<()>;
    /// Applies `batch` atomically. Returns false if a watched key changed
    /// since [`watch`](Backend::watch); the batch is discarded in that case.
    fn exec(&mut self, batch: Batch) -> Result<bool>;
    /// Drops the current watch set without executing anything.
    fn unwatch(&mut self) -> Result<()>;
    /// Removes every key of the selected database. Test support.
    fn flush_db(&mut self) -> Result<()>;
}

impl Backend for redis::Connection {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(redis::cmd("GET").arg(key).query(self)?)
    }

    fn set(&mut self, key: &str, value: &str, expire: Option<u64>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(seconds) = expire {
            cmd.arg("EX").arg(seconds);
        }
        cmd.query::<()>(self)?;
        Ok(())
    }

    fn del(&mut self, key: &str) -> Result<()> {
        redis::cmd("DEL").arg(key).query::<()>(self)?;
        Ok(())
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(redis::cmd("EXISTS").arg(key).query(self)?)
    }

    fn expire(&mut self, key: &str, seconds: u64) -> Result<bool> {
        Ok(redis::cmd("EXPIRE").arg(key).arg(seconds).query(self)?)
    }

    fn ttl(&mut self, key: &str) -> Result<i64> {
        Ok(redis::cmd("TTL").arg(key).query(self)?)
    }

    fn keys_matching(&mut self, pattern: &str) -> Result<Vec<String>> {
        let keys = redis::cmd("SCAN")
            .cursor_arg(0)
            .arg("MATCH")
            .arg(pattern)
            .clone()
            .iter::<String>(self)?
            .collect();
        Ok(keys)
    }

    fn watch(&mut self, keys: &[String]) -> Result<()> {
        redis::cmd("WATCH").arg(keys).query::<()>(self)?;
        Ok(())
    }

    fn exec(&mut self, batch: Batch) -> Result<bool> {
        if batch.is_empty() {
            // An empty pipeline would not hit the server at all, but the
            // EXEC round-trip is what reports watch invalidation.
            redis::cmd("MULTI").query::<()>(self)?;
            let committed: Option<redis::Value> = redis::cmd("EXEC").query(self)?;
            return Ok(committed.is_some());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &batch.ops {
            match op {
                BatchOp::Set {
                    key,
                    value,
                    expire: None,
                } => {
                    pipe.cmd("SET").arg(key).arg(value).ignore();
                }
                BatchOp::Set {
                    key,
                    value,
                    expire: Some(seconds),
                } => {
                    pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(seconds).ignore();
                }
                BatchOp::Del { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                BatchOp::Expire { key, seconds } => {
                    pipe.cmd("EXPIRE").arg(key).arg(seconds).ignore();
                }
            }
        }
        let committed: Option<redis::Value> = pipe.query(self)?;
        Ok(committed.is_some())
    }

    fn unwatch(&mut self) -> Result<()> {
        redis::cmd("UNWATCH").query::<()>(self)?;
        Ok(())
    }

    fn flush_db(&mut self) -> Result<()> {
        redis::cmd("FLUSHDB").query::<()>(self)?;
        Ok(())
    }
}
