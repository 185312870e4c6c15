//! Optimistic, distributed, tree-aware lock.
//!
//! Locks are keyed by dotted paths. Locking a node guards its whole
//! subtree: an acquire anywhere below an already held node re-enters the
//! held node instead of creating a second key, so at most one key of any
//! ancestor chain is ever occupied. Re-entrancy is tracked server-side in
//! the token's depth counter, which keeps the lock object free of mutable
//! state and safe to use from any thread.
//!
//! Every operation first resolves its target key under a watched pipeline:
//! the whole ancestor chain is watched, scanned deepest first for an
//! occupied key, and the operation body commits with `EXEC`. If a
//! concurrent writer touches any chain key in between, the round is
//! discarded and retried. Plain pipelining is not enough here; the backend
//! must verify the watch at commit time.

use crate::backend::{Backend, Batch};
use crate::error::{Error, Result};
use crate::path;
use crate::token::{LockToken, Owner};
use std::time::Duration;
use tracing::{trace, warn};

/// Pause between polls of a foreign-held lock.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Poll budget per second of acquire timeout.
const POLLS_PER_SECOND: u64 = 20;

const DEFAULT_EXPIRE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// A distributed lock on a dotted-path key and the subtree below it.
pub struct Lock<C> {
    conn: C,
    key: String,
    chain: Vec<String>,
    expire_secs: u64,
    acquire_secs: u64,
}

enum Attempt {
    Acquired,
    Held,
}

impl<C: Backend> Lock<C> {
    /// Creates a lock with the default timeouts (30 s expire, 10 s acquire).
    pub fn new(conn: C, key: &str) -> Result<Self> {
        Self::with_timeouts(conn, key, DEFAULT_EXPIRE_TIMEOUT, DEFAULT_ACQUIRE_TIMEOUT)
    }

    /// Creates a lock with explicit timeouts. Both are floored at one
    /// second.
    pub fn with_timeouts(
        conn: C,
        key: &str,
        expire_timeout: Duration,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        path::validate_key(key)?;
        Ok(Self {
            conn,
            key: key.to_string(),
            chain: path::key_hierarchy(key),
            expire_secs: expire_timeout.as_secs().max(1),
            acquire_secs: acquire_timeout.as_secs().max(1),
        })
    }

    /// Returns the dotted key this lock guards.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the effective expire timeout.
    pub fn expire_timeout(&self) -> Duration {
        Duration::from_secs(self.expire_secs)
    }

    /// Returns the effective acquire timeout.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_secs)
    }

    /// Consumes the lock and returns its connection.
    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Returns true if this node or any of its ancestors is locked, by
    /// anyone.
    pub fn is_locked(&mut self) -> Result<bool> {
        self.with_target(|conn, target, _batch| Ok(conn.get(target)?.is_some()))
    }

    /// Acquires the lock, waiting for a foreign holder up to the acquire
    /// timeout.
    ///
    /// Re-acquiring a key whose chain is already held by the calling
    /// thread increments the depth instead of blocking. Every acquisition,
    /// first or nested, rewrites the token with a fresh expire timeout.
    pub fn acquire(&mut self) -> Result<()> {
        let owner = Owner::current();
        let expire_secs = self.expire_secs;
        let total_retries = self.acquire_secs * POLLS_PER_SECOND;
        let mut retries = total_retries;
        loop {
            let attempt = self.with_target(|conn, target, batch| {
                let held = match conn.get(target)? {
                    Some(raw) => Some(LockToken::parse(&raw)?),
                    None => None,
                };
                match held {
                    Some(token) if token.owner() != owner => Ok(Attempt::Held),
                    held => {
                        let depth = held.map_or(0, |token| token.depth) + 1;
                        let token = LockToken::new(owner, depth);
                        batch.set(target, &token.to_string(), Some(expire_secs));
                        Ok(Attempt::Acquired)
                    }
                }
            })?;
            match attempt {
                Attempt::Acquired => return Ok(()),
                Attempt::Held => {
                    if retries == 0 {
                        return Err(Error::LockTimeout {
                            retries: total_retries,
                        });
                    }
                    retries -= 1;
                    trace!(key = %self.key, retries, "lock is held, polling");
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    /// Releases one level of the lock.
    ///
    /// Releasing an absent key returns silently: the key either expired
    /// (fine) or was never acquired, and the two cases cannot be told apart
    /// here. For the same reason no holder check is made; after an expiry a
    /// foreign owner may legitimately hold the key.
    pub fn release(&mut self) -> Result<()> {
        let expire_secs = self.expire_secs;
        self.with_target(|conn, target, batch| {
            let raw = match conn.get(target)? {
                Some(raw) => raw,
                None => return Ok(()),
            };
            let token = LockToken::parse(&raw)?;
            if token.depth <= 0 {
                return Err(Error::Internal(format!(
                    "non-positive lock depth {} for {}",
                    token.depth, target
                )));
            }
            if token.depth == 1 {
                batch.del(target);
            } else {
                // The decremented token must carry the expiry again; a bare
                // SET strips the TTL and the lock would never expire.
                let token = LockToken::new(token.owner(), token.depth - 1);
                batch.set(target, &token.to_string(), Some(expire_secs));
            }
            Ok(())
        })
    }

    /// Acquires and returns a guard that releases on drop.
    pub fn guard(mut self) -> Result<Guard<C>> {
        self.acquire()?;
        Ok(Guard { lock: Some(self) })
    }

    /// Resolves the target key and runs `body` against it inside a watched
    /// pipeline, retrying for as long as concurrent writers invalidate the
    /// watch.
    ///
    /// The target is the deepest occupied key of the ancestor chain, or the
    /// lock's own key if the whole chain is free. Writes queued by `body`
    /// commit atomically with the targeting decision.
    fn with_target<T>(
        &mut self,
        mut body: impl FnMut(&mut C, &str, &mut Batch) -> Result<T>,
    ) -> Result<T> {
        loop {
            self.conn.watch(&self.chain)?;
            let target = match self.find_target() {
                Ok(target) => target,
                Err(err) => {
                    let _ = self.conn.unwatch();
                    return Err(err);
                }
            };
            let mut batch = Batch::new();
            let out = match body(&mut self.conn, &target, &mut batch) {
                Ok(out) => out,
                Err(err) => {
                    let _ = self.conn.unwatch();
                    return Err(err);
                }
            };
            if self.conn.exec(batch)? {
                return Ok(out);
            }
            trace!(key = %self.key, "watched key changed, retargeting");
        }
    }

    fn find_target(&mut self) -> Result<String> {
        for key in &self.chain {
            if self.conn.get(key)?.is_some() {
                return Ok(key.clone());
            }
        }
        Ok(self.key.clone())
    }
}

/// Scope handle returned by [`Lock::guard`]; releases the lock when
/// dropped.
pub struct Guard<C: Backend> {
    lock: Option<Lock<C>>,
}

impl<C: Backend> Guard<C> {
    /// Releases eagerly and hands the lock back, surfacing any error that a
    /// drop would only log.
    pub fn release(mut self) -> Result<Lock<C>> {
        let mut lock = match self.lock.take() {
            Some(lock) => lock,
            None => unreachable!(),
        };
        lock.release()?;
        Ok(lock)
    }
}

impl<C: Backend> Drop for Guard<C> {
    fn drop(&mut self) {
        if let Some(mut lock) = self.lock.take() {
            if let Err(err) = lock.release() {
                warn!(key = %lock.key, error = %err, "failed to release lock");
            }
        }
    }
}
