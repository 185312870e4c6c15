//! Path-addressed view over the value tree.
//!
//! A [`Proxy`] names one node of the dotted-path namespace. Reading
//! assembles the node's value from its stored leaves, writing decomposes
//! nested mappings into one leaf per scalar, and the embedded lock guards
//! the node together with everything below it.
//!
//! Proxy operations are *not* implicitly locked. Bracket mutations with
//! [`acquire`](Proxy::acquire)/[`release`](Proxy::release) or a
//! [`guard`](Proxy::guard) when other writers are around.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::lock::{Guard, Lock};
use crate::path;
use crate::pool::{Conn, Pool};
use crate::registry::Registry;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Prefix separating the lock tree from user paths.
pub const LOCK_TREE_PREFIX: &str = "l:";
/// Prefix separating the value tree from user paths.
pub const VALUE_TREE_PREFIX: &str = "v:";

/// Construction options for [`Proxy::with_options`] and
/// [`Proxy::from_elements`].
#[derive(Clone, Debug)]
pub struct ProxyOptions {
    /// Logical database name; `None` selects the default database.
    pub db_name: Option<String>,
    /// Acquire timeout handed to the embedded lock.
    pub acquire_timeout: Duration,
    /// Expire timeout handed to the embedded lock.
    pub expire_timeout: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            db_name: None,
            acquire_timeout: Duration::from_secs(10),
            expire_timeout: Duration::from_secs(30),
        }
    }
}

/// Proxy for a single value or a tree of values.
///
/// Proxies are handed out by a process-wide registry: constructing the same
/// path twice yields the same `Arc`. A proxy holds no connection; every
/// operation checks one out of the global [`Pool`].
#[derive(Debug)]
pub struct Proxy {
    path: Vec<String>,
    db_name: Option<String>,
    acquire_timeout: Duration,
    expire_timeout: Duration,
}

/// Returns the proxy for the root of the value tree.
pub fn root() -> Arc<Proxy> {
    Registry::global().get_or_create(Vec::new(), ProxyOptions::default())
}

/// Returns the proxy for a first-level section.
///
/// Use a name unique to the caller, e.g. a module path, to avoid clobbering
/// foreign keys.
pub fn section(name: &str) -> Result<Arc<Proxy>> {
    path::validate_element(name)?;
    Ok(Registry::global().get_or_create(vec![name.to_string()], ProxyOptions::default()))
}

impl Proxy {
    /// Returns the proxy for a dotted path.
    pub fn new(path: &str) -> Result<Arc<Self>> {
        Self::with_options(path, ProxyOptions::default())
    }

    /// Returns the proxy for a dotted path with explicit options.
    ///
    /// The registry caches by `(path, db_name)`; if the proxy already
    /// exists its original options stay in effect.
    pub fn with_options(path: &str, options: ProxyOptions) -> Result<Arc<Self>> {
        path::validate_key(path)?;
        let elements = path.split(path::SEPARATOR).map(str::to_string).collect();
        Ok(Registry::global().get_or_create(elements, options))
    }

    /// Returns the proxy for a path given as individual elements. An empty
    /// sequence addresses the root.
    pub fn from_elements<I, S>(elements: I, options: ProxyOptions) -> Result<Arc<Self>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Vec::new();
        for element in elements {
            let element = element.into();
            path::validate_element(&element)?;
            path.push(element);
        }
        Ok(Registry::global().get_or_create(path, options))
    }

    pub(crate) fn from_parts(path: Vec<String>, options: ProxyOptions) -> Self {
        Self {
            path,
            db_name: options.db_name,
            acquire_timeout: options.acquire_timeout,
            expire_timeout: options.expire_timeout,
        }
    }

    fn conn(&self) -> Result<Conn> {
        Pool::global().get_connection(self.db_name.as_deref())
    }

    /// Returns the dotted path of this proxy.
    pub fn key(&self) -> String {
        self.path.join(".")
    }

    /// Returns the logical database name this proxy reads and writes.
    pub fn db_name(&self) -> Option<&str> {
        self.db_name.as_deref()
    }

    fn full_key(&self) -> String {
        join_key(VALUE_TREE_PREFIX, &self.path)
    }

    fn sub_key(&self, sub: &str) -> String {
        format!("{}.{}", self.full_key(), sub)
    }

    fn lock_key(&self) -> String {
        join_key(LOCK_TREE_PREFIX, &self.path)
    }

    /// Returns the keys of this node's subtree: stored leaves below it in
    /// scan order, then the node's own key.
    fn subtree_keys(&self, conn: &mut Conn) -> Result<Vec<String>> {
        let own = self.full_key();
        let mut keys = conn.keys_matching(&format!("{}.*", own))?;
        keys.push(own);
        Ok(keys)
    }

    /// Returns a lock on this node and its subtree, backed by a fresh
    /// pooled connection.
    pub fn lock(&self) -> Result<Lock<Conn>> {
        Lock::with_timeouts(
            self.conn()?,
            &self.lock_key(),
            self.expire_timeout,
            self.acquire_timeout,
        )
    }

    /// Returns true if this node or any of its ancestors is locked.
    pub fn is_locked(&self) -> Result<bool> {
        self.lock()?.is_locked()
    }

    /// Acquires the lock on this value and everything below it.
    pub fn acquire(&self) -> Result<()> {
        self.lock()?.acquire()
    }

    /// Releases a previously acquired lock.
    ///
    /// Children locked explicitly stay locked; release them where they were
    /// acquired.
    pub fn release(&self) -> Result<()> {
        self.lock()?.release()
    }

    /// Acquires and returns a guard releasing on drop.
    pub fn guard(&self) -> Result<Guard<Conn>> {
        self.lock()?.guard()
    }

    /// Returns true if a scalar is stored at this exact node. A node with
    /// only a subtree below it does not exist in this sense; probe such
    /// nodes with [`val`](Proxy::val).
    pub fn exists(&self) -> Result<bool> {
        self.conn()?.exists(&self.full_key())
    }

    /// Removes this level of the value tree including all children.
    pub fn clear(&self) -> Result<()> {
        let mut conn = self.conn()?;
        for key in self.subtree_keys(&mut conn)? {
            conn.del(&key)?;
        }
        Ok(())
    }

    /// Returns the child proxy for a dotted sub-path.
    pub fn get(&self, sub: &str) -> Result<Arc<Proxy>> {
        path::validate_key(sub)?;
        let mut child = self.path.clone();
        child.extend(sub.split(path::SEPARATOR).map(str::to_string));
        Ok(Registry::global().get_or_create(
            child,
            ProxyOptions {
                db_name: self.db_name.clone(),
                ..ProxyOptions::default()
            },
        ))
    }

    /// Deletes the value stored under a dotted sub-path.
    pub fn delete(&self, sub: &str) -> Result<()> {
        path::validate_key(sub)?;
        self.get(sub)?.clear()
    }

    /// Stores a value under a dotted sub-path, optionally expiring after
    /// `expire` (floored to whole seconds).
    ///
    /// Writing here invalidates any scalar stored at an ancestor, so those
    /// keys are removed first. A mapping replaces the whole subtree under
    /// the written key with one leaf per scalar; empty sub-mappings store
    /// nothing.
    pub fn set<T: Serialize>(&self, sub: &str, value: &T, expire: Option<Duration>) -> Result<()> {
        path::validate_key(sub)?;
        let full_key = self.sub_key(sub);
        let mut conn = self.conn()?;

        for parent in path::key_hierarchy(&full_key).into_iter().skip(1) {
            conn.del(&parent)?;
        }

        let value = serde_json::to_value(value)?;
        let expire = expire.map(|expire| expire.as_secs());
        // The written key owns its subtree from here on; leftover leaves
        // below it would resurface once the key is deleted again.
        self.get(sub)?.clear()?;
        if let Value::Object(map) = &value {
            for (leaf, scalar) in path::flatten(map, &full_key) {
                conn.set(&leaf, &serde_json::to_string(scalar)?, expire)?;
            }
        } else {
            conn.set(&full_key, &serde_json::to_string(&value)?, expire)?;
        }
        Ok(())
    }

    /// Returns the value of this node.
    ///
    /// A stored scalar is returned as such; otherwise the subtree below is
    /// reassembled into a mapping. `Value::Null` means the node holds an
    /// explicit null or nothing at all; use
    /// [`val_with_default`](Proxy::val_with_default) to tell the two apart.
    pub fn val(&self) -> Result<Value> {
        self.val_with_default(Value::Null)
    }

    /// Like [`val`](Proxy::val), but returns `default` when nothing is
    /// stored here. A node explicitly set to null still returns null.
    pub fn val_with_default(&self, default: Value) -> Result<Value> {
        let full_key = self.full_key();
        let mut conn = self.conn()?;

        if let Some(raw) = conn.get(&full_key)? {
            return Ok(serde_json::from_str(&raw)?);
        }

        let mut nested = Map::new();
        let prefix = format!("{}.", full_key);
        for key in conn.keys_matching(&format!("{}.*", full_key))? {
            // A leaf may expire between the scan and the read.
            let raw = match conn.get(&key)? {
                Some(raw) => raw,
                None => continue,
            };
            path::unflatten(&mut nested, &key[prefix.len()..], serde_json::from_str(&raw)?);
        }

        if nested.is_empty() {
            if default.is_null() && !conn.exists(&full_key)? {
                return Ok(Value::Null);
            }
            return Ok(default);
        }
        Ok(Value::Object(nested))
    }

    /// Yields a proxy for every stored leaf below this node, in backend
    /// scan order.
    pub fn iter_children(&self) -> Result<impl Iterator<Item = Arc<Proxy>>> {
        let mut conn = self.conn()?;
        let own = self.full_key();
        let mut children = Vec::new();
        for key in conn.keys_matching(&format!("{}.*", own))? {
            // Strip the tree prefix; it comes back when the child builds
            // its own keys.
            let trimmed = &key[VALUE_TREE_PREFIX.len() + 1..];
            children.push(Registry::global().get_or_create(
                trimmed.split(path::SEPARATOR).map(str::to_string).collect(),
                ProxyOptions {
                    db_name: self.db_name.clone(),
                    ..ProxyOptions::default()
                },
            ));
        }
        Ok(children.into_iter())
    }

    /// Adds `count` to the stored number, initializing an absent node to
    /// `count`. Returns the new total.
    ///
    /// Not locked on its own; under contention bracket the call with this
    /// proxy's lock.
    pub fn add(&self, count: i64) -> Result<Value> {
        let full_key = self.full_key();
        let mut conn = self.conn()?;
        let new_val = if conn.exists(&full_key)? {
            match self.val()? {
                Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(int), _) => Value::from(int + count),
                    (None, Some(float)) => Value::from(float + count as f64),
                    _ => return Err(Error::InvalidValue(format!("cannot add to {}", n))),
                },
                other => {
                    return Err(Error::InvalidValue(format!("cannot add to {}", other)));
                }
            }
        } else {
            Value::from(count)
        };
        conn.set(&full_key, &serde_json::to_string(&new_val)?, None)?;
        Ok(new_val)
    }

    /// Expires this node and all of its children after `duration` (floored
    /// to whole seconds). Afterwards [`val`](Proxy::val) returns null and
    /// [`exists`](Proxy::exists) returns false.
    pub fn expire(&self, duration: Duration) -> Result<()> {
        let mut conn = self.conn()?;
        for key in self.subtree_keys(&mut conn)? {
            conn.expire(&key, duration.as_secs())?;
        }
        Ok(())
    }

    /// Returns how long this value stays accessible: the TTL of the first
    /// stored key of the subtree, `-1` for a key without expiry, or `None`
    /// if nothing is stored here.
    pub fn time_to_live(&self) -> Result<Option<i64>> {
        let mut conn = self.conn()?;
        for key in self.subtree_keys(&mut conn)? {
            if conn.exists(&key)? {
                return Ok(Some(conn.ttl(&key)?));
            }
        }
        Ok(None)
    }

    /// Returns true if the stored values of the two proxies compare equal.
    ///
    /// The two reads are independent; a concurrent writer can slip between
    /// them.
    pub fn value_eq(&self, other: &Proxy) -> Result<bool> {
        Ok(self.val()? == other.val()?)
    }
}

fn join_key(prefix: &str, path: &[String]) -> String {
    if path.is_empty() {
        prefix.to_string()
    } else {
        format!("{}.{}", prefix, path.join("."))
    }
}
