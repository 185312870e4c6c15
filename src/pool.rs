//! Process-wide connection pooling.
//!
//! One [`Pool`] per process hands out [`Conn`] handles, either checked out
//! of an r2d2 pool per configured database, or onto a shared in-memory
//! store when the pool was switched into memory mode for tests.

use crate::backend::{Backend, Batch};
use crate::error::Result;
use crate::memory::MemoryBackend;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Connection details for the pool.
///
/// Deserializes from a configuration mapping; missing keys take the
/// defaults below and unknown keys are ignored.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Server host to connect to.
    pub host: String,
    /// Server port to connect to.
    pub port: u16,
    /// Database index used when no name is given.
    pub database: i64,
    /// Mapping from logical database name to database index.
    pub names: HashMap<String, i64>,
    /// Password used for connecting.
    pub password: Option<String>,
    /// Upper bound of open connections per database.
    pub max_connections: u32,
    /// Checkout timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            database: 0,
            names: HashMap::new(),
            password: None,
            max_connections: 100,
            timeout_secs: 50,
        }
    }
}

struct Inner {
    cfg: PoolConfig,
    pools: HashMap<Option<String>, r2d2::Pool<redis::Client>>,
    memory: Option<MemoryBackend>,
}

/// Pool of server connections, one sub-pool per logical database name.
pub struct Pool {
    inner: Mutex<Inner>,
}

static GLOBAL: Lazy<Pool> = Lazy::new(|| Pool::new(PoolConfig::default()));

impl Pool {
    fn new(cfg: PoolConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cfg,
                pools: HashMap::new(),
                memory: None,
            }),
        }
    }

    /// Returns the process-wide pool.
    pub fn global() -> &'static Pool {
        &GLOBAL
    }

    /// Replaces the configuration, disconnecting all existing sub-pools.
    /// New connections are built lazily on the next checkout.
    pub fn reload(&self, cfg: PoolConfig) {
        let mut inner = self.inner.lock();
        debug!(host = %cfg.host, port = cfg.port, "reloading connection pool");
        inner.cfg = cfg;
        inner.pools.clear();
        inner.memory = None;
    }

    /// Swaps in a fresh in-memory store shared by every connection handed
    /// out afterwards. Test mode; logical database names all map onto the
    /// single store.
    pub fn reload_in_memory(&self) {
        let mut inner = self.inner.lock();
        inner.pools.clear();
        inner.memory = Some(MemoryBackend::new());
    }

    /// Returns a connection for the database registered under `db_name`,
    /// or for the default database when no name is given.
    ///
    /// A name missing from the configured `names` mapping falls through to
    /// the default database. May block until a connection is free, bounded
    /// by the configured checkout timeout.
    pub fn get_connection(&self, db_name: Option<&str>) -> Result<Conn> {
        let pool = {
            let mut inner = self.inner.lock();
            if let Some(memory) = &inner.memory {
                return Ok(Conn::Memory(memory.handle()));
            }
            let key = db_name.map(str::to_string);
            if !inner.pools.contains_key(&key) {
                let pool = build_pool(&inner.cfg, db_name)?;
                inner.pools.insert(key.clone(), pool);
            }
            inner.pools[&key].clone()
        };
        // Checked out after the registry lock is gone; checkouts may block.
        Ok(Conn::Redis(pool.get()?))
    }
}

fn build_pool(cfg: &PoolConfig, db_name: Option<&str>) -> Result<r2d2::Pool<redis::Client>> {
    let mut db = cfg.database;
    if let Some(name) = db_name {
        match cfg.names.get(name) {
            Some(index) => db = *index,
            None => debug!(name, "database name not configured, using default database"),
        }
    }
    let info = redis::ConnectionInfo {
        addr: redis::ConnectionAddr::Tcp(cfg.host.clone(), cfg.port),
        redis: redis::RedisConnectionInfo {
            db,
            username: None,
            password: cfg.password.clone(),
        },
    };
    let client = redis::Client::open(info)?;
    Ok(r2d2::Pool::builder()
        .max_size(cfg.max_connections)
        .connection_timeout(Duration::from_secs(cfg.timeout_secs))
        .build_unchecked(client))
}

/// A pooled connection, over the network or onto the in-memory store.
pub enum Conn {
    /// A connection checked out of an r2d2 sub-pool.
    Redis(r2d2::PooledConnection<redis::Client>),
    /// A handle onto the shared in-memory store.
    Memory(MemoryBackend),
}

impl Conn {
    fn backend(&mut self) -> &mut dyn Backend {
        match self {
            Conn::Redis(conn) => &mut **conn,
            Conn::Memory(memory) => memory,
        }
    }
}

impl Backend for Conn {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.backend().get(key)
    }

    fn set(&mut self, key: &str, value: &str, expire: Option<u64>) -> Result<()> {
        self.backend().set(key, value, expire)
    }

    fn del(&mut self, key: &str) -> Result<()> {
        self.backend().del(key)
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        self.backend().exists(key)
    }

    fn expire(&mut self, key: &str, seconds: u64) -> Result<bool> {
        self.backend().expire(key, seconds)
    }

    fn ttl(&mut self, key: &str) -> Result<i64> {
        self.backend().ttl(key)
    }

    fn keys_matching(&mut self, pattern: &str) -> Result<Vec<String>> {
        self.backend().keys_matching(pattern)
    }

    fn watch(&mut self, keys: &[String]) -> Result<()> {
        self.backend().watch(keys)
    }

    fn exec(&mut self, batch: Batch) -> Result<bool> {
        self.backend().exec(batch)
    }

    fn unwatch(&mut self) -> Result<()> {
        self.backend().unwatch()
    }

    fn flush_db(&mut self) -> Result<()> {
        self.backend().flush_db()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_apply_to_missing_keys() {
        let cfg: PoolConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 6379);
        assert_eq!(cfg.database, 0);
        assert!(cfg.names.is_empty());
        assert_eq!(cfg.password, None);
        assert_eq!(cfg.max_connections, 100);
        assert_eq!(cfg.timeout_secs, 50);
    }

    #[test]
    fn config_ignores_unknown_keys() {
        let cfg: PoolConfig =
            serde_json::from_str(r#"{"port": 6380, "frobnicate": true}"#).unwrap();
        assert_eq!(cfg.port, 6380);
    }

    #[test]
    fn config_reads_name_mapping() {
        let cfg: PoolConfig =
            serde_json::from_str(r#"{"names": {"snmp": 1, "img": 2}}"#).unwrap();
        assert_eq!(cfg.names["snmp"], 1);
        assert_eq!(cfg.names["img"], 2);
    }

    #[test]
    fn memory_mode_shares_one_store() {
        let pool = Pool::new(PoolConfig::default());
        pool.reload_in_memory();

        let mut a = pool.get_connection(None).unwrap();
        let mut b = pool.get_connection(Some("elsewhere")).unwrap();
        a.set("shared", "1", None).unwrap();
        assert_eq!(b.get("shared").unwrap().as_deref(), Some("1"));

        // A reload swaps in a fresh store.
        pool.reload_in_memory();
        let mut c = pool.get_connection(None).unwrap();
        assert_eq!(c.get("shared").unwrap(), None);
    }
}
