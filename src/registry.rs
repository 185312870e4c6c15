//! Process-wide proxy memoization.
//!
//! Constructing a proxy twice for the same path and database returns the
//! same instance. This keeps identity comparisons meaningful and avoids
//! rebuilding proxies for hot paths; the lock and value protocols do not
//! depend on it.

use crate::proxy::{Proxy, ProxyOptions};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type RegistryKey = (Vec<String>, Option<String>);

pub(crate) struct Registry {
    proxies: Mutex<HashMap<RegistryKey, Arc<Proxy>>>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    proxies: Mutex::new(HashMap::new()),
});

impl Registry {
    pub(crate) fn global() -> &'static Registry {
        &REGISTRY
    }

    /// Returns the memoized proxy for `(path, db_name)`, creating it with
    /// `options` on first use. A later construction with different options
    /// still returns the first instance.
    pub(crate) fn get_or_create(&self, path: Vec<String>, options: ProxyOptions) -> Arc<Proxy> {
        let key = (path, options.db_name.clone());
        let mut proxies = self.proxies.lock();
        if let Some(existing) = proxies.get(&key) {
            return existing.clone();
        }
        let proxy = Arc::new(Proxy::from_parts(key.0.clone(), options));
        proxies.insert(key, proxy.clone());
        proxy
    }
}
