//! Integration tests against a live redis server on localhost:6379.
//!
//! Run with `cargo test -- --ignored --test-threads=1`. The tests flush the
//! databases they touch.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Once;
use std::thread;
use std::time::Duration;
use treedis::{Backend, Pool, PoolConfig, Proxy, ProxyOptions};

fn setup() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();
        Pool::global().reload(PoolConfig::default());
        let mut conn = Pool::global().get_connection(None).unwrap();
        conn.flush_db().unwrap();
    });
}

#[test]
#[ignore = "requires a running redis server"]
fn scalar_and_mapping_roundtrip() {
    setup();
    let prx = Proxy::new("itg-basic").unwrap();
    prx.clear().unwrap();

    prx.set("a", &2, None).unwrap();
    assert_eq!(prx.get("a").unwrap().val().unwrap(), json!(2));

    prx.set("a.b", &3, None).unwrap();
    assert_eq!(prx.get("a").unwrap().val().unwrap(), json!({"b": 3}));

    let mut conn = Pool::global().get_connection(None).unwrap();
    assert_eq!(conn.get("v:.itg-basic.a").unwrap(), None);
    assert_eq!(
        conn.get("v:.itg-basic.a.b").unwrap().as_deref(),
        Some("3")
    );
    prx.clear().unwrap();
}

#[test]
#[ignore = "requires a running redis server"]
fn parallel_locked_increments() {
    setup();
    let prx = Proxy::new("itg-counter").unwrap();
    prx.clear().unwrap();
    prx.set("x", &0, None).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(|| {
                // Every worker needs its own proxy operations; the lock
                // state itself lives on the server.
                let prx = Proxy::new("itg-counter").unwrap();
                for _ in 0..250 {
                    let _guard = prx.guard().unwrap();
                    let current = prx.get("x").unwrap().val().unwrap().as_i64().unwrap();
                    prx.set("x", &(current + 1), None).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(prx.get("x").unwrap().val().unwrap(), json!(1000));
}

#[test]
#[ignore = "requires a running redis server"]
fn recursive_lock_release_keeps_the_expiry() {
    // Regression: a nested release once rewrote the token with a bare SET,
    // stripping the TTL and leaving an immortal lock. Only a real server
    // shows this; the in-memory equivalent lives in the lock unit tests.
    setup();
    let prx = Proxy::with_options(
        "itg-lock-test",
        ProxyOptions {
            acquire_timeout: Duration::from_secs(10),
            expire_timeout: Duration::from_secs(15),
            ..ProxyOptions::default()
        },
    )
    .unwrap();

    let mut lock = prx.lock().unwrap();
    lock.acquire().unwrap();
    lock.acquire().unwrap();

    let mut conn = Pool::global().get_connection(None).unwrap();
    assert_eq!(conn.ttl("l:.itg-lock-test").unwrap(), 15);

    lock.release().unwrap();
    assert_eq!(conn.ttl("l:.itg-lock-test").unwrap(), 15);
    thread::sleep(Duration::from_secs(1));
    assert_eq!(conn.ttl("l:.itg-lock-test").unwrap(), 14);

    lock.release().unwrap();
    assert!(conn.ttl("l:.itg-lock-test").unwrap() < 0);
}

#[test]
#[ignore = "requires a running redis server"]
fn named_databases_are_isolated() {
    setup();
    let mut names = HashMap::new();
    names.insert("snmp".to_string(), 1);
    names.insert("img".to_string(), 2);
    Pool::global().reload(PoolConfig {
        names,
        ..PoolConfig::default()
    });
    for db_name in [None, Some("snmp"), Some("img")] {
        Pool::global()
            .get_connection(db_name)
            .unwrap()
            .flush_db()
            .unwrap();
    }

    let default_prox = Proxy::new("itg-cache").unwrap();
    default_prox.set("x", &0, None).unwrap();

    let snmp_prox = Proxy::with_options(
        "itg-cache",
        ProxyOptions {
            db_name: Some("snmp".to_string()),
            ..ProxyOptions::default()
        },
    )
    .unwrap();
    snmp_prox.set("x", &1, None).unwrap();

    let img_prox = Proxy::with_options(
        "itg-cache",
        ProxyOptions {
            db_name: Some("img".to_string()),
            ..ProxyOptions::default()
        },
    )
    .unwrap();
    img_prox.set("x", &2, None).unwrap();

    assert_eq!(default_prox.get("x").unwrap().val().unwrap(), json!(0));
    assert_eq!(snmp_prox.get("x").unwrap().val().unwrap(), json!(1));
    assert_eq!(img_prox.get("x").unwrap().val().unwrap(), json!(2));

    // Unconfigured names fall through to the default database.
    let stray_prox = Proxy::with_options(
        "itg-cache",
        ProxyOptions {
            db_name: Some("not-there".to_string()),
            ..ProxyOptions::default()
        },
    )
    .unwrap();
    stray_prox.set("x", &3, None).unwrap();
    assert_eq!(default_prox.get("x").unwrap().val().unwrap(), json!(3));
    assert_eq!(stray_prox.get("x").unwrap().val().unwrap(), json!(3));

    Pool::global().reload(PoolConfig::default());
}
