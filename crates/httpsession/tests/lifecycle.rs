//! End-to-end session lifecycle tests.
//!
//! These drive the manager the way a request-dispatch layer would: parse
//! the request, resolve the session, feed the issued cookie back in.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use http::HeaderMap;
use http::header::{COOKIE, SET_COOKIE};
use http::request::Parts;
use httpsession::{
    AfterCreatedListener, BackendError, CacheBackend, CookieTransfer, KeyedHashGenerator,
    Listener, Manager, MemoryStore, RemoteStore, Session, SessionConfig, SessionId, Store,
};
use parking_lot::Mutex;
use serde_json::json;

fn request(cookie: Option<&str>) -> Result<Parts> {
    let mut builder = http::Request::builder().uri("/account");
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    Ok(builder.body(())?.into_parts().0)
}

fn issued_cookie(response: &HeaderMap) -> Option<String> {
    let header = response.get(SET_COOKIE)?.to_str().ok()?;
    header.split(';').next().map(str::to_string)
}

#[test]
fn test_sliding_expiry_scenario() {
    let store = MemoryStore::new(Duration::from_secs(2));
    let id = SessionId::from("scenario");

    store.add(&id);
    store.set(&id, "n", json!(1));

    std::thread::sleep(Duration::from_secs(1));
    assert_eq!(store.get(&id, "n"), Some(json!(1)));

    std::thread::sleep(Duration::from_millis(2500));
    assert_eq!(store.get(&id, "n"), None);
    assert!(!store.exist(&id));
}

#[test]
fn test_cookie_feedback_yields_same_session() -> Result<()> {
    let manager = Manager::from_config(&SessionConfig::default())?;

    let mut response = HeaderMap::new();
    let first = manager.session(&request(None)?, &mut response)?;
    let cookie = issued_cookie(&response).expect("new session issues a cookie");

    let second = manager.session(&request(Some(&cookie))?, &mut HeaderMap::new())?;
    assert_eq!(first.id(), second.id());

    let a = manager.session(&request(None)?, &mut HeaderMap::new())?;
    let b = manager.session(&request(None)?, &mut HeaderMap::new())?;
    assert_ne!(a.id(), b.id());

    Ok(())
}

#[derive(Default)]
struct CreatedCounter(AtomicUsize);

impl AfterCreatedListener for CreatedCounter {
    fn on_after_created(&self, _session: &Session) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl Listener for CreatedCounter {
    fn as_after_created(&self) -> Option<&dyn AfterCreatedListener> {
        Some(self)
    }
}

#[test]
fn test_after_created_counts_new_sessions() -> Result<()> {
    let manager = Manager::with_defaults();
    let counter = Arc::new(CreatedCounter::default());
    manager.add_listener(counter.clone())?;

    for _ in 0..3 {
        manager.session(&request(None)?, &mut HeaderMap::new())?;
    }

    assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn test_invalidated_cookie_starts_over() -> Result<()> {
    let manager = Manager::with_defaults();

    let mut response = HeaderMap::new();
    let session = manager.session(&request(None)?, &mut response)?;
    session.set("user", "alice");
    let cookie = issued_cookie(&response).expect("cookie issued");

    let mut logout = HeaderMap::new();
    session.invalidate(&mut logout);
    let cleared = issued_cookie(&logout).expect("clearing cookie issued");
    assert_eq!(cleared, "SESSIONID=");

    // A client that ignores the clearing cookie keeps its id but no state
    let stale = manager.session(&request(Some(&cookie))?, &mut HeaderMap::new())?;
    assert_eq!(stale.id(), session.id());
    assert_eq!(stale.get("user"), None);

    Ok(())
}

#[derive(Default)]
struct SharedCache {
    items: Mutex<HashMap<String, Vec<u8>>>,
}

impl CacheBackend for SharedCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>, _ttl: Option<Duration>) -> Result<(), BackendError> {
        self.items.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.items.lock().remove(key).is_some())
    }
}

#[test]
fn test_managers_share_remote_store() -> Result<()> {
    // Two server processes sharing one cache and one signing key
    let store: Arc<dyn Store> = Arc::new(RemoteStore::new(
        SharedCache::default(),
        Duration::from_secs(60),
    ));
    let node = |store: Arc<dyn Store>| {
        Manager::from_shared(
            store,
            Arc::new(KeyedHashGenerator::new(b"cluster-key".to_vec())),
            Arc::new(CookieTransfer::default()),
        )
    };
    let a = node(store.clone());
    let b = node(store);

    let mut response = HeaderMap::new();
    let on_a = a.session(&request(None)?, &mut response)?;
    on_a.set("cart", json!(["book"]));
    let cookie = issued_cookie(&response).expect("cookie issued");

    let on_b = b.session(&request(Some(&cookie))?, &mut HeaderMap::new())?;
    assert_eq!(on_b.id(), on_a.id());
    assert_eq!(on_b.get("cart"), Some(json!(["book"])));

    assert!(a.run()?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_background_gc_collects_idle_sessions() -> Result<()> {
    let store = Arc::new(
        MemoryStore::new(Duration::from_millis(50)).with_gc_policy(httpsession::GcPolicy {
            interval: Duration::from_millis(25),
            ..Default::default()
        }),
    );
    let manager = Manager::from_shared(
        store.clone(),
        Arc::new(KeyedHashGenerator::random()),
        Arc::new(CookieTransfer::default()),
    );

    for _ in 0..4 {
        manager.session(&request(None)?, &mut HeaderMap::new())?;
    }
    assert_eq!(store.len(), 4);
    assert_eq!(manager.store().len(), Some(4));

    let gc = manager.run()?.expect("memory store needs GC");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(store.is_empty());

    gc.shutdown().await;
    Ok(())
}
