//! In-Memory Gateway
//!
//! A single-process stand-in for the real-time store: one JSON tree shared by
//! every connected client, change notification to subscribers, ordered
//! auto-ids and per-client on-disconnect cleanup. Used by the demo binary and
//! the tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::network::gateway::{split_path, GatewayError, NetworkGateway, Subscription};

/// Client identifier within one store.
pub type ClientId = u64;

#[derive(Debug)]
struct Subscriber {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<Value>,
}

#[derive(Debug, Default)]
struct StoreInner {
    root: Map<String, Value>,
    subscribers: Vec<Subscriber>,
    on_disconnect: BTreeMap<ClientId, Vec<String>>,
    next_client: ClientId,
    next_key: u64,
    offline: bool,
}

impl StoreInner {
    fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut node = self.root.get(*first)?;
        for seg in rest {
            node = node.as_object()?.get(*seg)?;
        }
        Some(node)
    }

    fn set(&mut self, path: &[&str], value: Value) {
        if value.is_null() {
            self.delete(path);
            return;
        }
        let Some((last, parents)) = path.split_last() else { return };

        let mut node = &mut self.root;
        for seg in parents {
            let child = node
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            let Value::Object(map) = child else { return };
            node = map;
        }
        node.insert(last.to_string(), value);
    }

    fn delete(&mut self, path: &[&str]) {
        fn walk(map: &mut Map<String, Value>, path: &[&str]) {
            let Some((first, rest)) = path.split_first() else { return };
            if rest.is_empty() {
                map.remove(*first);
                return;
            }
            let now_empty = match map.get_mut(*first) {
                Some(Value::Object(child)) => {
                    walk(child, rest);
                    child.is_empty()
                }
                _ => false,
            };
            // Empty parents disappear, like the hosted store
            if now_empty {
                map.remove(*first);
            }
        }
        walk(&mut self.root, path);
    }

    fn notify(&mut self, changed: &[&str]) {
        let mut deliveries = Vec::new();
        for (i, sub) in self.subscribers.iter().enumerate() {
            let related = sub
                .path
                .iter()
                .zip(changed.iter())
                .all(|(a, b)| a == b);
            if related {
                let segs: Vec<&str> = sub.path.iter().map(String::as_str).collect();
                deliveries.push((i, self.get(&segs).cloned().unwrap_or(Value::Null)));
            }
        }

        let mut closed = Vec::new();
        for (i, value) in deliveries {
            if self.subscribers[i].tx.send(value).is_err() {
                closed.push(i);
            }
        }
        for i in closed.into_iter().rev() {
            self.subscribers.remove(i);
        }
    }

    fn check_online(&self) -> Result<(), GatewayError> {
        if self.offline {
            return Err(GatewayError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

/// Shared store. Clone to share; call [`InMemoryStore::connect`] per client.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, GatewayError> {
        self.inner
            .lock()
            .map_err(|_| GatewayError::Unavailable("store lock poisoned".to_string()))
    }

    /// Open a client connection.
    pub fn connect(&self) -> InMemoryGateway {
        let client_id = match self.lock() {
            Ok(mut inner) => {
                inner.next_client += 1;
                inner.next_client
            }
            Err(_) => 0,
        };
        InMemoryGateway { store: self.clone(), client_id }
    }

    /// Simulate a dropped connection: run the client's on-disconnect actions.
    pub fn disconnect(&self, client_id: ClientId) -> Result<usize, GatewayError> {
        let mut inner = self.lock()?;
        let paths = inner.on_disconnect.remove(&client_id).unwrap_or_default();
        for path in &paths {
            let segs = split_path(path)?;
            inner.delete(&segs);
            inner.notify(&segs);
        }
        debug!(client = client_id, removed = paths.len(), "Client disconnected");
        Ok(paths.len())
    }

    /// Take the whole store offline (every call fails) or bring it back.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut inner) = self.lock() {
            inner.offline = offline;
        }
    }
}

/// One client's handle on an [`InMemoryStore`].
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    store: InMemoryStore,
    client_id: ClientId,
}

impl InMemoryGateway {
    /// This connection's id.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// The store behind this connection.
    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }
}

impl NetworkGateway for InMemoryGateway {
    fn subscribe(&self, path: &str) -> Result<Subscription, GatewayError> {
        let segs = split_path(path)?;
        let mut inner = self.store.lock()?;
        inner.check_online()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let current = inner.get(&segs).cloned().unwrap_or(Value::Null);
        // Receiver is alive, send cannot fail here
        let _ = tx.send(current);
        inner.subscribers.push(Subscriber {
            path: segs.iter().map(|s| s.to_string()).collect(),
            tx,
        });

        Ok(Subscription { path: path.to_string(), updates: rx })
    }

    fn write(&self, path: &str, value: Value) -> Result<(), GatewayError> {
        let segs = split_path(path)?;
        let mut inner = self.store.lock()?;
        inner.check_online()?;
        inner.set(&segs, value);
        inner.notify(&segs);
        Ok(())
    }

    fn patch(&self, path: &str, fields: Map<String, Value>) -> Result<(), GatewayError> {
        let segs = split_path(path)?;
        let mut inner = self.store.lock()?;
        inner.check_online()?;
        for (key, value) in fields {
            let mut child = segs.clone();
            child.push(key.as_str());
            inner.set(&child, value);
        }
        inner.notify(&segs);
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), GatewayError> {
        let segs = split_path(path)?;
        let mut inner = self.store.lock()?;
        inner.check_online()?;
        inner.delete(&segs);
        inner.notify(&segs);
        Ok(())
    }

    fn append(&self, path: &str, value: Value) -> Result<String, GatewayError> {
        let mut segs = split_path(path)?;
        let mut inner = self.store.lock()?;
        inner.check_online()?;

        inner.next_key += 1;
        // Zero-padded so lexical order is insertion order
        let key = format!("k{:016}", inner.next_key);
        segs.push(key.as_str());
        inner.set(&segs, value);
        inner.notify(&segs);
        Ok(key)
    }

    fn on_disconnect_remove(&self, path: &str) -> Result<(), GatewayError> {
        split_path(path)?;
        let mut inner = self.store.lock()?;
        inner.check_online()?;
        inner
            .on_disconnect
            .entry(self.client_id)
            .or_default()
            .push(path.to_string());
        Ok(())
    }

    fn read_once(&self, path: &str) -> Result<Option<Value>, GatewayError> {
        let segs = split_path(path)?;
        let inner = self.store.lock()?;
        inner.check_online()?;
        Ok(inner.get(&segs).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_and_read() {
        let store = InMemoryStore::new();
        let gw = store.connect();
        gw.write("rooms/ABC/settings", json!({"maxPlayers": 4})).unwrap();
        assert_eq!(
            gw.read_once("rooms/ABC/settings/maxPlayers").unwrap(),
            Some(json!(4))
        );
        assert_eq!(gw.read_once("rooms/XYZ").unwrap(), None);
    }

    #[test]
    fn test_patch_keeps_siblings() {
        let store = InMemoryStore::new();
        let gw = store.connect();
        gw.write("p/1", json!({"a": 1, "b": 2})).unwrap();
        let mut fields = Map::new();
        fields.insert("b".into(), json!(3));
        fields.insert("c".into(), json!(4));
        gw.patch("p/1", fields).unwrap();
        assert_eq!(gw.read_once("p/1").unwrap(), Some(json!({"a": 1, "b": 3, "c": 4})));
    }

    #[test]
    fn test_remove_prunes_empty_parents() {
        let store = InMemoryStore::new();
        let gw = store.connect();
        gw.write("a/b/c", json!(1)).unwrap();
        gw.remove("a/b/c").unwrap();
        assert_eq!(gw.read_once("a").unwrap(), None);
    }

    #[test]
    fn test_append_keys_are_ordered() {
        let store = InMemoryStore::new();
        let gw = store.connect();
        let k1 = gw.append("log", json!("first")).unwrap();
        let k2 = gw.append("log", json!("second")).unwrap();
        assert!(k1 < k2);

        let log = gw.read_once("log").unwrap().unwrap();
        let values: Vec<&Value> = log.as_object().unwrap().values().collect();
        assert_eq!(values, vec![&json!("first"), &json!("second")]);
    }

    #[tokio::test]
    async fn test_subscription_sees_descendant_changes() {
        let store = InMemoryStore::new();
        let gw = store.connect();
        let mut sub = gw.subscribe("rooms/ABC/gameState").unwrap();
        assert_eq!(sub.updates.recv().await, Some(Value::Null));

        gw.write("rooms/ABC/gameState/bombs/b1", json!({"x": 1})).unwrap();
        let value = sub.updates.recv().await.unwrap();
        assert_eq!(value["bombs"]["b1"]["x"], json!(1));

        // Unrelated paths do not notify
        gw.write("rooms/OTHER/gameState", json!(1)).unwrap();
        assert!(sub.updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let store = InMemoryStore::new();
        let gw = store.connect();
        let sub = gw.subscribe("x").unwrap();
        drop(sub);
        gw.write("x", json!(1)).unwrap();
        assert!(store.inner.lock().unwrap().subscribers.is_empty());
    }

    #[test]
    fn test_disconnect_runs_cleanup() {
        let store = InMemoryStore::new();
        let alice = store.connect();
        let bob = store.connect();
        alice.write("rooms/R/players/alice", json!({"ready": true})).unwrap();
        bob.write("rooms/R/players/bob", json!({"ready": true})).unwrap();
        alice.on_disconnect_remove("rooms/R/players/alice").unwrap();

        assert_eq!(store.disconnect(alice.client_id()).unwrap(), 1);
        assert_eq!(bob.read_once("rooms/R/players/alice").unwrap(), None);
        assert!(bob.read_once("rooms/R/players/bob").unwrap().is_some());
    }

    #[test]
    fn test_offline_store_rejects_writes() {
        let store = InMemoryStore::new();
        let gw = store.connect();
        store.set_offline(true);
        assert!(matches!(gw.write("x", json!(1)), Err(GatewayError::Unavailable(_))));
        store.set_offline(false);
        assert!(gw.write("x", json!(1)).is_ok());
    }
}
