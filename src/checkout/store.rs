use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

use super::session::CheckoutSession;

/// Keyed storage for serialized checkout sessions. Values are JSON so a
/// shared cache can back this without a schema.
pub trait SessionStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Option<String>;
    fn put_raw(&self, key: &str, value: String);
    fn remove_raw(&self, key: &str);
}

/// Typed access on top of the raw string store.
pub trait SessionStoreExt: SessionStore {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ServiceError> {
        match self.get_raw(key) {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| ServiceError::InternalError(format!("Corrupt session data: {}", e))),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ServiceError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| ServiceError::InternalError(format!("Session serialization: {}", e)))?;
        self.put_raw(key, raw);
        Ok(())
    }
}

impl<S: SessionStore + ?Sized> SessionStoreExt for S {}

pub fn session_key(buyer_id: Uuid) -> String {
    format!("checkout:{}", buyer_id)
}

pub fn load_session(
    store: &dyn SessionStore,
    buyer_id: Uuid,
) -> Result<Option<CheckoutSession>, ServiceError> {
    store.get(&session_key(buyer_id))
}

pub fn save_session(
    store: &dyn SessionStore,
    session: &CheckoutSession,
) -> Result<(), ServiceError> {
    store.put(&session_key(session.buyer_id), session)
}

pub fn clear_session(store: &dyn SessionStore, buyer_id: Uuid) {
    store.remove_raw(&session_key(buyer_id));
}

/// Process-local store backed by a concurrent map.
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: DashMap<String, String>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_raw(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put_raw(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove_raw(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sessions_round_trip_through_the_store() {
        let store = InMemorySessionStore::new();
        let session = CheckoutSession::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            dec!(450.00),
            5,
        );

        save_session(&store, &session).unwrap();
        let loaded = load_session(&store, session.buyer_id).unwrap().unwrap();
        assert_eq!(loaded.product_id, session.product_id);
        assert_eq!(loaded.unit_price, dec!(450.00));

        clear_session(&store, session.buyer_id);
        assert!(load_session(&store, session.buyer_id).unwrap().is_none());
    }

    #[test]
    fn corrupt_session_data_is_an_internal_error() {
        let store = InMemorySessionStore::new();
        let buyer = Uuid::new_v4();
        store.put_raw(&session_key(buyer), "not json".to_string());
        assert!(load_session(&store, buyer).is_err());
    }
}
