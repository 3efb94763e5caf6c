use dashmap::DashMap;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

/// Entrada del tier local con TTL propio por inserción.
#[derive(Debug, Clone)]
struct LocalEntry {
    value: serde_json::Value,
    stored_at: Instant,
    ttl: Duration,
}

impl LocalEntry {
    fn new(value: serde_json::Value, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

/// Tier local del caché: mapa concurrente acotado solo por expiración
/// temporal (el Sweeper lo poda; no hay tope por tamaño).
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: Arc<DashMap<String, LocalEntry>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Devuelve el valor si existe y sigue vigente; una entrada expirada se
    /// trata como ausente y se retira al vuelo.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: String, value: serde_json::Value, ttl: Duration) {
        self.entries.insert(key, LocalEntry::new(value, ttl));
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retira las entradas cuyo TTL ya venció y devuelve cuántas fueron.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!("limpiadas {} entradas expiradas del tier local", removed);
        }

        removed
    }
}

impl Clone for LocalCache {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}
