//! # Cache Module
//!
//! Two-tier caching for resolved music metadata and stream locators.
//!
//! The first tier is a fast in-process map ([`LocalCache`]) bounded only by
//! time-based eviction; the second is a durable shared store behind the
//! [`DurableStore`](crate::store::DurableStore) trait. Both tiers keep
//! independent copies with independently chosen TTLs: the local copy is an
//! advisory speed-up, the durable copy survives process restarts and is
//! shared between instances.
//!
//! ## Read path
//!
//! `get` checks the local tier first. On a miss (or an expired local entry)
//! it falls through to the durable tier and, on a hit, *backfills* the local
//! tier with the caller-chosen local TTL before returning.
//!
//! ## Write path
//!
//! `set` writes both tiers. A durable-tier failure is logged and swallowed:
//! the local tier remains authoritative for the rest of this process's
//! lifetime (degraded-but-available). Callers never see cache-tier errors.
//!
//! ## Configuration
//!
//! TTLs are chosen per record kind by the resolution engine, e.g.:
//!
//! ```env
//! TRACK_LOCAL_TTL=300          # seconds
//! TRACK_DURABLE_TTL=300
//! METADATA_DURABLE_TTL=1800
//! ```

pub mod local;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::DurableStore;
pub use local::LocalCache;

/// Entry point único de lecturas y escrituras de caché del motor.
pub struct TieredCache {
    local: LocalCache,
    durable: Option<Arc<dyn DurableStore>>,
}

impl TieredCache {
    pub fn new(durable: Option<Arc<dyn DurableStore>>) -> Self {
        Self {
            local: LocalCache::new(),
            durable,
        }
    }

    /// Acceso al tier local para el Sweeper.
    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    /// Busca `key` en ambos tiers. En un hit durable rellena el tier local
    /// con `backfill_ttl` antes de devolver el valor.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, backfill_ttl: Duration) -> Option<T> {
        if let Some(value) = self.local.get(key) {
            match serde_json::from_value(value) {
                Ok(decoded) => {
                    debug!("✅ Cache hit local para {}", key);
                    return Some(decoded);
                }
                Err(e) => {
                    // forma vieja de payload: tratar como miss
                    warn!("entrada local indescifrable para {}: {}", key, e);
                    self.local.remove(key);
                }
            }
        }

        let store = self.durable.as_ref()?;
        let raw = match store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("⚠️ Tier durable inaccesible leyendo {}: {:#}", key, e);
                return None;
            }
        };

        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => {
                debug!("✅ Cache hit durable para {}, rellenando tier local", key);
                self.local.insert(key.to_string(), value.clone(), backfill_ttl);
                serde_json::from_value(value).ok()
            }
            Err(e) => {
                warn!("entrada durable indescifrable para {}: {}", key, e);
                None
            }
        }
    }

    /// Escribe en ambos tiers. El fallo del tier durable se registra y se
    /// suprime; nunca se propaga al llamador.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        local_ttl: Duration,
        durable_ttl: Duration,
    ) {
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("no se pudo serializar el valor para {}: {}", key, e);
                return;
            }
        };

        self.local.insert(key.to_string(), encoded.clone(), local_ttl);

        if let Some(store) = &self.durable {
            if let Err(e) = store
                .set(key, encoded.to_string(), durable_ttl.as_secs())
                .await
            {
                warn!("⚠️ Escritura durable fallida para {}: {:#}", key, e);
            }
        }
    }
}

impl Clone for TieredCache {
    fn clone(&self) -> Self {
        Self {
            local: self.local.clone(),
            durable: self.durable.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct BrokenStore;

    #[async_trait]
    impl DurableStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("backend caído")
        }
        async fn set(&self, _key: &str, _value: String, _ttl_secs: u64) -> Result<()> {
            anyhow::bail!("backend caído")
        }
    }

    #[tokio::test]
    async fn durable_hit_backfills_local() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::new(Some(store.clone()));

        cache
            .set("k", &"valor".to_string(), Duration::from_millis(30), Duration::from_secs(60))
            .await;

        // dejar vencer solo el tier local
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.local().get("k").is_none());

        let hit: Option<String> = cache.get("k", Duration::from_secs(60)).await;
        assert_eq!(hit.as_deref(), Some("valor"));
        // el hit durable debe haber repoblado el tier local
        assert!(cache.local().get("k").is_some());
    }

    #[tokio::test]
    async fn expired_durable_entry_is_absent() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::new(Some(store.clone()));

        cache
            .set("k", &1u64, Duration::from_millis(10), Duration::from_secs(0))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let miss: Option<u64> = cache.get("k", Duration::from_secs(60)).await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn durable_failures_are_swallowed() {
        let cache = TieredCache::new(Some(Arc::new(BrokenStore)));

        // la escritura no propaga el fallo y el tier local queda autoritativo
        cache
            .set("k", &"v".to_string(), Duration::from_secs(60), Duration::from_secs(60))
            .await;
        let hit: Option<String> = cache.get("k", Duration::from_secs(60)).await;
        assert_eq!(hit.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn works_without_durable_tier() {
        let cache = TieredCache::new(None);
        cache
            .set("k", &true, Duration::from_secs(60), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get::<bool>("k", Duration::from_secs(60)).await, Some(true));
        assert_eq!(cache.get::<bool>("nada", Duration::from_secs(60)).await, None);
    }
}
