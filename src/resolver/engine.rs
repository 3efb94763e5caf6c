use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ContentResolver;
use crate::cache::TieredCache;
use crate::config::Config;
use crate::error::ResolveError;
use crate::flight::Coalescer;
use crate::model::{BatchEntry, ResolvedRecord, StreamLocator, TrackMetadata};
use crate::pool::{PoolStats, WorkerPool};
use crate::store::DurableStore;
use crate::sweeper::{SweepFlights, Sweeper};

fn track_key(id: &str) -> String {
    format!("track:{id}")
}

fn meta_key(id: &str) -> String {
    format!("meta:{id}")
}

fn stream_key(id: &str) -> String {
    format!("stream:{id}")
}

fn related_key(id: &str) -> String {
    format!("related:{id}")
}

fn search_key(query: &str, limit: usize) -> String {
    format!("search:{}:{limit}", query.to_lowercase())
}

/// Valida un media id opaco y lo devuelve recortado.
fn validate_id(id: &str) -> Result<String, ResolveError> {
    static ID_PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = ID_PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("patrón de id válido"));

    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(ResolveError::validation("media id must not be empty"));
    }
    if !pattern.is_match(trimmed) {
        return Err(ResolveError::validation(format!(
            "media id `{trimmed}` contains invalid characters"
        )));
    }

    Ok(trimmed.to_string())
}

fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    let delta = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(300));
    Utc::now() + delta
}

/// Orquestador de resolución: combina caché de dos niveles, coalescing por
/// clave y admisión acotada delante del Content Resolver.
///
/// El motor es el único escritor de entradas de caché; los coalescedores
/// son los únicos escritores de registros en vuelo. Los vuelos hoja
/// (`meta:`, `stream:`) pasan por el pool; los compuestos (`track:`,
/// `related:`, `search:`) no retienen slot mientras esperan otros vuelos,
/// así el tope de `max_concurrency` aplica exactamente a las llamadas
/// upstream simultáneas sin riesgo de auto-bloqueo.
pub struct ResolutionEngine {
    resolver: Arc<dyn ContentResolver>,
    cache: TieredCache,
    pool: Arc<WorkerPool>,
    config: Arc<Config>,
    meta_flights: Coalescer<TrackMetadata>,
    stream_flights: Coalescer<StreamLocator>,
    track_flights: Coalescer<ResolvedRecord>,
    related_flights: Coalescer<Vec<ResolvedRecord>>,
    search_flights: Coalescer<Vec<ResolvedRecord>>,
}

impl ResolutionEngine {
    pub fn new(
        resolver: Arc<dyn ContentResolver>,
        durable: Option<Arc<dyn DurableStore>>,
        config: Config,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(config.max_concurrency));

        info!(
            "🎛️ Motor de resolución listo: {} slots, lote máx {}",
            config.max_concurrency, config.max_batch_size
        );

        Self {
            resolver,
            cache: TieredCache::new(durable),
            meta_flights: Coalescer::pooled("meta", Arc::clone(&pool)),
            stream_flights: Coalescer::pooled("stream", Arc::clone(&pool)),
            track_flights: Coalescer::direct("track"),
            related_flights: Coalescer::direct("related"),
            search_flights: Coalescer::direct("search"),
            pool,
            config: Arc::new(config),
        }
    }

    /// Arranca el Sweeper sobre el tier local y las tablas en vuelo.
    pub fn start_sweeper(&self) -> Sweeper {
        let flights: Vec<Arc<dyn SweepFlights>> = vec![
            Arc::new(self.meta_flights.clone()),
            Arc::new(self.stream_flights.clone()),
            Arc::new(self.track_flights.clone()),
            Arc::new(self.related_flights.clone()),
            Arc::new(self.search_flights.clone()),
        ];

        Sweeper::start(
            self.cache.local().clone(),
            flights,
            self.config.inflight_grace,
            self.config.inflight_sweep_interval,
            self.config.cache_sweep_interval,
        )
    }

    /// Cierra la admisión del pool. Las tareas en curso terminan solas.
    pub fn shutdown(&self) {
        self.pool.close();
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Resuelve un id a un registro completo (metadata + locator).
    pub async fn resolve_item(&self, id: &str) -> Result<ResolvedRecord, ResolveError> {
        let id = validate_id(id)?;
        let key = track_key(&id);
        let ttl = self.config.track_ttl;

        if let Some(record) = self.cache.get::<ResolvedRecord>(&key, ttl.local).await {
            return Ok(record);
        }

        let engine = self.clone();
        let flight_key = key.clone();
        self.track_flights
            .run_exclusive(&key, move || async move {
                // otro vuelo pudo haber escrito mientras esperábamos la entry
                if let Some(record) = engine
                    .cache
                    .get::<ResolvedRecord>(&flight_key, ttl.local)
                    .await
                {
                    return Ok(record);
                }

                // metadata y locator en paralelo, cada uno coalescido y
                // admitido por el pool
                let (meta, locator) =
                    tokio::try_join!(engine.metadata_for(&id), engine.locator_for(&id))?;

                let record = ResolvedRecord::complete(meta, locator);
                engine
                    .cache
                    .set(&flight_key, &record, ttl.local, ttl.durable)
                    .await;

                Ok(record)
            })
            .await
    }

    /// Resuelve un lote de ids de forma independiente: los fallos por id se
    /// reportan como entradas de error sin abortar a los hermanos.
    pub async fn resolve_batch(&self, ids: &[String]) -> Result<Vec<BatchEntry>, ResolveError> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();

        if unique.is_empty() {
            return Err(ResolveError::validation("batch must contain at least one id"));
        }

        if unique.len() > self.config.max_batch_size {
            return Err(ResolveError::validation(format!(
                "batch of {} ids exceeds the {} id limit",
                unique.len(),
                self.config.max_batch_size
            )));
        }

        let outcomes = join_all(unique.iter().map(|id| self.resolve_item(id))).await;

        Ok(unique
            .into_iter()
            .zip(outcomes)
            .map(|(id, outcome)| match outcome {
                Ok(record) => BatchEntry::Resolved { record },
                Err(err) => BatchEntry::Failed {
                    id,
                    error: err.to_string(),
                },
            })
            .collect())
    }

    /// Camino rápido de relacionados: devuelve registros ligeros (sin
    /// locator) de inmediato y programa el enriquecimiento en segundo plano.
    pub async fn resolve_related(&self, id: &str) -> Result<Vec<ResolvedRecord>, ResolveError> {
        let id = validate_id(id)?;
        let key = related_key(&id);
        let ttl = self.config.related_ttl;

        let list = match self.cache.get::<Vec<ResolvedRecord>>(&key, ttl.local).await {
            Some(list) => list,
            None => {
                let engine = self.clone();
                let seed = id.clone();
                let flight_key = key.clone();
                self.related_flights
                    .run_exclusive(&key, move || async move {
                        engine.build_related(&seed, &flight_key).await
                    })
                    .await?
            }
        };

        if list.iter().any(|record| record.stream_url.is_none()) {
            // tarea desacoplada: su fallo jamás llega a un llamador
            let engine = self.clone();
            let seed = id.clone();
            tokio::spawn(async move {
                if let Err(err) = engine.enrich_related(&seed).await {
                    warn!("enriquecimiento en segundo plano de {} falló: {}", seed, err);
                }
            });
        }

        Ok(list)
    }

    /// Camino lento: como el rápido, pero completa síncronamente los
    /// locators que falten antes de devolver. Idempotente y seguro frente
    /// al enriquecimiento de fondo: el coalescing por item evita fetches
    /// duplicados y la fusión solo rellena campos vacíos.
    pub async fn resolve_related_with_streams(
        &self,
        id: &str,
    ) -> Result<Vec<ResolvedRecord>, ResolveError> {
        let id = validate_id(id)?;
        let list = self.resolve_related(&id).await?;

        if list.iter().all(|record| record.stream_url.is_some()) {
            return Ok(list);
        }

        match self.enrich_related(&id).await? {
            Some(merged) => Ok(merged),
            None => Ok(list),
        }
    }

    /// Búsqueda cacheada por query normalizada + límite.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ResolvedRecord>, ResolveError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(ResolveError::validation("search query must not be empty"));
        }
        if limit == 0 || limit > self.config.max_search_limit {
            return Err(ResolveError::validation(format!(
                "search limit must be between 1 and {}, got {}",
                self.config.max_search_limit, limit
            )));
        }

        let key = search_key(trimmed, limit);
        let ttl = self.config.search_ttl;

        if let Some(results) = self.cache.get::<Vec<ResolvedRecord>>(&key, ttl.local).await {
            return Ok(results);
        }

        let engine = self.clone();
        let owned_query = trimmed.to_string();
        let flight_key = key.clone();
        self.search_flights
            .run_exclusive(&key, move || async move {
                if let Some(results) = engine
                    .cache
                    .get::<Vec<ResolvedRecord>>(&flight_key, ttl.local)
                    .await
                {
                    return Ok(results);
                }

                let resolver = Arc::clone(&engine.resolver);
                let upstream_query = owned_query.clone();
                let raw = engine
                    .pool
                    .run(async move { resolver.search_raw(&upstream_query).await })
                    .await
                    .map_err(|closed| ResolveError::aborted(flight_key.as_str(), closed.to_string()))?
                    .map_err(|e| ResolveError::upstream(owned_query.as_str(), e))?;

                let expires_at = expiry_after(ttl.durable);
                let results: Vec<ResolvedRecord> = raw
                    .into_iter()
                    .take(limit)
                    .map(|meta| ResolvedRecord::lightweight(meta, expires_at))
                    .collect();

                engine
                    .cache
                    .set(&flight_key, &results, ttl.local, ttl.durable)
                    .await;

                Ok(results)
            })
            .await
    }

    /// Metadata por id, coalescida y cacheada con los TTLs de metadata.
    async fn metadata_for(&self, id: &str) -> Result<TrackMetadata, ResolveError> {
        let key = meta_key(id);
        let ttl = self.config.metadata_ttl;

        if let Some(meta) = self.cache.get::<TrackMetadata>(&key, ttl.local).await {
            return Ok(meta);
        }

        let resolver = Arc::clone(&self.resolver);
        let cache = self.cache.clone();
        let owned_id = id.to_string();
        let flight_key = key.clone();
        self.meta_flights
            .run_exclusive(&key, move || async move {
                if let Some(meta) = cache.get::<TrackMetadata>(&flight_key, ttl.local).await {
                    return Ok(meta);
                }

                let meta = resolver
                    .fetch_metadata(&owned_id)
                    .await
                    .map_err(|e| ResolveError::upstream(owned_id.as_str(), e))?;

                cache.set(&flight_key, &meta, ttl.local, ttl.durable).await;
                Ok(meta)
            })
            .await
    }

    /// Locator de stream por id, coalescido y cacheado con TTL acotado muy
    /// por debajo de su validez real.
    async fn locator_for(&self, id: &str) -> Result<StreamLocator, ResolveError> {
        let key = stream_key(id);
        let ttl = self.config.stream_ttl;

        if let Some(locator) = self.cache.get::<StreamLocator>(&key, ttl.local).await {
            return Ok(locator);
        }

        let resolver = Arc::clone(&self.resolver);
        let cache = self.cache.clone();
        let owned_id = id.to_string();
        let flight_key = key.clone();
        self.stream_flights
            .run_exclusive(&key, move || async move {
                if let Some(locator) = cache.get::<StreamLocator>(&flight_key, ttl.local).await {
                    return Ok(locator);
                }

                let locator = resolver
                    .fetch_stream_locator(&owned_id)
                    .await
                    .map_err(|e| ResolveError::upstream(owned_id.as_str(), e))?;

                cache
                    .set(&flight_key, &locator, ttl.local, ttl.durable)
                    .await;
                Ok(locator)
            })
            .await
    }

    /// Construye la lista ligera de relacionados dentro de su vuelo.
    async fn build_related(
        &self,
        seed: &str,
        key: &str,
    ) -> Result<Vec<ResolvedRecord>, ResolveError> {
        let ttl = self.config.related_ttl;
        if let Some(list) = self.cache.get::<Vec<ResolvedRecord>>(key, ttl.local).await {
            return Ok(list);
        }

        let resolver = Arc::clone(&self.resolver);
        let seed_owned = seed.to_string();
        let ids = self
            .pool
            .run(async move { resolver.fetch_related_ids(&seed_owned).await })
            .await
            .map_err(|closed| ResolveError::aborted(key, closed.to_string()))?
            .map_err(|e| ResolveError::upstream(seed, e))?;

        // el id semilla nunca aparece en su propia lista
        let ids: Vec<String> = ids
            .into_iter()
            .filter(|rid| rid != seed)
            .take(self.config.related_limit)
            .collect();

        let expires_at = expiry_after(ttl.durable);
        let metas = join_all(ids.iter().map(|rid| self.metadata_for(rid))).await;

        let mut records = Vec::with_capacity(ids.len());
        for (rid, outcome) in ids.into_iter().zip(metas) {
            match outcome {
                Ok(meta) => records.push(ResolvedRecord::lightweight(meta, expires_at)),
                Err(err) => warn!("metadata del relacionado {} descartada: {}", rid, err),
            }
        }

        self.cache.set(key, &records, ttl.local, ttl.durable).await;
        Ok(records)
    }

    /// Rellena los locators que falten en la lista cacheada de `seed` y la
    /// republica bajo la misma clave. Devuelve la lista fusionada, o `None`
    /// si la entrada ya venció (la próxima resolución la reconstruye).
    async fn enrich_related(
        &self,
        seed: &str,
    ) -> Result<Option<Vec<ResolvedRecord>>, ResolveError> {
        let key = related_key(seed);
        let ttl = self.config.related_ttl;

        let Some(list) = self.cache.get::<Vec<ResolvedRecord>>(&key, ttl.local).await else {
            return Ok(None);
        };

        let missing: Vec<String> = list
            .iter()
            .filter(|record| record.stream_url.is_none())
            .map(|record| record.id.clone())
            .collect();

        if missing.is_empty() {
            return Ok(Some(list));
        }

        let fetched = join_all(missing.iter().map(|rid| self.locator_for(rid))).await;
        let mut locators: HashMap<String, StreamLocator> = HashMap::new();
        for (rid, outcome) in missing.into_iter().zip(fetched) {
            match outcome {
                Ok(locator) => {
                    locators.insert(rid, locator);
                }
                Err(err) => warn!("locator del relacionado {} no disponible: {}", rid, err),
            }
        }

        // política de fusión: solo se rellenan campos vacíos, así primer
        // plano y fondo convergen sin importar quién termina último
        let mut merged = self
            .cache
            .get::<Vec<ResolvedRecord>>(&key, ttl.local)
            .await
            .unwrap_or(list);

        let mut changed = false;
        for record in merged.iter_mut() {
            if record.stream_url.is_none() {
                if let Some(locator) = locators.get(&record.id) {
                    record.stream_url = Some(locator.url.clone());
                    record.expires_at = locator.expires_at;
                    changed = true;
                }
            }
        }

        if changed {
            self.cache.set(&key, &merged, ttl.local, ttl.durable).await;
            debug!("lista de relacionados de {} republicada con locators", seed);
        }

        Ok(Some(merged))
    }
}

impl Clone for ResolutionEngine {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            cache: self.cache.clone(),
            pool: Arc::clone(&self.pool),
            config: Arc::clone(&self.config),
            meta_flights: self.meta_flights.clone(),
            stream_flights: self.stream_flights.clone(),
            track_flights: self.track_flights.clone(),
            related_flights: self.related_flights.clone(),
            search_flights: self.search_flights.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MockContentResolver;
    use pretty_assertions::assert_eq;

    fn engine_with(resolver: MockContentResolver) -> ResolutionEngine {
        ResolutionEngine::new(Arc::new(resolver), None, Config::default())
    }

    #[test]
    fn id_validation() {
        assert!(validate_id("dQw4w9WgXcQ").is_ok());
        assert!(validate_id("  dQw4w9WgXcQ  ").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("   ").is_err());
        assert!(validate_id("id con espacios").is_err());
        assert!(validate_id("../etc/passwd").is_err());
    }

    #[test]
    fn keys_are_namespaced_per_lookup_kind() {
        assert_eq!(track_key("abc"), "track:abc");
        assert_ne!(meta_key("abc"), stream_key("abc"));
        assert_eq!(search_key("  Lofi Beats", 5), "search:  lofi beats:5");
    }

    // el mock sin expectativas entra en pánico si se lo llama: estas
    // pruebas verifican que la validación corta antes de ir upstream

    #[tokio::test]
    async fn oversized_batch_fails_fast_without_upstream_calls() {
        let engine = engine_with(MockContentResolver::new());
        let ids: Vec<String> = (0..16).map(|i| format!("id{i:08}")).collect();

        let err = engine.resolve_batch(&ids).await.unwrap_err();
        assert!(matches!(err, ResolveError::Validation(_)));
        assert!(err.to_string().contains("exceeds the 15 id limit"));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let engine = engine_with(MockContentResolver::new());
        let err = engine.resolve_batch(&[]).await.unwrap_err();
        assert!(matches!(err, ResolveError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let engine = engine_with(MockContentResolver::new());
        let err = engine.search("   ", 5).await.unwrap_err();
        assert!(matches!(err, ResolveError::Validation(_)));
    }

    #[tokio::test]
    async fn out_of_range_limit_is_rejected() {
        let engine = engine_with(MockContentResolver::new());
        assert!(engine.search("lofi", 0).await.is_err());
        assert!(engine.search("lofi", 26).await.is_err());
    }

    #[tokio::test]
    async fn upstream_failure_carries_the_offending_id() {
        let mut resolver = MockContentResolver::new();
        resolver
            .expect_fetch_metadata()
            .returning(|_| anyhow::bail!("instancia caída"));
        resolver
            .expect_fetch_stream_locator()
            .returning(|_| anyhow::bail!("instancia caída"));

        let engine = engine_with(resolver);
        let err = engine.resolve_item("dQw4w9WgXcQ").await.unwrap_err();

        match err {
            ResolveError::Upstream { id, reason } => {
                assert_eq!(id, "dQw4w9WgXcQ");
                assert!(reason.contains("instancia caída"));
            }
            other => panic!("se esperaba Upstream, llegó {other:?}"),
        }
    }
}
