//! Pruebas de integración del motor contra un resolver falso que cuenta
//! llamadas: verifican coalescing, caché, lotes y los dos caminos de
//! relacionados sin tocar la red.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use open_resolver::config::TtlPair;
use open_resolver::{
    Config, ContentResolver, MemoryStore, ResolutionEngine, StreamLocator, TrackMetadata,
};

#[derive(Default)]
struct FakeResolver {
    meta_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    related_calls: AtomicUsize,
    search_calls: AtomicUsize,
    failing: Vec<String>,
    failing_streams: Vec<String>,
}

impl FakeResolver {
    fn failing_on(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    fn failing_streams_on(ids: &[&str]) -> Self {
        Self {
            failing_streams: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    fn meta_calls(&self) -> usize {
        self.meta_calls.load(Ordering::SeqCst)
    }

    fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentResolver for FakeResolver {
    async fn fetch_metadata(&self, id: &str) -> Result<TrackMetadata> {
        self.meta_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;

        if self.failing.iter().any(|f| f == id) {
            anyhow::bail!("metadata de {} no disponible", id);
        }

        Ok(TrackMetadata {
            id: id.to_string(),
            title: format!("Título {id}"),
            artist: Some("Artista".to_string()),
            duration_secs: Some(180),
            thumbnail: None,
        })
    }

    async fn fetch_stream_locator(&self, id: &str) -> Result<StreamLocator> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;

        if self.failing.iter().chain(&self.failing_streams).any(|f| f == id) {
            anyhow::bail!("stream de {} no disponible", id);
        }

        Ok(StreamLocator {
            url: format!("https://cdn.example/{id}.m4a"),
            mime_type: "audio/mp4".to_string(),
            expires_at: Utc::now() + ChronoDuration::hours(6),
        })
    }

    async fn fetch_related_ids(&self, id: &str) -> Result<Vec<String>> {
        self.related_calls.fetch_add(1, Ordering::SeqCst);
        // incluye al propio id para verificar la auto-exclusión
        Ok(vec![
            format!("{id}r1"),
            format!("{id}r2"),
            id.to_string(),
        ])
    }

    async fn search_raw(&self, query: &str) -> Result<Vec<TrackMetadata>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..10)
            .map(|i| TrackMetadata {
                id: format!("res{i}"),
                title: format!("{query} {i}"),
                artist: None,
                duration_secs: Some(200),
                thumbnail: None,
            })
            .collect())
    }
}

fn engine_over(resolver: Arc<FakeResolver>) -> ResolutionEngine {
    ResolutionEngine::new(
        resolver,
        Some(Arc::new(MemoryStore::new())),
        Config::default(),
    )
}

#[tokio::test]
async fn concurrent_resolutions_coalesce_into_one_upstream_fetch() {
    let resolver = Arc::new(FakeResolver::default());
    let engine = engine_over(Arc::clone(&resolver));

    let waves = (0..8).map(|_| {
        let engine = engine.clone();
        async move { engine.resolve_item("abc123").await }
    });
    let outcomes = futures::future::join_all(waves).await;

    for outcome in outcomes {
        let record = outcome.unwrap();
        assert_eq!(record.id, "abc123");
        assert!(record.stream_url.is_some());
    }

    assert_eq!(resolver.meta_calls(), 1);
    assert_eq!(resolver.stream_calls(), 1);
}

#[tokio::test]
async fn cached_records_skip_the_upstream_entirely() {
    let resolver = Arc::new(FakeResolver::default());
    let engine = engine_over(Arc::clone(&resolver));

    let first = engine.resolve_item("abc123").await.unwrap();
    let second = engine.resolve_item("abc123").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(resolver.meta_calls(), 1);
    assert_eq!(resolver.stream_calls(), 1);
}

#[tokio::test]
async fn batch_reports_per_id_failures_without_aborting_siblings() {
    let resolver = Arc::new(FakeResolver::failing_on(&["malo"]));
    let engine = engine_over(Arc::clone(&resolver));

    let ids = vec!["bueno1".to_string(), "malo".to_string(), "bueno2".to_string()];
    let entries = engine.resolve_batch(&ids).await.unwrap();

    assert_eq!(entries.len(), 3);
    assert!(entries[0].record().is_some());
    assert!(entries[1].is_failed());
    assert!(entries[2].record().is_some());

    // el lote entero nunca se descarta por un id malo
    assert_eq!(entries[0].record().unwrap().id, "bueno1");
}

#[tokio::test]
async fn batch_deduplicates_before_resolving() {
    let resolver = Arc::new(FakeResolver::default());
    let engine = engine_over(Arc::clone(&resolver));

    let ids = vec![
        "abc123".to_string(),
        " abc123 ".to_string(),
        "xyz789".to_string(),
    ];
    let entries = engine.resolve_batch(&ids).await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(resolver.meta_calls(), 2);
}

#[tokio::test]
async fn fast_path_returns_lightweight_records_and_excludes_the_seed() {
    let resolver = Arc::new(FakeResolver::default());
    let engine = engine_over(Arc::clone(&resolver));

    let records = engine.resolve_related("seed1").await.unwrap();

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.id != "seed1"));
    // el camino rápido no espera locators
    assert!(records.iter().all(|r| r.stream_url.is_none()));
    assert!(records.iter().all(|r| r.title.starts_with("Título")));
    assert_eq!(resolver.related_calls.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.meta_calls(), 2);
}

#[tokio::test]
async fn slow_path_completes_streams_without_duplicate_fetches() {
    let resolver = Arc::new(FakeResolver::default());
    let engine = engine_over(Arc::clone(&resolver));

    // rápido primero (dispara enriquecimiento de fondo), lento después:
    // el coalescing por item y el caché garantizan un fetch por locator
    let fast = engine.resolve_related("seed1").await.unwrap();
    let full = engine.resolve_related_with_streams("seed1").await.unwrap();

    assert_eq!(fast.len(), full.len());
    assert!(full.iter().all(|r| r.stream_url.is_some()));
    assert_eq!(resolver.stream_calls(), 2);
    // ambos caminos comparten la misma lista cacheada
    assert_eq!(resolver.related_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_path_tolerates_individual_locator_failures() {
    let resolver = Arc::new(FakeResolver::failing_streams_on(&["seed1r2"]));
    let engine = engine_over(Arc::clone(&resolver));

    let full = engine.resolve_related_with_streams("seed1").await.unwrap();

    assert_eq!(full.len(), 2);
    let by_id = |id: &str| full.iter().find(|r| r.id == id).unwrap();
    assert!(by_id("seed1r1").stream_url.is_some());
    // el item que falló queda ligero en vez de tumbar la lista
    assert!(by_id("seed1r2").stream_url.is_none());
}

#[tokio::test]
async fn search_is_cached_case_insensitively_and_capped() {
    let resolver = Arc::new(FakeResolver::default());
    let engine = engine_over(Arc::clone(&resolver));

    let first = engine.search("Lofi Beats", 3).await.unwrap();
    assert_eq!(first.len(), 3);

    let second = engine.search("  lofi beats ", 3).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(resolver.search_calls.load(Ordering::SeqCst), 1);

    // otro límite es otra clave
    let wider = engine.search("lofi beats", 5).await.unwrap();
    assert_eq!(wider.len(), 5);
    assert_eq!(resolver.search_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expired_records_are_re_resolved_idempotently() {
    let mut config = Config::default();
    let blink = TtlPair {
        local: Duration::from_millis(40),
        durable: Duration::from_millis(40),
    };
    config.track_ttl = blink;
    config.metadata_ttl = blink;
    config.stream_ttl = blink;

    let resolver = Arc::new(FakeResolver::default());
    let engine = ResolutionEngine::new(Arc::clone(&resolver) as Arc<dyn ContentResolver>, None, config);

    let first = engine.resolve_item("abc123").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = engine.resolve_item("abc123").await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.title, second.title);
    assert_eq!(resolver.meta_calls(), 2);
    assert_eq!(resolver.stream_calls(), 2);
}

#[tokio::test]
async fn shutdown_rejects_new_work_but_keeps_the_cache_readable() {
    let resolver = Arc::new(FakeResolver::default());
    let engine = engine_over(Arc::clone(&resolver));

    let cached = engine.resolve_item("abc123").await.unwrap();
    engine.shutdown();

    // hit de caché: no necesita el pool
    let still = engine.resolve_item("abc123").await.unwrap();
    assert_eq!(cached, still);

    // un miss sí necesita el pool y debe abortar limpio
    let err = engine.resolve_item("nuevo1").await.unwrap_err();
    assert!(matches!(err, open_resolver::ResolveError::Aborted { .. }));
}
