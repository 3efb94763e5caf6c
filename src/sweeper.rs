use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::LocalCache;
use crate::flight::Coalescer;

/// Tabla de vuelos barrible, sin importar el tipo de resultado que reparte.
pub trait SweepFlights: Send + Sync {
    /// Retira los registros más viejos que `grace` y devuelve cuántos.
    fn sweep_stale(&self, grace: Duration) -> usize;

    fn table_name(&self) -> &'static str;
}

impl<T: Clone + Send + Sync + 'static> SweepFlights for Coalescer<T> {
    fn sweep_stale(&self, grace: Duration) -> usize {
        self.sweep(grace)
    }

    fn table_name(&self) -> &'static str {
        self.name()
    }
}

/// Mantenimiento periódico en segundo plano.
///
/// Dos bucles independientes: uno retira registros en vuelo huérfanos por
/// TTL de gracia (red de seguridad contra tareas colgadas, no cancelación)
/// y otro desaloja entradas vencidas del tier local. Ninguno toca el tier
/// durable: cada store aplica su propio TTL al leer.
pub struct Sweeper {
    token: CancellationToken,
    inflight_loop: JoinHandle<()>,
    cache_loop: JoinHandle<()>,
}

impl Sweeper {
    pub fn start(
        local: LocalCache,
        flights: Vec<Arc<dyn SweepFlights>>,
        grace: Duration,
        inflight_interval: Duration,
        cache_interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();

        info!(
            "🧹 Sweeper activo: vuelos cada {}s (gracia {}s), caché cada {}s",
            inflight_interval.as_secs(),
            grace.as_secs(),
            cache_interval.as_secs()
        );

        let inflight_token = token.clone();
        let inflight_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inflight_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // el primer tick es inmediato

            loop {
                tokio::select! {
                    _ = inflight_token.cancelled() => break,
                    _ = ticker.tick() => {
                        for table in &flights {
                            let removed = table.sweep_stale(grace);
                            if removed > 0 {
                                debug!(
                                    "🧹 {} vuelos huérfanos retirados de `{}`",
                                    removed,
                                    table.table_name()
                                );
                            }
                        }
                    }
                }
            }
        });

        let cache_token = token.clone();
        let cache_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cache_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = local.cleanup_expired();
                        if removed > 0 {
                            debug!("🧹 {} entradas vencidas desalojadas del tier local", removed);
                        }
                    }
                }
            }
        });

        Self {
            token,
            inflight_loop,
            cache_loop,
        }
    }

    /// Detiene ambos bucles y espera a que terminen.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.inflight_loop.await;
        let _ = self.cache_loop.await;
        info!("🧹 Sweeper detenido");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn evicts_expired_local_entries_on_schedule() {
        let local = LocalCache::new();
        local.insert("viejo".into(), json!(1), Duration::from_millis(10));
        local.insert("nuevo".into(), json!(2), Duration::from_secs(600));

        let sweeper = Sweeper::start(
            local.clone(),
            Vec::new(),
            Duration::from_secs(300),
            Duration::from_secs(600),
            Duration::from_millis(40),
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(local.len(), 1);
        assert!(local.get("nuevo").is_some());

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_both_loops() {
        let sweeper = Sweeper::start(
            LocalCache::new(),
            Vec::new(),
            Duration::from_secs(300),
            Duration::from_millis(20),
            Duration::from_millis(20),
        );

        // no debe colgarse esperando el próximo tick
        tokio::time::timeout(Duration::from_secs(1), sweeper.shutdown())
            .await
            .expect("el shutdown del sweeper no debe bloquear");
    }

    #[tokio::test]
    async fn reclaims_orphaned_flight_records() {
        let flights: Coalescer<u32> = Coalescer::direct("test");
        let gate = Arc::new(tokio::sync::Notify::new());

        let opened = gate.clone();
        let attached = flights.clone();
        let _pending = tokio::spawn(async move {
            attached
                .run_exclusive("k", move || async move {
                    opened.notified().await;
                    Ok(0)
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(flights.in_flight(), 1);

        let sweeper = Sweeper::start(
            LocalCache::new(),
            vec![Arc::new(flights.clone())],
            Duration::ZERO, // todo registro cuenta como huérfano
            Duration::from_millis(30),
            Duration::from_secs(600),
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(flights.in_flight(), 0);

        sweeper.shutdown().await;
        gate.notify_waiters();
    }
}
