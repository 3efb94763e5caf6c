use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

/// El pool fue cerrado durante el teardown; no se admite más trabajo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

/// Instantánea de ocupación del pool para logs y diagnóstico.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub max_concurrency: usize,
    pub active: usize,
    pub queued: usize,
}

/// Ejecutor genérico con admisión acotada.
///
/// Mantiene `max_concurrency` slots sobre un semáforo justo de tokio: el
/// trabajo excedente espera en orden FIFO de llegada, sin prioridades. Un
/// trabajo que falla resuelve a su llamador con el fallo y libera el slot;
/// el pool no reintenta ni se envenena. No tiene conocimiento de dominio.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    active: AtomicUsize,
    queued: AtomicUsize,
}

impl WorkerPool {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        }
    }

    /// Ejecuta `work` bajo un slot del pool, esperando admisión si hace
    /// falta. Devuelve `Err(PoolClosed)` solo si el pool fue cerrado.
    pub async fn run<F>(&self, work: F) -> Result<F::Output, PoolClosed>
    where
        F: Future,
    {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let permit = self.semaphore.acquire().await;
        self.queued.fetch_sub(1, Ordering::SeqCst);

        let _permit = permit.map_err(|_| PoolClosed)?;

        self.active.fetch_add(1, Ordering::SeqCst);
        let output = work.await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        Ok(output)
    }

    /// Cierra la admisión: los trabajos en cola o futuros reciben
    /// `PoolClosed`; los que ya corren terminan normalmente.
    pub fn close(&self) {
        debug!("cerrando worker pool ({} activos)", self.active.load(Ordering::SeqCst));
        self.semaphore.close();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_concurrency: self.max_concurrency,
            active: self.active.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
        }
    }
}
