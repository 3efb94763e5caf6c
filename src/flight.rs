use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::ResolveError;
use crate::pool::WorkerPool;

type FlightOutcome<T> = Result<T, ResolveError>;
type SharedFlight<T> = Shared<BoxFuture<'static, FlightOutcome<T>>>;

/// Registro de un vuelo en curso. Como máximo existe uno por clave.
struct FlightRecord<T: Clone> {
    handle: SharedFlight<T>,
    started_at: Instant,
}

/// Coalescedor de peticiones por clave.
///
/// `run_exclusive` garantiza que la factory cara se ejecuta como mucho una
/// vez por ventana en vuelo: los llamadores concurrentes de la misma clave
/// se adjuntan al resultado pendiente y todos observan el mismo desenlace.
/// La creación del registro es atómica vía la entry API de DashMap; el
/// registro se retira al asentarse la tarea, justo antes de resolver a los
/// adjuntos. Si la tarea queda colgada, el Sweeper reclama el registro por
/// TTL de gracia (red de seguridad, no cancelación).
///
/// Con un `WorkerPool`, la factory se ejecuta bajo admisión acotada. Los
/// vuelos compuestos que a su vez esperan otros vuelos se crean sin pool
/// para no retener un slot mientras esperan otro.
pub struct Coalescer<T: Clone + Send + Sync + 'static> {
    name: &'static str,
    flights: Arc<DashMap<String, FlightRecord<T>>>,
    pool: Option<Arc<WorkerPool>>,
}

impl<T: Clone + Send + Sync + 'static> Coalescer<T> {
    /// Coalescedor cuyo trabajo pasa por el pool (fetches upstream hoja).
    pub fn pooled(name: &'static str, pool: Arc<WorkerPool>) -> Self {
        Self {
            name,
            flights: Arc::new(DashMap::new()),
            pool: Some(pool),
        }
    }

    /// Coalescedor sin admisión propia (operaciones compuestas).
    pub fn direct(name: &'static str) -> Self {
        Self {
            name,
            flights: Arc::new(DashMap::new()),
            pool: None,
        }
    }

    /// Adjunta al vuelo existente de `key` o crea uno nuevo con `factory`.
    pub async fn run_exclusive<F, Fut>(&self, key: &str, factory: F) -> FlightOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlightOutcome<T>> + Send + 'static,
    {
        let handle = match self.flights.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!("{}: adjuntando llamador al vuelo de {}", self.name, key);
                entry.get().handle.clone()
            }
            Entry::Vacant(entry) => {
                let work = factory();
                let flights = Arc::clone(&self.flights);
                let pool = self.pool.clone();
                let owned_key = key.to_string();

                // La tarea corre desacoplada de los llamadores: sobrevive a
                // que todos suelten su espera y retira su registro antes de
                // resolver a los adjuntos.
                let task = tokio::spawn(async move {
                    let outcome = match pool {
                        Some(pool) => match pool.run(work).await {
                            Ok(outcome) => outcome,
                            Err(closed) => {
                                Err(ResolveError::aborted(&owned_key, closed.to_string()))
                            }
                        },
                        None => work.await,
                    };
                    flights.remove(&owned_key);
                    outcome
                });

                let flights = Arc::clone(&self.flights);
                let owned_key = key.to_string();
                let handle = task
                    .map(move |joined| match joined {
                        Ok(outcome) => outcome,
                        Err(join_err) => {
                            // un panic no pasó por el camino de retiro normal
                            flights.remove(&owned_key);
                            Err(ResolveError::aborted(&owned_key, join_err.to_string()))
                        }
                    })
                    .boxed()
                    .shared();

                entry.insert(FlightRecord {
                    handle: handle.clone(),
                    started_at: Instant::now(),
                });
                handle
            }
        };

        handle.await
    }

    /// Retira registros más viejos que `grace`. Solo previene fugas de
    /// bookkeeping: no detiene la tarea subyacente.
    pub fn sweep(&self, grace: Duration) -> usize {
        let before = self.flights.len();
        self.flights
            .retain(|_, record| record.started_at.elapsed() < grace);
        let removed = before.saturating_sub(self.flights.len());

        if removed > 0 {
            debug!("{}: {} vuelos huérfanos retirados", self.name, removed);
        }

        removed
    }

    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Coalescer<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            flights: Arc::clone(&self.flights),
            pool: self.pool.clone(),
        }
    }
}
