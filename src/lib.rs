//! Caché de resolución de metadata y streams.
//!
//! Frente a un origen de lookup lento y con rate limit, el crate ofrece
//! resolución coalescida por clave, caché de dos niveles con TTLs
//! independientes, un pool de admisión acotada para las llamadas upstream
//! y un barrido periódico de registros huérfanos.

pub mod cache;
pub mod config;
pub mod error;
pub mod flight;
pub mod model;
pub mod pool;
pub mod resolver;
pub mod store;
pub mod sweeper;

pub use cache::TieredCache;
pub use config::Config;
pub use error::ResolveError;
pub use model::{BatchEntry, ResolvedRecord, StreamLocator, TrackMetadata};
pub use resolver::{ContentResolver, InvidiousResolver, ResolutionEngine};
pub use store::{DurableStore, JsonFileStore, MemoryStore};
pub use sweeper::Sweeper;
