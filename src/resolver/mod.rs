pub mod engine;
pub mod invidious;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{StreamLocator, TrackMetadata};

pub use engine::ResolutionEngine;
pub use invidious::InvidiousResolver;

/// Capacidad upstream opaca consumida por el motor de resolución.
///
/// Puede fallar y puede tardar segundos; el motor garantiza que se la llama
/// como máximo una vez por clave por ciclo de resolución (coalescing) y con
/// concurrencia acotada (pool). Los resultados se normalizan aquí mismo a
/// las formas de `model`, así ningún componente aguas abajo distingue qué
/// variante upstream los produjo.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Metadata cruda (título, artista, duración, miniatura) de un media id.
    async fn fetch_metadata(&self, id: &str) -> Result<TrackMetadata>;

    /// Locator de stream reproducible, de validez limitada en el tiempo.
    async fn fetch_stream_locator(&self, id: &str) -> Result<StreamLocator>;

    /// Ids relacionados con el id semilla (lookup barato).
    async fn fetch_related_ids(&self, id: &str) -> Result<Vec<String>>;

    /// Búsqueda cruda sin recortar.
    async fn search_raw(&self, query: &str) -> Result<Vec<TrackMetadata>>;
}
