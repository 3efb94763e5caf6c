use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registro resuelto que se entrega a los llamadores externos.
///
/// El `expires_at` comunica hasta cuándo es válido el locator de stream para
/// que el cliente re-resuelva en vez de asumir permanencia. En el camino
/// rápido de relacionados el `stream_url` llega vacío y se rellena después.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
    pub stream_url: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl ResolvedRecord {
    /// Registro ligero: solo metadata, sin locator de stream.
    pub fn lightweight(meta: TrackMetadata, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: meta.id,
            title: meta.title,
            artist: meta.artist,
            duration_secs: meta.duration_secs,
            thumbnail: meta.thumbnail,
            stream_url: None,
            expires_at,
        }
    }

    /// Registro completo a partir de metadata + locator.
    pub fn complete(meta: TrackMetadata, locator: StreamLocator) -> Self {
        Self {
            id: meta.id,
            title: meta.title,
            artist: meta.artist,
            duration_secs: meta.duration_secs,
            thumbnail: meta.thumbnail,
            stream_url: Some(locator.url),
            expires_at: locator.expires_at,
        }
    }
}

/// Metadata cruda normalizada en la frontera del resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
}

/// Locator de stream reproducible con expiración explícita.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamLocator {
    pub url: String,
    pub mime_type: String,
    pub expires_at: DateTime<Utc>,
}

/// Entrada de resultado de un lote: los fallos individuales no abortan
/// a los hermanos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchEntry {
    Resolved { record: ResolvedRecord },
    Failed { id: String, error: String },
}

impl BatchEntry {
    pub fn record(&self) -> Option<&ResolvedRecord> {
        match self {
            Self::Resolved { record } => Some(record),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
