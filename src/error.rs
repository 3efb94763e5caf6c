use thiserror::Error;

/// Errores que el motor de resolución expone a sus llamadores.
///
/// Los fallos del tier durable NO aparecen aquí: se registran y se suprimen
/// dentro del caché de dos niveles (política degradado-pero-disponible).
/// `Clone` es necesario porque el coalescer reparte el mismo desenlace a
/// todos los llamadores adjuntos a un vuelo.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// El Content Resolver falló o devolvió un payload inutilizable.
    #[error("upstream lookup failed for `{id}`: {reason}")]
    Upstream { id: String, reason: String },

    /// La petición no pasó validación; no se programó trabajo upstream.
    #[error("invalid request: {0}")]
    Validation(String),

    /// La tarea de resolución no llegó a completarse (pool cerrado o panic).
    #[error("resolution task for `{key}` was aborted: {reason}")]
    Aborted { key: String, reason: String },
}

impl ResolveError {
    /// Envuelve un error del resolver upstream con el id ofensor.
    pub fn upstream(id: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Upstream {
            id: id.into(),
            reason: format!("{err:#}"),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn aborted(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Aborted {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
