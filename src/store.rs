use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, info};

/// Capacidad de almacenamiento durable usada como segundo tier del caché.
///
/// Sin garantías transaccionales entre claves. Cada implementación hace
/// cumplir su propio TTL: una entrada vencida se reporta como `Ok(None)`,
/// nunca como dato pasado de fecha.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()>;
}

/// Registro persistido en disco junto con su ventana de validez.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    stored_at_epoch: u64,
    ttl_secs: u64,
    payload: String,
}

impl StoredRecord {
    fn is_expired(&self, now_epoch: u64) -> bool {
        now_epoch >= self.stored_at_epoch.saturating_add(self.ttl_secs)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Store durable basado en archivos JSON, un archivo por clave.
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)
            .await
            .context("no se pudo crear el directorio del store durable")?;

        info!("📁 Store durable inicializado en: {}", data_dir.display());

        Ok(Self { data_dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Las claves llevan `:` de namespace; se aplanan a nombre de archivo
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            })
            .collect();
        self.data_dir.join(format!("{sanitized}.json"))
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);

        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("error leyendo entrada del store durable"),
        };

        let record: StoredRecord =
            serde_json::from_str(&raw).context("entrada corrupta en el store durable")?;

        if record.is_expired(epoch_secs()) {
            debug!("entrada durable vencida para {}, eliminando", key);
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(record.payload))
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        let record = StoredRecord {
            stored_at_epoch: epoch_secs(),
            ttl_secs,
            payload: value,
        };

        let json = serde_json::to_string(&record)?;
        fs::write(self.path_for(key), json)
            .await
            .context("error escribiendo entrada del store durable")?;

        debug!("💾 Entrada durable escrita para {}", key);
        Ok(())
    }
}

/// Store durable en memoria: tests y modo degradado sin directorio de datos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(record) = self.entries.get(key) else {
            return Ok(None);
        };
        if record.is_expired(epoch_secs()) {
            drop(record);
            self.entries.remove(key);
            return Ok(None);
        }
        Ok(Some(record.payload.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredRecord {
                stored_at_epoch: epoch_secs(),
                ttl_secs,
                payload: value,
            },
        );
        Ok(())
    }
}
